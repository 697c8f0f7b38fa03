//! # Sitegate (shared-secret site gate)
//!
//! `sitegate` protects a whole site behind a single shared password. There are
//! no user accounts: passing the gate grants a signed, time-bounded session
//! cookie that acts as a capability ("the gate was passed").
//!
//! ## Gate core
//!
//! - **Credentials:** the configured secret is hashed once at startup (Argon2id)
//!   and the plaintext is dropped. Attempts are verified in constant time.
//! - **Lockout:** failures are tracked per client IP. Reaching the attempt limit
//!   inside the attempt window locks the client out for the penalty period; while
//!   locked, no credential check is performed.
//! - **Sessions:** stateless HMAC-SHA256 tokens carried in an `HttpOnly`,
//!   `SameSite=Lax` cookie. `Secure` is only set when the request arrived over HTTPS.
//! - **Audit:** every authentication-relevant action emits a structured
//!   security event.
//!
//! A missing or invalid secret never falls back to a default: the gate answers
//! `500` on every request until the configuration is fixed.

pub mod api;
pub mod cli;
pub mod gate;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(GIT_COMMIT_HASH.len() >= 7);
    }
}
