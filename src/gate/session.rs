//! Stateless session tokens and the cookie that carries them.
//!
//! A token is `header.claims.signature`, each part base64url without padding,
//! signed with HMAC-SHA256 over `header.claims`. The token only proves that the
//! gate was passed; the subject is a fixed capability name, not an identity.
//! Nothing is stored server-side, so verification is read-only and lock-free.

use axum::http::{
    HeaderMap, HeaderValue, Uri,
    header::{COOKIE, InvalidHeaderValue},
};
use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::Duration;
use hmac::{Hmac, Mac};
use rand::{RngCore, rngs::OsRng};
use secrecy::{ExposeSecret, SecretSlice};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::{fmt, sync::Arc};
use thiserror::Error;
use uuid::Uuid;

use super::clock::Clock;

type HmacSha256 = Hmac<Sha256>;

pub const SESSION_COOKIE_NAME: &str = "sitegate_session";
pub const SESSION_SUBJECT: &str = "gate";
pub const DEFAULT_SESSION_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;
pub const MAX_SESSION_TTL_SECONDS: i64 = 365 * 24 * 60 * 60;
pub const MIN_SESSION_KEY_LENGTH: usize = 32;

const TOKEN_ALG: &str = "HS256";
const TOKEN_TYP: &str = "JWT";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct TokenHeader {
    alg: String,
    typ: String,
}

impl TokenHeader {
    fn hs256() -> Self {
        Self {
            alg: TOKEN_ALG.to_string(),
            typ: TOKEN_TYP.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionClaims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid token format")]
    TokenFormat,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlg(String),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid session key")]
    InvalidKey,
    #[error("session key must be at least {MIN_SESSION_KEY_LENGTH} bytes")]
    KeyTooShort,
    #[error("invalid session ttl")]
    InvalidTtl,
}

/// Outcome of checking an incoming token.
///
/// `is_expired` is only set for tokens whose signature verified, so expiry can
/// be told apart from tampering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStatus {
    pub is_valid: bool,
    pub is_expired: bool,
}

impl SessionStatus {
    const INVALID: Self = Self {
        is_valid: false,
        is_expired: false,
    };
}

#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub claims: SessionClaims,
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, SessionError> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, SessionError> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| SessionError::Base64)?;
    Ok(serde_json::from_slice(&bytes)?)
}

pub struct SessionIssuer {
    key: SecretSlice<u8>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl SessionIssuer {
    /// # Errors
    /// Returns an error if the key is shorter than [`MIN_SESSION_KEY_LENGTH`]
    /// or the ttl is not within `1..=MAX_SESSION_TTL_SECONDS`.
    pub fn new(key: Vec<u8>, ttl: Duration, clock: Arc<dyn Clock>) -> Result<Self, SessionError> {
        if key.len() < MIN_SESSION_KEY_LENGTH {
            return Err(SessionError::KeyTooShort);
        }
        if ttl <= Duration::zero() || ttl.num_seconds() > MAX_SESSION_TTL_SECONDS {
            return Err(SessionError::InvalidTtl);
        }
        Ok(Self {
            key: SecretSlice::from(key),
            ttl,
            clock,
        })
    }

    /// Random signing key for deployments that do not configure one.
    #[must_use]
    pub fn generate_key() -> Vec<u8> {
        let mut key = vec![0u8; MIN_SESSION_KEY_LENGTH];
        OsRng.fill_bytes(&mut key);
        key
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Sign a new token for `subject`, valid from now until now + ttl.
    ///
    /// # Errors
    /// Returns an error if the claims cannot be encoded or the key is unusable.
    pub fn issue(&self, subject: &str) -> Result<IssuedSession, SessionError> {
        let now = self.clock.now().timestamp();
        let claims = SessionClaims {
            sub: subject.to_string(),
            iat: now,
            exp: now
                .checked_add(self.ttl.num_seconds())
                .ok_or(SessionError::InvalidTtl)?,
            jti: Uuid::new_v4().to_string(),
        };

        let header_b64 = b64e_json(&TokenHeader::hs256())?;
        let claims_b64 = b64e_json(&claims)?;
        let signing_input = format!("{header_b64}.{claims_b64}");

        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature_b64 = Base64UrlUnpadded::encode_string(&mac.finalize().into_bytes());

        Ok(IssuedSession {
            token: format!("{signing_input}.{signature_b64}"),
            claims,
        })
    }

    /// Check an incoming token. Absent, forged and malformed tokens are invalid;
    /// correctly signed tokens past `exp` are invalid and expired.
    #[must_use]
    pub fn verify(&self, token: Option<&str>) -> SessionStatus {
        let Some(token) = token else {
            return SessionStatus::INVALID;
        };
        match self.decode(token) {
            Ok(claims) if self.clock.now().timestamp() < claims.exp => SessionStatus {
                is_valid: true,
                is_expired: false,
            },
            Ok(_) => SessionStatus {
                is_valid: false,
                is_expired: true,
            },
            Err(_) => SessionStatus::INVALID,
        }
    }

    /// Verify the signature and return the claims without checking expiry.
    ///
    /// # Errors
    /// Returns an error if the token is malformed or the signature does not verify.
    pub fn decode(&self, token: &str) -> Result<SessionClaims, SessionError> {
        let mut parts = token.split('.');
        let header_b64 = parts.next().ok_or(SessionError::TokenFormat)?;
        let claims_b64 = parts.next().ok_or(SessionError::TokenFormat)?;
        let signature_b64 = parts.next().ok_or(SessionError::TokenFormat)?;
        if parts.next().is_some() {
            return Err(SessionError::TokenFormat);
        }

        let signature =
            Base64UrlUnpadded::decode_vec(signature_b64).map_err(|_| SessionError::Base64)?;
        let mut mac = self.mac()?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(claims_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| SessionError::InvalidSignature)?;

        let header: TokenHeader = b64d_json(header_b64)?;
        if header.alg != TOKEN_ALG {
            return Err(SessionError::UnsupportedAlg(header.alg));
        }

        b64d_json(claims_b64)
    }

    /// Build the `Set-Cookie` value carrying `token`.
    ///
    /// # Errors
    /// Returns an error if the token contains bytes not allowed in a header.
    pub fn session_cookie(&self, token: &str, secure: bool) -> Result<HeaderValue, InvalidHeaderValue> {
        let ttl_seconds = self.ttl.num_seconds();
        let mut cookie = format!(
            "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={ttl_seconds}"
        );
        // Plain HTTP stays usable for local testing.
        if secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie)
    }

    fn mac(&self) -> Result<HmacSha256, SessionError> {
        HmacSha256::new_from_slice(self.key.expose_secret()).map_err(|_| SessionError::InvalidKey)
    }
}

impl fmt::Debug for SessionIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionIssuer")
            .field("key", &"***")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

/// `Set-Cookie` value that removes the session cookie.
#[must_use]
pub fn clear_session_cookie(secure: bool) -> HeaderValue {
    if secure {
        HeaderValue::from_static(
            "sitegate_session=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0; Secure",
        )
    } else {
        HeaderValue::from_static("sitegate_session=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
    }
}

/// Pull the session token out of the `Cookie` header(s).
#[must_use]
pub fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|pair| {
            let (key, val) = pair.trim().split_once('=')?;
            (key.trim() == SESSION_COOKIE_NAME && !val.trim().is_empty())
                .then(|| val.trim().to_string())
        })
}

/// Whether the request reached us over HTTPS, either directly or via a proxy
/// that says so.
#[must_use]
pub fn is_secure_request(headers: &HeaderMap, uri: &Uri) -> bool {
    let forwarded_proto = headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim);
    if let Some(proto) = forwarded_proto {
        return proto.eq_ignore_ascii_case("https");
    }

    let forwarded = headers
        .get("forwarded")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|first| {
            first
                .split(';')
                .filter_map(|pair| pair.trim().split_once('='))
                .find(|(key, _)| key.trim().eq_ignore_ascii_case("proto"))
                .map(|(_, proto)| proto.trim().trim_matches('"').to_string())
        });
    if let Some(proto) = forwarded {
        return proto.eq_ignore_ascii_case("https");
    }

    uri.scheme_str() == Some("https")
}
