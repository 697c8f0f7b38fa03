//! Gate configuration and bootstrap.
//!
//! `GateState` is built once at startup and shared behind an `Arc`. Bootstrap
//! hashes the secret and prepares the session key; if either step fails the
//! failure is kept and every gate request answers `500` until the process is
//! restarted with a fixed configuration.

use argon2::Params;
use chrono::{DateTime, Duration, Utc};
use secrecy::SecretString;
use std::{fmt, sync::Arc};
use thiserror::Error;
use tracing::{debug, warn};

use super::{
    clock::{Clock, SystemClock},
    credential::{CredentialError, CredentialVerifier},
    events::SecurityEventLog,
    lockout::{AttemptLimiter, LockoutPolicy, LockoutTracker},
    session::{DEFAULT_SESSION_TTL_SECONDS, SessionError, SessionIssuer},
};

pub const DEFAULT_LOGIN_PATH: &str = "/enter";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("gate secret is not configured")]
    MissingSecret,
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

#[derive(Clone, Debug)]
pub struct GateConfig {
    session_ttl_seconds: i64,
    lockout: LockoutPolicy,
    argon2: Params,
    login_path: String,
    trust_proxy_headers: bool,
}

impl GateConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            lockout: LockoutPolicy::default(),
            argon2: Params::default(),
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            trust_proxy_headers: false,
        }
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_lockout(mut self, lockout: LockoutPolicy) -> Self {
        self.lockout = lockout;
        self
    }

    #[must_use]
    pub fn with_argon2_params(mut self, params: Params) -> Self {
        self.argon2 = params;
        self
    }

    /// Public page unauthenticated visitors are sent to. A missing leading
    /// slash is added.
    #[must_use]
    pub fn with_login_path(mut self, path: &str) -> Self {
        let path = path.trim();
        self.login_path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        self
    }

    /// Key lockouts on `X-Forwarded-For` / `X-Real-IP` instead of the socket
    /// peer. Only safe behind a proxy that overwrites those headers.
    #[must_use]
    pub fn with_trust_proxy_headers(mut self, trust: bool) -> Self {
        self.trust_proxy_headers = trust;
        self
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub fn lockout(&self) -> LockoutPolicy {
        self.lockout
    }

    #[must_use]
    pub fn argon2_params(&self) -> &Params {
        &self.argon2
    }

    #[must_use]
    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    #[must_use]
    pub fn trust_proxy_headers(&self) -> bool {
        self.trust_proxy_headers
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything that exists only when the configuration is usable.
#[derive(Debug)]
pub struct GateKeys {
    credentials: CredentialVerifier,
    sessions: SessionIssuer,
}

impl GateKeys {
    #[must_use]
    pub fn credentials(&self) -> &CredentialVerifier {
        &self.credentials
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionIssuer {
        &self.sessions
    }
}

pub struct GateState {
    config: GateConfig,
    keys: Result<GateKeys, ConfigError>,
    limiter: Arc<dyn AttemptLimiter>,
    events: SecurityEventLog,
    clock: Arc<dyn Clock>,
}

impl GateState {
    #[must_use]
    pub fn builder(config: GateConfig) -> GateStateBuilder {
        GateStateBuilder {
            config,
            secret: None,
            session_key: None,
            clock: None,
            limiter: None,
            events: None,
        }
    }

    #[must_use]
    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Usable keys, or the reason the gate is failing closed.
    ///
    /// # Errors
    /// Returns the bootstrap error when the secret or session key was unusable.
    pub fn keys(&self) -> Result<&GateKeys, &ConfigError> {
        self.keys.as_ref()
    }

    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.keys.is_ok()
    }

    #[must_use]
    pub fn limiter(&self) -> &Arc<dyn AttemptLimiter> {
        &self.limiter
    }

    #[must_use]
    pub fn events(&self) -> &SecurityEventLog {
        &self.events
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

impl fmt::Debug for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GateState")
            .field("config", &self.config)
            .field("keys", &self.keys)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

pub struct GateStateBuilder {
    config: GateConfig,
    secret: Option<SecretString>,
    session_key: Option<Vec<u8>>,
    clock: Option<Arc<dyn Clock>>,
    limiter: Option<Arc<dyn AttemptLimiter>>,
    events: Option<SecurityEventLog>,
}

impl GateStateBuilder {
    #[must_use]
    pub fn secret(mut self, secret: Option<SecretString>) -> Self {
        self.secret = secret;
        self
    }

    #[must_use]
    pub fn session_key(mut self, key: Option<Vec<u8>>) -> Self {
        self.session_key = key;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    #[must_use]
    pub fn limiter(mut self, limiter: Arc<dyn AttemptLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    #[must_use]
    pub fn events(mut self, events: SecurityEventLog) -> Self {
        self.events = Some(events);
        self
    }

    /// Hash the secret, prepare the session key and assemble the state.
    ///
    /// Never fails: configuration problems are kept in the state and surface
    /// as `500` responses.
    #[must_use]
    pub fn build(self) -> GateState {
        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let limiter = self.limiter.unwrap_or_else(|| {
            Arc::new(LockoutTracker::new(self.config.lockout(), clock.clone()))
        });

        let keys = bootstrap_keys(&self.config, self.secret, self.session_key, &clock);
        match &keys {
            Ok(_) => debug!("gate keys ready"),
            Err(err) => warn!("gate is misconfigured and will refuse every request: {err}"),
        }

        GateState {
            config: self.config,
            keys,
            limiter,
            events: self.events.unwrap_or_default(),
            clock,
        }
    }
}

fn bootstrap_keys(
    config: &GateConfig,
    secret: Option<SecretString>,
    session_key: Option<Vec<u8>>,
    clock: &Arc<dyn Clock>,
) -> Result<GateKeys, ConfigError> {
    let secret = secret.ok_or(ConfigError::MissingSecret)?;
    let credentials = CredentialVerifier::with_params(&secret, config.argon2_params().clone())?;
    // The plaintext is no longer needed once the digest exists.
    drop(secret);

    let session_key = session_key.unwrap_or_else(|| {
        warn!("no session key configured, generated a random one; sessions will not survive a restart");
        SessionIssuer::generate_key()
    });
    let ttl =
        Duration::try_seconds(config.session_ttl_seconds()).ok_or(SessionError::InvalidTtl)?;
    let sessions = SessionIssuer::new(session_key, ttl, clock.clone())?;

    Ok(GateKeys {
        credentials,
        sessions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::session::{MAX_SESSION_TTL_SECONDS, MIN_SESSION_KEY_LENGTH};
    use anyhow::Result;

    fn cheap_config() -> Result<GateConfig> {
        Ok(GateConfig::new().with_argon2_params(CredentialVerifier::params(
            Params::MIN_M_COST,
            1,
            1,
        )?))
    }

    #[test]
    fn builds_usable_keys() -> Result<()> {
        let state = GateState::builder(cheap_config()?)
            .secret(Some(SecretString::from("open sesame".to_string())))
            .session_key(Some(vec![3u8; MIN_SESSION_KEY_LENGTH]))
            .build();
        let keys = state.keys().map_err(|err| anyhow::anyhow!("{err}"))?;
        assert!(keys.credentials().verify("open sesame"));
        assert!(!keys.credentials().verify("open sesam"));
        Ok(())
    }

    #[test]
    fn missing_secret_fails_closed() -> Result<()> {
        let state = GateState::builder(cheap_config()?).build();
        assert!(!state.is_configured());
        assert!(matches!(state.keys(), Err(ConfigError::MissingSecret)));
        Ok(())
    }

    #[test]
    fn short_secret_fails_closed() -> Result<()> {
        let state = GateState::builder(cheap_config()?)
            .secret(Some(SecretString::from("short".to_string())))
            .build();
        assert!(matches!(
            state.keys(),
            Err(ConfigError::Credential(CredentialError::SecretTooShort))
        ));
        Ok(())
    }

    #[test]
    fn short_session_key_fails_closed() -> Result<()> {
        let state = GateState::builder(cheap_config()?)
            .secret(Some(SecretString::from("open sesame".to_string())))
            .session_key(Some(b"tiny".to_vec()))
            .build();
        assert!(matches!(
            state.keys(),
            Err(ConfigError::Session(SessionError::KeyTooShort))
        ));
        Ok(())
    }

    #[test]
    fn missing_session_key_is_generated() -> Result<()> {
        let state = GateState::builder(cheap_config()?)
            .secret(Some(SecretString::from("open sesame".to_string())))
            .build();
        assert!(state.is_configured());
        Ok(())
    }

    #[test]
    fn oversized_session_ttl_fails_closed() -> Result<()> {
        for seconds in [i64::MAX, MAX_SESSION_TTL_SECONDS + 1] {
            let state = GateState::builder(cheap_config()?.with_session_ttl_seconds(seconds))
                .secret(Some(SecretString::from("open sesame".to_string())))
                .build();
            assert!(matches!(
                state.keys(),
                Err(ConfigError::Session(SessionError::InvalidTtl))
            ));
        }
        Ok(())
    }

    #[test]
    fn proxy_headers_untrusted_by_default() {
        assert!(!GateConfig::new().trust_proxy_headers());
        assert!(GateConfig::new().with_trust_proxy_headers(true).trust_proxy_headers());
    }

    #[test]
    fn login_path_gets_leading_slash() {
        assert_eq!(GateConfig::new().login_path(), "/enter");
        assert_eq!(GateConfig::new().with_login_path("login").login_path(), "/login");
        assert_eq!(GateConfig::new().with_login_path("/in").login_path(), "/in");
    }

    #[test]
    fn debug_hides_secrets() -> Result<()> {
        let state = GateState::builder(cheap_config()?)
            .secret(Some(SecretString::from("open sesame".to_string())))
            .build();
        let rendered = format!("{state:?}");
        assert!(!rendered.contains("open sesame"));
        assert!(!rendered.contains("argon2id"));
        Ok(())
    }
}
