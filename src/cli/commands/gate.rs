use clap::{Arg, ArgAction, ArgMatches, Command};
use secrecy::SecretString;

use crate::gate::{
    config::DEFAULT_LOGIN_PATH, lockout::MAX_POLICY_SECONDS, session::MAX_SESSION_TTL_SECONDS,
};

pub const ARG_GATE_PASSWORD: &str = "gate-password";
pub const ARG_SESSION_KEY: &str = "session-key";
pub const ARG_SESSION_TTL_SECONDS: &str = "session-ttl-seconds";
pub const ARG_MAX_ATTEMPTS: &str = "max-attempts";
pub const ARG_ATTEMPT_WINDOW_SECONDS: &str = "attempt-window-seconds";
pub const ARG_LOCKOUT_SECONDS: &str = "lockout-seconds";
pub const ARG_LOGIN_PATH: &str = "login-path";
pub const ARG_TRUST_PROXY_HEADERS: &str = "trust-proxy-headers";

#[derive(Debug, Clone)]
pub struct Options {
    pub password: Option<SecretString>,
    pub session_key: Option<SecretString>,
    pub session_ttl_seconds: i64,
    pub max_attempts: u32,
    pub attempt_window_seconds: i64,
    pub lockout_seconds: i64,
    pub login_path: String,
    pub trust_proxy_headers: bool,
}

impl Options {
    /// Parse gate arguments from matches.
    ///
    /// A missing password is not an error here: the server still starts and
    /// refuses every gate request until it is configured.
    ///
    /// # Errors
    /// Returns an error if a numeric argument is missing.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        // clap passes empty env vars through as ""
        let get_secret = |id: &str| {
            matches
                .get_one::<String>(id)
                .filter(|v| !v.trim().is_empty())
                .map(|v| SecretString::from(v.clone()))
        };
        let get_i64 = |id: &str| {
            matches
                .get_one::<i64>(id)
                .copied()
                .ok_or_else(|| anyhow::anyhow!("missing required argument: --{id}"))
        };

        Ok(Self {
            password: get_secret(ARG_GATE_PASSWORD),
            session_key: get_secret(ARG_SESSION_KEY),
            session_ttl_seconds: get_i64(ARG_SESSION_TTL_SECONDS)?,
            max_attempts: matches
                .get_one::<u32>(ARG_MAX_ATTEMPTS)
                .copied()
                .ok_or_else(|| anyhow::anyhow!("missing required argument: --{ARG_MAX_ATTEMPTS}"))?,
            attempt_window_seconds: get_i64(ARG_ATTEMPT_WINDOW_SECONDS)?,
            lockout_seconds: get_i64(ARG_LOCKOUT_SECONDS)?,
            login_path: matches
                .get_one::<String>(ARG_LOGIN_PATH)
                .cloned()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_LOGIN_PATH.to_string()),
            trust_proxy_headers: matches.get_flag(ARG_TRUST_PROXY_HEADERS),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_secret_args(command);
    with_policy_args(command)
}

fn with_secret_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_GATE_PASSWORD)
                .long(ARG_GATE_PASSWORD)
                .help("Shared password protecting the site (at least 8 characters)")
                .long_help(
                    "Shared password protecting the site (at least 8 characters).\n\nIt is hashed once at startup and only the digest is kept. Without it the server still starts but every gate request answers 500.",
                )
                .env("SITEGATE_PASSWORD")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_SESSION_KEY)
                .long(ARG_SESSION_KEY)
                .help("HMAC key for session tokens (at least 32 bytes)")
                .long_help(
                    "HMAC key for session tokens (at least 32 bytes).\n\nWhen absent a random key is generated at startup, so sessions do not survive a restart.",
                )
                .env("SITEGATE_SESSION_KEY")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL_SECONDS)
                .long(ARG_SESSION_TTL_SECONDS)
                .help("Session cookie TTL in seconds")
                .env("SITEGATE_SESSION_TTL_SECONDS")
                .default_value("604800")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_SESSION_TTL_SECONDS)),
        )
}

fn with_policy_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_MAX_ATTEMPTS)
                .long(ARG_MAX_ATTEMPTS)
                .help("Failed attempts allowed per client before a lockout")
                .env("SITEGATE_MAX_ATTEMPTS")
                .default_value("5")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_ATTEMPT_WINDOW_SECONDS)
                .long(ARG_ATTEMPT_WINDOW_SECONDS)
                .help("Window in seconds in which failed attempts are counted")
                .env("SITEGATE_ATTEMPT_WINDOW_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_POLICY_SECONDS)),
        )
        .arg(
            Arg::new(ARG_LOCKOUT_SECONDS)
                .long(ARG_LOCKOUT_SECONDS)
                .help("Lockout duration in seconds")
                .env("SITEGATE_LOCKOUT_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_POLICY_SECONDS)),
        )
        .arg(
            Arg::new(ARG_LOGIN_PATH)
                .long(ARG_LOGIN_PATH)
                .help("Public page unauthenticated visitors are redirected to")
                .env("SITEGATE_LOGIN_PATH")
                .default_value(DEFAULT_LOGIN_PATH),
        )
        .arg(
            Arg::new(ARG_TRUST_PROXY_HEADERS)
                .long(ARG_TRUST_PROXY_HEADERS)
                .help("Identify clients by X-Forwarded-For / X-Real-IP")
                .long_help(
                    "Identify clients by X-Forwarded-For / X-Real-IP instead of the socket peer address.\n\nOnly enable this behind a reverse proxy that overwrites those headers; otherwise any client can pick its own lockout key.",
                )
                .env("SITEGATE_TRUST_PROXY_HEADERS")
                .action(ArgAction::SetTrue),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::{
        lockout::{DEFAULT_ATTEMPT_WINDOW_SECONDS, DEFAULT_LOCKOUT_SECONDS, DEFAULT_MAX_ATTEMPTS},
        session::DEFAULT_SESSION_TTL_SECONDS,
    };
    use secrecy::ExposeSecret;

    const GATE_VARS: [&str; 8] = [
        "SITEGATE_PASSWORD",
        "SITEGATE_SESSION_KEY",
        "SITEGATE_SESSION_TTL_SECONDS",
        "SITEGATE_MAX_ATTEMPTS",
        "SITEGATE_ATTEMPT_WINDOW_SECONDS",
        "SITEGATE_LOCKOUT_SECONDS",
        "SITEGATE_LOGIN_PATH",
        "SITEGATE_TRUST_PROXY_HEADERS",
    ];

    fn env(overrides: &[(&'static str, &'static str)]) -> Vec<(&'static str, Option<&'static str>)> {
        GATE_VARS
            .iter()
            .map(|var| {
                let value = overrides
                    .iter()
                    .find(|(name, _)| name == var)
                    .map(|(_, value)| *value);
                (*var, value)
            })
            .collect()
    }

    #[test]
    fn defaults() {
        temp_env::with_vars(env(&[]), || {
            let matches = with_args(Command::new("sitegate")).get_matches_from(["sitegate"]);
            let options = Options::parse(&matches);
            assert!(options.is_ok());
            if let Ok(options) = options {
                assert!(options.password.is_none());
                assert!(options.session_key.is_none());
                assert_eq!(options.session_ttl_seconds, DEFAULT_SESSION_TTL_SECONDS);
                assert_eq!(options.max_attempts, DEFAULT_MAX_ATTEMPTS);
                assert_eq!(options.attempt_window_seconds, DEFAULT_ATTEMPT_WINDOW_SECONDS);
                assert_eq!(options.lockout_seconds, DEFAULT_LOCKOUT_SECONDS);
                assert_eq!(options.login_path, DEFAULT_LOGIN_PATH);
                assert!(!options.trust_proxy_headers);
            }
        });
    }

    #[test]
    fn env_overrides() {
        let vars = env(&[
            ("SITEGATE_PASSWORD", "from the environment"),
            ("SITEGATE_MAX_ATTEMPTS", "3"),
            ("SITEGATE_LOGIN_PATH", "/login"),
            ("SITEGATE_TRUST_PROXY_HEADERS", "true"),
        ]);
        temp_env::with_vars(vars, || {
            let matches = with_args(Command::new("sitegate")).get_matches_from(["sitegate"]);
            let options = Options::parse(&matches);
            assert!(options.is_ok());
            if let Ok(options) = options {
                assert_eq!(
                    options.password.as_ref().map(|p| p.expose_secret()),
                    Some("from the environment")
                );
                assert_eq!(options.max_attempts, 3);
                assert_eq!(options.login_path, "/login");
                assert!(options.trust_proxy_headers);
            }
        });
    }

    #[test]
    fn empty_password_env_counts_as_missing() {
        let vars = env(&[("SITEGATE_PASSWORD", "  ")]);
        temp_env::with_vars(vars, || {
            let matches = with_args(Command::new("sitegate")).get_matches_from(["sitegate"]);
            let options = Options::parse(&matches);
            assert!(options.is_ok_and(|options| options.password.is_none()));
        });
    }

    #[test]
    fn zero_attempts_rejected() {
        temp_env::with_vars(env(&[]), || {
            let result = with_args(Command::new("sitegate")).try_get_matches_from([
                "sitegate",
                "--max-attempts",
                "0",
            ]);
            assert!(result.is_err());
        });
    }

    #[test]
    fn durations_are_bounded() {
        temp_env::with_vars(env(&[]), || {
            let longest = MAX_POLICY_SECONDS.to_string();
            let too_long = (MAX_POLICY_SECONDS + 1).to_string();
            let accepted = with_args(Command::new("sitegate")).try_get_matches_from([
                "sitegate",
                "--lockout-seconds",
                longest.as_str(),
            ]);
            assert!(accepted.is_ok());

            for arg in [
                "--lockout-seconds",
                "--attempt-window-seconds",
                "--session-ttl-seconds",
            ] {
                let rejected = with_args(Command::new("sitegate")).try_get_matches_from([
                    "sitegate",
                    arg,
                    too_long.as_str(),
                ]);
                assert!(rejected.is_err(), "{arg} accepted {too_long}");
            }

            let overflow = with_args(Command::new("sitegate")).try_get_matches_from([
                "sitegate",
                "--lockout-seconds",
                "9223372036854775807",
            ]);
            assert!(overflow.is_err());
        });
    }
}
