use crate::{
    api,
    cli::telemetry,
    gate::{GateConfig, GateState, LockoutPolicy},
};
use anyhow::{Context, Result, bail};
use chrono::Duration;
use secrecy::{ExposeSecret, SecretString};
use std::{path::PathBuf, sync::Arc};
use tracing::{debug, info};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub site_dir: Option<PathBuf>,
    pub password: Option<SecretString>,
    pub session_key: Option<SecretString>,
    pub session_ttl_seconds: i64,
    pub max_attempts: u32,
    pub attempt_window_seconds: i64,
    pub lockout_seconds: i64,
    pub login_path: String,
    pub trust_proxy_headers: bool,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the site directory is unusable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    if let Some(dir) = &args.site_dir {
        if !dir.is_dir() {
            bail!("site directory {} does not exist", dir.display());
        }
    }

    let window = Duration::try_seconds(args.attempt_window_seconds)
        .context("attempt window is out of range")?;
    let penalty =
        Duration::try_seconds(args.lockout_seconds).context("lockout duration is out of range")?;

    let config = GateConfig::new()
        .with_session_ttl_seconds(args.session_ttl_seconds)
        .with_lockout(LockoutPolicy::new(args.max_attempts, window, penalty))
        .with_login_path(&args.login_path)
        .with_trust_proxy_headers(args.trust_proxy_headers);

    let session_key = args
        .session_key
        .as_ref()
        .map(|key| key.expose_secret().as_bytes().to_vec());

    let state = Arc::new(
        GateState::builder(config)
            .secret(args.password)
            .session_key(session_key)
            .build(),
    );

    if state.is_configured() {
        info!("gate configured");
    }

    let result = api::new(args.port, state, args.site_dir.as_deref()).await;

    telemetry::shutdown_tracer();

    result
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        (
            "site_dir",
            args.site_dir
                .as_ref()
                .map_or_else(|| "n/a".to_string(), |dir| dir.display().to_string()),
        ),
        ("password_set", args.password.is_some().to_string()),
        ("session_key_set", args.session_key.is_some().to_string()),
        ("session_ttl_seconds", args.session_ttl_seconds.to_string()),
        ("max_attempts", args.max_attempts.to_string()),
        (
            "attempt_window_seconds",
            args.attempt_window_seconds.to_string(),
        ),
        ("lockout_seconds", args.lockout_seconds.to_string()),
        ("login_path", args.login_path.clone()),
        (
            "trust_proxy_headers",
            args.trust_proxy_headers.to_string(),
        ),
    ];

    for (key, value) in entries {
        debug!("{key}: {value}");
    }
}
