//! Map validated CLI arguments to the action the binary runs.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{ARG_PORT, ARG_SITE_DIR, gate};
use anyhow::Result;
use std::path::PathBuf;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let site_dir = matches
        .get_one::<String>(ARG_SITE_DIR)
        .filter(|dir| !dir.trim().is_empty())
        .map(PathBuf::from);

    let gate_opts = gate::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        site_dir,
        password: gate_opts.password,
        session_key: gate_opts.session_key,
        session_ttl_seconds: gate_opts.session_ttl_seconds,
        max_attempts: gate_opts.max_attempts,
        attempt_window_seconds: gate_opts.attempt_window_seconds,
        lockout_seconds: gate_opts.lockout_seconds,
        login_path: gate_opts.login_path,
        trust_proxy_headers: gate_opts.trust_proxy_headers,
    }))
}
