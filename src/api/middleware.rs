//! Site guard: everything except the gate itself, health checks, the login
//! page and static assets requires a valid session cookie.

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use std::sync::Arc;
use tracing::debug;

use crate::gate::{GateState, session::extract_session_token};

const PUBLIC_PATHS: [&str; 3] = ["/gate", "/health", "/favicon.ico"];
const PUBLIC_PREFIXES: [&str; 1] = ["/assets/"];

fn is_login_path(path: &str, login_path: &str) -> bool {
    path == login_path
        || path
            .strip_prefix(login_path)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Paths reachable without a session.
#[must_use]
pub fn is_public_path(path: &str, login_path: &str) -> bool {
    PUBLIC_PATHS.contains(&path)
        || PUBLIC_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
        || is_login_path(path, login_path)
}

fn has_valid_session(state: &GateState, headers: &HeaderMap) -> bool {
    let Ok(keys) = state.keys() else {
        return false;
    };
    let token = extract_session_token(headers);
    keys.sessions().verify(token.as_deref()).is_valid
}

pub async fn require_session(
    State(state): State<Arc<GateState>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path();
    let login_path = state.config().login_path();

    if is_login_path(path, login_path) && has_valid_session(&state, request.headers()) {
        debug!("authenticated visitor on login page, sending to /");
        return Redirect::to("/").into_response();
    }

    if is_public_path(path, login_path) || has_valid_session(&state, request.headers()) {
        return next.run(request).await;
    }

    debug!(path, "no valid session, sending to login page");
    Redirect::to(login_path).into_response()
}
