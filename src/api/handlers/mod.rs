//! API handlers and shared request helpers.

pub mod gate;
pub mod health;
pub mod root;

use axum::http::{HeaderMap, header::USER_AGENT};
use std::net::SocketAddr;

pub const UNKNOWN_CLIENT: &str = "unknown";

/// Who is knocking: the identifier lockouts are keyed on plus the user agent
/// recorded in security events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientContext {
    pub ip: String,
    pub user_agent: Option<String>,
}

impl ClientContext {
    /// The socket peer identifies the client. Proxy headers are only consulted
    /// when `trust_proxy_headers` is set, since any client can forge them.
    #[must_use]
    pub fn from_request(
        headers: &HeaderMap,
        peer: Option<SocketAddr>,
        trust_proxy_headers: bool,
    ) -> Self {
        let forwarded = if trust_proxy_headers {
            extract_client_ip(headers)
        } else {
            None
        };
        let ip = forwarded
            .or_else(|| peer.map(|addr| addr.ip().to_string()))
            .unwrap_or_else(|| UNKNOWN_CLIENT.to_string());
        let user_agent = headers
            .get(USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        Self { ip, user_agent }
    }
}

/// Extract a client IP from common proxy headers.
pub(crate) fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
