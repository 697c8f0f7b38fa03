use axum::{Json, response::IntoResponse};
use serde_json::json;

/// Landing response when no site directory is served. Only reachable with a
/// valid session.
pub async fn root() -> impl IntoResponse {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "authenticated": true,
    }))
}
