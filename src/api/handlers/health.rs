use crate::{GIT_COMMIT_HASH, gate::GateState};
use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    gate: String,
}

#[utoipa::path(
    get,
    path= "/health",
    responses (
        (status = 200, description = "Gate is configured", body = [Health]),
        (status = 503, description = "Gate is misconfigured and refusing requests", body = [Health])
    ),
    tag= "health"
)]
// axum handler for health
pub async fn health(method: Method, state: Extension<Arc<GateState>>) -> impl IntoResponse {
    let configured = state.is_configured();

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        gate: if configured {
            "ok".to_string()
        } else {
            "misconfigured".to_string()
        },
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    let short_hash = if health.commit.len() > 7 {
        &health.commit[0..7]
    } else {
        ""
    };

    let headers = format!("{}:{}:{}", health.name, health.version, short_hash)
        .parse::<HeaderValue>()
        .map(|x_app_header_value| {
            debug!("X-App header: {:?}", x_app_header_value);

            let mut headers = HeaderMap::new();

            headers.insert("X-App", x_app_header_value);

            headers
        })
        .map_err(|err| {
            error!("Failed to parse X-App header: {}", err);
        });

    // Fall back to no headers rather than failing the health check
    let headers = headers.unwrap_or_else(|()| HeaderMap::new());

    if configured {
        (StatusCode::OK, headers, body)
    } else {
        debug!("Gate is misconfigured");
        (StatusCode::SERVICE_UNAVAILABLE, headers, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::{CredentialVerifier, GateConfig};
    use anyhow::Result;
    use argon2::Params;
    use axum::{Router, body::to_bytes, http::Request, routing::get};
    use secrecy::SecretString;
    use tower::ServiceExt;

    fn app(secret: Option<&str>) -> Result<Router> {
        let config = GateConfig::new()
            .with_argon2_params(CredentialVerifier::params(Params::MIN_M_COST, 1, 1)?);
        let state = GateState::builder(config)
            .secret(secret.map(|s| SecretString::from(s.to_string())))
            .build();
        Ok(Router::new()
            .route("/health", get(health).options(health))
            .layer(Extension(Arc::new(state))))
    }

    #[tokio::test]
    async fn health_reports_configured_gate() -> Result<()> {
        let response = app(Some("a long enough secret"))?
            .oneshot(Request::builder().uri("/health").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        let x_app = response
            .headers()
            .get("X-App")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(x_app.starts_with(env!("CARGO_PKG_NAME")));
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let payload: serde_json::Value = serde_json::from_slice(&body)?;
        assert_eq!(payload["gate"], "ok");
        assert_eq!(payload["version"], env!("CARGO_PKG_VERSION"));
        Ok(())
    }

    #[tokio::test]
    async fn health_reports_misconfigured_gate() -> Result<()> {
        let response = app(None)?
            .oneshot(Request::builder().uri("/health").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let payload: serde_json::Value = serde_json::from_slice(&body)?;
        assert_eq!(payload["gate"], "misconfigured");
        Ok(())
    }

    #[tokio::test]
    async fn options_has_no_body() -> Result<()> {
        let response = app(Some("a long enough secret"))?
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/health")
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        assert!(body.is_empty());
        Ok(())
    }
}
