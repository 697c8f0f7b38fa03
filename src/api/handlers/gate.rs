//! `/gate` endpoints: pass the gate, check the session, leave.
//!
//! Flow Overview (POST):
//! 1) Refuse with `500` while the configuration is unusable.
//! 2) Refuse with `429` while the client is locked out. No attempt is consumed
//!    and the password is never looked at.
//! 3) Reject malformed or badly shaped bodies with `400`. No attempt is consumed.
//! 4) Verify the password. Success clears the failure count and sets the
//!    session cookie; failure consumes one attempt and may start a lockout.
//!
//! Every step that touches authentication emits a security event.

use axum::{
    Json,
    body::Bytes,
    extract::{ConnectInfo, Extension},
    http::{HeaderMap, StatusCode, Uri, header::SET_COOKIE},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{net::SocketAddr, sync::Arc};
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;

use super::ClientContext;
use crate::gate::{
    GateError, GateResponse, GateState, SecurityEvent, SecurityEventType, ValidationIssue,
    error::{MSG_INVALID_FORMAT, MSG_MALFORMED_JSON},
    session::{
        SESSION_SUBJECT, clear_session_cookie, extract_session_token, is_secure_request,
    },
};

pub const MAX_PASSWORD_LENGTH: usize = 100;
pub const MSG_AUTHENTICATED: &str = "Authentication successful";
pub const MSG_LOGGED_OUT: &str = "Logged out successfully";

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GateRequest {
    pub password: String,
}

enum Rejected {
    Malformed(serde_json::Error),
    Shape(Vec<ValidationIssue>),
}

impl Rejected {
    fn action(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed_request_body",
            Self::Shape(_) => "invalid_request_shape",
        }
    }

    fn detail(&self) -> String {
        match self {
            Self::Malformed(err) => err.to_string(),
            Self::Shape(issues) => issues
                .iter()
                .map(|issue| format!("{}: {}", issue.field, issue.message))
                .collect::<Vec<_>>()
                .join("; "),
        }
    }

    fn into_error(self) -> GateError {
        match self {
            Self::Malformed(_) => GateError::Validation {
                message: MSG_MALFORMED_JSON,
                issues: Vec::new(),
            },
            Self::Shape(issues) => GateError::Validation {
                message: MSG_INVALID_FORMAT,
                issues,
            },
        }
    }
}

/// Pull the password out of a `{"password": "..."}` body.
fn parse_attempt(body: &[u8]) -> Result<String, Rejected> {
    let value: Value = serde_json::from_slice(body).map_err(Rejected::Malformed)?;
    let Value::Object(mut object) = value else {
        return Err(Rejected::Shape(vec![ValidationIssue::new(
            "body",
            "Expected an object",
        )]));
    };
    match object.remove("password") {
        Some(Value::String(password)) => {
            let length = password.chars().count();
            if length == 0 {
                Err(Rejected::Shape(vec![ValidationIssue::new(
                    "password",
                    "Password is required",
                )]))
            } else if length > MAX_PASSWORD_LENGTH {
                Err(Rejected::Shape(vec![ValidationIssue::new(
                    "password",
                    "Password too long",
                )]))
            } else {
                Ok(password)
            }
        }
        None | Some(Value::Null) => Err(Rejected::Shape(vec![ValidationIssue::new(
            "password",
            "Required",
        )])),
        Some(_) => Err(Rejected::Shape(vec![ValidationIssue::new(
            "password",
            "Expected string",
        )])),
    }
}

fn event(state: &GateState, client: &ClientContext, event_type: SecurityEventType) -> SecurityEvent {
    SecurityEvent::new(
        event_type,
        client.ip.clone(),
        client.user_agent.clone(),
        state.now(),
    )
}

fn client_context(
    state: &GateState,
    headers: &HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
) -> ClientContext {
    ClientContext::from_request(
        headers,
        connect_info.map(|ConnectInfo(addr)| addr),
        state.config().trust_proxy_headers(),
    )
}

fn config_error(state: &GateState) -> Option<GateError> {
    state.keys().err().map(|err| {
        error!("gate configuration error: {err}");
        GateError::Configuration
    })
}

#[utoipa::path(
    post,
    path = "/gate",
    request_body = GateRequest,
    responses(
        (status = 200, description = "Password accepted, session cookie set", body = GateResponse),
        (status = 400, description = "Malformed or invalid request body", body = GateResponse),
        (status = 401, description = "Incorrect password", body = GateResponse),
        (status = 429, description = "Client is locked out", body = GateResponse),
        (status = 500, description = "Server configuration or internal error", body = GateResponse)
    ),
    tag = "gate"
)]
#[instrument(skip_all)]
pub async fn post_gate(
    Extension(state): Extension<Arc<GateState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> Response {
    let client = client_context(&state, &headers, connect_info);
    let secure = is_secure_request(&headers, &uri);

    match authenticate(&state, &client, secure, &body).await {
        Ok(response) => response,
        Err(err) => {
            if let GateError::Unexpected(detail) = &err {
                error!("gate request failed: {detail}");
                state.events().log(
                    &event(&state, &client, SecurityEventType::SuspiciousActivity)
                        .with_metadata("error", detail.as_str()),
                );
            }
            err.into_response()
        }
    }
}

async fn authenticate(
    state: &Arc<GateState>,
    client: &ClientContext,
    secure: bool,
    body: &[u8],
) -> Result<Response, GateError> {
    if let Some(err) = config_error(state) {
        return Err(err);
    }

    let limiter = state.limiter();
    if limiter.is_locked_out(&client.ip) {
        let locked_until = limiter.locked_until(&client.ip);
        warn!(client_ip = %client.ip, "rejected attempt from locked out client");
        state.events().log(
            &event(state, client, SecurityEventType::Lockout)
                .with_metadata("reason", "IP locked due to failed attempts")
                .with_metadata("lockedUntil", locked_until.map(|until| until.to_rfc3339())),
        );
        return Err(GateError::Locked { locked_until });
    }

    let password = match parse_attempt(body) {
        Ok(password) => password,
        Err(rejected) => {
            debug!(client_ip = %client.ip, "rejected malformed gate request");
            state.events().log(
                &event(state, client, SecurityEventType::SuspiciousActivity)
                    .with_metadata("action", rejected.action())
                    .with_metadata("error", rejected.detail()),
            );
            return Err(rejected.into_error());
        }
    };

    // Argon2 is CPU bound; keep it off the async workers.
    let verifier_state = Arc::clone(state);
    let accepted = tokio::task::spawn_blocking(move || {
        verifier_state
            .keys()
            .is_ok_and(|keys| keys.credentials().verify(&password))
    })
    .await
    .map_err(|err| GateError::Unexpected(format!("credential check did not complete: {err}")))?;

    if accepted {
        limiter.clear_failed_attempts(&client.ip);
        let keys = state.keys().map_err(|_| GateError::Configuration)?;
        let issued = keys
            .sessions()
            .issue(SESSION_SUBJECT)
            .map_err(|err| GateError::Unexpected(format!("failed to issue session: {err}")))?;
        let cookie = keys
            .sessions()
            .session_cookie(&issued.token, secure)
            .map_err(|err| GateError::Unexpected(format!("failed to build session cookie: {err}")))?;

        info!(client_ip = %client.ip, "gate passed");
        state.events().log(
            &event(state, client, SecurityEventType::AuthSuccess)
                .with_metadata("jti", issued.claims.jti.as_str()),
        );

        return Ok((
            StatusCode::OK,
            [(SET_COOKIE, cookie)],
            Json(GateResponse::ok(MSG_AUTHENTICATED)),
        )
            .into_response());
    }

    let outcome = limiter.record_failed_attempt(&client.ip);
    info!(
        client_ip = %client.ip,
        attempts_remaining = outcome.attempts_remaining,
        locked = outcome.is_locked(),
        "gate attempt failed"
    );
    state.events().log(
        &event(state, client, SecurityEventType::AuthFailure)
            .with_metadata("attemptsRemaining", outcome.attempts_remaining)
            .with_metadata(
                "lockedUntil",
                outcome.locked_until.map(|until| until.to_rfc3339()),
            ),
    );

    Err(GateError::InvalidCredential {
        attempts_remaining: outcome.attempts_remaining,
        locked_until: outcome.locked_until,
    })
}

#[utoipa::path(
    get,
    path = "/gate",
    responses(
        (status = 200, description = "Session status", body = GateResponse),
        (status = 500, description = "Server configuration error", body = GateResponse)
    ),
    tag = "gate"
)]
#[instrument(skip_all)]
pub async fn get_gate(
    Extension(state): Extension<Arc<GateState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let keys = match state.keys() {
        Ok(keys) => keys,
        Err(err) => {
            error!("gate configuration error: {err}");
            return GateError::Configuration.into_response();
        }
    };

    let token = extract_session_token(&headers);
    let status = keys.sessions().verify(token.as_deref());
    let body = Json(GateResponse::status(status.is_valid, status.is_expired));

    if status.is_expired {
        let client = client_context(&state, &headers, connect_info);
        state
            .events()
            .log(&event(&state, &client, SecurityEventType::SessionExpired));
        let clear = clear_session_cookie(is_secure_request(&headers, &uri));
        return (StatusCode::OK, [(SET_COOKIE, clear)], body).into_response();
    }

    (StatusCode::OK, body).into_response()
}

#[utoipa::path(
    delete,
    path = "/gate",
    responses(
        (status = 200, description = "Session cookie cleared", body = GateResponse),
        (status = 500, description = "Server configuration error", body = GateResponse)
    ),
    tag = "gate"
)]
#[instrument(skip_all)]
pub async fn delete_gate(
    Extension(state): Extension<Arc<GateState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    if let Some(err) = config_error(&state) {
        return err.into_response();
    }

    let client = client_context(&state, &headers, connect_info);
    state.events().log(
        &event(&state, &client, SecurityEventType::AuthSuccess).with_metadata("action", "logout"),
    );

    let clear = clear_session_cookie(is_secure_request(&headers, &uri));
    (
        StatusCode::OK,
        [(SET_COOKIE, clear)],
        Json(GateResponse::ok(MSG_LOGGED_OUT)),
    )
        .into_response()
}
