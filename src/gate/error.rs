//! Gate error taxonomy and its HTTP rendering.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

pub const MSG_CONFIGURATION: &str = "Server configuration error";
pub const MSG_UNEXPECTED: &str = "Internal server error";
pub const MSG_LOCKED: &str = "Too many failed attempts. Please try again later.";
pub const MSG_NEWLY_LOCKED: &str = "Too many failed attempts. Account temporarily locked.";
pub const MSG_MALFORMED_JSON: &str = "Invalid request format - malformed JSON";
pub const MSG_INVALID_FORMAT: &str = "Invalid request format";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
}

impl ValidationIssue {
    #[must_use]
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// JSON body shared by every `/gate` answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GateResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts_remaining: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_until: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_out: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<ValidationIssue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authenticated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_expired: Option<bool>,
}

impl GateResponse {
    #[must_use]
    pub fn ok(message: &str) -> Self {
        Self {
            success: true,
            message: Some(message.to_string()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn status(authenticated: bool, session_expired: bool) -> Self {
        Self {
            success: true,
            authenticated: Some(authenticated),
            session_expired: Some(session_expired),
            ..Self::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error("{message}")]
    Validation {
        message: &'static str,
        issues: Vec<ValidationIssue>,
    },
    #[error("gate configuration is unusable")]
    Configuration,
    #[error("client is locked out")]
    Locked { locked_until: Option<DateTime<Utc>> },
    #[error("incorrect password")]
    InvalidCredential {
        attempts_remaining: u32,
        locked_until: Option<DateTime<Utc>>,
    },
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl GateError {
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::Configuration | Self::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Locked { .. }
            | Self::InvalidCredential {
                locked_until: Some(_),
                ..
            } => StatusCode::TOO_MANY_REQUESTS,
            Self::InvalidCredential { .. } => StatusCode::UNAUTHORIZED,
        }
    }

    /// Body sent to the client. Unexpected errors never carry their detail.
    #[must_use]
    pub fn body(&self) -> GateResponse {
        match self {
            Self::Validation { message, issues } => GateResponse {
                errors: (!issues.is_empty()).then(|| issues.clone()),
                ..GateResponse::failure(*message)
            },
            Self::Configuration => GateResponse::failure(MSG_CONFIGURATION),
            Self::Unexpected(_) => GateResponse::failure(MSG_UNEXPECTED),
            Self::Locked { locked_until } => GateResponse {
                locked_out: Some(true),
                locked_until: *locked_until,
                ..GateResponse::failure(MSG_LOCKED)
            },
            Self::InvalidCredential {
                locked_until: Some(until),
                ..
            } => GateResponse {
                attempts_remaining: Some(0),
                locked_until: Some(*until),
                locked_out: Some(true),
                ..GateResponse::failure(MSG_NEWLY_LOCKED)
            },
            Self::InvalidCredential {
                attempts_remaining,
                locked_until: None,
            } => GateResponse {
                attempts_remaining: Some(*attempts_remaining),
                ..GateResponse::failure(format!(
                    "Incorrect password. {attempts_remaining} attempts remaining."
                ))
            },
        }
    }
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self.body())).into_response()
    }
}
