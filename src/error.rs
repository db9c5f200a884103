//! Unified error taxonomy for the gateway.
//!
//! Every failure a handler can produce is one of the variants below.  The
//! `IntoResponse` impl is the single boundary translator: it maps a kind to
//! its HTTP status, logs it, and serializes the one wire shape clients ever
//! see for a failed request.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// The only failure payload sent to clients.
#[derive(Debug, Serialize, Clone)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    /// Input failed schema or bounds checks. Never retried.
    #[error("{message}")]
    Validation {
        message: String,
        details: Option<String>,
    },
    /// Admission-time rejection from the rate limiter.
    #[error("{message}")]
    RateLimited { message: String },
    /// The upstream generation call failed after exhausting retries, or
    /// returned a malformed/empty result.
    #[error("{message}")]
    ExternalApi {
        message: String,
        details: Option<String>,
    },
    /// Anything not explicitly classified (email transport failures included).
    #[error("{message}")]
    Internal {
        message: String,
        details: Option<String>,
    },
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation {
            message: message.into(),
            details: None,
        }
    }

    pub fn validation_with(message: impl Into<String>, details: impl Into<String>) -> Self {
        ApiError::Validation {
            message: message.into(),
            details: Some(details.into()),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::Internal {
            message: message.into(),
            details: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation { .. } => StatusCode::BAD_REQUEST,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::ExternalApi { .. } => StatusCode::BAD_GATEWAY,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        let details = match self {
            ApiError::Validation { details, .. }
            | ApiError::ExternalApi { details, .. }
            | ApiError::Internal { details, .. } => details.clone(),
            ApiError::RateLimited { .. } => None,
        };
        ErrorEnvelope {
            success: false,
            error: self.to_string(),
            details,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let envelope = self.envelope();
        if status.is_server_error() {
            tracing::error!(
                status = status.as_u16(),
                error = %envelope.error,
                details = ?envelope.details,
                "server error"
            );
        } else {
            tracing::warn!(
                status = status.as_u16(),
                error = %envelope.error,
                "client error"
            );
        }
        (status, Json(envelope)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_fixed_statuses() {
        assert_eq!(
            ApiError::validation("bad input").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::RateLimited {
                message: "slow down".into()
            }
            .status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::ExternalApi {
                message: "upstream".into(),
                details: None
            }
            .status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::internal("boom").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn envelope_carries_message_and_optional_details() {
        let env = ApiError::validation_with("Invalid input", "transcript is required").envelope();
        assert!(!env.success);
        assert_eq!(env.error, "Invalid input");
        assert_eq!(env.details.as_deref(), Some("transcript is required"));

        let json = serde_json::to_value(
            ApiError::RateLimited {
                message: "Too many requests".into(),
            }
            .envelope(),
        )
        .unwrap();
        assert_eq!(json.get("success"), Some(&serde_json::json!(false)));
        // details must be omitted entirely when absent
        assert!(json.get("details").is_none());
    }
}
