use std::time::Duration;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Upstream request failed with status {status}")]
    Upstream { status: StatusCode, body: String },
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Stream read failed: {0}")]
    Read(String),
    #[error("Invalid payload: {0}")]
    Decode(String),
    #[error("Unknown message part type `{0}`")]
    UnknownVariant(String),
    #[error("Job {id} finished with status `{status}`")]
    JobFailed {
        id: String,
        status: String,
        payload: Value,
    },
    #[error("Job polling timed out after {elapsed:?} ({attempts} attempts)")]
    Timeout { elapsed: Duration, attempts: u32 },
    #[error("Operation cancelled")]
    Cancelled,
    #[error("{provider} does not support {capability}")]
    NotSupported {
        provider: &'static str,
        capability: &'static str,
    },
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn upstream(status: StatusCode, body: String) -> Self {
        Self::Upstream { status, body }
    }

    pub fn not_supported(provider: &'static str, capability: &'static str) -> Self {
        Self::NotSupported {
            provider,
            capability,
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(error: serde_json::Error) -> Self {
        Self::Decode(error.to_string())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match self {
            Self::Unauthorized(message) => {
                error_response(StatusCode::UNAUTHORIZED, message, "authentication_error")
                    .into_response()
            }
            Self::BadRequest(message) => {
                error_response(StatusCode::BAD_REQUEST, message, "invalid_request_error")
                    .into_response()
            }
            Self::Upstream { status, body } => {
                if let Ok(value) = serde_json::from_str::<Value>(&body) {
                    return (status, Json(value)).into_response();
                }

                let message = if body.trim().is_empty() {
                    format!("Upstream provider returned {}", status)
                } else {
                    body
                };
                error_response(status, message, "upstream_error").into_response()
            }
            Self::Transport(_) | Self::Read(_) => error_response(
                StatusCode::BAD_GATEWAY,
                "Failed to reach upstream provider".to_string(),
                "upstream_error",
            )
            .into_response(),
            Self::Decode(_) | Self::UnknownVariant(_) => {
                let message = self.to_string();
                error_response(StatusCode::UNPROCESSABLE_ENTITY, message, "invalid_payload")
                    .into_response()
            }
            Self::JobFailed { .. } => {
                let message = self.to_string();
                error_response(StatusCode::BAD_GATEWAY, message, "job_failed").into_response()
            }
            Self::Timeout { .. } => {
                let message = self.to_string();
                error_response(StatusCode::GATEWAY_TIMEOUT, message, "timeout").into_response()
            }
            Self::Cancelled => error_response(
                StatusCode::BAD_REQUEST,
                "Request was cancelled".to_string(),
                "cancelled",
            )
            .into_response(),
            Self::NotSupported { .. } => {
                let message = self.to_string();
                error_response(StatusCode::NOT_IMPLEMENTED, message, "not_supported")
                    .into_response()
            }
            Self::Internal(message) => {
                error_response(StatusCode::INTERNAL_SERVER_ERROR, message, "internal_error")
                    .into_response()
            }
        }
    }
}

fn error_response(
    status: StatusCode,
    message: String,
    error_type: &'static str,
) -> (StatusCode, Json<OpenAiErrorResponse>) {
    (
        status,
        Json(OpenAiErrorResponse {
            error: OpenAiError {
                message,
                error_type: error_type.to_string(),
                param: None,
                code: None,
            },
        }),
    )
}

#[derive(Debug, Serialize)]
struct OpenAiErrorResponse {
    error: OpenAiError,
}

#[derive(Debug, Serialize)]
struct OpenAiError {
    message: String,
    #[serde(rename = "type")]
    error_type: String,
    param: Option<String>,
    code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_maps_to_gateway_timeout() {
        let response = GatewayError::Timeout {
            elapsed: Duration::from_millis(50),
            attempts: 3,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn job_failure_message_names_status() {
        let error = GatewayError::JobFailed {
            id: "job_1".to_string(),
            status: "failed".to_string(),
            payload: Value::Null,
        };
        assert_eq!(error.to_string(), "Job job_1 finished with status `failed`");
        assert_eq!(error.into_response().status(), StatusCode::BAD_GATEWAY);
    }
}
