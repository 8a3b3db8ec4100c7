use axum::Json;
use axum::http::header::{ALLOW, WWW_AUTHENTICATE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use twmcp_core::error::{ApiError, codes};

/// Failures the HTTP surface answers itself, before or around the MCP
/// endpoint.
#[derive(Debug)]
pub enum AppError {
    /// Missing, malformed or rejected credential (401 with a bearer challenge)
    Unauthorized {
        message: String,
        resource_metadata: String,
    },
    /// Method not served on a public route (405)
    MethodNotAllowed { allow: &'static str },
    /// Request body over the configured limit (413)
    PayloadTooLarge { limit: usize },
    /// Body could not be read (400)
    BadRequest(String),
    /// Internal error (500); the message is logged, never returned
    Internal(String),
}

impl AppError {
    pub fn unauthorized(message: impl Into<String>, resource_metadata: &str) -> Self {
        Self::Unauthorized {
            message: message.into(),
            resource_metadata: resource_metadata.to_string(),
        }
    }

    /// Render with the trace id of the failing request.
    pub fn respond(self, request_id: impl Into<String>) -> Response {
        let request_id = request_id.into();
        let body = |error: &str, message: String, docs_hint: Option<String>| ApiError {
            error: error.to_string(),
            message,
            request_id: request_id.clone(),
            docs_hint,
        };

        match self {
            AppError::Unauthorized {
                message,
                resource_metadata,
            } => {
                let challenge = format!("Bearer resource_metadata=\"{resource_metadata}\"");
                let mut response = (
                    StatusCode::UNAUTHORIZED,
                    Json(body(
                        codes::UNAUTHORIZED,
                        message,
                        Some(format!(
                            "Send 'Authorization: Bearer <token>'. Discovery document: {resource_metadata}"
                        )),
                    )),
                )
                    .into_response();
                if let Ok(value) = HeaderValue::from_str(&challenge) {
                    response.headers_mut().insert(WWW_AUTHENTICATE, value);
                }
                response
            }
            AppError::MethodNotAllowed { allow } => {
                let mut response = (
                    StatusCode::METHOD_NOT_ALLOWED,
                    Json(body(
                        codes::METHOD_NOT_ALLOWED,
                        "Method not allowed".to_string(),
                        Some(format!("Allowed methods: {allow}")),
                    )),
                )
                    .into_response();
                response
                    .headers_mut()
                    .insert(ALLOW, HeaderValue::from_static(allow));
                response
            }
            AppError::PayloadTooLarge { limit } => (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(body(
                    codes::PAYLOAD_TOO_LARGE,
                    format!("Request body exceeds {limit} bytes"),
                    None,
                )),
            )
                .into_response(),
            AppError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                Json(body(codes::BAD_REQUEST, message, None)),
            )
                .into_response(),
            AppError::Internal(message) => {
                tracing::error!(event = "internal_error", request_id = %request_id, error = %message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(body(
                        codes::INTERNAL_ERROR,
                        "An internal error occurred".to_string(),
                        None,
                    )),
                )
                    .into_response()
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.respond(uuid::Uuid::now_v7().to_string())
    }
}
