use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Errors returned by the auth routes.
///
/// Internal failures are logged where they happen and collapse into the
/// per-route `*Failed` variants, so clients never see storage or crypto
/// details.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Failed to create user!")]
    RegistrationFailed,

    #[error("Failed to login!")]
    LoginFailed,
}

impl AuthError {
    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::MissingField(_) => StatusCode::BAD_REQUEST,
            AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AuthError::RegistrationFailed | AuthError::LoginFailed => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "message": self.to_string() }))).into_response()
    }
}
