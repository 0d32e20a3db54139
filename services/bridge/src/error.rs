use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Errors produced by the bridge components
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Missing or malformed request fields
    #[error("{0}")]
    InputValidation(String),

    /// Bytes are not a valid raster image (or not valid transport text)
    #[error("Failed to decode image: {0}")]
    Decode(String),

    /// Raster could not be encoded as PNG
    #[error("Failed to encode image: {0}")]
    Encode(String),

    /// Destination host could not be reached
    #[error("Destination unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Destination host answered with a non-2xx status
    #[error("Destination returned status {status}: {body}")]
    UpstreamRejected { status: u16, body: String },

    /// Receiver could not bind its listener
    #[error("Failed to bind receiver on {addr}: {reason}")]
    Bind { addr: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    /// HTTP status used when the error reaches a request boundary
    pub fn status_code(&self) -> StatusCode {
        match self {
            BridgeError::InputValidation(_) => StatusCode::BAD_REQUEST,
            BridgeError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            BridgeError::UpstreamRejected { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            BridgeError::Decode(_)
            | BridgeError::Encode(_)
            | BridgeError::Bind { .. }
            | BridgeError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error body returned by the receiver endpoints
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub message: String,
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            status: "error",
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            BridgeError::InputValidation("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            BridgeError::Decode("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            BridgeError::UpstreamRejected {
                status: 404,
                body: String::new()
            }
            .status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_input_validation_message_is_verbatim() {
        let err = BridgeError::InputValidation("No image data provided".to_string());
        assert_eq!(err.to_string(), "No image data provided");
    }
}
