use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use thiserror::Error;

use crate::api::envelope::ApiResponse;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Error from the pcap library
    #[error("PCAP error: {0}")]
    Pcap(#[from] pcap::Error),

    /// Error from I/O operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error opening a capture source
    #[error("Capture open error: {0}")]
    CaptureOpen(String),

    /// Read attempted on a capture source with no open handle
    #[error("No capture handle is open")]
    HandleNotOpen,

    /// Frame could not be decoded at the link layer
    #[error("Decode error: {0}")]
    Decode(String),

    /// Operation not valid in the current state
    #[error("{0}")]
    StateConflict(String),

    /// Malformed or incomplete control request
    #[error("{0}")]
    InvalidRequest(String),

    /// Named agent is not registered
    #[error("Agent '{0}' is not registered")]
    UnknownAgent(String),

    /// Named interface does not exist
    #[error("Network interface '{0}' not found")]
    UnknownInterface(String),

    /// Proxied call to an agent failed
    #[error("Agent communication error: {0}")]
    AgentUnreachable(String),

    /// Registration with the coordinator failed
    #[error("Registration failed: {0}")]
    Registration(String),

    /// Configuration could not be written to any candidate path
    #[error("Configuration save failed: {0}")]
    ConfigSave(String),

    /// Error from outbound HTTP
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::UnknownInterface(_) => StatusCode::BAD_REQUEST,
            AppError::StateConflict(_) => StatusCode::CONFLICT,
            AppError::UnknownAgent(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl actix_web::ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ApiResponse::error(self.to_string()))
    }

    fn status_code(&self) -> StatusCode {
        AppError::status_code(self)
    }
}

/// Result type for application operations
pub type AppResult<T> = Result<T, AppError>;
