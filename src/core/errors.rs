use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Failure kinds surfaced by camera commands. Every command resolves to
/// either a success value or one of these; nothing escapes unresolved.
#[derive(Debug, Error)]
pub enum CameraError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("camera busy: {0}")]
    ResourceBusy(String),
    #[error("io failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("image decode failed: {0}")]
    Decode(String),
    #[error("camera hardware failure: {0}")]
    Hardware(String),
}

impl CameraError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidParameter(message.into())
    }

    pub fn busy(message: impl Into<String>) -> Self {
        Self::ResourceBusy(message.into())
    }

    pub fn hardware(message: impl Into<String>) -> Self {
        Self::Hardware(message.into())
    }

    /// Numeric code used on the command channel.
    pub fn code(&self) -> u8 {
        match self {
            Self::InvalidParameter(_) => 1,
            Self::ResourceBusy(_) => 3,
            Self::Io(_) => 4,
            Self::Decode(_) => 5,
            Self::Hardware(_) => 6,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidParameter(_) => StatusCode::BAD_REQUEST,
            Self::ResourceBusy(_) => StatusCode::CONFLICT,
            Self::Io(_) | Self::Hardware(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Decode(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

pub type CameraResult<T> = Result<T, CameraError>;

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<CameraError> for AppError {
    fn from(value: CameraError) -> Self {
        Self::new(value.status_code(), value.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::internal(value.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}
