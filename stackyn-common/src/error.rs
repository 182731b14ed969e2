use std::error::Error as StdError;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    RepoNotFound,
    RepoPrivateUnsupported,
    RepoTooLarge,
    MonorepoDetected,
    RuntimeNotDetected,
    UnsupportedLanguage,
    DockerfilePresent,
    DockerComposePresent,
    BuildFailed,
    BuildTimeout,
    ImageTooLarge,
    AppCrashOnStart,
    PortNotListening,
    HealthcheckFailed,
    MemoryLimitExceeded,
    CpuLimitExceeded,
    DiskLimitExceeded,
    DeployLocked,
    PlanLimitExceeded,
    BillingInactive,
    LogStreamFailed,
    LogsNotAvailable,
    HostOutOfMemory,
    BuildNodeUnavailable,
    InternalPlatformError,
    NotFound,
    Conflict,
    Validation,
    Unauthorized,
}

impl ErrorKind {
    pub fn status(self) -> StatusCode {
        use ErrorKind::*;
        match self {
            RepoNotFound
            | RepoPrivateUnsupported
            | RepoTooLarge
            | MonorepoDetected
            | RuntimeNotDetected
            | UnsupportedLanguage
            | DockerfilePresent
            | DockerComposePresent
            | Validation => StatusCode::BAD_REQUEST,
            BuildFailed => StatusCode::BAD_REQUEST,
            BuildTimeout => StatusCode::GATEWAY_TIMEOUT,
            ImageTooLarge => StatusCode::BAD_REQUEST,
            AppCrashOnStart | PortNotListening | HealthcheckFailed => StatusCode::BAD_GATEWAY,
            MemoryLimitExceeded | CpuLimitExceeded | DiskLimitExceeded => {
                StatusCode::INSUFFICIENT_STORAGE
            }
            DeployLocked | PlanLimitExceeded => StatusCode::FORBIDDEN,
            BillingInactive => StatusCode::PAYMENT_REQUIRED,
            LogStreamFailed | LogsNotAvailable => StatusCode::INTERNAL_SERVER_ERROR,
            HostOutOfMemory | BuildNodeUnavailable | InternalPlatformError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            NotFound => StatusCode::NOT_FOUND,
            Conflict => StatusCode::CONFLICT,
            Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }
}

#[derive(Debug, Clone, Serialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct Error {
    pub code: ErrorKind,
    pub message: String,
    pub details: Option<String>,
}

impl Error {
    pub fn new(code: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn internal(err: impl StdError) -> Self {
        tracing::error!(error = ?err, "internal platform error");
        Self::new(ErrorKind::InternalPlatformError, "an internal error occurred")
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!(error = ?err, "database error");
        Error::new(ErrorKind::InternalPlatformError, "a storage error occurred")
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.code.status();
        (
            status,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            )],
            Json(self),
        )
            .into_response()
    }
}

pub type Result<T> = std::result::Result<T, Error>;
