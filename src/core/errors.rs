use std::fmt;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// One CLI invocation that went wrong, with everything needed to diagnose it
/// offline.
#[derive(Debug, Clone)]
pub struct CommandFailure {
    pub command: String,
    pub reason: String,
    pub stdout: String,
    pub stderr: String,
}

impl fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\ncommand: {}\nstdout:\n{}\nstderr:\n{}",
            self.reason, self.command, self.stdout, self.stderr
        )
    }
}

/// Failures raised by the camera driver and the composition engine.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("camera unavailable: {0}")]
    DeviceUnavailable(CommandFailure),

    #[error("camera command timed out: {0}")]
    Timeout(CommandFailure),

    #[error("unexpected camera output: {0}")]
    ProtocolMismatch(String),

    #[error("not enough frames: expected {expected}, found {found}")]
    InsufficientFrames { expected: usize, found: usize },

    #[error("invalid frame configuration: {0}")]
    ConfigurationInvalid(String),

    #[error("image composition failed: {0}")]
    Composition(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<image::ImageError> for CaptureError {
    fn from(value: image::ImageError) -> Self {
        Self::Composition(value.to_string())
    }
}

impl From<tokio::task::JoinError> for CaptureError {
    fn from(value: tokio::task::JoinError) -> Self {
        Self::Composition(format!("image worker stopped: {value}"))
    }
}

/// Terminal failure states of one capture orchestration.
#[derive(Debug, thiserror::Error)]
pub enum CaptureFailure {
    #[error("trigger failed: {0}")]
    TriggerFailed(#[source] CaptureError),

    #[error("download failed: {0}")]
    DownloadFailed(#[source] CaptureError),

    #[error("insufficient frames: expected {expected}, found {found}")]
    InsufficientFrames { expected: usize, found: usize },

    #[error("composition failed: {0}")]
    CompositionFailed(#[source] CaptureError),

    #[error("capture task aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, thiserror::Error)]
pub enum FrameStoreError {
    #[error("no changes provided")]
    NothingToSave,

    #[error("invalid frame mode: {0}")]
    InvalidMode(String),

    #[error("invalid overlay image: {0}")]
    InvalidImage(String),

    #[error("malformed frame config at {path}: {source}")]
    Malformed {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

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

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::internal(value.to_string())
    }
}

impl From<CaptureFailure> for AppError {
    fn from(value: CaptureFailure) -> Self {
        let status = match value {
            CaptureFailure::InsufficientFrames { .. }
            | CaptureFailure::CompositionFailed(CaptureError::ConfigurationInvalid(_)) => {
                StatusCode::BAD_REQUEST
            }
            CaptureFailure::TriggerFailed(CaptureError::Timeout(_))
            | CaptureFailure::DownloadFailed(CaptureError::Timeout(_)) => {
                StatusCode::GATEWAY_TIMEOUT
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, value.to_string())
    }
}

impl From<CaptureError> for AppError {
    fn from(value: CaptureError) -> Self {
        Self::internal(value.to_string())
    }
}

impl From<FrameStoreError> for AppError {
    fn from(value: FrameStoreError) -> Self {
        let status = match value {
            FrameStoreError::Io(_) | FrameStoreError::Malformed { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::BAD_REQUEST,
        };
        Self::new(status, value.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}
