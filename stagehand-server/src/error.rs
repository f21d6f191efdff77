use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use stagehand_core::{ClipError, RecordingError, TimestampError};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{0}")]
    Clip(#[from] ClipError),
    #[error("{0}")]
    Recording(#[from] RecordingError),
    #[error("{0}")]
    Timestamp(#[from] TimestampError),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("The capture device is not recording")]
    RecordingInactive,

    #[error("The capture device is not connected")]
    DeviceUnavailable,
    #[error("Capture device request failed: {0}")]
    Device(String),
    #[error("Transcoder failed: {0}")]
    Transcoder(String),
    #[error("The capture device returned no image")]
    CaptureUnavailable,
    #[error("Frame extraction failed: {0}")]
    ExtractionFailed(String),
    #[error("Replay file '{}' was not readable after {attempts} attempts", path.display())]
    IncompleteCapture { path: PathBuf, attempts: u32 },
    #[error("Clip {0} was deleted while it was rendering")]
    ClipDeletedDuringRender(u64),
    #[error("I/O operation failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Cannot serialize JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Shutdown")]
    Shutdown,
}

impl EngineError {
    /// Errors caused by the request itself. These are never retried.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            EngineError::Clip(_)
                | EngineError::Recording(_)
                | EngineError::Timestamp(_)
                | EngineError::InvalidRequest(_)
                | EngineError::RecordingInactive
        )
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            EngineError::Clip(ClipError::NotFound(_))
            | EngineError::Recording(RecordingError::NoSuchRecording(_))
            | EngineError::Recording(RecordingError::NoSuchGroup(_)) => StatusCode::NOT_FOUND,
            EngineError::Recording(RecordingError::NoOpenRecording)
            | EngineError::Recording(RecordingError::NoOpenGroup)
            | EngineError::Recording(RecordingError::Immutable(_))
            | EngineError::Recording(RecordingError::NotStopped(_))
            | EngineError::RecordingInactive => StatusCode::CONFLICT,
            e if e.is_user_error() => StatusCode::BAD_REQUEST,
            EngineError::DeviceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::Device(_)
            | EngineError::Transcoder(_)
            | EngineError::CaptureUnavailable
            | EngineError::ExtractionFailed(_)
            | EngineError::IncompleteCapture { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// Tell axum how to convert `EngineError` into a response.
impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        if self.is_user_error() {
            log::debug!("Rejected request: {}", self);
        } else {
            log::warn!("Request failed: {}", self);
        }
        (self.status_code(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classes() {
        assert_eq!(EngineError::Clip(ClipError::NotFound(1)).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            EngineError::Clip(ClipError::InvalidBounds { start_ms: 2, end_ms: 1, duration_ms: 5 })
                .status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            EngineError::Recording(RecordingError::Immutable(3)).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(EngineError::DeviceUnavailable.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            EngineError::IncompleteCapture { path: PathBuf::from("r.mkv"), attempts: 3 }.status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            EngineError::ClipDeletedDuringRender(4).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert!(!EngineError::ClipDeletedDuringRender(4).is_user_error());
    }
}
