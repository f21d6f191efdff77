//! Error types for the pure engine state machines

use thiserror::Error;

/// Errors that can occur when parsing a `HH:MM:SS.mmm` timestamp
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TimestampError {
    /// Input is not shaped like `H:MM:SS[.mmm]`
    #[error("Invalid timestamp '{0}', expected HH:MM:SS.mmm")]
    InvalidFormat(String),

    /// A minutes or seconds field is 60 or more
    #[error("Timestamp field out of range in '{0}'")]
    OutOfRange(String),
}

/// Errors from the clip book
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClipError {
    /// No clip with this id, or the clip is not in the state the operation needs
    #[error("No such clip with id {0}")]
    NotFound(u64),

    /// Trim bounds violate `0 <= start < end <= duration`
    #[error("Invalid clip bounds {start_ms}..{end_ms} for a {duration_ms}ms video")]
    InvalidBounds {
        start_ms: u64,
        end_ms: u64,
        duration_ms: u64,
    },

    /// Trim bounds were sent for an image clip
    #[error("Clip {0} is an image and cannot be trimmed")]
    NotAVideo(u64),
}

/// Errors from the recording book
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordingError {
    #[error("No such recording with id {0}")]
    NoSuchRecording(u64),

    #[error("No such recording group with id {0}")]
    NoSuchGroup(u64),

    /// Stop was requested but the most recent recording is already closed
    #[error("No recording is in progress")]
    NoOpenRecording,

    /// Stop was requested but the most recent group is already closed
    #[error("No recording group is in progress")]
    NoOpenGroup,

    /// Start would be at or after stop
    #[error("Start {start} must be before stop {stop}")]
    InvalidInterval { start: String, stop: String },

    /// Recording has been cut to its own file and can no longer change
    #[error("Recording {0} has already been cut and is read-only")]
    Immutable(u64),

    /// Cut was requested for a recording without a stop timestamp
    #[error("Recording {0} has not been stopped yet")]
    NotStopped(u64),
}
