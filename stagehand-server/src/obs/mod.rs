//! Capture-device boundary.
//!
//! The engine only talks to the capture device through [`CaptureDevice`].
//! [`ObsClient`] implements it over the OBS WebSocket v5 protocol; tests use
//! an in-memory fake.

use async_trait::async_trait;
use stagehand_core::DualTimestamp;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;

use crate::error::EngineError;

mod client;
pub mod protocol;

pub use client::ObsClient;

/// Notifications from the capture device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Connection established and identified
    Connected,
    /// A recording file was opened (recording started, or the file was split)
    RecordingStarted { file: PathBuf },
    RecordingStopped,
    ConnectionClosed,
}

#[async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Both clocks as of now. A clock that is not running is `None`.
    async fn current_dual_timestamps(&self) -> Result<DualTimestamp, EngineError>;

    /// PNG of the program output, scaled to `height` if given.
    async fn current_thumbnail(&self, height: Option<u32>) -> Result<Vec<u8>, EngineError>;

    /// Width and height of the program output.
    async fn output_dimensions(&self) -> Result<(u32, u32), EngineError>;

    /// File currently being recorded, if any.
    async fn active_recording_file(&self) -> Result<Option<PathBuf>, EngineError>;

    async fn active_recording_folder(&self) -> Result<PathBuf, EngineError>;

    /// Save the replay buffer and return the path of the written file. The
    /// file may still be flushing when this returns.
    async fn save_replay_buffer(&self) -> Result<PathBuf, EngineError>;

    /// Play a media file on the device's output.
    async fn play_media(&self, path: &Path) -> Result<(), EngineError>;

    fn subscribe(&self) -> broadcast::Receiver<DeviceEvent>;
}
