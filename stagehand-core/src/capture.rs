//! Point-in-time screenshots and replay-buffer captures.

use serde::{Deserialize, Serialize};

use crate::media::{ImageFile, VideoFile};
use crate::timestamp::{ClockDomain, DualTimestamp, Timestamp};

/// A single frame, timestamped on zero, one or both clocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Screenshot {
    pub image: ImageFile,
    #[serde(flatten)]
    pub timestamps: DualTimestamp,
}

/// A saved replay buffer: a fixed-length window of video that ended at
/// `timestamps`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Replay {
    pub video: VideoFile,
    pub waveform: ImageFile,
    pub thumbnail: ImageFile,
    #[serde(flatten)]
    pub timestamps: DualTimestamp,
}

impl Replay {
    /// When the buffer ended on the given clock.
    pub fn end_in(&self, domain: ClockDomain) -> Option<Timestamp> {
        self.timestamps.get(domain)
    }

    /// When the buffer started on the given clock.
    pub fn start_in(&self, domain: ClockDomain) -> Option<Timestamp> {
        self.end_in(domain)
            .map(|end| end.saturating_sub(self.video.duration_ms))
    }

    /// Timestamps of the first frame of the buffer.
    pub fn start_timestamps(&self) -> DualTimestamp {
        self.timestamps.rewind(self.video.duration_ms)
    }

    /// Whether `t` lies within the buffer (no leniency).
    pub fn contains(&self, domain: ClockDomain, t: Timestamp) -> bool {
        match (self.start_in(domain), self.end_in(domain)) {
            (Some(start), Some(end)) => start <= t && t <= end,
            _ => false,
        }
    }

    /// Offset of `t` into the replay's own video file.
    pub fn rebase(&self, domain: ClockDomain, t: Timestamp) -> Option<Timestamp> {
        let start = self.start_in(domain)?;
        if t < start {
            return None;
        }
        Some(Timestamp::from_millis(t.as_millis() - start.as_millis()))
    }
}
