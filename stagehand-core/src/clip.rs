//! Clip arena and render state machine.
//!
//! ```text
//!   screenshot() ──────────────────────────────► Rendered
//!
//!   clip(seconds) ──► Uncut ──begin_cut──► Rendering ──finish_cut──► Rendered
//!                      ▲  │                    │
//!                      └──┘ update             └──revert_cut──► Uncut
//! ```
//!
//! Clips are immutable snapshots held in insertion order and addressed by a
//! stable id. Every change replaces the stored value, so a caller that held
//! a snapshot across an `.await` must re-resolve by id before applying its
//! result; a clip that vanished in the meantime shows up as `NotFound`.

use serde::{Deserialize, Serialize};

use crate::error::ClipError;
use crate::media::{ImageFile, VideoFile};
use crate::timestamp::DualTimestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClipStatus {
    Uncut,
    Rendering,
    Rendered,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageClip {
    pub id: u64,
    pub media: ImageFile,
    pub description: String,
    #[serde(flatten)]
    pub timestamps: DualTimestamp,
}

/// A trimmable video. `timestamps` refer to offset 0 of `media`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoClip {
    pub id: u64,
    pub media: VideoFile,
    pub waveform: ImageFile,
    pub thumbnail: ImageFile,
    pub description: String,
    pub clip_start_ms: u64,
    pub clip_end_ms: u64,
    #[serde(flatten)]
    pub timestamps: DualTimestamp,
}

impl VideoClip {
    pub fn trim_duration_ms(&self) -> u64 {
        self.clip_end_ms - self.clip_start_ms
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Clip {
    Image(ImageClip),
    Video(VideoClip),
}

impl Clip {
    pub fn id(&self) -> u64 {
        match self {
            Clip::Image(c) => c.id,
            Clip::Video(c) => c.id,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Clip::Image(c) => &c.description,
            Clip::Video(c) => &c.description,
        }
    }

    /// Name of the file in the media directory that holds this clip.
    pub fn filename(&self) -> &str {
        match self {
            Clip::Image(c) => c.media.filename(),
            Clip::Video(c) => c.media.filename(),
        }
    }

    pub fn timestamps(&self) -> DualTimestamp {
        match self {
            Clip::Image(c) => c.timestamps,
            Clip::Video(c) => c.timestamps,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipView {
    pub clip: Clip,
    pub status: ClipStatus,
}

/// Requested trim bounds and optional new description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipUpdate {
    pub start_ms: u64,
    pub end_ms: u64,
    #[serde(default)]
    pub description: Option<String>,
}

fn check_bounds(start_ms: u64, end_ms: u64, duration_ms: u64) -> Result<(), ClipError> {
    if start_ms < end_ms && end_ms <= duration_ms {
        Ok(())
    } else {
        Err(ClipError::InvalidBounds {
            start_ms,
            end_ms,
            duration_ms,
        })
    }
}

/// All clips of the running session.
#[derive(Debug, Clone, Default)]
pub struct ClipBook {
    next_id: u64,
    clips: Vec<ClipView>,
}

impl ClipBook {
    pub fn new() -> Self {
        ClipBook {
            next_id: 1,
            clips: Vec::new(),
        }
    }

    fn alloc_id(&mut self) -> u64 {
        // `Default` starts at 0, `new()` at 1; ids only need to be unique
        let id = self.next_id.max(1);
        self.next_id = id + 1;
        id
    }

    fn position(&self, id: u64) -> Option<usize> {
        self.clips.iter().position(|v| v.clip.id() == id)
    }

    pub fn list(&self) -> &[ClipView] {
        &self.clips
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    pub fn get(&self, id: u64) -> Option<&ClipView> {
        self.clips.iter().find(|v| v.clip.id() == id)
    }

    /// Resolve a clip only if it is currently in `status`.
    pub fn get_in_state(&self, id: u64, status: ClipStatus) -> Result<&ClipView, ClipError> {
        self.get(id)
            .filter(|v| v.status == status)
            .ok_or(ClipError::NotFound(id))
    }

    /// Screenshots need no rendering and enter the book as `Rendered`.
    pub fn add_image(&mut self, media: ImageFile, timestamps: DualTimestamp) -> u64 {
        let id = self.alloc_id();
        self.clips.push(ClipView {
            clip: Clip::Image(ImageClip {
                id,
                media,
                description: String::new(),
                timestamps,
            }),
            status: ClipStatus::Rendered,
        });
        id
    }

    /// Add an uncut video whose default trim keeps the last
    /// `duration_seconds` of `media`.
    pub fn add_video(
        &mut self,
        media: VideoFile,
        waveform: ImageFile,
        thumbnail: ImageFile,
        timestamps: DualTimestamp,
        duration_seconds: u64,
    ) -> u64 {
        let id = self.alloc_id();
        let end = media.duration_ms;
        let mut start = end.saturating_sub(duration_seconds.saturating_mul(1000));
        if start >= end {
            start = 0;
        }
        self.clips.push(ClipView {
            clip: Clip::Video(VideoClip {
                id,
                media,
                waveform,
                thumbnail,
                description: String::new(),
                clip_start_ms: start,
                clip_end_ms: end,
                timestamps,
            }),
            status: ClipStatus::Uncut,
        });
        id
    }

    /// Change the trim bounds (and description) of an uncut video.
    ///
    /// Returns `Ok(false)` when the request matches the stored clip, in which
    /// case nothing is touched.
    pub fn update(&mut self, id: u64, update: &ClipUpdate) -> Result<bool, ClipError> {
        let view = self.get_in_state(id, ClipStatus::Uncut)?;
        let video = match &view.clip {
            Clip::Video(v) => v,
            Clip::Image(_) => return Err(ClipError::NotAVideo(id)),
        };
        check_bounds(update.start_ms, update.end_ms, video.media.duration_ms)?;

        let description = update
            .description
            .clone()
            .unwrap_or_else(|| video.description.clone());
        if video.clip_start_ms == update.start_ms
            && video.clip_end_ms == update.end_ms
            && video.description == description
        {
            return Ok(false);
        }

        let updated = VideoClip {
            clip_start_ms: update.start_ms,
            clip_end_ms: update.end_ms,
            description,
            ..video.clone()
        };
        self.replace(ClipView {
            clip: Clip::Video(updated),
            status: ClipStatus::Uncut,
        });
        Ok(true)
    }

    /// Set the description of a clip in any state.
    pub fn set_description(&mut self, id: u64, description: &str) -> Result<bool, ClipError> {
        let view = self.get(id).ok_or(ClipError::NotFound(id))?;
        if view.clip.description() == description {
            return Ok(false);
        }
        let clip = match &view.clip {
            Clip::Image(c) => Clip::Image(ImageClip {
                description: description.to_string(),
                ..c.clone()
            }),
            Clip::Video(c) => Clip::Video(VideoClip {
                description: description.to_string(),
                ..c.clone()
            }),
        };
        let status = view.status;
        self.replace(ClipView { clip, status });
        Ok(true)
    }

    /// Move an uncut video to `Rendering` and return the snapshot to render
    /// from. Further updates and cuts are refused until the render resolves.
    pub fn begin_cut(&mut self, id: u64) -> Result<VideoClip, ClipError> {
        let view = self.get_in_state(id, ClipStatus::Uncut)?;
        let video = match &view.clip {
            Clip::Video(v) => v.clone(),
            Clip::Image(_) => return Err(ClipError::NotAVideo(id)),
        };
        check_bounds(
            video.clip_start_ms,
            video.clip_end_ms,
            video.media.duration_ms,
        )?;
        self.replace(ClipView {
            clip: Clip::Video(video.clone()),
            status: ClipStatus::Rendering,
        });
        Ok(video)
    }

    /// Install the trimmed file. The old trim start becomes the new origin,
    /// so both clocks move forward by it.
    pub fn finish_cut(&mut self, id: u64, rendered: VideoFile) -> Result<&ClipView, ClipError> {
        let view = self.get_in_state(id, ClipStatus::Rendering)?;
        let video = match &view.clip {
            Clip::Video(v) => v,
            Clip::Image(_) => return Err(ClipError::NotAVideo(id)),
        };
        let duration_ms = rendered.duration_ms;
        let updated = VideoClip {
            timestamps: video.timestamps.advance(video.clip_start_ms),
            media: rendered,
            clip_start_ms: 0,
            clip_end_ms: duration_ms,
            ..video.clone()
        };
        self.replace(ClipView {
            clip: Clip::Video(updated),
            status: ClipStatus::Rendered,
        });
        self.get(id).ok_or(ClipError::NotFound(id))
    }

    /// Put a clip whose render failed back to `Uncut`, bounds untouched.
    /// Returns false when the clip is gone or was not rendering.
    pub fn revert_cut(&mut self, id: u64) -> bool {
        match self.position(id) {
            Some(i) if self.clips[i].status == ClipStatus::Rendering => {
                self.clips[i].status = ClipStatus::Uncut;
                true
            }
            _ => false,
        }
    }

    /// Swap in regenerated waveform/thumbnail images for a video clip.
    pub fn set_assets(
        &mut self,
        id: u64,
        waveform: Option<ImageFile>,
        thumbnail: Option<ImageFile>,
    ) -> Result<(), ClipError> {
        let view = self.get(id).ok_or(ClipError::NotFound(id))?;
        let video = match &view.clip {
            Clip::Video(v) => v,
            Clip::Image(_) => return Err(ClipError::NotAVideo(id)),
        };
        let updated = VideoClip {
            waveform: waveform.unwrap_or_else(|| video.waveform.clone()),
            thumbnail: thumbnail.unwrap_or_else(|| video.thumbnail.clone()),
            ..video.clone()
        };
        let status = view.status;
        self.replace(ClipView {
            clip: Clip::Video(updated),
            status,
        });
        Ok(())
    }

    /// Remove a clip in any state.
    pub fn remove(&mut self, id: u64) -> Result<ClipView, ClipError> {
        let i = self.position(id).ok_or(ClipError::NotFound(id))?;
        Ok(self.clips.remove(i))
    }

    fn replace(&mut self, view: ClipView) {
        if let Some(i) = self.position(view.clip.id()) {
            self.clips[i] = view;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::Timestamp;

    fn add_replay_clip(book: &mut ClipBook, duration_ms: u64, seconds: u64) -> u64 {
        book.add_video(
            VideoFile::new("replay.mp4", "/media/replay.mp4", duration_ms),
            ImageFile::new("wave.png", "/media/wave.png", 64),
            ImageFile::new("thumb.png", "/media/thumb.png", 180),
            DualTimestamp::new(
                Some(Timestamp::from_secs(100)),
                Some(Timestamp::from_secs(400)),
            ),
            seconds,
        )
    }

    fn video(book: &ClipBook, id: u64) -> VideoClip {
        match &book.get(id).unwrap().clip {
            Clip::Video(v) => v.clone(),
            Clip::Image(_) => panic!("expected video"),
        }
    }

    #[test]
    fn test_default_bounds() {
        let mut book = ClipBook::new();
        let id = add_replay_clip(&mut book, 30_000, 10);
        let v = video(&book, id);
        assert_eq!((v.clip_start_ms, v.clip_end_ms), (20_000, 30_000));
        assert_eq!(book.get(id).unwrap().status, ClipStatus::Uncut);

        // Asking for more than the buffer holds keeps all of it
        let id = add_replay_clip(&mut book, 30_000, 60);
        let v = video(&book, id);
        assert_eq!((v.clip_start_ms, v.clip_end_ms), (0, 30_000));
    }

    #[test]
    fn test_screenshot_is_rendered() {
        let mut book = ClipBook::new();
        let id = book.add_image(
            ImageFile::new("s.png", "/media/s.png", 1080),
            DualTimestamp::default(),
        );
        assert_eq!(book.get(id).unwrap().status, ClipStatus::Rendered);
        assert_eq!(
            book.update(id, &ClipUpdate { start_ms: 0, end_ms: 1, description: None }),
            Err(ClipError::NotFound(id))
        );
        assert!(book.set_description(id, "clutch").unwrap());
        assert_eq!(book.get(id).unwrap().clip.description(), "clutch");
    }

    #[test]
    fn test_bounds_invariant() {
        let mut book = ClipBook::new();
        let id = add_replay_clip(&mut book, 30_000, 10);
        let before = book.get(id).unwrap().clone();

        for (start, end) in [(5_000, 5_000), (6_000, 5_000), (0, 30_001)] {
            let result = book.update(id, &ClipUpdate { start_ms: start, end_ms: end, description: None });
            assert!(matches!(result, Err(ClipError::InvalidBounds { .. })));
            assert_eq!(book.get(id).unwrap(), &before);
        }

        assert!(book
            .update(id, &ClipUpdate { start_ms: 0, end_ms: 30_000, description: None })
            .unwrap());
    }

    #[test]
    fn test_idempotent_update() {
        let mut book = ClipBook::new();
        let id = add_replay_clip(&mut book, 30_000, 10);
        let update = ClipUpdate {
            start_ms: 1_000,
            end_ms: 9_000,
            description: Some("ace".to_string()),
        };
        assert!(book.update(id, &update).unwrap());
        let first = serde_json::to_string(book.list()).unwrap();

        assert!(!book.update(id, &update).unwrap());
        assert_eq!(serde_json::to_string(book.list()).unwrap(), first);
    }

    #[test]
    fn test_unknown_id() {
        let mut book = ClipBook::new();
        assert_eq!(book.begin_cut(42), Err(ClipError::NotFound(42)));
        assert_eq!(book.remove(42), Err(ClipError::NotFound(42)));
        assert!(!book.revert_cut(42));
    }

    #[test]
    fn test_cut_success_rebases_timestamps() {
        let mut book = ClipBook::new();
        let id = add_replay_clip(&mut book, 30_000, 10);

        let snapshot = book.begin_cut(id).unwrap();
        assert_eq!(snapshot.clip_start_ms, 20_000);
        assert_eq!(book.get(id).unwrap().status, ClipStatus::Rendering);

        // Rendering clips refuse updates and a second cut
        assert_eq!(
            book.update(id, &ClipUpdate { start_ms: 0, end_ms: 1_000, description: None }),
            Err(ClipError::NotFound(id))
        );
        assert_eq!(book.begin_cut(id), Err(ClipError::NotFound(id)));

        let rendered = VideoFile::new("cut.mp4", "/media/cut.mp4", 10_000);
        let view = book.finish_cut(id, rendered.clone()).unwrap();
        assert_eq!(view.status, ClipStatus::Rendered);
        match &view.clip {
            Clip::Video(v) => {
                assert_eq!(v.media, rendered);
                assert_eq!((v.clip_start_ms, v.clip_end_ms), (0, 10_000));
                assert_eq!(v.timestamps.recording, Some(Timestamp::from_secs(120)));
                assert_eq!(v.timestamps.stream, Some(Timestamp::from_secs(420)));
            }
            Clip::Image(_) => panic!("expected video"),
        }
    }

    #[test]
    fn test_render_reversion_keeps_bounds() {
        let mut book = ClipBook::new();
        let id = add_replay_clip(&mut book, 30_000, 10);
        book.update(id, &ClipUpdate { start_ms: 2_000, end_ms: 8_000, description: None })
            .unwrap();

        book.begin_cut(id).unwrap();
        assert!(book.revert_cut(id));

        let view = book.get(id).unwrap();
        assert_eq!(view.status, ClipStatus::Uncut);
        let v = video(&book, id);
        assert_eq!((v.clip_start_ms, v.clip_end_ms), (2_000, 8_000));
        assert_eq!(v.media.filename(), "replay.mp4");
    }

    #[test]
    fn test_deleted_during_render() {
        let mut book = ClipBook::new();
        let id = add_replay_clip(&mut book, 30_000, 10);
        book.begin_cut(id).unwrap();
        book.remove(id).unwrap();

        let rendered = VideoFile::new("cut.mp4", "/media/cut.mp4", 10_000);
        assert_eq!(book.finish_cut(id, rendered).err(), Some(ClipError::NotFound(id)));
        assert!(book.is_empty());
    }

    #[test]
    fn test_set_assets() {
        let mut book = ClipBook::new();
        let id = add_replay_clip(&mut book, 30_000, 10);
        book.set_assets(id, None, Some(ImageFile::new("new.png", "/media/new.png", 180)))
            .unwrap();
        let v = video(&book, id);
        assert_eq!(v.thumbnail.filename(), "new.png");
        assert_eq!(v.waveform.filename(), "wave.png");
    }

    #[test]
    fn test_json_shape() {
        let mut book = ClipBook::new();
        let id = add_replay_clip(&mut book, 30_000, 10);
        let json = serde_json::to_value(book.get(id).unwrap()).unwrap();
        assert_eq!(json["status"], "uncut");
        assert_eq!(json["clip"]["type"], "video");
        assert_eq!(json["clip"]["clipStartMs"], 20_000);
        assert_eq!(json["clip"]["recordingTimestamp"], "00:01:40.000");
    }
}
