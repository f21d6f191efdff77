//! Clip lifecycle on top of the media service.
//!
//! ```text
//!   screenshot() ──────────────────────────────► Rendered
//!   clip(s) ──► Uncut ──cut──► Rendering ──ok──► Rendered
//!                 ▲  │update        │
//!                 │  └──────┘       │ trim failed
//!                 └─────────────────┘
//! ```
//!
//! The clip book lock is never held across a transcoder call. Results are
//! applied by id afterwards, so a clip deleted during its render is noticed
//! rather than resurrected.

use log::{debug, info, warn};
use stagehand_core::clip::ClipUpdate;
use stagehand_core::media::VideoFile;
use stagehand_core::{ClipBook, ClipError, ClipView};
use std::sync::{Arc, RwLock};

use crate::error::EngineError;
use crate::media::MediaService;
use crate::obs::CaptureDevice;
use crate::push::{ClipsMessage, Push};

#[derive(Clone)]
pub struct ClipManager {
    book: Arc<RwLock<ClipBook>>,
    media: MediaService,
    device: Arc<dyn CaptureDevice>,
    push: Push,
}

impl ClipManager {
    pub fn new(media: MediaService, device: Arc<dyn CaptureDevice>, push: Push) -> ClipManager {
        ClipManager {
            book: Arc::new(RwLock::new(ClipBook::new())),
            media,
            device,
            push,
        }
    }

    pub fn list(&self) -> Vec<ClipView> {
        self.book.read().unwrap().list().to_vec()
    }

    pub fn get(&self, id: u64) -> Result<ClipView, EngineError> {
        Ok(self
            .book
            .read()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or(ClipError::NotFound(id))?)
    }

    // Called with the write lock held so observers see mutations in order
    fn publish(&self, book: &ClipBook) {
        self.push.send(&ClipsMessage { clips: book.list() });
    }

    fn view(book: &ClipBook, id: u64) -> Result<ClipView, EngineError> {
        Ok(book.get(id).cloned().ok_or(ClipError::NotFound(id))?)
    }

    /// Full-size screenshot of the program output as a finished clip.
    pub async fn screenshot(&self) -> Result<ClipView, EngineError> {
        let screenshot = self.media.current_full_screenshot().await?;
        let mut book = self.book.write().unwrap();
        let id = book.add_image(screenshot.image, screenshot.timestamps);
        self.publish(&book);
        info!("Screenshot clip {}", id);
        Self::view(&book, id)
    }

    /// Save the replay buffer as an uncut clip trimmed to its last
    /// `duration_seconds`.
    pub async fn clip(&self, duration_seconds: u64) -> Result<ClipView, EngineError> {
        let replay = self.media.replay().await?;
        let timestamps = replay.start_timestamps();
        let mut book = self.book.write().unwrap();
        let id = book.add_video(
            replay.video,
            replay.waveform,
            replay.thumbnail,
            timestamps,
            duration_seconds,
        );
        self.publish(&book);
        info!("Video clip {} ({}s)", id, duration_seconds);
        Self::view(&book, id)
    }

    pub fn update(&self, id: u64, update: &ClipUpdate) -> Result<ClipView, EngineError> {
        let mut book = self.book.write().unwrap();
        if book.update(id, update)? {
            self.publish(&book);
        } else {
            debug!("Clip {} unchanged", id);
        }
        Self::view(&book, id)
    }

    /// Change the description in any state.
    pub fn describe(&self, id: u64, description: &str) -> Result<ClipView, EngineError> {
        let mut book = self.book.write().unwrap();
        if book.set_description(id, description)? {
            self.publish(&book);
        }
        Self::view(&book, id)
    }

    /// Render the trim of an uncut video into its own file.
    pub async fn cut(&self, id: u64) -> Result<ClipView, EngineError> {
        let video = {
            let mut book = self.book.write().unwrap();
            let video = book.begin_cut(id)?;
            self.publish(&book);
            video
        };
        info!(
            "Cutting clip {} to {}..{}ms",
            id, video.clip_start_ms, video.clip_end_ms
        );

        let rendered = match self
            .media
            .cut_video(&video.media, video.clip_start_ms, video.clip_end_ms)
            .await
        {
            Ok(rendered) => rendered,
            Err(e) => {
                warn!("Cutting clip {} failed: {}", id, e);
                let mut book = self.book.write().unwrap();
                if book.revert_cut(id) {
                    self.publish(&book);
                }
                return Err(e);
            }
        };

        let view = {
            let mut book = self.book.write().unwrap();
            match book.finish_cut(id, rendered.clone()) {
                Ok(view) => {
                    let view = view.clone();
                    self.publish(&book);
                    Some(view)
                }
                Err(_) => None,
            }
        };
        let Some(view) = view else {
            warn!("Clip {} was deleted while rendering, discarding the result", id);
            let path = self.media.media_dir().path_of(rendered.filename());
            if let Err(e) = tokio::fs::remove_file(&path).await {
                debug!("Cannot remove {}: {}", path.display(), e);
            }
            return Err(EngineError::ClipDeletedDuringRender(id));
        };

        let manager = self.clone();
        tokio::spawn(async move { manager.refresh_assets(id, rendered).await });
        Ok(view)
    }

    /// Regenerate waveform and thumbnail for a freshly cut clip. Failures
    /// keep the previous images.
    pub async fn refresh_assets(&self, id: u64, video: VideoFile) {
        let waveform = match self.media.video_waveform(&video).await {
            Ok(image) => Some(image),
            Err(e) => {
                warn!("Clip {}: waveform not regenerated: {}", id, e);
                None
            }
        };
        let thumbnail = match self.media.video_thumbnail(&video).await {
            Ok(image) => Some(image),
            Err(e) => {
                warn!("Clip {}: thumbnail not regenerated: {}", id, e);
                None
            }
        };
        if waveform.is_none() && thumbnail.is_none() {
            return;
        }

        let mut book = self.book.write().unwrap();
        match book.set_assets(id, waveform, thumbnail) {
            Ok(()) => self.publish(&book),
            Err(e) => debug!("Clip {}: assets discarded: {}", id, e),
        }
    }

    pub fn delete(&self, id: u64) -> Result<ClipView, EngineError> {
        let mut book = self.book.write().unwrap();
        let removed = book.remove(id)?;
        self.publish(&book);
        info!("Deleted clip {}", id);
        Ok(removed)
    }

    /// Play the clip's file on the capture device's media input.
    pub async fn send_to_output(&self, id: u64) -> Result<(), EngineError> {
        let view = self.get(id)?;
        let path = self.media.media_dir().path_of(view.clip.filename());
        self.device.play_media(&path).await?;
        info!("Clip {} sent to output", id);
        Ok(())
    }
}
