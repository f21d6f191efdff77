//! Media timeline service.
//!
//! Answers "give me a frame (or a replay) at this instant" on either clock,
//! reusing cached captures that are close enough and otherwise extracting
//! from the best source available:
//!
//! 1. a cached replay whose span contains the instant,
//! 2. the active recording file, at the instant converted to recording time.
//!
//! Every capture lands in the media directory and is served under
//! `/media/<filename>`.

use log::{debug, info, warn};
use stagehand_core::cache::DualCache;
use stagehand_core::media::{ImageFile, VideoFile};
use stagehand_core::{ClockDomain, DualTimestamp, Replay, Screenshot, Timestamp};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;
use tokio::fs;
use tokio::time::sleep;

use crate::config::Settings;
use crate::error::EngineError;
use crate::obs::CaptureDevice;
use crate::transcoder::{Transcoder, WAVEFORM_HEIGHT};

pub const MEDIA_URL_PREFIX: &str = "/media";

// -----------------------------------------------------------------------------
// Media directory
// -----------------------------------------------------------------------------

/// The directory every generated image and video is written to.
#[derive(Debug)]
pub struct MediaDir {
    dir: PathBuf,
    counter: AtomicU32,
}

impl MediaDir {
    pub fn new(dir: &Path) -> MediaDir {
        MediaDir {
            dir: dir.to_owned(),
            counter: AtomicU32::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<prefix>_<YYYYmmdd_HHMMSS>_<n>.<ext>`, unique within this process and
    /// not clashing with any file already on disk.
    pub fn generate_filename(&self, prefix: &str, extension: &str) -> String {
        let now = chrono::Local::now();
        let base_name = format!("{}_{}", prefix, now.format("%Y%m%d_%H%M%S"));
        loop {
            let n = self.counter.fetch_add(1, Ordering::Relaxed);
            let name = format!("{}_{}.{}", base_name, n, extension);
            if !self.dir.join(&name).exists() {
                return name;
            }
        }
    }

    pub fn path_of(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }

    pub fn url_of(filename: &str) -> String {
        format!("{}/{}", MEDIA_URL_PREFIX, filename)
    }

    pub async fn write_image(
        &self,
        prefix: &str,
        png: &[u8],
        height: u32,
    ) -> Result<ImageFile, EngineError> {
        let filename = self.generate_filename(prefix, "png");
        fs::write(self.path_of(&filename), png).await?;
        Ok(ImageFile::new(&filename, &Self::url_of(&filename), height))
    }
}

// -----------------------------------------------------------------------------
// Caches
// -----------------------------------------------------------------------------

struct MediaCaches {
    full: DualCache<Screenshot>,
    thumbnail: DualCache<Screenshot>,
    replay: DualCache<Replay>,
    /// Recording file the caches refer to
    recording_file: Option<PathBuf>,
}

impl MediaCaches {
    fn new(settings: &Settings) -> Self {
        MediaCaches {
            full: DualCache::new(settings.screenshot_leniency_ms),
            thumbnail: DualCache::new(settings.screenshot_leniency_ms),
            replay: DualCache::new(settings.replay_leniency_ms),
            recording_file: None,
        }
    }

    fn clear(&mut self) {
        self.full.clear();
        self.thumbnail.clear();
        self.replay.clear();
    }
}

/// Where a past frame is extracted from.
enum FrameSource {
    Replay { file: PathBuf, offset: Timestamp, timestamps: DualTimestamp },
    Recording { file: PathBuf, timestamps: DualTimestamp },
}

// -----------------------------------------------------------------------------
// Service
// -----------------------------------------------------------------------------

struct Inner {
    settings: Arc<Settings>,
    device: Arc<dyn CaptureDevice>,
    transcoder: Arc<dyn Transcoder>,
    dir: MediaDir,
    caches: RwLock<MediaCaches>,
}

#[derive(Clone)]
pub struct MediaService {
    inner: Arc<Inner>,
}

impl MediaService {
    pub fn new(
        settings: Arc<Settings>,
        device: Arc<dyn CaptureDevice>,
        transcoder: Arc<dyn Transcoder>,
    ) -> MediaService {
        let caches = RwLock::new(MediaCaches::new(&settings));
        let dir = MediaDir::new(&settings.media_dir);
        MediaService {
            inner: Arc::new(Inner {
                settings,
                device,
                transcoder,
                dir,
                caches,
            }),
        }
    }

    pub fn media_dir(&self) -> &MediaDir {
        &self.inner.dir
    }

    pub fn current_recording_file(&self) -> Option<PathBuf> {
        self.inner.caches.read().unwrap().recording_file.clone()
    }

    /// Note the file the device is recording into. Caches refer to positions
    /// in one file, so they are dropped when it changes. Returns whether the
    /// file changed.
    pub fn observe_recording_file(&self, file: &Path) -> bool {
        let mut caches = self.inner.caches.write().unwrap();
        if caches.recording_file.as_deref() == Some(file) {
            return false;
        }
        info!("Recording file is now {}", file.display());
        caches.recording_file = Some(file.to_owned());
        caches.clear();
        true
    }

    pub fn reset_caches(&self) {
        debug!("Clearing media caches");
        self.inner.caches.write().unwrap().clear();
    }

    // -------------------------------------------------------------------------
    // Live captures
    // -------------------------------------------------------------------------

    pub async fn current_full_screenshot(&self) -> Result<Screenshot, EngineError> {
        let timestamps = self.inner.device.current_dual_timestamps().await?;
        let png = self.inner.device.current_thumbnail(None).await?;
        if png.is_empty() {
            return Err(EngineError::CaptureUnavailable);
        }
        let (_, height) = self.inner.device.output_dimensions().await?;
        let image = self.inner.dir.write_image("screenshot", &png, height).await?;

        let screenshot = Screenshot { image, timestamps };
        let mut caches = self.inner.caches.write().unwrap();
        caches.full.add(screenshot.clone());
        caches.thumbnail.add(screenshot.clone());
        Ok(screenshot)
    }

    pub async fn current_thumbnail(&self) -> Result<Screenshot, EngineError> {
        let height = self.inner.settings.thumbnail_height;
        let timestamps = self.inner.device.current_dual_timestamps().await?;
        let png = self.inner.device.current_thumbnail(Some(height)).await?;
        if png.is_empty() {
            return Err(EngineError::CaptureUnavailable);
        }
        let image = self.inner.dir.write_image("thumbnail", &png, height).await?;

        let screenshot = Screenshot { image, timestamps };
        self.inner.caches.write().unwrap().thumbnail.add(screenshot.clone());
        Ok(screenshot)
    }

    // -------------------------------------------------------------------------
    // Past captures
    // -------------------------------------------------------------------------

    pub async fn full_screenshot(
        &self,
        domain: ClockDomain,
        t: Timestamp,
    ) -> Result<Screenshot, EngineError> {
        let cached = self.inner.caches.read().unwrap().full.get(domain, t).cloned();
        if let Some(screenshot) = cached {
            debug!("Full screenshot at {} {} served from cache", domain, t);
            return Ok(screenshot);
        }

        let height = match self.inner.device.output_dimensions().await {
            Ok((_, height)) => height,
            Err(e) => {
                debug!("Output size unknown ({}), using 0", e);
                0
            }
        };
        let screenshot = self.extract("screenshot", domain, t, None, height).await?;
        let mut caches = self.inner.caches.write().unwrap();
        caches.full.add(screenshot.clone());
        caches.thumbnail.add(screenshot.clone());
        Ok(screenshot)
    }

    pub async fn thumbnail(&self, domain: ClockDomain, t: Timestamp) -> Result<Screenshot, EngineError> {
        let cached = {
            let caches = self.inner.caches.read().unwrap();
            caches
                .thumbnail
                .get(domain, t)
                .or_else(|| caches.full.get(domain, t))
                .cloned()
        };
        if let Some(screenshot) = cached {
            debug!("Thumbnail at {} {} served from cache", domain, t);
            return Ok(screenshot);
        }

        let height = self.inner.settings.thumbnail_height;
        let screenshot = self.extract("thumbnail", domain, t, Some(height), height).await?;
        self.inner.caches.write().unwrap().thumbnail.add(screenshot.clone());
        Ok(screenshot)
    }

    async fn extract(
        &self,
        prefix: &str,
        domain: ClockDomain,
        t: Timestamp,
        scale_to: Option<u32>,
        height: u32,
    ) -> Result<Screenshot, EngineError> {
        let (file, at, timestamps) = match self.resolve_source(domain, t).await? {
            FrameSource::Replay { file, offset, timestamps } => (file, offset, timestamps),
            FrameSource::Recording { file, timestamps } => {
                let at = timestamps
                    .recording
                    .ok_or_else(|| EngineError::ExtractionFailed("no recording time".to_string()))?;
                (file, at, timestamps)
            }
        };
        debug!("Extracting frame at {} from {}", at, file.display());

        let png = self
            .inner
            .transcoder
            .frame_at(&file, at, scale_to)
            .await
            .map_err(|e| EngineError::ExtractionFailed(e.to_string()))?;
        let image = self.inner.dir.write_image(prefix, &png, height).await?;
        Ok(Screenshot { image, timestamps })
    }

    async fn resolve_source(&self, domain: ClockDomain, t: Timestamp) -> Result<FrameSource, EngineError> {
        let (replay, recording_file) = {
            let caches = self.inner.caches.read().unwrap();
            (caches.replay.get(domain, t).cloned(), caches.recording_file.clone())
        };

        if let Some(replay) = replay {
            // A lenient replay cache can return a replay that ends just short of t
            let offset = replay
                .rebase(domain, t)
                .unwrap_or(Timestamp::ZERO)
                .min(Timestamp::from_millis(replay.video.duration_ms));
            return Ok(FrameSource::Replay {
                file: self.inner.dir.path_of(replay.video.filename()),
                offset,
                timestamps: replay.start_timestamps().advance(offset.as_millis()),
            });
        }

        let file = match recording_file {
            Some(file) => file,
            None => self
                .inner
                .device
                .active_recording_file()
                .await?
                .ok_or_else(|| EngineError::ExtractionFailed("recording file unknown".to_string()))?,
        };

        let timestamps = match domain {
            ClockDomain::Recording => DualTimestamp::recording(t),
            ClockDomain::Stream => {
                let now = self.inner.device.current_dual_timestamps().await?;
                let offset = now.offset().ok_or_else(|| {
                    EngineError::ExtractionFailed("recording and stream are not both running".to_string())
                })?;
                let recording_ms = t.as_millis() as i64 + offset;
                if recording_ms < 0 {
                    return Err(EngineError::ExtractionFailed(format!(
                        "stream time {} is before the recording started",
                        t
                    )));
                }
                DualTimestamp::new(Some(Timestamp::from_millis(recording_ms as u64)), Some(t))
            }
        };
        Ok(FrameSource::Recording { file, timestamps })
    }

    // -------------------------------------------------------------------------
    // Replays and clips
    // -------------------------------------------------------------------------

    /// Save the replay buffer and turn it into a cached [`Replay`].
    pub async fn replay(&self) -> Result<Replay, EngineError> {
        let settings = &self.inner.settings;
        let saved = self.inner.device.save_replay_buffer().await?;

        // The device returns before the file is fully written
        let mut duration_ms = None;
        for attempt in 1..=settings.replay_poll_attempts {
            if let Some(duration) = self.inner.transcoder.probe_duration(&saved).await? {
                duration_ms = Some(duration);
                break;
            }
            debug!("Replay {} not readable yet (attempt {})", saved.display(), attempt);
            sleep(settings.replay_poll_interval).await;
        }
        let duration_ms = duration_ms.ok_or_else(|| EngineError::IncompleteCapture {
            path: saved.clone(),
            attempts: settings.replay_poll_attempts,
        })?;

        let now = self.inner.device.current_dual_timestamps().await?;
        let written = fs::metadata(&saved).await?.modified()?;
        let age_ms = SystemTime::now()
            .duration_since(written)
            .unwrap_or_default()
            .as_millis() as u64;
        let timestamps = now.rewind(age_ms);

        let converted = self.convert_replay(&saved, duration_ms).await;
        remove_quietly(&saved).await;
        let (video, waveform, thumbnail) = converted?;

        let replay = Replay {
            video,
            waveform,
            thumbnail,
            timestamps,
        };
        self.inner.caches.write().unwrap().replay.add(replay.clone());
        Ok(replay)
    }

    /// Web-playable copy of a saved replay with its waveform and thumbnail.
    /// Nothing is left in the media directory on failure.
    async fn convert_replay(
        &self,
        saved: &Path,
        duration_ms: u64,
    ) -> Result<(VideoFile, ImageFile, ImageFile), EngineError> {
        let filename = self.inner.dir.generate_filename("replay", "mp4");
        let out = self.inner.dir.path_of(&filename);
        if let Err(e) = self.inner.transcoder.transcode_to_web_format(saved, &out).await {
            remove_quietly(&out).await;
            return Err(e);
        }
        let video = VideoFile::new(&filename, &MediaDir::url_of(&filename), duration_ms);

        let waveform = match self.video_waveform(&video).await {
            Ok(waveform) => waveform,
            Err(e) => {
                remove_quietly(&out).await;
                return Err(e);
            }
        };
        match self.video_thumbnail(&video).await {
            Ok(thumbnail) => Ok((video, waveform, thumbnail)),
            Err(e) => {
                remove_quietly(&out).await;
                remove_quietly(&self.inner.dir.path_of(waveform.filename())).await;
                Err(e)
            }
        }
    }

    /// Frame-accurate trim of a media-directory video into a new file.
    pub async fn cut_video(
        &self,
        video: &VideoFile,
        start_ms: u64,
        end_ms: u64,
    ) -> Result<VideoFile, EngineError> {
        let filename = self.inner.dir.generate_filename("clip", "mp4");
        let out = self.inner.dir.path_of(&filename);
        self.inner
            .transcoder
            .lossy_trim(
                &self.inner.dir.path_of(video.filename()),
                Timestamp::from_millis(start_ms),
                Timestamp::from_millis(end_ms),
                &out,
            )
            .await?;
        // Re-encoding cuts on the exact frame
        Ok(VideoFile::new(
            &filename,
            &MediaDir::url_of(&filename),
            end_ms.saturating_sub(start_ms),
        ))
    }

    pub async fn video_waveform(&self, video: &VideoFile) -> Result<ImageFile, EngineError> {
        let filename = self.inner.dir.generate_filename("waveform", "png");
        self.inner
            .transcoder
            .waveform(
                &self.inner.dir.path_of(video.filename()),
                &self.inner.dir.path_of(&filename),
                video.duration_ms,
            )
            .await?;
        Ok(ImageFile::new(&filename, &MediaDir::url_of(&filename), WAVEFORM_HEIGHT))
    }

    /// Thumbnail from the middle of the video.
    pub async fn video_thumbnail(&self, video: &VideoFile) -> Result<ImageFile, EngineError> {
        let height = self.inner.settings.thumbnail_height;
        let png = self
            .inner
            .transcoder
            .frame_at(
                &self.inner.dir.path_of(video.filename()),
                Timestamp::from_millis(video.duration_ms / 2),
                Some(height),
            )
            .await?;
        self.inner.dir.write_image("thumbnail", &png, height).await
    }

    /// Keyframe-aligned copy of `[start, stop]` of a recording file.
    pub async fn cut_recording_segment(
        &self,
        file: &Path,
        start: Timestamp,
        stop: Timestamp,
    ) -> Result<VideoFile, EngineError> {
        let extension = file.extension().and_then(|e| e.to_str()).unwrap_or("mkv");
        let filename = self.inner.dir.generate_filename("set", extension);
        self.inner
            .transcoder
            .lossless_trim(file, start, stop, &self.inner.dir.path_of(&filename))
            .await?;
        Ok(VideoFile::new(
            &filename,
            &MediaDir::url_of(&filename),
            stop.as_millis().saturating_sub(start.as_millis()),
        ))
    }
}

async fn remove_quietly(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Cannot remove {}: {}", path.display(), e),
    }
}
