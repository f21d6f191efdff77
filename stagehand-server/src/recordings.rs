//! Recording segmentation over the capture device's recording clock.
//!
//! Sets are marked with start/stop against the file the device is recording
//! into; groups bracket sets (a pool, a bracket phase). Every mutation is
//! pushed to observers and mirrored into the archival logs.

use log::{debug, info, warn};
use serde_json::Value;
use stagehand_core::log::logs_for;
use stagehand_core::recording::{StartOutcome, ThumbnailSlot, TimestampEdit};
use stagehand_core::{ClockDomain, Recording, RecordingBook, RecordingError, RecordingGroup, Timestamp};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use crate::config::Settings;
use crate::error::EngineError;
use crate::logs::LogWriter;
use crate::media::MediaService;
use crate::obs::CaptureDevice;
use crate::push::{Push, RecordingsMessage};
use crate::scoreboard::ScoreboardStore;

/// Which item a fetched thumbnail belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Recording(u64),
    Group(u64),
}

#[derive(Clone)]
pub struct RecordingEngine {
    book: Arc<RwLock<RecordingBook>>,
    #[cfg_attr(not(feature = "auto-split"), allow(dead_code))]
    settings: Arc<Settings>,
    device: Arc<dyn CaptureDevice>,
    media: MediaService,
    scoreboard: ScoreboardStore,
    push: Push,
    logs: Arc<Mutex<LogWriter>>,
}

impl RecordingEngine {
    pub fn new(
        settings: Arc<Settings>,
        device: Arc<dyn CaptureDevice>,
        media: MediaService,
        scoreboard: ScoreboardStore,
        push: Push,
    ) -> RecordingEngine {
        let logs = LogWriter::new(&settings.log_dir);
        RecordingEngine {
            book: Arc::new(RwLock::new(RecordingBook::new())),
            settings,
            device,
            media,
            scoreboard,
            push,
            logs: Arc::new(Mutex::new(logs)),
        }
    }

    /// Recordings, groups and the display grouping, as pushed to observers.
    pub fn snapshot(&self) -> Result<Value, EngineError> {
        let book = self.book.read().unwrap();
        let grouped = book.view();
        Ok(serde_json::to_value(RecordingsMessage {
            recordings: book.recordings(),
            recording_groups: book.groups(),
            grouped: &grouped,
        })?)
    }

    pub fn recording(&self, id: u64) -> Result<Recording, EngineError> {
        Ok(self
            .book
            .read()
            .unwrap()
            .recording(id)
            .cloned()
            .ok_or(RecordingError::NoSuchRecording(id))?)
    }

    pub fn group(&self, id: u64) -> Result<RecordingGroup, EngineError> {
        Ok(self
            .book
            .read()
            .unwrap()
            .group(id)
            .cloned()
            .ok_or(RecordingError::NoSuchGroup(id))?)
    }

    // Called with the write lock held
    fn publish(&self, book: &RecordingBook) {
        let grouped = book.view();
        self.push.send(&RecordingsMessage {
            recordings: book.recordings(),
            recording_groups: book.groups(),
            grouped: &grouped,
        });

        let mut logs = self.logs.lock().unwrap();
        let pending = logs_for(book, logs.pid());
        match logs.save_logs(&pending) {
            Ok(0) => {}
            Ok(n) => debug!("Updated {} logs", n),
            Err(e) => warn!("Cannot save logs: {}", e),
        }
    }

    /// The file being recorded and the current position in it.
    async fn recording_position(&self) -> Result<(PathBuf, Timestamp), EngineError> {
        let file = self
            .device
            .active_recording_file()
            .await?
            .ok_or(EngineError::RecordingInactive)?;
        let at = self
            .device
            .current_dual_timestamps()
            .await?
            .recording
            .ok_or(EngineError::RecordingInactive)?;
        self.media.observe_recording_file(&file);
        Ok((file, at))
    }

    // -------------------------------------------------------------------------
    // Recordings
    // -------------------------------------------------------------------------

    /// Start a set now. A set that is already open is restarted instead.
    pub async fn start_recording(&self) -> Result<Recording, EngineError> {
        let (file, at) = self.recording_position().await?;
        let file = file.to_string_lossy().to_string();

        let recording = {
            let mut book = self.book.write().unwrap();
            let outcome = book.start_recording(&file, at);
            match outcome {
                StartOutcome::Started(id) => info!("Recording {} started at {}", id, at),
                StartOutcome::Restarted(id) => info!("Recording {} restarted at {}", id, at),
            }
            self.publish(&book);
            book.recording(outcome.id()).cloned()
        }
        .ok_or(EngineError::Recording(RecordingError::NoOpenRecording))?;

        self.spawn_thumbnails(Target::Recording(recording.id), &file, vec![(ThumbnailSlot::Start, at)]);
        Ok(recording)
    }

    /// Stop the open set, attach the scoreboard and split groups on a game
    /// change.
    pub async fn stop_recording(&self) -> Result<Recording, EngineError> {
        let (file, at) = self.recording_position().await?;
        let metadata = self.scoreboard.snapshot();
        let id = {
            let mut book = self.book.write().unwrap();
            let id = book.stop_recording(at)?;
            info!("Recording {} stopped at {}", id, at);
            // Logs are named after the metadata, so publish once it is attached
            match book.apply_metadata(id, metadata) {
                Ok(()) => self.auto_split(&mut book, id),
                Err(e) => warn!("Recording {}: metadata not attached: {}", id, e),
            }
            self.publish(&book);
            id
        };
        self.spawn_thumbnails(
            Target::Recording(id),
            &file.to_string_lossy(),
            vec![(ThumbnailSlot::Stop, at)],
        );
        self.recording(id)
    }

    #[cfg(feature = "auto-split")]
    fn auto_split(&self, book: &mut RecordingBook, id: u64) {
        if !self.settings.auto_split {
            return;
        }
        if let Some(group) = book.auto_split(id) {
            info!("Game changed, opened group {} at recording {}", group, id);
        }
    }

    #[cfg(not(feature = "auto-split"))]
    fn auto_split(&self, _book: &mut RecordingBook, _id: u64) {}

    pub fn update_recording(&self, id: u64, edit: &TimestampEdit) -> Result<Recording, EngineError> {
        let (recording, slots) = {
            let mut book = self.book.write().unwrap();
            let slots = book.update_recording(id, edit)?;
            if !slots.is_empty() {
                self.publish(&book);
            }
            let recording = book
                .recording(id)
                .cloned()
                .ok_or(RecordingError::NoSuchRecording(id))?;
            (recording, slots)
        };

        let fetch = slots
            .into_iter()
            .filter_map(|slot| match slot {
                ThumbnailSlot::Start => Some((slot, recording.start_timestamp)),
                ThumbnailSlot::Stop => recording.stop_timestamp.map(|t| (slot, t)),
                // Only the instant is kept for a set's cover
                ThumbnailSlot::Cover => None,
            })
            .collect();
        self.spawn_thumbnails(Target::Recording(id), &recording.stream_recording_file, fetch);
        Ok(recording)
    }

    pub fn delete_recording(&self, id: u64) -> Result<Recording, EngineError> {
        let mut book = self.book.write().unwrap();
        let removed = book.delete_recording(id)?;
        info!("Deleted recording {}", id);
        self.publish(&book);
        Ok(removed)
    }

    /// Copy a stopped set out of the stream recording into its own file. The
    /// recording is read-only afterwards.
    pub async fn cut_recording(&self, id: u64) -> Result<Recording, EngineError> {
        let recording = self.recording(id)?;
        if recording.is_immutable() {
            return Err(RecordingError::Immutable(id).into());
        }
        let stop = recording
            .stop_timestamp
            .ok_or(RecordingError::NotStopped(id))?;

        let video = self
            .media
            .cut_recording_segment(
                Path::new(&recording.stream_recording_file),
                recording.start_timestamp,
                stop,
            )
            .await?;

        let mut book = self.book.write().unwrap();
        book.set_recording_file(id, video)?;
        info!("Recording {} cut to its own file", id);
        self.publish(&book);
        Ok(book
            .recording(id)
            .cloned()
            .ok_or(RecordingError::NoSuchRecording(id))?)
    }

    // -------------------------------------------------------------------------
    // Groups
    // -------------------------------------------------------------------------

    pub async fn start_group(&self) -> Result<RecordingGroup, EngineError> {
        let (file, at) = self.recording_position().await?;
        let file = file.to_string_lossy().to_string();

        let group = {
            let mut book = self.book.write().unwrap();
            let outcome = book.start_group(&file, at);
            info!("Group {} started at {}", outcome.id(), at);
            self.publish(&book);
            book.group(outcome.id()).cloned()
        }
        .ok_or(EngineError::Recording(RecordingError::NoOpenGroup))?;

        self.spawn_thumbnails(Target::Group(group.id), &file, vec![(ThumbnailSlot::Start, at)]);
        Ok(group)
    }

    pub async fn stop_group(&self) -> Result<RecordingGroup, EngineError> {
        let (file, at) = self.recording_position().await?;
        let group = {
            let mut book = self.book.write().unwrap();
            let id = book.stop_group(at)?;
            info!("Group {} stopped at {}", id, at);
            self.publish(&book);
            book.group(id).cloned()
        }
        .ok_or(EngineError::Recording(RecordingError::NoOpenGroup))?;

        self.spawn_thumbnails(
            Target::Group(group.id),
            &file.to_string_lossy(),
            vec![(ThumbnailSlot::Stop, at)],
        );
        Ok(group)
    }

    pub fn update_group(&self, id: u64, edit: &TimestampEdit) -> Result<RecordingGroup, EngineError> {
        let (group, slots) = {
            let mut book = self.book.write().unwrap();
            let slots = book.update_group(id, edit)?;
            if !slots.is_empty() {
                self.publish(&book);
            }
            let group = book.group(id).cloned().ok_or(RecordingError::NoSuchGroup(id))?;
            (group, slots)
        };

        let fetch = slots
            .into_iter()
            .filter_map(|slot| match slot {
                ThumbnailSlot::Start => Some((slot, group.start_timestamp)),
                ThumbnailSlot::Stop => group.stop_timestamp.map(|t| (slot, t)),
                ThumbnailSlot::Cover => group.vod_thumbnail_timestamp.map(|t| (slot, t)),
            })
            .collect();
        self.spawn_thumbnails(Target::Group(id), &group.stream_recording_file, fetch);
        Ok(group)
    }

    pub fn delete_group(&self, id: u64) -> Result<RecordingGroup, EngineError> {
        let mut book = self.book.write().unwrap();
        let removed = book.delete_group(id)?;
        info!("Deleted group {}", id);
        self.publish(&book);
        Ok(removed)
    }

    /// The device stopped recording or went away: close whatever is open.
    pub fn capture_stopped(&self) {
        let mut book = self.book.write().unwrap();
        let closed = book.close_open_groups();
        if !closed.is_empty() {
            info!("Capture stopped, closed groups {:?}", closed);
            self.publish(&book);
        }
    }

    // -------------------------------------------------------------------------
    // Thumbnails
    // -------------------------------------------------------------------------

    fn spawn_thumbnails(&self, target: Target, file: &str, fetch: Vec<(ThumbnailSlot, Timestamp)>) {
        if fetch.is_empty() {
            return;
        }
        let engine = self.clone();
        let file = file.to_string();
        tokio::spawn(async move {
            engine.fetch_thumbnails(target, &file, fetch).await;
        });
    }

    /// Fetch thumbnails from the recording and install those still wanted.
    /// Returns how many were installed.
    async fn fetch_thumbnails(
        &self,
        target: Target,
        file: &str,
        fetch: Vec<(ThumbnailSlot, Timestamp)>,
    ) -> usize {
        let mut installed_count = 0;
        for (slot, at) in fetch {
            // Only the file being recorded can be seeked into
            let current = self.media.current_recording_file();
            if current.as_deref() != Some(Path::new(file)) {
                debug!("{:?}: skipping {:?} thumbnail, {} is not the active file", target, slot, file);
                continue;
            }
            let image = match self.media.thumbnail(ClockDomain::Recording, at).await {
                Ok(screenshot) => screenshot.image,
                Err(e) => {
                    warn!("{:?}: {:?} thumbnail at {} failed: {}", target, slot, at, e);
                    continue;
                }
            };

            let mut book = self.book.write().unwrap();
            let installed = match target {
                Target::Recording(id) => book.set_recording_thumbnail(id, slot, at, image),
                Target::Group(id) => book.set_group_thumbnail(id, slot, at, image),
            };
            if installed {
                installed_count += 1;
                self.publish(&book);
            } else {
                debug!("{:?}: {:?} thumbnail for {} is stale", target, slot, at);
            }
        }
        installed_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_engine, TestEngine};
    use serde_json::json;
    use stagehand_core::DualTimestamp;

    const FILE: &str = "/rec/session.mkv";

    fn recording_at(t: &TestEngine, s: &str) {
        t.device.set_recording_file(Some(FILE));
        t.device
            .set_timestamps(DualTimestamp::recording(s.parse().unwrap()));
    }

    fn ts(s: &str) -> Timestamp {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_start_requires_active_recording() {
        let t = test_engine();
        assert!(matches!(
            t.engine.recordings.start_recording().await,
            Err(EngineError::RecordingInactive)
        ));
        t.device.set_recording_file(Some(FILE));
        assert!(matches!(
            t.engine.recordings.start_group().await,
            Err(EngineError::RecordingInactive)
        ));
    }

    #[tokio::test]
    async fn test_restart_rewrites_start() {
        let t = test_engine();
        recording_at(&t, "00:01:00");
        let first = t.engine.recordings.start_recording().await.unwrap();
        recording_at(&t, "00:01:30");
        let second = t.engine.recordings.start_recording().await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.start_timestamp, ts("00:01:30"));
        let snapshot = t.engine.recordings.snapshot().unwrap();
        assert_eq!(snapshot["recordings"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_attaches_scoreboard() {
        let t = test_engine();
        t.engine
            .scoreboard
            .patch(&json!({"game": "melee", "players": [{"name": "A"}, {"name": "B"}]}))
            .unwrap();
        recording_at(&t, "00:01:00");
        t.engine.recordings.start_recording().await.unwrap();
        recording_at(&t, "00:05:00");
        let stopped = t.engine.recordings.stop_recording().await.unwrap();

        assert_eq!(stopped.stop_timestamp, Some(ts("00:05:00")));
        assert_eq!(stopped.display_name, "A vs B");
        assert_eq!(stopped.game(), Some("melee"));

        assert!(matches!(
            t.engine.recordings.stop_recording().await,
            Err(EngineError::Recording(RecordingError::NoOpenRecording))
        ));
    }

    #[tokio::test]
    async fn test_stop_writes_one_log_per_group() {
        let t = test_engine();
        t.engine
            .scoreboard
            .patch(&json!({"game": "melee", "phaseId": "pools"}))
            .unwrap();
        recording_at(&t, "00:00:10");
        t.engine.recordings.start_group().await.unwrap();
        t.engine.recordings.start_recording().await.unwrap();
        recording_at(&t, "00:03:00");
        t.engine.recordings.stop_recording().await.unwrap();

        let log_dir = t.temp.path().join("logs").join("session");
        let logs: Vec<_> = std::fs::read_dir(&log_dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(logs.len(), 1, "{:?}", logs);
        assert!(logs[0].starts_with("melee_pools_"), "{:?}", logs);
    }

    #[cfg(feature = "auto-split")]
    #[tokio::test]
    async fn test_game_change_opens_group() {
        let t = test_engine();
        let sets = [
            ("gameA", "00:05:00", "00:10:00"),
            ("gameB", "00:10:05", "00:15:00"),
        ];
        for (game, start, stop) in sets {
            t.engine.scoreboard.patch(&json!({ "game": game })).unwrap();
            recording_at(&t, start);
            t.engine.recordings.start_recording().await.unwrap();
            recording_at(&t, stop);
            t.engine.recordings.stop_recording().await.unwrap();
        }

        let snapshot = t.engine.recordings.snapshot().unwrap();
        let groups = snapshot["recordingGroups"].as_array().unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0]["implicit"], true);
        assert_eq!(groups[0]["startTimestamp"], "00:10:05.000");

        // The group holds a stopped set, so it has a log
        let log_dir = t.temp.path().join("logs").join("session");
        let logs: Vec<_> = std::fs::read_dir(&log_dir).unwrap().collect();
        assert_eq!(logs.len(), 1);
    }

    #[tokio::test]
    async fn test_capture_stopped_closes_groups() {
        let t = test_engine();
        recording_at(&t, "00:00:10");
        let group = t.engine.recordings.start_group().await.unwrap();
        t.engine.recordings.start_recording().await.unwrap();
        recording_at(&t, "00:02:00");
        t.engine.recordings.stop_recording().await.unwrap();

        t.engine.recordings.capture_stopped();
        let group = t.engine.recordings.group(group.id).unwrap();
        assert_eq!(group.stop_timestamp, Some(ts("00:02:00")));
    }

    #[tokio::test]
    async fn test_cut_recording_is_final() {
        let t = test_engine();
        recording_at(&t, "00:01:00");
        let recording = t.engine.recordings.start_recording().await.unwrap();
        assert!(matches!(
            t.engine.recordings.cut_recording(recording.id).await,
            Err(EngineError::Recording(RecordingError::NotStopped(_)))
        ));

        recording_at(&t, "00:02:00");
        t.engine.recordings.stop_recording().await.unwrap();
        let cut = t.engine.recordings.cut_recording(recording.id).await.unwrap();
        let file = cut.recording_file.unwrap();
        assert_eq!(file.duration_ms, 60_000);
        assert!(t.temp.path().join("media").join(file.filename()).exists());

        let edit = TimestampEdit {
            start_timestamp: Some(ts("00:01:10")),
            ..Default::default()
        };
        assert!(matches!(
            t.engine.recordings.update_recording(recording.id, &edit),
            Err(EngineError::Recording(RecordingError::Immutable(_)))
        ));
    }

    #[tokio::test]
    async fn test_thumbnail_fetch_discards_stale_results() {
        let t = test_engine();
        recording_at(&t, "00:01:00");
        let recording = t.engine.recordings.start_recording().await.unwrap();
        let engine = &t.engine.recordings;
        let target = Target::Recording(recording.id);
        let old_start = vec![(ThumbnailSlot::Start, ts("00:01:00"))];

        assert_eq!(engine.fetch_thumbnails(target, FILE, old_start.clone()).await, 1);

        let edit = TimestampEdit {
            start_timestamp: Some(ts("00:00:50")),
            ..Default::default()
        };
        engine.update_recording(recording.id, &edit).unwrap();
        assert_eq!(engine.fetch_thumbnails(target, FILE, old_start).await, 0);

        // Positions in another file cannot be extracted
        let new_start = vec![(ThumbnailSlot::Start, ts("00:00:50"))];
        assert_eq!(engine.fetch_thumbnails(target, "/rec/other.mkv", new_start.clone()).await, 0);
        assert_eq!(engine.fetch_thumbnails(target, FILE, new_start).await, 1);
    }
}
