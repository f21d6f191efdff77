//! Recordings (sets) and recording groups (matches or sessions).
//!
//! Both are append-mostly sequences where "the current one" is the last
//! element. An item is open while it has no stop timestamp. Timestamps are
//! on the recording clock of `stream_recording_file`.
//!
//! The display grouping returned by [`RecordingBook::view`] is a pure
//! projection and is never persisted.

use serde::{Deserialize, Serialize};

use crate::error::RecordingError;
use crate::media::{ImageFile, VideoFile};
use crate::scoreboard::Scoreboard;
use crate::timestamp::Timestamp;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recording {
    pub id: u64,
    pub stream_recording_file: String,
    /// Set once the recording has been cut to its own file
    pub recording_file: Option<VideoFile>,
    pub start_timestamp: Timestamp,
    pub stop_timestamp: Option<Timestamp>,
    pub start_thumbnail: Option<ImageFile>,
    pub stop_thumbnail: Option<ImageFile>,
    pub thumbnail_timestamp: Option<Timestamp>,
    pub display_name: String,
    pub metadata: Option<Scoreboard>,
}

impl Recording {
    pub fn is_open(&self) -> bool {
        self.stop_timestamp.is_none()
    }

    pub fn is_immutable(&self) -> bool {
        self.recording_file.is_some()
    }

    /// Instant used for the set's thumbnail in the log.
    pub fn thumbnail_at(&self) -> Timestamp {
        self.thumbnail_timestamp.unwrap_or(self.start_timestamp)
    }

    pub fn game(&self) -> Option<&str> {
        self.metadata.as_ref().and_then(|m| m.game.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingGroup {
    pub id: u64,
    pub stream_recording_file: String,
    pub start_timestamp: Timestamp,
    pub stop_timestamp: Option<Timestamp>,
    pub start_thumbnail: Option<ImageFile>,
    pub stop_thumbnail: Option<ImageFile>,
    pub vod_thumbnail_timestamp: Option<Timestamp>,
    pub vod_thumbnail: Option<ImageFile>,
    /// Opened automatically on a game change rather than by the operator
    #[serde(default)]
    pub implicit: bool,
}

impl RecordingGroup {
    pub fn is_open(&self) -> bool {
        self.stop_timestamp.is_none()
    }

    /// Whether a recording that started at `start` in `file` belongs here.
    pub fn contains(&self, file: &str, start: Timestamp) -> bool {
        self.stream_recording_file == file
            && self.start_timestamp <= start
            && self.stop_timestamp.map_or(true, |stop| start <= stop)
    }
}

/// Result of a start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new item was appended
    Started(u64),
    /// The open item had its start rewritten
    Restarted(u64),
}

impl StartOutcome {
    pub fn id(&self) -> u64 {
        match *self {
            StartOutcome::Started(id) | StartOutcome::Restarted(id) => id,
        }
    }
}

/// Which thumbnail of a recording or group an image belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ThumbnailSlot {
    Start,
    Stop,
    /// The set thumbnail of a recording, or the VOD thumbnail of a group
    Cover,
}

/// Direct timestamp edits. Absent fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimestampEdit {
    pub start_timestamp: Option<Timestamp>,
    pub stop_timestamp: Option<Timestamp>,
    /// `thumbnailTimestamp` for recordings, `vodThumbnailTimestamp` for groups
    #[serde(alias = "vodThumbnailTimestamp")]
    pub thumbnail_timestamp: Option<Timestamp>,
}

/// One bucket of the display grouping. `group` is `None` for a run of
/// recordings that no group claims.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupView {
    pub group: Option<RecordingGroup>,
    pub recordings: Vec<Recording>,
}

fn check_interval(start: Timestamp, stop: Option<Timestamp>) -> Result<(), RecordingError> {
    match stop {
        Some(stop) if stop <= start => Err(RecordingError::InvalidInterval {
            start: start.to_string(),
            stop: stop.to_string(),
        }),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordingBook {
    next_recording_id: u64,
    next_group_id: u64,
    recordings: Vec<Recording>,
    recording_groups: Vec<RecordingGroup>,
}

impl RecordingBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recordings(&self) -> &[Recording] {
        &self.recordings
    }

    pub fn groups(&self) -> &[RecordingGroup] {
        &self.recording_groups
    }

    pub fn recording(&self, id: u64) -> Option<&Recording> {
        self.recordings.iter().find(|r| r.id == id)
    }

    pub fn group(&self, id: u64) -> Option<&RecordingGroup> {
        self.recording_groups.iter().find(|g| g.id == id)
    }

    fn recording_mut(&mut self, id: u64) -> Result<&mut Recording, RecordingError> {
        self.recordings
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(RecordingError::NoSuchRecording(id))
    }

    fn group_mut(&mut self, id: u64) -> Result<&mut RecordingGroup, RecordingError> {
        self.recording_groups
            .iter_mut()
            .find(|g| g.id == id)
            .ok_or(RecordingError::NoSuchGroup(id))
    }

    fn alloc_recording_id(&mut self) -> u64 {
        self.next_recording_id += 1;
        self.next_recording_id
    }

    fn alloc_group_id(&mut self) -> u64 {
        self.next_group_id += 1;
        self.next_group_id
    }

    /// Recordings whose start lies within `group`.
    pub fn recordings_in(&self, group: &RecordingGroup) -> Vec<&Recording> {
        self.recordings
            .iter()
            .filter(|r| group.contains(&r.stream_recording_file, r.start_timestamp))
            .collect()
    }

    // -------------------------------------------------------------------------
    // Recordings
    // -------------------------------------------------------------------------

    /// Open a recording at `at`, or move the start of the one already open.
    pub fn start_recording(&mut self, file: &str, at: Timestamp) -> StartOutcome {
        if let Some(last) = self.recordings.last_mut().filter(|r| r.is_open()) {
            last.start_timestamp = at;
            last.stream_recording_file = file.to_string();
            last.start_thumbnail = None;
            return StartOutcome::Restarted(last.id);
        }

        let id = self.alloc_recording_id();
        self.recordings.push(Recording {
            id,
            stream_recording_file: file.to_string(),
            recording_file: None,
            start_timestamp: at,
            stop_timestamp: None,
            start_thumbnail: None,
            stop_thumbnail: None,
            thumbnail_timestamp: None,
            display_name: String::new(),
            metadata: None,
        });
        StartOutcome::Started(id)
    }

    /// Close the open recording at `at`.
    pub fn stop_recording(&mut self, at: Timestamp) -> Result<u64, RecordingError> {
        let last = self
            .recordings
            .last_mut()
            .filter(|r| r.is_open())
            .ok_or(RecordingError::NoOpenRecording)?;
        check_interval(last.start_timestamp, Some(at))?;
        last.stop_timestamp = Some(at);
        Ok(last.id)
    }

    /// Attach the scoreboard snapshot taken when the recording stopped.
    pub fn apply_metadata(&mut self, id: u64, metadata: Scoreboard) -> Result<(), RecordingError> {
        let recording = self.recording_mut(id)?;
        if recording.is_immutable() {
            return Err(RecordingError::Immutable(id));
        }
        recording.display_name = metadata.display_name();
        recording.metadata = Some(metadata);
        Ok(())
    }

    /// Edit start/stop/thumbnail timestamps. Every changed timestamp clears
    /// its thumbnail; the returned slots need a fresh fetch.
    pub fn update_recording(
        &mut self,
        id: u64,
        edit: &TimestampEdit,
    ) -> Result<Vec<ThumbnailSlot>, RecordingError> {
        let recording = self.recording_mut(id)?;
        if recording.is_immutable() {
            return Err(RecordingError::Immutable(id));
        }
        let start = edit.start_timestamp.unwrap_or(recording.start_timestamp);
        let stop = edit.stop_timestamp.or(recording.stop_timestamp);
        // A cover-only edit leaves the interval as it was found
        if start != recording.start_timestamp || stop != recording.stop_timestamp {
            check_interval(start, stop)?;
        }

        let mut refresh = Vec::new();
        if start != recording.start_timestamp {
            recording.start_timestamp = start;
            recording.start_thumbnail = None;
            refresh.push(ThumbnailSlot::Start);
        }
        if stop != recording.stop_timestamp {
            recording.stop_timestamp = stop;
            recording.stop_thumbnail = None;
            refresh.push(ThumbnailSlot::Stop);
        }
        if edit.thumbnail_timestamp.is_some() && edit.thumbnail_timestamp != recording.thumbnail_timestamp {
            recording.thumbnail_timestamp = edit.thumbnail_timestamp;
            refresh.push(ThumbnailSlot::Cover);
        }
        Ok(refresh)
    }

    /// Install a fetched thumbnail, unless the recording is gone or the
    /// timestamp it was fetched for has since been edited.
    pub fn set_recording_thumbnail(
        &mut self,
        id: u64,
        slot: ThumbnailSlot,
        fetched_for: Timestamp,
        image: ImageFile,
    ) -> bool {
        let Ok(recording) = self.recording_mut(id) else {
            return false;
        };
        match slot {
            ThumbnailSlot::Start if recording.start_timestamp == fetched_for => {
                recording.start_thumbnail = Some(image);
                true
            }
            ThumbnailSlot::Stop if recording.stop_timestamp == Some(fetched_for) => {
                recording.stop_thumbnail = Some(image);
                true
            }
            // Recordings have no stored cover image; the log only carries the instant
            _ => false,
        }
    }

    /// Record the file a stopped recording was cut to. The recording is
    /// read-only afterwards.
    pub fn set_recording_file(&mut self, id: u64, file: VideoFile) -> Result<(), RecordingError> {
        let recording = self.recording_mut(id)?;
        if recording.is_immutable() {
            return Err(RecordingError::Immutable(id));
        }
        if recording.is_open() {
            return Err(RecordingError::NotStopped(id));
        }
        recording.recording_file = Some(file);
        Ok(())
    }

    pub fn delete_recording(&mut self, id: u64) -> Result<Recording, RecordingError> {
        let i = self
            .recordings
            .iter()
            .position(|r| r.id == id)
            .ok_or(RecordingError::NoSuchRecording(id))?;
        Ok(self.recordings.remove(i))
    }

    // -------------------------------------------------------------------------
    // Groups
    // -------------------------------------------------------------------------

    /// Open a group at `at`, or move the start of the one already open.
    ///
    /// An open group that was opened by auto-split is handed over to the
    /// operator: it is closed at `at` when possible, otherwise adopted.
    pub fn start_group(&mut self, file: &str, at: Timestamp) -> StartOutcome {
        if let Some(last) = self.recording_groups.last_mut().filter(|g| g.is_open()) {
            if last.implicit && last.stream_recording_file == file && last.start_timestamp < at {
                last.stop_timestamp = Some(at);
            } else {
                last.start_timestamp = at;
                last.stream_recording_file = file.to_string();
                last.start_thumbnail = None;
                last.implicit = false;
                return StartOutcome::Restarted(last.id);
            }
        }

        let id = self.alloc_group_id();
        self.recording_groups.push(RecordingGroup {
            id,
            stream_recording_file: file.to_string(),
            start_timestamp: at,
            stop_timestamp: None,
            start_thumbnail: None,
            stop_thumbnail: None,
            vod_thumbnail_timestamp: None,
            vod_thumbnail: None,
            implicit: false,
        });
        StartOutcome::Started(id)
    }

    /// Close the open group at `at`.
    pub fn stop_group(&mut self, at: Timestamp) -> Result<u64, RecordingError> {
        let last = self
            .recording_groups
            .last_mut()
            .filter(|g| g.is_open())
            .ok_or(RecordingError::NoOpenGroup)?;
        check_interval(last.start_timestamp, Some(at))?;
        last.stop_timestamp = Some(at);
        Ok(last.id)
    }

    pub fn update_group(
        &mut self,
        id: u64,
        edit: &TimestampEdit,
    ) -> Result<Vec<ThumbnailSlot>, RecordingError> {
        let group = self.group_mut(id)?;
        let start = edit.start_timestamp.unwrap_or(group.start_timestamp);
        let stop = edit.stop_timestamp.or(group.stop_timestamp);
        // Groups closed on capture loss may be empty; keep them editable
        if start != group.start_timestamp || stop != group.stop_timestamp {
            check_interval(start, stop)?;
        }

        let mut refresh = Vec::new();
        if start != group.start_timestamp {
            group.start_timestamp = start;
            group.start_thumbnail = None;
            refresh.push(ThumbnailSlot::Start);
        }
        if stop != group.stop_timestamp {
            group.stop_timestamp = stop;
            group.stop_thumbnail = None;
            refresh.push(ThumbnailSlot::Stop);
        }
        if edit.thumbnail_timestamp.is_some()
            && edit.thumbnail_timestamp != group.vod_thumbnail_timestamp
        {
            group.vod_thumbnail_timestamp = edit.thumbnail_timestamp;
            group.vod_thumbnail = None;
            refresh.push(ThumbnailSlot::Cover);
        }
        Ok(refresh)
    }

    /// Same reconciliation rules as [`set_recording_thumbnail`](Self::set_recording_thumbnail).
    pub fn set_group_thumbnail(
        &mut self,
        id: u64,
        slot: ThumbnailSlot,
        fetched_for: Timestamp,
        image: ImageFile,
    ) -> bool {
        let Ok(group) = self.group_mut(id) else {
            return false;
        };
        match slot {
            ThumbnailSlot::Start if group.start_timestamp == fetched_for => {
                group.start_thumbnail = Some(image);
                true
            }
            ThumbnailSlot::Stop if group.stop_timestamp == Some(fetched_for) => {
                group.stop_thumbnail = Some(image);
                true
            }
            ThumbnailSlot::Cover if group.vod_thumbnail_timestamp == Some(fetched_for) => {
                group.vod_thumbnail = Some(image);
                true
            }
            _ => false,
        }
    }

    pub fn delete_group(&mut self, id: u64) -> Result<RecordingGroup, RecordingError> {
        let i = self
            .recording_groups
            .iter()
            .position(|g| g.id == id)
            .ok_or(RecordingError::NoSuchGroup(id))?;
        Ok(self.recording_groups.remove(i))
    }

    /// The capture device stopped recording (or went away). Every open group
    /// is closed at the latest instant any of its recordings reached, or at
    /// its own start when it holds none. Returns the closed group ids.
    pub fn close_open_groups(&mut self) -> Vec<u64> {
        let mut closed = Vec::new();
        for i in 0..self.recording_groups.len() {
            if !self.recording_groups[i].is_open() {
                continue;
            }
            let group = &self.recording_groups[i];
            let end = self
                .recordings_in(group)
                .iter()
                .map(|r| r.stop_timestamp.unwrap_or(r.start_timestamp))
                .max()
                .unwrap_or(group.start_timestamp);

            let group = &mut self.recording_groups[i];
            group.stop_timestamp = Some(end);
            closed.push(group.id);
        }
        closed
    }

    // -------------------------------------------------------------------------
    // Auto-split
    // -------------------------------------------------------------------------

    /// After recording `id` has stopped and received its metadata, open an
    /// implicit group at its start if its game differs from the previous
    /// recording's and no operator-created group spans the boundary.
    ///
    /// This is a heuristic: a game switch without a stop in between is not
    /// detected. Returns the id of the opened group.
    #[cfg(feature = "auto-split")]
    pub fn auto_split(&mut self, id: u64) -> Option<u64> {
        let index = self.recordings.iter().position(|r| r.id == id)?;
        let previous = self.recordings[..index].last()?;
        let current = &self.recordings[index];

        let file = current.stream_recording_file.clone();
        if previous.stream_recording_file != file {
            return None;
        }
        match (previous.game(), current.game()) {
            (Some(a), Some(b)) if a != b => {}
            _ => return None,
        }
        let boundary_start = previous.stop_timestamp?;
        let boundary_end = current.start_timestamp;

        let spanned = self.recording_groups.iter().any(|g| {
            !g.implicit
                && g.stream_recording_file == file
                && g.start_timestamp <= boundary_start
                && g.stop_timestamp.map_or(true, |stop| stop >= boundary_end)
        });
        if spanned {
            return None;
        }

        for group in self.recording_groups.iter_mut() {
            if group.implicit && group.is_open() {
                let stop = boundary_start.max(group.start_timestamp);
                group.stop_timestamp = Some(stop);
            }
        }

        let group_id = self.alloc_group_id();
        self.recording_groups.push(RecordingGroup {
            id: group_id,
            stream_recording_file: file,
            start_timestamp: boundary_end,
            stop_timestamp: None,
            start_thumbnail: None,
            stop_thumbnail: None,
            vod_thumbnail_timestamp: None,
            vod_thumbnail: None,
            implicit: true,
        });
        Some(group_id)
    }

    // -------------------------------------------------------------------------
    // Display grouping
    // -------------------------------------------------------------------------

    /// Partition recordings for display: recordings claimed by a group (first
    /// match in group order) are listed under it, consecutive unclaimed
    /// recordings share an anonymous bucket, and empty groups come last.
    pub fn view(&self) -> Vec<GroupView> {
        let mut buckets: Vec<GroupView> = Vec::new();
        let mut used = vec![false; self.recording_groups.len()];

        for recording in &self.recordings {
            let owner = self
                .recording_groups
                .iter()
                .position(|g| g.contains(&recording.stream_recording_file, recording.start_timestamp));

            match owner {
                Some(gi) => {
                    let group_id = self.recording_groups[gi].id;
                    let existing = buckets
                        .iter_mut()
                        .find(|b| b.group.as_ref().is_some_and(|g| g.id == group_id));
                    match existing {
                        Some(bucket) => bucket.recordings.push(recording.clone()),
                        None => {
                            used[gi] = true;
                            buckets.push(GroupView {
                                group: Some(self.recording_groups[gi].clone()),
                                recordings: vec![recording.clone()],
                            });
                        }
                    }
                }
                None => match buckets.last_mut() {
                    Some(bucket) if bucket.group.is_none() => {
                        bucket.recordings.push(recording.clone())
                    }
                    _ => buckets.push(GroupView {
                        group: None,
                        recordings: vec![recording.clone()],
                    }),
                },
            }
        }

        for (gi, group) in self.recording_groups.iter().enumerate() {
            if !used[gi] {
                buckets.push(GroupView {
                    group: Some(group.clone()),
                    recordings: Vec::new(),
                });
            }
        }
        buckets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILE: &str = "/videos/2026-10-19 10-00-00.mkv";

    fn ts(s: &str) -> Timestamp {
        s.parse().unwrap()
    }

    fn game(name: &str) -> Scoreboard {
        Scoreboard {
            game: Some(name.to_string()),
            ..Default::default()
        }
    }

    fn stopped(book: &mut RecordingBook, start: &str, stop: &str, game_name: Option<&str>) -> u64 {
        let id = book.start_recording(FILE, ts(start)).id();
        book.stop_recording(ts(stop)).unwrap();
        if let Some(name) = game_name {
            book.apply_metadata(id, game(name)).unwrap();
        }
        id
    }

    #[test]
    fn test_restart_rewrites_open_recording() {
        let mut book = RecordingBook::new();
        let first = book.start_recording(FILE, ts("00:01:00"));
        assert!(matches!(first, StartOutcome::Started(_)));

        let second = book.start_recording(FILE, ts("00:01:30"));
        assert_eq!(second, StartOutcome::Restarted(first.id()));
        assert_eq!(book.recordings().len(), 1);
        assert_eq!(book.recordings()[0].start_timestamp, ts("00:01:30"));

        book.stop_recording(ts("00:05:00")).unwrap();
        let third = book.start_recording(FILE, ts("00:06:00"));
        assert!(matches!(third, StartOutcome::Started(id) if id != first.id()));
        assert_eq!(book.recordings().len(), 2);
    }

    #[test]
    fn test_stop_requires_open_recording() {
        let mut book = RecordingBook::new();
        assert_eq!(book.stop_recording(ts("00:00:10")), Err(RecordingError::NoOpenRecording));

        book.start_recording(FILE, ts("00:01:00"));
        assert!(matches!(
            book.stop_recording(ts("00:00:30")),
            Err(RecordingError::InvalidInterval { .. })
        ));
        book.stop_recording(ts("00:02:00")).unwrap();
        assert_eq!(book.stop_recording(ts("00:03:00")), Err(RecordingError::NoOpenRecording));
    }

    #[test]
    fn test_apply_metadata_sets_display_name() {
        let mut book = RecordingBook::new();
        let id = stopped(&mut book, "00:00:01", "00:00:02", None);
        let mut board = game("melee");
        board.round = Some("Grand Final".to_string());
        book.apply_metadata(id, board).unwrap();
        assert_eq!(book.recording(id).unwrap().display_name, "Grand Final");
        assert_eq!(book.recording(id).unwrap().game(), Some("melee"));
    }

    #[cfg(feature = "auto-split")]
    #[test]
    fn test_auto_split_on_game_change() {
        let mut book = RecordingBook::new();
        stopped(&mut book, "00:05:00", "00:10:00", Some("gameA"));
        let b = stopped(&mut book, "00:10:05", "00:15:00", Some("gameB"));

        let group_id = book.auto_split(b).unwrap();
        let group = book.group(group_id).unwrap();
        assert!(group.implicit);
        assert!(group.is_open());
        assert_eq!(group.start_timestamp, ts("00:10:05"));

        // The next game change closes it at the previous stop
        let c = stopped(&mut book, "00:16:00", "00:20:00", Some("gameC"));
        let next = book.auto_split(c).unwrap();
        assert_eq!(book.group(group_id).unwrap().stop_timestamp, Some(ts("00:15:00")));
        assert_eq!(book.group(next).unwrap().start_timestamp, ts("00:16:00"));
    }

    #[cfg(feature = "auto-split")]
    #[test]
    fn test_auto_split_skipped() {
        let mut book = RecordingBook::new();
        book.start_group(FILE, ts("00:00:00"));
        stopped(&mut book, "00:05:00", "00:10:00", Some("gameA"));
        let b = stopped(&mut book, "00:10:05", "00:15:00", Some("gameB"));
        // Operator group is open across the boundary
        assert_eq!(book.auto_split(b), None);

        let mut book = RecordingBook::new();
        stopped(&mut book, "00:05:00", "00:10:00", Some("gameA"));
        let b = stopped(&mut book, "00:10:05", "00:15:00", Some("gameA"));
        assert_eq!(book.auto_split(b), None);

        let mut book = RecordingBook::new();
        stopped(&mut book, "00:05:00", "00:10:00", None);
        let b = stopped(&mut book, "00:10:05", "00:15:00", Some("gameB"));
        assert_eq!(book.auto_split(b), None);
        assert!(book.groups().is_empty());
    }

    #[test]
    fn test_update_clears_thumbnails() {
        let mut book = RecordingBook::new();
        let id = stopped(&mut book, "00:01:00", "00:02:00", None);
        let thumb = ImageFile::new("t.png", "/media/t.png", 180);
        assert!(book.set_recording_thumbnail(id, ThumbnailSlot::Start, ts("00:01:00"), thumb.clone()));
        assert!(book.set_recording_thumbnail(id, ThumbnailSlot::Stop, ts("00:02:00"), thumb.clone()));

        let edit = TimestampEdit {
            start_timestamp: Some(ts("00:01:10")),
            ..Default::default()
        };
        assert_eq!(book.update_recording(id, &edit).unwrap(), vec![ThumbnailSlot::Start]);
        let recording = book.recording(id).unwrap();
        assert_eq!(recording.start_thumbnail, None);
        assert!(recording.stop_thumbnail.is_some());

        // A late fetch for the old start is discarded
        assert!(!book.set_recording_thumbnail(id, ThumbnailSlot::Start, ts("00:01:00"), thumb));

        let bad = TimestampEdit {
            stop_timestamp: Some(ts("00:00:30")),
            ..Default::default()
        };
        assert!(matches!(
            book.update_recording(id, &bad),
            Err(RecordingError::InvalidInterval { .. })
        ));
    }

    #[test]
    fn test_cut_recording_is_immutable() {
        let mut book = RecordingBook::new();
        let open = book.start_recording(FILE, ts("00:01:00")).id();
        let video = VideoFile::new("set.mkv", "/media/set.mkv", 60_000);
        assert_eq!(book.set_recording_file(open, video.clone()), Err(RecordingError::NotStopped(open)));

        book.stop_recording(ts("00:02:00")).unwrap();
        book.set_recording_file(open, video.clone()).unwrap();
        assert_eq!(
            book.update_recording(open, &TimestampEdit::default()),
            Err(RecordingError::Immutable(open))
        );
        assert_eq!(book.set_recording_file(open, video), Err(RecordingError::Immutable(open)));
    }

    #[test]
    fn test_group_restart_and_stop() {
        let mut book = RecordingBook::new();
        let g = book.start_group(FILE, ts("00:00:10")).id();
        assert_eq!(book.start_group(FILE, ts("00:00:20")), StartOutcome::Restarted(g));
        assert_eq!(book.groups().len(), 1);
        assert_eq!(book.stop_group(ts("00:30:00")), Ok(g));
        assert_eq!(book.stop_group(ts("00:31:00")), Err(RecordingError::NoOpenGroup));
    }

    #[test]
    fn test_close_open_groups() {
        let mut book = RecordingBook::new();
        let g = book.start_group(FILE, ts("00:00:00")).id();
        stopped(&mut book, "00:01:00", "00:04:00", None);
        book.start_recording(FILE, ts("00:05:00"));

        assert_eq!(book.close_open_groups(), vec![g]);
        assert_eq!(book.group(g).unwrap().stop_timestamp, Some(ts("00:05:00")));

        let empty = book.start_group(FILE, ts("01:00:00")).id();
        book.close_open_groups();
        assert_eq!(book.group(empty).unwrap().stop_timestamp, Some(ts("01:00:00")));
    }

    #[test]
    fn test_empty_closed_group_stays_editable() {
        let mut book = RecordingBook::new();
        let g = book.start_group(FILE, ts("00:00:10")).id();
        book.close_open_groups();

        let cover = TimestampEdit {
            thumbnail_timestamp: Some(ts("00:00:10")),
            ..Default::default()
        };
        assert_eq!(book.update_group(g, &cover), Ok(vec![ThumbnailSlot::Cover]));

        let stretch = TimestampEdit {
            stop_timestamp: Some(ts("00:20:00")),
            ..Default::default()
        };
        assert_eq!(book.update_group(g, &stretch), Ok(vec![ThumbnailSlot::Stop]));

        let inverted = TimestampEdit {
            stop_timestamp: Some(ts("00:00:05")),
            ..Default::default()
        };
        assert!(matches!(
            book.update_group(g, &inverted),
            Err(RecordingError::InvalidInterval { .. })
        ));
    }

    #[test]
    fn test_grouping_view() {
        let mut book = RecordingBook::new();
        let r1 = stopped(&mut book, "00:01:00", "00:02:00", None);
        let r2 = stopped(&mut book, "00:03:00", "00:04:00", None);
        let g = book.start_group(FILE, ts("00:05:00")).id();
        let r3 = stopped(&mut book, "00:06:00", "00:07:00", None);
        book.stop_group(ts("00:08:00")).unwrap();
        let r4 = stopped(&mut book, "00:09:00", "00:10:00", None);
        let empty = book.start_group(FILE, ts("00:20:00")).id();
        book.stop_group(ts("00:21:00")).unwrap();

        let view = book.view();
        let shape: Vec<(Option<u64>, Vec<u64>)> = view
            .iter()
            .map(|b| {
                (
                    b.group.as_ref().map(|g| g.id),
                    b.recordings.iter().map(|r| r.id).collect(),
                )
            })
            .collect();
        assert_eq!(
            shape,
            vec![
                (None, vec![r1, r2]),
                (Some(g), vec![r3]),
                (None, vec![r4]),
                (Some(empty), vec![]),
            ]
        );
    }

    #[test]
    fn test_delete() {
        let mut book = RecordingBook::new();
        let r = stopped(&mut book, "00:01:00", "00:02:00", None);
        let g = book.start_group(FILE, ts("00:00:00")).id();
        book.delete_recording(r).unwrap();
        book.delete_group(g).unwrap();
        assert_eq!(book.delete_recording(r), Err(RecordingError::NoSuchRecording(r)));
        assert_eq!(book.delete_group(g), Err(RecordingError::NoSuchGroup(g)));
        assert!(book.view().is_empty());
    }
}
