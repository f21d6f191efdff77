//! Archival logs, one per recording group.
//!
//! A log lists the finished sets of a group with their bracket identifiers so
//! that the VOD can be split and titled after the event. The path is derived
//! deterministically from the group and the writing process:
//!
//! ```text
//! <log dir>/<stem of stream file>/<game>_<phase>_g<group id>_p<pid>.json
//! ```
//!
//! The process id keeps two control processes (or one restarted process,
//! whose group ids start over) from overwriting each other's logs.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::recording::{Recording, RecordingBook, RecordingGroup};
use crate::timestamp::Timestamp;

pub const LOG_VERSION: u32 = 1;

const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: u64,
    pub display_name: String,
    pub start: Timestamp,
    pub end: Timestamp,
    /// Scoreboard snapshot taken when the set stopped
    pub state: Value,
    pub thumbnail_timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    pub version: u32,
    pub source_file: String,
    pub game: Option<String>,
    pub tournament_id: Option<String>,
    pub event_id: Option<String>,
    pub phase_id: Option<String>,
    pub group_id: u64,
    pub start: Timestamp,
    pub end: Option<Timestamp>,
    pub thumbnail_timestamp: Option<Timestamp>,
    pub sets: Vec<LogEntry>,
}

impl Log {
    /// Build the log for `group`, or `None` when none of its recordings has
    /// stopped yet.
    pub fn for_group(group: &RecordingGroup, recordings: &[&Recording]) -> Option<Log> {
        let finished: Vec<&Recording> = recordings
            .iter()
            .copied()
            .filter(|r| r.stop_timestamp.is_some())
            .collect();
        if finished.is_empty() {
            return None;
        }

        let sets = finished
            .iter()
            .filter_map(|r| {
                Some(LogEntry {
                    id: r.id,
                    display_name: r.display_name.clone(),
                    start: r.start_timestamp,
                    end: r.stop_timestamp?,
                    state: r
                        .metadata
                        .as_ref()
                        .and_then(|m| serde_json::to_value(m).ok())
                        .unwrap_or(Value::Null),
                    thumbnail_timestamp: r.thumbnail_at(),
                })
            })
            .collect();

        Some(Log {
            version: LOG_VERSION,
            source_file: group.stream_recording_file.clone(),
            game: common(&finished, |m| m.game.as_deref()),
            tournament_id: common(&finished, |m| m.tournament_id.as_deref()),
            event_id: common(&finished, |m| m.event_id.as_deref()),
            phase_id: common(&finished, |m| m.phase_id.as_deref()),
            group_id: group.id,
            start: group.start_timestamp,
            end: group.stop_timestamp,
            thumbnail_timestamp: group.vod_thumbnail_timestamp,
            sets,
        })
    }

    /// `<game>_<phase>_g<group id>_p<pid>`
    pub fn identifier(&self, pid: u32) -> String {
        format!(
            "{}_{}_g{}_p{}",
            sanitize(self.game.as_deref().unwrap_or(UNKNOWN)),
            sanitize(self.phase_id.as_deref().unwrap_or(UNKNOWN)),
            self.group_id,
            pid
        )
    }

    /// Path of this log relative to the log directory.
    pub fn relative_path(&self, pid: u32) -> PathBuf {
        let folder = Path::new(&self.source_file)
            .file_stem()
            .map(|s| sanitize(&s.to_string_lossy()))
            .unwrap_or_else(|| UNKNOWN.to_string());
        PathBuf::from(folder).join(format!("{}.json", self.identifier(pid)))
    }
}

/// The value every recording that has one agrees on.
fn common<F>(recordings: &[&Recording], field: F) -> Option<String>
where
    F: Fn(&crate::scoreboard::Scoreboard) -> Option<&str>,
{
    let mut values = recordings
        .iter()
        .filter_map(|r| r.metadata.as_ref().and_then(&field));
    let first = values.next()?;
    if values.all(|v| v == first) {
        Some(first.to_string())
    } else {
        None
    }
}

/// Keep log paths portable: anything but ASCII alphanumerics, `-`, `_`,
/// `.` and space becomes `-`.
fn sanitize(s: &str) -> String {
    let cleaned: String = s
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ' ') {
                c
            } else {
                '-'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        UNKNOWN.to_string()
    } else {
        cleaned
    }
}

/// All logs that should currently exist, with their relative paths.
pub fn logs_for(book: &RecordingBook, pid: u32) -> Vec<(PathBuf, Log)> {
    book.groups()
        .iter()
        .filter_map(|group| Log::for_group(group, &book.recordings_in(group)))
        .map(|log| (log.relative_path(pid), log))
        .collect()
}
