//! Archival per-group logs.
//!
//! Logs are rewritten on every recording mutation, so identical content is
//! not written again: most mutations only touch one group.

use log::{debug, trace};
use stagehand_core::log::Log;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct LogWriter {
    base_dir: PathBuf,
    pid: u32,
    last_written: HashMap<PathBuf, Vec<u8>>,
}

impl LogWriter {
    pub fn new(base_dir: &Path) -> LogWriter {
        Self::with_pid(base_dir, std::process::id())
    }

    /// The process id is part of every log file name, so logs from two runs
    /// over the same recording never overwrite each other.
    pub fn with_pid(base_dir: &Path, pid: u32) -> LogWriter {
        LogWriter {
            base_dir: base_dir.to_owned(),
            pid,
            last_written: HashMap::new(),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Write every log whose content changed. Returns how many files were
    /// written.
    pub fn save_logs(&mut self, logs: &[(PathBuf, Log)]) -> io::Result<usize> {
        let mut written = 0;
        for (relative, log) in logs {
            let path = self.base_dir.join(relative);
            let mut content = serde_json::to_vec_pretty(log)?;
            content.push(b'\n');

            if self.last_written.get(&path) == Some(&content) {
                trace!("Log {} unchanged", path.display());
                continue;
            }
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, &content)?;
            debug!("Wrote log {}", path.display());
            self.last_written.insert(path, content);
            written += 1;
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagehand_core::log::logs_for;
    use stagehand_core::{RecordingBook, Timestamp};
    use tempfile::TempDir;

    #[test]
    fn test_identical_content_is_written_once() {
        let temp = TempDir::new().unwrap();
        let mut writer = LogWriter::with_pid(temp.path(), 42);

        let mut book = RecordingBook::new();
        let file = "/videos/session.mkv";
        book.start_group(file, Timestamp::from_secs(0));
        book.start_recording(file, Timestamp::from_secs(10));
        book.stop_recording(Timestamp::from_secs(20)).unwrap();

        let logs = logs_for(&book, writer.pid());
        assert_eq!(logs.len(), 1);
        assert_eq!(writer.save_logs(&logs).unwrap(), 1);
        assert_eq!(writer.save_logs(&logs).unwrap(), 0);

        let path = temp.path().join(&logs[0].0);
        assert!(path.starts_with(temp.path().join("session")));
        assert!(path.to_string_lossy().ends_with("_p42.json"));
        let saved: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(saved["sets"].as_array().unwrap().len(), 1);

        book.stop_group(Timestamp::from_secs(30)).unwrap();
        let logs = logs_for(&book, writer.pid());
        assert_eq!(writer.save_logs(&logs).unwrap(), 1);
    }
}
