//! Files in the output directory that overlay and graphics tools read.
//!
//! Those tools sometimes write back into the same JSON files. Each JSON
//! output remembers the value the engine last wrote; when the file on disk
//! no longer matches it, the next write is a three-way merge so that the
//! external edits survive. Text outputs are simply overwritten.
//!
//! The watcher polls modification times and picks up external edits as they
//! happen; writes check the file themselves as well.

use log::{debug, info, warn};
use serde_json::Value;
use stagehand_core::merge::merge_json;
use std::collections::HashMap;
use std::fs;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::time::sleep;
use tokio_graceful_shutdown::SubsystemHandle;

use crate::error::EngineError;

#[derive(Debug, Default)]
struct FileOutput {
    /// The value the engine last wrote (JSON outputs only)
    base: Option<Value>,
    /// What is believed to be on disk
    disk: Option<Value>,
    last_mtime: Option<SystemTime>,
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn read_json(path: &Path) -> Option<Value> {
    let file = fs::File::open(path).ok()?;
    match serde_json::from_reader(BufReader::new(file)) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Ignoring unparsable output file {}: {}", path.display(), e);
            None
        }
    }
}

impl FileOutput {
    /// Re-read the file if it changed since we last saw it. Returns whether
    /// it had been edited by someone else.
    fn refresh(&mut self, path: &Path) -> bool {
        let mtime = modified(path);
        if mtime == self.last_mtime {
            return false;
        }
        self.last_mtime = mtime;
        if self.base.is_none() {
            return false;
        }
        self.disk = read_json(path);
        true
    }

    fn merged(&self, next: &Value) -> Value {
        match (&self.base, &self.disk) {
            (Some(base), Some(disk)) if disk != base => merge_json(base, disk, next),
            _ => next.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct FileOutputs {
    dir: PathBuf,
    outputs: Arc<Mutex<HashMap<PathBuf, FileOutput>>>,
}

impl FileOutputs {
    pub fn new(dir: &Path) -> FileOutputs {
        FileOutputs {
            dir: dir.to_owned(),
            outputs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Write `next` as pretty JSON, keeping external edits. Returns the value
    /// actually written.
    pub fn write_json(&self, name: &str, next: &Value) -> io::Result<Value> {
        let path = self.path_of(name);
        let mut outputs = self.outputs.lock().unwrap();
        let output = outputs.entry(path.clone()).or_default();

        if output.refresh(&path) {
            debug!("{} changed on disk, merging", path.display());
        }
        let merged = output.merged(next);

        {
            let file = fs::File::create(&path)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, &merged)?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }

        output.base = Some(next.clone());
        output.disk = Some(merged.clone());
        output.last_mtime = modified(&path);
        Ok(merged)
    }

    pub fn write_text(&self, name: &str, text: &str) -> io::Result<()> {
        let path = self.path_of(name);
        fs::write(&path, text)?;
        let mut outputs = self.outputs.lock().unwrap();
        outputs.entry(path.clone()).or_default().last_mtime = modified(&path);
        Ok(())
    }

    /// Check every output once. Returns the paths edited externally.
    pub fn poll(&self) -> Vec<PathBuf> {
        let mut outputs = self.outputs.lock().unwrap();
        outputs
            .iter_mut()
            .filter_map(|(path, output)| output.refresh(path).then(|| path.clone()))
            .collect()
    }

    pub async fn run(self, subsys: SubsystemHandle, interval: Duration) -> Result<(), EngineError> {
        debug!("Watching outputs in {}", self.dir.display());
        loop {
            tokio::select! {
                _ = subsys.on_shutdown_requested() => {
                    debug!("Output watcher shutdown");
                    return Ok(());
                }
                _ = sleep(interval) => {
                    for path in self.poll() {
                        info!("{} was edited externally; edits will be kept", path.display());
                    }
                }
            }
        }
    }
}
