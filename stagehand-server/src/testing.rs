//! In-memory capture device and transcoder for tests.

use async_trait::async_trait;
use stagehand_core::{DualTimestamp, Timestamp};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, Notify};

use crate::config::Settings;
use crate::error::EngineError;
use crate::obs::{CaptureDevice, DeviceEvent};
use crate::transcoder::Transcoder;
use crate::Engine;

pub const FAKE_PNG: &[u8] = b"\x89PNG fake";

struct DeviceState {
    connected: bool,
    timestamps: DualTimestamp,
    recording_file: Option<PathBuf>,
    image: Vec<u8>,
    played: Vec<PathBuf>,
    saved_replays: Vec<PathBuf>,
}

pub struct FakeDevice {
    replay_dir: PathBuf,
    state: Mutex<DeviceState>,
    events: broadcast::Sender<DeviceEvent>,
}

impl FakeDevice {
    pub fn new(replay_dir: &Path) -> FakeDevice {
        let (events, _) = broadcast::channel(16);
        FakeDevice {
            replay_dir: replay_dir.to_owned(),
            state: Mutex::new(DeviceState {
                connected: true,
                timestamps: DualTimestamp::default(),
                recording_file: None,
                image: FAKE_PNG.to_vec(),
                played: Vec::new(),
                saved_replays: Vec::new(),
            }),
            events,
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.state.lock().unwrap().connected = connected;
    }

    pub fn set_timestamps(&self, timestamps: DualTimestamp) {
        self.state.lock().unwrap().timestamps = timestamps;
    }

    pub fn set_recording_file(&self, file: Option<&str>) {
        self.state.lock().unwrap().recording_file = file.map(PathBuf::from);
    }

    pub fn set_image(&self, image: Vec<u8>) {
        self.state.lock().unwrap().image = image;
    }

    pub fn played(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().played.clone()
    }

    pub fn saved_replays(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().saved_replays.clone()
    }

    pub fn emit(&self, event: DeviceEvent) {
        let _ = self.events.send(event);
    }

    fn check_connected(&self) -> Result<(), EngineError> {
        if self.state.lock().unwrap().connected {
            Ok(())
        } else {
            Err(EngineError::DeviceUnavailable)
        }
    }
}

#[async_trait]
impl CaptureDevice for FakeDevice {
    async fn current_dual_timestamps(&self) -> Result<DualTimestamp, EngineError> {
        self.check_connected()?;
        Ok(self.state.lock().unwrap().timestamps)
    }

    async fn current_thumbnail(&self, _height: Option<u32>) -> Result<Vec<u8>, EngineError> {
        self.check_connected()?;
        Ok(self.state.lock().unwrap().image.clone())
    }

    async fn output_dimensions(&self) -> Result<(u32, u32), EngineError> {
        self.check_connected()?;
        Ok((1920, 1080))
    }

    async fn active_recording_file(&self) -> Result<Option<PathBuf>, EngineError> {
        self.check_connected()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .recording_file
            .clone()
            .filter(|_| state.timestamps.recording.is_some()))
    }

    async fn active_recording_folder(&self) -> Result<PathBuf, EngineError> {
        self.check_connected()?;
        Ok(self.replay_dir.clone())
    }

    async fn save_replay_buffer(&self) -> Result<PathBuf, EngineError> {
        self.check_connected()?;
        let path = {
            let state = self.state.lock().unwrap();
            self.replay_dir
                .join(format!("replay-buffer-{}.mkv", state.saved_replays.len()))
        };
        tokio::fs::write(&path, b"replay").await?;
        self.state.lock().unwrap().saved_replays.push(path.clone());
        Ok(path)
    }

    async fn play_media(&self, path: &Path) -> Result<(), EngineError> {
        self.check_connected()?;
        self.state.lock().unwrap().played.push(path.to_owned());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }
}

// -----------------------------------------------------------------------------

/// Writes placeholder files; optionally holds lossy trims until released.
pub struct FakeTranscoder {
    duration_ms: AtomicU64,
    unreadable_probes: AtomicU32,
    probe_calls: AtomicUsize,
    frames: Mutex<Vec<(PathBuf, Timestamp, Option<u32>)>>,
    fail_frames: AtomicBool,
    fail_lossy_trim: AtomicBool,
    render_gate: Mutex<Option<Arc<Notify>>>,
    pub render_started: Notify,
}

impl FakeTranscoder {
    pub fn new() -> FakeTranscoder {
        FakeTranscoder {
            duration_ms: AtomicU64::new(30_000),
            unreadable_probes: AtomicU32::new(0),
            probe_calls: AtomicUsize::new(0),
            frames: Mutex::new(Vec::new()),
            fail_frames: AtomicBool::new(false),
            fail_lossy_trim: AtomicBool::new(false),
            render_gate: Mutex::new(None),
            render_started: Notify::new(),
        }
    }

    pub fn set_duration_ms(&self, duration_ms: u64) {
        self.duration_ms.store(duration_ms, Ordering::SeqCst);
    }

    /// The next `n` probes report an unreadable file.
    pub fn set_unreadable_probes(&self, n: u32) {
        self.unreadable_probes.store(n, Ordering::SeqCst);
    }

    pub fn set_fail_frames(&self, fail: bool) {
        self.fail_frames.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_lossy_trim(&self, fail: bool) {
        self.fail_lossy_trim.store(fail, Ordering::SeqCst);
    }

    /// Lossy trims wait for a `notify_one` on the returned gate.
    pub fn hold_renders(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.render_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn probe_calls(&self) -> usize {
        self.probe_calls.load(Ordering::SeqCst)
    }

    pub fn frame_calls(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    pub fn last_frame(&self) -> Option<(PathBuf, Timestamp, Option<u32>)> {
        self.frames.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn frame_at(
        &self,
        file: &Path,
        at: Timestamp,
        height: Option<u32>,
    ) -> Result<Vec<u8>, EngineError> {
        self.frames.lock().unwrap().push((file.to_owned(), at, height));
        if self.fail_frames.load(Ordering::SeqCst) {
            return Err(EngineError::Transcoder("no frame".to_string()));
        }
        Ok(FAKE_PNG.to_vec())
    }

    async fn probe_duration(&self, _file: &Path) -> Result<Option<u64>, EngineError> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        let unreadable = self
            .unreadable_probes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if unreadable {
            Ok(None)
        } else {
            Ok(Some(self.duration_ms.load(Ordering::SeqCst)))
        }
    }

    async fn lossless_trim(
        &self,
        _file: &Path,
        _start: Timestamp,
        _end: Timestamp,
        out: &Path,
    ) -> Result<(), EngineError> {
        tokio::fs::write(out, b"segment").await?;
        Ok(())
    }

    async fn lossy_trim(
        &self,
        _file: &Path,
        _start: Timestamp,
        _end: Timestamp,
        out: &Path,
    ) -> Result<(), EngineError> {
        self.render_started.notify_one();
        let gate = self.render_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail_lossy_trim.load(Ordering::SeqCst) {
            return Err(EngineError::Transcoder("encoder crashed".to_string()));
        }
        tokio::fs::write(out, b"clip").await?;
        Ok(())
    }

    async fn waveform(&self, _file: &Path, out: &Path, _duration_ms: u64) -> Result<(), EngineError> {
        tokio::fs::write(out, FAKE_PNG).await?;
        Ok(())
    }

    async fn transcode_to_web_format(&self, _file: &Path, out: &Path) -> Result<(), EngineError> {
        tokio::fs::write(out, b"mp4").await?;
        Ok(())
    }
}

// -----------------------------------------------------------------------------

pub struct TestEngine {
    pub temp: tempfile::TempDir,
    pub device: Arc<FakeDevice>,
    pub transcoder: Arc<FakeTranscoder>,
    pub engine: Engine,
}

/// An engine over fakes, with its directories in a fresh temp dir.
pub fn test_engine() -> TestEngine {
    let temp = tempfile::TempDir::new().unwrap();
    let settings = Settings::with_base_dir(temp.path());
    settings.create_dirs().unwrap();
    let device = Arc::new(FakeDevice::new(temp.path()));
    let transcoder = Arc::new(FakeTranscoder::new());
    let engine = Engine::new(settings, device.clone(), transcoder.clone());
    TestEngine {
        temp,
        device,
        transcoder,
        engine,
    }
}
