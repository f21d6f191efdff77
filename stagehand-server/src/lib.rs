//! # Stagehand Server
//!
//! Replay, clip and set-recording engine for tournament broadcasts.
//!
//! The server sits next to OBS and a tournament's commentary desk:
//! - Answers "frame at this instant" on the recording or stream clock,
//!   reusing nearby captures
//! - Turns the replay buffer into clips that can be trimmed, rendered and
//!   played back on air
//! - Marks sets and groups of sets in the recording, splits groups when the
//!   game changes and keeps an archival log per group
//! - Mirrors the scoreboard into files for overlay tools
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    stagehand-server                      │
//! │  ┌─────────────┐  ┌─────────────┐  ┌──────────────────┐  │
//! │  │ REST API    │  │ WebSocket   │  │ /media (static)  │  │
//! │  │ (axum)      │  │ (push)      │  │ (tower-http)     │  │
//! │  └──────┬──────┘  └──────▲──────┘  └──────────────────┘  │
//! │         ▼                │                               │
//! │  ┌──────────────────────────────────────────────────────┐│
//! │  │                     Engine                           ││
//! │  │  ClipManager  RecordingEngine  ScoreboardStore       ││
//! │  │        └────────┬───────┘                            ││
//! │  │           MediaService (leniency caches)             ││
//! │  └──────────┬──────────────────────────┬────────────────┘│
//! │             ▼                          ▼                 │
//! │  ┌─────────────────────┐   ┌──────────────────────────┐  │
//! │  │ CaptureDevice       │   │ Transcoder               │  │
//! │  │ (OBS WebSocket v5)  │   │ (ffmpeg / ffprobe)       │  │
//! │  └─────────────────────┘   └──────────────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## REST API
//!
//! | Endpoint | Description |
//! |----------|-------------|
//! | `GET /api/v1/media/screenshot` | Current or past screenshot |
//! | `POST /api/v1/media/replay` | Save the replay buffer |
//! | `GET /api/v1/clips` | List clips |
//! | `POST /api/v1/clips/screenshot` | Screenshot clip |
//! | `POST /api/v1/clips/video` | Replay clip |
//! | `PUT /api/v1/clips/{id}` | Trim an uncut clip |
//! | `POST /api/v1/clips/{id}/cut` | Render the trim |
//! | `POST /api/v1/clips/{id}/output` | Play on the media input |
//! | `GET /api/v1/recordings` | Sets, groups and grouping |
//! | `POST /api/v1/recordings/start` | Start (or restart) a set |
//! | `POST /api/v1/groups/start` | Start (or restart) a group |
//! | `GET /api/v1/scoreboard` | Scoreboard |
//! | `WS /api/v1/ws` | Push channel |
//!
//! ## Example: Starting the Server
//!
//! ```rust,no_run
//! use clap::Parser;
//! use stagehand_server::{config::Settings, obs::ObsClient, transcoder::Ffmpeg, web::Web};
//! use stagehand_server::{Cli, Engine};
//! use std::{sync::Arc, time::Duration};
//! use tokio_graceful_shutdown::{SubsystemBuilder, Toplevel};
//!
//! #[tokio::main]
//! async fn main() {
//!     let args = Cli::parse_from(["stagehand-server", "-p", "8080"]);
//!     let settings = Settings::from_cli(&args).unwrap();
//!     let obs = ObsClient::new(&settings);
//!     let ffmpeg = Arc::new(Ffmpeg::new(&settings.ffmpeg, &settings.ffprobe));
//!     let engine = Engine::new(settings, Arc::new(obs.clone()), ffmpeg);
//!
//!     Toplevel::new(|s| async move {
//!         s.start(SubsystemBuilder::new("OBS", |a| obs.run(a)));
//!         s.start(SubsystemBuilder::new("Webserver", |a| Web::new(engine).run(a)));
//!     })
//!     .catch_signals()
//!     .handle_shutdown_requests(Duration::from_secs(5))
//!     .await
//!     .unwrap();
//! }
//! ```
//!
//! ## Command-Line Interface
//!
//! See [`Cli`] for all options. Key options:
//!
//! - `-p, --port` - HTTP server port (default: 9090)
//! - `-v` - Increase verbosity (use multiple times)
//! - `--obs-address`, `--obs-password` - OBS WebSocket server
//! - `--data-dir` - Where media, logs and outputs go

use clap::Parser;
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio_graceful_shutdown::SubsystemHandle;

pub mod clips;
pub mod config;
pub mod error;
pub mod file_output;
pub mod logs;
pub mod media;
pub mod obs;
pub mod push;
pub mod recordings;
pub mod scoreboard;
pub mod transcoder;
pub mod web;

#[cfg(test)]
pub(crate) mod testing;

use clips::ClipManager;
use config::Settings;
use error::EngineError;
use file_output::FileOutputs;
use media::MediaService;
use obs::{CaptureDevice, DeviceEvent};
use push::Push;
use recordings::RecordingEngine;
use scoreboard::ScoreboardStore;
use transcoder::Transcoder;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Clone, Debug)]
#[command(version, about)]
pub struct Cli {
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,

    /// Port for webserver
    #[arg(short, long, default_value_t = 9090)]
    pub port: u16,

    /// OBS WebSocket server, host:port
    #[arg(long, default_value = "127.0.0.1:4455")]
    pub obs_address: String,

    /// OBS WebSocket password; leave empty when authentication is off
    #[arg(long)]
    pub obs_password: Option<String>,

    /// OBS media source that clips are sent to
    #[arg(long, default_value = "Replay")]
    pub media_input: String,

    /// Base directory for media, logs and outputs
    #[arg(short, long)]
    pub data_dir: Option<PathBuf>,

    /// Directory for screenshots, replays and clips (default: <data-dir>/media)
    #[arg(long)]
    pub media_dir: Option<PathBuf>,

    /// Directory for archival logs (default: <data-dir>/logs)
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Directory for overlay files (default: <data-dir>/output)
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    #[arg(long, default_value = "ffmpeg")]
    pub ffmpeg: PathBuf,

    #[arg(long, default_value = "ffprobe")]
    pub ffprobe: PathBuf,

    /// How close a cached screenshot must be to be reused, in ms
    #[arg(long, default_value_t = 1000)]
    pub screenshot_leniency_ms: u64,

    /// Slack around a cached replay's span, in ms
    #[arg(long, default_value_t = 0)]
    pub replay_leniency_ms: u64,

    /// Height of thumbnails in pixels
    #[arg(long, default_value_t = 180)]
    pub thumbnail_height: u32,

    /// Delay between checks for a saved replay file, in ms
    #[arg(long, default_value_t = 500)]
    pub replay_poll_interval_ms: u64,

    /// Checks for a saved replay file before giving up
    #[arg(long, default_value_t = 20)]
    pub replay_poll_attempts: u32,

    /// Delay between OBS connection attempts, in ms
    #[arg(long, default_value_t = stagehand_core::connection::DEFAULT_RETRY_INTERVAL_MS)]
    pub reconnect_interval_ms: u64,

    /// Do not open groups automatically when the game changes
    #[arg(long, default_value_t = false)]
    pub no_auto_split: bool,
}

/// Everything a request handler or background task needs.
#[derive(Clone)]
pub struct Engine {
    pub settings: Arc<Settings>,
    pub device: Arc<dyn CaptureDevice>,
    pub media: MediaService,
    pub clips: ClipManager,
    pub recordings: RecordingEngine,
    pub scoreboard: ScoreboardStore,
    pub outputs: FileOutputs,
    pub push: Push,
}

impl Engine {
    pub fn new(
        settings: Settings,
        device: Arc<dyn CaptureDevice>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Engine {
        let settings = Arc::new(settings);
        let push = Push::new();
        let outputs = FileOutputs::new(&settings.output_dir);
        let media = MediaService::new(settings.clone(), device.clone(), transcoder);
        let scoreboard = ScoreboardStore::new(outputs.clone(), push.clone());
        let clips = ClipManager::new(media.clone(), device.clone(), push.clone());
        let recordings = RecordingEngine::new(
            settings.clone(),
            device.clone(),
            media.clone(),
            scoreboard.clone(),
            push.clone(),
        );

        Engine {
            settings,
            device,
            media,
            clips,
            recordings,
            scoreboard,
            outputs,
            push,
        }
    }

    pub async fn handle_device_event(&self, event: DeviceEvent) {
        match event {
            DeviceEvent::Connected => match self.device.active_recording_file().await {
                Ok(Some(file)) => {
                    self.media.observe_recording_file(&file);
                }
                Ok(None) => debug!("Device connected, not recording"),
                Err(e) => warn!("Cannot query the active recording: {}", e),
            },
            DeviceEvent::RecordingStarted { file } => {
                self.media.observe_recording_file(&file);
            }
            DeviceEvent::RecordingStopped | DeviceEvent::ConnectionClosed => {
                self.recordings.capture_stopped();
            }
        }
    }

    pub async fn run_device_events(self, subsys: SubsystemHandle) -> Result<(), EngineError> {
        let mut events = self.device.subscribe();
        loop {
            tokio::select! {
                _ = subsys.on_shutdown_requested() => {
                    debug!("Device event loop shutdown");
                    return Ok(());
                }
                event = events.recv() => match event {
                    Ok(event) => self.handle_device_event(event).await,
                    Err(RecvError::Lagged(n)) => {
                        // Only the latest file matters
                        warn!("Missed {} device events", n);
                    }
                    Err(RecvError::Closed) => {
                        info!("Device event channel closed");
                        return Ok(());
                    }
                },
            }
        }
    }
}
