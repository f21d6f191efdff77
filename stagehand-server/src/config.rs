//! Resolved runtime configuration.
//!
//! [`Cli`](crate::Cli) holds what the operator typed; [`Settings`] is the
//! validated form with every directory resolved and created.

use directories::ProjectDirs;
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::Cli;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot create directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid setting: {0}")]
    Invalid(String),
}

pub fn get_project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("gg", "stagehand", "stagehand")
}

fn default_data_dir() -> PathBuf {
    match get_project_dirs() {
        Some(dirs) => dirs.data_dir().to_owned(),
        None => PathBuf::from("stagehand-data"),
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub obs_url: String,
    pub obs_password: Option<String>,
    /// Name of the OBS media source that "send to output" plays into
    pub media_input: String,
    pub media_dir: PathBuf,
    pub log_dir: PathBuf,
    pub output_dir: PathBuf,
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub screenshot_leniency_ms: u64,
    pub replay_leniency_ms: u64,
    pub thumbnail_height: u32,
    pub replay_poll_interval: Duration,
    pub replay_poll_attempts: u32,
    pub reconnect_interval: Duration,
    pub request_timeout: Duration,
    pub file_watch_interval: Duration,
    pub auto_split: bool,
}

impl Settings {
    pub fn from_cli(args: &Cli) -> Result<Settings, ConfigError> {
        let data_dir = args.data_dir.clone().unwrap_or_else(default_data_dir);

        let settings = Settings {
            port: args.port,
            obs_url: format!("ws://{}", args.obs_address),
            obs_password: args.obs_password.clone().filter(|p| !p.is_empty()),
            media_input: args.media_input.clone(),
            media_dir: args.media_dir.clone().unwrap_or_else(|| data_dir.join("media")),
            log_dir: args.log_dir.clone().unwrap_or_else(|| data_dir.join("logs")),
            output_dir: args.output_dir.clone().unwrap_or_else(|| data_dir.join("output")),
            ffmpeg: args.ffmpeg.clone(),
            ffprobe: args.ffprobe.clone(),
            screenshot_leniency_ms: args.screenshot_leniency_ms,
            replay_leniency_ms: args.replay_leniency_ms,
            thumbnail_height: args.thumbnail_height,
            replay_poll_interval: Duration::from_millis(args.replay_poll_interval_ms),
            replay_poll_attempts: args.replay_poll_attempts,
            reconnect_interval: Duration::from_millis(args.reconnect_interval_ms),
            request_timeout: Duration::from_secs(10),
            file_watch_interval: Duration::from_millis(500),
            auto_split: !args.no_auto_split,
        };
        settings.validate()?;
        settings.create_dirs()?;
        Ok(settings)
    }

    /// Defaults rooted at `base_dir`, for tests and embedding.
    pub fn with_base_dir(base_dir: &Path) -> Settings {
        Settings {
            port: 0,
            obs_url: "ws://127.0.0.1:4455".to_string(),
            obs_password: None,
            media_input: "Replay".to_string(),
            media_dir: base_dir.join("media"),
            log_dir: base_dir.join("logs"),
            output_dir: base_dir.join("output"),
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            screenshot_leniency_ms: 1000,
            replay_leniency_ms: 0,
            thumbnail_height: 180,
            replay_poll_interval: Duration::from_millis(1),
            replay_poll_attempts: 3,
            reconnect_interval: Duration::from_millis(100),
            request_timeout: Duration::from_secs(1),
            file_watch_interval: Duration::from_millis(10),
            auto_split: true,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.thumbnail_height == 0 {
            return Err(ConfigError::Invalid("thumbnail height must be positive".into()));
        }
        if self.replay_poll_attempts == 0 {
            return Err(ConfigError::Invalid("replay poll attempts must be positive".into()));
        }
        if self.reconnect_interval.is_zero() {
            return Err(ConfigError::Invalid("reconnect interval must be positive".into()));
        }
        Ok(())
    }

    pub fn create_dirs(&self) -> Result<(), ConfigError> {
        for dir in [&self.media_dir, &self.log_dir, &self.output_dir] {
            fs::create_dir_all(dir).map_err(|source| ConfigError::CreateDir {
                path: dir.clone(),
                source,
            })?;
            debug!("Using directory {}", dir.display());
        }
        Ok(())
    }
}
