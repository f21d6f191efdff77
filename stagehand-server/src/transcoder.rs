//! Transcoder boundary and its ffmpeg/ffprobe implementation.

use async_trait::async_trait;
use log::{debug, trace};
use stagehand_core::Timestamp;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use crate::error::EngineError;

pub const WAVEFORM_HEIGHT: u32 = 64;
const WAVEFORM_PX_PER_SECOND: u64 = 20;
const WAVEFORM_MIN_WIDTH: u64 = 200;
const WAVEFORM_MAX_WIDTH: u64 = 4000;

#[async_trait]
pub trait Transcoder: Send + Sync {
    /// PNG of the frame at `at`, scaled to `height` (keeping aspect) if given.
    async fn frame_at(
        &self,
        file: &Path,
        at: Timestamp,
        height: Option<u32>,
    ) -> Result<Vec<u8>, EngineError>;

    /// Duration in milliseconds, or `None` if the file cannot be read (yet).
    async fn probe_duration(&self, file: &Path) -> Result<Option<u64>, EngineError>;

    /// Copy `[start, end]` of `file` into `out` without re-encoding. Cuts land
    /// on keyframes.
    async fn lossless_trim(
        &self,
        file: &Path,
        start: Timestamp,
        end: Timestamp,
        out: &Path,
    ) -> Result<(), EngineError>;

    /// Re-encode `[start, end]` of `file` into `out`; frame accurate.
    async fn lossy_trim(
        &self,
        file: &Path,
        start: Timestamp,
        end: Timestamp,
        out: &Path,
    ) -> Result<(), EngineError>;

    /// Render the audio track as a PNG waveform into `out`.
    async fn waveform(&self, file: &Path, out: &Path, duration_ms: u64) -> Result<(), EngineError>;

    /// Remux `file` into a browser playable mp4 at `out`.
    async fn transcode_to_web_format(&self, file: &Path, out: &Path) -> Result<(), EngineError>;
}

/// Width of a waveform image for a clip of the given length.
pub fn waveform_width(duration_ms: u64) -> u64 {
    (duration_ms * WAVEFORM_PX_PER_SECOND / 1000).clamp(WAVEFORM_MIN_WIDTH, WAVEFORM_MAX_WIDTH)
}

fn parse_probe_output(stdout: &[u8]) -> Option<u64> {
    let seconds: f64 = String::from_utf8_lossy(stdout).trim().parse().ok()?;
    if !seconds.is_finite() || seconds <= 0.0 {
        return None;
    }
    Some((seconds * 1000.0).round() as u64)
}

#[derive(Debug, Clone)]
pub struct Ffmpeg {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Ffmpeg {
    pub fn new(ffmpeg: &Path, ffprobe: &Path) -> Ffmpeg {
        Ffmpeg {
            ffmpeg: ffmpeg.to_owned(),
            ffprobe: ffprobe.to_owned(),
        }
    }

    /// Run ffmpeg and return its stdout.
    async fn ffmpeg(&self, args: Vec<OsString>) -> Result<Vec<u8>, EngineError> {
        trace!("{} {:?}", self.ffmpeg.display(), args);
        let output = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-nostdin"])
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| EngineError::Transcoder(format!("Failed to spawn ffmpeg: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::Transcoder(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(output.stdout)
    }

    async fn trim(
        &self,
        file: &Path,
        start: Timestamp,
        end: Timestamp,
        out: &Path,
        codec_args: &[&str],
    ) -> Result<(), EngineError> {
        if end <= start {
            return Err(EngineError::Transcoder(format!(
                "empty trim interval {}..{}",
                start, end
            )));
        }
        let mut args: Vec<OsString> = vec![
            "-ss".into(),
            start.to_ffmpeg_arg().into(),
            "-i".into(),
            file.into(),
            "-t".into(),
            Timestamp::from_millis(end.as_millis() - start.as_millis())
                .to_ffmpeg_arg()
                .into(),
        ];
        args.extend(codec_args.iter().map(OsString::from));
        args.extend(["-movflags", "+faststart", "-y"].map(OsString::from));
        args.push(out.into());
        self.ffmpeg(args).await?;
        debug!("Trimmed {} {}..{} into {}", file.display(), start, end, out.display());
        Ok(())
    }
}

#[async_trait]
impl Transcoder for Ffmpeg {
    async fn frame_at(
        &self,
        file: &Path,
        at: Timestamp,
        height: Option<u32>,
    ) -> Result<Vec<u8>, EngineError> {
        let mut args: Vec<OsString> = vec![
            "-ss".into(),
            at.to_ffmpeg_arg().into(),
            "-i".into(),
            file.into(),
            "-an".into(),
            "-sn".into(),
            "-frames:v".into(),
            "1".into(),
        ];
        if let Some(height) = height {
            args.push("-vf".into());
            args.push(format!("scale=-2:{}", height).into());
        }
        args.extend(["-f", "image2pipe", "-vcodec", "png", "-"].map(OsString::from));

        let png = self.ffmpeg(args).await?;
        if png.is_empty() {
            return Err(EngineError::Transcoder(format!(
                "no frame at {} in {}",
                at,
                file.display()
            )));
        }
        Ok(png)
    }

    async fn probe_duration(&self, file: &Path) -> Result<Option<u64>, EngineError> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "error", "-show_entries", "format=duration"])
            .args(["-of", "default=noprint_wrappers=1:nokey=1"])
            .arg(file)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| EngineError::Transcoder(format!("Failed to spawn ffprobe: {}", e)))?;

        if !output.status.success() {
            trace!(
                "ffprobe cannot read {}: {}",
                file.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Ok(None);
        }
        Ok(parse_probe_output(&output.stdout))
    }

    async fn lossless_trim(
        &self,
        file: &Path,
        start: Timestamp,
        end: Timestamp,
        out: &Path,
    ) -> Result<(), EngineError> {
        self.trim(file, start, end, out, &["-c", "copy", "-avoid_negative_ts", "make_zero"])
            .await
    }

    async fn lossy_trim(
        &self,
        file: &Path,
        start: Timestamp,
        end: Timestamp,
        out: &Path,
    ) -> Result<(), EngineError> {
        self.trim(
            file,
            start,
            end,
            out,
            &["-c:v", "libx264", "-preset", "veryfast", "-crf", "20", "-c:a", "aac"],
        )
        .await
    }

    async fn waveform(&self, file: &Path, out: &Path, duration_ms: u64) -> Result<(), EngineError> {
        let filter = format!(
            "showwavespic=s={}x{}:split_channels=0:colors=white",
            waveform_width(duration_ms),
            WAVEFORM_HEIGHT
        );
        let args: Vec<OsString> = vec![
            "-i".into(),
            file.into(),
            "-filter_complex".into(),
            filter.into(),
            "-frames:v".into(),
            "1".into(),
            "-y".into(),
            out.into(),
        ];
        self.ffmpeg(args).await?;
        Ok(())
    }

    async fn transcode_to_web_format(&self, file: &Path, out: &Path) -> Result<(), EngineError> {
        let args: Vec<OsString> = vec![
            "-i".into(),
            file.into(),
            "-c".into(),
            "copy".into(),
            "-movflags".into(),
            "+faststart".into(),
            "-y".into(),
            out.into(),
        ];
        self.ffmpeg(args).await?;
        Ok(())
    }
}
