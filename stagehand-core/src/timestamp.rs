//! Points in time on the two broadcast clocks.
//!
//! OBS reports two independent timecodes: the elapsed time within the file
//! that is currently being recorded, and the elapsed time of the outgoing
//! stream. Both are exchanged as zero-padded `HH:MM:SS.mmm` strings and are
//! kept here as whole milliseconds.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::TimestampError;

const MS_PER_SECOND: u64 = 1000;
const MS_PER_MINUTE: u64 = 60 * MS_PER_SECOND;
const MS_PER_HOUR: u64 = 60 * MS_PER_MINUTE;

/// Which clock a timestamp was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockDomain {
    /// Elapsed time within the active recording file
    Recording,
    /// Elapsed time of the broadcast output
    Stream,
}

impl fmt::Display for ClockDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClockDomain::Recording => write!(f, "recording"),
            ClockDomain::Stream => write!(f, "stream"),
        }
    }
}

impl FromStr for ClockDomain {
    type Err = TimestampError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "recording" => Ok(ClockDomain::Recording),
            "stream" => Ok(ClockDomain::Stream),
            _ => Err(TimestampError::InvalidFormat(s.to_string())),
        }
    }
}

/// A millisecond offset on one of the broadcast clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub const fn from_millis(ms: u64) -> Self {
        Timestamp(ms)
    }

    pub const fn from_secs(secs: u64) -> Self {
        Timestamp(secs * MS_PER_SECOND)
    }

    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    pub fn checked_add(self, ms: u64) -> Option<Timestamp> {
        self.0.checked_add(ms).map(Timestamp)
    }

    pub fn saturating_add(self, ms: u64) -> Timestamp {
        Timestamp(self.0.saturating_add(ms))
    }

    /// Subtract, clamping at zero.
    pub fn saturating_sub(self, ms: u64) -> Timestamp {
        Timestamp(self.0.saturating_sub(ms))
    }

    /// Signed distance `self - other` in milliseconds.
    pub fn delta(self, other: Timestamp) -> i64 {
        self.0 as i64 - other.0 as i64
    }

    /// Round down to a multiple of `step_ms`.
    pub fn quantize(self, step_ms: u64) -> Timestamp {
        if step_ms == 0 {
            return self;
        }
        Timestamp(self.0 - self.0 % step_ms)
    }

    /// Round to the closest multiple of `step_ms` (ties go up), e.g. the
    /// nearest keyframe for a fixed GOP length.
    pub fn nearest_boundary(self, step_ms: u64) -> Timestamp {
        if step_ms == 0 {
            return self;
        }
        let down = self.quantize(step_ms);
        if self.0 - down.0 >= step_ms - (step_ms / 2) {
            down.saturating_add(step_ms)
        } else {
            down
        }
    }

    /// Render as the string form used by ffmpeg's `-ss`/`-to` arguments.
    pub fn to_ffmpeg_arg(&self) -> String {
        format!("{}.{:03}", self.0 / MS_PER_SECOND, self.0 % MS_PER_SECOND)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ms = self.0;
        write!(
            f,
            "{:02}:{:02}:{:02}.{:03}",
            ms / MS_PER_HOUR,
            (ms % MS_PER_HOUR) / MS_PER_MINUTE,
            (ms % MS_PER_MINUTE) / MS_PER_SECOND,
            ms % MS_PER_SECOND
        )
    }
}

impl FromStr for Timestamp {
    type Err = TimestampError;

    /// Accepts `H:MM:SS`, optionally followed by `.` and one to three
    /// fractional digits.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TimestampError::InvalidFormat(s.to_string());

        let trimmed = s.trim();
        let (clock, fraction) = match trimmed.split_once('.') {
            Some((clock, fraction)) => (clock, Some(fraction)),
            None => (trimmed, None),
        };

        let mut parts = clock.split(':');
        let (hours, minutes, seconds) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(h), Some(m), Some(s), None) => (h, m, s),
            _ => return Err(invalid()),
        };

        let field = |v: &str, max_len: usize| -> Result<u64, TimestampError> {
            if v.is_empty() || v.len() > max_len || !v.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            v.parse::<u64>().map_err(|_| invalid())
        };

        let hours = field(hours, 6)?;
        let minutes = field(minutes, 2)?;
        let seconds = field(seconds, 2)?;
        if minutes >= 60 || seconds >= 60 {
            return Err(TimestampError::OutOfRange(s.to_string()));
        }

        let millis = match fraction {
            Some(f) => {
                let value = field(f, 3)?;
                // ".5" is 500ms, ".05" is 50ms
                value * 10u64.pow(3 - f.len() as u32)
            }
            None => 0,
        };

        Ok(Timestamp(
            hours * MS_PER_HOUR + minutes * MS_PER_MINUTE + seconds * MS_PER_SECOND + millis,
        ))
    }
}

impl Serialize for Timestamp {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A capture instant as seen by both clocks. Either side may be missing,
/// e.g. when nothing is being recorded or streamed, or when the capture
/// device is disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DualTimestamp {
    #[serde(
        rename = "recordingTimestamp",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub recording: Option<Timestamp>,
    #[serde(
        rename = "streamTimestamp",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub stream: Option<Timestamp>,
}

impl DualTimestamp {
    pub fn new(recording: Option<Timestamp>, stream: Option<Timestamp>) -> Self {
        DualTimestamp { recording, stream }
    }

    pub fn recording(ts: Timestamp) -> Self {
        DualTimestamp {
            recording: Some(ts),
            stream: None,
        }
    }

    pub fn stream(ts: Timestamp) -> Self {
        DualTimestamp {
            recording: None,
            stream: Some(ts),
        }
    }

    pub fn get(&self, domain: ClockDomain) -> Option<Timestamp> {
        match domain {
            ClockDomain::Recording => self.recording,
            ClockDomain::Stream => self.stream,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.recording.is_none() && self.stream.is_none()
    }

    /// Move both clocks back by `ms`, clamping at zero.
    pub fn rewind(&self, ms: u64) -> DualTimestamp {
        DualTimestamp {
            recording: self.recording.map(|t| t.saturating_sub(ms)),
            stream: self.stream.map(|t| t.saturating_sub(ms)),
        }
    }

    /// Move both clocks forward by `ms`.
    pub fn advance(&self, ms: u64) -> DualTimestamp {
        DualTimestamp {
            recording: self.recording.map(|t| t.saturating_add(ms)),
            stream: self.stream.map(|t| t.saturating_add(ms)),
        }
    }

    /// `recording - stream` in milliseconds, when both clocks are known.
    pub fn offset(&self) -> Option<i64> {
        match (self.recording, self.stream) {
            (Some(r), Some(s)) => Some(r.delta(s)),
            _ => None,
        }
    }
}
