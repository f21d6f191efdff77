//! # Stagehand Core
//!
//! Platform-independent timeline, clip and recording logic for tournament
//! broadcast production.
//!
//! This crate contains the pure state machines and value types with **zero I/O
//! dependencies**. Everything that talks to the capture device, spawns the
//! transcoder or touches the filesystem lives in `stagehand-server`.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  stagehand-core (no tokio, no filesystem, no processes)     │
//! │  ├── timestamp/   (HH:MM:SS.mmm <-> milliseconds)           │
//! │  ├── cache/       (leniency-windowed capture caches)        │
//! │  ├── clip/        (clip arena + render state machine)       │
//! │  ├── recording/   (recordings, groups, auto-split, view)    │
//! │  ├── log/         (per-group archival log synthesis)        │
//! │  ├── merge/       (three-way JSON merge for file outputs)   │
//! │  └── connection/  (capture-device connection state)         │
//! └─────────────────────────────────────────────────────────────┘
//!                           ▲
//!              ┌────────────┴────────────┐
//!              │  stagehand-server       │
//!              │  (OBS, ffmpeg, axum)    │
//!              └─────────────────────────┘
//! ```
//!
//! ## Example: Leniency lookup
//!
//! ```rust
//! use stagehand_core::{ClockDomain, DualTimestamp, LeniencyCache, Screenshot, Timestamp};
//! use stagehand_core::media::ImageFile;
//!
//! let mut cache = LeniencyCache::new(1000, ClockDomain::Recording);
//! cache.add(Screenshot {
//!     image: ImageFile::new("shot.png", "/media/shot.png", 1080),
//!     timestamps: DualTimestamp::recording(Timestamp::from_millis(5000)),
//! });
//!
//! assert!(cache.get(Timestamp::from_millis(5900)).is_some());
//! assert!(cache.get(Timestamp::from_millis(6001)).is_none());
//! ```
//!
//! ## Example: Clip lifecycle
//!
//! ```rust
//! use stagehand_core::clip::{ClipBook, ClipStatus, ClipUpdate};
//! use stagehand_core::media::{ImageFile, VideoFile};
//! use stagehand_core::DualTimestamp;
//!
//! let mut book = ClipBook::new();
//! let id = book.add_video(
//!     VideoFile::new("replay.mp4", "/media/replay.mp4", 30_000),
//!     ImageFile::new("wave.png", "/media/wave.png", 64),
//!     ImageFile::new("thumb.png", "/media/thumb.png", 180),
//!     DualTimestamp::default(),
//!     10,
//! );
//! assert_eq!(book.get(id).unwrap().status, ClipStatus::Uncut);
//!
//! let changed = book
//!     .update(id, &ClipUpdate { start_ms: 25_000, end_ms: 30_000, description: None })
//!     .unwrap();
//! assert!(changed);
//! ```

pub mod cache;
pub mod capture;
pub mod clip;
pub mod connection;
pub mod error;
pub mod log;
pub mod media;
pub mod merge;
pub mod recording;
pub mod scoreboard;
pub mod timestamp;

// Re-export commonly used types
pub use cache::{LeniencyCache, TimelineEntry};
pub use capture::{Replay, Screenshot};
pub use clip::{Clip, ClipBook, ClipStatus, ClipView};
pub use connection::{ConnectionManager, ConnectionState};
pub use error::{ClipError, RecordingError, TimestampError};
pub use recording::{Recording, RecordingBook, RecordingGroup};
pub use scoreboard::Scoreboard;
pub use timestamp::{ClockDomain, DualTimestamp, Timestamp};
