//! Leniency-windowed capture caches.
//!
//! Extracting a frame from the recording costs a transcoder run, which is
//! noticeable when an operator presses a button on air. A cache answers
//! "is there already a capture close enough to `t`?" so that a nearby capture
//! can be reused instead.
//!
//! Each cache is tied to one clock domain. Entries that carry no timestamp on
//! that clock are silently dropped on insert.
//!
//! The number of entries is bounded by the length of a capture session, so
//! lookups are a linear scan in insertion order.

use crate::capture::{Replay, Screenshot};
use crate::timestamp::{ClockDomain, Timestamp};

/// Where an entry sits on a clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineWindow {
    /// A single instant; matches when `|t - at| < leniency`
    Point(Timestamp),
    /// A closed interval; matches when `start - leniency <= t <= end + leniency`
    Span(Timestamp, Timestamp),
}

impl TimelineWindow {
    pub fn matches(&self, t: Timestamp, leniency_ms: u64) -> bool {
        match *self {
            TimelineWindow::Point(at) => t.delta(at).unsigned_abs() < leniency_ms,
            TimelineWindow::Span(start, end) => {
                start.saturating_sub(leniency_ms) <= t && t <= end.saturating_add(leniency_ms)
            }
        }
    }
}

/// Anything that can be placed on a clock.
pub trait TimelineEntry {
    fn window(&self, domain: ClockDomain) -> Option<TimelineWindow>;
}

impl TimelineEntry for Screenshot {
    fn window(&self, domain: ClockDomain) -> Option<TimelineWindow> {
        self.timestamps.get(domain).map(TimelineWindow::Point)
    }
}

impl TimelineEntry for Replay {
    fn window(&self, domain: ClockDomain) -> Option<TimelineWindow> {
        Some(TimelineWindow::Span(self.start_in(domain)?, self.end_in(domain)?))
    }
}

#[derive(Debug, Clone)]
pub struct LeniencyCache<T> {
    leniency_ms: u64,
    domain: ClockDomain,
    entries: Vec<T>,
}

impl<T: TimelineEntry + Clone> LeniencyCache<T> {
    pub fn new(leniency_ms: u64, domain: ClockDomain) -> Self {
        LeniencyCache {
            leniency_ms,
            domain,
            entries: Vec::new(),
        }
    }

    pub fn domain(&self) -> ClockDomain {
        self.domain
    }

    pub fn leniency_ms(&self) -> u64 {
        self.leniency_ms
    }

    /// First entry whose window contains `t`, or `None`.
    pub fn get(&self, t: Timestamp) -> Option<&T> {
        self.entries.iter().find(|entry| {
            entry
                .window(self.domain)
                .is_some_and(|w| w.matches(t, self.leniency_ms))
        })
    }

    /// Store `entry` if it has a timestamp on this cache's clock.
    /// Returns whether it was stored.
    pub fn add(&mut self, entry: T) -> bool {
        if entry.window(self.domain).is_none() {
            return false;
        }
        self.entries.push(entry);
        true
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One cache per clock, fed from the same captures.
#[derive(Debug, Clone)]
pub struct DualCache<T> {
    recording: LeniencyCache<T>,
    stream: LeniencyCache<T>,
}

impl<T: TimelineEntry + Clone> DualCache<T> {
    pub fn new(leniency_ms: u64) -> Self {
        DualCache {
            recording: LeniencyCache::new(leniency_ms, ClockDomain::Recording),
            stream: LeniencyCache::new(leniency_ms, ClockDomain::Stream),
        }
    }

    pub fn get(&self, domain: ClockDomain, t: Timestamp) -> Option<&T> {
        match domain {
            ClockDomain::Recording => self.recording.get(t),
            ClockDomain::Stream => self.stream.get(t),
        }
    }

    /// Offer `entry` to both clocks; each keeps it only if it has a
    /// timestamp there.
    pub fn add(&mut self, entry: T) {
        self.recording.add(entry.clone());
        self.stream.add(entry);
    }

    pub fn clear(&mut self) {
        self.recording.clear();
        self.stream.clear();
    }

    pub fn len(&self, domain: ClockDomain) -> usize {
        match domain {
            ClockDomain::Recording => self.recording.len(),
            ClockDomain::Stream => self.stream.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{ImageFile, VideoFile};
    use crate::timestamp::DualTimestamp;

    fn screenshot(timestamps: DualTimestamp) -> Screenshot {
        Screenshot {
            image: ImageFile::new("s.png", "/media/s.png", 1080),
            timestamps,
        }
    }

    fn replay(end_ms: u64, duration_ms: u64) -> Replay {
        Replay {
            video: VideoFile::new("r.mp4", "/media/r.mp4", duration_ms),
            waveform: ImageFile::new("w.png", "/media/w.png", 64),
            thumbnail: ImageFile::new("t.png", "/media/t.png", 180),
            timestamps: DualTimestamp::recording(Timestamp::from_millis(end_ms)),
        }
    }

    #[test]
    fn test_screenshot_leniency() {
        let mut cache = LeniencyCache::new(1000, ClockDomain::Recording);
        assert!(cache.add(screenshot(DualTimestamp::recording(Timestamp::from_millis(5000)))));

        assert!(cache.get(Timestamp::from_millis(5900)).is_some());
        assert!(cache.get(Timestamp::from_millis(4001)).is_some());
        assert!(cache.get(Timestamp::from_millis(6000)).is_none());
        assert!(cache.get(Timestamp::from_millis(6001)).is_none());
        assert!(cache.get(Timestamp::from_millis(4000)).is_none());
    }

    #[test]
    fn test_replay_leniency_boundary() {
        let mut cache = LeniencyCache::new(1000, ClockDomain::Recording);
        // Covers 40s..60s
        cache.add(replay(60_000, 20_000));

        assert!(cache.get(Timestamp::from_millis(50_000)).is_some());
        assert!(cache.get(Timestamp::from_millis(61_000)).is_some());
        assert!(cache.get(Timestamp::from_millis(61_001)).is_none());
        assert!(cache.get(Timestamp::from_millis(39_000)).is_some());
        assert!(cache.get(Timestamp::from_millis(38_999)).is_none());
    }

    #[test]
    fn test_entries_without_domain_are_dropped() {
        let mut cache = LeniencyCache::new(1000, ClockDomain::Stream);
        assert!(!cache.add(screenshot(DualTimestamp::recording(Timestamp::from_millis(1)))));
        assert!(!cache.add(screenshot(DualTimestamp::default())));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_first_match_wins() {
        let mut cache = LeniencyCache::new(1000, ClockDomain::Recording);
        let mut first = screenshot(DualTimestamp::recording(Timestamp::from_millis(1000)));
        first.image = ImageFile::new("first.png", "/media/first.png", 1080);
        cache.add(first);
        cache.add(screenshot(DualTimestamp::recording(Timestamp::from_millis(1200))));

        let hit = cache.get(Timestamp::from_millis(1100)).unwrap();
        assert_eq!(hit.image.filename(), "first.png");

        cache.clear();
        assert!(cache.get(Timestamp::from_millis(1100)).is_none());
    }

    #[test]
    fn test_dual_cache_routes_by_domain() {
        let mut cache = DualCache::new(500);
        cache.add(screenshot(DualTimestamp::new(
            Some(Timestamp::from_millis(1000)),
            Some(Timestamp::from_millis(90_000)),
        )));
        cache.add(screenshot(DualTimestamp::recording(Timestamp::from_millis(3000))));

        assert_eq!(cache.len(ClockDomain::Recording), 2);
        assert_eq!(cache.len(ClockDomain::Stream), 1);
        assert!(cache.get(ClockDomain::Stream, Timestamp::from_millis(90_200)).is_some());
        assert!(cache.get(ClockDomain::Stream, Timestamp::from_millis(3000)).is_none());
        assert!(cache.get(ClockDomain::Recording, Timestamp::from_millis(3000)).is_some());
    }
}
