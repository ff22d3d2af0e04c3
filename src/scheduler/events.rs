//! Behavior event types
//!
//! Raw user events are a tagged union (`BehaviorEvent`) rather than untyped
//! payload maps: each variant carries its own strongly-typed fields and the
//! tracker dispatches on the tag. Events are immutable once recorded.

use serde::{Deserialize, Serialize};

use super::error::SchedulerError;

/// Nanoseconds since the Unix epoch, the timestamp representation used
/// throughout the scheduler.
pub fn now_nanos() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

/// Scroll direction through the feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "forward")]
    Forward,
    #[serde(rename = "backward")]
    Backward,
}

/// User interaction kinds - closed set, unknown kinds map to `Other`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    Like,
    Comment,
    Share,
    Save,
    Other,
}

/// A single scroll from one reel to another
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrollEvent {
    pub timestamp_ns: u64,
    pub from_reel: u64,
    pub to_reel: u64,
    pub direction: Direction,
    /// Reels traversed per second, always >= 0
    pub scroll_speed: f64,
    pub duration_secs: f64,
}

impl ScrollEvent {
    /// Build a scroll event, deriving speed = |to - from| / elapsed seconds.
    ///
    /// Rejects non-positive or non-finite durations; a zero-duration scroll
    /// has no meaningful speed and would poison the session metrics.
    pub fn new(
        from_reel: u64,
        to_reel: u64,
        direction: Direction,
        duration_secs: f64,
    ) -> Result<Self, SchedulerError> {
        if !duration_secs.is_finite() || duration_secs <= 0.0 {
            return Err(SchedulerError::invalid_event(format!(
                "scroll duration must be positive and finite, got {}",
                duration_secs
            )));
        }

        let delta = from_reel.abs_diff(to_reel) as f64;
        Ok(Self {
            timestamp_ns: now_nanos(),
            from_reel,
            to_reel,
            direction,
            scroll_speed: delta / duration_secs,
            duration_secs,
        })
    }
}

/// A single reel viewing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchEvent {
    pub timestamp_ns: u64,
    pub reel_id: u64,
    pub watch_secs: f64,
    pub completed: bool,
    /// Normalized playback position in [0, 1]
    pub position: f64,
}

impl WatchEvent {
    pub fn new(
        reel_id: u64,
        watch_secs: f64,
        completed: bool,
        position: f64,
    ) -> Result<Self, SchedulerError> {
        if !watch_secs.is_finite() || watch_secs < 0.0 {
            return Err(SchedulerError::invalid_event(format!(
                "watch time must be non-negative and finite, got {}",
                watch_secs
            )));
        }
        if !position.is_finite() || !(0.0..=1.0).contains(&position) {
            return Err(SchedulerError::invalid_event(format!(
                "playback position must be in [0, 1], got {}",
                position
            )));
        }

        Ok(Self {
            timestamp_ns: now_nanos(),
            reel_id,
            watch_secs,
            completed,
            position,
        })
    }
}

/// A like/comment/share/save action with an opaque payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub timestamp_ns: u64,
    pub reel_id: u64,
    pub kind: InteractionKind,
    pub payload: serde_json::Value,
}

impl Interaction {
    pub fn new(reel_id: u64, kind: InteractionKind, payload: serde_json::Value) -> Self {
        Self {
            timestamp_ns: now_nanos(),
            reel_id,
            kind,
            payload,
        }
    }
}

/// Tagged-union event envelope carried on the tracker's intake queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BehaviorEvent {
    Scroll(ScrollEvent),
    Watch(WatchEvent),
    Interaction(Interaction),
}

impl BehaviorEvent {
    /// Event timestamp regardless of variant
    pub fn timestamp_ns(&self) -> u64 {
        match self {
            BehaviorEvent::Scroll(e) => e.timestamp_ns,
            BehaviorEvent::Watch(e) => e.timestamp_ns,
            BehaviorEvent::Interaction(e) => e.timestamp_ns,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scroll_speed_derivation() {
        let event = ScrollEvent::new(10, 14, Direction::Forward, 2.0).unwrap();
        assert_eq!(event.scroll_speed, 2.0);

        // Backward scrolls still have non-negative speed
        let event = ScrollEvent::new(14, 10, Direction::Backward, 2.0).unwrap();
        assert_eq!(event.scroll_speed, 2.0);
    }

    #[test]
    fn test_zero_duration_scroll_rejected() {
        assert!(ScrollEvent::new(0, 1, Direction::Forward, 0.0).is_err());
        assert!(ScrollEvent::new(0, 1, Direction::Forward, f64::NAN).is_err());
        assert!(ScrollEvent::new(0, 1, Direction::Forward, -1.0).is_err());
    }

    #[test]
    fn test_watch_position_bounds() {
        assert!(WatchEvent::new(1, 10.0, false, 0.5).is_ok());
        assert!(WatchEvent::new(1, 10.0, false, 1.5).is_err());
        assert!(WatchEvent::new(1, 10.0, false, -0.1).is_err());
        assert!(WatchEvent::new(1, -1.0, false, 0.5).is_err());
    }
}
