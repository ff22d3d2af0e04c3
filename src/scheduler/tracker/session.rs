//! Per-user session state
//!
//! A session is the bounded rolling window of one user's recent behavior:
//! ring buffers of scroll/watch/interaction events plus cumulative aggregates.
//! Sessions are only ever mutated by the tracker's drain loop while holding
//! that session's own lock.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::scheduler::config::TrackerConfig;
use crate::scheduler::events::{Interaction, ScrollEvent, WatchEvent, now_nanos};

/// One user's rolling behavior window
#[derive(Debug)]
pub struct Session {
    pub user_id: String,
    pub current_reel: u64,
    /// Recent events, oldest evicted first when over capacity
    pub scroll_events: VecDeque<ScrollEvent>,
    pub watch_events: VecDeque<WatchEvent>,
    pub interactions: VecDeque<Interaction>,
    /// Cumulative aggregates over the session lifetime, not just the window
    pub total_scrolls: u64,
    pub total_watch_secs: f64,
    pub first_seen_ns: u64,
    pub last_seen_ns: u64,
    pub last_activity_ns: u64,
}

impl Session {
    pub fn new(user_id: impl Into<String>) -> Self {
        let now = now_nanos();
        Self {
            user_id: user_id.into(),
            current_reel: 0,
            scroll_events: VecDeque::new(),
            watch_events: VecDeque::new(),
            interactions: VecDeque::new(),
            total_scrolls: 0,
            total_watch_secs: 0.0,
            first_seen_ns: now,
            last_seen_ns: now,
            last_activity_ns: now,
        }
    }

    /// Apply a scroll event, trimming the ring buffer to capacity
    pub fn apply_scroll(&mut self, event: ScrollEvent, config: &TrackerConfig) {
        self.touch(event.timestamp_ns);
        self.current_reel = event.to_reel;
        self.total_scrolls += 1;
        self.scroll_events.push_back(event);
        while self.scroll_events.len() > config.max_scroll_events {
            self.scroll_events.pop_front();
        }
    }

    /// Apply a watch event, trimming the ring buffer to capacity
    pub fn apply_watch(&mut self, event: WatchEvent, config: &TrackerConfig) {
        self.touch(event.timestamp_ns);
        self.total_watch_secs += event.watch_secs;
        self.watch_events.push_back(event);
        while self.watch_events.len() > config.max_watch_events {
            self.watch_events.pop_front();
        }
    }

    /// Apply an interaction, trimming the ring buffer to capacity
    pub fn apply_interaction(&mut self, event: Interaction, config: &TrackerConfig) {
        self.touch(event.timestamp_ns);
        self.interactions.push_back(event);
        while self.interactions.len() > config.max_interactions {
            self.interactions.pop_front();
        }
    }

    fn touch(&mut self, timestamp_ns: u64) {
        self.last_seen_ns = timestamp_ns;
        self.last_activity_ns = timestamp_ns;
    }

    /// Combined event count in the current window
    pub fn window_len(&self) -> usize {
        self.scroll_events.len() + self.watch_events.len() + self.interactions.len()
    }

    /// Immutable copy of the window for classification.
    ///
    /// The snapshot carries its capture timestamp so that classification is a
    /// pure function of the snapshot: classifying the same snapshot twice
    /// yields identical profiles.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            user_id: self.user_id.clone(),
            current_reel: self.current_reel,
            scroll_events: self.scroll_events.iter().cloned().collect(),
            watch_events: self.watch_events.iter().cloned().collect(),
            interaction_count: self.interactions.len(),
            total_scrolls: self.total_scrolls,
            total_watch_secs: self.total_watch_secs,
            captured_at_ns: now_nanos(),
        }
    }

    /// Aggregate counters for external reporting
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            user_id: self.user_id.clone(),
            current_reel: self.current_reel,
            total_scrolls: self.total_scrolls,
            total_watch_secs: self.total_watch_secs,
            scroll_event_count: self.scroll_events.len(),
            watch_event_count: self.watch_events.len(),
            interaction_count: self.interactions.len(),
            first_seen_ns: self.first_seen_ns,
            last_seen_ns: self.last_seen_ns,
            last_activity_ns: self.last_activity_ns,
        }
    }
}

/// Point-in-time copy of a session window, input to the analyzer
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub user_id: String,
    pub current_reel: u64,
    pub scroll_events: Vec<ScrollEvent>,
    pub watch_events: Vec<WatchEvent>,
    pub interaction_count: usize,
    pub total_scrolls: u64,
    pub total_watch_secs: f64,
    pub captured_at_ns: u64,
}

impl SessionSnapshot {
    /// Combined sample count used for confidence scaling
    pub fn sample_count(&self) -> usize {
        self.scroll_events.len() + self.watch_events.len() + self.interaction_count
    }

    /// Empty snapshot for a user with no recorded events
    pub fn empty(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            current_reel: 0,
            scroll_events: Vec::new(),
            watch_events: Vec::new(),
            interaction_count: 0,
            total_scrolls: 0,
            total_watch_secs: 0.0,
            captured_at_ns: now_nanos(),
        }
    }
}

/// Session aggregates for external reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub user_id: String,
    pub current_reel: u64,
    pub total_scrolls: u64,
    pub total_watch_secs: f64,
    pub scroll_event_count: usize,
    pub watch_event_count: usize,
    pub interaction_count: usize,
    pub first_seen_ns: u64,
    pub last_seen_ns: u64,
    pub last_activity_ns: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::events::Direction;

    #[test]
    fn test_ring_buffer_trimming() {
        let config = TrackerConfig {
            max_scroll_events: 3,
            ..Default::default()
        };
        let mut session = Session::new("u1");

        for i in 0..5u64 {
            let event = ScrollEvent::new(i, i + 1, Direction::Forward, 1.0).unwrap();
            session.apply_scroll(event, &config);
        }

        // Window holds the newest 3 but the cumulative counter keeps all 5
        assert_eq!(session.scroll_events.len(), 3);
        assert_eq!(session.scroll_events.front().unwrap().from_reel, 2);
        assert_eq!(session.total_scrolls, 5);
        assert_eq!(session.current_reel, 5);
    }

    #[test]
    fn test_watch_accumulates_total_time() {
        let config = TrackerConfig::default();
        let mut session = Session::new("u1");

        session.apply_watch(WatchEvent::new(1, 10.0, true, 1.0).unwrap(), &config);
        session.apply_watch(WatchEvent::new(2, 5.0, false, 0.4).unwrap(), &config);

        assert_eq!(session.total_watch_secs, 15.0);
        assert_eq!(session.window_len(), 2);
    }
}
