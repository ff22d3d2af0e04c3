//! Metric computation over a session window

use crate::scheduler::events::{Direction, ScrollEvent, WatchEvent};

use super::types::{ScrollMetrics, WatchMetrics};

/// Compute scroll metrics from the window.
///
/// Consistency is max(0, 1 - variance / avg_speed^2) when avg_speed > 0,
/// otherwise 1.0: a window of identical speeds is perfectly consistent, and
/// so is a window too small to measure.
pub fn scroll_metrics(events: &[ScrollEvent], total_scrolls: u64) -> ScrollMetrics {
    if events.is_empty() {
        return ScrollMetrics {
            consistency: 1.0,
            ..Default::default()
        };
    }

    let mut total_speed = 0.0f64;
    let mut peak_speed = 0.0f64;
    let mut forward_count = 0usize;

    for event in events {
        total_speed += event.scroll_speed;
        if event.scroll_speed > peak_speed {
            peak_speed = event.scroll_speed;
        }
        if event.direction == Direction::Forward {
            forward_count += 1;
        }
    }

    let avg_speed = total_speed / events.len() as f64;
    let variance = events
        .iter()
        .map(|e| {
            let diff = e.scroll_speed - avg_speed;
            diff * diff
        })
        .sum::<f64>()
        / events.len() as f64;

    let consistency = if avg_speed > 0.0 {
        (1.0 - variance / (avg_speed * avg_speed)).max(0.0)
    } else {
        1.0
    };

    ScrollMetrics {
        avg_speed,
        peak_speed,
        variance,
        direction_ratio: forward_count as f64 / events.len() as f64,
        consistency,
        total_scrolls,
    }
}

/// Compute watch metrics from the window
pub fn watch_metrics(events: &[WatchEvent]) -> WatchMetrics {
    if events.is_empty() {
        return WatchMetrics::default();
    }

    let mut total_secs = 0.0f64;
    let mut completed = 0usize;

    for event in events {
        total_secs += event.watch_secs;
        if event.completed {
            completed += 1;
        }
    }

    let avg_watch_secs = total_secs / events.len() as f64;
    let completion_rate = completed as f64 / events.len() as f64;

    WatchMetrics {
        avg_watch_secs,
        completion_rate,
        engagement_score: avg_watch_secs * completion_rate,
    }
}
