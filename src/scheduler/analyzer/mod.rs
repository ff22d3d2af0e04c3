//! Behavior classification
//!
//! `classify` is a pure function of a session snapshot: it computes scroll and
//! watch metrics, scores each archetype with a weighted rule, picks the best,
//! and derives a confidence from the score margin, scroll consistency, and
//! sample size. Classification never fails - insufficient data degrades to a
//! low-confidence normal-viewer default.

pub mod metrics;
pub mod types;

use crate::scheduler::config::AnalyzerConfig;
use crate::scheduler::tracker::session::SessionSnapshot;

pub use types::{Archetype, BehaviorProfile, ScrollMetrics, WatchMetrics};

/// Archetype classifier over session snapshots
#[derive(Debug, Clone)]
pub struct BehaviorAnalyzer {
    config: AnalyzerConfig,
}

impl BehaviorAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Classify a session snapshot into a behavior profile.
    ///
    /// Idempotent: the same snapshot always yields an identical profile.
    pub fn classify(&self, snapshot: &SessionSnapshot) -> BehaviorProfile {
        let scroll = metrics::scroll_metrics(&snapshot.scroll_events, snapshot.total_scrolls);
        let watch = metrics::watch_metrics(&snapshot.watch_events);
        let samples = snapshot.sample_count();

        if samples < self.config.min_samples {
            // Not enough data to say anything; degrade, never error
            return BehaviorProfile {
                archetype: Archetype::NormalViewer,
                scroll,
                watch,
                interaction_count: snapshot.interaction_count,
                confidence: 0.0,
                prefetch_count: self.prefetch_count(Archetype::NormalViewer),
                last_updated_ns: snapshot.captured_at_ns,
            };
        }

        let (archetype, margin) = self.best_archetype(snapshot, &scroll, &watch);
        let confidence =
            (margin * scroll.consistency * self.sample_factor(samples)).clamp(0.0, 1.0);

        BehaviorProfile {
            archetype,
            scroll,
            watch,
            interaction_count: snapshot.interaction_count,
            confidence,
            prefetch_count: self.prefetch_count(archetype),
            last_updated_ns: snapshot.captured_at_ns,
        }
    }

    /// Score every archetype and return the winner plus the score margin over
    /// the runner-up. Ties resolve by the fixed precedence order of
    /// `Archetype::ALL`.
    fn best_archetype(
        &self,
        snapshot: &SessionSnapshot,
        scroll: &ScrollMetrics,
        watch: &WatchMetrics,
    ) -> (Archetype, f64) {
        let mut best = Archetype::NormalViewer;
        let mut best_score = f64::NEG_INFINITY;
        let mut second_score = f64::NEG_INFINITY;

        for archetype in Archetype::ALL {
            let score = self.score(archetype, snapshot, scroll, watch);
            if score > best_score {
                second_score = best_score;
                best_score = score;
                best = archetype;
            } else if score > second_score {
                second_score = score;
            }
        }

        let margin = if second_score.is_finite() {
            (best_score - second_score).clamp(0.0, 1.0)
        } else {
            best_score.clamp(0.0, 1.0)
        };

        (best, margin)
    }

    fn score(
        &self,
        archetype: Archetype,
        snapshot: &SessionSnapshot,
        scroll: &ScrollMetrics,
        watch: &WatchMetrics,
    ) -> f64 {
        let cfg = &self.config;
        let has_scrolls = !snapshot.scroll_events.is_empty();
        let has_watches = !snapshot.watch_events.is_empty();
        let mut score = 0.0;

        match archetype {
            Archetype::FastScroller => {
                if scroll.avg_speed > cfg.fast_scroll_speed {
                    score += 0.8;
                }
                if watch.avg_watch_secs < cfg.short_watch_secs {
                    score += 0.2;
                }
            }
            Archetype::BingeWatcher => {
                if watch.avg_watch_secs > cfg.long_watch_secs {
                    score += 0.7;
                }
                if has_watches && watch.completion_rate >= cfg.high_completion_rate {
                    score += 0.3;
                }
            }
            Archetype::SlowViewer => {
                if has_scrolls && scroll.avg_speed < cfg.slow_scroll_speed {
                    score += 0.6;
                }
                if has_watches && watch.avg_watch_secs >= cfg.short_watch_secs {
                    score += 0.4;
                }
            }
            Archetype::CasualBrowser => {
                if has_watches && watch.avg_watch_secs < cfg.short_watch_secs {
                    score += 0.6;
                }
                if has_scrolls && scroll.avg_speed < 1.0 {
                    score += 0.4;
                }
            }
            Archetype::NormalViewer => {
                if has_scrolls
                    && scroll.avg_speed >= cfg.slow_scroll_speed
                    && scroll.avg_speed <= cfg.fast_scroll_speed
                {
                    score += 0.6;
                }
                if has_watches
                    && watch.avg_watch_secs >= cfg.short_watch_secs
                    && watch.avg_watch_secs <= cfg.long_watch_secs
                {
                    score += 0.4;
                }
            }
        }

        score
    }

    /// Sample-size confidence factor: monotone from 0 toward 1, capped at 0.5
    /// below the small-sample threshold, saturating at the full threshold.
    fn sample_factor(&self, samples: usize) -> f64 {
        let small = self.config.small_sample_threshold as f64;
        let full = self.config.full_sample_threshold as f64;
        let n = samples as f64;

        if samples == 0 {
            0.0
        } else if n < small {
            0.5 * n / small
        } else if n <= full {
            0.8 + 0.2 * (n - small) / (full - small)
        } else {
            1.0
        }
    }

    /// Fixed archetype -> recommended prefetch count lookup, clamped to [1, 10]
    pub fn prefetch_count(&self, archetype: Archetype) -> u32 {
        let count = match archetype {
            Archetype::FastScroller => self.config.prefetch_fast_scroller,
            Archetype::BingeWatcher => self.config.prefetch_binge_watcher,
            Archetype::SlowViewer => self.config.prefetch_slow_viewer,
            Archetype::CasualBrowser => self.config.prefetch_casual_browser,
            Archetype::NormalViewer => self.config.prefetch_normal_viewer,
        };
        count.clamp(1, 10)
    }
}
