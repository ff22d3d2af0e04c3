//! Confidence-scored prediction cache
//!
//! Caches one behavior profile per user under a TTL. A hit re-classifies the
//! current window and nudges the cached confidence toward 1.0 when the
//! archetype still matches, down when it drifted. Observed prefetch outcomes
//! feed back the same way. The cache is bounded; the oldest-created entry is
//! evicted when a new user would overflow it.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crossbeam_utils::CachePadded;

use crate::scheduler::analyzer::{Archetype, BehaviorAnalyzer, BehaviorProfile};
use crate::scheduler::config::PredictionConfig;
use crate::scheduler::tracker::session::SessionSnapshot;

/// One cached prediction
#[derive(Debug, Clone)]
pub struct PredictionEntry {
    pub user_id: String,
    pub profile: BehaviorProfile,
    pub created_at: Instant,
    pub expires_at: Instant,
    /// Set once the prediction has been served to a scheduling decision
    pub consumed: bool,
}

impl PredictionEntry {
    pub fn expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Point-in-time cache counters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictionStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub entries: usize,
    pub hit_rate: f64,
}

/// Bounded TTL cache of per-user behavior predictions.
///
/// One coarse lock over the map; contention is low because lookups are
/// per-scheduling-decision, not per-event.
#[derive(Debug)]
pub struct PredictionCache {
    config: PredictionConfig,
    analyzer: BehaviorAnalyzer,
    entries: Mutex<HashMap<String, PredictionEntry>>,
    hits: CachePadded<AtomicU64>,
    misses: CachePadded<AtomicU64>,
    evictions: CachePadded<AtomicU64>,
    expirations: CachePadded<AtomicU64>,
}

impl PredictionCache {
    pub fn new(config: PredictionConfig, analyzer: BehaviorAnalyzer) -> Self {
        Self {
            config,
            analyzer,
            entries: Mutex::new(HashMap::new()),
            hits: CachePadded::new(AtomicU64::new(0)),
            misses: CachePadded::new(AtomicU64::new(0)),
            evictions: CachePadded::new(AtomicU64::new(0)),
            expirations: CachePadded::new(AtomicU64::new(0)),
        }
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, PredictionEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Return the live prediction for `user`, creating one from the snapshot
    /// on miss or expiry.
    ///
    /// A hit re-classifies the snapshot: if the archetype still matches, the
    /// cached confidence moves one step toward 1.0, otherwise one step toward
    /// 0.0. The entry is marked consumed either way.
    pub fn get_or_create(&self, user_id: &str, snapshot: &SessionSnapshot) -> BehaviorProfile {
        let now = Instant::now();
        let step = self.config.confidence_step;
        let mut entries = self.lock_entries();

        if let Some(entry) = entries.get_mut(user_id) {
            if !entry.expired(now) {
                let fresh = self.analyzer.classify(snapshot);
                if fresh.archetype == entry.profile.archetype {
                    entry.profile.confidence = (entry.profile.confidence + step).min(1.0);
                } else {
                    entry.profile.confidence = (entry.profile.confidence - step).max(0.0);
                }
                entry.consumed = true;
                self.hits.fetch_add(1, Ordering::Relaxed);
                return entry.profile.clone();
            }
            entries.remove(user_id);
            self.expirations.fetch_add(1, Ordering::Relaxed);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let profile = self.analyzer.classify(snapshot);
        // The fresh entry is being served right now, so it starts consumed
        self.insert_locked(&mut entries, user_id, profile.clone(), now, true);
        profile
    }

    /// Current cached prediction without creating or consuming one
    pub fn peek(&self, user_id: &str) -> Option<BehaviorProfile> {
        let now = Instant::now();
        let mut entries = self.lock_entries();
        match entries.get(user_id) {
            Some(entry) if !entry.expired(now) => Some(entry.profile.clone()),
            Some(_) => {
                entries.remove(user_id);
                self.expirations.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => None,
        }
    }

    /// Feed an observed prefetch outcome back into the cached confidence.
    ///
    /// Success nudges confidence up. A failed prediction whose archetype no
    /// longer matches reality is overwritten with the observed archetype at
    /// reset confidence 0.5; a failure without drift just nudges down.
    pub fn record_outcome(&self, user_id: &str, actual: Archetype, success: bool) {
        let step = self.config.confidence_step;
        let mut entries = self.lock_entries();
        let Some(entry) = entries.get_mut(user_id) else {
            return;
        };

        if success {
            entry.profile.confidence = (entry.profile.confidence + step).min(1.0);
        } else if entry.profile.archetype != actual {
            entry.profile.archetype = actual;
            entry.profile.confidence = 0.5;
            entry.profile.prefetch_count = self.analyzer.prefetch_count(actual);
        } else {
            entry.profile.confidence = (entry.profile.confidence - step).max(0.0);
        }
    }

    /// Drop every expired entry
    pub fn purge_expired(&self) {
        let now = Instant::now();
        let mut entries = self.lock_entries();
        let before = entries.len();
        entries.retain(|_, entry| !entry.expired(now));
        let purged = (before - entries.len()) as u64;
        if purged > 0 {
            self.expirations.fetch_add(purged, Ordering::Relaxed);
        }
    }

    pub fn clear(&self) {
        self.lock_entries().clear();
    }

    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_entries().is_empty()
    }

    pub fn stats(&self) -> PredictionStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        PredictionStats {
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            entries: self.lock_entries().len(),
            hit_rate: if total > 0 {
                hits as f64 / total as f64
            } else {
                0.0
            },
        }
    }

    /// Entry state for tests; `peek` deliberately leaves `consumed` alone
    #[cfg(test)]
    fn is_consumed(&self, user_id: &str) -> Option<bool> {
        self.lock_entries().get(user_id).map(|e| e.consumed)
    }

    fn insert_locked(
        &self,
        entries: &mut HashMap<String, PredictionEntry>,
        user_id: &str,
        profile: BehaviorProfile,
        now: Instant,
        consumed: bool,
    ) {
        if !entries.contains_key(user_id) && entries.len() >= self.config.max_entries {
            // Evict the oldest-created entry to stay bounded
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.created_at)
                .map(|(user, _)| user.clone());
            if let Some(user) = oldest {
                entries.remove(&user);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                log::debug!("prediction cache full, evicted oldest entry for {}", user);
            }
        }

        entries.insert(
            user_id.to_string(),
            PredictionEntry {
                user_id: user_id.to_string(),
                profile,
                created_at: now,
                expires_at: now + self.config.prediction_window,
                consumed,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::scheduler::config::AnalyzerConfig;
    use crate::scheduler::events::{Direction, ScrollEvent};

    fn cache(config: PredictionConfig) -> PredictionCache {
        PredictionCache::new(config, BehaviorAnalyzer::new(AnalyzerConfig::default()))
    }

    fn fast_snapshot(user: &str) -> SessionSnapshot {
        let scrolls: Vec<_> = (0..20u64)
            .map(|i| ScrollEvent::new(i * 8, i * 8 + 8, Direction::Forward, 1.0).unwrap())
            .collect();
        SessionSnapshot {
            total_scrolls: scrolls.len() as u64,
            scroll_events: scrolls,
            ..SessionSnapshot::empty(user)
        }
    }

    #[test]
    fn test_hit_nudges_confidence_up_on_match() {
        let cache = cache(PredictionConfig::default());
        let snapshot = fast_snapshot("u1");

        let first = cache.get_or_create("u1", &snapshot);
        let second = cache.get_or_create("u1", &snapshot);

        assert_eq!(first.archetype, Archetype::FastScroller);
        assert!(second.confidence >= first.confidence);
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate, 0.5);
    }

    #[test]
    fn test_hit_nudges_confidence_down_on_drift() {
        let cache = cache(PredictionConfig::default());
        let first = cache.get_or_create("u1", &fast_snapshot("u1"));
        // Behavior collapsed to nothing; the cached archetype no longer matches
        let second = cache.get_or_create("u1", &SessionSnapshot::empty("u1"));

        assert!(second.confidence < first.confidence);
        assert_eq!(second.archetype, Archetype::FastScroller);
    }

    #[test]
    fn test_expiry_forces_reclassification() {
        let cache = cache(PredictionConfig {
            prediction_window: Duration::from_millis(5),
            ..Default::default()
        });

        cache.get_or_create("u1", &fast_snapshot("u1"));
        std::thread::sleep(Duration::from_millis(10));
        cache.get_or_create("u1", &fast_snapshot("u1"));

        let stats = cache.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.expirations, 1);
    }

    #[test]
    fn test_oldest_entry_evicted_when_full() {
        let cache = cache(PredictionConfig {
            max_entries: 2,
            ..Default::default()
        });

        cache.get_or_create("u1", &fast_snapshot("u1"));
        cache.get_or_create("u2", &fast_snapshot("u2"));
        cache.get_or_create("u3", &fast_snapshot("u3"));

        assert_eq!(cache.len(), 2);
        assert!(cache.peek("u1").is_none());
        assert!(cache.peek("u3").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_outcome_mismatch_resets_archetype() {
        let cache = cache(PredictionConfig::default());
        cache.get_or_create("u1", &fast_snapshot("u1"));

        cache.record_outcome("u1", Archetype::BingeWatcher, false);

        let profile = cache.peek("u1").unwrap();
        assert_eq!(profile.archetype, Archetype::BingeWatcher);
        assert_eq!(profile.confidence, 0.5);
        assert_eq!(profile.prefetch_count, 8);
    }

    #[test]
    fn test_outcome_success_raises_confidence() {
        let cache = cache(PredictionConfig::default());
        let initial = cache.get_or_create("u1", &fast_snapshot("u1"));
        cache.record_outcome("u1", Archetype::FastScroller, true);

        let profile = cache.peek("u1").unwrap();
        assert!(profile.confidence > initial.confidence);
        assert!(profile.confidence <= 1.0);
    }

    #[test]
    fn test_serving_marks_entry_consumed() {
        let cache = cache(PredictionConfig::default());

        // Both the create path and the hit path serve the prediction
        cache.get_or_create("u1", &fast_snapshot("u1"));
        assert_eq!(cache.is_consumed("u1"), Some(true));

        cache.get_or_create("u1", &fast_snapshot("u1"));
        assert_eq!(cache.is_consumed("u1"), Some(true));
        assert!(cache.peek("u1").is_some());
    }

    #[test]
    fn test_clear_empties_cache() {
        let cache = cache(PredictionConfig::default());
        cache.get_or_create("u1", &fast_snapshot("u1"));
        cache.clear();
        assert!(cache.is_empty());
    }
}
