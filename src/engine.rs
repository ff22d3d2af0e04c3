//! Public engine API
//!
//! `PrefetchEngine` wires the whole pipeline together behind a small surface:
//! record behavior, ask for a prediction, turn it into prefetch work. All
//! background loops are owned by the engine and joined on shutdown; there is
//! no global state.

use std::sync::Arc;

use crossbeam_channel::unbounded;
use crossbeam_utils::atomic::AtomicCell;
use serde_json::Value;

use crate::scheduler::adaptive::AdaptiveController;
use crate::scheduler::analyzer::{Archetype, BehaviorAnalyzer, BehaviorProfile};
use crate::scheduler::bridge::{BackendRouter, BridgeHealth, BridgeSupervisor, PrefetchBackend};
use crate::scheduler::config::SchedulerConfig;
use crate::scheduler::dispatch::{
    MultiLevelQueue, PrefetchTask, Priority, PriorityDispatcher, QueueStats,
};
use crate::scheduler::error::SchedulerError;
use crate::scheduler::events::{Direction, InteractionKind};
use crate::scheduler::pool::{WorkerPool, WorkerStatsSnapshot};
use crate::scheduler::prediction::{PredictionCache, PredictionStats};
use crate::scheduler::stats::{EngineStats, EngineStatsSnapshot};
use crate::scheduler::tracker::{BehaviorTracker, SessionStats};

use std::time::Duration;

/// Scheduling priority a freshly predicted archetype maps to
fn priority_for(archetype: Archetype) -> Priority {
    match archetype {
        Archetype::FastScroller => Priority::Urgent,
        Archetype::BingeWatcher => Priority::High,
        Archetype::NormalViewer => Priority::Medium,
        Archetype::SlowViewer | Archetype::CasualBrowser => Priority::Low,
    }
}

/// The adaptive prefetch scheduler.
///
/// Construct through [`PrefetchEngine::builder`]. Dropping the engine shuts
/// down and joins every background thread.
pub struct PrefetchEngine {
    // Declaration order is shutdown order: stop feeding work before
    // stopping the workers
    dispatcher: PriorityDispatcher,
    adaptive: Option<AdaptiveController>,
    supervisor: BridgeSupervisor,
    tracker: BehaviorTracker,
    pool: Arc<WorkerPool>,
    queue: Arc<MultiLevelQueue>,
    cache: Arc<PredictionCache>,
    stats: Arc<EngineStats>,
    multiplier: Arc<AtomicCell<f64>>,
    config: SchedulerConfig,
}

impl PrefetchEngine {
    pub fn builder() -> PrefetchEngineBuilder {
        PrefetchEngineBuilder::new()
    }

    /// Record a scroll from one reel to another.
    ///
    /// Err only for invalid event data; backpressure drops are counted, not
    /// surfaced.
    pub fn record_scroll(
        &self,
        user_id: &str,
        from_reel: u64,
        to_reel: u64,
        direction: Direction,
        duration_secs: f64,
    ) -> Result<(), SchedulerError> {
        self.tracker
            .record_scroll(user_id, from_reel, to_reel, direction, duration_secs)
    }

    /// Record a reel viewing
    pub fn record_watch(
        &self,
        user_id: &str,
        reel_id: u64,
        watch_secs: f64,
        completed: bool,
        position: f64,
    ) -> Result<(), SchedulerError> {
        self.tracker
            .record_watch(user_id, reel_id, watch_secs, completed, position)
    }

    /// Record a like/comment/share/save action
    pub fn record_interaction(
        &self,
        user_id: &str,
        reel_id: u64,
        kind: InteractionKind,
        payload: Value,
    ) -> Result<(), SchedulerError> {
        self.tracker.record_interaction(user_id, reel_id, kind, payload)
    }

    /// Current behavior prediction for the user, classified fresh on cache
    /// miss. Unknown users get the low-confidence default profile.
    pub fn prediction(&self, user_id: &str) -> BehaviorProfile {
        let snapshot = self.tracker.snapshot(user_id);
        self.cache.get_or_create(user_id, &snapshot)
    }

    /// Turn the user's prediction into prefetch tasks.
    ///
    /// The profile's prefetch count is scaled by the adaptive network
    /// multiplier, and one task per upcoming reel is enqueued at the priority
    /// the archetype maps to. Returns how many tasks the queues accepted.
    pub fn schedule_prefetch(&self, user_id: &str) -> usize {
        let snapshot = self.tracker.snapshot(user_id);
        let current_reel = snapshot.current_reel;
        let profile = self.cache.get_or_create(user_id, &snapshot);

        let scaled = (profile.prefetch_count as f64 * self.multiplier.load()).round() as u64;
        let count = scaled.max(1);
        let priority = priority_for(profile.archetype);

        let mut accepted = 0;
        for ahead in 1..=count {
            let task = PrefetchTask::new(
                user_id,
                current_reel + ahead,
                0,
                priority,
                self.config.pool.task_timeout,
                self.config.pool.max_retries,
            );
            match self.queue.enqueue(task) {
                Ok(()) => {
                    self.stats.record_enqueued();
                    accepted += 1;
                }
                Err(dropped) => {
                    self.stats.record_dropped();
                    log::warn!(
                        "dropped prefetch task {} for {}, {} queue full",
                        dropped.id,
                        user_id,
                        dropped.priority
                    );
                }
            }
        }

        log::debug!(
            "scheduled {} of {} prefetch tasks for {} as {}",
            accepted,
            count,
            user_id,
            profile.archetype
        );
        accepted
    }

    /// Feed an observed prefetch outcome back into the prediction cache
    pub fn record_prefetch_outcome(&self, user_id: &str, actual: Archetype, success: bool) {
        self.cache.record_outcome(user_id, actual, success);
    }

    /// Fill state of the four priority queues
    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Per-worker counters
    pub fn worker_stats(&self) -> Vec<WorkerStatsSnapshot> {
        self.pool.worker_stats()
    }

    pub fn worker_count(&self) -> usize {
        self.pool.worker_count()
    }

    /// Engine-wide counters
    pub fn stats(&self) -> EngineStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn prediction_stats(&self) -> PredictionStats {
        self.cache.stats()
    }

    pub fn session_stats(&self, user_id: &str) -> Option<SessionStats> {
        self.tracker.session_stats(user_id)
    }

    pub fn active_sessions(&self) -> usize {
        self.tracker.active_sessions()
    }

    /// Backend liveness flags maintained by the bridge supervisor
    pub fn bridge_health(&self) -> Arc<BridgeHealth> {
        self.supervisor.health()
    }

    pub fn network_multiplier(&self) -> f64 {
        self.multiplier.load()
    }

    /// Set the prefetch aggressiveness multiplier; rejected outside the
    /// configured bounds and the prior value is kept.
    pub fn set_network_multiplier(&self, value: f64) -> Result<(), SchedulerError> {
        let adaptive = &self.config.adaptive;
        if !value.is_finite()
            || value < adaptive.min_network_multiplier
            || value > adaptive.max_network_multiplier
        {
            return Err(SchedulerError::invalid_config(format!(
                "network multiplier must be in [{}, {}]",
                adaptive.min_network_multiplier, adaptive.max_network_multiplier
            )));
        }
        self.multiplier.store(value);
        Ok(())
    }

    /// Resize the priority queues; rejected outside the configured bounds
    pub fn set_queue_capacity(&self, capacity: usize) -> Result<(), SchedulerError> {
        let dispatch = &self.config.dispatch;
        if !(dispatch.min_queue_capacity..=dispatch.max_queue_capacity).contains(&capacity) {
            return Err(SchedulerError::invalid_config(format!(
                "queue capacity must be in [{}, {}]",
                dispatch.min_queue_capacity, dispatch.max_queue_capacity
            )));
        }
        self.queue.set_capacity(capacity);
        Ok(())
    }

    /// Resize the worker pool; rejected outside the configured bounds
    pub fn set_worker_count(&self, count: usize) -> Result<(), SchedulerError> {
        let pool = &self.config.pool;
        if !(pool.min_workers..=pool.max_workers).contains(&count) {
            return Err(SchedulerError::invalid_config(format!(
                "worker count must be in [{}, {}]",
                pool.min_workers, pool.max_workers
            )));
        }
        self.pool.scale_to(count);
        Ok(())
    }

    /// Stop and join every background thread. Idempotent.
    pub fn shutdown(&mut self) {
        self.dispatcher.shutdown();
        if let Some(adaptive) = self.adaptive.as_mut() {
            adaptive.shutdown();
        }
        self.supervisor.shutdown();
        self.tracker.shutdown();
        self.pool.shutdown();
    }
}

impl Drop for PrefetchEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Fluent engine construction
pub struct PrefetchEngineBuilder {
    config: SchedulerConfig,
    primary: Option<Arc<dyn PrefetchBackend>>,
    secondary: Option<Arc<dyn PrefetchBackend>>,
    health_poll_interval: Duration,
}

impl PrefetchEngineBuilder {
    pub fn new() -> Self {
        Self {
            config: SchedulerConfig::default(),
            primary: None,
            secondary: None,
            health_poll_interval: Duration::from_secs(5),
        }
    }

    /// Backend for urgent and high-priority prefetch
    pub fn primary_backend(mut self, backend: Arc<dyn PrefetchBackend>) -> Self {
        self.primary = Some(backend);
        self
    }

    /// Backend for bulk prefetch and urgent fallback
    pub fn secondary_backend(mut self, backend: Arc<dyn PrefetchBackend>) -> Self {
        self.secondary = Some(backend);
        self
    }

    /// Replace the whole configuration at once
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Intake buffer between recording calls and the drain loop
    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.config.tracker.event_buffer_size = size;
        self
    }

    /// Per-level queue capacity at startup
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.dispatch.queue_capacity = capacity;
        self
    }

    /// Workers spawned at startup
    pub fn initial_workers(mut self, count: usize) -> Self {
        self.config.pool.initial_workers = count;
        self
    }

    /// Backend call budget per task
    pub fn task_timeout(mut self, timeout: Duration) -> Self {
        self.config.pool.task_timeout = timeout;
        self
    }

    /// Retry cap for failed prefetch attempts
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.pool.max_retries = retries;
        self
    }

    /// TTL of cached predictions
    pub fn prediction_window(mut self, window: Duration) -> Self {
        self.config.prediction.prediction_window = window;
        self
    }

    /// Enable or disable the adaptive control loop
    pub fn adaptive(mut self, enabled: bool) -> Self {
        self.config.adaptive.enabled = enabled;
        self
    }

    /// Backend health poll interval
    pub fn health_poll_interval(mut self, interval: Duration) -> Self {
        self.health_poll_interval = interval;
        self
    }

    /// Validate the configuration and start the pipeline: tracker drain
    /// loop, dispatch loop, worker threads, bridge supervisor, and (when
    /// enabled) the adaptive controller.
    pub fn build(self) -> Result<PrefetchEngine, SchedulerError> {
        self.config.validate()?;
        let config = self.config;

        let primary = self
            .primary
            .ok_or_else(|| SchedulerError::invalid_config("primary backend is required"))?;
        let secondary = self
            .secondary
            .ok_or_else(|| SchedulerError::invalid_config("secondary backend is required"))?;

        let stats = Arc::new(EngineStats::new());
        let router = Arc::new(BackendRouter::new(primary, secondary));
        let analyzer = BehaviorAnalyzer::new(config.analyzer.clone());
        let cache = Arc::new(PredictionCache::new(config.prediction.clone(), analyzer));
        let queue = Arc::new(MultiLevelQueue::new(&config.dispatch));
        let multiplier = Arc::new(AtomicCell::new(config.adaptive.min_network_multiplier));

        let (outcome_tx, outcome_rx) = unbounded();
        let pool = Arc::new(WorkerPool::new(
            config.pool.clone(),
            Arc::clone(&router),
            outcome_tx,
            Arc::clone(&stats),
        ));

        let dispatcher = PriorityDispatcher::spawn(
            Arc::clone(&queue),
            Arc::clone(&pool),
            Arc::clone(&stats),
            config.dispatch.clone(),
            config.pool.retry_delay,
            outcome_rx,
        );

        let tracker = BehaviorTracker::spawn(config.tracker.clone(), Arc::clone(&stats));
        let supervisor = BridgeSupervisor::spawn(Arc::clone(&router), self.health_poll_interval);

        let adaptive = config.adaptive.enabled.then(|| {
            AdaptiveController::spawn(
                config.adaptive.clone(),
                Arc::clone(&queue),
                Arc::clone(&pool),
                Arc::clone(&router),
                Arc::clone(&stats),
                Arc::clone(&multiplier),
            )
        });

        log::info!(
            "prefetch engine started with {} workers, queue capacity {}",
            pool.worker_count(),
            config.dispatch.queue_capacity
        );

        Ok(PrefetchEngine {
            dispatcher,
            adaptive,
            supervisor,
            tracker,
            pool,
            queue,
            cache,
            stats,
            multiplier,
            config,
        })
    }
}

impl Default for PrefetchEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Instant;

    use super::*;

    /// Counting backend that always succeeds
    struct CountingBackend {
        name: &'static str,
        calls: AtomicU64,
    }

    impl CountingBackend {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                calls: AtomicU64::new(0),
            })
        }
    }

    impl PrefetchBackend for CountingBackend {
        fn name(&self) -> &str {
            self.name
        }
        fn prefetch_chunk(
            &self,
            _reel_id: u64,
            _chunk_id: u32,
            _timeout: Duration,
        ) -> Result<(), SchedulerError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
        fn current_frame(&self, _reel_id: u64) -> Result<Vec<u8>, SchedulerError> {
            Ok(Vec::new())
        }
        fn cache_stats(&self) -> HashMap<String, f64> {
            HashMap::from([("hit_rate".to_string(), 0.6)])
        }
        fn health(&self) -> bool {
            true
        }
    }

    /// Opt-in log capture: run with RUST_LOG=debug to see pipeline events
    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn engine() -> PrefetchEngine {
        init_logging();
        let mut config = SchedulerConfig::default();
        config.tracker.drain_interval = Duration::from_millis(5);
        config.adaptive.enabled = false;
        PrefetchEngine::builder()
            .config(config)
            .primary_backend(CountingBackend::new("primary"))
            .secondary_backend(CountingBackend::new("secondary"))
            .build()
            .unwrap()
    }

    fn wait_until(deadline_secs: u64, pred: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(deadline_secs);
        while Instant::now() < deadline {
            if pred() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_build_requires_backends() {
        assert!(PrefetchEngine::builder().build().is_err());
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let result = PrefetchEngine::builder()
            .primary_backend(CountingBackend::new("p"))
            .secondary_backend(CountingBackend::new("s"))
            .initial_workers(1000)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_end_to_end_fast_scroller_prefetch() {
        let mut engine = engine();

        for i in 0..20u64 {
            engine
                .record_scroll("u1", i * 8, i * 8 + 8, Direction::Forward, 1.0)
                .unwrap();
        }
        assert!(wait_until(5, || engine.stats().events_processed >= 20));

        let profile = engine.prediction("u1");
        assert_eq!(profile.archetype, Archetype::FastScroller);

        let accepted = engine.schedule_prefetch("u1");
        assert_eq!(accepted, 5);

        assert!(wait_until(5, || engine.stats().tasks_succeeded >= 5));
        let stats = engine.stats();
        assert_eq!(stats.tasks_enqueued, 5);
        assert_eq!(stats.tasks_failed, 0);

        engine.shutdown();
    }

    #[test]
    fn test_unknown_user_gets_default_prefetch() {
        let mut engine = engine();

        let profile = engine.prediction("nobody");
        assert_eq!(profile.archetype, Archetype::NormalViewer);
        assert_eq!(profile.confidence, 0.0);

        let accepted = engine.schedule_prefetch("nobody");
        assert_eq!(accepted, 3);
        engine.shutdown();
    }

    #[test]
    fn test_setters_validate_and_keep_prior_value() {
        let mut engine = engine();

        assert!(engine.set_network_multiplier(5.0).is_err());
        assert_eq!(engine.network_multiplier(), 1.0);
        assert!(engine.set_network_multiplier(1.5).is_ok());
        assert_eq!(engine.network_multiplier(), 1.5);

        assert!(engine.set_worker_count(1000).is_err());
        assert_eq!(engine.worker_count(), 4);
        assert!(engine.set_worker_count(6).is_ok());
        assert_eq!(engine.worker_count(), 6);

        assert!(engine.set_queue_capacity(10_000).is_err());
        assert!(engine.set_queue_capacity(150).is_ok());
        assert_eq!(engine.queue_stats().levels[0].capacity, 150);

        engine.shutdown();
    }

    #[test]
    fn test_multiplier_scales_prefetch_reach() {
        let mut engine = engine();
        engine.set_network_multiplier(2.0).unwrap();

        // Default profile count 3 scaled by 2.0
        let accepted = engine.schedule_prefetch("nobody");
        assert_eq!(accepted, 6);
        engine.shutdown();
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let mut engine = engine();
        engine.schedule_prefetch("u1");
        engine.shutdown();
        engine.shutdown();
    }
}
