//! Decode backend bridge
//!
//! The scheduler never touches codecs. It drives two interchangeable decode
//! backends through the `PrefetchBackend` trait: a primary (fast path) and a
//! secondary (fallback / bulk path). `BackendRouter` maps task priority to a
//! backend, and `BridgeSupervisor` polls backend health in the background so
//! routing decisions can see liveness without a blocking call.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, bounded, select, tick};

use crate::scheduler::dispatch::task::{PrefetchTask, Priority};
use crate::scheduler::error::SchedulerError;

/// Capability surface of a decode backend.
///
/// Implementations are synchronous; `timeout` bounds the call and the
/// implementation is responsible for honoring it on its transport.
pub trait PrefetchBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Fetch and decode one chunk of a reel ahead of playback
    fn prefetch_chunk(&self, reel_id: u64, chunk_id: u32, timeout: Duration)
    -> Result<(), SchedulerError>;

    /// Current decoded frame for a reel, for warm-start rendering
    fn current_frame(&self, reel_id: u64) -> Result<Vec<u8>, SchedulerError>;

    /// Backend-side cache counters, keyed by metric name
    fn cache_stats(&self) -> HashMap<String, f64>;

    /// Cheap liveness probe
    fn health(&self) -> bool;
}

/// Routes tasks to the primary or secondary backend by priority.
///
/// Urgent work goes to the primary and falls back to the secondary when the
/// primary call fails. High stays on the primary. Medium and Low take the
/// secondary so bulk prefetch never crowds the fast path.
pub struct BackendRouter {
    primary: Arc<dyn PrefetchBackend>,
    secondary: Arc<dyn PrefetchBackend>,
}

impl BackendRouter {
    pub fn new(primary: Arc<dyn PrefetchBackend>, secondary: Arc<dyn PrefetchBackend>) -> Self {
        Self { primary, secondary }
    }

    pub fn primary(&self) -> &Arc<dyn PrefetchBackend> {
        &self.primary
    }

    pub fn secondary(&self) -> &Arc<dyn PrefetchBackend> {
        &self.secondary
    }

    /// Execute one prefetch task against the backend its priority selects
    pub fn execute(&self, task: &PrefetchTask) -> Result<(), SchedulerError> {
        match task.priority {
            Priority::Urgent => {
                match self
                    .primary
                    .prefetch_chunk(task.reel_id, task.chunk_id, task.timeout)
                {
                    Ok(()) => Ok(()),
                    Err(primary_err) => {
                        log::warn!(
                            "primary backend {} failed urgent task {}: {}, falling back",
                            self.primary.name(),
                            task.id,
                            primary_err
                        );
                        self.secondary
                            .prefetch_chunk(task.reel_id, task.chunk_id, task.timeout)
                    }
                }
            }
            Priority::High => self
                .primary
                .prefetch_chunk(task.reel_id, task.chunk_id, task.timeout),
            Priority::Medium | Priority::Low => self
                .secondary
                .prefetch_chunk(task.reel_id, task.chunk_id, task.timeout),
        }
    }

    /// Primary backend cache-hit ratio in [0, 1], neutral 0.5 when the
    /// backend does not report usable counters.
    pub fn cache_efficiency(&self) -> f64 {
        let stats = self.primary.cache_stats();
        if let Some(rate) = stats.get("hit_rate") {
            return rate.clamp(0.0, 1.0);
        }
        match (stats.get("hits"), stats.get("misses")) {
            (Some(hits), Some(misses)) if hits + misses > 0.0 => {
                (hits / (hits + misses)).clamp(0.0, 1.0)
            }
            _ => 0.5,
        }
    }
}

/// Liveness flags for the two backends, shared with the supervisor thread
#[derive(Debug, Default)]
pub struct BridgeHealth {
    primary_connected: AtomicBool,
    secondary_connected: AtomicBool,
}

impl BridgeHealth {
    pub fn primary_connected(&self) -> bool {
        self.primary_connected.load(Ordering::Relaxed)
    }

    pub fn secondary_connected(&self) -> bool {
        self.secondary_connected.load(Ordering::Relaxed)
    }
}

/// Background health poller for the bridge.
///
/// Probes both backends on an interval and flips the shared connected flags,
/// logging only on transitions so a flapping backend is visible without
/// flooding.
pub struct BridgeSupervisor {
    health: Arc<BridgeHealth>,
    quit_tx: crossbeam_channel::Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl BridgeSupervisor {
    pub fn spawn(router: Arc<BackendRouter>, poll_interval: Duration) -> Self {
        let health = Arc::new(BridgeHealth::default());
        let (quit_tx, quit_rx) = bounded::<()>(1);
        let loop_health = Arc::clone(&health);

        let handle = std::thread::spawn(move || {
            supervisor_loop(router, loop_health, quit_rx, poll_interval);
        });

        Self {
            health,
            quit_tx,
            handle: Some(handle),
        }
    }

    pub fn health(&self) -> Arc<BridgeHealth> {
        Arc::clone(&self.health)
    }

    /// Signal the poll loop and join it
    pub fn shutdown(&mut self) {
        let _ = self.quit_tx.try_send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for BridgeSupervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn supervisor_loop(
    router: Arc<BackendRouter>,
    health: Arc<BridgeHealth>,
    quit_rx: Receiver<()>,
    poll_interval: Duration,
) {
    let ticker = tick(poll_interval);

    // Probe once up front so routing sees real flags before the first tick
    probe(&router, &health);

    loop {
        select! {
            recv(ticker) -> _ => probe(&router, &health),
            recv(quit_rx) -> _ => break,
        }
    }
}

fn probe(router: &BackendRouter, health: &BridgeHealth) {
    let primary_up = router.primary().health();
    let secondary_up = router.secondary().health();

    if health.primary_connected.swap(primary_up, Ordering::Relaxed) != primary_up {
        log::info!(
            "primary backend {} is now {}",
            router.primary().name(),
            if primary_up { "connected" } else { "disconnected" }
        );
    }
    if health.secondary_connected.swap(secondary_up, Ordering::Relaxed) != secondary_up {
        log::info!(
            "secondary backend {} is now {}",
            router.secondary().name(),
            if secondary_up { "connected" } else { "disconnected" }
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU64;

    use super::*;

    /// Scripted backend that fails its first `fail_first` prefetch calls
    struct ScriptedBackend {
        name: &'static str,
        fail_first: u64,
        calls: AtomicU64,
        healthy: AtomicBool,
    }

    impl ScriptedBackend {
        fn new(name: &'static str, fail_first: u64) -> Arc<Self> {
            Arc::new(Self {
                name,
                fail_first,
                calls: AtomicU64::new(0),
                healthy: AtomicBool::new(true),
            })
        }

        fn call_count(&self) -> u64 {
            self.calls.load(Ordering::Relaxed)
        }
    }

    impl PrefetchBackend for ScriptedBackend {
        fn name(&self) -> &str {
            self.name
        }

        fn prefetch_chunk(
            &self,
            _reel_id: u64,
            _chunk_id: u32,
            _timeout: Duration,
        ) -> Result<(), SchedulerError> {
            let call = self.calls.fetch_add(1, Ordering::Relaxed);
            if call < self.fail_first {
                Err(SchedulerError::bridge_error("scripted failure"))
            } else {
                Ok(())
            }
        }

        fn current_frame(&self, _reel_id: u64) -> Result<Vec<u8>, SchedulerError> {
            Ok(Vec::new())
        }

        fn cache_stats(&self) -> HashMap<String, f64> {
            HashMap::from([("hits".to_string(), 8.0), ("misses".to_string(), 2.0)])
        }

        fn health(&self) -> bool {
            self.healthy.load(Ordering::Relaxed)
        }
    }

    fn task(priority: Priority) -> PrefetchTask {
        PrefetchTask::new("u1", 1, 0, priority, Duration::from_secs(10), 3)
    }

    #[test]
    fn test_urgent_falls_back_to_secondary() {
        let primary = ScriptedBackend::new("primary", u64::MAX);
        let secondary = ScriptedBackend::new("secondary", 0);
        let router = BackendRouter::new(primary.clone(), secondary.clone());

        assert!(router.execute(&task(Priority::Urgent)).is_ok());
        assert_eq!(primary.call_count(), 1);
        assert_eq!(secondary.call_count(), 1);
    }

    #[test]
    fn test_high_stays_on_primary() {
        let primary = ScriptedBackend::new("primary", u64::MAX);
        let secondary = ScriptedBackend::new("secondary", 0);
        let router = BackendRouter::new(primary.clone(), secondary.clone());

        assert!(router.execute(&task(Priority::High)).is_err());
        assert_eq!(secondary.call_count(), 0);
    }

    #[test]
    fn test_medium_and_low_route_to_secondary() {
        let primary = ScriptedBackend::new("primary", 0);
        let secondary = ScriptedBackend::new("secondary", 0);
        let router = BackendRouter::new(primary.clone(), secondary.clone());

        assert!(router.execute(&task(Priority::Medium)).is_ok());
        assert!(router.execute(&task(Priority::Low)).is_ok());
        assert_eq!(primary.call_count(), 0);
        assert_eq!(secondary.call_count(), 2);
    }

    #[test]
    fn test_cache_efficiency_from_counters() {
        let router = BackendRouter::new(
            ScriptedBackend::new("primary", 0),
            ScriptedBackend::new("secondary", 0),
        );
        assert_eq!(router.cache_efficiency(), 0.8);
    }

    #[test]
    fn test_supervisor_tracks_health_transitions() {
        let primary = ScriptedBackend::new("primary", 0);
        let secondary = ScriptedBackend::new("secondary", 0);
        let router = Arc::new(BackendRouter::new(primary.clone(), secondary.clone()));

        let mut supervisor = BridgeSupervisor::spawn(Arc::clone(&router), Duration::from_millis(5));
        let health = supervisor.health();

        // Initial probe runs before the first tick
        std::thread::sleep(Duration::from_millis(20));
        assert!(health.primary_connected());

        primary.healthy.store(false, Ordering::Relaxed);
        std::thread::sleep(Duration::from_millis(30));
        assert!(!health.primary_connected());
        assert!(health.secondary_connected());

        supervisor.shutdown();
    }
}
