//! Individual prefetch worker
//!
//! A worker is one OS thread with a bounded(1) inbox. It executes tasks
//! sequentially against the backend router, resolves failures into retry or
//! terminal outcomes, and reports every outcome back to the dispatcher.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, select};
use crossbeam_utils::CachePadded;

use crate::scheduler::bridge::BackendRouter;
use crate::scheduler::dispatch::task::{PrefetchTask, TaskOutcome};
use crate::scheduler::events::now_nanos;
use crate::scheduler::stats::EngineStats;

use super::resolve_failure;

/// Per-worker counters, shared between the worker thread and the pool
#[derive(Debug, Default)]
pub struct WorkerStats {
    pub tasks_processed: CachePadded<AtomicU64>,
    pub tasks_succeeded: CachePadded<AtomicU64>,
    pub tasks_failed: CachePadded<AtomicU64>,
    pub total_processing_ns: CachePadded<AtomicU64>,
    pub busy: AtomicBool,
    pub last_active_ns: AtomicU64,
    pub last_error: Mutex<Option<String>>,
}

impl WorkerStats {
    fn record_success(&self, elapsed_ns: u64) {
        self.tasks_processed.fetch_add(1, Ordering::Relaxed);
        self.tasks_succeeded.fetch_add(1, Ordering::Relaxed);
        self.total_processing_ns
            .fetch_add(elapsed_ns, Ordering::Relaxed);
        self.last_active_ns.store(now_nanos(), Ordering::Relaxed);
    }

    fn record_failure(&self, elapsed_ns: u64, error: &str) {
        self.tasks_processed.fetch_add(1, Ordering::Relaxed);
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
        self.total_processing_ns
            .fetch_add(elapsed_ns, Ordering::Relaxed);
        self.last_active_ns.store(now_nanos(), Ordering::Relaxed);
        if let Ok(mut last) = self.last_error.lock() {
            *last = Some(error.to_string());
        }
    }

    /// 1.0 while a task is executing, 0.0 while idle
    pub fn load(&self) -> f64 {
        if self.busy.load(Ordering::Relaxed) {
            1.0
        } else {
            0.0
        }
    }

    /// Average attempt latency in nanoseconds, 0 before the first attempt
    pub fn avg_processing_ns(&self) -> u64 {
        let processed = self.tasks_processed.load(Ordering::Relaxed);
        if processed > 0 {
            self.total_processing_ns.load(Ordering::Relaxed) / processed
        } else {
            0
        }
    }

    /// Fraction of attempts that failed
    pub fn error_rate(&self) -> f64 {
        let processed = self.tasks_processed.load(Ordering::Relaxed);
        if processed > 0 {
            self.tasks_failed.load(Ordering::Relaxed) as f64 / processed as f64
        } else {
            0.0
        }
    }

    pub fn snapshot(&self, id: usize, alive: bool) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            id,
            alive,
            busy: self.busy.load(Ordering::Relaxed),
            tasks_processed: self.tasks_processed.load(Ordering::Relaxed),
            tasks_succeeded: self.tasks_succeeded.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            avg_processing_ns: self.avg_processing_ns(),
            error_rate: self.error_rate(),
            last_active_ns: self.last_active_ns.load(Ordering::Relaxed),
            last_error: self.last_error.lock().ok().and_then(|e| e.clone()),
        }
    }
}

/// Point-in-time view of one worker
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerStatsSnapshot {
    pub id: usize,
    pub alive: bool,
    pub busy: bool,
    pub tasks_processed: u64,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    pub avg_processing_ns: u64,
    pub error_rate: f64,
    pub last_active_ns: u64,
    pub last_error: Option<String>,
}

/// Handle to one worker thread, owned by the pool
pub struct Worker {
    pub id: usize,
    inbox_tx: Sender<PrefetchTask>,
    quit_tx: Sender<()>,
    stats: Arc<WorkerStats>,
    alive: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn spawn(
        id: usize,
        router: Arc<BackendRouter>,
        outcome_tx: Sender<TaskOutcome>,
        engine_stats: Arc<EngineStats>,
    ) -> Self {
        // bounded(1) inbox: a worker holds at most one pending task, so
        // dispatch-time load is visible through try_send
        let (inbox_tx, inbox_rx) = bounded::<PrefetchTask>(1);
        let (quit_tx, quit_rx) = bounded::<()>(1);
        let stats = Arc::new(WorkerStats::default());
        let alive = Arc::new(AtomicBool::new(true));

        let loop_stats = Arc::clone(&stats);
        let loop_alive = Arc::clone(&alive);
        let handle = std::thread::spawn(move || {
            worker_loop(
                id,
                inbox_rx,
                quit_rx,
                router,
                outcome_tx,
                engine_stats,
                loop_stats,
            );
            loop_alive.store(false, Ordering::Relaxed);
            log::debug!("worker {} stopped", id);
        });

        Self {
            id,
            inbox_tx,
            quit_tx,
            stats,
            alive,
            handle: Some(handle),
        }
    }

    /// Hand a task to this worker without blocking; the task comes back if
    /// the inbox is occupied or the worker is gone.
    pub fn try_assign(&self, task: PrefetchTask) -> Result<(), PrefetchTask> {
        match self.inbox_tx.try_send(task) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(task)) | Err(TrySendError::Disconnected(task)) => Err(task),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> &Arc<WorkerStats> {
        &self.stats
    }

    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        self.stats.snapshot(self.id, self.is_alive())
    }

    /// Ask the worker to stop after its current task
    pub fn quit(&self) {
        let _ = self.quit_tx.try_send(());
    }

    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    id: usize,
    inbox_rx: Receiver<PrefetchTask>,
    quit_rx: Receiver<()>,
    router: Arc<BackendRouter>,
    outcome_tx: Sender<TaskOutcome>,
    engine_stats: Arc<EngineStats>,
    stats: Arc<WorkerStats>,
) {
    loop {
        select! {
            recv(inbox_rx) -> msg => {
                let Ok(mut task) = msg else { break };
                stats.busy.store(true, Ordering::Relaxed);
                task.mark_assigned(id);

                let start = Instant::now();
                let result = router.execute(&task);
                let elapsed_ns = start.elapsed().as_nanos() as u64;

                let outcome = match result {
                    Ok(()) => {
                        task.mark_succeeded();
                        stats.record_success(elapsed_ns);
                        engine_stats.record_succeeded(elapsed_ns);
                        TaskOutcome::Completed(task)
                    }
                    Err(err) => {
                        let message = err.to_string();
                        stats.record_failure(elapsed_ns, &message);
                        let outcome = resolve_failure(task, &message);
                        if let TaskOutcome::Completed(_) = outcome {
                            engine_stats.record_failed(elapsed_ns);
                        }
                        outcome
                    }
                };

                stats.busy.store(false, Ordering::Relaxed);
                if outcome_tx.send(outcome).is_err() {
                    break;
                }
            }
            recv(quit_rx) -> _ => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::*;
    use crate::scheduler::bridge::PrefetchBackend;
    use crate::scheduler::dispatch::task::{Priority, TaskState};
    use crate::scheduler::error::SchedulerError;

    struct OkBackend;

    impl PrefetchBackend for OkBackend {
        fn name(&self) -> &str {
            "ok"
        }
        fn prefetch_chunk(
            &self,
            _reel_id: u64,
            _chunk_id: u32,
            _timeout: Duration,
        ) -> Result<(), SchedulerError> {
            Ok(())
        }
        fn current_frame(&self, _reel_id: u64) -> Result<Vec<u8>, SchedulerError> {
            Ok(Vec::new())
        }
        fn cache_stats(&self) -> HashMap<String, f64> {
            HashMap::new()
        }
        fn health(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_worker_executes_and_reports() {
        let router = Arc::new(BackendRouter::new(Arc::new(OkBackend), Arc::new(OkBackend)));
        let (outcome_tx, outcome_rx) = crossbeam_channel::unbounded();
        let stats = Arc::new(EngineStats::new());
        let mut worker = Worker::spawn(0, router, outcome_tx, Arc::clone(&stats));

        let task = PrefetchTask::new("u1", 1, 0, Priority::High, Duration::from_secs(1), 3);
        worker.try_assign(task).unwrap();

        let outcome = outcome_rx.recv_timeout(Duration::from_secs(1)).unwrap();
        match outcome {
            TaskOutcome::Completed(task) => {
                assert_eq!(task.state, TaskState::Succeeded);
                assert_eq!(task.assigned_worker, Some(0));
            }
            TaskOutcome::Retry(_) => panic!("expected completion"),
        }

        assert_eq!(stats.snapshot().tasks_succeeded, 1);
        worker.quit();
        worker.join();
        assert!(!worker.is_alive());
    }

    #[test]
    fn test_stats_error_rate() {
        let stats = WorkerStats::default();
        stats.record_success(1_000);
        stats.record_failure(3_000, "boom");
        stats.record_failure(2_000, "boom again");

        assert_eq!(stats.avg_processing_ns(), 2_000);
        assert_eq!(stats.error_rate(), 2.0 / 3.0);
        let snap = stats.snapshot(7, true);
        assert_eq!(snap.tasks_processed, 3);
        assert_eq!(snap.last_error.as_deref(), Some("boom again"));
    }
}
