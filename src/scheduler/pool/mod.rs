//! Bounded worker pool
//!
//! Owns the worker threads and picks the best worker for each task by a
//! weighted score over priority, load, latency, and error rate. Scaling is
//! single-step friendly: `scale_to` spawns or retires workers within the
//! configured bounds, and retirement always takes the highest-index workers
//! so ids stay dense from the bottom.

pub mod worker;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crossbeam_channel::Sender;

use crate::scheduler::bridge::BackendRouter;
use crate::scheduler::config::PoolConfig;
use crate::scheduler::dispatch::task::{PrefetchTask, Priority, TaskOutcome, TaskState};
use crate::scheduler::stats::EngineStats;

pub use worker::{Worker, WorkerStats, WorkerStatsSnapshot};

/// Decide what happens to a failed task attempt.
///
/// Below the retry cap the task goes back to Queued with the count bumped;
/// at the cap it becomes terminally Failed. Pure so retry semantics are
/// testable without threads.
pub fn resolve_failure(mut task: PrefetchTask, error: &str) -> TaskOutcome {
    if task.retry_count < task.max_retries {
        task.retry_count += 1;
        task.state = TaskState::Queued;
        task.last_error = Some(error.to_string());
        task.assigned_worker = None;
        TaskOutcome::Retry(task)
    } else {
        task.mark_failed(error);
        TaskOutcome::Completed(task)
    }
}

/// Worker desirability for a task at the given priority.
///
/// weight + (1 - load) * 0.5 + 1 / (1 + avg_latency_secs) * 0.3
/// - error_rate * 0.2; the highest-scoring live worker wins.
pub fn worker_score(priority: Priority, stats: &WorkerStats) -> f64 {
    let latency_secs = stats.avg_processing_ns() as f64 / 1e9;
    priority.weight() + (1.0 - stats.load()) * 0.5 + (1.0 / (1.0 + latency_secs)) * 0.3
        - stats.error_rate() * 0.2
}

/// Fixed-bounds pool of prefetch workers
pub struct WorkerPool {
    config: PoolConfig,
    router: Arc<BackendRouter>,
    outcome_tx: Sender<TaskOutcome>,
    engine_stats: Arc<EngineStats>,
    workers: Mutex<Vec<Worker>>,
    next_id: AtomicUsize,
}

impl WorkerPool {
    pub fn new(
        config: PoolConfig,
        router: Arc<BackendRouter>,
        outcome_tx: Sender<TaskOutcome>,
        engine_stats: Arc<EngineStats>,
    ) -> Self {
        let pool = Self {
            config: config.clone(),
            router,
            outcome_tx,
            engine_stats,
            workers: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        };
        pool.scale_to(config.initial_workers);
        pool
    }

    fn lock_workers(&self) -> MutexGuard<'_, Vec<Worker>> {
        match self.workers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Hand the task to the best-scoring live worker.
    ///
    /// Workers are tried in score order; the task comes back untouched when
    /// every inbox is occupied so the dispatcher can defer it.
    pub fn dispatch(&self, task: PrefetchTask) -> Result<(), PrefetchTask> {
        let workers = self.lock_workers();

        let mut ranked: Vec<(f64, usize)> = workers
            .iter()
            .enumerate()
            .filter(|(_, w)| w.is_alive())
            .map(|(idx, w)| (worker_score(task.priority, w.stats()), idx))
            .collect();
        ranked.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut task = task;
        for (_, idx) in ranked {
            match workers[idx].try_assign(task) {
                Ok(()) => return Ok(()),
                Err(returned) => task = returned,
            }
        }
        Err(task)
    }

    /// Grow or shrink to `target` workers, clamped to the configured bounds
    pub fn scale_to(&self, target: usize) {
        let target = target.clamp(self.config.min_workers, self.config.max_workers);
        let mut workers = self.lock_workers();

        while workers.len() < target {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            workers.push(Worker::spawn(
                id,
                Arc::clone(&self.router),
                self.outcome_tx.clone(),
                Arc::clone(&self.engine_stats),
            ));
            log::debug!("spawned worker {}", id);
        }

        while workers.len() > target {
            if let Some(mut worker) = workers.pop() {
                log::debug!("retiring worker {}", worker.id);
                worker.quit();
                worker.join();
            }
        }
    }

    pub fn worker_count(&self) -> usize {
        self.lock_workers().len()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn worker_stats(&self) -> Vec<WorkerStatsSnapshot> {
        self.lock_workers().iter().map(|w| w.snapshot()).collect()
    }

    /// Pool-wide attempt success fraction, neutral 1.0 before any attempt
    pub fn success_ratio(&self) -> f64 {
        let workers = self.lock_workers();
        let mut processed = 0u64;
        let mut succeeded = 0u64;
        for worker in workers.iter() {
            processed += worker.stats().tasks_processed.load(Ordering::Relaxed);
            succeeded += worker.stats().tasks_succeeded.load(Ordering::Relaxed);
        }
        if processed > 0 {
            succeeded as f64 / processed as f64
        } else {
            1.0
        }
    }

    /// Quit every worker and join the threads
    pub fn shutdown(&self) {
        let mut workers = self.lock_workers();
        for worker in workers.iter() {
            worker.quit();
        }
        for worker in workers.iter_mut() {
            worker.join();
        }
        workers.clear();
    }
}
