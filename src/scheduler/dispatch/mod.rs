//! Priority dispatch
//!
//! Four independently bounded FIFO queues, one per priority level, drained
//! strictly highest-first by a tick loop. Overflow is a backpressure valve:
//! the newest task is dropped with a warning, never an error. Failed attempts
//! below the retry cap and tasks that found no free worker come back through
//! a deferred list and re-enter their level after a short delay.

pub mod task;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, bounded, select, tick};
use serde::{Deserialize, Serialize};

use crate::scheduler::config::DispatchConfig;
use crate::scheduler::pool::WorkerPool;
use crate::scheduler::stats::EngineStats;

pub use task::{PrefetchTask, Priority, TaskOutcome, TaskState};

#[derive(Debug)]
struct LevelQueue {
    tasks: VecDeque<PrefetchTask>,
    capacity: usize,
}

/// The four priority queues behind one lock.
///
/// Capacity is a field rather than a channel bound because the adaptive
/// controller resizes queues at runtime. Shrinking below the current length
/// only gates new enqueues; queued tasks are never discarded by a resize.
#[derive(Debug)]
pub struct MultiLevelQueue {
    levels: Mutex<[LevelQueue; 4]>,
    min_capacity: usize,
    max_capacity: usize,
}

impl MultiLevelQueue {
    pub fn new(config: &DispatchConfig) -> Self {
        Self {
            levels: Mutex::new(std::array::from_fn(|_| LevelQueue {
                tasks: VecDeque::new(),
                capacity: config.queue_capacity,
            })),
            min_capacity: config.min_queue_capacity,
            max_capacity: config.max_queue_capacity,
        }
    }

    fn lock_levels(&self) -> MutexGuard<'_, [LevelQueue; 4]> {
        match self.levels.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Append the task to its level, FIFO. A full level bounces the task
    /// back marked `Dropped`.
    pub fn enqueue(&self, mut task: PrefetchTask) -> Result<(), PrefetchTask> {
        let mut levels = self.lock_levels();
        let level = &mut levels[task.priority.index()];
        if level.tasks.len() >= level.capacity {
            task.mark_dropped();
            return Err(task);
        }
        level.tasks.push_back(task);
        Ok(())
    }

    /// Pop the oldest task from the highest non-empty level
    pub fn dequeue(&self) -> Option<PrefetchTask> {
        let mut levels = self.lock_levels();
        levels.iter_mut().find_map(|level| level.tasks.pop_front())
    }

    pub fn len(&self) -> usize {
        self.lock_levels().iter().map(|l| l.tasks.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Set every level's capacity, clamped to the configured bounds.
    /// Returns the applied value.
    pub fn set_capacity(&self, capacity: usize) -> usize {
        let capacity = capacity.clamp(self.min_capacity, self.max_capacity);
        for level in self.lock_levels().iter_mut() {
            level.capacity = capacity;
        }
        capacity
    }

    pub fn capacity(&self) -> usize {
        self.lock_levels()[0].capacity
    }

    /// Highest fill fraction across the four levels
    pub fn utilization(&self) -> f64 {
        self.lock_levels()
            .iter()
            .map(|l| l.tasks.len() as f64 / l.capacity as f64)
            .fold(0.0, f64::max)
    }

    pub fn stats(&self) -> QueueStats {
        let levels = self.lock_levels();
        let per_level = std::array::from_fn(|i| QueueLevelStats {
            priority: Priority::ALL[i],
            len: levels[i].tasks.len(),
            capacity: levels[i].capacity,
        });
        let utilization = levels
            .iter()
            .map(|l| l.tasks.len() as f64 / l.capacity as f64)
            .fold(0.0, f64::max);
        QueueStats {
            levels: per_level,
            utilization,
        }
    }
}

/// Fill state of one priority level
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QueueLevelStats {
    pub priority: Priority,
    pub len: usize,
    pub capacity: usize,
}

/// Point-in-time view of all four levels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub levels: [QueueLevelStats; 4],
    pub utilization: f64,
}

/// A task waiting out a retry or re-queue delay
struct Deferred {
    ready_at: Instant,
    task: PrefetchTask,
}

/// Background dispatch loop handle
pub struct PriorityDispatcher {
    quit_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl PriorityDispatcher {
    /// Start the dispatch loop.
    ///
    /// `outcome_rx` is the pool's reporting channel; `retry_delay` is how
    /// long a retryable failure waits before re-entering its queue.
    pub fn spawn(
        queue: Arc<MultiLevelQueue>,
        pool: Arc<WorkerPool>,
        stats: Arc<EngineStats>,
        config: DispatchConfig,
        retry_delay: Duration,
        outcome_rx: Receiver<TaskOutcome>,
    ) -> Self {
        let (quit_tx, quit_rx) = bounded::<()>(1);
        let handle = std::thread::spawn(move || {
            dispatch_loop(queue, pool, stats, config, retry_delay, outcome_rx, quit_rx);
        });
        Self {
            quit_tx,
            handle: Some(handle),
        }
    }

    /// Signal the loop and join it
    pub fn shutdown(&mut self) {
        let _ = self.quit_tx.try_send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PriorityDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn dispatch_loop(
    queue: Arc<MultiLevelQueue>,
    pool: Arc<WorkerPool>,
    stats: Arc<EngineStats>,
    config: DispatchConfig,
    retry_delay: Duration,
    outcome_rx: Receiver<TaskOutcome>,
    quit_rx: Receiver<()>,
) {
    let ticker = tick(config.tick_interval);
    let mut deferred: Vec<Deferred> = Vec::new();

    loop {
        select! {
            recv(ticker) -> _ => {
                collect_outcomes(&outcome_rx, &mut deferred, retry_delay);
                release_ready(&mut deferred, &queue, &stats);
                drain(&queue, &pool, &mut deferred, &config, &stats);
            }
            recv(quit_rx) -> _ => break,
        }
    }
}

/// Pull everything the workers reported since the last tick
fn collect_outcomes(
    outcome_rx: &Receiver<TaskOutcome>,
    deferred: &mut Vec<Deferred>,
    retry_delay: Duration,
) {
    while let Ok(outcome) = outcome_rx.try_recv() {
        match outcome {
            TaskOutcome::Completed(task) => {
                // Terminal counters were recorded by the worker
                log::debug!("task {} finished in state {:?}", task.id, task.state);
            }
            TaskOutcome::Retry(task) => {
                log::debug!(
                    "task {} retrying, attempt {} of {}",
                    task.id,
                    task.retry_count,
                    task.max_retries
                );
                deferred.push(Deferred {
                    ready_at: Instant::now() + retry_delay,
                    task,
                });
            }
        }
    }
}

/// Move deferred tasks whose delay elapsed back into their queues
fn release_ready(deferred: &mut Vec<Deferred>, queue: &MultiLevelQueue, stats: &EngineStats) {
    let now = Instant::now();
    let mut waiting = Vec::new();
    for entry in deferred.drain(..) {
        if entry.ready_at <= now {
            if let Err(dropped) = queue.enqueue(entry.task) {
                stats.record_dropped();
                log::warn!(
                    "dropped task {} on re-enqueue, {} queue full",
                    dropped.id,
                    dropped.priority
                );
            }
        } else {
            waiting.push(entry);
        }
    }
    *deferred = waiting;
}

/// Drain queues highest level first, assigning each task to the best worker.
/// Stops early when the pool is saturated; the blocked task waits out the
/// re-queue delay, up to the attempt cap.
fn drain(
    queue: &MultiLevelQueue,
    pool: &WorkerPool,
    deferred: &mut Vec<Deferred>,
    config: &DispatchConfig,
    stats: &EngineStats,
) {
    while let Some(task) = queue.dequeue() {
        match pool.dispatch(task) {
            Ok(()) => {}
            Err(mut task) => {
                task.requeue_count += 1;
                if task.requeue_count > config.max_requeue_attempts {
                    task.mark_dropped();
                    stats.record_dropped();
                    log::warn!(
                        "dropped task {} after {} re-queue attempts with no free worker",
                        task.id,
                        task.requeue_count
                    );
                } else {
                    deferred.push(Deferred {
                        ready_at: Instant::now() + config.requeue_delay,
                        task,
                    });
                }
                // Every inbox is occupied; later tasks cannot do better
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;
    use crate::scheduler::bridge::{BackendRouter, PrefetchBackend};
    use crate::scheduler::config::PoolConfig;
    use crate::scheduler::error::SchedulerError;

    fn task(priority: Priority, reel_id: u64) -> PrefetchTask {
        PrefetchTask::new("u1", reel_id, 0, priority, Duration::from_secs(1), 3)
    }

    #[test]
    fn test_overflow_drops_exactly_the_excess_fifo() {
        let config = DispatchConfig {
            queue_capacity: 100,
            min_queue_capacity: 50,
            max_queue_capacity: 200,
            ..Default::default()
        };
        let queue = MultiLevelQueue::new(&config);

        let mut dropped = 0;
        for reel in 0..150u64 {
            if let Err(bounced) = queue.enqueue(task(Priority::Medium, reel)) {
                assert_eq!(bounced.state, TaskState::Dropped);
                dropped += 1;
            }
        }

        assert_eq!(dropped, 50);
        assert_eq!(queue.len(), 100);
        // The accepted 100 come out in submission order
        for expected in 0..100u64 {
            let next = queue.dequeue().unwrap();
            assert_eq!(next.reel_id, expected);
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_urgent_dequeues_before_earlier_lower_levels() {
        let queue = MultiLevelQueue::new(&DispatchConfig::default());

        queue.enqueue(task(Priority::Medium, 1)).unwrap();
        queue.enqueue(task(Priority::Low, 2)).unwrap();
        queue.enqueue(task(Priority::Urgent, 3)).unwrap();
        queue.enqueue(task(Priority::High, 4)).unwrap();

        let order: Vec<u64> = std::iter::from_fn(|| queue.dequeue())
            .map(|t| t.reel_id)
            .collect();
        assert_eq!(order, vec![3, 4, 1, 2]);
    }

    #[test]
    fn test_capacity_resize_clamped() {
        let config = DispatchConfig {
            queue_capacity: 100,
            min_queue_capacity: 50,
            max_queue_capacity: 200,
            ..Default::default()
        };
        let queue = MultiLevelQueue::new(&config);

        assert_eq!(queue.set_capacity(500), 200);
        assert_eq!(queue.set_capacity(10), 50);
        assert_eq!(queue.capacity(), 50);
    }

    #[test]
    fn test_queue_stats_utilization() {
        let config = DispatchConfig {
            queue_capacity: 50,
            ..Default::default()
        };
        let queue = MultiLevelQueue::new(&config);
        for reel in 0..25u64 {
            queue.enqueue(task(Priority::Urgent, reel)).unwrap();
        }
        queue.enqueue(task(Priority::Low, 99)).unwrap();

        let stats = queue.stats();
        assert_eq!(stats.levels[0].len, 25);
        assert_eq!(stats.levels[3].len, 1);
        assert_eq!(stats.utilization, 0.5);
    }

    /// Backend that fails the first `fail_first` calls, then succeeds
    struct FlakyBackend {
        fail_first: u64,
        calls: AtomicU64,
    }

    impl PrefetchBackend for FlakyBackend {
        fn name(&self) -> &str {
            "flaky"
        }
        fn prefetch_chunk(
            &self,
            _reel_id: u64,
            _chunk_id: u32,
            _timeout: Duration,
        ) -> Result<(), SchedulerError> {
            if self.calls.fetch_add(1, Ordering::Relaxed) < self.fail_first {
                Err(SchedulerError::bridge_error("transient"))
            } else {
                Ok(())
            }
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

    fn wait_for(stats: &EngineStats, pred: impl Fn(u64, u64) -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            let snap = stats.snapshot();
            if pred(snap.tasks_succeeded, snap.tasks_failed) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_dispatch_loop_runs_tasks_to_completion() {
        let backend = Arc::new(FlakyBackend {
            fail_first: 0,
            calls: AtomicU64::new(0),
        });
        let router = Arc::new(BackendRouter::new(backend.clone(), backend.clone()));
        let stats = Arc::new(EngineStats::new());
        let (outcome_tx, outcome_rx) = crossbeam_channel::unbounded();
        let pool = Arc::new(WorkerPool::new(
            PoolConfig::default(),
            router,
            outcome_tx,
            Arc::clone(&stats),
        ));
        let config = DispatchConfig::default();
        let queue = Arc::new(MultiLevelQueue::new(&config));

        let mut dispatcher = PriorityDispatcher::spawn(
            Arc::clone(&queue),
            Arc::clone(&pool),
            Arc::clone(&stats),
            config,
            Duration::from_millis(10),
            outcome_rx,
        );

        for reel in 0..20u64 {
            queue.enqueue(task(Priority::High, reel)).unwrap();
        }

        assert!(wait_for(&stats, |succeeded, _| succeeded == 20));
        dispatcher.shutdown();
        pool.shutdown();
    }

    #[test]
    fn test_transient_failures_retry_to_success() {
        // First two attempts fail, the third succeeds; the task never
        // reaches terminal Failed
        let backend = Arc::new(FlakyBackend {
            fail_first: 2,
            calls: AtomicU64::new(0),
        });
        let router = Arc::new(BackendRouter::new(backend.clone(), backend.clone()));
        let stats = Arc::new(EngineStats::new());
        let (outcome_tx, outcome_rx) = crossbeam_channel::unbounded();
        let pool = Arc::new(WorkerPool::new(
            PoolConfig {
                initial_workers: 2,
                min_workers: 2,
                max_workers: 2,
                ..Default::default()
            },
            router,
            outcome_tx,
            Arc::clone(&stats),
        ));
        let config = DispatchConfig::default();
        let queue = Arc::new(MultiLevelQueue::new(&config));

        let mut dispatcher = PriorityDispatcher::spawn(
            Arc::clone(&queue),
            Arc::clone(&pool),
            Arc::clone(&stats),
            config,
            Duration::from_millis(5),
            outcome_rx,
        );

        queue.enqueue(task(Priority::High, 7)).unwrap();

        assert!(wait_for(&stats, |succeeded, failed| succeeded == 1
            && failed == 0));
        dispatcher.shutdown();
        pool.shutdown();
    }
}
