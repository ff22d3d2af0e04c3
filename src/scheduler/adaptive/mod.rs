//! Adaptive control loop
//!
//! A slow tick (seconds, not the dispatcher's milliseconds) that observes
//! throughput, queue pressure, worker success, and backend cache efficiency,
//! and applies at most one bounded step per dimension per tick: worker count
//! up or down by one, queue capacity up or down by one step, and the network
//! aggressiveness multiplier up or down by one step. Every knob saturates at
//! its configured bound, so the loop cannot run away.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, bounded, select, tick};
use crossbeam_utils::atomic::AtomicCell;

use crate::scheduler::bridge::BackendRouter;
use crate::scheduler::config::AdaptiveConfig;
use crate::scheduler::dispatch::MultiLevelQueue;
use crate::scheduler::pool::WorkerPool;
use crate::scheduler::stats::EngineStats;

/// One tick's observations
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlInputs {
    /// Successful tasks per second over the last interval
    pub throughput_per_sec: f64,
    /// Highest fill fraction across the priority queues
    pub queue_utilization: f64,
    /// Pool-wide attempt success fraction
    pub worker_success: f64,
    /// Primary backend cache-hit ratio, neutral 0.5 when unknown
    pub backend_efficiency: f64,
}

/// One tick's adjustments, each a single bounded step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlDecision {
    pub score: f64,
    pub worker_delta: i32,
    pub queue_capacity_delta: i64,
    pub multiplier_delta: f64,
}

/// Composite performance score in [0, 1]:
/// throughput 50%, queue headroom 30%, worker success 20%.
pub fn performance_score(config: &AdaptiveConfig, inputs: &ControlInputs) -> f64 {
    let throughput_score = (inputs.throughput_per_sec / config.target_throughput).min(1.0);
    throughput_score * 0.5
        + (1.0 - inputs.queue_utilization.clamp(0.0, 1.0)) * 0.3
        + inputs.worker_success.clamp(0.0, 1.0) * 0.2
}

/// Map one tick's observations to the step each knob should take.
/// Pure, so the rules are testable without threads.
pub fn decide(config: &AdaptiveConfig, inputs: &ControlInputs) -> ControlDecision {
    let score = performance_score(config, inputs);

    let worker_delta = if score > config.grow_threshold {
        1
    } else if score < config.shrink_threshold {
        -1
    } else {
        0
    };

    let queue_capacity_delta = if inputs.queue_utilization > config.queue_grow_utilization {
        config.queue_capacity_step as i64
    } else if inputs.queue_utilization < config.queue_shrink_utilization {
        -(config.queue_capacity_step as i64)
    } else {
        0
    };

    let multiplier_delta = if inputs.backend_efficiency > config.efficiency_high {
        config.network_multiplier_step
    } else if inputs.backend_efficiency < config.efficiency_low {
        -config.network_multiplier_step
    } else {
        0.0
    };

    ControlDecision {
        score,
        worker_delta,
        queue_capacity_delta,
        multiplier_delta,
    }
}

/// Background controller handle
pub struct AdaptiveController {
    quit_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl AdaptiveController {
    pub fn spawn(
        config: AdaptiveConfig,
        queue: Arc<MultiLevelQueue>,
        pool: Arc<WorkerPool>,
        router: Arc<BackendRouter>,
        stats: Arc<EngineStats>,
        multiplier: Arc<AtomicCell<f64>>,
    ) -> Self {
        let (quit_tx, quit_rx) = bounded::<()>(1);
        let handle = std::thread::spawn(move || {
            control_loop(config, queue, pool, router, stats, multiplier, quit_rx);
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

impl Drop for AdaptiveController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn control_loop(
    config: AdaptiveConfig,
    queue: Arc<MultiLevelQueue>,
    pool: Arc<WorkerPool>,
    router: Arc<BackendRouter>,
    stats: Arc<EngineStats>,
    multiplier: Arc<AtomicCell<f64>>,
    quit_rx: Receiver<()>,
) {
    let ticker = tick(config.control_interval);
    let interval_secs = config.control_interval.as_secs_f64();
    let mut last_succeeded = stats.snapshot().tasks_succeeded;

    loop {
        select! {
            recv(ticker) -> _ => {
                let succeeded = stats.snapshot().tasks_succeeded;
                let inputs = ControlInputs {
                    throughput_per_sec: succeeded.saturating_sub(last_succeeded) as f64
                        / interval_secs,
                    queue_utilization: queue.utilization(),
                    worker_success: pool.success_ratio(),
                    backend_efficiency: router.cache_efficiency(),
                };
                last_succeeded = succeeded;

                let decision = decide(&config, &inputs);
                apply(&config, &decision, &queue, &pool, &multiplier);
            }
            recv(quit_rx) -> _ => break,
        }
    }
}

fn apply(
    config: &AdaptiveConfig,
    decision: &ControlDecision,
    queue: &MultiLevelQueue,
    pool: &WorkerPool,
    multiplier: &AtomicCell<f64>,
) {
    if decision.worker_delta != 0 {
        let current = pool.worker_count();
        let target = current.saturating_add_signed(decision.worker_delta as isize);
        pool.scale_to(target);
        if pool.worker_count() != current {
            log::info!(
                "scaled workers {} -> {} (score {:.2})",
                current,
                pool.worker_count(),
                decision.score
            );
        }
    }

    if decision.queue_capacity_delta != 0 {
        let current = queue.capacity() as i64;
        let applied = queue.set_capacity((current + decision.queue_capacity_delta).max(0) as usize);
        if applied != current as usize {
            log::info!("resized queue capacity {} -> {}", current, applied);
        }
    }

    if decision.multiplier_delta != 0.0 {
        let current = multiplier.load();
        let next = (current + decision.multiplier_delta)
            .clamp(config.min_network_multiplier, config.max_network_multiplier);
        if next != current {
            multiplier.store(next);
            log::info!("network multiplier {:.2} -> {:.2}", current, next);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> ControlInputs {
        ControlInputs {
            throughput_per_sec: 25.0,
            queue_utilization: 0.5,
            worker_success: 1.0,
            backend_efficiency: 0.6,
        }
    }

    #[test]
    fn test_high_score_grows_pool() {
        let config = AdaptiveConfig::default();
        let decision = decide(
            &config,
            &ControlInputs {
                throughput_per_sec: 100.0,
                queue_utilization: 0.1,
                worker_success: 1.0,
                backend_efficiency: 0.6,
            },
        );
        // 0.5 + 0.9 * 0.3 + 0.2 = 0.97
        assert!(decision.score > config.grow_threshold);
        assert_eq!(decision.worker_delta, 1);
    }

    #[test]
    fn test_low_score_shrinks_pool() {
        let config = AdaptiveConfig::default();
        let decision = decide(
            &config,
            &ControlInputs {
                throughput_per_sec: 0.0,
                queue_utilization: 1.0,
                worker_success: 0.5,
                backend_efficiency: 0.6,
            },
        );
        assert!(decision.score < config.shrink_threshold);
        assert_eq!(decision.worker_delta, -1);
    }

    #[test]
    fn test_mid_score_holds_pool() {
        let config = AdaptiveConfig::default();
        let decision = decide(&config, &inputs());
        assert_eq!(decision.worker_delta, 0);
    }

    #[test]
    fn test_queue_pressure_steps_capacity() {
        let config = AdaptiveConfig::default();

        let grow = decide(
            &config,
            &ControlInputs {
                queue_utilization: 0.9,
                ..inputs()
            },
        );
        assert_eq!(grow.queue_capacity_delta, config.queue_capacity_step as i64);

        let shrink = decide(
            &config,
            &ControlInputs {
                queue_utilization: 0.1,
                ..inputs()
            },
        );
        assert_eq!(
            shrink.queue_capacity_delta,
            -(config.queue_capacity_step as i64)
        );
    }

    #[test]
    fn test_efficiency_steps_multiplier() {
        let config = AdaptiveConfig::default();

        let up = decide(
            &config,
            &ControlInputs {
                backend_efficiency: 0.9,
                ..inputs()
            },
        );
        assert_eq!(up.multiplier_delta, config.network_multiplier_step);

        let down = decide(
            &config,
            &ControlInputs {
                backend_efficiency: 0.2,
                ..inputs()
            },
        );
        assert_eq!(down.multiplier_delta, -config.network_multiplier_step);
    }

    #[test]
    fn test_score_stays_in_unit_interval() {
        let config = AdaptiveConfig::default();
        for throughput in [0.0, 10.0, 1000.0] {
            for utilization in [0.0, 0.5, 1.0] {
                for success in [0.0, 0.7, 1.0] {
                    let score = performance_score(
                        &config,
                        &ControlInputs {
                            throughput_per_sec: throughput,
                            queue_utilization: utilization,
                            worker_success: success,
                            backend_efficiency: 0.5,
                        },
                    );
                    assert!((0.0..=1.0).contains(&score));
                }
            }
        }
    }
}
