//! Scheduler configuration
//!
//! Every numeric threshold in the classification and adaptation heuristics is
//! deliberately a tunable here rather than a hard-coded constant. Validation
//! happens at the setter boundary: an invalid value is rejected and the prior
//! configuration is retained.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::SchedulerError;

/// Behavior tracker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    pub enable_scroll_tracking: bool,
    pub enable_watch_tracking: bool,
    pub enable_interaction_tracking: bool,
    /// Bounded intake queue between recording calls and the drain loop
    pub event_buffer_size: usize,
    /// How long a recording call may wait for queue space before dropping
    pub enqueue_timeout: Duration,
    /// Events applied per drain tick
    pub drain_batch_size: usize,
    pub drain_interval: Duration,
    /// Session ring buffer capacities
    pub max_scroll_events: usize,
    pub max_watch_events: usize,
    pub max_interactions: usize,
    /// Sessions idle longer than this are evicted by the sweep
    pub session_timeout: Duration,
    pub sweep_interval: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            enable_scroll_tracking: true,
            enable_watch_tracking: true,
            enable_interaction_tracking: true,
            event_buffer_size: 1000,
            enqueue_timeout: Duration::from_millis(100),
            drain_batch_size: 100,
            drain_interval: Duration::from_millis(50),
            max_scroll_events: 100,
            max_watch_events: 100,
            max_interactions: 50,
            session_timeout: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.event_buffer_size == 0 {
            return Err(SchedulerError::invalid_config(
                "event_buffer_size cannot be zero",
            ));
        }
        if self.drain_batch_size == 0 {
            return Err(SchedulerError::invalid_config(
                "drain_batch_size cannot be zero",
            ));
        }
        if self.max_scroll_events == 0 || self.max_watch_events == 0 || self.max_interactions == 0 {
            return Err(SchedulerError::invalid_config(
                "session ring buffer capacities cannot be zero",
            ));
        }
        if self.session_timeout.is_zero() {
            return Err(SchedulerError::invalid_config(
                "session_timeout cannot be zero",
            ));
        }
        Ok(())
    }
}

/// Behavior analyzer thresholds
///
/// The archetype scoring rules and confidence scaling are heuristics; the
/// shape (bounded, monotone) is fixed but the break points are configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Below this many combined events the session classifies as the default
    pub min_samples: usize,
    /// Sample count below which confidence is capped at 0.5
    pub small_sample_threshold: usize,
    /// Sample count at which the sample-size factor reaches 1.0
    pub full_sample_threshold: usize,
    /// Reels per second above which scrolling is "fast"
    pub fast_scroll_speed: f64,
    /// Reels per second below which scrolling is "slow"
    pub slow_scroll_speed: f64,
    /// Seconds above which an average watch is "long"
    pub long_watch_secs: f64,
    /// Seconds below which an average watch is "short"
    pub short_watch_secs: f64,
    /// Completion rate at or above which viewing counts as high-completion
    pub high_completion_rate: f64,
    /// Archetype -> recommended prefetch count lookup, clamped to [1, 10]
    pub prefetch_fast_scroller: u32,
    pub prefetch_binge_watcher: u32,
    pub prefetch_slow_viewer: u32,
    pub prefetch_casual_browser: u32,
    pub prefetch_normal_viewer: u32,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            min_samples: 3,
            small_sample_threshold: 10,
            full_sample_threshold: 100,
            fast_scroll_speed: 5.0,
            slow_scroll_speed: 0.5,
            long_watch_secs: 30.0,
            short_watch_secs: 5.0,
            high_completion_rate: 0.8,
            prefetch_fast_scroller: 5,
            prefetch_binge_watcher: 8,
            prefetch_slow_viewer: 2,
            prefetch_casual_browser: 2,
            prefetch_normal_viewer: 3,
        }
    }
}

impl AnalyzerConfig {
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.small_sample_threshold >= self.full_sample_threshold {
            return Err(SchedulerError::invalid_config(
                "small_sample_threshold must be below full_sample_threshold",
            ));
        }
        if self.slow_scroll_speed >= self.fast_scroll_speed {
            return Err(SchedulerError::invalid_config(
                "slow_scroll_speed must be below fast_scroll_speed",
            ));
        }
        if self.short_watch_secs >= self.long_watch_secs {
            return Err(SchedulerError::invalid_config(
                "short_watch_secs must be below long_watch_secs",
            ));
        }
        if !(0.0..=1.0).contains(&self.high_completion_rate) {
            return Err(SchedulerError::invalid_config(
                "high_completion_rate must be in [0, 1]",
            ));
        }
        for count in [
            self.prefetch_fast_scroller,
            self.prefetch_binge_watcher,
            self.prefetch_slow_viewer,
            self.prefetch_casual_browser,
            self.prefetch_normal_viewer,
        ] {
            if !(1..=10).contains(&count) {
                return Err(SchedulerError::invalid_config(
                    "prefetch counts must be in [1, 10]",
                ));
            }
        }
        Ok(())
    }
}

/// Prediction cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionConfig {
    /// Bounded cache size; oldest-created entry evicted when full
    pub max_entries: usize,
    /// TTL of a cached prediction
    pub prediction_window: Duration,
    /// How far a single hit or outcome nudges cached confidence
    pub confidence_step: f64,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            max_entries: 100,
            prediction_window: Duration::from_secs(30),
            confidence_step: 0.1,
        }
    }
}

impl PredictionConfig {
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.max_entries == 0 {
            return Err(SchedulerError::invalid_config("max_entries cannot be zero"));
        }
        if !(0.0..=1.0).contains(&self.confidence_step) {
            return Err(SchedulerError::invalid_config(
                "confidence_step must be in [0, 1]",
            ));
        }
        Ok(())
    }
}

/// Priority dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Per-level queue capacity at startup
    pub queue_capacity: usize,
    /// Bounds the adaptive controller must respect when resizing queues
    pub min_queue_capacity: usize,
    pub max_queue_capacity: usize,
    /// Dispatch loop tick
    pub tick_interval: Duration,
    /// Delay before a task with no available worker is retried
    pub requeue_delay: Duration,
    /// Re-queue attempts before the task is dropped
    pub max_requeue_attempts: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            min_queue_capacity: 50,
            max_queue_capacity: 200,
            tick_interval: Duration::from_millis(10),
            requeue_delay: Duration::from_millis(100),
            max_requeue_attempts: 5,
        }
    }
}

impl DispatchConfig {
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.min_queue_capacity == 0 {
            return Err(SchedulerError::invalid_config(
                "min_queue_capacity cannot be zero",
            ));
        }
        if self.min_queue_capacity > self.max_queue_capacity {
            return Err(SchedulerError::invalid_config(
                "min_queue_capacity cannot exceed max_queue_capacity",
            ));
        }
        if !(self.min_queue_capacity..=self.max_queue_capacity).contains(&self.queue_capacity) {
            return Err(SchedulerError::invalid_config(
                "queue_capacity must be within [min_queue_capacity, max_queue_capacity]",
            ));
        }
        if self.tick_interval.is_zero() {
            return Err(SchedulerError::invalid_config(
                "tick_interval cannot be zero",
            ));
        }
        Ok(())
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub initial_workers: usize,
    /// Bounds the adaptive controller must respect when scaling
    pub min_workers: usize,
    pub max_workers: usize,
    /// Per-task backend call timeout
    pub task_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_workers: 4,
            min_workers: 2,
            max_workers: 16,
            task_timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_delay: Duration::from_millis(200),
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.min_workers == 0 {
            return Err(SchedulerError::invalid_config("min_workers cannot be zero"));
        }
        if self.min_workers > self.max_workers {
            return Err(SchedulerError::invalid_config(
                "min_workers cannot exceed max_workers",
            ));
        }
        if !(self.min_workers..=self.max_workers).contains(&self.initial_workers) {
            return Err(SchedulerError::invalid_config(
                "initial_workers must be within [min_workers, max_workers]",
            ));
        }
        if self.task_timeout.is_zero() {
            return Err(SchedulerError::invalid_config("task_timeout cannot be zero"));
        }
        Ok(())
    }
}

/// Adaptive controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveConfig {
    pub enabled: bool,
    /// Control loop tick, much slower than the dispatch tick
    pub control_interval: Duration,
    /// Successful tasks per second at which throughput scores 1.0
    pub target_throughput: f64,
    /// Performance score above which the pool grows by one worker
    pub grow_threshold: f64,
    /// Performance score below which the pool shrinks by one worker
    pub shrink_threshold: f64,
    /// Queue utilization above which queue capacity grows
    pub queue_grow_utilization: f64,
    /// Queue utilization below which queue capacity shrinks
    pub queue_shrink_utilization: f64,
    /// Queue capacity adjustment per tick
    pub queue_capacity_step: usize,
    /// Network-aggressiveness multiplier bounds and step
    pub min_network_multiplier: f64,
    pub max_network_multiplier: f64,
    pub network_multiplier_step: f64,
    /// Backend efficiency break points for multiplier adjustment
    pub efficiency_high: f64,
    pub efficiency_low: f64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            control_interval: Duration::from_secs(2),
            target_throughput: 50.0,
            grow_threshold: 0.8,
            shrink_threshold: 0.5,
            queue_grow_utilization: 0.8,
            queue_shrink_utilization: 0.3,
            queue_capacity_step: 20,
            min_network_multiplier: 1.0,
            max_network_multiplier: 2.0,
            network_multiplier_step: 0.25,
            efficiency_high: 0.8,
            efficiency_low: 0.5,
        }
    }
}

impl AdaptiveConfig {
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.shrink_threshold >= self.grow_threshold {
            return Err(SchedulerError::invalid_config(
                "shrink_threshold must be below grow_threshold",
            ));
        }
        if self.queue_shrink_utilization >= self.queue_grow_utilization {
            return Err(SchedulerError::invalid_config(
                "queue_shrink_utilization must be below queue_grow_utilization",
            ));
        }
        if self.min_network_multiplier > self.max_network_multiplier {
            return Err(SchedulerError::invalid_config(
                "min_network_multiplier cannot exceed max_network_multiplier",
            ));
        }
        if self.control_interval.is_zero() {
            return Err(SchedulerError::invalid_config(
                "control_interval cannot be zero",
            ));
        }
        if self.target_throughput <= 0.0 || !self.target_throughput.is_finite() {
            return Err(SchedulerError::invalid_config(
                "target_throughput must be positive and finite",
            ));
        }
        Ok(())
    }
}

/// Top-level scheduler configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub tracker: TrackerConfig,
    pub analyzer: AnalyzerConfig,
    pub prediction: PredictionConfig,
    pub dispatch: DispatchConfig,
    pub pool: PoolConfig,
    pub adaptive: AdaptiveConfig,
}

impl SchedulerConfig {
    /// Validate every section; used once at engine construction
    pub fn validate(&self) -> Result<(), SchedulerError> {
        self.tracker.validate()?;
        self.analyzer.validate()?;
        self.prediction.validate()?;
        self.dispatch.validate()?;
        self.pool.validate()?;
        self.adaptive.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(SchedulerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let mut config = PoolConfig::default();
        config.min_workers = 10;
        config.max_workers = 5;
        assert!(config.validate().is_err());

        let mut config = DispatchConfig::default();
        config.min_queue_capacity = 500;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_queue_floor_rejected() {
        // A zero floor would let capacity clamp to 0 and drop every task
        let mut config = DispatchConfig::default();
        config.min_queue_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_prefetch_count_bounds() {
        let mut config = AnalyzerConfig::default();
        config.prefetch_binge_watcher = 11;
        assert!(config.validate().is_err());
        config.prefetch_binge_watcher = 0;
        assert!(config.validate().is_err());
    }
}
