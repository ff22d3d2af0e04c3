//! Reelflow - adaptive prefetch scheduling for short-video feeds
//!
//! Watches how a user moves through a feed, classifies the behavior into an
//! archetype, and turns the resulting prediction into prioritized prefetch
//! work against pluggable decode backends.
//!
//! # Pipeline
//!
//! - **Behavior tracking**: bounded event intake, per-user session windows
//! - **Classification**: archetype scoring with confidence from margin,
//!   consistency, and sample size
//! - **Prediction cache**: TTL-bounded profiles that learn from outcomes
//! - **Priority dispatch**: four bounded FIFO queues drained highest-first
//! - **Worker pool**: scored worker selection, bounded retries, runtime scaling
//! - **Adaptive control**: self-tuning of pool size, queue capacity, and
//!   prefetch aggressiveness

pub mod engine;
pub mod prelude;

// Pipeline internals - config and trait types are public for embedders
pub mod scheduler;

// Re-export the public API at the crate root for convenience
pub use engine::{PrefetchEngine, PrefetchEngineBuilder};
pub use prelude::*;
