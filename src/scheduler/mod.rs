//! Adaptive prefetch scheduling internals
//!
//! Pipeline: tracker ingests behavior events into per-user sessions, the
//! analyzer classifies session windows into archetypes, the prediction cache
//! holds confidence-scored profiles under a TTL, the dispatcher drains four
//! priority queues into the worker pool, workers drive the decode backends
//! through the bridge, and the adaptive controller re-tunes pool size, queue
//! capacity, and prefetch aggressiveness from observed performance.

pub mod adaptive;
pub mod analyzer;
pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod pool;
pub mod prediction;
pub mod stats;
pub mod tracker;
