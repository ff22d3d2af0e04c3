//! Reelflow prelude - convenient imports for users

// Re-export the public API
pub use crate::engine::{PrefetchEngine, PrefetchEngineBuilder};

// Re-export essential error types that users might need
pub use crate::scheduler::error::SchedulerError;

// Backend trait that embedders implement, plus the routing/health surface
pub use crate::scheduler::bridge::{BackendRouter, BridgeHealth, PrefetchBackend};

// Configuration sections
pub use crate::scheduler::config::{
    AdaptiveConfig, AnalyzerConfig, DispatchConfig, PoolConfig, PredictionConfig, SchedulerConfig,
    TrackerConfig,
};

// Behavior and prediction types
pub use crate::scheduler::analyzer::{Archetype, BehaviorProfile, ScrollMetrics, WatchMetrics};
pub use crate::scheduler::events::{Direction, InteractionKind};
pub use crate::scheduler::prediction::PredictionStats;

// Dispatch and stats types surfaced by the engine
pub use crate::scheduler::dispatch::{Priority, QueueStats, TaskState};
pub use crate::scheduler::pool::WorkerStatsSnapshot;
pub use crate::scheduler::stats::EngineStatsSnapshot;
pub use crate::scheduler::tracker::{SessionSnapshot, SessionStats};

// Re-export serde traits that users' payload types need
pub use serde::{Deserialize, Serialize};
