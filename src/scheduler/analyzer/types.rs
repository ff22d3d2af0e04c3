//! Behavior classification types

use serde::{Deserialize, Serialize};

/// The closed set of behavior archetypes.
///
/// Declaration order doubles as tie-break precedence: when two archetypes
/// score identically, the one declared first wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Archetype {
    FastScroller,
    BingeWatcher,
    SlowViewer,
    CasualBrowser,
    NormalViewer,
}

impl Archetype {
    /// All archetypes in tie-break precedence order
    pub const ALL: [Archetype; 5] = [
        Archetype::FastScroller,
        Archetype::BingeWatcher,
        Archetype::SlowViewer,
        Archetype::CasualBrowser,
        Archetype::NormalViewer,
    ];
}

impl std::fmt::Display for Archetype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Archetype::FastScroller => "fast_scroller",
            Archetype::BingeWatcher => "binge_watcher",
            Archetype::SlowViewer => "slow_viewer",
            Archetype::CasualBrowser => "casual_browser",
            Archetype::NormalViewer => "normal_viewer",
        };
        write!(f, "{}", name)
    }
}

/// Scalar metrics derived from the scroll window
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScrollMetrics {
    pub avg_speed: f64,
    pub peak_speed: f64,
    pub variance: f64,
    /// Fraction of scrolls in the forward direction
    pub direction_ratio: f64,
    /// 1.0 = perfectly even speeds, 0.0 = wildly uneven
    pub consistency: f64,
    pub total_scrolls: u64,
}

/// Scalar metrics derived from the watch window
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WatchMetrics {
    pub avg_watch_secs: f64,
    pub completion_rate: f64,
    /// avg_watch_secs * completion_rate
    pub engagement_score: f64,
}

/// Derived classification of one user's recent behavior.
///
/// Always a fresh pure function of a session snapshot; confidence and
/// prefetch count are never set directly by callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorProfile {
    pub archetype: Archetype,
    pub scroll: ScrollMetrics,
    pub watch: WatchMetrics,
    pub interaction_count: usize,
    /// Classification confidence in [0, 1]
    pub confidence: f64,
    /// Recommended reels to prefetch ahead, in [1, 10]
    pub prefetch_count: u32,
    pub last_updated_ns: u64,
}
