//! Graph configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for a knowledge graph instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Data directory created under the project root
    pub data_dir_name: String,
    /// Quiet period before a dirty document is written (default: 500ms)
    pub debounce_ms: u64,
    /// Pending changes that trigger an automatic commit (0 disables)
    pub auto_commit_threshold: usize,
    /// Weight given to new nodes unless overridden (default: 0.5)
    pub default_weight: f32,
    /// Maximum summary length in characters
    pub summary_max_len: usize,
    /// Usage count after which each use grants a weight bonus
    pub usage_bonus_after: u64,
    /// Weight bonus per use past `usage_bonus_after`
    pub usage_bonus: f32,
    /// Nodes below this weight are prune candidates
    pub prune_threshold: f32,
    /// Nodes unused for longer than this are prune candidates
    pub prune_unused_days: i64,
    /// Window for linking freshly learned nodes to recent ones (0 disables)
    pub temporal_link_window_secs: i64,
    /// Maximum temporal edges added per learned node
    pub temporal_link_max: usize,
    /// Result limit when a query does not set one
    pub default_query_limit: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            data_dir_name: ".learngraph".to_string(),
            debounce_ms: 500,
            auto_commit_threshold: 10,
            default_weight: 0.5,
            summary_max_len: 200,
            usage_bonus_after: 5,
            usage_bonus: 0.01,
            prune_threshold: 0.1,
            prune_unused_days: 90,
            temporal_link_window_secs: 1800,
            temporal_link_max: 5,
            default_query_limit: 20,
        }
    }
}

impl GraphConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}
