//! Project metadata document

use serde::{Deserialize, Serialize};

/// Version of the persisted layout; imports must match it exactly
pub const SCHEMA_VERSION: &str = "1.0";

/// Storage key of the metadata document
pub const META_KEY: &str = "meta";

/// Aggregate counters and the head pointer
///
/// Single source of truth for counts; updated together with the operation
/// that changes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectMeta {
    pub schema_version: String,
    /// Hash of the current delta, `None` before the first commit
    pub head: Option<String>,
    pub node_count: u64,
    pub edge_count: u64,
    pub delta_count: u64,
    pub created: i64,
    pub updated: i64,
}

impl Default for ProjectMeta {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            head: None,
            node_count: 0,
            edge_count: 0,
            delta_count: 0,
            created: 0,
            updated: 0,
        }
    }
}

/// Snapshot of the graph's counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub node_count: u64,
    pub edge_count: u64,
    pub delta_count: u64,
    pub head: Option<String>,
    pub pending_changes: usize,
}
