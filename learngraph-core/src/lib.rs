//! Learngraph Core
//!
//! Versioned knowledge graph of developer "learnings": code patterns,
//! corrections, conventions, decisions, feedback and session summaries.
//!
//! ## Features
//!
//! - **Typed node store** - One partition per node type, with by-file, by-symbol and by-time indices
//! - **Git-like history** - Content-addressed deltas, a head pointer, commit and rollback
//! - **Relevance ranking** - `weight / (1 + age_days)` scoring with graph-neighbourhood expansion
//! - **Debounced persistence** - JSON documents cached in memory and flushed after a quiet period
//!
//! ## Example
//!
//! ```ignore
//! use learngraph_core::{GraphConfig, KnowledgeGraph, LearnEvent, QueryOptions};
//! use serde_json::json;
//!
//! let graph = KnowledgeGraph::open(&project_root, GraphConfig::default())?;
//!
//! let event = LearnEvent::new("code_corrected", json!({
//!     "original": "value.unwrap()",
//!     "corrected": "value?",
//! }))
//! .with_file("src/api.rs");
//! graph.learn(&event)?;
//!
//! let result = graph.query(&QueryOptions::new().file("src/api.rs").depth(1));
//! graph.shutdown()?;
//! ```

pub mod clock;
pub mod config;
pub mod delta;
pub mod engine;
pub mod error;
pub mod export;
pub mod graph;
pub mod hash;
pub mod index;
pub mod learner;
pub mod meta;
pub mod node;
pub mod prune;
pub mod query;
pub mod storage;
pub mod store;

/// Seconds in one day, used for age computations
pub const SECS_PER_DAY: i64 = 86_400;

// Re-exports for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::GraphConfig;
pub use delta::{Change, ChangeOp, Delta, DeltaMetadata, Trigger};
pub use engine::KnowledgeGraph;
pub use error::{GraphError, Result};
pub use export::GraphSnapshot;
pub use graph::{Direction, Edge, EdgeProperties, RelationType};
pub use index::{IndexKind, Indices};
pub use learner::{LearnEvent, Learner, LearnerRegistry};
pub use meta::{GraphStats, ProjectMeta, SCHEMA_VERSION};
pub use node::{
    NewNode, NewNodeBuilder, Node, NodeBuilderError, NodeContent, NodeContext, NodeSource,
    NodeType, NodeUpdate,
};
pub use query::{QueryOptions, QueryResult, RankedNode};
pub use storage::Storage;
pub use store::GraphStore;
