//! Full-state export and import
//!
//! A snapshot carries every node, edge and delta plus the project metadata.
//! Import replaces the whole graph and is all-or-nothing: the snapshot is
//! fully validated before anything is written.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

use crate::delta::Delta;
use crate::error::{GraphError, Result};
use crate::graph::{Edge, EdgeSet};
use crate::hash;
use crate::meta::{GraphStats, ProjectMeta, SCHEMA_VERSION};
use crate::node::{Node, NodeType};
use crate::store::{GraphStore, Partition};

/// Serialized form of an entire graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub schema_version: String,
    pub exported_at: i64,
    pub meta: ProjectMeta,
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Every delta in commit order
    #[serde(default)]
    pub deltas: Vec<Delta>,
}

impl GraphStore {
    pub fn export(&self) -> GraphSnapshot {
        let deltas = self
            .delta_hashes()
            .iter()
            .filter_map(|hash| self.get_delta(hash))
            .collect();

        GraphSnapshot {
            schema_version: SCHEMA_VERSION.to_string(),
            exported_at: self.clock.now(),
            meta: self.meta.clone(),
            nodes: self.nodes(&[]).into_iter().cloned().collect(),
            edges: self.edges.records.values().cloned().collect(),
            deltas,
        }
    }

    /// Replace the graph with an exported snapshot
    ///
    /// Rejects snapshots from another schema version with
    /// [`GraphError::SchemaMismatch`]. Pending changes are discarded.
    pub fn import(&mut self, data: Value) -> Result<GraphStats> {
        let found = data
            .get("schema_version")
            .and_then(Value::as_str)
            .unwrap_or("<missing>");
        if found != SCHEMA_VERSION {
            return Err(GraphError::schema_mismatch(SCHEMA_VERSION, found));
        }

        let snapshot: GraphSnapshot = serde_json::from_value(data)?;
        let partitions = validate_nodes(&snapshot.nodes)?;
        validate_deltas(&snapshot)?;

        let known = |id: &str| {
            NodeType::from_node_id(id)
                .and_then(|t| partitions.get(&t))
                .map_or(false, |p| p.contains_key(id))
        };
        let mut edges = EdgeSet::default();
        for edge in snapshot.edges {
            if known(&edge.source) && known(&edge.target) {
                edges.insert(edge);
            } else {
                log::warn!("Dropping dangling edge {} on import", edge.id);
            }
        }

        // Validation done; everything below replaces the current state
        let node_count = snapshot.nodes.len() as u64;
        self.partitions = partitions;
        for node_type in NodeType::ALL {
            self.persist_partition(node_type)?;
        }

        self.edges = edges;
        self.edges.persist(&self.storage)?;

        let hashes: Vec<String> = snapshot.deltas.iter().map(|d| d.hash.clone()).collect();
        for delta in &snapshot.deltas {
            self.write_delta(delta)?;
        }
        self.write_delta_index(&hashes)?;

        let now = self.clock.now();
        self.meta = ProjectMeta {
            schema_version: SCHEMA_VERSION.to_string(),
            head: snapshot.meta.head,
            node_count,
            edge_count: self.edges.records.len() as u64,
            delta_count: hashes.len() as u64,
            created: if snapshot.meta.created > 0 {
                snapshot.meta.created
            } else {
                now
            },
            updated: now,
        };
        self.persist_meta(true)?;

        self.pending.clear();
        self.rebuild_indices()?;
        self.storage.flush_all()?;

        log::info!(
            "Imported {} nodes, {} edges, {} deltas",
            self.meta.node_count,
            self.meta.edge_count,
            self.meta.delta_count
        );
        Ok(self.stats())
    }
}

/// Group nodes into partitions, rejecting misfiled or duplicate IDs
fn validate_nodes(nodes: &[Node]) -> Result<BTreeMap<NodeType, Partition>> {
    let mut partitions: BTreeMap<NodeType, Partition> =
        NodeType::ALL.into_iter().map(|t| (t, Partition::new())).collect();

    for node in nodes {
        if NodeType::from_node_id(&node.id) != Some(node.node_type) {
            return Err(GraphError::invalid_input(format!(
                "node {} does not belong to partition {}",
                node.id,
                node.node_type.partition()
            )));
        }
        let weight = node.scores.weight;
        let success = node.scores.success_rate;
        if !(0.0..=1.0).contains(&weight) || !(0.0..=1.0).contains(&success) {
            return Err(GraphError::invalid_input(format!(
                "node {} has scores out of range",
                node.id
            )));
        }

        let partition = partitions.entry(node.node_type).or_default();
        if partition.insert(node.id.clone(), node.clone()).is_some() {
            return Err(GraphError::invalid_input(format!(
                "duplicate node id {}",
                node.id
            )));
        }
    }
    Ok(partitions)
}

/// Check delta hashes and that head points at one of them
fn validate_deltas(snapshot: &GraphSnapshot) -> Result<()> {
    let mut hashes = HashSet::new();
    for delta in &snapshot.deltas {
        let parent_ok = delta.parent.as_deref().map_or(true, hash::is_digest);
        if !hash::is_digest(&delta.hash) || !parent_ok {
            return Err(GraphError::invalid_input(format!(
                "malformed delta hash {:?}",
                delta.hash
            )));
        }
        if !hashes.insert(delta.hash.as_str()) {
            return Err(GraphError::invalid_input(format!(
                "duplicate delta {}",
                delta.hash
            )));
        }
    }
    match snapshot.meta.head.as_deref() {
        Some(head) if !hashes.contains(head) => Err(GraphError::invalid_input(format!(
            "head {} is not among the exported deltas",
            head
        ))),
        _ => Ok(()),
    }
}
