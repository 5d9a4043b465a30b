//! Node store
//!
//! Typed CRUD over knowledge nodes, partitioned by node type. Partitions,
//! indices, edges and metadata are held as typed views over [`Storage`] and
//! written back through it after every mutation.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::clock::Clock;
use crate::config::GraphConfig;
use crate::delta::Change;
use crate::error::Result;
use crate::graph::EdgeSet;
use crate::hash;
use crate::index::Indices;
use crate::meta::{GraphStats, ProjectMeta, META_KEY};
use crate::node::{
    truncate_summary, NewNode, Node, NodeContent, NodeMeta, NodeScores, NodeTimestamps,
    NodeType, NodeUpdate,
};
use crate::query::QueryOptions;
use crate::storage::Storage;

/// Nodes of one type, keyed by ID
pub type Partition = BTreeMap<String, Node>;

/// Versioned knowledge-graph store for one project
pub struct GraphStore {
    pub(crate) storage: Storage,
    pub(crate) config: GraphConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) meta: ProjectMeta,
    pub(crate) partitions: BTreeMap<NodeType, Partition>,
    pub(crate) indices: Indices,
    pub(crate) edges: EdgeSet,
    pub(crate) pending: Vec<Change>,
}

impl GraphStore {
    /// Open (or create) the store in `data_dir`
    pub fn open(
        data_dir: impl AsRef<Path>,
        config: GraphConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let storage = Storage::open(data_dir, config.debounce())?;

        let mut store = Self {
            meta: ProjectMeta::default(),
            partitions: BTreeMap::new(),
            indices: Indices::default(),
            edges: EdgeSet::default(),
            pending: Vec::new(),
            storage,
            config,
            clock,
        };
        store.load_documents()?;

        log::info!(
            "GraphStore opened at {} ({} nodes, {} edges, {} deltas)",
            store.storage.root().display(),
            store.meta.node_count,
            store.meta.edge_count,
            store.meta.delta_count
        );
        Ok(store)
    }

    /// Populate the typed views from storage
    pub(crate) fn load_documents(&mut self) -> Result<()> {
        let fresh = self.storage.load(META_KEY).is_null();
        self.meta = self.storage.load_as(META_KEY);
        if fresh {
            let now = self.clock.now();
            self.meta.created = now;
            self.meta.updated = now;
            self.persist_meta(true)?;
        }

        self.partitions = NodeType::ALL
            .into_iter()
            .map(|t| (t, self.storage.load_as::<Partition>(&t.storage_key())))
            .collect();
        self.edges = EdgeSet::load(&self.storage);
        self.indices = Indices::load(&self.storage);

        // Index documents may lag the partitions after an interrupted flush
        let expected = Indices::build(self.partitions.values().flat_map(|p| p.values()));
        if !self.indices.same_entries(&expected) {
            log::warn!("Indices out of sync with stored nodes, rebuilding");
            self.rebuild_indices()?;
        }
        Ok(())
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn now(&self) -> i64 {
        self.clock.now()
    }

    pub fn meta(&self) -> &ProjectMeta {
        &self.meta
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            node_count: self.meta.node_count,
            edge_count: self.meta.edge_count,
            delta_count: self.meta.delta_count,
            head: self.meta.head.clone(),
            pending_changes: self.pending.len(),
        }
    }

    pub(crate) fn persist_meta(&mut self, immediate: bool) -> Result<()> {
        self.meta.updated = self.clock.now();
        self.storage.save_as(META_KEY, &self.meta, immediate)
    }

    pub(crate) fn persist_partition(&self, node_type: NodeType) -> Result<()> {
        let empty = Partition::new();
        let partition = self.partitions.get(&node_type).unwrap_or(&empty);
        self.storage
            .save_as(&node_type.storage_key(), partition, false)
    }

    /// Create a node from `params`
    pub fn create(&mut self, params: NewNode) -> Result<Node> {
        let now = self.clock.now();
        let summary = truncate_summary(&params.content.summary, self.config.summary_max_len);
        let content = NodeContent {
            summary,
            ..params.content
        };
        let weight = params
            .weight
            .unwrap_or(self.config.default_weight)
            .clamp(0.0, 1.0);

        let node = Node {
            id: hash::node_id(params.node_type, Some(&content.summary), now),
            node_type: params.node_type,
            content_hash: hash::content_hash(&content.summary, &content.detail),
            content,
            context: params.context,
            scores: NodeScores {
                weight,
                usage_count: 0,
                success_rate: 1.0,
            },
            timestamps: NodeTimestamps {
                created: now,
                updated: now,
                last_used: now,
            },
            meta: NodeMeta {
                source: params.source,
                version: 1,
            },
        };

        self.partitions
            .entry(node.node_type)
            .or_default()
            .insert(node.id.clone(), node.clone());
        self.persist_partition(node.node_type)?;

        self.meta.node_count += 1;
        self.persist_meta(false)?;

        self.indices.add(&node);
        self.indices.persist(&self.storage)?;

        self.record_change(Change::add(node_path(&node), &node.content_hash));
        log::debug!("Created node {} ({})", node.id, node.node_type);
        Ok(node)
    }

    /// Look up a node; the partition is resolved from the ID's type token
    pub fn get(&self, id: &str) -> Option<Node> {
        self.get_ref(id).cloned()
    }

    pub(crate) fn get_ref(&self, id: &str) -> Option<&Node> {
        let node_type = NodeType::from_node_id(id)?;
        self.partitions.get(&node_type)?.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get_ref(id).is_some()
    }

    /// Merge `update` into a node
    pub fn update(&mut self, id: &str, update: NodeUpdate) -> Result<Option<Node>> {
        let Some(before) = self.get(id) else {
            return Ok(None);
        };

        let mut after = before.clone();
        let context_changed = update.apply(&mut after, self.config.summary_max_len);
        self.replace(&before, after, context_changed).map(Some)
    }

    /// Persist a modified node, bumping version and recording a `modify` change
    fn replace(&mut self, before: &Node, mut after: Node, context_changed: bool) -> Result<Node> {
        after.content_hash = hash::content_hash(&after.content.summary, &after.content.detail);
        after.meta.version = before.meta.version + 1;
        after.timestamps.updated = self.clock.now();

        self.partitions
            .entry(after.node_type)
            .or_default()
            .insert(after.id.clone(), after.clone());
        self.persist_partition(after.node_type)?;

        if context_changed {
            self.indices.reindex_context(before, &after);
            self.indices.persist(&self.storage)?;
        }

        self.record_change(Change::modify(
            node_path(&after),
            &before.content_hash,
            &after.content_hash,
        ));
        Ok(after)
    }

    /// Delete a node; returns false for unknown IDs
    pub fn delete(&mut self, id: &str) -> Result<bool> {
        let Some(node_type) = NodeType::from_node_id(id) else {
            return Ok(false);
        };
        let Some(node) = self
            .partitions
            .get_mut(&node_type)
            .and_then(|p| p.remove(id))
        else {
            return Ok(false);
        };
        self.persist_partition(node_type)?;

        self.meta.node_count = self.meta.node_count.saturating_sub(1);
        self.indices.remove(&node);
        self.indices.persist(&self.storage)?;
        self.remove_node_edges(id)?;
        self.persist_meta(false)?;

        self.record_change(Change::delete(node_path(&node), &node.content_hash));
        log::debug!("Deleted node {}", id);
        Ok(true)
    }

    /// Filter and rank nodes
    pub fn find(&self, criteria: &QueryOptions) -> Vec<Node> {
        self.rank(criteria)
            .0
            .into_iter()
            .map(|ranked| ranked.node)
            .collect()
    }

    /// Record that a node was used, optionally with an outcome
    ///
    /// Usage is telemetry: it is persisted but never delta tracked.
    pub fn record_usage(&mut self, id: &str, success: Option<bool>) -> Result<Option<Node>> {
        let now = self.clock.now();
        let bonus_after = self.config.usage_bonus_after;
        let bonus = self.config.usage_bonus;

        let Some(node_type) = NodeType::from_node_id(id) else {
            return Ok(None);
        };
        let Some(node) = self
            .partitions
            .get_mut(&node_type)
            .and_then(|p| p.get_mut(id))
        else {
            return Ok(None);
        };

        let scores = &mut node.scores;
        scores.usage_count += 1;
        if let Some(success) = success {
            let n = scores.usage_count as f32;
            let outcome = if success { 1.0 } else { 0.0 };
            scores.success_rate =
                ((scores.success_rate * (n - 1.0) + outcome) / n).clamp(0.0, 1.0);
        }
        if scores.usage_count > bonus_after {
            scores.weight = (scores.weight + bonus).min(1.0);
        }
        node.timestamps.last_used = now;

        let updated = node.clone();
        self.persist_partition(node_type)?;
        Ok(Some(updated))
    }

    /// Fold `id_b` into `id_a` and delete `id_b`
    ///
    /// Keeps the longer detail, averages weights and sums usage counts.
    pub fn merge(&mut self, id_a: &str, id_b: &str) -> Result<Option<Node>> {
        if id_a == id_b {
            return Ok(None);
        }
        let (Some(a), Some(b)) = (self.get(id_a), self.get(id_b)) else {
            return Ok(None);
        };

        let mut merged = a.clone();
        if b.content.detail.len() > a.content.detail.len() {
            merged.content.detail = b.content.detail.clone();
        }
        merged.scores.weight = ((a.scores.weight + b.scores.weight) / 2.0).clamp(0.0, 1.0);
        merged.scores.usage_count = a.scores.usage_count + b.scores.usage_count;
        merged.timestamps.last_used = a.timestamps.last_used.max(b.timestamps.last_used);

        let merged = self.replace(&a, merged, false)?;
        self.delete(id_b)?;
        log::debug!("Merged {} into {}", id_b, id_a);
        Ok(Some(merged))
    }

    /// All nodes of the given types (every type when empty), in partition order
    pub fn nodes(&self, types: &[NodeType]) -> Vec<&Node> {
        self.partitions
            .iter()
            .filter(|(t, _)| types.is_empty() || types.contains(t))
            .flat_map(|(_, partition)| partition.values())
            .collect()
    }
}

/// Logical path of a node in change descriptors
pub(crate) fn node_path(node: &Node) -> String {
    format!("{}.{}", node.node_type.storage_key(), node.id)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::delta::ChangeOp;
    use tempfile::TempDir;

    pub(crate) const T0: i64 = 1_700_000_000;

    pub(crate) fn open_store(dir: &TempDir) -> (GraphStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(T0));
        let store = GraphStore::open(dir.path(), GraphConfig::default(), clock.clone()).unwrap();
        (store, clock)
    }

    pub(crate) fn pattern(summary: &str) -> NewNode {
        NewNode::builder(NodeType::Pattern)
            .summary(summary)
            .detail(format!("{} detail", summary))
            .build()
            .unwrap()
    }

    #[test]
    fn test_create_then_get() {
        let dir = TempDir::new().unwrap();
        let (mut store, _) = open_store(&dir);

        let params = NewNode::builder(NodeType::Convention)
            .summary("Prefer iterators")
            .detail("Use iterator chains over index loops")
            .code("v.iter().map(f)")
            .language("rust")
            .file("src/lib.rs")
            .build()
            .unwrap();
        let created = store.create(params.clone()).unwrap();
        let fetched = store.get(&created.id).unwrap();

        assert_eq!(fetched.content, params.content);
        assert_eq!(fetched.meta.version, 1);
        assert_eq!(fetched.scores.weight, 0.5);
        assert!(created.id.starts_with("con_"));
        assert_eq!(store.meta().node_count, 1);
        assert_eq!(store.pending.len(), 1);
        assert_eq!(store.pending[0].op, ChangeOp::Add);
    }

    #[test]
    fn test_summary_is_bounded() {
        let dir = TempDir::new().unwrap();
        let (mut store, _) = open_store(&dir);
        let node = store.create(pattern(&"x".repeat(500))).unwrap();
        assert_eq!(node.content.summary.chars().count(), 200);
    }

    #[test]
    fn test_update_bumps_version_and_hash() {
        let dir = TempDir::new().unwrap();
        let (mut store, clock) = open_store(&dir);
        let node = store.create(pattern("original")).unwrap();

        clock.advance_secs(5);
        let updated = store
            .update(
                &node.id,
                NodeUpdate {
                    weight: Some(0.8),
                    ..Default::default()
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(updated.meta.version, 2);
        assert_eq!(updated.content_hash, node.content_hash);
        assert_eq!(updated.timestamps.updated, T0 + 5);

        let updated = store
            .update(
                &node.id,
                NodeUpdate {
                    detail: Some("rewritten".into()),
                    ..Default::default()
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(updated.meta.version, 3);
        assert_ne!(updated.content_hash, node.content_hash);

        let change = store.pending.last().unwrap();
        assert_eq!(change.op, ChangeOp::Modify);
        assert_eq!(change.after.as_deref(), Some(updated.content_hash.as_str()));
    }

    #[test]
    fn test_update_unknown_returns_none() {
        let dir = TempDir::new().unwrap();
        let (mut store, _) = open_store(&dir);
        assert!(store
            .update("pat_1_missing", NodeUpdate::default())
            .unwrap()
            .is_none());
        assert!(store.update("garbage", NodeUpdate::default()).unwrap().is_none());
    }

    #[test]
    fn test_delete_is_idempotent_on_counter() {
        let dir = TempDir::new().unwrap();
        let (mut store, _) = open_store(&dir);
        let node = store.create(pattern("doomed")).unwrap();
        store.create(pattern("survivor")).unwrap();
        assert_eq!(store.meta().node_count, 2);

        assert!(store.delete(&node.id).unwrap());
        assert!(store.get(&node.id).is_none());
        assert_eq!(store.meta().node_count, 1);

        assert!(!store.delete(&node.id).unwrap());
        assert_eq!(store.meta().node_count, 1);
    }

    #[test]
    fn test_counter_never_negative() {
        let dir = TempDir::new().unwrap();
        let (mut store, _) = open_store(&dir);
        let node = store.create(pattern("one")).unwrap();
        store.meta.node_count = 0;
        assert!(store.delete(&node.id).unwrap());
        assert_eq!(store.meta().node_count, 0);
    }

    #[test]
    fn test_record_usage_bounds() {
        let dir = TempDir::new().unwrap();
        let (mut store, clock) = open_store(&dir);
        let node = store
            .create(
                NewNode::builder(NodeType::Pattern)
                    .summary("hot path")
                    .weight(0.98)
                    .build()
                    .unwrap(),
            )
            .unwrap();

        for i in 0..50 {
            clock.advance_secs(1);
            let used = store
                .record_usage(&node.id, Some(i % 3 != 0))
                .unwrap()
                .unwrap();
            assert!(used.scores.weight <= 1.0);
            assert!((0.0..=1.0).contains(&used.scores.success_rate));
        }

        let node = store.get(&node.id).unwrap();
        assert_eq!(node.scores.usage_count, 50);
        assert_eq!(node.scores.weight, 1.0);
        assert_eq!(node.timestamps.last_used, T0 + 50);
        assert_eq!(node.meta.version, 1);
        assert_eq!(store.pending.len(), 1);
    }

    #[test]
    fn test_record_usage_running_average() {
        let dir = TempDir::new().unwrap();
        let (mut store, _) = open_store(&dir);
        let node = store.create(pattern("avg")).unwrap();

        store.record_usage(&node.id, Some(true)).unwrap();
        store.record_usage(&node.id, Some(false)).unwrap();
        let node = store.record_usage(&node.id, None).unwrap().unwrap();

        assert!((node.scores.success_rate - 0.5).abs() < 1e-6);
        assert_eq!(node.scores.usage_count, 3);
        assert_eq!(node.scores.weight, 0.5);
    }

    #[test]
    fn test_weight_bonus_after_threshold() {
        let dir = TempDir::new().unwrap();
        let (mut store, _) = open_store(&dir);
        let node = store.create(pattern("bonus")).unwrap();

        for _ in 0..5 {
            store.record_usage(&node.id, None).unwrap();
        }
        assert_eq!(store.get(&node.id).unwrap().scores.weight, 0.5);

        store.record_usage(&node.id, None).unwrap();
        let weight = store.get(&node.id).unwrap().scores.weight;
        assert!((weight - 0.51).abs() < 1e-6);
    }

    #[test]
    fn test_merge() {
        let dir = TempDir::new().unwrap();
        let (mut store, _) = open_store(&dir);
        let a = store
            .create(
                NewNode::builder(NodeType::Pattern)
                    .summary("a")
                    .detail("short")
                    .weight(0.8)
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let b = store
            .create(
                NewNode::builder(NodeType::Pattern)
                    .summary("b")
                    .detail("a much longer explanation")
                    .weight(0.4)
                    .build()
                    .unwrap(),
            )
            .unwrap();
        store.record_usage(&a.id, None).unwrap();
        store.record_usage(&b.id, None).unwrap();
        store.record_usage(&b.id, None).unwrap();

        let merged = store.merge(&a.id, &b.id).unwrap().unwrap();
        assert_eq!(merged.id, a.id);
        assert_eq!(merged.content.detail, "a much longer explanation");
        assert!((merged.scores.weight - 0.6).abs() < 1e-6);
        assert_eq!(merged.scores.usage_count, 3);
        assert_eq!(merged.meta.version, 2);
        assert!(store.get(&b.id).is_none());
        assert_eq!(store.meta().node_count, 1);

        assert!(store.merge(&a.id, &a.id).unwrap().is_none());
        assert!(store.merge(&a.id, &b.id).unwrap().is_none());
    }

    #[test]
    fn test_reopen_restores_nodes() {
        let dir = TempDir::new().unwrap();
        let id = {
            let (mut store, _) = open_store(&dir);
            let id = store.create(pattern("durable")).unwrap().id;
            store.storage.flush_all().unwrap();
            id
        };

        let (store, _) = open_store(&dir);
        assert_eq!(store.get(&id).unwrap().content.summary, "durable");
        assert_eq!(store.meta().node_count, 1);
    }

    #[test]
    fn test_malformed_partition_reverts_to_empty() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("nodes")).unwrap();
        std::fs::write(dir.path().join("nodes/patterns.json"), b"[[[").unwrap();

        let (store, _) = open_store(&dir);
        assert!(store.nodes(&[NodeType::Pattern]).is_empty());
    }
}
