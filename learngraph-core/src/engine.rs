//! Knowledge graph facade
//!
//! [`KnowledgeGraph`] owns the per-project [`GraphStore`] and the learner
//! registry, routes events through learners, and commits automatically once
//! enough changes accumulate.
//!
//! Before [`KnowledgeGraph::initialize`] succeeds every operation returns a
//! neutral value (`None`, `false`, empty collections). Callers should read
//! an empty result as "unavailable", not "nothing matched".

use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::GraphConfig;
use crate::delta::{Delta, Trigger};
use crate::error::Result;
use crate::export::GraphSnapshot;
use crate::graph::{Edge, EdgeProperties, RelationType};
use crate::learner::{LearnEvent, LearnerRegistry};
use crate::meta::GraphStats;
use crate::node::{NewNode, Node, NodeUpdate};
use crate::query::{QueryOptions, QueryResult};
use crate::store::GraphStore;

pub const SHUTDOWN_COMMIT_MESSAGE: &str = "Auto-commit on shutdown";

/// Knowledge graph for one project
pub struct KnowledgeGraph {
    store: RwLock<Option<GraphStore>>,
    config: GraphConfig,
    clock: Arc<dyn Clock>,
    learners: LearnerRegistry,
    session_id: Mutex<Option<String>>,
}

impl KnowledgeGraph {
    /// Create an uninitialized graph with the built-in learners
    pub fn new(config: GraphConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: GraphConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: RwLock::new(None),
            config,
            clock,
            learners: LearnerRegistry::with_defaults(),
            session_id: Mutex::new(None),
        }
    }

    /// Replace the learner registry
    pub fn with_learners(mut self, learners: LearnerRegistry) -> Self {
        self.learners = learners;
        self
    }

    /// Create and initialize in one step
    pub fn open(project_root: impl AsRef<Path>, config: GraphConfig) -> Result<Self> {
        let graph = Self::new(config);
        graph.initialize(project_root)?;
        Ok(graph)
    }

    /// Open the store under `<project_root>/<data_dir_name>`
    ///
    /// Re-initializing flushes the previous store before replacing it.
    pub fn initialize(&self, project_root: impl AsRef<Path>) -> Result<()> {
        let data_dir = self.data_dir(project_root.as_ref());
        log::info!("Initializing knowledge graph at {}", data_dir.display());

        let store = GraphStore::open(&data_dir, self.config.clone(), Arc::clone(&self.clock))
            .map_err(|e| {
                log::error!("Failed to open knowledge graph: {}", e);
                e
            })?;

        if let Some(previous) = self.store.write().replace(store) {
            if let Err(e) = previous.storage().flush_all() {
                log::warn!("Failed to flush previous store: {}", e);
            }
        }
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.store.read().is_some()
    }

    pub fn data_dir(&self, project_root: &Path) -> PathBuf {
        project_root.join(&self.config.data_dir_name)
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn learners(&self) -> &LearnerRegistry {
        &self.learners
    }

    /// Tag subsequent commits with a session
    pub fn set_session_id(&self, session_id: Option<String>) {
        *self.session_id.lock() = session_id;
    }

    /// Run `f` against the store, or return `default` when uninitialized
    fn read<T>(&self, default: T, f: impl FnOnce(&GraphStore) -> T) -> T {
        match self.store.read().as_ref() {
            Some(store) => f(store),
            None => default,
        }
    }

    fn write<T>(&self, default: T, f: impl FnOnce(&mut GraphStore) -> Result<T>) -> Result<T> {
        match self.store.write().as_mut() {
            Some(store) => f(store),
            None => Ok(default),
        }
    }

    /// Commit once the pending buffer reaches the configured threshold
    fn maybe_auto_commit(&self, store: &mut GraphStore) -> Result<Option<String>> {
        let threshold = self.config.auto_commit_threshold;
        let pending = store.pending_changes().len();
        if threshold == 0 || pending < threshold {
            return Ok(None);
        }
        let session_id = self.session_id.lock().clone();
        store.commit(
            &format!("Auto-commit: {} changes", pending),
            Trigger::Auto,
            session_id,
        )
    }

    /// Learn from an event; returns the first created node ID
    pub fn learn(&self, event: &LearnEvent) -> Result<Option<String>> {
        Ok(self.learn_all(event)?.into_iter().next())
    }

    /// Learn from an event; returns every created node ID
    ///
    /// The first learner that detects the event handles it. Each stored
    /// node is linked to related and temporally close nodes.
    pub fn learn_all(&self, event: &LearnEvent) -> Result<Vec<String>> {
        let Some(learner) = self.learners.find(event) else {
            log::debug!("No learner for event type '{}'", event.kind);
            return Ok(Vec::new());
        };

        self.write(Vec::new(), |store| {
            let mut created = Vec::new();

            for data in learner.extract(event) {
                if !learner.should_learn(&data) {
                    continue;
                }
                let Some(params) = learner.create_node_params(&data) else {
                    continue;
                };

                let related = learner.find_related(&data, &|options: &QueryOptions| {
                    store.find(options)
                });
                let node = store.create(params)?;

                for id in related.iter().filter(|id| **id != node.id) {
                    let properties = EdgeProperties::new(0.5)
                        .with_reason(format!("related by {} learner", learner.name()));
                    store.add_edge(&node.id, id, RelationType::Semantic, properties)?;
                }
                store.link_temporal(&node)?;

                log::debug!("Learned {} from '{}' event", node.id, event.kind);
                created.push(node.id);
                self.maybe_auto_commit(store)?;
            }

            Ok(created)
        })
    }

    /// Store a node directly, bypassing learners
    pub fn create_node(&self, params: NewNode) -> Result<Option<Node>> {
        self.write(None, |store| {
            let node = store.create(params)?;
            self.maybe_auto_commit(store)?;
            Ok(Some(node))
        })
    }

    pub fn get_node(&self, id: &str) -> Option<Node> {
        self.read(None, |store| store.get(id))
    }

    pub fn update_node(&self, id: &str, update: NodeUpdate) -> Result<Option<Node>> {
        self.write(None, |store| {
            let node = store.update(id, update)?;
            self.maybe_auto_commit(store)?;
            Ok(node)
        })
    }

    pub fn delete_node(&self, id: &str) -> Result<bool> {
        self.write(false, |store| {
            let deleted = store.delete(id)?;
            self.maybe_auto_commit(store)?;
            Ok(deleted)
        })
    }

    pub fn record_usage(&self, id: &str, success: Option<bool>) -> Result<Option<Node>> {
        self.write(None, |store| store.record_usage(id, success))
    }

    pub fn merge_nodes(&self, id_a: &str, id_b: &str) -> Result<Option<Node>> {
        self.write(None, |store| {
            let merged = store.merge(id_a, id_b)?;
            self.maybe_auto_commit(store)?;
            Ok(merged)
        })
    }

    pub fn add_edge(
        &self,
        source: &str,
        target: &str,
        relation: RelationType,
        properties: EdgeProperties,
    ) -> Result<Option<Edge>> {
        self.write(None, |store| {
            store.add_edge(source, target, relation, properties)
        })
    }

    pub fn neighbors(&self, id: &str, relation: Option<RelationType>) -> Vec<String> {
        self.read(Vec::new(), |store| store.neighbors(id, relation))
    }

    pub fn edges_of(&self, id: &str) -> Vec<Edge> {
        self.read(Vec::new(), |store| store.edges_of(id))
    }

    /// Ranked query; the configured default limit applies when none is given
    pub fn query(&self, options: &QueryOptions) -> QueryResult {
        self.read(QueryResult::default(), |store| {
            if options.limit.is_some() {
                return store.query(options);
            }
            let bounded = QueryOptions {
                limit: Some(self.config.default_query_limit),
                ..options.clone()
            };
            store.query(&bounded)
        })
    }

    pub fn commit(&self, message: &str) -> Result<Option<String>> {
        let session_id = self.session_id.lock().clone();
        self.write(None, |store| store.commit(message, Trigger::User, session_id))
    }

    pub fn rollback(&self, hash: &str) -> Result<bool> {
        self.write(false, |store| store.rollback(hash))
    }

    pub fn get_history(&self, limit: usize) -> Vec<Delta> {
        self.read(Vec::new(), |store| store.get_history(limit))
    }

    pub fn get_delta(&self, hash: &str) -> Option<Delta> {
        self.read(None, |store| store.get_delta(hash))
    }

    pub fn export(&self) -> Option<GraphSnapshot> {
        self.read(None, |store| Some(store.export()))
    }

    /// Replace the graph with a snapshot produced by [`KnowledgeGraph::export`]
    pub fn import(&self, data: serde_json::Value) -> Result<Option<GraphStats>> {
        self.write(None, |store| store.import(data).map(Some))
    }

    pub fn stats(&self) -> GraphStats {
        self.read(GraphStats::default(), GraphStore::stats)
    }

    pub fn prune(&self, threshold: f32, unused_days: i64) -> Result<usize> {
        self.write(0, |store| {
            let removed = store.prune(threshold, unused_days)?;
            self.maybe_auto_commit(store)?;
            Ok(removed)
        })
    }

    pub fn decay(&self, factor: f32, unused_days: i64) -> Result<usize> {
        self.write(0, |store| store.decay(factor, unused_days))
    }

    pub fn rebuild_indices(&self) -> Result<bool> {
        self.write(false, |store| store.rebuild_indices().map(|_| true))
    }

    /// Commit pending changes and flush every dirty key
    pub fn shutdown(&self) -> Result<Option<String>> {
        let session_id = self.session_id.lock().clone();
        self.write(None, |store| {
            let hash = store.commit(SHUTDOWN_COMMIT_MESSAGE, Trigger::Auto, session_id)?;
            store.storage().flush_all()?;
            log::info!("Knowledge graph shut down");
            Ok(hash)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::node::NodeType;
    use serde_json::json;
    use tempfile::TempDir;

    const T0: i64 = 1_700_000_000;

    fn open_graph(dir: &TempDir) -> (KnowledgeGraph, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(T0));
        let graph = KnowledgeGraph::with_clock(GraphConfig::default(), clock.clone());
        graph.initialize(dir.path()).unwrap();
        (graph, clock)
    }

    fn note(summary: &str) -> NewNode {
        NewNode::builder(NodeType::Decision)
            .summary(summary)
            .build()
            .unwrap()
    }

    #[test]
    fn test_uninitialized_is_neutral() {
        let graph = KnowledgeGraph::new(GraphConfig::default());
        assert!(!graph.is_initialized());

        assert!(graph.create_node(note("x")).unwrap().is_none());
        assert!(graph.get_node("dec_1_00000000").is_none());
        assert!(!graph.delete_node("dec_1_00000000").unwrap());
        assert!(graph.query(&QueryOptions::new()).nodes.is_empty());
        assert!(graph.commit("msg").unwrap().is_none());
        assert!(!graph.rollback("abc").unwrap());
        assert!(graph.get_history(10).is_empty());
        assert!(graph.export().is_none());
        assert!(graph.import(json!({})).unwrap().is_none());
        assert_eq!(graph.stats(), GraphStats::default());
        assert!(graph
            .learn(&LearnEvent::new("decision", json!({ "title": "t" })))
            .unwrap()
            .is_none());
        assert!(graph.shutdown().unwrap().is_none());
    }

    #[test]
    fn test_initialize_creates_data_dir() {
        let dir = TempDir::new().unwrap();
        let (graph, _) = open_graph(&dir);
        assert!(graph.is_initialized());
        assert!(dir.path().join(".learngraph").join("meta.json").exists());
    }

    #[test]
    fn test_auto_commit_at_threshold() {
        let dir = TempDir::new().unwrap();
        let (graph, _) = open_graph(&dir);

        for i in 0..9 {
            graph.create_node(note(&format!("n{}", i))).unwrap();
        }
        assert_eq!(graph.stats().pending_changes, 9);
        assert_eq!(graph.stats().delta_count, 0);

        graph.create_node(note("n9")).unwrap();
        let stats = graph.stats();
        assert_eq!(stats.pending_changes, 0);
        assert_eq!(stats.delta_count, 1);

        let history = graph.get_history(1);
        assert_eq!(history[0].metadata.message, "Auto-commit: 10 changes");
        assert_eq!(history[0].metadata.trigger, Trigger::Auto);
    }

    #[test]
    fn test_zero_threshold_disables_auto_commit() {
        let dir = TempDir::new().unwrap();
        let config = GraphConfig {
            auto_commit_threshold: 0,
            ..Default::default()
        };
        let graph = KnowledgeGraph::with_clock(config, Arc::new(ManualClock::new(T0)));
        graph.initialize(dir.path()).unwrap();

        for i in 0..15 {
            graph.create_node(note(&format!("n{}", i))).unwrap();
        }
        assert_eq!(graph.stats().pending_changes, 15);
    }

    #[test]
    fn test_learn_links_related_and_temporal() {
        let dir = TempDir::new().unwrap();
        let (graph, clock) = open_graph(&dir);

        let first = graph
            .learn(
                &LearnEvent::new("code_accepted", json!({ "code": "fn handler() -> Result<()>" }))
                    .with_file("src/api.rs"),
            )
            .unwrap()
            .unwrap();
        clock.advance_secs(60);
        let second = graph
            .learn(
                &LearnEvent::new(
                    "code_corrected",
                    json!({ "original": "x.unwrap()", "corrected": "x?" }),
                )
                .with_file("src/api.rs"),
            )
            .unwrap()
            .unwrap();

        assert!(second.starts_with("cor_"));
        assert_eq!(
            graph.neighbors(&second, Some(RelationType::Semantic)),
            vec![first.clone()]
        );
        assert_eq!(
            graph.neighbors(&second, Some(RelationType::Temporal)),
            vec![first]
        );
        assert_eq!(graph.stats().edge_count, 2);
    }

    #[test]
    fn test_learn_skips_unusable_events() {
        let dir = TempDir::new().unwrap();
        let (graph, _) = open_graph(&dir);

        assert!(graph
            .learn(&LearnEvent::new("unknown", json!({})))
            .unwrap()
            .is_none());
        assert!(graph
            .learn(&LearnEvent::new("code_corrected", json!({ "original": "a", "corrected": "a" })))
            .unwrap()
            .is_none());
        assert_eq!(graph.stats().node_count, 0);
    }

    #[test]
    fn test_learn_all_from_note() {
        let dir = TempDir::new().unwrap();
        let (graph, _) = open_graph(&dir);

        let ids = graph
            .learn_all(&LearnEvent::new(
                "user_note",
                json!({ "text": "Always run clippy. Prefer small modules." }),
            ))
            .unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.iter().all(|id| id.starts_with("con_")));
    }

    #[test]
    fn test_query_applies_default_limit() {
        let dir = TempDir::new().unwrap();
        let (graph, _) = open_graph(&dir);
        for i in 0..25 {
            graph.create_node(note(&format!("n{}", i))).unwrap();
        }

        let result = graph.query(&QueryOptions::new());
        assert_eq!(result.nodes.len(), 20);
        assert!(result.truncated);

        let result = graph.query(&QueryOptions::new().limit(50));
        assert_eq!(result.nodes.len(), 25);
    }

    #[test]
    fn test_shutdown_commits_and_flushes() {
        let dir = TempDir::new().unwrap();
        let (graph, _) = open_graph(&dir);
        graph.create_node(note("pending")).unwrap();
        graph.set_session_id(Some("s-42".into()));

        let hash = graph.shutdown().unwrap().unwrap();
        let delta = graph.get_delta(&hash).unwrap();
        assert_eq!(delta.metadata.message, SHUTDOWN_COMMIT_MESSAGE);
        assert_eq!(delta.metadata.session_id.as_deref(), Some("s-42"));
        assert!(dir.path().join(".learngraph/nodes/decisions.json").exists());

        assert!(graph.shutdown().unwrap().is_none());
    }
}
