//! Typed edges between nodes
//!
//! Adjacency (source -> relation -> targets) and reverse adjacency
//! (target -> relation -> sources) are updated together, so the two maps are
//! always mirror images. Edges are not delta tracked.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::error::Result;
use crate::hash;
use crate::index::day_bucket;
use crate::node::Node;
use crate::storage::Storage;
use crate::store::GraphStore;

/// Kind of relation an edge expresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    Semantic,
    FileBased,
    Temporal,
    Causal,
    Supersedes,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Semantic => "semantic",
            Self::FileBased => "file_based",
            Self::Temporal => "temporal",
            Self::Causal => "causal",
            Self::Supersedes => "supersedes",
        }
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Bidirectional,
    Forward,
    Backward,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeProperties {
    /// Strength of the relation (0.0 to 1.0)
    pub weight: f32,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl EdgeProperties {
    pub fn new(weight: f32) -> Self {
        Self {
            weight: weight.clamp(0.0, 1.0),
            direction: Direction::default(),
            reason: None,
        }
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

impl Default for EdgeProperties {
    fn default() -> Self {
        Self::new(0.5)
    }
}

/// A typed relation between two nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub relation: RelationType,
    pub properties: EdgeProperties,
    pub created: i64,
}

impl Edge {
    /// Key of this edge in the record map
    pub fn record_key(&self) -> String {
        record_key(&self.source, &self.target, self.relation)
    }

    pub fn touches(&self, node_id: &str) -> bool {
        self.source == node_id || self.target == node_id
    }
}

/// Edge IDs are short and may collide, so records are keyed by both endpoints
fn record_key(source: &str, target: &str, relation: RelationType) -> String {
    format!("{}|{}|{}", source, target, relation.as_str())
}

/// Node ID -> relation -> neighbour IDs
pub type Adjacency = BTreeMap<String, BTreeMap<RelationType, Vec<String>>>;

const EDGES_KEY: &str = "graph.edges";
const ADJACENCY_KEY: &str = "graph.adjacency";
const REVERSE_KEY: &str = "graph.reverse";

/// Edge records plus both adjacency maps
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeSet {
    /// Keyed by `<source>|<target>|<relation>`
    pub records: BTreeMap<String, Edge>,
    pub adjacency: Adjacency,
    pub reverse: Adjacency,
}

impl EdgeSet {
    pub(crate) fn load(storage: &Storage) -> Self {
        Self {
            records: storage.load_as(EDGES_KEY),
            adjacency: storage.load_as(ADJACENCY_KEY),
            reverse: storage.load_as(REVERSE_KEY),
        }
    }

    pub(crate) fn persist(&self, storage: &Storage) -> Result<()> {
        storage.save_as(EDGES_KEY, &self.records, false)?;
        storage.save_as(ADJACENCY_KEY, &self.adjacency, false)?;
        storage.save_as(REVERSE_KEY, &self.reverse, false)
    }

    /// Insert an edge; returns true if it was not already recorded
    pub(crate) fn insert(&mut self, edge: Edge) -> bool {
        link(&mut self.adjacency, &edge.source, edge.relation, &edge.target);
        link(&mut self.reverse, &edge.target, edge.relation, &edge.source);
        self.records.insert(edge.record_key(), edge).is_none()
    }

    /// Drop every trace of a node; returns the number of records removed
    fn remove_node(&mut self, node_id: &str) -> usize {
        if let Some(outgoing) = self.adjacency.remove(node_id) {
            for (relation, targets) in outgoing {
                for target in targets {
                    unlink(&mut self.reverse, &target, relation, node_id);
                }
            }
        }
        if let Some(incoming) = self.reverse.remove(node_id) {
            for (relation, sources) in incoming {
                for source in sources {
                    unlink(&mut self.adjacency, &source, relation, node_id);
                }
            }
        }

        let before = self.records.len();
        self.records.retain(|_, edge| !edge.touches(node_id));
        before - self.records.len()
    }

    /// Stored record for a (source, target, relation) triple
    fn find(&self, source: &str, target: &str, relation: RelationType) -> Option<&Edge> {
        self.records.get(&record_key(source, target, relation))
    }
}

fn link(map: &mut Adjacency, from: &str, relation: RelationType, to: &str) {
    let ids = map
        .entry(from.to_string())
        .or_default()
        .entry(relation)
        .or_default();
    if !ids.iter().any(|id| id == to) {
        ids.push(to.to_string());
    }
}

fn unlink(map: &mut Adjacency, from: &str, relation: RelationType, to: &str) {
    let Some(relations) = map.get_mut(from) else {
        return;
    };
    if let Some(ids) = relations.get_mut(&relation) {
        ids.retain(|id| id != to);
        if ids.is_empty() {
            relations.remove(&relation);
        }
    }
    if relations.is_empty() {
        map.remove(from);
    }
}

impl GraphStore {
    /// Link two existing nodes
    ///
    /// Returns `None` when either endpoint is unknown or for self-loops.
    pub fn add_edge(
        &mut self,
        source: &str,
        target: &str,
        relation: RelationType,
        properties: EdgeProperties,
    ) -> Result<Option<Edge>> {
        if source == target || !self.contains(source) || !self.contains(target) {
            return Ok(None);
        }

        let edge = Edge {
            id: hash::edge_id(source, target),
            source: source.to_string(),
            target: target.to_string(),
            relation,
            properties,
            created: self.clock.now(),
        };

        if self.edges.insert(edge.clone()) {
            self.meta.edge_count += 1;
            self.persist_meta(false)?;
        }
        self.edges.persist(&self.storage)?;
        Ok(Some(edge))
    }

    /// Remove a node from both adjacency maps and drop its edge records
    pub(crate) fn remove_node_edges(&mut self, node_id: &str) -> Result<usize> {
        let removed = self.edges.remove_node(node_id);
        self.meta.edge_count = self.meta.edge_count.saturating_sub(removed as u64);
        self.edges.persist(&self.storage)?;
        Ok(removed)
    }

    /// Outgoing neighbours, optionally restricted to one relation
    pub fn neighbors(&self, node_id: &str, relation: Option<RelationType>) -> Vec<String> {
        let Some(relations) = self.edges.adjacency.get(node_id) else {
            return Vec::new();
        };
        relations
            .iter()
            .filter(|(r, _)| relation.map_or(true, |wanted| **r == wanted))
            .flat_map(|(_, ids)| ids.iter().cloned())
            .collect()
    }

    /// Incoming neighbours, optionally restricted to one relation
    pub fn incoming(&self, node_id: &str, relation: Option<RelationType>) -> Vec<String> {
        let Some(relations) = self.edges.reverse.get(node_id) else {
            return Vec::new();
        };
        relations
            .iter()
            .filter(|(r, _)| relation.map_or(true, |wanted| **r == wanted))
            .flat_map(|(_, ids)| ids.iter().cloned())
            .collect()
    }

    /// Stored edges touching a node
    pub fn edges_of(&self, node_id: &str) -> Vec<Edge> {
        self.edges
            .records
            .values()
            .filter(|edge| edge.touches(node_id))
            .cloned()
            .collect()
    }

    pub fn edge_set(&self) -> &EdgeSet {
        &self.edges
    }

    /// Collect edges reachable from `seeds` within `depth` hops
    ///
    /// Walks both directions. Neighbours that no longer exist are skipped
    /// rather than treated as errors.
    pub fn expand_edges(&self, seeds: &[String], depth: usize) -> Vec<Edge> {
        let mut edges = Vec::new();
        let mut seen_edges = HashSet::new();
        let mut visited: HashSet<String> = seeds.iter().cloned().collect();
        let mut frontier: Vec<String> = seeds.to_vec();

        for _ in 0..depth {
            let mut next = Vec::new();
            for node_id in &frontier {
                let outgoing = self.edges.adjacency.get(node_id).into_iter().flatten();
                let incoming = self.edges.reverse.get(node_id).into_iter().flatten();

                let hops = outgoing
                    .flat_map(|(r, ids)| {
                        ids.iter().map(move |id| (node_id.as_str(), id.as_str(), *r))
                    })
                    .chain(incoming.flat_map(|(r, ids)| {
                        ids.iter().map(move |id| (id.as_str(), node_id.as_str(), *r))
                    }));

                for (source, target, relation) in hops {
                    let neighbour = if source == node_id.as_str() {
                        target
                    } else {
                        source
                    };
                    if !self.contains(neighbour) {
                        continue;
                    }
                    let Some(edge) = self.edges.find(source, target, relation) else {
                        continue;
                    };
                    if seen_edges.insert(edge.record_key()) {
                        edges.push(edge.clone());
                    }
                    if visited.insert(neighbour.to_string()) {
                        next.push(neighbour.to_string());
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        edges
    }

    /// Link `node` to nodes created shortly before it with temporal edges
    ///
    /// Candidates come from the by-time index (today's and the window start's
    /// day bucket), newest first.
    pub fn link_temporal(&mut self, node: &Node) -> Result<usize> {
        let window = self.config.temporal_link_window_secs;
        let max = self.config.temporal_link_max;
        if window <= 0 || max == 0 {
            return Ok(0);
        }

        let created = node.timestamps.created;
        let mut buckets = vec![day_bucket(created)];
        let earliest = day_bucket(created - window);
        if earliest != buckets[0] {
            buckets.push(earliest);
        }

        let mut candidates: Vec<(i64, String)> = buckets
            .iter()
            .flat_map(|bucket| self.indices.ids_for_day(bucket).iter())
            .filter(|id| **id != node.id)
            .filter_map(|id| self.get_ref(id))
            .filter(|other| {
                let t = other.timestamps.created;
                t <= created && created - t <= window
            })
            .map(|other| (other.timestamps.created, other.id.clone()))
            .collect();
        candidates.sort_by(|a, b| b.0.cmp(&a.0));
        candidates.truncate(max);

        let mut linked = 0;
        for (_, other) in candidates {
            let properties = EdgeProperties::new(0.3)
                .with_direction(Direction::Backward)
                .with_reason("learned in the same time window");
            if self
                .add_edge(&node.id, &other, RelationType::Temporal, properties)?
                .is_some()
            {
                linked += 1;
            }
        }
        Ok(linked)
    }
}
