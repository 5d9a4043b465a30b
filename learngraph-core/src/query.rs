//! Relevance-ranked querying
//!
//! Nodes are filtered with AND semantics over the given criteria, then ranked
//! by `weight / (1 + age_days)` where age is measured from last use. Ties keep
//! encounter order.

use serde::{Deserialize, Serialize};

use crate::graph::Edge;
use crate::node::{Node, NodeType};
use crate::store::GraphStore;

/// Query criteria
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    /// Case-insensitive substring matched against summary and detail
    pub text: Option<String>,
    /// Exact context file
    pub file: Option<String>,
    /// Restrict to these types (all types when empty)
    pub types: Vec<NodeType>,
    pub min_weight: Option<f32>,
    /// Only nodes created at or after this unix timestamp
    pub since: Option<i64>,
    pub limit: Option<usize>,
    /// Hops of edge expansion around the results
    pub depth: usize,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn node_type(mut self, node_type: NodeType) -> Self {
        self.types.push(node_type);
        self
    }

    pub fn min_weight(mut self, weight: f32) -> Self {
        self.min_weight = Some(weight);
        self
    }

    pub fn since(mut self, timestamp: i64) -> Self {
        self.since = Some(timestamp);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    fn matches(&self, node: &Node, needle: Option<&str>) -> bool {
        if !self.types.is_empty() && !self.types.contains(&node.node_type) {
            return false;
        }
        if let Some(file) = &self.file {
            if node.context.file.as_ref() != Some(file) {
                return false;
            }
        }
        if let Some(min) = self.min_weight {
            if node.scores.weight < min {
                return false;
            }
        }
        if let Some(since) = self.since {
            if node.timestamps.created < since {
                return false;
            }
        }
        needle.map_or(true, |needle| node.matches_text(needle))
    }
}

/// A node with its ranking score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedNode {
    pub node: Node,
    pub score: f64,
}

/// Result of a query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub nodes: Vec<RankedNode>,
    pub edges: Vec<Edge>,
    /// More nodes matched than were returned
    pub truncated: bool,
}

/// Recency-decayed relevance: `weight / (1 + age_days)`
pub fn relevance_score(weight: f32, last_used: i64, now: i64) -> f64 {
    let age_days = (now - last_used).max(0) as f64 / crate::SECS_PER_DAY as f64;
    weight as f64 / (1.0 + age_days)
}

impl GraphStore {
    /// Filter and rank; returns the (possibly truncated) ranking and the match count
    pub(crate) fn rank(&self, criteria: &QueryOptions) -> (Vec<RankedNode>, usize) {
        let needle = criteria
            .text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase);
        let now = self.clock.now();

        let candidates: Vec<&Node> = match &criteria.file {
            Some(file) => self
                .indices
                .ids_for_file(file)
                .iter()
                .filter_map(|id| self.get_ref(id))
                .collect(),
            None => self.nodes(&criteria.types),
        };

        let mut ranked: Vec<RankedNode> = candidates
            .into_iter()
            .filter(|node| criteria.matches(node, needle.as_deref()))
            .map(|node| RankedNode {
                score: relevance_score(node.scores.weight, node.timestamps.last_used, now),
                node: node.clone(),
            })
            .collect();

        // sort_by is stable: equal scores keep encounter order
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let total = ranked.len();
        if let Some(limit) = criteria.limit {
            ranked.truncate(limit);
        }
        (ranked, total)
    }

    /// Ranked nodes plus the edges around them
    pub fn query(&self, options: &QueryOptions) -> QueryResult {
        let (nodes, total) = self.rank(options);
        let truncated = total > nodes.len();

        let edges = if options.depth > 0 {
            let seeds: Vec<String> = nodes.iter().map(|r| r.node.id.clone()).collect();
            self.expand_edges(&seeds, options.depth)
        } else {
            Vec::new()
        };

        QueryResult {
            nodes,
            edges,
            truncated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EdgeProperties, RelationType};
    use crate::node::NewNode;
    use crate::store::tests::{open_store, pattern, T0};
    use crate::SECS_PER_DAY;
    use tempfile::TempDir;

    fn weighted(node_type: NodeType, summary: &str, weight: f32) -> NewNode {
        NewNode::builder(node_type)
            .summary(summary)
            .weight(weight)
            .build()
            .unwrap()
    }

    #[test]
    fn test_recency_can_outrank_weight() {
        let now = T0;
        let a = relevance_score(0.9, now - 100 * SECS_PER_DAY, now);
        let b = relevance_score(0.4, now, now);
        assert!(b > a);

        // Crossover: 0.9 / (1 + d) == 0.4 at d = 1.25 days
        let crossover = 0.9 / 0.4 - 1.0;
        let just_before = relevance_score(0.9, now - (1.2 * SECS_PER_DAY as f64) as i64, now);
        let just_after = relevance_score(0.9, now - (1.3 * SECS_PER_DAY as f64) as i64, now);
        assert!((crossover - 1.25_f64).abs() < 1e-9);
        assert!(just_before > b);
        assert!(just_after < b);
    }

    #[test]
    fn test_score_ignores_future_last_used() {
        assert_eq!(relevance_score(0.5, T0 + 1000, T0), 0.5);
    }

    #[test]
    fn test_query_ranks_by_decayed_weight() {
        let dir = TempDir::new().unwrap();
        let (mut store, clock) = open_store(&dir);

        let a = store.create(weighted(NodeType::Pattern, "old but heavy", 0.9)).unwrap();
        clock.advance_days(100);
        let b = store.create(weighted(NodeType::Pattern, "fresh but light", 0.4)).unwrap();

        let result = store.query(&QueryOptions::new());
        assert_eq!(result.nodes[0].node.id, b.id);
        assert_eq!(result.nodes[1].node.id, a.id);
        assert!(!result.truncated);
    }

    #[test]
    fn test_filters_are_conjunctive() {
        let dir = TempDir::new().unwrap();
        let (mut store, clock) = open_store(&dir);

        store
            .create(
                NewNode::builder(NodeType::Correction)
                    .summary("Avoid unwrap in handlers")
                    .file("src/handler.rs")
                    .weight(0.9)
                    .build()
                    .unwrap(),
            )
            .unwrap();
        store
            .create(
                NewNode::builder(NodeType::Pattern)
                    .summary("unwrap is fine in tests")
                    .file("src/handler.rs")
                    .weight(0.9)
                    .build()
                    .unwrap(),
            )
            .unwrap();
        store
            .create(weighted(NodeType::Correction, "UNWRAP misuse", 0.2))
            .unwrap();
        clock.advance_secs(10);
        let late = store
            .create(weighted(NodeType::Correction, "late unwrap note", 0.9))
            .unwrap();

        let by_text = store.find(&QueryOptions::new().text("unwrap"));
        assert_eq!(by_text.len(), 4);

        let combined = store.find(
            &QueryOptions::new()
                .text("UNWRAP")
                .node_type(NodeType::Correction)
                .min_weight(0.5),
        );
        assert_eq!(combined.len(), 2);

        let in_file = store.find(
            &QueryOptions::new()
                .file("src/handler.rs")
                .node_type(NodeType::Correction),
        );
        assert_eq!(in_file.len(), 1);
        assert_eq!(in_file[0].content.summary, "Avoid unwrap in handlers");

        let recent = store.find(&QueryOptions::new().since(T0 + 5));
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, late.id);
    }

    #[test]
    fn test_limit_sets_truncated() {
        let dir = TempDir::new().unwrap();
        let (mut store, _) = open_store(&dir);
        for i in 0..5 {
            store.create(pattern(&format!("node {}", i))).unwrap();
        }

        let result = store.query(&QueryOptions::new().limit(3));
        assert_eq!(result.nodes.len(), 3);
        assert!(result.truncated);

        let result = store.query(&QueryOptions::new().limit(5));
        assert!(!result.truncated);
    }

    #[test]
    fn test_ties_keep_encounter_order() {
        let dir = TempDir::new().unwrap();
        let (mut store, _) = open_store(&dir);
        store.create(weighted(NodeType::Pattern, "p", 0.5)).unwrap();
        store.create(weighted(NodeType::Decision, "d", 0.5)).unwrap();
        store.create(weighted(NodeType::Session, "s", 0.5)).unwrap();

        let order: Vec<NodeType> = store
            .query(&QueryOptions::new())
            .nodes
            .iter()
            .map(|r| r.node.node_type)
            .collect();
        assert_eq!(
            order,
            vec![NodeType::Pattern, NodeType::Decision, NodeType::Session]
        );
    }

    #[test]
    fn test_query_expands_edges() {
        let dir = TempDir::new().unwrap();
        let (mut store, _) = open_store(&dir);
        let a = store.create(pattern("alpha")).unwrap();
        let b = store.create(pattern("beta")).unwrap();
        store
            .add_edge(&a.id, &b.id, RelationType::Semantic, EdgeProperties::default())
            .unwrap();

        let flat = store.query(&QueryOptions::new().text("alpha"));
        assert!(flat.edges.is_empty());

        let expanded = store.query(&QueryOptions::new().text("alpha").depth(1));
        assert_eq!(expanded.nodes.len(), 1);
        assert_eq!(expanded.edges.len(), 1);
        assert_eq!(expanded.edges[0].target, b.id);
    }
}
