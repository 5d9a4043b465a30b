//! Knowledge node types and builders
//!
//! Core types for representing learnings in the graph.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::GraphError;

/// Kind of learning a node holds
///
/// Each type is stored in its own partition document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Pattern,
    Correction,
    Decision,
    Convention,
    Feedback,
    Session,
}

impl NodeType {
    /// Every node type, in partition scan order
    pub const ALL: [NodeType; 6] = [
        NodeType::Pattern,
        NodeType::Correction,
        NodeType::Decision,
        NodeType::Convention,
        NodeType::Feedback,
        NodeType::Session,
    ];

    /// Token embedded in node IDs
    pub fn short_code(&self) -> &'static str {
        match self {
            Self::Pattern => "pat",
            Self::Correction => "cor",
            Self::Decision => "dec",
            Self::Convention => "con",
            Self::Feedback => "fbk",
            Self::Session => "ses",
        }
    }

    /// Full lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pattern => "pattern",
            Self::Correction => "correction",
            Self::Decision => "decision",
            Self::Convention => "convention",
            Self::Feedback => "feedback",
            Self::Session => "session",
        }
    }

    /// On-disk partition name
    pub fn partition(&self) -> &'static str {
        match self {
            Self::Pattern => "patterns",
            Self::Correction => "corrections",
            Self::Decision => "decisions",
            Self::Convention => "conventions",
            Self::Feedback => "feedback",
            Self::Session => "sessions",
        }
    }

    /// Storage key of this type's partition
    pub fn storage_key(&self) -> String {
        format!("nodes.{}", self.partition())
    }

    /// Resolve the type from the token at the start of a node ID
    pub fn from_node_id(id: &str) -> Option<Self> {
        let code = id.split('_').next()?;
        Self::ALL.into_iter().find(|t| t.short_code() == code)
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == lower || t.short_code() == lower || t.partition() == lower)
            .ok_or_else(|| GraphError::invalid_input(format!("unknown node type: {}", s)))
    }
}

/// What was learned
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeContent {
    /// Short description, bounded in length
    pub summary: String,
    /// Free-form explanation
    #[serde(default)]
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Where the learning applies
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    /// Inclusive line range
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_range: Option<(u32, u32)>,
    #[serde(default)]
    pub symbols: Vec<String>,
}

/// Confidence and usage signals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeScores {
    /// Importance/confidence (0.0 to 1.0)
    pub weight: f32,
    pub usage_count: u64,
    /// Running average of usage outcomes (0.0 to 1.0)
    pub success_rate: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTimestamps {
    pub created: i64,
    pub updated: i64,
    pub last_used: i64,
}

/// Provenance of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeSource {
    #[default]
    Auto,
    User,
    Llm,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMeta {
    pub source: NodeSource,
    /// Starts at 1 and grows by one on every update
    pub version: u64,
}

/// A unit of learned knowledge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier, `<type code>_<unix secs>_<digest>`
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Hash of summary + detail
    pub content_hash: String,
    pub content: NodeContent,
    #[serde(default)]
    pub context: NodeContext,
    pub scores: NodeScores,
    pub timestamps: NodeTimestamps,
    pub meta: NodeMeta,
}

impl Node {
    /// Case-insensitive substring match against summary and detail
    ///
    /// `needle` must already be lowercase.
    pub fn matches_text(&self, needle: &str) -> bool {
        self.content.summary.to_lowercase().contains(needle)
            || self.content.detail.to_lowercase().contains(needle)
    }

    /// Days since the node was last used
    pub fn age_days(&self, now: i64) -> f64 {
        let secs = (now - self.timestamps.last_used).max(0);
        secs as f64 / crate::SECS_PER_DAY as f64
    }
}

/// Truncate to at most `max` characters on a char boundary
pub fn truncate_summary(summary: &str, max: usize) -> String {
    match summary.char_indices().nth(max) {
        Some((idx, _)) => summary[..idx].to_string(),
        None => summary.to_string(),
    }
}

/// Parameters for creating a node
#[derive(Debug, Clone, PartialEq)]
pub struct NewNode {
    pub node_type: NodeType,
    pub content: NodeContent,
    pub context: NodeContext,
    /// Overrides the configured default weight
    pub weight: Option<f32>,
    pub source: NodeSource,
}

impl NewNode {
    pub fn builder(node_type: NodeType) -> NewNodeBuilder {
        NewNodeBuilder::new(node_type)
    }
}

/// Builder for NewNode with fluent API
#[derive(Debug)]
pub struct NewNodeBuilder {
    node_type: NodeType,
    summary: Option<String>,
    detail: String,
    code: Option<String>,
    language: Option<String>,
    context: NodeContext,
    weight: Option<f32>,
    source: NodeSource,
}

impl NewNodeBuilder {
    pub fn new(node_type: NodeType) -> Self {
        Self {
            node_type,
            summary: None,
            detail: String::new(),
            code: None,
            language: None,
            context: NodeContext::default(),
            weight: None,
            source: NodeSource::default(),
        }
    }

    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    /// Attach a code snippet
    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn file(mut self, file: impl Into<String>) -> Self {
        self.context.file = Some(file.into());
        self
    }

    pub fn function(mut self, function: impl Into<String>) -> Self {
        self.context.function = Some(function.into());
        self
    }

    pub fn lines(mut self, start: u32, end: u32) -> Self {
        self.context.line_range = Some((start, end));
        self
    }

    pub fn symbol(mut self, symbol: impl Into<String>) -> Self {
        self.context.symbols.push(symbol.into());
        self
    }

    pub fn symbols(mut self, symbols: Vec<String>) -> Self {
        self.context.symbols = symbols;
        self
    }

    /// Set the whole context at once
    pub fn context(mut self, context: NodeContext) -> Self {
        self.context = context;
        self
    }

    /// Set initial weight (clamped to 0.0..=1.0)
    pub fn weight(mut self, weight: f32) -> Self {
        self.weight = Some(weight.clamp(0.0, 1.0));
        self
    }

    pub fn source(mut self, source: NodeSource) -> Self {
        self.source = source;
        self
    }

    pub fn build(self) -> Result<NewNode, NodeBuilderError> {
        let summary = self.summary.ok_or(NodeBuilderError::MissingSummary)?;
        if summary.trim().is_empty() {
            return Err(NodeBuilderError::EmptySummary);
        }

        Ok(NewNode {
            node_type: self.node_type,
            content: NodeContent {
                summary,
                detail: self.detail,
                code: self.code,
                language: self.language,
            },
            context: self.context,
            weight: self.weight,
            source: self.source,
        })
    }
}

/// Errors that can occur when building a NewNode
#[derive(Debug, thiserror::Error)]
pub enum NodeBuilderError {
    #[error("Missing required field: summary")]
    MissingSummary,
    #[error("Summary must not be blank")]
    EmptySummary,
}

/// Partial update of a node; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeUpdate {
    pub summary: Option<String>,
    pub detail: Option<String>,
    pub code: Option<String>,
    pub language: Option<String>,
    pub file: Option<String>,
    pub function: Option<String>,
    pub line_range: Option<(u32, u32)>,
    pub symbols: Option<Vec<String>>,
    pub weight: Option<f32>,
    pub success_rate: Option<f32>,
}

impl NodeUpdate {
    /// Merge into `node`; returns whether the context changed
    pub(crate) fn apply(self, node: &mut Node, summary_max_len: usize) -> bool {
        if let Some(summary) = self.summary {
            node.content.summary = truncate_summary(&summary, summary_max_len);
        }
        if let Some(detail) = self.detail {
            node.content.detail = detail;
        }
        if let Some(code) = self.code {
            node.content.code = Some(code);
        }
        if let Some(language) = self.language {
            node.content.language = Some(language);
        }

        let before = node.context.clone();
        if let Some(file) = self.file {
            node.context.file = Some(file);
        }
        if let Some(function) = self.function {
            node.context.function = Some(function);
        }
        if let Some(range) = self.line_range {
            node.context.line_range = Some(range);
        }
        if let Some(symbols) = self.symbols {
            node.context.symbols = symbols;
        }

        if let Some(weight) = self.weight {
            node.scores.weight = weight.clamp(0.0, 1.0);
        }
        if let Some(rate) = self.success_rate {
            node.scores.success_rate = rate.clamp(0.0, 1.0);
        }

        before != node.context
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_type_codes_round_trip() {
        for node_type in NodeType::ALL {
            let id = format!("{}_1700000000_deadbeef", node_type.short_code());
            assert_eq!(NodeType::from_node_id(&id), Some(node_type));
        }
        assert_eq!(NodeType::from_node_id("zzz_1_x"), None);
    }

    #[test]
    fn test_node_type_parse_accepts_names_and_codes() {
        assert_eq!("pattern".parse::<NodeType>().unwrap(), NodeType::Pattern);
        assert_eq!("fbk".parse::<NodeType>().unwrap(), NodeType::Feedback);
        assert_eq!("Sessions".parse::<NodeType>().unwrap(), NodeType::Session);
        assert!("widget".parse::<NodeType>().is_err());
    }

    #[test]
    fn test_storage_key() {
        assert_eq!(NodeType::Correction.storage_key(), "nodes.corrections");
    }

    #[test]
    fn test_builder() {
        let params = NewNode::builder(NodeType::Correction)
            .summary("Use ? instead of unwrap")
            .detail("Propagate errors in library code")
            .code("let x = parse(s)?;")
            .language("rust")
            .file("src/lib.rs")
            .symbol("parse")
            .weight(1.5)
            .build()
            .unwrap();

        assert_eq!(params.node_type, NodeType::Correction);
        assert_eq!(params.content.language.as_deref(), Some("rust"));
        assert_eq!(params.context.symbols, vec!["parse".to_string()]);
        assert_eq!(params.weight, Some(1.0));
    }

    #[test]
    fn test_builder_missing_summary() {
        let result = NewNode::builder(NodeType::Pattern).detail("no summary").build();
        assert!(matches!(result, Err(NodeBuilderError::MissingSummary)));

        let result = NewNode::builder(NodeType::Pattern).summary("  ").build();
        assert!(matches!(result, Err(NodeBuilderError::EmptySummary)));
    }

    #[test]
    fn test_truncate_summary_respects_char_boundaries() {
        assert_eq!(truncate_summary("héllo", 2), "hé");
        assert_eq!(truncate_summary("short", 200), "short");
    }

    #[test]
    fn test_update_reports_context_change() {
        let mut node = Node {
            id: "pat_1_abcd1234".into(),
            node_type: NodeType::Pattern,
            content_hash: String::new(),
            content: NodeContent {
                summary: "s".into(),
                ..Default::default()
            },
            context: NodeContext::default(),
            scores: NodeScores {
                weight: 0.5,
                usage_count: 0,
                success_rate: 1.0,
            },
            timestamps: NodeTimestamps {
                created: 1,
                updated: 1,
                last_used: 1,
            },
            meta: NodeMeta {
                source: NodeSource::Auto,
                version: 1,
            },
        };

        let changed = NodeUpdate {
            detail: Some("more".into()),
            weight: Some(2.0),
            ..Default::default()
        }
        .apply(&mut node, 200);
        assert!(!changed);
        assert_eq!(node.scores.weight, 1.0);

        let changed = NodeUpdate {
            file: Some("a.rs".into()),
            ..Default::default()
        }
        .apply(&mut node, 200);
        assert!(changed);
    }

    #[test]
    fn test_node_serializes_type_field() {
        let json = serde_json::to_value(NodeType::Decision).unwrap();
        assert_eq!(json, serde_json::json!("decision"));
    }
}
