//! Learners turn raw developer events into node parameters
//!
//! A [`Learner`] decides whether it handles an event, extracts zero or more
//! data records from it and maps each record to a [`NewNode`]. The engine
//! only drives this capability set; it never depends on concrete learners.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::node::{NewNode, NewNodeBuilder, Node, NodeSource, NodeType};
use crate::query::QueryOptions;

/// A raw event from the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl LearnEvent {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            file: None,
            timestamp: None,
        }
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    /// Event data as an object, with the event file folded in when absent
    fn record(&self) -> Value {
        let mut map = match &self.data {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other.clone());
                map
            }
        };
        if let Some(file) = &self.file {
            map.entry("file").or_insert_with(|| json!(file));
        }
        Value::Object(map)
    }
}

/// Callback used by learners to look up existing nodes
pub type QueryFn<'a> = &'a dyn Fn(&QueryOptions) -> Vec<Node>;

/// An extraction policy for one kind of event
pub trait Learner: Send + Sync {
    fn name(&self) -> &'static str;

    fn detect(&self, event: &LearnEvent) -> bool;

    /// Data records worth considering; empty when nothing applies
    fn extract(&self, event: &LearnEvent) -> Vec<Value> {
        vec![event.record()]
    }

    fn should_learn(&self, _data: &Value) -> bool {
        true
    }

    fn create_node_params(&self, data: &Value) -> Option<NewNode>;

    /// IDs of existing nodes related to `data`
    ///
    /// Defaults to the three most relevant nodes about the same file.
    fn find_related(&self, data: &Value, query: QueryFn<'_>) -> Vec<String> {
        let Some(file) = str_field(data, "file") else {
            return Vec::new();
        };
        query(&QueryOptions::new().file(file).limit(3))
            .into_iter()
            .map(|node| node.id)
            .collect()
    }
}

fn str_field<'a>(data: &'a Value, key: &str) -> Option<&'a str> {
    data.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn first_line(text: &str) -> &str {
    text.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("")
}

/// Builder pre-populated with the optional file and language of a record
fn base(node_type: NodeType, data: &Value) -> NewNodeBuilder {
    let mut builder = NewNode::builder(node_type);
    if let Some(file) = str_field(data, "file") {
        builder = builder.file(file);
    }
    if let Some(language) = str_field(data, "language") {
        builder = builder.language(language);
    }
    if let Some(function) = str_field(data, "function") {
        builder = builder.function(function);
    }
    builder
}

/// Accepted code suggestions (`code_accepted`)
#[derive(Debug, Default)]
pub struct PatternLearner;

impl PatternLearner {
    const MIN_CODE_LEN: usize = 10;
}

impl Learner for PatternLearner {
    fn name(&self) -> &'static str {
        "pattern"
    }

    fn detect(&self, event: &LearnEvent) -> bool {
        event.kind == "code_accepted"
    }

    fn should_learn(&self, data: &Value) -> bool {
        str_field(data, "code").map_or(false, |code| code.len() >= Self::MIN_CODE_LEN)
    }

    fn create_node_params(&self, data: &Value) -> Option<NewNode> {
        let code = str_field(data, "code")?;
        let summary = match str_field(data, "description") {
            Some(description) => description.to_string(),
            None => format!("Accepted pattern: {}", first_line(code)),
        };
        base(NodeType::Pattern, data)
            .summary(summary)
            .code(code)
            .weight(0.5)
            .build()
            .ok()
    }
}

/// User edits to generated code (`code_corrected`)
#[derive(Debug, Default)]
pub struct CorrectionLearner;

impl Learner for CorrectionLearner {
    fn name(&self) -> &'static str {
        "correction"
    }

    fn detect(&self, event: &LearnEvent) -> bool {
        event.kind == "code_corrected"
    }

    fn should_learn(&self, data: &Value) -> bool {
        match (str_field(data, "original"), str_field(data, "corrected")) {
            (Some(original), Some(corrected)) => original != corrected,
            _ => false,
        }
    }

    fn create_node_params(&self, data: &Value) -> Option<NewNode> {
        let original = str_field(data, "original")?;
        let corrected = str_field(data, "corrected")?;
        let summary = match str_field(data, "reason") {
            Some(reason) => reason.to_string(),
            None => format!(
                "Corrected `{}` to `{}`",
                first_line(original),
                first_line(corrected)
            ),
        };
        base(NodeType::Correction, data)
            .summary(summary)
            .detail(format!("Before:\n{}\n\nAfter:\n{}", original, corrected))
            .code(corrected)
            .weight(0.7)
            .source(NodeSource::User)
            .build()
            .ok()
    }
}

/// Explicit ratings and comments (`feedback`)
#[derive(Debug, Default)]
pub struct FeedbackLearner;

impl FeedbackLearner {
    fn is_positive(data: &Value) -> bool {
        match data.get("rating") {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().map_or(false, |n| n > 0.0),
            Some(Value::String(s)) => matches!(s.as_str(), "positive" | "up" | "good"),
            _ => false,
        }
    }
}

impl Learner for FeedbackLearner {
    fn name(&self) -> &'static str {
        "feedback"
    }

    fn detect(&self, event: &LearnEvent) -> bool {
        event.kind == "feedback"
    }

    fn should_learn(&self, data: &Value) -> bool {
        str_field(data, "comment").is_some()
    }

    fn create_node_params(&self, data: &Value) -> Option<NewNode> {
        let comment = str_field(data, "comment")?;
        let positive = Self::is_positive(data);
        let mut builder = base(NodeType::Feedback, data)
            .summary(comment)
            .weight(if positive { 0.6 } else { 0.4 })
            .source(NodeSource::User);
        if let Some(subject) = str_field(data, "subject") {
            builder = builder.detail(format!(
                "{} feedback on: {}",
                if positive { "Positive" } else { "Negative" },
                subject
            ));
        }
        builder.build().ok()
    }
}

/// Rules phrased in free-form notes (`user_note`)
///
/// Every sentence that reads like a rule ("always ...", "never ...",
/// "prefer ...") becomes its own convention.
#[derive(Debug)]
pub struct ConventionLearner {
    rule: Option<Regex>,
}

impl ConventionLearner {
    const MIN_RULE_LEN: usize = 8;

    pub fn new() -> Self {
        Self {
            rule: Regex::new(r"(?i)\b(always|never|prefer|avoid|must|should|don't|do not)\b").ok(),
        }
    }

    fn is_rule(&self, sentence: &str) -> bool {
        self.rule.as_ref().map_or(false, |re| re.is_match(sentence))
    }
}

impl Default for ConventionLearner {
    fn default() -> Self {
        Self::new()
    }
}

impl Learner for ConventionLearner {
    fn name(&self) -> &'static str {
        "convention"
    }

    fn detect(&self, event: &LearnEvent) -> bool {
        event.kind == "user_note"
    }

    fn extract(&self, event: &LearnEvent) -> Vec<Value> {
        let record = event.record();
        let Some(text) = str_field(&record, "text") else {
            return Vec::new();
        };
        let file = str_field(&record, "file");

        text.split(|c| matches!(c, '.' | '!' | '\n' | ';'))
            .map(str::trim)
            .filter(|sentence| self.is_rule(sentence))
            .map(|sentence| json!({ "rule": sentence, "file": file }))
            .collect()
    }

    fn should_learn(&self, data: &Value) -> bool {
        str_field(data, "rule").map_or(false, |rule| rule.len() >= Self::MIN_RULE_LEN)
    }

    fn create_node_params(&self, data: &Value) -> Option<NewNode> {
        let rule = str_field(data, "rule")?;
        base(NodeType::Convention, data)
            .summary(rule)
            .weight(0.6)
            .source(NodeSource::User)
            .build()
            .ok()
    }
}

/// Architectural or design decisions (`decision`)
#[derive(Debug, Default)]
pub struct DecisionLearner;

impl Learner for DecisionLearner {
    fn name(&self) -> &'static str {
        "decision"
    }

    fn detect(&self, event: &LearnEvent) -> bool {
        event.kind == "decision"
    }

    fn should_learn(&self, data: &Value) -> bool {
        str_field(data, "title").is_some()
    }

    fn create_node_params(&self, data: &Value) -> Option<NewNode> {
        let title = str_field(data, "title")?;
        let mut detail = str_field(data, "rationale").unwrap_or_default().to_string();

        let alternatives: Vec<&str> = data
            .get("alternatives")
            .and_then(Value::as_array)
            .map(|alts| alts.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        if !alternatives.is_empty() {
            if !detail.is_empty() {
                detail.push_str("\n\n");
            }
            detail.push_str("Alternatives considered: ");
            detail.push_str(&alternatives.join(", "));
        }

        base(NodeType::Decision, data)
            .summary(title)
            .detail(detail)
            .weight(0.6)
            .source(NodeSource::User)
            .build()
            .ok()
    }
}

/// End-of-session summaries (`session_end`)
#[derive(Debug, Default)]
pub struct SessionLearner;

impl Learner for SessionLearner {
    fn name(&self) -> &'static str {
        "session"
    }

    fn detect(&self, event: &LearnEvent) -> bool {
        event.kind == "session_end"
    }

    fn should_learn(&self, data: &Value) -> bool {
        str_field(data, "summary").is_some()
    }

    fn create_node_params(&self, data: &Value) -> Option<NewNode> {
        let summary = str_field(data, "summary")?;
        let files: Vec<&str> = data
            .get("files")
            .and_then(Value::as_array)
            .map(|files| files.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let mut builder = NewNode::builder(NodeType::Session)
            .summary(summary)
            .weight(0.4);
        if !files.is_empty() {
            builder = builder.detail(format!("Files touched: {}", files.join(", ")));
        }
        builder.build().ok()
    }

    fn find_related(&self, _data: &Value, _query: QueryFn<'_>) -> Vec<String> {
        Vec::new()
    }
}

/// Ordered set of learners; the first one that detects an event handles it
#[derive(Default)]
pub struct LearnerRegistry {
    learners: Vec<Box<dyn Learner>>,
}

impl LearnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in learner
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(PatternLearner));
        registry.register(Box::new(CorrectionLearner));
        registry.register(Box::new(FeedbackLearner));
        registry.register(Box::new(ConventionLearner::new()));
        registry.register(Box::new(DecisionLearner));
        registry.register(Box::new(SessionLearner));
        registry
    }

    pub fn register(&mut self, learner: Box<dyn Learner>) {
        self.learners.push(learner);
    }

    pub fn find(&self, event: &LearnEvent) -> Option<&dyn Learner> {
        self.learners
            .iter()
            .find(|learner| learner.detect(event))
            .map(|learner| learner.as_ref())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.learners.iter().map(|l| l.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.learners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.learners.is_empty()
    }
}
