//! Delta-based version history
//!
//! Node mutations accumulate as pending [`Change`]s. A commit seals them into
//! an immutable, content-addressed [`Delta`] whose parent is the previous
//! head. History is recovered by walking parent pointers from the head.
//!
//! Rollback only moves the head pointer: deltas ahead of it stay on disk and
//! remain readable through [`GraphStore::get_delta`], and the next commit
//! forks from the rolled-back head.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::hash;
use crate::store::GraphStore;

/// Ordered list of every committed delta hash
const DELTA_INDEX_KEY: &str = "deltas.index";

fn delta_key(hash: &str) -> String {
    format!("deltas.objects.{}", hash)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Add,
    Modify,
    Delete,
}

impl ChangeOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Modify => "modify",
            Self::Delete => "delete",
        }
    }
}

/// One recorded mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub op: ChangeOp,
    /// Logical path, e.g. `nodes.patterns.<id>`
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
}

impl Change {
    pub fn add(path: impl Into<String>, after: &str) -> Self {
        Self {
            op: ChangeOp::Add,
            path: path.into(),
            before: None,
            after: Some(after.to_string()),
        }
    }

    pub fn modify(path: impl Into<String>, before: &str, after: &str) -> Self {
        Self {
            op: ChangeOp::Modify,
            path: path.into(),
            before: Some(before.to_string()),
            after: Some(after.to_string()),
        }
    }

    pub fn delete(path: impl Into<String>, before: &str) -> Self {
        Self {
            op: ChangeOp::Delete,
            path: path.into(),
            before: Some(before.to_string()),
            after: None,
        }
    }

    /// Stable text form used when hashing a delta
    pub fn descriptor(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.op.as_str(),
            self.path,
            self.before.as_deref().unwrap_or("-"),
            self.after.as_deref().unwrap_or("-")
        )
    }
}

/// What caused a commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    #[default]
    Auto,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaMetadata {
    pub message: String,
    pub trigger: Trigger,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// An immutable, content-addressed changeset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    pub hash: String,
    pub parent: Option<String>,
    pub timestamp: i64,
    pub changes: Vec<Change>,
    pub metadata: DeltaMetadata,
}

impl GraphStore {
    pub(crate) fn record_change(&mut self, change: Change) {
        self.pending.push(change);
    }

    /// Changes recorded since the last commit
    pub fn pending_changes(&self) -> &[Change] {
        &self.pending
    }

    /// Seal pending changes into a delta
    ///
    /// Returns `None` when nothing is pending. The delta object, the delta
    /// index and the head pointer are written to disk before this returns.
    pub fn commit(
        &mut self,
        message: &str,
        trigger: Trigger,
        session_id: Option<String>,
    ) -> Result<Option<String>> {
        if self.pending.is_empty() {
            return Ok(None);
        }

        let timestamp = self.clock.now();
        let parent = self.meta.head.clone();
        let hash = hash::delta_hash(&self.pending, parent.as_deref(), timestamp);

        let delta = Delta {
            hash: hash.clone(),
            parent,
            timestamp,
            changes: self.pending.clone(),
            metadata: DeltaMetadata {
                message: message.to_string(),
                trigger,
                session_id,
            },
        };
        self.storage.save_as(&delta_key(&hash), &delta, true)?;

        let mut index = self.delta_hashes();
        if !index.contains(&hash) {
            index.push(hash.clone());
        }
        self.storage.save_as(DELTA_INDEX_KEY, &index, true)?;

        self.meta.head = Some(hash.clone());
        self.meta.delta_count += 1;
        self.persist_meta(true)?;

        log::info!(
            "Committed delta {} ({} changes): {}",
            hash,
            delta.changes.len(),
            message
        );
        self.pending.clear();
        Ok(Some(hash))
    }

    /// Point head at an existing delta; false if it does not exist
    pub fn rollback(&mut self, hash: &str) -> Result<bool> {
        if self.get_delta(hash).is_none() {
            return Ok(false);
        }

        let previous = self.meta.head.replace(hash.to_string());
        self.persist_meta(true)?;
        log::info!(
            "Rolled back head from {} to {}",
            previous.as_deref().unwrap_or("<none>"),
            hash
        );
        Ok(true)
    }

    /// Read any stored delta
    pub fn get_delta(&self, hash: &str) -> Option<Delta> {
        if !hash::is_digest(hash) {
            return None;
        }
        let value = self.storage.load_existing(&delta_key(hash))?;
        match serde_json::from_value(value) {
            Ok(delta) => Some(delta),
            Err(e) => {
                log::warn!("Malformed delta {}: {}", hash, e);
                None
            }
        }
    }

    /// Walk parents from head, newest first
    pub fn get_history(&self, limit: usize) -> Vec<Delta> {
        let mut history = Vec::new();
        let mut cursor = self.meta.head.clone();

        while let Some(hash) = cursor {
            if history.len() >= limit {
                break;
            }
            let Some(delta) = self.get_delta(&hash) else {
                log::warn!("History chain broken at missing delta {}", hash);
                break;
            };
            cursor = delta.parent.clone();
            history.push(delta);
        }

        history
    }

    /// Every committed delta hash in commit order
    pub fn delta_hashes(&self) -> Vec<String> {
        self.storage.load_as(DELTA_INDEX_KEY)
    }

    pub(crate) fn write_delta(&self, delta: &Delta) -> Result<()> {
        self.storage.save_as(&delta_key(&delta.hash), delta, true)
    }

    pub(crate) fn write_delta_index(&self, hashes: &[String]) -> Result<()> {
        self.storage.save_as(DELTA_INDEX_KEY, &hashes, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeUpdate;
    use crate::store::tests::{open_store, pattern};
    use tempfile::TempDir;

    #[test]
    fn test_commit_without_changes_is_noop() {
        let dir = TempDir::new().unwrap();
        let (mut store, _) = open_store(&dir);

        assert!(store.commit("nothing", Trigger::User, None).unwrap().is_none());
        assert!(store.meta().head.is_none());
        assert_eq!(store.meta().delta_count, 0);
    }

    #[test]
    fn test_commit_then_history() {
        let dir = TempDir::new().unwrap();
        let (mut store, clock) = open_store(&dir);
        let node = store.create(pattern("first")).unwrap();

        let first = store.commit("first", Trigger::User, None).unwrap().unwrap();
        assert!(store.pending_changes().is_empty());
        assert_eq!(store.meta().delta_count, 1);

        clock.advance_secs(10);
        store
            .update(
                &node.id,
                NodeUpdate {
                    detail: Some("changed".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        store.delete(&node.id).unwrap();
        let second = store
            .commit("second", Trigger::Auto, Some("session-1".into()))
            .unwrap()
            .unwrap();

        let history = store.get_history(1);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].hash, second);

        let history = store.get_history(10);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].parent.as_deref(), Some(first.as_str()));
        assert_eq!(history[1].parent, None);
        assert_eq!(history[0].changes.len(), 2);
        assert_eq!(history[0].changes[1].op, ChangeOp::Delete);
        assert_eq!(history[0].metadata.session_id.as_deref(), Some("session-1"));
        assert_eq!(store.delta_hashes(), vec![first, second]);
    }

    #[test]
    fn test_commit_is_durable_immediately() {
        let dir = TempDir::new().unwrap();
        let (mut store, _) = open_store(&dir);
        store.create(pattern("x")).unwrap();
        let hash = store.commit("durable", Trigger::User, None).unwrap().unwrap();

        let path = dir.path().join("deltas/objects").join(format!("{}.json", hash));
        assert!(path.exists());
        let meta: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join("meta.json")).unwrap()).unwrap();
        assert_eq!(meta["head"], serde_json::json!(hash));
    }

    #[test]
    fn test_malformed_hashes_are_unknown() {
        let dir = TempDir::new().unwrap();
        let (mut store, _) = open_store(&dir);
        store.create(pattern("x")).unwrap();
        let head = store.commit("x", Trigger::User, None).unwrap().unwrap();

        for bogus in ["/etc/passwd", "../meta", "ABCDEF12", "index"] {
            assert!(store.get_delta(bogus).is_none());
            assert!(!store.rollback(bogus).unwrap());
        }
        assert_eq!(store.meta().head.as_deref(), Some(head.as_str()));
    }

    #[test]
    fn test_rollback_moves_head_and_keeps_newer_deltas() {
        let dir = TempDir::new().unwrap();
        let (mut store, clock) = open_store(&dir);

        store.create(pattern("a")).unwrap();
        let first = store.commit("a", Trigger::User, None).unwrap().unwrap();
        clock.advance_secs(1);
        store.create(pattern("b")).unwrap();
        let second = store.commit("b", Trigger::User, None).unwrap().unwrap();

        assert!(store.rollback(&first).unwrap());
        assert_eq!(store.meta().head.as_deref(), Some(first.as_str()));
        assert!(store.get_delta(&second).is_some());
        assert_eq!(store.get_history(10).len(), 1);

        // Next commit forks from the rolled-back head
        clock.advance_secs(1);
        store.create(pattern("c")).unwrap();
        let third = store.commit("c", Trigger::User, None).unwrap().unwrap();
        assert_eq!(
            store.get_delta(&third).unwrap().parent.as_deref(),
            Some(first.as_str())
        );
        assert_eq!(store.meta().delta_count, 3);
    }

    #[test]
    fn test_rollback_to_unknown_fails() {
        let dir = TempDir::new().unwrap();
        let (mut store, _) = open_store(&dir);
        store.create(pattern("a")).unwrap();
        let head = store.commit("a", Trigger::User, None).unwrap();

        assert!(!store.rollback("ffffffff").unwrap());
        assert_eq!(store.meta().head, head);
    }

    #[test]
    fn test_change_descriptor() {
        let change = Change::delete("nodes.patterns.pat_1_x", "abcd1234");
        assert_eq!(change.descriptor(), "delete:nodes.patterns.pat_1_x:abcd1234:-");
    }
}
