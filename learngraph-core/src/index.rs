//! Secondary indexes for fast node lookups.
//!
//! Indices are a derived cache of node content: they are kept in step with
//! every CRUD operation and can always be rebuilt from a full node scan.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::Result;
use crate::node::Node;
use crate::storage::Storage;
use crate::store::GraphStore;

/// Key -> ordered, duplicate-free node IDs
pub type IdIndex = BTreeMap<String, Vec<String>>;

/// The persisted indices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    ByFile,
    BySymbol,
    ByTime,
}

impl IndexKind {
    pub const ALL: [IndexKind; 3] = [IndexKind::ByFile, IndexKind::BySymbol, IndexKind::ByTime];

    pub fn name(&self) -> &'static str {
        match self {
            Self::ByFile => "by_file",
            Self::BySymbol => "by_symbol",
            Self::ByTime => "by_time",
        }
    }

    pub fn storage_key(&self) -> String {
        format!("indices.{}", self.name())
    }
}

/// Secondary indexes over the node store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Indices {
    /// File path -> node IDs
    pub by_file: IdIndex,
    /// Symbol name -> node IDs (a node may appear under several symbols)
    pub by_symbol: IdIndex,
    /// Day bucket (`YYYY-MM-DD` of creation) -> node IDs
    pub by_time: IdIndex,
}

impl Indices {
    pub(crate) fn load(storage: &Storage) -> Self {
        Self {
            by_file: storage.load_as(&IndexKind::ByFile.storage_key()),
            by_symbol: storage.load_as(&IndexKind::BySymbol.storage_key()),
            by_time: storage.load_as(&IndexKind::ByTime.storage_key()),
        }
    }

    pub(crate) fn persist(&self, storage: &Storage) -> Result<()> {
        for kind in IndexKind::ALL {
            storage.save_as(&kind.storage_key(), self.get(kind), false)?;
        }
        Ok(())
    }

    /// Build indices from scratch
    pub fn build<'a>(nodes: impl IntoIterator<Item = &'a Node>) -> Self {
        let mut nodes: Vec<&Node> = nodes.into_iter().collect();
        nodes.sort_by_key(|n| n.timestamps.created);

        let mut indices = Self::default();
        for node in nodes {
            indices.add(node);
        }
        indices
    }

    pub fn get(&self, kind: IndexKind) -> &IdIndex {
        match kind {
            IndexKind::ByFile => &self.by_file,
            IndexKind::BySymbol => &self.by_symbol,
            IndexKind::ByTime => &self.by_time,
        }
    }

    /// Whether both hold the same IDs under the same keys, ignoring order
    pub fn same_entries(&self, other: &Indices) -> bool {
        IndexKind::ALL
            .into_iter()
            .all(|kind| entry_set(self.get(kind)) == entry_set(other.get(kind)))
    }

    pub fn is_empty(&self) -> bool {
        self.by_file.is_empty() && self.by_symbol.is_empty() && self.by_time.is_empty()
    }

    /// Index a new node
    pub fn add(&mut self, node: &Node) {
        self.add_context(node);
        insert_unique(
            &mut self.by_time,
            &day_bucket(node.timestamps.created),
            &node.id,
        );
    }

    /// Remove a node from every index
    pub fn remove(&mut self, node: &Node) {
        self.remove_context(node);
        remove_from(
            &mut self.by_time,
            &day_bucket(node.timestamps.created),
            &node.id,
        );
    }

    /// Move a node's file/symbol entries after its context changed
    ///
    /// Time buckets are append-only and stay untouched.
    pub fn reindex_context(&mut self, before: &Node, after: &Node) {
        self.remove_context(before);
        self.add_context(after);
    }

    fn add_context(&mut self, node: &Node) {
        if let Some(file) = &node.context.file {
            insert_unique(&mut self.by_file, file, &node.id);
        }
        for symbol in &node.context.symbols {
            insert_unique(&mut self.by_symbol, symbol, &node.id);
        }
    }

    fn remove_context(&mut self, node: &Node) {
        if let Some(file) = &node.context.file {
            remove_from(&mut self.by_file, file, &node.id);
        }
        for symbol in &node.context.symbols {
            remove_from(&mut self.by_symbol, symbol, &node.id);
        }
    }

    pub fn ids_for_file(&self, path: &str) -> &[String] {
        self.by_file.get(path).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn ids_for_symbol(&self, symbol: &str) -> &[String] {
        self.by_symbol.get(symbol).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn ids_for_day(&self, bucket: &str) -> &[String] {
        self.by_time.get(bucket).map(Vec::as_slice).unwrap_or_default()
    }
}

/// Day bucket for a unix timestamp
pub fn day_bucket(timestamp: i64) -> String {
    DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "invalid".to_string())
}

fn entry_set(index: &IdIndex) -> BTreeSet<(&str, &str)> {
    index
        .iter()
        .flat_map(|(key, ids)| ids.iter().map(move |id| (key.as_str(), id.as_str())))
        .collect()
}

fn insert_unique(index: &mut IdIndex, key: &str, id: &str) {
    let ids = index.entry(key.to_string()).or_default();
    if !ids.iter().any(|existing| existing == id) {
        ids.push(id.to_string());
    }
}

fn remove_from(index: &mut IdIndex, key: &str, id: &str) {
    if let Some(ids) = index.get_mut(key) {
        ids.retain(|existing| existing != id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}

impl GraphStore {
    /// Reconstruct every index from a full node scan
    pub fn rebuild_indices(&mut self) -> Result<()> {
        self.indices = Indices::build(self.partitions.values().flat_map(|p| p.values()));
        self.indices.persist(&self.storage)?;
        log::info!(
            "Rebuilt indices: {} files, {} symbols, {} days",
            self.indices.by_file.len(),
            self.indices.by_symbol.len(),
            self.indices.by_time.len()
        );
        Ok(())
    }

    pub fn indices(&self) -> &Indices {
        &self.indices
    }
}
