//! Cached JSON document storage with debounced flushing
//!
//! Every logical key (`meta`, `nodes.patterns`, `deltas.objects.<hash>`, ...)
//! maps to one JSON file under the data directory; dots in the key become
//! directory separators. Reads are served from an in-memory cache. Writes update
//! the cache at once, mark the key dirty and are flushed to disk after a quiet
//! period, or synchronously when the caller asks for an immediate write.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::error::{GraphError, Result};

/// Pending flush task for a key, tagged with the generation that scheduled it
type Timer = (u64, JoinHandle<()>);

struct StorageInner {
    root: PathBuf,
    cache: DashMap<String, Value>,
    dirty: Mutex<HashSet<String>>,
    timers: DashMap<String, Timer>,
    generation: AtomicU64,
    debounce: Duration,
}

/// Per-project document store
///
/// Cheap to clone; clones share the same cache and dirty set.
#[derive(Clone)]
pub struct Storage {
    inner: Arc<StorageInner>,
}

impl Storage {
    /// Open storage rooted at `root`, creating the directory if needed
    pub fn open(root: impl AsRef<Path>, debounce: Duration) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;

        log::debug!("Storage opened at: {}", root.display());

        Ok(Self {
            inner: Arc::new(StorageInner {
                root,
                cache: DashMap::new(),
                dirty: Mutex::new(HashSet::new()),
                timers: DashMap::new(),
                generation: AtomicU64::new(0),
                debounce,
            }),
        })
    }

    /// Directory backing this store
    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Load the document for `key`
    ///
    /// Returns `Value::Null` when the key has no data. Missing or unreadable
    /// files are cached as `Null`, so the disk is consulted once per key.
    pub fn load(&self, key: &str) -> Value {
        if let Some(value) = self.inner.cache.get(key) {
            return value.clone();
        }
        if let Err(e) = validate_key(key) {
            log::warn!("{}", e);
            return Value::Null;
        }

        let value = self.inner.read_from_disk(key);
        self.inner
            .cache
            .entry(key.to_string())
            .or_insert(value)
            .clone()
    }

    /// Load the document for `key` without remembering a miss
    ///
    /// For open-ended key spaces where caching every absent key would let the
    /// cache grow without bound.
    pub fn load_existing(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.inner.cache.get(key) {
            return Some(value.clone()).filter(|v| !v.is_null());
        }
        validate_key(key).ok()?;

        let value = self.inner.read_from_disk(key);
        if value.is_null() {
            return None;
        }
        Some(
            self.inner
                .cache
                .entry(key.to_string())
                .or_insert(value)
                .clone(),
        )
    }

    /// Load and deserialize, falling back to `T::default()` for absent or malformed data
    pub fn load_as<T>(&self, key: &str) -> T
    where
        T: DeserializeOwned + Default,
    {
        let value = self.load(key);
        if value.is_null() {
            return T::default();
        }

        match serde_json::from_value(value) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::warn!("Malformed document '{}': {}. Using default.", key, e);
                T::default()
            }
        }
    }

    /// Store `value` under `key`
    ///
    /// `Value::Null` deletes the backing file on flush. With `immediate` the
    /// write reaches disk before this returns; otherwise it is debounced.
    pub fn save(&self, key: &str, value: Value, immediate: bool) -> Result<()> {
        validate_key(key).map_err(|e| GraphError::invalid_input(e.to_string()))?;
        self.inner.cache.insert(key.to_string(), value);
        self.inner.dirty.lock().insert(key.to_string());

        if immediate {
            self.flush(key)
        } else {
            self.schedule(key);
            Ok(())
        }
    }

    /// Serialize and store
    pub fn save_as<T: Serialize>(&self, key: &str, data: &T, immediate: bool) -> Result<()> {
        let value = serde_json::to_value(data)?;
        self.save(key, value, immediate)
    }

    /// Delete the document for `key`
    pub fn remove(&self, key: &str, immediate: bool) -> Result<()> {
        self.save(key, Value::Null, immediate)
    }

    /// Write `key` to disk now if it is dirty
    pub fn flush(&self, key: &str) -> Result<()> {
        self.inner.cancel_timer(key);
        self.inner.flush_key(key).map_err(GraphError::from)
    }

    /// Write every dirty key to disk
    ///
    /// Keys that fail stay dirty; the first error is returned after all keys
    /// have been attempted.
    pub fn flush_all(&self) -> Result<()> {
        let keys: Vec<String> = self.inner.dirty.lock().iter().cloned().collect();
        let mut first_error = None;

        for key in keys {
            self.inner.cancel_timer(&key);
            if let Err(e) = self.inner.flush_key(&key) {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Whether `key` has unflushed changes
    pub fn is_dirty(&self, key: &str) -> bool {
        self.inner.dirty.lock().contains(key)
    }

    /// Number of keys waiting to be flushed
    pub fn dirty_count(&self) -> usize {
        self.inner.dirty.lock().len()
    }

    /// Schedule a debounced flush, superseding any pending one for the key
    fn schedule(&self, key: &str) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                // No runtime to host the timer
                if let Err(e) = self.inner.flush_key(key) {
                    log::warn!("Failed to flush '{}': {}", key, e);
                }
                return;
            }
        };

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let inner = Arc::clone(&self.inner);
        let task_key = key.to_string();
        let delay = self.inner.debounce;

        let task = handle.spawn(async move {
            tokio::time::sleep(delay).await;
            inner
                .timers
                .remove_if(&task_key, |_, (current, _)| *current == generation);
            if let Err(e) = inner.flush_key(&task_key) {
                log::warn!(
                    "Debounced flush of '{}' failed: {}. Keeping in memory.",
                    task_key,
                    e
                );
            }
        });

        if let Some((_, previous)) = self
            .inner
            .timers
            .insert(key.to_string(), (generation, task))
        {
            previous.abort();
        }
    }
}

impl StorageInner {
    /// Map a logical key to its file
    fn key_path(&self, key: &str) -> PathBuf {
        let mut path = self.root.clone();
        let mut segments = key.split('.').filter(|s| !s.is_empty()).peekable();
        while let Some(segment) = segments.next() {
            if segments.peek().is_some() {
                path.push(segment);
            } else {
                path.push(format!("{}.json", segment));
            }
        }
        path
    }

    fn read_from_disk(&self, key: &str) -> Value {
        let path = self.key_path(key);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Value::Null,
            Err(e) => {
                log::warn!("Failed to read {}: {}", path.display(), e);
                return Value::Null;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(e) => {
                log::warn!(
                    "Malformed JSON in {}: {}. Treating as absent.",
                    path.display(),
                    e
                );
                Value::Null
            }
        }
    }

    fn cancel_timer(&self, key: &str) {
        if let Some((_, (_, task))) = self.timers.remove(key) {
            task.abort();
        }
    }

    fn flush_key(&self, key: &str) -> std::io::Result<()> {
        if !self.dirty.lock().remove(key) {
            return Ok(());
        }

        let value = self
            .cache
            .get(key)
            .map(|v| v.clone())
            .unwrap_or(Value::Null);
        let path = self.key_path(key);

        let result = if value.is_null() {
            match std::fs::remove_file(&path) {
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                other => other,
            }
        } else {
            let seq = self.generation.fetch_add(1, Ordering::SeqCst);
            write_atomic(&path, &value, seq)
        };

        if result.is_err() {
            self.dirty.lock().insert(key.to_string());
        }
        result
    }
}

impl Drop for StorageInner {
    fn drop(&mut self) {
        let keys: Vec<String> = self.dirty.lock().iter().cloned().collect();
        for key in keys {
            if let Err(e) = self.flush_key(&key) {
                log::warn!("Failed to flush '{}' on close: {}", key, e);
            }
        }
    }
}

/// Keys are dot-separated plain names; anything that could leave the data
/// directory is refused
fn validate_key(key: &str) -> std::io::Result<()> {
    let valid = !key.is_empty()
        && key.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        });
    if valid {
        Ok(())
    } else {
        Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("Invalid storage key '{}'", key),
        ))
    }
}

/// Temporary file for one write; unique per write so concurrent flushes of
/// the same key never share it
fn tmp_path(path: &Path, seq: u64) -> PathBuf {
    path.with_extension(format!("json.{}.{}.tmp", std::process::id(), seq))
}

/// Write through a temporary file so readers never see a torn document
fn write_atomic(path: &Path, value: &Value, seq: u64) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let bytes = serde_json::to_vec_pretty(value).map_err(std::io::Error::other)?;
    let tmp = tmp_path(path, seq);
    if let Err(e) = std::fs::write(&tmp, bytes) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    std::fs::rename(&tmp, path)
}
