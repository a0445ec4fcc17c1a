//! # KeyValueStore -- Copy-on-Write Family State
//!
//! Each transaction family owns one [`KeyValueStore`] per block snapshot.
//! A store is a stack of layers:
//!
//! ```text
//!   block N+1  [ entries: {b: 3}, deleted: {c} ]  (writable while applying)
//!        |
//!   block N    [ entries: {a: 1, b: 2}         ]  (committed, read-only)
//!        |
//!   root       [ entries: {c: 9}               ]  (committed, read-only)
//! ```
//!
//! `clone_store` pushes a fresh empty layer over the current one in O(1).
//! Reads walk down the stack until a layer either holds the key or records
//! its deletion. Writes only ever touch the top layer, so a clone can never
//! mutate its parent.
//!
//! Committed layers are immutable. `flatten` is the one exception: it folds
//! every ancestor into the layer itself and drops the parent link. The
//! visible contents are unchanged, so readers sharing the layer are not
//! affected, and the ancestors become collectable.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::db::DbError;

/// Values stored by families. Any JSON value.
pub type StoreValue = serde_json::Value;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("attempt to modify a committed store")]
    ReadOnly,

    #[error("no store registered for family {0}")]
    UnknownFamily(String),

    #[error("no state snapshot for block {0}")]
    UnknownBlock(String),

    #[error("families must be registered before the first block: {0}")]
    LateFamily(String),

    /// A family refused to apply a transaction.
    #[error("apply failed: {0}")]
    Rejected(String),

    #[error("state codec error: {0}")]
    Codec(String),

    #[error(transparent)]
    Db(#[from] DbError),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Codec(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// StoreDelta
// ---------------------------------------------------------------------------

/// The writes of a single layer: what `dump` persists and `from_delta`
/// replays.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreDelta {
    pub entries: BTreeMap<String, StoreValue>,
    pub deleted: BTreeSet<String>,
}

impl StoreDelta {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.deleted.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Layer
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Layer {
    inner: RwLock<LayerInner>,
}

#[derive(Debug, Default)]
struct LayerInner {
    parent: Option<Arc<Layer>>,
    entries: HashMap<String, StoreValue>,
    deleted: HashSet<String>,
    read_only: bool,
}

impl Layer {
    fn child_of(parent: Arc<Layer>) -> Self {
        Self {
            inner: RwLock::new(LayerInner {
                parent: Some(parent),
                ..Default::default()
            }),
        }
    }

    /// This layer followed by its ancestors, top first.
    fn chain(self: &Arc<Self>) -> Vec<Arc<Layer>> {
        let mut layers = vec![Arc::clone(self)];
        let mut current = self.inner.read().parent.clone();
        while let Some(layer) = current {
            current = layer.inner.read().parent.clone();
            layers.push(layer);
        }
        layers
    }
}

// ---------------------------------------------------------------------------
// KeyValueStore
// ---------------------------------------------------------------------------

/// Layered key/value map with O(1) structural clones.
///
/// Cloning the Rust value (`Clone`) shares the same top layer; use
/// [`KeyValueStore::clone_store`] to get an independent writable copy.
#[derive(Debug, Clone, Default)]
pub struct KeyValueStore {
    layer: Arc<Layer>,
}

impl KeyValueStore {
    /// An empty, writable store with no parent.
    pub fn new() -> Self {
        Self::default()
    }

    /// A writable child whose reads fall through to `self`.
    pub fn clone_store(&self) -> Self {
        Self {
            layer: Arc::new(Layer::child_of(Arc::clone(&self.layer))),
        }
    }

    /// Rebuild a committed layer on top of `parent` from a persisted delta.
    pub fn from_delta(parent: &KeyValueStore, delta: StoreDelta) -> Self {
        let store = parent.clone_store();
        {
            let mut inner = store.layer.inner.write();
            inner.entries = delta.entries.into_iter().collect();
            inner.deleted = delta.deleted.into_iter().collect();
            inner.read_only = true;
        }
        store
    }

    pub fn get(&self, key: &str) -> Option<StoreValue> {
        let mut layer = Arc::clone(&self.layer);
        loop {
            let parent = {
                let inner = layer.inner.read();
                if let Some(value) = inner.entries.get(key) {
                    return Some(value.clone());
                }
                if inner.deleted.contains(key) {
                    return None;
                }
                inner.parent.clone()
            };
            layer = parent?;
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn set(&mut self, key: &str, value: StoreValue) -> StoreResult<()> {
        let mut inner = self.layer.inner.write();
        if inner.read_only {
            return Err(StoreError::ReadOnly);
        }
        inner.deleted.remove(key);
        inner.entries.insert(key.to_string(), value);
        Ok(())
    }

    pub fn delete(&mut self, key: &str) -> StoreResult<()> {
        let mut inner = self.layer.inner.write();
        if inner.read_only {
            return Err(StoreError::ReadOnly);
        }
        inner.entries.remove(key);
        inner.deleted.insert(key.to_string());
        Ok(())
    }

    /// Every visible key, sorted.
    pub fn keys(&self) -> BTreeSet<String> {
        self.compose().into_keys().collect()
    }

    /// The visible contents as one flat map.
    pub fn compose(&self) -> BTreeMap<String, StoreValue> {
        let mut composed = BTreeMap::new();
        for layer in self.layer.chain().iter().rev() {
            let inner = layer.inner.read();
            for key in &inner.deleted {
                composed.remove(key);
            }
            for (key, value) in &inner.entries {
                composed.insert(key.clone(), value.clone());
            }
        }
        composed
    }

    /// Freeze the top layer. Further writes fail with `ReadOnly`.
    pub fn commit(&self) {
        self.layer.inner.write().read_only = true;
    }

    pub fn is_read_only(&self) -> bool {
        self.layer.inner.read().read_only
    }

    /// Fold all ancestors into the top layer and cut the parent link.
    ///
    /// Only committed stores may be flattened; a writable store is left
    /// untouched and `false` is returned.
    pub fn flatten(&self) -> bool {
        if !self.is_read_only() {
            return false;
        }
        let composed = self.compose();
        let mut inner = self.layer.inner.write();
        inner.entries = composed.into_iter().collect();
        inner.deleted.clear();
        inner.parent = None;
        true
    }

    /// The writes held by the top layer only.
    pub fn dump(&self) -> StoreDelta {
        let inner = self.layer.inner.read();
        StoreDelta {
            entries: inner
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            deleted: inner.deleted.iter().cloned().collect(),
        }
    }

    /// Number of layers, including this one.
    pub fn depth(&self) -> usize {
        self.layer.chain().len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
