//! # Global Store Map -- Per-Block State Snapshots
//!
//! A [`GlobalStore`] is the application state as of one block: one
//! [`KeyValueStore`] per registered transaction family. The
//! [`GlobalStoreManager`] keeps the snapshots of recent blocks in memory and
//! persists every snapshot as a per-block delta against its predecessor.
//!
//! ```text
//!   snapshot(block) = apply(block.transaction_ids, snapshot(block.previous_block_id))
//!
//!   NULL (root) ──► B1 ──► B2 ──► B3 ──► ... ──► head
//!                    │
//!                    └─ flattened once it falls behind the retention window;
//!                       everything older is evicted from memory but stays
//!                       reconstructible from the persisted deltas
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::db::KeyValueMap;
use super::kv::{KeyValueStore, StoreDelta, StoreError, StoreResult, StoreValue};
use crate::identifier::Identifier;

/// Composed contents of a snapshot: family name to key/value map.
pub type StateSnapshot = BTreeMap<String, BTreeMap<String, StoreValue>>;

// ---------------------------------------------------------------------------
// GlobalStore
// ---------------------------------------------------------------------------

/// The family stores as of one block.
#[derive(Debug, Clone)]
pub struct GlobalStore {
    block_id: Identifier,
    previous_block_id: Identifier,
    stores: BTreeMap<String, KeyValueStore>,
}

impl GlobalStore {
    /// The empty root snapshot that precedes every chain.
    pub fn root() -> Self {
        Self {
            block_id: Identifier::NULL,
            previous_block_id: Identifier::NULL,
            stores: BTreeMap::new(),
        }
    }

    pub fn block_id(&self) -> Identifier {
        self.block_id
    }

    pub fn previous_block_id(&self) -> Identifier {
        self.previous_block_id
    }

    pub fn families(&self) -> impl Iterator<Item = &str> {
        self.stores.keys().map(String::as_str)
    }

    pub fn transaction_store(&self, family: &str) -> Option<&KeyValueStore> {
        self.stores.get(family)
    }

    pub fn transaction_store_mut(&mut self, family: &str) -> Option<&mut KeyValueStore> {
        self.stores.get_mut(family)
    }

    /// A writable successor: every family store is cloned copy-on-write.
    pub fn clone_block(&self) -> Self {
        Self {
            block_id: Identifier::NULL,
            previous_block_id: self.block_id,
            stores: self
                .stores
                .iter()
                .map(|(name, store)| (name.clone(), store.clone_store()))
                .collect(),
        }
    }

    /// Freeze this snapshot under `block_id`.
    pub fn commit_block(&mut self, block_id: Identifier) {
        self.block_id = block_id;
        for store in self.stores.values() {
            store.commit();
        }
    }

    pub fn flatten(&self) {
        for store in self.stores.values() {
            store.flatten();
        }
    }

    pub fn dump_block(&self) -> GlobalStoreDelta {
        GlobalStoreDelta {
            block_id: self.block_id,
            previous_block_id: self.previous_block_id,
            stores: self
                .stores
                .iter()
                .map(|(name, store)| (name.clone(), store.dump()))
                .collect(),
        }
    }

    /// Replay a persisted delta on top of its predecessor.
    pub fn from_delta(previous: &GlobalStore, delta: GlobalStoreDelta) -> Self {
        let mut deltas = delta.stores;
        let stores = previous
            .stores
            .iter()
            .map(|(name, parent)| {
                let store = KeyValueStore::from_delta(parent, deltas.remove(name).unwrap_or_default());
                (name.clone(), store)
            })
            .collect();
        Self {
            block_id: delta.block_id,
            previous_block_id: delta.previous_block_id,
            stores,
        }
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.stores
            .iter()
            .map(|(name, store)| (name.clone(), store.compose()))
            .collect()
    }
}

/// Persisted form of a snapshot: only the writes made by its block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalStoreDelta {
    pub block_id: Identifier,
    pub previous_block_id: Identifier,
    pub stores: BTreeMap<String, StoreDelta>,
}

// ---------------------------------------------------------------------------
// GlobalStoreManager
// ---------------------------------------------------------------------------

/// Snapshot index keyed by block id, backed by a persistent delta map.
pub struct GlobalStoreManager {
    blocks: HashMap<Identifier, GlobalStore>,
    persist: Arc<dyn KeyValueMap>,
}

impl GlobalStoreManager {
    /// Open the snapshot index over `persist`.
    ///
    /// A previously persisted root (and with it the registered families) is
    /// picked up; otherwise an empty root is created and persisted.
    pub fn new(persist: Arc<dyn KeyValueMap>) -> StoreResult<Self> {
        let mut manager = Self {
            blocks: HashMap::new(),
            persist,
        };

        let root = match manager.load_delta(&Identifier::NULL)? {
            Some(delta) => Self::root_from_delta(delta)?,
            None => {
                let mut root = GlobalStore::root();
                root.commit_block(Identifier::NULL);
                manager.persist_delta(&root)?;
                root
            }
        };
        manager.blocks.insert(Identifier::NULL, root);
        Ok(manager)
    }

    fn root_from_delta(delta: GlobalStoreDelta) -> StoreResult<GlobalStore> {
        let mut root = GlobalStore::root();
        for (family, family_delta) in delta.stores {
            let mut store = KeyValueStore::new();
            for (key, value) in family_delta.entries {
                store.set(&key, value)?;
            }
            store.commit();
            root.stores.insert(family, store);
        }
        Ok(root)
    }

    /// Register a family in the root snapshot.
    ///
    /// Fails once any block snapshot is loaded, since existing snapshots
    /// would not carry the new family. Registering a family the root
    /// already has is a no-op.
    pub fn add_transaction_store(&mut self, family: &str) -> StoreResult<()> {
        let root = self
            .blocks
            .get(&Identifier::NULL)
            .ok_or_else(|| StoreError::UnknownBlock(Identifier::NULL.short()))?;
        if root.stores.contains_key(family) {
            return Ok(());
        }
        if self.blocks.len() > 1 {
            return Err(StoreError::LateFamily(family.to_string()));
        }

        let mut root = root.clone();
        let store = KeyValueStore::new();
        store.commit();
        root.stores.insert(family.to_string(), store);

        self.persist_delta(&root)?;
        self.blocks.insert(Identifier::NULL, root);
        Ok(())
    }

    /// Commit `store` as the snapshot of `block_id` and persist its delta.
    pub fn commit_block_store(&mut self, block_id: Identifier, mut store: GlobalStore) -> StoreResult<()> {
        store.commit_block(block_id);
        self.persist_delta(&store)?;
        self.blocks.insert(block_id, store);
        debug!(block_id = %block_id.short(), in_memory = self.blocks.len(), "committed block store");
        Ok(())
    }

    /// The snapshot for `block_id`, rebuilt from persisted deltas if it was
    /// evicted. `Ok(None)` when the block has no snapshot at all.
    pub fn get_block_store(&mut self, block_id: &Identifier) -> StoreResult<Option<&GlobalStore>> {
        if !self.blocks.contains_key(block_id) {
            let mut pending = Vec::new();
            let mut cursor = *block_id;
            while !self.blocks.contains_key(&cursor) {
                let Some(delta) = self.load_delta(&cursor)? else {
                    return Ok(None);
                };
                cursor = delta.previous_block_id;
                pending.push(delta);
            }

            while let Some(delta) = pending.pop() {
                let previous = self
                    .blocks
                    .get(&delta.previous_block_id)
                    .ok_or_else(|| StoreError::UnknownBlock(delta.previous_block_id.short()))?;
                let store = GlobalStore::from_delta(previous, delta);
                debug!(block_id = %store.block_id().short(), "reconstructed block store");
                self.blocks.insert(store.block_id(), store);
            }
        }
        Ok(self.blocks.get(block_id))
    }

    pub fn contains_in_memory(&self, block_id: &Identifier) -> bool {
        self.blocks.contains_key(block_id)
    }

    pub fn in_memory_count(&self) -> usize {
        self.blocks.len()
    }

    /// Flatten the snapshot of `block_id` and evict its ancestors (never the
    /// root) from memory.
    pub fn flatten_block_store(&mut self, block_id: &Identifier) -> StoreResult<()> {
        let store = self
            .get_block_store(block_id)?
            .ok_or_else(|| StoreError::UnknownBlock(block_id.short()))?;
        store.flatten();
        let previous = store.previous_block_id();
        self.flush_block_store(&previous);
        Ok(())
    }

    /// Drop `block_id` and every in-memory ancestor, stopping at the root.
    pub fn flush_block_store(&mut self, block_id: &Identifier) {
        let mut cursor = *block_id;
        let mut evicted = 0usize;
        while !cursor.is_null() {
            match self.blocks.remove(&cursor) {
                Some(store) => {
                    cursor = store.previous_block_id();
                    evicted += 1;
                }
                None => break,
            }
        }
        if evicted > 0 {
            debug!(from = %block_id.short(), evicted, "evicted block stores");
        }
    }

    /// Evict every in-memory snapshot, except the root, that `keep`
    /// rejects. Returns how many were evicted. They stay reconstructible
    /// from their persisted deltas.
    pub fn retain_block_stores(&mut self, mut keep: impl FnMut(&Identifier) -> bool) -> usize {
        let before = self.blocks.len();
        self.blocks.retain(|id, _| id.is_null() || keep(id));
        let evicted = before - self.blocks.len();
        if evicted > 0 {
            debug!(evicted, in_memory = self.blocks.len(), "evicted block stores");
        }
        evicted
    }

    fn persist_delta(&self, store: &GlobalStore) -> StoreResult<()> {
        let bytes = serde_json::to_vec(&store.dump_block())?;
        self.persist.insert(store.block_id().as_bytes(), bytes)?;
        Ok(())
    }

    fn load_delta(&self, block_id: &Identifier) -> StoreResult<Option<GlobalStoreDelta>> {
        match self.persist.get(block_id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

impl std::fmt::Debug for GlobalStoreManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalStoreManager")
            .field("in_memory", &self.blocks.len())
            .field("persisted", &self.persist.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::db::MemoryMap;
    use serde_json::json;

    fn block_id(n: u8) -> Identifier {
        Identifier::from_bytes([n; 32])
    }

    fn manager() -> GlobalStoreManager {
        let mut m = GlobalStoreManager::new(Arc::new(MemoryMap::new())).unwrap();
        m.add_transaction_store("/IntegerKey").unwrap();
        m
    }

    /// Commit a chain root -> 1 -> 2 -> ... -> n, each block writing `k{i} = i`.
    fn commit_chain(m: &mut GlobalStoreManager, n: u8) {
        let mut previous = Identifier::NULL;
        for i in 1..=n {
            let mut next = m.get_block_store(&previous).unwrap().unwrap().clone_block();
            next.transaction_store_mut("/IntegerKey")
                .unwrap()
                .set(&format!("k{i}"), json!(i))
                .unwrap();
            m.commit_block_store(block_id(i), next).unwrap();
            previous = block_id(i);
        }
    }

    // -- Registration --

    #[test]
    fn root_has_registered_family() {
        let mut m = manager();
        let root = m.get_block_store(&Identifier::NULL).unwrap().unwrap();
        assert_eq!(root.families().collect::<Vec<_>>(), vec!["/IntegerKey"]);
    }

    #[test]
    fn late_family_is_rejected() {
        let mut m = manager();
        commit_chain(&mut m, 1);
        assert!(matches!(
            m.add_transaction_store("/Other"),
            Err(StoreError::LateFamily(_))
        ));
    }

    // -- Commit & lookup --

    #[test]
    fn committed_snapshot_is_read_only() {
        let mut m = manager();
        commit_chain(&mut m, 1);
        let mut store = m.get_block_store(&block_id(1)).unwrap().unwrap().clone();
        let kv = store.transaction_store_mut("/IntegerKey").unwrap();
        assert!(matches!(kv.set("x", json!(1)), Err(StoreError::ReadOnly)));
    }

    #[test]
    fn snapshot_composes_history() {
        let mut m = manager();
        commit_chain(&mut m, 3);
        let snap = m.get_block_store(&block_id(3)).unwrap().unwrap().snapshot();
        assert_eq!(snap["/IntegerKey"].len(), 3);
        assert_eq!(snap["/IntegerKey"]["k2"], json!(2));
    }

    #[test]
    fn unknown_block_returns_none() {
        let mut m = manager();
        assert!(m.get_block_store(&block_id(9)).unwrap().is_none());
    }

    // -- Flatten & reconstruct --

    #[test]
    fn flatten_evicts_ancestors_but_not_root() {
        let mut m = manager();
        commit_chain(&mut m, 4);
        m.flatten_block_store(&block_id(3)).unwrap();

        assert!(m.contains_in_memory(&Identifier::NULL));
        assert!(!m.contains_in_memory(&block_id(1)));
        assert!(!m.contains_in_memory(&block_id(2)));
        assert!(m.contains_in_memory(&block_id(3)));
        assert!(m.contains_in_memory(&block_id(4)));

        let head = m.get_block_store(&block_id(4)).unwrap().unwrap();
        assert_eq!(head.snapshot()["/IntegerKey"].len(), 4);
    }

    #[test]
    fn evicted_snapshot_is_rebuilt_from_deltas() {
        let mut m = manager();
        commit_chain(&mut m, 4);
        let expected = m.get_block_store(&block_id(2)).unwrap().unwrap().snapshot();
        m.flatten_block_store(&block_id(3)).unwrap();

        let rebuilt = m.get_block_store(&block_id(2)).unwrap().unwrap();
        assert_eq!(rebuilt.snapshot(), expected);
        assert!(m.contains_in_memory(&block_id(1)));
    }

    #[test]
    fn retain_keeps_root_and_selected_snapshots() {
        let mut m = manager();
        commit_chain(&mut m, 4);
        let evicted = m.retain_block_stores(|id| *id == block_id(4));
        assert_eq!(evicted, 3);
        assert_eq!(m.in_memory_count(), 2);
        assert!(m.contains_in_memory(&Identifier::NULL));

        // Layers are shared, so the kept head still sees every ancestor.
        let head = m.get_block_store(&block_id(4)).unwrap().unwrap();
        assert_eq!(head.snapshot()["/IntegerKey"].len(), 4);
        let rebuilt = m.get_block_store(&block_id(2)).unwrap().unwrap();
        assert_eq!(rebuilt.snapshot()["/IntegerKey"].len(), 2);
    }

    #[test]
    fn manager_reopens_over_persisted_deltas() {
        let persist: Arc<dyn KeyValueMap> = Arc::new(MemoryMap::new());
        {
            let mut m = GlobalStoreManager::new(Arc::clone(&persist)).unwrap();
            m.add_transaction_store("/IntegerKey").unwrap();
            commit_chain(&mut m, 2);
        }
        let mut reopened = GlobalStoreManager::new(persist).unwrap();
        let snap = reopened.get_block_store(&block_id(2)).unwrap().unwrap().snapshot();
        assert_eq!(snap["/IntegerKey"]["k1"], json!(1));
    }
}
