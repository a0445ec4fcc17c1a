//! # JournalDb -- Persistent Storage Engine
//!
//! The persistence collaborator for the journal. The core only ever talks
//! to the [`KeyValueMap`] trait: raw byte keys, raw byte values,
//! get/insert/remove/iterate. Two engines implement it:
//!
//! - `sled::Tree`, for nodes that must survive a restart.
//! - [`MemoryMap`], a `BTreeMap` behind a lock, for tests and throwaway
//!   devnets.
//!
//! ## Tree Layout
//!
//! | Tree           | Key                  | Value                          |
//! |----------------|----------------------|--------------------------------|
//! | `transactions` | identifier (32B)     | `bincode(Transaction)`         |
//! | `blocks`       | identifier (32B)     | `bincode(TransactionBlock)`    |
//! | `chain`        | key (UTF-8)          | identifier (32B)               |
//! | `local`        | key (UTF-8)          | `json(Value)`                  |
//! | `state`        | identifier (32B)     | `json(GlobalStoreDelta)`       |
//!
//! State deltas are JSON rather than bincode because family stores hold
//! `serde_json::Value`, which bincode cannot deserialize.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use sled::Db;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("key not found: {0}")]
    NotFound(String),
}

pub type DbResult<T> = Result<T, DbError>;

// ---------------------------------------------------------------------------
// KeyValueMap
// ---------------------------------------------------------------------------

/// A flat, ordered byte map. Everything the journal persists goes through
/// one of these.
pub trait KeyValueMap: Send + Sync {
    fn get(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>>;

    fn insert(&self, key: &[u8], value: Vec<u8>) -> DbResult<()>;

    fn remove(&self, key: &[u8]) -> DbResult<()>;

    /// All keys in ascending byte order.
    fn keys(&self) -> DbResult<Vec<Vec<u8>>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Block until buffered writes are durable. A no-op for memory maps.
    fn flush(&self) -> DbResult<()>;
}

impl KeyValueMap for sled::Tree {
    fn get(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        Ok(sled::Tree::get(self, key)?.map(|v| v.to_vec()))
    }

    fn insert(&self, key: &[u8], value: Vec<u8>) -> DbResult<()> {
        sled::Tree::insert(self, key, value)?;
        Ok(())
    }

    fn remove(&self, key: &[u8]) -> DbResult<()> {
        sled::Tree::remove(self, key)?;
        Ok(())
    }

    fn keys(&self) -> DbResult<Vec<Vec<u8>>> {
        let mut keys = Vec::with_capacity(sled::Tree::len(self));
        for entry in self.iter() {
            let (key, _) = entry?;
            keys.push(key.to_vec());
        }
        Ok(keys)
    }

    fn len(&self) -> usize {
        sled::Tree::len(self)
    }

    fn flush(&self) -> DbResult<()> {
        sled::Tree::flush(self)?;
        Ok(())
    }
}

/// In-memory [`KeyValueMap`].
#[derive(Debug, Default)]
pub struct MemoryMap {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryMap {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueMap for MemoryMap {
    fn get(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn insert(&self, key: &[u8], value: Vec<u8>) -> DbResult<()> {
        self.entries.write().insert(key.to_vec(), value);
        Ok(())
    }

    fn remove(&self, key: &[u8]) -> DbResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn keys(&self) -> DbResult<Vec<Vec<u8>>> {
        Ok(self.entries.read().keys().cloned().collect())
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }

    fn flush(&self) -> DbResult<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JournalDb
// ---------------------------------------------------------------------------

/// The five maps a journal persists into.
///
/// Cloning is cheap: every map is behind an `Arc`, and a sled handle is
/// itself reference counted.
#[derive(Clone)]
pub struct JournalDb {
    /// Present only for sled-backed databases.
    db: Option<Db>,
    pub transactions: Arc<dyn KeyValueMap>,
    pub blocks: Arc<dyn KeyValueMap>,
    pub chain: Arc<dyn KeyValueMap>,
    pub local: Arc<dyn KeyValueMap>,
    pub state: Arc<dyn KeyValueMap>,
}

impl JournalDb {
    /// Open or create a sled database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// A sled database that is removed when dropped. Ideal for tests that
    /// want the real engine without filesystem cleanup.
    pub fn open_temporary() -> DbResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    /// Purely in-memory maps, no sled at all.
    pub fn in_memory() -> Self {
        Self {
            db: None,
            transactions: Arc::new(MemoryMap::new()),
            blocks: Arc::new(MemoryMap::new()),
            chain: Arc::new(MemoryMap::new()),
            local: Arc::new(MemoryMap::new()),
            state: Arc::new(MemoryMap::new()),
        }
    }

    fn from_db(db: Db) -> DbResult<Self> {
        let transactions = db.open_tree("transactions")?;
        let blocks = db.open_tree("blocks")?;
        let chain = db.open_tree("chain")?;
        let local = db.open_tree("local")?;
        let state = db.open_tree("state")?;

        Ok(Self {
            db: Some(db),
            transactions: Arc::new(transactions),
            blocks: Arc::new(blocks),
            chain: Arc::new(chain),
            local: Arc::new(local),
            state: Arc::new(state),
        })
    }

    /// Drop every record. Used when a node starts without `restore`.
    pub fn clear(&self) -> DbResult<()> {
        for map in [
            &self.transactions,
            &self.blocks,
            &self.chain,
            &self.local,
            &self.state,
        ] {
            for key in map.keys()? {
                map.remove(&key)?;
            }
        }
        Ok(())
    }

    /// Force all pending writes to disk.
    pub fn flush(&self) -> DbResult<()> {
        match &self.db {
            Some(db) => {
                db.flush()?;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for JournalDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JournalDb")
            .field("sled", &self.db.is_some())
            .field("transactions", &self.transactions.len())
            .field("blocks", &self.blocks.len())
            .field("state", &self.state.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise_map(map: &dyn KeyValueMap) {
        assert!(map.is_empty());
        map.insert(b"b", b"2".to_vec()).unwrap();
        map.insert(b"a", b"1".to_vec()).unwrap();
        assert_eq!(map.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(map.keys().unwrap(), vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(map.len(), 2);

        map.remove(b"a").unwrap();
        assert_eq!(map.get(b"a").unwrap(), None);
        assert_eq!(map.len(), 1);
        map.flush().unwrap();
    }

    #[test]
    fn memory_map_basic_operations() {
        exercise_map(&MemoryMap::new());
    }

    #[test]
    fn sled_tree_basic_operations() {
        let db = JournalDb::open_temporary().expect("temp db");
        exercise_map(db.chain.as_ref());
    }

    #[test]
    fn open_persistent_database_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let db = JournalDb::open(dir.path()).expect("open");
            db.chain.insert(b"head", vec![7u8; 32]).unwrap();
            db.flush().unwrap();
        }
        let db = JournalDb::open(dir.path()).expect("reopen");
        assert_eq!(db.chain.get(b"head").unwrap(), Some(vec![7u8; 32]));
    }

    #[test]
    fn clear_empties_every_tree() {
        let db = JournalDb::in_memory();
        db.transactions.insert(b"t", vec![1]).unwrap();
        db.state.insert(b"s", vec![2]).unwrap();
        db.clear().unwrap();
        assert!(db.transactions.is_empty());
        assert!(db.state.is_empty());
    }

    #[test]
    fn trees_are_independent() {
        let db = JournalDb::open_temporary().unwrap();
        db.blocks.insert(b"k", vec![1]).unwrap();
        assert_eq!(db.transactions.get(b"k").unwrap(), None);
    }
}
