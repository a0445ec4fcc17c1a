//! Identifier-keyed record tables with write-through persistence.
//!
//! The journal keeps every transaction and block record it knows about in a
//! [`RecordTable`]: a `HashMap` arena for lookups plus a [`KeyValueMap`]
//! that receives every write as a bincode blob. Records refer to each other
//! by [`Identifier`] only, never by reference.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::block::TransactionBlock;
use super::db::{DbError, DbResult, KeyValueMap};
use crate::identifier::Identifier;
use crate::transaction::Transaction;

/// Anything stored in a [`RecordTable`] knows its own key.
pub trait Record: Clone + Serialize + DeserializeOwned {
    fn record_id(&self) -> Identifier;
}

impl Record for Transaction {
    fn record_id(&self) -> Identifier {
        self.id
    }
}

impl Record for TransactionBlock {
    fn record_id(&self) -> Identifier {
        self.id
    }
}

pub struct RecordTable<T: Record> {
    records: HashMap<Identifier, T>,
    persist: Arc<dyn KeyValueMap>,
}

impl<T: Record> RecordTable<T> {
    /// An empty table writing through to `persist`.
    pub fn new(persist: Arc<dyn KeyValueMap>) -> Self {
        Self {
            records: HashMap::new(),
            persist,
        }
    }

    /// Load every record already in `persist` into memory.
    pub fn load(persist: Arc<dyn KeyValueMap>) -> DbResult<Self> {
        let mut records = HashMap::new();
        for key in persist.keys()? {
            if let Some(bytes) = persist.get(&key)? {
                let record: T = decode(&bytes)?;
                records.insert(record.record_id(), record);
            }
        }
        Ok(Self {
            records,
            persist,
        })
    }

    pub fn get(&self, id: &Identifier) -> Option<&T> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &Identifier) -> bool {
        self.records.contains_key(id)
    }

    /// Insert or replace a record and persist it.
    pub fn put(&mut self, record: T) -> DbResult<()> {
        let id = record.record_id();
        self.persist.insert(id.as_bytes(), encode(&record)?)?;
        self.records.insert(id, record);
        Ok(())
    }

    /// Mutate a record in place and persist the result. `Ok(false)` if the
    /// record does not exist.
    pub fn update<F>(&mut self, id: &Identifier, f: F) -> DbResult<bool>
    where
        F: FnOnce(&mut T),
    {
        let Some(record) = self.records.get_mut(id) else {
            return Ok(false);
        };
        f(record);
        self.persist.insert(id.as_bytes(), encode(record)?)?;
        Ok(true)
    }

    pub fn remove(&mut self, id: &Identifier) -> DbResult<Option<T>> {
        self.persist.remove(id.as_bytes())?;
        Ok(self.records.remove(id))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.records.values()
    }
}

impl<T: Record> std::fmt::Debug for RecordTable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordTable")
            .field("records", &self.records.len())
            .finish()
    }
}

fn encode<T: Serialize>(record: &T) -> DbResult<Vec<u8>> {
    bincode::serialize(record).map_err(|e| DbError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> DbResult<T> {
    bincode::deserialize(bytes).map_err(|e| DbError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::db::MemoryMap;
    use crate::transaction::{TransactionBuilder, TransactionStatus};

    fn tx(nonce: u64) -> Transaction {
        TransactionBuilder::new("/IntegerKey").nonce(nonce).build()
    }

    #[test]
    fn put_get_remove() {
        let mut table = RecordTable::new(Arc::new(MemoryMap::new()));
        let t = tx(1);
        table.put(t.clone()).unwrap();
        assert_eq!(table.get(&t.id), Some(&t));
        assert_eq!(table.len(), 1);

        let removed = table.remove(&t.id).unwrap();
        assert_eq!(removed, Some(t));
        assert!(table.is_empty());
    }

    #[test]
    fn update_writes_through() {
        let persist: Arc<dyn KeyValueMap> = Arc::new(MemoryMap::new());
        let mut table = RecordTable::new(Arc::clone(&persist));
        let t = tx(2);
        table.put(t.clone()).unwrap();

        let found = table
            .update(&t.id, |r: &mut Transaction| r.status = TransactionStatus::Committed)
            .unwrap();
        assert!(found);

        let reloaded: RecordTable<Transaction> = RecordTable::load(persist).unwrap();
        assert_eq!(
            reloaded.get(&t.id).map(|r| r.status),
            Some(TransactionStatus::Committed)
        );
    }

    #[test]
    fn update_missing_record_is_noop() {
        let mut table: RecordTable<Transaction> = RecordTable::new(Arc::new(MemoryMap::new()));
        assert!(!table.update(&tx(3).id, |r| r.age = 5).unwrap());
    }

    #[test]
    fn load_rejects_corrupt_bytes() {
        let persist: Arc<dyn KeyValueMap> = Arc::new(MemoryMap::new());
        persist.insert(&[1u8; 32], vec![0xff, 0x00]).unwrap();
        let result: DbResult<RecordTable<Transaction>> = RecordTable::load(persist);
        assert!(matches!(result, Err(DbError::Serialization(_))));
    }
}
