//! Transaction families: the business logic behind a transaction.
//!
//! The journal never interprets payloads. It routes each transaction by its
//! `family` name to a registered [`TransactionFamily`], which checks it
//! against and applies it to that family's [`KeyValueStore`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::builder::Transaction;
use crate::storage::kv::{KeyValueStore, StoreResult};

/// Business rules for one family of transactions.
pub trait TransactionFamily: Send + Sync {
    /// Routing name, e.g. `/IntegerKey`. Must match `Transaction::family`.
    fn type_name(&self) -> &str;

    /// Check `txn` against the current state without modifying it.
    /// The error string is logged and the transaction is rejected.
    fn is_valid(&self, txn: &Transaction, store: &KeyValueStore) -> Result<(), String>;

    /// Apply a transaction that passed `is_valid` against the same store.
    fn apply(&self, txn: &Transaction, store: &mut KeyValueStore) -> StoreResult<()>;

    /// Whether a newly admitted transaction should enter the pending set.
    /// Families that only ever arrive inside blocks can return `false`.
    fn add_to_pending(&self, _txn: &Transaction) -> bool {
        true
    }
}

/// Registered families, keyed by type name.
#[derive(Clone, Default)]
pub struct FamilyRegistry {
    families: BTreeMap<String, Arc<dyn TransactionFamily>>,
}

impl FamilyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a family, replacing any previous one with the same name.
    pub fn register(&mut self, family: Arc<dyn TransactionFamily>) {
        self.families.insert(family.type_name().to_string(), family);
    }

    pub fn get(&self, type_name: &str) -> Option<&Arc<dyn TransactionFamily>> {
        self.families.get(type_name)
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.families.contains_key(type_name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.families.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.families.len()
    }

    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }
}

impl fmt::Debug for FamilyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.families.keys()).finish()
    }
}
