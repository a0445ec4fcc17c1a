//! # IntegerKey -- Reference Transaction Family
//!
//! A registry of named non-negative integers. Each transaction carries a
//! JSON payload with one or more updates, applied atomically:
//!
//! ```text
//! {"updates": [
//!     {"verb": "set", "name": "a", "value": 10},
//!     {"verb": "inc", "name": "a", "value": 5},
//!     {"verb": "dec", "name": "a", "value": 3}
//! ]}
//! ```
//!
//! | Verb  | Requires                         | Effect          |
//! |-------|----------------------------------|-----------------|
//! | `set` | key absent, `value >= 0`         | `k = value`     |
//! | `inc` | key present, `value >= 0`        | `k += value`    |
//! | `dec` | key present, `0 <= value <= k`   | `k -= value`    |
//!
//! Updates inside one transaction see the effect of the ones before them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::builder::{Transaction, TransactionBuilder};
use super::family::TransactionFamily;
use crate::storage::kv::{KeyValueStore, StoreError, StoreResult};

pub const INTEGER_KEY_FAMILY: &str = "/IntegerKey";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    Set,
    Inc,
    Dec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    pub verb: Verb,
    pub name: String,
    pub value: i64,
}

impl Update {
    pub fn set(name: &str, value: i64) -> Self {
        Self { verb: Verb::Set, name: name.to_string(), value }
    }

    pub fn inc(name: &str, value: i64) -> Self {
        Self { verb: Verb::Inc, name: name.to_string(), value }
    }

    pub fn dec(name: &str, value: i64) -> Self {
        Self { verb: Verb::Dec, name: name.to_string(), value }
    }

    /// Validate against the current value of the key and return its value
    /// afterwards.
    fn check(&self, current: Option<i64>) -> Result<i64, String> {
        if self.name.is_empty() {
            return Err("empty key name".to_string());
        }
        match (self.verb, current) {
            (Verb::Set, Some(_)) => Err(format!("key {} already exists", self.name)),
            (Verb::Set, None) if self.value < 0 => Err("initial value must be >= 0".to_string()),
            (Verb::Set, None) => Ok(self.value),
            (Verb::Inc | Verb::Dec, None) => Err(format!("key {} does not exist", self.name)),
            (Verb::Inc | Verb::Dec, Some(_)) if self.value < 0 => {
                Err(format!("amount for key {} must be >= 0", self.name))
            }
            (Verb::Inc, Some(v)) => v
                .checked_add(self.value)
                .ok_or_else(|| format!("key {} overflows", self.name)),
            (Verb::Dec, Some(v)) => match v.checked_sub(self.value) {
                Some(next) if next >= 0 => Ok(next),
                _ => Err(format!(
                    "key {} would go negative: {} - {}",
                    self.name, v, self.value
                )),
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegerKeyPayload {
    pub updates: Vec<Update>,
}

impl IntegerKeyPayload {
    pub fn new(updates: Vec<Update>) -> Self {
        Self { updates }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, String> {
        serde_json::from_slice(bytes).map_err(|e| format!("malformed payload: {e}"))
    }

    pub fn encode(&self) -> Vec<u8> {
        // Serializing plain structs of strings and integers cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Run every update against `store`, returning the final value of each
    /// touched key.
    fn evaluate(&self, store: &KeyValueStore) -> Result<BTreeMap<String, i64>, String> {
        let mut touched: BTreeMap<String, i64> = BTreeMap::new();
        for update in &self.updates {
            let current = match touched.get(&update.name) {
                Some(v) => Some(*v),
                None => store.get(&update.name).and_then(|v| v.as_i64()),
            };
            let next = update.check(current)?;
            touched.insert(update.name.clone(), next);
        }
        Ok(touched)
    }
}

/// Start an unsigned `/IntegerKey` transaction carrying `updates`.
pub fn integer_key_transaction(nonce: u64, updates: Vec<Update>) -> TransactionBuilder {
    TransactionBuilder::new(INTEGER_KEY_FAMILY)
        .nonce(nonce)
        .payload(IntegerKeyPayload::new(updates).encode())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IntegerKeyFamily;

impl TransactionFamily for IntegerKeyFamily {
    fn type_name(&self) -> &str {
        INTEGER_KEY_FAMILY
    }

    fn is_valid(&self, txn: &Transaction, store: &KeyValueStore) -> Result<(), String> {
        let payload = IntegerKeyPayload::decode(&txn.payload)?;
        payload.evaluate(store).map(|_| ())
    }

    fn apply(&self, txn: &Transaction, store: &mut KeyValueStore) -> StoreResult<()> {
        let payload = IntegerKeyPayload::decode(&txn.payload).map_err(StoreError::Rejected)?;
        let touched = payload.evaluate(store).map_err(StoreError::Rejected)?;
        for (name, value) in touched {
            store.set(&name, json!(value))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txn(updates: Vec<Update>) -> Transaction {
        integer_key_transaction(1, updates).build()
    }

    fn store_with(pairs: &[(&str, i64)]) -> KeyValueStore {
        let mut store = KeyValueStore::new();
        for (k, v) in pairs {
            store.set(k, json!(v)).unwrap();
        }
        store
    }

    // -- Validation --

    #[test]
    fn set_new_key_is_valid() {
        let store = KeyValueStore::new();
        assert!(IntegerKeyFamily.is_valid(&txn(vec![Update::set("a", 1)]), &store).is_ok());
    }

    #[test]
    fn set_existing_key_is_invalid() {
        let store = store_with(&[("a", 1)]);
        assert!(IntegerKeyFamily.is_valid(&txn(vec![Update::set("a", 2)]), &store).is_err());
    }

    #[test]
    fn negative_initial_value_is_invalid() {
        let store = KeyValueStore::new();
        assert!(IntegerKeyFamily.is_valid(&txn(vec![Update::set("a", -1)]), &store).is_err());
    }

    #[test]
    fn inc_missing_key_is_invalid() {
        let store = KeyValueStore::new();
        assert!(IntegerKeyFamily.is_valid(&txn(vec![Update::inc("a", 1)]), &store).is_err());
    }

    #[test]
    fn dec_below_zero_is_invalid() {
        let store = store_with(&[("a", 2)]);
        assert!(IntegerKeyFamily.is_valid(&txn(vec![Update::dec("a", 3)]), &store).is_err());
        assert!(IntegerKeyFamily.is_valid(&txn(vec![Update::dec("a", 2)]), &store).is_ok());
    }

    #[test]
    fn negative_amounts_are_invalid() {
        let store = store_with(&[("a", i64::MAX), ("b", 5)]);
        assert!(IntegerKeyFamily.is_valid(&txn(vec![Update::dec("a", -1)]), &store).is_err());
        assert!(IntegerKeyFamily.is_valid(&txn(vec![Update::inc("b", -1)]), &store).is_err());
    }

    #[test]
    fn rejected_dec_leaves_the_store_untouched() {
        let mut store = store_with(&[("a", i64::MAX)]);
        let result = IntegerKeyFamily.apply(&txn(vec![Update::dec("a", -1)]), &mut store);
        assert!(matches!(result, Err(StoreError::Rejected(_))));
        assert_eq!(store.get("a"), Some(json!(i64::MAX)));
    }

    #[test]
    fn malformed_payload_is_invalid() {
        let bad = TransactionBuilder::new(INTEGER_KEY_FAMILY).payload(b"not json".to_vec()).build();
        let err = IntegerKeyFamily.is_valid(&bad, &KeyValueStore::new()).unwrap_err();
        assert!(err.contains("malformed"));
    }

    #[test]
    fn updates_within_one_transaction_are_sequential() {
        let store = KeyValueStore::new();
        let t = txn(vec![Update::set("a", 1), Update::inc("a", 4), Update::dec("a", 5)]);
        assert!(IntegerKeyFamily.is_valid(&t, &store).is_ok());
    }

    // -- Application --

    #[test]
    fn apply_writes_final_values() {
        let mut store = store_with(&[("b", 10)]);
        let t = txn(vec![Update::set("a", 3), Update::inc("a", 2), Update::dec("b", 4)]);
        IntegerKeyFamily.apply(&t, &mut store).unwrap();
        assert_eq!(store.get("a"), Some(json!(5)));
        assert_eq!(store.get("b"), Some(json!(6)));
    }

    #[test]
    fn apply_invalid_transaction_is_rejected_without_writes() {
        let mut store = store_with(&[("a", 1)]);
        let t = txn(vec![Update::inc("a", 1), Update::set("a", 0)]);
        assert!(matches!(
            IntegerKeyFamily.apply(&t, &mut store),
            Err(StoreError::Rejected(_))
        ));
        assert_eq!(store.get("a"), Some(json!(1)));
    }

    #[test]
    fn payload_wire_format_uses_lowercase_verbs() {
        let bytes = IntegerKeyPayload::new(vec![Update::inc("x", 2)]).encode();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text, r#"{"updates":[{"verb":"inc","name":"x","value":2}]}"#);
    }
}
