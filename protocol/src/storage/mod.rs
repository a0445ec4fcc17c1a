//! # Storage Module
//!
//! Everything the journal keeps: record tables, block structure, layered
//! family state, and the persistence engine underneath.
//!
//! ## Architecture
//!
//! ```text
//! block.rs        : TransactionBlock, BlockStatus, ConsensusPayload
//! db.rs           : KeyValueMap trait, sled and in-memory engines, JournalDb
//! table.rs        : RecordTable, identifier-keyed arena with write-through
//! kv.rs           : KeyValueStore, copy-on-write family state
//! global_store.rs : per-block snapshots and the GlobalStoreManager
//! ```
//!
//! ## Data Flow
//!
//! ```text
//! Transaction ──► RecordTable<Transaction>      ──► JournalDb.transactions
//! Block       ──► RecordTable<TransactionBlock> ──► JournalDb.blocks
//!     │
//!     └─ applied ──► GlobalStore ──► GlobalStoreManager ──► JournalDb.state
//! ```
//!
//! ## Design Decisions
//!
//! 1. **Bincode for records.** Transactions and blocks are plain structs;
//!    bincode keeps them compact and deterministic on disk.
//!
//! 2. **JSON for state deltas.** Family values are `serde_json::Value`,
//!    which only self-describing formats can round-trip.
//!
//! 3. **Deltas, not full snapshots.** Each block persists only what it
//!    wrote, so history costs space proportional to activity.

pub mod block;
pub mod db;
pub mod global_store;
pub mod kv;
pub mod table;

pub use block::{BlockStatus, ConsensusPayload, TransactionBlock};
pub use db::{DbError, DbResult, JournalDb, KeyValueMap, MemoryMap};
pub use global_store::{GlobalStore, GlobalStoreDelta, GlobalStoreManager, StateSnapshot};
pub use kv::{KeyValueStore, StoreDelta, StoreError, StoreResult, StoreValue};
pub use table::{Record, RecordTable};
