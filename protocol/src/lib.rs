// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Strata -- Journal Core
//!
//! Strata keeps a replicated ledger of transaction blocks. Each node admits
//! signed transactions, assembles them into candidate blocks, publishes
//! blocks when its consensus strategy allows, and agrees with its peers on
//! a single canonical chain, switching chains when a heavier one appears.
//!
//! Every block carries a snapshot of the state its transactions produced,
//! organised per transaction family. Snapshots are layered and cheap to
//! clone, so a fork can be evaluated without disturbing the committed
//! chain.
//!
//! ## Architecture
//!
//! - **journal**: admission, fork choice, commit and decommit, snapshots
//!   per block, and the tokio service that drives it.
//! - **consensus**: pluggable block production and fork-choice strategies.
//! - **transaction**: the transaction record, signing, and the family
//!   plug-in interface (with the `/IntegerKey` family).
//! - **storage**: blocks, layered key/value stores, the per-block snapshot
//!   map, and the sled-backed persistence underneath.
//! - **network**: the journal's side of the gossip layer.
//! - **crypto**: Ed25519 keys and BLAKE3 hashing.
//! - **config**: defaults and the `JournalConfig` struct.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use strata_protocol::config::JournalConfig;
//! use strata_protocol::consensus::DevModeConsensus;
//! use strata_protocol::crypto::keys::StrataKeypair;
//! use strata_protocol::journal::Journal;
//! use strata_protocol::network::NullNetwork;
//! use strata_protocol::storage::JournalDb;
//! use strata_protocol::transaction::{integer_key_transaction, sign_transaction, IntegerKeyFamily, Update};
//!
//! let keypair = StrataKeypair::generate();
//! let config = JournalConfig { genesis_ledger: true, ..Default::default() };
//! let mut journal = Journal::new(
//!     config,
//!     JournalDb::in_memory(),
//!     Box::new(DevModeConsensus),
//!     Arc::new(NullNetwork),
//!     keypair.clone(),
//! )
//! .unwrap();
//! journal.register_family(Arc::new(IntegerKeyFamily)).unwrap();
//! journal.initialization_complete().unwrap();
//!
//! let mut txn = integer_key_transaction(1, vec![Update::set("apples", 3)]).build();
//! sign_transaction(&mut txn, &keypair);
//! journal.submit_transaction(txn).unwrap();
//! let block_id = journal.claim_pending_block().unwrap().unwrap();
//! assert_eq!(journal.chain_head_id(), block_id);
//! ```

pub mod config;
pub mod consensus;
pub mod crypto;
pub mod identifier;
pub mod journal;
pub mod network;
pub mod storage;
pub mod transaction;
