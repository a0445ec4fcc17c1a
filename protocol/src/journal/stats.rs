//! Journal counters.
//!
//! Plain integers updated in place by the journal. There is no metrics
//! exporter; a host reads a [`JournalStats`] copy through
//! `Journal::stats()` and does what it likes with it.

use serde::{Deserialize, Serialize};

use crate::identifier::Identifier;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalStats {
    pub blocks_claimed: u64,
    pub committed_block_count: u64,
    pub committed_txn_count: u64,
    /// Transactions dropped as permanently invalid or too old.
    pub invalid_txn_count: u64,
    /// Transaction requests actually sent to the network.
    pub missing_txn_request_count: u64,
    /// Transactions found missing while completing a block.
    pub missing_txn_from_block_count: u64,
    /// Transactions found missing while resolving a dependency.
    pub missing_txn_dep_count: u64,
    /// Sampled when the stats are read.
    pub pending_block_count: u64,
    /// Sampled when the stats are read.
    pub pending_txn_count: u64,
    pub head: Identifier,
}

impl JournalStats {
    pub(crate) fn record_commit(&mut self, head: Identifier, txn_count: usize) {
        self.head = head;
        self.committed_block_count += 1;
        self.committed_txn_count += txn_count as u64;
    }

    pub(crate) fn record_decommit(&mut self, head: Identifier, txn_count: usize) {
        self.head = head;
        self.committed_block_count = self.committed_block_count.saturating_sub(1);
        self.committed_txn_count = self.committed_txn_count.saturating_sub(txn_count as u64);
    }
}
