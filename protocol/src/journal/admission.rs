//! Admission of transactions and blocks.
//!
//! Blocks move through a small state machine:
//!
//! ```text
//!   arrive ──► incomplete ──► complete ──► valid ──► advance / fork
//!                 │  ▲            │  └──► invalid
//!                 │  └── retry ◄──┘
//!                 └── request missing predecessor / transactions
//! ```
//!
//! A block waits as `incomplete` until its predecessor is valid and every
//! transaction it lists is stored. Its height must then be exactly one
//! above its predecessor's (zero without one). It is then checked by consensus and by
//! the observers, and its transactions are applied to a clone of the
//! predecessor's state. A block whose evidence cannot be judged yet is
//! parked as `retry`.

use std::time::Instant;

use tracing::{debug, info, warn};

use super::error::{JournalError, JournalResult};
use super::Journal;
use crate::consensus::Verification;
use crate::identifier::Identifier;
use crate::storage::block::{BlockStatus, TransactionBlock};
use crate::storage::global_store::GlobalStore;
use crate::transaction::{Transaction, TransactionStatus};

impl Journal {
    // -- Transactions --

    /// Admit a transaction whose signature the caller has checked.
    ///
    /// Duplicates are ignored. `prepend` puts it at the front of the
    /// pending queue; `build_block` builds a candidate if none is in flight.
    pub(crate) fn add_pending_transaction(
        &mut self,
        txn: Transaction,
        prepend: bool,
        build_block: bool,
    ) -> JournalResult<()> {
        if self.state.initializing {
            debug!(txn_id = %txn.id.short(), "journal initializing, buffering transaction");
            self.state.initial_transactions.push(txn);
            return Ok(());
        }

        let txn_id = txn.id;
        if self.state.transactions.contains(&txn_id) {
            debug!(txn_id = %txn_id.short(), "duplicate transaction");
            return Ok(());
        }

        let mut txn = txn;
        txn.status = TransactionStatus::Pending;
        txn.in_block = None;
        txn.age = 0;

        let to_pending = self
            .state
            .families
            .get(&txn.family)
            .map_or(true, |family| family.add_to_pending(&txn));
        let was_requested = self.state.requested_transactions.remove(&txn_id).is_some();
        if was_requested {
            // Something already refers to it.
            txn.in_block = Some(Identifier::NULL);
        }
        self.state.transactions.put(txn)?;

        if to_pending {
            if self.state.pending_transactions.is_empty() {
                self.state.transaction_enqueue_time = Some(Instant::now());
            }
            if prepend {
                self.state.pending_transactions.push_front(txn_id);
            } else {
                self.state.pending_transactions.push_back(txn_id);
            }
        }
        debug!(txn_id = %txn_id.short(), to_pending, "transaction admitted");

        if was_requested {
            let waiting: Vec<Identifier> = self
                .state
                .pending_block_ids
                .iter()
                .filter(|id| {
                    self.state
                        .blocks
                        .get(id)
                        .is_some_and(|b| b.transaction_ids.contains(&txn_id))
                })
                .copied()
                .collect();
            for block_id in waiting {
                self.handle_block(block_id)?;
            }
        }

        if build_block && self.state.pending_block.is_none() {
            self.build_transaction_block(false)?;
        }
        Ok(())
    }

    // -- Blocks --

    /// Entry point for blocks, both from peers and from local claims.
    pub(crate) fn commit_transaction_block(&mut self, block: TransactionBlock) -> JournalResult<()> {
        let block_id = block.id;
        if !block.verify_signature() {
            warn!(block_id = %block_id.short(), "dropping block with invalid signature");
            return Ok(());
        }

        if self.state.initializing {
            let stale = self.state.blocks.get(&block_id).is_some_and(|b| !b.is_valid());
            if stale {
                self.state.blocks.remove(&block_id)?;
            }
            debug!(block_id = %block_id.short(), "journal initializing, buffering block");
            self.state.initial_blocks.push(block);
            return Ok(());
        }

        self.state.requested_blocks.remove(&block_id);
        if self.state.blocks.contains(&block_id) {
            debug!(block_id = %block_id.short(), "duplicate block");
            return Ok(());
        }

        let mut block = block;
        block.status = BlockStatus::Incomplete;
        block.commit_time = 0;
        block.transaction_depth = 0;
        block.aggregate_weight = 0.0;
        debug!(
            block_id = %block_id.short(),
            block_num = block.block_num,
            txns = block.tx_count(),
            "block received"
        );
        self.state.blocks.put(block)?;
        self.state.pending_block_ids.insert(block_id);

        self.handle_block(block_id)
    }

    /// Re-drive every block parked in `retry`. A block that is still
    /// undecided parks again without holding up the others.
    pub fn retry_blocks(&mut self) -> JournalResult<()> {
        if self.state.retrying {
            return Ok(());
        }
        let parked: Vec<Identifier> = self
            .state
            .pending_block_ids
            .iter()
            .filter(|id| {
                self.state
                    .blocks
                    .get(id)
                    .is_some_and(|b| b.status == BlockStatus::Retry)
            })
            .copied()
            .collect();
        if parked.is_empty() {
            return Ok(());
        }
        debug!(blocks = parked.len(), "retrying parked blocks");
        self.state.retrying = true;
        let result = parked
            .into_iter()
            .try_for_each(|block_id| self.handle_block(block_id));
        self.state.retrying = false;
        result
    }

    /// Advance one block through admission as far as it can go.
    pub(crate) fn handle_block(&mut self, block_id: Identifier) -> JournalResult<()> {
        let Some(block) = self.state.blocks.get(&block_id).cloned() else {
            return Ok(());
        };
        if block.status.is_terminal() {
            return Ok(());
        }

        let previous_id = block.previous_block_id;
        let mut previous_depth = 0;
        let mut expected_num = 0;
        if !previous_id.is_null() {
            let Some(previous) = self.state.blocks.get(&previous_id) else {
                self.state.request_missing_block(previous_id);
                return Ok(());
            };
            match previous.status {
                BlockStatus::Valid => {
                    previous_depth = previous.transaction_depth;
                    expected_num = previous.block_num + 1;
                }
                BlockStatus::Invalid => {
                    info!(block_id = %block_id.short(), "predecessor is invalid");
                    return self.mark_invalid(block_id);
                }
                _ => {
                    debug!(block_id = %block_id.short(), "predecessor not yet valid");
                    return Ok(());
                }
            }
        }
        if block.block_num != expected_num {
            warn!(
                block_id = %block_id.short(),
                block_num = block.block_num,
                expected = expected_num,
                "block height does not follow its predecessor"
            );
            return self.mark_invalid(block_id);
        }

        let missing = block.missing_transactions(|id| self.state.transactions.contains(id));
        if !missing.is_empty() {
            debug!(block_id = %block_id.short(), missing = missing.len(), "block has missing transactions");
            for txn_id in missing {
                self.state.stats.missing_txn_from_block_count += 1;
                self.state.request_missing_transaction(txn_id);
            }
            return Ok(());
        }

        self.set_status(&block_id, BlockStatus::Complete)?;

        let verdict = if block.verify_signature() {
            self.consensus.verify_block(&self.state, &block)
        } else {
            Verification::Invalid
        };
        match verdict {
            Verification::Valid => {}
            Verification::Pending => {
                debug!(block_id = %block_id.short(), "consensus undecided, parking block");
                return self.set_status(&block_id, BlockStatus::Retry);
            }
            Verification::Invalid => {
                warn!(block_id = %block_id.short(), consensus = self.consensus.name(), "block failed consensus");
                return self.mark_invalid(block_id);
            }
        }
        let rejected = self
            .observers
            .iter_mut()
            .any(|observer| !observer.on_block_test(&self.state, &block));
        if rejected {
            info!(block_id = %block_id.short(), "block rejected by observer");
            return self.mark_invalid(block_id);
        }

        let Some(store) = self.apply_block_transactions(&block)? else {
            return self.mark_invalid(block_id);
        };

        let mut block = block;
        block.status = BlockStatus::Valid;
        block.commit_time = self.state.elapsed_secs();
        block.transaction_depth = previous_depth + block.tx_count() as u64;
        self.consensus.update_block_weight(&self.state, &mut block);

        self.state.global_stores.commit_block_store(block_id, store)?;
        self.state.blocks.put(block.clone())?;
        self.state.pending_block_ids.remove(&block_id);
        info!(
            block_id = %block_id.short(),
            block_num = block.block_num,
            depth = block.transaction_depth,
            "block is valid"
        );

        if previous_id == self.state.head {
            self.advance(&block)?;
        } else {
            self.fork(&block)?;
        }
        self.compact()?;

        self.drive_children(block_id)?;
        self.retry_blocks()
    }

    /// Apply the block's transactions, in order, to a clone of the
    /// predecessor's state. `None` if any of them is rejected.
    fn apply_block_transactions(&mut self, block: &TransactionBlock) -> JournalResult<Option<GlobalStore>> {
        let previous_id = block.previous_block_id;
        let mut store = self
            .state
            .global_stores
            .get_block_store(&previous_id)?
            .ok_or_else(|| JournalError::UnknownBlock(previous_id.short()))?
            .clone_block();

        for txn_id in &block.transaction_ids {
            let Some(txn) = self.state.transactions.get(txn_id) else {
                return Err(JournalError::UnknownTransaction(txn_id.short()));
            };
            let Some(family) = self.state.families.get(&txn.family) else {
                warn!(txn_id = %txn_id.short(), family = %txn.family, "block contains unknown family");
                return Ok(None);
            };
            let Some(family_store) = store.transaction_store_mut(&txn.family) else {
                warn!(txn_id = %txn_id.short(), family = %txn.family, "family has no state store");
                return Ok(None);
            };
            if let Err(reason) = family.is_valid(txn, family_store) {
                warn!(block_id = %block.id.short(), txn_id = %txn_id.short(), %reason, "block contains invalid transaction");
                return Ok(None);
            }
            if let Err(e) = family.apply(txn, family_store) {
                warn!(block_id = %block.id.short(), txn_id = %txn_id.short(), error = %e, "transaction failed to apply");
                return Ok(None);
            }
        }
        Ok(Some(store))
    }

    fn set_status(&mut self, block_id: &Identifier, status: BlockStatus) -> JournalResult<()> {
        self.state.blocks.update(block_id, |b| b.status = status)?;
        Ok(())
    }

    /// Invalid is terminal. Children waiting on this block follow it.
    fn mark_invalid(&mut self, block_id: Identifier) -> JournalResult<()> {
        self.set_status(&block_id, BlockStatus::Invalid)?;
        self.state.pending_block_ids.remove(&block_id);
        self.state.invalid_block_ids.insert(block_id);
        self.drive_children(block_id)
    }

    /// Re-drive pending blocks whose predecessor is `block_id`.
    fn drive_children(&mut self, block_id: Identifier) -> JournalResult<()> {
        let children: Vec<Identifier> = self
            .state
            .pending_block_ids
            .iter()
            .filter(|id| {
                self.state
                    .blocks
                    .get(id)
                    .is_some_and(|b| b.previous_block_id == block_id)
            })
            .copied()
            .collect();
        for child in children {
            self.handle_block(child)?;
        }
        Ok(())
    }
}
