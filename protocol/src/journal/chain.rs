//! The committed chain: advance, fork resolution and compaction.
//!
//! Only this module moves the head. Every move persists the head pointer
//! after the block's state snapshot is already registered, so a crash never
//! leaves the head pointing at a block without state.

use std::cmp::Ordering;

use tracing::{debug, info, warn};

use super::error::{JournalError, JournalResult};
use super::Journal;
use crate::config::HEAD_KEY;
use crate::identifier::Identifier;
use crate::storage::block::TransactionBlock;
use crate::transaction::TransactionStatus;

impl Journal {
    /// `block` extends the head.
    pub(crate) fn advance(&mut self, block: &TransactionBlock) -> JournalResult<()> {
        let stashed = self.stash_candidate();
        if let Err(e) = self.commit_block(block) {
            self.restore_candidate(stashed);
            return Err(e);
        }
        if !self.state.initial_load {
            self.build_transaction_block(false)?;
        }
        Ok(())
    }

    /// `block` is valid but does not extend the head. Switch to its chain
    /// if consensus prefers it.
    pub(crate) fn fork(&mut self, block: &TransactionBlock) -> JournalResult<()> {
        if let Some(head) = self.state.head_block() {
            if self.compare_valid(block, head)? != Ordering::Greater {
                debug!(
                    block_id = %block.id.short(),
                    head = %head.id.short(),
                    "fork does not beat current chain"
                );
                return Ok(());
            }
        }

        let stashed = self.stash_candidate();
        if let Err(e) = self.switch_chain(block) {
            self.restore_candidate(stashed);
            return Err(e);
        }
        if !self.state.initial_load {
            self.build_transaction_block(false)?;
        }
        Ok(())
    }

    pub(crate) fn compare_valid(&self, a: &TransactionBlock, b: &TransactionBlock) -> JournalResult<Ordering> {
        for block in [a, b] {
            if !block.is_valid() {
                return Err(JournalError::InvalidComparison {
                    block_id: block.id.short(),
                    status: block.status.to_string(),
                });
            }
        }
        Ok(self.consensus.compare_blocks(a, b))
    }

    fn switch_chain(&mut self, block: &TransactionBlock) -> JournalResult<()> {
        let (fork_point, new_chain) = self.find_fork(block)?;
        info!(
            block_id = %block.id.short(),
            fork_point = %fork_point.short(),
            head = %self.state.head.short(),
            depth = new_chain.len(),
            "switching to heavier chain"
        );

        while self.state.head != fork_point {
            let head = self
                .state
                .head_block()
                .cloned()
                .ok_or_else(|| JournalError::UnknownBlock(self.state.head.short()))?;
            self.decommit_block(&head)?;
        }

        for block_id in new_chain.iter().rev() {
            let next = self
                .state
                .blocks
                .get(block_id)
                .cloned()
                .ok_or_else(|| JournalError::UnknownBlock(block_id.short()))?;
            self.commit_block(&next)?;
        }
        Ok(())
    }

    /// Common ancestor of `block` and the head, plus the blocks from `block`
    /// back to (not including) that ancestor, newest first.
    fn find_fork(&self, block: &TransactionBlock) -> JournalResult<(Identifier, Vec<Identifier>)> {
        let height = |id: &Identifier| -> JournalResult<Option<u64>> {
            if id.is_null() {
                return Ok(None);
            }
            self.state
                .blocks
                .get(id)
                .map(|b| Some(b.block_num))
                .ok_or_else(|| JournalError::UnknownBlock(id.short()))
        };
        let previous = |id: &Identifier| -> JournalResult<Identifier> {
            self.state
                .blocks
                .get(id)
                .map(|b| b.previous_block_id)
                .ok_or_else(|| JournalError::UnknownBlock(id.short()))
        };

        let mut new_chain = vec![block.id];
        let mut new_cursor = block.previous_block_id;
        let mut old_cursor = self.state.head;
        while new_cursor != old_cursor {
            if height(&new_cursor)? >= height(&old_cursor)? {
                new_chain.push(new_cursor);
                new_cursor = previous(&new_cursor)?;
            } else {
                old_cursor = previous(&old_cursor)?;
            }
        }
        Ok((new_cursor, new_chain))
    }

    /// Make `block` the head.
    pub(crate) fn commit_block(&mut self, block: &TransactionBlock) -> JournalResult<()> {
        for txn_id in &block.transaction_ids {
            self.state.pending_transactions.remove(txn_id);
            self.state.transactions.update(txn_id, |txn| {
                txn.status = TransactionStatus::Committed;
                txn.in_block = Some(block.id);
            })?;
        }
        self.set_head(block.id)?;
        self.state.stats.record_commit(block.id, block.tx_count());

        for observer in self.observers.iter_mut() {
            observer.on_commit_block(&self.state, block);
        }
        info!(
            block_id = %block.id.short(),
            block_num = block.block_num,
            txns = block.tx_count(),
            "committed block"
        );
        Ok(())
    }

    /// Take the head block off the chain. Its transactions go back to the
    /// front of the pending queue, in block order.
    pub(crate) fn decommit_block(&mut self, block: &TransactionBlock) -> JournalResult<()> {
        for observer in self.observers.iter_mut() {
            observer.on_decommit_block(&self.state, block);
        }
        self.set_head(block.previous_block_id)?;

        let mut returned = Vec::with_capacity(block.tx_count());
        for txn_id in &block.transaction_ids {
            let Some(txn) = self.state.transactions.get(txn_id) else {
                continue;
            };
            let to_pending = self
                .state
                .families
                .get(&txn.family)
                .map_or(true, |family| family.add_to_pending(txn));
            self.state.transactions.update(txn_id, |txn| {
                txn.status = TransactionStatus::Pending;
                txn.in_block = None;
            })?;
            if to_pending {
                returned.push(*txn_id);
            }
        }
        self.state.pending_transactions.prepend_all(&returned);
        self.state.stats.record_decommit(block.previous_block_id, block.tx_count());

        info!(
            block_id = %block.id.short(),
            block_num = block.block_num,
            returned = returned.len(),
            "decommitted block"
        );
        Ok(())
    }

    fn set_head(&mut self, block_id: Identifier) -> JournalResult<()> {
        self.state.head = block_id;
        self.state.db.chain.insert(HEAD_KEY, block_id.as_bytes().to_vec())?;
        Ok(())
    }

    /// Every `maximum_blocks_to_keep` blocks, flatten the snapshot one
    /// window behind the head and evict everything older. Snapshots of
    /// fork blocks at or below that height go too, as do snapshots rebuilt
    /// on demand since the last compaction.
    pub(crate) fn compact(&mut self) -> JournalResult<()> {
        let window = self.state.config.maximum_blocks_to_keep;
        let Some((head_id, head_num)) = self.state.head_block().map(|b| (b.id, b.block_num)) else {
            return Ok(());
        };
        if window == 0 || head_num == 0 || head_num % window != 0 {
            return Ok(());
        }

        let target = self.state.ancestor(head_id, window);
        if target.is_null() {
            return Ok(());
        }
        if let Err(e) = self.state.global_stores.flatten_block_store(&target) {
            warn!(block_id = %target.short(), error = %e, "snapshot compaction failed");
            return Err(e.into());
        }

        let horizon = head_num - window;
        let blocks = &self.state.blocks;
        let evicted = self.state.global_stores.retain_block_stores(|id| {
            *id == target || blocks.get(id).is_some_and(|b| b.block_num > horizon)
        });
        self.state.prune_requests();
        debug!(
            block_id = %target.short(),
            evicted,
            in_memory = self.state.global_stores.in_memory_count(),
            "compacted state snapshots"
        );
        Ok(())
    }

    fn stash_candidate(&mut self) -> Option<TransactionBlock> {
        self.state.pending_block_built_at = None;
        self.state.pending_block.take()
    }

    fn restore_candidate(&mut self, stashed: Option<TransactionBlock>) {
        if stashed.is_some() {
            self.state.pending_block_built_at = Some(std::time::Instant::now());
        }
        self.state.pending_block = stashed;
    }
}
