//! # Consensus Strategies
//!
//! The journal decides *what* is in the chain; a [`Consensus`] strategy
//! decides *who* may extend it and *which* of two competing chains wins.
//!
//! ## Responsibilities
//!
//! 1. **Build**: assemble a candidate block from the pending transactions on
//!    top of the current head.
//! 2. **Claim**: attach strategy evidence (a [`ConsensusPayload`]) and sign
//!    the candidate once it may be published.
//! 3. **Verify**: judge a block's evidence, possibly answering "not yet"
//!    ([`Verification::Pending`]), which parks the block for retry.
//! 4. **Compare**: order two valid blocks for fork choice.
//!
//! ## Strategies
//!
//! ```text
//! dev_mode.rs : claims as soon as the service allows, weight = depth
//! wait.rs     : randomized wait timers with a population-adjusted mean
//! ```
//!
//! [`ConsensusPayload`]: crate::storage::block::ConsensusPayload

pub mod dev_mode;
pub mod wait;

pub use dev_mode::DevModeConsensus;
pub use wait::{WaitCertificate, WaitConfig, WaitConsensus};

use std::cmp::Ordering;

use tracing::debug;

use crate::journal::error::JournalResult;
use crate::journal::state::JournalState;
use crate::storage::block::TransactionBlock;

/// Outcome of [`Consensus::verify_block`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Valid,
    Invalid,
    /// The evidence cannot be judged yet, e.g. a wait timer that has not
    /// expired on this node's clock.
    Pending,
}

/// A pluggable block production and fork-choice strategy.
pub trait Consensus: Send {
    fn name(&self) -> &str;

    /// Called once, after the journal has replayed its startup backlog.
    fn initialization_complete(&mut self, _state: &mut JournalState) {}

    /// Build an unsigned candidate on top of the head. `genesis` allows an
    /// empty block with no predecessor.
    fn build_block(&mut self, state: &mut JournalState, genesis: bool) -> JournalResult<Option<TransactionBlock>>;

    /// Attach evidence to the candidate and sign it.
    fn claim_block(&mut self, state: &JournalState, block: &mut TransactionBlock);

    fn verify_block(&self, state: &JournalState, block: &TransactionBlock) -> Verification;

    /// Whether the in-flight candidate may be claimed at `now_ms`.
    fn check_claim_block(&self, state: &JournalState, block: &TransactionBlock, now_ms: u64) -> bool;

    /// Fork choice between two valid blocks. `Greater` means `a` wins.
    fn compare_blocks(&self, a: &TransactionBlock, b: &TransactionBlock) -> Ordering {
        default_compare(a, b)
    }

    /// Set `aggregate_weight` on a block that just became valid.
    fn update_block_weight(&self, _state: &JournalState, _block: &mut TransactionBlock) {}
}

/// Deeper chain wins; ties go to the larger identifier.
pub fn default_compare(a: &TransactionBlock, b: &TransactionBlock) -> Ordering {
    a.transaction_depth
        .cmp(&b.transaction_depth)
        .then_with(|| a.id.cmp(&b.id))
}

/// The candidate assembly shared by every strategy.
///
/// Returns `None` when there is no head to build on (unless `genesis`) or
/// when fewer than `minimum_transactions_per_block` transactions are ready.
pub fn build_candidate(state: &mut JournalState, genesis: bool) -> JournalResult<Option<TransactionBlock>> {
    let head = state.head();
    if head.is_null() && !genesis {
        debug!("no chain head, not building");
        return Ok(None);
    }
    let block_num = state.head_block().map(|b| b.block_num + 1).unwrap_or(0);

    let max = state.config().maximum_transactions_per_block;
    let txn_ids = state.prepare_transaction_list(max)?;
    if !genesis && txn_ids.len() < state.config().minimum_transactions_per_block {
        debug!(ready = txn_ids.len(), "not enough transactions for a block");
        return Ok(None);
    }

    let block = TransactionBlock::new(head, block_num, txn_ids);
    debug!(
        block_id = %block.id.short(),
        block_num,
        txns = block.tx_count(),
        "built candidate block"
    );
    Ok(Some(block))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::Identifier;

    fn block(depth: u64, seed: u8) -> TransactionBlock {
        let mut b = TransactionBlock::new(Identifier::from_bytes([seed; 32]), 1, vec![]);
        b.transaction_depth = depth;
        b
    }

    #[test]
    fn deeper_block_wins() {
        assert_eq!(default_compare(&block(5, 1), &block(3, 2)), Ordering::Greater);
        assert_eq!(default_compare(&block(3, 1), &block(5, 2)), Ordering::Less);
    }

    #[test]
    fn equal_depth_breaks_ties_by_id() {
        let a = block(4, 1);
        let b = block(4, 2);
        let expected = a.id.cmp(&b.id);
        assert_eq!(default_compare(&a, &b), expected);
        assert_eq!(default_compare(&a, &a), Ordering::Equal);
    }
}
