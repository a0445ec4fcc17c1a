//! Journal lifecycle hooks.
//!
//! Observers are how transaction families and host processes react to the
//! chain without the journal knowing about them. Every hook has a no-op
//! default, so an observer only implements what it cares about.
//!
//! Hooks run synchronously inside the journal and see a read-only
//! [`JournalState`]. They must not block.

use super::state::JournalState;
use crate::storage::block::TransactionBlock;

pub trait JournalObserver: Send {
    /// The genesis ledger is about to build its first block.
    fn on_genesis_block(&mut self, _state: &JournalState) {}

    /// A candidate block is about to be built.
    fn on_pre_build_block(&mut self, _state: &JournalState) {}

    /// A candidate block was built and is now in flight.
    fn on_build_block(&mut self, _state: &JournalState, _block: &TransactionBlock) {}

    /// The local node claimed a block and is about to commit it.
    fn on_claim_block(&mut self, _state: &JournalState, _block: &TransactionBlock) {}

    /// A block joined the committed chain. `state.head()` is the block.
    fn on_commit_block(&mut self, _state: &JournalState, _block: &TransactionBlock) {}

    /// The head block is about to leave the committed chain.
    fn on_decommit_block(&mut self, _state: &JournalState, _block: &TransactionBlock) {}

    /// Extra block-level validation. Returning `false` makes the block
    /// invalid.
    fn on_block_test(&mut self, _state: &JournalState, _block: &TransactionBlock) -> bool {
        true
    }
}
