//! Development consensus: any node may claim at any time.
//!
//! Pacing comes entirely from the service's `block_wait_time`. Blocks carry
//! no evidence and fork choice is the default depth rule, so this strategy
//! is only suitable for single-node or trusted test networks.

use super::{build_candidate, Consensus, Verification};
use crate::journal::error::JournalResult;
use crate::journal::state::JournalState;
use crate::storage::block::{ConsensusPayload, TransactionBlock};

#[derive(Debug, Clone, Copy, Default)]
pub struct DevModeConsensus;

impl Consensus for DevModeConsensus {
    fn name(&self) -> &str {
        "dev_mode"
    }

    fn build_block(&mut self, state: &mut JournalState, genesis: bool) -> JournalResult<Option<TransactionBlock>> {
        build_candidate(state, genesis)
    }

    fn claim_block(&mut self, state: &JournalState, block: &mut TransactionBlock) {
        block.consensus = ConsensusPayload::None;
        block.sign_block(state.keypair());
    }

    fn verify_block(&self, _state: &JournalState, _block: &TransactionBlock) -> Verification {
        Verification::Valid
    }

    fn check_claim_block(&self, _state: &JournalState, _block: &TransactionBlock, _now_ms: u64) -> bool {
        true
    }

    fn update_block_weight(&self, _state: &JournalState, block: &mut TransactionBlock) {
        block.aggregate_weight = block.transaction_depth as f64;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::JournalConfig;
    use crate::crypto::keys::StrataKeypair;
    use crate::identifier::Identifier;
    use crate::network::NullNetwork;
    use crate::storage::db::JournalDb;

    fn state() -> JournalState {
        JournalState::new(
            JournalConfig::default(),
            JournalDb::in_memory(),
            StrataKeypair::from_seed(&[6u8; 32]),
            Arc::new(NullNetwork),
        )
        .unwrap()
    }

    #[test]
    fn no_head_means_no_candidate() {
        let mut s = state();
        assert!(DevModeConsensus.build_block(&mut s, false).unwrap().is_none());
    }

    #[test]
    fn genesis_candidate_may_be_empty() {
        let mut s = state();
        let block = DevModeConsensus.build_block(&mut s, true).unwrap().unwrap();
        assert_eq!(block.block_num, 0);
        assert!(block.previous_block_id.is_null());
        assert_eq!(block.tx_count(), 0);
    }

    #[test]
    fn claim_signs_with_node_key() {
        let s = state();
        let mut block = TransactionBlock::new(Identifier::NULL, 0, vec![]);
        let unsigned_id = block.id;
        DevModeConsensus.claim_block(&s, &mut block);
        assert!(block.verify_signature());
        assert_ne!(block.id, unsigned_id);
        assert_eq!(block.originator, Some(s.keypair().public_key()));
    }

    #[test]
    fn weight_is_depth() {
        let s = state();
        let mut block = TransactionBlock::new(Identifier::NULL, 0, vec![]);
        block.transaction_depth = 12;
        DevModeConsensus.update_block_weight(&s, &mut block);
        assert_eq!(block.aggregate_weight, 12.0);
    }
}
