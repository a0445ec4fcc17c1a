//! # Transaction Blocks
//!
//! A block is an ordered list of transaction identifiers linked to its
//! predecessor by id. The journal stores blocks, not the transactions
//! inside them: a block arriving from the network is only a claim that the
//! listed transactions, applied in order on top of the predecessor's state,
//! are valid.
//!
//! ## Block Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │  signed by originator, hashed into `id`          │
//! │  ├── previous_block_id: Identifier (NULL = root) │
//! │  ├── block_num: u64                              │
//! │  ├── transaction_ids: Vec<Identifier>            │
//! │  ├── originator: StrataPublicKey                 │
//! │  └── consensus: ConsensusPayload                 │
//! ├──────────────────────────────────────────────────┤
//! │  journal-owned, never hashed                     │
//! │  ├── status: BlockStatus                         │
//! │  ├── commit_time: u64                            │
//! │  ├── transaction_depth: u64                      │
//! │  └── aggregate_weight: f64                       │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! The identifier is recomputed whenever the signed fields change. In
//! practice that is exactly once, at claim time, when the consensus
//! payload and originator are attached and the block is signed.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::consensus::wait::WaitCertificate;
use crate::crypto::hash::BLOCK_DOMAIN;
use crate::crypto::keys::{StrataKeypair, StrataPublicKey, StrataSignature};
use crate::identifier::Identifier;

// ---------------------------------------------------------------------------
// BlockStatus
// ---------------------------------------------------------------------------

/// Position of a block in the admission pipeline.
///
/// ```text
///   incomplete ──► complete ──► valid
///        ▲             │   └──► invalid
///        └─── retry ◄──┘
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockStatus {
    /// Missing its predecessor or some of its transactions.
    #[default]
    Incomplete,
    /// Everything is present; validation has not finished.
    Complete,
    Valid,
    Invalid,
    /// Consensus could not decide yet. Re-driven by the retry sweep.
    Retry,
}

impl BlockStatus {
    /// `Valid` and `Invalid` never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Valid | Self::Invalid)
    }
}

impl fmt::Display for BlockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Incomplete => write!(f, "incomplete"),
            Self::Complete => write!(f, "complete"),
            Self::Valid => write!(f, "valid"),
            Self::Invalid => write!(f, "invalid"),
            Self::Retry => write!(f, "retry"),
        }
    }
}

// ---------------------------------------------------------------------------
// ConsensusPayload
// ---------------------------------------------------------------------------

/// Strategy-specific data carried by a block. Only the strategy that
/// produced it interprets it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum ConsensusPayload {
    #[default]
    None,
    Wait(WaitCertificate),
}

impl ConsensusPayload {
    fn signable_bytes(&self) -> Vec<u8> {
        match self {
            Self::None => vec![0u8],
            Self::Wait(certificate) => {
                let mut buf = vec![1u8];
                buf.extend_from_slice(&certificate.to_bytes());
                buf
            }
        }
    }

    pub fn wait_certificate(&self) -> Option<&WaitCertificate> {
        match self {
            Self::Wait(certificate) => Some(certificate),
            Self::None => None,
        }
    }
}

// ---------------------------------------------------------------------------
// TransactionBlock
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionBlock {
    pub id: Identifier,
    pub previous_block_id: Identifier,
    /// Height: one more than the predecessor, zero for the first block.
    pub block_num: u64,
    /// Applied in this order.
    pub transaction_ids: Vec<Identifier>,
    pub originator: Option<StrataPublicKey>,
    pub signature: Option<StrataSignature>,
    pub consensus: ConsensusPayload,

    pub status: BlockStatus,
    /// Seconds since journal start at which the block became valid.
    pub commit_time: u64,
    /// Transactions from the root up to and including this block.
    pub transaction_depth: u64,
    /// Strategy-defined chain weight, e.g. the aggregate local mean.
    pub aggregate_weight: f64,
}

impl TransactionBlock {
    /// An unsigned block extending `previous_block_id`.
    pub fn new(previous_block_id: Identifier, block_num: u64, transaction_ids: Vec<Identifier>) -> Self {
        let mut block = Self {
            id: Identifier::NULL,
            previous_block_id,
            block_num,
            transaction_ids,
            originator: None,
            signature: None,
            consensus: ConsensusPayload::None,
            status: BlockStatus::Incomplete,
            commit_time: 0,
            transaction_depth: 0,
            aggregate_weight: 0.0,
        };
        block.id = block.compute_id();
        block
    }

    pub fn signable_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(96 + 32 * self.transaction_ids.len());
        buf.extend_from_slice(self.previous_block_id.as_bytes());
        buf.extend_from_slice(&self.block_num.to_le_bytes());

        buf.extend_from_slice(&(self.transaction_ids.len() as u32).to_le_bytes());
        for id in &self.transaction_ids {
            buf.extend_from_slice(id.as_bytes());
        }

        match &self.originator {
            Some(key) => {
                buf.push(1);
                buf.extend_from_slice(key.as_bytes());
            }
            None => buf.push(0),
        }

        buf.extend_from_slice(&self.consensus.signable_bytes());
        buf
    }

    pub fn compute_id(&self) -> Identifier {
        Identifier::digest(BLOCK_DOMAIN, &self.signable_bytes())
    }

    /// Attach the originator, sign, and recompute the identifier.
    pub fn sign_block(&mut self, keypair: &StrataKeypair) {
        self.originator = Some(keypair.public_key());
        let signable = self.signable_bytes();
        self.signature = Some(keypair.sign(&signable));
        self.id = Identifier::digest(BLOCK_DOMAIN, &signable);
    }

    /// `true` when the id matches the content and the signature verifies
    /// against the originator.
    pub fn verify_signature(&self) -> bool {
        let (Some(originator), Some(signature)) = (&self.originator, &self.signature) else {
            return false;
        };
        let signable = self.signable_bytes();
        self.id == Identifier::digest(BLOCK_DOMAIN, &signable) && originator.verify(&signable, signature)
    }

    /// Transaction ids for which `known` returns `false`, in block order.
    pub fn missing_transactions<F>(&self, known: F) -> Vec<Identifier>
    where
        F: Fn(&Identifier) -> bool,
    {
        self.transaction_ids.iter().filter(|id| !known(id)).copied().collect()
    }

    pub fn is_valid(&self) -> bool {
        self.status == BlockStatus::Valid
    }

    pub fn tx_count(&self) -> usize {
        self.transaction_ids.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn txid(n: u8) -> Identifier {
        Identifier::from_bytes([n; 32])
    }

    fn signed_block() -> TransactionBlock {
        let mut block = TransactionBlock::new(Identifier::NULL, 0, vec![txid(1), txid(2)]);
        block.sign_block(&StrataKeypair::from_seed(&[9u8; 32]));
        block
    }

    // -- Identity --

    #[test]
    fn new_block_has_content_id() {
        let block = TransactionBlock::new(Identifier::NULL, 0, vec![txid(1)]);
        assert!(!block.id.is_null());
        assert_eq!(block.id, block.compute_id());
        assert_eq!(block.status, BlockStatus::Incomplete);
    }

    #[test]
    fn transaction_order_is_part_of_id() {
        let a = TransactionBlock::new(Identifier::NULL, 0, vec![txid(1), txid(2)]);
        let b = TransactionBlock::new(Identifier::NULL, 0, vec![txid(2), txid(1)]);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn journal_fields_do_not_affect_id() {
        let mut block = signed_block();
        let id = block.id;
        block.status = BlockStatus::Valid;
        block.commit_time = 12;
        block.transaction_depth = 40;
        block.aggregate_weight = 3.5;
        assert_eq!(block.compute_id(), id);
        assert!(block.verify_signature());
    }

    // -- Signing --

    #[test]
    fn signing_changes_id_and_verifies() {
        let unsigned = TransactionBlock::new(Identifier::NULL, 0, vec![txid(1), txid(2)]);
        let signed = signed_block();
        assert_ne!(unsigned.id, signed.id);
        assert!(signed.verify_signature());
        assert!(!unsigned.verify_signature());
    }

    #[test]
    fn tampered_block_fails_verification() {
        let mut block = signed_block();
        block.transaction_ids.push(txid(3));
        assert!(!block.verify_signature());
    }

    #[test]
    fn consensus_payload_is_covered_by_signature() {
        let mut block = signed_block();
        block.consensus = ConsensusPayload::Wait(WaitCertificate {
            duration_ms: 10,
            local_mean_ms: 5.0,
            issued_at: 0,
            ready_at: 10,
        });
        assert!(!block.verify_signature());
    }

    // -- Helpers --

    #[test]
    fn missing_transactions_preserves_order() {
        let block = TransactionBlock::new(Identifier::NULL, 0, vec![txid(1), txid(2), txid(3)]);
        let missing = block.missing_transactions(|id| *id == txid(2));
        assert_eq!(missing, vec![txid(1), txid(3)]);
    }

    #[test]
    fn terminal_statuses() {
        assert!(BlockStatus::Valid.is_terminal());
        assert!(BlockStatus::Invalid.is_terminal());
        assert!(!BlockStatus::Retry.is_terminal());
        assert_eq!(BlockStatus::Retry.to_string(), "retry");
    }

    #[test]
    fn block_bincode_roundtrip() {
        let mut block = signed_block();
        block.status = BlockStatus::Valid;
        block.aggregate_weight = 1.25;
        let bytes = bincode::serialize(&block).unwrap();
        let back: TransactionBlock = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, block);
    }
}
