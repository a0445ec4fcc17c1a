//! # Gossip Messages
//!
//! The four messages a journal exchanges with its peers, plus a
//! channel-backed [`Network`] that hands outgoing messages to whatever
//! transport the host process runs.
//!
//! ## Deduplication
//!
//! Transactions and blocks are identified by the BLAKE3 hash of their
//! encoding. [`ChannelNetwork`] keeps a bounded set of recently seen hashes
//! (capped at `seen_cache_size`): a record already seen is neither
//! re-broadcast nor handed to the journal twice. Requests are never
//! deduplicated here, since the journal rate-limits them itself and a
//! repeated request after the interval is intentional.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::Network;
use crate::config::unix_millis;
use crate::crypto::hash::{domain_separated_hash, MESSAGE_DOMAIN};
use crate::identifier::Identifier;
use crate::storage::block::TransactionBlock;
use crate::transaction::Transaction;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipConfig {
    /// Maximum number of message hashes kept for deduplication.
    pub seen_cache_size: usize,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            seen_cache_size: 100_000,
        }
    }
}

// ---------------------------------------------------------------------------
// JournalMessage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JournalMessage {
    Transaction(Transaction),
    Block(TransactionBlock),
    BlockRequest { block_id: Identifier },
    TransactionRequest { transaction_id: Identifier },
}

impl JournalMessage {
    /// Hash used for deduplication. Records hash by identifier only, so
    /// journal-owned fields (status, age) do not make a copy look new.
    pub fn content_hash(&self) -> [u8; 32] {
        let mut preimage = self.kind().as_bytes().to_vec();
        match self {
            Self::Transaction(txn) => preimage.extend_from_slice(txn.id.as_bytes()),
            Self::Block(block) => preimage.extend_from_slice(block.id.as_bytes()),
            Self::BlockRequest { block_id } => preimage.extend_from_slice(block_id.as_bytes()),
            Self::TransactionRequest { transaction_id } => {
                preimage.extend_from_slice(transaction_id.as_bytes())
            }
        }
        domain_separated_hash(MESSAGE_DOMAIN, &preimage)
    }

    /// Requests are exempt from deduplication.
    pub fn is_request(&self) -> bool {
        matches!(self, Self::BlockRequest { .. } | Self::TransactionRequest { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transaction(_) => "transaction",
            Self::Block(_) => "block",
            Self::BlockRequest { .. } => "block_request",
            Self::TransactionRequest { .. } => "transaction_request",
        }
    }
}

// ---------------------------------------------------------------------------
// ChannelNetwork
// ---------------------------------------------------------------------------

/// A [`Network`] that pushes every outgoing message into an unbounded
/// tokio channel. The receiving end belongs to the transport (or, in tests,
/// to the test itself).
pub struct ChannelNetwork {
    config: GossipConfig,
    outbound: mpsc::UnboundedSender<JournalMessage>,
    /// Content hash to first-seen time (Unix ms).
    seen_messages: DashMap<[u8; 32], u64>,
}

impl ChannelNetwork {
    pub fn new(config: GossipConfig) -> (Self, mpsc::UnboundedReceiver<JournalMessage>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let network = Self {
            config,
            outbound,
            seen_messages: DashMap::new(),
        };
        (network, rx)
    }

    /// Record an inbound message. Returns it unless it is a duplicate
    /// transaction or block.
    pub fn accept_inbound(&self, message: JournalMessage) -> Option<JournalMessage> {
        if message.is_request() {
            return Some(message);
        }
        if !self.mark_seen(message.content_hash()) {
            trace!(kind = message.kind(), "dropping duplicate gossip message");
            return None;
        }
        Some(message)
    }

    pub fn seen_count(&self) -> usize {
        self.seen_messages.len()
    }

    /// `false` if the hash was already present.
    fn mark_seen(&self, hash: [u8; 32]) -> bool {
        if self.seen_messages.contains_key(&hash) {
            return false;
        }
        self.seen_messages.insert(hash, unix_millis());
        self.maybe_evict_seen_cache();
        true
    }

    fn send(&self, message: JournalMessage) {
        let kind = message.kind();
        if self.outbound.send(message).is_err() {
            debug!(kind, "gossip receiver dropped, message discarded");
        }
    }

    /// Evicts the oldest entries once the cache exceeds capacity.
    fn maybe_evict_seen_cache(&self) {
        if self.seen_messages.len() <= self.config.seen_cache_size {
            return;
        }

        // Evict down to 75% capacity.
        let target = self.config.seen_cache_size * 3 / 4;
        let mut entries: Vec<([u8; 32], u64)> = self
            .seen_messages
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();

        entries.sort_by_key(|(_, ts)| *ts);

        let to_remove = entries.len().saturating_sub(target);
        for (hash, _) in entries.iter().take(to_remove) {
            self.seen_messages.remove(hash);
        }
    }
}

impl Network for ChannelNetwork {
    fn request_missing_block(&self, block_id: Identifier) {
        debug!(block_id = %block_id.short(), "requesting missing block");
        self.send(JournalMessage::BlockRequest { block_id });
    }

    fn request_missing_transaction(&self, transaction_id: Identifier) {
        debug!(txn_id = %transaction_id.short(), "requesting missing transaction");
        self.send(JournalMessage::TransactionRequest { transaction_id });
    }

    fn broadcast(&self, message: JournalMessage) {
        if !message.is_request() && !self.mark_seen(message.content_hash()) {
            trace!(kind = message.kind(), "already broadcast, skipping");
            return;
        }
        self.send(message);
    }

    fn respond(&self, message: JournalMessage) {
        self.send(message);
    }
}

impl std::fmt::Debug for ChannelNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelNetwork")
            .field("seen", &self.seen_messages.len())
            .finish()
    }
}
