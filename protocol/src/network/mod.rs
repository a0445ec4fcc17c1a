//! # Network Module
//!
//! The journal's view of the peer-to-peer layer. The core never opens a
//! socket: it asks a [`Network`] to fetch what it is missing and to
//! broadcast what it produced, and it never waits for an answer. Replies
//! arrive later as ordinary inbound messages.
//!
//! ## Architecture
//!
//! ```text
//! mod.rs    : Network trait, NullNetwork
//! gossip.rs : JournalMessage, ChannelNetwork with a deduplication cache
//! ```

pub mod gossip;

pub use gossip::{ChannelNetwork, GossipConfig, JournalMessage};

use crate::identifier::Identifier;

/// Messaging collaborator of the journal. All calls are fire-and-forget.
pub trait Network: Send + Sync {
    /// Ask peers for a block referenced as a predecessor.
    fn request_missing_block(&self, block_id: Identifier);

    /// Ask peers for a transaction referenced by a block or a dependency.
    fn request_missing_transaction(&self, transaction_id: Identifier);

    /// Send a message to every peer.
    fn broadcast(&self, message: JournalMessage);

    /// Answer a peer's request. Unlike `broadcast`, a record that was sent
    /// before goes out again.
    fn respond(&self, message: JournalMessage) {
        self.broadcast(message);
    }
}

/// A network with no peers. Everything sent to it is discarded.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNetwork;

impl Network for NullNetwork {
    fn request_missing_block(&self, _block_id: Identifier) {}

    fn request_missing_transaction(&self, _transaction_id: Identifier) {}

    fn broadcast(&self, _message: JournalMessage) {}
}
