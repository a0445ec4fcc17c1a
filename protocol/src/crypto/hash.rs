//! # Hashing Utilities
//!
//! BLAKE3 is the only hash function in Strata. Transaction identifiers,
//! block identifiers, and gossip deduplication keys all come out of here.
//!
//! Identifiers are computed with domain separation so that a transaction
//! and a block with byte-identical signing payloads can never share an id.

/// Domain tag for transaction identifiers.
pub const TRANSACTION_DOMAIN: &str = "strata 2026 transaction id";

/// Domain tag for block identifiers.
pub const BLOCK_DOMAIN: &str = "strata 2026 block id";

/// Domain tag for gossip message deduplication hashes.
pub const MESSAGE_DOMAIN: &str = "strata 2026 gossip message";

/// Domain-separated BLAKE3 hash.
///
/// Uses BLAKE3's `derive_key` mode: the context string selects a different
/// internal IV, so outputs from two contexts never collide even for equal
/// inputs.
///
/// ```
/// use strata_protocol::crypto::{domain_separated_hash, hash::BLOCK_DOMAIN};
///
/// let hash = domain_separated_hash(BLOCK_DOMAIN, b"strata");
/// assert_eq!(hash.len(), 32);
/// ```
pub fn domain_separated_hash(context: &str, data: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    hasher.update(data);
    *hasher.finalize().as_bytes()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
