//! # Cryptographic Primitives
//!
//! Thin wrappers around audited implementations:
//!
//! - **Ed25519** (ed25519-dalek) for transaction and block signatures.
//! - **BLAKE3** for identifiers and deduplication hashes.

pub mod hash;
pub mod keys;

pub use hash::domain_separated_hash;
pub use keys::{StrataKeypair, StrataPublicKey, StrataSignature};
