//! Transaction construction via the builder pattern.
//!
//! The [`TransactionBuilder`] collects the fields a client controls, then
//! `.build()` returns an unsigned [`Transaction`] whose identifier is
//! already derived from its contents. Signing happens separately in
//! [`super::signing`].

use serde::{Deserialize, Serialize};

use super::types::TransactionStatus;
use crate::crypto::hash::TRANSACTION_DOMAIN;
use crate::crypto::keys::{StrataPublicKey, StrataSignature};
use crate::identifier::Identifier;

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// A set of updates to be applied atomically to one family's store.
///
/// The client-controlled fields (`family`, `nonce`, `dependencies`,
/// `payload`) are immutable once built: the `id` is the domain-separated
/// BLAKE3 hash of their canonical encoding. `originator` and `signature`
/// are filled in by signing.
///
/// `status`, `in_block` and `age` belong to the journal. They are excluded
/// from the identifier and from the signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// `domain_hash(signable_bytes)`.
    pub id: Identifier,

    /// Name of the transaction family, e.g. `/IntegerKey`. Routes the
    /// transaction to its sub-store.
    pub family: String,

    /// Client-chosen nonce so that identical payloads get distinct ids.
    pub nonce: u64,

    /// Transactions that must be committed (or precede this one in the same
    /// block) before this one may be applied.
    pub dependencies: Vec<Identifier>,

    /// Family-specific payload. Opaque to the journal.
    pub payload: Vec<u8>,

    /// Public key of the signer.
    pub originator: Option<StrataPublicKey>,

    /// Ed25519 signature over `signable_bytes()`.
    pub signature: Option<StrataSignature>,

    pub status: TransactionStatus,

    /// Identifier of the committed block containing this transaction.
    pub in_block: Option<Identifier>,

    /// Number of candidate builds in which this transaction was not ready.
    pub age: u32,
}

impl Transaction {
    /// Canonical byte representation used for the id and the signature.
    ///
    /// Length-prefixed fields with fixed-width little-endian integers, so
    /// the encoding is independent of any serde format.
    pub fn signable_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64 + self.payload.len() + 32 * self.dependencies.len());

        buf.extend_from_slice(&(self.family.len() as u32).to_le_bytes());
        buf.extend_from_slice(self.family.as_bytes());

        buf.extend_from_slice(&self.nonce.to_le_bytes());

        buf.extend_from_slice(&(self.dependencies.len() as u32).to_le_bytes());
        for dep in &self.dependencies {
            buf.extend_from_slice(dep.as_bytes());
        }

        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.payload);

        buf
    }

    pub fn compute_id(&self) -> Identifier {
        Identifier::digest(TRANSACTION_DOMAIN, &self.signable_bytes())
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some() && self.originator.is_some()
    }

    /// `true` once the transaction is part of the committed chain.
    pub fn is_committed(&self) -> bool {
        self.status == TransactionStatus::Committed
    }

    pub(crate) fn increment_age(&mut self) -> u32 {
        self.age = self.age.saturating_add(1);
        self.age
    }
}

// ---------------------------------------------------------------------------
// TransactionBuilder
// ---------------------------------------------------------------------------

/// Fluent builder for unsigned [`Transaction`] instances.
///
/// ```rust
/// use strata_protocol::transaction::TransactionBuilder;
///
/// let tx = TransactionBuilder::new("/IntegerKey")
///     .nonce(1)
///     .payload(br#"{"verb":"set","name":"a","value":1}"#.to_vec())
///     .build();
/// assert!(!tx.is_signed());
/// ```
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    family: String,
    nonce: u64,
    dependencies: Vec<Identifier>,
    payload: Vec<u8>,
}

impl TransactionBuilder {
    pub fn new(family: &str) -> Self {
        Self {
            family: family.to_string(),
            nonce: 0,
            dependencies: Vec::new(),
            payload: Vec::new(),
        }
    }

    pub fn nonce(mut self, nonce: u64) -> Self {
        self.nonce = nonce;
        self
    }

    /// Append one dependency. Order is preserved.
    pub fn depends_on(mut self, id: Identifier) -> Self {
        self.dependencies.push(id);
        self
    }

    pub fn dependencies(mut self, ids: impl IntoIterator<Item = Identifier>) -> Self {
        self.dependencies.extend(ids);
        self
    }

    pub fn payload(mut self, data: Vec<u8>) -> Self {
        self.payload = data;
        self
    }

    pub fn build(self) -> Transaction {
        let mut tx = Transaction {
            id: Identifier::NULL,
            family: self.family,
            nonce: self.nonce,
            dependencies: self.dependencies,
            payload: self.payload,
            originator: None,
            signature: None,
            status: TransactionStatus::Unknown,
            in_block: None,
            age: 0,
        };
        tx.id = tx.compute_id();
        tx
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
