//! Transaction verification: identifier integrity and signature validity.
//!
//! The journal trusts its caller to run [`verify_transaction`] on receipt.
//! The network ingress in [`crate::journal::Journal::handle_message`] does
//! exactly that and silently drops anything that fails.

use thiserror::Error;

use super::builder::Transaction;

/// Errors that can occur during transaction verification.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// The transaction id does not match the hash of its signable bytes.
    #[error("transaction id mismatch: expected {expected}, got {actual}")]
    IdMismatch { expected: String, actual: String },

    #[error("transaction is unsigned")]
    MissingSignature,

    /// The Ed25519 signature does not verify against the originator key.
    #[error("invalid signature: does not verify against originator {originator}")]
    InvalidSignature { originator: String },
}

/// Verifies a signed transaction.
///
/// Checks, cheapest first:
///
/// 1. **Identifier**: must equal the hash of `signable_bytes()`.
/// 2. **Signature present**: both originator and signature are set.
/// 3. **Signature valid**: Ed25519 verification against the originator.
pub fn verify_transaction(tx: &Transaction) -> Result<(), TransactionError> {
    let expected = tx.compute_id();
    if tx.id != expected {
        return Err(TransactionError::IdMismatch {
            expected: expected.to_hex(),
            actual: tx.id.to_hex(),
        });
    }

    let (Some(originator), Some(signature)) = (&tx.originator, &tx.signature) else {
        return Err(TransactionError::MissingSignature);
    };

    if !originator.verify(&tx.signable_bytes(), signature) {
        return Err(TransactionError::InvalidSignature {
            originator: originator.to_hex(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::StrataKeypair;
    use crate::transaction::builder::TransactionBuilder;
    use crate::transaction::signing::sign_transaction;

    fn signed_tx() -> Transaction {
        let kp = StrataKeypair::from_seed(&[4u8; 32]);
        let mut tx = TransactionBuilder::new("/IntegerKey")
            .nonce(11)
            .payload(b"hello".to_vec())
            .build();
        sign_transaction(&mut tx, &kp);
        tx
    }

    #[test]
    fn valid_transaction_passes() {
        assert!(verify_transaction(&signed_tx()).is_ok());
    }

    #[test]
    fn unsigned_transaction_fails() {
        let tx = TransactionBuilder::new("/IntegerKey").nonce(1).build();
        assert!(matches!(
            verify_transaction(&tx),
            Err(TransactionError::MissingSignature)
        ));
    }

    #[test]
    fn tampered_payload_fails_id_check() {
        let mut tx = signed_tx();
        tx.payload = b"evil".to_vec();
        assert!(matches!(
            verify_transaction(&tx),
            Err(TransactionError::IdMismatch { .. })
        ));
    }

    #[test]
    fn foreign_signature_fails() {
        let mut tx = signed_tx();
        tx.originator = Some(StrataKeypair::from_seed(&[5u8; 32]).public_key());
        assert!(matches!(
            verify_transaction(&tx),
            Err(TransactionError::InvalidSignature { .. })
        ));
    }
}
