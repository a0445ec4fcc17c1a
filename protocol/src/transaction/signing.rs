//! Transaction signing with Ed25519 keypairs.
//!
//! Signing is a separate step from building so that construction stays
//! testable without key material. The signed data is the canonical
//! [`Transaction::signable_bytes`] output.

use super::builder::Transaction;
use crate::crypto::keys::StrataKeypair;

/// Signs a transaction in place and records the signer as originator.
///
/// The identifier is not affected: it is derived from the same signable
/// bytes at build time.
///
/// ```rust
/// use strata_protocol::crypto::keys::StrataKeypair;
/// use strata_protocol::transaction::{sign_transaction, verify_transaction, TransactionBuilder};
///
/// let keypair = StrataKeypair::generate();
/// let mut tx = TransactionBuilder::new("/IntegerKey").nonce(1).build();
/// sign_transaction(&mut tx, &keypair);
/// assert!(verify_transaction(&tx).is_ok());
/// ```
pub fn sign_transaction<'a>(tx: &'a mut Transaction, keypair: &StrataKeypair) -> &'a Transaction {
    let signable = tx.signable_bytes();
    tx.signature = Some(keypair.sign(&signable));
    tx.originator = Some(keypair.public_key());
    tx
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::builder::TransactionBuilder;
    use crate::transaction::verification::verify_transaction;

    #[test]
    fn sign_sets_signature_and_originator() {
        let kp = StrataKeypair::generate();
        let mut tx = TransactionBuilder::new("/IntegerKey").nonce(1).build();
        assert!(!tx.is_signed());

        sign_transaction(&mut tx, &kp);

        assert!(tx.is_signed());
        assert_eq!(tx.originator, Some(kp.public_key()));
    }

    #[test]
    fn signing_does_not_change_id() {
        let kp = StrataKeypair::generate();
        let mut tx = TransactionBuilder::new("/IntegerKey").nonce(3).build();
        let id = tx.id;
        sign_transaction(&mut tx, &kp);
        assert_eq!(tx.id, id);
    }

    #[test]
    fn signed_transaction_verifies() {
        let kp = StrataKeypair::from_seed(&[1u8; 32]);
        let mut tx = TransactionBuilder::new("/IntegerKey")
            .nonce(2)
            .payload(vec![1, 2, 3])
            .build();
        sign_transaction(&mut tx, &kp);
        assert!(verify_transaction(&tx).is_ok());
    }
}
