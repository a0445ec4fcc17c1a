//! # Key Management
//!
//! Ed25519 keypairs for Strata validators and transaction originators.
//!
//! Every block is signed by the validator that claimed it and every
//! transaction by the client that created it. The journal checks these
//! signatures on admission and silently drops anything that fails.
//!
//! Key bytes are never logged. The `Debug` impl of [`StrataKeypair`] prints
//! only the public half.

use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use thiserror::Error;

/// Length of an Ed25519 secret key in bytes.
pub const SECRET_KEY_LENGTH: usize = ed25519_dalek::SECRET_KEY_LENGTH;

/// Errors that can occur during key operations.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid secret key bytes: wrong length or not a valid scalar")]
    InvalidSecretKey,

    #[error("invalid public key bytes: not a valid Ed25519 point")]
    InvalidPublicKey,
}

/// A signing identity wrapping an Ed25519 signing key.
///
/// Deliberately not `Serialize`: persisting secret material goes through
/// [`secret_key_bytes`](Self::secret_key_bytes) and nowhere else.
///
/// # Examples
///
/// ```
/// use strata_protocol::crypto::keys::StrataKeypair;
///
/// let kp = StrataKeypair::generate();
/// let sig = kp.sign(b"claim block 7");
/// assert!(kp.public_key().verify(b"claim block 7", &sig));
/// ```
pub struct StrataKeypair {
    signing_key: SigningKey,
}

/// The public half of a keypair. Appears on every transaction and block as
/// the originator.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StrataPublicKey {
    bytes: [u8; 32],
}

/// An Ed25519 signature.
///
/// Stored as `Vec<u8>` for serde compatibility. A value that is not exactly
/// 64 bytes simply fails verification.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrataSignature {
    bytes: Vec<u8>,
}

impl StrataKeypair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Deterministic keypair from a 32-byte seed. Tests lean on this to get
    /// stable originators.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Reconstruct a keypair from a hex-encoded secret key, as written by
    /// `strata-node init`.
    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_str.trim()).map_err(|_| KeyError::InvalidSecretKey)?;
        let arr: [u8; SECRET_KEY_LENGTH] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::InvalidSecretKey)?;
        Ok(Self::from_seed(&arr))
    }

    pub fn public_key(&self) -> StrataPublicKey {
        StrataPublicKey {
            bytes: self.signing_key.verifying_key().to_bytes(),
        }
    }

    /// Sign a message. Ed25519 is deterministic, so equal inputs give equal
    /// signatures.
    pub fn sign(&self, message: &[u8]) -> StrataSignature {
        StrataSignature {
            bytes: self.signing_key.sign(message).to_bytes().to_vec(),
        }
    }

    /// Raw secret key material. Handle with care.
    pub fn secret_key_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }
}

impl Clone for StrataKeypair {
    fn clone(&self) -> Self {
        Self::from_seed(&self.signing_key.to_bytes())
    }
}

impl fmt::Debug for StrataKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StrataKeypair(pub={})", self.public_key().to_hex())
    }
}

// ---------------------------------------------------------------------------
// StrataPublicKey
// ---------------------------------------------------------------------------

impl StrataPublicKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// Parse from a slice, rejecting bytes that are not a valid curve point.
    pub fn try_from_slice(slice: &[u8]) -> Result<Self, KeyError> {
        let bytes: [u8; 32] = slice.try_into().map_err(|_| KeyError::InvalidPublicKey)?;
        VerifyingKey::from_bytes(&bytes).map_err(|_| KeyError::InvalidPublicKey)?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    /// Verify a signature against this key. Any malformed input is a plain
    /// `false`.
    pub fn verify(&self, message: &[u8], signature: &StrataSignature) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(&self.bytes) else {
            return false;
        };
        let Some(sig) = signature.to_dalek_signature() else {
            return false;
        };
        verifying_key.verify(message, &sig).is_ok()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    /// First eight hex characters, for log lines.
    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl Hash for StrataPublicKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl fmt::Display for StrataPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for StrataPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StrataPublicKey({})", self.short())
    }
}

// ---------------------------------------------------------------------------
// StrataSignature
// ---------------------------------------------------------------------------

impl StrataSignature {
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self {
            bytes: bytes.to_vec(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn to_dalek_signature(&self) -> Option<DalekSignature> {
        let arr: [u8; 64] = self.bytes.as_slice().try_into().ok()?;
        Some(DalekSignature::from_bytes(&arr))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }
}

impl fmt::Debug for StrataSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex_str = self.to_hex();
        if hex_str.len() >= 128 {
            write!(f, "StrataSignature({}...{})", &hex_str[..8], &hex_str[120..])
        } else {
            write!(f, "StrataSignature({})", hex_str)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let kp = StrataKeypair::generate();
        let sig = kp.sign(b"block 1");
        assert!(kp.public_key().verify(b"block 1", &sig));
    }

    #[test]
    fn wrong_message_fails_verification() {
        let kp = StrataKeypair::generate();
        let sig = kp.sign(b"correct");
        assert!(!kp.public_key().verify(b"tampered", &sig));
    }

    #[test]
    fn wrong_key_fails_verification() {
        let kp1 = StrataKeypair::generate();
        let kp2 = StrataKeypair::generate();
        let sig = kp1.sign(b"message");
        assert!(!kp2.public_key().verify(b"message", &sig));
    }

    #[test]
    fn hex_secret_roundtrip() {
        let kp = StrataKeypair::generate();
        let restored = StrataKeypair::from_hex(&hex::encode(kp.secret_key_bytes())).unwrap();
        assert_eq!(kp.public_key(), restored.public_key());
    }

    #[test]
    fn invalid_hex_rejected() {
        assert!(StrataKeypair::from_hex("zz").is_err());
        assert!(StrataKeypair::from_hex("abcd").is_err());
    }

    #[test]
    fn deterministic_from_seed() {
        let a = StrataKeypair::from_seed(&[7u8; 32]);
        let b = StrataKeypair::from_seed(&[7u8; 32]);
        assert_eq!(a.public_key(), b.public_key());
        assert_eq!(a.sign(b"x"), b.sign(b"x"));
    }

    #[test]
    fn truncated_signature_is_rejected() {
        let kp = StrataKeypair::generate();
        let sig = StrataSignature {
            bytes: kp.sign(b"m").as_bytes()[..32].to_vec(),
        };
        assert!(!kp.public_key().verify(b"m", &sig));
    }

    #[test]
    fn public_key_slice_validation() {
        let kp = StrataKeypair::generate();
        assert!(StrataPublicKey::try_from_slice(kp.public_key().as_bytes()).is_ok());
        assert!(StrataPublicKey::try_from_slice(&[1u8; 31]).is_err());
    }

    #[test]
    fn debug_does_not_leak_secret() {
        let kp = StrataKeypair::from_seed(&[9u8; 32]);
        let debug = format!("{:?}", kp);
        assert!(!debug.contains(&hex::encode(kp.secret_key_bytes())));
    }
}
