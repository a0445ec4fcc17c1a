//! Content-addressed identifiers for transactions and blocks.
//!
//! An [`Identifier`] is a 32-byte BLAKE3 digest. The all-zero value is
//! reserved as [`Identifier::NULL`] and marks the absence of a predecessor
//! (the root of the chain).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::crypto::hash::domain_separated_hash;

#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identifier([u8; 32]);

impl Identifier {
    /// The distinguished "no block" identifier.
    pub const NULL: Identifier = Identifier([0u8; 32]);

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Hash `data` under a domain tag.
    pub fn digest(domain: &str, data: &[u8]) -> Self {
        Self(domain_separated_hash(domain, data))
    }

    pub fn is_null(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Self(arr))
    }

    /// First eight hex characters. Every log line in the journal uses this.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identifier({})", self.short())
    }
}
