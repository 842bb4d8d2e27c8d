use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::PublicKey;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PeerIdError {
    #[error("Invalid base58: {0}")]
    InvalidBase58(String),

    #[error("Invalid peer id length: expected 32, got {0}")]
    InvalidLength(usize),
}

/// Identity of a network participant: SHA-256 of its Ed25519 public key.
///
/// Ordering is lexicographic over the digest bytes; connection arbitration
/// relies on it being total and identical on every node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId([u8; 32]);

impl PeerId {
    /// Derive the identity from a public key
    pub fn from_public_key(pubkey: &PublicKey) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"peerid:");
        hasher.update(pubkey.as_bytes());
        let result = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&result);
        Self(bytes)
    }

    /// Create from raw bytes
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Abbreviated form for log lines. Encoded only when displayed.
    pub fn short(&self) -> ShortPeerId {
        ShortPeerId(*self)
    }
}

/// Leading bytes of a [`PeerId`] rendered in base58
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ShortPeerId(PeerId);

impl ShortPeerId {
    /// Bytes of the digest shown in the abbreviated form
    pub const LEN: usize = 6;
}

impl fmt::Display for ShortPeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(&self.0 .0[..Self::LEN]).into_string())
    }
}

impl fmt::Debug for ShortPeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(&self.0).into_string())
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.short())
    }
}

impl FromStr for PeerId {
    type Err = PeerIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| PeerIdError::InvalidBase58(e.to_string()))?;
        let bytes: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| PeerIdError::InvalidLength(bytes.len()))?;
        Ok(Self(bytes))
    }
}
