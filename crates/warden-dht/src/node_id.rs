//! DHT node identity and XOR distance metric.
//!
//! `NodeId` is a 160-bit identifier used throughout the Kademlia overlay.
//! Two derivations are supported and are indistinguishable once computed
//! (§3): a keyed derivation (`from_public_key`, SHA-256 truncated
//! to 160 bits, for browser peers whose identity is tied to a keypair) and
//! a random derivation (`random`, for server peers and bridges).

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

const BYTES: usize = 20;

/// 160-bit node identifier for the Kademlia overlay.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId([u8; BYTES]);

impl NodeId {
    /// Number of bits in a NodeId (and k-buckets in a routing table).
    pub const BITS: usize = 160;

    /// Generate a random NodeId. Used by server peers and bridges, which
    /// have no public-key binding.
    #[must_use]
    pub fn random() -> Self {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        let mut bytes = [0u8; BYTES];
        rng.fill(&mut bytes[..]);
        Self(bytes)
    }

    /// Derive a NodeId from a public key: `SHA-256(public_key)` truncated
    /// to 160 bits. Used by browser peers, whose identity is tied to their
    /// cryptographic keypair.
    #[must_use]
    pub fn from_public_key(public_key: &[u8]) -> Self {
        Self(warden_crypto::hash::sha256_truncated_160(public_key))
    }

    /// Calculate XOR distance to another NodeId.
    ///
    /// The XOR metric has the following properties:
    /// - d(x, x) = 0 (identity)
    /// - d(x, y) = d(y, x) (symmetry)
    /// - d(x, y) + d(y, z) >= d(x, z) (triangle inequality)
    #[must_use]
    pub fn distance(&self, other: &NodeId) -> NodeId {
        let mut result = [0u8; BYTES];
        for (i, byte) in result.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        NodeId(result)
    }

    /// Count leading zero bits, used to determine bucket membership.
    #[must_use]
    pub fn leading_zeros(&self) -> usize {
        let mut count = 0;
        for byte in &self.0 {
            if *byte == 0 {
                count += 8;
            } else {
                count += byte.leading_zeros() as usize;
                break;
            }
        }
        count.min(Self::BITS)
    }

    /// `bucketIndex(local, other) = 159 - commonPrefixLength(local, other)`
    /// (§4.1), equivalently `BITS - 1 - distance.leading_zeros()`.
    /// Returns `None` for identical ids — the local id is never stored in
    /// its own routing table.
    #[must_use]
    pub fn bucket_index(&self, local_id: &NodeId) -> Option<usize> {
        let distance = self.distance(local_id);
        let leading = distance.leading_zeros();
        if leading == Self::BITS {
            None
        } else {
            Some(Self::BITS - 1 - leading)
        }
    }

    /// Get the raw bytes of the NodeId.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; BYTES] {
        &self.0
    }

    /// Create a NodeId from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; BYTES]) -> Self {
        Self(bytes)
    }

    /// Parse a 40-character lowercase hex string, per §6 ("all
    /// nodeIds are 40-hex-character lowercase strings").
    ///
    /// # Errors
    ///
    /// Returns an error if `s` is not exactly 40 valid lowercase hex
    /// characters.
    pub fn from_hex(s: &str) -> Result<Self, NodeIdParseError> {
        if s.len() != BYTES * 2 {
            return Err(NodeIdParseError::WrongLength(s.len()));
        }
        if s.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(NodeIdParseError::NotLowercase);
        }
        let mut bytes = [0u8; BYTES];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| NodeIdParseError::InvalidHex)?;
        Ok(Self(bytes))
    }

    /// Render as the canonical 40-character lowercase hex string.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Errors from [`NodeId::from_hex`].
#[derive(Debug, thiserror::Error)]
pub enum NodeIdParseError {
    #[error("expected 40 hex characters, got {0}")]
    WrongLength(usize),
    #[error("nodeId hex must be lowercase")]
    NotLowercase,
    #[error("invalid hex encoding")]
    InvalidHex,
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", hex::encode(&self.0[..8]))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl PartialOrd for NodeId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Byte-wise lexicographic order, the tie-break for candidates at equal
/// XOR distance during lookups (§4.1).
impl Ord for NodeId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}
