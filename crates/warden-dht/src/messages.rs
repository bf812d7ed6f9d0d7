//! Kademlia RPC message envelope.
//!
//! Wire encoding is JSON, one object per frame, each carrying a `type`
//! field via `serde`'s externally-tagged enum representation. Messages
//! may optionally be sealed with the AEAD helper in `warden_crypto::aead`
//! when carrying overlay-signaling payloads between peers that have
//! already negotiated a shared key.

use crate::node_id::NodeId;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// DHT RPC message envelope. All overlay RPC traffic uses this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DhtMessage {
    Ping(PingRequest),
    Pong(PongResponse),
    FindNode(FindNodeRequest),
    FoundNodes(FoundNodesResponse),
    Store(StoreRequest),
    StoreAck(StoreAckResponse),
    FindValue(FindValueRequest),
    FoundValue(FoundValueResponse),
    /// Overlay-routed signaling envelope (spec §4.4.4): opaque payload
    /// forwarded hop-by-hop toward `target_id` with loop detection.
    Signal(SignalMessage),
}

impl DhtMessage {
    /// Serialize to the wire's JSON frame representation.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails (should not happen for
    /// well-formed messages).
    pub fn to_bytes(&self) -> Result<Vec<u8>, MessageError> {
        serde_json::to_vec(self).map_err(MessageError::Serialization)
    }

    /// Deserialize a message from a JSON frame.
    ///
    /// # Errors
    ///
    /// Returns an error if `bytes` is not a valid encoding of `DhtMessage`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MessageError> {
        serde_json::from_slice(bytes).map_err(MessageError::Serialization)
    }

    /// Seal the message for transport as an overlay signaling payload.
    ///
    /// The nonce is prepended to the ciphertext.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or encryption fails.
    pub fn encrypt(&self, key: &[u8; 32]) -> Result<Vec<u8>, MessageError> {
        use warden_crypto::aead::{AeadKey, Nonce};

        let plaintext = self.to_bytes()?;

        let aead_key = AeadKey::new(*key);
        let nonce = Nonce::generate(&mut rand::thread_rng());

        let sealed = aead_key
            .seal(&nonce, &plaintext, b"")
            .map_err(|_| MessageError::Encryption)?;

        let mut encrypted = nonce.as_bytes().to_vec();
        encrypted.extend_from_slice(&sealed);
        Ok(encrypted)
    }

    /// Open a message sealed by [`encrypt`](Self::encrypt).
    ///
    /// # Errors
    ///
    /// Returns an error if `encrypted` is too short, or if decryption or
    /// deserialization fails.
    pub fn decrypt(encrypted: &[u8], key: &[u8; 32]) -> Result<Self, MessageError> {
        use warden_crypto::aead::{AeadKey, Nonce};

        if encrypted.len() < 24 {
            return Err(MessageError::TooShort);
        }

        let mut nonce_bytes = [0u8; 24];
        nonce_bytes.copy_from_slice(&encrypted[..24]);
        let nonce = Nonce::from_bytes(nonce_bytes);
        let sealed = &encrypted[24..];

        let aead_key = AeadKey::new(*key);
        let plaintext = aead_key
            .open(&nonce, sealed, b"")
            .map_err(|_| MessageError::Decryption)?;

        Self::from_bytes(&plaintext)
    }

    /// The sender's NodeId, when this message carries one.
    #[must_use]
    pub fn sender_id(&self) -> Option<NodeId> {
        match self {
            Self::Ping(msg) => Some(msg.sender_id),
            Self::Pong(msg) => Some(msg.sender_id),
            Self::FindNode(msg) => Some(msg.sender_id),
            Self::FoundNodes(msg) => Some(msg.sender_id),
            Self::Store(msg) => Some(msg.sender_id),
            Self::StoreAck(msg) => Some(msg.sender_id),
            Self::FindValue(msg) => Some(msg.sender_id),
            Self::FoundValue(resp) => match resp {
                FoundValueResponse::Value { sender_id, .. } => Some(*sender_id),
                FoundValueResponse::Peers { sender_id, .. } => Some(*sender_id),
            },
            Self::Signal(msg) => Some(msg.source_id),
        }
    }

    /// The `reqId`/`requestId` this message correlates to, for pending
    /// request resolution and duplicate suppression (spec §3).
    #[must_use]
    pub fn request_id(&self) -> u64 {
        match self {
            Self::Ping(m) => m.request_id,
            Self::Pong(m) => m.request_id,
            Self::FindNode(m) => m.request_id,
            Self::FoundNodes(m) => m.request_id,
            Self::Store(m) => m.request_id,
            Self::StoreAck(m) => m.request_id,
            Self::FindValue(m) => m.request_id,
            Self::FoundValue(resp) => match resp {
                FoundValueResponse::Value { request_id, .. } => *request_id,
                FoundValueResponse::Peers { request_id, .. } => *request_id,
            },
            Self::Signal(m) => m.request_id,
        }
    }
}

/// Generates `reqId`s: a node-scoped monotonic counter folded with a
/// timestamp and randomness, per spec §4.4.1.
#[derive(Debug)]
pub struct RequestIdGenerator {
    counter: AtomicU64,
}

impl RequestIdGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn next(&self) -> u64 {
        use rand::Rng;
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let salt: u16 = rand::thread_rng().gen();
        (seq << 44) ^ (millis << 16) ^ u64::from(salt)
    }
}

impl Default for RequestIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingRequest {
    pub request_id: u64,
    pub sender_id: NodeId,
    pub sender_addr: SocketAddr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PongResponse {
    pub request_id: u64,
    pub sender_id: NodeId,
    pub ok: bool,
}

/// Requests the k closest nodes to `target_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindNodeRequest {
    pub request_id: u64,
    pub sender_id: NodeId,
    pub sender_addr: SocketAddr,
    pub target_id: NodeId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoundNodesResponse {
    pub request_id: u64,
    pub sender_id: NodeId,
    pub peers: Vec<CompactPeer>,
}

/// Compact peer representation for wire transmission. Deliberately omits
/// `publicKey` — `find_node` responses return PeerRecords without it
/// (spec §4.4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactPeer {
    pub id: NodeId,
    pub addr: SocketAddr,
}

/// Stores a key/value pair. `key` is a NodeId-shaped 160-bit identifier
/// (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreRequest {
    pub request_id: u64,
    pub sender_id: NodeId,
    pub sender_addr: SocketAddr,
    pub key: [u8; 20],
    pub value: Vec<u8>,
    pub ttl: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreAckResponse {
    pub request_id: u64,
    pub sender_id: NodeId,
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindValueRequest {
    pub request_id: u64,
    pub sender_id: NodeId,
    pub sender_addr: SocketAddr,
    pub key: [u8; 20],
}

/// A value short-circuits the lookup; otherwise the k closest known peers
/// are returned so the lookup can continue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome")]
pub enum FoundValueResponse {
    Value {
        request_id: u64,
        sender_id: NodeId,
        value: Vec<u8>,
    },
    Peers {
        request_id: u64,
        sender_id: NodeId,
        peers: Vec<CompactPeer>,
    },
}

/// Overlay-routed signaling envelope (spec §4.4.4). Carries an opaque
/// payload (WebRTC offer/answer/ICE candidate, or a WebSocket address
/// exchange) toward `target_id`, hop by hop, via XOR-closest-neighbor
/// forwarding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalMessage {
    pub request_id: u64,
    pub source_id: NodeId,
    pub target_id: NodeId,
    pub payload: Vec<u8>,
    /// NodeIds of peers this message has already traversed, in order.
    pub hops: Vec<NodeId>,
    /// Decremented per hop; the message is dropped at zero.
    pub ttl: u8,
}

/// DHT message errors.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("serialization failed: {0}")]
    Serialization(serde_json::Error),

    #[error("encryption failed")]
    Encryption,

    #[error("decryption failed")]
    Decryption,

    #[error("message too short to contain a nonce")]
    TooShort,
}
