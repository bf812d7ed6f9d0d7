//! Cryptographic primitives for wardenmesh.
//!
//! This crate is deliberately small: it supplies exactly what the overlay
//! needs above `NodeId` derivation (BLAKE3/SHA-256 hashing, `hash`), the
//! signature scheme membership and invitation tokens are built on
//! (Ed25519, `signing`), and an optional AEAD seal for overlay signaling
//! payloads (`aead`). It does not implement a handshake protocol — the
//! `ConnectionManager` handshake (see `warden-connection`) is a plaintext
//! version/identity exchange per the wire protocol, not a key exchange.

pub mod aead;
pub mod hash;
pub mod signing;

use thiserror::Error;

/// Errors raised by cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// A key or signature was not the expected byte length.
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// AEAD encryption failed (should not happen for well-formed input).
    #[error("encryption failed")]
    EncryptionFailed,

    /// AEAD decryption or authentication failed.
    #[error("decryption failed")]
    DecryptionFailed,

    /// Signature verification failed.
    #[error("signature verification failed")]
    InvalidSignature,

    /// Malformed key material.
    #[error("malformed key: {0}")]
    MalformedKey(String),
}
