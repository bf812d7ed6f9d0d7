//! `XChaCha20-Poly1305` AEAD sealing for overlay signaling payloads.
//!
//! The overlay signaling RPC (see `warden-dht::messages::DhtMessage::Signal`)
//! carries opaque payloads between peers once a shared key has been
//! negotiated out of band (e.g. via the membership token exchange). Sealing
//! those payloads is optional and orthogonal to the rest of the wire
//! protocol, which is plain JSON.

use crate::CryptoError;
use chacha20poly1305::{
    XChaCha20Poly1305,
    aead::{Aead, KeyInit},
};
use rand_core::{CryptoRng, RngCore};
use zeroize::ZeroizeOnDrop;

/// Authentication tag size (16 bytes / 128 bits).
pub const TAG_SIZE: usize = 16;
/// Nonce size (24 bytes / 192 bits, safe for random generation).
pub const NONCE_SIZE: usize = 24;
/// Key size (32 bytes / 256 bits).
pub const KEY_SIZE: usize = 32;

/// A 192-bit `XChaCha20Poly1305` nonce.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Nonce([u8; NONCE_SIZE]);

impl Nonce {
    #[must_use]
    pub fn from_bytes(bytes: [u8; NONCE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Generate a random nonce. Safe to do per-message given the 192-bit size.
    #[must_use]
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; NONCE_SIZE];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }

    fn as_generic(&self) -> &chacha20poly1305::XNonce {
        chacha20poly1305::XNonce::from_slice(&self.0)
    }
}

/// A 256-bit AEAD key. Zeroized on drop.
#[derive(Clone, ZeroizeOnDrop)]
pub struct AeadKey([u8; KEY_SIZE]);

impl AeadKey {
    #[must_use]
    pub fn new(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidLength`] if `slice` is not 32 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, CryptoError> {
        if slice.len() != KEY_SIZE {
            return Err(CryptoError::InvalidLength {
                expected: KEY_SIZE,
                actual: slice.len(),
            });
        }
        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    #[must_use]
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Seal `plaintext`, returning ciphertext with the tag appended.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::EncryptionFailed`] if the underlying AEAD
    /// operation fails.
    pub fn seal(&self, nonce: &Nonce, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = XChaCha20Poly1305::new((&self.0).into());
        cipher
            .encrypt(
                nonce.as_generic(),
                chacha20poly1305::aead::Payload { msg: plaintext, aad },
            )
            .map_err(|_| CryptoError::EncryptionFailed)
    }

    /// Open a sealed payload produced by [`seal`](Self::seal).
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::DecryptionFailed`] on authentication failure
    /// or malformed input.
    pub fn open(&self, nonce: &Nonce, sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < TAG_SIZE {
            return Err(CryptoError::DecryptionFailed);
        }
        let cipher = XChaCha20Poly1305::new((&self.0).into());
        cipher
            .decrypt(
                nonce.as_generic(),
                chacha20poly1305::aead::Payload { msg: sealed, aad },
            )
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}
