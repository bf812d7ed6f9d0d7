//! Ed25519 signing for membership and invitation tokens.
//!
//! §9 records the source's token signature as a placeholder
//! (`'bridge-issued-...'`) and calls for a real scheme; this crate
//! substitutes Ed25519, matching the dependency already pulled in below.

use crate::CryptoError;
use ed25519_dalek::{Signer, Verifier};
use rand_core::{CryptoRng, RngCore};

/// An Ed25519 signing keypair.
pub struct SigningKey(ed25519_dalek::SigningKey);

/// An Ed25519 public key used to verify signatures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VerifyingKey(ed25519_dalek::VerifyingKey);

/// A detached Ed25519 signature (64 bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Signature(#[serde(with = "signature_bytes")] [u8; 64]);

mod signature_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 64], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 64], D::Error> {
        let v: Vec<u8> = serde::de::Deserialize::deserialize(d)?;
        v.try_into()
            .map_err(|_| serde::de::Error::custom("expected 64 signature bytes"))
    }
}

impl SigningKey {
    /// Generate a new random signing key.
    #[must_use]
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self(ed25519_dalek::SigningKey::generate(rng))
    }

    /// Reconstruct a signing key from its 32-byte seed.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidLength`] if `bytes` is not 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidLength { expected: 32, actual: bytes.len() })?;
        Ok(Self(ed25519_dalek::SigningKey::from_bytes(&arr)))
    }

    /// The public key corresponding to this signing key.
    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        VerifyingKey(self.0.verifying_key())
    }

    /// Sign `message`, producing a detached signature.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.0.sign(message).to_bytes())
    }

    /// Raw public-key bytes, as used for `NodeId::from_public_key`.
    #[must_use]
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.0.verifying_key().to_bytes()
    }
}

impl VerifyingKey {
    /// # Errors
    ///
    /// Returns [`CryptoError::MalformedKey`] if `bytes` is not a valid
    /// compressed Edwards point, or [`CryptoError::InvalidLength`] if it is
    /// not 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidLength { expected: 32, actual: bytes.len() })?;
        let key = ed25519_dalek::VerifyingKey::from_bytes(&arr)
            .map_err(|e| CryptoError::MalformedKey(e.to_string()))?;
        Ok(Self(key))
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// Verify `signature` over `message`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidSignature`] if verification fails.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), CryptoError> {
        let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
        self.0
            .verify(message, &sig)
            .map_err(|_| CryptoError::InvalidSignature)
    }
}

impl Signature {
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 64] {
        self.0
    }

    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidLength`] if `bytes` is not 64 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; 64] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidLength { expected: 64, actual: bytes.len() })?;
        Ok(Self(arr))
    }
}
