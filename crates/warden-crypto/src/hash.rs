//! Hashing helpers used to derive `NodeId`s and DHT keys.
//!
//! Both derivations share one primitive: SHA-256 truncated to 160 bits
//! (§3: "Keyed: SHA-256(publicKey_x ‖ publicKey_y) truncated to 160
//! bits"; DHT keys are "either raw or `SHA-256(applicationKey)`").

use sha2::{Digest, Sha256};

/// `SHA-256(public_key) truncated to 160 bits`, used for
/// `NodeId::from_public_key`.
#[must_use]
pub fn sha256_truncated_160(public_key: &[u8]) -> [u8; 20] {
    let mut hasher = Sha256::new();
    hasher.update(public_key);
    let digest = hasher.finalize();
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest[..20]);
    out
}

/// Full 32-byte SHA-256 digest, used for the network-fingerprint sanity
/// check on reconnection (not a security primitive — see
/// `warden_coordinator::bridge`).
#[must_use]
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Derive a 160-bit DHT key from an opaque application key: §3's
/// `SHA-256(applicationKey)` truncated to 160 bits.
#[must_use]
pub fn derive_dht_key(application_key: &[u8]) -> [u8; 20] {
    sha256_truncated_160(application_key)
}
