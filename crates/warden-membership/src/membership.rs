//! `MembershipToken`: proof that a peer was admitted into a (possibly
//! closed) network, signed by the issuer.

use serde::{Deserialize, Serialize};
use warden_crypto::signing::{Signature, SigningKey, VerifyingKey};
use warden_dht::node_id::NodeId;

use crate::MembershipError;

/// Proof of admission into the overlay (§3).
///
/// Valid iff `signature` verifies against the issuer's known public key
/// AND the issuer is transitively reachable to a genesis issuer or a
/// bridge-issued open-network root — that transitive-trust walk is the
/// caller's responsibility (typically `BootstrapServer`/`BridgeNode`);
/// this type only proves the signature is authentic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipToken {
    pub node_id: NodeId,
    pub issuer_node_id: NodeId,
    pub issued_at: u64,
    pub is_genesis: bool,
    pub is_open_network: bool,
    pub authorized_by: Option<NodeId>,
    signature: Signature,
}

/// The fields a signature is computed over, isolated so `issue` and
/// `verify` can never drift out of sync on what gets signed.
#[derive(Serialize)]
struct SignedFields<'a> {
    node_id: &'a NodeId,
    issuer_node_id: &'a NodeId,
    issued_at: u64,
    is_genesis: bool,
    is_open_network: bool,
    authorized_by: Option<&'a NodeId>,
}

impl MembershipToken {
    /// Issue a token for `node_id`, signed by `issuer_key`.
    #[must_use]
    pub fn issue(
        node_id: NodeId,
        issuer_node_id: NodeId,
        issued_at: u64,
        is_genesis: bool,
        is_open_network: bool,
        authorized_by: Option<NodeId>,
        issuer_key: &SigningKey,
    ) -> Self {
        let fields = SignedFields {
            node_id: &node_id,
            issuer_node_id: &issuer_node_id,
            issued_at,
            is_genesis,
            is_open_network,
            authorized_by: authorized_by.as_ref(),
        };
        let payload = serde_json::to_vec(&fields).expect("SignedFields always serializes");
        let signature = issuer_key.sign(&payload);
        Self {
            node_id,
            issuer_node_id,
            issued_at,
            is_genesis,
            is_open_network,
            authorized_by,
            signature,
        }
    }

    /// Verify the token's signature against the issuer's claimed public key.
    ///
    /// This only checks the signature is authentic for the fields carried
    /// by the token; it does not walk the trust chain back to a genesis
    /// issuer — callers combine this with their own admission policy.
    ///
    /// # Errors
    ///
    /// Returns [`MembershipError::InvalidMembershipToken`] if the
    /// signature does not verify.
    pub fn verify(&self, issuer_public_key: &VerifyingKey) -> Result<(), MembershipError> {
        let fields = SignedFields {
            node_id: &self.node_id,
            issuer_node_id: &self.issuer_node_id,
            issued_at: self.issued_at,
            is_genesis: self.is_genesis,
            is_open_network: self.is_open_network,
            authorized_by: self.authorized_by.as_ref(),
        };
        let payload = serde_json::to_vec(&fields).expect("SignedFields always serializes");
        issuer_public_key
            .verify(&payload, &self.signature)
            .map_err(|_| MembershipError::InvalidMembershipToken)
    }
}
