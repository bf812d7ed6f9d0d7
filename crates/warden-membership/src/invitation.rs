//! `InvitationToken`: a single-use, invitee-bound credential a helper
//! peer hands to a joining peer over overlay signaling.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use warden_crypto::signing::{Signature, SigningKey, VerifyingKey};
use warden_dht::node_id::NodeId;

use crate::MembershipError;

/// Default lifetime of an unconsumed invitation before it is treated as
/// expired, chosen to match `dedupRetentionMs`'s 5-minute window as the
/// other short-lived-state default in this system.
pub const DEFAULT_INVITATION_TTL_MS: u64 = 300_000;

/// A one-time invitation bound to a specific invitee (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvitationToken {
    pub invitee_node_id: NodeId,
    pub inviter_node_id: NodeId,
    pub created_at: u64,
    pub nonce: u64,
    signature: Signature,
}

#[derive(Serialize)]
struct SignedFields<'a> {
    invitee_node_id: &'a NodeId,
    inviter_node_id: &'a NodeId,
    created_at: u64,
    nonce: u64,
}

impl InvitationToken {
    /// Issue an invitation for `invitee_node_id`, signed by the inviter.
    #[must_use]
    pub fn issue(
        invitee_node_id: NodeId,
        inviter_node_id: NodeId,
        created_at: u64,
        nonce: u64,
        inviter_key: &SigningKey,
    ) -> Self {
        let fields = SignedFields { invitee_node_id: &invitee_node_id, inviter_node_id: &inviter_node_id, created_at, nonce };
        let payload = serde_json::to_vec(&fields).expect("SignedFields always serializes");
        let signature = inviter_key.sign(&payload);
        Self { invitee_node_id, inviter_node_id, created_at, nonce, signature }
    }

    /// Verify the signature and that this token is not stale, without
    /// consuming it. Use [`InvitationRegistry::accept`] for the one-time
    /// acceptance flow.
    ///
    /// # Errors
    ///
    /// Returns [`MembershipError::InvitationExpiredOrInvalid`] if the
    /// signature fails to verify, the bound invitee does not match, or
    /// `now_ms - created_at` exceeds `ttl_ms`.
    pub fn verify(
        &self,
        expected_invitee: &NodeId,
        inviter_public_key: &VerifyingKey,
        now_ms: u64,
        ttl_ms: u64,
    ) -> Result<(), MembershipError> {
        if &self.invitee_node_id != expected_invitee {
            return Err(MembershipError::InvitationExpiredOrInvalid);
        }
        if now_ms.saturating_sub(self.created_at) > ttl_ms {
            return Err(MembershipError::InvitationExpiredOrInvalid);
        }
        let fields = SignedFields {
            invitee_node_id: &self.invitee_node_id,
            inviter_node_id: &self.inviter_node_id,
            created_at: self.created_at,
            nonce: self.nonce,
        };
        let payload = serde_json::to_vec(&fields).expect("SignedFields always serializes");
        inviter_public_key
            .verify(&payload, &self.signature)
            .map_err(|_| MembershipError::InvitationExpiredOrInvalid)
    }
}

/// Tracks which `(inviteeNodeId, nonce)` pairs have already been
/// consumed, so a replayed invitation fails with `InvitationExpiredOrInvalid`
/// even if its signature and TTL are still otherwise valid (§8,
/// "Invitation presented twice: second attempt fails").
#[derive(Debug, Default)]
pub struct InvitationRegistry {
    consumed: HashMap<(NodeId, u64), u64>,
}

impl InvitationRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Verify `token` and, if valid and unconsumed, mark it consumed.
    ///
    /// # Errors
    ///
    /// Returns [`MembershipError::InvitationExpiredOrInvalid`] if the
    /// token fails [`InvitationToken::verify`] or was already consumed.
    pub fn accept(
        &mut self,
        token: &InvitationToken,
        expected_invitee: &NodeId,
        inviter_public_key: &VerifyingKey,
        now_ms: u64,
        ttl_ms: u64,
    ) -> Result<(), MembershipError> {
        let key = (token.invitee_node_id, token.nonce);
        if self.consumed.contains_key(&key) {
            tracing::warn!(invitee = %token.invitee_node_id, "rejected replayed invitation");
            return Err(MembershipError::InvitationExpiredOrInvalid);
        }
        token.verify(expected_invitee, inviter_public_key, now_ms, ttl_ms)?;
        self.consumed.insert(key, now_ms);
        Ok(())
    }

    /// Drop consumption records older than `retention_ms`, bounding
    /// unbounded growth the way `DhtEngine`'s dedup bookkeeping does.
    pub fn prune(&mut self, now_ms: u64, retention_ms: u64) {
        self.consumed.retain(|_, consumed_at| now_ms.saturating_sub(*consumed_at) <= retention_ms);
    }
}
