//! `BridgeNode`: a passive DHT observer. It joins the overlay and
//! forwards `find_node` queries for routing value, but never originates
//! application `store`/`get` traffic and is itself ineligible to be
//! chosen as an onboarding helper (§4.5).

use async_trait::async_trait;
use std::time::Duration;
use tracing::{instrument, warn};
use warden_crypto::signing::{SigningKey, VerifyingKey};
use warden_dht::config::Config;
use warden_dht::node_id::NodeId;
use warden_membership::MembershipToken;

use crate::bootstrap::OnboardingBridge;
use crate::error::CoordinatorError;
use crate::helper_selection::{dispatch_to_first_ack, select_candidates, HelperCandidate, HelperDispatch};

/// What `BridgeNode::get_onboarding_peer` needs from the DHT layer: a
/// snapshot of `find_node(target)` candidates already carrying the
/// liveness/metadata fields helper selection filters and scores on.
/// Kept separate from `warden_dht::engine::DhtEngine` so this crate is
/// not generic over its `PeerSink` type parameter.
#[async_trait]
pub trait RoutingSnapshot: Send + Sync {
    async fn find_node_candidates(
        &self,
        target: NodeId,
        deadline: Duration,
    ) -> Result<Vec<HelperCandidate>, CoordinatorError>;
}

/// Response to `get_onboarding_peer` (§6).
#[derive(Debug, Clone)]
pub struct OnboardingPeerResponse {
    pub helper_node_id: NodeId,
    pub membership_token: MembershipToken,
    pub status: String,
}

/// A passive DHT observer that performs helper selection and issues
/// membership tokens on the bootstrap server's behalf.
pub struct BridgeNode<F: RoutingSnapshot, D: HelperDispatch> {
    id: NodeId,
    signing_key: SigningKey,
    config: Config,
    finder: F,
    dispatcher: D,
}

impl<F: RoutingSnapshot, D: HelperDispatch> BridgeNode<F, D> {
    #[must_use]
    pub fn new(id: NodeId, signing_key: SigningKey, config: Config, finder: F, dispatcher: D) -> Self {
        Self { id, signing_key, config, finder, dispatcher }
    }

    #[must_use]
    pub const fn id(&self) -> NodeId {
        self.id
    }

    /// Run the helper-selection algorithm (§4.5 steps 1-7) and
    /// issue an open-network `MembershipToken` authorized by whichever
    /// helper acknowledged.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::NoHelperAvailable`] if no candidate
    /// acknowledges within its dispatch deadline.
    #[instrument(skip(self))]
    pub async fn get_onboarding_peer(
        &self,
        new_node_id: NodeId,
        issued_at: u64,
    ) -> Result<OnboardingPeerResponse, CoordinatorError> {
        let target = NodeId::random();
        let candidates = self
            .finder
            .find_node_candidates(target, self.config.onboarding_find_node_deadline)
            .await?;

        let selected = select_candidates(candidates, &self.id, self.config.helper_candidates_n);
        if selected.is_empty() {
            return Err(CoordinatorError::NoHelperAvailable);
        }

        let helper_node_id =
            dispatch_to_first_ack(&self.dispatcher, &selected, self.config.per_candidate_deadline).await?;

        let membership_token = MembershipToken::issue(
            new_node_id,
            self.id,
            issued_at,
            false,
            true,
            Some(helper_node_id),
            &self.signing_key,
        );

        Ok(OnboardingPeerResponse {
            helper_node_id,
            membership_token,
            status: "invitation_sent".to_string(),
        })
    }

    /// Issue the genesis membership token for the very first peer to
    /// ever join the overlay.
    #[must_use]
    pub fn connect_genesis_peer(&self, new_node_id: NodeId, issued_at: u64) -> MembershipToken {
        MembershipToken::issue(new_node_id, self.id, issued_at, true, false, None, &self.signing_key)
    }

    /// Re-validate a returning peer's membership token and compare the
    /// network fingerprint it remembers against the one computed now.
    ///
    /// The fingerprint mismatch is logged but never fails the call: it is
    /// a sanity check for observability, not a security primitive. Only
    /// signature failure is fatal.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Membership`] if the token's signature
    /// does not verify against `issuer_key`.
    pub fn validate_reconnection(
        &self,
        token: &MembershipToken,
        issuer_key: &VerifyingKey,
        remembered_fingerprint: &str,
        active_peer_ids: &[NodeId],
        recent_announcements: &[String],
        now_ms: u64,
    ) -> Result<(), CoordinatorError> {
        token.verify(issuer_key)?;

        let current = network_fingerprint(active_peer_ids, recent_announcements, &self.id, now_ms);
        if current != remembered_fingerprint {
            warn!(
                node_id = %token.node_id,
                "reconnecting peer's remembered network fingerprint does not match current state"
            );
        }
        Ok(())
    }
}

/// Lets `BootstrapServer`'s open-network branch delegate to a
/// `BridgeNode` without becoming generic over `F`/`D` itself.
#[async_trait]
impl<F, D> OnboardingBridge for BridgeNode<F, D>
where
    F: RoutingSnapshot + Send + Sync + 'static,
    D: HelperDispatch + Send + Sync + 'static,
{
    async fn get_onboarding_peer(
        &self,
        new_node_id: NodeId,
        issued_at: u64,
    ) -> Result<OnboardingPeerResponse, CoordinatorError> {
        BridgeNode::get_onboarding_peer(self, new_node_id, issued_at).await
    }
}

/// `SHA-256(sorted active peerIds ∥ sorted recent valid announcements ∥
/// localBridgeId)`, bucketed to hour granularity (§4.5).
#[must_use]
pub fn network_fingerprint(
    active_peer_ids: &[NodeId],
    recent_announcements: &[String],
    local_bridge_id: &NodeId,
    now_ms: u64,
) -> String {
    let mut peer_ids: Vec<String> = active_peer_ids.iter().map(NodeId::to_hex).collect();
    peer_ids.sort();
    let mut announcements: Vec<String> = recent_announcements.to_vec();
    announcements.sort();

    let hour_bucket = now_ms / 3_600_000;

    let mut input = Vec::new();
    input.extend_from_slice(peer_ids.join(",").as_bytes());
    input.push(b'|');
    input.extend_from_slice(announcements.join(",").as_bytes());
    input.push(b'|');
    input.extend_from_slice(local_bridge_id.to_hex().as_bytes());
    input.push(b'|');
    input.extend_from_slice(hour_bucket.to_string().as_bytes());

    hex::encode(warden_crypto::hash::sha256(&input))
}
