//! `BootstrapServer`: the well-known entry point joining peers contact
//! first (§4.5). Holds no persistent connection to any bridge —
//! each bridge query is a fresh connect-auth-request-close round trip
//! authenticated with the pre-shared `bridgeAuthToken` — and keeps a
//! short-lived dedup cache so a retried request never produces two
//! different responses.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, warn};
use warden_crypto::signing::VerifyingKey;
use warden_dht::config::Config;
use warden_dht::messages::CompactPeer;
use warden_dht::node_id::NodeId;
use warden_membership::{
    InvitationRegistry, InvitationToken, MembershipError, MembershipToken, DEFAULT_INVITATION_TTL_MS,
};

use crate::bridge::OnboardingPeerResponse;
use crate::error::CoordinatorError;

/// What the open-network branch of `get_peers_or_genesis` needs from a
/// bridge to delegate helper selection and membership-token issuance
/// (§4.5 steps 1-8), without making `BootstrapServer` generic over a
/// concrete `BridgeNode<F, D>`. Implemented for `BridgeNode` in
/// `bridge.rs`.
#[async_trait]
pub trait OnboardingBridge: Send + Sync {
    async fn get_onboarding_peer(
        &self,
        new_node_id: NodeId,
        issued_at: u64,
    ) -> Result<OnboardingPeerResponse, CoordinatorError>;
}

/// What a joining peer presents to be admitted into a closed network.
#[derive(Debug, Clone)]
pub enum JoinCredential {
    /// The open-network branch, or a genesis claim — no credential
    /// needed.
    None,
    Membership(MembershipToken),
    Invitation(InvitationToken),
}

/// Response to `get_peers_or_genesis` (§6 wire table).
#[derive(Debug, Clone)]
pub struct GetPeersResponse {
    pub peers: Vec<CompactPeer>,
    pub is_genesis: bool,
    pub membership_token: Option<MembershipToken>,
    pub status: Option<String>,
}

/// The set of bridge nodeIds this bootstrap server is configured to
/// query, replacing what would otherwise be a global bridge registry
/// (§9 Design Notes: global singletons become explicit fields).
#[derive(Debug, Default)]
pub struct BridgeAuthRegistry {
    bridges: Vec<NodeId>,
}

impl BridgeAuthRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, bridge_id: NodeId) {
        if !self.bridges.contains(&bridge_id) {
            self.bridges.push(bridge_id);
        }
    }

    #[must_use]
    pub fn is_registered(&self, bridge_id: &NodeId) -> bool {
        self.bridges.contains(bridge_id)
    }

    #[must_use]
    pub fn bridges(&self) -> &[NodeId] {
        &self.bridges
    }
}

/// The well-known entry point for joining peers.
pub struct BootstrapServer {
    config: Config,
    bridge_registry: BridgeAuthRegistry,
    /// Whether the one-time genesis admission has already been claimed.
    genesis_claimed: bool,
    dedup: HashMap<(NodeId, u64), (Instant, GetPeersResponse)>,
    /// Single-use enforcement for presented invitations (§8:
    /// "invitation presented twice: second attempt fails").
    invitations: InvitationRegistry,
    /// The bridge the open-network branch delegates helper selection
    /// and token issuance to. `None` until configured with
    /// [`with_bridge`](Self::with_bridge).
    bridge: Option<Arc<dyn OnboardingBridge>>,
}

impl BootstrapServer {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            bridge_registry: BridgeAuthRegistry::new(),
            genesis_claimed: false,
            dedup: HashMap::new(),
            invitations: InvitationRegistry::new(),
            bridge: None,
        }
    }

    #[must_use]
    pub fn with_bridge(mut self, bridge: Arc<dyn OnboardingBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    #[must_use]
    pub fn bridge_registry(&self) -> &BridgeAuthRegistry {
        &self.bridge_registry
    }

    pub fn bridge_registry_mut(&mut self) -> &mut BridgeAuthRegistry {
        &mut self.bridge_registry
    }

    /// Verify a bridge query presented `token` matching our pre-shared
    /// `bridgeAuthToken` before treating any response from it as
    /// authoritative.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::AuthenticationFailed`] if `token`
    /// does not match.
    pub fn authenticate_bridge(&self, token: &str) -> Result<(), CoordinatorError> {
        if token == self.config.bridge_auth_token {
            Ok(())
        } else {
            Err(CoordinatorError::AuthenticationFailed)
        }
    }

    /// Handle `get_peers_or_genesis` (§6): genesis admission for
    /// the very first peer, unconditional admission for an open network,
    /// or membership/invitation verification for a closed one.
    ///
    /// Duplicate `(requesterId, requestId)` pairs within
    /// `dedup_retention` resolve to the first computed response, per
    /// §4.5's duplicate-suppression requirement.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Membership`] if a closed-network
    /// requester's credential is missing or fails verification, or
    /// [`CoordinatorError::NoBridgeAvailable`] if the open-network
    /// branch has no bridge configured to delegate to.
    pub async fn get_peers_or_genesis(
        &mut self,
        requester_id: NodeId,
        request_id: u64,
        credential: JoinCredential,
        starter_peers: Vec<CompactPeer>,
        trusted_issuers: &HashMap<NodeId, VerifyingKey>,
        now_ms: u64,
    ) -> Result<GetPeersResponse, CoordinatorError> {
        self.prune_dedup();

        if let Some((_, cached)) = self.dedup.get(&(requester_id, request_id)) {
            debug!(%requester_id, request_id, "returning deduped get_peers_or_genesis response");
            return Ok(cached.clone());
        }

        let response = self
            .compute_response(requester_id, credential, starter_peers, trusted_issuers, now_ms)
            .await?;
        self.dedup.insert((requester_id, request_id), (Instant::now(), response.clone()));
        Ok(response)
    }

    async fn compute_response(
        &mut self,
        requester_id: NodeId,
        credential: JoinCredential,
        starter_peers: Vec<CompactPeer>,
        trusted_issuers: &HashMap<NodeId, VerifyingKey>,
        now_ms: u64,
    ) -> Result<GetPeersResponse, CoordinatorError> {
        if self.config.create_new_dht && !self.genesis_claimed {
            self.genesis_claimed = true;
            debug!(%requester_id, "admitting genesis peer");
            return Ok(GetPeersResponse {
                peers: Vec::new(),
                is_genesis: true,
                membership_token: None,
                status: Some("genesis".to_string()),
            });
        }

        if self.config.open_network {
            let bridge = self
                .bridge
                .as_ref()
                .ok_or(CoordinatorError::NoBridgeAvailable(requester_id))?;
            let onboarding = bridge.get_onboarding_peer(requester_id, now_ms).await?;
            debug!(%requester_id, helper = %onboarding.helper_node_id, "open-network join delegated to bridge");
            return Ok(GetPeersResponse {
                peers: starter_peers,
                is_genesis: false,
                membership_token: Some(onboarding.membership_token),
                status: Some(onboarding.status),
            });
        }

        match credential {
            JoinCredential::None => {
                warn!(%requester_id, "closed-network join attempted without a credential");
                Err(MembershipError::MembershipRequired.into())
            }
            JoinCredential::Membership(token) => {
                let issuer_key = trusted_issuers
                    .get(&token.issuer_node_id)
                    .ok_or(MembershipError::InvalidMembershipToken)?;
                token.verify(issuer_key)?;
                Ok(GetPeersResponse {
                    peers: starter_peers,
                    is_genesis: false,
                    membership_token: Some(token),
                    status: Some("reconnected".to_string()),
                })
            }
            JoinCredential::Invitation(token) => {
                let inviter_key = trusted_issuers
                    .get(&token.inviter_node_id)
                    .ok_or(MembershipError::InvitationExpiredOrInvalid)?;
                self.invitations.accept(&token, &requester_id, inviter_key, now_ms, DEFAULT_INVITATION_TTL_MS)?;
                Ok(GetPeersResponse {
                    peers: starter_peers,
                    is_genesis: false,
                    membership_token: None,
                    status: Some("invitation_accepted".to_string()),
                })
            }
        }
    }

    fn prune_dedup(&mut self) {
        let retention: Duration = self.config.dedup_retention;
        self.dedup.retain(|_, (responded_at, _)| responded_at.elapsed() <= retention);
    }

    /// Drop invitation-consumption records older than `config.dedup_retention`,
    /// bounding the registry the same way `prune_dedup` bounds the
    /// `get_peers_or_genesis` cache. Intended to be called from the same
    /// periodic maintenance timer as `DhtEngine::refresh_stale_buckets`.
    pub fn prune_invitations(&mut self, now_ms: u64) {
        self.invitations.prune(now_ms, self.config.dedup_retention.as_millis() as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;
    use std::net::SocketAddr;
    use warden_crypto::signing::SigningKey;

    fn addr() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    /// A fixed bridge that always hands out an open-network token
    /// authorized by a freshly made-up helper, without running real
    /// helper selection — enough to exercise `BootstrapServer`'s
    /// delegation wiring independent of `BridgeNode`'s own tests.
    struct StubBridge {
        bridge_id: NodeId,
        signing_key: SigningKey,
    }

    #[async_trait]
    impl OnboardingBridge for StubBridge {
        async fn get_onboarding_peer(
            &self,
            new_node_id: NodeId,
            issued_at: u64,
        ) -> Result<OnboardingPeerResponse, CoordinatorError> {
            let helper_node_id = NodeId::random();
            let membership_token = MembershipToken::issue(
                new_node_id,
                self.bridge_id,
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
    }

    fn stub_bridge() -> Arc<dyn OnboardingBridge> {
        Arc::new(StubBridge { bridge_id: NodeId::random(), signing_key: SigningKey::generate(&mut OsRng) })
    }

    #[tokio::test]
    async fn test_genesis_claimed_once() {
        let config = Config::new("secret").with_create_new_dht(true);
        let mut server = BootstrapServer::new(config);
        let issuer_key = SigningKey::generate(&mut OsRng);
        let issuer_id = NodeId::random();
        let mut trusted = HashMap::new();
        trusted.insert(issuer_id, issuer_key.verifying_key());

        let first = server
            .get_peers_or_genesis(NodeId::random(), 1, JoinCredential::None, vec![], &trusted, 0)
            .await
            .unwrap();
        assert!(first.is_genesis);

        let requester = NodeId::random();
        let token = MembershipToken::issue(requester, issuer_id, 0, false, false, None, &issuer_key);
        let second = server
            .get_peers_or_genesis(requester, 2, JoinCredential::Membership(token), vec![], &trusted, 0)
            .await
            .unwrap();
        assert!(!second.is_genesis);
    }

    #[tokio::test]
    async fn test_open_network_admits_without_credential() {
        let config = Config::new("secret").with_open_network(true);
        let mut server = BootstrapServer::new(config).with_bridge(stub_bridge());
        let trusted = HashMap::new();
        let starter = vec![CompactPeer { id: NodeId::random(), addr: addr() }];

        let response = server
            .get_peers_or_genesis(NodeId::random(), 1, JoinCredential::None, starter.clone(), &trusted, 0)
            .await
            .unwrap();
        assert_eq!(response.peers.len(), 1);
        let token = response.membership_token.expect("bridge-issued token");
        assert!(token.is_open_network);
        assert!(token.authorized_by.is_some());
    }

    #[tokio::test]
    async fn test_open_network_without_bridge_errors() {
        let config = Config::new("secret").with_open_network(true);
        let mut server = BootstrapServer::new(config);
        let trusted = HashMap::new();

        let result = server
            .get_peers_or_genesis(NodeId::random(), 1, JoinCredential::None, vec![], &trusted, 0)
            .await;
        assert!(matches!(result, Err(CoordinatorError::NoBridgeAvailable(_))));
    }

    #[tokio::test]
    async fn test_closed_network_requires_credential() {
        let config = Config::new("secret");
        let mut server = BootstrapServer::new(config);
        let trusted = HashMap::new();

        let result = server
            .get_peers_or_genesis(NodeId::random(), 1, JoinCredential::None, vec![], &trusted, 0)
            .await;
        assert!(matches!(
            result,
            Err(CoordinatorError::Membership(MembershipError::MembershipRequired))
        ));
    }

    #[tokio::test]
    async fn test_closed_network_accepts_valid_membership_token() {
        let config = Config::new("secret");
        let mut server = BootstrapServer::new(config);

        let issuer_key = SigningKey::generate(&mut OsRng);
        let issuer_id = NodeId::random();
        let requester = NodeId::random();
        let mut trusted = HashMap::new();
        trusted.insert(issuer_id, issuer_key.verifying_key());

        let token = MembershipToken::issue(requester, issuer_id, 0, false, false, None, &issuer_key);
        let result = server
            .get_peers_or_genesis(requester, 1, JoinCredential::Membership(token), vec![], &trusted, 0)
            .await
            .unwrap();
        assert!(result.membership_token.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_request_id_returns_cached_response() {
        let config = Config::new("secret").with_create_new_dht(true);
        let mut server = BootstrapServer::new(config);
        let trusted = HashMap::new();
        let requester = NodeId::random();

        let first = server
            .get_peers_or_genesis(requester, 7, JoinCredential::None, vec![], &trusted, 0)
            .await
            .unwrap();
        let second = server
            .get_peers_or_genesis(requester, 7, JoinCredential::None, vec![], &trusted, 0)
            .await
            .unwrap();
        assert_eq!(first.is_genesis, second.is_genesis);
        assert!(first.is_genesis, "first response should be genesis, not a later non-genesis one");
    }

    #[test]
    fn test_authenticate_bridge() {
        let server = BootstrapServer::new(Config::new("shared-secret"));
        assert!(server.authenticate_bridge("shared-secret").is_ok());
        assert!(matches!(
            server.authenticate_bridge("wrong"),
            Err(CoordinatorError::AuthenticationFailed)
        ));
    }

    #[tokio::test]
    async fn test_closed_network_rejects_replayed_invitation() {
        let config = Config::new("secret");
        let mut server = BootstrapServer::new(config);

        let inviter_key = SigningKey::generate(&mut OsRng);
        let inviter_id = NodeId::random();
        let requester = NodeId::random();
        let mut trusted = HashMap::new();
        trusted.insert(inviter_id, inviter_key.verifying_key());

        let token = InvitationToken::issue(requester, inviter_id, 0, 7, &inviter_key);

        let first = server
            .get_peers_or_genesis(requester, 1, JoinCredential::Invitation(token.clone()), vec![], &trusted, 0)
            .await;
        assert!(first.is_ok());

        let second = server
            .get_peers_or_genesis(requester, 2, JoinCredential::Invitation(token), vec![], &trusted, 0)
            .await;
        assert!(matches!(
            second,
            Err(CoordinatorError::Membership(MembershipError::InvitationExpiredOrInvalid))
        ));
    }

    #[test]
    fn test_bridge_registry_register_and_check() {
        let mut registry = BridgeAuthRegistry::new();
        let bridge = NodeId::random();
        assert!(!registry.is_registered(&bridge));
        registry.register(bridge);
        assert!(registry.is_registered(&bridge));
    }
}
