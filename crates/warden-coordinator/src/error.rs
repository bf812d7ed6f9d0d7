//! Error taxonomy for the onboarding and bootstrap/bridge layer.

use thiserror::Error;
use warden_dht::node_id::NodeId;
use warden_membership::MembershipError;

/// Errors raised by `BootstrapServer`, `BridgeNode`, and the per-peer
/// join state machine (§7).
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// A session presented credentials that did not match the pre-shared
    /// `bridgeAuthToken`, or a membership/invitation check failed during
    /// admission.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// Helper selection exhausted its candidate list without a helper
    /// acknowledging the onboarding directive. Retryable by the client
    /// after backoff.
    #[error("no qualified helper was available for onboarding")]
    NoHelperAvailable,

    /// The joining peer's protocol version or build did not match ours.
    #[error("protocol version mismatch during onboarding")]
    VersionMismatch,

    /// A peer's claimed nodeId did not derive from its public key.
    #[error("identity mismatch during onboarding")]
    IdentityMismatch,

    /// The overall join attempt exceeded its deadline.
    #[error("join attempt timed out")]
    JoinTimeout,

    /// A membership or invitation token failed verification.
    #[error("membership error: {0}")]
    Membership(#[from] MembershipError),

    /// No bridge was reachable to service a query.
    #[error("no bridge available for nodeId {0}")]
    NoBridgeAvailable(NodeId),
}
