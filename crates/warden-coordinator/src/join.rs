//! The joining peer's state machine (§4.5, invitee perspective):
//! `Start → ContactingBootstrap → Challenged → ChallengeAnswered →
//! AwaitingHelperAssignment → InvitationReceived → DHTJoined → Ready`.
//!
//! This type only tracks the sequence — the actual network calls
//! (bootstrap request, challenge exchange, `find_node(self)`, and so on)
//! are made by whatever drives the join (e.g. a `warden-connection`
//! session paired with a `warden-dht` engine); this crate exists so that
//! driver can assert it never skips or re-enters a step, and so the
//! terminal-failure status is a single, coordinator-agreed shape.

use tracing::{debug, warn};

use crate::error::CoordinatorError;

/// Non-terminal steps of the join sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinStep {
    Start,
    ContactingBootstrap,
    Challenged,
    ChallengeAnswered,
    AwaitingHelperAssignment,
    InvitationReceived,
    DhtJoined,
    Ready,
}

/// Terminal failure reasons (§4.5), surfaced to the joining
/// client with an actionable status field per §7's propagation
/// rule for onboarding failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinFailure {
    VersionMismatch,
    IdentityMismatch,
    NoHelperAvailable,
    InvitationExpired,
    JoinTimeout,
}

impl From<JoinFailure> for CoordinatorError {
    fn from(failure: JoinFailure) -> Self {
        match failure {
            JoinFailure::VersionMismatch => Self::VersionMismatch,
            JoinFailure::IdentityMismatch => Self::IdentityMismatch,
            JoinFailure::NoHelperAvailable => Self::NoHelperAvailable,
            JoinFailure::InvitationExpired => Self::Membership(
                warden_membership::MembershipError::InvitationExpiredOrInvalid,
            ),
            JoinFailure::JoinTimeout => Self::JoinTimeout,
        }
    }
}

/// Current status of a join attempt: still progressing, or terminally
/// resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinStatus {
    InProgress(JoinStep),
    Failed(JoinFailure),
}

/// The ordered sequence a join attempt must follow. `advance` rejects
/// any step that is not the immediate successor of the current one.
#[derive(Debug)]
pub struct JoinSession {
    status: JoinStatus,
}

impl JoinSession {
    #[must_use]
    pub fn new() -> Self {
        Self { status: JoinStatus::InProgress(JoinStep::Start) }
    }

    #[must_use]
    pub fn status(&self) -> JoinStatus {
        self.status
    }

    /// Advance to `next`, which must be the immediate successor of the
    /// current step.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::JoinTimeout`]'s sibling — in practice
    /// this always indicates a driver bug, not a network condition, so
    /// callers typically `expect` it; it returns a `Result` rather than
    /// panicking because a malformed remote response could otherwise be
    /// turned into a local panic.
    pub fn advance(&mut self, next: JoinStep) -> Result<(), CoordinatorError> {
        let JoinStatus::InProgress(current) = self.status else {
            return Err(CoordinatorError::JoinTimeout);
        };
        if next != current.successor() {
            warn!(?current, ?next, "join session attempted out-of-order transition");
            return Err(CoordinatorError::JoinTimeout);
        }
        debug!(?current, ?next, "join session advanced");
        self.status = JoinStatus::InProgress(next);
        Ok(())
    }

    pub fn fail(&mut self, failure: JoinFailure) {
        warn!(?failure, "join session terminated");
        self.status = JoinStatus::Failed(failure);
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self.status, JoinStatus::InProgress(JoinStep::Ready))
    }
}

impl Default for JoinSession {
    fn default() -> Self {
        Self::new()
    }
}

impl JoinStep {
    #[must_use]
    fn successor(self) -> Self {
        match self {
            Self::Start => Self::ContactingBootstrap,
            Self::ContactingBootstrap => Self::Challenged,
            Self::Challenged => Self::ChallengeAnswered,
            Self::ChallengeAnswered => Self::AwaitingHelperAssignment,
            Self::AwaitingHelperAssignment => Self::InvitationReceived,
            Self::InvitationReceived => Self::DhtJoined,
            Self::DhtJoined | Self::Ready => Self::Ready,
        }
    }
}
