//! Membership and invitation tokens for the wardenmesh overlay.
//!
//! `warden-membership` is the signature layer admission decisions are
//! built on: [`membership::MembershipToken`] proves a peer was admitted
//! (by a genesis issuer or a bridge-issued open-network root),
//! [`invitation::InvitationToken`] is the single-use credential a helper
//! hands a joining peer. Both are Ed25519-signed (`warden-crypto`); this
//! crate does not itself walk trust chains or run the onboarding
//! protocol — that lives in `warden-coordinator`, which consumes these
//! types.

pub mod invitation;
pub mod membership;

pub use invitation::{InvitationRegistry, InvitationToken, DEFAULT_INVITATION_TTL_MS};
pub use membership::MembershipToken;

use thiserror::Error;

/// Errors raised by membership and invitation handling (§7).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MembershipError {
    #[error("a valid membership token is required to join this network")]
    MembershipRequired,

    #[error("membership token signature or trust chain is invalid")]
    InvalidMembershipToken,

    #[error("invitation is expired, already consumed, or otherwise invalid")]
    InvitationExpiredOrInvalid,
}
