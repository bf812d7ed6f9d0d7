//! Onboarding helper selection (§4.5, "the heart of onboarding"):
//! given the peers a bridge's `find_node(random)` turns up, filter to the
//! qualified candidates, score them, and dispatch the `create_invitation_for_peer`
//! directive to the top few until one acknowledges.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};
use warden_dht::node_id::NodeId;
use warden_dht::routing::NodeType;

use crate::error::CoordinatorError;

/// Minimum uptime a non-bridge peer must have to be eligible as a helper
/// (§4.5 step 4).
const MIN_HELPER_UPTIME: Duration = Duration::from_secs(30);

/// A candidate surfaced by the bridge's onboarding `find_node(random)`,
/// already reduced to the fields the filter and scoring steps need.
#[derive(Debug, Clone)]
pub struct HelperCandidate {
    pub id: NodeId,
    pub node_type: NodeType,
    pub uptime: Duration,
    pub rtt: Option<Duration>,
    /// Only meaningful for `NodeType::Browser`.
    pub tab_visible: bool,
    /// Whether this candidate currently holds a live session to the
    /// bridge running selection (step 3: peers not connected to this
    /// bridge are dropped before scoring).
    pub connected_to_bridge: bool,
}

impl HelperCandidate {
    fn is_disqualified(&self) -> bool {
        if self.node_type == NodeType::Bridge {
            return true;
        }
        if !self.connected_to_bridge {
            return true;
        }
        if self.node_type == NodeType::Browser && !self.tab_visible {
            return true;
        }
        if self.uptime < MIN_HELPER_UPTIME {
            return true;
        }
        false
    }

    /// `score = min(uptimeMinutes, 60) - min(rttMs/100, 50) + (nodeType==server ? 5 : 0)`.
    /// Higher is better.
    #[must_use]
    pub fn score(&self) -> i64 {
        let uptime_minutes = (self.uptime.as_secs() / 60).min(60) as i64;
        let rtt_penalty = self
            .rtt
            .map(|rtt| (rtt.as_millis() as i64 / 100).min(50))
            .unwrap_or(0);
        let server_bonus = if self.node_type == NodeType::Server { 5 } else { 0 };
        uptime_minutes - rtt_penalty + server_bonus
    }
}

/// Filter out disqualified candidates, drop `self_id` (the bridge never
/// selects itself), score the rest, and return the top `n` by score
/// descending (ties broken by nodeId per the corpus's general lexicographic
/// tie-break convention).
#[must_use]
pub fn select_candidates(
    candidates: Vec<HelperCandidate>,
    self_id: &NodeId,
    n: usize,
) -> Vec<HelperCandidate> {
    let mut qualified: Vec<HelperCandidate> = candidates
        .into_iter()
        .filter(|c| &c.id != self_id && !c.is_disqualified())
        .collect();

    qualified.sort_by(|a, b| b.score().cmp(&a.score()).then_with(|| a.id.cmp(&b.id)));
    qualified.truncate(n);
    qualified
}

/// What a bridge does to ask one candidate to become the onboarding
/// helper: send `create_invitation_for_peer` over DHT signaling and wait
/// for acknowledgement. Abstracted so the selection loop below is
/// testable without a live overlay.
#[async_trait]
pub trait HelperDispatch: Send + Sync {
    async fn dispatch(&self, candidate: &NodeId) -> Result<bool, CoordinatorError>;
}

/// Try `candidates` sequentially, each with its own `per_candidate_deadline`,
/// returning the first one that acknowledges (§4.5 step 6).
///
/// # Errors
///
/// Returns [`CoordinatorError::NoHelperAvailable`] if every candidate
/// times out or declines.
pub async fn dispatch_to_first_ack<D: HelperDispatch>(
    dispatcher: &D,
    candidates: &[HelperCandidate],
    per_candidate_deadline: Duration,
) -> Result<NodeId, CoordinatorError> {
    for candidate in candidates {
        debug!(candidate = %candidate.id, score = candidate.score(), "dispatching onboarding directive");
        match timeout(per_candidate_deadline, dispatcher.dispatch(&candidate.id)).await {
            Ok(Ok(true)) => return Ok(candidate.id),
            Ok(Ok(false)) => {
                warn!(candidate = %candidate.id, "helper declined onboarding directive");
            }
            Ok(Err(err)) => {
                warn!(candidate = %candidate.id, error = %err, "helper dispatch failed");
            }
            Err(_) => {
                warn!(candidate = %candidate.id, "helper dispatch timed out");
            }
        }
    }
    Err(CoordinatorError::NoHelperAvailable)
}
