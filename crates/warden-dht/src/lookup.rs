//! Iterative lookup shortlist bookkeeping.
//!
//! Implements the iterative `find_node`/`find_value` procedure of §4.4.2:
//! seed a shortlist from the local routing table, fan out α RPCs at a
//! time to the closest unqueried candidates, and converge when α
//! consecutive rounds fail to improve on the best k seen so far.

use crate::node_id::NodeId;
use crate::routing::PeerRecord;
use std::collections::HashSet;
use thiserror::Error;

/// Default lookup concurrency, per spec §4.4.2.
pub const ALPHA: usize = 3;

/// Errors from a `DhtEngine` lookup or store operation.
#[derive(Debug, Error)]
pub enum OperationError {
    /// The outer lookup deadline elapsed.
    #[error("lookup timed out")]
    Timeout,

    /// The local routing table had no peers to seed the lookup with.
    #[error("no peers available to start lookup")]
    NoPeersAvailable,

    /// A peer rejected or could not service the operation.
    #[error("lookup failed: {0}")]
    LookupFailed(String),
}

/// Tracks the candidate set for one iterative lookup: the k closest
/// known peers to `target`, which peers have already been queried, and
/// how many consecutive rounds failed to surface a closer peer.
#[derive(Debug)]
pub struct Shortlist {
    target: NodeId,
    k: usize,
    entries: Vec<PeerRecord>,
    queried: HashSet<NodeId>,
    stale_rounds: usize,
}

impl Shortlist {
    #[must_use]
    pub fn new(target: NodeId, k: usize, seed: Vec<PeerRecord>) -> Self {
        let mut shortlist = Self {
            target,
            k,
            entries: Vec::new(),
            queried: HashSet::new(),
            stale_rounds: 0,
        };
        shortlist.insert_candidates(seed);
        shortlist
    }

    /// Merge newly learned peers into the shortlist, deduped by id and
    /// trimmed to the k closest, tracking whether this round improved the
    /// best-known result.
    pub fn insert_candidates(&mut self, candidates: Vec<PeerRecord>) {
        let best_before = self.entries.first().map(|p| p.id.distance(&self.target));

        for candidate in candidates {
            if candidate.id == self.target {
                continue;
            }
            if let Some(existing) = self.entries.iter().position(|p| p.id == candidate.id) {
                self.entries[existing] = candidate;
            } else {
                self.entries.push(candidate);
            }
        }
        self.entries.sort_by(|a, b| {
            a.id.distance(&self.target)
                .cmp(&b.id.distance(&self.target))
                .then_with(|| a.id.cmp(&b.id))
        });
        self.entries.truncate(self.k);

        let best_after = self.entries.first().map(|p| p.id.distance(&self.target));
        if best_after.is_some() && best_after == best_before {
            self.stale_rounds += 1;
        } else {
            self.stale_rounds = 0;
        }
    }

    pub fn mark_queried(&mut self, id: &NodeId) {
        self.queried.insert(*id);
    }

    /// Up to `alpha` unqueried candidates, closest first.
    #[must_use]
    pub fn next_batch(&self, alpha: usize) -> Vec<PeerRecord> {
        self.entries
            .iter()
            .filter(|p| !self.queried.contains(&p.id))
            .take(alpha)
            .cloned()
            .collect()
    }

    /// The lookup converges once `alpha` consecutive rounds failed to
    /// improve the closest known peer, or there is nothing left to query.
    #[must_use]
    pub fn has_converged(&self, alpha: usize) -> bool {
        self.stale_rounds >= alpha || self.next_batch(alpha).is_empty()
    }

    #[must_use]
    pub fn results(&self) -> Vec<PeerRecord> {
        self.entries.clone()
    }

    #[must_use]
    pub fn closest(&self) -> Option<&PeerRecord> {
        self.entries.first()
    }
}
