//! Kademlia routing table.
//!
//! The routing table organizes peers by their XOR distance from the local
//! node into k-buckets, enabling O(log n) lookups. Distinct from the
//! original Kademlia paper, the overlay never fails an insert
//! destructively: a full bucket with all-live peers silently parks the
//! newcomer in a bounded replacement cache instead of rejecting it.

use crate::node_id::NodeId;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Kademlia k-bucket size (number of peers per bucket, and the size of
/// each bucket's replacement cache).
pub const K: usize = 20;

/// Number of buckets in the routing table — one per bit of the 160-bit
/// NodeId space.
pub const NUM_BUCKETS: usize = NodeId::BITS;

/// A peer is considered stale (eligible for eviction in favor of a
/// newcomer) once this long has passed without a response.
const PEER_STALE_THRESHOLD: Duration = Duration::from_secs(15 * 60);

/// Consecutive RPC failures after which a peer is marked `Stale`.
const FAILURE_THRESHOLD: u32 = 3;

/// The role a peer plays in the overlay.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum NodeType {
    /// A browser-hosted peer, identity bound to a public key.
    Browser,
    /// A long-running server peer.
    Server,
    /// A bridge: a passive observer ineligible to act as a join helper.
    Bridge,
}

/// Liveness state of a peer as tracked by the routing table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerState {
    /// Known but never successfully contacted.
    Unknown,
    /// An RPC is outstanding.
    Probing,
    /// Recently responded.
    Connected,
    /// `FAILURE_THRESHOLD` consecutive failures without a response.
    Stale,
    /// Removed from the routing table.
    Evicted,
}

/// Node-type-specific metadata, a closed tagged union rather than an
/// untyped bag of optional fields.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PeerMetadata {
    Browser {
        tab_visible: bool,
        #[serde(with = "idle_since_millis")]
        idle_since: Option<Duration>,
    },
    Server,
    Bridge,
}

/// Serializes `idle_since` as milliseconds-since-idle-began rather than a
/// wall-clock `Instant`, which has no stable wire representation.
mod idle_since_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(v: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let millis: Option<u64> = Option::deserialize(d)?;
        Ok(millis.map(Duration::from_millis))
    }
}

/// A peer known to the routing table.
///
/// Extends the original `DhtPeer` concept with the fields needed for
/// permissioned admission and helper selection: node type, advertised
/// capabilities, public key (browsers only), and tagged metadata.
#[derive(Clone, Debug)]
pub struct PeerRecord {
    /// 160-bit node identifier.
    pub id: NodeId,
    /// Network address.
    pub addr: SocketAddr,
    pub node_type: NodeType,
    pub capabilities: BTreeSet<String>,
    pub public_key: Option<[u8; 32]>,
    pub metadata: PeerMetadata,
    pub state: PeerState,
    /// Last time we received a response from this peer.
    pub last_seen: Instant,
    pub rtt: Option<Duration>,
    consecutive_failures: u32,
}

impl PeerRecord {
    #[must_use]
    pub fn new(id: NodeId, addr: SocketAddr, node_type: NodeType) -> Self {
        let metadata = match node_type {
            NodeType::Browser => PeerMetadata::Browser {
                tab_visible: true,
                idle_since: None,
            },
            NodeType::Server => PeerMetadata::Server,
            NodeType::Bridge => PeerMetadata::Bridge,
        };
        Self {
            id,
            addr,
            node_type,
            capabilities: BTreeSet::new(),
            public_key: None,
            metadata,
            state: PeerState::Unknown,
            last_seen: Instant::now(),
            rtt: None,
            consecutive_failures: 0,
        }
    }

    /// A peer is alive if it has not exceeded the staleness threshold and
    /// has not been marked `Stale` or `Evicted`.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        !matches!(self.state, PeerState::Stale | PeerState::Evicted)
            && self.last_seen.elapsed() < PEER_STALE_THRESHOLD
    }

    /// Whether this peer is past the staleness threshold and eligible to
    /// be evicted in favor of a newcomer.
    #[must_use]
    fn is_evictable(&self) -> bool {
        self.last_seen.elapsed() >= PEER_STALE_THRESHOLD || self.state == PeerState::Stale
    }

    /// Record a successful response: reset the failure counter and mark
    /// `Connected`.
    pub fn mark_seen(&mut self) {
        self.last_seen = Instant::now();
        self.consecutive_failures = 0;
        self.state = PeerState::Connected;
    }

    /// Record a failed RPC. After `FAILURE_THRESHOLD` consecutive
    /// failures the peer transitions to `Stale`.
    pub fn mark_failed(&mut self) {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= FAILURE_THRESHOLD {
            self.state = PeerState::Stale;
        }
    }

    pub fn update_rtt(&mut self, rtt: Duration) {
        self.rtt = Some(rtt);
    }

    /// Equivalent to [`mark_seen`](Self::mark_seen) without a state
    /// transition, used when merely refreshing position (e.g.
    /// replacement-cache updates).
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }
}

/// K-bucket storing peers at a specific XOR-distance range from the local
/// node, plus a bounded replacement cache for newcomers that arrive while
/// the bucket is full of live peers.
#[derive(Clone, Debug)]
pub struct KBucket {
    /// Live peers, ordered oldest (head) to newest (tail).
    peers: VecDeque<PeerRecord>,
    /// Newcomers parked while the bucket was full; promoted on `remove`.
    replacement_cache: VecDeque<PeerRecord>,
    capacity: usize,
    last_refreshed: Instant,
}

impl KBucket {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            peers: VecDeque::with_capacity(capacity),
            replacement_cache: VecDeque::with_capacity(capacity),
            capacity,
            last_refreshed: Instant::now(),
        }
    }

    /// Insert a peer into the bucket. Never fails destructively: a full
    /// bucket with an evictable head evicts it in favor of the newcomer;
    /// otherwise the newcomer is parked in the replacement cache.
    pub fn insert(&mut self, peer: PeerRecord) {
        if let Some(pos) = self.peers.iter().position(|p| p.id == peer.id) {
            let mut existing = self.peers.remove(pos).unwrap();
            existing.touch();
            if let Some(rtt) = peer.rtt {
                existing.update_rtt(rtt);
            }
            self.peers.push_back(existing);
            return;
        }

        if self.replacement_cache.iter().any(|p| p.id == peer.id) {
            self.replacement_cache.retain(|p| p.id != peer.id);
            self.replacement_cache.push_back(peer);
            return;
        }

        if self.peers.len() < self.capacity {
            self.peers.push_back(peer);
            return;
        }

        if self.peers.front().is_some_and(PeerRecord::is_evictable) {
            self.peers.pop_front();
            self.peers.push_back(peer);
            return;
        }

        if self.replacement_cache.len() >= self.capacity {
            self.replacement_cache.pop_front();
        }
        self.replacement_cache.push_back(peer);
    }

    /// Remove a peer, promoting a replacement-cache entry into its place
    /// if one is waiting.
    pub fn remove(&mut self, id: &NodeId) -> Option<PeerRecord> {
        let pos = self.peers.iter().position(|p| p.id == *id)?;
        let removed = self.peers.remove(pos);
        if let Some(promoted) = self.replacement_cache.pop_back() {
            self.peers.push_back(promoted);
        }
        removed
    }

    #[must_use]
    pub fn get(&self, id: &NodeId) -> Option<&PeerRecord> {
        self.peers.iter().find(|p| p.id == *id)
    }

    pub fn get_mut(&mut self, id: &NodeId) -> Option<&mut PeerRecord> {
        self.peers.iter_mut().find(|p| p.id == *id)
    }

    #[must_use]
    pub fn peers(&self) -> &VecDeque<PeerRecord> {
        &self.peers
    }

    #[must_use]
    pub fn closest_to(&self, target: &NodeId, count: usize) -> Vec<PeerRecord> {
        let mut peers: Vec<_> = self.peers.iter().cloned().collect();
        peers.sort_by_key(|p| p.id.distance(target));
        peers.into_iter().take(count).collect()
    }

    /// Remove peers that have exceeded the staleness threshold.
    pub fn prune(&mut self) {
        self.peers.retain(PeerRecord::is_alive);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn mark_refreshed(&mut self) {
        self.last_refreshed = Instant::now();
    }

    #[must_use]
    pub fn needs_refresh(&self, refresh_interval: Duration) -> bool {
        self.last_refreshed.elapsed() >= refresh_interval
    }
}

impl Default for KBucket {
    fn default() -> Self {
        Self::new(K)
    }
}

/// Kademlia routing table: 160 k-buckets, one per bit of the NodeId
/// space, plus a side index for O(1) lookup by id.
#[derive(Clone, Debug)]
pub struct RoutingTable {
    local_id: NodeId,
    buckets: Vec<KBucket>,
    index: HashMap<NodeId, usize>,
}

impl RoutingTable {
    #[must_use]
    pub fn new(local_id: NodeId) -> Self {
        let buckets = (0..NUM_BUCKETS).map(|_| KBucket::new(K)).collect();
        Self {
            local_id,
            buckets,
            index: HashMap::new(),
        }
    }

    #[must_use]
    pub const fn local_id(&self) -> &NodeId {
        &self.local_id
    }

    fn bucket_index(&self, peer_id: &NodeId) -> Option<usize> {
        peer_id.bucket_index(&self.local_id)
    }

    /// Insert a peer, routing it to the correct bucket by XOR distance.
    ///
    /// # Errors
    ///
    /// Returns [`DhtError::SelfInsert`] if `peer.id` equals the local id.
    /// Never fails for any other reason — a full bucket parks the
    /// newcomer in its replacement cache.
    pub fn insert(&mut self, peer: PeerRecord) -> Result<(), DhtError> {
        let bucket_idx = self.bucket_index(&peer.id).ok_or(DhtError::SelfInsert)?;
        self.index.insert(peer.id, bucket_idx);
        self.buckets[bucket_idx].insert(peer);
        Ok(())
    }

    /// Find up to `count` peers closest to `target`, ascending by XOR
    /// distance, drawn from all buckets.
    #[must_use]
    pub fn closest_peers(&self, target: &NodeId, count: usize) -> Vec<PeerRecord> {
        let mut all_peers = Vec::new();
        for bucket in &self.buckets {
            all_peers.extend(bucket.peers().iter().cloned());
        }
        all_peers.sort_by_key(|p| p.id.distance(target));
        all_peers.into_iter().take(count).collect()
    }

    #[must_use]
    pub fn get_peer(&self, id: &NodeId) -> Option<PeerRecord> {
        let bucket_idx = *self.index.get(id)?;
        self.buckets[bucket_idx].get(id).cloned()
    }

    /// Promote `id` to the tail of its bucket and reset its failure
    /// counter, recording a successful RPC response.
    ///
    /// # Errors
    ///
    /// Returns [`DhtError::PeerNotFound`] if `id` is not in the table.
    pub fn mark_seen(&mut self, id: &NodeId) -> Result<(), DhtError> {
        let bucket_idx = self.bucket_index(id).ok_or(DhtError::PeerNotFound)?;
        let bucket = &mut self.buckets[bucket_idx];
        let mut peer = bucket.remove(id).ok_or(DhtError::PeerNotFound)?;
        peer.mark_seen();
        bucket.insert(peer);
        Ok(())
    }

    /// Record a failed RPC to `id`.
    ///
    /// # Errors
    ///
    /// Returns [`DhtError::PeerNotFound`] if `id` is not in the table.
    pub fn mark_failed(&mut self, id: &NodeId) -> Result<(), DhtError> {
        let bucket_idx = self.bucket_index(id).ok_or(DhtError::PeerNotFound)?;
        self.buckets[bucket_idx]
            .get_mut(id)
            .ok_or(DhtError::PeerNotFound)?
            .mark_failed();
        Ok(())
    }

    /// Remove a peer from the routing table, promoting a replacement-cache
    /// entry if one is waiting.
    pub fn remove(&mut self, id: &NodeId) -> Option<PeerRecord> {
        let bucket_idx = self.bucket_index(id)?;
        self.index.remove(id);
        self.buckets[bucket_idx].remove(id)
    }

    #[must_use]
    pub fn all_peers(&self) -> Vec<PeerRecord> {
        let mut peers = Vec::new();
        for bucket in &self.buckets {
            peers.extend(bucket.peers().iter().cloned());
        }
        peers
    }

    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.buckets.iter().map(KBucket::len).sum()
    }

    /// Remove stale peers from all buckets.
    pub fn prune(&mut self) {
        for bucket in &mut self.buckets {
            bucket.prune();
        }
    }

    /// Buckets not refreshed within `refresh_interval` — each should be
    /// refreshed with a `find_node` for a random id in its range.
    #[must_use]
    pub fn buckets_needing_refresh(&self, refresh_interval: Duration) -> Vec<usize> {
        self.buckets
            .iter()
            .enumerate()
            .filter(|(_, bucket)| bucket.needs_refresh(refresh_interval))
            .map(|(idx, _)| idx)
            .collect()
    }

    pub fn mark_bucket_refreshed(&mut self, index: usize) {
        if let Some(bucket) = self.buckets.get_mut(index) {
            bucket.mark_refreshed();
        }
    }
}

/// Routing table errors.
#[derive(Debug, Error)]
pub enum DhtError {
    /// Attempted to insert the local node into its own routing table.
    #[error("cannot insert local node into routing table")]
    SelfInsert,

    /// Peer not found in routing table.
    #[error("peer not found")]
    PeerNotFound,
}
