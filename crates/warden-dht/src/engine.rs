//! `DhtEngine`: Kademlia RPC dispatch, iterative lookups, republication,
//! and overlay signal routing (spec §4.4).
//!
//! `DhtEngine` owns the `RoutingTable` and local `Storage`; the set of
//! live `ConnectionManager`s is represented only through the [`PeerSink`]
//! capability, so this crate never depends on a concrete transport —
//! mirroring the arena-indexed handle pattern of the Design Notes
//! (peers are referenced by `NodeId`, looked up rather than owned).

use crate::config::Config;
use crate::lookup::{OperationError, Shortlist};
use crate::messages::{
    CompactPeer, DhtMessage, FindNodeRequest, FindValueRequest, FoundNodesResponse,
    FoundValueResponse, PingRequest, PongResponse, RequestIdGenerator, SignalMessage,
    StoreAckResponse, StoreRequest,
};
use crate::node_id::NodeId;
use crate::routing::{DhtError, NodeType, PeerRecord, RoutingTable};
use crate::signaling::{route_signal, SignalAction};
use crate::storage::Storage;
use async_trait::async_trait;
use warden_crypto::hash::derive_dht_key;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

/// Capability an engine needs to actually reach a peer. Implemented by
/// whatever owns the live `ConnectionManager`s (see `warden-connection`);
/// this crate is agnostic to the concrete transport.
#[async_trait]
pub trait PeerSink: Send + Sync {
    async fn send(&self, peer: NodeId, message: DhtMessage) -> Result<(), EngineError>;
}

/// Capability gating whether an inbound `store` RPC's sender is a valid
/// member, mirroring [`PeerSink`]: whoever owns membership state
/// implements it (see `warden-coordinator`), and this crate stays
/// agnostic to how membership is established.
#[async_trait]
pub trait StoreGate: Send + Sync {
    async fn is_member(&self, peer: NodeId) -> bool;
}

/// Default gate for an engine constructed with [`DhtEngine::new`]:
/// admits every peer, leaving membership enforcement to whatever layer
/// is composed above the engine.
pub struct PermissiveStoreGate;

#[async_trait]
impl StoreGate for PermissiveStoreGate {
    async fn is_member(&self, _peer: NodeId) -> bool {
        true
    }
}

/// Errors raised by `DhtEngine` operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("routing table error: {0}")]
    Routing(#[from] DhtError),

    #[error(transparent)]
    Operation(#[from] OperationError),

    #[error("peer {0} is not reachable")]
    Unreachable(NodeId),

    #[error("request timed out")]
    Timeout,

    #[error("unexpected response for this request")]
    UnexpectedResponse,
}

/// A `{ requestId, targetPeer, kind, deadline, resolve }` record, held in
/// `DhtEngine`'s own pending-request map (spec §3).
struct PendingRequest {
    target: NodeId,
    resolve: oneshot::Sender<DhtMessage>,
}

/// Kademlia protocol engine: owns the routing table and local storage,
/// dispatches RPCs, and runs iterative lookups and overlay signaling.
pub struct DhtEngine<S: PeerSink, G: StoreGate = PermissiveStoreGate> {
    local_id: NodeId,
    local_addr: SocketAddr,
    config: Config,
    routing_table: Mutex<RoutingTable>,
    storage: Mutex<Storage>,
    pending: Mutex<HashMap<u64, PendingRequest>>,
    request_ids: RequestIdGenerator,
    sink: Arc<S>,
    gate: Arc<G>,
}

impl<S: PeerSink> DhtEngine<S, PermissiveStoreGate> {
    /// Construct an engine with no membership gate on inbound `store`
    /// RPCs; use [`DhtEngine::with_store_gate`] to enforce one.
    #[must_use]
    pub fn new(local_id: NodeId, local_addr: SocketAddr, config: Config, sink: Arc<S>) -> Self {
        Self::with_store_gate(local_id, local_addr, config, sink, Arc::new(PermissiveStoreGate))
    }
}

impl<S: PeerSink, G: StoreGate> DhtEngine<S, G> {
    #[must_use]
    pub fn with_store_gate(
        local_id: NodeId,
        local_addr: SocketAddr,
        config: Config,
        sink: Arc<S>,
        gate: Arc<G>,
    ) -> Self {
        Self {
            local_id,
            local_addr,
            config,
            routing_table: Mutex::new(RoutingTable::new(local_id)),
            storage: Mutex::new(Storage::new()),
            pending: Mutex::new(HashMap::new()),
            request_ids: RequestIdGenerator::new(),
            sink,
            gate,
        }
    }

    #[must_use]
    pub const fn local_id(&self) -> &NodeId {
        &self.local_id
    }

    pub async fn peer_count(&self) -> usize {
        self.routing_table.lock().await.peer_count()
    }

    /// Insert a peer learned from some external source (e.g. a
    /// `ConnectionManager` handshake) into the routing table.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Routing`] only for [`DhtError::SelfInsert`];
    /// a full bucket never fails (spec §4.2).
    pub async fn learn_peer(&self, peer: PeerRecord) -> Result<(), EngineError> {
        self.routing_table.lock().await.insert(peer)?;
        Ok(())
    }

    /// Dispatch an inbound message: either resolve a pending request (for
    /// responses) or handle an inbound RPC request and reply via the
    /// sink.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Unreachable`] if a reply could not be sent.
    pub async fn handle_message(&self, from: NodeId, message: DhtMessage) -> Result<(), EngineError> {
        if let Some(sender_id) = message.sender_id() {
            let _ = self.routing_table.lock().await.mark_seen(&sender_id);
        }

        match message {
            DhtMessage::Pong(_) | DhtMessage::FoundNodes(_) | DhtMessage::StoreAck(_)
            | DhtMessage::FoundValue(_) => {
                self.resolve_pending(message).await;
                Ok(())
            }
            DhtMessage::Ping(req) => self.handle_ping(from, req).await,
            DhtMessage::FindNode(req) => self.handle_find_node(from, req).await,
            DhtMessage::Store(req) => self.handle_store(from, req).await,
            DhtMessage::FindValue(req) => self.handle_find_value(from, req).await,
            DhtMessage::Signal(msg) => self.handle_signal(msg).await,
        }
    }

    async fn resolve_pending(&self, message: DhtMessage) {
        let request_id = message.request_id();
        let pending = self.pending.lock().await.remove(&request_id);
        if let Some(pending) = pending {
            let _ = pending.resolve.send(message);
        } else {
            trace!(request_id, "late or unrecognized response dropped");
        }
    }

    async fn handle_ping(&self, from: NodeId, req: PingRequest) -> Result<(), EngineError> {
        let reply = DhtMessage::Pong(PongResponse {
            request_id: req.request_id,
            sender_id: self.local_id,
            ok: true,
        });
        self.sink.send(from, reply).await
    }

    async fn handle_find_node(&self, from: NodeId, req: FindNodeRequest) -> Result<(), EngineError> {
        let peers = self
            .routing_table
            .lock()
            .await
            .closest_peers(&req.target_id, self.config.k)
            .into_iter()
            .map(|p| CompactPeer { id: p.id, addr: p.addr })
            .collect();

        let reply = DhtMessage::FoundNodes(FoundNodesResponse {
            request_id: req.request_id,
            sender_id: self.local_id,
            peers,
        });
        self.sink.send(from, reply).await
    }

    /// Accept iff `from` passes the store gate and the request's size
    /// and TTL are within configured bounds (spec §4.4.1); otherwise
    /// reply with a negative ack rather than persisting anything.
    async fn handle_store(&self, from: NodeId, req: StoreRequest) -> Result<(), EngineError> {
        let within_bounds = req.value.len() <= self.config.max_value_size
            && req.ttl <= self.config.value_expire.as_secs();
        let accepted = within_bounds && self.gate.is_member(from).await;

        if accepted {
            self.storage.lock().await.put(
                req.key,
                req.value,
                std::time::Duration::from_secs(req.ttl),
                req.sender_id,
            );
        } else {
            warn!(peer = %from, within_bounds, "rejecting store request");
        }

        let reply = DhtMessage::StoreAck(StoreAckResponse {
            request_id: req.request_id,
            sender_id: self.local_id,
            ok: accepted,
        });
        self.sink.send(from, reply).await
    }

    async fn handle_find_value(&self, from: NodeId, req: FindValueRequest) -> Result<(), EngineError> {
        let stored = self.storage.lock().await.get(&req.key);
        let reply = match stored {
            Some(value) => FoundValueResponse::Value {
                request_id: req.request_id,
                sender_id: self.local_id,
                value,
            },
            None => {
                let peers = self
                    .routing_table
                    .lock()
                    .await
                    .closest_peers(&NodeId::from_bytes(req.key), self.config.k)
                    .into_iter()
                    .map(|p| CompactPeer { id: p.id, addr: p.addr })
                    .collect();
                FoundValueResponse::Peers {
                    request_id: req.request_id,
                    sender_id: self.local_id,
                    peers,
                }
            }
        };
        self.sink.send(from, DhtMessage::FoundValue(reply)).await
    }

    async fn handle_signal(&self, message: SignalMessage) -> Result<(), EngineError> {
        let routing_table = self.routing_table.lock().await;
        match route_signal(&self.local_id, &routing_table, message, self.config.max_signal_hops) {
            SignalAction::Deliver => {
                debug!("signal delivered locally");
                Ok(())
            }
            SignalAction::Forward { next_hop, message } => {
                drop(routing_table);
                self.sink.send(next_hop, DhtMessage::Signal(message)).await
            }
            SignalAction::Drop(reason) => {
                warn!(?reason, "dropping overlay signal");
                Ok(())
            }
        }
    }

    /// Send an RPC and await its correlated response, subject to the
    /// per-RPC deadline (spec §5).
    async fn call(&self, peer: NodeId, request: DhtMessage) -> Result<DhtMessage, EngineError> {
        let request_id = request.request_id();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(
            request_id,
            PendingRequest { target: peer, resolve: tx },
        );

        if let Err(err) = self.sink.send(peer, request).await {
            self.pending.lock().await.remove(&request_id);
            let _ = self.routing_table.lock().await.mark_failed(&peer);
            return Err(err);
        }

        match timeout(self.config.request_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            _ => {
                self.pending.lock().await.remove(&request_id);
                let _ = self.routing_table.lock().await.mark_failed(&peer);
                Err(EngineError::Timeout)
            }
        }
    }

    /// Ping a peer, updating its `lastSeen` on success.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Timeout`] if the peer does not respond
    /// within `request_timeout`.
    pub async fn ping(&self, peer: NodeId) -> Result<(), EngineError> {
        let request_id = self.request_ids.next();
        let request = DhtMessage::Ping(PingRequest {
            request_id,
            sender_id: self.local_id,
            sender_addr: self.local_addr,
        });
        match self.call(peer, request).await? {
            DhtMessage::Pong(_) => Ok(()),
            _ => Err(EngineError::UnexpectedResponse),
        }
    }

    async fn find_node_rpc(&self, peer: NodeId, target: NodeId) -> Result<Vec<PeerRecord>, EngineError> {
        let request_id = self.request_ids.next();
        let request = DhtMessage::FindNode(FindNodeRequest {
            request_id,
            sender_id: self.local_id,
            sender_addr: self.local_addr,
            target_id: target,
        });
        match self.call(peer, request).await? {
            DhtMessage::FoundNodes(resp) => Ok(resp
                .peers
                .into_iter()
                .map(|p| PeerRecord::new(p.id, p.addr, NodeType::Server))
                .collect()),
            _ => Err(EngineError::UnexpectedResponse),
        }
    }

    /// Iterative `find_node` (spec §4.4.2): returns up to `k` peers
    /// closest to `target`.
    ///
    /// # Errors
    ///
    /// Returns [`OperationError::NoPeersAvailable`] if the local routing
    /// table is empty, or [`OperationError::Timeout`] if the outer
    /// lookup deadline elapses first.
    pub async fn find_node(&self, target: NodeId) -> Result<Vec<PeerRecord>, EngineError> {
        let seed = self.routing_table.lock().await.closest_peers(&target, self.config.k);
        if seed.is_empty() {
            return Err(OperationError::NoPeersAvailable.into());
        }

        let lookup = self.run_lookup(target, seed);
        match timeout(self.config.lookup_timeout, lookup).await {
            Ok(result) => result,
            Err(_) => Err(OperationError::Timeout.into()),
        }
    }

    async fn run_lookup(&self, target: NodeId, seed: Vec<PeerRecord>) -> Result<Vec<PeerRecord>, EngineError> {
        let alpha = self.config.alpha.max(1);
        let mut shortlist = Shortlist::new(target, self.config.k, seed);

        while !shortlist.has_converged(alpha) {
            let batch = shortlist.next_batch(alpha);
            if batch.is_empty() {
                break;
            }

            let mut handles = Vec::with_capacity(batch.len());
            for candidate in &batch {
                shortlist.mark_queried(&candidate.id);
                handles.push(self.find_node_rpc(candidate.id, target));
            }

            let results = futures_join_all(handles).await;
            let mut learned = Vec::new();
            for result in results {
                if let Ok(peers) = result {
                    learned.extend(peers);
                }
            }
            shortlist.insert_candidates(learned);
        }

        Ok(shortlist.results())
    }

    /// Iterative `find_value`: returns the value if found anywhere along
    /// the lookup path, performing a write-back `store` to the closest
    /// peer that did not have it (spec §4.4.2 step 4).
    ///
    /// # Errors
    ///
    /// Returns [`OperationError::NoPeersAvailable`] or
    /// [`OperationError::Timeout`] per [`find_node`](Self::find_node).
    pub async fn find_value(&self, key: [u8; 20]) -> Result<FindValueOutcome, EngineError> {
        let target = NodeId::from_bytes(key);
        if let Some(value) = self.storage.lock().await.get(&key) {
            return Ok(FindValueOutcome::Value(value));
        }

        let seed = self.routing_table.lock().await.closest_peers(&target, self.config.k);
        if seed.is_empty() {
            return Err(OperationError::NoPeersAvailable.into());
        }

        let alpha = self.config.alpha.max(1);
        let mut shortlist = Shortlist::new(target, self.config.k, seed);
        let mut closest_without_value: Option<NodeId> = None;

        let outcome = loop {
            if shortlist.has_converged(alpha) {
                break FindValueOutcome::Peers(shortlist.results());
            }
            let batch = shortlist.next_batch(alpha);
            if batch.is_empty() {
                break FindValueOutcome::Peers(shortlist.results());
            }

            let mut found_value = None;
            let mut learned = Vec::new();
            for candidate in &batch {
                shortlist.mark_queried(&candidate.id);
                match self.find_value_rpc(candidate.id, key).await {
                    Ok(FindValueOutcome::Value(value)) => {
                        found_value = Some(value);
                        break;
                    }
                    Ok(FindValueOutcome::Peers(peers)) => {
                        if closest_without_value.is_none() {
                            closest_without_value = Some(candidate.id);
                        }
                        learned.extend(peers);
                    }
                    Err(_) => {}
                }
            }

            if let Some(value) = found_value {
                if let Some(write_back_target) = closest_without_value {
                    let _ = self
                        .store_rpc(write_back_target, key, value.clone(), self.config.value_expire)
                        .await;
                }
                break FindValueOutcome::Value(value);
            }

            shortlist.insert_candidates(learned);
        };

        Ok(outcome)
    }

    async fn find_value_rpc(&self, peer: NodeId, key: [u8; 20]) -> Result<FindValueOutcome, EngineError> {
        let request_id = self.request_ids.next();
        let request = DhtMessage::FindValue(FindValueRequest {
            request_id,
            sender_id: self.local_id,
            sender_addr: self.local_addr,
            key,
        });
        match self.call(peer, request).await? {
            DhtMessage::FoundValue(FoundValueResponse::Value { value, .. }) => {
                Ok(FindValueOutcome::Value(value))
            }
            DhtMessage::FoundValue(FoundValueResponse::Peers { peers, .. }) => Ok(FindValueOutcome::Peers(
                peers
                    .into_iter()
                    .map(|p| PeerRecord::new(p.id, p.addr, NodeType::Server))
                    .collect(),
            )),
            _ => Err(EngineError::UnexpectedResponse),
        }
    }

    async fn store_rpc(
        &self,
        peer: NodeId,
        key: [u8; 20],
        value: Vec<u8>,
        ttl: std::time::Duration,
    ) -> Result<(), EngineError> {
        let request_id = self.request_ids.next();
        let request = DhtMessage::Store(StoreRequest {
            request_id,
            sender_id: self.local_id,
            sender_addr: self.local_addr,
            key,
            value,
            ttl: ttl.as_secs(),
        });
        match self.call(peer, request).await? {
            DhtMessage::StoreAck(ack) if ack.ok => Ok(()),
            DhtMessage::StoreAck(_) => Err(EngineError::UnexpectedResponse),
            _ => Err(EngineError::UnexpectedResponse),
        }
    }

    /// Store `value` locally and replicate it to the `k` closest known
    /// peers to `key` (spec §4.4.3).
    ///
    /// # Errors
    ///
    /// Propagates [`find_node`](Self::find_node)'s errors if the local
    /// routing table cannot seed a lookup.
    pub async fn store(&self, key: [u8; 20], value: Vec<u8>, ttl: std::time::Duration) -> Result<(), EngineError> {
        self.storage.lock().await.put(key, value.clone(), ttl, self.local_id);

        let targets = self.find_node(NodeId::from_bytes(key)).await.unwrap_or_default();
        for target in targets {
            let _ = self.store_rpc(target.id, key, value.clone(), ttl).await;
        }
        Ok(())
    }

    /// [`store`](Self::store) under the key derived from an opaque
    /// application key rather than a raw `NodeId`-shaped one (spec §3).
    ///
    /// # Errors
    ///
    /// Propagates [`store`](Self::store)'s errors.
    pub async fn store_by_application_key(
        &self,
        application_key: &[u8],
        value: Vec<u8>,
        ttl: std::time::Duration,
    ) -> Result<(), EngineError> {
        self.store(derive_dht_key(application_key), value, ttl).await
    }

    /// [`find_value`](Self::find_value) under the key derived from an
    /// opaque application key rather than a raw `NodeId`-shaped one
    /// (spec §3).
    ///
    /// # Errors
    ///
    /// Propagates [`find_value`](Self::find_value)'s errors.
    pub async fn find_value_by_application_key(
        &self,
        application_key: &[u8],
    ) -> Result<FindValueOutcome, EngineError> {
        self.find_value(derive_dht_key(application_key)).await
    }

    /// Republish every record this node originated, resetting each
    /// entry's expiry clock (spec §4.4.3). Intended to be called from a
    /// periodic maintenance timer at `config.republish_interval`.
    pub async fn republish_owned(&self) {
        let keys = {
            let storage = self.storage.lock().await;
            storage.keys_originated_by(&self.local_id)
        };
        for key in keys {
            let value = self.storage.lock().await.get(&key);
            if let Some(value) = value {
                self.storage.lock().await.republish(&key);
                let targets = self
                    .find_node(NodeId::from_bytes(key))
                    .await
                    .unwrap_or_default();
                for target in targets {
                    let _ = self
                        .store_rpc(target.id, key, value.clone(), self.config.value_expire)
                        .await;
                }
            }
        }
    }

    /// Refresh any bucket not touched within `config.bucket_refresh_interval`
    /// by issuing `find_node` against a random id in its range.
    pub async fn refresh_stale_buckets(&self) {
        let stale = {
            let table = self.routing_table.lock().await;
            table.buckets_needing_refresh(self.config.bucket_refresh_interval)
        };
        for bucket_index in stale {
            let target = random_id_in_bucket(&self.local_id, bucket_index);
            let _ = self.find_node(target).await;
            self.routing_table.lock().await.mark_bucket_refreshed(bucket_index);
        }
    }

    /// Send an overlay signal toward `target_id`, routing it through
    /// the local peer's own forwarding logic first (so a local send and
    /// a forwarded relay share one code path).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Unreachable`] if there is no route.
    pub async fn send_signal(
        &self,
        target_id: NodeId,
        payload: Vec<u8>,
    ) -> Result<(), EngineError> {
        let message = SignalMessage {
            request_id: self.request_ids.next(),
            source_id: self.local_id,
            target_id,
            payload,
            hops: vec![],
            ttl: self.config.max_signal_hops,
        };
        self.handle_signal(message).await
    }
}

/// Either the requested value, or the closest known peers if it was not
/// found anywhere along the lookup path.
#[derive(Debug, Clone)]
pub enum FindValueOutcome {
    Value(Vec<u8>),
    Peers(Vec<PeerRecord>),
}

/// A random id sharing the bucket's required common prefix length with
/// the local id, used to seed a bucket-refresh `find_node`.
fn random_id_in_bucket(local_id: &NodeId, bucket_index: usize) -> NodeId {
    let mut bytes = *local_id.as_bytes();
    let prefix_len = NodeId::BITS - 1 - bucket_index;
    let flip_byte = prefix_len / 8;
    let flip_bit = 7 - (prefix_len % 8);
    bytes[flip_byte] ^= 1 << flip_bit;

    for (i, byte) in bytes.iter_mut().enumerate().skip(flip_byte + 1) {
        let _ = i;
        *byte = rand::random();
    }
    NodeId::from_bytes(bytes)
}

/// Minimal join-all helper so this crate does not need to pull in the
/// `futures` crate solely for this one combinator.
async fn futures_join_all<F, T>(futures: Vec<F>) -> Vec<T>
where
    F: std::future::Future<Output = T>,
{
    let mut results = Vec::with_capacity(futures.len());
    for future in futures {
        results.push(future.await);
    }
    results
}
