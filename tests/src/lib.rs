//! Shared harness for the scenario and property tests under `tests/`.
//!
//! Nothing here is part of the onboarding or DHT crates themselves — it
//! wires several `DhtEngine`s together over in-memory channels instead of
//! real transports, standing in for the `ConnectionManager`-driven
//! delivery path a deployed node would use, so the behavioral tests in
//! this crate can exercise multi-peer scenarios without a network.

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::mpsc;
use warden_dht::config::Config;
use warden_dht::engine::{DhtEngine, EngineError, PeerSink};
use warden_dht::messages::DhtMessage;
use warden_dht::node_id::NodeId;

/// Routes `PeerSink::send` calls between every engine spawned on the same
/// hub, keyed by nodeId.
#[derive(Clone)]
pub struct NetworkHub {
    routes: Arc<StdMutex<HashMap<NodeId, mpsc::UnboundedSender<(NodeId, DhtMessage)>>>>,
}

impl NetworkHub {
    #[must_use]
    pub fn new() -> Self {
        Self { routes: Arc::new(StdMutex::new(HashMap::new())) }
    }

    /// Spawn a node on this hub: builds a `DhtEngine` wired to the hub and
    /// a background task that dispatches inbound messages to it.
    pub fn spawn_node(&self, local_id: NodeId, local_addr: SocketAddr, config: Config) -> Arc<DhtEngine<ChannelSink>> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.routes.lock().unwrap().insert(local_id, tx);

        let sink = Arc::new(ChannelSink { local_id, routes: self.routes.clone() });
        let engine = Arc::new(DhtEngine::new(local_id, local_addr, config, sink));

        let engine_clone = engine.clone();
        tokio::spawn(async move {
            while let Some((from, message)) = rx.recv().await {
                let _ = engine_clone.handle_message(from, message).await;
            }
        });

        engine
    }
}

impl Default for NetworkHub {
    fn default() -> Self {
        Self::new()
    }
}

/// A `PeerSink` that delivers directly to another engine on the same
/// [`NetworkHub`] instead of over a real transport.
pub struct ChannelSink {
    local_id: NodeId,
    routes: Arc<StdMutex<HashMap<NodeId, mpsc::UnboundedSender<(NodeId, DhtMessage)>>>>,
}

#[async_trait]
impl PeerSink for ChannelSink {
    async fn send(&self, peer: NodeId, message: DhtMessage) -> Result<(), EngineError> {
        let sender = self.routes.lock().unwrap().get(&peer).cloned();
        match sender {
            Some(sender) => sender
                .send((self.local_id, message))
                .map_err(|_| EngineError::Unreachable(peer)),
            None => Err(EngineError::Unreachable(peer)),
        }
    }
}

/// A throwaway loopback address distinguished only by port, for engines
/// that never open a real socket.
#[must_use]
pub fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

/// Have `a` and `b` learn about each other directly, standing in for the
/// routing-table insert a `ConnectionManager`'s `Connected` event would
/// trigger after a real handshake.
pub async fn introduce(
    a: &DhtEngine<ChannelSink>,
    a_addr: SocketAddr,
    a_type: warden_dht::routing::NodeType,
    b: &DhtEngine<ChannelSink>,
    b_addr: SocketAddr,
    b_type: warden_dht::routing::NodeType,
) {
    use warden_dht::routing::PeerRecord;
    a.learn_peer(PeerRecord::new(*b.local_id(), b_addr, b_type)).await.ok();
    b.learn_peer(PeerRecord::new(*a.local_id(), a_addr, a_type)).await.ok();
}
