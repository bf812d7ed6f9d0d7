//! Per-peer connection actor (spec §4.3): a `ConnectionManager` owns at
//! most one live transport session to exactly one remote peer.
//! Multiplexing RPCs over that session is `DhtEngine`'s job, not this
//! crate's — `ConnectionManager` only drives the handshake, frames
//! traffic, and emits events.

use crate::handshake::{negotiate, HandshakeInfo};
use crate::transport::{Transport, TransportError};
use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::time::timeout;
use tracing::{instrument, warn};
use warden_dht::messages::DhtMessage;
use warden_dht::node_id::NodeId;

/// Default bound on the per-connection outbound queue (spec §5).
pub const DEFAULT_QUEUE_CAPACITY: usize = 50;

const CLOSE_DEADLINE: Duration = Duration::from_secs(5);

/// Eviction class for a queued outbound frame (spec §5: overflow drops
/// the oldest non-critical frame first).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePriority {
    /// Never evicted ahead of a `Normal` frame (e.g. RPC responses).
    Critical,
    Normal,
}

struct QueuedFrame {
    priority: FramePriority,
    bytes: Vec<u8>,
}

/// `Idle → Dialing → Handshaking → Authenticated → Ready → (Closing | Failed)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Dialing,
    Handshaking,
    Authenticated,
    Ready,
    Closing,
    Failed,
}

/// Events a `ConnectionManager` emits to whoever holds the receiving end
/// of its `mpsc` channel (typically `DhtEngine`).
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Connected(NodeId),
    /// A frame that did not parse as a `DhtMessage`.
    Message(Vec<u8>),
    /// The subset of inbound frames that carry DHT RPCs.
    DhtMessage(DhtMessage),
    Disconnected(DisconnectReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Requested,
    VersionMismatch,
    IdentityMismatch,
    TransportClosed,
    Timeout,
}

/// Errors raised by `ConnectionManager` operations.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection is not ready: current state is {0:?}")]
    NotReady(ConnectionState),

    #[error(
        "protocol version mismatch: local {local_version}/{local_build}, remote {remote_version}/{remote_build}"
    )]
    VersionMismatch {
        local_version: u32,
        local_build: String,
        remote_version: u32,
        remote_build: String,
    },

    #[error("identity mismatch: advertised nodeId does not derive from the claimed public key")]
    IdentityMismatch,

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("handshake payload encoding failed: {0}")]
    HandshakeEncoding(#[from] serde_json::Error),

    #[error("handshake timed out")]
    HandshakeTimeout,
}

/// One connection to one remote peer, generic over the underlying
/// [`Transport`].
pub struct ConnectionManager<T: Transport> {
    local: HandshakeInfo,
    state: Mutex<ConnectionState>,
    remote_id: Mutex<Option<NodeId>>,
    transport: Mutex<T>,
    outbound: Mutex<VecDeque<QueuedFrame>>,
    queue_capacity: usize,
    outbound_ready: Notify,
    events: mpsc::Sender<ConnectionEvent>,
    handshake_timeout: Duration,
}

impl<T: Transport> ConnectionManager<T> {
    #[must_use]
    pub fn new(local: HandshakeInfo, transport: T, events: mpsc::Sender<ConnectionEvent>) -> Self {
        Self::with_config(local, transport, events, DEFAULT_QUEUE_CAPACITY, Duration::from_secs(10))
    }

    #[must_use]
    pub fn with_config(
        local: HandshakeInfo,
        transport: T,
        events: mpsc::Sender<ConnectionEvent>,
        queue_capacity: usize,
        handshake_timeout: Duration,
    ) -> Self {
        Self {
            local,
            state: Mutex::new(ConnectionState::Idle),
            remote_id: Mutex::new(None),
            transport: Mutex::new(transport),
            outbound: Mutex::new(VecDeque::with_capacity(queue_capacity)),
            queue_capacity,
            outbound_ready: Notify::new(),
            events,
            handshake_timeout,
        }
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.lock().await
    }

    pub async fn remote_id(&self) -> Option<NodeId> {
        *self.remote_id.lock().await
    }

    /// Drive the handshake state machine. A second call while `Ready` is
    /// a no-op (spec §4.3 idempotence).
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::VersionMismatch`] or
    /// [`ConnectionError::IdentityMismatch`] on a failed handshake, or
    /// [`ConnectionError::HandshakeTimeout`] if it does not complete
    /// within the configured deadline.
    #[instrument(skip(self))]
    pub async fn connect(&self, initiator: bool) -> Result<(), ConnectionError> {
        if *self.state.lock().await == ConnectionState::Ready {
            return Ok(());
        }

        *self.state.lock().await = ConnectionState::Dialing;
        *self.state.lock().await = ConnectionState::Handshaking;

        let outcome = timeout(self.handshake_timeout, async {
            negotiate(&mut *self.transport.lock().await, &self.local, initiator).await
        })
        .await;

        match outcome {
            Ok(Ok(remote)) => {
                *self.remote_id.lock().await = Some(remote.node_id);
                *self.state.lock().await = ConnectionState::Authenticated;
                *self.state.lock().await = ConnectionState::Ready;
                let _ = self.events.send(ConnectionEvent::Connected(remote.node_id)).await;
                Ok(())
            }
            Ok(Err(err)) => {
                *self.state.lock().await = ConnectionState::Failed;
                let reason = disconnect_reason_for(&err);
                let _ = self.events.send(ConnectionEvent::Disconnected(reason)).await;
                Err(err)
            }
            Err(_) => {
                *self.state.lock().await = ConnectionState::Failed;
                let _ = self
                    .events
                    .send(ConnectionEvent::Disconnected(DisconnectReason::Timeout))
                    .await;
                Err(ConnectionError::HandshakeTimeout)
            }
        }
    }

    /// Enqueue a frame for [`run_send_loop`](Self::run_send_loop) to
    /// transmit. Fails with [`ConnectionError::NotReady`] unless the
    /// connection is `Ready`.
    ///
    /// When the queue is at `queue_capacity`, the oldest `Normal` frame
    /// is evicted to make room; `Critical` frames are only evicted to
    /// make room for another `Critical` frame once the queue holds
    /// nothing but `Critical` frames (spec §5).
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::NotReady`] if the connection is not
    /// `Ready`.
    pub async fn send(&self, frame: Vec<u8>, priority: FramePriority) -> Result<(), ConnectionError> {
        let state = *self.state.lock().await;
        if state != ConnectionState::Ready {
            return Err(ConnectionError::NotReady(state));
        }

        let mut queue = self.outbound.lock().await;
        if queue.len() >= self.queue_capacity {
            if let Some(pos) = queue.iter().position(|f| f.priority != FramePriority::Critical) {
                queue.remove(pos);
                warn!("outbound queue overflow, dropped oldest non-critical frame");
            } else if priority != FramePriority::Critical {
                warn!("outbound queue overflow, queue full of critical frames, dropping new frame");
                return Ok(());
            } else {
                queue.pop_front();
                warn!("outbound queue overflow, queue full of critical frames, dropped oldest");
            }
        }
        queue.push_back(QueuedFrame { priority, bytes: frame });
        drop(queue);
        self.outbound_ready.notify_one();
        Ok(())
    }

    /// Drive the outbound half: wait for a queued frame, then actually
    /// transmit it, until the transport fails or the connection leaves
    /// `Ready`.
    #[instrument(skip(self))]
    pub async fn run_send_loop(&self) {
        loop {
            if *self.state.lock().await != ConnectionState::Ready {
                return;
            }

            let next = self.outbound.lock().await.pop_front();
            let frame = match next {
                Some(frame) => frame,
                None => {
                    self.outbound_ready.notified().await;
                    continue;
                }
            };

            if self.transport.lock().await.send(frame.bytes).await.is_err() {
                *self.state.lock().await = ConnectionState::Failed;
                let _ = self
                    .events
                    .send(ConnectionEvent::Disconnected(DisconnectReason::TransportClosed))
                    .await;
                return;
            }
        }
    }

    /// Drive the inbound half: read frames until the transport closes or
    /// the connection leaves `Ready`, classifying each as a `DhtMessage`
    /// or an opaque application frame.
    #[instrument(skip(self))]
    pub async fn run_recv_loop(&self) {
        loop {
            if *self.state.lock().await != ConnectionState::Ready {
                return;
            }

            let received = self.transport.lock().await.recv().await;
            match received {
                Ok(frame) => {
                    let event = match DhtMessage::from_bytes(&frame) {
                        Ok(dht_message) => ConnectionEvent::DhtMessage(dht_message),
                        Err(_) => ConnectionEvent::Message(frame),
                    };
                    if self.events.send(event).await.is_err() {
                        return;
                    }
                }
                Err(_) => {
                    *self.state.lock().await = ConnectionState::Failed;
                    let _ = self
                        .events
                        .send(ConnectionEvent::Disconnected(DisconnectReason::TransportClosed))
                        .await;
                    return;
                }
            }
        }
    }

    /// Best-effort graceful close, hard close after `CLOSE_DEADLINE`.
    pub async fn close(&self, reason: DisconnectReason) {
        *self.state.lock().await = ConnectionState::Closing;
        let _ = timeout(CLOSE_DEADLINE, self.transport.lock().await.close()).await;
        *self.state.lock().await = ConnectionState::Failed;
        let _ = self.events.send(ConnectionEvent::Disconnected(reason)).await;
    }
}

fn disconnect_reason_for(err: &ConnectionError) -> DisconnectReason {
    match err {
        ConnectionError::VersionMismatch { .. } => DisconnectReason::VersionMismatch,
        ConnectionError::IdentityMismatch => DisconnectReason::IdentityMismatch,
        _ => DisconnectReason::TransportClosed,
    }
}
