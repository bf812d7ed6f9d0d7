//! Transport-agnostic per-peer connection handling for the wardenmesh
//! overlay (spec §4.3): a [`transport::Transport`] capability any
//! WebRTC/WebSocket collaborator can implement, the handshake contract
//! that authenticates a session before it is usable, and the
//! [`manager::ConnectionManager`] state machine that drives both.

pub mod handshake;
pub mod manager;
pub mod transport;

pub use handshake::{negotiate, HandshakeInfo};
pub use manager::{
    ConnectionError, ConnectionEvent, ConnectionManager, ConnectionState, DisconnectReason,
    FramePriority, DEFAULT_QUEUE_CAPACITY,
};
pub use transport::{Transport, TransportError};
