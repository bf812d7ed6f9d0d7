//! The `Transport` capability: the only thing a [`crate::manager::ConnectionManager`]
//! requires of its underlying session. This crate never implements a
//! concrete WebRTC or WebSocket transport — those are external
//! collaborators per spec §1.

use async_trait::async_trait;
use thiserror::Error;

/// A single bidirectional, framed transport session to one remote peer.
///
/// `send` takes `&self` so concurrent callers may write without
/// serializing through a single mutable borrow; `recv`/`close` take
/// `&mut self` since only the connection's own receive loop drives them.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, frame: Vec<u8>) -> Result<(), TransportError>;
    async fn recv(&mut self) -> Result<Vec<u8>, TransportError>;
    async fn close(&mut self);
}

/// Errors surfaced by a [`Transport`] implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport closed by peer")]
    Closed,

    #[error("transport I/O error: {0}")]
    Io(String),
}
