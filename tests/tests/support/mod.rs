//! Shared in-memory `Transport` double for tests that need a real
//! `negotiate`/`ConnectionManager` handshake without a socket.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use warden_connection::transport::{Transport, TransportError};

/// One end of a linked pair; frames written by one side land in the
/// other's inbox. Mirrors the way two real peers share no state but
/// agree on a wire.
pub struct PairedTransport {
    outbox: Arc<Mutex<VecDeque<Vec<u8>>>>,
    inbox: Arc<Mutex<VecDeque<Vec<u8>>>>,
}

impl PairedTransport {
    /// Build two `PairedTransport`s that deliver to each other.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let a_to_b = Arc::new(Mutex::new(VecDeque::new()));
        let b_to_a = Arc::new(Mutex::new(VecDeque::new()));
        let a = Self { outbox: a_to_b.clone(), inbox: b_to_a.clone() };
        let b = Self { outbox: b_to_a, inbox: a_to_b };
        (a, b)
    }
}

#[async_trait]
impl Transport for PairedTransport {
    async fn send(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        self.outbox.lock().unwrap().push_back(frame);
        Ok(())
    }

    async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        loop {
            if let Some(frame) = self.inbox.lock().unwrap().pop_front() {
                return Ok(frame);
            }
            tokio::task::yield_now().await;
        }
    }

    async fn close(&mut self) {}
}
