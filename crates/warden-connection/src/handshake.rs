//! Handshake contract (spec §4.3): both sides exchange
//! `{protocolVersion, buildId, nodeId, publicKey?, metadata}` before a
//! connection may reach `Ready`.

use crate::manager::ConnectionError;
use crate::transport::Transport;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use warden_dht::node_id::NodeId;

/// The handshake payload each side advertises, transport-agnostic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeInfo {
    pub protocol_version: u32,
    pub build_id: String,
    pub node_id: NodeId,
    pub public_key: Option<[u8; 32]>,
    pub metadata: Value,
}

impl HandshakeInfo {
    #[must_use]
    pub fn new(protocol_version: u32, build_id: impl Into<String>, node_id: NodeId) -> Self {
        Self {
            protocol_version,
            build_id: build_id.into(),
            node_id,
            public_key: None,
            metadata: Value::Null,
        }
    }

    #[must_use]
    pub fn with_public_key(mut self, public_key: [u8; 32]) -> Self {
        self.public_key = Some(public_key);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Exchange handshake payloads over `transport` and validate the peer's.
///
/// The initiator sends first, then waits for the remote payload; the
/// responder waits first, then replies — this keeps exactly one side
/// writing before the other reads on a freshly opened session.
///
/// # Errors
///
/// Returns [`ConnectionError::VersionMismatch`] if `protocolVersion` or
/// `buildId` differ, [`ConnectionError::IdentityMismatch`] if the peer's
/// advertised public key does not derive its claimed `nodeId`, or
/// [`ConnectionError::Transport`]/[`ConnectionError::HandshakeEncoding`]
/// on I/O or (de)serialization failure.
pub async fn negotiate<T: Transport>(
    transport: &mut T,
    local: &HandshakeInfo,
    initiator: bool,
) -> Result<HandshakeInfo, ConnectionError> {
    let local_frame = serde_json::to_vec(local)?;

    let remote = if initiator {
        transport.send(local_frame).await?;
        let remote_frame = transport.recv().await?;
        serde_json::from_slice::<HandshakeInfo>(&remote_frame)?
    } else {
        let remote_frame = transport.recv().await?;
        let remote: HandshakeInfo = serde_json::from_slice(&remote_frame)?;
        transport.send(local_frame).await?;
        remote
    };

    verify(local, &remote)?;
    Ok(remote)
}

fn verify(local: &HandshakeInfo, remote: &HandshakeInfo) -> Result<(), ConnectionError> {
    if local.protocol_version != remote.protocol_version || local.build_id != remote.build_id {
        return Err(ConnectionError::VersionMismatch {
            local_version: local.protocol_version,
            local_build: local.build_id.clone(),
            remote_version: remote.protocol_version,
            remote_build: remote.build_id.clone(),
        });
    }

    if let Some(public_key) = remote.public_key {
        let derived = NodeId::from_public_key(&public_key);
        if derived != remote.node_id {
            return Err(ConnectionError::IdentityMismatch);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct Linked {
        outbox: std::sync::Arc<Mutex<VecDeque<Vec<u8>>>>,
        inbox: std::sync::Arc<Mutex<VecDeque<Vec<u8>>>>,
    }

    #[async_trait::async_trait]
    impl Transport for Linked {
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

    #[tokio::test]
    async fn test_negotiate_succeeds_on_matching_versions() {
        let shared_a_to_b = std::sync::Arc::new(Mutex::new(VecDeque::new()));
        let shared_b_to_a = std::sync::Arc::new(Mutex::new(VecDeque::new()));

        let mut side_a = Linked {
            outbox: shared_a_to_b.clone(),
            inbox: shared_b_to_a.clone(),
        };
        let mut side_b = Linked {
            outbox: shared_b_to_a.clone(),
            inbox: shared_a_to_b.clone(),
        };

        let local_a = HandshakeInfo::new(1, "build-1", NodeId::random());
        let local_b = HandshakeInfo::new(1, "build-1", NodeId::random());

        let (result_a, result_b) = tokio::join!(
            negotiate(&mut side_a, &local_a, true),
            negotiate(&mut side_b, &local_b, false),
        );

        assert_eq!(result_a.unwrap().node_id, local_b.node_id);
        assert_eq!(result_b.unwrap().node_id, local_a.node_id);
    }

    #[tokio::test]
    async fn test_verify_rejects_version_mismatch() {
        let local = HandshakeInfo::new(1, "build-1", NodeId::random());
        let remote = HandshakeInfo::new(2, "build-1", NodeId::random());
        assert!(matches!(
            verify(&local, &remote),
            Err(ConnectionError::VersionMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_verify_rejects_identity_mismatch() {
        let local = HandshakeInfo::new(1, "build-1", NodeId::random());
        let remote =
            HandshakeInfo::new(1, "build-1", NodeId::random()).with_public_key([7u8; 32]);
        assert!(matches!(
            verify(&local, &remote),
            Err(ConnectionError::IdentityMismatch)
        ));
    }

    #[tokio::test]
    async fn test_verify_accepts_matching_identity() {
        let public_key = [9u8; 32];
        let node_id = NodeId::from_public_key(&public_key);
        let local = HandshakeInfo::new(1, "build-1", NodeId::random());
        let remote = HandshakeInfo::new(1, "build-1", node_id).with_public_key(public_key);
        assert!(verify(&local, &remote).is_ok());
    }
}
