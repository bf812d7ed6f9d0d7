//! Overlay signal routing (spec §4.4.4).
//!
//! The `signal` RPC carries opaque payloads — WebRTC offer/answer/ICE
//! candidates, or a WebSocket address exchange — between peers that are
//! not directly connected, using the DHT itself as the forwarding fabric
//! instead of a separate signaling server.

use crate::messages::SignalMessage;
use crate::node_id::NodeId;
use crate::routing::RoutingTable;

/// What a peer should do with an inbound [`SignalMessage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalAction {
    /// `target_id` is a direct neighbor (or this is the target): deliver
    /// locally.
    Deliver,
    /// Forward to the neighbor closest to `target_id`, with `message`
    /// already updated (hop appended, ttl decremented).
    Forward { next_hop: NodeId, message: SignalMessage },
    /// The message must not be forwarded further.
    Drop(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// `local_id` already appears in `hops`: an actual routing loop.
    LoopDetected,
    /// `hops.len()` has reached the configured maximum.
    TtlExhausted,
    /// No known peer to forward to.
    NoRoute,
}

/// Decide how `local_id` should handle `message`, per the routing rule of
/// spec §4.4.4: direct delivery if the target is a known neighbor,
/// otherwise forward toward the XOR-closest known neighbor, subject to
/// loop detection and a hop-count ceiling.
#[must_use]
pub fn route_signal(
    local_id: &NodeId,
    routing_table: &RoutingTable,
    mut message: SignalMessage,
    max_hops: u8,
) -> SignalAction {
    if message.target_id == *local_id || routing_table.get_peer(&message.target_id).is_some() {
        return SignalAction::Deliver;
    }

    if message.hops.iter().filter(|&&id| id == *local_id).count() >= 1 {
        return SignalAction::Drop(DropReason::LoopDetected);
    }

    if message.hops.len() as u8 >= max_hops || message.ttl == 0 {
        return SignalAction::Drop(DropReason::TtlExhausted);
    }

    let Some(next_hop) = routing_table
        .closest_peers(&message.target_id, 1)
        .into_iter()
        .next()
    else {
        return SignalAction::Drop(DropReason::NoRoute);
    };

    message.hops.push(*local_id);
    message.ttl -= 1;

    SignalAction::Forward {
        next_hop: next_hop.id,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{NodeType, PeerRecord};

    fn addr() -> std::net::SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    fn signal(source: NodeId, target: NodeId) -> SignalMessage {
        SignalMessage {
            request_id: 1,
            source_id: source,
            target_id: target,
            payload: vec![1, 2, 3],
            hops: vec![],
            ttl: 4,
        }
    }

    #[test]
    fn test_delivers_to_self() {
        let local = NodeId::random();
        let table = RoutingTable::new(local);
        let action = route_signal(&local, &table, signal(NodeId::random(), local), 4);
        assert_eq!(action, SignalAction::Deliver);
    }

    #[test]
    fn test_delivers_to_direct_neighbor() {
        let local = NodeId::random();
        let mut table = RoutingTable::new(local);
        let target = NodeId::random();
        table
            .insert(PeerRecord::new(target, addr(), NodeType::Server))
            .unwrap();

        let action = route_signal(&local, &table, signal(NodeId::random(), target), 4);
        assert_eq!(action, SignalAction::Deliver);
    }

    #[test]
    fn test_forwards_toward_closest_neighbor() {
        let local = NodeId::random();
        let mut table = RoutingTable::new(local);
        let relay = NodeId::random();
        table
            .insert(PeerRecord::new(relay, addr(), NodeType::Server))
            .unwrap();

        let target = NodeId::random();
        let action = route_signal(&local, &table, signal(NodeId::random(), target), 4);
        match action {
            SignalAction::Forward { next_hop, message } => {
                assert_eq!(next_hop, relay);
                assert_eq!(message.hops, vec![local]);
                assert_eq!(message.ttl, 3);
            }
            other => panic!("expected Forward, got {other:?}"),
        }
    }

    #[test]
    fn test_drops_on_loop() {
        let local = NodeId::random();
        let mut table = RoutingTable::new(local);
        table
            .insert(PeerRecord::new(NodeId::random(), addr(), NodeType::Server))
            .unwrap();

        let mut msg = signal(NodeId::random(), NodeId::random());
        msg.hops.push(local);

        let action = route_signal(&local, &table, msg, 4);
        assert_eq!(action, SignalAction::Drop(DropReason::LoopDetected));
    }

    #[test]
    fn test_drops_on_hop_ceiling() {
        let local = NodeId::random();
        let mut table = RoutingTable::new(local);
        table
            .insert(PeerRecord::new(NodeId::random(), addr(), NodeType::Server))
            .unwrap();

        let mut msg = signal(NodeId::random(), NodeId::random());
        msg.hops = vec![NodeId::random(); 4];

        let action = route_signal(&local, &table, msg, 4);
        assert_eq!(action, SignalAction::Drop(DropReason::TtlExhausted));
    }

    #[test]
    fn test_drops_with_no_route() {
        let local = NodeId::random();
        let table = RoutingTable::new(local);
        let action = route_signal(&local, &table, signal(NodeId::random(), NodeId::random()), 4);
        assert_eq!(action, SignalAction::Drop(DropReason::NoRoute));
    }
}
