//! Permissioned Kademlia DHT for the wardenmesh overlay.
//!
//! This crate implements the routing, storage, wire protocol, and
//! iterative-lookup machinery of the overlay (spec §4): a 160-bit
//! XOR-metric routing table (`routing`) whose k-buckets never reject an
//! insert destructively, a JSON RPC envelope (`messages`), soft-state
//! key/value storage with origin-driven republication (`storage`), the
//! pure shortlist bookkeeping behind iterative `find_node`/`find_value`
//! (`lookup`), and NAT-agnostic overlay signal routing (`signaling`).
//! `engine::DhtEngine` ties these together into the actual async RPC
//! dispatcher; it is generic over a [`engine::PeerSink`] so this crate
//! never depends on a concrete transport.

pub mod config;
pub mod engine;
pub mod lookup;
pub mod messages;
pub mod node_id;
pub mod routing;
pub mod signaling;
pub mod storage;

pub use config::Config;
pub use engine::{DhtEngine, EngineError, FindValueOutcome, PeerSink, PermissiveStoreGate, StoreGate};
pub use messages::DhtMessage;
pub use node_id::NodeId;
pub use routing::{DhtError, NodeType, PeerRecord, PeerState, RoutingTable};
pub use storage::{Storage, StoredValue};
