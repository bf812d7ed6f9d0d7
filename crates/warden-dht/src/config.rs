//! Configuration surface for the DHT engine.
//!
//! Every tunable this overlay exposes, gathered into a single struct
//! constructed with a builder (`new()` plus `with_*` setters rather than
//! public field mutation).

use std::time::Duration;

/// Tunables for [`crate::engine::DhtEngine`] and the coordinator layered
/// on top of it.
#[derive(Clone, Debug)]
pub struct Config {
    /// K-bucket size / result width for lookups.
    pub k: usize,
    /// Lookup concurrency (α).
    pub alpha: usize,
    /// Bits in the NodeId space (and bucket count).
    pub node_id_bits: usize,
    /// Per-RPC timeout.
    pub request_timeout: Duration,
    /// Outer deadline for an iterative lookup.
    pub lookup_timeout: Duration,
    /// Interval below which a bucket is considered fresh.
    pub bucket_refresh_interval: Duration,
    /// Interval on which an origin republishes its stored records.
    pub republish_interval: Duration,
    /// Soft TTL applied to newly stored values lacking an explicit one.
    pub value_expire: Duration,
    /// Cap on simultaneous `ConnectionManager`s.
    pub max_connections_per_node: usize,
    /// Number of onboarding helper candidates to try.
    pub helper_candidates_n: usize,
    /// Per-candidate dispatch deadline during helper selection.
    pub per_candidate_deadline: Duration,
    /// Deadline for the bridge's helper-selection `find_node(random)`.
    pub onboarding_find_node_deadline: Duration,
    /// How long a browser peer may report `tabVisible=false` before
    /// voluntarily disconnecting.
    pub idle_visibility: Duration,
    /// Retention window for bootstrap `(nodeId, requestId)` dedup.
    pub dedup_retention: Duration,
    /// Pre-shared token bridges present to the bootstrap server.
    pub bridge_auth_token: String,
    /// Whether new peers join without a membership token.
    pub open_network: bool,
    /// Whether this process is starting a brand-new overlay (genesis
    /// mode).
    pub create_new_dht: bool,
    /// Maximum hop count for overlay signaling (spec §9 Open Question:
    /// tunable, default 4).
    pub max_signal_hops: u8,
    /// Maximum accepted value size for an inbound `store` RPC, in bytes
    /// (§4.4.1: "Accept iff membership valid and size/ttl within bounds").
    pub max_value_size: usize,
}

impl Config {
    /// A new config requiring only the one field with no sane default:
    /// the pre-shared bridge authentication token.
    #[must_use]
    pub fn new(bridge_auth_token: impl Into<String>) -> Self {
        Self {
            k: 20,
            alpha: 3,
            node_id_bits: 160,
            request_timeout: Duration::from_millis(10_000),
            lookup_timeout: Duration::from_millis(30_000),
            bucket_refresh_interval: Duration::from_millis(3_600_000),
            republish_interval: Duration::from_millis(3_600_000),
            value_expire: Duration::from_millis(86_400_000),
            max_connections_per_node: 20,
            helper_candidates_n: 3,
            per_candidate_deadline: Duration::from_millis(10_000),
            onboarding_find_node_deadline: Duration::from_millis(30_000),
            idle_visibility: Duration::from_millis(30_000),
            dedup_retention: Duration::from_millis(300_000),
            bridge_auth_token: bridge_auth_token.into(),
            open_network: false,
            create_new_dht: false,
            max_signal_hops: 4,
            max_value_size: 64 * 1024,
        }
    }

    #[must_use]
    pub fn with_open_network(mut self, open_network: bool) -> Self {
        self.open_network = open_network;
        self
    }

    #[must_use]
    pub fn with_create_new_dht(mut self, create_new_dht: bool) -> Self {
        self.create_new_dht = create_new_dht;
        self
    }

    #[must_use]
    pub fn with_max_signal_hops(mut self, max_signal_hops: u8) -> Self {
        self.max_signal_hops = max_signal_hops;
        self
    }

    #[must_use]
    pub fn with_max_value_size(mut self, max_value_size: usize) -> Self {
        self.max_value_size = max_value_size;
        self
    }
}
