//! Bootstrap, bridge, and onboarding layer for the wardenmesh overlay
//! (§4.5): the well-known entry point joining peers contact
//! first (`bootstrap`), the passive DHT observer that performs helper
//! selection and issues membership tokens (`bridge`), the
//! helper-selection scoring algorithm (`helper_selection`), and the
//! joining peer's own state-machine bookkeeping (`join`).

pub mod bootstrap;
pub mod bridge;
pub mod error;
pub mod helper_selection;
pub mod join;

pub use bootstrap::{BootstrapServer, BridgeAuthRegistry, GetPeersResponse, JoinCredential, OnboardingBridge};
pub use bridge::{network_fingerprint, BridgeNode, OnboardingPeerResponse, RoutingSnapshot};
pub use error::CoordinatorError;
pub use helper_selection::{dispatch_to_first_ack, select_candidates, HelperCandidate, HelperDispatch};
pub use join::{JoinFailure, JoinSession, JoinStatus, JoinStep};
