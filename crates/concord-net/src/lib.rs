// Gossipsub swarm over QUIC carrying Concord envelopes.

pub mod behaviour;
pub mod discovery;
pub mod error;
pub mod messages;
pub mod peers;
pub mod swarm;
pub mod transport;

pub use behaviour::{ConcordBehaviour, ConcordEvent};
pub use discovery::{load_bootstrap_peers, parse_multiaddrs};
pub use error::NetError;
pub use messages::{connected_peers, publish, subscribe};
pub use peers::{ConnectionInfo, PeerTracker};
pub use swarm::{spawn_swarm, SwarmCommand, SwarmConfig, SwarmNotification};
pub use transport::build_swarm;
