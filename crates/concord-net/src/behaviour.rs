//! Network behaviour of a Concord node.
//!
//! Every protocol payload travels over GossipSub, on one of three topic
//! families:
//! - `contact:<user>`: unicast traffic to a user (invitations, join
//!   responses, image shares)
//! - `installations:<user>`: traffic between installations of one identity
//! - `community:<id>`: signed descriptions and join requests
//!
//! Kademlia finds peers beyond the bootstrap list. Identify reports each
//! peer's listen addresses so they can be added to the routing table.

use libp2p::{
    gossipsub, identify,
    kad::{self, store::MemoryStore},
    swarm::NetworkBehaviour,
};

/// Built by [`super::transport::build_swarm`].
#[derive(NetworkBehaviour)]
#[behaviour(to_swarm = "ConcordEvent")]
pub struct ConcordBehaviour {
    /// Topic pub/sub for every wire message.
    pub gossipsub: gossipsub::Behaviour,
    /// Peer routing only; no records are stored.
    pub kademlia: kad::Behaviour<MemoryStore>,
    pub identify: identify::Behaviour,
}

/// Events surfaced to the swarm loop in [`crate::swarm`].
#[derive(Debug)]
pub enum ConcordEvent {
    /// Inbound topic messages and subscription changes.
    Gossipsub(gossipsub::Event),
    Kademlia(kad::Event),
    /// A peer told us its listen addresses.
    Identify(identify::Event),
}

impl From<gossipsub::Event> for ConcordEvent {
    fn from(event: gossipsub::Event) -> Self {
        ConcordEvent::Gossipsub(event)
    }
}

impl From<kad::Event> for ConcordEvent {
    fn from(event: kad::Event) -> Self {
        ConcordEvent::Kademlia(event)
    }
}

impl From<identify::Event> for ConcordEvent {
    fn from(event: identify::Event) -> Self {
        ConcordEvent::Identify(event)
    }
}
