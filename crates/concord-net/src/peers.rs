//! In-memory record of currently connected peers.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use libp2p::{Multiaddr, PeerId};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub peer_id: PeerId,
    pub address: Multiaddr,
    /// Unix epoch millis.
    pub connected_at: u64,
}

#[derive(Debug, Clone, Default)]
pub struct PeerTracker {
    peers: HashMap<PeerId, ConnectionInfo>,
}

impl PeerTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly connected peer. A second connection to the same peer
    /// replaces the stored address.
    pub fn on_connected(&mut self, peer_id: PeerId, address: Multiaddr) {
        let connected_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        debug!(peer = %peer_id, addr = %address, "Tracking peer connection");

        self.peers.insert(
            peer_id,
            ConnectionInfo {
                peer_id,
                address,
                connected_at,
            },
        );
    }

    pub fn on_disconnected(&mut self, peer_id: &PeerId) {
        if self.peers.remove(peer_id).is_some() {
            debug!(peer = %peer_id, "Removed peer from tracker");
        }
    }

    pub fn connected(&self) -> Vec<ConnectionInfo> {
        self.peers.values().cloned().collect()
    }

    pub fn is_connected(&self, peer_id: &PeerId) -> bool {
        self.peers.contains_key(peer_id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> Multiaddr {
        "/ip4/127.0.0.1/udp/4101/quic-v1".parse().unwrap()
    }

    #[test]
    fn test_connect_and_disconnect() {
        let mut tracker = PeerTracker::new();
        let peer = PeerId::random();

        tracker.on_connected(peer, addr());
        assert!(tracker.is_connected(&peer));
        assert_eq!(tracker.len(), 1);

        tracker.on_disconnected(&peer);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_reconnect_replaces_entry() {
        let mut tracker = PeerTracker::new();
        let peer = PeerId::random();
        tracker.on_connected(peer, addr());
        tracker.on_connected(peer, "/ip4/10.0.0.1/udp/4101/quic-v1".parse().unwrap());

        let peers = tracker.connected();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].address.to_string(), "/ip4/10.0.0.1/udp/4101/quic-v1");
    }
}
