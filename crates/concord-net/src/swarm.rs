//! Swarm orchestration with the tokio mpsc command/notification pattern.
//!
//! The swarm event loop runs in a dedicated task. Publishes and subscribes
//! carry a oneshot reply so callers learn whether gossipsub accepted them;
//! the delivery queue relies on that to decide between `sent` and a retry.

use std::path::PathBuf;

use futures::StreamExt;
use libp2p::{gossipsub, identify, kad, multiaddr::Protocol, swarm::SwarmEvent, Multiaddr, PeerId};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use concord_shared::constants::DEFAULT_QUIC_PORT;

use crate::behaviour::ConcordEvent;
use crate::discovery::load_bootstrap_peers;
use crate::error::NetError;
use crate::peers::{ConnectionInfo, PeerTracker};
use crate::transport::build_swarm;

// ---------------------------------------------------------------------------
// Command / notification types
// ---------------------------------------------------------------------------

/// Commands sent *into* the swarm task.
#[derive(Debug)]
pub enum SwarmCommand {
    Dial(Multiaddr),
    Publish {
        topic: String,
        data: Vec<u8>,
        reply: oneshot::Sender<Result<(), NetError>>,
    },
    Subscribe {
        topic: String,
        reply: oneshot::Sender<Result<(), NetError>>,
    },
    GetPeers(oneshot::Sender<Vec<ConnectionInfo>>),
    Shutdown,
}

/// Notifications sent *from* the swarm task to the application.
#[derive(Debug, Clone)]
pub enum SwarmNotification {
    PeerConnected { peer_id: PeerId, address: Multiaddr },
    PeerDisconnected { peer_id: PeerId },
    MessageReceived {
        source: Option<PeerId>,
        topic: String,
        data: Vec<u8>,
    },
}

pub struct SwarmConfig {
    /// File with one bootstrap multiaddr per line.
    pub bootstrap_peers_path: Option<PathBuf>,
    pub listen_port: u16,
    /// Additional multiaddrs to dial on startup.
    pub extra_dials: Vec<Multiaddr>,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            bootstrap_peers_path: None,
            listen_port: DEFAULT_QUIC_PORT,
            extra_dials: Vec::new(),
        }
    }
}

/// Spawn the libp2p swarm in a background tokio task.
///
/// Returns `(command_tx, notification_rx, local_peer_id)`.
pub async fn spawn_swarm(
    keypair: libp2p::identity::Keypair,
    config: SwarmConfig,
) -> anyhow::Result<(
    mpsc::Sender<SwarmCommand>,
    mpsc::Receiver<SwarmNotification>,
    PeerId,
)> {
    let mut swarm = build_swarm(keypair)?;
    let local_peer_id = *swarm.local_peer_id();

    let listen_addr_v4: Multiaddr =
        format!("/ip4/0.0.0.0/udp/{}/quic-v1", config.listen_port).parse()?;
    let listen_addr_v6: Multiaddr =
        format!("/ip6/::/udp/{}/quic-v1", config.listen_port).parse()?;

    swarm.listen_on(listen_addr_v4)?;
    swarm.listen_on(listen_addr_v6)?;

    info!(peer_id = %local_peer_id, port = config.listen_port, "Swarm listening");

    let mut dials = config
        .bootstrap_peers_path
        .as_deref()
        .map(load_bootstrap_peers)
        .unwrap_or_default();
    dials.extend(config.extra_dials.iter().cloned());

    let mut has_bootstrap = false;
    for addr in &dials {
        if let Err(e) = swarm.dial(addr.clone()) {
            warn!(addr = %addr, error = %e, "Failed to dial bootstrap peer");
            continue;
        }
        if let Some(peer_id) = extract_peer_id(addr) {
            swarm
                .behaviour_mut()
                .kademlia
                .add_address(&peer_id, addr.clone());
            has_bootstrap = true;
        }
        debug!(addr = %addr, "Dialing bootstrap peer");
    }

    if has_bootstrap {
        if let Err(e) = swarm.behaviour_mut().kademlia.bootstrap() {
            warn!(error = %e, "Kademlia bootstrap failed to start");
        }
    }

    let (cmd_tx, mut cmd_rx) = mpsc::channel::<SwarmCommand>(256);
    let (notif_tx, notif_rx) = mpsc::channel::<SwarmNotification>(256);

    tokio::spawn(async move {
        let mut peer_tracker = PeerTracker::new();

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(SwarmCommand::Dial(addr)) => {
                            if let Err(e) = swarm.dial(addr.clone()) {
                                error!(addr = %addr, error = %e, "Dial failed");
                            }
                        }
                        Some(SwarmCommand::Publish { topic, data, reply }) => {
                            let len = data.len();
                            let result = swarm
                                .behaviour_mut()
                                .gossipsub
                                .publish(gossipsub::IdentTopic::new(&topic), data)
                                .map(|_| ())
                                .map_err(|e| NetError::Publish {
                                    topic: topic.clone(),
                                    reason: e.to_string(),
                                });
                            match &result {
                                Ok(()) => debug!(topic = %topic, len, "Published"),
                                Err(e) => debug!(error = %e, "Publish rejected by gossipsub"),
                            }
                            let _ = reply.send(result);
                        }
                        Some(SwarmCommand::Subscribe { topic, reply }) => {
                            let result = swarm
                                .behaviour_mut()
                                .gossipsub
                                .subscribe(&gossipsub::IdentTopic::new(&topic))
                                .map(|_| ())
                                .map_err(|e| NetError::Subscribe {
                                    topic: topic.clone(),
                                    reason: e.to_string(),
                                });
                            if let Err(e) = &result {
                                error!(error = %e, "Subscribe failed");
                            }
                            let _ = reply.send(result);
                        }
                        Some(SwarmCommand::GetPeers(reply)) => {
                            let _ = reply.send(peer_tracker.connected());
                        }
                        Some(SwarmCommand::Shutdown) => {
                            info!("Swarm shutdown requested");
                            break;
                        }
                        None => {
                            info!("Command channel closed, shutting down swarm");
                            break;
                        }
                    }
                }

                event = swarm.select_next_some() => {
                    match event {
                        SwarmEvent::Behaviour(ConcordEvent::Gossipsub(
                            gossipsub::Event::Message { message, .. },
                        )) => {
                            let topic = message.topic.to_string();
                            debug!(
                                topic = %topic,
                                source = ?message.source,
                                len = message.data.len(),
                                "GossipSub message received"
                            );
                            let _ = notif_tx
                                .send(SwarmNotification::MessageReceived {
                                    source: message.source,
                                    topic,
                                    data: message.data,
                                })
                                .await;
                        }

                        SwarmEvent::Behaviour(ConcordEvent::Kademlia(
                            kad::Event::OutboundQueryProgressed { result, .. },
                        )) => {
                            debug!(result = ?result, "Kademlia query progressed");
                        }

                        SwarmEvent::Behaviour(ConcordEvent::Identify(
                            identify::Event::Received { peer_id, info, .. },
                        )) => {
                            debug!(peer = %peer_id, protocol = ?info.protocol_version, "Identify received");
                            for addr in &info.listen_addrs {
                                swarm
                                    .behaviour_mut()
                                    .kademlia
                                    .add_address(&peer_id, addr.clone());
                            }
                        }

                        SwarmEvent::ConnectionEstablished { peer_id, endpoint, .. } => {
                            let addr = endpoint.get_remote_address().clone();
                            peer_tracker.on_connected(peer_id, addr.clone());
                            info!(peer = %peer_id, addr = %addr, "Peer connected");
                            let _ = notif_tx
                                .send(SwarmNotification::PeerConnected { peer_id, address: addr })
                                .await;
                        }

                        SwarmEvent::ConnectionClosed { peer_id, num_established, .. } => {
                            if num_established == 0 {
                                peer_tracker.on_disconnected(&peer_id);
                                info!(peer = %peer_id, "Peer disconnected");
                                let _ = notif_tx
                                    .send(SwarmNotification::PeerDisconnected { peer_id })
                                    .await;
                            }
                        }

                        SwarmEvent::NewListenAddr { address, .. } => {
                            info!(addr = %address, "Listening on new address");
                        }

                        SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                            warn!(peer = ?peer_id, error = %error, "Outgoing connection error");
                        }

                        SwarmEvent::IncomingConnectionError { error, .. } => {
                            warn!(error = %error, "Incoming connection error");
                        }

                        _ => {}
                    }
                }
            }
        }

        info!("Swarm event loop terminated");
    });

    Ok((cmd_tx, notif_rx, local_peer_id))
}

fn extract_peer_id(addr: &Multiaddr) -> Option<PeerId> {
    addr.iter().find_map(|p| match p {
        Protocol::P2p(peer_id) => Some(peer_id),
        _ => None,
    })
}
