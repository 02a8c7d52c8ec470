//! # concord-node
//!
//! A Concord node: one installation of a user identity on the gossipsub
//! network.
//!
//! The binary wires together:
//! - the **key file** holding the identity and this installation's id
//! - the **SQLite store** with communities, join requests, installations,
//!   bookmarks and the outbound delivery queue
//! - the **libp2p swarm** (QUIC + gossipsub) used as the transport
//! - the **messenger**, which owns the protocol state and handles every
//!   inbound payload
//! - the **delivery sweep**, which retries unsent messages with backoff

mod config;
mod keys;
mod swarm_transport;

use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use concord_core::{InboundEvent, Messenger, SymmetricEncryptor};
use concord_net::{connected_peers, spawn_swarm, SwarmCommand, SwarmNotification};
use concord_store::{Database, InstallationMetadata};

use crate::config::NodeConfig;
use crate::keys::NodeKeys;
use crate::swarm_transport::SwarmTransport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,concord_core=debug")),
        )
        .init();

    info!("Starting Concord node v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Configuration and key material
    // -----------------------------------------------------------------------
    let config = NodeConfig::from_env();
    info!(?config, "Loaded configuration");

    std::fs::create_dir_all(&config.data_dir)?;
    let keys = NodeKeys::load_or_create(&config.key_file)?;
    let keypair = keys.libp2p_keypair()?;
    let installation_id = keys.installation_id;
    let identity = Arc::new(keys.identity);
    info!(
        user = %identity.user_id().short(),
        installation = %installation_id,
        "Identity loaded"
    );

    // -----------------------------------------------------------------------
    // 3. Storage and network
    // -----------------------------------------------------------------------
    let db = Database::open_at(&config.database_path(), &identity.derive_db_key())?;
    let db = Arc::new(Mutex::new(db));

    let (cmd_tx, mut notif_rx, peer_id) = spawn_swarm(keypair, config.swarm_config()).await?;
    info!(peer_id = %peer_id, "Swarm started");

    let encryptor = SymmetricEncryptor::new(config.network_secret).with_private_topic(
        identity.user_id().installations_topic(),
        identity.derive_installations_secret(),
    );

    let messenger = Messenger::new(
        db,
        Arc::clone(&identity),
        installation_id,
        Arc::new(SwarmTransport::new(cmd_tx.clone())),
        Arc::new(encryptor),
        config.delivery_policy(),
    );

    messenger.subscribe_all().await?;
    messenger
        .set_installation_metadata(InstallationMetadata {
            name: config.installation_name.clone(),
            device_type: config.device_type.clone(),
        })
        .await?;

    // -----------------------------------------------------------------------
    // 4. Background delivery sweep
    // -----------------------------------------------------------------------
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = tokio::spawn(messenger.queue().run(shutdown_rx));

    // -----------------------------------------------------------------------
    // 5. Inbound loop (runs until Ctrl+C or the swarm stops)
    // -----------------------------------------------------------------------
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            notification = notif_rx.recv() => {
                match notification {
                    Some(SwarmNotification::MessageReceived { topic, data, .. }) => {
                        match messenger.handle_inbound(&topic, &data).await {
                            Ok(event) => log_event(&topic, &event),
                            Err(e) => warn!(topic = %topic, error = %e, "Failed to process inbound message"),
                        }
                    }
                    Some(SwarmNotification::PeerConnected { peer_id, address }) => {
                        let peers = connected_peers(&cmd_tx).await.map(|p| p.len()).unwrap_or_default();
                        info!(peer = %peer_id, addr = %address, peers, "Peer connected");
                    }
                    Some(SwarmNotification::PeerDisconnected { peer_id }) => {
                        debug!(peer = %peer_id, "Peer disconnected");
                    }
                    None => {
                        warn!("Swarm task stopped");
                        break;
                    }
                }
            }
            _ = &mut ctrl_c => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = cmd_tx.send(SwarmCommand::Shutdown).await;
    sweeper.await?;

    Ok(())
}

fn log_event(topic: &str, event: &InboundEvent) {
    match event {
        InboundEvent::CommunityUpdated(c) => {
            info!(community = %c.id.short(), clock = c.clock(), "Community updated");
        }
        InboundEvent::CommunityInvitation { from, community } => {
            info!(from = %from.short(), community = %community.id.short(), name = %community.name(), "Community shared with us");
        }
        InboundEvent::JoinRequestReceived(r) => {
            info!(community = %r.community_id.short(), requester = %r.requester.short(), "Join request waiting for approval");
        }
        InboundEvent::JoinResponse(r) => {
            info!(community = %r.community_id.short(), state = ?r.state, "Join request answered");
        }
        InboundEvent::InstallationPaired(i) => {
            info!(installation = %i.id, name = %i.metadata.name, "Installation paired");
        }
        InboundEvent::CommunitySynced(c) => {
            info!(community = %c.id.short(), "Community synced from another installation");
        }
        InboundEvent::BookmarkSynced(b) => {
            debug!(url = %b.url, removed = b.removed, "Bookmark synced");
        }
        InboundEvent::ImageShared { from, message_id, .. } => {
            info!(from = %from.short(), message = %message_id, "Image shared with us");
        }
        InboundEvent::Duplicate | InboundEvent::Ignored => {
            debug!(topic, ?event, "Inbound message dropped");
        }
    }
}
