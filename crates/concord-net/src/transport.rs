use std::time::Duration;

use libp2p::gossipsub::{self, MessageAuthenticity, MessageId, ValidationMode};
use libp2p::identity::Keypair;
use libp2p::kad::{self, store::MemoryStore};
use libp2p::{identify, SwarmBuilder};
use tracing::info;

use concord_shared::constants::{GOSSIPSUB_HEARTBEAT_SECS, MAX_MESSAGE_SIZE, PROTOCOL_VERSION};

use crate::behaviour::ConcordBehaviour;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Build a QUIC swarm carrying the Concord behaviour.
///
/// Gossipsub message ids are the BLAKE3 hash of the payload, so the same
/// sealed envelope republished by the retry queue is deduplicated by the
/// mesh rather than flooded twice.
pub fn build_swarm(keypair: Keypair) -> anyhow::Result<libp2p::Swarm<ConcordBehaviour>> {
    let swarm = SwarmBuilder::with_existing_identity(keypair)
        .with_tokio()
        .with_quic()
        .with_behaviour(|key| -> Result<ConcordBehaviour, BoxError> {
            let local_peer_id = key.public().to_peer_id();

            let message_id_fn = |message: &gossipsub::Message| {
                MessageId::from(blake3::hash(&message.data).to_hex().to_string())
            };

            let gossipsub_config = gossipsub::ConfigBuilder::default()
                .heartbeat_interval(Duration::from_secs(GOSSIPSUB_HEARTBEAT_SECS))
                .validation_mode(ValidationMode::Strict)
                .max_transmit_size(MAX_MESSAGE_SIZE)
                .message_id_fn(message_id_fn)
                .build()
                .map_err(|e| -> BoxError { format!("GossipSub config: {e}").into() })?;

            let gossipsub = gossipsub::Behaviour::new(
                MessageAuthenticity::Signed(key.clone()),
                gossipsub_config,
            )
            .map_err(|e| -> BoxError { format!("GossipSub init: {e}").into() })?;

            let store = MemoryStore::new(local_peer_id);
            let mut kademlia = kad::Behaviour::new(local_peer_id, store);
            kademlia.set_mode(Some(kad::Mode::Server));

            let identify_config =
                identify::Config::new(PROTOCOL_VERSION.to_string(), key.public())
                    .with_push_listen_addr_updates(true)
                    .with_interval(Duration::from_secs(60));
            let identify = identify::Behaviour::new(identify_config);

            Ok(ConcordBehaviour {
                gossipsub,
                kademlia,
                identify,
            })
        })?
        .with_swarm_config(|cfg| cfg.with_idle_connection_timeout(Duration::from_secs(60)))
        .build();

    info!(peer_id = %swarm.local_peer_id(), "Built Concord swarm with QUIC transport");

    Ok(swarm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_shared::types::UserId;

    #[tokio::test]
    async fn test_swarm_subscribes_to_concord_topics() {
        let keypair = Keypair::generate_ed25519();
        let peer_id = keypair.public().to_peer_id();
        let mut swarm = build_swarm(keypair).unwrap();
        assert_eq!(*swarm.local_peer_id(), peer_id);

        let user = UserId([7u8; 32]);
        for topic in [user.personal_topic(), user.installations_topic()] {
            let topic = gossipsub::IdentTopic::new(topic);
            assert!(swarm.behaviour_mut().gossipsub.subscribe(&topic).unwrap());
        }
        assert_eq!(swarm.behaviour().gossipsub.topics().count(), 2);
    }
}
