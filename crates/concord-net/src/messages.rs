use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::NetError;
use crate::peers::ConnectionInfo;
use crate::swarm::SwarmCommand;

/// Subscribe to a gossipsub topic and wait for the swarm to confirm.
pub async fn subscribe(cmd_tx: &mpsc::Sender<SwarmCommand>, topic: &str) -> Result<(), NetError> {
    debug!(topic = %topic, "Subscribing");

    let (reply, rx) = oneshot::channel();
    cmd_tx
        .send(SwarmCommand::Subscribe {
            topic: topic.to_string(),
            reply,
        })
        .await
        .map_err(|_| NetError::ChannelClosed)?;

    rx.await.map_err(|_| NetError::ChannelClosed)?
}

/// Publish already sealed bytes on a topic.
///
/// Resolves once gossipsub has accepted or refused the message. Acceptance
/// means the message was handed to at least one mesh peer; it says nothing
/// about delivery to the final recipient.
pub async fn publish(
    cmd_tx: &mpsc::Sender<SwarmCommand>,
    topic: &str,
    data: Vec<u8>,
) -> Result<(), NetError> {
    let (reply, rx) = oneshot::channel();
    cmd_tx
        .send(SwarmCommand::Publish {
            topic: topic.to_string(),
            data,
            reply,
        })
        .await
        .map_err(|_| NetError::ChannelClosed)?;

    rx.await.map_err(|_| NetError::ChannelClosed)?
}

/// Snapshot of the peers the swarm is connected to.
pub async fn connected_peers(
    cmd_tx: &mpsc::Sender<SwarmCommand>,
) -> Result<Vec<ConnectionInfo>, NetError> {
    let (reply, rx) = oneshot::channel();
    cmd_tx
        .send(SwarmCommand::GetPeers(reply))
        .await
        .map_err(|_| NetError::ChannelClosed)?;

    rx.await.map_err(|_| NetError::ChannelClosed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reports_swarm_answer() {
        let (tx, mut rx) = mpsc::channel(4);

        tokio::spawn(async move {
            if let Some(SwarmCommand::Publish { topic, reply, .. }) = rx.recv().await {
                let _ = reply.send(Err(NetError::Publish {
                    topic,
                    reason: "InsufficientPeers".to_string(),
                }));
            }
        });

        let err = publish(&tx, "community:ab", vec![1, 2, 3]).await.unwrap_err();
        assert!(matches!(err, NetError::Publish { .. }));
    }

    #[tokio::test]
    async fn test_connected_peers_empty() {
        let (tx, mut rx) = mpsc::channel(4);

        tokio::spawn(async move {
            if let Some(SwarmCommand::GetPeers(reply)) = rx.recv().await {
                let _ = reply.send(Vec::new());
            }
        });

        assert!(connected_peers(&tx).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_closed_channel() {
        let (tx, rx) = mpsc::channel::<SwarmCommand>(1);
        drop(rx);
        assert!(matches!(
            subscribe(&tx, "chat:x").await,
            Err(NetError::ChannelClosed)
        ));
    }
}
