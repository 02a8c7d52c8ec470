//! [`Transport`] over the gossipsub swarm task.

use async_trait::async_trait;
use tokio::sync::mpsc;

use concord_core::{CoreError, Transport};
use concord_net::{publish, subscribe, SwarmCommand};

pub struct SwarmTransport {
    cmd_tx: mpsc::Sender<SwarmCommand>,
}

impl SwarmTransport {
    pub fn new(cmd_tx: mpsc::Sender<SwarmCommand>) -> Self {
        Self { cmd_tx }
    }
}

#[async_trait]
impl Transport for SwarmTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), CoreError> {
        publish(&self.cmd_tx, topic, payload)
            .await
            .map_err(|e| CoreError::Transport(e.to_string()))
    }

    async fn subscribe(&self, topic: &str) -> Result<(), CoreError> {
        subscribe(&self.cmd_tx, topic)
            .await
            .map_err(|e| CoreError::Transport(e.to_string()))
    }
}
