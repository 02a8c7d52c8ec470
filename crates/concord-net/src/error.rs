use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetError {
    #[error("Swarm command channel closed")]
    ChannelClosed,

    #[error("Publish on {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("Subscribe to {topic} failed: {reason}")]
    Subscribe { topic: String, reason: String },
}
