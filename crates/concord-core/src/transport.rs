//! Collaborator seams: the broadcast transport and payload encryption.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use concord_shared::crypto::{decrypt, derive_topic_key, encrypt, SymmetricKey};

use crate::error::CoreError;

/// Fire-and-forget pub/sub. A successful `publish` only means the network
/// accepted the bytes; ordering and retries are handled by the caller.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), CoreError>;

    /// Start receiving a topic. Inbound payloads are handed to
    /// [`crate::Messenger::handle_inbound`] by whoever drives the transport.
    async fn subscribe(&self, topic: &str) -> Result<(), CoreError>;
}

/// Payload confidentiality for a topic's audience.
pub trait Encryptor: Send + Sync {
    fn encrypt(&self, topic: &str, plaintext: &[u8]) -> Result<Vec<u8>, CoreError>;
    fn decrypt(&self, topic: &str, ciphertext: &[u8]) -> Result<Vec<u8>, CoreError>;
}

/// XChaCha20-Poly1305 with a key derived per topic from a shared secret.
///
/// Topics registered with [`SymmetricEncryptor::with_private_topic`] use
/// their own secret instead. The installations topic is registered this way
/// so sibling traffic is unreadable to holders of the shared secret.
#[derive(Clone)]
pub struct SymmetricEncryptor {
    shared_secret: [u8; 32],
    private_topics: HashMap<String, [u8; 32]>,
}

impl SymmetricEncryptor {
    pub fn new(shared_secret: [u8; 32]) -> Self {
        Self {
            shared_secret,
            private_topics: HashMap::new(),
        }
    }

    pub fn with_private_topic(mut self, topic: impl Into<String>, secret: [u8; 32]) -> Self {
        self.private_topics.insert(topic.into(), secret);
        self
    }

    fn key_for(&self, topic: &str) -> SymmetricKey {
        let secret = self
            .private_topics
            .get(topic)
            .unwrap_or(&self.shared_secret);
        derive_topic_key(secret, topic)
    }
}

impl std::fmt::Debug for SymmetricEncryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricEncryptor")
            .field("private_topics", &self.private_topics.len())
            .finish_non_exhaustive()
    }
}

impl Encryptor for SymmetricEncryptor {
    fn encrypt(&self, topic: &str, plaintext: &[u8]) -> Result<Vec<u8>, CoreError> {
        Ok(encrypt(&self.key_for(topic), plaintext)?)
    }

    fn decrypt(&self, topic: &str, ciphertext: &[u8]) -> Result<Vec<u8>, CoreError> {
        Ok(decrypt(&self.key_for(topic), ciphertext)?)
    }
}

#[derive(Default)]
struct InMemoryState {
    published: Vec<(String, Vec<u8>)>,
    subscriptions: HashSet<String>,
    failures_left: u32,
    attempts: u32,
}

/// Records publishes instead of sending them. Failures can be scripted to
/// exercise the retry path.
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    inner: Arc<Mutex<InMemoryState>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` publishes fail.
    pub async fn fail_next(&self, n: u32) {
        self.inner.lock().await.failures_left = n;
    }

    /// Successful publishes, in order.
    pub async fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.inner.lock().await.published.clone()
    }

    pub async fn published_on(&self, topic: &str) -> Vec<Vec<u8>> {
        self.inner
            .lock()
            .await
            .published
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, data)| data.clone())
            .collect()
    }

    /// Publish calls including failed ones.
    pub async fn attempts(&self) -> u32 {
        self.inner.lock().await.attempts
    }

    pub async fn subscriptions(&self) -> HashSet<String> {
        self.inner.lock().await.subscriptions.clone()
    }

    pub async fn clear(&self) {
        self.inner.lock().await.published.clear();
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), CoreError> {
        let mut state = self.inner.lock().await;
        state.attempts += 1;
        if state.failures_left > 0 {
            state.failures_left -= 1;
            return Err(CoreError::Transport(format!("scripted failure on {topic}")));
        }
        state.published.push((topic.to_string(), payload));
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), CoreError> {
        self.inner.lock().await.subscriptions.insert(topic.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_keys_are_separated() {
        let encryptor = SymmetricEncryptor::new([7u8; 32]);
        let sealed = encryptor.encrypt("community:aa", b"hello").unwrap();

        assert_eq!(encryptor.decrypt("community:aa", &sealed).unwrap(), b"hello");
        assert!(encryptor.decrypt("community:bb", &sealed).is_err());
    }

    #[test]
    fn private_topic_needs_its_own_secret() {
        let mine = SymmetricEncryptor::new([7u8; 32]).with_private_topic("installations:me", [9u8; 32]);
        let outsider = SymmetricEncryptor::new([7u8; 32]);

        let sealed = mine.encrypt("installations:me", b"private key").unwrap();
        assert!(outsider.decrypt("installations:me", &sealed).is_err());
        assert_eq!(mine.decrypt("installations:me", &sealed).unwrap(), b"private key");
    }

    #[tokio::test]
    async fn scripted_failures_then_success() {
        let transport = InMemoryTransport::new();
        transport.fail_next(1).await;

        assert!(transport.publish("t", vec![1]).await.is_err());
        assert!(transport.publish("t", vec![2]).await.is_ok());

        assert_eq!(transport.attempts().await, 2);
        assert_eq!(transport.published_on("t").await, vec![vec![2]]);
    }
}
