//! Installations of the local identity and the state fan-out between them.
//!
//! Every installation shares the identity key. Messages for siblings travel
//! on the identity's installations topic, and the envelope's
//! `target_installation` says which sibling should act on them.

use std::sync::Arc;

use tracing::{debug, info};

use concord_shared::identity::Identity;
use concord_shared::protocol::{PairInstallation, SyncBookmark, SyncInstallationCommunity, WireMessage};
use concord_shared::types::{InstallationId, MessageId, UserId};
use concord_store::{Bookmark, Installation, InstallationMetadata, RawMessage};

use crate::delivery::DeliveryQueue;
use crate::error::CoreError;
use crate::now_ms;
use crate::SharedDatabase;

pub struct SyncCoordinator {
    db: SharedDatabase,
    queue: Arc<DeliveryQueue>,
    identity: Arc<Identity>,
    installation_id: InstallationId,
}

impl SyncCoordinator {
    pub fn new(
        db: SharedDatabase,
        queue: Arc<DeliveryQueue>,
        identity: Arc<Identity>,
        installation_id: InstallationId,
    ) -> Self {
        Self {
            db,
            queue,
            identity,
            installation_id,
        }
    }

    pub fn installation_id(&self) -> InstallationId {
        self.installation_id
    }

    /// Record (or refresh) the metadata of this installation. The local
    /// installation is always enabled.
    pub async fn set_metadata(&self, metadata: InstallationMetadata) -> Result<Installation, CoreError> {
        let own = Installation {
            id: self.installation_id,
            identity: self.identity.user_id(),
            metadata,
            enabled: true,
            last_synced: 0,
            timestamp: now_ms(),
        };
        let db = self.db.lock().await;
        db.upsert_installation(&own)?;
        db.set_installation_enabled(&own.id, true)?;
        Ok(db.get_installation(&own.id)?)
    }

    /// Register a sibling installation. New installations start disabled.
    pub async fn pair(
        &self,
        id: InstallationId,
        metadata: InstallationMetadata,
    ) -> Result<Installation, CoreError> {
        self.register(id, metadata, now_ms()).await
    }

    async fn register(
        &self,
        id: InstallationId,
        metadata: InstallationMetadata,
        timestamp: u64,
    ) -> Result<Installation, CoreError> {
        if id == self.installation_id {
            return Err(CoreError::Unauthorized(
                "cannot pair the local installation with itself".to_string(),
            ));
        }

        let installation = Installation {
            id,
            identity: self.identity.user_id(),
            metadata,
            enabled: false,
            last_synced: 0,
            timestamp,
        };
        let db = self.db.lock().await;
        if db.upsert_installation(&installation)? {
            info!(installation = %id, name = %installation.metadata.name, "Installation paired");
        }
        Ok(db.get_installation(&id)?)
    }

    /// Announce this installation's metadata to its siblings.
    pub async fn send_pair_installation(&self) -> Result<MessageId, CoreError> {
        let own = self
            .db
            .lock()
            .await
            .find_installation(&self.installation_id)?
            .ok_or_else(|| CoreError::NotFound(format!("installation {}", self.installation_id)))?;

        let message = WireMessage::PairInstallation(PairInstallation {
            installation_id: own.id,
            name: own.metadata.name,
            device_type: own.metadata.device_type,
            clock: now_ms(),
        });

        self.queue.send(self.raw_for_siblings(&message)?).await
    }

    /// Handle a sibling's announcement. Anything not sent by this identity
    /// is ignored.
    pub async fn handle_pair_installation(
        &self,
        sender: &UserId,
        message: &PairInstallation,
    ) -> Result<Option<Installation>, CoreError> {
        if *sender != self.identity.user_id() || message.installation_id == self.installation_id {
            return Ok(None);
        }
        let metadata = InstallationMetadata {
            name: message.name.clone(),
            device_type: message.device_type.clone(),
        };
        self.register(message.installation_id, metadata, message.clock)
            .await
            .map(Some)
    }

    /// Enable an installation for fan-out and queue a full replay of
    /// communities and bookmarks addressed to it.
    pub async fn enable(&self, id: &InstallationId) -> Result<Vec<MessageId>, CoreError> {
        let (communities, bookmarks) = {
            let db = self.db.lock().await;
            if !db.set_installation_enabled(id, true)? {
                return Err(CoreError::NotFound(format!("installation {id}")));
            }
            (db.list_communities()?, db.list_bookmarks()?)
        };

        let mut replay = Vec::with_capacity(communities.len() + bookmarks.len());
        for community in communities {
            replay.push(WireMessage::SyncInstallationCommunity(SyncInstallationCommunity {
                description: community.description,
                private_key: community.private_key,
                joined: community.joined,
                clock: community.joined_clock,
            }));
        }
        for bookmark in bookmarks {
            replay.push(bookmark_message(&bookmark));
        }

        let mut sent = Vec::with_capacity(replay.len());
        for message in &replay {
            let mut raw = self.raw_for_siblings(message)?;
            raw.target_installation = Some(*id);
            sent.push(self.queue.send(raw).await?);
        }

        self.db.lock().await.set_installation_synced(id, now_ms())?;
        info!(installation = %id, replayed = sent.len(), "Installation enabled");
        Ok(sent)
    }

    /// Exclude an installation from fan-out. Its sync watermark is kept.
    pub async fn disable(&self, id: &InstallationId) -> Result<(), CoreError> {
        if !self.db.lock().await.set_installation_enabled(id, false)? {
            return Err(CoreError::NotFound(format!("installation {id}")));
        }
        info!(installation = %id, "Installation disabled");
        Ok(())
    }

    /// Queue one message per enabled sibling installation.
    pub async fn broadcast_to_installations(
        &self,
        message: &WireMessage,
    ) -> Result<Vec<MessageId>, CoreError> {
        let targets: Vec<InstallationId> = self
            .db
            .lock()
            .await
            .list_installations(&self.identity.user_id())?
            .into_iter()
            .filter(|i| i.enabled && i.id != self.installation_id)
            .map(|i| i.id)
            .collect();

        let mut sent = Vec::with_capacity(targets.len());
        for target in targets {
            let mut raw = self.raw_for_siblings(message)?;
            raw.target_installation = Some(target);
            sent.push(self.queue.send(raw).await?);
        }

        debug!(kind = ?message.message_type(), fan_out = sent.len(), "Broadcast to installations");
        Ok(sent)
    }

    /// Store a bookmark change locally and push it to enabled siblings.
    pub async fn sync_bookmark(&self, bookmark: &Bookmark) -> Result<Vec<MessageId>, CoreError> {
        if !self.db.lock().await.save_bookmark_if_newer(bookmark)? {
            debug!(url = %bookmark.url, "Bookmark not newer than stored copy");
            return Ok(Vec::new());
        }
        self.broadcast_to_installations(&bookmark_message(bookmark))
            .await
    }

    /// Apply a sibling's bookmark change if it is strictly newer.
    pub async fn handle_sync_bookmark(
        &self,
        sender: &UserId,
        message: &SyncBookmark,
    ) -> Result<Option<Bookmark>, CoreError> {
        if *sender != self.identity.user_id() {
            return Ok(None);
        }
        let bookmark = Bookmark {
            url: message.url.clone(),
            name: message.name.clone(),
            image_url: message.image_url.clone(),
            removed: message.removed,
            clock: message.clock,
        };
        if self.db.lock().await.save_bookmark_if_newer(&bookmark)? {
            Ok(Some(bookmark))
        } else {
            Ok(None)
        }
    }

    pub async fn installations(&self) -> Result<Vec<Installation>, CoreError> {
        Ok(self
            .db
            .lock()
            .await
            .list_installations(&self.identity.user_id())?)
    }

    pub async fn bookmarks(&self) -> Result<Vec<Bookmark>, CoreError> {
        Ok(self.db.lock().await.list_bookmarks()?)
    }

    fn raw_for_siblings(&self, message: &WireMessage) -> Result<RawMessage, CoreError> {
        let mut raw = RawMessage::new(
            self.identity.user_id().installations_topic(),
            message.message_type(),
            message.to_bytes()?,
        );
        raw.skip_group_message_wrap = true;
        Ok(raw)
    }
}

fn bookmark_message(bookmark: &Bookmark) -> WireMessage {
    WireMessage::SyncBookmark(SyncBookmark {
        url: bookmark.url.clone(),
        name: bookmark.name.clone(),
        image_url: bookmark.image_url.clone(),
        removed: bookmark.removed,
        clock: bookmark.clock,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_shared::protocol::MessageType;
    use concord_store::Database;
    use tokio::sync::Mutex;

    use crate::delivery::DeliveryPolicy;
    use crate::transport::{InMemoryTransport, SymmetricEncryptor};

    struct Fixture {
        db: SharedDatabase,
        transport: InMemoryTransport,
        sync: SyncCoordinator,
    }

    async fn fixture() -> Fixture {
        let db: SharedDatabase = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let transport = InMemoryTransport::new();
        let identity = Arc::new(Identity::generate());
        let own = InstallationId::new();
        let queue = Arc::new(DeliveryQueue::new(
            Arc::clone(&db),
            Arc::new(transport.clone()),
            Arc::new(SymmetricEncryptor::new([1u8; 32])),
            Arc::clone(&identity),
            own,
            DeliveryPolicy::default(),
        ));
        let sync = SyncCoordinator::new(Arc::clone(&db), queue, identity, own);
        sync.set_metadata(metadata("desktop")).await.unwrap();
        Fixture { db, transport, sync }
    }

    fn metadata(name: &str) -> InstallationMetadata {
        InstallationMetadata {
            name: name.to_string(),
            device_type: "test".to_string(),
        }
    }

    fn bookmark(removed: bool, clock: u64) -> Bookmark {
        Bookmark {
            url: "https://status.im".to_string(),
            name: "status".to_string(),
            image_url: String::new(),
            removed,
            clock,
        }
    }

    async fn bookmark_messages(db: &SharedDatabase) -> Vec<RawMessage> {
        db.lock()
            .await
            .list_raw_messages()
            .unwrap()
            .into_iter()
            .filter(|m| m.message_type == MessageType::SyncBookmark)
            .collect()
    }

    #[tokio::test]
    async fn paired_installation_starts_disabled() {
        let f = fixture().await;
        let phone = f.sync.pair(InstallationId::new(), metadata("phone")).await.unwrap();
        assert!(!phone.enabled);

        let all = f.sync.installations().await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|i| i.id == f.sync.installation_id() && i.enabled));
    }

    #[tokio::test]
    async fn broadcast_skips_disabled_and_origin() {
        let f = fixture().await;
        let second = InstallationId::new();
        f.sync.pair(second, metadata("laptop")).await.unwrap();

        assert!(f.sync.sync_bookmark(&bookmark(false, 1)).await.unwrap().is_empty());

        f.sync.enable(&second).await.unwrap();
        let targeted = |messages: &[RawMessage]| {
            messages
                .iter()
                .filter(|m| m.target_installation == Some(second))
                .count()
        };
        let before = targeted(&bookmark_messages(&f.db).await);
        assert_eq!(before, 1);

        f.sync.sync_bookmark(&bookmark(false, 2)).await.unwrap();

        let messages = bookmark_messages(&f.db).await;
        assert_eq!(targeted(&messages), before + 1);
        assert_eq!(messages.len(), before + 1);
        assert!(messages
            .iter()
            .all(|m| m.target_installation != Some(f.sync.installation_id())));
    }

    #[tokio::test]
    async fn enabling_second_installation_then_bookmark_yields_one_message() {
        let f = fixture().await;
        let second = InstallationId::new();
        f.sync.pair(second, metadata("laptop")).await.unwrap();
        assert!(f.sync.enable(&second).await.unwrap().is_empty());

        f.sync.sync_bookmark(&bookmark(false, 1)).await.unwrap();

        let messages = bookmark_messages(&f.db).await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].target_installation, Some(second));
    }

    #[tokio::test]
    async fn enable_replays_existing_state() {
        let f = fixture().await;
        f.sync.sync_bookmark(&bookmark(false, 1)).await.unwrap();

        let second = InstallationId::new();
        f.sync.pair(second, metadata("laptop")).await.unwrap();
        let replayed = f.sync.enable(&second).await.unwrap();
        assert_eq!(replayed.len(), 1);

        let installation = f.db.lock().await.get_installation(&second).unwrap();
        assert!(installation.enabled);
        assert!(installation.last_synced > 0);

        f.sync.disable(&second).await.unwrap();
        let installation = f.db.lock().await.get_installation(&second).unwrap();
        assert!(!installation.enabled);
        assert!(installation.last_synced > 0);
        let topic = f.sync.identity.user_id().installations_topic();
        assert_eq!(f.transport.published_on(&topic).await.len(), 1);
    }

    #[tokio::test]
    async fn enable_unknown_is_not_found() {
        let f = fixture().await;
        assert!(matches!(
            f.sync.enable(&InstallationId::new()).await,
            Err(CoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn bookmark_last_write_wins() {
        let f = fixture().await;
        let own = f.sync.identity.user_id();
        let update = |removed, clock| SyncBookmark {
            url: "https://status.im".to_string(),
            name: "status".to_string(),
            image_url: String::new(),
            removed,
            clock,
        };

        assert!(f.sync.handle_sync_bookmark(&own, &update(false, 1)).await.unwrap().is_some());
        assert!(f.sync.handle_sync_bookmark(&own, &update(true, 2)).await.unwrap().is_some());
        assert!(f.sync.handle_sync_bookmark(&own, &update(false, 2)).await.unwrap().is_none());
        assert!(f.sync.bookmarks().await.unwrap()[0].removed);

        assert!(f.sync.handle_sync_bookmark(&own, &update(false, 3)).await.unwrap().is_some());
        assert!(!f.sync.bookmarks().await.unwrap()[0].removed);

        let stranger = UserId([4u8; 32]);
        assert!(f
            .sync
            .handle_sync_bookmark(&stranger, &update(true, 10))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn pairing_message_from_sibling() {
        let f = fixture().await;
        let own = f.sync.identity.user_id();
        let sibling = InstallationId::new();
        let message = PairInstallation {
            installation_id: sibling,
            name: "tablet".to_string(),
            device_type: "ios".to_string(),
            clock: 5,
        };

        let paired = f.sync.handle_pair_installation(&own, &message).await.unwrap().unwrap();
        assert!(!paired.enabled);
        assert_eq!(paired.metadata.name, "tablet");

        assert!(f
            .sync
            .handle_pair_installation(&UserId([4u8; 32]), &message)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn pair_announcement_goes_to_installations_topic() {
        let f = fixture().await;
        f.sync.send_pair_installation().await.unwrap();

        let topic = f.sync.identity.user_id().installations_topic();
        assert_eq!(f.transport.published_on(&topic).await.len(), 1);
    }
}
