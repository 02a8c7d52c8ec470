//! The node-facing facade: user intents in, protocol messages out, and the
//! callback for payloads received from the transport.

use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use concord_shared::constants::SEEN_MESSAGES_CAPACITY;
use concord_shared::identity::Identity;
use concord_shared::protocol::{
    CommunityInvitation, ImageShare, RequestToJoin, SyncInstallationCommunity,
    WireMessage,
};
use concord_shared::types::{CommunityId, InstallationId, MessageId, RequestId, UserId};
use concord_store::{Bookmark, Installation, InstallationMetadata, JoinRequest, RawMessage};

use crate::communities::{parse_community_id, ApplyOutcome, Community, CommunityManager};
use crate::delivery::{DeliveryPolicy, DeliveryQueue, Frame};
use crate::error::CoreError;
use crate::membership::MembershipEngine;
use crate::multidevice::SyncCoordinator;
use crate::requests::{
    CreateCommunity, CreateCommunityCategory, CreateCommunityChat, DeleteCommunityCategory,
    EditCommunity, RequestToJoinCommunity, ShareCommunity, ShareImageMessage,
};
use crate::transport::{Encryptor, Transport};
use crate::SharedDatabase;

/// What an inbound payload turned into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// A newer description was merged.
    CommunityUpdated(Community),
    /// Someone shared a community with us.
    CommunityInvitation { from: UserId, community: Community },
    /// A join request for a community we control.
    JoinRequestReceived(JoinRequest),
    /// The key holder answered our join request.
    JoinResponse(JoinRequest),
    InstallationPaired(Installation),
    CommunitySynced(Community),
    BookmarkSynced(Bookmark),
    ImageShared {
        from: UserId,
        message_id: String,
        text: String,
    },
    /// Already processed.
    Duplicate,
    /// Undecodable, unauthorized, stale, or addressed to someone else.
    Ignored,
}

pub struct Messenger {
    identity: Arc<Identity>,
    installation_id: InstallationId,
    communities: Arc<CommunityManager>,
    membership: MembershipEngine,
    queue: Arc<DeliveryQueue>,
    sync: SyncCoordinator,
    transport: Arc<dyn Transport>,
    encryptor: Arc<dyn Encryptor>,
    seen: Mutex<LruCache<MessageId, ()>>,
}

impl Messenger {
    pub fn new(
        db: SharedDatabase,
        identity: Arc<Identity>,
        installation_id: InstallationId,
        transport: Arc<dyn Transport>,
        encryptor: Arc<dyn Encryptor>,
        policy: DeliveryPolicy,
    ) -> Self {
        let communities = Arc::new(CommunityManager::new(Arc::clone(&db), Arc::clone(&identity)));
        let membership = MembershipEngine::new(Arc::clone(&db), Arc::clone(&communities));
        let queue = Arc::new(DeliveryQueue::new(
            Arc::clone(&db),
            Arc::clone(&transport),
            Arc::clone(&encryptor),
            Arc::clone(&identity),
            installation_id,
            policy,
        ));
        let sync = SyncCoordinator::new(db, Arc::clone(&queue), Arc::clone(&identity), installation_id);
        let capacity = NonZeroUsize::new(SEEN_MESSAGES_CAPACITY).unwrap_or(NonZeroUsize::MIN);

        Self {
            identity,
            installation_id,
            communities,
            membership,
            queue,
            sync,
            transport,
            encryptor,
            seen: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn user_id(&self) -> UserId {
        self.identity.user_id()
    }

    pub fn installation_id(&self) -> InstallationId {
        self.installation_id
    }

    /// The delivery queue, for driving [`DeliveryQueue::run`].
    pub fn queue(&self) -> Arc<DeliveryQueue> {
        Arc::clone(&self.queue)
    }

    // -----------------------------------------------------------------------
    // Communities
    // -----------------------------------------------------------------------

    pub async fn create_community(&self, request: &CreateCommunity) -> Result<Community, CoreError> {
        let community = self.communities.create_community(request).await?;
        self.subscribe_logged(&community.id.to_topic()).await;
        self.announce(&community).await?;
        Ok(community)
    }

    pub async fn edit_community(&self, request: &EditCommunity) -> Result<Community, CoreError> {
        let community = self.communities.edit_community(request).await?;
        self.announce(&community).await?;
        Ok(community)
    }

    pub async fn create_category(
        &self,
        request: &CreateCommunityCategory,
    ) -> Result<Community, CoreError> {
        let community = self.communities.create_category(request).await?;
        self.announce(&community).await?;
        Ok(community)
    }

    pub async fn delete_category(
        &self,
        request: &DeleteCommunityCategory,
    ) -> Result<Community, CoreError> {
        let community = self.communities.delete_category(request).await?;
        self.announce(&community).await?;
        Ok(community)
    }

    pub async fn create_chat(&self, request: &CreateCommunityChat) -> Result<Community, CoreError> {
        let community = self.communities.create_chat(request).await?;
        self.announce(&community).await?;
        Ok(community)
    }

    pub async fn communities(&self) -> Result<Vec<Community>, CoreError> {
        self.communities.all().await
    }

    pub async fn community(&self, id: &CommunityId) -> Result<Community, CoreError> {
        self.communities.get(id).await
    }

    pub async fn join_community(&self, id: &CommunityId) -> Result<Community, CoreError> {
        let community = self.communities.join(id).await?;
        self.subscribe_logged(&id.to_topic()).await;
        self.sync_community(&community).await?;
        Ok(community)
    }

    pub async fn leave_community(&self, id: &CommunityId) -> Result<Community, CoreError> {
        let community = self.communities.leave(id).await?;
        self.sync_community(&community).await?;
        Ok(community)
    }

    /// Send the community's current description to a set of users.
    pub async fn share_community(&self, request: &ShareCommunity) -> Result<MessageId, CoreError> {
        request.validate()?;
        let id = parse_community_id(&request.community_id)?;
        let community = self.communities.get(&id).await?;

        let message = WireMessage::CommunityInvitation(CommunityInvitation {
            description: community.signed,
        });
        let mut raw = RawMessage::new(id.to_topic(), message.message_type(), message.to_bytes()?);
        raw.recipients = request.users.clone();
        raw.send_push_notification = true;

        info!(community = %id.short(), users = request.users.len(), "Sharing community");
        self.queue.send(raw).await
    }

    pub async fn share_image_message(
        &self,
        request: &ShareImageMessage,
    ) -> Result<MessageId, CoreError> {
        request.validate()?;

        let message = WireMessage::ImageShare(ImageShare {
            message_id: request.message_id.clone(),
            text: request.text.clone(),
        });
        let mut raw = RawMessage::new(
            self.user_id().personal_topic(),
            message.message_type(),
            message.to_bytes()?,
        );
        raw.recipients = request.users.clone();
        raw.send_push_notification = true;
        self.queue.send(raw).await
    }

    // -----------------------------------------------------------------------
    // Membership
    // -----------------------------------------------------------------------

    /// Record a join request and send it on the community topic, where the
    /// key holder listens.
    pub async fn request_to_join(
        &self,
        request: &RequestToJoinCommunity,
    ) -> Result<JoinRequest, CoreError> {
        let join_request = self
            .membership
            .request_to_join(request, self.user_id())
            .await?;

        let message = WireMessage::RequestToJoin(RequestToJoin {
            community_id: join_request.community_id,
            ens_name: join_request.ens_name.clone(),
            clock: join_request.clock,
        });
        let raw = RawMessage::new(
            join_request.community_id.to_topic(),
            message.message_type(),
            message.to_bytes()?,
        );
        self.queue.send(raw).await?;
        Ok(join_request)
    }

    /// Admit a requester, publish the new description and tell the requester.
    pub async fn approve_join_request(&self, id: &RequestId) -> Result<JoinRequest, CoreError> {
        let (request, community) = self.membership.approve(id).await?;
        self.announce(&community).await?;
        self.respond(&request).await?;
        Ok(request)
    }

    pub async fn reject_join_request(&self, id: &RequestId) -> Result<JoinRequest, CoreError> {
        let request = self.membership.reject(id).await?;
        self.respond(&request).await?;
        Ok(request)
    }

    pub async fn pending_join_requests(
        &self,
        community_id: &CommunityId,
    ) -> Result<Vec<JoinRequest>, CoreError> {
        self.membership.pending_requests(community_id).await
    }

    async fn respond(&self, request: &JoinRequest) -> Result<MessageId, CoreError> {
        let message =
            WireMessage::RequestToJoinResponse(self.membership.response_for(request).await?);
        let mut raw = RawMessage::new(
            request.community_id.to_topic(),
            message.message_type(),
            message.to_bytes()?,
        );
        raw.recipients = vec![request.requester];
        self.queue.send(raw).await
    }

    // -----------------------------------------------------------------------
    // Installations
    // -----------------------------------------------------------------------

    /// Record this device's metadata and announce it to sibling installations.
    pub async fn set_installation_metadata(
        &self,
        metadata: InstallationMetadata,
    ) -> Result<Installation, CoreError> {
        let own = self.sync.set_metadata(metadata).await?;
        self.sync.send_pair_installation().await?;
        Ok(own)
    }

    pub async fn pair_installation(
        &self,
        id: InstallationId,
        metadata: InstallationMetadata,
    ) -> Result<Installation, CoreError> {
        self.sync.pair(id, metadata).await
    }

    pub async fn enable_installation(&self, id: &InstallationId) -> Result<(), CoreError> {
        self.sync.enable(id).await.map(|_| ())
    }

    pub async fn disable_installation(&self, id: &InstallationId) -> Result<(), CoreError> {
        self.sync.disable(id).await
    }

    pub async fn installations(&self) -> Result<Vec<Installation>, CoreError> {
        self.sync.installations().await
    }

    pub async fn sync_bookmark(&self, bookmark: &Bookmark) -> Result<(), CoreError> {
        self.sync.sync_bookmark(bookmark).await.map(|_| ())
    }

    pub async fn bookmarks(&self) -> Result<Vec<Bookmark>, CoreError> {
        self.sync.bookmarks().await
    }

    // -----------------------------------------------------------------------
    // Delivery
    // -----------------------------------------------------------------------

    pub async fn send(&self, message: RawMessage) -> Result<MessageId, CoreError> {
        self.queue.send(message).await
    }

    /// Every topic this node should be subscribed to: its personal and
    /// installations topics plus the topic of every known community.
    pub async fn topics(&self) -> Result<BTreeSet<String>, CoreError> {
        let own = self.user_id();
        let mut topics = BTreeSet::from([own.personal_topic(), own.installations_topic()]);
        for community in self.communities.all().await? {
            topics.insert(community.id.to_topic());
        }
        Ok(topics)
    }

    pub async fn subscribe_all(&self) -> Result<(), CoreError> {
        for topic in self.topics().await? {
            self.transport.subscribe(&topic).await?;
        }
        Ok(())
    }

    async fn subscribe_logged(&self, topic: &str) {
        if let Err(e) = self.transport.subscribe(topic).await {
            warn!(topic, error = %e, "Subscribe failed");
        }
    }

    /// Publish a changed description on its topic and replay it to the
    /// other installations of this identity.
    async fn announce(&self, community: &Community) -> Result<(), CoreError> {
        let message = WireMessage::CommunityDescription(community.signed.clone());
        let raw = RawMessage::new(
            community.id.to_topic(),
            message.message_type(),
            message.to_bytes()?,
        );
        self.queue.send(raw).await?;
        self.sync_community(community).await
    }

    async fn sync_community(&self, community: &Community) -> Result<(), CoreError> {
        let message = WireMessage::SyncInstallationCommunity(SyncInstallationCommunity {
            description: community.signed.clone(),
            private_key: community.private_key,
            joined: community.joined,
            clock: community.joined_clock,
        });
        self.sync.broadcast_to_installations(&message).await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Process one payload received on `topic`.
    ///
    /// Remote input that fails to decode, verify or pass authorization is
    /// dropped as [`InboundEvent::Ignored`]. Only local failures such as a
    /// database error are returned as `Err`.
    pub async fn handle_inbound(&self, topic: &str, bytes: &[u8]) -> Result<InboundEvent, CoreError> {
        let envelope = match Frame::open(bytes, topic, self.encryptor.as_ref())
            .and_then(|signed| signed.open().map_err(CoreError::from))
        {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(topic, error = %e, "Dropping unreadable payload");
                return Ok(InboundEvent::Ignored);
            }
        };

        if self.seen.lock().await.put(envelope.message_id, ()).is_some() {
            return Ok(InboundEvent::Duplicate);
        }
        if envelope.sender == self.user_id() && envelope.origin_installation == self.installation_id {
            return Ok(InboundEvent::Ignored);
        }
        if envelope
            .target_installation
            .is_some_and(|target| target != self.installation_id)
        {
            return Ok(InboundEvent::Ignored);
        }

        let message = match WireMessage::from_bytes(&envelope.payload) {
            Ok(m) => m,
            Err(e) => {
                debug!(topic, error = %e, "Dropping undecodable message");
                return Ok(InboundEvent::Ignored);
            }
        };

        let kind = message.message_type();
        match self.dispatch(envelope.sender, message).await {
            Ok(event) => Ok(event),
            Err(e) if e.is_retryable() => {
                // Not processed, so a redelivery must not count as a duplicate.
                self.seen.lock().await.pop(&envelope.message_id);
                Err(e)
            }
            Err(e) => {
                debug!(kind = ?kind, sender = %envelope.sender.short(), error = %e, "Discarding inbound message");
                Ok(InboundEvent::Ignored)
            }
        }
    }

    async fn dispatch(&self, sender: UserId, message: WireMessage) -> Result<InboundEvent, CoreError> {
        let own = self.user_id();

        let event = match message {
            WireMessage::CommunityDescription(signed) => {
                match self.communities.apply_remote(&signed).await? {
                    ApplyOutcome::Applied(community) => InboundEvent::CommunityUpdated(community),
                    ApplyOutcome::Stale | ApplyOutcome::Rejected => InboundEvent::Ignored,
                }
            }

            WireMessage::CommunityInvitation(invitation) => {
                let id = invitation.description.community_id;
                match self.communities.apply_remote(&invitation.description).await? {
                    ApplyOutcome::Rejected => InboundEvent::Ignored,
                    ApplyOutcome::Applied(_) | ApplyOutcome::Stale => {
                        self.subscribe_logged(&id.to_topic()).await;
                        InboundEvent::CommunityInvitation {
                            from: sender,
                            community: self.communities.get(&id).await?,
                        }
                    }
                }
            }

            WireMessage::RequestToJoin(request) => self
                .membership
                .handle_remote_request(sender, &request)
                .await?
                .map_or(InboundEvent::Ignored, InboundEvent::JoinRequestReceived),

            WireMessage::RequestToJoinResponse(response) => {
                match self.membership.handle_response(&own, &response).await? {
                    Some(request) => {
                        if let Ok(community) = self.communities.get(&request.community_id).await {
                            self.sync_community(&community).await?;
                        }
                        InboundEvent::JoinResponse(request)
                    }
                    None => InboundEvent::Ignored,
                }
            }

            WireMessage::PairInstallation(pair) => self
                .sync
                .handle_pair_installation(&sender, &pair)
                .await?
                .map_or(InboundEvent::Ignored, InboundEvent::InstallationPaired),

            WireMessage::SyncInstallationCommunity(sync) => {
                if sender != own {
                    return Ok(InboundEvent::Ignored);
                }
                let id = sync.description.community_id;
                match self
                    .communities
                    .save_synced(&sync.description, sync.private_key, sync.joined, sync.clock)
                    .await?
                {
                    ApplyOutcome::Rejected => InboundEvent::Ignored,
                    ApplyOutcome::Applied(_) | ApplyOutcome::Stale => {
                        self.subscribe_logged(&id.to_topic()).await;
                        InboundEvent::CommunitySynced(self.communities.get(&id).await?)
                    }
                }
            }

            WireMessage::SyncBookmark(bookmark) => self
                .sync
                .handle_sync_bookmark(&sender, &bookmark)
                .await?
                .map_or(InboundEvent::Ignored, InboundEvent::BookmarkSynced),

            WireMessage::ImageShare(share) => InboundEvent::ImageShared {
                from: sender,
                message_id: share.message_id,
                text: share.text,
            },
        };

        Ok(event)
    }
}
