//! Community state: creation and edits by the key holder, and the single
//! merge path for descriptions received from peers.
//!
//! Every description that reaches the database through this module is
//! signed by the community key. Remote descriptions go through
//! [`CommunityManager::apply_remote`], which is the only place where the
//! signature and last-writer-wins rules are checked. Edits and remote
//! applies for one community are serialized by a per-community lock.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use concord_shared::description::{Category, CommunityChat, CommunityDescription, SignedDescription};
use concord_shared::identity::Identity;
use concord_shared::types::{CategoryId, ChannelId, CommunityId, UserId};
use concord_store::CommunityRecord;

use crate::error::CoreError;
use crate::now_ms;
use crate::requests::{
    CreateCommunity, CreateCommunityCategory, CreateCommunityChat, DeleteCommunityCategory,
    EditCommunity,
};
use crate::SharedDatabase;

/// A locally known community with its decoded description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Community {
    pub id: CommunityId,
    /// Present only on the node that controls the community.
    pub private_key: Option<[u8; 32]>,
    pub signed: SignedDescription,
    pub description: CommunityDescription,
    pub joined: bool,
    pub joined_clock: u64,
}

impl Community {
    fn from_record(record: CommunityRecord) -> Result<Self, CoreError> {
        let description = record.description.description()?;
        Ok(Self {
            id: record.id,
            private_key: record.private_key,
            signed: record.description,
            description,
            joined: record.joined,
            joined_clock: record.joined_clock,
        })
    }

    pub fn clock(&self) -> u64 {
        self.description.clock
    }

    pub fn name(&self) -> &str {
        &self.description.identity.display_name
    }

    pub fn is_controlled(&self) -> bool {
        self.private_key.is_some()
    }
}

/// Result of merging a description received from a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The description was newer and is now stored.
    Applied(Community),
    /// Not newer than what is stored; nothing changed.
    Stale,
    /// Bad signature or undecodable payload; nothing changed.
    Rejected,
}

/// Turn a raw request id into a community id. An id of the wrong length can
/// never name a known community.
pub(crate) fn parse_community_id(raw: &[u8]) -> Result<CommunityId, CoreError> {
    CommunityId::from_slice(raw)
        .map_err(|_| CoreError::NotFound(format!("community {}", hex::encode(raw))))
}

pub struct CommunityManager {
    db: SharedDatabase,
    identity: Arc<Identity>,
    locks: Mutex<HashMap<CommunityId, Arc<Mutex<()>>>>,
}

impl CommunityManager {
    pub fn new(db: SharedDatabase, identity: Arc<Identity>) -> Self {
        Self {
            db,
            identity,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock(&self, id: &CommunityId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(*id).or_default())
        };
        lock.lock_owned().await
    }

    // -----------------------------------------------------------------------
    // Key holder operations
    // -----------------------------------------------------------------------

    pub async fn create_community(&self, request: &CreateCommunity) -> Result<Community, CoreError> {
        request.validate()?;

        let community_key = Identity::generate();
        let description = CommunityDescription::new(
            request.name.clone(),
            request.description.clone(),
            request.access,
            self.identity.user_id(),
        );
        let signed = SignedDescription::sign(&community_key, &description)?;

        let record = CommunityRecord {
            id: signed.community_id,
            description: signed,
            clock: description.clock,
            private_key: Some(*community_key.secret_bytes()),
            joined: true,
            joined_clock: now_ms(),
            created_at: Utc::now(),
        };
        self.db.lock().await.save_community(&record)?;

        info!(community = %record.id.short(), name = %request.name, "Created community");
        Community::from_record(record)
    }

    pub async fn edit_community(&self, request: &EditCommunity) -> Result<Community, CoreError> {
        request.validate()?;
        let id = parse_community_id(&request.community_id)?;

        self.mutate(&id, |description| {
            description.identity.display_name = request.name.clone();
            description.identity.description = request.description.clone();
            description.permissions.access = request.access;
            Ok(())
        })
        .await
    }

    pub async fn create_category(
        &self,
        request: &CreateCommunityCategory,
    ) -> Result<Community, CoreError> {
        request.validate()?;
        let id = parse_community_id(&request.community_id)?;

        self.mutate(&id, |description| {
            if let Some(missing) = request
                .chat_ids
                .iter()
                .find(|chat| !description.chats.contains_key(chat))
            {
                return Err(CoreError::NotFound(format!("chat {missing}")));
            }

            let category_id = CategoryId::new();
            for chat_id in &request.chat_ids {
                detach_chat(description, chat_id);
                if let Some(chat) = description.chats.get_mut(chat_id) {
                    chat.category_id = Some(category_id);
                }
            }

            let position = description.categories.len() as u32;
            description.categories.insert(
                category_id,
                Category {
                    id: category_id,
                    name: request.category_name.clone(),
                    position,
                    chat_ids: request.chat_ids.clone(),
                },
            );
            Ok(())
        })
        .await
    }

    pub async fn delete_category(
        &self,
        request: &DeleteCommunityCategory,
    ) -> Result<Community, CoreError> {
        request.validate()?;
        let id = parse_community_id(&request.community_id)?;
        let category_id = Uuid::parse_str(&request.category_id)
            .map(CategoryId)
            .map_err(|_| CoreError::NotFound(format!("category {}", request.category_id)))?;

        self.mutate(&id, |description| {
            let removed = description
                .categories
                .remove(&category_id)
                .ok_or_else(|| CoreError::NotFound(format!("category {category_id}")))?;

            for chat_id in &removed.chat_ids {
                if let Some(chat) = description.chats.get_mut(chat_id) {
                    chat.category_id = None;
                }
            }

            // Keep positions dense.
            let mut ordered: Vec<_> = description.categories.values_mut().collect();
            ordered.sort_by_key(|c| c.position);
            for (position, category) in ordered.into_iter().enumerate() {
                category.position = position as u32;
            }
            Ok(())
        })
        .await
    }

    pub async fn create_chat(&self, request: &CreateCommunityChat) -> Result<Community, CoreError> {
        request.validate()?;
        let id = parse_community_id(&request.community_id)?;

        self.mutate(&id, |description| {
            let chat_id = ChannelId::new();
            if let Some(category_id) = request.category_id {
                let category = description
                    .categories
                    .get_mut(&category_id)
                    .ok_or_else(|| CoreError::NotFound(format!("category {category_id}")))?;
                category.chat_ids.push(chat_id);
            }

            description.chats.insert(
                chat_id,
                CommunityChat {
                    id: chat_id,
                    name: request.name.clone(),
                    category_id: request.category_id,
                },
            );
            Ok(())
        })
        .await
    }

    pub async fn add_members(&self, id: &CommunityId, users: &[UserId]) -> Result<Community, CoreError> {
        self.mutate(id, |description| {
            description.members.extend(users.iter().copied());
            Ok(())
        })
        .await
    }

    /// Removing a member is a membership change, never a deletion.
    pub async fn remove_member(&self, id: &CommunityId, user: &UserId) -> Result<Community, CoreError> {
        self.mutate(id, |description| {
            if !description.members.remove(user) {
                return Err(CoreError::NotFound(format!("member {}", user.short())));
            }
            Ok(())
        })
        .await
    }

    /// Read-modify-write of a controlled community under its lock. The clock
    /// is bumped and the result re-signed before it is persisted.
    async fn mutate<F>(&self, id: &CommunityId, apply: F) -> Result<Community, CoreError>
    where
        F: FnOnce(&mut CommunityDescription) -> Result<(), CoreError>,
    {
        let _guard = self.lock(id).await;

        let mut record = self
            .db
            .lock()
            .await
            .find_community(id)?
            .ok_or_else(|| CoreError::NotFound(format!("community {}", id.short())))?;

        let private_key = record.private_key.ok_or_else(|| {
            CoreError::Unauthorized(format!("no private key for community {}", id.short()))
        })?;
        let community_key = Identity::from_secret_bytes(&private_key);

        let mut description = record.description.description()?;
        apply(&mut description)?;
        // Strictly above the stored clock and never behind wall-clock millis.
        description.clock = (record.clock + 1).max(now_ms());

        record.description = SignedDescription::sign(&community_key, &description)?;
        record.clock = description.clock;
        self.db.lock().await.save_community(&record)?;

        debug!(community = %id.short(), clock = record.clock, "Community description updated");
        Community::from_record(record)
    }

    // -----------------------------------------------------------------------
    // Remote merge
    // -----------------------------------------------------------------------

    /// Merge a description received from a peer.
    ///
    /// The community id is the verification key, so the same check covers
    /// known and unknown communities. Rejections and stale versions are not
    /// errors; only persistence failures are returned as `Err`.
    pub async fn apply_remote(&self, signed: &SignedDescription) -> Result<ApplyOutcome, CoreError> {
        let id = signed.community_id;
        let _guard = self.lock(&id).await;
        self.apply_locked(signed).await
    }

    async fn apply_locked(&self, signed: &SignedDescription) -> Result<ApplyOutcome, CoreError> {
        let id = signed.community_id;

        if let Err(e) = signed.verify_self() {
            warn!(community = %id.short(), error = %e, "Discarding badly signed description");
            return Ok(ApplyOutcome::Rejected);
        }

        let description = match signed.description() {
            Ok(d) => d,
            Err(e) => {
                warn!(community = %id.short(), error = %e, "Discarding undecodable description");
                return Ok(ApplyOutcome::Rejected);
            }
        };

        let db = self.db.lock().await;
        if let Some(existing) = db.find_community(&id)? {
            if description.clock <= existing.clock {
                debug!(
                    community = %id.short(),
                    incoming = description.clock,
                    stored = existing.clock,
                    "Ignoring stale description"
                );
                return Ok(ApplyOutcome::Stale);
            }
        }

        if !db.save_community_description_if_newer(&id, signed, description.clock)? {
            return Ok(ApplyOutcome::Stale);
        }
        let record = db.get_community(&id)?;
        drop(db);

        info!(community = %id.short(), clock = description.clock, "Applied remote description");
        Ok(ApplyOutcome::Applied(Community::from_record(record)?))
    }

    /// Store a community replayed by another installation of this identity,
    /// together with the key and joined state that installation holds. The
    /// joined flag only changes when `joined_clock` is newer than the last
    /// local join or leave.
    pub async fn save_synced(
        &self,
        signed: &SignedDescription,
        private_key: Option<[u8; 32]>,
        joined: bool,
        joined_clock: u64,
    ) -> Result<ApplyOutcome, CoreError> {
        let id = signed.community_id;

        if let Some(key) = private_key {
            if Identity::from_secret_bytes(&key).public_key_bytes() != id.0 {
                warn!(community = %id.short(), "Synced private key does not match community");
                return Ok(ApplyOutcome::Rejected);
            }
        }

        let _guard = self.lock(&id).await;
        let outcome = self.apply_locked(signed).await?;
        if outcome == ApplyOutcome::Rejected {
            return Ok(outcome);
        }

        let db = self.db.lock().await;
        if let Some(key) = private_key {
            db.set_community_private_key(&id, &key)?;
        }
        db.set_community_joined(&id, joined, joined_clock)?;
        let record = db.get_community(&id)?;
        drop(db);

        match outcome {
            ApplyOutcome::Applied(_) => Ok(ApplyOutcome::Applied(Community::from_record(record)?)),
            other => Ok(other),
        }
    }

    // -----------------------------------------------------------------------
    // Local state
    // -----------------------------------------------------------------------

    pub async fn join(&self, id: &CommunityId) -> Result<Community, CoreError> {
        self.set_joined(id, true).await
    }

    /// Leaving keeps the community and its description around.
    pub async fn leave(&self, id: &CommunityId) -> Result<Community, CoreError> {
        self.set_joined(id, false).await
    }

    async fn set_joined(&self, id: &CommunityId, joined: bool) -> Result<Community, CoreError> {
        let db = self.db.lock().await;
        let record = db
            .find_community(id)?
            .ok_or_else(|| CoreError::NotFound(format!("community {}", id.short())))?;
        let clock = (record.joined_clock + 1).max(now_ms());
        db.set_community_joined(id, joined, clock)?;
        Community::from_record(db.get_community(id)?)
    }

    pub async fn get(&self, id: &CommunityId) -> Result<Community, CoreError> {
        let record = self
            .db
            .lock()
            .await
            .find_community(id)?
            .ok_or_else(|| CoreError::NotFound(format!("community {}", id.short())))?;
        Community::from_record(record)
    }

    /// Every known community, ordered by id.
    pub async fn all(&self) -> Result<Vec<Community>, CoreError> {
        let records = self.db.lock().await.list_communities()?;
        records.into_iter().map(Community::from_record).collect()
    }
}

fn detach_chat(description: &mut CommunityDescription, chat_id: &ChannelId) {
    for category in description.categories.values_mut() {
        category.chat_ids.retain(|c| c != chat_id);
    }
}
