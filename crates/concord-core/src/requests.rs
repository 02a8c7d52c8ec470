//! Inbound intents and their structural validation.
//!
//! Community ids arrive as raw bytes (hex on the wire). Validation only
//! checks presence; whether an id names a known community is decided later
//! by the component that handles the request.

use serde::{Deserialize, Serialize};

use concord_shared::description::AccessMode;
use concord_shared::types::{CategoryId, ChannelId, UserId};

use crate::error::ValidationError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateCommunity {
    pub name: String,
    pub description: String,
    pub access: AccessMode,
}

impl CreateCommunity {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::CreateCommunityInvalidName);
        }
        if self.description.is_empty() {
            return Err(ValidationError::CreateCommunityInvalidDescription);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EditCommunity {
    #[serde(with = "hex::serde")]
    pub community_id: Vec<u8>,
    pub name: String,
    pub description: String,
    pub access: AccessMode,
}

impl EditCommunity {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.community_id.is_empty() {
            return Err(ValidationError::EditCommunityInvalidId);
        }
        if self.name.is_empty() {
            return Err(ValidationError::EditCommunityInvalidName);
        }
        if self.description.is_empty() {
            return Err(ValidationError::EditCommunityInvalidDescription);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateCommunityCategory {
    #[serde(with = "hex::serde")]
    pub community_id: Vec<u8>,
    pub category_name: String,
    /// Existing chats to move into the new category, in order.
    #[serde(default)]
    pub chat_ids: Vec<ChannelId>,
}

impl CreateCommunityCategory {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.community_id.is_empty() {
            return Err(ValidationError::CreateCategoryInvalidCommunityId);
        }
        if self.category_name.is_empty() {
            return Err(ValidationError::CreateCategoryInvalidName);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteCommunityCategory {
    #[serde(with = "hex::serde")]
    pub community_id: Vec<u8>,
    pub category_id: String,
}

impl DeleteCommunityCategory {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.community_id.is_empty() {
            return Err(ValidationError::DeleteCategoryInvalidCommunityId);
        }
        if self.category_id.is_empty() {
            return Err(ValidationError::DeleteCategoryInvalidCategoryId);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateCommunityChat {
    #[serde(with = "hex::serde")]
    pub community_id: Vec<u8>,
    pub name: String,
    #[serde(default)]
    pub category_id: Option<CategoryId>,
}

impl CreateCommunityChat {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.community_id.is_empty() {
            return Err(ValidationError::CreateChatInvalidCommunityId);
        }
        if self.name.is_empty() {
            return Err(ValidationError::CreateChatInvalidName);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestToJoinCommunity {
    #[serde(with = "hex::serde")]
    pub community_id: Vec<u8>,
    /// Optional name claim; empty means none.
    #[serde(default)]
    pub ens_name: String,
}

impl RequestToJoinCommunity {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.community_id.is_empty() {
            return Err(ValidationError::RequestToJoinInvalidCommunityId);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShareCommunity {
    #[serde(with = "hex::serde")]
    pub community_id: Vec<u8>,
    pub users: Vec<UserId>,
}

impl ShareCommunity {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.community_id.is_empty() {
            return Err(ValidationError::ShareCommunityInvalidId);
        }
        if self.users.is_empty() {
            return Err(ValidationError::ShareCommunityEmptyUsers);
        }
        Ok(())
    }
}

/// Forward an existing image message to a set of users.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShareImageMessage {
    #[serde(rename = "id")]
    pub message_id: String,
    pub users: Vec<UserId>,
    #[serde(default)]
    pub text: String,
}

impl ShareImageMessage {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.message_id.is_empty() {
            return Err(ValidationError::ShareImageMessageInvalidId);
        }
        if self.users.is_empty() {
            return Err(ValidationError::ShareImageMessageEmptyUsers);
        }
        Ok(())
    }
}
