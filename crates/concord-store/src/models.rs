//! Domain records persisted in the local database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use concord_shared::description::SignedDescription;
use concord_shared::protocol::MessageType;
use concord_shared::types::{CommunityId, InstallationId, MessageId, RequestId, UserId};

// ---------------------------------------------------------------------------
// Community
// ---------------------------------------------------------------------------

/// One locally known community.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommunityRecord {
    pub id: CommunityId,
    /// Latest accepted signed description.
    pub description: SignedDescription,
    /// Version marker of `description`, duplicated for conditional updates.
    pub clock: u64,
    /// Private signing key, held only by the controlling node.
    pub private_key: Option<[u8; 32]>,
    /// Whether the local user has joined.
    pub joined: bool,
    /// When `joined` last changed, in unix millis. Orders replays from
    /// sibling installations against local join/leave.
    pub joined_clock: u64,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Join request
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[repr(u8)]
pub enum JoinRequestState {
    Pending = 1,
    Approved = 2,
    Rejected = 3,
}

impl JoinRequestState {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Pending),
            2 => Some(Self::Approved),
            3 => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// A non-member asking to be admitted to a `RequestToJoin` community.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoinRequest {
    pub id: RequestId,
    pub community_id: CommunityId,
    pub requester: UserId,
    /// Optional name claim offered as proof.
    pub ens_name: Option<String>,
    pub clock: u64,
    pub state: JoinRequestState,
}

// ---------------------------------------------------------------------------
// Installation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstallationMetadata {
    pub name: String,
    pub device_type: String,
}

/// One device of the local identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Installation {
    pub id: InstallationId,
    pub identity: UserId,
    pub metadata: InstallationMetadata,
    /// Disabled installations are skipped by fan-out.
    pub enabled: bool,
    /// Unix millis of the last full replay sent to this installation.
    pub last_synced: u64,
    /// Clock of the pairing message that last updated this record.
    pub timestamp: u64,
}

// ---------------------------------------------------------------------------
// Raw message (delivery envelope)
// ---------------------------------------------------------------------------

/// A protocol payload plus its delivery bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub id: MessageId,
    /// Chat / topic this message belongs to.
    pub local_chat_id: String,
    pub message_type: MessageType,
    pub payload: Vec<u8>,
    /// Unicast recipients; empty means group routing on `local_chat_id`.
    pub recipients: Vec<UserId>,
    /// Sibling installation this message is addressed to.
    pub target_installation: Option<InstallationId>,
    /// Unix millis of the last attempt (0 if never attempted).
    pub last_sent: u64,
    /// Number of failed attempts. Never decreases.
    pub send_count: u32,
    /// Unix millis before which the message is not retried.
    pub next_attempt_at: u64,
    /// Set only once the transport accepted the message.
    pub sent: bool,
    /// No further attempts will be made.
    pub terminal: bool,
    pub resend_automatically: bool,
    pub skip_encryption: bool,
    pub skip_group_message_wrap: bool,
    pub send_push_notification: bool,
    pub send_on_personal_topic: bool,
    pub created_at: DateTime<Utc>,
}

impl RawMessage {
    /// A fresh, never attempted envelope with automatic resend enabled.
    pub fn new(local_chat_id: impl Into<String>, message_type: MessageType, payload: Vec<u8>) -> Self {
        Self {
            id: MessageId::new(),
            local_chat_id: local_chat_id.into(),
            message_type,
            payload,
            recipients: Vec::new(),
            target_installation: None,
            last_sent: 0,
            send_count: 0,
            next_attempt_at: 0,
            sent: false,
            terminal: false,
            resend_automatically: true,
            skip_encryption: false,
            skip_group_message_wrap: false,
            send_push_notification: false,
            send_on_personal_topic: false,
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Bookmark
// ---------------------------------------------------------------------------

/// A browser bookmark synced across installations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Bookmark {
    pub url: String,
    pub name: String,
    pub image_url: String,
    pub removed: bool,
    pub clock: u64,
}
