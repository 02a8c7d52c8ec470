use thiserror::Error;

use concord_shared::error::{ConcordError, CryptoError, IdentityError};
use concord_shared::types::CommunityId;
use concord_store::StoreError;

/// Structural problems with an inbound request, one variant per
/// (request, field) pair.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    #[error("create-community: invalid name")]
    CreateCommunityInvalidName,
    #[error("create-community: invalid description")]
    CreateCommunityInvalidDescription,

    #[error("edit-community: invalid community id")]
    EditCommunityInvalidId,
    #[error("edit-community: invalid name")]
    EditCommunityInvalidName,
    #[error("edit-community: invalid description")]
    EditCommunityInvalidDescription,

    #[error("create-community-category: invalid community id")]
    CreateCategoryInvalidCommunityId,
    #[error("create-community-category: invalid category name")]
    CreateCategoryInvalidName,

    #[error("delete-community-category: invalid community id")]
    DeleteCategoryInvalidCommunityId,
    #[error("delete-community-category: invalid category id")]
    DeleteCategoryInvalidCategoryId,

    #[error("create-community-chat: invalid community id")]
    CreateChatInvalidCommunityId,
    #[error("create-community-chat: invalid chat name")]
    CreateChatInvalidName,

    #[error("request-to-join-community: invalid community id")]
    RequestToJoinInvalidCommunityId,

    #[error("share-community: invalid id")]
    ShareCommunityInvalidId,
    #[error("share-community: empty users")]
    ShareCommunityEmptyUsers,

    #[error("share-image-message: invalid id")]
    ShareImageMessageInvalidId,
    #[error("share-image-message: empty users")]
    ShareImageMessageEmptyUsers,
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Community {community} does not accept join requests: {reason}")]
    JoinRejected {
        community: CommunityId,
        reason: &'static str,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Coarse classification used by callers to decide how to surface a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Authorization,
    /// Persistence or transport hiccup; the operation may be tried again.
    Transient,
    Fatal,
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Validation(_) => ErrorKind::Validation,
            CoreError::NotFound(_) | CoreError::Store(StoreError::NotFound) => ErrorKind::NotFound,
            CoreError::Unauthorized(_)
            | CoreError::JoinRejected { .. }
            | CoreError::Identity(IdentityError::InvalidSignature)
            | CoreError::Crypto(CryptoError::DecryptionFailed) => ErrorKind::Authorization,
            CoreError::Store(_) | CoreError::Transport(_) => ErrorKind::Transient,
            CoreError::Identity(_)
            | CoreError::Crypto(_)
            | CoreError::Serialization(_)
            | CoreError::Config(_) => ErrorKind::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

impl From<ConcordError> for CoreError {
    fn from(e: ConcordError) -> Self {
        match e {
            ConcordError::Crypto(e) => CoreError::Crypto(e),
            ConcordError::Identity(e) => CoreError::Identity(e),
            ConcordError::SenderMismatch { claimed } => {
                CoreError::Unauthorized(format!("cannot seal as {}", claimed.short()))
            }
            ConcordError::Serialization(msg) => CoreError::Serialization(msg),
        }
    }
}

impl From<bincode::Error> for CoreError {
    fn from(e: bincode::Error) -> Self {
        CoreError::Serialization(e.to_string())
    }
}
