use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{
    KDF_CONTEXT_JOIN_REQUEST_ID, TOPIC_PREFIX_CHAT, TOPIC_PREFIX_COMMUNITY, TOPIC_PREFIX_INSTALLATIONS,
    TOPIC_PREFIX_PERSONAL,
};

/// Identifiers that are 32-byte keys or digests, rendered as hex.
macro_rules! key_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
                let bytes = hex::decode(s)?;
                Self::from_slice(&bytes)
            }

            pub fn from_slice(bytes: &[u8]) -> Result<Self, hex::FromHexError> {
                let arr: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| hex::FromHexError::InvalidStringLength)?;
                Ok(Self(arr))
            }

            pub fn short(&self) -> String {
                self.to_hex()[..8].to_string()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.to_hex())
            }
        }
    };
}

key_id!(
    /// User identity = Ed25519 public key (32 bytes)
    UserId
);

key_id!(
    /// Community identity = the community's Ed25519 verification key
    CommunityId
);

key_id!(
    /// Join request identity, derived from (community, requester)
    RequestId
);

impl UserId {
    /// Topic every installation of this identity listens on.
    pub fn personal_topic(&self) -> String {
        format!("{TOPIC_PREFIX_PERSONAL}:{}", self.to_hex())
    }

    /// Topic reserved for traffic between installations of this identity.
    pub fn installations_topic(&self) -> String {
        format!("{TOPIC_PREFIX_INSTALLATIONS}:{}", self.to_hex())
    }
}

impl CommunityId {
    pub fn to_topic(&self) -> String {
        format!("{TOPIC_PREFIX_COMMUNITY}:{}", self.to_hex())
    }
}

impl RequestId {
    /// Request ids are deterministic so a repeated request from the same
    /// identity collapses onto the same record.
    pub fn derive(community_id: &CommunityId, requester: &UserId) -> Self {
        let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_JOIN_REQUEST_ID);
        hasher.update(&community_id.0);
        hasher.update(&requester.0);
        Self(*hasher.finalize().as_bytes())
    }
}

/// A chat (channel) inside a community.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub Uuid);

impl ChannelId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn to_topic(&self) -> String {
        format!("{TOPIC_PREFIX_CHAT}:{}", self.0)
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CategoryId(pub Uuid);

impl CategoryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CategoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CategoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One device belonging to an identity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstallationId(pub Uuid);

impl InstallationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for InstallationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InstallationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one outbound delivery envelope.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_roundtrip() {
        let id = CommunityId([7u8; 32]);
        assert_eq!(CommunityId::from_hex(&id.to_hex()).unwrap(), id);
        assert_eq!(id.short().len(), 8);
    }

    #[test]
    fn test_from_slice_wrong_length() {
        assert!(UserId::from_slice(&[1, 2, 3]).is_err());
        assert!(UserId::from_hex("abcd").is_err());
    }

    #[test]
    fn test_request_id_deterministic() {
        let community = CommunityId([1u8; 32]);
        let alice = UserId([2u8; 32]);
        let bob = UserId([3u8; 32]);

        assert_eq!(
            RequestId::derive(&community, &alice),
            RequestId::derive(&community, &alice)
        );
        assert_ne!(
            RequestId::derive(&community, &alice),
            RequestId::derive(&community, &bob)
        );
    }

    #[test]
    fn test_topics_are_distinct() {
        let key = [9u8; 32];
        assert_ne!(UserId(key).personal_topic(), CommunityId(key).to_topic());
        assert_ne!(UserId(key).personal_topic(), UserId(key).installations_topic());
        assert!(CommunityId(key).to_topic().starts_with("community:"));
    }
}
