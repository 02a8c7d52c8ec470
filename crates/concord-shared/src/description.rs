//! The signed, versioned document that describes a community.
//!
//! A [`CommunityDescription`] is only ever trusted in its signed form. The
//! signature covers the exact bincode bytes carried in
//! [`SignedDescription::payload`]; the structured value is decoded from those
//! bytes on demand, never re-encoded before verification.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{ConcordError, IdentityError};
use crate::identity::{verify_signature_bytes, Identity};
use crate::types::{CategoryId, ChannelId, CommunityId, UserId};

/// Admission policy of a community.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AccessMode {
    /// Anyone may read and post; there is nothing to join.
    NoMembership,
    /// Only members may post; admission happens through invitations.
    InviteOnly,
    /// Non-members submit a join request that the key holder approves.
    RequestToJoin,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DescriptionIdentity {
    pub display_name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Permissions {
    pub access: AccessMode,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    pub position: u32,
    /// Ordered chat references; chats are owned by the description, not the category.
    pub chat_ids: Vec<ChannelId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommunityChat {
    pub id: ChannelId,
    pub name: String,
    pub category_id: Option<CategoryId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommunityDescription {
    /// Version marker. Only the key holder advances it.
    pub clock: u64,
    pub identity: DescriptionIdentity,
    pub permissions: Permissions,
    pub members: BTreeSet<UserId>,
    pub categories: BTreeMap<CategoryId, Category>,
    pub chats: BTreeMap<ChannelId, CommunityChat>,
}

impl CommunityDescription {
    /// First version of a description, with the creator as sole member.
    pub fn new(
        display_name: String,
        description: String,
        access: AccessMode,
        creator: UserId,
    ) -> Self {
        Self {
            clock: 1,
            identity: DescriptionIdentity {
                display_name,
                description,
            },
            permissions: Permissions { access },
            members: BTreeSet::from([creator]),
            categories: BTreeMap::new(),
            chats: BTreeMap::new(),
        }
    }

    pub fn access(&self) -> AccessMode {
        self.permissions.access
    }

    pub fn has_member(&self, user: &UserId) -> bool {
        self.members.contains(user)
    }

    /// Canonical encoding; this is what gets signed.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

/// A description together with the community key's signature over it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignedDescription {
    pub community_id: CommunityId,
    /// bincode-encoded [`CommunityDescription`], exactly as signed.
    pub payload: Vec<u8>,
    pub signature: Vec<u8>,
}

impl SignedDescription {
    /// Sign a description with the community's private key.
    pub fn sign(
        community_key: &Identity,
        description: &CommunityDescription,
    ) -> Result<Self, ConcordError> {
        let payload = description.to_bytes()?;
        let signature = community_key.sign(&payload);
        Ok(Self {
            community_id: CommunityId(community_key.public_key_bytes()),
            payload,
            signature: signature.to_bytes().to_vec(),
        })
    }

    /// Check the signature against the given verification key.
    pub fn verify(&self, public_key: &[u8; 32]) -> Result<(), IdentityError> {
        verify_signature_bytes(public_key, &self.payload, &self.signature)
    }

    /// Check the signature against the key the community ID stands for.
    pub fn verify_self(&self) -> Result<(), IdentityError> {
        self.verify(&self.community_id.0)
    }

    pub fn description(&self) -> Result<CommunityDescription, ConcordError> {
        Ok(CommunityDescription::from_bytes(&self.payload)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(creator: UserId) -> CommunityDescription {
        CommunityDescription::new(
            "rustaceans".to_string(),
            "crabs only".to_string(),
            AccessMode::RequestToJoin,
            creator,
        )
    }

    #[test]
    fn test_sign_and_verify() {
        let community_key = Identity::generate();
        let creator = Identity::generate().user_id();
        let signed = SignedDescription::sign(&community_key, &sample(creator)).unwrap();

        assert!(signed.verify_self().is_ok());
        assert_eq!(signed.description().unwrap().clock, 1);
        assert!(signed.description().unwrap().has_member(&creator));
    }

    #[test]
    fn test_tampered_payload_fails() {
        let community_key = Identity::generate();
        let mut description = sample(UserId([1u8; 32]));
        let mut signed = SignedDescription::sign(&community_key, &description).unwrap();

        description.identity.display_name = "hijacked".to_string();
        signed.payload = description.to_bytes().unwrap();
        assert!(signed.verify_self().is_err());
    }

    #[test]
    fn test_signed_by_other_key_fails() {
        let community_key = Identity::generate();
        let impostor = Identity::generate();
        let mut signed = SignedDescription::sign(&impostor, &sample(UserId([1u8; 32]))).unwrap();
        signed.community_id = CommunityId(community_key.public_key_bytes());

        assert!(signed.verify_self().is_err());
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let mut a = sample(UserId([1u8; 32]));
        a.members.insert(UserId([9u8; 32]));
        a.members.insert(UserId([5u8; 32]));

        let mut b = sample(UserId([1u8; 32]));
        b.members.insert(UserId([5u8; 32]));
        b.members.insert(UserId([9u8; 32]));

        assert_eq!(a.to_bytes().unwrap(), b.to_bytes().unwrap());
    }
}
