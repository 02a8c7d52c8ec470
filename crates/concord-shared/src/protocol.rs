use serde::{Deserialize, Serialize};

use crate::description::SignedDescription;
use crate::error::{ConcordError, IdentityError};
use crate::identity::{verify_signature_bytes, Identity};
use crate::types::{CommunityId, InstallationId, MessageId, UserId};

/// Application-level kind of a payload, stored with each outbound envelope.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    CommunityDescription = 1,
    CommunityInvitation = 2,
    RequestToJoin = 3,
    RequestToJoinResponse = 4,
    PairInstallation = 5,
    SyncInstallationCommunity = 6,
    SyncBookmark = 7,
    ImageShare = 8,
}

impl MessageType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::CommunityDescription),
            2 => Some(Self::CommunityInvitation),
            3 => Some(Self::RequestToJoin),
            4 => Some(Self::RequestToJoinResponse),
            5 => Some(Self::PairInstallation),
            6 => Some(Self::SyncInstallationCommunity),
            7 => Some(Self::SyncBookmark),
            8 => Some(Self::ImageShare),
            _ => None,
        }
    }
}

/// All protocol payloads exchanged between peers and between installations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum WireMessage {
    /// Latest signed description, published by the key holder
    CommunityDescription(SignedDescription),

    /// A community shared with specific users
    CommunityInvitation(CommunityInvitation),

    /// Ask the key holder for admission
    RequestToJoin(RequestToJoin),

    /// Key holder's answer to a join request
    RequestToJoinResponse(RequestToJoinResponse),

    /// A device announcing itself to its sibling installations
    PairInstallation(PairInstallation),

    /// Community state replayed to another installation of the same identity
    SyncInstallationCommunity(SyncInstallationCommunity),

    /// Bookmark state synced between installations
    SyncBookmark(SyncBookmark),

    /// An image message forwarded to a set of users
    ImageShare(ImageShare),
}

impl WireMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::CommunityDescription(_) => MessageType::CommunityDescription,
            Self::CommunityInvitation(_) => MessageType::CommunityInvitation,
            Self::RequestToJoin(_) => MessageType::RequestToJoin,
            Self::RequestToJoinResponse(_) => MessageType::RequestToJoinResponse,
            Self::PairInstallation(_) => MessageType::PairInstallation,
            Self::SyncInstallationCommunity(_) => MessageType::SyncInstallationCommunity,
            Self::SyncBookmark(_) => MessageType::SyncBookmark,
            Self::ImageShare(_) => MessageType::ImageShare,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommunityInvitation {
    pub description: SignedDescription,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestToJoin {
    pub community_id: CommunityId,
    /// Optional name claim presented as proof
    pub ens_name: Option<String>,
    pub clock: u64,
}

/// Answer to a join request. Only the community key can produce a valid
/// signature, so the requester can tell the key holder's answer from anyone
/// else's.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestToJoinResponse {
    pub community_id: CommunityId,
    pub requester: UserId,
    pub accepted: bool,
    /// Description including the new member, present when accepted
    pub description: Option<SignedDescription>,
    pub clock: u64,
    pub signature: Vec<u8>,
}

impl RequestToJoinResponse {
    pub fn sign(
        community_key: &Identity,
        requester: UserId,
        accepted: bool,
        description: Option<SignedDescription>,
        clock: u64,
    ) -> Result<Self, ConcordError> {
        let mut response = Self {
            community_id: CommunityId(community_key.public_key_bytes()),
            requester,
            accepted,
            description,
            clock,
            signature: Vec::new(),
        };
        response.signature = community_key.sign(&response.signed_bytes()?).to_bytes().to_vec();
        Ok(response)
    }

    /// Check that the community key signed this answer.
    pub fn verify(&self) -> Result<(), ConcordError> {
        verify_signature_bytes(&self.community_id.0, &self.signed_bytes()?, &self.signature)
            .map_err(ConcordError::Identity)
    }

    fn signed_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(&(
            &self.community_id,
            &self.requester,
            self.accepted,
            &self.description,
            self.clock,
        ))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PairInstallation {
    pub installation_id: InstallationId,
    pub name: String,
    pub device_type: String,
    pub clock: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncInstallationCommunity {
    pub description: SignedDescription,
    /// Community private key, when this identity controls the community
    pub private_key: Option<[u8; 32]>,
    pub joined: bool,
    /// When `joined` last changed on the sending installation
    pub clock: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncBookmark {
    pub url: String,
    pub name: String,
    pub image_url: String,
    pub removed: bool,
    pub clock: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageShare {
    pub message_id: String,
    pub text: String,
}

/// Routing and authorship metadata around a wire payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub message_id: MessageId,
    pub sender: UserId,
    /// Installation that produced the envelope
    pub origin_installation: InstallationId,
    /// Set when only one sibling installation should act on the payload
    pub target_installation: Option<InstallationId>,
    /// Chat the payload belongs to (absent when group wrapping was skipped)
    pub chat_id: Option<String>,
    pub timestamp_ms: u64,
    pub payload: Vec<u8>,
}

/// An envelope signed by its sender's identity key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignedEnvelope {
    pub envelope: Vec<u8>,
    pub signature: Vec<u8>,
}

impl SignedEnvelope {
    pub fn seal(identity: &Identity, envelope: &Envelope) -> Result<Self, ConcordError> {
        if envelope.sender != identity.user_id() {
            return Err(ConcordError::SenderMismatch {
                claimed: envelope.sender,
            });
        }
        let bytes = bincode::serialize(envelope)?;
        let signature = identity.sign(&bytes);
        Ok(Self {
            envelope: bytes,
            signature: signature.to_bytes().to_vec(),
        })
    }

    /// Decode the envelope and check that its claimed sender signed it.
    pub fn open(&self) -> Result<Envelope, ConcordError> {
        let envelope: Envelope = bincode::deserialize(&self.envelope)?;
        verify_signature_bytes(&envelope.sender.0, &self.envelope, &self.signature)
            .map_err(|_| ConcordError::Identity(IdentityError::InvalidSignature))?;
        Ok(envelope)
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

    fn envelope_from(identity: &Identity, payload: Vec<u8>) -> Envelope {
        Envelope {
            message_id: MessageId::new(),
            sender: identity.user_id(),
            origin_installation: InstallationId::new(),
            target_installation: None,
            chat_id: None,
            timestamp_ms: 1_700_000_000_000,
            payload,
        }
    }

    #[test]
    fn test_message_type_byte_mapping() {
        for t in [
            MessageType::CommunityDescription,
            MessageType::RequestToJoin,
            MessageType::SyncBookmark,
            MessageType::ImageShare,
        ] {
            assert_eq!(MessageType::from_byte(t as u8), Some(t));
        }
        assert_eq!(MessageType::from_byte(0), None);
    }

    #[test]
    fn test_sealed_envelope_opens() {
        let identity = Identity::generate();
        let payload = WireMessage::SyncBookmark(SyncBookmark {
            url: "https://example.org".to_string(),
            name: "example".to_string(),
            image_url: String::new(),
            removed: false,
            clock: 3,
        })
        .to_bytes()
        .unwrap();

        let sealed = SignedEnvelope::seal(&identity, &envelope_from(&identity, payload)).unwrap();
        let wire = sealed.to_bytes().unwrap();
        let opened = SignedEnvelope::from_bytes(&wire).unwrap().open().unwrap();

        assert_eq!(opened.sender, identity.user_id());
        let message = WireMessage::from_bytes(&opened.payload).unwrap();
        assert_eq!(message.message_type(), MessageType::SyncBookmark);
    }

    #[test]
    fn test_forged_sender_rejected() {
        let identity = Identity::generate();
        let victim = Identity::generate();
        let mut sealed =
            SignedEnvelope::seal(&identity, &envelope_from(&identity, vec![1, 2, 3])).unwrap();

        let mut envelope: Envelope = bincode::deserialize(&sealed.envelope).unwrap();
        envelope.sender = victim.user_id();
        sealed.envelope = bincode::serialize(&envelope).unwrap();

        assert!(sealed.open().is_err());
    }

    #[test]
    fn test_join_response_needs_community_key() {
        let community_key = Identity::generate();
        let requester = Identity::generate().user_id();

        let response =
            RequestToJoinResponse::sign(&community_key, requester, false, None, 7).unwrap();
        assert!(response.verify().is_ok());

        let mut flipped = response.clone();
        flipped.accepted = true;
        assert!(flipped.verify().is_err());

        let mut redirected = response.clone();
        redirected.requester = Identity::generate().user_id();
        assert!(redirected.verify().is_err());

        let stranger = Identity::generate();
        let mut forged = RequestToJoinResponse::sign(&stranger, requester, false, None, 8).unwrap();
        forged.community_id = response.community_id;
        assert!(forged.verify().is_err());
    }

    #[test]
    fn test_seal_requires_matching_sender() {
        let identity = Identity::generate();
        let other = Identity::generate();
        assert!(SignedEnvelope::seal(&identity, &envelope_from(&other, vec![])).is_err());
    }
}
