use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::error::IdentityError;
use crate::types::{CommunityId, UserId};

/// An Ed25519 keypair. Used both for a user's identity and for the
/// controlling key of a community (whose public half is the community ID).
#[derive(Clone)]
pub struct Identity {
    signing_key: SigningKey,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("public_key", &hex::encode(self.public_key_bytes()))
            .finish_non_exhaustive()
    }
}

/// Serializable format for storing/exporting a keypair
#[derive(Serialize, Deserialize)]
pub struct IdentityExport {
    #[serde(with = "hex::serde")]
    pub secret_key: [u8; 32],
    #[serde(with = "hex::serde")]
    pub public_key: [u8; 32],
}

impl Identity {
    /// Generate a new random keypair
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Restore from secret key bytes
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(secret);
        Self { signing_key }
    }

    /// Restore from a serialized export, checking that the stored public key
    /// matches the one derived from the secret.
    pub fn from_export(export: &IdentityExport) -> Result<Self, IdentityError> {
        let identity = Self::from_secret_bytes(&export.secret_key);
        if identity.public_key_bytes() != export.public_key {
            return Err(IdentityError::KeyFile(
                "public key does not match secret key".to_string(),
            ));
        }
        Ok(identity)
    }

    pub fn user_id(&self) -> UserId {
        UserId(self.public_key_bytes())
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn secret_bytes(&self) -> &[u8; 32] {
        self.signing_key.as_bytes()
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn to_export(&self) -> IdentityExport {
        IdentityExport {
            secret_key: *self.signing_key.as_bytes(),
            public_key: self.signing_key.verifying_key().to_bytes(),
        }
    }

    /// Derive a database encryption key from the identity using BLAKE3
    pub fn derive_db_key(&self) -> [u8; 32] {
        blake3::derive_key(
            crate::constants::KDF_CONTEXT_DB_KEY,
            self.signing_key.as_bytes(),
        )
    }

    /// Secret known only to the installations of this identity, used to
    /// encrypt traffic on its installations topic.
    pub fn derive_installations_secret(&self) -> [u8; 32] {
        blake3::derive_key(
            crate::constants::KDF_CONTEXT_INSTALLATIONS_TOPIC,
            self.signing_key.as_bytes(),
        )
    }
}

/// Verify a signature against a public key.
///
/// The check is over the exact bytes given; callers must pass the encoding
/// that was signed, never a re-encoded copy.
pub fn verify_signature(
    pubkey_bytes: &[u8; 32],
    message: &[u8],
    signature: &Signature,
) -> Result<(), IdentityError> {
    let verifying_key =
        VerifyingKey::from_bytes(pubkey_bytes).map_err(|_| IdentityError::InvalidPublicKey)?;
    verifying_key
        .verify_strict(message, signature)
        .map_err(|_| IdentityError::InvalidSignature)
}

/// Same as [`verify_signature`] for a signature carried as raw bytes.
pub fn verify_signature_bytes(
    pubkey_bytes: &[u8; 32],
    message: &[u8],
    signature: &[u8],
) -> Result<(), IdentityError> {
    let signature =
        Signature::from_slice(signature).map_err(|_| IdentityError::InvalidSignature)?;
    verify_signature(pubkey_bytes, message, &signature)
}

/// A community is identified by its verification key.
pub fn derive_id(pubkey_bytes: &[u8; 32]) -> CommunityId {
    CommunityId(*pubkey_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_roundtrip() {
        let id = Identity::generate();
        let export = id.to_export();
        let restored = Identity::from_export(&export).unwrap();
        assert_eq!(id.user_id(), restored.user_id());
    }

    #[test]
    fn test_corrupt_export_rejected() {
        let id = Identity::generate();
        let mut export = id.to_export();
        export.public_key[0] ^= 0xFF;
        assert!(matches!(
            Identity::from_export(&export),
            Err(IdentityError::KeyFile(_))
        ));
    }

    #[test]
    fn test_sign_verify() {
        let id = Identity::generate();
        let message = b"community description v1";
        let signature = id.sign(message);

        assert!(verify_signature(&id.public_key_bytes(), message, &signature).is_ok());
        assert!(matches!(
            verify_signature(&id.public_key_bytes(), b"community description v2", &signature),
            Err(IdentityError::InvalidSignature)
        ));
    }

    #[test]
    fn test_verify_with_other_key_fails() {
        let signer = Identity::generate();
        let other = Identity::generate();
        let signature = signer.sign(b"payload");
        assert!(verify_signature_bytes(
            &other.public_key_bytes(),
            b"payload",
            &signature.to_bytes()
        )
        .is_err());
    }

    #[test]
    fn test_truncated_signature_rejected() {
        let id = Identity::generate();
        let signature = id.sign(b"payload").to_bytes();
        assert!(verify_signature_bytes(&id.public_key_bytes(), b"payload", &signature[..10]).is_err());
    }

    #[test]
    fn test_derive_id_is_public_key() {
        let id = Identity::generate();
        assert_eq!(derive_id(&id.public_key_bytes()).0, id.public_key_bytes());
    }
}
