use thiserror::Error;

use crate::types::UserId;

#[derive(Error, Debug)]
pub enum ConcordError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    /// An envelope was sealed with a key other than its claimed sender's.
    #[error("Envelope claims sender {claimed} but was sealed by another identity")]
    SenderMismatch { claimed: UserId },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<bincode::Error> for ConcordError {
    fn from(e: bincode::Error) -> Self {
        ConcordError::Serialization(e.to_string())
    }
}

/// Topic payload encryption failures.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong topic key")]
    DecryptionFailed,
}

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Not a valid Ed25519 public key")]
    InvalidPublicKey,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Key file error: {0}")]
    KeyFile(String),
}
