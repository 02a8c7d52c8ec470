use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use crate::constants::{KDF_CONTEXT_TOPIC_KEY, NONCE_SIZE};
use crate::error::CryptoError;

pub type SymmetricKey = [u8; 32];

fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

// Output layout: nonce (24 bytes) || ciphertext
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce_bytes = generate_nonce();

    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

pub fn decrypt(key: &SymmetricKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
    XChaCha20Poly1305::new(key.into())
        .decrypt(XNonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Derive the payload key for a topic from a secret shared by everyone
/// allowed to read it (BLAKE3 KDF with domain separation).
pub fn derive_topic_key(shared_secret: &[u8], topic: &str) -> SymmetricKey {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_TOPIC_KEY);
    hasher.update(shared_secret);
    hasher.update(topic.as_bytes());
    *hasher.finalize().as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt() {
        let key = derive_topic_key(b"secret", "community:abc");
        let encrypted = encrypt(&key, b"description").unwrap();
        assert_eq!(decrypt(&key, &encrypted).unwrap(), b"description");
    }

    #[test]
    fn test_wrong_key_fails() {
        let key1 = derive_topic_key(b"secret", "a");
        let key2 = derive_topic_key(b"secret", "b");
        assert_ne!(key1, key2);

        let encrypted = encrypt(&key1, b"payload").unwrap();
        assert!(decrypt(&key2, &encrypted).is_err());
    }

    #[test]
    fn test_short_input_rejected() {
        let key = derive_topic_key(b"secret", "a");
        assert!(matches!(
            decrypt(&key, &[0u8; 4]),
            Err(CryptoError::DecryptionFailed)
        ));
    }
}
