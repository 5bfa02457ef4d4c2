use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::constants::{MAX_MESSAGE_SIZE, NONCE_SIZE, SYMMETRIC_KEY_SIZE};
use crate::error::{CryptoError, KeyError};

/// 256-bit ChaCha20-Poly1305 key shared by the participants of a chat.
#[derive(Clone, PartialEq, Eq)]
pub struct MessageKey([u8; SYMMETRIC_KEY_SIZE]);

impl MessageKey {
    pub fn generate() -> Self {
        let mut key = [0u8; SYMMETRIC_KEY_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut key);
        Self(key)
    }

    pub fn from_bytes(bytes: [u8; SYMMETRIC_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SYMMETRIC_KEY_SIZE] {
        &self.0
    }
}

// Never print key material.
impl std::fmt::Debug for MessageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MessageKey(..)")
    }
}

/// Output of one encryption: ciphertext (with tag) and the nonce it used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_SIZE],
}

fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Encrypt under a freshly drawn random nonce. Callers cannot supply one.
pub fn encrypt(plaintext: &[u8], key: &MessageKey) -> Result<Sealed, CryptoError> {
    if plaintext.len() > MAX_MESSAGE_SIZE {
        return Err(CryptoError::PlaintextTooLarge {
            size: plaintext.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let nonce = generate_nonce();

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    Ok(Sealed { ciphertext, nonce })
}

pub fn decrypt(ciphertext: &[u8], nonce: &[u8], key: &MessageKey) -> Result<Vec<u8>, CryptoError> {
    if nonce.len() != NONCE_SIZE {
        return Err(CryptoError::Authentication);
    }

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::Authentication)
}

/// Decrypt and require valid UTF-8. A non-UTF-8 plaintext is treated the
/// same as a failed tag: the message is unreadable.
pub fn decrypt_text(ciphertext: &[u8], nonce: &[u8], key: &MessageKey) -> Result<String, CryptoError> {
    let bytes = decrypt(ciphertext, nonce, key)?;
    String::from_utf8(bytes).map_err(|_| CryptoError::Authentication)
}

/// Export a key for manual backup or out-of-band sharing.
pub fn export_symmetric(key: &MessageKey) -> String {
    BASE64.encode(key.as_bytes())
}

pub fn import_symmetric(encoded: &str) -> Result<MessageKey, KeyError> {
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|e| KeyError::Format(format!("not valid base64: {e}")))?;

    let arr: [u8; SYMMETRIC_KEY_SIZE] = bytes.as_slice().try_into().map_err(|_| {
        KeyError::Format(format!(
            "expected {SYMMETRIC_KEY_SIZE} bytes, got {}",
            bytes.len()
        ))
    })?;

    Ok(MessageKey(arr))
}
