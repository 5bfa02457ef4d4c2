use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    /// Integrity tag did not verify: wrong key, tampered ciphertext or nonce.
    #[error("Unable to decrypt: authentication failed")]
    Authentication,

    #[error("Plaintext too large: {size} bytes (max {max})")]
    PlaintextTooLarge { size: usize, max: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// Imported key material is malformed. User-correctable.
    #[error("Invalid key format, please check the key: {0}")]
    Format(String),

    #[error("Key storage error: {0}")]
    Storage(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Invalid public key bytes")]
    InvalidKeyBytes,

    #[error("Signature verification failed")]
    BadSignature,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeletionError {
    #[error("Delete request signature is invalid")]
    SignatureInvalid,

    #[error("Requester is not the original sender of the message")]
    NotSender,

    #[error("Canonical encoding failed: {0}")]
    Encoding(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Unknown chat")]
    UnknownChat,
}
