use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

use crate::constants::{KDF_CONTEXT_KEY_FINGERPRINT, PUBKEY_SIZE, SECRET_KEY_SIZE};
use crate::error::IdentityError;

/// A device's Ed25519 signing key. The public half is published so that
/// other participants can verify delete requests.
#[derive(Clone)]
pub struct SigningIdentity {
    signing_key: SigningKey,
}

impl SigningIdentity {
    /// Generate a new random signing key
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Restore from secret key bytes
    pub fn from_secret_bytes(secret: &[u8; SECRET_KEY_SIZE]) -> Self {
        let signing_key = SigningKey::from_bytes(secret);
        Self { signing_key }
    }

    /// Get the raw public key bytes
    pub fn public_key_bytes(&self) -> [u8; PUBKEY_SIZE] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Hex-encoded public key, the form published to the server
    pub fn export_public_key(&self) -> String {
        hex::encode(self.public_key_bytes())
    }

    /// Get the raw secret key bytes
    pub fn secret_bytes(&self) -> &[u8; SECRET_KEY_SIZE] {
        self.signing_key.as_bytes()
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Short BLAKE3 fingerprint of the public key for out-of-band comparison
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.public_key_bytes())
    }
}

impl std::fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("public_key", &self.export_public_key())
            .finish()
    }
}

pub fn fingerprint(pubkey: &[u8; PUBKEY_SIZE]) -> String {
    let digest = blake3::derive_key(KDF_CONTEXT_KEY_FINGERPRINT, pubkey);
    hex::encode(&digest[..8])
}

/// Parse a hex-encoded public key as published by [`SigningIdentity::export_public_key`].
pub fn parse_public_key(hex_str: &str) -> Result<[u8; PUBKEY_SIZE], IdentityError> {
    let bytes = hex::decode(hex_str.trim()).map_err(|_| IdentityError::InvalidKeyBytes)?;
    let arr: [u8; PUBKEY_SIZE] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| IdentityError::InvalidKeyBytes)?;
    VerifyingKey::from_bytes(&arr).map_err(|_| IdentityError::InvalidKeyBytes)?;
    Ok(arr)
}

/// Verify a signature against a public key
pub fn verify_signature(
    pubkey_bytes: &[u8; PUBKEY_SIZE],
    message: &[u8],
    signature: &Signature,
) -> Result<(), IdentityError> {
    let verifying_key =
        VerifyingKey::from_bytes(pubkey_bytes).map_err(|_| IdentityError::InvalidKeyBytes)?;
    verifying_key
        .verify(message, signature)
        .map_err(|_| IdentityError::BadSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_roundtrip() {
        let id = SigningIdentity::generate();
        let restored = SigningIdentity::from_secret_bytes(id.secret_bytes());
        assert_eq!(id.public_key_bytes(), restored.public_key_bytes());
    }

    #[test]
    fn test_sign_verify() {
        let id = SigningIdentity::generate();
        let message = b"delete this";
        let signature = id.sign(message);

        assert!(verify_signature(&id.public_key_bytes(), message, &signature).is_ok());
        assert_eq!(
            verify_signature(&id.public_key_bytes(), b"wrong", &signature),
            Err(IdentityError::BadSignature)
        );
    }

    #[test]
    fn test_other_key_rejects() {
        let signer = SigningIdentity::generate();
        let other = SigningIdentity::generate();
        let signature = signer.sign(b"msg");
        assert!(verify_signature(&other.public_key_bytes(), b"msg", &signature).is_err());
    }

    #[test]
    fn test_public_key_export_parse() {
        let id = SigningIdentity::generate();
        let parsed = parse_public_key(&id.export_public_key()).unwrap();
        assert_eq!(parsed, id.public_key_bytes());

        assert!(parse_public_key("abcd").is_err());
        assert!(parse_public_key("zz").is_err());
    }

    #[test]
    fn test_fingerprint_stable() {
        let id = SigningIdentity::generate();
        assert_eq!(id.fingerprint(), id.fingerprint());
        assert_eq!(id.fingerprint().len(), 16);
        assert_ne!(id.fingerprint(), SigningIdentity::generate().fingerprint());
    }
}
