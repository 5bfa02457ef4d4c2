//! Device key lifecycle: first-use generation, persistence, reset.
//!
//! The [`KeyManager`] is constructed with an explicit [`KeyStore`] and hands
//! out [`DeviceKeySet`] values. Nothing here is global; callers pass the key
//! set into the cipher and deletion operations themselves.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::constants::{DEVICE_KEYS_FORMAT_VERSION, SECRET_KEY_SIZE};
use crate::crypto::{export_symmetric, import_symmetric, MessageKey};
use crate::error::KeyError;
use crate::identity::SigningIdentity;
use crate::types::{now_millis, TimestampMillis};

/// One device's key material: the AEAD message key and the signing key pair.
#[derive(Clone, Debug)]
pub struct DeviceKeySet {
    pub message_key: MessageKey,
    pub signing: SigningIdentity,
    pub created_at: TimestampMillis,
}

impl DeviceKeySet {
    pub fn generate() -> Self {
        Self {
            message_key: MessageKey::generate(),
            signing: SigningIdentity::generate(),
            created_at: now_millis(),
        }
    }

    /// Hex-encoded public signing key, the only part meant to leave the device.
    pub fn public_signing_key(&self) -> String {
        self.signing.export_public_key()
    }

    pub fn fingerprint(&self) -> String {
        self.signing.fingerprint()
    }

    pub fn to_stored(&self) -> StoredKeySet {
        StoredKeySet {
            version: DEVICE_KEYS_FORMAT_VERSION,
            message_key: export_symmetric(&self.message_key),
            signing_secret: hex::encode(self.signing.secret_bytes()),
            created_at: self.created_at,
        }
    }

    pub fn from_stored(stored: &StoredKeySet) -> Result<Self, KeyError> {
        if stored.version != DEVICE_KEYS_FORMAT_VERSION {
            return Err(KeyError::Format(format!(
                "unsupported key set version {}",
                stored.version
            )));
        }

        let message_key = import_symmetric(&stored.message_key)?;

        let secret = hex::decode(&stored.signing_secret)
            .map_err(|e| KeyError::Format(format!("signing secret is not hex: {e}")))?;
        let secret: [u8; SECRET_KEY_SIZE] = secret
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::Format("signing secret has wrong length".into()))?;

        Ok(Self {
            message_key,
            signing: SigningIdentity::from_secret_bytes(&secret),
            created_at: stored.created_at,
        })
    }
}

/// Serialized form of a [`DeviceKeySet`] as written to local storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredKeySet {
    pub version: u32,
    /// Base64 message key
    pub message_key: String,
    /// Hex Ed25519 secret
    pub signing_secret: String,
    pub created_at: TimestampMillis,
}

/// Local persistence for device keys.
///
/// `replace` must be atomic: after it returns an error, `load` still yields
/// whatever was stored before.
pub trait KeyStore {
    fn load(&self) -> Result<Option<StoredKeySet>, KeyError>;
    fn replace(&self, keys: &StoredKeySet) -> Result<(), KeyError>;
}

impl<T: KeyStore + ?Sized> KeyStore for &T {
    fn load(&self) -> Result<Option<StoredKeySet>, KeyError> {
        (**self).load()
    }

    fn replace(&self, keys: &StoredKeySet) -> Result<(), KeyError> {
        (**self).replace(keys)
    }
}

/// In-process key store, for tests and throwaway sessions.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    slot: Mutex<Option<StoredKeySet>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStore for MemoryKeyStore {
    fn load(&self) -> Result<Option<StoredKeySet>, KeyError> {
        let guard = self
            .slot
            .lock()
            .map_err(|e| KeyError::Storage(format!("Lock poisoned: {e}")))?;
        Ok(guard.clone())
    }

    fn replace(&self, keys: &StoredKeySet) -> Result<(), KeyError> {
        let mut guard = self
            .slot
            .lock()
            .map_err(|e| KeyError::Storage(format!("Lock poisoned: {e}")))?;
        *guard = Some(keys.clone());
        Ok(())
    }
}

pub struct KeyManager<S: KeyStore> {
    store: S,
    cached: Mutex<Option<DeviceKeySet>>,
}

impl<S: KeyStore> KeyManager<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            cached: Mutex::new(None),
        }
    }

    /// Load the stored key set, or generate and persist one on first use.
    /// Repeated calls return the same keys until [`KeyManager::reset`].
    pub fn initialize_or_load(&self) -> Result<DeviceKeySet, KeyError> {
        let mut cached = self
            .cached
            .lock()
            .map_err(|e| KeyError::Storage(format!("Lock poisoned: {e}")))?;

        if let Some(keys) = cached.as_ref() {
            return Ok(keys.clone());
        }

        let keys = match self.store.load()? {
            Some(stored) => {
                let keys = DeviceKeySet::from_stored(&stored)?;
                info!(fingerprint = %keys.fingerprint(), "Loaded device keys");
                keys
            }
            None => {
                let keys = DeviceKeySet::generate();
                self.store.replace(&keys.to_stored())?;
                info!(fingerprint = %keys.fingerprint(), "Generated new device keys");
                keys
            }
        };

        *cached = Some(keys.clone());
        Ok(keys)
    }

    /// Replace all local key material with a fresh set. Ciphertext produced
    /// under the old message key becomes unreadable. On a storage failure the
    /// previous set stays in place.
    pub fn reset(&self) -> Result<DeviceKeySet, KeyError> {
        let mut cached = self
            .cached
            .lock()
            .map_err(|e| KeyError::Storage(format!("Lock poisoned: {e}")))?;

        let keys = DeviceKeySet::generate();
        if let Err(e) = self.store.replace(&keys.to_stored()) {
            warn!(error = %e, "Key reset failed, keeping previous key set");
            return Err(e);
        }

        info!(fingerprint = %keys.fingerprint(), "Device keys reset");
        *cached = Some(keys.clone());
        Ok(keys)
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}
