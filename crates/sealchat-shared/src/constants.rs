/// Application name
pub const APP_NAME: &str = "sealchat";

/// ChaCha20-Poly1305 nonce size in bytes (96 bits)
pub const NONCE_SIZE: usize = 12;

/// Poly1305 authentication tag size in bytes
pub const TAG_SIZE: usize = 16;

/// Symmetric message key size in bytes (256 bits)
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Ed25519 public key size in bytes
pub const PUBKEY_SIZE: usize = 32;

/// Ed25519 secret key size in bytes
pub const SECRET_KEY_SIZE: usize = 32;

/// Ed25519 signature size in bytes
pub const SIGNATURE_SIZE: usize = 64;

/// Maximum plaintext message size in bytes (1 MiB)
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Default lifetime of a signaling record in seconds
pub const DEFAULT_SIGNAL_TTL_SECS: u64 = 30;

/// Longest configurable signal lifetime in seconds
pub const MAX_SIGNAL_TTL_SECS: u64 = 300;

/// Default interval between signaling polls in milliseconds
pub const DEFAULT_SIGNAL_POLL_INTERVAL_MS: u64 = 1500;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Header carrying the authenticated principal, set by the session layer
pub const USER_ID_HEADER: &str = "x-user-id";

/// Domain separation tag for the canonical delete-request encoding
pub const DELETE_SIGNATURE_DOMAIN: &str = "sealchat-delete-request-v1";

/// Key derivation contexts (BLAKE3)
pub const KDF_CONTEXT_KEY_FINGERPRINT: &str = "sealchat-signing-key-fingerprint-v1";

/// Version tag written alongside persisted device keys
pub const DEVICE_KEYS_FORMAT_VERSION: u32 = 1;
