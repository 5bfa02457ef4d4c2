//! # sealchat-shared
//!
//! Protocol core shared by the client and the relay server: device keys,
//! the message cipher, signed deletion, signaling types and the JSON wire
//! format. No I/O beyond what an injected [`keys::KeyStore`] performs.

pub mod constants;
pub mod crypto;
pub mod deletion;
pub mod error;
pub mod identity;
pub mod keys;
pub mod protocol;
pub mod signal;
pub mod types;
