//! # sealchat-client
//!
//! Client side of sealchat: encrypts messages before they leave the device,
//! signs and applies delete-for-everyone requests, and drives one-to-one
//! call setup through the relay's signaling mailbox.
//!
//! Everything that talks to the relay goes through [`api::RelayApi`];
//! [`http::HttpRelayClient`] is the production implementation.

pub mod api;
pub mod call;
pub mod config;
pub mod error;
pub mod http;
pub mod media;
pub mod messenger;
pub mod signaling;

#[cfg(test)]
mod testing;

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter. Calling this more than once is a no-op.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("sealchat_client=debug,sealchat_store=info,warn"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
