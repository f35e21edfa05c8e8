// Public modules
pub mod accumulating_stream;
pub mod chat;
pub mod client;
pub mod config;
pub mod error;
pub mod keymap;
pub mod models;
pub mod observability;
pub mod render;
pub mod sse;
pub mod store;
pub mod sync;
pub mod transport;
pub mod types;
pub mod utils;

// Re-exports
pub use client::GatewayClient;
pub use config::{DataPaths, Settings};
pub use error::{Error, Result};
pub use keymap::{ApiKeyMapper, ApiKeyRewriteLayer, ApiKeyRewriteService, KeyMapping};
pub use observability::register_biometrics;
pub use store::CredentialStore;
pub use sync::RemoteSync;
pub use types::*;
