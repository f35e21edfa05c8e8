//! Client settings and the on-disk layout of the data directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Endpoint used when nothing else is configured.  Sync is skipped against it.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:5005";

/// Model selected for new sessions and after a reset.
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// Removes trailing slashes so paths can be appended with `format!("{endpoint}/...")`.
pub fn normalize_endpoint(endpoint: &str) -> String {
    endpoint.trim().trim_end_matches('/').to_string()
}

/// Locations of every file chatgate reads or writes.
///
/// All paths hang off a single root so tests can point the whole store at a
/// temporary directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataPaths {
    root: PathBuf,
}

impl DataPaths {
    /// Creates the layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The data directory itself.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `config.json`: endpoint, default model and active token.
    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.json")
    }

    /// `tokens.json`: token name to token value.
    pub fn tokens_file(&self) -> PathBuf {
        self.root.join("tokens.json")
    }

    /// `apikeys.json`: key name to API key record.
    pub fn apikeys_file(&self) -> PathBuf {
        self.root.join("apikeys.json")
    }

    /// `data/token.txt`: append-only log of raw token values.
    pub fn token_log(&self) -> PathBuf {
        self.root.join("data").join("token.txt")
    }
}

impl Default for DataPaths {
    fn default() -> Self {
        Self::new("data")
    }
}

/// Persisted client settings (`config.json`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Base URL of the gateway, without a trailing slash.
    #[serde(default = "default_endpoint")]
    pub api_endpoint: String,
    /// Model a new session starts with.
    #[serde(default = "default_model")]
    pub default_model: String,
    /// Name of the token used for outgoing requests.
    #[serde(default)]
    pub active_token: Option<String>,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

impl Settings {
    /// Parses `config.json` contents, normalizing the endpoint.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        let mut settings: Settings = serde_json::from_str(json)?;
        settings.api_endpoint = normalize_endpoint(&settings.api_endpoint);
        Ok(settings)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_endpoint: default_endpoint(),
            default_model: default_model(),
            active_token: None,
        }
    }
}
