//! Configuration types for the chat application.
//!
//! This module provides CLI argument parsing via `arrrg` and the resolved
//! configuration the session starts from.

use std::path::PathBuf;

use arrrg_derive::CommandLine;

use crate::config::{DEFAULT_MODEL, DataPaths};

/// Seed file imported at startup when no `--seed-tokens` is given.
const DEFAULT_SEED_TOKENS: &str = "tokens.json";

/// Data directory used when no `--data-dir` is given.
const DEFAULT_DATA_DIR: &str = "data";

/// Command-line arguments for the chatgate tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ChatArgs {
    /// Directory holding config.json, tokens.json and apikeys.json.
    #[arrrg(optional, "Data directory (default: data)", "DIR")]
    pub data_dir: Option<String>,

    /// Gateway endpoint for this session only.
    #[arrrg(optional, "Gateway endpoint override, not persisted", "URL")]
    pub endpoint: Option<String>,

    /// Model to start with.
    #[arrrg(optional, "Model to use (default: gpt-3.5-turbo)", "MODEL")]
    pub model: Option<String>,

    /// Token file imported on startup.
    #[arrrg(optional, "Seed token file (default: tokens.json)", "FILE")]
    pub seed_tokens: Option<String>,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,
}

/// Configuration for a chat session.
///
/// This struct holds the resolved configuration values after processing
/// command-line arguments with appropriate defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// Root of the persisted credential files.
    pub data_dir: PathBuf,

    /// Endpoint that overrides `config.json` for this run.
    pub endpoint_override: Option<String>,

    /// The model to use for generating responses.
    pub model: String,

    /// Seed token file merged into the store on startup.
    pub seed_tokens: PathBuf,

    /// Whether responses are streamed.
    pub stream: bool,

    /// Whether to use ANSI colors and styles in output.
    pub use_color: bool,
}

impl ChatConfig {
    /// Creates a new ChatConfig with default values.
    ///
    /// Defaults:
    /// - Data directory: `data`
    /// - Model: gpt-3.5-turbo
    /// - Seed tokens: `tokens.json`
    /// - Streaming: enabled
    /// - Color: enabled
    pub fn new() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            endpoint_override: None,
            model: DEFAULT_MODEL.to_string(),
            seed_tokens: PathBuf::from(DEFAULT_SEED_TOKENS),
            stream: true,
            use_color: true,
        }
    }

    /// Sets the data directory.
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    /// Overrides the persisted endpoint for this session.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint_override = Some(endpoint.into());
        self
    }

    /// Sets the model to use.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the seed token file.
    pub fn with_seed_tokens(mut self, path: impl Into<PathBuf>) -> Self {
        self.seed_tokens = path.into();
        self
    }

    /// Starts with streaming disabled.
    pub fn without_streaming(mut self) -> Self {
        self.stream = false;
        self
    }

    /// Disables ANSI color output.
    pub fn without_color(mut self) -> Self {
        self.use_color = false;
        self
    }

    /// File layout under the data directory.
    pub fn data_paths(&self) -> DataPaths {
        DataPaths::new(self.data_dir.clone())
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl From<ChatArgs> for ChatConfig {
    fn from(args: ChatArgs) -> Self {
        let defaults = ChatConfig::new();
        ChatConfig {
            data_dir: args.data_dir.map(PathBuf::from).unwrap_or(defaults.data_dir),
            endpoint_override: args.endpoint.filter(|e| !e.trim().is_empty()),
            model: args
                .model
                .filter(|m| !m.trim().is_empty())
                .unwrap_or(defaults.model),
            seed_tokens: args
                .seed_tokens
                .map(PathBuf::from)
                .unwrap_or(defaults.seed_tokens),
            use_color: !args.no_color,
            ..defaults
        }
    }
}
