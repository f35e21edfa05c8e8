//! Interactive chat against an OpenAI-compatible gateway.
//!
//! This module provides the REPL building blocks the `chatgate` binary is
//! assembled from:
//!
//! - Streaming or batch responses with real-time display
//! - Slash commands for tokens, API keys, models and the endpoint
//! - A prompter seam for interactive questions
//!
//! # Architecture
//!
//! - [`config`]: CLI argument parsing and configuration
//! - [`session`]: conversation history and chat turns
//! - [`commands`]: slash command parsing
//! - [`dispatch`]: slash command execution

mod commands;
mod config;
mod dispatch;
mod prompt;
mod session;

pub use crate::render::{PlainTextRenderer, Renderer};
pub use commands::{
    ApiKeyCommand, ChatCommand, TokenCommand, apikey_help_text, help_text, parse_command,
    token_help_text,
};
pub use config::{ChatArgs, ChatConfig};
pub use dispatch::{Control, dispatch};
pub use prompt::Prompter;
pub use session::{ChatSession, SessionStats};
