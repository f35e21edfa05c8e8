//! Chat session management.
//!
//! This module owns the conversation history, the current model and
//! streaming mode, and the credential store the session authenticates with.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::chat::ChatConfig;
use crate::client::GatewayClient;
use crate::config::DEFAULT_MODEL;
use crate::error::{Error, Result};
use crate::render::Renderer;
use crate::store::CredentialStore;
use crate::types::ChatMessage;

/// An interactive chat session against one gateway.
pub struct ChatSession {
    client: GatewayClient,
    store: CredentialStore,
    model: String,
    stream: bool,
    history: Vec<ChatMessage>,
    interrupted: Arc<AtomicBool>,
}

/// A snapshot for `/status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStats {
    /// The endpoint requests go to.
    pub endpoint: String,
    /// The current model identifier.
    pub model: String,
    /// Whether responses are streamed.
    pub stream: bool,
    /// Messages in the conversation history.
    pub message_count: usize,
    /// Name of the token chat requests authenticate with.
    pub active_token: Option<String>,
}

impl ChatSession {
    /// Creates a session.  The endpoint override in `config`, if any, wins
    /// over the persisted one for this session only; likewise a non-default
    /// model wins over `default_model` from `config.json`.
    pub fn new(mut client: GatewayClient, store: CredentialStore, config: &ChatConfig) -> Self {
        let endpoint = config
            .endpoint_override
            .clone()
            .unwrap_or_else(|| store.settings().api_endpoint.clone());
        client.set_endpoint(&endpoint);
        // An explicit --model beats the persisted default_model.
        let model = if config.model == DEFAULT_MODEL {
            store.settings().default_model.clone()
        } else {
            config.model.clone()
        };
        Self {
            client,
            store,
            model,
            stream: config.stream,
            history: Vec::new(),
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Sends a user message and renders the answer.
    ///
    /// On success the assistant's reply is appended to the history and, if
    /// the gateway reports serving a different model, that model becomes
    /// current.  On any failure, including an interrupt, the history is left
    /// exactly as it was.
    ///
    /// # Errors
    ///
    /// Returns an authentication error when no token is configured, and the
    /// client's error when the request fails or is interrupted.
    pub async fn send(&mut self, user_input: &str, renderer: &mut dyn Renderer) -> Result<()> {
        let Some(bearer) = self.store.get_active_token().map(String::from) else {
            return Err(Error::authentication(
                "No token configured. Use /token add to add one.",
            ));
        };

        self.interrupted.store(false, Ordering::Relaxed);
        let previous_len = self.history.len();
        self.history.push(ChatMessage::user(user_input));

        let flag = Arc::clone(&self.interrupted);
        let requested = self.model.clone();
        let mut started = false;
        let result = self
            .client
            .chat(
                &bearer,
                &requested,
                &self.history,
                self.stream,
                move || flag.load(Ordering::Relaxed),
                |text| {
                    if !started {
                        renderer.start_response(&requested);
                        started = true;
                    }
                    renderer.print_text(text);
                },
            )
            .await;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) => {
                self.history.truncate(previous_len);
                return Err(err);
            }
        };

        if started {
            renderer.finish_response();
        } else if let Some(text) = &outcome.text {
            renderer.start_response(&outcome.model);
            renderer.print_text(text);
            renderer.finish_response();
        }

        match outcome.text {
            Some(text) => self.history.push(ChatMessage::assistant(text)),
            None => {
                self.history.truncate(previous_len);
                renderer.print_warning("The gateway returned an empty response.");
                return Ok(());
            }
        }

        if outcome.model != self.model {
            renderer.print_info(&format!("Model updated to: {}", outcome.model));
            self.model = outcome.model;
        }
        Ok(())
    }

    /// Flag a Ctrl+C handler sets to interrupt the request in flight.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupted)
    }

    /// Clears the conversation history.
    pub fn clear(&mut self) {
        self.history.clear();
    }

    /// Restores history, model and streaming mode to their startup defaults.
    pub fn reset_defaults(&mut self) {
        self.history.clear();
        self.model = DEFAULT_MODEL.to_string();
        self.stream = true;
    }

    /// Returns the number of messages in the conversation.
    pub fn message_count(&self) -> usize {
        self.history.len()
    }

    /// The conversation so far.
    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Changes the model used for responses.
    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
    }

    /// Returns the current model.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Whether responses stream.
    pub fn stream(&self) -> bool {
        self.stream
    }

    /// Flips streaming mode and returns the new setting.
    pub fn toggle_stream(&mut self) -> bool {
        self.stream = !self.stream;
        self.stream
    }

    pub fn client(&self) -> &GatewayClient {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut GatewayClient {
        &mut self.client
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut CredentialStore {
        &mut self.store
    }

    /// Returns the current session statistics snapshot.
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            endpoint: self.client.endpoint().to_string(),
            model: self.model.clone(),
            stream: self.stream,
            message_count: self.history.len(),
            active_token: self.store.active_token_name().map(String::from),
        }
    }
}
