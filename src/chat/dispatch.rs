//! Executes parsed slash commands against a [`ChatSession`].

use std::sync::atomic::Ordering;

use crate::chat::commands::{
    ApiKeyCommand, ChatCommand, TokenCommand, apikey_help_text, help_text, token_help_text,
};
use crate::chat::prompt::Prompter;
use crate::chat::session::ChatSession;
use crate::client::{Connectivity, PROBE_TIMEOUT, ProbeOutcome, VERIFY_TIMEOUT, validate_endpoint};
use crate::error::{Error, Result};
use crate::models::{CATALOG, served_model_matches};
use crate::render::Renderer;
use crate::store::Confirmed;
use crate::types::{ChatCompletionRequest, ChatMessage};
use crate::utils::time::format_created;

/// Shortest value `/token add` accepts.
const MIN_TOKEN_LEN: usize = 20;

const DEFAULT_TOKEN_NAME: &str = "default";
const DEFAULT_APIKEY_NAME: &str = "my-app";

/// What the REPL does after a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Control {
    Continue,
    Exit,
}

/// Runs one command.  Failures are reported through `renderer` and never
/// end the session.
pub async fn dispatch(
    command: ChatCommand,
    session: &mut ChatSession,
    renderer: &mut dyn Renderer,
    prompter: &mut dyn Prompter,
) -> Control {
    let result = match command {
        ChatCommand::Exit => return Control::Exit,
        ChatCommand::Help => {
            renderer.print_info(help_text());
            Ok(())
        }
        ChatCommand::Status => {
            show_status(session, renderer).await;
            Ok(())
        }
        ChatCommand::Models => {
            list_models(renderer);
            Ok(())
        }
        ChatCommand::Use(model) => {
            use_model(session, renderer, &model).await;
            Ok(())
        }
        ChatCommand::ToggleStream => {
            if session.toggle_stream() {
                renderer.print_success("Streaming enabled");
            } else {
                renderer.print_warning("Streaming disabled");
            }
            Ok(())
        }
        ChatCommand::Clear => {
            session.clear();
            renderer.print_success("Conversation history cleared");
            Ok(())
        }
        ChatCommand::Reset => reset(session, renderer, prompter),
        ChatCommand::Web => {
            open_web(session, renderer);
            Ok(())
        }
        ChatCommand::Endpoint(None) => {
            renderer.print_info(&format!(
                "Current endpoint: {}\nUsage: /endpoint <url>",
                session.client().endpoint()
            ));
            Ok(())
        }
        ChatCommand::Endpoint(Some(candidate)) => {
            switch_endpoint(session, renderer, &candidate).await
        }
        ChatCommand::Token(sub) => token_command(sub, session, renderer, prompter),
        ChatCommand::ApiKey(sub) => apikey_command(sub, session, renderer, prompter).await,
        ChatCommand::Invalid(message) => {
            renderer.print_error(&message);
            renderer.print_info("Type /help to see all available commands");
            Ok(())
        }
    };
    if let Err(err) = result {
        renderer.print_error(&err.to_string());
    }
    Control::Continue
}

async fn show_status(session: &ChatSession, renderer: &mut dyn Renderer) {
    let stats = session.stats();
    let connectivity = match session.client().status().await {
        Connectivity::Online { .. } => "ONLINE".to_string(),
        Connectivity::Offline { reason } => {
            tracing::debug!(endpoint = %stats.endpoint, reason = %reason, "status check failed");
            "OFFLINE".to_string()
        }
    };
    let streaming = if stats.stream { "Enabled" } else { "Disabled" };
    let rows = vec![
        vec!["Status".to_string(), connectivity],
        vec!["Endpoint".to_string(), stats.endpoint],
        vec!["Model".to_string(), stats.model],
        vec!["Streaming".to_string(), streaming.to_string()],
        vec!["Messages".to_string(), stats.message_count.to_string()],
        vec![
            "Token".to_string(),
            stats.active_token.unwrap_or_else(|| "none".to_string()),
        ],
    ];
    renderer.print_table(&["Setting", "Value"], &rows);
}

fn list_models(renderer: &mut dyn Renderer) {
    let rows: Vec<Vec<String>> = CATALOG
        .iter()
        .map(|m| vec![m.name.to_string(), m.title.to_string(), m.best_for.to_string()])
        .collect();
    renderer.print_table(&["Model", "Description", "Best For"], &rows);
    renderer.print_info("Usage: /use <model-name>");
}

/// Switches first, then verifies; verification never undoes the switch.
async fn use_model(session: &mut ChatSession, renderer: &mut dyn Renderer, model: &str) {
    session.set_model(model);
    renderer.print_info(&format!("Verifying model '{model}'..."));
    let flag = session.interrupt_flag();
    let interrupted = move || flag.load(Ordering::Relaxed);
    let verified = match session.store().get_active_token() {
        Some(bearer) => match session.client().served_model(bearer, model, interrupted).await {
            Ok(served) => served_model_matches(model, &served),
            Err(err) if err.is_abort() => {
                renderer.print_interrupted();
                renderer.print_warning(&format!("Model switched to {model}; verification skipped"));
                return;
            }
            Err(err) => {
                tracing::debug!(model, error = %err, "model verification failed");
                false
            }
        },
        None => false,
    };
    if verified {
        renderer.print_success(&format!("Model switched to {model} and verified"));
    } else {
        renderer.print_warning(&format!(
            "Model switched to {model}, but it could not be verified. Send a message to try it."
        ));
    }
}

fn reset(
    session: &mut ChatSession,
    renderer: &mut dyn Renderer,
    prompter: &mut dyn Prompter,
) -> Result<()> {
    let answer = prompter.ask("Reset all settings, tokens and API keys? (yes/no): ");
    let Some(confirmed) = answer.as_deref().and_then(Confirmed::from_answer) else {
        renderer.print_info("Reset cancelled");
        return Ok(());
    };
    session.store_mut().reset(confirmed)?;
    session.reset_defaults();
    renderer.print_success("Reset complete. Add a new token with /token add");
    Ok(())
}

fn open_web(session: &ChatSession, renderer: &mut dyn Renderer) {
    let url = format!("{}/", session.client().endpoint());
    match webbrowser::open(&url) {
        Ok(()) => renderer.print_success(&format!("Opening {url}")),
        Err(err) => {
            renderer.print_error(&format!("Failed to open browser: {err}"));
            renderer.print_info(&format!("Please open {url} manually"));
        }
    }
}

async fn switch_endpoint(
    session: &mut ChatSession,
    renderer: &mut dyn Renderer,
    candidate: &str,
) -> Result<()> {
    let endpoint = validate_endpoint(candidate)?;
    renderer.print_info(&format!("Testing endpoint: {endpoint}..."));
    let outcome = match session.client().probe_endpoint(&endpoint).await {
        Ok(outcome) => outcome,
        Err(err) if err.is_timeout() => {
            return Err(Error::timeout(
                format!(
                    "{endpoint} did not respond within {}s",
                    PROBE_TIMEOUT.as_secs()
                ),
                Some(PROBE_TIMEOUT.as_secs_f64()),
            ));
        }
        Err(err) if err.is_connection() => {
            return Err(Error::connection(
                format!("{endpoint} is not reachable (connection refused)"),
                Some(Box::new(err)),
            ));
        }
        Err(err) => return Err(err),
    };
    match outcome {
        ProbeOutcome::Rejected { status } => {
            renderer.print_warning(&format!(
                "{endpoint} answered with status {status}; keeping {}",
                session.client().endpoint()
            ));
            Ok(())
        }
        ProbeOutcome::Healthy | ProbeOutcome::SecuredGateway => {
            session.store_mut().set_endpoint(&endpoint)?;
            session.client_mut().set_endpoint(&endpoint);
            if outcome == ProbeOutcome::SecuredGateway {
                renderer.print_success(&format!("Secured gateway detected; now using {endpoint}"));
            } else {
                renderer.print_success(&format!("Endpoint switched to {endpoint}"));
            }
            Ok(())
        }
    }
}

fn token_command(
    command: TokenCommand,
    session: &mut ChatSession,
    renderer: &mut dyn Renderer,
    prompter: &mut dyn Prompter,
) -> Result<()> {
    match command {
        TokenCommand::Help => renderer.print_info(token_help_text()),
        TokenCommand::Add => add_token(session, renderer, prompter)?,
        TokenCommand::List => list_tokens(session, renderer),
        TokenCommand::Use(name) => {
            if session.store_mut().use_token(&name)? {
                renderer.print_success(&format!("Now using token '{name}'"));
            } else {
                renderer.print_error(&format!("Token '{name}' not found"));
                renderer.print_info("Use /token list to see available tokens");
            }
        }
        TokenCommand::Remove(name) => {
            if session.store_mut().remove_token(&name)? {
                renderer.print_success(&format!("Token '{name}' removed"));
            } else {
                renderer.print_error(&format!("Token '{name}' not found"));
            }
        }
    }
    Ok(())
}

fn add_token(
    session: &mut ChatSession,
    renderer: &mut dyn Renderer,
    prompter: &mut dyn Prompter,
) -> Result<()> {
    let Some(name) = ask_name(prompter, "Token name", DEFAULT_TOKEN_NAME) else {
        renderer.print_info("Operation cancelled");
        return Ok(());
    };
    if session.store().has_token(&name)
        && !prompter.confirm(&format!("Token '{name}' already exists. Replace it?"), false)
    {
        renderer.print_info("Operation cancelled");
        return Ok(());
    }

    renderer.print_info("Find your access token at https://chatgpt.com/api/auth/session");
    let Some(value) = prompter.ask("Access token: ") else {
        renderer.print_info("Operation cancelled");
        return Ok(());
    };
    let value = value.trim();
    if value.chars().count() < MIN_TOKEN_LEN {
        return Err(Error::validation(
            format!("token must be at least {MIN_TOKEN_LEN} characters"),
            Some("token".to_string()),
        ));
    }

    session.store_mut().add_token(&name, value)?;
    renderer.print_success(&format!(
        "Token '{name}' added ({})",
        preview(value, 12, 6, 0)
    ));
    if prompter.confirm("Use this token now?", true) {
        session.store_mut().use_token(&name)?;
        renderer.print_success(&format!("Now using token '{name}'"));
    }
    Ok(())
}

fn list_tokens(session: &ChatSession, renderer: &mut dyn Renderer) {
    let store = session.store();
    if store.tokens().is_empty() {
        renderer.print_warning("No access tokens configured. Add one with /token add");
        return;
    }
    let active = store.active_token_name();
    let rows: Vec<Vec<String>> = store
        .tokens()
        .iter()
        .map(|token| {
            let status = if Some(token.name.as_str()) == active {
                "Active"
            } else {
                "Inactive"
            };
            vec![
                token.name.clone(),
                token_kind(&token.value).to_string(),
                preview(&token.value, 12, 6, 25),
                status.to_string(),
            ]
        })
        .collect();
    renderer.print_table(&["Name", "Type", "Preview", "Status"], &rows);
    match &store.settings().active_token {
        Some(name) => renderer.print_info(&format!("Active token: {name}")),
        None => renderer.print_info("Auto-selection enabled"),
    }
}

async fn apikey_command(
    command: ApiKeyCommand,
    session: &mut ChatSession,
    renderer: &mut dyn Renderer,
    prompter: &mut dyn Prompter,
) -> Result<()> {
    match command {
        ApiKeyCommand::Help => renderer.print_info(apikey_help_text()),
        ApiKeyCommand::Generate => generate_apikey(session, renderer, prompter)?,
        ApiKeyCommand::List => list_apikeys(session, renderer),
        ApiKeyCommand::Test(name) => test_apikey(session, renderer, &name).await?,
        ApiKeyCommand::Remove(name) => {
            if session.store_mut().remove_apikey(&name)? {
                renderer.print_success(&format!("API key '{name}' removed"));
            } else {
                renderer.print_error(&format!("API key '{name}' not found"));
            }
        }
    }
    Ok(())
}

fn generate_apikey(
    session: &mut ChatSession,
    renderer: &mut dyn Renderer,
    prompter: &mut dyn Prompter,
) -> Result<()> {
    if session.store().get_active_token().is_none() {
        return Err(Error::authentication(
            "no access token configured; add one with /token add first",
        ));
    }
    let Some(name) = ask_name(prompter, "API key name", DEFAULT_APIKEY_NAME) else {
        renderer.print_info("Operation cancelled");
        return Ok(());
    };
    if session.store().has_apikey(&name)
        && !prompter.confirm(&format!("API key '{name}' already exists. Replace it?"), false)
    {
        renderer.print_info("Operation cancelled");
        return Ok(());
    }

    let key = session.store_mut().generate_api_key(&name)?;
    renderer.print_success(&format!("API key '{name}' generated"));
    renderer.print_info(&format!(
        "API Key:  {key}\nBase URL: {}/v1\nKeep this key private; remove it with /apikey remove {name}",
        session.client().endpoint()
    ));
    Ok(())
}

fn list_apikeys(session: &ChatSession, renderer: &mut dyn Renderer) {
    let apikeys = session.store().apikeys();
    if apikeys.is_empty() {
        renderer.print_warning("No API keys generated yet. Create one with /apikey generate");
        return;
    }
    let rows: Vec<Vec<String>> = apikeys
        .iter()
        .map(|(name, record)| {
            vec![
                name.to_string(),
                preview(&record.key, 15, 8, 30),
                record.token_name.clone(),
                format_created(&record.created),
            ]
        })
        .collect();
    renderer.print_table(&["Name", "API Key", "Token Source", "Created"], &rows);
    renderer.print_info(&format!("Base URL: {}/v1", session.client().endpoint()));
}

/// Sends a one-turn request authenticated with the API key itself, so the
/// gateway's key mapping is exercised end to end.
async fn test_apikey(session: &ChatSession, renderer: &mut dyn Renderer, name: &str) -> Result<()> {
    let Some(record) = session.store().apikeys().get(name) else {
        renderer.print_error(&format!("API key '{name}' not found"));
        renderer.print_info("List available keys with /apikey list");
        return Ok(());
    };
    renderer.print_info(&format!(
        "Key: {name}\nToken: {}\nEndpoint: {}\nModel: {}\nSending test request...",
        record.token_name,
        session.client().endpoint(),
        session.model()
    ));

    let request = ChatCompletionRequest::new(session.model(), vec![ChatMessage::user("Hi")]);
    let flag = session.interrupt_flag();
    let outcome = session
        .client()
        .complete(&record.key, request, VERIFY_TIMEOUT, move || {
            flag.load(Ordering::Relaxed)
        })
        .await?;

    let reply = outcome.text.unwrap_or_default();
    renderer.print_success(&format!("API key '{name}' is working"));
    renderer.print_info(&format!("Response: {}", preview_prefix(&reply, 100)));
    Ok(())
}

/// Asks for a name; an empty answer takes `default`, `None` means cancelled.
fn ask_name(prompter: &mut dyn Prompter, label: &str, default: &str) -> Option<String> {
    let answer = prompter.ask(&format!("{label} [{default}]: "))?;
    let answer = answer.trim();
    if answer.is_empty() {
        Some(default.to_string())
    } else {
        Some(answer.to_string())
    }
}

fn token_kind(value: &str) -> &'static str {
    if value.starts_with("eyJ") {
        "JWT"
    } else if value.starts_with("fk-") {
        "FakeOpen"
    } else if value.chars().count() == 45 {
        "Refresh"
    } else {
        "Unknown"
    }
}

/// `head...tail` for values longer than `min_len` characters.
fn preview(value: &str, head: usize, tail: usize, min_len: usize) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= min_len || chars.len() <= head + tail {
        return value.to_string();
    }
    let start: String = chars[..head].iter().collect();
    let end: String = chars[chars.len() - tail..].iter().collect();
    format!("{start}...{end}")
}

fn preview_prefix(value: &str, len: usize) -> String {
    if value.chars().count() > len {
        let prefix: String = value.chars().take(len).collect();
        format!("{prefix}...")
    } else {
        value.to_string()
    }
}
