//! Slash command parsing for the chat application.
//!
//! Commands start with `/` and control the session, the credential store, or
//! the gateway endpoint.  They are never sent to the gateway as chat text.

/// A parsed chat command.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatCommand {
    /// Display help information.
    Help,

    /// Show endpoint, model, streaming flag and connectivity.
    Status,

    /// List the model catalog.
    Models,

    /// Switch to another model.
    Use(String),

    /// Toggle streaming responses.
    ToggleStream,

    /// Clear the conversation history.
    Clear,

    /// Wipe credentials and restore session defaults, after confirmation.
    Reset,

    /// Open the gateway's web page.
    Web,

    /// Show (`None`) or change the gateway endpoint.
    Endpoint(Option<String>),

    /// Upstream token management.
    Token(TokenCommand),

    /// Client API key management.
    ApiKey(ApiKeyCommand),

    /// Exit the chat application.
    Exit,

    /// Report a parsing error back to the caller.
    Invalid(String),
}

/// `/token` subcommands.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenCommand {
    Help,
    Add,
    List,
    Use(String),
    Remove(String),
}

/// `/apikey` subcommands.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiKeyCommand {
    Help,
    Generate,
    List,
    Test(String),
    Remove(String),
}

/// Parses user input for slash commands.
///
/// Returns `Some(ChatCommand)` if the input is a command, or `None` if it
/// should be sent as a chat message.  The bare words `exit` and `bye` are
/// treated as [`ChatCommand::Exit`].
///
/// # Examples
///
/// ```
/// # use chatgate::chat::{parse_command, ChatCommand};
/// assert_eq!(parse_command("/quit"), Some(ChatCommand::Exit));
/// assert!(parse_command("/use gpt-4o").is_some());
/// assert!(parse_command("Hello there").is_none());
/// ```
pub fn parse_command(input: &str) -> Option<ChatCommand> {
    let input = input.trim();

    if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("bye") {
        return Some(ChatCommand::Exit);
    }
    let rest = input.strip_prefix('/')?;

    let (command, argument) = split_word(rest);
    let command = command.to_lowercase();

    let result = match command.as_str() {
        "help" | "?" => ChatCommand::Help,
        "status" => ChatCommand::Status,
        "models" => ChatCommand::Models,
        "use" => match argument {
            Some(model) => ChatCommand::Use(model.to_string()),
            None => ChatCommand::Invalid("/use requires a model name".to_string()),
        },
        "stream" => ChatCommand::ToggleStream,
        "clear" => ChatCommand::Clear,
        "reset" => ChatCommand::Reset,
        "web" => ChatCommand::Web,
        "endpoint" => ChatCommand::Endpoint(argument.map(|s| s.to_string())),
        "token" => parse_token_command(argument),
        "apikey" => parse_apikey_command(argument),
        "exit" | "quit" | "q" => ChatCommand::Exit,
        _ => ChatCommand::Invalid(format!("Unknown command: /{command}")),
    };

    Some(result)
}

fn split_word(input: &str) -> (&str, Option<&str>) {
    let input = input.trim();
    match input.split_once(char::is_whitespace) {
        Some((head, tail)) => {
            let tail = tail.trim();
            (head, (!tail.is_empty()).then_some(tail))
        }
        None => (input, None),
    }
}

fn parse_token_command(argument: Option<&str>) -> ChatCommand {
    let Some(arg) = argument else {
        return ChatCommand::Token(TokenCommand::Help);
    };
    let (action, name) = split_word(arg);
    let action = action.to_lowercase();
    let sub = match (action.as_str(), name) {
        ("add", _) => TokenCommand::Add,
        ("list", _) => TokenCommand::List,
        ("use", Some(name)) => TokenCommand::Use(name.to_string()),
        ("remove", Some(name)) => TokenCommand::Remove(name.to_string()),
        ("use" | "remove", None) => {
            return ChatCommand::Invalid(format!("Usage: /token {action} <name>"));
        }
        _ => return ChatCommand::Invalid(format!("Unknown token command: {action}")),
    };
    ChatCommand::Token(sub)
}

fn parse_apikey_command(argument: Option<&str>) -> ChatCommand {
    let Some(arg) = argument else {
        return ChatCommand::ApiKey(ApiKeyCommand::Help);
    };
    let (action, name) = split_word(arg);
    let action = action.to_lowercase();
    let sub = match (action.as_str(), name) {
        ("generate" | "gen" | "add", _) => ApiKeyCommand::Generate,
        ("list" | "ls", _) => ApiKeyCommand::List,
        ("test", Some(name)) => ApiKeyCommand::Test(name.to_string()),
        ("remove" | "rm" | "delete", Some(name)) => ApiKeyCommand::Remove(name.to_string()),
        ("test" | "remove" | "rm" | "delete", None) => {
            return ChatCommand::Invalid(format!("Usage: /apikey {action} <name>"));
        }
        _ => return ChatCommand::Invalid(format!("Unknown apikey command: {action}")),
    };
    ChatCommand::ApiKey(sub)
}

/// Returns help text describing available commands.
pub fn help_text() -> &'static str {
    r#"Available commands:
  /help                  Show this help message
  /status                Show endpoint, model and connectivity
  /models                List available models
  /use <model>           Switch model (e.g., /use gpt-4o)
  /stream                Toggle streaming responses
  /clear                 Clear conversation history
  /reset                 Remove all tokens and API keys (asks first)
  /token                 Token management (add, list, use, remove)
  /apikey                API key management (generate, list, test, remove)
  /endpoint [url]        Show or change the gateway endpoint
  /web                   Open the gateway web page
  /exit                  Exit the chat"#
}

/// Help for `/token` with no subcommand.
pub fn token_help_text() -> &'static str {
    r#"Token commands:
  /token add             Add an upstream access token
  /token list            List configured tokens
  /token use <name>      Make a token active
  /token remove <name>   Delete a token"#
}

/// Help for `/apikey` with no subcommand.
pub fn apikey_help_text() -> &'static str {
    r#"API key commands:
  /apikey generate       Create an sk- key bound to the active token
  /apikey list           List API keys
  /apikey test <name>    Send a test request with the key
  /apikey remove <name>  Delete an API key"#
}
