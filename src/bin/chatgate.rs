//! Interactive chat client for an OpenAI-compatible ChatGPT gateway.
//!
//! # Usage
//!
//! ```bash
//! # Basic usage with default settings
//! chatgate
//!
//! # Talk to a remote gateway for this session only
//! chatgate --endpoint https://gw.example.com
//!
//! # Keep credentials somewhere else and start on another model
//! chatgate --data-dir ~/.chatgate --model gpt-4o
//!
//! # Disable colors (useful for piping output)
//! chatgate --no-color
//! ```
//!
//! While chatting, `/help` lists the slash commands.  Set `RUST_LOG` to see
//! diagnostics on stderr.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use arrrg::CommandLine;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing_subscriber::EnvFilter;

use chatgate::chat::{
    ChatArgs, ChatConfig, ChatSession, Control, PlainTextRenderer, Prompter, Renderer, dispatch,
    parse_command,
};
use chatgate::{CredentialStore, GatewayClient, RemoteSync};

/// [`Prompter`] over the same line editor the REPL reads from.
struct LinePrompter {
    editor: DefaultEditor,
}

impl Prompter for LinePrompter {
    fn ask(&mut self, prompt: &str) -> Option<String> {
        self.editor.readline(prompt).ok()
    }
}

/// Main entry point for the chatgate application.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let (args, _) = ChatArgs::from_command_line_relaxed("chatgate [OPTIONS]");
    let config = ChatConfig::from(args);
    let mut renderer = PlainTextRenderer::with_color(config.use_color);

    let client = GatewayClient::new(chatgate::config::DEFAULT_ENDPOINT)?;
    let sync = RemoteSync::new(client.transport(), tokio::runtime::Handle::current());
    let mut store = CredentialStore::open(config.data_paths()).with_sync_hook(Arc::new(sync));
    match store.import_seed_tokens(&config.seed_tokens) {
        Ok(0) => {}
        Ok(n) => renderer.print_info(&format!(
            "Imported {n} token(s) from {}",
            config.seed_tokens.display()
        )),
        Err(err) => renderer.print_warning(&format!("Could not import seed tokens: {err}")),
    }
    match store.import_token_log() {
        Ok(true) => renderer.print_info("Recovered token 'auto' from the token log"),
        Ok(false) => {}
        Err(err) => renderer.print_warning(&format!("Could not import the token log: {err}")),
    }

    let mut session = ChatSession::new(client, store, &config);
    let mut prompter = LinePrompter {
        editor: DefaultEditor::new()?,
    };

    // Flag for interrupt handling during requests
    let interrupted = session.interrupt_flag();
    let interrupted_clone = interrupted.clone();
    ctrlc::set_handler(move || {
        interrupted_clone.store(true, Ordering::Relaxed);
    })?;

    println!(
        "chatgate (endpoint: {}, model: {})",
        session.client().endpoint(),
        session.model()
    );
    if session.store().get_active_token().is_none() {
        renderer.print_warning("No access token configured. Add one with /token add");
    }
    println!("Type /help for commands, /exit to quit\n");

    loop {
        // Reset interrupt flag before each input
        interrupted.store(false, Ordering::Relaxed);

        let readline = prompter.editor.readline("You: ");

        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let _ = prompter.editor.add_history_entry(line);

                if let Some(cmd) = parse_command(line) {
                    match dispatch(cmd, &mut session, &mut renderer, &mut prompter).await {
                        Control::Continue => continue,
                        Control::Exit => {
                            println!("Goodbye!");
                            break;
                        }
                    }
                }

                if let Err(e) = session.send(line, &mut renderer).await {
                    if e.is_abort() {
                        renderer.print_interrupted();
                    } else {
                        renderer.print_error(&e.to_string());
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                // Ctrl+C at prompt - soft interrupt
                renderer.print_warning("Interrupted. Type /exit to quit.");
                continue;
            }
            Err(ReadlineError::Eof) => {
                // Ctrl+D - exit
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                renderer.print_error(&format!("Input error: {}", err));
                break;
            }
        }
    }

    Ok(())
}
