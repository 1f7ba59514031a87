//! Command-line interface parsing and handling
//!
//! This module parses command-line arguments, assembles a streaming session
//! from configuration and environment, and dispatches to the chosen command.

pub mod chat;
pub mod render;
pub mod say;

use std::env;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::api::client::OpenAiCompatibleClient;
use crate::cli::chat::ChatLoop;
use crate::cli::render::TerminalRenderer;
use crate::core::chat_stream::{ChatStreamService, StreamMessage};
use crate::core::config::Config;
use crate::core::message::TurnId;
use crate::core::session::StreamingSession;
use crate::core::settings::SessionSettings;
use crate::utils::logging::TranscriptLog;

#[derive(Parser)]
#[command(name = "jrchat")]
#[command(about = "A streaming chat client for OpenAI-compatible APIs")]
#[command(
    long_about = "jrchat sends your messages to a selectable remote model and prints the \
reply as it streams in.\n\n\
Environment Variables:\n\
  OPENAI_API_KEY    API key sent as a bearer token\n\
  OPENAI_BASE_URL   Custom API base URL (optional, defaults to https://api.openai.com/v1)\n\
  RUST_LOG          Diagnostic log filter, written to stderr (defaults to warn)\n\n\
Commands inside the chat:\n\
  /new              Start a new conversation\n\
  /model <id>       Switch model for the next message\n\
  /usage            Show token usage\n\
  /quit             Leave"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Model to use for chat
    #[arg(short = 'm', long, global = true)]
    pub model: Option<String>,

    /// Base URL of the chat completions API
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Path to the configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Append the conversation to the specified file
    #[arg(short = 'l', long, global = true)]
    pub log: Option<String>,

    /// Fail a reply when no output arrives for this many seconds
    #[arg(short = 't', long, global = true)]
    pub timeout: Option<u64>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Start the interactive chat (default)
    Chat,
    /// Send a single prompt and print the reply
    Say {
        #[arg(trailing_var_arg = true)]
        prompt: Vec<String>,
    },
    /// Print the effective configuration
    Config,
}

pub fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();
    tokio::runtime::Runtime::new()?.block_on(async_main())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let config_path = match args.config.clone() {
        Some(path) => Some(path),
        None => Config::config_path()
            .map_err(|e| warn!("{e}; continuing without a config file"))
            .ok(),
    };
    let config = load_config(config_path.as_deref());

    match args.command.as_ref().unwrap_or(&Commands::Chat) {
        Commands::Config => {
            println!("{}", config.describe());
            Ok(())
        }
        Commands::Say { prompt } => {
            let (session, rx) = build_session(&args, &config);
            say::run_say(prompt.clone(), session, rx).await
        }
        Commands::Chat => {
            let (session, rx) = build_session(&args, &config);
            ChatLoop {
                session,
                rx,
                config,
                config_path,
            }
            .run()
            .await
        }
    }
}

/// Load configuration, falling back to defaults when it is missing or broken.
fn load_config(path: Option<&std::path::Path>) -> Config {
    let Some(path) = path else {
        return Config::default();
    };
    Config::load_from_path(path).unwrap_or_else(|e| {
        warn!("{e}; using default configuration");
        Config::default()
    })
}

pub fn resolve_settings(args: &Args, config: &Config) -> SessionSettings {
    let mut settings = SessionSettings::from_config(config);
    if let Some(model) = &args.model {
        settings.select_model(model);
    }
    if let Some(secs) = args.timeout {
        settings = settings.with_stream_timeout((secs > 0).then(|| Duration::from_secs(secs)));
    }
    settings
}

pub fn resolve_base_url(args: &Args, config: &Config) -> String {
    args.base_url
        .clone()
        .or_else(|| env::var("OPENAI_BASE_URL").ok().filter(|url| !url.is_empty()))
        .unwrap_or_else(|| config.base_url().to_string())
}

fn build_session(
    args: &Args,
    config: &Config,
) -> (
    StreamingSession,
    mpsc::UnboundedReceiver<(StreamMessage, TurnId)>,
) {
    let api_key = env::var("OPENAI_API_KEY").unwrap_or_else(|_| {
        warn!("OPENAI_API_KEY is not set; sending requests without a key");
        String::new()
    });
    let client = OpenAiCompatibleClient::new(
        reqwest::Client::new(),
        resolve_base_url(args, config),
        api_key,
    );

    let (service, rx) = ChatStreamService::new();
    let mut session = StreamingSession::new(Arc::new(client), service, resolve_settings(args, config));
    session.add_observer(Box::new(TerminalRenderer::stdout()));
    if let Some(log_path) = args.log.as_ref().or(config.transcript_log.as_ref()) {
        session.add_observer(Box::new(TranscriptLog::new(log_path)));
    }
    (session, rx)
}
