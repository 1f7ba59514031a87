//! Interactive line-oriented chat loop.

use std::error::Error;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::core::chat_stream::StreamMessage;
use crate::core::config::Config;
use crate::core::error::ChatError;
use crate::core::message::TurnId;
use crate::core::session::StreamingSession;
use crate::core::tokens::TokenQuota;
use crate::core::usage::UsageSummary;
use crate::utils::logging::export_transcript;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputAction {
    Submit(String),
    NewConversation,
    SelectModel(String),
    ListModels,
    ShowUsage,
    SetBalance(String),
    Export(String),
    Help,
    Quit,
    Unknown(String),
    Empty,
}

pub fn parse_input(line: &str) -> InputAction {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return InputAction::Empty;
    }
    let Some(command) = trimmed.strip_prefix('/') else {
        return InputAction::Submit(trimmed.to_string());
    };

    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };
    match (name, arg) {
        ("new", _) => InputAction::NewConversation,
        ("model", "") => InputAction::ListModels,
        ("model", model) => InputAction::SelectModel(model.to_string()),
        ("models", _) => InputAction::ListModels,
        ("usage", _) => InputAction::ShowUsage,
        ("balance", value) => InputAction::SetBalance(value.to_string()),
        ("export", path) if !path.is_empty() => InputAction::Export(path.to_string()),
        ("help", _) => InputAction::Help,
        ("quit", _) | ("exit", _) => InputAction::Quit,
        _ => InputAction::Unknown(trimmed.to_string()),
    }
}

const HELP_TEXT: &str = "Commands:
  /new              Start a new conversation
  /model <id>       Use another model from the next message on
  /models           List enabled models
  /usage            Show token usage
  /balance <n>      Record the remaining provider token balance
  /export <path>    Save the conversation as JSON
  /quit             Leave";

pub struct ChatLoop {
    pub session: StreamingSession,
    pub rx: mpsc::UnboundedReceiver<(StreamMessage, TurnId)>,
    pub config: Config,
    pub config_path: Option<PathBuf>,
}

impl ChatLoop {
    pub async fn run(self) -> Result<(), Box<dyn Error>> {
        self.run_with_input(BufReader::new(tokio::io::stdin())).await
    }

    pub(crate) async fn run_with_input<R>(mut self, input: R) -> Result<(), Box<dyn Error>>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        let mut quota = TokenQuota::from_stored(self.config.tokens_remaining);

        println!(
            "Chatting with {}. Type /help for commands.\n",
            self.session.settings().selected_model()
        );

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let line = match line {
                        Ok(Some(line)) => line,
                        Ok(None) => {
                            // stdin closed; let the current reply finish first
                            self.session.run_until_idle(&mut self.rx).await;
                            break;
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                            warn!("Skipping input line that is not valid UTF-8: {e}");
                            continue;
                        }
                        Err(e) => return Err(e.into()),
                    };
                    if !self.handle_input(parse_input(&line), &mut quota) {
                        break;
                    }
                }
                Some((message, stream_id)) = self.rx.recv() => {
                    if let Some(outcome) = self.session.handle_stream_message(message, &stream_id) {
                        debug!(?outcome, "turn resolved");
                    }
                }
            }
        }
        Ok(())
    }

    /// Apply one line of input. Returns `false` when the loop should stop.
    pub(crate) fn handle_input(&mut self, action: InputAction, quota: &mut TokenQuota) -> bool {
        match action {
            InputAction::Submit(text) => match self.session.submit(&text) {
                Ok(turn) => debug!(turn = %turn, "submitted"),
                // input is ignored while a reply is streaming
                Err(ChatError::Conflict(active)) => debug!(turn = %active, "ignoring submission"),
                Err(err) => debug!("{err}"),
            },
            InputAction::NewConversation => self.session.new_conversation(),
            InputAction::SelectModel(model) => {
                if self.session.select_model(&model) {
                    if !self.session.settings().is_enabled(&model) {
                        println!("Note: {model} is not in the enabled model list.");
                    }
                    println!("Using {model} from the next message on.");
                }
            }
            InputAction::ListModels => {
                let selected = self.session.settings().selected_model().to_string();
                for model in self.session.settings().enabled_models() {
                    let marker = if *model == selected { "*" } else { " " };
                    println!("{marker} {model}");
                }
            }
            InputAction::ShowUsage => {
                let summary = UsageSummary::new(
                    "",
                    self.session.usage(),
                    self.session.store().len(),
                    quota,
                );
                println!("{}", summary.render());
            }
            InputAction::SetBalance(value) => self.set_balance(&value, quota),
            InputAction::Export(path) => {
                match export_transcript(Path::new(&path), self.session.store().turns()) {
                    Ok(()) => println!("Exported conversation to {path}"),
                    Err(e) => eprintln!("❌ Export failed: {e}"),
                }
            }
            InputAction::Help => println!("{HELP_TEXT}"),
            InputAction::Quit => return false,
            InputAction::Unknown(command) => eprintln!("Unknown command: {command}"),
            InputAction::Empty => {}
        }
        true
    }

    fn set_balance(&mut self, value: &str, quota: &mut TokenQuota) {
        let parsed = value
            .replace(['_', ','], "")
            .parse::<u64>()
            .map_err(|_| ChatError::InvalidInput(format!("not a token count: {value}")))
            .and_then(|remaining| quota.set_remaining(remaining));
        if let Err(e) = parsed {
            eprintln!("❌ {e}");
            return;
        }
        println!("Token balance set to {}.", quota.remaining());

        self.config.tokens_remaining = Some(quota.remaining());
        if let Some(path) = &self.config_path {
            if let Err(e) = self.config.save_to_path(path) {
                warn!("{e}");
            }
        }
    }
}
