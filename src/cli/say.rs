//! One-shot prompt without the interactive loop

use std::error::Error;

use tokio::sync::mpsc;

use crate::core::chat_stream::StreamMessage;
use crate::core::message::TurnId;
use crate::core::session::{StreamingSession, TurnOutcome};

pub async fn run_say(
    prompt: Vec<String>,
    mut session: StreamingSession,
    mut rx: mpsc::UnboundedReceiver<(StreamMessage, TurnId)>,
) -> Result<(), Box<dyn Error>> {
    let prompt = prompt.join(" ");
    if prompt.trim().is_empty() {
        eprintln!("Usage: jrchat say <prompt>");
        std::process::exit(1);
    }

    session.submit(&prompt)?;
    match session.run_until_idle(&mut rx).await {
        Some(TurnOutcome::Completed { .. }) => Ok(()),
        Some(TurnOutcome::Failed { .. }) => std::process::exit(1),
        None => Err("stream channel closed before the reply finished".into()),
    }
}
