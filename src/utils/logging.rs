//! Best-effort local mirror of the conversation.
//!
//! Nothing here may disturb the conversation itself: write failures are
//! logged and otherwise ignored.

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::warn;

use crate::core::message::{ConversationTurn, TurnId};
use crate::core::store::{StoreEvent, StoreObserver};

/// Appends finished turns to a plain-text log file.
pub struct TranscriptLog {
    file_path: PathBuf,
    user_display_name: String,
}

impl TranscriptLog {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            user_display_name: "You".to_string(),
        }
    }

    pub fn with_user_display_name(mut self, name: impl Into<String>) -> Self {
        self.user_display_name = name.into();
        self
    }

    fn log_turn(&self, turns: &[ConversationTurn], id: &TurnId) {
        let Some(turn) = turns.iter().find(|turn| &turn.id == id) else {
            return;
        };
        let entry = if turn.is_user() {
            format!("{}: {}", self.user_display_name, turn.content)
        } else {
            let model = turn.model_id.as_deref().unwrap_or("assistant");
            format!("[{model}] {}", turn.content)
        };
        self.log_message(&entry);
    }

    fn log_message(&self, content: &str) {
        if let Err(e) = self.write_to_log(content) {
            warn!(path = %self.file_path.display(), "Failed to write transcript log: {e}");
        }
    }

    fn write_to_log(&self, content: &str) -> std::io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;
        let mut writer = BufWriter::new(file);

        for line in content.lines() {
            writeln!(writer, "{line}")?;
        }
        // blank line between entries
        writeln!(writer)?;
        writer.flush()
    }
}

impl StoreObserver for TranscriptLog {
    fn on_event(&mut self, event: &StoreEvent, turns: &[ConversationTurn]) {
        match event {
            StoreEvent::TurnAppended(id) => {
                if turns.iter().any(|turn| &turn.id == id && turn.is_user()) {
                    self.log_turn(turns, id);
                }
            }
            StoreEvent::TurnFinalized(id) | StoreEvent::TurnFailed(id) => self.log_turn(turns, id),
            StoreEvent::Reset => self.log_message("## New conversation"),
            StoreEvent::FragmentApplied { .. } => {}
        }
    }
}

/// Write the whole conversation to `path` as pretty JSON, replacing the file atomically.
pub fn export_transcript(path: &Path, turns: &[ConversationTurn]) -> Result<(), Box<dyn std::error::Error>> {
    let parent = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut temp_file = NamedTempFile::new_in(parent)?;
    serde_json::to_writer_pretty(&mut temp_file, turns)?;
    writeln!(temp_file)?;
    temp_file.as_file_mut().sync_all()?;
    temp_file.persist(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::MessageStore;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn logs_user_turns_and_finished_replies() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let log_path = temp_dir.path().join("chat.log");

        let mut store = MessageStore::new();
        store.add_observer(Box::new(TranscriptLog::new(&log_path)));
        store.append_user_turn("Hi").expect("user turn");
        let id = store
            .append_pending_assistant_turn("m1")
            .expect("assistant turn");
        store.append_fragment(&id, "Hel").expect("fragment");
        store.append_fragment(&id, "lo").expect("fragment");
        store.finalize_turn(&id).expect("finalize");
        store.reset();

        let contents = fs::read_to_string(&log_path).expect("read log");
        assert_eq!(contents, "You: Hi\n\n[m1] Hello\n\n## New conversation\n\n");
    }

    #[test]
    fn failed_replies_log_the_apology() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let log_path = temp_dir.path().join("chat.log");

        let mut store = MessageStore::new();
        store.add_observer(Box::new(
            TranscriptLog::new(&log_path).with_user_display_name("ana"),
        ));
        store.append_user_turn("Hi").expect("user turn");
        let id = store
            .append_pending_assistant_turn("m1")
            .expect("assistant turn");
        store.fail_turn(&id, "Sorry").expect("fail");

        let contents = fs::read_to_string(&log_path).expect("read log");
        assert_eq!(contents, "ana: Hi\n\n[m1] Sorry\n\n");
    }

    #[test]
    fn unwritable_log_does_not_disturb_the_store() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let log_path = temp_dir.path().join("missing-dir").join("chat.log");

        let mut store = MessageStore::new();
        store.add_observer(Box::new(TranscriptLog::new(&log_path)));
        store.append_user_turn("Hi").expect("user turn still appended");
        assert_eq!(store.len(), 1);
        assert!(!log_path.exists());
    }

    #[test]
    fn export_writes_turns_as_json() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let export_path = temp_dir.path().join("export.json");

        let mut store = MessageStore::new();
        store.append_user_turn("Hi").expect("user turn");
        let id = store
            .append_pending_assistant_turn("m1")
            .expect("assistant turn");
        store.append_fragment(&id, "Hello").expect("fragment");
        store.finalize_turn(&id).expect("finalize");

        export_transcript(&export_path, store.turns()).expect("export");
        let exported: Vec<ConversationTurn> =
            serde_json::from_str(&fs::read_to_string(&export_path).expect("read"))
                .expect("parse");
        assert_eq!(exported, store.turns());
    }
}
