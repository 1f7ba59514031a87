//! Ordered conversation log with a single active stream.
//!
//! Every mutation runs to completion and notifies observers before the call
//! returns, so an observer always sees mutations one at a time and in order.

use tracing::debug;

use crate::core::error::ChatError;
use crate::core::message::{ConversationTurn, TurnId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    TurnAppended(TurnId),
    FragmentApplied { id: TurnId, fragment: String },
    TurnFinalized(TurnId),
    TurnFailed(TurnId),
    Reset,
}

/// Receives store mutations as they happen.
pub trait StoreObserver: Send {
    fn on_event(&mut self, event: &StoreEvent, turns: &[ConversationTurn]);
}

pub struct MessageStore {
    turns: Vec<ConversationTurn>,
    active_stream: Option<TurnId>,
    id_prefix: String,
    next_seq: u64,
    observers: Vec<Box<dyn StoreObserver>>,
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageStore {
    pub fn new() -> Self {
        Self {
            turns: Vec::new(),
            active_stream: None,
            id_prefix: random_prefix(),
            next_seq: 0,
            observers: Vec::new(),
        }
    }

    pub fn add_observer(&mut self, observer: Box<dyn StoreObserver>) {
        self.observers.push(observer);
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn get(&self, id: &TurnId) -> Option<&ConversationTurn> {
        self.turns.iter().find(|turn| &turn.id == id)
    }

    pub fn active_stream(&self) -> Option<&TurnId> {
        self.active_stream.as_ref()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn append_user_turn(&mut self, text: &str) -> Result<TurnId, ChatError> {
        if text.trim().is_empty() {
            return Err(ChatError::InvalidInput("prompt is empty".to_string()));
        }
        let id = self.next_id();
        self.turns.push(ConversationTurn::user(id.clone(), text));
        self.notify(StoreEvent::TurnAppended(id.clone()));
        Ok(id)
    }

    /// Append an empty streaming assistant turn and make it the active stream.
    pub fn append_pending_assistant_turn(&mut self, model_id: &str) -> Result<TurnId, ChatError> {
        if let Some(active) = &self.active_stream {
            return Err(ChatError::Conflict(active.clone()));
        }
        let id = self.next_id();
        self.turns
            .push(ConversationTurn::pending_assistant(id.clone(), model_id));
        self.active_stream = Some(id.clone());
        self.notify(StoreEvent::TurnAppended(id.clone()));
        Ok(id)
    }

    /// Append `text` to the active streaming turn.
    ///
    /// Fragments for any other turn (including one abandoned by a reset) are
    /// rejected with [`ChatError::StaleFragment`] and change nothing.
    pub fn append_fragment(&mut self, turn_id: &TurnId, text: &str) -> Result<(), ChatError> {
        if self.active_stream.as_ref() != Some(turn_id) {
            return Err(ChatError::StaleFragment(turn_id.clone()));
        }
        let turn = self
            .turns
            .iter_mut()
            .find(|turn| &turn.id == turn_id)
            .filter(|turn| turn.streaming)
            .ok_or_else(|| ChatError::StaleFragment(turn_id.clone()))?;
        if text.is_empty() {
            return Ok(());
        }
        turn.content.push_str(text);
        self.notify(StoreEvent::FragmentApplied {
            id: turn_id.clone(),
            fragment: text.to_string(),
        });
        Ok(())
    }

    /// Stop streaming on `turn_id`. Calling it again is harmless.
    pub fn finalize_turn(&mut self, turn_id: &TurnId) -> Result<(), ChatError> {
        let turn = self.find_mut(turn_id)?;
        let was_streaming = std::mem::replace(&mut turn.streaming, false);
        self.release_active(turn_id);
        if was_streaming {
            self.notify(StoreEvent::TurnFinalized(turn_id.clone()));
        }
        Ok(())
    }

    /// Replace the streaming turn's content with `message` and stop streaming.
    ///
    /// Partial output received before the failure is discarded. A turn that
    /// already stopped streaming is frozen and left untouched.
    pub fn fail_turn(&mut self, turn_id: &TurnId, message: &str) -> Result<(), ChatError> {
        let turn = self.find_mut(turn_id)?;
        if !turn.streaming {
            debug!(turn = %turn_id, "ignoring failure for a turn that already stopped streaming");
            return Ok(());
        }
        turn.content = message.to_string();
        turn.streaming = false;
        self.release_active(turn_id);
        self.notify(StoreEvent::TurnFailed(turn_id.clone()));
        Ok(())
    }

    /// Clear the log and forget the active stream.
    ///
    /// The id sequence keeps counting so ids from the old conversation never
    /// come back.
    pub fn reset(&mut self) {
        self.turns.clear();
        self.active_stream = None;
        self.notify(StoreEvent::Reset);
    }

    fn find_mut(&mut self, turn_id: &TurnId) -> Result<&mut ConversationTurn, ChatError> {
        self.turns
            .iter_mut()
            .find(|turn| &turn.id == turn_id)
            .ok_or_else(|| ChatError::UnknownTurn(turn_id.clone()))
    }

    fn release_active(&mut self, turn_id: &TurnId) {
        if self.active_stream.as_ref() == Some(turn_id) {
            self.active_stream = None;
        }
    }

    fn next_id(&mut self) -> TurnId {
        self.next_seq += 1;
        TurnId::new(format!("{}-{:x}", self.id_prefix, self.next_seq))
    }

    fn notify(&mut self, event: StoreEvent) {
        if self.observers.is_empty() {
            return;
        }
        let mut observers = std::mem::take(&mut self.observers);
        for observer in observers.iter_mut() {
            observer.on_event(&event, &self.turns);
        }
        self.observers = observers;
    }
}

fn random_prefix() -> String {
    let mut bytes = [0u8; 4];
    if getrandom::fill(&mut bytes).is_err() {
        let nanos = chrono::Utc::now().timestamp_subsec_nanos();
        bytes = nanos.to_le_bytes();
    }
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
