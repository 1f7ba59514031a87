//! Request/response cycle for one conversation.
//!
//! A [`StreamingSession`] owns the [`MessageStore`] and the [`UsageTracker`]
//! and is the only writer to either. Backend output arrives as
//! `(StreamMessage, TurnId)` pairs from a [`ChatStreamService`] channel and is
//! applied with [`StreamingSession::handle_stream_message`]; the owner of the
//! session decides when to poll the channel, so all mutations are serialized
//! through `&mut self`.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::chat_stream::{ChatStreamService, ModelClient, StreamMessage, StreamParams};
use crate::core::error::{BackendError, ChatError};
use crate::core::message::TurnId;
use crate::core::settings::SessionSettings;
use crate::core::store::{MessageStore, StoreObserver};
use crate::core::usage::UsageTracker;

/// Shown in place of the reply whenever the backend fails.
pub const FAILED_RESPONSE_MESSAGE: &str =
    "Sorry, I encountered an error while processing your request. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Idle,
    /// Request issued, no fragment received yet.
    Sending,
    Streaming,
}

/// How a turn's stream resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed { turn: TurnId, tokens: u64 },
    Failed { turn: TurnId },
}

struct InFlightStream {
    turn: TurnId,
    cancel_token: CancellationToken,
    accumulated: String,
    snapshots: bool,
}

pub struct StreamingSession {
    store: MessageStore,
    usage: UsageTracker,
    settings: SessionSettings,
    client: Arc<dyn ModelClient>,
    service: ChatStreamService,
    in_flight: Option<InFlightStream>,
    phase: StreamPhase,
}

impl StreamingSession {
    pub fn new(
        client: Arc<dyn ModelClient>,
        service: ChatStreamService,
        settings: SessionSettings,
    ) -> Self {
        Self {
            store: MessageStore::new(),
            usage: UsageTracker::new(),
            settings,
            client,
            service,
            in_flight: None,
            phase: StreamPhase::Idle,
        }
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn usage(&self) -> &UsageTracker {
        &self.usage
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    pub fn is_idle(&self) -> bool {
        self.phase == StreamPhase::Idle
    }

    pub fn cumulative_tokens(&self) -> u64 {
        self.usage.cumulative()
    }

    pub fn add_observer(&mut self, observer: Box<dyn StoreObserver>) {
        self.store.add_observer(observer);
    }

    /// Replace the injected settings. A reply already streaming keeps the
    /// model it was started with.
    pub fn reload_settings(&mut self, settings: SessionSettings) {
        self.settings = settings;
    }

    pub fn select_model(&mut self, model_id: &str) -> bool {
        self.settings.select_model(model_id)
    }

    /// Start a request/response cycle for `input`.
    ///
    /// Appends the user turn and a pending assistant turn, counts the prompt's
    /// tokens immediately and spawns the backend request. Returns the id of
    /// the assistant turn that will receive fragments.
    pub fn submit(&mut self, input: &str) -> Result<TurnId, ChatError> {
        let prompt = input.trim();
        if prompt.is_empty() {
            return Err(ChatError::InvalidInput("prompt is empty".to_string()));
        }
        if let Some(active) = self.store.active_stream() {
            return Err(ChatError::Conflict(active.clone()));
        }
        if let Some(in_flight) = &self.in_flight {
            return Err(ChatError::Conflict(in_flight.turn.clone()));
        }

        let model = self.settings.selected_model().to_string();
        self.store.append_user_turn(prompt)?;
        let turn = self.store.append_pending_assistant_turn(&model)?;
        let prompt_tokens = self.usage.record_text(prompt);

        let cancel_token = CancellationToken::new();
        self.in_flight = Some(InFlightStream {
            turn: turn.clone(),
            cancel_token: cancel_token.clone(),
            accumulated: String::new(),
            snapshots: self.client.delivers_snapshots(),
        });
        self.phase = StreamPhase::Sending;
        debug!(turn = %turn, model = %model, prompt_tokens, "sending prompt");

        self.service.spawn_stream(StreamParams {
            client: Arc::clone(&self.client),
            prompt: prompt.to_string(),
            model,
            cancel_token,
            stream_id: turn.clone(),
            idle_timeout: self.settings.stream_timeout(),
        });
        Ok(turn)
    }

    /// Apply one message from the stream channel.
    ///
    /// Messages for any turn other than the one in flight are dropped.
    pub fn handle_stream_message(
        &mut self,
        message: StreamMessage,
        stream_id: &TurnId,
    ) -> Option<TurnOutcome> {
        if self.in_flight.as_ref().map(|s| &s.turn) != Some(stream_id) {
            debug!(turn = %stream_id, "{}", ChatError::StaleFragment(stream_id.clone()));
            return None;
        }

        match message {
            StreamMessage::Chunk(text) => {
                self.apply_chunk(stream_id, &text);
                None
            }
            StreamMessage::End => Some(self.complete(stream_id)),
            StreamMessage::Error(err) => Some(self.fail(stream_id, err)),
        }
    }

    /// Wait for the next stream message and apply it.
    ///
    /// Returns `None` once the channel is closed; stale or intermediate
    /// messages are consumed without producing an outcome.
    pub async fn pump(
        &mut self,
        rx: &mut mpsc::UnboundedReceiver<(StreamMessage, TurnId)>,
    ) -> Option<Option<TurnOutcome>> {
        let (message, stream_id) = rx.recv().await?;
        Some(self.handle_stream_message(message, &stream_id))
    }

    /// Drive the channel until the in-flight turn resolves.
    pub async fn run_until_idle(
        &mut self,
        rx: &mut mpsc::UnboundedReceiver<(StreamMessage, TurnId)>,
    ) -> Option<TurnOutcome> {
        while !self.is_idle() {
            match self.pump(rx).await {
                Some(Some(outcome)) => return Some(outcome),
                Some(None) => continue,
                None => break,
            }
        }
        None
    }

    /// Start a new conversation: cancel the in-flight request, clear the log
    /// and reset the token counter.
    pub fn new_conversation(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            info!(turn = %in_flight.turn, "abandoning in-flight stream");
            in_flight.cancel_token.cancel();
        }
        self.store.reset();
        self.usage.reset();
        self.phase = StreamPhase::Idle;
    }

    fn apply_chunk(&mut self, stream_id: &TurnId, text: &str) {
        let Some(in_flight) = self.in_flight.as_mut() else {
            return;
        };

        let delta = if in_flight.snapshots {
            match text.strip_prefix(in_flight.accumulated.as_str()) {
                Some(delta) => delta,
                None => {
                    warn!(turn = %stream_id, "dropping snapshot that does not extend the reply");
                    return;
                }
            }
        } else {
            text
        };
        if delta.is_empty() {
            self.phase = StreamPhase::Streaming;
            return;
        }

        match self.store.append_fragment(stream_id, delta) {
            Ok(()) => {
                in_flight.accumulated.push_str(delta);
                self.phase = StreamPhase::Streaming;
            }
            Err(err) => debug!(turn = %stream_id, "{err}"),
        }
    }

    fn complete(&mut self, stream_id: &TurnId) -> TurnOutcome {
        let in_flight = self.in_flight.take();
        self.phase = StreamPhase::Idle;
        if let Err(err) = self.store.finalize_turn(stream_id) {
            debug!(turn = %stream_id, "{err}");
        }

        let tokens = in_flight
            .map(|s| self.usage.record_text(&s.accumulated))
            .unwrap_or_default();
        debug!(
            turn = %stream_id,
            tokens,
            total = self.usage.cumulative(),
            "stream completed"
        );
        TurnOutcome::Completed {
            turn: stream_id.clone(),
            tokens,
        }
    }

    fn fail(&mut self, stream_id: &TurnId, err: BackendError) -> TurnOutcome {
        warn!(turn = %stream_id, error = %err, "backend stream failed");
        self.in_flight = None;
        self.phase = StreamPhase::Idle;
        if let Err(err) = self.store.fail_turn(stream_id, FAILED_RESPONSE_MESSAGE) {
            debug!(turn = %stream_id, "{err}");
        }
        TurnOutcome::Failed {
            turn: stream_id.clone(),
        }
    }
}
