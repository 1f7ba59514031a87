#[cfg(test)]
use std::sync::{Arc, Mutex};

#[cfg(test)]
use async_trait::async_trait;
#[cfg(test)]
use futures_util::stream::{self, StreamExt};

#[cfg(test)]
use crate::core::chat_stream::{ChatStreamService, FragmentStream, ModelClient, StreamMessage};
#[cfg(test)]
use crate::core::error::BackendError;
#[cfg(test)]
use crate::core::message::TurnId;
#[cfg(test)]
use crate::core::session::StreamingSession;
#[cfg(test)]
use crate::core::settings::SessionSettings;

#[cfg(test)]
#[derive(Clone)]
enum Script {
    Items(Vec<Result<String, BackendError>>),
    RequestError(BackendError),
    Hang,
}

/// Backend double that replays a fixed script for every request.
#[cfg(test)]
#[derive(Clone)]
pub struct ScriptedClient {
    script: Script,
    snapshots: bool,
    calls: Arc<Mutex<Vec<(String, String)>>>,
}

#[cfg(test)]
impl ScriptedClient {
    pub fn new(items: Vec<Result<String, BackendError>>) -> Self {
        Self::with_script(Script::Items(items))
    }

    pub fn fragments<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(fragments.into_iter().map(|f| Ok(f.into())).collect())
    }

    pub fn request_error(error: BackendError) -> Self {
        Self::with_script(Script::RequestError(error))
    }

    pub fn hanging() -> Self {
        Self::with_script(Script::Hang)
    }

    pub fn snapshots(mut self) -> Self {
        self.snapshots = true;
        self
    }

    /// `(prompt, model)` pairs received so far.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn with_script(script: Script) -> Self {
        Self {
            script,
            snapshots: false,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl ModelClient for ScriptedClient {
    async fn send_streaming_prompt(
        &self,
        prompt: &str,
        model_id: &str,
    ) -> Result<FragmentStream, BackendError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push((prompt.to_string(), model_id.to_string()));
        match self.script.clone() {
            Script::Items(items) => Ok(stream::iter(items).boxed()),
            Script::RequestError(error) => Err(error),
            Script::Hang => Ok(stream::pending().boxed()),
        }
    }

    fn delivers_snapshots(&self) -> bool {
        self.snapshots
    }
}

#[cfg(test)]
pub fn create_test_settings() -> SessionSettings {
    SessionSettings::new(vec!["m1".to_string(), "m2".to_string()], "m1")
}

#[cfg(test)]
pub fn create_test_session(
    client: ScriptedClient,
) -> (
    StreamingSession,
    tokio::sync::mpsc::UnboundedReceiver<(StreamMessage, TurnId)>,
) {
    let (service, rx) = ChatStreamService::new();
    let session = StreamingSession::new(Arc::new(client), service, create_test_settings());
    (session, rx)
}
