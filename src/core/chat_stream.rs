use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::error::BackendError;
use crate::core::message::TurnId;

/// Text fragments produced by a backend, ending either cleanly or with an error.
pub type FragmentStream = BoxStream<'static, Result<String, BackendError>>;

/// A model-serving backend able to stream a reply to a single prompt.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn send_streaming_prompt(
        &self,
        prompt: &str,
        model_id: &str,
    ) -> Result<FragmentStream, BackendError>;

    /// Whether each fragment carries the whole reply so far rather than a delta.
    fn delivers_snapshots(&self) -> bool {
        false
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum StreamMessage {
    Chunk(String),
    Error(BackendError),
    End,
}

pub struct StreamParams {
    pub client: Arc<dyn ModelClient>,
    pub prompt: String,
    pub model: String,
    pub cancel_token: CancellationToken,
    pub stream_id: TurnId,
    pub idle_timeout: Option<Duration>,
}

/// Runs backend requests on background tasks and funnels their output into
/// one channel, each message tagged with the turn it belongs to.
#[derive(Clone)]
pub struct ChatStreamService {
    tx: mpsc::UnboundedSender<(StreamMessage, TurnId)>,
}

impl ChatStreamService {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(StreamMessage, TurnId)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn spawn_stream(&self, params: StreamParams) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let StreamParams {
                client,
                prompt,
                model,
                cancel_token,
                stream_id,
                idle_timeout,
            } = params;

            tokio::select! {
                _ = forward_stream(client.as_ref(), &prompt, &model, idle_timeout, &tx, &stream_id) => {}
                _ = cancel_token.cancelled() => {
                    debug!(turn = %stream_id, "stream cancelled");
                }
            }
        });
    }

    #[cfg(test)]
    pub fn send_for_test(&self, message: StreamMessage, stream_id: TurnId) {
        let _ = self.tx.send((message, stream_id));
    }
}

async fn forward_stream(
    client: &dyn ModelClient,
    prompt: &str,
    model: &str,
    idle_timeout: Option<Duration>,
    tx: &mpsc::UnboundedSender<(StreamMessage, TurnId)>,
    stream_id: &TurnId,
) {
    let send = |message: StreamMessage| {
        let _ = tx.send((message, stream_id.clone()));
    };

    let mut fragments =
        match with_idle_timeout(idle_timeout, client.send_streaming_prompt(prompt, model)).await {
            Ok(Ok(fragments)) => fragments,
            Ok(Err(err)) | Err(err) => {
                send(StreamMessage::Error(err));
                return;
            }
        };

    loop {
        match with_idle_timeout(idle_timeout, fragments.next()).await {
            Ok(Some(Ok(text))) => {
                if !text.is_empty() {
                    send(StreamMessage::Chunk(text));
                }
            }
            Ok(Some(Err(err))) | Err(err) => {
                send(StreamMessage::Error(err));
                return;
            }
            Ok(None) => {
                send(StreamMessage::End);
                return;
            }
        }
    }
}

async fn with_idle_timeout<F: std::future::Future>(
    limit: Option<Duration>,
    future: F,
) -> Result<F::Output, BackendError> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, future)
            .await
            .map_err(|_| BackendError::Timeout(limit)),
        None => Ok(future.await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_utils::ScriptedClient;

    fn params(client: ScriptedClient, stream_id: &str) -> StreamParams {
        StreamParams {
            client: Arc::new(client),
            prompt: "Hi".to_string(),
            model: "m1".to_string(),
            cancel_token: CancellationToken::new(),
            stream_id: TurnId::new(stream_id),
            idle_timeout: None,
        }
    }

    #[tokio::test]
    async fn forwards_chunks_then_end_tagged_with_turn() {
        let (service, mut rx) = ChatStreamService::new();
        service.spawn_stream(params(
            ScriptedClient::fragments(["He", "", "llo"]),
            "turn-1",
        ));

        let mut received = Vec::new();
        while let Some((message, id)) = rx.recv().await {
            assert_eq!(id, TurnId::new("turn-1"));
            let done = message == StreamMessage::End;
            received.push(message);
            if done {
                break;
            }
        }
        assert_eq!(
            received,
            vec![
                StreamMessage::Chunk("He".into()),
                StreamMessage::Chunk("llo".into()),
                StreamMessage::End,
            ]
        );
    }

    #[tokio::test]
    async fn request_failure_is_a_single_error_message() {
        let (service, mut rx) = ChatStreamService::new();
        service.spawn_stream(params(
            ScriptedClient::request_error(BackendError::Request("refused".into())),
            "turn-2",
        ));

        let (message, _) = rx.recv().await.expect("error message");
        assert_eq!(
            message,
            StreamMessage::Error(BackendError::Request("refused".into()))
        );
        drop(service);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn mid_stream_error_stops_forwarding() {
        let (service, mut rx) = ChatStreamService::new();
        service.spawn_stream(params(
            ScriptedClient::new(vec![
                Ok("par".into()),
                Err(BackendError::Remote("overloaded".into())),
                Ok("never".into()),
            ]),
            "turn-3",
        ));
        drop(service);

        let mut received = Vec::new();
        while let Some((message, _)) = rx.recv().await {
            received.push(message);
        }
        assert_eq!(
            received,
            vec![
                StreamMessage::Chunk("par".into()),
                StreamMessage::Error(BackendError::Remote("overloaded".into())),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn hung_backend_times_out() {
        let (service, mut rx) = ChatStreamService::new();
        let mut params = params(ScriptedClient::hanging(), "turn-4");
        params.idle_timeout = Some(Duration::from_secs(30));
        service.spawn_stream(params);

        let (message, _) = rx.recv().await.expect("timeout message");
        assert_eq!(
            message,
            StreamMessage::Error(BackendError::Timeout(Duration::from_secs(30)))
        );
    }

    #[tokio::test]
    async fn cancelled_stream_sends_nothing() {
        let (service, mut rx) = ChatStreamService::new();
        let params = params(ScriptedClient::hanging(), "turn-5");
        let token = params.cancel_token.clone();
        service.spawn_stream(params);
        token.cancel();
        drop(service);

        assert!(rx.recv().await.is_none());
    }
}
