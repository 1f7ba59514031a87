//! Streaming client for OpenAI-compatible `chat/completions` endpoints.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use memchr::memchr;
use tracing::warn;

use crate::api::{ChatRequest, ChatResponse};
use crate::core::chat_stream::{FragmentStream, ModelClient};
use crate::core::error::BackendError;

pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiCompatibleClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ModelClient for OpenAiCompatibleClient {
    async fn send_streaming_prompt(
        &self,
        prompt: &str,
        model_id: &str,
    ) -> Result<FragmentStream, BackendError> {
        let response = self
            .http
            .post(self.completions_url())
            .header("Content-Type", "application/json")
            .bearer_auth(&self.api_key)
            .json(&ChatRequest::streaming_prompt(model_id, prompt))
            .send()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            return Err(BackendError::Status {
                status,
                summary: summarize_api_error(&body),
            });
        }

        let bytes = response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| BackendError::Request(e.to_string()))
            })
            .boxed();
        Ok(sse_fragments(bytes))
    }
}

#[derive(Debug, PartialEq)]
enum SseEvent {
    Fragment(String),
    Done,
    Failure(BackendError),
    Ignore,
}

fn extract_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

fn parse_data_payload(payload: &str) -> SseEvent {
    if payload == "[DONE]" {
        return SseEvent::Done;
    }
    if payload.trim().is_empty() {
        return SseEvent::Ignore;
    }

    match serde_json::from_str::<ChatResponse>(payload) {
        Ok(response) => response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .map(SseEvent::Fragment)
            .unwrap_or(SseEvent::Ignore),
        Err(_) => match serde_json::from_str::<serde_json::Value>(payload) {
            Ok(value) => match extract_error_summary(&value) {
                Some(summary) => SseEvent::Failure(BackendError::Remote(summary)),
                None => SseEvent::Failure(BackendError::Malformed(payload.trim().to_string())),
            },
            Err(_) => SseEvent::Failure(BackendError::Malformed(payload.trim().to_string())),
        },
    }
}

fn extract_error_summary(value: &serde_json::Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .or_else(|| value.get("error").and_then(|v| v.as_str()))
        .or_else(|| value.get("message").and_then(|v| v.as_str()))?;

    let collapsed = summary.split_whitespace().collect::<Vec<_>>().join(" ");
    (!collapsed.is_empty()).then_some(collapsed)
}

/// Condense an error body into a single line for the operator log.
pub fn summarize_api_error(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    serde_json::from_str::<serde_json::Value>(trimmed)
        .ok()
        .and_then(|value| extract_error_summary(&value))
        .unwrap_or_else(|| trimmed.split_whitespace().collect::<Vec<_>>().join(" "))
}

#[derive(Default)]
struct SseDecoder {
    buffer: Vec<u8>,
    pending: VecDeque<Result<String, BackendError>>,
    finished: bool,
}

impl SseDecoder {
    fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
        while !self.finished {
            let Some(newline_pos) = memchr(b'\n', &self.buffer) else {
                break;
            };
            let line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            self.process_line(&line);
        }
    }

    fn finish(&mut self) {
        if !self.finished && !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.process_line(&line);
        }
        self.finished = true;
    }

    fn process_line(&mut self, raw: &[u8]) {
        let line = match std::str::from_utf8(raw) {
            Ok(line) => line.trim(),
            Err(e) => {
                warn!("Invalid UTF-8 in stream: {e}");
                return;
            }
        };

        match extract_data_payload(line).map(parse_data_payload) {
            Some(SseEvent::Fragment(text)) => self.pending.push_back(Ok(text)),
            Some(SseEvent::Done) => self.finished = true,
            Some(SseEvent::Failure(err)) => {
                self.pending.push_back(Err(err));
                self.finished = true;
            }
            Some(SseEvent::Ignore) | None => {}
        }
    }
}

/// Decode a Server-Sent-Events byte stream into reply fragments.
pub fn sse_fragments(bytes: BoxStream<'static, Result<Vec<u8>, BackendError>>) -> FragmentStream {
    stream::unfold(
        (bytes, SseDecoder::default()),
        |(mut bytes, mut decoder)| async move {
            loop {
                if let Some(item) = decoder.pending.pop_front() {
                    return Some((item, (bytes, decoder)));
                }
                if decoder.finished {
                    return None;
                }
                match bytes.next().await {
                    Some(Ok(chunk)) => decoder.feed(&chunk),
                    Some(Err(err)) => {
                        decoder.pending.push_back(Err(err));
                        decoder.finished = true;
                    }
                    None => decoder.finish(),
                }
            }
        },
    )
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(chunks: Vec<Result<&'static str, BackendError>>) -> Vec<Result<String, BackendError>> {
        let bytes = stream::iter(
            chunks
                .into_iter()
                .map(|chunk| chunk.map(|text| text.as_bytes().to_vec())),
        )
        .boxed();
        sse_fragments(bytes).collect().await
    }

    #[test]
    fn data_payload_handles_spacing_variants() {
        for (line, expected) in [
            (r#"data: {"choices":[{"delta":{"content":"Hello"}}]}"#, "Hello"),
            (r#"data:{"choices":[{"delta":{"content":"World"}}]}"#, "World"),
        ] {
            let payload = extract_data_payload(line).expect("data line");
            assert_eq!(parse_data_payload(payload), SseEvent::Fragment(expected.into()));
        }
        assert_eq!(parse_data_payload("[DONE]"), SseEvent::Done);
        assert_eq!(extract_data_payload(": keep-alive"), None);
    }

    #[test]
    fn deltas_without_content_are_ignored() {
        let payload = r#"{"choices":[{"delta":{"role":"assistant"},"finish_reason":null}]}"#;
        assert_eq!(parse_data_payload(payload), SseEvent::Ignore);
        assert_eq!(parse_data_payload(r#"{"choices":[]}"#), SseEvent::Ignore);
    }

    #[test]
    fn error_payloads_become_failures() {
        assert_eq!(
            parse_data_payload(r#"{"error":{"message":"internal   server error"}}"#),
            SseEvent::Failure(BackendError::Remote("internal server error".into()))
        );
        assert_eq!(
            parse_data_payload("not json"),
            SseEvent::Failure(BackendError::Malformed("not json".into()))
        );
        assert_eq!(
            parse_data_payload(r#"{"status":"failed"}"#),
            SseEvent::Failure(BackendError::Malformed(r#"{"status":"failed"}"#.into()))
        );
    }

    #[test]
    fn summarize_api_error_prefers_message_field() {
        assert_eq!(
            summarize_api_error(r#"{"error":{"message":"model overloaded","type":"x"}}"#),
            "model overloaded"
        );
        assert_eq!(summarize_api_error(r#"{"error":"quota"}"#), "quota");
        assert_eq!(summarize_api_error("  bad\n gateway "), "bad gateway");
        assert_eq!(summarize_api_error(""), "<empty>");
    }

    #[tokio::test]
    async fn decoder_reassembles_lines_split_across_chunks() {
        let fragments = collect(vec![
            Ok("data: {\"choices\":[{\"delta\":{\"con"),
            Ok("tent\":\"He\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"llo\"}}]}\n"),
            Ok("data: [DONE]\n"),
            Ok("data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n"),
        ])
        .await;
        assert_eq!(fragments, vec![Ok("He".to_string()), Ok("llo".to_string())]);
    }

    #[tokio::test]
    async fn decoder_handles_trailing_line_without_newline() {
        let fragments = collect(vec![Ok(
            "data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}",
        )])
        .await;
        assert_eq!(fragments, vec![Ok("tail".to_string())]);
    }

    #[tokio::test]
    async fn decoder_stops_at_first_failure() {
        let fragments = collect(vec![
            Ok("data: {\"choices\":[{\"delta\":{\"content\":\"par\"}}]}\n"),
            Ok("data: {\"error\":{\"message\":\"boom\"}}\n"),
            Ok("data: {\"choices\":[{\"delta\":{\"content\":\"never\"}}]}\n"),
        ])
        .await;
        assert_eq!(
            fragments,
            vec![
                Ok("par".to_string()),
                Err(BackendError::Remote("boom".into()))
            ]
        );
    }

    #[tokio::test]
    async fn transport_errors_end_the_stream() {
        let fragments = collect(vec![
            Ok("data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n"),
            Err(BackendError::Request("reset".into())),
            Ok("data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n"),
        ])
        .await;
        assert_eq!(
            fragments,
            vec![Ok("a".to_string()), Err(BackendError::Request("reset".into()))]
        );
    }

    #[test]
    fn completions_url_ignores_trailing_slashes() {
        let client = OpenAiCompatibleClient::new(reqwest::Client::new(), "http://host/v1//", "k");
        assert_eq!(client.completions_url(), "http://host/v1/chat/completions");
    }
}
