//! OpenAI-compatible streaming chat generator
//!
//! Sends a chat completion request with `stream: true` and decodes the
//! server-sent events into content fragments.

use super::{FragmentStream, Generator};
use crate::prompts::ChatMessage;
use citeforge_common::config::GeneratorConfig;
use citeforge_common::errors::{AppError, Result};
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::instrument;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: usize,
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    content: Option<String>,
}

/// One decoded server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Fragment(String),
    Done,
    Malformed(String),
}

/// Incremental decoder for an SSE byte stream.
///
/// Bytes are buffered until a blank line closes an event, so multi-byte
/// characters split across network chunks decode intact.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Feed raw bytes, returning every event they complete
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some((end, delimiter)) = find_event_end(&self.buffer) {
            let raw: Vec<u8> = self.buffer.drain(..end + delimiter).collect();
            let text = String::from_utf8_lossy(&raw[..end]);
            if let Some(event) = parse_event(&text) {
                events.push(event);
            }
        }
        events
    }

    /// Flush an unterminated trailing event at end of stream
    pub fn finish(&mut self) -> Option<SseEvent> {
        let raw = std::mem::take(&mut self.buffer);
        parse_event(&String::from_utf8_lossy(&raw))
    }
}

fn find_event_end(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n").map(|i| (i, 2));
    let crlf = buffer.windows(4).position(|w| w == b"\r\n\r\n").map(|i| (i, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn parse_event(event: &str) -> Option<SseEvent> {
    let data: Vec<&str> = event
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| data.strip_prefix(' ').unwrap_or(data).trim_end_matches('\r'))
        .collect();
    if data.is_empty() {
        return None;
    }
    let payload = data.join("\n");
    if payload.trim() == "[DONE]" {
        return Some(SseEvent::Done);
    }

    match serde_json::from_str::<ChatChunk>(&payload) {
        Ok(chunk) => {
            let content: String = chunk
                .choices
                .into_iter()
                .filter_map(|c| c.delta.content)
                .collect();
            if content.is_empty() {
                None
            } else {
                Some(SseEvent::Fragment(content))
            }
        }
        Err(e) => Some(SseEvent::Malformed(e.to_string())),
    }
}

struct StreamState {
    bytes: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    decoder: SseDecoder,
    pending: VecDeque<Result<String>>,
    finished: bool,
}

impl StreamState {
    fn absorb(&mut self, events: impl IntoIterator<Item = SseEvent>) {
        for event in events {
            match event {
                SseEvent::Fragment(text) => self.pending.push_back(Ok(text)),
                SseEvent::Done => {
                    self.finished = true;
                    return;
                }
                SseEvent::Malformed(message) => {
                    self.pending.push_back(Err(AppError::GenerationFailed {
                        message: format!("malformed stream event: {}", message),
                    }));
                    self.finished = true;
                    return;
                }
            }
        }
    }
}

/// Decode an SSE byte stream into answer fragments
fn fragments(bytes: BoxStream<'static, reqwest::Result<Vec<u8>>>) -> FragmentStream {
    let state = StreamState {
        bytes,
        decoder: SseDecoder::default(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let events = state.decoder.push(&chunk);
                    state.absorb(events);
                }
                Some(Err(e)) => {
                    state.pending.push_back(Err(AppError::GenerationFailed {
                        message: format!("stream interrupted: {}", e),
                    }));
                    state.finished = true;
                }
                None => {
                    let trailing = state.decoder.finish();
                    state.absorb(trailing);
                    state.finished = true;
                }
            }
        }
    })
    .boxed()
}

/// Chat completions client
pub struct OpenAIGenerator {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: usize,
}

impl OpenAIGenerator {
    /// Create a new generator
    pub fn new(config: &GeneratorConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| AppError::Configuration {
                message: "generator.api_key is required for the openai provider".to_string(),
            })?;

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs.clamp(1, 10)))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait::async_trait]
impl Generator for OpenAIGenerator {
    #[instrument(skip(self, messages), fields(model = %self.model, messages = messages.len()))]
    async fn generate(&self, messages: Vec<ChatMessage>) -> Result<FragmentStream> {
        let request = ChatRequest {
            model: &self.model,
            messages: &messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream: true,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Accept", "text/event-stream")
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::GenerationFailed {
                message: format!("LLM API request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::GenerationFailed {
                message: format!("LLM API error {}: {}", status, body),
            });
        }

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()))
            .boxed();
        Ok(fragments(bytes))
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(content: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({ "choices": [{ "delta": { "content": content } }] })
        )
    }

    #[test]
    fn test_decoder_emits_fragments_and_done() {
        let mut decoder = SseDecoder::default();
        let body = format!("{}{}data: [DONE]\n\n", delta("Take "), delta("BART [1]"));
        let events = decoder.push(body.as_bytes());
        assert_eq!(
            events,
            vec![
                SseEvent::Fragment("Take ".into()),
                SseEvent::Fragment("BART [1]".into()),
                SseEvent::Done,
            ]
        );
    }

    #[test]
    fn test_decoder_buffers_partial_events() {
        let mut decoder = SseDecoder::default();
        let body = delta("café");
        let bytes = body.as_bytes();
        // Split inside the two-byte 'é'
        let split = body.find('é').unwrap() + 1;

        assert!(decoder.push(&bytes[..split]).is_empty());
        assert_eq!(decoder.push(&bytes[split..]), vec![SseEvent::Fragment("café".into())]);
    }

    #[test]
    fn test_decoder_skips_role_only_and_comment_events() {
        let mut decoder = SseDecoder::default();
        let role_only = "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n";
        let comment = ": keep-alive\n\n";
        assert!(decoder.push(role_only.as_bytes()).is_empty());
        assert!(decoder.push(comment.as_bytes()).is_empty());
    }

    #[test]
    fn test_decoder_handles_crlf() {
        let mut decoder = SseDecoder::default();
        let events = decoder.push(b"data: [DONE]\r\n\r\n");
        assert_eq!(events, vec![SseEvent::Done]);
    }

    #[test]
    fn test_decoder_flags_malformed_payload() {
        let mut decoder = SseDecoder::default();
        let events = decoder.push(b"data: {not json\n\n");
        assert!(matches!(events.as_slice(), [SseEvent::Malformed(_)]));
    }

    #[test]
    fn test_finish_flushes_unterminated_event() {
        let mut decoder = SseDecoder::default();
        let body = delta("tail");
        assert!(decoder.push(body.trim_end().as_bytes()).is_empty());
        assert_eq!(decoder.finish(), Some(SseEvent::Fragment("tail".into())));
        assert_eq!(decoder.finish(), None);
    }

    #[tokio::test]
    async fn test_fragment_stream_stops_at_done() {
        let body = format!("{}data: [DONE]\n\n{}", delta("one"), delta("ignored"));
        let bytes = stream::iter(vec![Ok(body.into_bytes())]).boxed();
        let collected: Vec<String> = fragments(bytes)
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(collected, vec!["one".to_string()]);
    }

    #[tokio::test]
    async fn test_fragment_stream_across_chunks() {
        let body = format!("{}{}", delta("Ferry "), delta("Building [2]"));
        let (a, b) = body.split_at(7);
        let bytes = stream::iter(vec![Ok(a.as_bytes().to_vec()), Ok(b.as_bytes().to_vec())]).boxed();
        let collected: Vec<String> = fragments(bytes)
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(collected.concat(), "Ferry Building [2]");
    }

    #[tokio::test]
    async fn test_malformed_event_ends_stream_with_error() {
        let body = format!("{}data: oops\n\n{}", delta("ok"), delta("never"));
        let bytes = stream::iter(vec![Ok(body.into_bytes())]).boxed();
        let items: Vec<Result<String>> = fragments(bytes).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "ok");
        assert!(matches!(items[1], Err(AppError::GenerationFailed { .. })));
    }

    #[test]
    fn test_new_requires_api_key() {
        let config = GeneratorConfig {
            api_key: Some("  ".into()),
            ..GeneratorConfig::default()
        };
        assert!(OpenAIGenerator::new(&config).is_err());

        let config = GeneratorConfig {
            api_key: Some("sk-test".into()),
            ..GeneratorConfig::default()
        };
        assert_eq!(OpenAIGenerator::new(&config).unwrap().name(), "openai");
    }
}
