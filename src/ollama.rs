// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Streaming Ollama client for local text generation

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::Display;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::{Result, TaxisError};

/// One event from a generation stream
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationEvent {
    Token(String),
    Completed,
    Failed(String),
}

/// Events of one generation; dropping it cancels the request
pub type TokenStream = BoxStream<'static, GenerationEvent>;

/// Anything that turns a prompt into a stream of tokens
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Start a generation. `chat = false` sends the prompt verbatim.
    async fn generate(&self, prompt: &str, chat: bool) -> Result<TokenStream>;
}

/// Ollama API client
pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
    retries: u32,
    /// Bound on non-streaming requests
    request_timeout: Duration,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    raw: bool,
}

/// One NDJSON line of a streamed /api/generate response
#[derive(Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<ModelInfo>,
}

#[derive(Deserialize)]
struct ModelInfo {
    name: String,
}

fn normalize_base_url(base_url: &str) -> String {
    base_url
        .trim_end_matches('/')
        .replace("/api/generate", "")
        .replace("/api/chat", "")
}

impl OllamaClient {
    /// Create a new Ollama client
    pub fn new(base_url: &str, model: &str) -> Result<Self> {
        // No overall timeout: streams are bounded by the caller
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: normalize_base_url(base_url),
            model: model.to_string(),
            retries: 0,
            request_timeout: Duration::from_secs(10),
        })
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        Ok(Self::new(&config.url, &config.model)?
            .with_retries(config.retries)
            .with_request_timeout(Duration::from_secs(config.timeout_secs)))
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Check if Ollama is available
    pub async fn health_check(&self) -> Result<()> {
        let url = format!("{}/api/tags", self.base_url);

        self.client
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| {
                TaxisError::EngineUnavailable(format!(
                    "Cannot connect to Ollama at {}: {}",
                    self.base_url, e
                ))
            })?;

        Ok(())
    }

    /// List available models
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self.client
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await?;

        let tags: TagsResponse = response.json().await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// Check if a specific model is available
    pub async fn model_available(&self, model: &str) -> Result<bool> {
        let models = self.list_models().await?;
        Ok(models.iter().any(|m| {
            m.starts_with(model) || m == &format!("{}:latest", model)
        }))
    }

    async fn open_stream(&self, prompt: &str, chat: bool) -> Result<reqwest::Response> {
        let url = format!("{}/api/generate", self.base_url);

        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: true,
            raw: !chat,
        };

        debug!("Opening generation stream: model={}", self.model);

        let response = self.client
            .post(&url)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status.is_server_error() {
            return Err(TaxisError::EngineUnavailable(format!(
                "Ollama returned status {}",
                status
            )));
        }
        if !status.is_success() {
            // e.g. unknown model
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<GenerateChunk>(&body)
                .ok()
                .and_then(|chunk| chunk.error)
                .unwrap_or_else(|| format!("Ollama returned status {}", status));
            return Err(TaxisError::Generation(message));
        }

        Ok(response)
    }
}

#[async_trait]
impl TextGenerator for OllamaClient {
    async fn generate(&self, prompt: &str, chat: bool) -> Result<TokenStream> {
        let mut last_error = None;

        for attempt in 0..=self.retries {
            if attempt > 0 {
                let delay = Duration::from_secs(2u64.pow(attempt - 1));
                warn!("Retrying Ollama request in {:?} (attempt {})", delay, attempt + 1);
                tokio::time::sleep(delay).await;
            }

            match self.open_stream(prompt, chat).await {
                Ok(response) => return Ok(decode_events(response.bytes_stream())),
                Err(e @ TaxisError::Generation(_)) => return Err(e),
                Err(e) => {
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            TaxisError::EngineUnavailable("Unknown error".to_string())
        }))
    }
}

/// Splits an NDJSON byte stream into generation events
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buffer: Vec<u8>,
}

impl NdjsonDecoder {
    /// Feed one chunk; returns events for every completed line
    pub fn push(&mut self, chunk: &[u8]) -> Vec<GenerationEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            events.extend(decode_line(&line));
        }
        events
    }

    /// Flush a trailing line that had no newline
    pub fn finish(&mut self) -> Vec<GenerationEvent> {
        let rest = std::mem::take(&mut self.buffer);
        decode_line(&rest)
    }
}

fn decode_line(line: &[u8]) -> Vec<GenerationEvent> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let chunk: GenerateChunk = match serde_json::from_str(text) {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!("Skipping malformed stream line: {}", e);
            return Vec::new();
        }
    };

    if let Some(error) = chunk.error {
        return vec![GenerationEvent::Failed(error)];
    }

    let mut events = Vec::new();
    if !chunk.response.is_empty() {
        events.push(GenerationEvent::Token(chunk.response));
    }
    if chunk.done {
        events.push(GenerationEvent::Completed);
    }
    events
}

struct DecodeState<S> {
    bytes: S,
    decoder: NdjsonDecoder,
    pending: VecDeque<GenerationEvent>,
    finished: bool,
}

/// Turn a stream of body chunks into a `TokenStream`
pub fn decode_events<S, B, E>(bytes: S) -> TokenStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = DecodeState {
        bytes: bytes.boxed(),
        decoder: NdjsonDecoder::default(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((event, state));
            }
            if state.finished {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let events = state.decoder.push(chunk.as_ref());
                    state.pending.extend(events);
                }
                Some(Err(e)) => {
                    state.pending.push_back(GenerationEvent::Failed(e.to_string()));
                    state.finished = true;
                }
                None => {
                    let events = state.decoder.finish();
                    state.pending.extend(events);
                    state.finished = true;
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_normalized() {
        let client = OllamaClient::new("http://localhost:11434/api/generate/", "gemma2:2b").unwrap();
        assert_eq!(client.base_url(), "http://localhost:11434");
        assert_eq!(client.model(), "gemma2:2b");
    }

    #[test]
    fn test_request_body_is_raw_for_completion() {
        let body = serde_json::to_value(GenerateRequest {
            model: "m",
            prompt: "p",
            stream: true,
            raw: true,
        })
        .unwrap();
        assert_eq!(body["stream"], true);
        assert_eq!(body["raw"], true);
    }

    #[test]
    fn test_decoder_buffers_partial_lines() {
        let mut decoder = NdjsonDecoder::default();
        assert!(decoder.push(br#"{"response":"CATE"#).is_empty());
        assert_eq!(
            decoder.push(b"GORY\",\"done\":false}\n{\"response\":\": work\"}\n"),
            vec![
                GenerationEvent::Token("CATEGORY".to_string()),
                GenerationEvent::Token(": work".to_string()),
            ]
        );
        assert_eq!(
            decoder.push(b"{\"response\":\"\",\"done\":true}"),
            Vec::<GenerationEvent>::new()
        );
        assert_eq!(decoder.finish(), vec![GenerationEvent::Completed]);
    }

    #[test]
    fn test_decoder_reports_errors_and_skips_garbage() {
        let mut decoder = NdjsonDecoder::default();
        let events = decoder.push(b"not json\n{\"error\":\"model not found\"}\n");
        assert_eq!(events, vec![GenerationEvent::Failed("model not found".to_string())]);
    }

    #[test]
    fn test_decode_events_from_chunks() {
        let chunks: Vec<std::result::Result<Vec<u8>, String>> = vec![
            Ok(b"{\"response\":\"a\"}\n{\"resp".to_vec()),
            Ok(b"onse\":\"b\"}\n".to_vec()),
            Err("connection reset".to_string()),
            Ok(b"{\"response\":\"never\"}\n".to_vec()),
        ];

        let events: Vec<GenerationEvent> = tokio_test::block_on(decode_events(stream::iter(chunks)).collect());
        assert_eq!(
            events,
            vec![
                GenerationEvent::Token("a".to_string()),
                GenerationEvent::Token("b".to_string()),
                GenerationEvent::Failed("connection reset".to_string()),
            ]
        );
    }

    /// Accept one connection and answer it with `reply`, or hold it open when `None`
    async fn serve_once(reply: Option<String>) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            match reply {
                Some(reply) => {
                    socket.write_all(reply.as_bytes()).await.unwrap();
                    let _ = socket.shutdown().await;
                }
                None => tokio::time::sleep(Duration::from_secs(30)).await,
            }
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_refused_generation_is_not_retried() {
        let body = r#"{"error":"model 'nope' not found"}"#;
        let reply = format!(
            "HTTP/1.1 404 Not Found\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let url = serve_once(Some(reply)).await;
        // the listener is gone after one reply, so a retry would end in EngineUnavailable
        let client = OllamaClient::new(&url, "nope").unwrap().with_retries(2);

        match client.generate("hi", false).await {
            Err(TaxisError::Generation(message)) => assert_eq!(message, "model 'nope' not found"),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("expected an error"),
        }
    }

    #[tokio::test]
    async fn test_request_timeout_comes_from_config() {
        let url = serve_once(None).await;
        let config = EngineConfig {
            url,
            model: "m".to_string(),
            timeout_secs: 1,
            retries: 0,
        };
        let client = OllamaClient::from_config(&config).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), client.health_check()).await;
        assert!(matches!(result, Ok(Err(TaxisError::EngineUnavailable(_)))));
    }

    #[tokio::test]
    async fn test_unreachable_server_fails_without_retries() {
        let client = OllamaClient::new("http://127.0.0.1:9", "m").unwrap();
        assert!(client.generate("hi", false).await.is_err());
        assert!(client.health_check().await.is_err());
    }
}
