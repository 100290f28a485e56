//! Client for an Ollama-style `/api/generate` endpoint.
//!
//! The service streams newline-delimited JSON objects, each carrying a text
//! fragment and a `done` flag. Fragments are concatenated in arrival order
//! until `done` is seen or the stream closes.

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::CompletionConfig;

/// Longest frame accepted before a newline shows up.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    /// Request could not be sent, the connection broke, timed out, or the
    /// service answered with a non-success status.
    #[error("transport error: {0}")]
    Transport(String),
    /// A stream frame did not have the expected shape.
    #[error("decode error: {0}")]
    Decode(String),
    #[error("model returned an empty response")]
    EmptyResponse,
}

/// Build the classification prompt. The message text is inserted once,
/// verbatim, between single quotes.
pub fn render_prompt(text: &str) -> String {
    format!(
        r#"Проанализируй текст на признаки спама и верни результат строго в формате JSON.

Текст для анализа: '{text}'

Верни ответ в следующем формате (замени значения, сохраняя структуру):
{{
  "spam_indicators": {{
    "excessive_caps": false,
    "suspicious_links": false,
    "aggressive_cta": false,
    "unrealistic_promises": false,
    "explanation": "В тексте нет признаков спама"
  }},
  "context_usefulness": "Текст содержит полезную информацию",
  "language_features": "Естественный язык общения",
  "classification": {{
    "is_spam": false,
    "probability": 5,
    "reason": "Обычное сообщение без признаков спама"
  }}
}}"#
    )
}

/// Request body sent to the completion service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationRequest {
    pub model: String,
    pub prompt: String,
}

impl ClassificationRequest {
    pub fn new(model: &str, text: &str) -> Self {
        Self {
            model: model.to_string(),
            prompt: render_prompt(text),
        }
    }
}

/// One frame of the streamed response.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamedChunk {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    pub response: String,
    pub done: bool,
}

/// What the service sends instead of a chunk when generation fails midway.
#[derive(Deserialize)]
struct ErrorFrame {
    error: String,
}

/// Reassembles NDJSON frames from arbitrarily split network chunks.
///
/// Bytes are buffered until a newline so that UTF-8 sequences split across
/// chunks decode intact.
#[derive(Debug, Default)]
pub struct FrameAccumulator {
    pending: Vec<u8>,
    /// Prefix of `pending` already known to hold no newline.
    scanned: usize,
    text: String,
    done: bool,
}

impl FrameAccumulator {
    /// Feed raw bytes. Returns `true` once a `done` frame has been seen;
    /// anything after it is discarded.
    pub fn push(&mut self, bytes: &[u8]) -> Result<bool, CompletionError> {
        if self.done {
            return Ok(true);
        }
        self.pending.extend_from_slice(bytes);

        while let Some(offset) = self.pending[self.scanned..].iter().position(|b| *b == b'\n') {
            let pos = self.scanned + offset;
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.scanned = 0;
            self.decode_line(&line)?;
            if self.done {
                self.pending.clear();
                return Ok(true);
            }
        }
        self.scanned = self.pending.len();

        if self.pending.len() > MAX_FRAME_BYTES {
            return Err(CompletionError::Decode(format!(
                "frame exceeds {MAX_FRAME_BYTES} bytes without a newline"
            )));
        }
        Ok(false)
    }

    /// Decode any trailing unterminated frame and return the assembled text.
    pub fn finish(mut self) -> Result<String, CompletionError> {
        if !self.done && !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            self.decode_line(&rest)?;
        }
        if self.text.trim().is_empty() {
            return Err(CompletionError::EmptyResponse);
        }
        Ok(self.text)
    }

    fn decode_line(&mut self, line: &[u8]) -> Result<(), CompletionError> {
        let line = line.trim_ascii();
        if line.is_empty() {
            return Ok(());
        }

        match serde_json::from_slice::<StreamedChunk>(line) {
            Ok(chunk) => {
                self.text.push_str(&chunk.response);
                self.done = chunk.done;
                Ok(())
            }
            Err(e) => {
                if let Ok(frame) = serde_json::from_slice::<ErrorFrame>(line) {
                    return Err(CompletionError::Decode(format!("service error: {}", frame.error)));
                }
                let preview: String = String::from_utf8_lossy(line).chars().take(200).collect();
                Err(CompletionError::Decode(format!("{e} in frame {preview:?}")))
            }
        }
    }
}

/// A failed attempt, and whether trying again could help.
struct AttemptError {
    error: CompletionError,
    retryable: bool,
}

impl AttemptError {
    fn transient(error: CompletionError) -> Self {
        Self { error, retryable: true }
    }

    fn fatal(error: CompletionError) -> Self {
        Self { error, retryable: false }
    }
}

impl From<CompletionError> for AttemptError {
    fn from(error: CompletionError) -> Self {
        Self::fatal(error)
    }
}

pub struct CompletionClient {
    config: CompletionConfig,
    http: reqwest::Client,
}

impl CompletionClient {
    pub fn new(config: CompletionConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { config, http })
    }

    /// Ask the model to classify `text` and return its assembled output.
    ///
    /// Connection failures, timeouts, 5xx and 429 are retried once after the
    /// configured backoff. Other 4xx answers are returned straight away.
    pub async fn complete(&self, text: &str) -> Result<String, CompletionError> {
        let request = ClassificationRequest::new(&self.config.model, text);

        let result = match self.attempt(&request).await {
            Ok(output) => Ok(output),
            Err(AttemptError { error, retryable: true }) => {
                warn!("Completion attempt failed ({error}), retrying in {:?}", self.config.retry_backoff);
                tokio::time::sleep(self.config.retry_backoff).await;
                self.attempt(&request).await.map_err(|e| e.error)
            }
            Err(AttemptError { error, .. }) => Err(error),
        };

        if let Ok(ref output) = result {
            info!("Model response assembled ({} chars)", output.chars().count());
        }
        result
    }

    async fn attempt(&self, request: &ClassificationRequest) -> Result<String, AttemptError> {
        debug!("POST {} (model {})", self.config.endpoint, request.model);

        let response = self
            .http
            .post(self.config.endpoint.clone())
            .json(request)
            .send()
            .await
            .map_err(|e| AttemptError::transient(CompletionError::Transport(e.to_string())))?;

        let status = response.status();
        if !status.is_success() {
            let retryable = status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS;
            let body = response.text().await.unwrap_or_default();
            return Err(AttemptError {
                error: CompletionError::Transport(format!("{status}: {body}")),
                retryable,
            });
        }

        let mut stream = response.bytes_stream();
        let mut frames = FrameAccumulator::default();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| AttemptError::transient(CompletionError::Transport(e.to_string())))?;
            if frames.push(&chunk)? {
                break;
            }
        }
        Ok(frames.finish()?)
    }
}
