use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A per-call deadline with a tag naming the operation, so timeout errors
/// say which call blew the budget.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    pub ms: u64,
    pub tag: &'static str,
}

impl Deadline {
    pub fn new(ms: u64, tag: &'static str) -> Self {
        Self { ms, tag }
    }

    fn duration(self) -> Duration {
        Duration::from_millis(self.ms)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Sampling parameters for one generation call.
#[derive(Debug, Clone, Copy)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 600,
            temperature: 0.2,
            top_p: 0.9,
        }
    }
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation backend returned {status}: {body}")]
    Backend { status: u16, body: String },

    #[error("generation request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("generation call '{tag}' timed out after {ms} ms")]
    Timeout { ms: u64, tag: &'static str },

    #[error("generation stream frame could not be decoded: {0}")]
    Stream(String),
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Client for an OpenAI-compatible `/v1/chat/completions` endpoint, with a
/// blocking call and an SSE-consuming variant that returns the joined text.
#[derive(Debug, Clone)]
pub struct GenerationClient {
    http: Client,
    base_url: String,
    model: String,
}

impl GenerationClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// One-shot completion: returns the whole assistant text.
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
        deadline: Deadline,
    ) -> Result<String, GenerationError> {
        let request = self.request_body(messages, params, false);

        let response = self
            .http
            .post(self.endpoint())
            .timeout(deadline.duration())
            .json(&request)
            .send()
            .await
            .map_err(|error| classify(error, deadline))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Backend {
                status: status.as_u16(),
                body,
            });
        }

        let payload: ChatResponse = response
            .json()
            .await
            .map_err(|error| classify(error, deadline))?;

        Ok(payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default())
    }

    /// Streaming completion: consumes the SSE token stream, concatenates
    /// every delta and returns the joined text once the `[DONE]` sentinel
    /// (or end of stream) arrives.
    pub async fn stream(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
        deadline: Deadline,
    ) -> Result<String, GenerationError> {
        let request = self.request_body(messages, params, true);

        let work = async {
            let response = self
                .http
                .post(self.endpoint())
                .json(&request)
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(GenerationError::Backend {
                    status: status.as_u16(),
                    body,
                });
            }

            let mut body_stream = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();
            let mut answer = String::new();

            while let Some(chunk) = body_stream.next().await {
                let chunk = chunk?;
                buffer.extend_from_slice(&chunk);

                // Only complete lines are parsed; a partial frame stays
                // buffered until its newline arrives.
                while let Some(newline) = buffer.iter().position(|byte| *byte == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=newline).collect();
                    let line = String::from_utf8_lossy(&line);
                    match consume_sse_line(line.trim(), &mut answer)? {
                        SseStep::Continue => {}
                        SseStep::Done => return Ok(answer),
                    }
                }
            }

            if !buffer.is_empty() {
                let tail = String::from_utf8_lossy(&buffer).to_string();
                consume_sse_line(tail.trim(), &mut answer)?;
            }

            Ok(answer)
        };

        match tokio::time::timeout(deadline.duration(), work).await {
            Ok(result) => result.map_err(|error| match error {
                GenerationError::Transport(inner) if inner.is_timeout() => {
                    GenerationError::Timeout {
                        ms: deadline.ms,
                        tag: deadline.tag,
                    }
                }
                other => other,
            }),
            Err(_) => Err(GenerationError::Timeout {
                ms: deadline.ms,
                tag: deadline.tag,
            }),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    fn request_body<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        params: &GenerationParams,
        stream: bool,
    ) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            top_p: params.top_p,
            stream,
        }
    }
}

fn classify(error: reqwest::Error, deadline: Deadline) -> GenerationError {
    if error.is_timeout() {
        GenerationError::Timeout {
            ms: deadline.ms,
            tag: deadline.tag,
        }
    } else {
        GenerationError::Transport(error)
    }
}

enum SseStep {
    Continue,
    Done,
}

/// Handle one SSE line. Non-`data:` lines (comments, `event:`, blanks) are
/// skipped; `data: [DONE]` terminates; any other payload must be a JSON
/// chunk whose first choice delta is appended.
fn consume_sse_line(line: &str, answer: &mut String) -> Result<SseStep, GenerationError> {
    if line.is_empty() {
        return Ok(SseStep::Continue);
    }

    let Some(payload) = line.strip_prefix("data:") else {
        return Ok(SseStep::Continue);
    };
    let payload = payload.trim();

    if payload.is_empty() {
        return Ok(SseStep::Continue);
    }
    if payload == "[DONE]" {
        return Ok(SseStep::Done);
    }

    let chunk: StreamChunk = serde_json::from_str(payload)
        .map_err(|error| GenerationError::Stream(error.to_string()))?;

    if let Some(content) = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
    {
        answer.push_str(&content);
    }

    Ok(SseStep::Continue)
}
