use crate::{error::GeneratorError, stream::LineStream, ChatMessage};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Default Ollama API endpoint
pub const DEFAULT_ENDPOINT: &str = "http://localhost:11434";

/// Default timeout for non-streamed requests
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Ollama API client for local inference.
pub struct Ollama {
    endpoint: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl Ollama {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, GeneratorError> {
        let response = self
            .send(request, false)
            .await?
            .json::<ChatResponse>()
            .await?;

        debug!(
            "Ollama '{}' completed, done: {}",
            response.model, response.done
        );

        Ok(response)
    }

    /// Start a streamed chat. Every line of the body is a JSON object
    /// carrying a content delta.
    pub async fn chat_stream(&self, request: &ChatRequest) -> Result<ChatStream, GeneratorError> {
        let response = self.send(request, true).await?;
        Ok(ChatStream {
            lines: LineStream::new(response),
            finished: false,
        })
    }

    async fn send(
        &self,
        request: &ChatRequest,
        stream: bool,
    ) -> Result<reqwest::Response, GeneratorError> {
        if request.messages.is_empty() {
            return Err(GeneratorError::InvalidInput(
                "messages cannot be empty".to_string(),
            ));
        }

        let url = format!("{}/api/chat", self.endpoint);
        let body = WireRequest { request, stream };

        let mut builder = self.client.post(&url).json(&body);

        // A streamed body may legitimately take longer than any fixed timeout
        if !stream {
            builder = builder.timeout(self.timeout);
        }

        let response = builder.send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(GeneratorError::ModelNotAvailable(request.model.clone()));
        }

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(GeneratorError::Ollama { status, message });
        }

        Ok(response)
    }
}

impl std::fmt::Debug for Ollama {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ollama")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    pub options: ModelOptions,
}

/// Sampling options, see the `Modelfile` parameter reference.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ModelOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<usize>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    #[serde(flatten)]
    request: &'a ChatRequest,
    stream: bool,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    pub model: String,
    #[serde(default)]
    pub message: Option<ChatMessage>,
    pub done: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl ChatResponse {
    pub fn content(&self) -> &str {
        self.message.as_ref().map(|m| m.content.as_str()).unwrap_or("")
    }
}

pub struct ChatStream {
    lines: LineStream,
    finished: bool,
}

impl ChatStream {
    /// Returns the next non-empty content delta, `None` once a line
    /// with `done: true` is received or the body ends.
    pub async fn next_delta(&mut self) -> Option<Result<String, GeneratorError>> {
        while !self.finished {
            let line = match self.lines.next_line().await? {
                Ok(line) => line,
                Err(e) => return Some(Err(e)),
            };

            let chunk = match parse_line(&line) {
                Ok(chunk) => chunk,
                Err(e) => return Some(Err(e)),
            };

            self.finished = chunk.done;

            if !chunk.content().is_empty() {
                return Some(Ok(chunk.content().to_string()));
            }
        }
        None
    }
}

fn parse_line(line: &str) -> Result<ChatResponse, GeneratorError> {
    let chunk: ChatResponse = serde_json::from_str(line)?;
    if let Some(error) = &chunk.error {
        return Err(GeneratorError::InvalidResponse(error.clone()));
    }
    Ok(chunk)
}
