use crate::{error::GeneratorError, stream::LineStream, ChatMessage};
use serde::{Deserialize, Serialize};
use std::error::Error;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_OPENAI_ENDPOINT: &str = "https://api.openai.com";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

/// OpenAI only accepts this many stop sequences per request.
pub const MAX_STOP_SEQUENCES: usize = 4;

pub struct OpenAiChat {
    endpoint: String,
    key: String,
    client: reqwest::Client,
}

impl OpenAiChat {
    pub fn new(api_key: &str) -> Self {
        Self {
            endpoint: DEFAULT_OPENAI_ENDPOINT.to_string(),
            key: api_key.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.trim_end_matches('/').to_string();
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, GeneratorError> {
        let response = self.send(request, false).await?;

        let response = match response.json::<ChatResponse>().await {
            Ok(res) => res,
            Err(e) => {
                tracing::error!("Error decoding OpenAI response: {}", e);
                tracing::error!("Source: {:?}", e.source());
                return Err(GeneratorError::Reqwest(e));
            }
        };

        if let Some(usage) = &response.usage {
            debug!(
                "Completed with '{}', used tokens {}-{}-{} (prompt-completion-total)",
                response.model, usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
            );
        }

        Ok(response)
    }

    /// Start a streamed completion. Deltas are pulled with [ChatStream::next_delta].
    pub async fn stream(&self, request: &ChatRequest) -> Result<ChatStream, GeneratorError> {
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

        let body = WireRequest { request, stream };

        let response = match self
            .client
            .post(format!("{}/v1/chat/completions", self.endpoint))
            .bearer_auth(&self.key)
            .json(&body)
            .send()
            .await
        {
            Ok(res) => res,
            Err(e) => {
                tracing::error!("Error in OpenAI request: {e}");
                return Err(GeneratorError::Reqwest(e));
            }
        };

        if response.status() != 200 {
            tracing::error!(
                "Request to {} failed with status {}",
                response.url(),
                response.status()
            );
            let response = match response.json::<OpenAIError>().await {
                Ok(res) => res,
                Err(e) => {
                    tracing::error!("Error reading OpenAI response: {}", e);
                    return Err(GeneratorError::Reqwest(e));
                }
            };
            return Err(GeneratorError::OpenAI(response));
        }

        Ok(response)
    }
}

impl std::fmt::Debug for OpenAiChat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiChat")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// A chat completion request. Unset knobs are omitted from the body
/// so the provider defaults apply.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseFormat {
    pub r#type: String,
}

impl ResponseFormat {
    pub fn json_object() -> Self {
        Self {
            r#type: "json_object".to_string(),
        }
    }
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
    pub choices: Vec<Choice>,
    pub usage: Option<Usage>,
}

impl ChatResponse {
    /// Content of the first choice, if any.
    pub fn content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.content.as_deref())
    }
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: ResponseMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResponseMessage {
    pub role: String,
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// Server sent event stream of a chat completion.
pub struct ChatStream {
    lines: LineStream,
    finished: bool,
}

impl ChatStream {
    /// Returns the next non-empty content delta, `None` once the provider
    /// signals the end of the stream.
    pub async fn next_delta(&mut self) -> Option<Result<String, GeneratorError>> {
        while !self.finished {
            let line = match self.lines.next_line().await? {
                Ok(line) => line,
                Err(e) => return Some(Err(e)),
            };

            match parse_event(&line) {
                Ok(Event::Done) => self.finished = true,
                Ok(Event::Delta(delta)) if !delta.is_empty() => return Some(Ok(delta)),
                Ok(_) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }
}

#[derive(Debug, PartialEq)]
enum Event {
    Delta(String),
    Done,
    Ignored,
}

fn parse_event(line: &str) -> Result<Event, GeneratorError> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(Event::Ignored);
    };

    let data = data.trim();

    if data == "[DONE]" {
        return Ok(Event::Done);
    }

    let chunk: StreamChunk = serde_json::from_str(data)?;

    let delta = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .unwrap_or_default();

    Ok(Event::Delta(delta))
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Delta,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
}

#[derive(Debug, Deserialize, Error)]
#[error("{message}, type: {r#type}, param: {param:?}, code: {code:?}")]
pub struct OpenAIErrorParams {
    pub message: String,
    pub r#type: String,
    pub param: Option<String>,
    pub code: Option<String>,
}

#[derive(Debug, Deserialize, Error)]
#[error("Open AI error response {{ {error} }}")]
pub struct OpenAIError {
    pub error: OpenAIErrorParams,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_knobs_are_omitted() {
        let request = ChatRequest {
            model: "gpt".to_string(),
            messages: vec![ChatMessage::new("user", "hi")],
            temperature: Some(0.8),
            ..Default::default()
        };

        let body = serde_json::to_value(WireRequest {
            request: &request,
            stream: true,
        })
        .unwrap();

        assert_eq!(body["temperature"], 0.8);
        assert_eq!(body["stream"], true);
        assert!(body.get("stop").is_none());
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn parses_stream_events() {
        let delta = r#"data: {"choices":[{"index":0,"delta":{"content":"Arm"}}]}"#;
        assert_eq!(Event::Delta("Arm".to_string()), parse_event(delta).unwrap());

        let role_only = r#"data: {"choices":[{"index":0,"delta":{"role":"assistant"}}]}"#;
        assert_eq!(Event::Delta(String::new()), parse_event(role_only).unwrap());

        assert_eq!(Event::Done, parse_event("data: [DONE]").unwrap());
        assert_eq!(Event::Ignored, parse_event(": keep-alive").unwrap());
        assert!(parse_event("data: {broken").is_err());
    }

    #[test]
    fn reads_first_choice() {
        let response: ChatResponse = serde_json::from_str(
            r#"{
                "model": "gpt",
                "choices": [{ "index": 0, "message": { "role": "assistant", "content": "Neil" }, "finish_reason": "stop" }],
                "usage": { "prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2 }
            }"#,
        )
        .unwrap();

        assert_eq!(Some("Neil"), response.content());
    }
}
