use super::stream::drain;
use crate::{
    core::{
        cancel::CancelToken,
        llm::{
            truncate_at_stop, Capability, Completion, GenerateOptions, Llm, Request, TokenSink,
        },
    },
    err,
    error::IngestError,
    map_err,
};
use generators::{
    ollama::{ChatRequest, ModelOptions},
    ChatMessage,
};
use tracing::debug;

pub use generators::ollama::Ollama;

/// Model used when the call does not name one.
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.2";

/// Ollama supports every knob of the contract.
const CAPABILITIES: &[Capability] = &Capability::ALL;

fn chat_request(
    request: &Request,
    options: &GenerateOptions,
) -> Result<ChatRequest, IngestError> {
    let messages = request
        .to_messages()?
        .into_iter()
        .map(|m| ChatMessage::new(m.role.as_str(), m.content))
        .collect();

    Ok(ChatRequest {
        model: options
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.to_string()),
        messages,
        format: options.json_mode.then(|| "json".to_string()),
        options: ModelOptions {
            temperature: options.temperature,
            num_predict: options.max_tokens,
            stop: options.stop_words.clone(),
            top_p: options.top_p,
            top_k: options.top_k,
            seed: options.seed,
            frequency_penalty: options.frequency_penalty,
            presence_penalty: options.presence_penalty,
        },
    })
}

#[async_trait::async_trait]
impl Llm for Ollama {
    fn id(&self) -> &str {
        "ollama"
    }

    fn capabilities(&self) -> &[Capability] {
        CAPABILITIES
    }

    async fn generate(
        &self,
        cancel: &CancelToken,
        request: &Request,
        options: &GenerateOptions,
    ) -> Result<Completion, IngestError> {
        options.check_supported(Llm::id(self), CAPABILITIES)?;
        let chat = chat_request(request, options)?;
        cancel.check()?;

        debug!("Generating with '{}' at {}", chat.model, self.endpoint());

        let response = tokio::select! {
            _ = cancel.cancelled() => return err!(Cancelled),
            response = self.chat(&chat) => map_err!(response),
        };

        Ok(Completion::complete(truncate_at_stop(
            response.content(),
            &options.stop_words,
        )))
    }

    async fn generate_stream(
        &self,
        cancel: &CancelToken,
        request: &Request,
        options: &GenerateOptions,
        on_token: &mut TokenSink<'_>,
    ) -> Result<Completion, IngestError> {
        options.check_supported(Llm::id(self), CAPABILITIES)?;
        let chat = chat_request(request, options)?;

        if cancel.is_cancelled() {
            return Ok(Completion::cancelled(""));
        }

        debug!("Streaming with '{}' at {}", chat.model, self.endpoint());

        let mut stream = tokio::select! {
            _ = cancel.cancelled() => return Ok(Completion::cancelled("")),
            stream = self.chat_stream(&chat) => map_err!(stream),
        };

        drain(&mut stream, cancel, &options.stop_words, on_token).await
    }
}
