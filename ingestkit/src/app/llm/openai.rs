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
    openai::{ChatRequest, ResponseFormat, DEFAULT_OPENAI_MODEL, MAX_STOP_SEQUENCES},
    ChatMessage,
};
use tracing::{debug, warn};

pub use generators::openai::OpenAiChat;

const CAPABILITIES: &[Capability] = &[
    Capability::Streaming,
    Capability::StopWords,
    Capability::MultiTurn,
    Capability::Temperature,
    Capability::MaxTokens,
    Capability::TopP,
    Capability::Seed,
    Capability::Penalties,
    Capability::JsonMode,
];

/// Map the request and its resolved options onto the provider request.
///
/// Stop words past the provider limit are not sent, they are still applied
/// locally on the received text.
fn chat_request(
    request: &Request,
    options: &GenerateOptions,
) -> Result<ChatRequest, IngestError> {
    let messages = request
        .to_messages()?
        .into_iter()
        .map(|m| ChatMessage::new(m.role.as_str(), m.content))
        .collect();

    if options.stop_words.len() > MAX_STOP_SEQUENCES {
        warn!(
            "OpenAI accepts at most {MAX_STOP_SEQUENCES} stop sequences, {} given",
            options.stop_words.len()
        );
    }

    Ok(ChatRequest {
        model: options
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
        messages,
        temperature: options.temperature,
        max_tokens: options.max_tokens,
        stop: options
            .stop_words
            .iter()
            .take(MAX_STOP_SEQUENCES)
            .cloned()
            .collect(),
        top_p: options.top_p,
        seed: options.seed,
        frequency_penalty: options.frequency_penalty,
        presence_penalty: options.presence_penalty,
        response_format: options.json_mode.then(ResponseFormat::json_object),
    })
}

#[async_trait::async_trait]
impl Llm for OpenAiChat {
    fn id(&self) -> &str {
        "openai"
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

        debug!("Generating with '{}'", chat.model);

        let response = tokio::select! {
            _ = cancel.cancelled() => return err!(Cancelled),
            response = self.complete(&chat) => map_err!(response),
        };

        let text = response.content().unwrap_or_default();
        Ok(Completion::complete(truncate_at_stop(
            text,
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

        debug!("Streaming with '{}'", chat.model);

        let mut stream = tokio::select! {
            _ = cancel.cancelled() => return Ok(Completion::cancelled("")),
            stream = self.stream(&chat) => map_err!(stream),
        };

        drain(&mut stream, cancel, &options.stop_words, on_token).await
    }
}
