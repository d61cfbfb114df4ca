use crate::{
    core::{
        cancel::CancelToken,
        llm::{Completion, StopScanner, TokenSink},
    },
    error::{IngestErr, IngestError},
};
use generators::error::GeneratorError;
use tracing::debug;

/// A provider stream yielding content deltas.
#[async_trait::async_trait]
pub trait DeltaStream: Send {
    async fn next_delta(&mut self) -> Option<Result<String, GeneratorError>>;
}

#[cfg(feature = "openai")]
#[async_trait::async_trait]
impl DeltaStream for generators::openai::ChatStream {
    async fn next_delta(&mut self) -> Option<Result<String, GeneratorError>> {
        generators::openai::ChatStream::next_delta(self).await
    }
}

#[cfg(feature = "ollama")]
#[async_trait::async_trait]
impl DeltaStream for generators::ollama::ChatStream {
    async fn next_delta(&mut self) -> Option<Result<String, GeneratorError>> {
        generators::ollama::ChatStream::next_delta(self).await
    }
}

/// Pull deltas from `stream` into `on_token` until it ends, a stop word
/// shows up or `cancel` fires.
///
/// Cancelling returns the text emitted so far tagged as cancelled. A stream
/// failing midway is reported as [IngestErr::Interrupted] with the same text.
pub async fn drain(
    stream: &mut dyn DeltaStream,
    cancel: &CancelToken,
    stop_words: &[String],
    on_token: &mut TokenSink<'_>,
) -> Result<Completion, IngestError> {
    let mut scanner = StopScanner::new(stop_words);
    let mut text = String::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            next = stream.next_delta() => Some(next),
        };

        let Some(next) = next else {
            debug!("Stream cancelled after {} bytes", text.len());
            return Ok(Completion::cancelled(text));
        };

        let delta = match next {
            Some(Ok(delta)) => delta,
            Some(Err(e)) => {
                return Err(IngestError::new(
                    file!(),
                    line!(),
                    column!(),
                    IngestErr::Interrupted {
                        partial: text,
                        reason: e.to_string(),
                    },
                ))
            }
            None => break,
        };

        if cancel.is_cancelled() {
            return Ok(Completion::cancelled(text));
        }

        let safe = scanner.push(&delta);
        if !safe.is_empty() {
            on_token(&safe);
            text.push_str(&safe);
        }

        if scanner.stopped() {
            break;
        }
    }

    let rest = scanner.finish();
    if !rest.is_empty() {
        on_token(&rest);
        text.push_str(&rest);
    }

    Ok(Completion::complete(text))
}
