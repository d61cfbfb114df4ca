//! HTTP clients for generative model providers.
//!
//! The clients speak the provider wire protocols and nothing else. Mapping
//! generation options onto requests and honouring cancellation is up to
//! the caller.

use serde::{Deserialize, Serialize};

pub mod error;

/// Client for the OpenAI chat completions API.
#[cfg(feature = "openai")]
pub mod openai;

/// Client for a local or remote Ollama instance.
#[cfg(feature = "ollama")]
pub mod ollama;

#[cfg(any(feature = "openai", feature = "ollama"))]
mod stream;

/// A single chat message as both providers expect it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}
