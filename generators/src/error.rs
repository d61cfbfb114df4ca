use thiserror::Error;

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("model not available: {0}")]
    ModelNotAvailable(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "openai")]
    #[error("openai: {0}")]
    OpenAI(#[from] crate::openai::OpenAIError),

    #[cfg(feature = "ollama")]
    #[error("ollama: status {status}; {message}")]
    Ollama { status: u16, message: String },

    #[cfg(any(feature = "openai", feature = "ollama"))]
    #[error("http client error: {0}")]
    Reqwest(#[from] reqwest::Error),
}
