/// Canned response backend.
pub mod fake;

#[cfg(feature = "openai")]
pub mod openai;

#[cfg(feature = "ollama")]
pub mod ollama;

/// Streaming support shared by the remote backends.
#[cfg(any(feature = "openai", feature = "ollama"))]
pub mod stream;
