//! Module containing concrete implementations from the [core](crate::core) module.

/// Entry store implementations.
pub mod source;

/// Generative backend implementations.
pub mod llm;

/// Backend agnostic contract checks for generative backends.
pub mod conformance;

/// Lifecycle of external services needed by integration tests.
pub mod service;

#[cfg(test)]
pub mod test;
