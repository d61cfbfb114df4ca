//! The core module defines the ingestion and generation contracts.
//! It provides the traits and models upstream adapters need to implement.

pub mod cancel;
pub mod chunk;
pub mod llm;
pub mod record;
pub mod source;
