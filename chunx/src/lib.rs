//! Text chunking algorithms.
//!
//! Every chunker in this crate covers its input: concatenating the returned
//! chunks (minus overlaps) yields the original text, leading and trailing
//! whitespace included.

pub mod separator;
pub mod sliding;

pub use separator::SeparatorWindow;
pub use sliding::SlidingWindow;

#[derive(Debug, thiserror::Error)]
pub enum ChunkerError {
    #[error("{0}")]
    Config(String),
}
