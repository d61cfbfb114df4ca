use super::ChunkerError;
use serde::{Deserialize, Serialize};
use tracing::debug;

const SLIDING_WINDOW_DEFAULT_SIZE: usize = 1000;
const SLIDING_WINDOW_DEFAULT_OVERLAP: usize = 200;

/// The most basic of chunkers.
///
/// The input is cut into consecutive base windows of `size` bytes and
/// every window is extended by `overlap` bytes on both sides. Window
/// bounds are snapped outwards to the nearest char boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlidingWindow {
    pub size: usize,
    pub overlap: usize,
}

impl SlidingWindow {
    /// Create a new `SlidingWindow` chunker.
    /// Errors if `size` is 0 or `overlap` is greater than `size`.
    pub fn new(size: usize, overlap: usize) -> Result<Self, ChunkerError> {
        let window = Self { size, overlap };
        window.validate()?;
        Ok(window)
    }

    fn validate(&self) -> Result<(), ChunkerError> {
        if self.size == 0 {
            return Err(ChunkerError::Config("size must be greater than 0".to_string()));
        }
        if self.overlap > self.size {
            return Err(ChunkerError::Config(
                "overlap must be less than size".to_string(),
            ));
        }
        Ok(())
    }

    pub fn chunk<'a>(&self, input: &'a str) -> Result<Vec<&'a str>, ChunkerError> {
        self.validate()?;

        let SlidingWindow { size, overlap } = *self;

        if input.is_empty() {
            return Ok(vec![]);
        }

        if input.len() <= size + overlap {
            return Ok(vec![input]);
        }

        let mut chunks = vec![];
        let mut start = 0;

        while start < input.len() {
            let end = (start + size).min(input.len());

            let mut chunk_start = start.saturating_sub(overlap);
            let mut chunk_end = (end + overlap).min(input.len());

            while !input.is_char_boundary(chunk_start) {
                chunk_start -= 1;
            }

            while !input.is_char_boundary(chunk_end) {
                chunk_end += 1;
            }

            chunks.push(&input[chunk_start..chunk_end]);

            if chunk_end == input.len() {
                break;
            }

            start = end;
        }

        let total: usize = chunks.iter().map(|c| c.len()).sum();
        debug!(
            "Sliding window produced {} chunks, {} bytes on average",
            chunks.len(),
            total / chunks.len()
        );

        Ok(chunks)
    }
}

impl Default for SlidingWindow {
    fn default() -> Self {
        Self {
            size: SLIDING_WINDOW_DEFAULT_SIZE,
            overlap: SLIDING_WINDOW_DEFAULT_OVERLAP,
        }
    }
}
