use super::ChunkerError;
use serde::{Deserialize, Serialize};
use tracing::debug;

const SEPARATOR_WINDOW_DEFAULT_SIZE: usize = 1000;
const SEPARATOR_WINDOW_DEFAULT_DELIMITER: char = '\n';

/// Splits the input after every occurrence of `delimiter` and greedily
/// packs the resulting segments into chunks of at most `size` bytes.
///
/// Segments are never cut, so a single segment longer than `size` ends
/// up in a chunk of its own. Chunks do not overlap and concatenate back
/// to the exact input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeparatorWindow {
    pub size: usize,
    pub delimiter: char,
}

impl SeparatorWindow {
    pub fn new(size: usize, delimiter: char) -> Result<Self, ChunkerError> {
        if size == 0 {
            return Err(ChunkerError::Config("size must be greater than 0".to_string()));
        }
        Ok(Self { size, delimiter })
    }

    pub fn chunk<'a>(&self, input: &'a str) -> Result<Vec<&'a str>, ChunkerError> {
        if self.size == 0 {
            return Err(ChunkerError::Config("size must be greater than 0".to_string()));
        }

        let mut chunks = vec![];
        let mut chunk_start = 0;
        let mut chunk_end = 0;

        for segment in input.split_inclusive(self.delimiter) {
            if chunk_end > chunk_start && chunk_end - chunk_start + segment.len() > self.size {
                chunks.push(&input[chunk_start..chunk_end]);
                chunk_start = chunk_end;
            }
            chunk_end += segment.len();
        }

        if chunk_end > chunk_start {
            chunks.push(&input[chunk_start..chunk_end]);
        }

        debug!("Chunked {} chunks on {:?}", chunks.len(), self.delimiter);

        Ok(chunks)
    }
}

impl Default for SeparatorWindow {
    fn default() -> Self {
        Self {
            size: SEPARATOR_WINDOW_DEFAULT_SIZE,
            delimiter: SEPARATOR_WINDOW_DEFAULT_DELIMITER,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separator_window_packs_segments() {
        let input = "one.\ntwo.\nthree.\nfour.\n";
        let window = SeparatorWindow::new(10, '\n').unwrap();
        let chunks = window.chunk(input).unwrap();

        assert_eq!(vec!["one.\ntwo.\n", "three.\n", "four.\n"], chunks);
        assert_eq!(input, chunks.concat());
    }

    #[test]
    fn separator_window_keeps_oversized_segments_whole() {
        let input = "a very long sentence without breaks. short.";
        let window = SeparatorWindow::new(5, '.').unwrap();
        let chunks = window.chunk(input).unwrap();

        assert_eq!(vec!["a very long sentence without breaks.", " short."], chunks);
    }

    #[test]
    fn separator_window_empty() {
        let chunks = SeparatorWindow::default().chunk("").unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn separator_window_deserializes() {
        let window: SeparatorWindow =
            serde_json::from_str(r#"{ "size": 42, "delimiter": "." }"#).unwrap();
        assert_eq!(SeparatorWindow::new(42, '.').unwrap(), window);
    }
}
