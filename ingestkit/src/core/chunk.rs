use super::record::{Provenance, Record, CHUNKS_KEY, CHUNK_KEY};
use crate::{error::IngestError, map_err};
use chunx::{SeparatorWindow, SlidingWindow};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Subdivides text according to its own policy.
///
/// Implementations must cover their input, i.e. chunks may overlap but
/// no leading or trailing content may be lost.
pub trait Chunker: Send + Sync {
    fn chunk<'a>(&self, input: &'a str) -> Result<Vec<&'a str>, IngestError>;
}

impl Chunker for SlidingWindow {
    fn chunk<'a>(&self, input: &'a str) -> Result<Vec<&'a str>, IngestError> {
        Ok(map_err!(SlidingWindow::chunk(self, input)))
    }
}

impl Chunker for SeparatorWindow {
    fn chunk<'a>(&self, input: &'a str) -> Result<Vec<&'a str>, IngestError> {
        Ok(map_err!(SeparatorWindow::chunk(self, input)))
    }
}

/// Serializable chunker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChunkConfig {
    Sliding(SlidingWindow),
    Separator(SeparatorWindow),
}

impl ChunkConfig {
    /// * `size`: Chunk base size in bytes.
    /// * `overlap`: Bytes to extend each chunk with on both sides.
    pub fn sliding(size: usize, overlap: usize) -> Self {
        Self::Sliding(SlidingWindow { size, overlap })
    }

    /// * `delimiter`: Character to split after.
    /// * `size`: Maximum chunk size in bytes, unless a single segment exceeds it.
    pub fn separator(delimiter: char, size: usize) -> Self {
        Self::Separator(SeparatorWindow { size, delimiter })
    }

    /// Validate the configuration and create the chunker.
    pub fn build(&self) -> Result<Box<dyn Chunker>, IngestError> {
        Ok(match self {
            Self::Sliding(c) => Box::new(map_err!(SlidingWindow::new(c.size, c.overlap))),
            Self::Separator(c) => Box::new(map_err!(SeparatorWindow::new(c.size, c.delimiter))),
        })
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self::Sliding(SlidingWindow::default())
    }
}

impl std::fmt::Display for ChunkConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sliding(_) => write!(f, "SlidingWindow"),
            Self::Separator(_) => write!(f, "SeparatorWindow"),
        }
    }
}

/// Split every record with `chunker`.
///
/// Each chunk inherits the provenance of its record, extended with its
/// position and the chunk count. The first failure aborts the whole batch.
pub fn split_records(
    chunker: &dyn Chunker,
    records: Vec<Record>,
) -> Result<Vec<Record>, IngestError> {
    let mut chunked = Vec::with_capacity(records.len());

    for record in records.iter() {
        let chunks = chunker.chunk(record.payload())?;
        let total = chunks.len();

        for (i, chunk) in chunks.into_iter().enumerate() {
            let extra = Provenance::from([
                (CHUNK_KEY.to_string(), i.into()),
                (CHUNKS_KEY.to_string(), total.into()),
            ]);
            chunked.push(record.derive(chunk, extra));
        }
    }

    debug!(
        "Split {} record(s) into {} chunk(s)",
        records.len(),
        chunked.len()
    );

    Ok(chunked)
}
