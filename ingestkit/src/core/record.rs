use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Provenance key every record carries, identifying its origin.
pub const SOURCE_KEY: &str = "source";

/// Provenance key added by chunking, the position of a chunk in its parent.
pub const CHUNK_KEY: &str = "chunk";

/// Provenance key added by chunking, the amount of chunks of the parent.
pub const CHUNKS_KEY: &str = "chunks";

pub type Provenance = HashMap<String, Value>;

/// A normalized unit of content.
///
/// Records are created once and never mutated afterwards. Deriving
/// a record, e.g. by chunking, produces a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    payload: String,
    provenance: Provenance,
}

impl Record {
    /// Create a record originating from `source`.
    pub fn new(payload: impl Into<String>, source: impl Into<String>) -> Self {
        let mut provenance = Provenance::new();
        provenance.insert(SOURCE_KEY.to_string(), Value::String(source.into()));
        Self {
            payload: payload.into(),
            provenance,
        }
    }

    /// Create a record with the given payload inheriting the provenance
    /// of `self`, extended with `extra`.
    pub fn derive(&self, payload: impl Into<String>, extra: Provenance) -> Self {
        let mut provenance = self.provenance.clone();
        provenance.extend(extra);
        Self {
            payload: payload.into(),
            provenance,
        }
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    /// The `source` provenance entry.
    pub fn source(&self) -> Option<&str> {
        self.provenance.get(SOURCE_KEY).and_then(Value::as_str)
    }

    pub fn into_payload(self) -> String {
        self.payload
    }
}
