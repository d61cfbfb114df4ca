use std::error::Error as _;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum IngestErr {
    /// Malformed request or configuration. Never worth retrying.
    #[error("Validation; {0}")]
    Validation(String),

    /// The backend failed in a backend specific way, possibly transiently.
    #[error("Backend; {0}")]
    Backend(String),

    #[cfg(any(feature = "openai", feature = "ollama"))]
    #[error("Generator; {0}")]
    Generator(#[from] generators::error::GeneratorError),

    /// The operation observed its cancellation signal.
    #[error("Cancelled")]
    Cancelled,

    /// A nested container could not be enumerated.
    #[error("Container traversal; {0}")]
    ContainerTraversal(String),

    /// The contents of a leaf could not be read.
    #[error("Leaf read; {0}")]
    LeafRead(String),

    /// An external service needed by a test run could not be brought up.
    #[error("Provisioning; {0}")]
    Provisioning(String),

    /// A stream failed midway. `partial` holds everything received before the failure.
    #[error("Stream interrupted after {} bytes; {reason}", .partial.len())]
    Interrupted { partial: String, reason: String },

    #[error("IO; {0}")]
    IO(#[from] std::io::Error),

    #[error("JSON error; {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("chunker: {0}")]
    Chunker(#[from] chunx::ChunkerError),

    #[cfg(feature = "qdrant")]
    #[error("Qdrant; {0}")]
    Qdrant(#[from] qdrant_client::QdrantError),

    #[error("Testcontainers; {0}")]
    Testcontainers(#[from] testcontainers::TestcontainersError),
}

/// Coarse classification of [IngestErr], used to decide how an error propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Backend,
    Cancelled,
    ContainerTraversal,
    LeafRead,
    Provisioning,
    Interrupted,
    Internal,
}

impl IngestErr {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Backend(_) => ErrorKind::Backend,
            #[cfg(any(feature = "openai", feature = "ollama"))]
            Self::Generator(_) => ErrorKind::Backend,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::ContainerTraversal(_) => ErrorKind::ContainerTraversal,
            Self::LeafRead(_) => ErrorKind::LeafRead,
            Self::Provisioning(_) => ErrorKind::Provisioning,
            Self::Interrupted { .. } => ErrorKind::Interrupted,
            _ => ErrorKind::Internal,
        }
    }
}

#[derive(Debug, Error)]
#[error("{error}")]
pub struct IngestError {
    file: &'static str,
    line: u32,
    column: u32,
    pub error: IngestErr,
}

impl IngestError {
    pub fn new(file: &'static str, line: u32, column: u32, error: IngestErr) -> IngestError {
        IngestError {
            file,
            line,
            column,
            error,
        }
    }

    pub fn location(&self) -> String {
        format!("{}:{}:{}", self.file, self.line, self.column)
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }

    pub fn print(&self) {
        let location = self.location();

        error!("{location} | {self}");

        if self.error.source().is_some() {
            error!("Causes:");
        }

        let mut src = self.error.source();
        while let Some(source) = src {
            error!(" - {source}");
            src = source.source();
        }
    }
}

#[macro_export]
macro_rules! err {
    ($ty:ident $(, $l:literal $(,)? $($args:expr),* )?) => {
        Err($crate::error::IngestError::new(
            file!(),
            line!(),
            column!(),
            $crate::error::IngestErr::$ty $( (format!($l, $( $args, )*)) )?,
        ))
    };
}

#[macro_export]
macro_rules! map_err {
    ($ex:expr) => {
        $ex.map_err(|e| $crate::error::IngestError::new(file!(), line!(), column!(), e.into()))?
    };
}
