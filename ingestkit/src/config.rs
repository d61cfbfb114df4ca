use crate::{core::chunk::ChunkConfig, error::IngestError, map_err};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

/// The default env filter.
const DEFAULT_LOG: &str = "info";

#[derive(Debug, Parser)]
#[command(name = "ingestkit", version = "0.1", about = "Load documents and prompt models", long_about = None)]
pub struct StartArgs {
    /// RUST_LOG string to use as the env filter.
    #[arg(short, long, global = true)]
    log: Option<String>,

    /// Model to generate with, the backend default if not set.
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// If using the OpenAI backend, set its endpoint.
    #[cfg(feature = "openai")]
    #[arg(long, global = true)]
    openai_endpoint: Option<String>,

    /// If using the OpenAI backend, set its API key.
    #[cfg(feature = "openai")]
    #[arg(long, global = true)]
    openai_key: Option<String>,

    /// If using the Ollama backend, set its URL.
    #[cfg(feature = "ollama")]
    #[arg(long, global = true)]
    ollama_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load every file below a directory and print the records as JSON lines.
    Load {
        /// Directory to load.
        root: String,

        /// Encoding of the files. Advisory only, files are read as UTF-8.
        #[arg(short, long)]
        encoding: Option<String>,

        /// Skip entries starting with this prefix, in addition to `Modelfile`.
        #[arg(short = 'x', long)]
        exclude: Vec<String>,

        /// Chunker configuration as JSON, e.g. `{"sliding":{"size":1000,"overlap":100}}`.
        /// Records are not chunked if not set.
        #[arg(short, long)]
        chunker: Option<String>,
    },

    /// Generate a completion for a single prompt.
    Complete {
        prompt: String,

        #[arg(short, long, value_enum, default_value_t = Backend::Fake)]
        backend: Backend,

        #[arg(short, long)]
        temperature: Option<f64>,

        /// Stop generating at this word. Repeatable.
        #[arg(short, long)]
        stop: Vec<String>,

        #[arg(long)]
        max_tokens: Option<usize>,

        /// Print tokens as they are generated.
        #[arg(long)]
        stream: bool,
    },
}

impl Command {
    /// Parse the chunker configuration of [Command::Load], if any.
    pub fn chunk_config(&self) -> Result<Option<ChunkConfig>, IngestError> {
        match self {
            Self::Load {
                chunker: Some(config),
                ..
            } => Ok(Some(map_err!(serde_json::from_str(config)))),
            _ => Ok(None),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Echoes the prompt.
    Fake,

    #[cfg(feature = "openai")]
    Openai,

    #[cfg(feature = "ollama")]
    Ollama,
}

/// Implement a getter method on [StartArgs], using the `$var` environment variable as a fallback.
/// Missing required values become validation errors.
macro_rules! arg {
    ($id:ident, $var:literal, required $msg:literal) => {
        impl StartArgs {
            pub fn $id(&self) -> Result<String, IngestError> {
                match &self.$id {
                    Some(val) => Ok(val.to_string()),
                    None => match std::env::var($var) {
                        Ok(val) => Ok(val),
                        Err(_) => crate::err!(Validation, $msg),
                    },
                }
            }
        }
    };
    ($id:ident, $var:literal, optional) => {
        impl StartArgs {
            pub fn $id(&self) -> Option<String> {
                match &self.$id {
                    Some(val) => Some(val.to_string()),
                    None => std::env::var($var).ok(),
                }
            }
        }
    };
    ($id:ident, $var:literal, default $value:expr) => {
        impl StartArgs {
            pub fn $id(&self) -> String {
                match &self.$id {
                    Some(val) => val.to_string(),
                    None => match std::env::var($var) {
                        Ok(val) => val,
                        Err(_) => $value,
                    },
                }
            }
        }
    };
}

impl StartArgs {
    /// Initialise the global `tracing` subscriber. Logs go to stderr, stdout is for output.
    pub fn init_tracing(&self) {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from(self.log()))
            .with_writer(std::io::stderr)
            .init();
    }
}

arg!(log,             "RUST_LOG",         default DEFAULT_LOG.to_string());
arg!(model,           "INGESTKIT_MODEL",  optional);

#[cfg(feature = "openai")]
arg!(openai_endpoint, "OPENAI_ENDPOINT",  default generators::openai::DEFAULT_OPENAI_ENDPOINT.to_string());
#[cfg(feature = "openai")]
arg!(openai_key,      "OPENAI_KEY",       required "OpenAI key not found; Pass --openai-key or set OPENAI_KEY");

#[cfg(feature = "ollama")]
arg!(ollama_url,      "OLLAMA_URL",       default generators::ollama::DEFAULT_ENDPOINT.to_string());
