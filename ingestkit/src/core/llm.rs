//! The generative backend contract.
//!
//! A backend turns a [Request] and a resolved set of [GenerateOptions] into a
//! [Completion]. Options are assembled from independent [CallOption]s applied
//! left to right, last writer wins per knob. A backend applies every knob it
//! declares a [Capability] for and ignores the rest, unless the caller marked
//! the knob as required with [CallOption::Require].

use super::cancel::CancelToken;
use crate::{err, error::IngestError, map_err};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// What to generate from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Prompt(String),
    Messages(Vec<Message>),
}

impl Request {
    pub fn prompt(prompt: impl Into<String>) -> Self {
        Self::Prompt(prompt.into())
    }

    pub fn messages(messages: Vec<Message>) -> Self {
        Self::Messages(messages)
    }

    /// The request as a message sequence. A single prompt becomes one user message.
    /// Errors if the request carries no content.
    pub fn to_messages(&self) -> Result<Vec<Message>, IngestError> {
        self.validate()?;
        Ok(match self {
            Self::Prompt(prompt) => vec![Message::user(prompt.as_str())],
            Self::Messages(messages) => messages.clone(),
        })
    }

    /// The request flattened into a single prompt, one message per line.
    pub fn to_prompt(&self) -> Result<String, IngestError> {
        self.validate()?;
        Ok(match self {
            Self::Prompt(prompt) => prompt.clone(),
            Self::Messages(messages) => messages
                .iter()
                .map(|m| format!("{}: {}", m.role.as_str(), m.content))
                .collect::<Vec<_>>()
                .join("\n"),
        })
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        match self {
            Self::Prompt(prompt) if prompt.trim().is_empty() => {
                err!(Validation, "prompt cannot be empty")
            }
            Self::Messages(messages) if messages.is_empty() => {
                err!(Validation, "messages cannot be empty")
            }
            Self::Messages(messages) if messages.iter().all(|m| m.content.trim().is_empty()) => {
                err!(Validation, "all messages are empty")
            }
            _ => Ok(()),
        }
    }
}

/// Contract features a backend may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    Streaming,
    StopWords,
    MultiTurn,
    Temperature,
    MaxTokens,
    TopP,
    TopK,
    Seed,
    Penalties,
    JsonMode,
}

impl Capability {
    pub const ALL: [Capability; 10] = [
        Self::Streaming,
        Self::StopWords,
        Self::MultiTurn,
        Self::Temperature,
        Self::MaxTokens,
        Self::TopP,
        Self::TopK,
        Self::Seed,
        Self::Penalties,
        Self::JsonMode,
    ];
}

/// A single generation knob.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOption {
    Model(String),
    Temperature(f64),
    MaxTokens(usize),
    StopWords(Vec<String>),
    TopP(f64),
    TopK(usize),
    Seed(i64),
    FrequencyPenalty(f64),
    PresencePenalty(f64),
    JsonMode(bool),
    /// Backend specific knob, merged per key.
    Metadata(String, Value),
    /// Fail instead of ignoring the knob if the backend lacks the capability.
    Require(Capability),
}

pub fn with_model(model: impl Into<String>) -> CallOption {
    CallOption::Model(model.into())
}

pub fn with_temperature(temperature: f64) -> CallOption {
    CallOption::Temperature(temperature)
}

pub fn with_max_tokens(max_tokens: usize) -> CallOption {
    CallOption::MaxTokens(max_tokens)
}

pub fn with_stop_words<S: Into<String>>(words: impl IntoIterator<Item = S>) -> CallOption {
    CallOption::StopWords(words.into_iter().map(Into::into).collect())
}

pub fn with_top_p(top_p: f64) -> CallOption {
    CallOption::TopP(top_p)
}

pub fn with_top_k(top_k: usize) -> CallOption {
    CallOption::TopK(top_k)
}

pub fn with_seed(seed: i64) -> CallOption {
    CallOption::Seed(seed)
}

pub fn with_frequency_penalty(penalty: f64) -> CallOption {
    CallOption::FrequencyPenalty(penalty)
}

pub fn with_presence_penalty(penalty: f64) -> CallOption {
    CallOption::PresencePenalty(penalty)
}

pub fn with_json_mode() -> CallOption {
    CallOption::JsonMode(true)
}

pub fn with_metadata(key: impl Into<String>, value: impl Into<Value>) -> CallOption {
    CallOption::Metadata(key.into(), value.into())
}

pub fn require(capability: Capability) -> CallOption {
    CallOption::Require(capability)
}

impl CallOption {
    fn apply(self, mut options: GenerateOptions) -> GenerateOptions {
        match self {
            Self::Model(model) => options.model = Some(model),
            Self::Temperature(t) => options.temperature = Some(t),
            Self::MaxTokens(n) => options.max_tokens = Some(n),
            Self::StopWords(words) => {
                options.stop_words = words.into_iter().filter(|w| !w.is_empty()).collect()
            }
            Self::TopP(p) => options.top_p = Some(p),
            Self::TopK(k) => options.top_k = Some(k),
            Self::Seed(seed) => options.seed = Some(seed),
            Self::FrequencyPenalty(p) => options.frequency_penalty = Some(p),
            Self::PresencePenalty(p) => options.presence_penalty = Some(p),
            Self::JsonMode(json) => options.json_mode = json,
            Self::Metadata(key, value) => {
                options.metadata.insert(key, value);
            }
            Self::Require(capability) => {
                options.required.insert(capability);
            }
        }
        options
    }
}

/// The resolved set of knobs for one call. Backends only ever read it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerateOptions {
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<usize>,
    pub stop_words: Vec<String>,
    pub top_p: Option<f64>,
    pub top_k: Option<usize>,
    pub seed: Option<i64>,
    pub frequency_penalty: Option<f64>,
    pub presence_penalty: Option<f64>,
    pub json_mode: bool,
    pub metadata: HashMap<String, Value>,
    pub required: BTreeSet<Capability>,
}

impl GenerateOptions {
    /// Apply `options` left to right on top of the defaults.
    pub fn resolve(options: impl IntoIterator<Item = CallOption>) -> Self {
        options
            .into_iter()
            .fold(Self::default(), |resolved, option| option.apply(resolved))
    }

    /// Errors if a required capability is missing from `capabilities`.
    pub fn check_supported(
        &self,
        backend: &str,
        capabilities: &[Capability],
    ) -> Result<(), IngestError> {
        let missing = self
            .required
            .iter()
            .filter(|c| !capabilities.contains(c))
            .map(|c| format!("{c:?}"))
            .collect::<Vec<_>>();

        if !missing.is_empty() {
            return err!(
                Validation,
                "backend '{backend}' does not support required option(s): {}",
                missing.join(", ")
            );
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CompletionStatus {
    Complete,
    /// Generation stopped because the call was cancelled, the text is partial.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub status: CompletionStatus,
}

impl Completion {
    pub fn complete(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            status: CompletionStatus::Complete,
        }
    }

    pub fn cancelled(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            status: CompletionStatus::Cancelled,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == CompletionStatus::Cancelled
    }
}

/// Receives streamed tokens in generation order.
pub type TokenSink<'a> = dyn FnMut(&str) + Send + 'a;

/// A generative model backend.
#[async_trait::async_trait]
pub trait Llm: Send + Sync {
    fn id(&self) -> &str;

    /// The contract features this backend supports.
    fn capabilities(&self) -> &[Capability];

    fn supports(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    /// Generate a completion for `request`.
    ///
    /// Must return promptly once `cancel` fires, either with a cancellation
    /// error or a completion tagged as cancelled.
    async fn generate(
        &self,
        cancel: &CancelToken,
        request: &Request,
        options: &GenerateOptions,
    ) -> Result<Completion, IngestError>;

    /// Generate a completion, passing every token to `on_token` as it is
    /// produced. Cancelling returns the text produced so far tagged as cancelled.
    /// A failure midway is reported as [Interrupted][crate::error::IngestErr::Interrupted].
    async fn generate_stream(
        &self,
        _cancel: &CancelToken,
        _request: &Request,
        _options: &GenerateOptions,
        _on_token: &mut TokenSink<'_>,
    ) -> Result<Completion, IngestError> {
        err!(Validation, "backend '{}' does not support streaming", self.id())
    }
}

/// Generate a completion for a single prompt and return its text.
/// A cancelled completion is reported as a cancellation error.
pub async fn generate_from_single_prompt(
    llm: &dyn Llm,
    cancel: &CancelToken,
    prompt: &str,
    options: impl IntoIterator<Item = CallOption>,
) -> Result<String, IngestError> {
    let options = GenerateOptions::resolve(options);
    let completion = llm
        .generate(cancel, &Request::prompt(prompt), &options)
        .await?;

    if completion.is_cancelled() {
        return err!(Cancelled);
    }

    Ok(completion.text)
}

/// Stream a completion into `out`, flushing after every token.
///
/// The first write failure cancels `cancel` so the backend stops early, and is
/// returned once the stream ends.
pub async fn stream_to_writer(
    llm: &dyn Llm,
    cancel: &CancelToken,
    request: &Request,
    options: &GenerateOptions,
    out: &mut (dyn std::io::Write + Send),
) -> Result<Completion, IngestError> {
    let mut write_err = None;

    let completion = llm
        .generate_stream(cancel, request, options, &mut |token| {
            if write_err.is_some() {
                return;
            }
            if let Err(e) = out.write_all(token.as_bytes()).and_then(|_| out.flush()) {
                write_err = Some(e);
                cancel.cancel();
            }
        })
        .await?;

    map_err!(write_err.map_or(Ok(()), Err));

    Ok(completion)
}

/// Index of the earliest occurrence of any of `stop_words` in `text`.
pub fn find_stop(text: &str, stop_words: &[String]) -> Option<usize> {
    stop_words
        .iter()
        .filter(|w| !w.is_empty())
        .filter_map(|w| text.find(w.as_str()))
        .min()
}

/// `text` up to the earliest stop word.
pub fn truncate_at_stop<'a>(text: &'a str, stop_words: &[String]) -> &'a str {
    match find_stop(text, stop_words) {
        Some(idx) => &text[..idx],
        None => text,
    }
}

/// Incremental stop word detection over streamed text.
///
/// Text that could be the beginning of a stop word is held back until it
/// is either confirmed as one, which ends the stream, or ruled out.
#[derive(Debug, Clone)]
pub struct StopScanner {
    stop_words: Vec<String>,
    pending: String,
    stopped: bool,
}

impl StopScanner {
    pub fn new(stop_words: &[String]) -> Self {
        Self {
            stop_words: stop_words.iter().filter(|w| !w.is_empty()).cloned().collect(),
            pending: String::new(),
            stopped: false,
        }
    }

    /// Whether a stop word was seen. Everything after it is discarded.
    pub fn stopped(&self) -> bool {
        self.stopped
    }

    /// Feed a delta, returns the text that is safe to emit.
    pub fn push(&mut self, delta: &str) -> String {
        if self.stopped {
            return String::new();
        }

        self.pending.push_str(delta);

        if let Some(idx) = find_stop(&self.pending, &self.stop_words) {
            self.stopped = true;
            let safe = self.pending[..idx].to_string();
            self.pending.clear();
            return safe;
        }

        let keep = self.held_back();
        let cut = self.pending.len() - keep;
        self.pending.drain(..cut).collect()
    }

    /// Release whatever is still held back once the stream ends.
    pub fn finish(&mut self) -> String {
        std::mem::take(&mut self.pending)
    }

    /// Length of the longest suffix of pending text that is a proper prefix of a stop word.
    fn held_back(&self) -> usize {
        let mut keep = 0;
        for word in self.stop_words.iter() {
            for len in (1..word.len()).rev() {
                if len <= keep {
                    break;
                }
                if !word.is_char_boundary(len) || len > self.pending.len() {
                    continue;
                }
                if self.pending.ends_with(&word[..len]) {
                    keep = len;
                    break;
                }
            }
        }
        keep
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{app::llm::fake::FakeLlm, error::ErrorKind};
    use std::io;

    #[test]
    fn options_resolve_last_writer_wins() {
        let options = GenerateOptions::resolve([
            with_temperature(0.2),
            with_stop_words(["Armstrong"]),
            with_metadata("a", 1),
            with_temperature(0.8),
            with_metadata("b", 2),
        ]);

        assert_eq!(Some(0.8), options.temperature);
        assert_eq!(vec!["Armstrong".to_string()], options.stop_words);
        assert_eq!(2, options.metadata.len());
    }

    #[test]
    fn independent_options_commute() {
        let a = GenerateOptions::resolve([
            with_model("m"),
            with_max_tokens(10),
            require(Capability::StopWords),
            with_seed(7),
            with_presence_penalty(0.5),
        ]);
        let b = GenerateOptions::resolve([
            with_presence_penalty(0.5),
            with_seed(7),
            require(Capability::StopWords),
            with_max_tokens(10),
            with_model("m"),
        ]);

        assert_eq!(a, b);
        assert_eq!(Some(0.5), a.presence_penalty);
        assert_eq!(None, a.frequency_penalty);
    }

    #[test]
    fn empty_stop_words_are_dropped() {
        let options = GenerateOptions::resolve([with_stop_words(["", "STOP"])]);
        assert_eq!(vec!["STOP".to_string()], options.stop_words);
    }

    #[test]
    fn required_capabilities_are_enforced() {
        let options = GenerateOptions::resolve([
            with_temperature(1.0),
            require(Capability::JsonMode),
        ]);

        let err = options
            .check_supported("fake", &[Capability::Temperature])
            .unwrap_err();
        assert_eq!(ErrorKind::Validation, err.kind());

        assert!(options
            .check_supported("fake", &[Capability::JsonMode])
            .is_ok());
    }

    #[test]
    fn empty_requests_are_invalid() {
        assert!(Request::prompt("  ").validate().is_err());
        assert!(Request::messages(vec![]).validate().is_err());
        assert!(Request::messages(vec![Message::user("")]).validate().is_err());
        assert!(Request::prompt("x").validate().is_ok());
    }

    #[test]
    fn prompt_becomes_a_user_message() {
        let messages = Request::prompt("hi").to_messages().unwrap();
        assert_eq!(vec![Message::user("hi")], messages);

        let prompt = Request::messages(vec![Message::system("be brief"), Message::user("hi")])
            .to_prompt()
            .unwrap();
        assert_eq!("system: be brief\nuser: hi", prompt);
    }

    #[test]
    fn truncates_at_earliest_stop_word() {
        let stops = vec!["Armstrong".to_string(), "Neil".to_string()];
        assert_eq!(
            "The first man was ",
            truncate_at_stop("The first man was Neil Armstrong", &stops)
        );
        assert_eq!("no stops", truncate_at_stop("no stops", &stops));
    }

    #[test]
    fn scanner_holds_back_partial_stop_words() {
        let mut scanner = StopScanner::new(&["MOON".to_string()]);

        assert_eq!("walk on the ", scanner.push("walk on the MO"));
        assert_eq!("", scanner.push("O"));
        assert_eq!("", scanner.push("N and back"));
        assert!(scanner.stopped());
        assert_eq!("", scanner.push("more"));
        assert_eq!("", scanner.finish());
    }

    #[test]
    fn scanner_releases_false_alarms() {
        let mut scanner = StopScanner::new(&["MOON".to_string()]);

        assert_eq!("", scanner.push("MO"));
        assert_eq!("MOST", scanner.push("ST"));
        assert_eq!("", scanner.push("M"));
        assert_eq!("M", scanner.finish());
        assert!(!scanner.stopped());
    }

    /// A writer whose reader went away.
    struct Closed {
        writes: usize,
    }

    impl io::Write for Closed {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            self.writes += 1;
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "reader closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn stream_to_writer_writes_every_token() {
        let llm = FakeLlm::new(["walk on the moon"]);
        let mut out = Vec::new();

        let completion = stream_to_writer(
            &llm,
            &CancelToken::new(),
            &Request::prompt("x"),
            &GenerateOptions::default(),
            &mut out,
        )
        .await
        .unwrap();

        assert_eq!("walk on the moon", String::from_utf8(out).unwrap());
        assert_eq!(CompletionStatus::Complete, completion.status);
    }

    #[tokio::test]
    async fn stream_to_writer_stops_on_write_failure() {
        let llm = FakeLlm::new(["one two three four"]);
        let cancel = CancelToken::new();
        let mut out = Closed { writes: 0 };

        let err = stream_to_writer(
            &llm,
            &cancel,
            &Request::prompt("x"),
            &GenerateOptions::default(),
            &mut out,
        )
        .await
        .unwrap_err();

        assert_eq!(ErrorKind::Internal, err.kind());
        assert!(cancel.is_cancelled());
        assert_eq!(1, out.writes);
    }
}
