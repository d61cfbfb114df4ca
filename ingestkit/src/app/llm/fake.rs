use crate::{
    core::{
        cancel::CancelToken,
        llm::{
            Capability, Completion, GenerateOptions, Llm, Request, Role, StopScanner, TokenSink,
        },
    },
    err,
    error::IngestError,
};
use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};
use tracing::debug;

/// A backend replying with canned responses, in order and cycling.
///
/// Without responses it echoes the last message of the request. Responses
/// are streamed word by word. Stop words, token limits and cancellation
/// are honoured like a real backend would.
/// What the fake honours unless told otherwise.
pub const FAKE_CAPABILITIES: [Capability; 4] = [
    Capability::Streaming,
    Capability::StopWords,
    Capability::MultiTurn,
    Capability::MaxTokens,
];

#[derive(Debug)]
pub struct FakeLlm {
    responses: Vec<String>,
    cursor: AtomicUsize,
    capabilities: Vec<Capability>,
    token_delay: Option<Duration>,
}

impl Default for FakeLlm {
    fn default() -> Self {
        Self::new(Vec::<String>::new())
    }
}

impl FakeLlm {
    pub fn new<S: Into<String>>(responses: impl IntoIterator<Item = S>) -> Self {
        Self {
            responses: responses.into_iter().map(Into::into).collect(),
            cursor: AtomicUsize::new(0),
            capabilities: FAKE_CAPABILITIES.to_vec(),
            token_delay: None,
        }
    }

    /// Declare only the given capabilities. Knobs the fake cannot apply are
    /// still ignored when declared.
    pub fn with_capabilities(mut self, capabilities: &[Capability]) -> Self {
        self.capabilities = capabilities.to_vec();
        self
    }

    /// Wait before emitting each token.
    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = Some(delay);
        self
    }

    /// Start over from the first response.
    pub fn reset(&self) {
        self.cursor.store(0, Ordering::SeqCst);
    }

    fn next_response(&self, request: &Request) -> Result<String, IngestError> {
        if self.responses.is_empty() {
            let messages = request.to_messages()?;
            let last = messages
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .or(messages.last());
            return Ok(last.map(|m| m.content.clone()).unwrap_or_default());
        }

        let i = self.cursor.fetch_add(1, Ordering::SeqCst) % self.responses.len();
        Ok(self.responses[i].clone())
    }

    async fn run(
        &self,
        cancel: &CancelToken,
        request: &Request,
        options: &GenerateOptions,
        on_token: &mut TokenSink<'_>,
    ) -> Result<Completion, IngestError> {
        request.validate()?;
        options.check_supported(self.id(), &self.capabilities)?;

        let response = self.next_response(request)?;

        let stop_words: &[String] = if self.supports(Capability::StopWords) {
            options.stop_words.as_slice()
        } else {
            &[]
        };
        let limit = match options.max_tokens {
            Some(max) if self.supports(Capability::MaxTokens) => max,
            _ => usize::MAX,
        };

        if cancel.is_cancelled() {
            return Ok(Completion::cancelled(String::new()));
        }

        let mut scanner = StopScanner::new(stop_words);
        let mut text = String::new();

        for token in response.split_inclusive(' ').take(limit) {
            if let Some(delay) = self.token_delay {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {}
                }
            }

            if cancel.is_cancelled() {
                debug!("Fake generation cancelled after {} bytes", text.len());
                return Ok(Completion::cancelled(text));
            }

            let safe = scanner.push(token);
            if !safe.is_empty() {
                on_token(&safe);
                text.push_str(&safe);
            }

            if scanner.stopped() {
                break;
            }
        }

        let rest = scanner.finish();
        if !rest.is_empty() {
            on_token(&rest);
            text.push_str(&rest);
        }

        Ok(Completion::complete(text))
    }
}

#[async_trait::async_trait]
impl Llm for FakeLlm {
    fn id(&self) -> &str {
        "fake"
    }

    fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    async fn generate(
        &self,
        cancel: &CancelToken,
        request: &Request,
        options: &GenerateOptions,
    ) -> Result<Completion, IngestError> {
        cancel.check()?;
        self.run(cancel, request, options, &mut |_| {}).await
    }

    async fn generate_stream(
        &self,
        cancel: &CancelToken,
        request: &Request,
        options: &GenerateOptions,
        on_token: &mut TokenSink<'_>,
    ) -> Result<Completion, IngestError> {
        if !self.supports(Capability::Streaming) {
            return err!(Validation, "backend '{}' does not support streaming", self.id());
        }
        self.run(cancel, request, options, on_token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        app::conformance::{self, CheckOutcome, HarnessConfig},
        core::llm::{
            generate_from_single_prompt, require, with_max_tokens, with_stop_words,
            with_temperature, CompletionStatus, Message,
        },
        error::ErrorKind,
    };
    use std::sync::Arc;

    #[tokio::test]
    async fn passes_the_conformance_harness() {
        let llm = FakeLlm::default();
        let report = conformance::run(&llm, &HarnessConfig::default()).await;
        report.assert_passed();
        assert!(report.checks.iter().all(|c| c.outcome == CheckOutcome::Passed));
    }

    #[tokio::test]
    async fn canned_responses_pass_the_conformance_harness() {
        let llm = FakeLlm::new(["The first man to walk on the moon was Neil Armstrong."]);
        conformance::run(&llm, &HarnessConfig::default())
            .await
            .assert_passed();
    }

    #[tokio::test]
    async fn undeclared_capabilities_are_skipped() {
        let llm = FakeLlm::new(["hello"]).with_capabilities(&[]);
        let report = conformance::run(&llm, &HarnessConfig::default()).await;

        report.assert_passed();
        assert!(report
            .checks
            .iter()
            .any(|c| matches!(c.outcome, CheckOutcome::Skipped(_))));
    }

    #[tokio::test]
    async fn stop_word_truncates_output() {
        let llm = FakeLlm::new(["MOON"]);
        let text = generate_from_single_prompt(
            &llm,
            &CancelToken::new(),
            "x",
            [with_stop_words(["MOON"])],
        )
        .await
        .unwrap();

        assert!(!text.contains("MOON"));

        let text = generate_from_single_prompt(
            &llm,
            &CancelToken::new(),
            "x",
            [with_temperature(0.8), with_stop_words(["Armstrong"])],
        )
        .await
        .unwrap();
        assert_eq!("MOON", text);
    }

    #[tokio::test]
    async fn responses_cycle() {
        let llm = FakeLlm::new(["a", "b"]);
        let cancel = CancelToken::new();
        let options = GenerateOptions::default();
        let request = Request::prompt("x");

        let mut texts = vec![];
        for _ in 0..3 {
            texts.push(llm.generate(&cancel, &request, &options).await.unwrap().text);
        }
        assert_eq!(vec!["a", "b", "a"], texts);

        llm.reset();
        let text = llm.generate(&cancel, &request, &options).await.unwrap().text;
        assert_eq!("a", text);
    }

    #[tokio::test]
    async fn echoes_the_last_user_message() {
        let llm = FakeLlm::default();
        let request = Request::messages(vec![
            Message::system("be brief"),
            Message::user("ping"),
            Message::assistant("pong"),
        ]);

        let completion = llm
            .generate(&CancelToken::new(), &request, &GenerateOptions::default())
            .await
            .unwrap();
        assert_eq!("ping", completion.text);
    }

    #[tokio::test]
    async fn max_tokens_limits_output() {
        let llm = FakeLlm::new(["one two three four"]);
        let options = GenerateOptions::resolve([with_max_tokens(2)]);
        let completion = llm
            .generate(&CancelToken::new(), &Request::prompt("x"), &options)
            .await
            .unwrap();

        assert_eq!("one two ", completion.text);
    }

    #[tokio::test]
    async fn streams_tokens_in_order() {
        let llm = FakeLlm::new(["walk on the moon"]);
        let mut tokens = vec![];

        let completion = llm
            .generate_stream(
                &CancelToken::new(),
                &Request::prompt("x"),
                &GenerateOptions::default(),
                &mut |t| tokens.push(t.to_string()),
            )
            .await
            .unwrap();

        assert_eq!(vec!["walk ", "on ", "the ", "moon"], tokens);
        assert_eq!(tokens.concat(), completion.text);
        assert_eq!(CompletionStatus::Complete, completion.status);
    }

    #[tokio::test]
    async fn stream_cancelled_before_first_token() {
        let llm = FakeLlm::new(["MOON"]);
        let mut tokens = 0;

        let completion = llm
            .generate_stream(
                &CancelToken::cancelled_token(),
                &Request::prompt("x"),
                &GenerateOptions::default(),
                &mut |_| tokens += 1,
            )
            .await
            .unwrap();

        assert_eq!(0, tokens);
        assert!(completion.is_cancelled());
        assert!(completion.text.is_empty());
    }

    #[tokio::test]
    async fn stream_cancelled_without_tokens_to_emit() {
        let cases = [
            (FakeLlm::new(["MOON"]), GenerateOptions::resolve([with_max_tokens(0)])),
            (FakeLlm::new([""]), GenerateOptions::default()),
        ];

        for (llm, options) in cases {
            let mut tokens = 0;
            let completion = llm
                .generate_stream(
                    &CancelToken::cancelled_token(),
                    &Request::prompt("x"),
                    &options,
                    &mut |_| tokens += 1,
                )
                .await
                .unwrap();

            assert_eq!(0, tokens);
            assert_eq!(CompletionStatus::Cancelled, completion.status);
            assert!(completion.text.is_empty());
        }
    }

    #[tokio::test]
    async fn stream_cancelled_midway_returns_partial_output() {
        let llm = Arc::new(
            FakeLlm::new(["one two three four five six"])
                .with_token_delay(Duration::from_millis(20)),
        );
        let cancel = CancelToken::new();
        let mut tokens = vec![];

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                cancel.cancel();
            })
        };

        let completion = llm
            .generate_stream(
                &cancel,
                &Request::prompt("x"),
                &GenerateOptions::default(),
                &mut |t| tokens.push(t.to_string()),
            )
            .await
            .unwrap();
        canceller.await.unwrap();

        assert!(completion.is_cancelled());
        assert_eq!(tokens.concat(), completion.text);
        assert!(tokens.len() < 6);
    }

    #[tokio::test]
    async fn generate_cancelled_is_an_error() {
        let llm = FakeLlm::new(["x"]);
        let err = llm
            .generate(
                &CancelToken::cancelled_token(),
                &Request::prompt("x"),
                &GenerateOptions::default(),
            )
            .await
            .unwrap_err();

        assert_eq!(ErrorKind::Cancelled, err.kind());
    }

    #[tokio::test]
    async fn declares_only_what_it_applies() {
        let llm = FakeLlm::default();
        assert!(llm.supports(Capability::StopWords));
        assert!(!llm.supports(Capability::Temperature));

        for capability in [Capability::JsonMode, Capability::Temperature, Capability::Seed] {
            let options = GenerateOptions::resolve([require(capability)]);
            let err = llm
                .generate(&CancelToken::new(), &Request::prompt("x"), &options)
                .await
                .unwrap_err();

            assert_eq!(ErrorKind::Validation, err.kind());
        }
    }

    #[tokio::test]
    async fn streaming_is_rejected_when_undeclared() {
        let llm = FakeLlm::new(["x"]).with_capabilities(&[Capability::StopWords]);
        let err = llm
            .generate_stream(
                &CancelToken::new(),
                &Request::prompt("x"),
                &GenerateOptions::default(),
                &mut |_| {},
            )
            .await
            .unwrap_err();

        assert_eq!(ErrorKind::Validation, err.kind());
    }
}
