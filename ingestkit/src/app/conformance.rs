//! Backend agnostic checks of the [Llm] contract.
//!
//! [run] drives any backend through a fixed battery of checks and reports the
//! outcome of each. Checks needing a capability the backend does not declare
//! are skipped. Every check is bounded by [HarnessConfig::timeout] so a
//! misbehaving backend fails instead of hanging the run.

use crate::{
    core::{
        cancel::CancelToken,
        llm::{
            with_stop_words, with_temperature, Capability, Completion, GenerateOptions, Llm,
            Message, Request,
        },
    },
    error::{ErrorKind, IngestError},
};
use std::{future::Future, time::Duration};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// A minimal prompt any backend should answer with some text.
    pub prompt: String,

    /// A prompt engineered to make the backend output [Self::stop_word].
    pub stop_prompt: String,

    pub stop_word: String,

    /// Upper bound for every single check.
    pub timeout: Duration,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            prompt: "Say hello.".to_string(),
            stop_prompt: "Repeat the word MOON five times, separated by spaces, then say goodbye."
                .to_string(),
            stop_word: "MOON".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Passed,
    Failed(String),
    /// The check needs a capability the backend does not declare.
    Skipped(String),
}

#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: &'static str,
    pub outcome: CheckOutcome,
}

#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub backend: String,
    pub checks: Vec<CheckResult>,
}

impl ConformanceReport {
    /// No check failed. Skipped checks do not count as failures.
    pub fn passed(&self) -> bool {
        self.failures().next().is_none()
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks
            .iter()
            .filter(|c| matches!(c.outcome, CheckOutcome::Failed(_)))
    }

    /// Panics listing every failed check. Meant for tests.
    pub fn assert_passed(&self) {
        let failures = self
            .failures()
            .map(|c| format!("{}: {:?}", c.name, c.outcome))
            .collect::<Vec<_>>();

        assert!(
            failures.is_empty(),
            "backend '{}' failed conformance:\n{}",
            self.backend,
            failures.join("\n")
        );
    }
}

/// Run every check against `llm`.
pub async fn run(llm: &dyn Llm, config: &HarnessConfig) -> ConformanceReport {
    info!("Running conformance checks for '{}'", llm.id());

    let checks = vec![
        check("non_empty_output", config, non_empty_output(llm, config)).await,
        check("temperature_accepted", config, temperature_accepted(llm, config)).await,
        check("empty_request_rejected", config, empty_request_rejected(llm)).await,
        guarded(llm, Capability::StopWords, "stop_word", config, stop_word(llm, config)).await,
        guarded(llm, Capability::MultiTurn, "multi_turn", config, multi_turn(llm, config)).await,
        guarded(llm, Capability::Streaming, "streaming", config, streaming(llm, config)).await,
        check("cancelled_generate", config, cancelled_generate(llm, config)).await,
        guarded(
            llm,
            Capability::Streaming,
            "cancelled_stream",
            config,
            cancelled_stream(llm, config),
        )
        .await,
    ];

    let report = ConformanceReport {
        backend: llm.id().to_string(),
        checks,
    };

    for result in report.checks.iter() {
        match &result.outcome {
            CheckOutcome::Passed => info!("{} | {} | passed", report.backend, result.name),
            CheckOutcome::Skipped(reason) => {
                info!("{} | {} | skipped: {reason}", report.backend, result.name)
            }
            CheckOutcome::Failed(reason) => {
                warn!("{} | {} | FAILED: {reason}", report.backend, result.name)
            }
        }
    }

    report
}

type Check = Result<(), String>;

impl From<Check> for CheckOutcome {
    fn from(check: Check) -> Self {
        match check {
            Ok(()) => Self::Passed,
            Err(reason) => Self::Failed(reason),
        }
    }
}

/// For checks that can decide to skip themselves.
impl From<Result<CheckOutcome, String>> for CheckOutcome {
    fn from(check: Result<CheckOutcome, String>) -> Self {
        check.unwrap_or_else(Self::Failed)
    }
}

async fn check<O: Into<CheckOutcome>>(
    name: &'static str,
    config: &HarnessConfig,
    check: impl Future<Output = O>,
) -> CheckResult {
    let outcome = match tokio::time::timeout(config.timeout, check).await {
        Ok(outcome) => outcome.into(),
        Err(_) => CheckOutcome::Failed(format!("timed out after {:?}", config.timeout)),
    };
    CheckResult { name, outcome }
}

/// Run the check only if `llm` declares `capability`.
async fn guarded<O: Into<CheckOutcome>>(
    llm: &dyn Llm,
    capability: Capability,
    name: &'static str,
    config: &HarnessConfig,
    check_fut: impl Future<Output = O>,
) -> CheckResult {
    if !llm.supports(capability) {
        return CheckResult {
            name,
            outcome: CheckOutcome::Skipped(format!("{capability:?} not supported")),
        };
    }
    check(name, config, check_fut).await
}

fn completed(result: Result<Completion, IngestError>) -> Result<String, String> {
    match result {
        Ok(completion) if completion.is_cancelled() => {
            Err("completion cancelled without a cancellation signal".to_string())
        }
        Ok(completion) => Ok(completion.text),
        Err(e) => Err(e.to_string()),
    }
}

async fn non_empty_output(llm: &dyn Llm, config: &HarnessConfig) -> Check {
    let text = completed(
        llm.generate(
            &CancelToken::new(),
            &Request::prompt(config.prompt.as_str()),
            &GenerateOptions::default(),
        )
        .await,
    )?;

    if text.trim().is_empty() {
        return Err("empty output for a non-empty prompt".to_string());
    }
    Ok(())
}

async fn temperature_accepted(llm: &dyn Llm, config: &HarnessConfig) -> Check {
    let options = GenerateOptions::resolve([with_temperature(0.1)]);
    completed(
        llm.generate(
            &CancelToken::new(),
            &Request::prompt(config.prompt.as_str()),
            &options,
        )
        .await,
    )
    .map(|_| ())
}

async fn empty_request_rejected(llm: &dyn Llm) -> Check {
    let options = GenerateOptions::default();
    let cancel = CancelToken::new();

    for request in [Request::prompt(""), Request::messages(vec![])] {
        match llm.generate(&cancel, &request, &options).await {
            Err(e) if e.kind() == ErrorKind::Validation => {}
            Err(e) => return Err(format!("expected a validation error, got: {e}")),
            Ok(_) => return Err(format!("{request:?} was accepted")),
        }
    }

    Ok(())
}

/// Compares against an unrestricted run of the same prompt, skipping if that
/// run never produces the stop word.
async fn stop_word(llm: &dyn Llm, config: &HarnessConfig) -> Result<CheckOutcome, String> {
    let cancel = CancelToken::new();
    let request = Request::prompt(config.stop_prompt.as_str());
    let stop = config.stop_word.as_str();

    let baseline = completed(
        llm.generate(&cancel, &request, &GenerateOptions::resolve([with_temperature(0.0)]))
            .await,
    )?;

    let Some(marker) = baseline.find(stop) else {
        return Ok(CheckOutcome::Skipped(format!("prompt did not reach '{stop}'")));
    };

    let options = GenerateOptions::resolve([with_temperature(0.0), with_stop_words([stop])]);
    let text = completed(llm.generate(&cancel, &request, &options).await)?;

    if text.contains(stop) {
        return Err(format!("output continued past '{stop}': {text}"));
    }

    if !baseline[..marker].starts_with(text.trim_end()) {
        return Err(format!(
            "output is not the unrestricted output cut at '{stop}': '{text}' vs '{baseline}'"
        ));
    }

    Ok(CheckOutcome::Passed)
}

async fn multi_turn(llm: &dyn Llm, config: &HarnessConfig) -> Check {
    let request = Request::messages(vec![
        Message::system("You are a helpful assistant."),
        Message::user(config.prompt.as_str()),
    ]);

    let text = completed(
        llm.generate(&CancelToken::new(), &request, &GenerateOptions::default())
            .await,
    )?;

    if text.trim().is_empty() {
        return Err("empty output for a multi-turn request".to_string());
    }
    Ok(())
}

async fn streaming(llm: &dyn Llm, config: &HarnessConfig) -> Check {
    let mut tokens = String::new();
    let mut count = 0;

    let text = completed(
        llm.generate_stream(
            &CancelToken::new(),
            &Request::prompt(config.prompt.as_str()),
            &GenerateOptions::default(),
            &mut |token| {
                count += 1;
                tokens.push_str(token);
            },
        )
        .await,
    )?;

    if count == 0 {
        return Err("no tokens streamed".to_string());
    }

    if tokens != text {
        return Err(format!(
            "streamed tokens do not match the completion: '{tokens}' != '{text}'"
        ));
    }

    Ok(())
}

/// Accepts a cancellation error or a completion tagged as cancelled.
fn cancelled(result: Result<Completion, IngestError>) -> Check {
    match result {
        Err(e) if e.is_cancelled() => Ok(()),
        Err(e) => Err(format!("expected a cancellation, got: {e}")),
        Ok(completion) if completion.is_cancelled() => Ok(()),
        Ok(_) => Err("completed despite being cancelled".to_string()),
    }
}

async fn cancelled_generate(llm: &dyn Llm, config: &HarnessConfig) -> Check {
    cancelled(
        llm.generate(
            &CancelToken::cancelled_token(),
            &Request::prompt(config.prompt.as_str()),
            &GenerateOptions::default(),
        )
        .await,
    )
}

async fn cancelled_stream(llm: &dyn Llm, config: &HarnessConfig) -> Check {
    let mut count = 0;

    let result = llm
        .generate_stream(
            &CancelToken::cancelled_token(),
            &Request::prompt(config.prompt.as_str()),
            &GenerateOptions::default(),
            &mut |_| count += 1,
        )
        .await;

    if count > 0 {
        return Err(format!("{count} token(s) emitted after cancellation"));
    }

    cancelled(result)
}
