//! Text generator abstraction.
//!
//! The [`TextGenerator`] trait decouples the loops from whatever backend turns a
//! prompt into text. Tests use scripted generators that return queued replies
//! without spawning processes; the binary uses [`CommandGenerator`] wrapped in a
//! [`RetryingGenerator`](crate::io::retry::RetryingGenerator).

use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Result;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::io::config::GeneratorConfig;
use crate::io::process::run_command_with_timeout;

/// One generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
}

impl GenerateRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>, temperature: f32) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            temperature,
        }
    }
}

pub trait TextGenerator {
    /// Turn a prompt into text. Implementations signal failure classes with
    /// [`GenerateError`]; unclassified errors are treated as transient.
    fn generate(&self, request: &GenerateRequest) -> Result<String>;
}

impl<T: TextGenerator + ?Sized> TextGenerator for &T {
    fn generate(&self, request: &GenerateRequest) -> Result<String> {
        (**self).generate(request)
    }
}

impl<T: TextGenerator + ?Sized> TextGenerator for Box<T> {
    fn generate(&self, request: &GenerateRequest) -> Result<String> {
        (**self).generate(request)
    }
}

/// Failure classes the retry wrapper branches on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerateError {
    #[error("transient generator failure: {0}")]
    Transient(String),
    #[error("generator rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
    #[error("generator failed: {0}")]
    Fatal(String),
}

static RATE_LIMIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)rate[ _-]?limit|too many requests|\b429\b").expect("rate limit regex is valid")
});

static RETRY_AFTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)retry[ _-]?after[^0-9]{0,8}(\d+)").expect("retry-after regex is valid")
});

/// Runs a configured command per request.
///
/// The system instruction and prompt are written to stdin; stdout is the reply.
/// `{temperature}` in any argument is replaced with the request temperature.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    argv: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandGenerator {
    pub fn new(argv: Vec<String>, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            argv,
            timeout,
            output_limit_bytes,
        }
    }

    pub fn from_config(config: &GeneratorConfig) -> Self {
        Self::new(
            config.command.clone(),
            Duration::from_secs(config.timeout_secs),
            config.output_limit_bytes,
        )
    }

    fn command(&self, temperature: f32) -> Result<Command> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| GenerateError::Fatal("generator command is empty".to_string()))?;
        let temperature = format!("{temperature:.2}");
        let mut cmd = Command::new(program);
        cmd.args(args.iter().map(|arg| arg.replace("{temperature}", &temperature)));
        cmd.env("STORYLOOP_TEMPERATURE", &temperature);
        Ok(cmd)
    }
}

impl TextGenerator for CommandGenerator {
    #[instrument(skip_all, fields(program = self.argv.first().map(String::as_str), prompt_bytes = request.prompt.len()))]
    fn generate(&self, request: &GenerateRequest) -> Result<String> {
        let cmd = self.command(request.temperature)?;
        let input = render_stdin(request);
        let output = run_command_with_timeout(cmd, Some(input.as_bytes()), self.timeout, self.output_limit_bytes)
            .map_err(|err| GenerateError::Fatal(format!("{err:#}")))?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "generator command timed out");
            return Err(GenerateError::Transient(format!("timed out after {:?}", self.timeout)).into());
        }
        if !output.status.success() {
            let stderr = output.stderr_tail(400);
            warn!(exit_code = ?output.status.code(), "generator command failed");
            return Err(classify_failure(&stderr, output.status.code()).into());
        }

        let text = output.stdout_text().trim().to_string();
        if text.is_empty() {
            return Err(GenerateError::Transient("empty output".to_string()).into());
        }
        debug!(reply_bytes = text.len(), "generator command succeeded");
        Ok(text)
    }
}

fn render_stdin(request: &GenerateRequest) -> String {
    if request.system.trim().is_empty() {
        return request.prompt.clone();
    }
    format!(
        "<system>\n{}\n</system>\n\n{}",
        request.system.trim(),
        request.prompt
    )
}

fn classify_failure(stderr: &str, exit_code: Option<i32>) -> GenerateError {
    if RATE_LIMIT_RE.is_match(stderr) {
        let retry_after = RETRY_AFTER_RE
            .captures(stderr)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .map(Duration::from_secs);
        return GenerateError::RateLimited { retry_after };
    }
    GenerateError::Transient(format!("exit status {exit_code:?}: {stderr}"))
}
