//! Bounded retries with exponential backoff around any [`TextGenerator`].

use std::time::Duration;

use anyhow::Result;
use tracing::{debug, warn};

use crate::io::config::RetryConfig;
use crate::io::generator::{GenerateError, GenerateRequest, TextGenerator};

/// Pauses between attempts. Tests substitute a recorder so nothing sleeps.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

impl<F: Fn(Duration)> Sleeper for F {
    fn sleep(&self, duration: Duration) {
        self(duration);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub rate_limit_multiplier: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            rate_limit_multiplier: config.rate_limit_multiplier,
        }
    }

    /// Delay after the `failed_attempt`th failure (1-based), or `None` when the
    /// error must not be retried.
    pub fn delay_after(&self, failed_attempt: u32, err: &anyhow::Error) -> Option<Duration> {
        let exponent = failed_attempt.saturating_sub(1).min(16);
        let backoff = self.base_delay.saturating_mul(1u32 << exponent);
        match err.downcast_ref::<GenerateError>() {
            Some(GenerateError::Fatal(_)) => None,
            Some(GenerateError::RateLimited { retry_after }) => {
                let multiplier = self.rate_limit_multiplier.max(1);
                let cap = self.max_delay.saturating_mul(multiplier);
                Some(
                    retry_after
                        .unwrap_or_else(|| backoff.saturating_mul(multiplier))
                        .min(cap),
                )
            }
            Some(GenerateError::Transient(_)) | None => Some(backoff.min(self.max_delay)),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Retries transient and rate-limited failures; fatal ones surface immediately.
pub struct RetryingGenerator<G, S = ThreadSleeper> {
    inner: G,
    policy: RetryPolicy,
    sleeper: S,
}

impl<G: TextGenerator> RetryingGenerator<G> {
    pub fn new(inner: G, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            sleeper: ThreadSleeper,
        }
    }
}

impl<G: TextGenerator, S: Sleeper> RetryingGenerator<G, S> {
    pub fn with_sleeper(inner: G, policy: RetryPolicy, sleeper: S) -> Self {
        Self {
            inner,
            policy,
            sleeper,
        }
    }
}

impl<G: TextGenerator, S: Sleeper> TextGenerator for RetryingGenerator<G, S> {
    fn generate(&self, request: &GenerateRequest) -> Result<String> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let err = match self.inner.generate(request) {
                Ok(text) => {
                    debug!(attempt, "generation succeeded");
                    return Ok(text);
                }
                Err(err) => err,
            };
            let Some(delay) = self.policy.delay_after(attempt, &err) else {
                return Err(err.context("generation failed with a non-retryable error"));
            };
            if attempt >= max_attempts {
                return Err(err.context(format!("generation failed after {attempt} attempts")));
            }
            warn!(attempt, delay_ms = delay.as_millis() as u64, err = %err, "generation failed, retrying");
            self.sleeper.sleep(delay);
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::test_support::{ScriptedGenerator, ScriptedReply};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(250),
            rate_limit_multiplier: 4,
        }
    }

    #[test]
    fn retries_transient_failures_with_capped_backoff() {
        let inner = ScriptedGenerator::new(vec![
            ScriptedReply::Fail(GenerateError::Transient("reset".into())),
            ScriptedReply::Fail(GenerateError::Transient("reset".into())),
            ScriptedReply::Text("done".into()),
        ]);
        let slept = RefCell::new(Vec::new());
        let generator =
            RetryingGenerator::with_sleeper(&inner, policy(), |d| slept.borrow_mut().push(d));

        let reply = generator
            .generate(&GenerateRequest::new("", "p", 0.1))
            .expect("eventually succeeds");
        assert_eq!(reply, "done");
        assert_eq!(
            *slept.borrow(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
        assert_eq!(inner.requests().len(), 3);
    }

    #[test]
    fn fatal_errors_are_not_retried() {
        let inner = ScriptedGenerator::new(vec![ScriptedReply::Fail(GenerateError::Fatal(
            "bad key".into(),
        ))]);
        let generator = RetryingGenerator::with_sleeper(&inner, policy(), |_| {});
        let err = generator
            .generate(&GenerateRequest::new("", "p", 0.1))
            .expect_err("fatal");
        assert!(matches!(
            err.downcast_ref::<GenerateError>(),
            Some(GenerateError::Fatal(_))
        ));
        assert_eq!(inner.requests().len(), 1);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let inner = ScriptedGenerator::new(Vec::new());
        let generator = RetryingGenerator::with_sleeper(&inner, policy(), |_| {});
        let err = generator
            .generate(&GenerateRequest::new("", "p", 0.1))
            .expect_err("exhausted");
        assert!(format!("{err:#}").contains("after 3 attempts"));
        assert_eq!(inner.requests().len(), 3);
    }

    #[test]
    fn rate_limits_back_off_harder_or_honor_retry_after() {
        let p = policy();
        let limited = anyhow::Error::new(GenerateError::RateLimited { retry_after: None });
        assert_eq!(p.delay_after(1, &limited), Some(Duration::from_millis(400)));
        assert_eq!(p.delay_after(5, &limited), Some(Duration::from_millis(1000)));

        let told = anyhow::Error::new(GenerateError::RateLimited {
            retry_after: Some(Duration::from_millis(300)),
        });
        assert_eq!(p.delay_after(1, &told), Some(Duration::from_millis(300)));

        let plain = anyhow::anyhow!("socket closed");
        assert_eq!(p.delay_after(2, &plain), Some(Duration::from_millis(200)));
    }
}
