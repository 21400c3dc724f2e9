//! Retry policy for control-plane calls.
//!
//! A stateless [`RetryPolicy`] decides, per attempt, whether to retry, hand
//! the response back, or abort; the attempt counter lives on the caller's
//! stack. Backoff sleeps go through [`RunContext::sleep`] so cancellation
//! interrupts them.
//!
//! # Decision table
//!
//! | Outcome | Decision |
//! |---------|----------|
//! | context cancelled or past deadline | abort with the context error |
//! | transport error: too many redirects | abort with the transport error |
//! | any other transport error | retry |
//! | HTTP 429 or 5xx | retry |
//! | any other status | return the response |

use crate::context::RunContext;
use crate::{Error, Result};
use std::fmt;
use std::time::Duration;
use thiserror::Error as ThisError;
use tracing::debug;

/// Default attempt ceiling.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Default minimum backoff.
pub const DEFAULT_MIN_WAIT: Duration = Duration::from_millis(200);

/// Default maximum backoff.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(30);

/// Default idle connections kept per control-plane host.
pub const DEFAULT_POOL_MAX_IDLE_PER_HOST: usize = 100;

/// Transport failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The redirect limit was hit.
    TooManyRedirects,
    /// The request timed out.
    Timeout,
    /// The connection could not be established.
    Connect,
    /// Anything else below HTTP.
    Other,
}

/// A request that failed before an HTTP status was received.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
#[error("{message}")]
pub struct TransportError {
    /// Failure class.
    pub kind: TransportErrorKind,
    /// Transport message.
    pub message: String,
}

impl TransportError {
    /// Creates a transport error.
    #[must_use]
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Returns `true` if the redirect limit was hit.
    #[must_use]
    pub fn is_too_many_redirects(&self) -> bool {
        self.kind == TransportErrorKind::TooManyRedirects
    }
}

impl From<&reqwest::Error> for TransportError {
    fn from(e: &reqwest::Error) -> Self {
        let message = e.to_string();
        let kind = if e.is_redirect() || message.contains("redirects") {
            TransportErrorKind::TooManyRedirects
        } else if e.is_timeout() {
            TransportErrorKind::Timeout
        } else if e.is_connect() {
            TransportErrorKind::Connect
        } else {
            TransportErrorKind::Other
        };
        Self { kind, message }
    }
}

/// The outcome of one attempt, as seen by the policy.
#[derive(Debug, Clone, Copy)]
pub enum AttemptOutcome<'a> {
    /// An HTTP response arrived with this status.
    Status(u16),
    /// The request failed below HTTP.
    Transport(&'a TransportError),
}

/// What to do after an attempt.
#[derive(Debug)]
pub enum RetryDecision {
    /// Back off and try again.
    Retry,
    /// Hand the response to the caller, who inspects its status.
    Return,
    /// Stop now with this error.
    Abort(Error),
}

impl RetryDecision {
    /// Returns `true` for [`RetryDecision::Retry`].
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        matches!(self, Self::Retry)
    }
}

impl fmt::Display for RetryDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retry => f.write_str("retry"),
            Self::Return => f.write_str("return"),
            Self::Abort(e) => write!(f, "abort: {e}"),
        }
    }
}

/// A successful exchange handed to [`RetryPolicy::execute`].
#[derive(Debug)]
pub struct Attempt<T> {
    /// HTTP status.
    pub status: u16,
    /// `Retry-After` delay sent by the server, if any.
    pub retry_after: Option<Duration>,
    /// The response.
    pub value: T,
}

/// Stateless retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    min_wait: Duration,
    max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            min_wait: DEFAULT_MIN_WAIT,
            max_wait: DEFAULT_MAX_WAIT,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the attempt ceiling (at least one).
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Sets the backoff bounds.
    #[must_use]
    pub fn with_waits(mut self, min_wait: Duration, max_wait: Duration) -> Self {
        self.min_wait = min_wait;
        self.max_wait = max_wait.max(min_wait);
        self
    }

    /// Attempt ceiling.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Classifies one attempt.
    #[must_use]
    pub fn evaluate(&self, ctx: &RunContext, outcome: AttemptOutcome<'_>) -> RetryDecision {
        if let Some(e) = ctx.err() {
            return RetryDecision::Abort(e);
        }
        match outcome {
            AttemptOutcome::Transport(e) if e.is_too_many_redirects() => {
                RetryDecision::Abort(Error::Transport(e.clone()))
            },
            AttemptOutcome::Transport(_) => RetryDecision::Retry,
            AttemptOutcome::Status(status) if is_retryable_status(status) => RetryDecision::Retry,
            AttemptOutcome::Status(_) => RetryDecision::Return,
        }
    }

    /// Backoff before retry number `retry` (zero-based).
    ///
    /// `min_wait * 2^retry`, capped at `max_wait`. A server `Retry-After`
    /// replaces the computed value, also capped at `max_wait`.
    #[must_use]
    pub fn backoff(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(after) = retry_after {
            return after.min(self.max_wait);
        }
        self.min_wait
            .saturating_mul(1 << retry.min(20))
            .min(self.max_wait)
    }

    /// Runs `op` until the policy stops retrying or the budget runs out.
    ///
    /// When the budget runs out on a retryable status the last response is
    /// returned; on a transport error it becomes [`Error::RetriesExhausted`].
    ///
    /// # Errors
    ///
    /// Returns the context error, a terminal transport error, or
    /// [`Error::RetriesExhausted`].
    pub fn execute<T, F>(&self, ctx: &RunContext, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> std::result::Result<Attempt<T>, TransportError>,
    {
        let mut attempt = 0;
        loop {
            ctx.check()?;
            attempt += 1;
            let result = op(attempt);
            let decision = match &result {
                Ok(response) => self.evaluate(ctx, AttemptOutcome::Status(response.status)),
                Err(e) => self.evaluate(ctx, AttemptOutcome::Transport(e)),
            };
            let retry_after = match &result {
                Ok(response) if matches!(response.status, 429 | 503) => response.retry_after,
                _ => None,
            };

            match decision {
                RetryDecision::Abort(e) => return Err(e),
                RetryDecision::Return => {
                    return result.map(|r| r.value).map_err(Error::Transport);
                },
                RetryDecision::Retry if attempt >= self.max_attempts => {
                    return match result {
                        Ok(response) => Ok(response.value),
                        Err(e) => Err(Error::RetriesExhausted {
                            attempts: attempt,
                            cause: e.to_string(),
                        }),
                    };
                },
                RetryDecision::Retry => {
                    let wait = self.backoff(attempt - 1, retry_after);
                    let cause = match &result {
                        Ok(response) => format!("HTTP {}", response.status),
                        Err(e) => e.to_string(),
                    };
                    metrics::counter!("control_plane_retries_total").increment(1);
                    debug!(
                        attempt,
                        max_attempts = self.max_attempts,
                        wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                        cause = %cause,
                        "Retrying control-plane call"
                    );
                    ctx.sleep(wait)?;
                },
            }
        }
    }
}

/// 429 and every 5xx are retryable.
#[must_use]
#[allow(clippy::manual_range_contains)]
pub const fn is_retryable_status(status: u16) -> bool {
    status == 429 || (status >= 500 && status <= 599)
}

/// Parses a `Retry-After` header given in seconds.
#[must_use]
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
