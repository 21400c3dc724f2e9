//! Run-scoped cancellation and deadline.
//!
//! A [`RunContext`] is cloned into every worker of a run. Cancelling any clone
//! cancels all of them, and every backoff sleep wakes up immediately.

use crate::{Error, Result};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct CancelState {
    cancelled: Mutex<bool>,
    wake: Condvar,
}

/// Cancellation flag plus optional deadline shared by one run.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    state: Arc<CancelState>,
    deadline: Option<Instant>,
}

impl RunContext {
    /// Creates a context without a deadline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a child sharing the cancellation flag with the given deadline.
    ///
    /// The earlier of the existing and the new deadline wins.
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = self
            .deadline
            .map_or(deadline, |existing| existing.min(deadline));
        Self {
            state: Arc::clone(&self.state),
            deadline: Some(deadline),
        }
    }

    /// Returns a child whose deadline is `timeout` from now.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Cancels the run and wakes every sleeper.
    pub fn cancel(&self) {
        let mut cancelled = self
            .state
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *cancelled = true;
        drop(cancelled);
        self.state.wake.notify_all();
    }

    /// Returns `true` once [`cancel`](Self::cancel) was called on any clone.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self
            .state
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// The deadline, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the context error, if the run is cancelled or past its deadline.
    #[must_use]
    pub fn err(&self) -> Option<Error> {
        if self.is_cancelled() {
            return Some(Error::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Error::DeadlineExceeded),
            _ => None,
        }
    }

    /// Fails with the context error, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] or [`Error::DeadlineExceeded`].
    pub fn check(&self) -> Result<()> {
        self.err().map_or(Ok(()), Err)
    }

    /// Sleeps for `duration`, waking early on cancellation or deadline.
    ///
    /// # Errors
    ///
    /// Returns the context error if the sleep was interrupted.
    pub fn sleep(&self, duration: Duration) -> Result<()> {
        let wake_at = Instant::now() + duration;
        let mut cancelled = self
            .state
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        loop {
            if *cancelled {
                return Err(Error::Cancelled);
            }
            let now = Instant::now();
            if let Some(deadline) = self.deadline {
                if now >= deadline {
                    return Err(Error::DeadlineExceeded);
                }
            }
            if now >= wake_at {
                return Ok(());
            }
            let limit = self.deadline.map_or(wake_at, |d| d.min(wake_at));
            cancelled = self
                .state
                .wake
                .wait_timeout(cancelled, limit - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}
