//! Garbage collection module.
//!
//! This module decides which committed objects are garbage and removes them,
//! as two phases joined by a persisted manifest.
//!
//! # Overview
//!
//! The mark phase walks every live branch and every dangling root (the former
//! tip of a deleted branch), evaluates the retention rules against the
//! deletion events it finds, and stores the resulting candidate set under a
//! mark id. The sweep phase loads that manifest and deletes it in bounded
//! batches. A mark never deletes anything, and a sweep never recomputes
//! reachability.
//!
//! # Example
//!
//! ```rust,ignore
//! use lakesweep::gc::{GcMode, GcRunner};
//! use std::sync::Arc;
//!
//! let runner = GcRunner::new(commits, manifests).with_remover(remover);
//!
//! // Mark only; nothing is deleted
//! let marked = runner.run(&ctx, GcMode::Mark, None, &rules, Utc::now())?;
//!
//! // Later, sweep exactly what was marked
//! let swept = runner.run(&ctx, GcMode::Sweep, Some(marked.mark_id), &rules, Utc::now())?;
//! println!("{}", swept.summary());
//! ```
//!
//! # Retention Policy
//!
//! Each branch keeps deleted objects for its own retention period, falling
//! back to the repository default. Dangling roots always use the default.
//! An object is a candidate only once every branch that ever held it agrees.

mod marker;
mod retention;
mod runner;
mod sweep;

pub use marker::{DEFAULT_MARK_CONCURRENCY, MarkStats, ReachabilityMarker};
pub use retention::{
    RetentionPolicyEngine, SECONDS_PER_DAY, effective_retention_days, is_expired,
    retention_period,
};
pub use runner::{GcMode, GcRunner, RunOutcome};
pub use sweep::{CANCELLED_REASON, DEFAULT_SWEEP_CONCURRENCY, SweepExecutor};

use std::time::Duration;

/// Safely converts Duration to milliseconds as u64, capping at `u64::MAX`.
#[inline]
pub(crate) fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Converts usize to f64 for metrics, capping at `u32::MAX`.
///
/// Uses u32 intermediate to avoid precision loss (`u32` fits exactly in `f64`).
#[inline]
pub(crate) fn usize_to_f64(value: usize) -> f64 {
    let capped = u32::try_from(value).unwrap_or(u32::MAX);
    f64::from(capped)
}

/// Converts u64 to f64 for metrics, capping at `u32::MAX`.
#[inline]
pub(crate) fn u64_to_f64(value: u64) -> f64 {
    let capped = u32::try_from(value).unwrap_or(u32::MAX);
    f64::from(capped)
}

/// Converts usize to u64 for counters.
#[inline]
pub(crate) fn usize_to_u64(value: usize) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}
