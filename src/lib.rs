//! # Lakesweep
//!
//! Committed-data garbage collector for versioned object stores.
//!
//! Lakesweep decides which physical objects of a content-addressed blob
//! backend are no longer reachable under any branch's retention policy, and
//! removes them in a separate, resumable phase.
//!
//! ## Features
//!
//! - Per-branch retention rules with a repository default
//! - Ancestry walks over live branches and dangling (deleted-branch) commits
//! - Mark and sweep as separate phases joined by a persisted manifest
//! - Bulk deletion for S3, Azure Blob and local filesystem backends
//! - Retrying control-plane client with cancellable exponential backoff
//!
//! ## Example
//!
//! ```rust,ignore
//! use lakesweep::gc::{GcMode, GcRunner};
//!
//! let runner = GcRunner::new(commits, manifests).with_remover(remover);
//! let outcome = runner.run(&ctx, GcMode::MarkAndSweep, None, &rules, Utc::now())?;
//! println!("{}", outcome.summary());
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

pub mod cli;
pub mod client;
pub mod config;
pub mod context;
pub mod gc;
pub mod models;
pub mod observability;
pub mod storage;

pub use config::LakesweepConfig;
pub use context::RunContext;
pub use gc::{GcMode, GcRunner, ReachabilityMarker, SweepExecutor};
pub use models::{
    Branch, Commit, CommitId, GarbageCollectionRules, MarkId, MarkManifest, ObjectAddress,
    RetentionRule, SweepReport,
};
pub use storage::{BulkRemover, CommitStore, ManifestStore};

/// Error type for lakesweep operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `Validation` | Retention rules contain duplicate branches or negative days |
/// | `AncestryRead` | A commit or tree cannot be read during a mark walk |
/// | `MarkNotFound` | Sweep is given a mark id with no stored manifest |
/// | `ManifestCorrupt` | A stored manifest fails to parse or its checksum mismatches |
/// | `UnsupportedStorage` | A storage namespace has an unknown scheme or no client |
/// | `Transport` | A control-plane request fails below HTTP |
/// | `RetriesExhausted` | The retry budget ran out on a retryable failure |
/// | `Cancelled` / `DeadlineExceeded` | The run context was cancelled or timed out |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Retention rules were rejected before any walk began.
    #[error("invalid retention rules: {0}")]
    Validation(String),

    /// A commit or its tree could not be read while walking ancestry.
    ///
    /// Always fatal for a mark run: skipping a branch could declare objects
    /// garbage while that branch still holds them.
    #[error("failed to read ancestry at commit '{commit}': {cause}")]
    AncestryRead {
        /// The commit being read.
        commit: String,
        /// The underlying cause.
        cause: String,
    },

    /// No manifest is stored for the requested mark id.
    #[error("mark '{0}' not found")]
    MarkNotFound(String),

    /// A stored manifest could not be trusted.
    #[error("manifest for mark '{mark_id}' is corrupt: {cause}")]
    ManifestCorrupt {
        /// The mark id of the manifest.
        mark_id: String,
        /// The underlying cause.
        cause: String,
    },

    /// The storage namespace is not supported.
    #[error("unsupported storage namespace '{0}'")]
    UnsupportedStorage(String),

    /// A control-plane request failed at the transport layer.
    #[error("{0}")]
    Transport(#[from] client::TransportError),

    /// The control plane answered with an unexpected status.
    #[error("control plane returned HTTP {status}: {body}")]
    Http {
        /// Status code.
        status: u16,
        /// Response body (truncated).
        body: String,
    },

    /// Retries were exhausted on a retryable failure.
    #[error("giving up after {attempts} attempts: {cause}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The last failure.
        cause: String,
    },

    /// The run context was cancelled.
    #[error("context canceled")]
    Cancelled,

    /// The run context passed its deadline.
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// An operation failed.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

/// Result type alias for lakesweep operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Validation("duplicate branch 'main'".to_string());
        assert_eq!(
            err.to_string(),
            "invalid retention rules: duplicate branch 'main'"
        );

        let err = Error::AncestryRead {
            commit: "c1".to_string(),
            cause: "missing".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "failed to read ancestry at commit 'c1': missing"
        );

        assert_eq!(Error::Cancelled.to_string(), "context canceled");
        assert_eq!(
            Error::DeadlineExceeded.to_string(),
            "context deadline exceeded"
        );
        assert_eq!(
            Error::MarkNotFound("m1".to_string()).to_string(),
            "mark 'm1' not found"
        );
    }
}
