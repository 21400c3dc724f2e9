//! Run orchestration.

use super::marker::{DEFAULT_MARK_CONCURRENCY, ReachabilityMarker};
use super::sweep::{DEFAULT_SWEEP_CONCURRENCY, SweepExecutor};
use crate::context::RunContext;
use crate::models::{GarbageCollectionRules, MarkId, MarkManifest, SweepReport};
use crate::storage::{BulkRemover, CommitStore, ManifestStore};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument};

/// What a run does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GcMode {
    /// Compute and persist candidates; delete nothing.
    Mark,
    /// Delete the candidates of an existing mark.
    Sweep,
    /// Mark, then sweep the fresh manifest.
    #[default]
    MarkAndSweep,
}

impl GcMode {
    /// Returns the mode as a string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mark => "mark",
            Self::Sweep => "sweep",
            Self::MarkAndSweep => "both",
        }
    }

    /// Returns `true` if the mode runs the mark phase.
    #[must_use]
    pub const fn marks(self) -> bool {
        matches!(self, Self::Mark | Self::MarkAndSweep)
    }

    /// Returns `true` if the mode runs the sweep phase.
    #[must_use]
    pub const fn sweeps(self) -> bool {
        matches!(self, Self::Sweep | Self::MarkAndSweep)
    }
}

impl fmt::Display for GcMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GcMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "mark" => Ok(Self::Mark),
            "sweep" => Ok(Self::Sweep),
            "both" | "mark-and-sweep" => Ok(Self::MarkAndSweep),
            _ => Err(Error::InvalidInput(format!(
                "unknown mode '{s}' (expected mark, sweep or both)"
            ))),
        }
    }
}

/// Result of a run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Mode that ran.
    pub mode: GcMode,
    /// Mark the run produced or consumed.
    pub mark_id: MarkId,
    /// Manifest produced by the mark phase.
    pub manifest: Option<MarkManifest>,
    /// Report produced by the sweep phase.
    pub report: Option<SweepReport>,
    /// Wall time in milliseconds.
    pub duration_ms: u64,
}

impl RunOutcome {
    /// Returns a human-readable summary of the run.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut parts = vec![format!("{} run for mark {}", self.mode, self.mark_id)];
        if let Some(manifest) = &self.manifest {
            parts.push(format!("marked {} candidates", manifest.len()));
        }
        if let Some(report) = &self.report {
            parts.push(format!(
                "removed {}, already absent {}, failed {}{}",
                report.removed.len(),
                report.already_absent_count(),
                report.hard_failure_count(),
                if report.cancelled { " (cancelled)" } else { "" }
            ));
        }
        format!("{} ({}ms)", parts.join(": "), self.duration_ms)
    }
}

/// Chains the mark and sweep phases for one repository.
pub struct GcRunner {
    commits: Arc<dyn CommitStore>,
    manifests: Arc<dyn ManifestStore>,
    remover: Option<Arc<dyn BulkRemover>>,
    mark_concurrency: usize,
    sweep_concurrency: usize,
    batch_size: Option<usize>,
}

impl GcRunner {
    /// Creates a runner. A remover is only needed for sweeping modes.
    #[must_use]
    pub fn new(commits: Arc<dyn CommitStore>, manifests: Arc<dyn ManifestStore>) -> Self {
        Self {
            commits,
            manifests,
            remover: None,
            mark_concurrency: DEFAULT_MARK_CONCURRENCY,
            sweep_concurrency: DEFAULT_SWEEP_CONCURRENCY,
            batch_size: None,
        }
    }

    /// Sets the remover used by the sweep phase.
    #[must_use]
    pub fn with_remover(mut self, remover: Arc<dyn BulkRemover>) -> Self {
        self.remover = Some(remover);
        self
    }

    /// Sets how many roots the mark phase walks concurrently.
    #[must_use]
    pub const fn with_mark_concurrency(mut self, concurrency: usize) -> Self {
        self.mark_concurrency = concurrency;
        self
    }

    /// Sets how many batches the sweep phase keeps in flight.
    #[must_use]
    pub const fn with_sweep_concurrency(mut self, concurrency: usize) -> Self {
        self.sweep_concurrency = concurrency;
        self
    }

    /// Caps sweep batches below the backend limit.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: Option<usize>) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Runs one collection.
    ///
    /// `mark_id` is required for [`GcMode::Sweep`]; marking modes generate
    /// one when absent. `rules` and `now` are only used by the mark phase.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a sweep without a mark id, a mark
    /// id that is not a safe path component, or a sweeping mode without a
    /// remover, plus any error of the phases.
    #[instrument(
        name = "lakesweep.gc.run",
        skip(self, ctx, mark_id, rules),
        fields(component = "gc", repository = %self.commits.repository(), mode = %mode)
    )]
    pub fn run(
        &self,
        ctx: &RunContext,
        mode: GcMode,
        mark_id: Option<MarkId>,
        rules: &GarbageCollectionRules,
        now: DateTime<Utc>,
    ) -> Result<RunOutcome> {
        let start = Instant::now();
        let remover = match (&self.remover, mode.sweeps()) {
            (Some(remover), true) => Some(Arc::clone(remover)),
            (None, true) => {
                return Err(Error::InvalidInput(format!(
                    "mode '{mode}' needs a remover for {}",
                    self.commits.storage_namespace()
                )));
            },
            (_, false) => None,
        };
        let mark_id = match (mark_id, mode) {
            (Some(id), _) => id,
            (None, GcMode::Sweep) => {
                return Err(Error::InvalidInput(
                    "sweep mode requires a mark id".to_string(),
                ));
            },
            (None, _) => MarkId::generate(),
        };
        mark_id.validate()?;

        let manifest = if mode.marks() {
            let marker = ReachabilityMarker::new(
                Arc::clone(&self.commits),
                Arc::clone(&self.manifests),
            )
            .with_concurrency(self.mark_concurrency);
            Some(marker.mark(ctx, mark_id.clone(), rules, now)?)
        } else {
            None
        };

        let report = match remover {
            Some(remover) => {
                let executor = SweepExecutor::new(
                    self.commits.repository(),
                    Arc::clone(&self.manifests),
                    remover,
                )
                .with_concurrency(self.sweep_concurrency)
                .with_batch_size(self.batch_size);
                Some(executor.sweep(ctx, &mark_id)?)
            },
            None => None,
        };

        let outcome = RunOutcome {
            mode,
            mark_id,
            manifest,
            report,
            duration_ms: super::duration_to_millis(start.elapsed()),
        };
        info!(summary = %outcome.summary(), "Run complete");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CommitId;
    use crate::storage::{InMemoryCommitStore, InMemoryManifestStore};
    use test_case::test_case;

    #[test_case("mark", GcMode::Mark; "mark")]
    #[test_case("sweep", GcMode::Sweep; "sweep")]
    #[test_case("both", GcMode::MarkAndSweep; "both")]
    #[test_case("MARK-AND-SWEEP", GcMode::MarkAndSweep; "long form")]
    fn test_parse_mode(input: &str, expected: GcMode) {
        assert_eq!(input.parse::<GcMode>().expect("mode"), expected);
    }

    #[test]
    fn test_parse_unknown_mode() {
        assert!(matches!("purge".parse::<GcMode>(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_mode_phases() {
        assert!(GcMode::Mark.marks() && !GcMode::Mark.sweeps());
        assert!(!GcMode::Sweep.marks() && GcMode::Sweep.sweeps());
        assert!(GcMode::MarkAndSweep.marks() && GcMode::MarkAndSweep.sweeps());
    }

    #[test]
    fn test_unsafe_mark_id_rejected_before_walk() {
        // The tip commit is missing, so any walk would fail with AncestryRead.
        let mut commits = InMemoryCommitStore::new("repo", "local:///data/repo");
        commits.set_branch("main", CommitId::new("missing"));
        let manifests = Arc::new(InMemoryManifestStore::new());
        let runner = GcRunner::new(Arc::new(commits), manifests.clone());

        let err = runner
            .run(
                &RunContext::new(),
                GcMode::Mark,
                Some(MarkId::new("../outside")),
                &GarbageCollectionRules::with_default(1),
                Utc::now(),
            )
            .expect_err("unsafe mark id");
        assert!(matches!(err, Error::InvalidInput(ref m) if m.contains("mark id")));
        assert!(manifests.list_marks("repo").expect("marks").is_empty());
    }

    #[test]
    fn test_summary_mentions_phases() {
        let outcome = RunOutcome {
            mode: GcMode::Mark,
            mark_id: MarkId::new("m1"),
            manifest: None,
            report: None,
            duration_ms: 3,
        };
        assert_eq!(outcome.summary(), "mark run for mark m1 (3ms)");
    }
}
