//! Sweep execution.
//!
//! Deletes exactly the addresses of a stored manifest, in batches bounded by
//! the backend's bulk limit. Reachability is never recomputed here.

use super::{duration_to_millis, u64_to_f64, usize_to_u64};
use crate::context::RunContext;
use crate::models::{FailedRemoval, MarkId, ObjectAddress, SweepReport};
use crate::storage::{BulkRemover, DeleteOutcome, ManifestStore, StorageNamespace};
use crate::{Error, Result};
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{info, info_span, instrument, warn};

/// Default number of batches in flight.
pub const DEFAULT_SWEEP_CONCURRENCY: usize = 4;

/// Reason recorded for addresses of batches skipped on cancellation.
pub const CANCELLED_REASON: &str = "cancelled";

/// Drives a [`BulkRemover`] over a stored manifest.
pub struct SweepExecutor {
    repository: String,
    manifests: Arc<dyn ManifestStore>,
    remover: Arc<dyn BulkRemover>,
    concurrency: usize,
    batch_size: Option<usize>,
}

impl SweepExecutor {
    /// Creates an executor for one repository.
    #[must_use]
    pub fn new(
        repository: impl Into<String>,
        manifests: Arc<dyn ManifestStore>,
        remover: Arc<dyn BulkRemover>,
    ) -> Self {
        Self {
            repository: repository.into(),
            manifests,
            remover,
            concurrency: DEFAULT_SWEEP_CONCURRENCY,
            batch_size: None,
        }
    }

    /// Sets how many batches may be in flight at once.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Caps batches below the backend limit.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: Option<usize>) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Effective batch size: the backend limit, lowered by any configured cap.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        let limit = self.remover.max_bulk_size();
        self.batch_size.map_or(limit, |cap| cap.min(limit)).max(1)
    }

    /// Sweeps the manifest stored under `mark_id`.
    ///
    /// Backend failures never fail the sweep; they are listed in
    /// [`SweepReport::failed`]. Safe to re-run with the same mark id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MarkNotFound`] or [`Error::ManifestCorrupt`] if the
    /// manifest cannot be loaded, or [`Error::UnsupportedStorage`] if the
    /// manifest's namespace does not belong to the configured remover.
    #[instrument(
        name = "lakesweep.gc.sweep",
        skip(self, ctx, mark_id),
        fields(
            component = "gc",
            operation = "sweep",
            repository = %self.repository,
            mark_id = %mark_id
        )
    )]
    pub fn sweep(&self, ctx: &RunContext, mark_id: &MarkId) -> Result<SweepReport> {
        let start = Instant::now();
        let started_at = Utc::now();

        let manifest = {
            let _span = info_span!("lakesweep.gc.sweep.load_manifest").entered();
            self.manifests.get_manifest(&self.repository, mark_id)?
        };
        let namespace = StorageNamespace::parse(&manifest.storage_namespace)?;
        if namespace.storage_type != self.remover.storage_type() {
            return Err(Error::UnsupportedStorage(format!(
                "{} (remover handles {})",
                manifest.storage_namespace,
                self.remover.storage_type()
            )));
        }

        let batches: Vec<&[ObjectAddress]> =
            manifest.addresses.chunks(self.batch_size()).collect();
        info!(
            candidates = manifest.len(),
            batches = batches.len(),
            batch_size = self.batch_size(),
            "Sweeping manifest"
        );

        let outcomes = self.run_batches(ctx, &batches, &manifest.storage_namespace);

        let mut report = SweepReport {
            mark_id: mark_id.clone(),
            started_at,
            finished_at: started_at,
            removed: Vec::new(),
            failed: Vec::new(),
            cancelled: false,
        };
        for (outcome, skipped) in outcomes {
            report.cancelled |= skipped;
            report.removed.extend(outcome.deleted);
            report.failed.extend(outcome.failed);
        }
        report.finished_at = Utc::now();

        self.record(&report, start);
        if let Err(e) = self.manifests.put_report(&self.repository, &report) {
            warn!(error = %e, "Failed to persist sweep report");
        }
        Ok(report)
    }

    /// Issues batches on a bounded pool of scoped threads.
    ///
    /// Once the context is done, batches not yet started are skipped; a batch
    /// already handed to the remover runs to completion.
    fn run_batches(
        &self,
        ctx: &RunContext,
        batches: &[&[ObjectAddress]],
        storage_namespace: &str,
    ) -> Vec<(DeleteOutcome, bool)> {
        let next = AtomicUsize::new(0);
        let workers = self.concurrency.min(batches.len()).max(1);
        let remover: &dyn BulkRemover = self.remover.as_ref();

        let mut results: Vec<(usize, DeleteOutcome, bool)> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    scope.spawn(|| {
                        let mut done = Vec::new();
                        loop {
                            let i = next.fetch_add(1, Ordering::Relaxed);
                            let Some(batch) = batches.get(i) else {
                                break;
                            };
                            if ctx.err().is_some() {
                                let skipped = DeleteOutcome::all_failed(batch, CANCELLED_REASON);
                                done.push((i, skipped, true));
                                continue;
                            }
                            let outcome = remover.delete_objects(batch, storage_namespace);
                            done.push((i, outcome, false));
                        }
                        done
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap_or_default())
                .collect()
        });

        // A panicked worker loses its batches; report them as failed.
        let mut seen = vec![false; batches.len()];
        for (i, _, _) in &results {
            seen[*i] = true;
        }
        for (i, batch) in batches.iter().enumerate() {
            if !seen[i] {
                let lost = DeleteOutcome::all_failed(batch, "sweep worker panicked");
                results.push((i, lost, false));
            }
        }

        results.sort_by_key(|(i, _, _)| *i);
        results
            .into_iter()
            .map(|(_, outcome, skipped)| (outcome, skipped))
            .collect()
    }

    fn record(&self, report: &SweepReport, start: Instant) {
        let absent = report.already_absent_count();
        let hard = report.hard_failure_count();
        let duration_ms = duration_to_millis(start.elapsed());

        metrics::counter!(
            "gc_sweep_removed_total",
            "storage_type" => self.remover.storage_type().as_str()
        )
        .increment(usize_to_u64(report.removed.len()));
        metrics::counter!("gc_sweep_failed_total", "kind" => "already_absent")
            .increment(usize_to_u64(absent));
        metrics::counter!("gc_sweep_failed_total", "kind" => "hard").increment(usize_to_u64(hard));
        metrics::histogram!("gc_sweep_duration_ms").record(u64_to_f64(duration_ms));

        if absent > 0 {
            info!(already_absent = absent, "Some objects were already absent");
        }
        for failure in report.failed.iter().filter(|f| !f.already_absent).take(10) {
            log_failure(failure);
        }
        info!(
            removed = report.removed.len(),
            already_absent = absent,
            failed = hard,
            cancelled = report.cancelled,
            duration_ms,
            "Sweep complete"
        );
    }
}

fn log_failure(failure: &FailedRemoval) {
    warn!(address = %failure.address, reason = %failure.reason, "Object not removed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GarbageCollectionRules, MarkManifest};
    use crate::storage::{InMemoryManifestStore, StorageType};
    use std::sync::Mutex;

    /// Remover that records batch sizes and deletes from an in-memory set.
    struct RecordingRemover {
        limit: usize,
        present: Mutex<std::collections::HashSet<ObjectAddress>>,
        batches: Mutex<Vec<usize>>,
        on_batch: Option<RunContext>,
    }

    impl RecordingRemover {
        fn new(limit: usize, present: &[ObjectAddress]) -> Self {
            Self {
                limit,
                present: Mutex::new(present.iter().cloned().collect()),
                batches: Mutex::new(Vec::new()),
                on_batch: None,
            }
        }
    }

    impl BulkRemover for RecordingRemover {
        fn storage_type(&self) -> StorageType {
            StorageType::S3
        }

        fn max_bulk_size(&self) -> usize {
            self.limit
        }

        fn construct_remove_key_names(
            &self,
            keys: &[ObjectAddress],
            _storage_namespace: &str,
        ) -> Result<Vec<String>> {
            Ok(keys.iter().map(ToString::to_string).collect())
        }

        fn delete_objects(&self, keys: &[ObjectAddress], _storage_namespace: &str) -> DeleteOutcome {
            self.batches.lock().expect("batches lock").push(keys.len());
            if let Some(ctx) = &self.on_batch {
                ctx.cancel();
            }
            let mut present = self.present.lock().expect("present lock");
            let mut outcome = DeleteOutcome::default();
            for key in keys {
                if present.remove(key) {
                    outcome.deleted.push(key.clone());
                } else {
                    outcome.failed.push(FailedRemoval::already_absent(key.clone()));
                }
            }
            outcome
        }
    }

    fn addresses(n: usize) -> Vec<ObjectAddress> {
        let mut v: Vec<ObjectAddress> = (0..n)
            .map(|i| ObjectAddress::new(format!("data/{i:04}")))
            .collect();
        v.sort();
        v
    }

    fn store_manifest(addresses: Vec<ObjectAddress>) -> Arc<InMemoryManifestStore> {
        let store = Arc::new(InMemoryManifestStore::new());
        store
            .put_manifest(&MarkManifest {
                mark_id: MarkId::new("m1"),
                repository: "repo".to_string(),
                storage_namespace: "s3://bucket/repo".to_string(),
                created_at: Utc::now(),
                rules: GarbageCollectionRules::with_default(1),
                addresses,
            })
            .expect("put manifest");
        store
    }

    #[test]
    fn test_batches_respect_backend_limit() {
        let all = addresses(25);
        let manifests = store_manifest(all.clone());
        let remover = Arc::new(RecordingRemover::new(10, &all));
        let executor = SweepExecutor::new("repo", manifests.clone(), remover.clone());

        let report = executor
            .sweep(&RunContext::new(), &MarkId::new("m1"))
            .expect("sweep");
        assert_eq!(report.removed, all);
        assert!(report.is_converged());

        let mut sizes = remover.batches.lock().expect("batches lock").clone();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![5, 10, 10]);
        assert_eq!(manifests.report_count("repo", &MarkId::new("m1")), 1);
    }

    #[test]
    fn test_configured_batch_size_caps_limit() {
        let all = addresses(6);
        let remover = Arc::new(RecordingRemover::new(1000, &all));
        let executor = SweepExecutor::new("repo", store_manifest(all), remover)
            .with_batch_size(Some(4));
        assert_eq!(executor.batch_size(), 4);
    }

    #[test]
    fn test_resweep_reports_already_absent() {
        let all = addresses(3);
        let manifests = store_manifest(all.clone());
        let executor = SweepExecutor::new(
            "repo",
            manifests,
            Arc::new(RecordingRemover::new(1000, &all)),
        );
        let ctx = RunContext::new();
        executor.sweep(&ctx, &MarkId::new("m1")).expect("first sweep");
        let second = executor.sweep(&ctx, &MarkId::new("m1")).expect("second sweep");

        assert!(second.removed.is_empty());
        assert_eq!(second.already_absent_count(), 3);
        assert!(second.is_converged());
    }

    #[test]
    fn test_unknown_mark_is_not_found() {
        let executor = SweepExecutor::new(
            "repo",
            Arc::new(InMemoryManifestStore::new()),
            Arc::new(RecordingRemover::new(10, &[])),
        );
        assert!(matches!(
            executor.sweep(&RunContext::new(), &MarkId::new("nope")),
            Err(Error::MarkNotFound(_))
        ));
    }

    #[test]
    fn test_cancellation_skips_unstarted_batches() {
        let all = addresses(30);
        let ctx = RunContext::new();
        let mut remover = RecordingRemover::new(10, &all);
        remover.on_batch = Some(ctx.clone());
        let executor = SweepExecutor::new("repo", store_manifest(all), Arc::new(remover))
            .with_concurrency(1);

        let report = executor.sweep(&ctx, &MarkId::new("m1")).expect("sweep");
        assert!(report.cancelled);
        assert_eq!(report.removed.len(), 10);
        assert_eq!(report.failed.len(), 20);
        assert!(report.failed.iter().all(|f| f.reason == CANCELLED_REASON));
    }

    #[test]
    fn test_mismatched_remover_is_rejected() {
        let manifests = Arc::new(InMemoryManifestStore::new());
        manifests
            .put_manifest(&MarkManifest {
                mark_id: MarkId::new("m1"),
                repository: "repo".to_string(),
                storage_namespace: "local:///data/repo".to_string(),
                created_at: Utc::now(),
                rules: GarbageCollectionRules::with_default(1),
                addresses: Vec::new(),
            })
            .expect("put");
        let executor = SweepExecutor::new(
            "repo",
            manifests,
            Arc::new(RecordingRemover::new(10, &[])),
        );
        assert!(matches!(
            executor.sweep(&RunContext::new(), &MarkId::new("m1")),
            Err(Error::UnsupportedStorage(_))
        ));
    }
}
