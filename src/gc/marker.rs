//! Reachability marking.
//!
//! Walks the ancestry of every live branch and every dangling root, finds the
//! addresses each root ever held and when each was last deleted there, and
//! keeps only the addresses whose retention has run out on every root that
//! held them.

use super::retention::{RetentionPolicyEngine, is_expired};
use super::{duration_to_millis, u64_to_f64, usize_to_f64};
use crate::context::RunContext;
use crate::models::{
    CommitId, GarbageCollectionRules, MarkId, MarkManifest, ObjectAddress, TreeId, WalkRoot,
};
use crate::storage::{CommitStore, ManifestStore};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{debug, info, info_span, instrument, warn};

/// Default number of roots walked concurrently.
pub const DEFAULT_MARK_CONCURRENCY: usize = 4;

/// Everything one root's ancestry says about the addresses it held.
#[derive(Debug, Default)]
struct RootScan {
    label: String,
    live: bool,
    retention_days: u32,
    /// Addresses in the root's tip tree.
    tip: HashSet<ObjectAddress>,
    /// Addresses in any tree of the walked ancestry.
    held: HashSet<ObjectAddress>,
    /// Most recent explicit deletion per address.
    deleted: HashMap<ObjectAddress, DateTime<Utc>>,
    /// Branch deletion time of a dangling root.
    implicit_deletion: Option<DateTime<Utc>>,
    commits_visited: usize,
}

impl RootScan {
    /// The deletion event that governs expiry of `address` on this root.
    ///
    /// An address still in a dangling tip was deleted together with the
    /// branch; the later of that and any explicit deletion wins.
    fn governing_event(&self, address: &ObjectAddress) -> Option<DateTime<Utc>> {
        let explicit = self.deleted.get(address).copied();
        if self.tip.contains(address) {
            explicit.max(self.implicit_deletion)
        } else {
            explicit
        }
    }
}

/// Summary of one candidate computation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkStats {
    /// Roots walked, live and dangling.
    pub roots_walked: usize,
    /// Commits visited across all walks.
    pub commits_visited: usize,
    /// Addresses kept because a live tip references them.
    pub retained: usize,
    /// Addresses held somewhere, not retained, but not yet expired everywhere.
    pub within_retention: usize,
}

/// Computes and persists garbage candidates.
///
/// # Example
///
/// ```rust,ignore
/// use lakesweep::gc::ReachabilityMarker;
///
/// let marker = ReachabilityMarker::new(commits, manifests).with_concurrency(8);
/// let manifest = marker.mark(&ctx, MarkId::generate(), &rules, Utc::now())?;
/// println!("{} candidates", manifest.len());
/// ```
pub struct ReachabilityMarker {
    commits: Arc<dyn CommitStore>,
    manifests: Arc<dyn ManifestStore>,
    concurrency: usize,
}

impl ReachabilityMarker {
    /// Creates a marker over a commit store and a manifest store.
    #[must_use]
    pub fn new(commits: Arc<dyn CommitStore>, manifests: Arc<dyn ManifestStore>) -> Self {
        Self {
            commits,
            manifests,
            concurrency: DEFAULT_MARK_CONCURRENCY,
        }
    }

    /// Sets how many roots are walked concurrently.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Computes the candidate set and persists it under `mark_id`.
    ///
    /// Re-marking an existing id replaces its manifest.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AncestryRead`] if any commit or tree is unreadable,
    /// or the context error on cancellation. Nothing is persisted on failure.
    #[instrument(
        name = "lakesweep.gc.mark",
        skip(self, ctx, mark_id, rules),
        fields(
            component = "gc",
            operation = "mark",
            repository = %self.commits.repository(),
            mark_id = %mark_id
        )
    )]
    pub fn mark(
        &self,
        ctx: &RunContext,
        mark_id: MarkId,
        rules: &GarbageCollectionRules,
        now: DateTime<Utc>,
    ) -> Result<MarkManifest> {
        let start = Instant::now();
        let computed = self.compute(ctx, rules, now);
        let (addresses, stats) = match computed {
            Ok(computed) => computed,
            Err(e) => {
                metrics::counter!("gc_mark_runs_total", "outcome" => "error").increment(1);
                warn!(error = %e, "Mark failed, no manifest written");
                return Err(e);
            },
        };

        let manifest = MarkManifest {
            mark_id,
            repository: self.commits.repository().to_string(),
            storage_namespace: self.commits.storage_namespace().to_string(),
            created_at: now,
            rules: rules.clone(),
            addresses,
        };
        {
            let _span = info_span!("lakesweep.gc.mark.persist").entered();
            self.manifests.put_manifest(&manifest)?;
        }

        let duration_ms = duration_to_millis(start.elapsed());
        metrics::counter!("gc_mark_runs_total", "outcome" => "success").increment(1);
        metrics::histogram!("gc_mark_candidates").record(usize_to_f64(manifest.len()));
        metrics::histogram!("gc_mark_duration_ms").record(u64_to_f64(duration_ms));
        info!(
            candidates = manifest.len(),
            roots = stats.roots_walked,
            commits = stats.commits_visited,
            retained = stats.retained,
            within_retention = stats.within_retention,
            duration_ms,
            "Mark complete"
        );
        Ok(manifest)
    }

    /// Computes the sorted candidate set without persisting it.
    ///
    /// # Errors
    ///
    /// Same as [`mark`](Self::mark).
    pub fn candidates(
        &self,
        ctx: &RunContext,
        rules: &GarbageCollectionRules,
        now: DateTime<Utc>,
    ) -> Result<Vec<ObjectAddress>> {
        self.compute(ctx, rules, now).map(|(addresses, _)| addresses)
    }

    fn compute(
        &self,
        ctx: &RunContext,
        rules: &GarbageCollectionRules,
        now: DateTime<Utc>,
    ) -> Result<(Vec<ObjectAddress>, MarkStats)> {
        let roots = {
            let _span = info_span!("lakesweep.gc.mark.snapshot_roots").entered();
            self.commits.roots()?
        };
        debug!(roots = roots.len(), "Snapshotted walk roots");

        let engine = RetentionPolicyEngine::new(rules);
        let scans = {
            let _span = info_span!("lakesweep.gc.mark.walk", roots = roots.len()).entered();
            self.scan_all(ctx, &roots, engine)?
        };
        Ok(select_candidates(&scans, now))
    }

    /// Walks every root on a bounded set of scoped threads.
    fn scan_all(
        &self,
        ctx: &RunContext,
        roots: &[WalkRoot],
        engine: RetentionPolicyEngine<'_>,
    ) -> Result<Vec<RootScan>> {
        let next = AtomicUsize::new(0);
        let workers = self.concurrency.min(roots.len()).max(1);
        let store: &dyn CommitStore = self.commits.as_ref();

        let mut results: Vec<(usize, Result<RootScan>)> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    scope.spawn(|| {
                        let mut done = Vec::new();
                        loop {
                            let i = next.fetch_add(1, Ordering::Relaxed);
                            let Some(root) = roots.get(i) else {
                                break;
                            };
                            let scan = scan_root(store, ctx, root, engine);
                            let failed = scan.is_err();
                            done.push((i, scan));
                            if failed {
                                // Stop the other walkers early.
                                next.store(roots.len(), Ordering::Relaxed);
                                break;
                            }
                        }
                        done
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| {
                    h.join().unwrap_or_else(|_| {
                        vec![(
                            usize::MAX,
                            Err(Error::OperationFailed {
                                operation: "mark_walk".to_string(),
                                cause: "walker thread panicked".to_string(),
                            }),
                        )]
                    })
                })
                .collect()
        });

        results.sort_by_key(|(i, _)| *i);
        results.into_iter().map(|(_, scan)| scan).collect()
    }
}

/// Fills in the commit id on tree read failures.
fn at_commit(commit: &CommitId) -> impl Fn(Error) -> Error + '_ {
    move |e| match e {
        Error::AncestryRead { commit: c, cause } if c.is_empty() => Error::AncestryRead {
            commit: commit.to_string(),
            cause,
        },
        other => other,
    }
}

fn scan_root(
    store: &dyn CommitStore,
    ctx: &RunContext,
    root: &WalkRoot,
    engine: RetentionPolicyEngine<'_>,
) -> Result<RootScan> {
    let mut tree_cache: HashMap<TreeId, Arc<HashSet<ObjectAddress>>> = HashMap::new();
    let mut addresses_of = |tree: &TreeId, commit: &CommitId| -> Result<Arc<HashSet<ObjectAddress>>> {
        if let Some(set) = tree_cache.get(tree) {
            return Ok(Arc::clone(set));
        }
        let set: Arc<HashSet<ObjectAddress>> = Arc::new(
            store
                .read_tree(tree)
                .map_err(at_commit(commit))?
                .values()
                .cloned()
                .collect(),
        );
        tree_cache.insert(tree.clone(), Arc::clone(&set));
        Ok(set)
    };

    let tip_commit = store.get_commit(root.tip())?;
    let mut scan = RootScan {
        label: root.label(),
        live: root.is_live(),
        tip: (*addresses_of(&tip_commit.tree, &tip_commit.id)?).clone(),
        ..RootScan::default()
    };
    match root {
        WalkRoot::Live(branch) => {
            scan.retention_days = engine.effective_retention_days(&branch.name);
        },
        WalkRoot::Dangling(dangling) => {
            scan.retention_days = engine.dangling_retention_days();
            scan.implicit_deletion = Some(dangling.deleted_at.unwrap_or(tip_commit.created_at));
        },
    }

    let mut visited: HashSet<CommitId> = HashSet::new();
    let mut stack = vec![tip_commit.id.clone()];
    while let Some(id) = stack.pop() {
        if !visited.insert(id.clone()) {
            continue;
        }
        ctx.check()?;
        let commit = store.get_commit(&id)?;
        let current = addresses_of(&commit.tree, &commit.id)?;
        scan.held.extend(current.iter().cloned());

        for parent_id in &commit.parents {
            let parent = store.get_commit(parent_id)?;
            let before = addresses_of(&parent.tree, &parent.id)?;
            for address in before.difference(&current) {
                scan.deleted
                    .entry(address.clone())
                    .and_modify(|at| *at = (*at).max(commit.created_at))
                    .or_insert(commit.created_at);
            }
            if !visited.contains(parent_id) {
                stack.push(parent_id.clone());
            }
        }
    }
    scan.commits_visited = visited.len();
    debug!(
        root = %scan.label,
        commits = scan.commits_visited,
        held = scan.held.len(),
        deletions = scan.deleted.len(),
        "Walked root"
    );
    Ok(scan)
}

/// Applies the retention verdict of every holding root to every address.
fn select_candidates(scans: &[RootScan], now: DateTime<Utc>) -> (Vec<ObjectAddress>, MarkStats) {
    let retained: HashSet<&ObjectAddress> = scans
        .iter()
        .filter(|s| s.live)
        .flat_map(|s| s.tip.iter())
        .collect();

    let mut verdicts: HashMap<&ObjectAddress, bool> = HashMap::new();
    for scan in scans {
        for address in &scan.held {
            if retained.contains(address) {
                continue;
            }
            let expired = scan
                .governing_event(address)
                .is_some_and(|at| is_expired(at, scan.retention_days, now));
            verdicts
                .entry(address)
                .and_modify(|all| *all &= expired)
                .or_insert(expired);
        }
    }

    let mut candidates: Vec<ObjectAddress> = verdicts
        .iter()
        .filter(|(_, expired)| **expired)
        .map(|(address, _)| (*address).clone())
        .collect();
    candidates.sort();

    let stats = MarkStats {
        roots_walked: scans.len(),
        commits_visited: scans.iter().map(|s| s.commits_visited).sum(),
        retained: retained.len(),
        within_retention: verdicts.len() - candidates.len(),
    };
    (candidates, stats)
}
