//! Property-based tests for retention evaluation and marking.
//!
//! Uses proptest to verify invariants across random inputs:
//! - Branch overrides win over the default, for every branch id
//! - Expiry is exactly `elapsed >= retention`, equality included
//! - Addresses at a live tip are never mark candidates
//! - Duplicate branch rules are always rejected

// Property tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use chrono::{DateTime, Duration, Utc};
use lakesweep::gc::{SECONDS_PER_DAY, effective_retention_days, is_expired};
use lakesweep::models::{Commit, CommitId, Tree, TreeId};
use lakesweep::storage::{InMemoryCommitStore, InMemoryManifestStore};
use lakesweep::{
    Error, GarbageCollectionRules, ObjectAddress, ReachabilityMarker, RetentionRule, RunContext,
};
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

fn now() -> DateTime<Utc> {
    "2024-06-01T00:00:00Z".parse().expect("now")
}

proptest! {
    /// Property: a branch with an override gets it; any other branch gets the default.
    #[test]
    fn prop_override_else_default(
        default in 0u32..400,
        overrides in prop::collection::btree_map("[a-z]{1,8}", 0u32..400, 0..8),
        queried in "[a-z]{1,8}",
    ) {
        let rules = GarbageCollectionRules::new(
            default,
            overrides.iter().map(|(b, d)| RetentionRule::new(b.clone(), *d)).collect(),
        )
        .expect("unique branches");

        for (branch, days) in &overrides {
            prop_assert_eq!(effective_retention_days(&rules, branch), *days);
        }
        let expected = overrides.get(&queried).copied().unwrap_or(default);
        prop_assert_eq!(effective_retention_days(&rules, &queried), expected);
    }

    /// Property: expiry holds iff elapsed time reaches the retention period.
    #[test]
    fn prop_expiry_matches_elapsed_time(
        elapsed_secs in -10 * SECONDS_PER_DAY..1000 * SECONDS_PER_DAY,
        days in 0u32..500,
    ) {
        let now = now();
        let reference = now - Duration::seconds(elapsed_secs);
        let expected = elapsed_secs >= i64::from(days) * SECONDS_PER_DAY;
        prop_assert_eq!(is_expired(reference, days, now), expected);
    }

    /// Property: the exact boundary is expired, one second earlier is not.
    #[test]
    fn prop_boundary_is_expired(days in 1u32..10_000) {
        let now = now();
        let boundary = now - Duration::seconds(i64::from(days) * SECONDS_PER_DAY);
        prop_assert!(is_expired(boundary, days, now));
        prop_assert!(!is_expired(boundary + Duration::seconds(1), days, now));
    }

    /// Property: repeating a branch id is always a validation error.
    #[test]
    fn prop_duplicate_branch_rejected(branch in "[a-z]{1,8}", a in 0u32..100, b in 0u32..100) {
        let result = GarbageCollectionRules::new(
            1,
            vec![RetentionRule::new(branch.clone(), a), RetentionRule::new(branch, b)],
        );
        prop_assert!(matches!(result, Err(Error::Validation(_))));
    }

    /// Property: no address in a live tip's tree is ever a candidate, even
    /// with zero-day retention and arbitrary history.
    #[test]
    fn prop_live_tips_never_marked(
        history in prop::collection::vec(prop::collection::btree_set(0u8..12, 0..6), 1..12),
        fork in any::<prop::sample::Index>(),
        delete_fork in any::<bool>(),
    ) {
        let mut store = InMemoryCommitStore::new("repo", "local:///data/repo");
        let now = now();
        let mut ids = Vec::new();
        let mut trees = Vec::new();
        for (i, files) in history.iter().enumerate() {
            let id = CommitId::new(format!("c{i}"));
            let tree_id = TreeId::new(format!("t{i}"));
            let tree: Tree = files
                .iter()
                .map(|f| (format!("f{f}"), ObjectAddress::new(format!("obj/{f}"))))
                .collect();
            store.insert_tree(tree_id.clone(), tree.clone());
            store.insert_commit(Commit {
                id: id.clone(),
                parents: ids.last().cloned().into_iter().collect(),
                created_at: now - Duration::days(100 - i64::try_from(i).expect("small")),
                tree: tree_id,
            });
            ids.push(id);
            trees.push(tree);
        }
        let fork_at = fork.index(ids.len());
        store.set_branch("main", ids.last().cloned().expect("non-empty"));
        store.set_branch("fork", ids[fork_at].clone());
        if delete_fork {
            store.delete_branch("fork", Some(now)).expect("delete");
        }

        let marker = ReachabilityMarker::new(Arc::new(store), Arc::new(InMemoryManifestStore::new()));
        let candidates: BTreeSet<ObjectAddress> = marker
            .candidates(&RunContext::new(), &GarbageCollectionRules::with_default(0), now)
            .expect("candidates")
            .into_iter()
            .collect();

        let mut live: BTreeMap<&str, &ObjectAddress> = BTreeMap::new();
        for (path, address) in trees.last().expect("non-empty") {
            live.insert(path, address);
        }
        if !delete_fork {
            for (path, address) in &trees[fork_at] {
                live.insert(path, address);
            }
        }
        for address in live.values() {
            prop_assert!(!candidates.contains(*address), "{} is live", address);
        }
    }
}
