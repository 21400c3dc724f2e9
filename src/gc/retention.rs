//! Retention policy evaluation.
//!
//! Resolves the effective retention of a branch and decides whether a
//! deletion event has aged past it. Pure functions over the immutable rules
//! snapshot; validation happens when the rules are built.
//!
//! # Example
//!
//! ```rust
//! use chrono::{Duration, Utc};
//! use lakesweep::gc::{RetentionPolicyEngine, is_expired};
//! use lakesweep::{GarbageCollectionRules, RetentionRule};
//!
//! let rules = GarbageCollectionRules::new(5, vec![RetentionRule::new("dev", 1)]).unwrap();
//! let engine = RetentionPolicyEngine::new(&rules);
//! assert_eq!(engine.effective_retention_days("dev"), 1);
//! assert_eq!(engine.effective_retention_days("main"), 5);
//!
//! let now = Utc::now();
//! assert!(is_expired(now - Duration::days(1), 1, now));
//! ```

use crate::models::GarbageCollectionRules;
use chrono::{DateTime, Duration, Utc};

/// Seconds in one retention day.
///
/// Days are exact elapsed time, not calendar days.
pub const SECONDS_PER_DAY: i64 = 86_400;

/// Returns the branch override if one exists, else the repository default.
#[must_use]
pub fn effective_retention_days(rules: &GarbageCollectionRules, branch_id: &str) -> u32 {
    rules
        .rule_for(branch_id)
        .map_or(rules.default_retention_days(), |rule| rule.retention_days)
}

/// Retention period as a duration.
#[must_use]
pub fn retention_period(retention_days: u32) -> Duration {
    Duration::seconds(i64::from(retention_days) * SECONDS_PER_DAY)
}

/// Returns `true` iff `now - reference_time >= retention_days`.
///
/// Equality counts as expired. A reference time in the future is never
/// expired unless the retention is zero days and the times are equal.
#[must_use]
pub fn is_expired(reference_time: DateTime<Utc>, retention_days: u32, now: DateTime<Utc>) -> bool {
    now.signed_duration_since(reference_time) >= retention_period(retention_days)
}

/// Evaluator bound to one rules snapshot.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicyEngine<'a> {
    rules: &'a GarbageCollectionRules,
}

impl<'a> RetentionPolicyEngine<'a> {
    /// Creates an engine for a rules snapshot.
    #[must_use]
    pub const fn new(rules: &'a GarbageCollectionRules) -> Self {
        Self { rules }
    }

    /// The rules snapshot.
    #[must_use]
    pub const fn rules(&self) -> &'a GarbageCollectionRules {
        self.rules
    }

    /// Effective retention for a live branch.
    #[must_use]
    pub fn effective_retention_days(&self, branch_id: &str) -> u32 {
        effective_retention_days(self.rules, branch_id)
    }

    /// Retention applied to commits of deleted branches.
    #[must_use]
    pub const fn dangling_retention_days(&self) -> u32 {
        self.rules.default_retention_days()
    }

    /// Returns `true` if an event on `branch_id` at `reference_time` has expired.
    #[must_use]
    pub fn is_expired_for(
        &self,
        branch_id: &str,
        reference_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> bool {
        is_expired(reference_time, self.effective_retention_days(branch_id), now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RetentionRule;

    fn rules() -> GarbageCollectionRules {
        GarbageCollectionRules::new(
            5,
            vec![RetentionRule::new("a", 1), RetentionRule::new("b", 0)],
        )
        .expect("valid rules")
    }

    #[test]
    fn test_effective_days_with_override() {
        let rules = rules();
        assert_eq!(effective_retention_days(&rules, "a"), 1);
        assert_eq!(effective_retention_days(&rules, "b"), 0);
        assert_eq!(effective_retention_days(&rules, "main"), 5);
    }

    #[test]
    fn test_expiry_boundary_is_inclusive() {
        let now = Utc::now();
        let exactly_one_day = now - Duration::seconds(SECONDS_PER_DAY);
        assert!(is_expired(exactly_one_day, 1, now));
        assert!(!is_expired(exactly_one_day + Duration::seconds(1), 1, now));
    }

    #[test]
    fn test_no_calendar_truncation() {
        let now = "2024-03-10T00:30:00Z".parse::<DateTime<Utc>>().expect("time");
        // Crossed a calendar day but only one hour elapsed.
        let reference = "2024-03-09T23:30:00Z".parse::<DateTime<Utc>>().expect("time");
        assert!(!is_expired(reference, 1, now));
    }

    #[test]
    fn test_zero_retention_expires_immediately() {
        let now = Utc::now();
        assert!(is_expired(now, 0, now));
        assert!(!is_expired(now + Duration::seconds(1), 0, now));
    }

    #[test]
    fn test_engine_dangling_uses_default() {
        let rules = rules();
        let engine = RetentionPolicyEngine::new(&rules);
        assert_eq!(engine.dangling_retention_days(), 5);
        let now = Utc::now();
        assert!(engine.is_expired_for("a", now - Duration::days(1), now));
        assert!(!engine.is_expired_for("main", now - Duration::days(4), now));
    }
}
