//! Mark manifests and sweep reports.

use super::{GarbageCollectionRules, ObjectAddress};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

string_id!(
    /// Identifier tying a sweep to the mark that produced its candidates.
    MarkId
);

impl MarkId {
    /// Generates a fresh, time-ordered mark id.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    /// Checks that the id is usable as a single path component.
    ///
    /// Allowed characters are ASCII alphanumerics, `-`, `_` and `.`; `.` and
    /// `..` on their own are rejected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an empty or unsafe id.
    pub fn validate(&self) -> Result<()> {
        let id = self.as_str();
        let valid = !id.is_empty()
            && id != "."
            && id != ".."
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if valid {
            Ok(())
        } else {
            Err(Error::InvalidInput(format!("invalid mark id '{id}'")))
        }
    }
}

/// Candidate set produced by a mark run.
///
/// Created at mark time, read at sweep time, never mutated. A fresh mark
/// always produces a new manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkManifest {
    /// Mark identifier.
    pub mark_id: MarkId,
    /// Repository the mark was computed for.
    pub repository: String,
    /// Storage namespace the addresses are relative to.
    pub storage_namespace: String,
    /// Evaluation time of the mark.
    pub created_at: DateTime<Utc>,
    /// Rules snapshot the mark was evaluated against.
    pub rules: GarbageCollectionRules,
    /// Sorted, deduplicated candidate addresses.
    pub addresses: Vec<ObjectAddress>,
}

impl MarkManifest {
    /// Number of candidates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    /// Returns `true` if nothing was marked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Returns `true` if the address was marked.
    #[must_use]
    pub fn contains(&self, address: &ObjectAddress) -> bool {
        self.addresses.binary_search(address).is_ok()
    }
}

/// An address the sweep could not confirm as removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedRemoval {
    /// The address.
    pub address: ObjectAddress,
    /// Backend-reported or local reason.
    pub reason: String,
    /// The backend reported the object as already absent.
    #[serde(default)]
    pub already_absent: bool,
}

impl FailedRemoval {
    /// Creates a hard failure.
    #[must_use]
    pub fn new(address: ObjectAddress, reason: impl Into<String>) -> Self {
        Self {
            address,
            reason: reason.into(),
            already_absent: false,
        }
    }

    /// Creates a soft failure for an object that no longer exists.
    #[must_use]
    pub fn already_absent(address: ObjectAddress) -> Self {
        Self {
            address,
            reason: "already absent".to_string(),
            already_absent: true,
        }
    }
}

/// Audit record of one sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Mark the sweep consumed.
    pub mark_id: MarkId,
    /// Sweep start.
    pub started_at: DateTime<Utc>,
    /// Sweep end.
    pub finished_at: DateTime<Utc>,
    /// Addresses the backend confirmed as removed.
    pub removed: Vec<ObjectAddress>,
    /// Addresses that were not confirmed.
    pub failed: Vec<FailedRemoval>,
    /// The run was cancelled before every batch was issued.
    #[serde(default)]
    pub cancelled: bool,
}

impl SweepReport {
    /// Number of soft failures on already-absent objects.
    #[must_use]
    pub fn already_absent_count(&self) -> usize {
        self.failed.iter().filter(|f| f.already_absent).count()
    }

    /// Number of hard failures.
    #[must_use]
    pub fn hard_failure_count(&self) -> usize {
        self.failed.len() - self.already_absent_count()
    }

    /// Returns `true` if every address was removed or already absent.
    #[must_use]
    pub fn is_converged(&self) -> bool {
        !self.cancelled && self.hard_failure_count() == 0
    }

    /// Returns a human-readable summary.
    #[must_use]
    pub fn summary(&self) -> String {
        let millis = (self.finished_at - self.started_at).num_milliseconds();
        format!(
            "mark {}: removed {}, already absent {}, failed {}{} ({millis}ms)",
            self.mark_id,
            self.removed.len(),
            self.already_absent_count(),
            self.hard_failure_count(),
            if self.cancelled { ", cancelled" } else { "" },
        )
    }
}

impl fmt::Display for SweepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(failed: Vec<FailedRemoval>, cancelled: bool) -> SweepReport {
        let now = Utc::now();
        SweepReport {
            mark_id: MarkId::new("m1"),
            started_at: now,
            finished_at: now,
            removed: vec![ObjectAddress::new("a")],
            failed,
            cancelled,
        }
    }

    #[test]
    fn test_generated_mark_ids_are_unique() {
        assert_ne!(MarkId::generate(), MarkId::generate());
    }

    #[test]
    fn test_mark_id_validation() {
        assert!(MarkId::generate().validate().is_ok());
        assert!(MarkId::new("nightly-2024.06_01").validate().is_ok());
        for bad in ["", ".", "..", "a/b", "../escape", "with space"] {
            assert!(
                matches!(MarkId::new(bad).validate(), Err(Error::InvalidInput(_))),
                "{bad:?} accepted"
            );
        }
    }

    #[test]
    fn test_report_counts() {
        let r = report(
            vec![
                FailedRemoval::already_absent(ObjectAddress::new("b")),
                FailedRemoval::new(ObjectAddress::new("c"), "AccessDenied"),
            ],
            false,
        );
        assert_eq!(r.already_absent_count(), 1);
        assert_eq!(r.hard_failure_count(), 1);
        assert!(!r.is_converged());
        assert!(r.summary().contains("removed 1, already absent 1, failed 1"));
    }

    #[test]
    fn test_soft_failures_still_converge() {
        let r = report(
            vec![FailedRemoval::already_absent(ObjectAddress::new("b"))],
            false,
        );
        assert!(r.is_converged());
        assert!(!report(Vec::new(), true).is_converged());
    }

    #[test]
    fn test_manifest_contains_uses_sorted_addresses() {
        let manifest = MarkManifest {
            mark_id: MarkId::new("m"),
            repository: "repo".to_string(),
            storage_namespace: "s3://bucket/repo".to_string(),
            created_at: Utc::now(),
            rules: GarbageCollectionRules::with_default(1),
            addresses: vec![ObjectAddress::new("a"), ObjectAddress::new("c")],
        };
        assert!(manifest.contains(&ObjectAddress::new("c")));
        assert!(!manifest.contains(&ObjectAddress::new("b")));
        assert_eq!(manifest.len(), 2);
    }
}
