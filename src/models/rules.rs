//! Retention rule types.
//!
//! Rules are set by the repository owner and read once per run. The
//! [`GarbageCollectionRules`] type can only be built through validation, so
//! every rule set that reaches the marker is well formed.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Retention override for one branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetentionRule {
    /// Branch the rule applies to.
    pub branch_id: String,
    /// Minimum days a deleted object is kept for this branch.
    pub retention_days: u32,
}

impl RetentionRule {
    /// Creates a new rule.
    #[must_use]
    pub fn new(branch_id: impl Into<String>, retention_days: u32) -> Self {
        Self {
            branch_id: branch_id.into(),
            retention_days,
        }
    }
}

/// Validated, immutable retention rule set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "GcRulesDocument", into = "GcRulesDocument")]
pub struct GarbageCollectionRules {
    default_retention_days: u32,
    branches: Vec<RetentionRule>,
}

impl GarbageCollectionRules {
    /// Builds a rule set, rejecting duplicate branch ids.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if two rules name the same branch.
    pub fn new(default_retention_days: u32, branches: Vec<RetentionRule>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(branches.len());
        for rule in &branches {
            if rule.branch_id.is_empty() {
                return Err(Error::Validation("empty branch id".to_string()));
            }
            if !seen.insert(rule.branch_id.as_str()) {
                return Err(Error::Validation(format!(
                    "duplicate branch id '{}'",
                    rule.branch_id
                )));
            }
        }
        Ok(Self {
            default_retention_days,
            branches,
        })
    }

    /// Rule set with only a default retention.
    #[must_use]
    pub const fn with_default(default_retention_days: u32) -> Self {
        Self {
            default_retention_days,
            branches: Vec::new(),
        }
    }

    /// Parses the control-plane JSON format and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for malformed JSON and
    /// [`Error::Validation`] for rejected rules.
    pub fn from_json(json: &str) -> Result<Self> {
        let document: GcRulesDocument = serde_json::from_str(json)
            .map_err(|e| Error::InvalidInput(format!("malformed retention rules: {e}")))?;
        Self::try_from(document)
    }

    /// Repository default retention in days.
    #[must_use]
    pub const fn default_retention_days(&self) -> u32 {
        self.default_retention_days
    }

    /// Branch overrides, in the order they were given.
    #[must_use]
    pub fn branches(&self) -> &[RetentionRule] {
        &self.branches
    }

    /// Returns the override for a branch, if any.
    #[must_use]
    pub fn rule_for(&self, branch_id: &str) -> Option<&RetentionRule> {
        self.branches.iter().find(|rule| rule.branch_id == branch_id)
    }

    /// Converts back into the wire format.
    #[must_use]
    pub fn to_document(&self) -> GcRulesDocument {
        GcRulesDocument {
            default_retention_days: i64::from(self.default_retention_days),
            branches: self
                .branches
                .iter()
                .map(|rule| GcRuleDocument {
                    branch_id: rule.branch_id.clone(),
                    retention_days: i64::from(rule.retention_days),
                })
                .collect(),
        }
    }
}

/// Wire format of a retention rule set, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcRulesDocument {
    /// Repository default retention.
    pub default_retention_days: i64,
    /// Branch overrides.
    #[serde(default)]
    pub branches: Vec<GcRuleDocument>,
}

/// Wire format of one branch rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcRuleDocument {
    /// Branch name.
    pub branch_id: String,
    /// Retention in days.
    pub retention_days: i64,
}

fn days_from_wire(value: i64, what: &str) -> Result<u32> {
    if value < 0 {
        return Err(Error::Validation(format!(
            "negative retention days ({value}) for {what}"
        )));
    }
    u32::try_from(value)
        .map_err(|_| Error::Validation(format!("retention days ({value}) too large for {what}")))
}

impl From<GarbageCollectionRules> for GcRulesDocument {
    fn from(rules: GarbageCollectionRules) -> Self {
        rules.to_document()
    }
}

impl TryFrom<GcRulesDocument> for GarbageCollectionRules {
    type Error = Error;

    fn try_from(document: GcRulesDocument) -> Result<Self> {
        let default_days = days_from_wire(document.default_retention_days, "default")?;
        let branches = document
            .branches
            .into_iter()
            .map(|rule| {
                let days = days_from_wire(
                    rule.retention_days,
                    &format!("branch '{}'", rule.branch_id),
                )?;
                Ok(RetentionRule::new(rule.branch_id, days))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(default_days, branches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_branch_rejected() {
        let err = GarbageCollectionRules::new(
            5,
            vec![RetentionRule::new("a", 1), RetentionRule::new("a", 3)],
        )
        .expect_err("duplicate must be rejected");
        assert!(matches!(err, Error::Validation(msg) if msg.contains("'a'")));
    }

    #[test]
    fn test_negative_days_rejected() {
        let json = r#"{"default_retention_days": 5, "branches": [{"branch_id": "a", "retention_days": -1}]}"#;
        let err = GarbageCollectionRules::from_json(json).expect_err("negative must be rejected");
        assert!(matches!(err, Error::Validation(_)));

        let json = r#"{"default_retention_days": -2}"#;
        assert!(matches!(
            GarbageCollectionRules::from_json(json),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_from_json_keeps_order() {
        let json = r#"{"default_retention_days": 7, "branches": [
            {"branch_id": "b", "retention_days": 3},
            {"branch_id": "a", "retention_days": 1}
        ]}"#;
        let rules = GarbageCollectionRules::from_json(json).expect("valid rules");
        assert_eq!(rules.default_retention_days(), 7);
        let names: Vec<&str> = rules.branches().iter().map(|r| r.branch_id.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(rules.rule_for("a").map(|r| r.retention_days), Some(1));
        assert!(rules.rule_for("main").is_none());
    }

    #[test]
    fn test_malformed_json_is_invalid_input() {
        assert!(matches!(
            GarbageCollectionRules::from_json("{"),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_document_roundtrip_preserves_rules() {
        let rules =
            GarbageCollectionRules::new(2, vec![RetentionRule::new("dev", 9)]).expect("valid");
        let back = GarbageCollectionRules::try_from(rules.to_document()).expect("valid");
        assert_eq!(rules, back);
    }
}
