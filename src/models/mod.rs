//! Data models for lakesweep.
//!
//! Commit graph records, retention rules, and the artifacts exchanged between
//! the mark and sweep phases.

#[macro_use]
mod commit;
mod manifest;
mod rules;

pub use commit::{Branch, Commit, CommitId, DanglingRoot, ObjectAddress, Tree, TreeId, WalkRoot};
pub use manifest::{FailedRemoval, MarkId, MarkManifest, SweepReport};
pub use rules::{GarbageCollectionRules, GcRuleDocument, GcRulesDocument, RetentionRule};
