//! Commit graph types and identifiers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Identifier of an immutable commit.
    CommitId
);

string_id!(
    /// Identifier of a tree (path to address mapping) referenced by commits.
    TreeId
);

string_id!(
    /// Opaque key of a physical blob, relative to the storage namespace.
    ///
    /// Many logical paths across many commits may share one address.
    ObjectAddress
);

/// Mapping of logical paths to object addresses at one commit.
pub type Tree = BTreeMap<String, ObjectAddress>;

/// An immutable commit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Commit identifier.
    pub id: CommitId,
    /// Parent commits; empty for a root, more than one for a merge.
    #[serde(default)]
    pub parents: Vec<CommitId>,
    /// Creation time, used to timestamp deletion events.
    pub created_at: DateTime<Utc>,
    /// Tree of this commit.
    pub tree: TreeId,
}

/// A live branch pointer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    /// Branch name.
    pub name: String,
    /// Current tip commit.
    pub tip: CommitId,
}

/// Former tip of a deleted branch, still present in storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DanglingRoot {
    /// The dangling commit.
    pub commit: CommitId,
    /// Name of the deleted branch, when known.
    #[serde(default)]
    pub branch: Option<String>,
    /// When the branch was deleted, when known.
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A root the ancestry walk starts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkRoot {
    /// A live branch tip.
    Live(Branch),
    /// A dangling commit left behind by branch deletion.
    Dangling(DanglingRoot),
}

impl WalkRoot {
    /// Returns the tip commit of this root.
    #[must_use]
    pub const fn tip(&self) -> &CommitId {
        match self {
            Self::Live(branch) => &branch.tip,
            Self::Dangling(root) => &root.commit,
        }
    }

    /// Returns a label suitable for logs.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Live(branch) => branch.name.clone(),
            Self::Dangling(root) => root.branch.as_ref().map_or_else(
                || format!("dangling:{}", root.commit),
                |name| format!("deleted:{name}"),
            ),
        }
    }

    /// Returns `true` for a live branch.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Live(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_display_and_order() {
        let a = ObjectAddress::new("data/a");
        let b = ObjectAddress::from("data/b");
        assert!(a < b);
        assert_eq!(a.to_string(), "data/a");
        assert_eq!(CommitId::from("c1".to_string()).as_str(), "c1");
    }

    #[test]
    fn test_walk_root_label() {
        let live = WalkRoot::Live(Branch {
            name: "main".to_string(),
            tip: CommitId::new("c1"),
        });
        assert_eq!(live.label(), "main");
        assert!(live.is_live());

        let dangling = WalkRoot::Dangling(DanglingRoot {
            commit: CommitId::new("c9"),
            branch: None,
            deleted_at: None,
        });
        assert_eq!(dangling.label(), "dangling:c9");
        assert_eq!(dangling.tip().as_str(), "c9");
    }

    #[test]
    fn test_commit_deserializes_without_parents() {
        let json = r#"{"id":"c0","created_at":"2024-01-01T00:00:00Z","tree":"t0"}"#;
        let commit: Commit = serde_json::from_str(json).expect("parse commit");
        assert!(commit.parents.is_empty());
        assert_eq!(commit.tree.as_str(), "t0");
    }
}
