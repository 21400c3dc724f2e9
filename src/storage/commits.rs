//! Commit graph storage.
//!
//! Commits and trees live in an arena keyed by id, so commits of deleted
//! branches stay readable without any live branch pointer.

use crate::models::{Branch, Commit, CommitId, DanglingRoot, Tree, TreeId, WalkRoot};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

/// Maximum snapshot file size accepted by [`InMemoryCommitStore::load`] (1GiB).
const MAX_SNAPSHOT_SIZE: u64 = 1024 * 1024 * 1024;

/// Read access to a repository's commit graph.
///
/// Implementations must be safe to share across the marker's worker threads.
pub trait CommitStore: Send + Sync {
    /// Repository name.
    fn repository(&self) -> &str;

    /// Storage namespace URI that object addresses are relative to.
    fn storage_namespace(&self) -> &str;

    /// Lists branches that currently exist.
    fn list_branches(&self) -> Result<Vec<Branch>>;

    /// Lists former tips of deleted branches.
    fn list_dangling(&self) -> Result<Vec<DanglingRoot>>;

    /// Reads a commit by id.
    fn get_commit(&self, id: &CommitId) -> Result<Arc<Commit>>;

    /// Reads a tree by id.
    fn read_tree(&self, id: &TreeId) -> Result<Arc<Tree>>;

    /// Takes one consistent snapshot of every walk root.
    fn roots(&self) -> Result<Vec<WalkRoot>> {
        let mut roots: Vec<WalkRoot> = self
            .list_branches()?
            .into_iter()
            .map(WalkRoot::Live)
            .collect();
        roots.extend(self.list_dangling()?.into_iter().map(WalkRoot::Dangling));
        Ok(roots)
    }
}

/// Serialized export of a repository's commit metadata.
///
/// This is the hand-off format between the job that scans commit metadata
/// and the collector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepositorySnapshot {
    /// Repository name.
    pub repository: String,
    /// Storage namespace URI.
    pub storage_namespace: String,
    /// Live branches.
    #[serde(default)]
    pub branches: Vec<Branch>,
    /// Dangling roots of deleted branches.
    #[serde(default)]
    pub dangling: Vec<DanglingRoot>,
    /// Every commit reachable from a branch or a dangling root.
    #[serde(default)]
    pub commits: Vec<Commit>,
    /// Trees by id.
    #[serde(default)]
    pub trees: BTreeMap<TreeId, Tree>,
}

/// Arena-backed commit store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCommitStore {
    repository: String,
    storage_namespace: String,
    branches: BTreeMap<String, CommitId>,
    dangling: Vec<DanglingRoot>,
    commits: HashMap<CommitId, Arc<Commit>>,
    trees: HashMap<TreeId, Arc<Tree>>,
}

impl InMemoryCommitStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new(repository: impl Into<String>, storage_namespace: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            storage_namespace: storage_namespace.into(),
            ..Self::default()
        }
    }

    /// Builds a store from a snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: RepositorySnapshot) -> Self {
        let mut store = Self::new(snapshot.repository, snapshot.storage_namespace);
        for (id, tree) in snapshot.trees {
            store.insert_tree(id, tree);
        }
        for commit in snapshot.commits {
            store.insert_commit(commit);
        }
        for branch in snapshot.branches {
            store.set_branch(branch.name, branch.tip);
        }
        store.dangling = snapshot.dangling;
        store
    }

    /// Loads a JSON snapshot file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let metadata = std::fs::metadata(path).map_err(|e| Error::OperationFailed {
            operation: "read_snapshot".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        if metadata.len() > MAX_SNAPSHOT_SIZE {
            return Err(Error::InvalidInput(format!(
                "snapshot {} exceeds {MAX_SNAPSHOT_SIZE} bytes",
                path.display()
            )));
        }
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_snapshot".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        let snapshot: RepositorySnapshot =
            serde_json::from_str(&contents).map_err(|e| Error::OperationFailed {
                operation: "parse_snapshot".to_string(),
                cause: format!("{}: {e}", path.display()),
            })?;
        Ok(Self::from_snapshot(snapshot))
    }

    /// Exports the store as a snapshot.
    #[must_use]
    pub fn to_snapshot(&self) -> RepositorySnapshot {
        let mut commits: Vec<Commit> = self.commits.values().map(|c| (**c).clone()).collect();
        commits.sort_by(|a, b| a.id.cmp(&b.id));
        RepositorySnapshot {
            repository: self.repository.clone(),
            storage_namespace: self.storage_namespace.clone(),
            branches: self
                .branches
                .iter()
                .map(|(name, tip)| Branch {
                    name: name.clone(),
                    tip: tip.clone(),
                })
                .collect(),
            dangling: self.dangling.clone(),
            commits,
            trees: self
                .trees
                .iter()
                .map(|(id, tree)| (id.clone(), (**tree).clone()))
                .collect(),
        }
    }

    /// Adds a tree.
    pub fn insert_tree(&mut self, id: TreeId, tree: Tree) {
        self.trees.insert(id, Arc::new(tree));
    }

    /// Adds a commit.
    pub fn insert_commit(&mut self, commit: Commit) {
        self.commits.insert(commit.id.clone(), Arc::new(commit));
    }

    /// Creates or moves a branch.
    pub fn set_branch(&mut self, name: impl Into<String>, tip: CommitId) {
        self.branches.insert(name.into(), tip);
    }

    /// Returns the tip of a branch.
    #[must_use]
    pub fn branch_tip(&self, name: &str) -> Option<&CommitId> {
        self.branches.get(name)
    }

    /// Deletes a branch, leaving its tip behind as a dangling root.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the branch does not exist.
    pub fn delete_branch(&mut self, name: &str, deleted_at: Option<DateTime<Utc>>) -> Result<()> {
        let tip = self
            .branches
            .remove(name)
            .ok_or_else(|| Error::InvalidInput(format!("branch '{name}' does not exist")))?;
        self.dangling.push(DanglingRoot {
            commit: tip,
            branch: Some(name.to_string()),
            deleted_at,
        });
        Ok(())
    }
}

impl CommitStore for InMemoryCommitStore {
    fn repository(&self) -> &str {
        &self.repository
    }

    fn storage_namespace(&self) -> &str {
        &self.storage_namespace
    }

    fn list_branches(&self) -> Result<Vec<Branch>> {
        Ok(self
            .branches
            .iter()
            .map(|(name, tip)| Branch {
                name: name.clone(),
                tip: tip.clone(),
            })
            .collect())
    }

    fn list_dangling(&self) -> Result<Vec<DanglingRoot>> {
        Ok(self.dangling.clone())
    }

    fn get_commit(&self, id: &CommitId) -> Result<Arc<Commit>> {
        self.commits
            .get(id)
            .cloned()
            .ok_or_else(|| Error::AncestryRead {
                commit: id.to_string(),
                cause: "commit not found".to_string(),
            })
    }

    fn read_tree(&self, id: &TreeId) -> Result<Arc<Tree>> {
        self.trees
            .get(id)
            .cloned()
            .ok_or_else(|| Error::AncestryRead {
                commit: String::new(),
                cause: format!("tree '{id}' not found"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ObjectAddress;

    fn store() -> InMemoryCommitStore {
        let mut store = InMemoryCommitStore::new("repo", "local:///tmp/repo");
        let mut tree = Tree::new();
        tree.insert("a.txt".to_string(), ObjectAddress::new("data/a"));
        store.insert_tree(TreeId::new("t0"), tree);
        store.insert_commit(Commit {
            id: CommitId::new("c0"),
            parents: Vec::new(),
            created_at: Utc::now(),
            tree: TreeId::new("t0"),
        });
        store.set_branch("main", CommitId::new("c0"));
        store.set_branch("dev", CommitId::new("c0"));
        store
    }

    #[test]
    fn test_roots_lists_live_then_dangling() {
        let mut store = store();
        store.delete_branch("dev", None).expect("delete dev");
        let roots = store.roots().expect("roots");
        assert_eq!(roots.len(), 2);
        assert!(roots[0].is_live());
        assert_eq!(roots[1].label(), "deleted:dev");
    }

    #[test]
    fn test_missing_commit_is_ancestry_error() {
        let store = store();
        let err = store
            .get_commit(&CommitId::new("nope"))
            .expect_err("missing commit");
        assert!(matches!(err, Error::AncestryRead { commit, .. } if commit == "nope"));
    }

    #[test]
    fn test_delete_unknown_branch_fails() {
        let mut store = store();
        assert!(matches!(
            store.delete_branch("ghost", None),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_snapshot_roundtrip_through_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("snapshot.json");
        let json = serde_json::to_string(&store().to_snapshot()).expect("serialize");
        std::fs::write(&path, json).expect("write");

        let loaded = InMemoryCommitStore::load(&path).expect("load");
        assert_eq!(loaded.repository(), "repo");
        assert_eq!(loaded.branch_tip("main"), Some(&CommitId::new("c0")));
        let tree = loaded.read_tree(&TreeId::new("t0")).expect("tree");
        assert_eq!(tree.get("a.txt"), Some(&ObjectAddress::new("data/a")));
    }
}
