//! Local filesystem bulk remover.

use super::{BulkRemover, DeleteOutcome, StorageType, log_attempt, namespace_for};
use crate::models::{FailedRemoval, ObjectAddress};
use crate::{Error, Result};
use std::io::ErrorKind;
use std::path::Component;

/// Bulk remover for `local://` namespaces.
///
/// Deletes one file per key. A missing file is reported as already absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalBulkRemover;

impl LocalBulkRemover {
    /// Creates a local remover.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn check_key(key: &ObjectAddress) -> Result<()> {
    let escapes = std::path::Path::new(key.as_str().trim_start_matches('/'))
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));
    if escapes || key.as_str().trim_start_matches('/').is_empty() {
        return Err(Error::InvalidInput(format!("key '{key}' escapes namespace")));
    }
    Ok(())
}

impl BulkRemover for LocalBulkRemover {
    fn storage_type(&self) -> StorageType {
        StorageType::Local
    }

    fn construct_remove_key_names(
        &self,
        keys: &[ObjectAddress],
        storage_namespace: &str,
    ) -> Result<Vec<String>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let namespace = namespace_for(StorageType::Local, storage_namespace)?;
        keys.iter()
            .map(|k| {
                check_key(k)?;
                Ok(format!("/{}", namespace.key_path(k.as_str())))
            })
            .collect()
    }

    fn delete_objects(&self, keys: &[ObjectAddress], storage_namespace: &str) -> DeleteOutcome {
        if keys.is_empty() {
            return DeleteOutcome::default();
        }
        let namespace = match namespace_for(StorageType::Local, storage_namespace) {
            Ok(namespace) => namespace,
            Err(e) => return DeleteOutcome::all_failed(keys, &e.to_string()),
        };

        let mut outcome = DeleteOutcome::default();
        let mut attempted = Vec::with_capacity(keys.len());
        for key in keys {
            if let Err(e) = check_key(key) {
                outcome
                    .failed
                    .push(FailedRemoval::new(key.clone(), e.to_string()));
                continue;
            }
            let path = format!("/{}", namespace.key_path(key.as_str()));
            match std::fs::remove_file(&path) {
                Ok(()) => outcome.deleted.push(key.clone()),
                Err(e) if e.kind() == ErrorKind::NotFound => outcome
                    .failed
                    .push(FailedRemoval::already_absent(key.clone())),
                Err(e) => outcome
                    .failed
                    .push(FailedRemoval::new(key.clone(), e.to_string())),
            }
            attempted.push(path);
        }
        log_attempt(StorageType::Local, &attempted);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn namespace(dir: &std::path::Path) -> String {
        format!("local://{}", dir.display())
    }

    #[test]
    fn test_deletes_files_and_reports_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("data")).expect("mkdir");
        std::fs::write(dir.path().join("data/a"), b"a").expect("write");

        let keys = vec![ObjectAddress::new("data/a"), ObjectAddress::new("data/b")];
        let outcome = LocalBulkRemover::new().delete_objects(&keys, &namespace(dir.path()));

        assert_eq!(outcome.deleted, vec![ObjectAddress::new("data/a")]);
        assert!(outcome.failed[0].already_absent);
        assert!(!dir.path().join("data/a").exists());
    }

    #[test]
    fn test_rejects_parent_components() {
        let dir = tempfile::tempdir().expect("tempdir");
        let keys = vec![ObjectAddress::new("../outside")];
        let outcome = LocalBulkRemover::new().delete_objects(&keys, &namespace(dir.path()));
        assert!(outcome.deleted.is_empty());
        assert!(!outcome.failed[0].already_absent);
    }

    #[test]
    fn test_key_names_are_absolute_paths() {
        let names = LocalBulkRemover::new()
            .construct_remove_key_names(&[ObjectAddress::new("/x/y")], "local:///data/repo")
            .expect("names");
        assert_eq!(names, vec!["/data/repo/x/y"]);
    }
}
