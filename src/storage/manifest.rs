//! Mark manifest persistence.
//!
//! Manifests are written once per mark and read by every sweep of that mark,
//! possibly after a process restart. The filesystem store writes each
//! manifest atomically (temp file + rename) together with a SHA-256 checksum
//! of its candidate list, so a torn or edited file is detected instead of
//! silently sweeping the wrong set.
//!
//! # Layout
//!
//! ```text
//! <root>/<repository>/mark_id=<mark>/manifest.json
//! <root>/<repository>/mark_id=<mark>/sweep_report_<unix_millis>.json
//! ```

use crate::models::{MarkId, MarkManifest, SweepReport};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Manifest envelope format version.
const MANIFEST_VERSION: u32 = 1;

const MANIFEST_FILE: &str = "manifest.json";
const REPORT_PREFIX: &str = "sweep_report_";

/// Durable storage for mark manifests and sweep reports.
pub trait ManifestStore: Send + Sync {
    /// Stores a manifest, replacing any previous manifest with the same id.
    fn put_manifest(&self, manifest: &MarkManifest) -> Result<()>;

    /// Loads a manifest.
    ///
    /// Fails with [`Error::MarkNotFound`] when no manifest exists.
    fn get_manifest(&self, repository: &str, mark_id: &MarkId) -> Result<MarkManifest>;

    /// Lists stored mark ids for a repository, oldest first.
    fn list_marks(&self, repository: &str) -> Result<Vec<MarkId>>;

    /// Stores a sweep report next to its manifest.
    fn put_report(&self, repository: &str, report: &SweepReport) -> Result<()>;

    /// Returns the most recent sweep report for a mark, if any.
    fn latest_report(&self, repository: &str, mark_id: &MarkId) -> Result<Option<SweepReport>>;
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredManifest {
    version: u32,
    checksum: String,
    manifest: MarkManifest,
}

/// Computes the checksum that guards a manifest's candidate list.
#[must_use]
pub fn manifest_checksum(manifest: &MarkManifest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(manifest.mark_id.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(manifest.storage_namespace.as_bytes());
    for address in &manifest.addresses {
        hasher.update(b"\n");
        hasher.update(address.as_str().as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Rejects path components that could escape the store root.
fn validate_component(kind: &str, value: &str) -> Result<()> {
    let valid = !value.is_empty()
        && value != "."
        && value != ".."
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("invalid {kind} '{value}'")))
    }
}

fn io_error(operation: &str, path: &Path, e: &std::io::Error) -> Error {
    Error::OperationFailed {
        operation: operation.to_string(),
        cause: format!("{}: {e}", path.display()),
    }
}

/// Filesystem-backed manifest store.
#[derive(Debug, Clone)]
pub struct FilesystemManifestStore {
    root: PathBuf,
}

impl FilesystemManifestStore {
    /// Creates a store rooted at `root`. Directories are created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn mark_dir(&self, repository: &str, mark_id: &MarkId) -> Result<PathBuf> {
        validate_component("repository", repository)?;
        mark_id.validate()?;
        Ok(self
            .root
            .join(repository)
            .join(format!("mark_id={}", mark_id.as_str())))
    }

    fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
        let dir = path
            .parent()
            .ok_or_else(|| Error::InvalidInput(format!("no parent for {}", path.display())))?;
        fs::create_dir_all(dir).map_err(|e| io_error("create_manifest_dir", dir, &e))?;

        let tmp = path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp).map_err(|e| io_error("create_temp_file", &tmp, &e))?;
        file.write_all(contents)
            .map_err(|e| io_error("write_temp_file", &tmp, &e))?;
        file.sync_all()
            .map_err(|e| io_error("sync_temp_file", &tmp, &e))?;
        drop(file);
        fs::rename(&tmp, path).map_err(|e| io_error("rename_temp_file", path, &e))
    }
}

impl ManifestStore for FilesystemManifestStore {
    fn put_manifest(&self, manifest: &MarkManifest) -> Result<()> {
        let dir = self.mark_dir(&manifest.repository, &manifest.mark_id)?;
        let stored = StoredManifest {
            version: MANIFEST_VERSION,
            checksum: manifest_checksum(manifest),
            manifest: manifest.clone(),
        };
        let json = serde_json::to_vec_pretty(&stored).map_err(|e| Error::OperationFailed {
            operation: "serialize_manifest".to_string(),
            cause: e.to_string(),
        })?;
        Self::write_atomic(&dir.join(MANIFEST_FILE), &json)
    }

    fn get_manifest(&self, repository: &str, mark_id: &MarkId) -> Result<MarkManifest> {
        let path = self.mark_dir(repository, mark_id)?.join(MANIFEST_FILE);
        let contents = match fs::read(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::MarkNotFound(mark_id.to_string()));
            },
            Err(e) => return Err(io_error("read_manifest", &path, &e)),
        };
        let corrupt = |cause: String| Error::ManifestCorrupt {
            mark_id: mark_id.to_string(),
            cause,
        };
        let stored: StoredManifest =
            serde_json::from_slice(&contents).map_err(|e| corrupt(e.to_string()))?;
        if stored.version != MANIFEST_VERSION {
            return Err(corrupt(format!("unsupported version {}", stored.version)));
        }
        if stored.manifest.mark_id != *mark_id {
            return Err(corrupt(format!(
                "manifest belongs to mark '{}'",
                stored.manifest.mark_id
            )));
        }
        if manifest_checksum(&stored.manifest) != stored.checksum {
            return Err(corrupt("checksum mismatch".to_string()));
        }
        Ok(stored.manifest)
    }

    fn list_marks(&self, repository: &str) -> Result<Vec<MarkId>> {
        validate_component("repository", repository)?;
        let dir = self.root.join(repository);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error("list_marks", &dir, &e)),
        };
        let mut marks: Vec<(std::time::SystemTime, MarkId)> = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(id) = name.to_str().and_then(|n| n.strip_prefix("mark_id=")) else {
                continue;
            };
            if !entry.path().join(MANIFEST_FILE).exists() {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            marks.push((modified, MarkId::new(id)));
        }
        marks.sort();
        Ok(marks.into_iter().map(|(_, id)| id).collect())
    }

    fn put_report(&self, repository: &str, report: &SweepReport) -> Result<()> {
        let dir = self.mark_dir(repository, &report.mark_id)?;
        let json = serde_json::to_vec_pretty(report).map_err(|e| Error::OperationFailed {
            operation: "serialize_report".to_string(),
            cause: e.to_string(),
        })?;
        let name = format!(
            "{REPORT_PREFIX}{:013}.json",
            report.started_at.timestamp_millis()
        );
        Self::write_atomic(&dir.join(name), &json)
    }

    fn latest_report(&self, repository: &str, mark_id: &MarkId) -> Result<Option<SweepReport>> {
        let dir = self.mark_dir(repository, mark_id)?;
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error("list_reports", &dir, &e)),
        };
        let latest = entries
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name().to_str()?.to_string();
                (name.starts_with(REPORT_PREFIX) && name.ends_with(".json"))
                    .then(|| entry.path())
            })
            .max();
        let Some(path) = latest else {
            return Ok(None);
        };
        let contents = fs::read(&path).map_err(|e| io_error("read_report", &path, &e))?;
        serde_json::from_slice(&contents)
            .map(Some)
            .map_err(|e| Error::OperationFailed {
                operation: "parse_report".to_string(),
                cause: format!("{}: {e}", path.display()),
            })
    }
}

/// In-memory manifest store, for tests and embedding.
#[derive(Debug, Default)]
pub struct InMemoryManifestStore {
    manifests: Mutex<HashMap<(String, MarkId), MarkManifest>>,
    reports: Mutex<HashMap<(String, MarkId), Vec<SweepReport>>>,
}

impl InMemoryManifestStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of reports stored for a mark.
    #[must_use]
    pub fn report_count(&self, repository: &str, mark_id: &MarkId) -> usize {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(repository.to_string(), mark_id.clone()))
            .map_or(0, Vec::len)
    }
}

impl ManifestStore for InMemoryManifestStore {
    fn put_manifest(&self, manifest: &MarkManifest) -> Result<()> {
        self.manifests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                (manifest.repository.clone(), manifest.mark_id.clone()),
                manifest.clone(),
            );
        Ok(())
    }

    fn get_manifest(&self, repository: &str, mark_id: &MarkId) -> Result<MarkManifest> {
        self.manifests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(repository.to_string(), mark_id.clone()))
            .cloned()
            .ok_or_else(|| Error::MarkNotFound(mark_id.to_string()))
    }

    fn list_marks(&self, repository: &str) -> Result<Vec<MarkId>> {
        let manifests = self
            .manifests
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut marks: Vec<(chrono::DateTime<chrono::Utc>, MarkId)> = manifests
            .iter()
            .filter(|((repo, _), _)| repo == repository)
            .map(|((_, id), manifest)| (manifest.created_at, id.clone()))
            .collect();
        marks.sort();
        Ok(marks.into_iter().map(|(_, id)| id).collect())
    }

    fn put_report(&self, repository: &str, report: &SweepReport) -> Result<()> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry((repository.to_string(), report.mark_id.clone()))
            .or_default()
            .push(report.clone());
        Ok(())
    }

    fn latest_report(&self, repository: &str, mark_id: &MarkId) -> Result<Option<SweepReport>> {
        Ok(self
            .reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(repository.to_string(), mark_id.clone()))
            .and_then(|reports| reports.last().cloned()))
    }
}
