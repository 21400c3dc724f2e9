//! Bulk object removal.
//!
//! One [`BulkRemover`] per backend family, selected by the [`StorageType`]
//! parsed from a storage namespace URI:
//!
//! | Scheme | Backend | Max batch | Native key |
//! |--------|---------|-----------|------------|
//! | `s3://bucket/prefix` | S3 | 1000 | `prefix/<key>` |
//! | `https://<account>.blob.core.windows.net/<container>/prefix` | Azure Blob | 256 | full blob URL |
//! | `azure://<account>/<container>/prefix` | Azure Blob | 256 | full blob URL |
//! | `local:///abs/path` | Local filesystem | 1000 | `/abs/path/<key>` |
//!
//! Removers never propagate a backend failure: every requested key ends up
//! either in [`DeleteOutcome::deleted`] or in [`DeleteOutcome::failed`].
//!
//! The S3 remover calls `DeleteObjects` through [`SdkS3DeleteApi`] (AWS SDK);
//! the Azure remover posts blob batches through [`HttpBlobBatchApi`]. Both sit
//! behind adapter traits so tests can substitute them.

mod aws;
mod azure;
mod blob_batch;
mod local;
mod s3;

pub use aws::SdkS3DeleteApi;
pub use azure::{AzureBlobBatchApi, AzureBulkRemover, BlobDeleteStatus};
pub use blob_batch::{AZURE_API_VERSION, HttpBlobBatchApi};
pub use local::LocalBulkRemover;
pub use s3::{S3BulkRemover, S3DeleteApi, S3DeleteError, S3DeleteResponse};

use crate::config::StorageSettings;
use crate::models::{FailedRemoval, ObjectAddress};
use crate::{Error, Result};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Number of keys included in the per-batch diagnostic record.
pub const LOGGED_KEYS: usize = 10;

/// Backend family of a storage namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageType {
    /// Amazon S3 or an S3-compatible store.
    S3,
    /// Azure Blob Storage.
    Azure,
    /// Local filesystem.
    Local,
}

impl StorageType {
    /// Per-call object-count ceiling of the backend's bulk delete.
    #[must_use]
    pub const fn max_bulk_size(self) -> usize {
        match self {
            Self::S3 | Self::Local => 1000,
            Self::Azure => 256,
        }
    }

    /// Returns the type as a string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::S3 => "s3",
            Self::Azure => "azure",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "s3" => Ok(Self::S3),
            "azure" | "https" => Ok(Self::Azure),
            "local" | "file" => Ok(Self::Local),
            _ => Err(Error::UnsupportedStorage(s.to_string())),
        }
    }
}

/// A parsed storage namespace URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageNamespace {
    /// Backend family.
    pub storage_type: StorageType,
    /// Bucket (S3), account host (Azure), empty for local.
    pub authority: String,
    /// Path below the authority without surrounding separators.
    pub path: String,
}

impl StorageNamespace {
    /// Parses a namespace URI.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedStorage`] for unknown schemes and
    /// [`Error::InvalidInput`] for malformed URIs.
    pub fn parse(uri: &str) -> Result<Self> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| Error::UnsupportedStorage(uri.to_string()))?;
        let storage_type: StorageType = scheme
            .parse()
            .map_err(|_| Error::UnsupportedStorage(uri.to_string()))?;

        if storage_type == StorageType::Local {
            let path = rest.trim_end_matches('/');
            if !path.starts_with('/') {
                return Err(Error::InvalidInput(format!(
                    "local namespace must be absolute: '{uri}'"
                )));
            }
            return Ok(Self {
                storage_type,
                authority: String::new(),
                path: path.trim_start_matches('/').to_string(),
            });
        }

        let (authority, path) = rest.split_once('/').unwrap_or((rest, ""));
        if authority.is_empty() {
            return Err(Error::InvalidInput(format!(
                "namespace has no bucket or account: '{uri}'"
            )));
        }
        let authority = if scheme.eq_ignore_ascii_case("azure") {
            format!("{authority}.blob.core.windows.net")
        } else if storage_type == StorageType::Azure && !authority.ends_with(".blob.core.windows.net")
        {
            return Err(Error::UnsupportedStorage(uri.to_string()));
        } else {
            authority.to_string()
        };
        Ok(Self {
            storage_type,
            authority,
            path: path.trim_matches('/').to_string(),
        })
    }

    /// Joins a logical key onto the namespace path.
    ///
    /// A leading `/` on the key is ignored.
    #[must_use]
    pub fn key_path(&self, key: &str) -> String {
        let key = key.trim_start_matches('/');
        if self.path.is_empty() {
            key.to_string()
        } else {
            format!("{}/{key}", self.path)
        }
    }
}

/// Result of one bulk delete call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    /// Logical keys the backend confirmed as removed.
    pub deleted: Vec<ObjectAddress>,
    /// Logical keys that were not confirmed.
    pub failed: Vec<FailedRemoval>,
}

impl DeleteOutcome {
    /// Marks every key as failed with the same reason.
    #[must_use]
    pub fn all_failed(keys: &[ObjectAddress], reason: &str) -> Self {
        Self {
            deleted: Vec::new(),
            failed: keys
                .iter()
                .map(|k| FailedRemoval::new(k.clone(), reason))
                .collect(),
        }
    }

    /// Total keys accounted for.
    #[must_use]
    pub fn len(&self) -> usize {
        self.deleted.len() + self.failed.len()
    }

    /// Returns `true` if no key was accounted for.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty() && self.failed.is_empty()
    }
}

/// Backend-specific bulk deletion.
pub trait BulkRemover: Send + Sync {
    /// Backend family.
    fn storage_type(&self) -> StorageType;

    /// Per-call object-count ceiling.
    fn max_bulk_size(&self) -> usize {
        self.storage_type().max_bulk_size()
    }

    /// Translates logical keys into backend-native key names.
    ///
    /// Empty input yields empty output.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace does not belong to this backend.
    fn construct_remove_key_names(
        &self,
        keys: &[ObjectAddress],
        storage_namespace: &str,
    ) -> Result<Vec<String>>;

    /// Deletes one batch and reports which keys the backend confirmed.
    ///
    /// Issues no backend call for empty input. Never fails: backend errors
    /// become entries in [`DeleteOutcome::failed`].
    fn delete_objects(&self, keys: &[ObjectAddress], storage_namespace: &str) -> DeleteOutcome;
}

/// Parses `storage_namespace` and checks it belongs to `expected`.
pub(crate) fn namespace_for(
    expected: StorageType,
    storage_namespace: &str,
) -> Result<StorageNamespace> {
    let namespace = StorageNamespace::parse(storage_namespace)?;
    if namespace.storage_type == expected {
        Ok(namespace)
    } else {
        Err(Error::InvalidInput(format!(
            "namespace '{storage_namespace}' is not a {expected} namespace"
        )))
    }
}

/// Emits the per-batch diagnostic record.
pub(crate) fn log_attempt(storage_type: StorageType, keys: &[String]) {
    let shown = &keys[..keys.len().min(LOGGED_KEYS)];
    tracing::debug!(
        storage_type = %storage_type,
        count = keys.len(),
        first_keys = ?shown,
        "Deleting objects"
    );
}

/// Backend SDK adapters available to [`build_remover`].
///
/// Adapters set explicitly win; otherwise, when built
/// [`from_settings`](Self::from_settings), the adapter for a backend is
/// created on first use so a local run never starts an SDK client.
#[derive(Clone, Default)]
pub struct RemoverClients {
    /// S3 bulk delete adapter.
    pub s3: Option<Arc<dyn S3DeleteApi>>,
    /// Azure blob batch adapter.
    pub azure: Option<Arc<dyn AzureBlobBatchApi>>,
    settings: Option<StorageSettings>,
}

impl RemoverClients {
    /// Clients built on demand from object store settings.
    #[must_use]
    pub fn from_settings(settings: StorageSettings) -> Self {
        Self {
            settings: Some(settings),
            ..Self::default()
        }
    }

    /// Sets the S3 adapter.
    #[must_use]
    pub fn with_s3(mut self, api: Arc<dyn S3DeleteApi>) -> Self {
        self.s3 = Some(api);
        self
    }

    /// Sets the Azure adapter.
    #[must_use]
    pub fn with_azure(mut self, api: Arc<dyn AzureBlobBatchApi>) -> Self {
        self.azure = Some(api);
        self
    }

    fn s3_api(&self) -> Result<Option<Arc<dyn S3DeleteApi>>> {
        if let Some(api) = &self.s3 {
            return Ok(Some(Arc::clone(api)));
        }
        self.settings
            .as_ref()
            .map(|settings| -> Result<Arc<dyn S3DeleteApi>> {
                Ok(Arc::new(SdkS3DeleteApi::from_settings(&settings.s3)?))
            })
            .transpose()
    }

    fn azure_api(&self) -> Result<Option<Arc<dyn AzureBlobBatchApi>>> {
        if let Some(api) = &self.azure {
            return Ok(Some(Arc::clone(api)));
        }
        self.settings
            .as_ref()
            .map(|settings| -> Result<Arc<dyn AzureBlobBatchApi>> {
                Ok(Arc::new(HttpBlobBatchApi::from_settings(&settings.azure)?))
            })
            .transpose()
    }
}

impl fmt::Debug for RemoverClients {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoverClients")
            .field("s3", &self.s3.is_some())
            .field("azure", &self.azure.is_some())
            .field("from_settings", &self.settings.is_some())
            .finish()
    }
}

/// Selects the remover for a storage namespace.
///
/// # Errors
///
/// Returns [`Error::UnsupportedStorage`] if the scheme is unknown or no
/// adapter is available for its backend, or the adapter's construction
/// error.
pub fn build_remover(
    storage_namespace: &str,
    clients: &RemoverClients,
) -> Result<Arc<dyn BulkRemover>> {
    let namespace = StorageNamespace::parse(storage_namespace)?;
    let missing = || {
        Error::UnsupportedStorage(format!(
            "{storage_namespace} (no {} client configured)",
            namespace.storage_type
        ))
    };
    match namespace.storage_type {
        StorageType::S3 => {
            let api = clients.s3_api()?.ok_or_else(missing)?;
            Ok(Arc::new(S3BulkRemover::new(api)))
        },
        StorageType::Azure => {
            let api = clients.azure_api()?.ok_or_else(missing)?;
            Ok(Arc::new(AzureBulkRemover::new(api)))
        },
        StorageType::Local => Ok(Arc::new(LocalBulkRemover::new())),
    }
}
