//! S3 bulk remover.

use super::{BulkRemover, DeleteOutcome, StorageType, log_attempt, namespace_for};
use crate::Result;
use crate::models::{FailedRemoval, ObjectAddress};
use std::collections::HashMap;
use std::sync::Arc;

/// Error code S3 reports for a key that does not exist.
const NO_SUCH_KEY: &str = "NoSuchKey";

/// Per-key error from a `DeleteObjects` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3DeleteError {
    /// Native key.
    pub key: String,
    /// S3 error code, e.g. `AccessDenied`.
    pub code: String,
    /// Error message.
    pub message: String,
}

/// Structured `DeleteObjects` response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct S3DeleteResponse {
    /// Native keys reported as deleted.
    pub deleted: Vec<String>,
    /// Per-key errors.
    pub errors: Vec<S3DeleteError>,
}

/// Adapter over an S3 SDK's `DeleteObjects` call.
pub trait S3DeleteApi: Send + Sync {
    /// Deletes up to 1000 keys from `bucket` in one request.
    ///
    /// # Errors
    ///
    /// Returns an error if the request as a whole failed.
    fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<S3DeleteResponse>;
}

/// Bulk remover for S3 namespaces.
pub struct S3BulkRemover {
    api: Arc<dyn S3DeleteApi>,
}

impl S3BulkRemover {
    /// Creates a remover over an SDK adapter.
    #[must_use]
    pub fn new(api: Arc<dyn S3DeleteApi>) -> Self {
        Self { api }
    }
}

impl BulkRemover for S3BulkRemover {
    fn storage_type(&self) -> StorageType {
        StorageType::S3
    }

    fn construct_remove_key_names(
        &self,
        keys: &[ObjectAddress],
        storage_namespace: &str,
    ) -> Result<Vec<String>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let namespace = namespace_for(StorageType::S3, storage_namespace)?;
        Ok(keys.iter().map(|k| namespace.key_path(k.as_str())).collect())
    }

    fn delete_objects(&self, keys: &[ObjectAddress], storage_namespace: &str) -> DeleteOutcome {
        if keys.is_empty() {
            return DeleteOutcome::default();
        }
        let bucket = match namespace_for(StorageType::S3, storage_namespace) {
            Ok(namespace) => namespace.authority,
            Err(e) => return DeleteOutcome::all_failed(keys, &e.to_string()),
        };
        let native = match self.construct_remove_key_names(keys, storage_namespace) {
            Ok(native) => native,
            Err(e) => return DeleteOutcome::all_failed(keys, &e.to_string()),
        };
        // Distinct addresses can share a native key (`/a` and `a`); the key is
        // sent once and its verdict applies to each of them.
        let mut pending: HashMap<&str, Vec<&ObjectAddress>> = HashMap::new();
        let mut request: Vec<String> = Vec::with_capacity(native.len());
        for (key, address) in native.iter().zip(keys) {
            let addresses = pending.entry(key.as_str()).or_default();
            if addresses.is_empty() {
                request.push(key.clone());
            }
            addresses.push(address);
        }
        log_attempt(StorageType::S3, &request);

        let response = match self.api.delete_objects(&bucket, &request) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(bucket = %bucket, count = keys.len(), error = %e, "S3 bulk delete failed");
                return DeleteOutcome::all_failed(keys, &e.to_string());
            },
        };

        let mut outcome = DeleteOutcome::default();
        for key in &response.deleted {
            if let Some(addresses) = pending.remove(key.as_str()) {
                outcome.deleted.extend(addresses.into_iter().cloned());
            }
        }
        for error in &response.errors {
            let Some(addresses) = pending.remove(error.key.as_str()) else {
                continue;
            };
            for address in addresses {
                if error.code == NO_SUCH_KEY {
                    outcome
                        .failed
                        .push(FailedRemoval::already_absent(address.clone()));
                } else {
                    outcome.failed.push(FailedRemoval::new(
                        address.clone(),
                        format!("{}: {}", error.code, error.message),
                    ));
                }
            }
        }
        // Keys the response never mentioned were not confirmed.
        let mut unconfirmed: Vec<&ObjectAddress> = pending.into_values().flatten().collect();
        unconfirmed.sort();
        outcome.failed.extend(
            unconfirmed
                .into_iter()
                .map(|a| FailedRemoval::new(a.clone(), "not confirmed by backend")),
        );
        outcome
    }
}
