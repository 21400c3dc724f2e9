//! Azure Blob bulk remover.
//!
//! The blob batch API reports a status per sub-request but the SDK call
//! itself throws on transport or authentication failure, so the remover
//! catches that here and fails the whole batch.

use super::{BulkRemover, DeleteOutcome, StorageType, log_attempt, namespace_for};
use crate::Result;
use crate::models::{FailedRemoval, ObjectAddress};
use std::collections::HashMap;
use std::sync::Arc;

/// Status of one sub-request of a blob batch delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobDeleteStatus {
    /// 202 Accepted.
    Deleted,
    /// 404 `BlobNotFound`.
    NotFound,
    /// Any other status, with the service error.
    Failed(String),
}

/// Adapter over an Azure SDK's blob batch delete.
pub trait AzureBlobBatchApi: Send + Sync {
    /// Deletes up to 256 blobs by URL in one batch.
    ///
    /// Returns one status per input URL, in input order.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch request as a whole failed.
    fn delete_blobs(&self, blob_urls: &[String]) -> Result<Vec<BlobDeleteStatus>>;
}

/// Bulk remover for Azure Blob namespaces.
pub struct AzureBulkRemover {
    api: Arc<dyn AzureBlobBatchApi>,
}

impl AzureBulkRemover {
    /// Creates a remover over an SDK adapter.
    #[must_use]
    pub fn new(api: Arc<dyn AzureBlobBatchApi>) -> Self {
        Self { api }
    }
}

impl BulkRemover for AzureBulkRemover {
    fn storage_type(&self) -> StorageType {
        StorageType::Azure
    }

    fn construct_remove_key_names(
        &self,
        keys: &[ObjectAddress],
        storage_namespace: &str,
    ) -> Result<Vec<String>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let namespace = namespace_for(StorageType::Azure, storage_namespace)?;
        Ok(keys
            .iter()
            .map(|k| format!("https://{}/{}", namespace.authority, namespace.key_path(k.as_str())))
            .collect())
    }

    fn delete_objects(&self, keys: &[ObjectAddress], storage_namespace: &str) -> DeleteOutcome {
        if keys.is_empty() {
            return DeleteOutcome::default();
        }
        let urls = match self.construct_remove_key_names(keys, storage_namespace) {
            Ok(urls) => urls,
            Err(e) => return DeleteOutcome::all_failed(keys, &e.to_string()),
        };
        // Addresses that resolve to the same blob share one sub-request.
        let mut unique: Vec<String> = Vec::with_capacity(urls.len());
        let mut slot_of: HashMap<&str, usize> = HashMap::new();
        let slots: Vec<usize> = urls
            .iter()
            .map(|url| {
                *slot_of.entry(url.as_str()).or_insert_with(|| {
                    unique.push(url.clone());
                    unique.len() - 1
                })
            })
            .collect();
        log_attempt(StorageType::Azure, &unique);

        let statuses = match self.api.delete_blobs(&unique) {
            Ok(statuses) => statuses,
            Err(e) => {
                tracing::warn!(count = keys.len(), error = %e, "Azure blob batch delete failed");
                return DeleteOutcome::all_failed(keys, &e.to_string());
            },
        };

        let mut outcome = DeleteOutcome::default();
        for (address, slot) in keys.iter().zip(slots) {
            match statuses.get(slot) {
                Some(BlobDeleteStatus::Deleted) => outcome.deleted.push(address.clone()),
                Some(BlobDeleteStatus::NotFound) => outcome
                    .failed
                    .push(FailedRemoval::already_absent(address.clone())),
                Some(BlobDeleteStatus::Failed(reason)) => outcome
                    .failed
                    .push(FailedRemoval::new(address.clone(), reason.clone())),
                None => outcome.failed.push(FailedRemoval::new(
                    address.clone(),
                    "not confirmed by backend",
                )),
            }
        }
        outcome
    }
}
