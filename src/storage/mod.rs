//! Storage layer abstraction.
//!
//! This module provides the three stores a collection run talks to:
//! - **Commits**: read-only commit graph (branches, dangling roots, commits, trees)
//! - **Manifests**: durable mark manifests and sweep reports
//! - **Removers**: backend-specific bulk deletion (S3, Azure Blob, local filesystem)

// Allow significant_drop_tightening - lock guards in the in-memory stores are short-lived.
#![allow(clippy::significant_drop_tightening)]
// Allow match_same_arms for explicit enum handling.
#![allow(clippy::match_same_arms)]

pub mod commits;
pub mod manifest;
pub mod remover;

pub use commits::{CommitStore, InMemoryCommitStore, RepositorySnapshot};
pub use manifest::{
    FilesystemManifestStore, InMemoryManifestStore, ManifestStore, manifest_checksum,
};
pub use remover::{
    AzureBlobBatchApi, AzureBulkRemover, BlobDeleteStatus, BulkRemover, DeleteOutcome,
    HttpBlobBatchApi, LocalBulkRemover, RemoverClients, S3BulkRemover, S3DeleteApi,
    S3DeleteError, S3DeleteResponse, SdkS3DeleteApi, StorageNamespace, StorageType,
    build_remover,
};
