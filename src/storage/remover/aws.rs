//! `DeleteObjects` over the AWS SDK.
//!
//! The SDK is async; the adapter owns a small tokio runtime and blocks on
//! each call so sweep workers stay plain threads.

use super::s3::{S3DeleteApi, S3DeleteError, S3DeleteResponse};
use crate::config::S3Settings;
use crate::{Error, Result};
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::operation::delete_objects::DeleteObjectsOutput;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use secrecy::ExposeSecret;
use std::fmt;
use tokio::runtime::Runtime;

/// Worker threads for the SDK runtime.
const RUNTIME_THREADS: usize = 2;

/// [`S3DeleteApi`] backed by an `aws_sdk_s3::Client`.
pub struct SdkS3DeleteApi {
    client: Client,
    runtime: Runtime,
}

impl fmt::Debug for SdkS3DeleteApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SdkS3DeleteApi").finish_non_exhaustive()
    }
}

impl SdkS3DeleteApi {
    /// Builds the client from settings.
    ///
    /// Static credentials are used when both key id and secret are set;
    /// otherwise the default AWS credential chain applies (environment,
    /// profile, instance role).
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot be started.
    pub fn from_settings(settings: &S3Settings) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(RUNTIME_THREADS)
            .thread_name("lakesweep-s3")
            .enable_all()
            .build()
            .map_err(|e| Error::OperationFailed {
                operation: "start_s3_runtime".to_string(),
                cause: e.to_string(),
            })?;

        let region = Region::new(settings.region.clone());
        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(region.clone())
            .force_path_style(settings.force_path_style);
        if let Some(endpoint) = &settings.endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }
        if let (Some(key_id), Some(secret)) = (&settings.access_key_id, &settings.secret_access_key)
        {
            builder = builder.credentials_provider(Credentials::new(
                key_id,
                secret.expose_secret(),
                None,
                None,
                "lakesweep-config",
            ));
        } else {
            let shared = runtime.block_on(
                aws_config::defaults(BehaviorVersion::latest())
                    .region(region)
                    .load(),
            );
            if let Some(provider) = shared.credentials_provider() {
                builder = builder.credentials_provider(provider);
            }
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            runtime,
        })
    }
}

impl S3DeleteApi for SdkS3DeleteApi {
    fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<S3DeleteResponse> {
        let objects = keys
            .iter()
            .map(|key| ObjectIdentifier::builder().key(key).build())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::InvalidInput(format!("s3 object identifier: {e}")))?;
        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(false)
            .build()
            .map_err(|e| Error::InvalidInput(format!("s3 delete request: {e}")))?;

        let output = self
            .runtime
            .block_on(
                self.client
                    .delete_objects()
                    .bucket(bucket)
                    .delete(delete)
                    .send(),
            )
            .map_err(|e| Error::OperationFailed {
                operation: "s3_delete_objects".to_string(),
                cause: DisplayErrorContext(&e).to_string(),
            })?;
        Ok(response_from_output(&output))
    }
}

/// Maps the SDK output onto the remover's response shape.
///
/// Entries without a key cannot be attributed and are dropped; the remover
/// reports their addresses as unconfirmed.
fn response_from_output(output: &DeleteObjectsOutput) -> S3DeleteResponse {
    S3DeleteResponse {
        deleted: output
            .deleted()
            .iter()
            .filter_map(|d| d.key().map(ToString::to_string))
            .collect(),
        errors: output
            .errors()
            .iter()
            .filter_map(|e| {
                Some(S3DeleteError {
                    key: e.key()?.to_string(),
                    code: e.code().unwrap_or("Unknown").to_string(),
                    message: e.message().unwrap_or_default().to_string(),
                })
            })
            .collect(),
    }
}
