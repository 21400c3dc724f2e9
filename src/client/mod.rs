//! Control-plane HTTP client.
//!
//! A blocking client for the repository control plane. Every call goes
//! through [`RetryPolicy::execute`], so 429/5xx responses and transport
//! failures are retried with cancellable backoff.
//!
//! # Example
//!
//! ```rust,ignore
//! use lakesweep::client::ControlPlaneClient;
//!
//! let client = ControlPlaneClient::from_config(&config.control_plane)?;
//! let rules = client.get_gc_rules(&ctx, "example-repo")?;
//! ```

pub mod retry;

pub use retry::{
    Attempt, AttemptOutcome, RetryDecision, RetryPolicy, TransportError, TransportErrorKind,
    is_retryable_status, parse_retry_after,
};

use crate::config::ControlPlaneConfig;
use crate::context::RunContext;
use crate::models::{CommitId, GarbageCollectionRules};
use crate::{Error, Result};
use reqwest::Method;
use reqwest::Url;
use reqwest::blocking::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

/// Maximum response body bytes kept in [`Error::Http`].
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Serialize)]
struct BranchCreation<'a> {
    name: &'a str,
    source: &'a str,
}

#[derive(Debug, Serialize)]
struct CommitCreation<'a> {
    message: &'a str,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    metadata: &'a BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    id: String,
}

/// Blocking control-plane client with retries.
pub struct ControlPlaneClient {
    http: Client,
    base: Url,
    access_key_id: Option<String>,
    secret_access_key: Option<SecretString>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for ControlPlaneClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlPlaneClient")
            .field("base", &self.base.as_str())
            .field("access_key_id", &self.access_key_id)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl ControlPlaneClient {
    /// Builds a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an unparseable endpoint and
    /// [`Error::OperationFailed`] if the HTTP client cannot be built.
    pub fn from_config(config: &ControlPlaneConfig) -> Result<Self> {
        let base = Url::parse(&config.endpoint_url).map_err(|e| {
            Error::InvalidInput(format!("invalid endpoint '{}': {e}", config.endpoint_url))
        })?;
        if base.cannot_be_a_base() {
            return Err(Error::InvalidInput(format!(
                "invalid endpoint '{}': not a base URL",
                config.endpoint_url
            )));
        }
        let http = Client::builder()
            .user_agent(format!("lakesweep/{}", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build()
            .map_err(|e| Error::OperationFailed {
                operation: "build_http_client".to_string(),
                cause: e.to_string(),
            })?;

        Ok(Self {
            http,
            base,
            access_key_id: config.access_key_id.clone(),
            secret_access_key: config.secret_access_key.clone(),
            retry: config.retry,
        })
    }

    /// Retry policy in use.
    #[must_use]
    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Fetches the repository's retention rules.
    ///
    /// # Errors
    ///
    /// Returns a transport, HTTP or validation error.
    #[instrument(name = "lakesweep.client.get_gc_rules", skip(self, ctx), fields(component = "client"))]
    pub fn get_gc_rules(&self, ctx: &RunContext, repository: &str) -> Result<GarbageCollectionRules> {
        let url = self.url(&["repositories", repository, "settings", "gc_rules"])?;
        let body = self.send(ctx, "get_gc_rules", Method::GET, &url, None)?.text_body()?;
        GarbageCollectionRules::from_json(&body)
    }

    /// Replaces the repository's retention rules.
    ///
    /// # Errors
    ///
    /// Returns a transport or HTTP error.
    #[instrument(name = "lakesweep.client.set_gc_rules", skip(self, ctx, rules), fields(component = "client"))]
    pub fn set_gc_rules(
        &self,
        ctx: &RunContext,
        repository: &str,
        rules: &GarbageCollectionRules,
    ) -> Result<()> {
        let url = self.url(&["repositories", repository, "settings", "gc_rules"])?;
        let body = serialize("set_gc_rules", rules)?;
        self.send(ctx, "set_gc_rules", Method::PUT, &url, Some(body))?;
        Ok(())
    }

    /// Creates `branch` from `source` (a branch or commit).
    ///
    /// # Errors
    ///
    /// Returns a transport or HTTP error.
    #[instrument(name = "lakesweep.client.create_branch", skip(self, ctx), fields(component = "client"))]
    pub fn create_branch(
        &self,
        ctx: &RunContext,
        repository: &str,
        branch: &str,
        source: &str,
    ) -> Result<()> {
        let url = self.url(&["repositories", repository, "branches"])?;
        let body = serialize(
            "create_branch",
            &BranchCreation {
                name: branch,
                source,
            },
        )?;
        self.send(ctx, "create_branch", Method::POST, &url, Some(body))?;
        Ok(())
    }

    /// Deletes a branch.
    ///
    /// # Errors
    ///
    /// Returns a transport or HTTP error.
    #[instrument(name = "lakesweep.client.delete_branch", skip(self, ctx), fields(component = "client"))]
    pub fn delete_branch(&self, ctx: &RunContext, repository: &str, branch: &str) -> Result<()> {
        let url = self.url(&["repositories", repository, "branches", branch])?;
        self.send(ctx, "delete_branch", Method::DELETE, &url, None)?;
        Ok(())
    }

    /// Commits staged changes on a branch and returns the new commit id.
    ///
    /// # Errors
    ///
    /// Returns a transport or HTTP error, or [`Error::OperationFailed`] if
    /// the response carries no commit id.
    #[instrument(name = "lakesweep.client.commit", skip(self, ctx, metadata), fields(component = "client"))]
    pub fn commit(
        &self,
        ctx: &RunContext,
        repository: &str,
        branch: &str,
        message: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<CommitId> {
        let url = self.url(&["repositories", repository, "branches", branch, "commits"])?;
        let body = serialize("commit", &CommitCreation { message, metadata })?;
        let text = self
            .send(ctx, "commit", Method::POST, &url, Some(body))?
            .text_body()?;
        let parsed: CommitResponse =
            serde_json::from_str(&text).map_err(|e| Error::OperationFailed {
                operation: "commit".to_string(),
                cause: format!("unexpected response: {e}"),
            })?;
        debug!(commit = %parsed.id, "Committed");
        Ok(CommitId::new(parsed.id))
    }

    /// Uploads an object to a branch's staging area.
    ///
    /// # Errors
    ///
    /// Returns a transport or HTTP error.
    #[instrument(name = "lakesweep.client.upload_object", skip(self, ctx, content), fields(component = "client", bytes = content.len()))]
    pub fn upload_object(
        &self,
        ctx: &RunContext,
        repository: &str,
        branch: &str,
        path: &str,
        content: &[u8],
    ) -> Result<()> {
        let mut url = self.url(&["repositories", repository, "branches", branch, "objects"])?;
        url.query_pairs_mut().append_pair("path", path);
        self.send(ctx, "upload_object", Method::POST, &url, Some(content.to_vec()))?;
        Ok(())
    }

    /// Deletes an object from a branch's staging area.
    ///
    /// # Errors
    ///
    /// Returns a transport or HTTP error.
    #[instrument(name = "lakesweep.client.delete_object", skip(self, ctx), fields(component = "client"))]
    pub fn delete_object(
        &self,
        ctx: &RunContext,
        repository: &str,
        branch: &str,
        path: &str,
    ) -> Result<()> {
        let mut url = self.url(&["repositories", repository, "branches", branch, "objects"])?;
        url.query_pairs_mut().append_pair("path", path);
        self.send(ctx, "delete_object", Method::DELETE, &url, None)?;
        Ok(())
    }

    /// Reads an object at a ref (branch or commit).
    ///
    /// # Errors
    ///
    /// Returns a transport or HTTP error; a missing object is
    /// [`Error::Http`] with status 404.
    #[instrument(name = "lakesweep.client.get_object", skip(self, ctx), fields(component = "client"))]
    pub fn get_object(
        &self,
        ctx: &RunContext,
        repository: &str,
        reference: &str,
        path: &str,
    ) -> Result<Vec<u8>> {
        let mut url = self.url(&["repositories", repository, "refs", reference, "objects"])?;
        url.query_pairs_mut().append_pair("path", path);
        let response = self.send(ctx, "get_object", Method::GET, &url, None)?;
        response
            .bytes()
            .map(|b| b.to_vec())
            .map_err(|e| Error::Transport(TransportError::from(&e)))
    }

    /// Returns whether an object is readable at a ref.
    ///
    /// # Errors
    ///
    /// Returns any error of [`Self::get_object`] other than a 404 or 410.
    pub fn object_exists(
        &self,
        ctx: &RunContext,
        repository: &str,
        reference: &str,
        path: &str,
    ) -> Result<bool> {
        match self.get_object(ctx, repository, reference, path) {
            Ok(_) => Ok(true),
            Err(Error::Http { status: 404 | 410, .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Joins path segments onto the base URL, escaping each one.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| Error::InvalidInput(format!("invalid endpoint '{}'", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: &Url, body: Option<&[u8]>) -> RequestBuilder {
        let mut request = self.http.request(method, url.clone());
        if let Some(key) = &self.access_key_id {
            request = request.basic_auth(
                key,
                self.secret_access_key
                    .as_ref()
                    .map(|secret| secret.expose_secret().to_string()),
            );
        }
        if let Some(body) = body {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.to_vec());
        }
        request
    }

    /// Sends with retries and converts non-2xx responses into errors.
    fn send(
        &self,
        ctx: &RunContext,
        operation: &str,
        method: Method,
        url: &Url,
        body: Option<Vec<u8>>,
    ) -> Result<Response> {
        let response = self.retry.execute(ctx, |attempt| {
            debug!(operation, attempt, method = %method, url = %url, "Sending control-plane request");
            let response = self
                .request(method.clone(), url, body.as_deref())
                .send()
                .map_err(|e| TransportError::from(&e))?;
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            Ok(Attempt {
                status: response.status().as_u16(),
                retry_after,
                value: response,
            })
        })?;
        check_status(response)
    }
}

trait ResponseExt {
    fn text_body(self) -> Result<String>;
}

impl ResponseExt for Response {
    fn text_body(self) -> Result<String> {
        self.text()
            .map_err(|e| Error::Transport(TransportError::from(&e)))
    }
}

fn serialize<T: Serialize>(operation: &str, value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| Error::OperationFailed {
        operation: operation.to_string(),
        cause: e.to_string(),
    })
}

fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(Error::Http {
        status: status.as_u16(),
        body: truncate(&body, MAX_ERROR_BODY),
    })
}

fn truncate(body: &str, max: usize) -> String {
    if body.len() <= max {
        return body.trim().to_string();
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", body[..end].trim_end())
}
