//! Azure Blob batch delete over REST.
//!
//! One `POST /?comp=batch` per call, a `multipart/mixed` body with one
//! `DELETE` sub-request per blob, and a `multipart/mixed` reply with one
//! status per sub-request, matched back by `Content-ID`. Requests are
//! authorized with a SAS token appended to the batch and sub-request URLs.

use super::azure::{AzureBlobBatchApi, BlobDeleteStatus};
use crate::config::AzureSettings;
use crate::{Error, Result};
use chrono::Utc;
use reqwest::Url;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::fmt::Write as _;

/// Storage service version sent with every request.
pub const AZURE_API_VERSION: &str = "2021-12-02";

/// Largest error body kept in a batch failure.
const MAX_ERROR_BODY: usize = 512;

/// [`AzureBlobBatchApi`] backed by the blocking `reqwest` client.
pub struct HttpBlobBatchApi {
    http: Client,
    sas_token: Option<SecretString>,
    endpoint: Option<Url>,
}

impl fmt::Debug for HttpBlobBatchApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpBlobBatchApi")
            .field("sas_token", &self.sas_token.as_ref().map(|_| "[REDACTED]"))
            .field("endpoint", &self.endpoint.as_ref().map(Url::as_str))
            .finish_non_exhaustive()
    }
}

impl HttpBlobBatchApi {
    /// Builds the client from settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a malformed endpoint override, or
    /// an error if the HTTP client cannot be built.
    pub fn from_settings(settings: &AzureSettings) -> Result<Self> {
        let endpoint = settings
            .endpoint_url
            .as_deref()
            .map(|raw| {
                Url::parse(raw).map_err(|e| {
                    Error::InvalidInput(format!("invalid azure endpoint '{raw}': {e}"))
                })
            })
            .transpose()?;
        let http = Client::builder()
            .user_agent(concat!("lakesweep/", env!("CARGO_PKG_VERSION")))
            .timeout(settings.timeout)
            .build()
            .map_err(|e| Error::OperationFailed {
                operation: "build_azure_client".to_string(),
                cause: e.to_string(),
            })?;
        Ok(Self {
            http,
            sas_token: settings.sas_token.clone(),
            endpoint,
        })
    }

    fn sas(&self) -> Option<&str> {
        self.sas_token
            .as_ref()
            .map(|t| t.expose_secret().trim_start_matches('?'))
    }

    /// Batch endpoint for the account that owns the blobs.
    ///
    /// With an endpoint override (Azurite, private link) the override's
    /// scheme, host and path prefix replace the account URL.
    fn batch_url(&self, first_blob: &Url) -> Result<Url> {
        let mut url = match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => {
                let host = first_blob.host_str().ok_or_else(|| {
                    Error::InvalidInput(format!("blob url has no host: {first_blob}"))
                })?;
                Url::parse(&format!("https://{host}/"))
                    .map_err(|e| Error::InvalidInput(format!("blob url host '{host}': {e}")))?
            },
        };
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        url.set_query(Some(&self.with_sas("comp=batch")));
        Ok(url)
    }

    fn with_sas(&self, query: &str) -> String {
        match self.sas() {
            Some(sas) if query.is_empty() => sas.to_string(),
            Some(sas) => format!("{query}&{sas}"),
            None => query.to_string(),
        }
    }

    /// Path of a sub-request, relative to the batch endpoint's host.
    fn sub_request_target(&self, blob: &Url) -> String {
        let prefix = self
            .endpoint
            .as_ref()
            .map(|e| e.path().trim_end_matches('/').to_string())
            .unwrap_or_default();
        let target = format!("{prefix}{}", blob.path());
        match self.sas() {
            Some(sas) => format!("{target}?{sas}"),
            None => target,
        }
    }
}

impl AzureBlobBatchApi for HttpBlobBatchApi {
    fn delete_blobs(&self, blob_urls: &[String]) -> Result<Vec<BlobDeleteStatus>> {
        if blob_urls.is_empty() {
            return Ok(Vec::new());
        }
        let blobs = blob_urls
            .iter()
            .map(|raw| {
                Url::parse(raw).map_err(|e| Error::InvalidInput(format!("blob url '{raw}': {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        if let Some(other) = blobs.iter().find(|b| b.host_str() != blobs[0].host_str()) {
            return Err(Error::InvalidInput(format!(
                "blob batch spans accounts: {} and {}",
                blobs[0].host_str().unwrap_or_default(),
                other.host_str().unwrap_or_default()
            )));
        }

        let boundary = format!("batch_{}", uuid::Uuid::new_v4());
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let targets: Vec<String> = blobs.iter().map(|b| self.sub_request_target(b)).collect();
        let body = batch_body(&boundary, &date, &targets);
        let url = self.batch_url(&blobs[0])?;

        let response = self
            .http
            .post(url)
            .header("x-ms-version", AZURE_API_VERSION)
            .header("x-ms-date", &date)
            .header(CONTENT_TYPE, format!("multipart/mixed; boundary={boundary}"))
            .body(body)
            .send()
            .map_err(|e| batch_error(e.to_string()))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let text = response
            .text()
            .map_err(|e| batch_error(e.to_string()))?;
        if status != 202 {
            return Err(batch_error(format!("HTTP {status}: {}", truncate(&text))));
        }
        parse_batch_response(&content_type, &text, blob_urls.len())
    }
}

fn batch_error(cause: String) -> Error {
    Error::OperationFailed {
        operation: "azure_blob_batch".to_string(),
        cause,
    }
}

/// Builds the `multipart/mixed` batch body.
fn batch_body(boundary: &str, date: &str, targets: &[String]) -> String {
    let mut body = String::new();
    for (i, target) in targets.iter().enumerate() {
        let _ = write!(
            body,
            "--{boundary}\r\n\
             Content-Type: application/http\r\n\
             Content-Transfer-Encoding: binary\r\n\
             Content-ID: {i}\r\n\
             \r\n\
             DELETE {target} HTTP/1.1\r\n\
             x-ms-date: {date}\r\n\
             Content-Length: 0\r\n\
             \r\n"
        );
    }
    let _ = write!(body, "--{boundary}--\r\n");
    body
}

/// Parses a batch reply into one status per sub-request, in request order.
///
/// Sub-requests with no matching part are reported as failed.
fn parse_batch_response(
    content_type: &str,
    body: &str,
    expected: usize,
) -> Result<Vec<BlobDeleteStatus>> {
    let boundary = content_type
        .split(';')
        .filter_map(|p| p.trim().strip_prefix("boundary="))
        .map(|b| b.trim_matches('"'))
        .next()
        .ok_or_else(|| batch_error(format!("reply has no multipart boundary: '{content_type}'")))?;

    let mut statuses: Vec<Option<BlobDeleteStatus>> = vec![None; expected];
    let delimiter = format!("--{boundary}");
    for (position, part) in body
        .split(delimiter.as_str())
        .skip(1)
        .take_while(|p| !p.starts_with("--"))
        .enumerate()
    {
        let mut content_id = None;
        let mut status = None;
        let mut error_code = None;
        for line in part.lines().map(str::trim) {
            if let Some(rest) = line.strip_prefix("HTTP/1.1 ") {
                status = rest.split_whitespace().next().and_then(|s| s.parse::<u16>().ok());
            } else if let Some((name, value)) = line.split_once(':') {
                let name = name.trim();
                if name.eq_ignore_ascii_case("content-id") {
                    content_id = value.trim().parse::<usize>().ok();
                } else if name.eq_ignore_ascii_case("x-ms-error-code") {
                    error_code = Some(value.trim().to_string());
                }
            }
        }
        let index = content_id.unwrap_or(position);
        let Some(slot) = statuses.get_mut(index) else {
            continue;
        };
        *slot = Some(match (status, error_code) {
            (Some(202), _) => BlobDeleteStatus::Deleted,
            (Some(404), _) => BlobDeleteStatus::NotFound,
            (Some(code), Some(error)) => BlobDeleteStatus::Failed(format!("{code} {error}")),
            (Some(code), None) => BlobDeleteStatus::Failed(code.to_string()),
            (None, _) => BlobDeleteStatus::Failed("unreadable sub-response".to_string()),
        });
    }
    Ok(statuses
        .into_iter()
        .map(|s| s.unwrap_or_else(|| BlobDeleteStatus::Failed("no sub-response".to_string())))
        .collect())
}

fn truncate(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn api(sas: Option<&str>, endpoint: Option<&str>) -> HttpBlobBatchApi {
        HttpBlobBatchApi::from_settings(&AzureSettings {
            sas_token: sas.map(|s| SecretString::from(s.to_string())),
            endpoint_url: endpoint.map(ToString::to_string),
            timeout: Duration::from_secs(5),
        })
        .expect("client")
    }

    fn blob(url: &str) -> Url {
        Url::parse(url).expect("url")
    }

    #[test]
    fn test_batch_body_layout() {
        let body = batch_body(
            "batch_x",
            "Mon, 03 Jun 2024 00:00:00 GMT",
            &["/c/a".to_string(), "/c/b".to_string()],
        );
        assert!(body.starts_with("--batch_x\r\nContent-Type: application/http\r\n"));
        assert!(body.contains("Content-ID: 1\r\n\r\nDELETE /c/b HTTP/1.1\r\n"));
        assert!(body.ends_with("--batch_x--\r\n"));
        assert_eq!(body.matches("DELETE ").count(), 2);
    }

    #[test]
    fn test_urls_carry_sas() {
        let api = api(Some("?sv=2021&sig=abc"), None);
        let blob = blob("https://acct.blob.core.windows.net/container/repo/a%20b");
        assert_eq!(
            api.batch_url(&blob).expect("batch url").as_str(),
            "https://acct.blob.core.windows.net/?comp=batch&sv=2021&sig=abc"
        );
        assert_eq!(
            api.sub_request_target(&blob),
            "/container/repo/a%20b?sv=2021&sig=abc"
        );
    }

    #[test]
    fn test_endpoint_override_prefixes_paths() {
        let api = api(None, Some("http://127.0.0.1:10000/devstoreaccount1"));
        let blob = blob("https://devstoreaccount1.blob.core.windows.net/container/a");
        assert_eq!(
            api.batch_url(&blob).expect("batch url").as_str(),
            "http://127.0.0.1:10000/devstoreaccount1/?comp=batch"
        );
        assert_eq!(api.sub_request_target(&blob), "/devstoreaccount1/container/a");
    }

    #[test]
    fn test_parse_reply_by_content_id() {
        let reply = "--batchresponse_1\r\n\
             Content-Type: application/http\r\n\
             Content-ID: 1\r\n\
             \r\n\
             HTTP/1.1 404 The specified blob does not exist.\r\n\
             x-ms-error-code: BlobNotFound\r\n\
             \r\n\
             --batchresponse_1\r\n\
             Content-Type: application/http\r\n\
             Content-ID: 0\r\n\
             \r\n\
             HTTP/1.1 202 Accepted\r\n\
             x-ms-delete-type-permanent: true\r\n\
             \r\n\
             --batchresponse_1\r\n\
             Content-Type: application/http\r\n\
             Content-ID: 2\r\n\
             \r\n\
             HTTP/1.1 403 Forbidden\r\n\
             x-ms-error-code: AuthorizationPermissionMismatch\r\n\
             \r\n\
             --batchresponse_1--\r\n";
        let statuses = parse_batch_response(
            "multipart/mixed; boundary=batchresponse_1",
            reply,
            4,
        )
        .expect("statuses");
        assert_eq!(
            statuses,
            vec![
                BlobDeleteStatus::Deleted,
                BlobDeleteStatus::NotFound,
                BlobDeleteStatus::Failed("403 AuthorizationPermissionMismatch".to_string()),
                BlobDeleteStatus::Failed("no sub-response".to_string()),
            ]
        );
    }

    #[test]
    fn test_reply_without_boundary_is_error() {
        assert!(matches!(
            parse_batch_response("application/xml", "<Error/>", 1),
            Err(Error::OperationFailed { .. })
        ));
    }

    #[test]
    fn test_mixed_accounts_rejected() {
        let err = api(None, None)
            .delete_blobs(&[
                "https://a.blob.core.windows.net/c/x".to_string(),
                "https://b.blob.core.windows.net/c/y".to_string(),
            ])
            .expect_err("two accounts");
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
