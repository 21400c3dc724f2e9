//! Configuration management.
//!
//! Configuration is layered: built-in defaults, then a TOML file (`--config`
//! or the platform config dir), then `LAKESWEEP_*` environment variables.
//!
//! ```toml
//! [control_plane]
//! endpoint_url = "https://lake.example.com/api/v1"
//! access_key_id = "AKIAEXAMPLE"
//! secret_access_key = "..."
//! timeout_secs = 30
//!
//! [control_plane.retry]
//! max_attempts = 4
//! min_wait_ms = 200
//! max_wait_ms = 30000
//! pool_max_idle_per_host = 100
//!
//! [gc]
//! manifest_dir = "/var/lib/lakesweep/manifests"
//! mark_concurrency = 4
//! sweep_concurrency = 4
//! batch_size = 500
//!
//! [logging]
//! level = "info"
//! format = "json"
//!
//! [metrics]
//! enabled = true
//! push_gateway = { endpoint = "http://pushgateway:9091/metrics/job/lakesweep" }
//!
//! [s3]
//! region = "eu-west-1"
//! endpoint_url = "http://minio:9000"
//! force_path_style = true
//!
//! [azure]
//! sas_token = "sv=2021-12-02&ss=b&srt=co&sp=d&sig=..."
//! ```

use crate::client::retry::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_WAIT, DEFAULT_MIN_WAIT, DEFAULT_POOL_MAX_IDLE_PER_HOST,
    RetryPolicy,
};
use crate::gc::{DEFAULT_MARK_CONCURRENCY, DEFAULT_SWEEP_CONCURRENCY};
use crate::observability::parse_bool;
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default control-plane endpoint.
pub const DEFAULT_ENDPOINT_URL: &str = "http://localhost:8000/api/v1";

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Region used when none is configured.
pub const DEFAULT_S3_REGION: &str = "us-east-1";

/// Main configuration for lakesweep.
#[derive(Debug, Clone, Default)]
pub struct LakesweepConfig {
    /// Control-plane client settings.
    pub control_plane: ControlPlaneConfig,
    /// Collection settings.
    pub gc: GcSettings,
    /// Object store credentials for sweeping.
    pub storage: StorageSettings,
    /// Logging and metrics settings.
    pub observability: ObservabilitySettings,
}

/// Control-plane client configuration.
#[derive(Debug, Clone)]
pub struct ControlPlaneConfig {
    /// Base URL including the API prefix, e.g. `http://host:8000/api/v1`.
    pub endpoint_url: String,
    /// Access key id for basic auth.
    pub access_key_id: Option<String>,
    /// Secret access key for basic auth.
    pub secret_access_key: Option<SecretString>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Retry policy for every call.
    pub retry: RetryPolicy,
    /// Idle connections kept per host.
    pub pool_max_idle_per_host: usize,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            endpoint_url: DEFAULT_ENDPOINT_URL.to_string(),
            access_key_id: None,
            secret_access_key: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
            pool_max_idle_per_host: DEFAULT_POOL_MAX_IDLE_PER_HOST,
        }
    }
}

/// Collection settings.
#[derive(Debug, Clone)]
pub struct GcSettings {
    /// Root directory for mark manifests and sweep reports.
    pub manifest_dir: PathBuf,
    /// Roots walked concurrently during mark.
    pub mark_concurrency: usize,
    /// Batches in flight during sweep.
    pub sweep_concurrency: usize,
    /// Optional cap below the backend's bulk limit.
    pub batch_size: Option<usize>,
}

impl Default for GcSettings {
    fn default() -> Self {
        Self {
            manifest_dir: default_manifest_dir(),
            mark_concurrency: DEFAULT_MARK_CONCURRENCY,
            sweep_concurrency: DEFAULT_SWEEP_CONCURRENCY,
            batch_size: None,
        }
    }
}

/// Object store settings used to build bulk removers.
#[derive(Debug, Clone, Default)]
pub struct StorageSettings {
    /// S3 client settings.
    pub s3: S3Settings,
    /// Azure Blob client settings.
    pub azure: AzureSettings,
}

/// S3 client settings.
#[derive(Debug, Clone)]
pub struct S3Settings {
    /// AWS region.
    pub region: String,
    /// Custom endpoint (MinIO, R2, ...).
    pub endpoint_url: Option<String>,
    /// Static access key id; the default credential chain is used when unset.
    pub access_key_id: Option<String>,
    /// Static secret access key.
    pub secret_access_key: Option<SecretString>,
    /// Address buckets by path instead of virtual host.
    pub force_path_style: bool,
}

impl Default for S3Settings {
    fn default() -> Self {
        Self {
            region: DEFAULT_S3_REGION.to_string(),
            endpoint_url: None,
            access_key_id: None,
            secret_access_key: None,
            force_path_style: false,
        }
    }
}

/// Azure Blob client settings.
#[derive(Debug, Clone)]
pub struct AzureSettings {
    /// Account SAS token with delete permission.
    pub sas_token: Option<SecretString>,
    /// Endpoint override, e.g. `http://127.0.0.1:10000/devstoreaccount1`.
    pub endpoint_url: Option<String>,
    /// Per-batch request timeout.
    pub timeout: Duration,
}

impl Default for AzureSettings {
    fn default() -> Self {
        Self {
            sas_token: None,
            endpoint_url: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// Returns the platform data dir for manifests, or `.lakesweep/manifests`.
#[must_use]
pub fn default_manifest_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "lakesweep").map_or_else(
        || PathBuf::from(".lakesweep").join("manifests"),
        |dirs| dirs.data_dir().join("manifests"),
    )
}

/// Observability settings from the config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObservabilitySettings {
    /// `[logging]` section.
    pub logging: Option<LoggingSettings>,
    /// `[metrics]` section.
    pub metrics: Option<MetricsSettings>,
}

/// `[logging]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingSettings {
    /// Filter directive or level, e.g. `info` or `lakesweep=debug`.
    pub level: Option<String>,
    /// `pretty` or `json`.
    pub format: Option<String>,
    /// Optional log file; stderr when absent.
    pub file: Option<String>,
}

/// `[metrics]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsSettings {
    /// Whether to install the Prometheus recorder.
    pub enabled: Option<bool>,
    /// Push gateway to flush to at exit.
    pub push_gateway: Option<MetricsPushGatewaySettings>,
}

/// Push gateway settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsPushGatewaySettings {
    /// Push gateway endpoint URI.
    pub endpoint: Option<String>,
    /// Optional basic auth username.
    pub username: Option<String>,
    /// Optional basic auth password.
    pub password: Option<String>,
    /// Use POST instead of PUT.
    pub use_http_post: Option<bool>,
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// `[control_plane]` section.
    pub control_plane: Option<ConfigFileControlPlane>,
    /// `[gc]` section.
    pub gc: Option<ConfigFileGc>,
    /// `[s3]` section.
    pub s3: Option<ConfigFileS3>,
    /// `[azure]` section.
    pub azure: Option<ConfigFileAzure>,
    /// `[logging]` section.
    pub logging: Option<LoggingSettings>,
    /// `[metrics]` section.
    pub metrics: Option<MetricsSettings>,
}

/// `[control_plane]` section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileControlPlane {
    /// Endpoint URL.
    pub endpoint_url: Option<String>,
    /// Access key id.
    pub access_key_id: Option<String>,
    /// Secret access key.
    pub secret_access_key: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Retry settings.
    pub retry: Option<ConfigFileRetry>,
}

/// `[control_plane.retry]` section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileRetry {
    /// Attempt ceiling.
    pub max_attempts: Option<u32>,
    /// Minimum backoff in milliseconds.
    pub min_wait_ms: Option<u64>,
    /// Maximum backoff in milliseconds.
    pub max_wait_ms: Option<u64>,
    /// Idle connections kept per host.
    pub pool_max_idle_per_host: Option<usize>,
}

/// `[gc]` section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileGc {
    /// Manifest directory.
    pub manifest_dir: Option<String>,
    /// Mark concurrency.
    pub mark_concurrency: Option<usize>,
    /// Sweep concurrency.
    pub sweep_concurrency: Option<usize>,
    /// Sweep batch size cap.
    pub batch_size: Option<usize>,
}

/// `[s3]` section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileS3 {
    /// AWS region.
    pub region: Option<String>,
    /// Custom endpoint.
    pub endpoint_url: Option<String>,
    /// Access key id.
    pub access_key_id: Option<String>,
    /// Secret access key.
    pub secret_access_key: Option<String>,
    /// Path-style addressing.
    pub force_path_style: Option<bool>,
}

/// `[azure]` section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileAzure {
    /// SAS token.
    pub sas_token: Option<String>,
    /// Endpoint override.
    pub endpoint_url: Option<String>,
    /// Batch request timeout in seconds.
    pub timeout_secs: Option<u64>,
}

impl LakesweepConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> crate::Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| crate::Error::OperationFailed {
                operation: "read_config_file".to_string(),
                cause: format!("{}: {e}", path.display()),
            })?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid config file.
    pub fn from_toml(contents: &str) -> crate::Result<Self> {
        let file: ConfigFile =
            toml::from_str(contents).map_err(|e| crate::Error::OperationFailed {
                operation: "parse_config_file".to_string(),
                cause: e.to_string(),
            })?;
        Ok(Self::from_config_file(file))
    }

    /// Loads configuration from the default location.
    ///
    /// Checks the platform config dir, then `~/.config/lakesweep/`. Returns
    /// defaults if no config file is found.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(base_dirs) = directories::BaseDirs::new() else {
            return Self::default();
        };

        let platform_config = base_dirs.config_dir().join("lakesweep").join("config.toml");
        if platform_config.exists() {
            if let Ok(config) = Self::load_from_file(&platform_config) {
                return config;
            }
        }

        let xdg_config = base_dirs
            .home_dir()
            .join(".config")
            .join("lakesweep")
            .join("config.toml");
        if xdg_config.exists() {
            if let Ok(config) = Self::load_from_file(&xdg_config) {
                return config;
            }
        }

        Self::default()
    }

    /// Converts a `ConfigFile` to `LakesweepConfig`.
    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(cp) = file.control_plane {
            if let Some(url) = cp.endpoint_url {
                config.control_plane.endpoint_url = url;
            }
            config.control_plane.access_key_id = cp.access_key_id;
            config.control_plane.secret_access_key = cp.secret_access_key.map(SecretString::from);
            if let Some(secs) = cp.timeout_secs {
                config.control_plane.timeout = Duration::from_secs(secs);
            }
            if let Some(retry) = cp.retry {
                config.control_plane.retry = retry_policy(&retry);
                if let Some(pool) = retry.pool_max_idle_per_host {
                    config.control_plane.pool_max_idle_per_host = pool;
                }
            }
        }
        if let Some(gc) = file.gc {
            if let Some(dir) = gc.manifest_dir {
                config.gc.manifest_dir = PathBuf::from(dir);
            }
            if let Some(n) = gc.mark_concurrency {
                config.gc.mark_concurrency = n.max(1);
            }
            if let Some(n) = gc.sweep_concurrency {
                config.gc.sweep_concurrency = n.max(1);
            }
            config.gc.batch_size = gc.batch_size.filter(|n| *n > 0);
        }
        if let Some(s3) = file.s3 {
            let settings = &mut config.storage.s3;
            if let Some(region) = s3.region {
                settings.region = region;
            }
            settings.endpoint_url = s3.endpoint_url;
            settings.access_key_id = s3.access_key_id;
            settings.secret_access_key = s3.secret_access_key.map(SecretString::from);
            settings.force_path_style = s3.force_path_style.unwrap_or(false);
        }
        if let Some(azure) = file.azure {
            let settings = &mut config.storage.azure;
            settings.sas_token = azure.sas_token.map(SecretString::from);
            settings.endpoint_url = azure.endpoint_url;
            if let Some(secs) = azure.timeout_secs {
                settings.timeout = Duration::from_secs(secs);
            }
        }
        config.observability = ObservabilitySettings {
            logging: file.logging,
            metrics: file.metrics,
        };

        config
    }

    /// Applies `LAKESWEEP_*` environment overrides.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary variable lookup.
    ///
    /// Reads:
    /// - `LAKESWEEP_ENDPOINT_URL`, `LAKESWEEP_ACCESS_KEY_ID`, `LAKESWEEP_SECRET_ACCESS_KEY`
    /// - `LAKESWEEP_TIMEOUT_SECS`, `LAKESWEEP_RETRY_MAX_ATTEMPTS`
    /// - `LAKESWEEP_MANIFEST_DIR`, `LAKESWEEP_MARK_CONCURRENCY`,
    ///   `LAKESWEEP_SWEEP_CONCURRENCY`, `LAKESWEEP_BATCH_SIZE`
    /// - `LAKESWEEP_S3_REGION`, `LAKESWEEP_S3_ENDPOINT_URL`, `LAKESWEEP_S3_ACCESS_KEY_ID`,
    ///   `LAKESWEEP_S3_SECRET_ACCESS_KEY`, `LAKESWEEP_S3_FORCE_PATH_STYLE`
    /// - `LAKESWEEP_AZURE_SAS_TOKEN`, `LAKESWEEP_AZURE_ENDPOINT_URL`
    #[must_use]
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<usize>().ok());

        if let Some(url) = lookup("LAKESWEEP_ENDPOINT_URL") {
            self.control_plane.endpoint_url = url;
        }
        if let Some(key) = lookup("LAKESWEEP_ACCESS_KEY_ID") {
            self.control_plane.access_key_id = Some(key);
        }
        if let Some(secret) = lookup("LAKESWEEP_SECRET_ACCESS_KEY") {
            self.control_plane.secret_access_key = Some(SecretString::from(secret));
        }
        if let Some(secs) = lookup("LAKESWEEP_TIMEOUT_SECS").and_then(|v| v.trim().parse().ok()) {
            self.control_plane.timeout = Duration::from_secs(secs);
        }
        if let Some(n) = lookup("LAKESWEEP_RETRY_MAX_ATTEMPTS").and_then(|v| v.trim().parse().ok())
        {
            self.control_plane.retry = self.control_plane.retry.with_max_attempts(n);
        }
        if let Some(dir) = lookup("LAKESWEEP_MANIFEST_DIR") {
            self.gc.manifest_dir = PathBuf::from(dir);
        }
        if let Some(n) = parsed("LAKESWEEP_MARK_CONCURRENCY") {
            self.gc.mark_concurrency = n.max(1);
        }
        if let Some(n) = parsed("LAKESWEEP_SWEEP_CONCURRENCY") {
            self.gc.sweep_concurrency = n.max(1);
        }
        if let Some(n) = parsed("LAKESWEEP_BATCH_SIZE") {
            self.gc.batch_size = (n > 0).then_some(n);
        }

        let s3 = &mut self.storage.s3;
        if let Some(region) = lookup("LAKESWEEP_S3_REGION") {
            s3.region = region;
        }
        if let Some(url) = lookup("LAKESWEEP_S3_ENDPOINT_URL") {
            s3.endpoint_url = Some(url);
        }
        if let Some(key) = lookup("LAKESWEEP_S3_ACCESS_KEY_ID") {
            s3.access_key_id = Some(key);
        }
        if let Some(secret) = lookup("LAKESWEEP_S3_SECRET_ACCESS_KEY") {
            s3.secret_access_key = Some(SecretString::from(secret));
        }
        if let Some(flag) = parse_bool(&lookup, "LAKESWEEP_S3_FORCE_PATH_STYLE") {
            s3.force_path_style = flag;
        }
        let azure = &mut self.storage.azure;
        if let Some(token) = lookup("LAKESWEEP_AZURE_SAS_TOKEN") {
            azure.sas_token = Some(SecretString::from(token));
        }
        if let Some(url) = lookup("LAKESWEEP_AZURE_ENDPOINT_URL") {
            azure.endpoint_url = Some(url);
        }
        self
    }

    /// Sets the manifest directory.
    #[must_use]
    pub fn with_manifest_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.gc.manifest_dir = path.into();
        self
    }
}

fn retry_policy(retry: &ConfigFileRetry) -> RetryPolicy {
    let min = retry
        .min_wait_ms
        .map_or(DEFAULT_MIN_WAIT, Duration::from_millis);
    let max = retry
        .max_wait_ms
        .map_or(DEFAULT_MAX_WAIT, Duration::from_millis);
    RetryPolicy::new()
        .with_max_attempts(retry.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS))
        .with_waits(min, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = LakesweepConfig::default();
        assert_eq!(config.control_plane.endpoint_url, DEFAULT_ENDPOINT_URL);
        assert_eq!(config.control_plane.retry, RetryPolicy::default());
        assert_eq!(config.control_plane.pool_max_idle_per_host, 100);
        assert_eq!(config.gc.sweep_concurrency, 4);
        assert!(config.gc.batch_size.is_none());
        assert_eq!(config.storage.s3.region, DEFAULT_S3_REGION);
        assert!(config.storage.azure.sas_token.is_none());
    }

    #[test]
    fn test_parse_full_file() {
        let config = LakesweepConfig::from_toml(
            r#"
            [control_plane]
            endpoint_url = "https://lake.example.com/api/v1"
            access_key_id = "AKIA"
            secret_access_key = "s3cr3t"

            [control_plane.retry]
            max_attempts = 6
            min_wait_ms = 50
            max_wait_ms = 1000
            pool_max_idle_per_host = 8

            [gc]
            manifest_dir = "/tmp/manifests"
            sweep_concurrency = 0
            batch_size = 250

            [logging]
            format = "json"
            "#,
        )
        .expect("valid config");

        assert_eq!(config.control_plane.endpoint_url, "https://lake.example.com/api/v1");
        assert_eq!(
            config
                .control_plane
                .secret_access_key
                .as_ref()
                .map(|s| s.expose_secret().to_string()),
            Some("s3cr3t".to_string())
        );
        assert_eq!(config.control_plane.retry.max_attempts(), 6);
        assert_eq!(config.control_plane.pool_max_idle_per_host, 8);
        assert_eq!(config.gc.manifest_dir, PathBuf::from("/tmp/manifests"));
        assert_eq!(config.gc.sweep_concurrency, 1);
        assert_eq!(config.gc.batch_size, Some(250));
        assert_eq!(
            config
                .observability
                .logging
                .and_then(|l| l.format)
                .as_deref(),
            Some("json")
        );
    }

    #[test]
    fn test_parse_storage_sections() {
        let config = LakesweepConfig::from_toml(
            r#"
            [s3]
            region = "eu-west-1"
            endpoint_url = "http://minio:9000"
            access_key_id = "minio"
            secret_access_key = "minio123"
            force_path_style = true

            [azure]
            sas_token = "sv=2021&sig=abc"
            timeout_secs = 10
            "#,
        )
        .expect("valid config");

        let s3 = &config.storage.s3;
        assert_eq!(s3.region, "eu-west-1");
        assert_eq!(s3.endpoint_url.as_deref(), Some("http://minio:9000"));
        assert_eq!(s3.access_key_id.as_deref(), Some("minio"));
        assert!(s3.force_path_style);
        let azure = &config.storage.azure;
        assert_eq!(
            azure.sas_token.as_ref().map(|t| t.expose_secret().to_string()),
            Some("sv=2021&sig=abc".to_string())
        );
        assert_eq!(azure.timeout, Duration::from_secs(10));
        assert!(azure.endpoint_url.is_none());
    }

    #[test]
    fn test_storage_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("LAKESWEEP_S3_REGION", "ap-south-1"),
            ("LAKESWEEP_S3_FORCE_PATH_STYLE", "yes"),
            ("LAKESWEEP_AZURE_ENDPOINT_URL", "http://127.0.0.1:10000/devstoreaccount1"),
        ]);
        let config = LakesweepConfig::default()
            .with_overrides_from(|key| env.get(key).map(ToString::to_string));
        assert_eq!(config.storage.s3.region, "ap-south-1");
        assert!(config.storage.s3.force_path_style);
        assert!(config.storage.s3.access_key_id.is_none());
        assert_eq!(
            config.storage.azure.endpoint_url.as_deref(),
            Some("http://127.0.0.1:10000/devstoreaccount1")
        );
    }

    #[test]
    fn test_invalid_toml_is_error() {
        assert!(LakesweepConfig::from_toml("[gc\nbatch_size = ").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("LAKESWEEP_ENDPOINT_URL", "http://other:9000/api/v1"),
            ("LAKESWEEP_BATCH_SIZE", "100"),
            ("LAKESWEEP_RETRY_MAX_ATTEMPTS", "2"),
            ("LAKESWEEP_MARK_CONCURRENCY", "not-a-number"),
        ]);
        let config = LakesweepConfig::default()
            .with_overrides_from(|key| env.get(key).map(ToString::to_string));
        assert_eq!(config.control_plane.endpoint_url, "http://other:9000/api/v1");
        assert_eq!(config.gc.batch_size, Some(100));
        assert_eq!(config.control_plane.retry.max_attempts(), 2);
        assert_eq!(config.gc.mark_concurrency, DEFAULT_MARK_CONCURRENCY);
    }
}
