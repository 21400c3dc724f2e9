//! Prometheus metrics.
//!
//! The recorder is installed without an HTTP listener: a collection run is a
//! short-lived process, so metrics are pushed to a gateway at exit instead of
//! being scraped.

use super::{EnvLookup, parse_bool, parse_string};
use crate::config::{MetricsPushGatewaySettings, MetricsSettings};
use crate::{Error, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Push gateway configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushGatewayConfig {
    /// Push gateway endpoint URI.
    pub endpoint: String,
    /// Optional username for basic auth.
    pub username: Option<String>,
    /// Optional password for basic auth.
    pub password: Option<String>,
    /// Whether to use HTTP POST instead of PUT.
    pub use_http_post: bool,
}

/// Metrics configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsConfig {
    /// Whether metrics are enabled.
    pub enabled: bool,
    /// Optional push gateway configuration.
    pub push_gateway: Option<PushGatewayConfig>,
}

impl MetricsConfig {
    /// Builds metrics configuration from config settings with env overrides.
    #[must_use]
    pub fn from_settings(settings: Option<&MetricsSettings>) -> Self {
        Self::from_settings_with(settings, &|key| std::env::var(key).ok())
    }

    /// Builds metrics configuration with overrides from `lookup`.
    ///
    /// Reads `LAKESWEEP_METRICS_ENABLED` and
    /// `LAKESWEEP_METRICS_PUSH_GATEWAY_{ENDPOINT,USERNAME,PASSWORD,USE_POST}`.
    #[must_use]
    pub fn from_settings_with(settings: Option<&MetricsSettings>, lookup: EnvLookup<'_>) -> Self {
        let mut config = Self {
            enabled: settings.and_then(|config| config.enabled).unwrap_or(false),
            push_gateway: settings
                .and_then(|config| config.push_gateway.as_ref())
                .and_then(parse_push_gateway_settings),
        };

        if let Some(enabled) = parse_bool(lookup, "LAKESWEEP_METRICS_ENABLED") {
            config.enabled = enabled;
        }
        apply_push_gateway_env_overrides(&mut config, lookup);

        config
    }
}

/// Metrics handle for flushing on shutdown.
#[derive(Debug, Clone)]
pub struct MetricsHandle {
    prometheus: PrometheusHandle,
    push_gateway: Option<PushGatewayConfig>,
}

impl MetricsHandle {
    /// Renders the current metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.prometheus.render()
    }
}

/// Global metrics handle for flush-on-demand.
static GLOBAL_METRICS: OnceLock<Arc<MetricsHandle>> = OnceLock::new();

/// Flushes metrics to the push gateway if configured.
pub fn flush_global() {
    if let Some(handle) = GLOBAL_METRICS.get() {
        flush(handle);
    }
}

/// Installs the Prometheus metrics recorder.
///
/// # Errors
///
/// Returns an error if another recorder is already installed.
pub fn install_prometheus(config: &MetricsConfig) -> Result<Option<MetricsHandle>> {
    if !config.enabled {
        return Ok(None);
    }

    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| Error::OperationFailed {
            operation: "metrics_recorder_install".to_string(),
            cause: e.to_string(),
        })?;

    let handle = MetricsHandle {
        prometheus,
        push_gateway: config.push_gateway.clone(),
    };
    let _ = GLOBAL_METRICS.set(Arc::new(handle.clone()));

    Ok(Some(handle))
}

/// Flushes metrics to the push gateway if configured.
pub fn flush(handle: &MetricsHandle) {
    let Some(push_gateway) = &handle.push_gateway else {
        tracing::debug!("No push gateway configured, skipping flush");
        return;
    };

    let mut payload = handle.render();
    // The gateway rejects bodies without a trailing newline
    if !payload.ends_with('\n') {
        payload.push('\n');
    }

    tracing::debug!(
        bytes = payload.len(),
        endpoint = %push_gateway.endpoint,
        "Pushing metrics to push gateway"
    );
    flush_to_gateway(push_gateway, payload);
}

fn flush_to_gateway(gateway: &PushGatewayConfig, payload: String) {
    let client = Client::new();
    let request = if gateway.use_http_post {
        client.post(&gateway.endpoint)
    } else {
        client.put(&gateway.endpoint)
    };
    let request = match &gateway.username {
        Some(username) => request.basic_auth(username, gateway.password.as_deref()),
        None => request,
    };

    let response = request
        .header(CONTENT_TYPE, "text/plain; version=0.0.4")
        .timeout(Duration::from_secs(5))
        .body(payload)
        .send();

    match response {
        Ok(resp) if resp.status().is_success() => {
            tracing::debug!(status = %resp.status(), "Metrics pushed successfully");
        },
        Ok(resp) => {
            tracing::warn!(status = %resp.status(), "Metrics push failed");
        },
        Err(err) => {
            tracing::warn!("Failed to push metrics: {err}");
        },
    }
}

fn trimmed(value: Option<&String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_push_gateway_settings(settings: &MetricsPushGatewaySettings) -> Option<PushGatewayConfig> {
    Some(PushGatewayConfig {
        endpoint: trimmed(settings.endpoint.as_ref())?,
        username: trimmed(settings.username.as_ref()),
        password: trimmed(settings.password.as_ref()),
        // PUT replaces the group, which matches one push per run
        use_http_post: settings.use_http_post.unwrap_or(false),
    })
}

fn apply_push_gateway_env_overrides(config: &mut MetricsConfig, lookup: EnvLookup<'_>) {
    let endpoint = parse_string(lookup, "LAKESWEEP_METRICS_PUSH_GATEWAY_ENDPOINT");
    let username = parse_string(lookup, "LAKESWEEP_METRICS_PUSH_GATEWAY_USERNAME");
    let password = parse_string(lookup, "LAKESWEEP_METRICS_PUSH_GATEWAY_PASSWORD");
    let use_http_post = parse_bool(lookup, "LAKESWEEP_METRICS_PUSH_GATEWAY_USE_POST");

    if endpoint.is_none() && username.is_none() && password.is_none() && use_http_post.is_none() {
        return;
    }

    let mut current = config.push_gateway.clone().unwrap_or(PushGatewayConfig {
        endpoint: String::new(),
        username: None,
        password: None,
        use_http_post: false,
    });

    if let Some(endpoint) = endpoint {
        current.endpoint = endpoint;
    }
    if let Some(username) = username {
        current.username = Some(username);
    }
    if let Some(password) = password {
        current.password = Some(password);
    }
    if let Some(use_http_post) = use_http_post {
        current.use_http_post = use_http_post;
    }

    if current.endpoint.is_empty() {
        return;
    }
    config.push_gateway = Some(current);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_metrics_registry_smoke() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        if metrics::set_global_recorder(recorder).is_err() {
            return;
        }

        metrics::counter!("test_metrics_registry_total").increment(1);
        assert!(handle.render().contains("test_metrics_registry_total"));
    }

    #[test]
    fn test_disabled_by_default() {
        let config = MetricsConfig::from_settings_with(None, &|_| None);
        assert_eq!(config, MetricsConfig::default());
    }

    #[test]
    fn test_push_gateway_from_settings_and_env() {
        let settings = MetricsSettings {
            enabled: Some(true),
            push_gateway: Some(MetricsPushGatewaySettings {
                endpoint: Some(" http://gw:9091/metrics/job/lakesweep ".to_string()),
                username: Some(String::new()),
                ..MetricsPushGatewaySettings::default()
            }),
        };
        let env = HashMap::from([("LAKESWEEP_METRICS_PUSH_GATEWAY_USE_POST", "yes")]);
        let config = MetricsConfig::from_settings_with(Some(&settings), &|key| {
            env.get(key).map(ToString::to_string)
        });

        assert!(config.enabled);
        let gateway = config.push_gateway.expect("gateway");
        assert_eq!(gateway.endpoint, "http://gw:9091/metrics/job/lakesweep");
        assert!(gateway.username.is_none());
        assert!(gateway.use_http_post);
    }

    #[test]
    fn test_env_without_endpoint_adds_no_gateway() {
        let env = HashMap::from([("LAKESWEEP_METRICS_PUSH_GATEWAY_USERNAME", "ops")]);
        let config =
            MetricsConfig::from_settings_with(None, &|key| env.get(key).map(ToString::to_string));
        assert!(config.push_gateway.is_none());
    }
}
