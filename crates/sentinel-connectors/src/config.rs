//! Connector configuration recognized by the framework.
//!
//! Stored as the `config` document on a connector row and deserialized
//! here. Options the framework does not recognize travel in `extra` for
//! the concrete connector to interpret.

use std::time::Duration;

use serde::Deserialize;

/// Kinds of sources the framework knows how to drive.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorType {
    Aws,
    Azure,
    Gcp,
    EntraId,
    Okta,
    Elastic,
    Nmap,
}

impl ConnectorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorType::Aws => "aws",
            ConnectorType::Azure => "azure",
            ConnectorType::Gcp => "gcp",
            ConnectorType::EntraId => "entra_id",
            ConnectorType::Okta => "okta",
            ConnectorType::Elastic => "elastic",
            ConnectorType::Nmap => "nmap",
        }
    }
}

/// Client-side rate limiter settings (token bucket).
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Sustained requests per second.
    #[serde(default = "default_rps")]
    pub rps: f64,
    /// Burst capacity.
    #[serde(default = "default_burst")]
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rps: default_rps(),
            burst: default_burst(),
        }
    }
}

/// Exponential backoff settings for transient failures.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_cap_delay_ms")]
    pub cap_delay_ms: u64,
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn cap_delay(&self) -> Duration {
        Duration::from_millis(self.cap_delay_ms)
    }

    /// Delay before the next attempt (1-based), doubling up to the cap.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        let ms = self
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.cap_delay_ms);
        Duration::from_millis(ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            cap_delay_ms: default_cap_delay_ms(),
        }
    }
}

/// Configuration options recognized by the framework for every connector.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectorConfig {
    /// Which regions to enumerate (cloud connectors only).
    #[serde(default)]
    pub regions: Vec<String>,

    /// Cap on concurrent sub-requests inside a single discovery.
    #[serde(default = "default_max_parallelism")]
    pub max_parallelism: usize,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Page size for paginated source APIs.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Per-resource-kind allowlist. Empty means everything.
    #[serde(default)]
    pub include: Vec<String>,

    /// Per-resource-kind blocklist. Wins over `include`.
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Opaque reference resolved against the secret store at run time.
    /// Credentials themselves never appear in configuration.
    #[serde(default)]
    pub credential_ref: Option<String>,

    /// Connector-specific options the framework does not interpret.
    #[serde(default)]
    pub extra: serde_json::Value,
}

impl ConnectorConfig {
    /// Whether a resource kind should be enumerated under the
    /// include/exclude allowlists.
    pub fn kind_enabled(&self, kind: &str) -> bool {
        if self.exclude.iter().any(|k| k == kind) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|k| k == kind)
    }

    /// Regions to enumerate, with a fallback when none are configured.
    pub fn regions_or(&self, fallback: &str) -> Vec<String> {
        if self.regions.is_empty() {
            vec![fallback.to_string()]
        } else {
            self.regions.clone()
        }
    }

    /// A string option from `extra`.
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(|v| v.as_str())
    }
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            regions: Vec::new(),
            max_parallelism: default_max_parallelism(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
            page_size: default_page_size(),
            include: Vec::new(),
            exclude: Vec::new(),
            credential_ref: None,
            extra: serde_json::Value::Null,
        }
    }
}

fn default_rps() -> f64 {
    5.0
}

fn default_burst() -> u32 {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_cap_delay_ms() -> u64 {
    30_000
}

fn default_max_parallelism() -> usize {
    4
}

fn default_page_size() -> u32 {
    100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_from_empty_document() {
        let config: ConnectorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.max_parallelism, 4);
        assert_eq!(config.page_size, 100);
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.regions.is_empty());
        assert!(config.kind_enabled("instances"));
    }

    #[test]
    fn include_exclude_allowlists() {
        let config: ConnectorConfig = serde_json::from_value(serde_json::json!({
            "include": ["instances", "vpcs"],
            "exclude": ["vpcs"],
        }))
        .unwrap();
        assert!(config.kind_enabled("instances"));
        assert!(!config.kind_enabled("vpcs"));
        assert!(!config.kind_enabled("buckets"));
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let retry = RetryConfig {
            max_attempts: 5,
            base_delay_ms: 100,
            cap_delay_ms: 350,
        };
        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(retry.delay_for_attempt(3), Duration::from_millis(350));
        assert_eq!(retry.delay_for_attempt(4), Duration::from_millis(350));
    }

    #[test]
    fn config_never_carries_credentials() {
        let config: ConnectorConfig = serde_json::from_value(serde_json::json!({
            "credential_ref": "OKTA",
        }))
        .unwrap();
        assert_eq!(config.credential_ref.as_deref(), Some("OKTA"));
    }
}
