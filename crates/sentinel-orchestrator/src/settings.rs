//! Orchestrator configuration.
//!
//! Loaded from (in priority order):
//! 1. Environment variables (SENTINEL__ prefix, `__` separator)
//! 2. Config file (sentinel.toml)
//! 3. Defaults

use serde::Deserialize;

use sentinel_connectors::{ConnectorConfig, ConnectorType};
use sentinel_core::config::StalenessPolicy;
use sentinel_core::SentinelError;

use crate::orchestrator::ScheduleEntry;

#[derive(Debug, Clone, Deserialize)]
pub struct Neo4jSettings {
    #[serde(default = "default_neo4j_uri")]
    pub uri: String,
    #[serde(default = "default_neo4j_user")]
    pub user: String,
    #[serde(default = "default_neo4j_password")]
    pub password: String,
}

impl Default for Neo4jSettings {
    fn default() -> Self {
        Self {
            uri: default_neo4j_uri(),
            user: default_neo4j_user(),
            password: default_neo4j_password(),
        }
    }
}

/// A connector instance declared in configuration. Credentials stay in
/// the secret store; only the reference appears here.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectorEntry {
    pub name: String,
    pub connector_type: ConnectorType,
    #[serde(default)]
    pub config: ConnectorConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntelSettings {
    /// NVD API key; presence selects the higher rate regime.
    #[serde(default)]
    pub nvd_api_key: Option<String>,
    #[serde(default)]
    pub nvd_base_url: Option<String>,
    #[serde(default)]
    pub epss_base_url: Option<String>,
    #[serde(default)]
    pub kev_url: Option<String>,
    /// Path to the CPE mapping artifact.
    #[serde(default)]
    pub cpe_dictionary: Option<String>,
}

impl Default for IntelSettings {
    fn default() -> Self {
        Self {
            nvd_api_key: None,
            nvd_base_url: None,
            epss_base_url: None,
            kev_url: None,
            cpe_dictionary: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub neo4j: Neo4jSettings,

    /// Postgres DSN for scan history; absent means in-memory bookkeeping
    /// (development only).
    #[serde(default)]
    pub postgres_url: Option<String>,

    /// Root directory for engram objects.
    #[serde(default = "default_engram_dir")]
    pub engram_dir: String,

    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_runs: usize,

    #[serde(default)]
    pub staleness: StalenessPolicy,

    #[serde(default)]
    pub intel: IntelSettings,

    #[serde(default)]
    pub connectors: Vec<ConnectorEntry>,

    #[serde(default)]
    pub schedule: Vec<ScheduleEntry>,
}

impl Settings {
    /// Layer the config file under `SENTINEL__`-prefixed environment
    /// variables.
    pub fn load(file_prefix: &str) -> Result<Self, SentinelError> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(
                config::Environment::with_prefix("SENTINEL")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| SentinelError::Config(e.to_string()))?;

        cfg.try_deserialize()
            .map_err(|e| SentinelError::Config(e.to_string()))
    }
}

fn default_neo4j_uri() -> String {
    "bolt://localhost:7687".to_string()
}

fn default_neo4j_user() -> String {
    "neo4j".to_string()
}

fn default_neo4j_password() -> String {
    "sentinel-dev".to_string()
}

fn default_engram_dir() -> String {
    "./engrams".to_string()
}

fn default_max_concurrent() -> usize {
    4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_deserialize_from_toml() {
        let raw = r#"
            engram_dir = "/var/lib/sentinel/engrams"
            max_concurrent_runs = 8

            [neo4j]
            uri = "bolt://graph:7687"

            [intel]
            nvd_api_key = "key-ref"

            [[connectors]]
            name = "okta-prod"
            connector_type = "okta"

            [connectors.config]
            credential_ref = "OKTA"
            max_parallelism = 2

            [[schedule]]
            tenant_id = "2d2f1f6e-8cbb-4b91-9d8f-0d4e8f5a6b7c"
            connector = "okta-prod"
            interval_secs = 900
        "#;
        let settings: Settings = toml::from_str(raw).unwrap();
        assert_eq!(settings.neo4j.uri, "bolt://graph:7687");
        assert_eq!(settings.max_concurrent_runs, 8);
        assert_eq!(settings.connectors.len(), 1);
        assert_eq!(
            settings.connectors[0].config.credential_ref.as_deref(),
            Some("OKTA")
        );
        assert_eq!(settings.schedule[0].interval_secs, 900);
        assert!(settings.schedule[0].enabled);
    }
}
