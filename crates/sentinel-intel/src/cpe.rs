//! Service-to-CPE resolution.
//!
//! The mapping from `(service name, version)` to CPE 2.3 identifiers is
//! a configuration artifact maintained by operators, loaded from TOML:
//!
//! ```toml
//! [[entry]]
//! name = "nginx"
//! version_prefix = "1.18"
//! cpes = ["cpe:2.3:a:f5:nginx:1.18.0:*:*:*:*:*:*:*"]
//!
//! [[entry]]
//! name = "openssh"
//! cpes = ["cpe:2.3:a:openbsd:openssh:-:*:*:*:*:*:*:*"]
//! ```
//!
//! The most specific match wins: an entry with a `version_prefix` beats
//! one without. Services without any mapping are skipped by the
//! correlation engine and recorded as dead-ends.

use serde::Deserialize;

use sentinel_core::SentinelError;

#[derive(Debug, Clone, Deserialize)]
pub struct CpeEntry {
    pub name: String,
    /// Matches versions starting with this prefix; absent means any.
    #[serde(default)]
    pub version_prefix: Option<String>,
    pub cpes: Vec<String>,
}

/// The declared mapping table.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CpeDictionary {
    #[serde(default, rename = "entry")]
    pub entries: Vec<CpeEntry>,
}

impl CpeDictionary {
    pub fn from_toml_str(raw: &str) -> Result<Self, SentinelError> {
        toml::from_str(raw).map_err(|e| SentinelError::Config(format!("cpe dictionary: {e}")))
    }

    pub fn from_path(path: &std::path::Path) -> Result<Self, SentinelError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SentinelError::Config(format!("cpe dictionary {}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    /// Candidate CPEs for a service, or empty when unmapped.
    pub fn resolve(&self, name: &str, version: Option<&str>) -> Vec<String> {
        let name = name.to_lowercase();

        let versioned = self.entries.iter().find(|e| {
            e.name.to_lowercase() == name
                && match (&e.version_prefix, version) {
                    (Some(prefix), Some(v)) => v.to_lowercase().starts_with(&prefix.to_lowercase()),
                    (Some(_), None) => false,
                    (None, _) => false,
                }
        });
        if let Some(entry) = versioned {
            return entry.cpes.clone();
        }

        self.entries
            .iter()
            .find(|e| e.name.to_lowercase() == name && e.version_prefix.is_none())
            .map(|e| e.cpes.clone())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[[entry]]
name = "nginx"
version_prefix = "1.18"
cpes = ["cpe:2.3:a:f5:nginx:1.18.0:*:*:*:*:*:*:*"]

[[entry]]
name = "nginx"
cpes = ["cpe:2.3:a:f5:nginx:-:*:*:*:*:*:*:*"]

[[entry]]
name = "openssh"
cpes = ["cpe:2.3:a:openbsd:openssh:-:*:*:*:*:*:*:*"]
"#;

    #[test]
    fn versioned_entry_beats_fallback() {
        let dict = CpeDictionary::from_toml_str(SAMPLE).unwrap();

        let exact = dict.resolve("nginx", Some("1.18.0"));
        assert_eq!(exact, vec!["cpe:2.3:a:f5:nginx:1.18.0:*:*:*:*:*:*:*"]);

        let fallback = dict.resolve("nginx", Some("1.25.4"));
        assert_eq!(fallback, vec!["cpe:2.3:a:f5:nginx:-:*:*:*:*:*:*:*"]);
    }

    #[test]
    fn name_matching_is_case_insensitive() {
        let dict = CpeDictionary::from_toml_str(SAMPLE).unwrap();
        assert!(!dict.resolve("OpenSSH", Some("9.6")).is_empty());
    }

    #[test]
    fn unmapped_services_resolve_to_nothing() {
        let dict = CpeDictionary::from_toml_str(SAMPLE).unwrap();
        assert!(dict.resolve("customd", Some("0.1")).is_empty());
    }

    #[test]
    fn malformed_artifact_is_a_config_error() {
        assert!(matches!(
            CpeDictionary::from_toml_str("entry = 3"),
            Err(SentinelError::Config(_))
        ));
    }
}
