//! Credential resolution against a secret store.
//!
//! Connectors carry an opaque `credential_ref`; the framework resolves it
//! at run time. Secret values never appear in configuration, logs,
//! `SyncResult`s, or engrams — `SecretString` redacts itself everywhere
//! it could be printed.

use std::collections::HashMap;

use async_trait::async_trait;

use sentinel_core::SentinelError;

/// A single secret value. Redacted in Debug/Display; read it only via
/// [`SecretString::expose`].
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretString(****)")
    }
}

impl std::fmt::Display for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("****")
    }
}

/// A resolved credential bundle: named secret fields for one source.
#[derive(Debug, Clone, Default)]
pub struct Secret {
    values: HashMap<String, SecretString>,
}

impl Secret {
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), SecretString::new(v)))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&SecretString> {
        self.values.get(key)
    }

    /// A required field, or a `Credential` error naming the missing key
    /// (never the value).
    pub fn require(&self, connector: &str, key: &str) -> Result<&SecretString, SentinelError> {
        self.values
            .get(key)
            .ok_or_else(|| SentinelError::Credential {
                connector: connector.to_string(),
                reason: format!("missing secret field: {key}"),
            })
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Resolves opaque credential references into secret bundles.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn resolve(&self, credential_ref: &str) -> Result<Secret, SentinelError>;
}

/// Secret store backed by process environment variables.
///
/// A reference `OKTA` resolves to every `OKTA_*` variable, keyed by the
/// lowercased remainder: `OKTA_API_TOKEN` becomes `api_token`.
pub struct EnvSecretStore;

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn resolve(&self, credential_ref: &str) -> Result<Secret, SentinelError> {
        let prefix = format!("{}_", credential_ref.to_uppercase());
        let values: HashMap<String, SecretString> = std::env::vars()
            .filter_map(|(key, value)| {
                key.strip_prefix(&prefix)
                    .map(|rest| (rest.to_lowercase(), SecretString::new(value)))
            })
            .collect();

        if values.is_empty() {
            return Err(SentinelError::Credential {
                connector: credential_ref.to_string(),
                reason: format!("no environment variables under {prefix}*"),
            });
        }
        Ok(Secret { values })
    }
}

/// In-memory secret store for tests and embedded wiring.
#[derive(Default)]
pub struct MemorySecretStore {
    secrets: HashMap<String, Secret>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(mut self, credential_ref: &str, secret: Secret) -> Self {
        self.secrets.insert(credential_ref.to_string(), secret);
        self
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn resolve(&self, credential_ref: &str) -> Result<Secret, SentinelError> {
        self.secrets
            .get(credential_ref)
            .cloned()
            .ok_or_else(|| SentinelError::Credential {
                connector: credential_ref.to_string(),
                reason: "unknown credential reference".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_string_redacts_debug_and_display() {
        let secret = SecretString::new("hunter2");
        assert_eq!(format!("{secret:?}"), "SecretString(****)");
        assert_eq!(format!("{secret}"), "****");
        assert_eq!(secret.expose(), "hunter2");
    }

    #[test]
    fn require_names_key_not_value() {
        let secret = Secret::from_pairs([("api_token", "tok-123")]);
        assert!(secret.require("okta", "api_token").is_ok());

        let err = secret.require("okta", "domain").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("domain"));
        assert!(!message.contains("tok-123"));
    }

    #[tokio::test]
    async fn memory_store_resolves_known_refs() {
        let store = MemorySecretStore::new()
            .insert("OKTA", Secret::from_pairs([("api_token", "tok")]));

        assert!(store.resolve("OKTA").await.is_ok());
        assert!(matches!(
            store.resolve("MISSING").await,
            Err(SentinelError::Credential { .. })
        ));
    }
}
