//! Connector registry.
//!
//! An explicit value populated at startup and handed to the
//! orchestrator. Nothing here is process-global: tests and embedders
//! build their own.

use std::collections::BTreeMap;
use std::sync::Arc;

use sentinel_core::SentinelError;

use crate::base::Connector;

#[derive(Default)]
pub struct ConnectorRegistry {
    connectors: BTreeMap<String, Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connector under its name. Replaces any previous
    /// registration with the same name.
    pub fn register(&mut self, connector: Arc<dyn Connector>) {
        let name = connector.name().to_string();
        tracing::debug!(connector = %name, "Registered connector");
        self.connectors.insert(name, connector);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Connector>, SentinelError> {
        self.connectors.get(name).cloned().ok_or_else(|| {
            SentinelError::Config(format!(
                "unknown connector '{name}'; available: {}",
                self.names().join(", ")
            ))
        })
    }

    pub fn names(&self) -> Vec<String> {
        self.connectors.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Connector>> {
        self.connectors.values()
    }
}
