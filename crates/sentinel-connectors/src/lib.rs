//! sentinel-connectors: asset discovery for the Sentinel knowledge graph.
//!
//! A uniform contract under which heterogeneous sources — cloud provider
//! APIs, identity providers, network scanners — produce normalized
//! batches of nodes and edges. The framework handles credentials,
//! retries, rate limiting, engram capture, and the single-batch graph
//! apply; connectors handle enumeration and normalization.

pub mod base;
pub mod cloud;
pub mod config;
pub mod credentials;
pub mod http;
pub mod identity;
pub mod network;
pub mod registry;
pub mod retry;
pub mod runner;

pub use base::{make_edge, Connector, SyncResult, SyncStatus};
pub use config::{ConnectorConfig, ConnectorType, RateLimitConfig, RetryConfig};
pub use credentials::{EnvSecretStore, MemorySecretStore, Secret, SecretStore, SecretString};
pub use registry::ConnectorRegistry;
pub use runner::{run_connector, RunDeps, RunOutcome, RunStatus};
