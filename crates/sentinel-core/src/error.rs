use thiserror::Error;

/// Top-level error taxonomy for the Sentinel platform.
///
/// Kinds map to propagation policy: `Transient` is retried within the
/// declared budget, `EndpointMissing` is recorded as a dead-end and the
/// run continues, everything else is terminal for its unit of work.
#[derive(Error, Debug)]
pub enum SentinelError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Credential error for {connector}: {reason}")]
    Credential { connector: String, reason: String },

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Rate limited by source")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Timeout exceeded: {0}")]
    Timeout(String),

    #[error("Edge endpoint missing in tenant {tenant_id}: {node_id}")]
    EndpointMissing { tenant_id: String, node_id: String },

    #[error("Graph schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Run already in progress for {tenant_id}/{connector}")]
    AlreadyRunning { tenant_id: String, connector: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Engram store unavailable: {0}")]
    EngramStore(String),

    #[error("Graph error: {0}")]
    Graph(String),

    #[error("Tenant mismatch: operation under {expected} referenced {found}")]
    TenantMismatch { expected: String, found: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SentinelError {
    /// Whether this error is retryable under the backoff policy.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SentinelError::Transient(_)
                | SentinelError::RateLimited { .. }
                | SentinelError::Timeout(_)
        )
    }
}
