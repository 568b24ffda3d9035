//! Durable scan history, connector state, and audit log.
//!
//! One row per run: target, type, status, counts, duration, link to the
//! engram session, error summary. Every table carries `tenant_id` and
//! every query binds it. The Postgres implementation applies its schema
//! at startup; the in-memory implementation backs tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use sentinel_connectors::{RunOutcome, RunStatus};
use sentinel_core::types::TenantId;
use sentinel_core::SentinelError;

/// A scan-history row.
#[derive(Debug, Clone)]
pub struct ScanRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub connector: String,
    pub scan_type: String,
    pub target: String,
    pub status: String,
    pub nodes_found: i32,
    pub nodes_updated: i32,
    pub nodes_stale: i32,
    pub engram_session: Option<Uuid>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

/// Persistence seam for run bookkeeping.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Open a `running` row; returns its id.
    async fn record_start(
        &self,
        tenant_id: TenantId,
        connector: &str,
        scan_type: &str,
        target: &str,
        started_at: DateTime<Utc>,
    ) -> Result<Uuid, SentinelError>;

    /// Close a row with the run's outcome.
    async fn record_finish(
        &self,
        scan_id: Uuid,
        tenant_id: TenantId,
        outcome: &RunOutcome,
        completed_at: DateTime<Utc>,
    ) -> Result<(), SentinelError>;

    /// Rows a crashed process left `running`; marked failed at startup.
    async fn recover_orphans(&self) -> Result<u64, SentinelError>;

    /// Append an audit-log row.
    async fn audit(
        &self,
        tenant_id: TenantId,
        action: &str,
        resource_type: &str,
        resource_id: Option<&str>,
        details: serde_json::Value,
    ) -> Result<(), SentinelError>;

    /// Recent runs for a tenant, newest first.
    async fn list_recent(
        &self,
        tenant_id: TenantId,
        limit: i64,
    ) -> Result<Vec<ScanRecord>, SentinelError>;
}

// ── Postgres ──────────────────────────────────────────────────────

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS tenants (
    id UUID PRIMARY KEY,
    name VARCHAR(255) NOT NULL,
    slug VARCHAR(255) UNIQUE NOT NULL,
    plan VARCHAR(32) NOT NULL DEFAULT 'starter',
    max_assets INT NOT NULL DEFAULT 1000,
    settings JSONB NOT NULL DEFAULT '{}',
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS connectors (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    tenant_id UUID NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    connector_type VARCHAR(32) NOT NULL,
    name VARCHAR(255) NOT NULL,
    config JSONB NOT NULL DEFAULT '{}',
    credential_ref VARCHAR(255),
    enabled BOOLEAN NOT NULL DEFAULT true,
    last_sync_at TIMESTAMPTZ,
    last_sync_status VARCHAR(32),
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (tenant_id, connector_type, name)
);

CREATE TABLE IF NOT EXISTS scan_history (
    id UUID PRIMARY KEY,
    tenant_id UUID NOT NULL,
    connector_id UUID,
    connector VARCHAR(255) NOT NULL,
    scan_type VARCHAR(32) NOT NULL,
    target VARCHAR(512) NOT NULL,
    status VARCHAR(32) NOT NULL,
    nodes_found INT NOT NULL DEFAULT 0,
    nodes_updated INT NOT NULL DEFAULT 0,
    nodes_stale INT NOT NULL DEFAULT 0,
    engram_session UUID,
    error_message TEXT,
    started_at TIMESTAMPTZ NOT NULL,
    completed_at TIMESTAMPTZ,
    duration_ms BIGINT
);

CREATE TABLE IF NOT EXISTS audit_log (
    id BIGSERIAL PRIMARY KEY,
    tenant_id UUID NOT NULL,
    user_id UUID,
    action VARCHAR(100) NOT NULL,
    resource_type VARCHAR(50) NOT NULL,
    resource_id VARCHAR(255),
    details JSONB NOT NULL DEFAULT '{}',
    ip_address INET,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_scan_history_tenant
    ON scan_history(tenant_id, started_at);
CREATE INDEX IF NOT EXISTS idx_scan_history_status
    ON scan_history(tenant_id, status);
CREATE INDEX IF NOT EXISTS idx_audit_tenant
    ON audit_log(tenant_id, created_at);
CREATE INDEX IF NOT EXISTS idx_connectors_tenant
    ON connectors(tenant_id);
"#;

/// Postgres-backed history store.
pub struct PgHistory {
    pool: PgPool,
}

impl PgHistory {
    /// Connect and apply the schema.
    pub async fn connect(database_url: &str) -> Result<Self, SentinelError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| SentinelError::Config(format!("postgres: {e}")))?;

        sqlx::query(SCHEMA_SQL)
            .execute(&pool)
            .await
            .map_err(|e| SentinelError::SchemaMismatch(format!("app-state schema: {e}")))?;

        tracing::info!("App-state schema applied");
        Ok(Self { pool })
    }

    /// Stamp the connector row after a run.
    pub async fn update_connector_sync(
        &self,
        tenant_id: TenantId,
        connector: &str,
        status: RunStatus,
        at: DateTime<Utc>,
    ) -> Result<(), SentinelError> {
        sqlx::query(
            "UPDATE connectors
             SET last_sync_at = $1, last_sync_status = $2, updated_at = NOW()
             WHERE tenant_id = $3 AND name = $4",
        )
        .bind(at)
        .bind(status.as_str())
        .bind(tenant_id.0)
        .bind(connector)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}

fn db_err(e: sqlx::Error) -> SentinelError {
    SentinelError::Internal(format!("app-state store: {e}"))
}

#[async_trait]
impl HistoryStore for PgHistory {
    async fn record_start(
        &self,
        tenant_id: TenantId,
        connector: &str,
        scan_type: &str,
        target: &str,
        started_at: DateTime<Utc>,
    ) -> Result<Uuid, SentinelError> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO scan_history
               (id, tenant_id, connector, scan_type, target, status, started_at)
             VALUES ($1, $2, $3, $4, $5, 'running', $6)",
        )
        .bind(id)
        .bind(tenant_id.0)
        .bind(connector)
        .bind(scan_type)
        .bind(target)
        .bind(started_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(id)
    }

    async fn record_finish(
        &self,
        scan_id: Uuid,
        tenant_id: TenantId,
        outcome: &RunOutcome,
        completed_at: DateTime<Utc>,
    ) -> Result<(), SentinelError> {
        sqlx::query(
            "UPDATE scan_history SET
               status = $1, nodes_found = $2, nodes_updated = $3,
               nodes_stale = $4, engram_session = $5, error_message = $6,
               completed_at = $7, duration_ms = $8
             WHERE id = $9 AND tenant_id = $10",
        )
        .bind(history_status(outcome.status))
        .bind(outcome.nodes_found as i32)
        .bind(outcome.nodes_updated as i32)
        .bind(outcome.nodes_stale as i32)
        .bind(outcome.engram_session)
        .bind(outcome.error_message.as_deref())
        .bind(completed_at)
        .bind(outcome.duration_ms as i64)
        .bind(scan_id)
        .bind(tenant_id.0)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn recover_orphans(&self) -> Result<u64, SentinelError> {
        let result = sqlx::query(
            "UPDATE scan_history
             SET status = 'failed',
                 error_message = 'orchestrator restarted while run was in flight',
                 completed_at = NOW()
             WHERE status = 'running'",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn audit(
        &self,
        tenant_id: TenantId,
        action: &str,
        resource_type: &str,
        resource_id: Option<&str>,
        details: serde_json::Value,
    ) -> Result<(), SentinelError> {
        sqlx::query(
            "INSERT INTO audit_log (tenant_id, action, resource_type, resource_id, details)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(tenant_id.0)
        .bind(action)
        .bind(resource_type)
        .bind(resource_id)
        .bind(details)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn list_recent(
        &self,
        tenant_id: TenantId,
        limit: i64,
    ) -> Result<Vec<ScanRecord>, SentinelError> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, connector, scan_type, target, status,
                    nodes_found, nodes_updated, nodes_stale, engram_session,
                    error_message, started_at, completed_at, duration_ms
             FROM scan_history
             WHERE tenant_id = $1
             ORDER BY started_at DESC
             LIMIT $2",
        )
        .bind(tenant_id.0)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows
            .into_iter()
            .map(|row| ScanRecord {
                id: row.get("id"),
                tenant_id: row.get("tenant_id"),
                connector: row.get("connector"),
                scan_type: row.get("scan_type"),
                target: row.get("target"),
                status: row.get("status"),
                nodes_found: row.get("nodes_found"),
                nodes_updated: row.get("nodes_updated"),
                nodes_stale: row.get("nodes_stale"),
                engram_session: row.get("engram_session"),
                error_message: row.get("error_message"),
                started_at: row.get("started_at"),
                completed_at: row.get("completed_at"),
                duration_ms: row.get("duration_ms"),
            })
            .collect())
    }
}

/// Scan-history status values: `partial` runs are completed runs whose
/// detail lives in the engram trail.
fn history_status(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Completed | RunStatus::Partial => "completed",
        RunStatus::Failed => "failed",
        RunStatus::Cancelled => "cancelled",
    }
}

// ── In-memory (tests, embedded) ───────────────────────────────────

/// History store backed by a Vec; used by tests and local development.
#[derive(Default)]
pub struct MemoryHistory {
    records: tokio::sync::Mutex<Vec<ScanRecord>>,
    audits: tokio::sync::Mutex<Vec<(Uuid, String)>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistory {
    async fn record_start(
        &self,
        tenant_id: TenantId,
        connector: &str,
        scan_type: &str,
        target: &str,
        started_at: DateTime<Utc>,
    ) -> Result<Uuid, SentinelError> {
        let id = Uuid::new_v4();
        self.records.lock().await.push(ScanRecord {
            id,
            tenant_id: tenant_id.0,
            connector: connector.to_string(),
            scan_type: scan_type.to_string(),
            target: target.to_string(),
            status: "running".to_string(),
            nodes_found: 0,
            nodes_updated: 0,
            nodes_stale: 0,
            engram_session: None,
            error_message: None,
            started_at,
            completed_at: None,
            duration_ms: None,
        });
        Ok(id)
    }

    async fn record_finish(
        &self,
        scan_id: Uuid,
        tenant_id: TenantId,
        outcome: &RunOutcome,
        completed_at: DateTime<Utc>,
    ) -> Result<(), SentinelError> {
        let mut records = self.records.lock().await;
        if let Some(record) = records
            .iter_mut()
            .find(|r| r.id == scan_id && r.tenant_id == tenant_id.0)
        {
            record.status = history_status(outcome.status).to_string();
            record.nodes_found = outcome.nodes_found as i32;
            record.nodes_updated = outcome.nodes_updated as i32;
            record.nodes_stale = outcome.nodes_stale as i32;
            record.engram_session = outcome.engram_session;
            record.error_message = outcome.error_message.clone();
            record.completed_at = Some(completed_at);
            record.duration_ms = Some(outcome.duration_ms as i64);
        }
        Ok(())
    }

    async fn recover_orphans(&self) -> Result<u64, SentinelError> {
        let mut records = self.records.lock().await;
        let mut recovered = 0;
        for record in records.iter_mut().filter(|r| r.status == "running") {
            record.status = "failed".to_string();
            recovered += 1;
        }
        Ok(recovered)
    }

    async fn audit(
        &self,
        tenant_id: TenantId,
        action: &str,
        _resource_type: &str,
        _resource_id: Option<&str>,
        _details: serde_json::Value,
    ) -> Result<(), SentinelError> {
        self.audits
            .lock()
            .await
            .push((tenant_id.0, action.to_string()));
        Ok(())
    }

    async fn list_recent(
        &self,
        tenant_id: TenantId,
        limit: i64,
    ) -> Result<Vec<ScanRecord>, SentinelError> {
        let records = self.records.lock().await;
        let mut out: Vec<ScanRecord> = records
            .iter()
            .filter(|r| r.tenant_id == tenant_id.0)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        out.truncate(limit as usize);
        Ok(out)
    }
}
