//! The scan orchestrator.
//!
//! Drives registered connectors on a schedule or on explicit request,
//! writes every run to scan history, and enforces exactly one `running`
//! run per `(tenant, connector)`. Cancellation is cooperative through
//! the context's cancel flag; shutdown refuses new runs and waits for
//! in-flight ones.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, Semaphore};

use sentinel_connectors::runner::{run_connector, RunDeps, RunOutcome};
use sentinel_connectors::{ConnectorRegistry, SecretStore};
use sentinel_core::config::StalenessPolicy;
use sentinel_core::events::EventBus;
use sentinel_core::types::{TenantId, TenantPlan};
use sentinel_core::{CancelFlag, ScanContext, SentinelError};
use sentinel_engram::store::EngramStore;
use sentinel_graph::GraphStore;

use crate::history::HistoryStore;

/// One scheduled connector run.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ScheduleEntry {
    pub tenant_id: uuid::Uuid,
    #[serde(default = "default_plan")]
    pub plan: TenantPlan,
    pub connector: String,
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_plan() -> TenantPlan {
    TenantPlan::Professional
}

fn default_interval() -> u64 {
    3600
}

fn default_true() -> bool {
    true
}

pub struct Orchestrator {
    registry: ConnectorRegistry,
    graph: Arc<dyn GraphStore>,
    secrets: Arc<dyn SecretStore>,
    engrams: Option<Arc<dyn EngramStore>>,
    history: Arc<dyn HistoryStore>,
    bus: EventBus,
    staleness: StalenessPolicy,
    /// In-flight runs, keyed by `(tenant, connector)`.
    active: Mutex<HashMap<(TenantId, String), CancelFlag>>,
    accepting: AtomicBool,
    max_concurrent: Arc<Semaphore>,
}

impl Orchestrator {
    pub fn new(
        registry: ConnectorRegistry,
        graph: Arc<dyn GraphStore>,
        secrets: Arc<dyn SecretStore>,
        engrams: Option<Arc<dyn EngramStore>>,
        history: Arc<dyn HistoryStore>,
        bus: EventBus,
        staleness: StalenessPolicy,
        max_concurrent_runs: usize,
    ) -> Self {
        Self {
            registry,
            graph,
            secrets,
            engrams,
            history,
            bus,
            staleness,
            active: Mutex::new(HashMap::new()),
            accepting: AtomicBool::new(true),
            max_concurrent: Arc::new(Semaphore::new(max_concurrent_runs.max(1))),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Mark crashed-run leftovers failed. Call once at startup.
    pub async fn recover(&self) -> Result<u64, SentinelError> {
        let recovered = self.history.recover_orphans().await?;
        if recovered > 0 {
            tracing::warn!(recovered, "Marked orphaned running scans as failed");
        }
        Ok(recovered)
    }

    /// Run one connector for one tenant, now.
    ///
    /// A second request while the same `(tenant, connector)` is running
    /// is rejected with `AlreadyRunning`.
    pub async fn run_once(
        &self,
        tenant_id: TenantId,
        plan: TenantPlan,
        connector_name: &str,
    ) -> Result<RunOutcome, SentinelError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(SentinelError::Internal(
                "orchestrator is shutting down; refusing new runs".to_string(),
            ));
        }
        let connector = self.registry.get(connector_name)?;

        let key = (tenant_id, connector_name.to_string());
        let cancel = CancelFlag::new();
        {
            let mut active = self.active.lock().await;
            if active.contains_key(&key) {
                return Err(SentinelError::AlreadyRunning {
                    tenant_id: tenant_id.to_string(),
                    connector: connector_name.to_string(),
                });
            }
            active.insert(key.clone(), cancel.clone());
        }

        let _permit = self
            .max_concurrent
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SentinelError::Internal("run semaphore closed".to_string()))?;

        let started_at = Utc::now();
        let ctx = ScanContext::with_cancel(tenant_id, started_at, cancel);
        let scan_type = connector.connector_type().as_str().to_string();

        let scan_row = self
            .history
            .record_start(tenant_id, connector_name, &scan_type, connector_name, started_at)
            .await;

        let deps = RunDeps {
            graph: self.graph.as_ref(),
            secrets: self.secrets.as_ref(),
            engrams: self.engrams.as_deref(),
            bus: &self.bus,
            staleness: &self.staleness,
            plan,
        };
        let outcome = run_connector(connector.as_ref(), &ctx, &deps).await;

        let completed_at = Utc::now();
        match scan_row {
            Ok(scan_id) => {
                if let Err(e) = self
                    .history
                    .record_finish(scan_id, tenant_id, &outcome, completed_at)
                    .await
                {
                    tracing::error!(error = %e, "Failed to close scan-history row");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to open scan-history row");
            }
        }
        if let Err(e) = self
            .history
            .audit(
                tenant_id,
                "connector_run",
                "connector",
                Some(connector_name),
                serde_json::json!({
                    "status": outcome.status.as_str(),
                    "nodes_found": outcome.nodes_found,
                    "nodes_updated": outcome.nodes_updated,
                }),
            )
            .await
        {
            tracing::warn!(error = %e, "Audit write failed");
        }

        self.active.lock().await.remove(&key);

        tracing::info!(
            tenant_id = %tenant_id,
            connector = connector_name,
            status = outcome.status.as_str(),
            nodes_found = outcome.nodes_found,
            nodes_updated = outcome.nodes_updated,
            nodes_stale = outcome.nodes_stale,
            duration_ms = outcome.duration_ms,
            "Connector run finished"
        );
        Ok(outcome)
    }

    /// Request cooperative cancellation of an in-flight run.
    pub async fn cancel(&self, tenant_id: TenantId, connector_name: &str) -> bool {
        let active = self.active.lock().await;
        match active.get(&(tenant_id, connector_name.to_string())) {
            Some(flag) => {
                flag.cancel();
                true
            }
            None => false,
        }
    }

    /// Run the schedule until shutdown: one task per enabled entry.
    pub async fn run_daemon(self: Arc<Self>, schedule: Vec<ScheduleEntry>) {
        let mut handles = Vec::new();
        for entry in schedule {
            if !entry.enabled {
                tracing::info!(connector = %entry.connector, "Schedule entry disabled, skipping");
                continue;
            }

            let orchestrator = self.clone();
            let handle = tokio::spawn(async move {
                let tenant_id = TenantId(entry.tenant_id);
                let mut ticker =
                    tokio::time::interval(Duration::from_secs(entry.interval_secs.max(30)));
                loop {
                    ticker.tick().await;
                    if !orchestrator.accepting.load(Ordering::SeqCst) {
                        break;
                    }
                    match orchestrator
                        .run_once(tenant_id, entry.plan, &entry.connector)
                        .await
                    {
                        Ok(_) => {}
                        Err(SentinelError::AlreadyRunning { .. }) => {
                            tracing::warn!(
                                connector = %entry.connector,
                                "Previous run still in flight; skipping tick"
                            );
                        }
                        Err(e) => {
                            tracing::error!(connector = %entry.connector, error = %e, "Scheduled run failed");
                        }
                    }
                }
            });
            handles.push(handle);
        }

        tracing::info!(entries = handles.len(), "Scheduler started");
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Schedule task panicked");
            }
        }
    }

    /// Refuse new runs, cancel nothing, and wait for in-flight runs to
    /// drain or for the budget to expire.
    pub async fn shutdown(&self, budget: Duration) {
        self.accepting.store(false, Ordering::SeqCst);
        let deadline = tokio::time::Instant::now() + budget;

        loop {
            let in_flight = self.active.lock().await.len();
            if in_flight == 0 {
                tracing::info!("Shutdown complete; no runs in flight");
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(in_flight, "Shutdown budget expired with runs in flight");
                // Past the budget, cancel whatever is left.
                for flag in self.active.lock().await.values() {
                    flag.cancel();
                }
                return;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sentinel_connectors::base::{Connector, SyncResult};
    use sentinel_connectors::credentials::{MemorySecretStore, Secret};
    use sentinel_connectors::{ConnectorConfig, ConnectorType};
    use sentinel_engram::session::EngramSession;
    use sentinel_graph::MemoryGraph;

    use crate::history::MemoryHistory;

    /// Connector that blocks until its context is cancelled, then yields
    /// nothing.
    struct SlowConnector {
        config: ConnectorConfig,
    }

    #[async_trait]
    impl Connector for SlowConnector {
        fn name(&self) -> &str {
            "slow"
        }

        fn connector_type(&self) -> ConnectorType {
            ConnectorType::Nmap
        }

        fn config(&self) -> &ConnectorConfig {
            &self.config
        }

        async fn health_check(
            &self,
            _ctx: &ScanContext,
            _creds: &Secret,
        ) -> Result<(), SentinelError> {
            Ok(())
        }

        async fn discover(
            &self,
            ctx: &ScanContext,
            _creds: &Secret,
            _session: &mut EngramSession,
        ) -> Result<SyncResult, SentinelError> {
            loop {
                ctx.check_cancelled()?;
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }

    fn orchestrator() -> Arc<Orchestrator> {
        let bus = EventBus::with_capacity(64);
        let mut registry = ConnectorRegistry::new();
        registry.register(Arc::new(SlowConnector {
            config: ConnectorConfig::default(),
        }));
        Arc::new(Orchestrator::new(
            registry,
            Arc::new(MemoryGraph::new(bus.clone())),
            Arc::new(MemorySecretStore::new()),
            None,
            Arc::new(MemoryHistory::new()),
            bus,
            StalenessPolicy::default(),
            4,
        ))
    }

    #[tokio::test]
    async fn duplicate_run_is_rejected_then_cancel_drains() {
        let orchestrator = orchestrator();
        let tenant = TenantId::new();

        let background = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                orchestrator
                    .run_once(tenant, TenantPlan::Professional, "slow")
                    .await
            })
        };

        // Give the first run time to claim the slot.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = orchestrator
            .run_once(tenant, TenantPlan::Professional, "slow")
            .await;
        assert!(matches!(
            second,
            Err(SentinelError::AlreadyRunning { .. })
        ));

        assert!(orchestrator.cancel(tenant, "slow").await);
        let outcome = background.await.unwrap().unwrap();
        assert_eq!(
            outcome.status,
            sentinel_connectors::RunStatus::Cancelled
        );

        // The slot is free again.
        assert!(!orchestrator.cancel(tenant, "slow").await);
    }

    #[tokio::test]
    async fn unknown_connector_is_a_config_error() {
        let orchestrator = orchestrator();
        let result = orchestrator
            .run_once(TenantId::new(), TenantPlan::Starter, "nope")
            .await;
        assert!(matches!(result, Err(SentinelError::Config(_))));
    }

    #[tokio::test]
    async fn shutdown_refuses_new_runs() {
        let orchestrator = orchestrator();
        orchestrator.shutdown(Duration::from_millis(10)).await;

        let result = orchestrator
            .run_once(TenantId::new(), TenantPlan::Starter, "slow")
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn history_rows_reflect_run_status() {
        let bus = EventBus::with_capacity(64);
        let history = Arc::new(MemoryHistory::new());
        let mut registry = ConnectorRegistry::new();
        registry.register(Arc::new(SlowConnector {
            config: ConnectorConfig::default(),
        }));
        let orchestrator = Arc::new(Orchestrator::new(
            registry,
            Arc::new(MemoryGraph::new(bus.clone())),
            Arc::new(MemorySecretStore::new()),
            None,
            history.clone(),
            bus,
            StalenessPolicy::default(),
            4,
        ));

        let tenant = TenantId::new();
        let background = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                orchestrator
                    .run_once(tenant, TenantPlan::Professional, "slow")
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        orchestrator.cancel(tenant, "slow").await;
        background.await.unwrap().unwrap();

        let rows = history.list_recent(tenant, 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, "cancelled");
        assert!(rows[0].engram_session.is_some());
    }
}
