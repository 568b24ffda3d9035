//! The framework's execution contract.
//!
//! One function drives every connector the same way: open an engram
//! session, resolve credentials, health-check, discover, apply the batch
//! through the graph adapter, sweep staleness, close the session with
//! counts and status. Engram storage failures never abort the run.

use std::time::Instant;

use uuid::Uuid;

use sentinel_core::config::StalenessPolicy;
use sentinel_core::events::{EventBus, EventPayload, EventSource, SentinelEvent};
use sentinel_core::types::TenantPlan;
use sentinel_core::{ScanContext, SentinelError};
use sentinel_engram::session::EngramSession;
use sentinel_engram::store::EngramStore;
use sentinel_engram::{Engram, SessionOutcome};
use sentinel_graph::GraphStore;

use crate::base::{Connector, SyncStatus};
use crate::credentials::{Secret, SecretStore};

/// Labels swept for staleness after each run.
const SWEPT_LABELS: &[&str] = &["Host", "Service"];

/// Terminal status of a connector run, as recorded in scan history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Partial,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

/// Everything a run needs besides the connector itself.
pub struct RunDeps<'a> {
    pub graph: &'a dyn GraphStore,
    pub secrets: &'a dyn SecretStore,
    pub engrams: Option<&'a dyn EngramStore>,
    pub bus: &'a EventBus,
    pub staleness: &'a StalenessPolicy,
    pub plan: TenantPlan,
}

/// Summary of one connector run.
#[derive(Debug)]
pub struct RunOutcome {
    pub scan_id: Uuid,
    pub status: RunStatus,
    pub nodes_found: u32,
    pub nodes_updated: u32,
    pub nodes_stale: u32,
    pub edges_created: u32,
    pub dead_ends: u32,
    pub engram_session: Option<Uuid>,
    pub engram_address: Option<String>,
    pub error_message: Option<String>,
    pub duration_ms: u64,
}

impl RunOutcome {
    fn empty(scan_id: Uuid, status: RunStatus) -> Self {
        Self {
            scan_id,
            status,
            nodes_found: 0,
            nodes_updated: 0,
            nodes_stale: 0,
            edges_created: 0,
            dead_ends: 0,
            engram_session: None,
            engram_address: None,
            error_message: None,
            duration_ms: 0,
        }
    }
}

/// Run one connector end to end.
pub async fn run_connector(
    connector: &dyn Connector,
    ctx: &ScanContext,
    deps: &RunDeps<'_>,
) -> RunOutcome {
    let scan_id = Uuid::new_v4();
    let started = Instant::now();
    let name = connector.name().to_string();
    let scan_type = connector.connector_type().as_str().to_string();

    deps.bus.publish(SentinelEvent::new(
        ctx.tenant_id,
        EventSource::Connector,
        EventPayload::ScanStarted {
            scan_id,
            scan_type: scan_type.clone(),
            target: name.clone(),
        },
        ctx.now,
    ));

    let mut session = EngramSession::open(
        ctx.tenant_id.0,
        &format!("connector/{name}"),
        &format!("Sync assets from {name}"),
        serde_json::json!({
            "connector": name,
            "connector_type": scan_type,
            "regions": connector.config().regions,
            "max_parallelism": connector.config().max_parallelism,
        }),
    );
    let session_id = session.id().0;

    // 1. Credentials. Terminal for the run on failure.
    let creds = match resolve_credentials(connector, deps.secrets).await {
        Ok(creds) => creds,
        Err(e) => {
            session.record_dead_end(
                "credential resolution failed",
                serde_json::json!({"error_class": "CredentialError"}),
            );
            let engram = session.close(SessionOutcome::Failed, "credentials unavailable");
            let address = store_engram(deps, ctx, &engram);
            let mut outcome = RunOutcome::empty(scan_id, RunStatus::Failed);
            outcome.engram_session = Some(session_id);
            outcome.engram_address = address;
            outcome.error_message = Some(e.to_string());
            outcome.duration_ms = started.elapsed().as_millis() as u64;
            return outcome;
        }
    };

    // 2. Health check.
    if let Err(e) = connector.health_check(ctx, &creds).await {
        session.record_dead_end(
            "health check failed",
            serde_json::json!({"error": e.to_string()}),
        );
        let engram = session.close(SessionOutcome::Failed, "source unreachable");
        let address = store_engram(deps, ctx, &engram);
        let mut outcome = RunOutcome::empty(scan_id, RunStatus::Failed);
        outcome.engram_session = Some(session_id);
        outcome.engram_address = address;
        outcome.error_message = Some(e.to_string());
        outcome.duration_ms = started.elapsed().as_millis() as u64;
        return outcome;
    }

    // 3. Discover.
    let result = match connector.discover(ctx, &creds, &mut session).await {
        Ok(result) => result,
        Err(e) => {
            let (status, summary) = terminal_status(&e);
            session.record_dead_end(
                "discovery aborted",
                serde_json::json!({"error": e.to_string()}),
            );
            let engram = session.close(SessionOutcome::Failed, summary);
            let address = store_engram(deps, ctx, &engram);
            let mut outcome = RunOutcome::empty(scan_id, status);
            outcome.engram_session = Some(session_id);
            outcome.engram_address = address;
            outcome.error_message = Some(e.to_string());
            outcome.duration_ms = started.elapsed().as_millis() as u64;
            return outcome;
        }
    };

    let sync_status = result.status();
    let counts = result.counts();
    let errors = result.errors.clone();
    session.record_action(
        "discovery",
        &name,
        matches!(sync_status, SyncStatus::Completed),
        counts.iter().map(|(k, v)| (*k, *v)),
    );

    if sync_status == SyncStatus::Failed {
        let engram = session.close(SessionOutcome::Failed, "no work could be done");
        let address = store_engram(deps, ctx, &engram);
        let mut outcome = RunOutcome::empty(scan_id, RunStatus::Failed);
        outcome.engram_session = Some(session_id);
        outcome.engram_address = address;
        outcome.error_message = errors.first().cloned();
        outcome.duration_ms = started.elapsed().as_millis() as u64;
        return outcome;
    }

    // 4. Apply as one batch.
    let (nodes, edges) = result.into_batch();
    let batch = match deps.graph.apply_batch(ctx, nodes, edges).await {
        Ok(batch) => batch,
        Err(e) => {
            let (status, summary) = terminal_status(&e);
            session.record_dead_end(
                "graph batch failed",
                serde_json::json!({"error": e.to_string()}),
            );
            let engram = session.close(SessionOutcome::Failed, summary);
            let address = store_engram(deps, ctx, &engram);
            let mut outcome = RunOutcome::empty(scan_id, status);
            outcome.engram_session = Some(session_id);
            outcome.engram_address = address;
            outcome.error_message = Some(e.to_string());
            outcome.duration_ms = started.elapsed().as_millis() as u64;
            return outcome;
        }
    };

    for dead_end in &batch.dead_ends {
        session.record_dead_end(dead_end, serde_json::json!({"error_class": "EndpointMissing"}));
    }
    session.record_action(
        "graph_mutation",
        "apply_batch",
        true,
        [
            ("nodes_created", batch.nodes_created as u64),
            ("nodes_updated", batch.nodes_updated as u64),
            ("edges_created", batch.edges_created as u64),
            ("edges_updated", batch.edges_updated as u64),
            ("edges_dropped", batch.dead_ends.len() as u64),
        ],
    );

    // 5. Staleness sweep for the asset labels this framework manages.
    let mut nodes_stale = 0u64;
    for &label in SWEPT_LABELS {
        let cutoff = ctx.now - deps.staleness.ttl(deps.plan, label);
        match deps.graph.sweep_stale(ctx, label, cutoff).await {
            Ok(marked) => nodes_stale += marked,
            Err(e) => {
                tracing::warn!(label, error = %e, "Staleness sweep failed");
            }
        }
    }

    let partial = !errors.is_empty() || !batch.dead_ends.is_empty();
    let (run_status, session_outcome, summary) = if partial {
        (
            RunStatus::Partial,
            SessionOutcome::Partial,
            "discovery completed with dead-ends",
        )
    } else {
        (
            RunStatus::Completed,
            SessionOutcome::Success,
            "discovery completed",
        )
    };

    let engram = session.close(
        session_outcome,
        &format!(
            "{summary}: {} found, {} updated",
            batch.nodes_created, batch.nodes_updated
        ),
    );
    let address = store_engram(deps, ctx, &engram);

    let duration_ms = started.elapsed().as_millis() as u64;
    deps.bus.publish(SentinelEvent::new(
        ctx.tenant_id,
        EventSource::Connector,
        EventPayload::ScanCompleted {
            scan_id,
            nodes_found: batch.nodes_created,
            nodes_updated: batch.nodes_updated,
            nodes_stale: nodes_stale as u32,
            duration_ms,
        },
        ctx.now,
    ));

    RunOutcome {
        scan_id,
        status: run_status,
        nodes_found: batch.nodes_created,
        nodes_updated: batch.nodes_updated,
        nodes_stale: nodes_stale as u32,
        edges_created: batch.edges_created,
        dead_ends: batch.dead_ends.len() as u32 + errors.len() as u32,
        engram_session: Some(session_id),
        engram_address: address,
        error_message: errors.first().cloned(),
        duration_ms,
    }
}

async fn resolve_credentials(
    connector: &dyn Connector,
    secrets: &dyn SecretStore,
) -> Result<Secret, SentinelError> {
    match &connector.config().credential_ref {
        Some(credential_ref) => secrets.resolve(credential_ref).await,
        None => Ok(Secret::default()),
    }
}

fn terminal_status(e: &SentinelError) -> (RunStatus, &'static str) {
    if matches!(e, SentinelError::Cancelled) {
        (RunStatus::Cancelled, "cancelled")
    } else {
        (RunStatus::Failed, "discovery failed")
    }
}

fn store_engram(deps: &RunDeps<'_>, ctx: &ScanContext, engram: &Engram) -> Option<String> {
    persist_engram(deps.bus, deps.engrams, ctx, engram)
}

/// Persist a sealed engram and fan out the engram events. Failures are
/// logged and swallowed: engram trouble never aborts the work it
/// documents.
pub fn persist_engram(
    bus: &EventBus,
    store: Option<&dyn EngramStore>,
    ctx: &ScanContext,
    engram: &Engram,
) -> Option<String> {
    if engram.records_dropped > 0 {
        bus.publish(SentinelEvent::new(
            ctx.tenant_id,
            EventSource::Engram,
            EventPayload::SessionDropped {
                session_id: engram.id.0,
                records: engram.records_dropped,
            },
            ctx.now,
        ));
    }

    let store = store?;
    match store.save(engram) {
        Ok(address) => {
            bus.publish(SentinelEvent::new(
                ctx.tenant_id,
                EventSource::Engram,
                EventPayload::EngramRecorded {
                    session_id: engram.id.0,
                    agent_type: engram.agent_id.clone(),
                    intent: engram.intent.clone(),
                    action_count: engram.action_count(),
                },
                ctx.now,
            ));
            Some(address)
        }
        Err(e) => {
            tracing::warn!(engram_id = %engram.id, error = %e, "Failed to store engram");
            None
        }
    }
}
