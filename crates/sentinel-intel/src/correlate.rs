//! The vulnerability correlation engine.
//!
//! Walks a tenant's services, resolves each to candidate CPEs, pulls
//! intelligence from NVD (live), EPSS (live, batched), and KEV (cache),
//! and writes Vulnerability nodes plus `HAS_CVE` edges back through the
//! graph adapter. The three sources are joined per batch before any
//! write so each Vulnerability lands consistent; a source failing
//! degrades its fields to null and the run closes partial, never aborted.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use sentinel_connectors::runner::persist_engram;
use sentinel_core::events::{EventBus, EventPayload, EventSource, SentinelEvent};
use sentinel_core::types::{
    Edge, EdgeProperties, EdgeType, NodeId, Vulnerability, VulnSeverity,
};
use sentinel_core::{ScanContext, SentinelError};
use sentinel_engram::session::EngramSession;
use sentinel_engram::store::EngramStore;
use sentinel_engram::SessionOutcome;
use sentinel_graph::{GraphStore, NodeFilter, NodeRecord, Page, UpsertOutcome};

use crate::cpe::CpeDictionary;
use crate::epss::EpssClient;
use crate::kev::KevClient;
use crate::nvd::{NvdClient, NvdCveRecord};

const SERVICE_PAGE_SIZE: u32 = 100;
const MAX_CVES_PER_SERVICE: usize = 50;

/// Summary of one enrichment sweep.
#[derive(Debug, Default)]
pub struct CorrelationOutcome {
    pub services_scanned: u32,
    pub services_skipped: u32,
    pub cves_evaluated: u32,
    pub vulnerabilities_found: u32,
    pub vulnerabilities_updated: u32,
    pub critical_count: u32,
    pub high_count: u32,
    pub kev_count: u32,
    pub outcome: Option<SessionOutcome>,
    pub engram_session: Option<uuid::Uuid>,
    pub errors: Vec<String>,
}

/// Correlates discovered services with known CVEs.
pub struct CorrelationEngine {
    graph: Arc<dyn GraphStore>,
    nvd: NvdClient,
    epss: EpssClient,
    kev: KevClient,
    dictionary: CpeDictionary,
    bus: EventBus,
    engrams: Option<Arc<dyn EngramStore>>,
}

impl CorrelationEngine {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        nvd: NvdClient,
        epss: EpssClient,
        kev: KevClient,
        dictionary: CpeDictionary,
        bus: EventBus,
        engrams: Option<Arc<dyn EngramStore>>,
    ) -> Self {
        Self {
            graph,
            nvd,
            epss,
            kev,
            dictionary,
            bus,
            engrams,
        }
    }

    /// Run one enrichment sweep over every service of the tenant.
    pub async fn enrich_tenant(&self, ctx: &ScanContext) -> Result<CorrelationOutcome, SentinelError> {
        let mut session = EngramSession::open(
            ctx.tenant_id.0,
            "vuln-correlation",
            "Correlate services with known CVEs",
            serde_json::json!({
                "dictionary_entries": self.dictionary.entries.len(),
            }),
        );
        let session_id = session.id().0;
        let mut outcome = CorrelationOutcome::default();

        session.record_decision(
            "cve matching strategy",
            &["keyword search", "cpe dictionary"],
            "cpe dictionary",
            "keyword matching drowns services in unrelated CVEs",
        );

        let result = self.sweep(ctx, &mut session, &mut outcome).await;

        let (session_outcome, summary) = match &result {
            Err(SentinelError::Cancelled) => (SessionOutcome::Failed, "cancelled".to_string()),
            Err(e) => (SessionOutcome::Failed, format!("sweep aborted: {e}")),
            Ok(()) if outcome.errors.is_empty() => (
                SessionOutcome::Success,
                format!(
                    "{} services, {} new pairings",
                    outcome.services_scanned, outcome.vulnerabilities_found
                ),
            ),
            Ok(()) => (
                SessionOutcome::Partial,
                format!(
                    "{} services, {} new pairings, {} source failures",
                    outcome.services_scanned,
                    outcome.vulnerabilities_found,
                    outcome.errors.len()
                ),
            ),
        };

        session.record_action(
            "correlation",
            "enrich_tenant",
            outcome.errors.is_empty(),
            [
                ("services_scanned", outcome.services_scanned as u64),
                ("services_skipped", outcome.services_skipped as u64),
                ("cves_evaluated", outcome.cves_evaluated as u64),
                ("found", outcome.vulnerabilities_found as u64),
                ("updated", outcome.vulnerabilities_updated as u64),
                ("kev", outcome.kev_count as u64),
            ],
        );

        let engram = session.close(session_outcome, &summary);
        persist_engram(&self.bus, self.engrams.as_deref(), ctx, &engram);

        outcome.outcome = engram.outcome;
        outcome.engram_session = Some(session_id);

        match result {
            Err(e) if !matches!(e, SentinelError::Cancelled) => Err(e),
            _ => Ok(outcome),
        }
    }

    async fn sweep(
        &self,
        ctx: &ScanContext,
        session: &mut EngramSession,
        outcome: &mut CorrelationOutcome,
    ) -> Result<(), SentinelError> {
        let mut offset = 0u32;
        loop {
            ctx.check_cancelled()?;
            let page = self
                .graph
                .list_nodes(
                    ctx,
                    "Service",
                    &NodeFilter::new(),
                    Page {
                        limit: SERVICE_PAGE_SIZE,
                        offset,
                    },
                )
                .await?;
            if page.is_empty() {
                break;
            }
            offset += page.len() as u32;

            for record in page {
                ctx.check_cancelled()?;
                self.enrich_service(ctx, session, outcome, &record).await;
            }
        }
        Ok(())
    }

    async fn enrich_service(
        &self,
        ctx: &ScanContext,
        session: &mut EngramSession,
        outcome: &mut CorrelationOutcome,
        record: &NodeRecord,
    ) {
        let name = record.property_str("name").unwrap_or_default().to_string();
        let version = record.property_str("version").map(String::from);
        if name.is_empty() || version.is_none() {
            // Only services with a known (name, version) are matchable.
            outcome.services_skipped += 1;
            return;
        }
        outcome.services_scanned += 1;

        let cpes = self.dictionary.resolve(&name, version.as_deref());
        if cpes.is_empty() {
            outcome.services_skipped += 1;
            session.record_dead_end(
                &format!("no CPE mapping for {name} {}", version.as_deref().unwrap_or("")),
                serde_json::json!({"service": name, "version": version}),
            );
            return;
        }

        // NVD, live: the union of candidate CVEs across the CPEs.
        let mut candidates: HashMap<String, NvdCveRecord> = HashMap::new();
        for cpe in &cpes {
            match self.nvd.cves_for_cpe(cpe, MAX_CVES_PER_SERVICE).await {
                Ok(records) => {
                    for r in records {
                        candidates.entry(r.cve_id.clone()).or_insert(r);
                    }
                }
                Err(e) => {
                    let error = format!("nvd {cpe}: {e}");
                    session.record_dead_end(&error, serde_json::json!({"cpe": cpe}));
                    outcome.errors.push(error);
                }
            }
        }
        if candidates.is_empty() {
            return;
        }
        outcome.cves_evaluated += candidates.len() as u32;

        // EPSS, live and batched. A failure degrades scores to null.
        let cve_ids: Vec<String> = candidates.keys().cloned().collect();
        let epss_scores = match self.epss.scores(&cve_ids).await {
            Ok(scores) => scores,
            Err(e) => {
                let error = format!("epss: {e}");
                session.record_dead_end(&error, serde_json::json!({"cves": cve_ids.len()}));
                outcome.errors.push(error);
                HashMap::new()
            }
        };

        // Join on all three sources before any write.
        let service_id = match record.id.parse() {
            Ok(uuid) => NodeId(uuid),
            Err(_) => return,
        };
        for (cve_id, nvd_record) in candidates {
            let in_kev = match self.kev.lookup(&cve_id).await {
                Ok(hit) => hit.is_some(),
                Err(e) => {
                    let error = format!("kev {cve_id}: {e}");
                    session.record_dead_end(&error, serde_json::json!({"cve": cve_id}));
                    outcome.errors.push(error);
                    false
                }
            };
            let epss = epss_scores.get(&cve_id).copied();

            self.write_pairing(
                ctx,
                outcome,
                service_id,
                &cve_id,
                &nvd_record,
                epss,
                in_kev,
            )
            .await;
        }
    }

    async fn write_pairing(
        &self,
        ctx: &ScanContext,
        outcome: &mut CorrelationOutcome,
        service_id: NodeId,
        cve_id: &str,
        nvd_record: &NvdCveRecord,
        epss: Option<f64>,
        in_kev: bool,
    ) {
        let vuln = build_vulnerability(ctx, cve_id, nvd_record, epss, in_kev, ctx.now);
        let vuln_id = vuln.id;
        let severity = vuln.severity;
        let cvss = vuln.cvss_score;

        let node = sentinel_core::types::Node::Vulnerability(vuln);
        if let Err(e) = self.graph.upsert_node(ctx, &node).await {
            outcome.errors.push(format!("graph write {cve_id}: {e}"));
            return;
        }

        let edge = Edge::new(
            ctx.tenant_id,
            service_id,
            vuln_id,
            EdgeType::HasCve,
            EdgeProperties {
                exploitability_score: epss,
                ..Default::default()
            },
            ctx.now,
        );
        match self.graph.upsert_edge(ctx, &edge).await {
            Ok(UpsertOutcome::Created { .. }) => {
                outcome.vulnerabilities_found += 1;
                self.bus.publish(SentinelEvent::new(
                    ctx.tenant_id,
                    EventSource::Enrichment,
                    EventPayload::VulnerabilityFound {
                        node_id: vuln_id,
                        cve_id: cve_id.to_string(),
                        cvss_score: cvss,
                        exploitable: in_kev,
                    },
                    ctx.now,
                ));
            }
            Ok(UpsertOutcome::Updated { .. }) => outcome.vulnerabilities_updated += 1,
            Err(e) => {
                outcome.errors.push(format!("edge write {cve_id}: {e}"));
                return;
            }
        }

        match severity {
            VulnSeverity::Critical => outcome.critical_count += 1,
            VulnSeverity::High => outcome.high_count += 1,
            _ => {}
        }
        if in_kev {
            outcome.kev_count += 1;
        }
    }
}

fn build_vulnerability(
    ctx: &ScanContext,
    cve_id: &str,
    nvd_record: &NvdCveRecord,
    epss: Option<f64>,
    in_kev: bool,
    now: DateTime<Utc>,
) -> Vulnerability {
    let mut vuln = Vulnerability {
        id: NodeId::from_natural_key(&ctx.tenant_id, "Vulnerability", &format!("vuln:{cve_id}")),
        tenant_id: ctx.tenant_id,
        cve_id: cve_id.to_string(),
        cvss_score: nvd_record.cvss_score,
        cvss_vector: nvd_record.cvss_vector.clone(),
        epss_score: epss,
        severity: VulnSeverity::from_cvss(nvd_record.cvss_score),
        description: nvd_record.description.clone(),
        exploitable: in_kev,
        in_kev,
        published_date: nvd_record.published_date,
        first_seen: now,
        last_seen: now,
    };
    vuln.clamp_scores();
    // Scores may have been clamped; the severity mapping must agree.
    vuln.severity = VulnSeverity::from_cvss(vuln.cvss_score);
    vuln
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_vulnerability_is_consistent() {
        let ctx = ScanContext::new(sentinel_core::types::TenantId::new(), Utc::now());
        let record = NvdCveRecord {
            cve_id: "CVE-2024-1234".to_string(),
            description: Some("Heap overflow".to_string()),
            cvss_score: Some(12.0), // malformed feed data
            cvss_vector: None,
            published_date: None,
        };

        let vuln = build_vulnerability(&ctx, "CVE-2024-1234", &record, Some(1.5), true, ctx.now);
        assert_eq!(vuln.cvss_score, Some(10.0));
        assert_eq!(vuln.epss_score, Some(1.0));
        assert_eq!(vuln.severity, VulnSeverity::Critical);
        assert!(vuln.exploitable);
        assert!(vuln.actionable());
    }
}
