//! Nmap network connector.
//!
//! Wraps the nmap scanner in the connector contract: each configured
//! target CIDR is scanned, hosts with their open ports and identified
//! services are normalized, and `HAS_PORT` / `EXPOSES` / `RUNS_ON` edges
//! are materialized.

use std::sync::Arc;

use async_trait::async_trait;

use sentinel_core::types::{
    CloudProvider, Criticality, EdgeProperties, EdgeType, Host, NodeId, Port, PortState,
    Protocol, Service, ServiceState,
};
use sentinel_core::{ScanContext, SentinelError};
use sentinel_engram::session::EngramSession;

use crate::base::{make_edge, Connector, SyncResult};
use crate::config::{ConnectorConfig, ConnectorType};
use crate::credentials::Secret;

use super::scanner::{NmapRunner, ScanProfile, ScannedHost};

pub struct NmapConnector {
    name: String,
    config: ConnectorConfig,
    runner: Arc<dyn NmapRunner>,
    profile: ScanProfile,
    /// Target CIDRs, from the connector's `extra.targets` option.
    targets: Vec<String>,
}

impl NmapConnector {
    pub fn new(
        name: &str,
        config: ConnectorConfig,
        runner: Arc<dyn NmapRunner>,
    ) -> Result<Self, SentinelError> {
        let profile = match config.extra_str("profile") {
            Some(raw) => ScanProfile::parse(raw)?,
            None => ScanProfile::default(),
        };
        let targets: Vec<String> = config
            .extra
            .get("targets")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();
        if targets.is_empty() {
            return Err(SentinelError::Config(
                "nmap connector requires extra.targets (list of CIDRs)".to_string(),
            ));
        }

        Ok(Self {
            name: name.to_string(),
            config,
            runner,
            profile,
            targets,
        })
    }

    fn normalize_host(&self, ctx: &ScanContext, scanned: &ScannedHost, result: &mut SyncResult) {
        let tenant_id = ctx.tenant_id;
        let now = ctx.now;
        let Some(ip) = scanned.ipv4() else {
            return;
        };

        let mut host = Host {
            id: NodeId(uuid::Uuid::nil()),
            tenant_id,
            ip: ip.to_string(),
            hostname: scanned.hostname().map(String::from),
            os: scanned.os_name().map(String::from),
            os_version: None,
            mac_address: scanned.mac().map(String::from),
            cloud_provider: Some(CloudProvider::OnPrem),
            cloud_instance_id: None,
            cloud_region: None,
            criticality: Criticality::Medium,
            tags: vec![],
            first_seen: now,
            last_seen: now,
        };
        host.id = NodeId::from_natural_key(&tenant_id, "Host", &host.natural_key());

        for entry in scanned.ports() {
            let protocol = parse_protocol(&entry.protocol);
            let mut port = Port {
                id: NodeId(uuid::Uuid::nil()),
                tenant_id,
                host_ip: ip.to_string(),
                number: entry.number,
                protocol: protocol.clone(),
                state: parse_port_state(entry.state()),
                first_seen: now,
                last_seen: now,
            };
            port.id = NodeId::from_natural_key(&tenant_id, "Port", &port.natural_key());

            result.edges.push(make_edge(
                tenant_id,
                now,
                host.id,
                port.id,
                EdgeType::HasPort,
                EdgeProperties::default(),
            ));
            result.ports.push(port);

            if let Some(probe) = &entry.service {
                let mut svc = Service {
                    id: NodeId(uuid::Uuid::nil()),
                    tenant_id,
                    name: probe.name.clone(),
                    version: probe.version_label(),
                    port: entry.number,
                    protocol: protocol.clone(),
                    state: ServiceState::Running,
                    banner: probe.extra_info.clone(),
                    first_seen: now,
                    last_seen: now,
                };
                svc.id = NodeId::from_natural_key(&tenant_id, "Service", &svc.natural_key());

                result.edges.push(make_edge(
                    tenant_id,
                    now,
                    host.id,
                    svc.id,
                    EdgeType::Exposes,
                    EdgeProperties {
                        port: Some(entry.number),
                        protocol: Some(protocol.clone()),
                        ..Default::default()
                    },
                ));
                result.edges.push(make_edge(
                    tenant_id,
                    now,
                    svc.id,
                    host.id,
                    EdgeType::RunsOn,
                    EdgeProperties::default(),
                ));
                result.services.push(svc);
            }
        }

        result.hosts.push(host);
    }
}

#[async_trait]
impl Connector for NmapConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn connector_type(&self) -> ConnectorType {
        ConnectorType::Nmap
    }

    fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    async fn health_check(&self, _ctx: &ScanContext, _creds: &Secret) -> Result<(), SentinelError> {
        let version = self.runner.verify().await?;
        tracing::debug!(connector = %self.name, nmap = %version.trim(), "Nmap verified");
        Ok(())
    }

    async fn discover(
        &self,
        ctx: &ScanContext,
        _creds: &Secret,
        session: &mut EngramSession,
    ) -> Result<SyncResult, SentinelError> {
        session.record_decision(
            "scan profile",
            &["quick", "standard", "deep"],
            match self.profile {
                ScanProfile::Quick => "quick",
                ScanProfile::Standard => "standard",
                ScanProfile::Deep => "deep",
            },
            "configured profile for these targets",
        );

        let mut result = SyncResult::default();
        for target in &self.targets {
            ctx.check_cancelled()?;
            match self.runner.scan(target, &self.profile).await {
                Ok(report) => {
                    let before = result.hosts.len();
                    for scanned in report.live_hosts() {
                        self.normalize_host(ctx, scanned, &mut result);
                    }
                    session.record_action(
                        "network_scan",
                        target,
                        true,
                        [
                            ("hosts_up", (result.hosts.len() - before) as u64),
                            ("hosts_total", report.hosts.len() as u64),
                        ],
                    );
                }
                Err(e) => {
                    let error = format!("{target}: {e}");
                    session.record_dead_end(&error, serde_json::json!({"target": target}));
                    result.errors.push(error);
                }
            }
        }

        Ok(result)
    }
}

fn parse_protocol(proto: &str) -> Protocol {
    match proto.to_lowercase().as_str() {
        "tcp" => Protocol::Tcp,
        "udp" => Protocol::Udp,
        other => Protocol::Other(other.to_string()),
    }
}

fn parse_port_state(state: &str) -> PortState {
    match state.to_lowercase().as_str() {
        "open" => PortState::Open,
        "closed" => PortState::Closed,
        _ => PortState::Filtered,
    }
}
