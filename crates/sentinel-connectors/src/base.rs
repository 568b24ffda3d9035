//! The connector contract.
//!
//! Every source — cloud API, identity provider, network scanner — is
//! driven through the same lifecycle: resolve credentials, health-check,
//! discover, normalize into one [`SyncResult`], apply as a single graph
//! batch. Sub-failures inside discovery never abort the run; they are
//! recorded as engram dead-ends and surface in `errors`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use sentinel_core::types::{
    Application, Certificate, Edge, EdgeProperties, EdgeType, Finding, Group, Host, McpServer,
    Node, NodeId, Policy, Port, Role, Service, Subnet, TenantId, User, Vpc,
};
use sentinel_core::{ScanContext, SentinelError};
use sentinel_engram::session::EngramSession;

use crate::config::{ConnectorConfig, ConnectorType};
use crate::credentials::Secret;

/// Terminal status of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// Every enumeration succeeded.
    Completed,
    /// Some enumerations dead-ended; the rest landed.
    Partial,
    /// No work could be done.
    Failed,
}

/// Normalized output of one discovery run: typed collections, not a bag
/// of dictionaries.
#[derive(Debug, Default)]
pub struct SyncResult {
    pub hosts: Vec<Host>,
    pub services: Vec<Service>,
    pub ports: Vec<Port>,
    pub users: Vec<User>,
    pub groups: Vec<Group>,
    pub roles: Vec<Role>,
    pub policies: Vec<Policy>,
    pub subnets: Vec<Subnet>,
    pub vpcs: Vec<Vpc>,
    pub certificates: Vec<Certificate>,
    pub applications: Vec<Application>,
    pub mcp_servers: Vec<McpServer>,
    pub findings: Vec<Finding>,
    pub edges: Vec<Edge>,
    /// Sub-failures recorded during discovery; never credentials.
    pub errors: Vec<String>,
}

impl SyncResult {
    pub fn total_assets(&self) -> usize {
        self.hosts.len()
            + self.services.len()
            + self.ports.len()
            + self.users.len()
            + self.groups.len()
            + self.roles.len()
            + self.policies.len()
            + self.subnets.len()
            + self.vpcs.len()
            + self.certificates.len()
            + self.applications.len()
            + self.mcp_servers.len()
            + self.findings.len()
    }

    /// Terminal status under the propagation policy: `Completed` with no
    /// dead-ends, `Partial` with some, `Failed` when nothing landed.
    pub fn status(&self) -> SyncStatus {
        if self.errors.is_empty() {
            SyncStatus::Completed
        } else if self.total_assets() == 0 && self.edges.is_empty() {
            SyncStatus::Failed
        } else {
            SyncStatus::Partial
        }
    }

    /// Flatten into the node/edge batch the graph adapter applies.
    pub fn into_batch(self) -> (Vec<Node>, Vec<Edge>) {
        let mut nodes = Vec::with_capacity(self.total_assets());
        nodes.extend(self.hosts.into_iter().map(Node::Host));
        nodes.extend(self.services.into_iter().map(Node::Service));
        nodes.extend(self.ports.into_iter().map(Node::Port));
        nodes.extend(self.users.into_iter().map(Node::User));
        nodes.extend(self.groups.into_iter().map(Node::Group));
        nodes.extend(self.roles.into_iter().map(Node::Role));
        nodes.extend(self.policies.into_iter().map(Node::Policy));
        nodes.extend(self.subnets.into_iter().map(Node::Subnet));
        nodes.extend(self.vpcs.into_iter().map(Node::Vpc));
        nodes.extend(self.certificates.into_iter().map(Node::Certificate));
        nodes.extend(self.applications.into_iter().map(Node::Application));
        nodes.extend(self.mcp_servers.into_iter().map(Node::McpServer));
        nodes.extend(self.findings.into_iter().map(Node::Finding));
        (nodes, self.edges)
    }

    /// Count pairs for engram actions and scan summaries.
    pub fn counts(&self) -> Vec<(&'static str, u64)> {
        vec![
            ("hosts", self.hosts.len() as u64),
            ("services", self.services.len() as u64),
            ("ports", self.ports.len() as u64),
            ("users", self.users.len() as u64),
            ("groups", self.groups.len() as u64),
            ("roles", self.roles.len() as u64),
            ("policies", self.policies.len() as u64),
            ("subnets", self.subnets.len() as u64),
            ("vpcs", self.vpcs.len() as u64),
            ("applications", self.applications.len() as u64),
            ("edges", self.edges.len() as u64),
            ("errors", self.errors.len() as u64),
        ]
    }
}

/// The uniform contract all sources implement.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Unique connector instance name, e.g. `aws-prod`.
    fn name(&self) -> &str;

    fn connector_type(&self) -> ConnectorType;

    fn config(&self) -> &ConnectorConfig;

    /// Verify credentials and connectivity before discovery.
    async fn health_check(&self, ctx: &ScanContext, creds: &Secret) -> Result<(), SentinelError>;

    /// Enumerate the source and normalize everything found.
    ///
    /// Implementations record decisions, actions, and dead-ends on the
    /// session, check `ctx` for cancellation between sub-requests, and
    /// keep sub-failures out of the error channel: a failed enumeration
    /// is a dead-end plus an `errors` entry, not an `Err`.
    async fn discover(
        &self,
        ctx: &ScanContext,
        creds: &Secret,
        session: &mut EngramSession,
    ) -> Result<SyncResult, SentinelError>;
}

/// Build an edge stamped with the run's tenant and observation time.
/// Endpoint ids must be the deterministic natural-key ids.
pub fn make_edge(
    tenant_id: TenantId,
    now: DateTime<Utc>,
    source_id: NodeId,
    target_id: NodeId,
    edge_type: EdgeType,
    properties: EdgeProperties,
) -> Edge {
    Edge::new(tenant_id, source_id, target_id, edge_type, properties, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_core::types::{CloudProvider, Criticality};

    fn host(tenant_id: TenantId, ip: &str) -> Host {
        let now = Utc::now();
        let mut h = Host {
            id: NodeId(uuid::Uuid::nil()),
            tenant_id,
            ip: ip.to_string(),
            hostname: None,
            os: None,
            os_version: None,
            mac_address: None,
            cloud_provider: Some(CloudProvider::Aws),
            cloud_instance_id: None,
            cloud_region: None,
            criticality: Criticality::Medium,
            tags: vec![],
            first_seen: now,
            last_seen: now,
        };
        h.id = NodeId::from_natural_key(&tenant_id, "Host", &h.natural_key());
        h
    }

    #[test]
    fn status_from_errors_and_yield() {
        let mut result = SyncResult::default();
        assert_eq!(result.status(), SyncStatus::Completed);

        result.errors.push("vpcs: HTTP 500".to_string());
        assert_eq!(result.status(), SyncStatus::Failed);

        result.hosts.push(host(TenantId::new(), "10.0.0.1"));
        assert_eq!(result.status(), SyncStatus::Partial);

        result.errors.clear();
        assert_eq!(result.status(), SyncStatus::Completed);
    }

    #[test]
    fn into_batch_flattens_all_collections() {
        let tenant = TenantId::new();
        let mut result = SyncResult::default();
        result.hosts.push(host(tenant, "10.0.0.1"));
        result.hosts.push(host(tenant, "10.0.0.2"));

        let (nodes, edges) = result.into_batch();
        assert_eq!(nodes.len(), 2);
        assert!(edges.is_empty());
    }
}
