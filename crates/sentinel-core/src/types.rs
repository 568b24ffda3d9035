//! Core domain types for the Sentinel knowledge graph.
//!
//! These types represent nodes and edges in the multi-tenant digital twin,
//! shared across all Sentinel services. Node identity is deterministic:
//! every node's `id` is a UUIDv5 fingerprint of its tenant, label, and
//! natural key, so re-running discovery against an unchanged source
//! produces the same ids.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for deterministic (UUIDv5) node and edge identifiers.
const SENTINEL_NS: Uuid = Uuid::from_bytes([
    0x6b, 0xa7, 0xb8, 0x10, 0x9d, 0xad, 0x11, 0xd1, 0x80, 0xb4, 0x00, 0xc0, 0x4f, 0xd4, 0x30, 0xc8,
]);

// ── Tenant ────────────────────────────────────────────────────────

/// Every entity in the system belongs to exactly one tenant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TenantId(pub Uuid);

impl TenantId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Subscription tier for a tenant. Controls staleness TTLs and quotas.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TenantPlan {
    Starter,
    Professional,
    Enterprise,
}

// ── Node Types ────────────────────────────────────────────────────

/// Unique identifier for any node in the knowledge graph.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Derive the stable id for a node from its tenant, label, and
    /// natural key. Re-discovery of the same resource yields the same id.
    pub fn from_natural_key(tenant_id: &TenantId, label: &str, key: &str) -> Self {
        Self(Uuid::new_v5(
            &SENTINEL_NS,
            format!("{}:{}:{}", tenant_id.0, label, key).as_bytes(),
        ))
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A network host (physical server, VM, container host, cloud instance).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub id: NodeId,
    pub tenant_id: TenantId,
    pub ip: String,
    pub hostname: Option<String>,
    pub os: Option<String>,
    pub os_version: Option<String>,
    pub mac_address: Option<String>,
    pub cloud_provider: Option<CloudProvider>,
    pub cloud_instance_id: Option<String>,
    pub cloud_region: Option<String>,
    pub criticality: Criticality,
    pub tags: Vec<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Host {
    /// Cloud instance ids outlive IP reassignment, so they win when present.
    pub fn natural_key(&self) -> String {
        match &self.cloud_instance_id {
            Some(instance) => format!("host:{instance}"),
            None => format!("host:{}", self.ip),
        }
    }
}

/// A running service on a host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: NodeId,
    pub tenant_id: TenantId,
    pub name: String,
    pub version: Option<String>,
    pub port: u16,
    pub protocol: Protocol,
    pub state: ServiceState,
    pub banner: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Service {
    pub fn natural_key(&self) -> String {
        format!(
            "service:{}:{}:{}",
            self.name,
            self.port,
            self.protocol.as_str()
        )
    }
}

/// An open port on a host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Port {
    pub id: NodeId,
    pub tenant_id: TenantId,
    /// IP of the host exposing the port; scopes the key per host.
    pub host_ip: String,
    pub number: u16,
    pub protocol: Protocol,
    pub state: PortState,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Port {
    pub fn natural_key(&self) -> String {
        format!(
            "port:{}:{}:{}",
            self.host_ip,
            self.number,
            self.protocol.as_str()
        )
    }
}

/// A user account (human or service account).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: NodeId,
    pub tenant_id: TenantId,
    pub username: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub user_type: UserType,
    pub source: IdentitySource,
    pub enabled: bool,
    pub mfa_enabled: Option<bool>,
    pub last_login: Option<DateTime<Utc>>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl User {
    pub fn natural_key(&self) -> String {
        format!("user:{}:{}", self.source.as_str(), self.username)
    }
}

/// A group of users.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: NodeId,
    pub tenant_id: TenantId,
    pub name: String,
    pub description: Option<String>,
    pub source: IdentitySource,
    pub member_count: Option<u32>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Group {
    pub fn natural_key(&self) -> String {
        format!("group:{}:{}", self.source.as_str(), self.name)
    }
}

/// An IAM role or permission set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: NodeId,
    pub tenant_id: TenantId,
    pub name: String,
    pub description: Option<String>,
    pub source: IdentitySource,
    pub permissions: Vec<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Role {
    pub fn natural_key(&self) -> String {
        format!("role:{}:{}", self.source.as_str(), self.name)
    }
}

/// A security policy (IAM policy, firewall rule set, etc.).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub id: NodeId,
    pub tenant_id: TenantId,
    pub name: String,
    pub policy_type: PolicyType,
    pub source: String,
    pub rules_json: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Policy {
    pub fn natural_key(&self) -> String {
        format!("policy:{}:{}", self.source, self.name)
    }
}

/// A network subnet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subnet {
    pub id: NodeId,
    pub tenant_id: TenantId,
    pub cidr: String,
    pub name: Option<String>,
    pub cloud_provider: Option<CloudProvider>,
    pub vpc_id: Option<String>,
    pub is_public: bool,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Subnet {
    pub fn natural_key(&self) -> String {
        match &self.vpc_id {
            Some(vpc) => format!("subnet:{}:{}", vpc, self.cidr),
            None => format!("subnet:{}", self.cidr),
        }
    }
}

/// A virtual private cloud / virtual network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vpc {
    pub id: NodeId,
    pub tenant_id: TenantId,
    pub vpc_id: String,
    pub name: Option<String>,
    pub cidr: Option<String>,
    pub cloud_provider: CloudProvider,
    pub region: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Vpc {
    pub fn natural_key(&self) -> String {
        format!("vpc:{}", self.vpc_id)
    }
}

/// A known vulnerability (CVE).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vulnerability {
    pub id: NodeId,
    pub tenant_id: TenantId,
    pub cve_id: String,
    pub cvss_score: Option<f64>,
    pub cvss_vector: Option<String>,
    pub epss_score: Option<f64>,
    pub severity: VulnSeverity,
    pub description: Option<String>,
    pub exploitable: bool,
    pub in_kev: bool,
    pub published_date: Option<DateTime<Utc>>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Vulnerability {
    pub fn natural_key(&self) -> String {
        format!("vuln:{}", self.cve_id)
    }

    /// Clamp scores into their declared ranges: CVSS to [0, 10], EPSS to
    /// [0, 1]. Out-of-range feed data never reaches the graph.
    pub fn clamp_scores(&mut self) {
        if let Some(s) = self.cvss_score.as_mut() {
            *s = s.clamp(0.0, 10.0);
        }
        if let Some(s) = self.epss_score.as_mut() {
            *s = s.clamp(0.0, 1.0);
        }
    }

    /// A CVE is actionable for remediation when it is in the KEV catalog,
    /// its exploitation probability is at least 0.5, or its CVSS base
    /// score is at least 9.0.
    pub fn actionable(&self) -> bool {
        self.in_kev
            || self.epss_score.is_some_and(|s| s >= 0.5)
            || self.cvss_score.is_some_and(|s| s >= 9.0)
    }
}

/// A TLS/SSL certificate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Certificate {
    pub id: NodeId,
    pub tenant_id: TenantId,
    pub subject: String,
    pub issuer: String,
    pub serial_number: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub fingerprint_sha256: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Certificate {
    pub fn natural_key(&self) -> String {
        format!("cert:{}", self.fingerprint_sha256)
    }
}

/// An application, storage bucket, container workload, or function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub id: NodeId,
    pub tenant_id: TenantId,
    pub name: String,
    pub version: Option<String>,
    pub app_type: AppType,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Application {
    pub fn natural_key(&self) -> String {
        format!("app:{}:{}", self.app_type.as_str(), self.name)
    }
}

/// An MCP (Model Context Protocol) server discovered in the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServer {
    pub id: NodeId,
    pub tenant_id: TenantId,
    pub name: String,
    pub endpoint: String,
    pub tools: Vec<String>,
    pub authenticated: bool,
    pub tls_enabled: bool,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl McpServer {
    pub fn natural_key(&self) -> String {
        format!("mcp:{}", self.endpoint)
    }
}

/// A security finding attached to an asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: NodeId,
    pub tenant_id: TenantId,
    pub title: String,
    pub description: Option<String>,
    pub severity: Criticality,
    pub evidence_json: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Finding {
    pub fn natural_key(&self) -> String {
        format!("finding:{}", self.title)
    }
}

/// A point-in-time hash of a resource's configuration, used for drift
/// detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub id: NodeId,
    pub tenant_id: TenantId,
    pub resource_id: String,
    pub resource_type: String,
    pub config_hash: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl ConfigSnapshot {
    pub fn natural_key(&self) -> String {
        format!("snapshot:{}", self.resource_id)
    }
}

/// Enum wrapper for all node types in the knowledge graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "node_type")]
pub enum Node {
    Host(Host),
    Service(Service),
    Port(Port),
    User(User),
    Group(Group),
    Role(Role),
    Policy(Policy),
    Subnet(Subnet),
    Vpc(Vpc),
    Vulnerability(Vulnerability),
    Certificate(Certificate),
    Application(Application),
    McpServer(McpServer),
    Finding(Finding),
    ConfigSnapshot(ConfigSnapshot),
}

macro_rules! for_each_variant {
    ($node:expr, $n:ident => $body:expr) => {
        match $node {
            Node::Host($n) => $body,
            Node::Service($n) => $body,
            Node::Port($n) => $body,
            Node::User($n) => $body,
            Node::Group($n) => $body,
            Node::Role($n) => $body,
            Node::Policy($n) => $body,
            Node::Subnet($n) => $body,
            Node::Vpc($n) => $body,
            Node::Vulnerability($n) => $body,
            Node::Certificate($n) => $body,
            Node::Application($n) => $body,
            Node::McpServer($n) => $body,
            Node::Finding($n) => $body,
            Node::ConfigSnapshot($n) => $body,
        }
    };
}

impl Node {
    pub fn id(&self) -> NodeId {
        for_each_variant!(self, n => n.id)
    }

    pub fn tenant_id(&self) -> TenantId {
        for_each_variant!(self, n => n.tenant_id)
    }

    /// The graph label for this variant.
    pub fn label(&self) -> &'static str {
        match self {
            Node::Host(_) => "Host",
            Node::Service(_) => "Service",
            Node::Port(_) => "Port",
            Node::User(_) => "User",
            Node::Group(_) => "Group",
            Node::Role(_) => "Role",
            Node::Policy(_) => "Policy",
            Node::Subnet(_) => "Subnet",
            Node::Vpc(_) => "Vpc",
            Node::Vulnerability(_) => "Vulnerability",
            Node::Certificate(_) => "Certificate",
            Node::Application(_) => "Application",
            Node::McpServer(_) => "McpServer",
            Node::Finding(_) => "Finding",
            Node::ConfigSnapshot(_) => "ConfigSnapshot",
        }
    }

    /// The deterministic fingerprint this node's id is derived from.
    pub fn natural_key(&self) -> String {
        for_each_variant!(self, n => n.natural_key())
    }

    /// The id a node with this tenant, label, and natural key must carry.
    pub fn derived_id(&self) -> NodeId {
        NodeId::from_natural_key(&self.tenant_id(), self.label(), &self.natural_key())
    }

    pub fn first_seen(&self) -> DateTime<Utc> {
        for_each_variant!(self, n => n.first_seen)
    }

    pub fn last_seen(&self) -> DateTime<Utc> {
        for_each_variant!(self, n => n.last_seen)
    }

    /// Advance `last_seen` to `now`, never moving it backward.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        for_each_variant!(self, n => {
            if now > n.last_seen {
                n.last_seen = now;
            }
        })
    }

    pub fn set_first_seen(&mut self, at: DateTime<Utc>) {
        for_each_variant!(self, n => n.first_seen = at)
    }

    pub fn set_last_seen(&mut self, at: DateTime<Utc>) {
        for_each_variant!(self, n => n.last_seen = at)
    }

    /// Human-readable label for events and UI lists.
    pub fn display_name(&self) -> String {
        match self {
            Node::Host(n) => n.hostname.clone().unwrap_or_else(|| n.ip.clone()),
            Node::Service(n) => n.name.clone(),
            Node::Port(n) => format!("{}/{}", n.number, n.protocol.as_str()),
            Node::User(n) => n.username.clone(),
            Node::Group(n) => n.name.clone(),
            Node::Role(n) => n.name.clone(),
            Node::Policy(n) => n.name.clone(),
            Node::Subnet(n) => n.cidr.clone(),
            Node::Vpc(n) => n.name.clone().unwrap_or_else(|| n.vpc_id.clone()),
            Node::Vulnerability(n) => n.cve_id.clone(),
            Node::Certificate(n) => n.subject.clone(),
            Node::Application(n) => n.name.clone(),
            Node::McpServer(n) => n.name.clone(),
            Node::Finding(n) => n.title.clone(),
            Node::ConfigSnapshot(n) => n.resource_id.clone(),
        }
    }

    /// Non-identity attributes as a flat map of primitive values.
    /// Excludes `id`, `tenant_id`, the serde tag, and the temporal fields
    /// the graph adapter manages itself.
    pub fn properties(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut map = match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        for key in ["node_type", "id", "tenant_id", "first_seen", "last_seen"] {
            map.remove(key);
        }
        map
    }
}

// ── Edge Types ────────────────────────────────────────────────────

/// Unique identifier for an edge in the knowledge graph.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct EdgeId(pub Uuid);

impl EdgeId {
    /// Edge identity is `(tenant, type, source, target)`.
    pub fn from_parts(
        tenant_id: &TenantId,
        edge_type: &EdgeType,
        source_id: &NodeId,
        target_id: &NodeId,
    ) -> Self {
        Self(Uuid::new_v5(
            &SENTINEL_NS,
            format!(
                "{}:edge:{}:{}:{}",
                tenant_id.0,
                edge_type.as_str(),
                source_id.0,
                target_id.0
            )
            .as_bytes(),
        ))
    }
}

impl std::fmt::Display for EdgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A relationship between two nodes in the knowledge graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub tenant_id: TenantId,
    pub source_id: NodeId,
    pub target_id: NodeId,
    pub edge_type: EdgeType,
    pub properties: EdgeProperties,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Edge {
    /// Build an edge with its deterministic id and both timestamps set to
    /// `now`.
    pub fn new(
        tenant_id: TenantId,
        source_id: NodeId,
        target_id: NodeId,
        edge_type: EdgeType,
        properties: EdgeProperties,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EdgeId::from_parts(&tenant_id, &edge_type, &source_id, &target_id),
            tenant_id,
            source_id,
            target_id,
            edge_type,
            properties,
            first_seen: now,
            last_seen: now,
        }
    }
}

/// The type of relationship between two nodes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeType {
    ConnectsTo,
    HasAccess,
    MemberOf,
    RunsOn,
    Trusts,
    RoutesTo,
    Exposes,
    DependsOn,
    CanReach,
    HasCve,
    HasPort,
    HasCertificate,
    BelongsToSubnet,
    BelongsToVpc,
    HasFinding,
}

impl EdgeType {
    /// The graph relationship type string.
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::ConnectsTo => "CONNECTS_TO",
            EdgeType::HasAccess => "HAS_ACCESS",
            EdgeType::MemberOf => "MEMBER_OF",
            EdgeType::RunsOn => "RUNS_ON",
            EdgeType::Trusts => "TRUSTS",
            EdgeType::RoutesTo => "ROUTES_TO",
            EdgeType::Exposes => "EXPOSES",
            EdgeType::DependsOn => "DEPENDS_ON",
            EdgeType::CanReach => "CAN_REACH",
            EdgeType::HasCve => "HAS_CVE",
            EdgeType::HasPort => "HAS_PORT",
            EdgeType::HasCertificate => "HAS_CERTIFICATE",
            EdgeType::BelongsToSubnet => "BELONGS_TO_SUBNET",
            EdgeType::BelongsToVpc => "BELONGS_TO_VPC",
            EdgeType::HasFinding => "HAS_FINDING",
        }
    }
}

/// Properties attached to an edge.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EdgeProperties {
    pub protocol: Option<Protocol>,
    pub port: Option<u16>,
    pub encrypted: Option<bool>,
    pub permissions: Vec<String>,
    pub exploitability_score: Option<f64>,
    #[serde(default)]
    pub extra: serde_json::Value,
}

// ── Enums ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    Aws,
    Azure,
    Gcp,
    OnPrem,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Http,
    Https,
    Ssh,
    Rdp,
    Dns,
    Other(String),
}

impl Protocol {
    pub fn as_str(&self) -> &str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Ssh => "ssh",
            Protocol::Rdp => "rdp",
            Protocol::Dns => "dns",
            Protocol::Other(s) => s,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Running,
    Stopped,
    Unknown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    Open,
    Closed,
    Filtered,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserType {
    Human,
    ServiceAccount,
    System,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    EntraId,
    Okta,
    AwsIam,
    AzureRbac,
    GcpIam,
    Local,
}

impl IdentitySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentitySource::EntraId => "entra_id",
            IdentitySource::Okta => "okta",
            IdentitySource::AwsIam => "aws_iam",
            IdentitySource::AzureRbac => "azure_rbac",
            IdentitySource::GcpIam => "gcp_iam",
            IdentitySource::Local => "local",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Criticality {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VulnSeverity {
    Critical,
    High,
    Medium,
    Low,
    None,
}

impl VulnSeverity {
    /// The declared CVSS-to-severity mapping. Every consumer in the
    /// platform goes through this one function.
    pub fn from_cvss(score: Option<f64>) -> Self {
        match score {
            Some(s) if s >= 9.0 => VulnSeverity::Critical,
            Some(s) if s >= 7.0 => VulnSeverity::High,
            Some(s) if s >= 4.0 => VulnSeverity::Medium,
            Some(s) if s > 0.0 => VulnSeverity::Low,
            _ => VulnSeverity::None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PolicyType {
    IamPolicy,
    FirewallRule,
    SecurityGroup,
    ConditionalAccess,
    NetworkAcl,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppType {
    WebApp,
    ContainerImage,
    Lambda,
    Daemon,
    Database,
    Bucket,
}

impl AppType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppType::WebApp => "web_app",
            AppType::ContainerImage => "container_image",
            AppType::Lambda => "lambda",
            AppType::Daemon => "daemon",
            AppType::Database => "database",
            AppType::Bucket => "bucket",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_host(tenant_id: TenantId) -> Host {
        let now = Utc::now();
        let mut host = Host {
            id: NodeId(Uuid::nil()),
            tenant_id,
            ip: "10.0.1.42".to_string(),
            hostname: Some("web-server-01".to_string()),
            os: Some("Ubuntu".to_string()),
            os_version: Some("22.04".to_string()),
            mac_address: None,
            cloud_provider: Some(CloudProvider::Aws),
            cloud_instance_id: Some("i-abc123".to_string()),
            cloud_region: Some("us-east-1".to_string()),
            criticality: Criticality::High,
            tags: vec!["production".to_string(), "web".to_string()],
            first_seen: now,
            last_seen: now,
        };
        host.id = NodeId::from_natural_key(&tenant_id, "Host", &host.natural_key());
        host
    }

    #[test]
    fn node_serialization_roundtrip() {
        let node = Node::Host(sample_host(TenantId::new()));
        let json = serde_json::to_string(&node).unwrap();
        let deserialized: Node = serde_json::from_str(&json).unwrap();
        assert_eq!(node.id(), deserialized.id());
    }

    #[test]
    fn edge_type_serializes_screaming_snake() {
        let json = serde_json::to_string(&EdgeType::ConnectsTo).unwrap();
        assert_eq!(json, "\"CONNECTS_TO\"");

        let json = serde_json::to_string(&EdgeType::BelongsToSubnet).unwrap();
        assert_eq!(json, "\"BELONGS_TO_SUBNET\"");
    }

    #[test]
    fn natural_key_ids_are_deterministic() {
        let tenant = TenantId::new();
        let a = sample_host(tenant);
        let b = sample_host(tenant);
        assert_eq!(a.id, b.id);
        assert_eq!(Node::Host(a.clone()).derived_id(), a.id);

        // Same resource under a different tenant gets a different id.
        let other = sample_host(TenantId::new());
        assert_ne!(a.id, other.id);
    }

    #[test]
    fn host_key_prefers_instance_id() {
        let mut host = sample_host(TenantId::new());
        assert_eq!(host.natural_key(), "host:i-abc123");
        host.cloud_instance_id = None;
        assert_eq!(host.natural_key(), "host:10.0.1.42");
    }

    #[test]
    fn edge_identity_from_parts() {
        let tenant = TenantId::new();
        let src = NodeId::from_natural_key(&tenant, "Host", "host:a");
        let tgt = NodeId::from_natural_key(&tenant, "Subnet", "subnet:10.0.0.0/24");

        let e1 = EdgeId::from_parts(&tenant, &EdgeType::BelongsToSubnet, &src, &tgt);
        let e2 = EdgeId::from_parts(&tenant, &EdgeType::BelongsToSubnet, &src, &tgt);
        assert_eq!(e1, e2);

        let reversed = EdgeId::from_parts(&tenant, &EdgeType::BelongsToSubnet, &tgt, &src);
        assert_ne!(e1, reversed);
    }

    #[test]
    fn touch_never_moves_last_seen_backward() {
        let mut node = Node::Host(sample_host(TenantId::new()));
        let later = node.last_seen() + chrono::Duration::hours(1);
        let earlier = node.last_seen() - chrono::Duration::hours(1);

        node.touch(later);
        assert_eq!(node.last_seen(), later);
        node.touch(earlier);
        assert_eq!(node.last_seen(), later);
    }

    #[test]
    fn properties_exclude_identity_fields() {
        let node = Node::Host(sample_host(TenantId::new()));
        let props = node.properties();
        assert!(props.contains_key("ip"));
        assert!(props.contains_key("criticality"));
        assert!(!props.contains_key("id"));
        assert!(!props.contains_key("tenant_id"));
        assert!(!props.contains_key("node_type"));
        assert!(!props.contains_key("last_seen"));
    }

    #[test]
    fn severity_bucket_edges() {
        assert_eq!(VulnSeverity::from_cvss(None), VulnSeverity::None);
        assert_eq!(VulnSeverity::from_cvss(Some(0.0)), VulnSeverity::None);
        assert_eq!(VulnSeverity::from_cvss(Some(0.1)), VulnSeverity::Low);
        assert_eq!(VulnSeverity::from_cvss(Some(4.0)), VulnSeverity::Medium);
        assert_eq!(VulnSeverity::from_cvss(Some(6.9)), VulnSeverity::Medium);
        assert_eq!(VulnSeverity::from_cvss(Some(7.0)), VulnSeverity::High);
        assert_eq!(VulnSeverity::from_cvss(Some(8.9)), VulnSeverity::High);
        assert_eq!(VulnSeverity::from_cvss(Some(9.0)), VulnSeverity::Critical);
        assert_eq!(VulnSeverity::from_cvss(Some(10.0)), VulnSeverity::Critical);
    }

    fn sample_vuln(cvss: Option<f64>, epss: Option<f64>, in_kev: bool) -> Vulnerability {
        let now = Utc::now();
        let tenant = TenantId::new();
        Vulnerability {
            id: NodeId::from_natural_key(&tenant, "Vulnerability", "vuln:CVE-2024-1"),
            tenant_id: tenant,
            cve_id: "CVE-2024-1".to_string(),
            cvss_score: cvss,
            cvss_vector: None,
            epss_score: epss,
            severity: VulnSeverity::from_cvss(cvss),
            description: None,
            exploitable: in_kev,
            in_kev,
            published_date: None,
            first_seen: now,
            last_seen: now,
        }
    }

    #[test]
    fn actionability_flips_at_epss_midpoint() {
        assert!(!sample_vuln(Some(5.0), Some(0.0), false).actionable());
        assert!(!sample_vuln(Some(5.0), Some(0.49), false).actionable());
        assert!(sample_vuln(Some(5.0), Some(0.5), false).actionable());
        assert!(sample_vuln(Some(5.0), Some(1.0), false).actionable());
        assert!(sample_vuln(Some(5.0), Some(0.1), true).actionable());
        assert!(sample_vuln(Some(9.0), Some(0.1), false).actionable());
        assert!(!sample_vuln(None, None, false).actionable());
    }

    #[test]
    fn score_clamping() {
        let mut vuln = sample_vuln(Some(11.4), Some(1.7), false);
        vuln.clamp_scores();
        assert_eq!(vuln.cvss_score, Some(10.0));
        assert_eq!(vuln.epss_score, Some(1.0));
    }
}
