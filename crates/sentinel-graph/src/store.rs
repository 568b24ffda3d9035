//! The graph store contract.
//!
//! `GraphStore` is the sole path to the property-graph backend. No other
//! component issues raw queries. Every operation is scoped by the
//! context's tenant: the adapter refuses work whose payload names a
//! different tenant, and every filter is AND-composed with the tenant at
//! this layer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sentinel_core::types::{Edge, EdgeType, Node, NodeId};
use sentinel_core::{ScanContext, SentinelError};

/// Result of a single node or edge upsert. The id is the deterministic
/// identifier of the upserted element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created {
        id: uuid::Uuid,
    },
    Updated {
        id: uuid::Uuid,
        /// Names of the attributes that changed, `last_seen` included
        /// when it advanced.
        changed_fields: Vec<String>,
    },
}

impl UpsertOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, UpsertOutcome::Created { .. })
    }
}

/// Result of applying a full discovery batch.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub nodes_created: u32,
    pub nodes_updated: u32,
    pub edges_created: u32,
    pub edges_updated: u32,
    /// Edges dropped because an endpoint was missing in the tenant.
    pub dead_ends: Vec<String>,
}

/// A lightweight record returned from node queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    pub label: String,
    pub tenant_id: String,
    pub properties: serde_json::Value,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub stale: bool,
}

impl NodeRecord {
    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(|v| v.as_str())
    }
}

/// A lightweight record returned from edge queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub id: String,
    pub edge_type: String,
    pub source_id: String,
    pub target_id: String,
    pub properties: serde_json::Value,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// A neighbor result: node + the connecting edge.
#[derive(Debug, Clone)]
pub struct Neighbor {
    pub node: NodeRecord,
    pub edge: EdgeRecord,
}

/// Traversal direction for neighbor queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

/// Equality filter on node properties, AND-composed with the tenant at
/// the adapter layer. Filters may not reference `tenant_id`; isolation is
/// not the caller's to compose.
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    clauses: Vec<(String, serde_json::Value)>,
}

impl NodeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, property: &str, value: impl Into<serde_json::Value>) -> Self {
        self.clauses.push((property.to_string(), value.into()));
        self
    }

    pub fn clauses(&self) -> &[(String, serde_json::Value)] {
        &self.clauses
    }

    pub fn validate(&self) -> Result<(), SentinelError> {
        for (key, _) in &self.clauses {
            if key == "tenant_id" {
                return Err(SentinelError::Config(
                    "node filters must not reference tenant_id; isolation is enforced by the adapter"
                        .to_string(),
                ));
            }
            let valid_identifier = !key.is_empty()
                && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                && !key.starts_with(|c: char| c.is_ascii_digit());
            if !valid_identifier {
                return Err(SentinelError::Config(format!(
                    "invalid filter property name: {key}"
                )));
            }
        }
        Ok(())
    }

    /// Whether a property document matches every clause.
    pub fn matches(&self, properties: &serde_json::Value) -> bool {
        self.clauses
            .iter()
            .all(|(k, v)| properties.get(k) == Some(v))
    }
}

/// Pagination window for list queries.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: 100,
            offset: 0,
        }
    }
}

/// Node counts per label for one tenant.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TenantStats {
    pub counts: std::collections::BTreeMap<String, u64>,
}

impl TenantStats {
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }
}

/// Full-text indexes declared up front. `search` rejects anything else.
pub const FULLTEXT_INDEXES: &[(&str, &str, &[&str])] = &[
    ("host_search", "Host", &["ip", "hostname", "os"]),
    ("user_search", "User", &["username", "display_name", "email"]),
    (
        "vuln_search",
        "Vulnerability",
        &["cve_id", "description"],
    ),
];

/// Look up a declared full-text index by name.
pub fn fulltext_index(name: &str) -> Option<(&'static str, &'static [&'static str])> {
    FULLTEXT_INDEXES
        .iter()
        .find(|(n, _, _)| *n == name)
        .map(|(_, label, fields)| (*label, *fields))
}

/// The sole mutation and read path to the knowledge graph.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Upsert one node. Insert sets `first_seen = last_seen = ctx.now`;
    /// update rewrites non-identity attributes, advances `last_seen`
    /// monotonically, and never touches `first_seen`.
    async fn upsert_node(
        &self,
        ctx: &ScanContext,
        node: &Node,
    ) -> Result<UpsertOutcome, SentinelError>;

    /// Upsert one edge. Both endpoints must already exist in the
    /// context's tenant, else `EndpointMissing`.
    async fn upsert_edge(
        &self,
        ctx: &ScanContext,
        edge: &Edge,
    ) -> Result<UpsertOutcome, SentinelError>;

    /// Apply a discovery batch in one logical transaction: nodes first in
    /// stable `(label, natural_key)` order, then edges with endpoint
    /// existence re-checked. Edges with missing endpoints are dropped and
    /// reported as dead-ends rather than failing the batch.
    async fn apply_batch(
        &self,
        ctx: &ScanContext,
        nodes: Vec<Node>,
        edges: Vec<Edge>,
    ) -> Result<BatchOutcome, SentinelError>;

    /// Fetch a node by id within the tenant.
    async fn get_node(
        &self,
        ctx: &ScanContext,
        node_id: NodeId,
    ) -> Result<Option<NodeRecord>, SentinelError>;

    /// List nodes of one label, newest `last_seen` first.
    async fn list_nodes(
        &self,
        ctx: &ScanContext,
        label: &str,
        filter: &NodeFilter,
        page: Page,
    ) -> Result<Vec<NodeRecord>, SentinelError>;

    /// Adjacent nodes with the connecting edges.
    async fn neighbors(
        &self,
        ctx: &ScanContext,
        node_id: NodeId,
        direction: Direction,
        edge_types: Option<&[EdgeType]>,
    ) -> Result<Vec<Neighbor>, SentinelError>;

    /// Full-text search over a pre-declared index.
    async fn search(
        &self,
        ctx: &ScanContext,
        index: &str,
        query: &str,
        limit: u32,
    ) -> Result<Vec<NodeRecord>, SentinelError>;

    /// Node counts per label.
    async fn stats(&self, ctx: &ScanContext) -> Result<TenantStats, SentinelError>;

    /// Mark nodes of one label stale when `last_seen < older_than`.
    /// Idempotent; returns the count newly marked.
    async fn sweep_stale(
        &self,
        ctx: &ScanContext,
        label: &str,
        older_than: DateTime<Utc>,
    ) -> Result<u64, SentinelError>;

    /// Remove every node and edge of the tenant. Requires explicit
    /// operator action; staleness never deletes.
    async fn purge_tenant(&self, ctx: &ScanContext) -> Result<u64, SentinelError>;
}

/// Reject payloads whose tenant differs from the context's.
pub(crate) fn guard_tenant(
    ctx: &ScanContext,
    found: sentinel_core::types::TenantId,
) -> Result<(), SentinelError> {
    if ctx.tenant_id != found {
        return Err(SentinelError::TenantMismatch {
            expected: ctx.tenant_id.to_string(),
            found: found.to_string(),
        });
    }
    Ok(())
}

/// Stable application order for a batch: `(label, natural_key)`.
pub(crate) fn sort_batch_nodes(nodes: &mut [Node]) {
    nodes.sort_by(|a, b| {
        (a.label(), a.natural_key()).cmp(&(b.label(), b.natural_key()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_rejects_tenant_id_reference() {
        let filter = NodeFilter::new().eq("tenant_id", "some-other-tenant");
        assert!(matches!(
            filter.validate(),
            Err(SentinelError::Config(_))
        ));

        let ok = NodeFilter::new().eq("ip", "10.0.0.1");
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn filter_matches_all_clauses() {
        let filter = NodeFilter::new().eq("ip", "10.0.0.1").eq("os", "Ubuntu");
        let matching = serde_json::json!({"ip": "10.0.0.1", "os": "Ubuntu", "extra": 1});
        let missing = serde_json::json!({"ip": "10.0.0.1", "os": "Debian"});
        assert!(filter.matches(&matching));
        assert!(!filter.matches(&missing));
    }

    #[test]
    fn declared_indexes_resolve() {
        assert!(fulltext_index("host_search").is_some());
        assert!(fulltext_index("nope").is_none());
        let (label, fields) = fulltext_index("vuln_search").unwrap();
        assert_eq!(label, "Vulnerability");
        assert!(fields.contains(&"cve_id"));
    }
}
