//! Neo4j implementation of the graph store contract.
//!
//! All mutations use MERGE keyed on `(tenant_id, id)` — and since ids are
//! deterministic fingerprints of natural keys, re-discovery is idempotent.
//! Besides the individual queryable properties, every node carries a
//! `props_json` copy of its attribute document so updates can report
//! exactly which fields changed.
//!
//! Timestamps are stored as RFC 3339 strings; their lexicographic order
//! matches their temporal order, which the staleness sweep relies on.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use neo4rs::query;

use sentinel_core::events::{EventBus, EventPayload, EventSource, SentinelEvent};
use sentinel_core::types::{Edge, EdgeType, Node, NodeId};
use sentinel_core::{ScanContext, SentinelError};

use crate::client::{GraphClient, GraphError};
use crate::store::{
    fulltext_index, guard_tenant, sort_batch_nodes, BatchOutcome, Direction, EdgeRecord,
    GraphStore, Neighbor, NodeFilter, NodeRecord, Page, TenantStats, UpsertOutcome,
    FULLTEXT_INDEXES,
};

/// Maximum attempts for a contended batch transaction.
const MAX_TXN_ATTEMPTS: u32 = 5;
const RETRY_BASE_MS: u64 = 100;
const RETRY_CAP_MS: u64 = 2_000;

/// Labels that get a staleness index on `(tenant_id, last_seen)`.
const STALENESS_LABELS: &[&str] = &["Host", "Service"];

/// Secondary lookup indexes per label.
const LOOKUP_INDEXES: &[(&str, &str)] = &[
    ("Host", "ip"),
    ("Host", "hostname"),
    ("Host", "cloud_instance_id"),
    ("Service", "name"),
    ("Service", "port"),
    ("User", "username"),
    ("User", "email"),
    ("Vulnerability", "cve_id"),
    ("Vulnerability", "severity"),
    ("Subnet", "cidr"),
    ("Certificate", "subject"),
    ("Certificate", "not_after"),
    ("McpServer", "name"),
];

/// Every node label managed by the adapter.
const NODE_LABELS: &[&str] = &[
    "Host",
    "Service",
    "Port",
    "User",
    "Group",
    "Role",
    "Policy",
    "Subnet",
    "Vpc",
    "Vulnerability",
    "Certificate",
    "Application",
    "McpServer",
    "Finding",
    "ConfigSnapshot",
];

/// Neo4j-backed [`GraphStore`].
pub struct Neo4jGraph {
    client: GraphClient,
    bus: EventBus,
}

struct ExistingNode {
    props: serde_json::Value,
}

impl Neo4jGraph {
    pub fn new(client: GraphClient, bus: EventBus) -> Self {
        Self { client, bus }
    }

    /// Create uniqueness constraints, lookup indexes, staleness indexes,
    /// and full-text indexes. Idempotent; run at startup.
    pub async fn ensure_schema(&self) -> Result<(), SentinelError> {
        for label in NODE_LABELS {
            let stmt = format!(
                "CREATE CONSTRAINT {}_tenant_id_unique IF NOT EXISTS \
                 FOR (n:{label}) REQUIRE (n.tenant_id, n.id) IS UNIQUE",
                label.to_lowercase()
            );
            self.client.run(query(&stmt)).await.map_err(schema_err)?;
        }

        for (label, property) in LOOKUP_INDEXES {
            let stmt = format!(
                "CREATE INDEX {}_{}_idx IF NOT EXISTS \
                 FOR (n:{label}) ON (n.tenant_id, n.{property})",
                label.to_lowercase(),
                property
            );
            self.client.run(query(&stmt)).await.map_err(schema_err)?;
        }

        for label in STALENESS_LABELS {
            let stmt = format!(
                "CREATE INDEX {}_staleness_idx IF NOT EXISTS \
                 FOR (n:{label}) ON (n.tenant_id, n.last_seen)",
                label.to_lowercase()
            );
            self.client.run(query(&stmt)).await.map_err(schema_err)?;
        }

        for (name, label, fields) in FULLTEXT_INDEXES {
            let field_list = fields
                .iter()
                .map(|f| format!("n.{f}"))
                .collect::<Vec<_>>()
                .join(", ");
            let stmt = format!(
                "CREATE FULLTEXT INDEX {name} IF NOT EXISTS \
                 FOR (n:{label}) ON EACH [{field_list}]"
            );
            self.client.run(query(&stmt)).await.map_err(schema_err)?;
        }

        tracing::info!("Graph schema ensured");
        Ok(())
    }

    fn emit(&self, ctx: &ScanContext, payload: EventPayload) {
        self.bus.publish(SentinelEvent::new(
            ctx.tenant_id,
            EventSource::Graph,
            payload,
            ctx.now,
        ));
    }

    /// Fetch the stored attribute documents for the given node ids.
    async fn fetch_existing_nodes(
        &self,
        ctx: &ScanContext,
        ids: &[NodeId],
    ) -> Result<HashMap<String, ExistingNode>, SentinelError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let id_strings: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        let q = query(
            "MATCH (n {tenant_id: $tenant_id})
             WHERE n.id IN $ids
             RETURN n.id AS id, n.props_json AS props",
        )
        .param("tenant_id", ctx.tenant_id.to_string())
        .param("ids", id_strings);

        let rows = self.client.query_rows(q).await.map_err(graph_err)?;
        let mut existing = HashMap::new();
        for row in rows {
            let id: String = row.get("id").unwrap_or_default();
            let props_json: String = row.get("props").unwrap_or_default();
            let props = serde_json::from_str(&props_json)
                .unwrap_or(serde_json::Value::Object(Default::default()));
            existing.insert(id, ExistingNode { props });
        }
        Ok(existing)
    }

    /// Which of the given deterministic edge ids already exist.
    async fn fetch_existing_edges(
        &self,
        ctx: &ScanContext,
        edges: &[Edge],
    ) -> Result<HashSet<String>, SentinelError> {
        if edges.is_empty() {
            return Ok(HashSet::new());
        }

        let id_strings: Vec<String> = edges.iter().map(|e| e.id.to_string()).collect();
        let q = query(
            "MATCH (a {tenant_id: $tenant_id})-[r]->(b {tenant_id: $tenant_id})
             WHERE r.id IN $ids
             RETURN r.id AS id",
        )
        .param("tenant_id", ctx.tenant_id.to_string())
        .param("ids", id_strings);

        let rows = self.client.query_rows(q).await.map_err(graph_err)?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.get::<String>("id").ok())
            .collect())
    }

    fn node_merge_query(ctx: &ScanContext, node: &Node) -> Result<neo4rs::Query, SentinelError> {
        let label = node.label();
        let mut props = serde_json::Value::Object(node.properties());
        flatten_props(&mut props);
        let props_json = serde_json::to_string(&props)?;

        let cypher = format!(
            "MERGE (n:{label} {{tenant_id: $tenant_id, id: $id}})
             ON CREATE SET
               n += apoc.convert.fromJsonMap($props),
               n.props_json = $props, n.natural_key = $natural_key,
               n.stale = false,
               n.first_seen = $now, n.last_seen = $now
             ON MATCH SET
               n += apoc.convert.fromJsonMap($props),
               n.props_json = $props, n.stale = false,
               n.last_seen = CASE
                 WHEN n.last_seen >= $now THEN n.last_seen ELSE $now
               END"
        );

        Ok(query(&cypher)
            .param("tenant_id", ctx.tenant_id.to_string())
            .param("id", node.derived_id().to_string())
            .param("natural_key", node.natural_key())
            .param("props", props_json)
            .param("now", ctx.now.to_rfc3339()))
    }

    fn edge_merge_query(ctx: &ScanContext, edge: &Edge) -> Result<neo4rs::Query, SentinelError> {
        let rel_type = edge.edge_type.as_str();
        let mut props = serde_json::to_value(&edge.properties)?;
        flatten_props(&mut props);
        let props_json = serde_json::to_string(&props)?;

        let cypher = format!(
            "MATCH (a {{tenant_id: $tenant_id, id: $source_id}})
             MATCH (b {{tenant_id: $tenant_id, id: $target_id}})
             MERGE (a)-[r:{rel_type} {{id: $edge_id}}]->(b)
             ON CREATE SET
               r.tenant_id = $tenant_id,
               r += apoc.convert.fromJsonMap($props),
               r.props_json = $props,
               r.first_seen = $now, r.last_seen = $now
             ON MATCH SET
               r += apoc.convert.fromJsonMap($props),
               r.props_json = $props,
               r.last_seen = CASE
                 WHEN r.last_seen >= $now THEN r.last_seen ELSE $now
               END"
        );

        Ok(query(&cypher)
            .param("tenant_id", ctx.tenant_id.to_string())
            .param("source_id", edge.source_id.to_string())
            .param("target_id", edge.target_id.to_string())
            .param("edge_id", edge.id.to_string())
            .param("props", props_json)
            .param("now", ctx.now.to_rfc3339()))
    }

    /// Changed field names between a stored attribute document and the
    /// incoming one, `last_seen` appended by the caller when it advanced.
    fn changed_fields(old: &serde_json::Value, node: &Node) -> Vec<String> {
        let mut new_props = serde_json::Value::Object(node.properties());
        flatten_props(&mut new_props);
        let empty = serde_json::Map::new();
        let new_map = new_props.as_object().unwrap_or(&empty);
        let mut changed: Vec<String> = new_map
            .iter()
            .filter(|(k, v)| old.get(*k) != Some(*v))
            .map(|(k, _)| k.clone())
            .collect();
        changed.push("last_seen".to_string());
        changed.sort();
        changed
    }
}

/// Neo4j properties hold primitives and arrays of primitives. Nested
/// documents (the `extra` payload, tagged enum variants) are stored as
/// JSON strings instead.
fn flatten_props(value: &mut serde_json::Value) {
    let Some(map) = value.as_object_mut() else {
        return;
    };
    for v in map.values_mut() {
        let nested = v.is_object()
            || v.as_array()
                .is_some_and(|items| items.iter().any(|i| i.is_object() || i.is_array()));
        if nested {
            *v = serde_json::Value::String(v.to_string());
        }
    }
}

fn graph_err(e: GraphError) -> SentinelError {
    if e.is_retryable() {
        SentinelError::Transient(e.to_string())
    } else {
        SentinelError::Graph(e.to_string())
    }
}

fn schema_err(e: GraphError) -> SentinelError {
    SentinelError::SchemaMismatch(e.to_string())
}

fn parse_time(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_default()
}

fn record_from_neo4j(node: &neo4rs::Node, label: &str) -> NodeRecord {
    let props_json: String = node.get("props_json").unwrap_or_default();
    let properties = serde_json::from_str(&props_json)
        .unwrap_or(serde_json::Value::Object(Default::default()));
    let first_seen: String = node.get("first_seen").unwrap_or_default();
    let last_seen: String = node.get("last_seen").unwrap_or_default();

    NodeRecord {
        id: node.get("id").unwrap_or_default(),
        label: label.to_string(),
        tenant_id: node.get("tenant_id").unwrap_or_default(),
        properties,
        first_seen: parse_time(&first_seen),
        last_seen: parse_time(&last_seen),
        stale: node.get("stale").unwrap_or(false),
    }
}

#[async_trait]
impl GraphStore for Neo4jGraph {
    async fn upsert_node(
        &self,
        ctx: &ScanContext,
        node: &Node,
    ) -> Result<UpsertOutcome, SentinelError> {
        guard_tenant(ctx, node.tenant_id())?;
        let id = node.derived_id();

        let existing = self.fetch_existing_nodes(ctx, &[id]).await?;
        let q = Self::node_merge_query(ctx, node)?;
        self.client.run(q).await.map_err(graph_err)?;

        match existing.get(&id.to_string()) {
            None => {
                self.emit(
                    ctx,
                    EventPayload::NodeDiscovered {
                        node_id: id,
                        node_type: node.label().to_string(),
                        label: node.display_name(),
                    },
                );
                Ok(UpsertOutcome::Created { id: id.0 })
            }
            Some(old) => {
                let changed_fields = Self::changed_fields(&old.props, node);
                self.emit(
                    ctx,
                    EventPayload::NodeUpdated {
                        node_id: id,
                        changed_fields: changed_fields.clone(),
                    },
                );
                Ok(UpsertOutcome::Updated {
                    id: id.0,
                    changed_fields,
                })
            }
        }
    }

    async fn upsert_edge(
        &self,
        ctx: &ScanContext,
        edge: &Edge,
    ) -> Result<UpsertOutcome, SentinelError> {
        guard_tenant(ctx, edge.tenant_id)?;

        let endpoints = [edge.source_id, edge.target_id];
        let existing_nodes = self.fetch_existing_nodes(ctx, &endpoints).await?;
        for endpoint in endpoints {
            if !existing_nodes.contains_key(&endpoint.to_string()) {
                return Err(SentinelError::EndpointMissing {
                    tenant_id: ctx.tenant_id.to_string(),
                    node_id: endpoint.to_string(),
                });
            }
        }

        let was_present = !self
            .fetch_existing_edges(ctx, std::slice::from_ref(edge))
            .await?
            .is_empty();

        let q = Self::edge_merge_query(ctx, edge)?;
        self.client.run(q).await.map_err(graph_err)?;

        if was_present {
            Ok(UpsertOutcome::Updated {
                id: edge.id.0,
                changed_fields: vec![],
            })
        } else {
            self.emit(
                ctx,
                EventPayload::EdgeDiscovered {
                    source_id: edge.source_id,
                    target_id: edge.target_id,
                    edge_type: edge.edge_type,
                },
            );
            Ok(UpsertOutcome::Created { id: edge.id.0 })
        }
    }

    async fn apply_batch(
        &self,
        ctx: &ScanContext,
        mut nodes: Vec<Node>,
        edges: Vec<Edge>,
    ) -> Result<BatchOutcome, SentinelError> {
        ctx.check_cancelled()?;
        for node in &nodes {
            guard_tenant(ctx, node.tenant_id())?;
        }
        for edge in &edges {
            guard_tenant(ctx, edge.tenant_id)?;
        }

        sort_batch_nodes(&mut nodes);

        let node_ids: Vec<NodeId> = nodes.iter().map(|n| n.derived_id()).collect();
        let existing_nodes = self.fetch_existing_nodes(ctx, &node_ids).await?;
        let existing_edges = self.fetch_existing_edges(ctx, &edges).await?;

        // Endpoints must exist after the batch's own nodes are applied:
        // the admissible set is (already stored) ∪ (in this batch).
        let mut known_ids: HashSet<String> =
            existing_nodes.keys().cloned().collect();
        known_ids.extend(node_ids.iter().map(|id| id.to_string()));

        let mut outcome = BatchOutcome::default();
        let mut admissible_edges = Vec::new();
        for edge in &edges {
            let missing = [edge.source_id, edge.target_id]
                .into_iter()
                .find(|id| !known_ids.contains(&id.to_string()));
            match missing {
                Some(id) => outcome.dead_ends.push(format!(
                    "{} edge dropped: endpoint {} missing",
                    edge.edge_type.as_str(),
                    id
                )),
                None => admissible_edges.push(edge.clone()),
            }
        }

        // One transaction; nodes before edges. Retried as a unit on
        // backend contention.
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.run_batch_txn(ctx, &nodes, &admissible_edges).await {
                Ok(()) => break,
                Err(e) if e.is_retryable() && attempt < MAX_TXN_ATTEMPTS => {
                    let delay = (RETRY_BASE_MS * 2u64.pow(attempt - 1)).min(RETRY_CAP_MS);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay,
                        error = %e,
                        "Batch transaction contended; retrying"
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                }
                Err(e) => return Err(graph_err(e)),
            }
        }

        for (node, id) in nodes.iter().zip(&node_ids) {
            match existing_nodes.get(&id.to_string()) {
                None => {
                    outcome.nodes_created += 1;
                    self.emit(
                        ctx,
                        EventPayload::NodeDiscovered {
                            node_id: *id,
                            node_type: node.label().to_string(),
                            label: node.display_name(),
                        },
                    );
                }
                Some(old) => {
                    outcome.nodes_updated += 1;
                    self.emit(
                        ctx,
                        EventPayload::NodeUpdated {
                            node_id: *id,
                            changed_fields: Self::changed_fields(&old.props, node),
                        },
                    );
                }
            }
        }

        for edge in &admissible_edges {
            if existing_edges.contains(&edge.id.to_string()) {
                outcome.edges_updated += 1;
            } else {
                outcome.edges_created += 1;
                self.emit(
                    ctx,
                    EventPayload::EdgeDiscovered {
                        source_id: edge.source_id,
                        target_id: edge.target_id,
                        edge_type: edge.edge_type,
                    },
                );
            }
        }

        Ok(outcome)
    }

    async fn get_node(
        &self,
        ctx: &ScanContext,
        node_id: NodeId,
    ) -> Result<Option<NodeRecord>, SentinelError> {
        let q = query(
            "MATCH (n {tenant_id: $tenant_id, id: $id})
             RETURN n, labels(n) AS labels",
        )
        .param("tenant_id", ctx.tenant_id.to_string())
        .param("id", node_id.to_string());

        match self.client.query_one(q).await.map_err(graph_err)? {
            Some(row) => {
                let node: neo4rs::Node = row
                    .get("n")
                    .map_err(|e| SentinelError::Graph(format!("node decode: {e}")))?;
                let labels: Vec<String> = row.get("labels").unwrap_or_default();
                let label = labels.first().cloned().unwrap_or_default();
                Ok(Some(record_from_neo4j(&node, &label)))
            }
            None => Ok(None),
        }
    }

    async fn list_nodes(
        &self,
        ctx: &ScanContext,
        label: &str,
        filter: &NodeFilter,
        page: Page,
    ) -> Result<Vec<NodeRecord>, SentinelError> {
        filter.validate()?;

        let mut where_clauses = Vec::new();
        for (i, (key, _)) in filter.clauses().iter().enumerate() {
            where_clauses.push(format!("n.{key} = $f{i}"));
        }
        let where_sql = if where_clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", where_clauses.join(" AND "))
        };

        let cypher = format!(
            "MATCH (n:{label} {{tenant_id: $tenant_id}})
             {where_sql}
             RETURN n
             ORDER BY n.last_seen DESC
             SKIP $offset LIMIT $limit"
        );

        let mut q = query(&cypher)
            .param("tenant_id", ctx.tenant_id.to_string())
            .param("offset", page.offset as i64)
            .param("limit", page.limit as i64);
        for (i, (_, value)) in filter.clauses().iter().enumerate() {
            let name = format!("f{i}");
            q = match value {
                serde_json::Value::String(s) => q.param(name.as_str(), s.clone()),
                serde_json::Value::Number(n) if n.is_i64() => {
                    q.param(name.as_str(), n.as_i64().unwrap_or_default())
                }
                serde_json::Value::Number(n) => {
                    q.param(name.as_str(), n.as_f64().unwrap_or_default())
                }
                serde_json::Value::Bool(b) => q.param(name.as_str(), *b),
                other => q.param(name.as_str(), other.to_string()),
            };
        }

        let rows = self.client.query_rows(q).await.map_err(graph_err)?;
        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            let node: neo4rs::Node = row
                .get("n")
                .map_err(|e| SentinelError::Graph(format!("node decode: {e}")))?;
            results.push(record_from_neo4j(&node, label));
        }
        Ok(results)
    }

    async fn neighbors(
        &self,
        ctx: &ScanContext,
        node_id: NodeId,
        direction: Direction,
        edge_types: Option<&[EdgeType]>,
    ) -> Result<Vec<Neighbor>, SentinelError> {
        let pattern = match direction {
            Direction::Outgoing => "(a {tenant_id: $tenant_id, id: $id})-[r]->(b)",
            Direction::Incoming => "(a {tenant_id: $tenant_id, id: $id})<-[r]-(b)",
            Direction::Both => "(a {tenant_id: $tenant_id, id: $id})-[r]-(b)",
        };

        let type_filter = match edge_types {
            Some(_) => "AND type(r) IN $types",
            None => "",
        };

        let cypher = format!(
            "MATCH {pattern}
             WHERE b.tenant_id = $tenant_id {type_filter}
             RETURN b, r, type(r) AS rel_type, labels(b) AS labels"
        );

        let mut q = query(&cypher)
            .param("tenant_id", ctx.tenant_id.to_string())
            .param("id", node_id.to_string());
        if let Some(types) = edge_types {
            let names: Vec<String> = types.iter().map(|t| t.as_str().to_string()).collect();
            q = q.param("types", names);
        }

        let rows = self.client.query_rows(q).await.map_err(graph_err)?;
        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            let neo_node: neo4rs::Node = row
                .get("b")
                .map_err(|e| SentinelError::Graph(format!("neighbor decode: {e}")))?;
            let rel: neo4rs::Relation = row
                .get("r")
                .map_err(|e| SentinelError::Graph(format!("relation decode: {e}")))?;
            let rel_type: String = row.get("rel_type").unwrap_or_default();
            let labels: Vec<String> = row.get("labels").unwrap_or_default();
            let label = labels.first().cloned().unwrap_or_default();

            let node_record = record_from_neo4j(&neo_node, &label);
            let props_json: String = rel.get("props_json").unwrap_or_default();
            let edge_first_seen: String = rel.get("first_seen").unwrap_or_default();
            let edge_last_seen: String = rel.get("last_seen").unwrap_or_default();
            let edge_record = EdgeRecord {
                id: rel.get::<String>("id").unwrap_or_default(),
                edge_type: rel_type,
                source_id: node_id.to_string(),
                target_id: node_record.id.clone(),
                properties: serde_json::from_str(&props_json)
                    .unwrap_or(serde_json::Value::Null),
                first_seen: parse_time(&edge_first_seen),
                last_seen: parse_time(&edge_last_seen),
            };

            results.push(Neighbor {
                node: node_record,
                edge: edge_record,
            });
        }
        Ok(results)
    }

    async fn search(
        &self,
        ctx: &ScanContext,
        index: &str,
        search_term: &str,
        limit: u32,
    ) -> Result<Vec<NodeRecord>, SentinelError> {
        let (label, _) = fulltext_index(index).ok_or_else(|| {
            SentinelError::Config(format!("unknown full-text index: {index}"))
        })?;

        let q = query(
            "CALL db.index.fulltext.queryNodes($index, $term) YIELD node, score
             WHERE node.tenant_id = $tenant_id
             RETURN node
             ORDER BY score DESC
             LIMIT $limit",
        )
        .param("tenant_id", ctx.tenant_id.to_string())
        .param("index", index.to_string())
        .param("term", search_term.to_string())
        .param("limit", limit as i64);

        let rows = self.client.query_rows(q).await.map_err(graph_err)?;
        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            let node: neo4rs::Node = row
                .get("node")
                .map_err(|e| SentinelError::Graph(format!("search decode: {e}")))?;
            results.push(record_from_neo4j(&node, label));
        }
        Ok(results)
    }

    async fn stats(&self, ctx: &ScanContext) -> Result<TenantStats, SentinelError> {
        let q = query(
            "MATCH (n {tenant_id: $tenant_id})
             RETURN labels(n)[0] AS label, count(n) AS cnt",
        )
        .param("tenant_id", ctx.tenant_id.to_string());

        let rows = self.client.query_rows(q).await.map_err(graph_err)?;
        let mut stats = TenantStats::default();
        for row in rows {
            let label: String = row.get("label").unwrap_or_default();
            let count: i64 = row.get("cnt").unwrap_or(0);
            stats.counts.insert(label, count as u64);
        }
        Ok(stats)
    }

    async fn sweep_stale(
        &self,
        ctx: &ScanContext,
        label: &str,
        older_than: DateTime<Utc>,
    ) -> Result<u64, SentinelError> {
        let cypher = format!(
            "MATCH (n:{label} {{tenant_id: $tenant_id}})
             WHERE n.last_seen < $cutoff AND (n.stale IS NULL OR n.stale = false)
             SET n.stale = true
             RETURN n.id AS id, n.last_seen AS last_seen"
        );

        let q = query(&cypher)
            .param("tenant_id", ctx.tenant_id.to_string())
            .param("cutoff", older_than.to_rfc3339());

        let rows = self.client.query_rows(q).await.map_err(graph_err)?;
        for row in &rows {
            let id: String = row.get("id").unwrap_or_default();
            let last_seen: String = row.get("last_seen").unwrap_or_default();
            if let Ok(uuid) = id.parse() {
                self.emit(
                    ctx,
                    EventPayload::NodeStale {
                        node_id: NodeId(uuid),
                        last_seen: parse_time(&last_seen),
                    },
                );
            }
        }
        Ok(rows.len() as u64)
    }

    async fn purge_tenant(&self, ctx: &ScanContext) -> Result<u64, SentinelError> {
        let q = query(
            "MATCH (n {tenant_id: $tenant_id})
             DETACH DELETE n
             RETURN count(n) AS cnt",
        )
        .param("tenant_id", ctx.tenant_id.to_string());

        match self.client.query_one(q).await.map_err(graph_err)? {
            Some(row) => Ok(row.get::<i64>("cnt").unwrap_or(0) as u64),
            None => Ok(0),
        }
    }
}

impl Neo4jGraph {
    async fn run_batch_txn(
        &self,
        ctx: &ScanContext,
        nodes: &[Node],
        edges: &[Edge],
    ) -> Result<(), GraphError> {
        let mut txn = self.client.start_txn().await?;

        for node in nodes {
            let q = Self::node_merge_query(ctx, node)
                .map_err(|e| GraphError::Serialization(e.to_string()))?;
            txn.run(q).await?;
        }
        for edge in edges {
            let q = Self::edge_merge_query(ctx, edge)
                .map_err(|e| GraphError::Serialization(e.to_string()))?;
            txn.run(q).await?;
        }

        txn.commit().await?;
        Ok(())
    }
}
