//! In-memory graph store.
//!
//! Backs the cross-crate test suites and local development without a
//! Neo4j instance. Semantics mirror the Neo4j adapter exactly: natural-key
//! identity, temporal upsert rules, tenant guards, batch atomicity (one
//! write lock per batch), and event emission.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use sentinel_core::events::{EventBus, EventPayload, EventSource, SentinelEvent};
use sentinel_core::types::{Edge, EdgeId, EdgeType, Node, NodeId, TenantId};
use sentinel_core::{ScanContext, SentinelError};

use crate::store::{
    fulltext_index, guard_tenant, sort_batch_nodes, BatchOutcome, Direction, EdgeRecord,
    GraphStore, Neighbor, NodeFilter, NodeRecord, Page, TenantStats, UpsertOutcome,
};

struct StoredNode {
    node: Node,
    stale: bool,
}

#[derive(Default)]
struct TenantState {
    nodes: HashMap<NodeId, StoredNode>,
    edges: HashMap<EdgeId, Edge>,
}

/// HashMap-backed implementation of [`GraphStore`].
pub struct MemoryGraph {
    state: RwLock<HashMap<TenantId, TenantState>>,
    bus: EventBus,
}

impl MemoryGraph {
    pub fn new(bus: EventBus) -> Self {
        Self {
            state: RwLock::new(HashMap::new()),
            bus,
        }
    }

    fn emit(&self, ctx: &ScanContext, payload: EventPayload) {
        self.bus.publish(SentinelEvent::new(
            ctx.tenant_id,
            EventSource::Graph,
            payload,
            ctx.now,
        ));
    }

    fn upsert_node_locked(
        &self,
        state: &mut TenantState,
        ctx: &ScanContext,
        node: &Node,
    ) -> Result<UpsertOutcome, SentinelError> {
        guard_tenant(ctx, node.tenant_id())?;
        let id = node.derived_id();

        match state.nodes.get_mut(&id) {
            None => {
                let mut stored = node.clone();
                stored.set_first_seen(ctx.now);
                stored.set_last_seen(ctx.now);
                self.emit(
                    ctx,
                    EventPayload::NodeDiscovered {
                        node_id: id,
                        node_type: stored.label().to_string(),
                        label: stored.display_name(),
                    },
                );
                state.nodes.insert(id, StoredNode { node: stored, stale: false });
                Ok(UpsertOutcome::Created { id: id.0 })
            }
            Some(existing) => {
                let old_props = existing.node.properties();
                let new_props = node.properties();
                let mut changed_fields: Vec<String> = new_props
                    .iter()
                    .filter(|(k, v)| old_props.get(*k) != Some(*v))
                    .map(|(k, _)| k.clone())
                    .collect();

                let first_seen = existing.node.first_seen();
                let prev_last_seen = existing.node.last_seen();

                let mut updated = node.clone();
                updated.set_first_seen(first_seen);
                updated.set_last_seen(prev_last_seen);
                updated.touch(ctx.now);
                if updated.last_seen() > prev_last_seen {
                    changed_fields.push("last_seen".to_string());
                }
                changed_fields.sort();

                existing.node = updated;
                existing.stale = false;

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

    fn upsert_edge_locked(
        &self,
        state: &mut TenantState,
        ctx: &ScanContext,
        edge: &Edge,
    ) -> Result<UpsertOutcome, SentinelError> {
        guard_tenant(ctx, edge.tenant_id)?;

        for endpoint in [edge.source_id, edge.target_id] {
            if !state.nodes.contains_key(&endpoint) {
                return Err(SentinelError::EndpointMissing {
                    tenant_id: ctx.tenant_id.to_string(),
                    node_id: endpoint.to_string(),
                });
            }
        }

        let id = EdgeId::from_parts(
            &edge.tenant_id,
            &edge.edge_type,
            &edge.source_id,
            &edge.target_id,
        );

        match state.edges.get_mut(&id) {
            None => {
                let mut stored = edge.clone();
                stored.id = id;
                stored.first_seen = ctx.now;
                stored.last_seen = ctx.now;
                self.emit(
                    ctx,
                    EventPayload::EdgeDiscovered {
                        source_id: stored.source_id,
                        target_id: stored.target_id,
                        edge_type: stored.edge_type,
                    },
                );
                state.edges.insert(id, stored);
                Ok(UpsertOutcome::Created { id: id.0 })
            }
            Some(existing) => {
                existing.properties = edge.properties.clone();
                if ctx.now > existing.last_seen {
                    existing.last_seen = ctx.now;
                }
                Ok(UpsertOutcome::Updated {
                    id: id.0,
                    changed_fields: vec![],
                })
            }
        }
    }

    fn node_record(stored: &StoredNode) -> NodeRecord {
        NodeRecord {
            id: stored.node.id().to_string(),
            label: stored.node.label().to_string(),
            tenant_id: stored.node.tenant_id().to_string(),
            properties: serde_json::Value::Object(stored.node.properties()),
            first_seen: stored.node.first_seen(),
            last_seen: stored.node.last_seen(),
            stale: stored.stale,
        }
    }

    fn edge_record(edge: &Edge) -> EdgeRecord {
        EdgeRecord {
            id: edge.id.to_string(),
            edge_type: edge.edge_type.as_str().to_string(),
            source_id: edge.source_id.to_string(),
            target_id: edge.target_id.to_string(),
            properties: serde_json::to_value(&edge.properties)
                .unwrap_or(serde_json::Value::Null),
            first_seen: edge.first_seen,
            last_seen: edge.last_seen,
        }
    }
}

#[async_trait]
impl GraphStore for MemoryGraph {
    async fn upsert_node(
        &self,
        ctx: &ScanContext,
        node: &Node,
    ) -> Result<UpsertOutcome, SentinelError> {
        let mut state = self.state.write().await;
        let tenant = state.entry(ctx.tenant_id).or_default();
        self.upsert_node_locked(tenant, ctx, node)
    }

    async fn upsert_edge(
        &self,
        ctx: &ScanContext,
        edge: &Edge,
    ) -> Result<UpsertOutcome, SentinelError> {
        let mut state = self.state.write().await;
        let tenant = state.entry(ctx.tenant_id).or_default();
        self.upsert_edge_locked(tenant, ctx, edge)
    }

    async fn apply_batch(
        &self,
        ctx: &ScanContext,
        mut nodes: Vec<Node>,
        edges: Vec<Edge>,
    ) -> Result<BatchOutcome, SentinelError> {
        ctx.check_cancelled()?;
        // One write guard across the whole batch keeps it atomic with
        // respect to concurrent readers and other batches.
        let mut state = self.state.write().await;
        let tenant = state.entry(ctx.tenant_id).or_default();

        let mut outcome = BatchOutcome::default();
        sort_batch_nodes(&mut nodes);

        for node in &nodes {
            match self.upsert_node_locked(tenant, ctx, node)? {
                UpsertOutcome::Created { .. } => outcome.nodes_created += 1,
                UpsertOutcome::Updated { .. } => outcome.nodes_updated += 1,
            }
        }

        for edge in &edges {
            match self.upsert_edge_locked(tenant, ctx, edge) {
                Ok(UpsertOutcome::Created { .. }) => outcome.edges_created += 1,
                Ok(UpsertOutcome::Updated { .. }) => outcome.edges_updated += 1,
                Err(SentinelError::EndpointMissing { node_id, .. }) => {
                    outcome.dead_ends.push(format!(
                        "{} edge dropped: endpoint {} missing",
                        edge.edge_type.as_str(),
                        node_id
                    ));
                }
                Err(other) => return Err(other),
            }
        }

        Ok(outcome)
    }

    async fn get_node(
        &self,
        ctx: &ScanContext,
        node_id: NodeId,
    ) -> Result<Option<NodeRecord>, SentinelError> {
        let state = self.state.read().await;
        Ok(state
            .get(&ctx.tenant_id)
            .and_then(|t| t.nodes.get(&node_id))
            .map(Self::node_record))
    }

    async fn list_nodes(
        &self,
        ctx: &ScanContext,
        label: &str,
        filter: &NodeFilter,
        page: Page,
    ) -> Result<Vec<NodeRecord>, SentinelError> {
        filter.validate()?;
        let state = self.state.read().await;
        let Some(tenant) = state.get(&ctx.tenant_id) else {
            return Ok(Vec::new());
        };

        let mut records: Vec<NodeRecord> = tenant
            .nodes
            .values()
            .filter(|s| s.node.label() == label)
            .map(Self::node_record)
            .filter(|r| filter.matches(&r.properties))
            .collect();

        records.sort_by(|a, b| b.last_seen.cmp(&a.last_seen).then(a.id.cmp(&b.id)));
        Ok(records
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect())
    }

    async fn neighbors(
        &self,
        ctx: &ScanContext,
        node_id: NodeId,
        direction: Direction,
        edge_types: Option<&[EdgeType]>,
    ) -> Result<Vec<Neighbor>, SentinelError> {
        let state = self.state.read().await;
        let Some(tenant) = state.get(&ctx.tenant_id) else {
            return Ok(Vec::new());
        };

        let mut results = Vec::new();
        for edge in tenant.edges.values() {
            let other = match direction {
                Direction::Outgoing if edge.source_id == node_id => edge.target_id,
                Direction::Incoming if edge.target_id == node_id => edge.source_id,
                Direction::Both if edge.source_id == node_id => edge.target_id,
                Direction::Both if edge.target_id == node_id => edge.source_id,
                _ => continue,
            };
            if let Some(types) = edge_types {
                if !types.contains(&edge.edge_type) {
                    continue;
                }
            }
            if let Some(stored) = tenant.nodes.get(&other) {
                results.push(Neighbor {
                    node: Self::node_record(stored),
                    edge: Self::edge_record(edge),
                });
            }
        }
        Ok(results)
    }

    async fn search(
        &self,
        ctx: &ScanContext,
        index: &str,
        query: &str,
        limit: u32,
    ) -> Result<Vec<NodeRecord>, SentinelError> {
        let (label, fields) = fulltext_index(index).ok_or_else(|| {
            SentinelError::Config(format!("unknown full-text index: {index}"))
        })?;

        let needle = query.to_lowercase();
        let state = self.state.read().await;
        let Some(tenant) = state.get(&ctx.tenant_id) else {
            return Ok(Vec::new());
        };

        let mut records: Vec<NodeRecord> = tenant
            .nodes
            .values()
            .filter(|s| s.node.label() == label)
            .map(Self::node_record)
            .filter(|r| {
                fields.iter().any(|f| {
                    r.property_str(f)
                        .map(|v| v.to_lowercase().contains(&needle))
                        .unwrap_or(false)
                })
            })
            .collect();
        records.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        records.truncate(limit as usize);
        Ok(records)
    }

    async fn stats(&self, ctx: &ScanContext) -> Result<TenantStats, SentinelError> {
        let state = self.state.read().await;
        let mut stats = TenantStats::default();
        if let Some(tenant) = state.get(&ctx.tenant_id) {
            for stored in tenant.nodes.values() {
                *stats
                    .counts
                    .entry(stored.node.label().to_string())
                    .or_insert(0) += 1;
            }
        }
        Ok(stats)
    }

    async fn sweep_stale(
        &self,
        ctx: &ScanContext,
        label: &str,
        older_than: DateTime<Utc>,
    ) -> Result<u64, SentinelError> {
        let mut state = self.state.write().await;
        let Some(tenant) = state.get_mut(&ctx.tenant_id) else {
            return Ok(0);
        };

        let mut marked = 0;
        for stored in tenant.nodes.values_mut() {
            if stored.node.label() == label
                && !stored.stale
                && stored.node.last_seen() < older_than
            {
                stored.stale = true;
                marked += 1;
                self.emit(
                    ctx,
                    EventPayload::NodeStale {
                        node_id: stored.node.id(),
                        last_seen: stored.node.last_seen(),
                    },
                );
            }
        }
        Ok(marked)
    }

    async fn purge_tenant(&self, ctx: &ScanContext) -> Result<u64, SentinelError> {
        let mut state = self.state.write().await;
        match state.remove(&ctx.tenant_id) {
            Some(tenant) => Ok((tenant.nodes.len() + tenant.edges.len()) as u64),
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use sentinel_core::types::{Criticality, EdgeProperties};
    use uuid::Uuid;

    fn make_host(tenant_id: TenantId, ip: &str) -> Node {
        let now = Utc::now();
        let mut host = sentinel_core::types::Host {
            id: NodeId(Uuid::nil()),
            tenant_id,
            ip: ip.to_string(),
            hostname: Some(format!("host-{ip}")),
            os: Some("Ubuntu".to_string()),
            os_version: None,
            mac_address: None,
            cloud_provider: None,
            cloud_instance_id: None,
            cloud_region: None,
            criticality: Criticality::Medium,
            tags: vec![],
            first_seen: now,
            last_seen: now,
        };
        host.id = NodeId::from_natural_key(&tenant_id, "Host", &host.natural_key());
        Node::Host(host)
    }

    fn graph() -> MemoryGraph {
        MemoryGraph::new(EventBus::with_capacity(256))
    }

    #[tokio::test]
    async fn repeated_upsert_preserves_first_seen_and_advances_last_seen() {
        let store = graph();
        let tenant = TenantId::new();
        let t0 = Utc::now();
        let ctx0 = ScanContext::new(tenant, t0);

        let host = make_host(tenant, "10.0.0.1");
        let outcome = store.upsert_node(&ctx0, &host).await.unwrap();
        assert!(outcome.is_created());

        // Second observation one hour later.
        let ctx1 = ScanContext::new(tenant, t0 + Duration::hours(1));
        let outcome = store.upsert_node(&ctx1, &host).await.unwrap();
        let UpsertOutcome::Updated { id, changed_fields } = outcome else {
            panic!("expected update");
        };
        assert_eq!(changed_fields, vec!["last_seen".to_string()]);

        let record = store.get_node(&ctx1, NodeId(id)).await.unwrap().unwrap();
        assert_eq!(record.first_seen, t0);
        assert_eq!(record.last_seen, t0 + Duration::hours(1));

        // An observation from the past never moves last_seen backward.
        let ctx_past = ScanContext::new(tenant, t0 - Duration::hours(5));
        store.upsert_node(&ctx_past, &host).await.unwrap();
        let record = store.get_node(&ctx1, NodeId(id)).await.unwrap().unwrap();
        assert_eq!(record.last_seen, t0 + Duration::hours(1));
    }

    #[tokio::test]
    async fn edge_requires_both_endpoints() {
        let store = graph();
        let tenant = TenantId::new();
        let ctx = ScanContext::new(tenant, Utc::now());

        let a = make_host(tenant, "10.0.0.1");
        store.upsert_node(&ctx, &a).await.unwrap();

        let ghost = NodeId::from_natural_key(&tenant, "Host", "host:10.9.9.9");
        let edge = Edge::new(
            tenant,
            a.id(),
            ghost,
            EdgeType::ConnectsTo,
            EdgeProperties::default(),
            ctx.now,
        );

        assert!(matches!(
            store.upsert_edge(&ctx, &edge).await,
            Err(SentinelError::EndpointMissing { .. })
        ));
    }

    #[tokio::test]
    async fn batch_drops_orphan_edges_as_dead_ends() {
        let store = graph();
        let tenant = TenantId::new();
        let ctx = ScanContext::new(tenant, Utc::now());

        let a = make_host(tenant, "10.0.0.1");
        let b = make_host(tenant, "10.0.0.2");
        let ghost = NodeId::from_natural_key(&tenant, "Host", "host:10.9.9.9");

        let good = Edge::new(
            tenant,
            a.id(),
            b.id(),
            EdgeType::ConnectsTo,
            EdgeProperties::default(),
            ctx.now,
        );
        let orphan = Edge::new(
            tenant,
            a.id(),
            ghost,
            EdgeType::ConnectsTo,
            EdgeProperties::default(),
            ctx.now,
        );

        let outcome = store
            .apply_batch(&ctx, vec![a, b], vec![good, orphan])
            .await
            .unwrap();
        assert_eq!(outcome.nodes_created, 2);
        assert_eq!(outcome.edges_created, 1);
        assert_eq!(outcome.dead_ends.len(), 1);
    }

    #[tokio::test]
    async fn tenant_guard_rejects_foreign_payloads() {
        let store = graph();
        let t1 = TenantId::new();
        let t2 = TenantId::new();
        let ctx = ScanContext::new(t1, Utc::now());

        let foreign = make_host(t2, "10.0.0.1");
        assert!(matches!(
            store.upsert_node(&ctx, &foreign).await,
            Err(SentinelError::TenantMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn cross_tenant_reads_are_isolated() {
        let store = graph();
        let t1 = TenantId::new();
        let t2 = TenantId::new();
        let ctx1 = ScanContext::new(t1, Utc::now());
        let ctx2 = ScanContext::new(t2, Utc::now());

        // Both tenants own hosts at the same addresses.
        for i in 0..100u32 {
            let ip = format!("10.0.{}.{}", i / 250, i % 250);
            store.upsert_node(&ctx1, &make_host(t1, &ip)).await.unwrap();
            store.upsert_node(&ctx2, &make_host(t2, &ip)).await.unwrap();
        }

        let listed = store
            .list_nodes(
                &ctx1,
                "Host",
                &NodeFilter::new(),
                Page {
                    limit: 500,
                    offset: 0,
                },
            )
            .await
            .unwrap();
        assert_eq!(listed.len(), 100);
        assert!(listed.iter().all(|r| r.tenant_id == t1.to_string()));

        // Counts never sum across tenants.
        assert_eq!(store.stats(&ctx1).await.unwrap().total(), 100);
        assert_eq!(store.stats(&ctx2).await.unwrap().total(), 100);
    }

    #[tokio::test]
    async fn sweep_stale_is_idempotent_and_emits_once() {
        let store = graph();
        let tenant = TenantId::new();
        let t0 = Utc::now();
        let ctx = ScanContext::new(tenant, t0);
        let mut rx = store.bus.subscribe();

        store
            .upsert_node(&ctx, &make_host(tenant, "10.0.0.1"))
            .await
            .unwrap();

        let cutoff = t0 + Duration::hours(25);
        let later = ScanContext::new(tenant, cutoff);
        assert_eq!(store.sweep_stale(&later, "Host", cutoff).await.unwrap(), 1);
        assert_eq!(store.sweep_stale(&later, "Host", cutoff).await.unwrap(), 0);

        let mut stale_events = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event.payload, EventPayload::NodeStale { .. }) {
                stale_events += 1;
            }
        }
        assert_eq!(stale_events, 1);
    }

    #[tokio::test]
    async fn search_uses_declared_indexes_only() {
        let store = graph();
        let tenant = TenantId::new();
        let ctx = ScanContext::new(tenant, Utc::now());

        store
            .upsert_node(&ctx, &make_host(tenant, "10.0.0.7"))
            .await
            .unwrap();

        let hits = store.search(&ctx, "host_search", "10.0.0.7", 10).await.unwrap();
        assert_eq!(hits.len(), 1);

        assert!(matches!(
            store.search(&ctx, "made_up_index", "x", 10).await,
            Err(SentinelError::Config(_))
        ));
    }

    #[tokio::test]
    async fn purge_removes_everything_for_tenant_only() {
        let store = graph();
        let t1 = TenantId::new();
        let t2 = TenantId::new();
        let ctx1 = ScanContext::new(t1, Utc::now());
        let ctx2 = ScanContext::new(t2, Utc::now());

        store.upsert_node(&ctx1, &make_host(t1, "10.0.0.1")).await.unwrap();
        store.upsert_node(&ctx2, &make_host(t2, "10.0.0.2")).await.unwrap();

        assert_eq!(store.purge_tenant(&ctx1).await.unwrap(), 1);
        assert_eq!(store.stats(&ctx1).await.unwrap().total(), 0);
        assert_eq!(store.stats(&ctx2).await.unwrap().total(), 1);
    }
}
