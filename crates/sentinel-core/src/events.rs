//! Domain events produced by the discovery and correlation core.
//!
//! Events fan out to the rest of the platform over an in-process
//! broadcast bus; the API gateway bridges them onto the external stream.
//! Topics are partitioned by tenant: publication order is append order
//! per tenant, with no global ordering guarantee.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{EdgeType, NodeId, TenantId};

/// Unique identifier for an event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

/// An event emitted by a Sentinel service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentinelEvent {
    pub id: EventId,
    pub tenant_id: TenantId,
    pub timestamp: DateTime<Utc>,
    pub source: EventSource,
    pub payload: EventPayload,
}

impl SentinelEvent {
    pub fn new(
        tenant_id: TenantId,
        source: EventSource,
        payload: EventPayload,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EventId::new(),
            tenant_id,
            timestamp: at,
            source,
            payload,
        }
    }
}

/// Which subsystem emitted the event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Connector,
    Graph,
    Enrichment,
    Orchestrator,
    Engram,
}

/// The event payload, tagged by type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum EventPayload {
    // ── Discovery events ──────────────────────────────────────
    /// A new node was discovered in the environment.
    NodeDiscovered {
        node_id: NodeId,
        node_type: String,
        label: String,
    },
    /// A node was updated (properties changed).
    NodeUpdated {
        node_id: NodeId,
        changed_fields: Vec<String>,
    },
    /// A node fell out of its staleness window.
    NodeStale {
        node_id: NodeId,
        last_seen: DateTime<Utc>,
    },
    /// A new edge was discovered.
    EdgeDiscovered {
        source_id: NodeId,
        target_id: NodeId,
        edge_type: EdgeType,
    },

    // ── Vulnerability events ──────────────────────────────────
    /// A new vulnerability was correlated to an asset.
    VulnerabilityFound {
        node_id: NodeId,
        cve_id: String,
        cvss_score: Option<f64>,
        exploitable: bool,
    },

    // ── Scan lifecycle events ─────────────────────────────────
    /// A scan operation started.
    ScanStarted {
        scan_id: Uuid,
        scan_type: String,
        target: String,
    },
    /// A scan operation completed.
    ScanCompleted {
        scan_id: Uuid,
        nodes_found: u32,
        nodes_updated: u32,
        nodes_stale: u32,
        duration_ms: u64,
    },

    // ── Engram events ─────────────────────────────────────────
    /// An Engram reasoning session was recorded.
    EngramRecorded {
        session_id: Uuid,
        agent_type: String,
        intent: String,
        action_count: u32,
    },
    /// An Engram session overflowed its buffer and was dropped.
    SessionDropped { session_id: Uuid, records: u32 },
}

// ── Event Bus ─────────────────────────────────────────────────────

const DEFAULT_BUS_CAPACITY: usize = 4096;

/// In-process broadcast bus for domain events.
///
/// Cheap to clone; every subscriber gets every event from the point of
/// subscription. Publishing never blocks: with no subscribers the event
/// is dropped, matching fire-and-forget fan-out semantics.
#[derive(Clone)]
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<SentinelEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. Returns the number of subscribers that will
    /// observe it.
    pub fn publish(&self, event: SentinelEvent) -> usize {
        let tenant = event.tenant_id;
        match self.tx.send(event) {
            Ok(n) => n,
            Err(_) => {
                tracing::trace!(tenant_id = %tenant, "event dropped: no subscribers");
                0
            }
        }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SentinelEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_id(tenant: &TenantId) -> NodeId {
        NodeId::from_natural_key(tenant, "Host", "host:10.0.0.1")
    }

    #[test]
    fn event_serialization_roundtrip() {
        let tenant = TenantId::new();
        let event = SentinelEvent::new(
            tenant,
            EventSource::Connector,
            EventPayload::NodeDiscovered {
                node_id: node_id(&tenant),
                node_type: "Host".to_string(),
                label: "web-server-01".to_string(),
            },
            Utc::now(),
        );

        let json = serde_json::to_string(&event).unwrap();
        let deserialized: SentinelEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event.id, deserialized.id);
    }

    #[test]
    fn event_payload_tags() {
        let tenant = TenantId::new();
        let payload = EventPayload::VulnerabilityFound {
            node_id: node_id(&tenant),
            cve_id: "CVE-2024-1234".to_string(),
            cvss_score: Some(8.1),
            exploitable: true,
        };

        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"event_type\":\"VulnerabilityFound\""));
    }

    #[tokio::test]
    async fn bus_delivers_in_publish_order() {
        let bus = EventBus::with_capacity(16);
        let mut rx = bus.subscribe();
        let tenant = TenantId::new();

        for i in 0..3u32 {
            bus.publish(SentinelEvent::new(
                tenant,
                EventSource::Graph,
                EventPayload::NodeUpdated {
                    node_id: node_id(&tenant),
                    changed_fields: vec![format!("field-{i}")],
                },
                Utc::now(),
            ));
        }

        for i in 0..3u32 {
            let event = rx.recv().await.unwrap();
            match event.payload {
                EventPayload::NodeUpdated { changed_fields, .. } => {
                    assert_eq!(changed_fields, vec![format!("field-{i}")]);
                }
                other => panic!("unexpected payload: {other:?}"),
            }
        }
    }

    #[test]
    fn publish_without_subscribers_is_fire_and_forget() {
        let bus = EventBus::new();
        let tenant = TenantId::new();
        let delivered = bus.publish(SentinelEvent::new(
            tenant,
            EventSource::Orchestrator,
            EventPayload::ScanStarted {
                scan_id: Uuid::new_v4(),
                scan_type: "cloud".to_string(),
                target: "aws".to_string(),
            },
            Utc::now(),
        ));
        assert_eq!(delivered, 0);
    }
}
