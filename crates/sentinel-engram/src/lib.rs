//! Sentinel Engram — Tamper-evident reasoning capture.
//!
//! Engrams record the complete reasoning chain of one unit of autonomous
//! work: intent, context, decisions with the alternatives considered,
//! actions taken, and dead-ends hit. Each engram is content-hashed with
//! BLAKE3 over a canonical serialization and stored under a per-tenant,
//! append-only object store addressed by that hash.

pub mod hash;
pub mod session;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Core Types ───────────────────────────────────────────────────

/// Unique identifier for an engram session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct EngramId(pub Uuid);

impl EngramId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EngramId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EngramId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Terminal status of a recorded session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionOutcome {
    Success,
    Partial,
    Failed,
}

/// A decision made during execution, with the paths not taken.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Decision {
    /// What was being decided.
    pub description: String,
    /// Options that were considered.
    pub alternatives: Vec<String>,
    /// The option that was chosen.
    pub chosen: String,
    /// Why it won.
    pub rationale: String,
    pub at: DateTime<Utc>,
}

/// An action taken by the agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionRecord {
    /// Kind of action (e.g. "graph_mutation", "api_call", "health_check").
    pub kind: String,
    /// What the action was applied to.
    pub target: String,
    /// Whether the action succeeded.
    pub success: bool,
    /// Counters describing the outcome, in a stable order.
    pub counts: std::collections::BTreeMap<String, u64>,
    pub at: DateTime<Utc>,
}

/// A path that was attempted and abandoned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeadEnd {
    pub description: String,
    /// Supporting evidence (error class, response fragment, counts).
    pub evidence: serde_json::Value,
    pub at: DateTime<Utc>,
}

/// A single entry in the session trail. Records keep the order they were
/// produced in, across kinds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "record_type", rename_all = "snake_case")]
pub enum SessionRecord {
    Decision(Decision),
    Action(ActionRecord),
    DeadEnd(DeadEnd),
}

/// The complete reasoning chain of one unit of work.
///
/// An Engram captures everything an agent considered, decided, and did
/// during a single run, providing a tamper-evident audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Engram {
    /// Unique session identifier.
    pub id: EngramId,
    /// Tenant this engram belongs to.
    pub tenant_id: Uuid,
    /// Which agent produced this engram (e.g. "connector/aws").
    pub agent_id: String,
    /// The original intent / task description.
    pub intent: String,
    /// Context provided to the agent at start.
    pub context: serde_json::Value,
    /// The trail, in production order.
    pub records: Vec<SessionRecord>,
    /// Records discarded after the buffer bound was hit.
    pub records_dropped: u32,
    /// When the session started.
    pub started_at: DateTime<Utc>,
    /// When the session ended.
    pub completed_at: Option<DateTime<Utc>>,
    /// Terminal status, set on close.
    pub outcome: Option<SessionOutcome>,
    /// One-line summary, set on close.
    pub summary: Option<String>,
    /// BLAKE3 content address (hex) — set on finalization.
    pub content_hash: Option<String>,
}

impl Engram {
    /// Compute the BLAKE3 content address of the engram.
    /// The hash covers all fields except `content_hash` itself.
    pub fn compute_hash(&self) -> String {
        hash::compute_engram_hash(self)
    }

    /// Verify that the stored content_hash matches a freshly computed one.
    pub fn verify_integrity(&self) -> bool {
        match &self.content_hash {
            Some(stored) => stored == &self.compute_hash(),
            None => false,
        }
    }

    pub fn action_count(&self) -> u32 {
        self.records
            .iter()
            .filter(|r| matches!(r, SessionRecord::Action(_)))
            .count() as u32
    }

    pub fn dead_end_count(&self) -> u32 {
        self.records
            .iter()
            .filter(|r| matches!(r, SessionRecord::DeadEnd(_)))
            .count() as u32
    }
}
