//! Session recorder for engram capture.
//!
//! Used by connector and enrichment code to incrementally record
//! reasoning during execution:
//!
//! ```no_run
//! # use sentinel_engram::session::EngramSession;
//! # use sentinel_engram::SessionOutcome;
//! # use uuid::Uuid;
//! let mut session = EngramSession::open(
//!     Uuid::new_v4(),
//!     "connector/aws",
//!     "Sync assets from aws",
//!     serde_json::json!({"regions": ["us-east-1"]}),
//! );
//! session.record_decision(
//!     "Region enumeration order",
//!     &["alphabetical", "configured order"],
//!     "configured order",
//!     "Operators list the most important regions first",
//! );
//! session.record_action("api_call", "ec2:DescribeInstances", true, [("instances", 42)]);
//! let engram = session.close(SessionOutcome::Success, "2 regions, 42 instances");
//! assert!(engram.content_hash.is_some());
//! ```
//!
//! Closing is guaranteed on every exit path: a session dropped without an
//! explicit `close` seals itself as `Failed` so the trail survives panics
//! and cancellation.

use chrono::Utc;
use uuid::Uuid;

use crate::{ActionRecord, DeadEnd, Decision, Engram, EngramId, SessionOutcome, SessionRecord};

/// Upper bound on buffered records per session. Appends past the bound
/// are counted and discarded; the session then closes `Failed`.
pub const MAX_SESSION_RECORDS: usize = 512;

/// A session recorder that appends records in production order.
pub struct EngramSession {
    engram: Option<Engram>,
    max_records: usize,
}

impl EngramSession {
    /// Start recording one unit of work.
    pub fn open(
        tenant_id: Uuid,
        agent_id: &str,
        intent: &str,
        context: serde_json::Value,
    ) -> Self {
        Self {
            engram: Some(Engram {
                id: EngramId::new(),
                tenant_id,
                agent_id: agent_id.to_string(),
                intent: intent.to_string(),
                context,
                records: Vec::new(),
                records_dropped: 0,
                started_at: Utc::now(),
                completed_at: None,
                outcome: None,
                summary: None,
                content_hash: None,
            }),
            max_records: MAX_SESSION_RECORDS,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_max_records(mut self, max: usize) -> Self {
        self.max_records = max;
        self
    }

    /// The session ID (available before finalization).
    pub fn id(&self) -> EngramId {
        self.engram.as_ref().map(|e| e.id).unwrap_or_default()
    }

    /// Record a decision together with the alternatives it beat.
    pub fn record_decision(
        &mut self,
        description: &str,
        alternatives: &[&str],
        chosen: &str,
        rationale: &str,
    ) {
        self.push(SessionRecord::Decision(Decision {
            description: description.to_string(),
            alternatives: alternatives.iter().map(|s| s.to_string()).collect(),
            chosen: chosen.to_string(),
            rationale: rationale.to_string(),
            at: Utc::now(),
        }));
    }

    /// Record an action and its outcome counters.
    pub fn record_action<'a>(
        &mut self,
        kind: &str,
        target: &str,
        success: bool,
        counts: impl IntoIterator<Item = (&'a str, u64)>,
    ) {
        self.push(SessionRecord::Action(ActionRecord {
            kind: kind.to_string(),
            target: target.to_string(),
            success,
            counts: counts
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            at: Utc::now(),
        }));
    }

    /// Record a path that was attempted and abandoned.
    pub fn record_dead_end(&mut self, description: &str, evidence: serde_json::Value) {
        self.push(SessionRecord::DeadEnd(DeadEnd {
            description: description.to_string(),
            evidence,
            at: Utc::now(),
        }));
    }

    /// Whether the record buffer overflowed. An overflowed session always
    /// closes `Failed`; callers emit a `SessionDropped` event.
    pub fn overflowed(&self) -> bool {
        self.engram
            .as_ref()
            .is_some_and(|e| e.records_dropped > 0)
    }

    /// Dead-ends recorded so far; drives the completed/partial decision.
    pub fn dead_end_count(&self) -> u32 {
        self.engram
            .as_ref()
            .map(|e| e.dead_end_count())
            .unwrap_or(0)
    }

    /// Finalize the session: set the terminal outcome, compute the
    /// content hash, and return the sealed engram.
    pub fn close(mut self, outcome: SessionOutcome, summary: &str) -> Engram {
        self.seal(outcome, summary)
            .expect("session closed exactly once")
    }

    fn push(&mut self, record: SessionRecord) {
        let Some(engram) = self.engram.as_mut() else {
            return;
        };
        if engram.records.len() >= self.max_records {
            engram.records_dropped += 1;
            return;
        }
        engram.records.push(record);
    }

    fn seal(&mut self, outcome: SessionOutcome, summary: &str) -> Option<Engram> {
        let mut engram = self.engram.take()?;
        // Overflow is unrecoverable for audit purposes.
        let outcome = if engram.records_dropped > 0 {
            SessionOutcome::Failed
        } else {
            outcome
        };
        engram.completed_at = Some(Utc::now());
        engram.outcome = Some(outcome);
        engram.summary = Some(summary.to_string());
        let hash = engram.compute_hash();
        engram.content_hash = Some(hash);
        Some(engram)
    }
}

impl Drop for EngramSession {
    fn drop(&mut self) {
        if let Some(engram) = self.seal(SessionOutcome::Failed, "session dropped without close") {
            tracing::warn!(
                engram_id = %engram.id,
                agent_id = %engram.agent_id,
                "engram session sealed by drop"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_test_session() -> EngramSession {
        EngramSession::open(
            Uuid::new_v4(),
            "test-agent",
            "Test intent",
            serde_json::json!({"key": "value"}),
        )
    }

    #[test]
    fn records_keep_production_order_across_kinds() {
        let mut session = open_test_session();
        session.record_decision("pick a path", &["a", "b"], "a", "a is cheaper");
        session.record_action("api_call", "source", true, [("items", 3)]);
        session.record_dead_end("b was unreachable", serde_json::json!({"status": 503}));
        session.record_action("graph_mutation", "apply_batch", true, [("nodes", 3)]);

        let engram = session.close(SessionOutcome::Success, "done");
        assert_eq!(engram.records.len(), 4);
        assert!(matches!(engram.records[0], SessionRecord::Decision(_)));
        assert!(matches!(engram.records[1], SessionRecord::Action(_)));
        assert!(matches!(engram.records[2], SessionRecord::DeadEnd(_)));
        assert!(matches!(engram.records[3], SessionRecord::Action(_)));
        assert_eq!(engram.outcome, Some(SessionOutcome::Success));
        assert!(engram.verify_integrity());
    }

    #[test]
    fn overflow_drops_records_and_forces_failed() {
        let mut session = open_test_session().with_max_records(2);
        session.record_action("a", "t", true, [("items", 1)]);
        session.record_action("b", "t", true, [("items", 1)]);
        session.record_action("c", "t", true, [("items", 1)]);
        assert!(session.overflowed());

        let engram = session.close(SessionOutcome::Success, "should not matter");
        assert_eq!(engram.records.len(), 2);
        assert_eq!(engram.records_dropped, 1);
        assert_eq!(engram.outcome, Some(SessionOutcome::Failed));
    }

    #[test]
    fn close_computes_verifiable_hash() {
        let mut session = open_test_session();
        session.record_action("api_call", "source", true, [("items", 1)]);
        let engram = session.close(SessionOutcome::Partial, "one source down");

        assert!(engram.content_hash.is_some());
        assert!(engram.verify_integrity());

        let mut tampered = engram.clone();
        tampered.intent = "TAMPERED".to_string();
        assert!(!tampered.verify_integrity());
    }
}
