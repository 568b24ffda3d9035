//! Canonical serialization and BLAKE3 content addressing.
//!
//! The canonical form is specified bit-exactly: the hashable view
//! serializes its fields in the declared order with `serde_json`'s
//! compact encoding (numbers formatted by `serde_json::Number`), followed
//! by a single trailing newline. The BLAKE3 hex digest of those bytes is
//! the engram's content address; any mutation of a stored engram breaks
//! verification.

use serde::Serialize;

use crate::Engram;

/// Hashable representation of an Engram (excludes content_hash).
/// Field order here is the canonical field order.
#[derive(Serialize)]
struct HashableEngram<'a> {
    id: &'a crate::EngramId,
    tenant_id: &'a uuid::Uuid,
    agent_id: &'a str,
    intent: &'a str,
    context: &'a serde_json::Value,
    records: &'a [crate::SessionRecord],
    records_dropped: u32,
    started_at: &'a chrono::DateTime<chrono::Utc>,
    completed_at: &'a Option<chrono::DateTime<chrono::Utc>>,
    outcome: &'a Option<crate::SessionOutcome>,
    summary: &'a Option<String>,
}

/// The canonical bytes an engram's content address is computed over.
pub fn canonical_bytes(engram: &Engram) -> Vec<u8> {
    let hashable = HashableEngram {
        id: &engram.id,
        tenant_id: &engram.tenant_id,
        agent_id: &engram.agent_id,
        intent: &engram.intent,
        context: &engram.context,
        records: &engram.records,
        records_dropped: engram.records_dropped,
        started_at: &engram.started_at,
        completed_at: &engram.completed_at,
        outcome: &engram.outcome,
        summary: &engram.summary,
    };

    let mut bytes =
        serde_json::to_vec(&hashable).expect("engram serialization should not fail");
    bytes.push(b'\n');
    bytes
}

/// Compute the BLAKE3 content address (hex) of an engram.
pub fn compute_engram_hash(engram: &Engram) -> String {
    blake3::hash(&canonical_bytes(engram)).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn minimal_engram() -> Engram {
        Engram {
            id: crate::EngramId::new(),
            tenant_id: uuid::Uuid::new_v4(),
            agent_id: "test-agent".to_string(),
            intent: "test".to_string(),
            context: serde_json::Value::Null,
            records: vec![],
            records_dropped: 0,
            started_at: Utc::now(),
            completed_at: None,
            outcome: None,
            summary: None,
            content_hash: None,
        }
    }

    #[test]
    fn canonical_bytes_end_with_newline() {
        let bytes = canonical_bytes(&minimal_engram());
        assert_eq!(bytes.last(), Some(&b'\n'));
    }

    #[test]
    fn hash_is_stable_for_identical_content() {
        let engram = minimal_engram();
        assert_eq!(compute_engram_hash(&engram), compute_engram_hash(&engram));
    }

    #[test]
    fn hash_changes_with_content() {
        let engram = minimal_engram();
        let mut tampered = engram.clone();
        tampered.intent = "something else".to_string();
        assert_ne!(compute_engram_hash(&engram), compute_engram_hash(&tampered));
    }

    #[test]
    fn hash_ignores_content_hash_field() {
        let mut engram = minimal_engram();
        let before = compute_engram_hash(&engram);
        engram.content_hash = Some(before.clone());
        assert_eq!(compute_engram_hash(&engram), before);
    }
}
