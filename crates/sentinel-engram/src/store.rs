//! Engram storage — trait + content-addressed file-system implementation.
//!
//! Objects are append-only and addressed by their BLAKE3 content hash:
//!
//! ```text
//! {root}/
//!   {tenant_id}/
//!     objects/
//!       3f/
//!         3fa4...e9.json
//!     index.jsonl
//! ```
//!
//! The index is maintained separately from the tamper-evident objects so
//! listing and search never touch (or trust) object contents.
//! Verification walks the referenced objects and recomputes hashes.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Engram, EngramId, SessionOutcome};

/// Errors that can occur during engram storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Engram not found: {0}")]
    NotFound(String),

    #[error("Integrity check failed for {address}: stored content does not match its address")]
    IntegrityViolation { address: String },

    #[error("Engram has no content hash (not finalized)")]
    NotFinalized,

    #[error("Object {address} already exists with different content")]
    AppendOnlyViolation { address: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One line of the per-tenant session index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub session_id: EngramId,
    pub address: String,
    pub agent_id: String,
    pub intent: String,
    pub outcome: Option<SessionOutcome>,
    pub record_count: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Query parameters for listing engram sessions.
#[derive(Debug, Default)]
pub struct EngramQuery {
    /// Filter by agent.
    pub agent_id: Option<String>,
    /// Filter by session ID.
    pub session_id: Option<EngramId>,
    /// Only sessions completed at or after this time.
    pub from: Option<DateTime<Utc>>,
    /// Only sessions completed at or before this time.
    pub to: Option<DateTime<Utc>>,
}

/// Outcome of walking a tenant's objects and recomputing hashes.
#[derive(Debug, Default)]
pub struct VerifyReport {
    pub checked: u32,
    pub failures: Vec<String>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Trait for engram persistence backends.
pub trait EngramStore: Send + Sync {
    /// Store a finalized engram; returns its content address.
    /// Errors if the engram has no content hash.
    fn save(&self, engram: &Engram) -> Result<String, StoreError>;

    /// Retrieve an engram by content address, verifying integrity.
    fn get(&self, tenant_id: Uuid, address: &str) -> Result<Engram, StoreError>;

    /// Retrieve an engram by session id via the index.
    fn get_by_session(&self, tenant_id: Uuid, id: EngramId) -> Result<Engram, StoreError>;

    /// List sessions matching the query, newest close first.
    fn list(&self, tenant_id: Uuid, query: &EngramQuery) -> Result<Vec<IndexEntry>, StoreError>;

    /// Recompute the hash of every stored object for a tenant.
    fn verify(&self, tenant_id: Uuid) -> Result<VerifyReport, StoreError>;
}

/// File-system backed, content-addressed engram store.
pub struct FsEngramStore {
    root: PathBuf,
}

impl FsEngramStore {
    /// Create a store rooted at the given directory, creating it if
    /// needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn tenant_dir(&self, tenant_id: Uuid) -> PathBuf {
        self.root.join(tenant_id.to_string())
    }

    fn object_path(&self, tenant_id: Uuid, address: &str) -> PathBuf {
        let shard = &address[..2.min(address.len())];
        self.tenant_dir(tenant_id)
            .join("objects")
            .join(shard)
            .join(format!("{address}.json"))
    }

    fn index_path(&self, tenant_id: Uuid) -> PathBuf {
        self.tenant_dir(tenant_id).join("index.jsonl")
    }

    fn append_index(&self, engram: &Engram, address: &str) -> Result<(), StoreError> {
        let entry = IndexEntry {
            session_id: engram.id,
            address: address.to_string(),
            agent_id: engram.agent_id.clone(),
            intent: engram.intent.clone(),
            outcome: engram.outcome,
            record_count: engram.records.len() as u32,
            started_at: engram.started_at,
            completed_at: engram.completed_at,
        };
        let line = serde_json::to_string(&entry)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.index_path(engram.tenant_id))?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    fn read_index(&self, tenant_id: Uuid) -> Result<Vec<IndexEntry>, StoreError> {
        let path = self.index_path(tenant_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(path)?;
        let mut entries = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(line)?);
        }
        Ok(entries)
    }
}

impl EngramStore for FsEngramStore {
    fn save(&self, engram: &Engram) -> Result<String, StoreError> {
        let Some(address) = engram.content_hash.clone() else {
            return Err(StoreError::NotFinalized);
        };

        let path = self.object_path(engram.tenant_id, &address);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(engram)?;

        // Append-only: an existing address must hold identical content.
        if path.exists() {
            let existing = fs::read_to_string(&path)?;
            if existing != json {
                return Err(StoreError::AppendOnlyViolation { address });
            }
            return Ok(address);
        }

        fs::write(&path, &json)?;
        self.append_index(engram, &address)?;

        tracing::debug!(
            engram_id = %engram.id,
            address = %address,
            path = %path.display(),
            "Engram saved"
        );

        Ok(address)
    }

    fn get(&self, tenant_id: Uuid, address: &str) -> Result<Engram, StoreError> {
        let path = self.object_path(tenant_id, address);
        if !path.exists() {
            return Err(StoreError::NotFound(address.to_string()));
        }
        let json = fs::read_to_string(&path)?;
        let engram: Engram = serde_json::from_str(&json)?;

        let recomputed = engram.compute_hash();
        if !engram.verify_integrity() || recomputed != address {
            return Err(StoreError::IntegrityViolation {
                address: address.to_string(),
            });
        }

        Ok(engram)
    }

    fn get_by_session(&self, tenant_id: Uuid, id: EngramId) -> Result<Engram, StoreError> {
        let entries = self.read_index(tenant_id)?;
        let entry = entries
            .into_iter()
            .find(|e| e.session_id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        self.get(tenant_id, &entry.address)
    }

    fn list(&self, tenant_id: Uuid, query: &EngramQuery) -> Result<Vec<IndexEntry>, StoreError> {
        let mut entries: Vec<IndexEntry> = self
            .read_index(tenant_id)?
            .into_iter()
            .filter(|e| matches_query(e, query))
            .collect();

        // Close time is the sort key for session lists.
        entries.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        Ok(entries)
    }

    fn verify(&self, tenant_id: Uuid) -> Result<VerifyReport, StoreError> {
        let mut report = VerifyReport::default();
        let objects = self.tenant_dir(tenant_id).join("objects");
        if !objects.is_dir() {
            return Ok(report);
        }

        for address in collect_addresses(&objects)? {
            report.checked += 1;
            if self.get(tenant_id, &address).is_err() {
                report.failures.push(address);
            }
        }
        Ok(report)
    }
}

/// Collect object addresses (file stems) under the shard directories.
fn collect_addresses(objects_dir: &Path) -> Result<Vec<String>, StoreError> {
    let mut addresses = Vec::new();
    for shard in fs::read_dir(objects_dir)?.flatten() {
        let shard_path = shard.path();
        if !shard_path.is_dir() {
            continue;
        }
        for entry in fs::read_dir(&shard_path)?.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    addresses.push(stem.to_string());
                }
            }
        }
    }
    Ok(addresses)
}

fn matches_query(entry: &IndexEntry, query: &EngramQuery) -> bool {
    if let Some(aid) = &query.agent_id {
        if &entry.agent_id != aid {
            return false;
        }
    }
    if let Some(sid) = &query.session_id {
        if &entry.session_id != sid {
            return false;
        }
    }
    if let Some(from) = &query.from {
        if entry.completed_at.is_none() || entry.completed_at.as_ref() < Some(from) {
            return false;
        }
    }
    if let Some(to) = &query.to {
        if entry.completed_at.as_ref() > Some(to) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::EngramSession;

    fn create_test_engram(tenant_id: Uuid, agent_id: &str) -> Engram {
        let mut session = EngramSession::open(
            tenant_id,
            agent_id,
            "Test intent",
            serde_json::json!({"key": "value"}),
        );
        session.record_decision("choose path", &["a", "b"], "a", "best option");
        session.record_action("test_action", "target", true, [("result", 42)]);
        session.record_dead_end("b unreachable", serde_json::json!({"status": 503}));
        session.close(SessionOutcome::Success, "done")
    }

    #[test]
    fn save_and_retrieve_by_address() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsEngramStore::new(dir.path()).unwrap();
        let tenant_id = Uuid::new_v4();
        let engram = create_test_engram(tenant_id, "test-agent");

        let address = store.save(&engram).unwrap();
        let retrieved = store.get(tenant_id, &address).unwrap();

        assert_eq!(retrieved.id, engram.id);
        assert_eq!(retrieved.intent, "Test intent");
        assert_eq!(retrieved.records, engram.records);
        assert!(retrieved.verify_integrity());
    }

    #[test]
    fn retrieve_by_session_preserves_record_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsEngramStore::new(dir.path()).unwrap();
        let tenant_id = Uuid::new_v4();
        let engram = create_test_engram(tenant_id, "test-agent");
        let id = engram.id;

        store.save(&engram).unwrap();
        let retrieved = store.get_by_session(tenant_id, id).unwrap();
        assert_eq!(retrieved.records, engram.records);
    }

    #[test]
    fn tampered_object_fails_verification() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsEngramStore::new(dir.path()).unwrap();
        let tenant_id = Uuid::new_v4();
        let engram = create_test_engram(tenant_id, "test-agent");

        let address = store.save(&engram).unwrap();

        // Tamper with the stored object: change the intent in place.
        let path = store.object_path(tenant_id, &address);
        let mut tampered: Engram =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        tampered.intent = "TAMPERED INTENT".to_string();
        fs::write(&path, serde_json::to_string_pretty(&tampered).unwrap()).unwrap();

        let result = store.get(tenant_id, &address);
        assert!(matches!(
            result,
            Err(StoreError::IntegrityViolation { .. })
        ));

        let report = store.verify(tenant_id).unwrap();
        assert_eq!(report.checked, 1);
        assert!(!report.is_clean());
    }

    #[test]
    fn save_rejects_unfinalized() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsEngramStore::new(dir.path()).unwrap();

        let engram = Engram {
            id: EngramId::new(),
            tenant_id: Uuid::new_v4(),
            agent_id: "test".to_string(),
            intent: "test".to_string(),
            context: serde_json::Value::Null,
            records: vec![],
            records_dropped: 0,
            started_at: Utc::now(),
            completed_at: None,
            outcome: None,
            summary: None,
            content_hash: None,
        };

        assert!(matches!(store.save(&engram), Err(StoreError::NotFinalized)));
    }

    #[test]
    fn saving_same_engram_twice_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsEngramStore::new(dir.path()).unwrap();
        let tenant_id = Uuid::new_v4();
        let engram = create_test_engram(tenant_id, "test-agent");

        let a1 = store.save(&engram).unwrap();
        let a2 = store.save(&engram).unwrap();
        assert_eq!(a1, a2);

        // The index records a single session.
        let entries = store.list(tenant_id, &EngramQuery::default()).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn list_filters_by_agent_and_sorts_by_close_time() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsEngramStore::new(dir.path()).unwrap();
        let tenant_id = Uuid::new_v4();

        let e1 = create_test_engram(tenant_id, "scanner");
        let e2 = create_test_engram(tenant_id, "hunter");
        let e3 = create_test_engram(tenant_id, "scanner");

        store.save(&e1).unwrap();
        store.save(&e2).unwrap();
        store.save(&e3).unwrap();

        let query = EngramQuery {
            agent_id: Some("scanner".to_string()),
            ..Default::default()
        };
        let results = store.list(tenant_id, &query).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|e| e.agent_id == "scanner"));
        assert!(results[0].completed_at >= results[1].completed_at);
    }

    #[test]
    fn tenants_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsEngramStore::new(dir.path()).unwrap();

        let t1 = Uuid::new_v4();
        let t2 = Uuid::new_v4();

        let e1 = create_test_engram(t1, "agent-a");
        let address = store.save(&e1).unwrap();
        store.save(&create_test_engram(t2, "agent-a")).unwrap();

        assert_eq!(store.list(t1, &EngramQuery::default()).unwrap().len(), 1);
        assert_eq!(store.list(t2, &EngramQuery::default()).unwrap().len(), 1);

        // T2 cannot fetch T1's object through its own namespace.
        assert!(matches!(
            store.get(t2, &address),
            Err(StoreError::NotFound(_))
        ));
    }
}
