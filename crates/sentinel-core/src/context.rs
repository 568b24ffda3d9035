//! Per-run execution context.
//!
//! Discovery and enrichment operations never read a hidden clock; the
//! time of observation travels in the context so tests are deterministic.
//! The cancel flag propagates orchestrator-issued cancellation and is
//! checked at batch boundaries and between sub-requests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::SentinelError;
use crate::types::TenantId;

/// Cooperative cancellation flag shared between the orchestrator and a
/// running operation.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Tenant-scoped context carried through every core operation.
#[derive(Debug, Clone)]
pub struct ScanContext {
    pub tenant_id: TenantId,
    /// Observation time for this run; `first_seen`/`last_seen` derive
    /// from it, never from the wall clock.
    pub now: DateTime<Utc>,
    cancel: CancelFlag,
}

impl ScanContext {
    pub fn new(tenant_id: TenantId, now: DateTime<Utc>) -> Self {
        Self {
            tenant_id,
            now,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_cancel(tenant_id: TenantId, now: DateTime<Utc>, cancel: CancelFlag) -> Self {
        Self {
            tenant_id,
            now,
            cancel,
        }
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Bail out with `Cancelled` if the orchestrator pulled the flag.
    /// Called at batch boundaries.
    pub fn check_cancelled(&self) -> Result<(), SentinelError> {
        if self.is_cancelled() {
            Err(SentinelError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// A context for the same run observed at a later instant.
    pub fn at(&self, now: DateTime<Utc>) -> Self {
        Self {
            tenant_id: self.tenant_id,
            now,
            cancel: self.cancel.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_propagates_through_clones() {
        let ctx = ScanContext::new(TenantId::new(), Utc::now());
        let flag = ctx.cancel_flag();
        assert!(ctx.check_cancelled().is_ok());

        flag.cancel();
        assert!(ctx.is_cancelled());
        assert!(matches!(
            ctx.check_cancelled(),
            Err(SentinelError::Cancelled)
        ));
    }

    #[test]
    fn rescoped_context_keeps_cancel_flag() {
        let ctx = ScanContext::new(TenantId::new(), Utc::now());
        let later = ctx.at(ctx.now + chrono::Duration::minutes(5));
        ctx.cancel_flag().cancel();
        assert!(later.is_cancelled());
        assert_eq!(later.tenant_id, ctx.tenant_id);
    }
}
