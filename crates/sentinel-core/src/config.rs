//! Configuration management for Sentinel services.
//!
//! Configuration is loaded from (in priority order):
//! 1. Environment variables (SENTINEL_ prefix)
//! 2. Config file (sentinel.toml)
//! 3. Defaults
//!
//! This module holds the pieces shared across services; each binary
//! layers its own section on top.

use std::collections::HashMap;

use chrono::Duration;
use serde::Deserialize;

use crate::types::TenantPlan;

/// Staleness TTLs per node label, overridable per tenant plan.
///
/// A node whose `last_seen` is older than `now - ttl(plan, label)` is
/// marked stale by the sweep. Higher plans keep shorter windows because
/// their connectors run more often.
#[derive(Debug, Clone, Deserialize)]
pub struct StalenessPolicy {
    /// TTL in hours per node label, e.g. `{"Host": 24, "Service": 24}`.
    #[serde(default = "default_ttls")]
    pub ttl_hours: HashMap<String, u64>,

    /// Per-plan multiplier applied to every TTL, in percent.
    #[serde(default = "default_plan_scale")]
    pub plan_scale_percent: HashMap<TenantPlan, u64>,
}

impl StalenessPolicy {
    /// The staleness window for a node label under a tenant plan.
    /// Labels without an explicit entry fall back to the `default` key.
    pub fn ttl(&self, plan: TenantPlan, label: &str) -> Duration {
        let hours = self
            .ttl_hours
            .get(label)
            .or_else(|| self.ttl_hours.get("default"))
            .copied()
            .unwrap_or(24);
        let scale = self.plan_scale_percent.get(&plan).copied().unwrap_or(100);
        Duration::hours((hours * scale / 100) as i64)
    }
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self {
            ttl_hours: default_ttls(),
            plan_scale_percent: default_plan_scale(),
        }
    }
}

fn default_ttls() -> HashMap<String, u64> {
    let mut ttls = HashMap::new();
    ttls.insert("default".to_string(), 24);
    ttls.insert("Host".to_string(), 24);
    ttls.insert("Service".to_string(), 24);
    ttls.insert("Port".to_string(), 24);
    ttls.insert("User".to_string(), 72);
    ttls.insert("Group".to_string(), 72);
    ttls.insert("Role".to_string(), 72);
    // Vulnerabilities outlive the services they were found on.
    ttls.insert("Vulnerability".to_string(), 24 * 30);
    ttls
}

fn default_plan_scale() -> HashMap<TenantPlan, u64> {
    let mut scale = HashMap::new();
    scale.insert(TenantPlan::Starter, 200);
    scale.insert(TenantPlan::Professional, 100);
    scale.insert(TenantPlan::Enterprise, 50);
    scale
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_defaults_and_plan_scaling() {
        let policy = StalenessPolicy::default();

        assert_eq!(
            policy.ttl(TenantPlan::Professional, "Host"),
            Duration::hours(24)
        );
        assert_eq!(
            policy.ttl(TenantPlan::Starter, "Host"),
            Duration::hours(48)
        );
        assert_eq!(
            policy.ttl(TenantPlan::Enterprise, "Host"),
            Duration::hours(12)
        );
    }

    #[test]
    fn unknown_label_falls_back_to_default() {
        let policy = StalenessPolicy::default();
        assert_eq!(
            policy.ttl(TenantPlan::Professional, "Certificate"),
            Duration::hours(24)
        );
    }
}
