//! ---
//! cg_section: "06-security-access-control"
//! cg_subsection: "module"
//! cg_type: "source"
//! cg_scope: "code"
//! cg_description: "Access control engine, resource tree, and audit hooks."
//! cg_version: "v0.0.0-prealpha"
//! cg_owner: "tbd"
//! ---
use prometheus::{IntCounter, IntCounterVec, Opts, Registry};
use std::sync::Arc;

/// Access control metrics exported via Prometheus.
#[derive(Clone)]
pub struct SecurityMetrics {
    registry: Arc<Registry>,
    authorization_checks_total: IntCounterVec,
    cache_hits_total: IntCounter,
    cache_misses_total: IntCounter,
    cache_flushes_total: IntCounter,
    audit_failures_total: IntCounter,
}

impl SecurityMetrics {
    /// Register metrics with the provided registry.
    pub fn new(registry: Arc<Registry>) -> prometheus::Result<Self> {
        let authorization_checks_total = IntCounterVec::new(
            Opts::new(
                "certgate_authorization_checks_total",
                "Authorization checks by outcome",
            ),
            &["outcome"],
        )?;
        let cache_hits_total = IntCounter::new(
            "certgate_access_cache_hits_total",
            "Authorization decisions served from the local cache",
        )?;
        let cache_misses_total = IntCounter::new(
            "certgate_access_cache_misses_total",
            "Authorization decisions evaluated against the resource tree",
        )?;
        let cache_flushes_total = IntCounter::new(
            "certgate_access_cache_flushes_total",
            "Forced expiries of the local authorization cache",
        )?;
        let audit_failures_total = IntCounter::new(
            "certgate_audit_failures_total",
            "Audit events the sink failed to record",
        )?;

        registry.register(Box::new(authorization_checks_total.clone()))?;
        registry.register(Box::new(cache_hits_total.clone()))?;
        registry.register(Box::new(cache_misses_total.clone()))?;
        registry.register(Box::new(cache_flushes_total.clone()))?;
        registry.register(Box::new(audit_failures_total.clone()))?;

        Ok(Self {
            registry,
            authorization_checks_total,
            cache_hits_total,
            cache_misses_total,
            cache_flushes_total,
            audit_failures_total,
        })
    }

    /// Access the underlying registry.
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Count one authorization call by its final outcome.
    pub fn record_check(&self, allowed: bool) {
        let outcome = if allowed { "allowed" } else { "denied" };
        self.authorization_checks_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Increment cache hits.
    pub fn inc_cache_hit(&self) {
        self.cache_hits_total.inc();
    }

    /// Increment cache misses.
    pub fn inc_cache_miss(&self) {
        self.cache_misses_total.inc();
    }

    /// Increment forced cache expiries.
    pub fn inc_cache_flush(&self) {
        self.cache_flushes_total.inc();
    }

    /// Increment audit sink failures.
    pub fn inc_audit_failure(&self) {
        self.audit_failures_total.inc();
    }
}

impl std::fmt::Debug for SecurityMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityMetrics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_increment() {
        let registry = Arc::new(Registry::new());
        let metrics = SecurityMetrics::new(registry.clone()).unwrap();
        metrics.record_check(true);
        metrics.record_check(false);
        metrics.inc_cache_hit();
        metrics.inc_cache_miss();
        metrics.inc_cache_flush();
        metrics.inc_audit_failure();
        let families = registry.gather();
        assert_eq!(families.len(), 5);
        let checks = families
            .iter()
            .find(|family| family.get_name() == "certgate_authorization_checks_total")
            .unwrap();
        assert_eq!(checks.get_metric().len(), 2);
    }

    #[test]
    fn duplicate_registration_fails() {
        let registry = Arc::new(Registry::new());
        SecurityMetrics::new(registry.clone()).unwrap();
        assert!(SecurityMetrics::new(registry).is_err());
    }
}
