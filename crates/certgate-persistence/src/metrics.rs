//! ---
//! cg_section: "03-persistence-logging"
//! cg_subsection: "module"
//! cg_type: "source"
//! cg_scope: "code"
//! cg_description: "Certificate records, storage backends, and repository."
//! cg_version: "v0.0.0-prealpha"
//! cg_owner: "tbd"
//! ---
use std::sync::Arc;

use prometheus::{self, IntCounter, IntCounterVec, Opts, Registry};

use crate::Result;

/// Metrics published by the certificate repository.
#[derive(Clone)]
pub struct PersistenceMetrics {
    certificates_stored: IntCounter,
    writes_denied: IntCounterVec,
    lookups: IntCounterVec,
    storage_failures: IntCounterVec,
    #[allow(dead_code)]
    registry: Arc<Registry>,
}

impl PersistenceMetrics {
    /// Register all persistence metrics with the provided registry.
    pub fn new(registry: Arc<Registry>) -> Result<Self> {
        let certificates_stored = IntCounter::new(
            "certgate_certificates_stored_total",
            "Certificates written to the repository",
        )?;
        registry.register(Box::new(certificates_stored.clone()))?;

        let writes_denied = IntCounterVec::new(
            Opts::new(
                "certgate_certificate_writes_denied_total",
                "Repository writes refused by access control",
            ),
            &["operation"],
        )?;
        registry.register(Box::new(writes_denied.clone()))?;

        let lookups = IntCounterVec::new(
            Opts::new(
                "certgate_certificate_lookups_total",
                "Fingerprint lookups by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(lookups.clone()))?;

        let storage_failures = IntCounterVec::new(
            Opts::new(
                "certgate_storage_failures_total",
                "Storage backend faults by operation",
            ),
            &["operation"],
        )?;
        registry.register(Box::new(storage_failures.clone()))?;

        Ok(Self {
            certificates_stored,
            writes_denied,
            lookups,
            storage_failures,
            registry,
        })
    }

    /// Count a successful store.
    pub fn record_stored(&self) {
        self.certificates_stored.inc();
    }

    /// Count a write rejected by access control.
    pub fn record_denied(&self, operation: &str) {
        self.writes_denied.with_label_values(&[operation]).inc();
    }

    /// Count a fingerprint lookup as a hit or a miss.
    pub fn record_lookup(&self, found: bool) {
        let outcome = if found { "hit" } else { "miss" };
        self.lookups.with_label_values(&[outcome]).inc();
    }

    /// Count a backend failure during `operation`.
    pub fn record_storage_failure(&self, operation: &str) {
        self.storage_failures.with_label_values(&[operation]).inc();
    }
}

impl std::fmt::Debug for PersistenceMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceMetrics").finish_non_exhaustive()
    }
}
