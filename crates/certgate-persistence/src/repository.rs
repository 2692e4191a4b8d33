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

use certgate_logging::{log_access_event, AccessOutcome, LogContext};
use certgate_security::{AccessControlEngine, AuthenticationToken};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::metrics::PersistenceMetrics;
use crate::record::{CertificateRecord, CertificateStatus, CertificateType};
use crate::storage::{CertificateQuery, CertificateStorage};
use crate::{PersistenceError, Result};

/// Resource guarding [`CertificateRepository::store`] unless configured otherwise.
pub const DEFAULT_STORE_RESOURCE: &str = "/certificate/store";
/// Resource guarding status and tag updates unless configured otherwise.
pub const DEFAULT_UPDATE_RESOURCE: &str = "/certificate/update";

/// Certificate store with authorized writes and unrestricted reads.
///
/// Reads trust upstream filtering and never consult the engine.
pub struct CertificateRepository {
    engine: Arc<AccessControlEngine>,
    storage: Arc<dyn CertificateStorage>,
    store_resource: String,
    update_resource: String,
    metrics: Option<PersistenceMetrics>,
}

impl std::fmt::Debug for CertificateRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateRepository")
            .field("store_resource", &self.store_resource)
            .field("update_resource", &self.update_resource)
            .finish_non_exhaustive()
    }
}

impl CertificateRepository {
    /// Repository guarded by the default store and update resources.
    pub fn new(engine: Arc<AccessControlEngine>, storage: Arc<dyn CertificateStorage>) -> Self {
        Self {
            engine,
            storage,
            store_resource: DEFAULT_STORE_RESOURCE.to_string(),
            update_resource: DEFAULT_UPDATE_RESOURCE.to_string(),
            metrics: None,
        }
    }

    /// Resource checked before `store`.
    pub fn with_store_resource(mut self, resource: impl Into<String>) -> Self {
        self.store_resource = resource.into();
        self
    }

    /// Resource checked before `update_status`.
    pub fn with_update_resource(mut self, resource: impl Into<String>) -> Self {
        self.update_resource = resource.into();
        self
    }

    /// Count writes in `metrics`.
    pub fn with_metrics(mut self, metrics: PersistenceMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Resource gating `store`.
    pub fn store_resource(&self) -> &str {
        &self.store_resource
    }

    /// Resource gating `update_status`.
    pub fn update_resource(&self) -> &str {
        &self.update_resource
    }

    /// Backend behind the repository. Reads through it are not gated.
    pub fn storage(&self) -> &Arc<dyn CertificateStorage> {
        &self.storage
    }

    /// Persist `record` under its fingerprint, replacing any earlier record.
    ///
    /// Fails with [`PersistenceError::AccessDenied`] and writes nothing when the
    /// token is not authorized for the store resource. `last_update` is kept
    /// exactly as supplied.
    pub fn store(&self, token: &AuthenticationToken, record: CertificateRecord) -> Result<()> {
        self.authorize(token, &self.store_resource, &record.fingerprint, "store")?;
        record.validate()?;
        let fingerprint = record.fingerprint.clone();
        self.storage
            .put(record)
            .inspect_err(|_| self.storage_failure("put"))?;
        if let Some(metrics) = &self.metrics {
            metrics.record_stored();
        }
        info!(
            principal = token.principal_id(),
            fingerprint = %fingerprint,
            "certificate stored"
        );
        Ok(())
    }

    /// Exact-match lookup. `Ok(None)` when nothing is stored under the key.
    pub fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<CertificateRecord>> {
        let found = self
            .storage
            .get(fingerprint)
            .inspect_err(|_| self.storage_failure("get"))?;
        if let Some(metrics) = &self.metrics {
            metrics.record_lookup(found.is_some());
        }
        debug!(fingerprint, found = found.is_some(), "certificate lookup");
        Ok(found)
    }

    /// Records owned by `owner_id`.
    pub fn find_by_owner(&self, owner_id: &str) -> Result<Vec<CertificateRecord>> {
        self.find(&CertificateQuery::new().owner(owner_id))
    }

    /// Records issued by the certificate with `issuer_fingerprint`.
    pub fn find_by_issuer(&self, issuer_fingerprint: &str) -> Result<Vec<CertificateRecord>> {
        self.find(&CertificateQuery::new().issuer(issuer_fingerprint))
    }

    /// Records in `status`.
    pub fn find_by_status(&self, status: CertificateStatus) -> Result<Vec<CertificateRecord>> {
        self.find(&CertificateQuery::new().status(status))
    }

    /// Records of `certificate_type`.
    pub fn find_by_type(&self, certificate_type: CertificateType) -> Result<Vec<CertificateRecord>> {
        self.find(&CertificateQuery::new().certificate_type(certificate_type))
    }

    /// Records issued under `certificate_profile_id`.
    pub fn find_by_profile(&self, certificate_profile_id: i32) -> Result<Vec<CertificateRecord>> {
        self.find(&CertificateQuery::new().profile(certificate_profile_id))
    }

    /// Records matching every filter set on `query`, ordered by fingerprint.
    pub fn find(&self, query: &CertificateQuery) -> Result<Vec<CertificateRecord>> {
        self.storage
            .query(query)
            .inspect_err(|_| self.storage_failure("query"))
    }

    /// Revocation state of a stored certificate, `None` if it is unknown.
    pub fn is_revoked(&self, fingerprint: &str) -> Result<Option<bool>> {
        Ok(self
            .find_by_fingerprint(fingerprint)?
            .map(|record| record.status.is_revoked()))
    }

    /// Change the status of a stored certificate. `Ok(false)` if none exists.
    pub fn update_status(
        &self,
        token: &AuthenticationToken,
        fingerprint: &str,
        status: CertificateStatus,
        last_update: DateTime<Utc>,
    ) -> Result<bool> {
        self.authorize(token, &self.update_resource, fingerprint, "update_status")?;
        let updated = self
            .storage
            .update(fingerprint, &mut |record| {
                record.status = status;
                record.last_update = last_update;
            })
            .inspect_err(|_| self.storage_failure("update"))?;
        if updated {
            info!(
                principal = token.principal_id(),
                fingerprint,
                status = status.code(),
                "certificate status updated"
            );
        }
        Ok(updated)
    }

    /// Replace the tag of a stored certificate. `Ok(false)` if none exists.
    pub fn update_tag(
        &self,
        token: &AuthenticationToken,
        fingerprint: &str,
        tag: Option<String>,
        last_update: DateTime<Utc>,
    ) -> Result<bool> {
        self.authorize(token, &self.update_resource, fingerprint, "update_tag")?;
        let updated = self
            .storage
            .update(fingerprint, &mut |record| {
                record.tag = tag.clone();
                record.last_update = last_update;
            })
            .inspect_err(|_| self.storage_failure("update"))?;
        if updated {
            info!(
                principal = token.principal_id(),
                fingerprint,
                "certificate tag updated"
            );
        }
        Ok(updated)
    }

    fn authorize(
        &self,
        token: &AuthenticationToken,
        resource: &str,
        fingerprint: &str,
        operation: &str,
    ) -> Result<()> {
        if self.engine.is_authorized(token, &[resource]) {
            return Ok(());
        }
        let context = LogContext::new()
            .with_principal(token.principal_id())
            .with_resource(resource)
            .with_fingerprint(fingerprint);
        log_access_event(
            Some(&context),
            operation,
            "certificate write refused",
            AccessOutcome::Denied,
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_denied(operation);
        }
        Err(PersistenceError::AccessDenied {
            principal: token.principal_id().to_string(),
            resource: resource.to_string(),
        })
    }

    fn storage_failure(&self, operation: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_storage_failure(operation);
        }
    }
}
