//! ---
//! cg_section: "06-security-access-control"
//! cg_subsection: "module"
//! cg_type: "source"
//! cg_scope: "code"
//! cg_description: "Access control engine, resource tree, and audit hooks."
//! cg_version: "v0.0.0-prealpha"
//! cg_owner: "tbd"
//! ---
//! Authorization entry points composing the tree store, cache, and audit sink.
//!
//! Denial is an ordinary `false`, never an error. Resource lists are evaluated
//! in order and stop at the first denial; an empty list is vacuously allowed.

use std::sync::Arc;

use certgate_logging::{cg_debug, LogContext};
use tracing::{debug, info, warn};

use crate::audit::{AuditEvent, AuditSink};
use crate::cache::{AccessControlCache, CacheKey, CacheTicket};
use crate::metrics::SecurityMetrics;
use crate::token::AuthenticationToken;
use crate::tree::{AccessTree, AccessTreeStore, RecursionMode};

/// Node-local authorization service.
pub struct AccessControlEngine {
    trees: Arc<AccessTreeStore>,
    cache: AccessControlCache,
    audit: Arc<dyn AuditSink>,
    metrics: Option<SecurityMetrics>,
}

impl std::fmt::Debug for AccessControlEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessControlEngine")
            .field("tree_generation", &self.trees.generation())
            .field("cached_decisions", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl AccessControlEngine {
    /// Engine reading `trees`, memoizing in `cache`, and auditing into `audit`.
    pub fn new(
        trees: Arc<AccessTreeStore>,
        cache: AccessControlCache,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            trees,
            cache,
            audit,
            metrics: None,
        }
    }

    /// Attach Prometheus counters.
    pub fn with_metrics(mut self, metrics: SecurityMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Tree store shared with the rule-update workflow.
    pub fn tree_store(&self) -> &Arc<AccessTreeStore> {
        &self.trees
    }

    /// Local decision cache.
    pub fn cache(&self) -> &AccessControlCache {
        &self.cache
    }

    /// True iff every resource is allowed by a recursive or non-recursive rule.
    ///
    /// Audited.
    pub fn is_authorized<R: AsRef<str>>(
        &self,
        token: &AuthenticationToken,
        resources: &[R],
    ) -> bool {
        self.check(token, RecursionMode::Any, resources, true)
    }

    /// Like [`Self::is_authorized`], but with `require_recursive` only recursive
    /// rules grant access.
    pub fn is_authorized_with_recursion<R: AsRef<str>>(
        &self,
        token: &AuthenticationToken,
        require_recursive: bool,
        resources: &[R],
    ) -> bool {
        self.check(
            token,
            RecursionMode::from_require_recursive(require_recursive),
            resources,
            true,
        )
    }

    /// Same evaluation as [`Self::is_authorized`] without audit events.
    pub fn is_authorized_no_logging<R: AsRef<str>>(
        &self,
        token: &AuthenticationToken,
        resources: &[R],
    ) -> bool {
        self.check(token, RecursionMode::Any, resources, false)
    }

    /// Same evaluation as [`Self::is_authorized_with_recursion`] without audit events.
    pub fn is_authorized_no_logging_with_recursion<R: AsRef<str>>(
        &self,
        token: &AuthenticationToken,
        require_recursive: bool,
        resources: &[R],
    ) -> bool {
        self.check(
            token,
            RecursionMode::from_require_recursive(require_recursive),
            resources,
            false,
        )
    }

    /// Clear this node's decision cache. The tree is untouched and other nodes
    /// keep their entries until they expire.
    pub fn force_cache_expire(&self) {
        self.cache.clear();
        if let Some(metrics) = &self.metrics {
            metrics.inc_cache_flush();
        }
        info!(generation = self.trees.generation(), "access control cache expired");
    }

    /// Publish a new tree and expire the local cache right after.
    pub fn publish_and_expire(&self, tree: AccessTree) -> u64 {
        let generation = self.trees.publish(tree);
        self.force_cache_expire();
        generation
    }

    fn check<R: AsRef<str>>(
        &self,
        token: &AuthenticationToken,
        mode: RecursionMode,
        resources: &[R],
        audited: bool,
    ) -> bool {
        if resources.is_empty() {
            return true;
        }
        // Ticket before snapshot: a clear racing with this call voids our inserts.
        let ticket = self.cache.begin();
        let tree = self.trees.current();

        for resource in resources {
            let resource = resource.as_ref();
            let allowed = self.decide(&tree, ticket, token, resource, mode);
            if audited {
                self.emit(AuditEvent::now(token.principal_id(), resource, mode, allowed));
            }
            if !allowed {
                cg_debug!(
                    context = LogContext::new()
                        .with_principal(token.principal_id())
                        .with_resource(resource),
                    "authorization denied ({})",
                    mode.as_str()
                );
                self.record(false);
                return false;
            }
        }
        self.record(true);
        true
    }

    fn decide(
        &self,
        tree: &AccessTree,
        ticket: CacheTicket,
        token: &AuthenticationToken,
        resource: &str,
        mode: RecursionMode,
    ) -> bool {
        let key = CacheKey::new(token, resource, mode);
        if let Some(decision) = self.cache.get(&key) {
            if let Some(metrics) = &self.metrics {
                metrics.inc_cache_hit();
            }
            debug!(principal = %token, resource, decision, "access cache hit");
            return decision;
        }
        if let Some(metrics) = &self.metrics {
            metrics.inc_cache_miss();
        }
        let decision = tree.is_granted(token, resource, mode);
        self.cache.insert(ticket, key, decision);
        debug!(principal = %token, resource, decision, "access cache miss");
        decision
    }

    fn emit(&self, event: AuditEvent) {
        if let Err(err) = self.audit.record(&event) {
            if let Some(metrics) = &self.metrics {
                metrics.inc_audit_failure();
            }
            warn!(
                error = %err,
                principal = %event.principal_id,
                resource = %event.resource,
                "failed to record audit event"
            );
        }
    }

    fn record(&self, allowed: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.record_check(allowed);
        }
    }
}
