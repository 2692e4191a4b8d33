//! ---
//! cg_section: "06-security-access-control"
//! cg_subsection: "module"
//! cg_type: "source"
//! cg_scope: "code"
//! cg_description: "Access control engine, resource tree, and audit hooks."
//! cg_version: "v0.0.0-prealpha"
//! cg_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Access control for certgate: hierarchical resource rules, a node-local
//! decision cache, and pluggable audit sinks.

pub mod audit;
pub mod cache;
pub mod engine;
pub mod metrics;
pub mod rules;
pub mod token;
pub mod tree;

pub use audit::{
    AuditEntry, AuditError, AuditEvent, AuditLog, AuditSink, MemoryAuditSink, NullAuditSink,
    TracingAuditSink,
};
pub use cache::{AccessControlCache, CacheKey, CacheTicket};
pub use engine::AccessControlEngine;
pub use metrics::SecurityMetrics;
pub use rules::{AccessError, AccessRule, RuleSet};
pub use token::{AuthenticationToken, PrincipalId};
pub use tree::{AccessTree, AccessTreeStore, Decision, RecursionMode, ResourceTree};
