//! ---
//! cg_section: "03-persistence-logging"
//! cg_subsection: "module"
//! cg_type: "source"
//! cg_scope: "code"
//! cg_description: "Certificate records, storage backends, and repository."
//! cg_version: "v0.0.0-prealpha"
//! cg_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Durable certificate storage keyed by fingerprint, with writes gated by the
//! access control engine and unrestricted reads.

/// Result alias used throughout the persistence crate.
pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Error type for the persistence subsystem.
///
/// `Io`, `Json`, `Corrupted`, and `Backend` are storage faults and reach the
/// caller unchanged. A missing certificate is not an error.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// The caller is not authorized for the write.
    #[error("principal '{principal}' is not authorized for {resource}")]
    AccessDenied {
        /// Principal that attempted the write.
        principal: String,
        /// Resource the write is guarded by.
        resource: String,
    },
    /// The record violates a storage invariant.
    #[error("invalid certificate record: {0}")]
    InvalidRecord(String),
    /// Status code outside the known set.
    #[error("unknown certificate status code: {0}")]
    UnknownStatus(i32),
    /// Type code outside the known set.
    #[error("unknown certificate type code: {0}")]
    UnknownType(i32),
    /// Wrapper for IO errors encountered while reading/writing storage files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON serialization issues.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// A journal line could not be replayed.
    #[error("journal corrupted at line {line}: {reason}")]
    Corrupted {
        /// One-based line number.
        line: usize,
        /// What was wrong with it.
        reason: String,
    },
    /// Fault reported by a custom storage backend.
    #[error("storage backend failure: {0}")]
    Backend(String),
    /// Wrapper for Prometheus metrics registration failures.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl PersistenceError {
    /// True for faults raised by the storage layer.
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            PersistenceError::Io(_)
                | PersistenceError::Json(_)
                | PersistenceError::Corrupted { .. }
                | PersistenceError::Backend(_)
        )
    }
}

pub mod journal;
pub mod metrics;
pub mod record;
pub mod repository;
pub mod storage;

pub use journal::JournalStorage;
pub use metrics::PersistenceMetrics;
pub use record::{fingerprint, CertificateRecord, CertificateStatus, CertificateType};
pub use repository::CertificateRepository;
pub use storage::{CertificateQuery, CertificateStorage, MemoryStorage};
