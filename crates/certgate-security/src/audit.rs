//! ---
//! cg_section: "06-security-access-control"
//! cg_subsection: "module"
//! cg_type: "source"
//! cg_scope: "code"
//! cg_description: "Access control engine, resource tree, and audit hooks."
//! cg_version: "v0.0.0-prealpha"
//! cg_owner: "tbd"
//! ---
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::tree::RecursionMode;

/// One logged authorization check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the check was decided.
    pub timestamp: DateTime<Utc>,
    /// Principal the check was made for.
    pub principal_id: String,
    /// Resource that was checked.
    pub resource: String,
    /// Recursion requirement of the check.
    pub recursion_mode: RecursionMode,
    /// Outcome of the check.
    pub decision: bool,
}

impl AuditEvent {
    /// Event stamped with the current time.
    pub fn now(
        principal_id: impl Into<String>,
        resource: impl Into<String>,
        recursion_mode: RecursionMode,
        decision: bool,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            principal_id: principal_id.into(),
            resource: resource.into(),
            recursion_mode,
            decision,
        }
    }
}

/// Failures raised by audit sinks.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Underlying file operation failed.
    #[error("audit io error: {0}")]
    Io(#[from] std::io::Error),
    /// Entry could not be (de)serialized.
    #[error("audit serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Write-only consumer of authorization events.
pub trait AuditSink: Send + Sync {
    /// Record a single event.
    fn record(&self, event: &AuditEvent) -> Result<(), AuditError>;
}

impl<T: AuditSink + ?Sized> AuditSink for Arc<T> {
    fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        (**self).record(event)
    }
}

/// Sink that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _event: &AuditEvent) -> Result<(), AuditError> {
        Ok(())
    }
}

/// Sink that emits events through `tracing` under the `certgate::audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        tracing::info!(
            target: "certgate::audit",
            principal = %event.principal_id,
            resource = %event.resource,
            recursion_mode = event.recursion_mode.as_str(),
            decision = event.decision,
            "authorization checked"
        );
        Ok(())
    }
}

/// In-memory sink, mainly for diagnostics and tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl MemoryAuditSink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every recorded event in order.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    /// Number of recorded events.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// True when nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Forget recorded events.
    pub fn reset(&self) {
        self.events.lock().clear();
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Entry recorded in the audit file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    /// The recorded event.
    #[serde(flatten)]
    pub event: AuditEvent,
    /// SHA-256 hash of the entry contents and previous hash.
    pub hash: String,
    /// Hash of the previous entry (or zero string for the first entry).
    pub previous_hash: String,
}

impl AuditEntry {
    fn compute_hash(event: &AuditEvent, previous_hash: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(
            event
                .timestamp
                .timestamp_nanos_opt()
                .unwrap_or_default()
                .to_be_bytes(),
        );
        hasher.update(event.principal_id.as_bytes());
        hasher.update(event.resource.as_bytes());
        hasher.update(event.recursion_mode.as_str().as_bytes());
        hasher.update([u8::from(event.decision)]);
        hasher.update(previous_hash.as_bytes());
        hex::encode(hasher.finalize())
    }
}

fn genesis_hash() -> String {
    "0".repeat(64)
}

/// Audit log backed by a hash-chained, newline-delimited JSON file.
#[derive(Debug)]
pub struct AuditLog {
    path: PathBuf,
    last_hash: Mutex<String>,
}

impl AuditLog {
    /// Open an audit log at the given path. Existing entries are loaded to determine the head hash.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut last_hash = genesis_hash();
        if path.exists() {
            for line in BufReader::new(fs::File::open(&path)?).lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let entry: AuditEntry = serde_json::from_str(&line)?;
                last_hash = entry.hash;
            }
        }
        Ok(Self {
            path,
            last_hash: Mutex::new(last_hash),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an event, chaining it to the previous entry.
    pub fn append(&self, event: &AuditEvent) -> Result<AuditEntry, AuditError> {
        // Held across the write so the chain order matches the file order.
        let mut last_hash = self.last_hash.lock();
        let hash = AuditEntry::compute_hash(event, &last_hash);
        let entry = AuditEntry {
            event: event.clone(),
            hash: hash.clone(),
            previous_hash: last_hash.clone(),
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');
        file.write_all(&line)?;
        file.flush()?;
        *last_hash = hash;
        Ok(entry)
    }

    /// Verify integrity of the log (detect tampering).
    pub fn verify(&self) -> Result<bool, AuditError> {
        let mut previous = genesis_hash();
        if !self.path.exists() {
            return Ok(true);
        }
        for line in BufReader::new(fs::File::open(&self.path)?).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: AuditEntry = serde_json::from_str(&line)?;
            if entry.previous_hash != previous {
                return Ok(false);
            }
            let expected = AuditEntry::compute_hash(&entry.event, &previous);
            if expected != entry.hash {
                return Ok(false);
            }
            previous = entry.hash;
        }
        Ok(true)
    }

    /// Read back every entry in file order.
    pub fn entries(&self) -> Result<Vec<AuditEntry>, AuditError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for line in BufReader::new(fs::File::open(&self.path)?).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(&line)?);
        }
        Ok(entries)
    }
}

impl AuditSink for AuditLog {
    fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        self.append(event).map(|_| ())
    }
}
