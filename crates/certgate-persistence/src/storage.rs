//! ---
//! cg_section: "03-persistence-logging"
//! cg_subsection: "module"
//! cg_type: "source"
//! cg_scope: "code"
//! cg_description: "Certificate records, storage backends, and repository."
//! cg_version: "v0.0.0-prealpha"
//! cg_owner: "tbd"
//! ---
use std::collections::{BTreeSet, HashMap};

use parking_lot::RwLock;

use crate::record::{CertificateRecord, CertificateStatus, CertificateType};
use crate::Result;

/// Backend holding certificate records keyed by fingerprint.
///
/// Implementations must make `put` atomic per fingerprint: a concurrent
/// reader sees either the previous record or the new one.
pub trait CertificateStorage: Send + Sync {
    /// Insert or replace the record under its fingerprint.
    fn put(&self, record: CertificateRecord) -> Result<()>;

    /// Exact-match lookup.
    fn get(&self, fingerprint: &str) -> Result<Option<CertificateRecord>>;

    /// Every record matching the query, ordered by fingerprint.
    fn query(&self, query: &CertificateQuery) -> Result<Vec<CertificateRecord>>;

    /// Apply `change` to the stored record, returning false if none exists.
    fn update(
        &self,
        fingerprint: &str,
        change: &mut dyn FnMut(&mut CertificateRecord),
    ) -> Result<bool>;

    /// Number of stored records.
    fn len(&self) -> Result<usize>;

    /// True when nothing is stored.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Conjunction of optional filters over stored records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateQuery {
    /// Owner to match.
    pub owner_id: Option<String>,
    /// Issuer fingerprint to match.
    pub issuer_fingerprint: Option<String>,
    /// Status to match.
    pub status: Option<CertificateStatus>,
    /// Type to match.
    pub certificate_type: Option<CertificateType>,
    /// Profile to match.
    pub certificate_profile_id: Option<i32>,
    /// Tag to match.
    pub tag: Option<String>,
}

impl CertificateQuery {
    /// Query matching every record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Only records owned by `owner_id`.
    pub fn owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    /// Only records issued by `issuer_fingerprint`.
    pub fn issuer(mut self, issuer_fingerprint: impl Into<String>) -> Self {
        self.issuer_fingerprint = Some(issuer_fingerprint.into());
        self
    }

    /// Only records in `status`.
    pub fn status(mut self, status: CertificateStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Only records of `certificate_type`.
    pub fn certificate_type(mut self, certificate_type: CertificateType) -> Self {
        self.certificate_type = Some(certificate_type);
        self
    }

    /// Only records under `certificate_profile_id`.
    pub fn profile(mut self, certificate_profile_id: i32) -> Self {
        self.certificate_profile_id = Some(certificate_profile_id);
        self
    }

    /// Only records carrying `tag`.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// True when `record` satisfies every filter that is set.
    pub fn matches(&self, record: &CertificateRecord) -> bool {
        self.owner_id
            .as_ref()
            .map_or(true, |owner| &record.owner_id == owner)
            && self
                .issuer_fingerprint
                .as_ref()
                .map_or(true, |issuer| &record.issuer_fingerprint == issuer)
            && self.status.map_or(true, |status| record.status == status)
            && self
                .certificate_type
                .map_or(true, |kind| record.certificate_type == kind)
            && self
                .certificate_profile_id
                .map_or(true, |profile| record.certificate_profile_id == profile)
            && self
                .tag
                .as_ref()
                .map_or(true, |tag| record.tag.as_ref() == Some(tag))
    }
}

/// Records plus owner and issuer indexes, shared by the in-process backends.
#[derive(Debug, Default)]
pub(crate) struct RecordIndex {
    records: HashMap<String, CertificateRecord>,
    by_owner: HashMap<String, BTreeSet<String>>,
    by_issuer: HashMap<String, BTreeSet<String>>,
}

impl RecordIndex {
    pub(crate) fn insert(&mut self, record: CertificateRecord) {
        if let Some(previous) = self.records.remove(&record.fingerprint) {
            self.unlink(&previous);
        }
        link(&mut self.by_owner, &record.owner_id, &record.fingerprint);
        link(
            &mut self.by_issuer,
            &record.issuer_fingerprint,
            &record.fingerprint,
        );
        self.records.insert(record.fingerprint.clone(), record);
    }

    pub(crate) fn get(&self, fingerprint: &str) -> Option<&CertificateRecord> {
        self.records.get(fingerprint)
    }

    pub(crate) fn query(&self, query: &CertificateQuery) -> Vec<CertificateRecord> {
        let candidates = match (&query.owner_id, &query.issuer_fingerprint) {
            (Some(owner), _) => Some(self.by_owner.get(owner).unwrap_or(&EMPTY)),
            (None, Some(issuer)) => Some(self.by_issuer.get(issuer).unwrap_or(&EMPTY)),
            (None, None) => None,
        };
        let mut found: Vec<CertificateRecord> = match candidates {
            Some(fingerprints) => fingerprints
                .iter()
                .filter_map(|fp| self.records.get(fp))
                .filter(|record| query.matches(record))
                .cloned()
                .collect(),
            None => self
                .records
                .values()
                .filter(|record| query.matches(record))
                .cloned()
                .collect(),
        };
        found.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
        found
    }

    /// Copy of the stored record with `change` applied. Owner, issuer and
    /// fingerprint are not editable, so the indexes stay valid on reinsert.
    pub(crate) fn updated(
        &self,
        fingerprint: &str,
        change: &mut dyn FnMut(&mut CertificateRecord),
    ) -> Option<CertificateRecord> {
        let current = self.records.get(fingerprint)?;
        let mut next = current.clone();
        change(&mut next);
        next.fingerprint = current.fingerprint.clone();
        next.owner_id = current.owner_id.clone();
        next.issuer_fingerprint = current.issuer_fingerprint.clone();
        Some(next)
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn records(&self) -> impl Iterator<Item = &CertificateRecord> {
        self.records.values()
    }

    fn unlink(&mut self, record: &CertificateRecord) {
        unlink(&mut self.by_owner, &record.owner_id, &record.fingerprint);
        unlink(
            &mut self.by_issuer,
            &record.issuer_fingerprint,
            &record.fingerprint,
        );
    }
}

static EMPTY: BTreeSet<String> = BTreeSet::new();

fn link(index: &mut HashMap<String, BTreeSet<String>>, key: &str, fingerprint: &str) {
    index
        .entry(key.to_string())
        .or_default()
        .insert(fingerprint.to_string());
}

fn unlink(index: &mut HashMap<String, BTreeSet<String>>, key: &str, fingerprint: &str) {
    if let Some(set) = index.get_mut(key) {
        set.remove(fingerprint);
        if set.is_empty() {
            index.remove(key);
        }
    }
}

/// Volatile backend; contents are lost when dropped.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    index: RwLock<RecordIndex>,
}

impl MemoryStorage {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CertificateStorage for MemoryStorage {
    fn put(&self, record: CertificateRecord) -> Result<()> {
        self.index.write().insert(record);
        Ok(())
    }

    fn get(&self, fingerprint: &str) -> Result<Option<CertificateRecord>> {
        Ok(self.index.read().get(fingerprint).cloned())
    }

    fn query(&self, query: &CertificateQuery) -> Result<Vec<CertificateRecord>> {
        Ok(self.index.read().query(query))
    }

    fn update(
        &self,
        fingerprint: &str,
        change: &mut dyn FnMut(&mut CertificateRecord),
    ) -> Result<bool> {
        let mut index = self.index.write();
        match index.updated(fingerprint, change) {
            Some(record) => {
                index.insert(record);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn len(&self) -> Result<usize> {
        Ok(self.index.read().len())
    }
}
