//! ---
//! cg_section: "03-persistence-logging"
//! cg_subsection: "module"
//! cg_type: "source"
//! cg_scope: "code"
//! cg_description: "Certificate records, storage backends, and repository."
//! cg_version: "v0.0.0-prealpha"
//! cg_owner: "tbd"
//! ---
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{PersistenceError, Result};

/// Lifecycle status of a stored certificate, with its numeric store code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum CertificateStatus {
    /// Stored but not yet assigned to an end entity.
    Unassigned,
    /// Not yet valid or suspended by workflow.
    Inactive,
    /// In use.
    Active,
    /// Active, owner notified that expiry is near.
    NotifiedAboutExpiration,
    /// On hold; may return to active.
    TemporarilyRevoked,
    /// Permanently revoked.
    Revoked,
    /// Expired and archived.
    Archived,
    /// Issued ahead of a CA rollover, not yet in use.
    RolloverPending,
}

impl CertificateStatus {
    /// Numeric code persisted for this status.
    pub fn code(self) -> i32 {
        match self {
            CertificateStatus::Unassigned => 0,
            CertificateStatus::Inactive => 10,
            CertificateStatus::Active => 20,
            CertificateStatus::NotifiedAboutExpiration => 21,
            CertificateStatus::TemporarilyRevoked => 30,
            CertificateStatus::Revoked => 40,
            CertificateStatus::Archived => 60,
            CertificateStatus::RolloverPending => 70,
        }
    }

    /// Revoked or on hold.
    pub fn is_revoked(self) -> bool {
        matches!(
            self,
            CertificateStatus::Revoked | CertificateStatus::TemporarilyRevoked
        )
    }
}

impl TryFrom<i32> for CertificateStatus {
    type Error = PersistenceError;

    fn try_from(code: i32) -> Result<Self> {
        Ok(match code {
            0 => CertificateStatus::Unassigned,
            10 => CertificateStatus::Inactive,
            20 => CertificateStatus::Active,
            21 => CertificateStatus::NotifiedAboutExpiration,
            30 => CertificateStatus::TemporarilyRevoked,
            40 => CertificateStatus::Revoked,
            60 => CertificateStatus::Archived,
            70 => CertificateStatus::RolloverPending,
            other => return Err(PersistenceError::UnknownStatus(other)),
        })
    }
}

impl From<CertificateStatus> for i32 {
    fn from(status: CertificateStatus) -> Self {
        status.code()
    }
}

/// Kind of certificate, with its numeric store code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum CertificateType {
    /// Not classified.
    Unknown,
    /// Leaf certificate of an end entity.
    EndEntity,
    /// Subordinate CA certificate.
    SubCa,
    /// Self-signed root CA certificate.
    RootCa,
}

impl CertificateType {
    /// Numeric code persisted for this type.
    pub fn code(self) -> i32 {
        match self {
            CertificateType::Unknown => 0,
            CertificateType::EndEntity => 1,
            CertificateType::SubCa => 2,
            CertificateType::RootCa => 8,
        }
    }
}

impl TryFrom<i32> for CertificateType {
    type Error = PersistenceError;

    fn try_from(code: i32) -> Result<Self> {
        Ok(match code {
            0 => CertificateType::Unknown,
            1 => CertificateType::EndEntity,
            2 => CertificateType::SubCa,
            8 => CertificateType::RootCa,
            other => return Err(PersistenceError::UnknownType(other)),
        })
    }
}

impl From<CertificateType> for i32 {
    fn from(kind: CertificateType) -> Self {
        kind.code()
    }
}

/// Stored certificate plus the metadata it is looked up by.
///
/// The fingerprint is an opaque key: it is compared byte for byte and never
/// parsed, so digests from curves without a registered name work unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    /// Unique key, hex digest of the certificate.
    pub fingerprint: String,
    /// Encoded certificate, opaque to the store.
    #[serde(with = "base64_bytes")]
    pub certificate: Vec<u8>,
    /// Fingerprint of the issuing CA certificate.
    pub issuer_fingerprint: String,
    /// End entity owning the certificate.
    pub owner_id: String,
    /// Lifecycle state.
    pub status: CertificateStatus,
    /// Kind of certificate.
    #[serde(rename = "type")]
    pub certificate_type: CertificateType,
    /// Profile the certificate was issued under.
    pub certificate_profile_id: i32,
    /// Free-form marker.
    #[serde(default)]
    pub tag: Option<String>,
    /// Supplied by the caller and stored verbatim.
    pub last_update: DateTime<Utc>,
}

impl CertificateRecord {
    /// Active end-entity record stamped with the current time.
    pub fn new(
        fingerprint: impl Into<String>,
        certificate: Vec<u8>,
        issuer_fingerprint: impl Into<String>,
        owner_id: impl Into<String>,
    ) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            certificate,
            issuer_fingerprint: issuer_fingerprint.into(),
            owner_id: owner_id.into(),
            status: CertificateStatus::Active,
            certificate_type: CertificateType::EndEntity,
            certificate_profile_id: 0,
            tag: None,
            last_update: Utc::now(),
        }
    }

    /// Like [`Self::new`], deriving the fingerprint from the DER bytes.
    pub fn from_der(
        der: Vec<u8>,
        issuer_fingerprint: impl Into<String>,
        owner_id: impl Into<String>,
    ) -> Self {
        let fingerprint = fingerprint(&der);
        Self::new(fingerprint, der, issuer_fingerprint, owner_id)
    }

    /// Replace the status.
    pub fn with_status(mut self, status: CertificateStatus) -> Self {
        self.status = status;
        self
    }

    /// Replace the certificate type.
    pub fn with_type(mut self, certificate_type: CertificateType) -> Self {
        self.certificate_type = certificate_type;
        self
    }

    /// Replace the profile id.
    pub fn with_profile(mut self, certificate_profile_id: i32) -> Self {
        self.certificate_profile_id = certificate_profile_id;
        self
    }

    /// Attach a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Replace `last_update`.
    pub fn with_last_update(mut self, last_update: DateTime<Utc>) -> Self {
        self.last_update = last_update;
        self
    }

    /// Set `last_update` from epoch milliseconds.
    pub fn with_last_update_millis(mut self, epoch_millis: i64) -> Result<Self> {
        self.last_update = Utc
            .timestamp_millis_opt(epoch_millis)
            .single()
            .ok_or_else(|| {
                PersistenceError::InvalidRecord(format!(
                    "last update {epoch_millis} is out of range"
                ))
            })?;
        Ok(self)
    }

    /// `last_update` as epoch milliseconds.
    pub fn last_update_millis(&self) -> i64 {
        self.last_update.timestamp_millis()
    }

    /// Check the invariants a record must satisfy before it is stored.
    pub fn validate(&self) -> Result<()> {
        if self.fingerprint.trim().is_empty() {
            return Err(PersistenceError::InvalidRecord(
                "fingerprint cannot be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Lowercase hex SHA-256 digest of an encoded certificate.
pub fn fingerprint(der: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(der);
    hex::encode(hasher.finalize())
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}
