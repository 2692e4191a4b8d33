//! ---
//! cg_section: "03-persistence-logging"
//! cg_subsection: "tests"
//! cg_type: "source"
//! cg_scope: "code"
//! cg_description: "Integration tests for the certificate repository."
//! cg_version: "v0.0.0-prealpha"
//! cg_owner: "tbd"
//! ---
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use certgate_persistence::{
    CertificateQuery, CertificateRecord, CertificateRepository, CertificateStatus,
    CertificateStorage, CertificateType, JournalStorage, MemoryStorage, PersistenceError,
};
use certgate_security::{
    AccessControlCache, AccessControlEngine, AccessRule, AccessTree, AccessTreeStore,
    AuthenticationToken, MemoryAuditSink, RuleSet,
};
use chrono::{TimeZone, Utc};
use tempfile::tempdir;

fn engine() -> Arc<AccessControlEngine> {
    let set = RuleSet::new().with_role("ca", [AccessRule::allow_recursive("/certificate")]);
    Arc::new(AccessControlEngine::new(
        Arc::new(AccessTreeStore::new(AccessTree::from_rule_set(&set).unwrap())),
        AccessControlCache::new(Duration::from_secs(30)),
        Arc::new(MemoryAuditSink::new()),
    ))
}

fn ca() -> AuthenticationToken {
    AuthenticationToken::new("ca-node-1", ["ca"])
}

#[test]
fn second_store_overwrites_every_field() {
    let repo = CertificateRepository::new(engine(), Arc::new(MemoryStorage::new()));
    let first = CertificateRecord::new("f1", vec![1], "ca-a", "alice")
        .with_tag("first")
        .with_profile(1);
    let second = CertificateRecord::new("f1", vec![2, 2], "ca-b", "bob")
        .with_status(CertificateStatus::Archived)
        .with_type(CertificateType::SubCa)
        .with_profile(9)
        .with_last_update(Utc.with_ymd_and_hms(2001, 2, 3, 4, 5, 6).unwrap());

    repo.store(&ca(), first).unwrap();
    repo.store(&ca(), second.clone()).unwrap();

    assert_eq!(repo.find_by_fingerprint("f1").unwrap(), Some(second));
    assert!(repo.find_by_owner("alice").unwrap().is_empty());
    assert_eq!(repo.find_by_issuer("ca-b").unwrap().len(), 1);
}

#[test]
fn denied_store_leaves_backend_unchanged() {
    let storage = Arc::new(MemoryStorage::new());
    let repo = CertificateRepository::new(engine(), storage.clone());
    let stranger = AuthenticationToken::new("ra-node", ["ra"]);
    let existing = CertificateRecord::new("f1", vec![1], "ca", "alice");
    repo.store(&ca(), existing.clone()).unwrap();

    let replacement = CertificateRecord::new("f1", vec![9], "ca", "mallory");
    let err = repo.store(&stranger, replacement).unwrap_err();

    assert!(matches!(err, PersistenceError::AccessDenied { .. }));
    assert_eq!(storage.get("f1").unwrap(), Some(existing));
    assert_eq!(storage.len().unwrap(), 1);
}

#[test]
fn fingerprints_are_opaque_keys() {
    let repo = CertificateRepository::new(engine(), Arc::new(MemoryStorage::new()));
    let keys = [
        "brainpoolP256r1:5d41402abc4b2a76b9719d911017c592",
        "1.3.36.3.3.2.8.1.1.7/9f86d081884c7d65",
        "F0:0D",
    ];
    for key in keys {
        repo.store(&ca(), CertificateRecord::new(key, vec![0], "ca", "alice"))
            .unwrap();
    }
    for key in keys {
        assert!(repo.find_by_fingerprint(key).unwrap().is_some(), "{key}");
    }
    assert!(repo.find_by_fingerprint("f0:0d").unwrap().is_none());
    assert!(repo.find_by_fingerprint("brainpoolP256r1").unwrap().is_none());
}

#[test]
fn secondary_lookups_filter_by_metadata() {
    let repo = CertificateRepository::new(engine(), Arc::new(MemoryStorage::new()));
    let root = CertificateRecord::new("root", vec![0], "root", "ca-admin")
        .with_type(CertificateType::RootCa)
        .with_profile(1);
    let leaf = CertificateRecord::new("leaf-1", vec![1], "root", "alice").with_profile(2);
    let revoked = CertificateRecord::new("leaf-2", vec![2], "root", "alice")
        .with_profile(2)
        .with_status(CertificateStatus::Revoked)
        .with_tag("compromised");
    for record in [root, leaf, revoked] {
        repo.store(&ca(), record).unwrap();
    }

    assert_eq!(repo.find_by_issuer("root").unwrap().len(), 3);
    assert_eq!(repo.find_by_owner("alice").unwrap().len(), 2);
    assert_eq!(repo.find_by_type(CertificateType::RootCa).unwrap().len(), 1);
    assert_eq!(repo.find_by_profile(2).unwrap().len(), 2);
    let revoked = repo.find_by_status(CertificateStatus::Revoked).unwrap();
    assert_eq!(revoked.len(), 1);
    assert_eq!(revoked[0].fingerprint, "leaf-2");
    let tagged = repo
        .find(&CertificateQuery::new().owner("alice").tag("compromised"))
        .unwrap();
    assert_eq!(tagged.len(), 1);
    assert_eq!(repo.is_revoked("leaf-2").unwrap(), Some(true));
    assert_eq!(repo.is_revoked("leaf-1").unwrap(), Some(false));
}

#[test]
fn journal_backend_survives_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store").join("certificates.journal");
    let historical = Utc.with_ymd_and_hms(2012, 6, 30, 23, 59, 59).unwrap();
    {
        let repo = CertificateRepository::new(
            engine(),
            Arc::new(JournalStorage::open(&path).unwrap()),
        );
        repo.store(
            &ca(),
            CertificateRecord::from_der(b"der-bytes".to_vec(), "root", "alice")
                .with_last_update(historical),
        )
        .unwrap();
    }

    let storage = Arc::new(JournalStorage::open(&path).unwrap());
    let repo = CertificateRepository::new(engine(), storage.clone());
    let fingerprint = certgate_persistence::fingerprint(b"der-bytes");
    let restored = repo.find_by_fingerprint(&fingerprint).unwrap().unwrap();
    assert_eq!(restored.last_update, historical);
    assert_eq!(restored.certificate, b"der-bytes");

    assert!(repo
        .update_status(&ca(), &fingerprint, CertificateStatus::Revoked, Utc::now())
        .unwrap());
    assert_eq!(storage.compact().unwrap(), 1);
    let reopened = JournalStorage::open(&path).unwrap();
    assert_eq!(
        reopened.get(&fingerprint).unwrap().unwrap().status,
        CertificateStatus::Revoked
    );
}

#[test]
fn concurrent_stores_of_one_fingerprint_leave_a_whole_record() {
    let repo = Arc::new(CertificateRepository::new(
        engine(),
        Arc::new(MemoryStorage::new()),
    ));
    let writers: Vec<_> = (0..8)
        .map(|n| {
            let repo = repo.clone();
            thread::spawn(move || {
                let owner = format!("owner-{n}");
                let record = CertificateRecord::new("shared", vec![n as u8; 4], "ca", owner)
                    .with_profile(n);
                for _ in 0..50 {
                    repo.store(&ca(), record.clone()).unwrap();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    let stored = repo.find_by_fingerprint("shared").unwrap().unwrap();
    let n = stored.certificate_profile_id;
    assert_eq!(stored.owner_id, format!("owner-{n}"));
    assert_eq!(stored.certificate, vec![n as u8; 4]);
    assert_eq!(repo.find(&CertificateQuery::new()).unwrap().len(), 1);
}
