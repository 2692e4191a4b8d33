//! ---
//! cg_section: "03-persistence-logging"
//! cg_subsection: "module"
//! cg_type: "source"
//! cg_scope: "code"
//! cg_description: "Certificate records, storage backends, and repository."
//! cg_version: "v0.0.0-prealpha"
//! cg_owner: "tbd"
//! ---
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::record::CertificateRecord;
use crate::storage::{CertificateQuery, CertificateStorage, RecordIndex};
use crate::{PersistenceError, Result};

/// Current journal format version.
pub const JOURNAL_VERSION: u16 = 1;

/// First line of every journal file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct JournalHeader {
    version: u16,
    created_at: DateTime<Utc>,
    hash: String,
}

impl JournalHeader {
    fn new() -> Self {
        let created_at = Utc::now();
        let hash = format!("{:x}", Sha256::digest(created_at.to_rfc3339().as_bytes()));
        Self {
            version: JOURNAL_VERSION,
            created_at,
            hash,
        }
    }
}

/// One persisted write: the full record as it stood after the write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Sequential identifier assigned when appending.
    pub sequence: u64,
    /// When the entry was written.
    pub recorded_at: DateTime<Utc>,
    /// Record state after the write.
    pub record: CertificateRecord,
}

struct JournalWriter {
    file: File,
    next_sequence: u64,
}

impl JournalWriter {
    /// Append one entry. On failure the file is cut back to its previous
    /// length and the sequence is not consumed.
    fn append(&mut self, record: &CertificateRecord) -> Result<u64> {
        let sequence = self.next_sequence + 1;
        let entry = EntryRef {
            sequence,
            recorded_at: Utc::now(),
            record,
        };
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        let start = self.file.metadata()?.len();
        if let Err(err) = self.write_line(&line) {
            self.rollback(start);
            return Err(err);
        }
        self.next_sequence = sequence;
        Ok(sequence)
    }

    fn write_line(&mut self, line: &[u8]) -> Result<()> {
        self.file.write_all(line)?;
        self.file.sync_data()?;
        Ok(())
    }

    fn rollback(&mut self, len: u64) {
        if let Err(err) = self.file.set_len(len) {
            warn!(error = %err, len, "failed to discard partial journal entry");
        }
    }
}

#[derive(Serialize)]
struct EntryRef<'a> {
    sequence: u64,
    recorded_at: DateTime<Utc>,
    record: &'a CertificateRecord,
}

/// Durable backend: an append-only JSON-lines journal replayed into memory on open.
///
/// The last entry for a fingerprint wins. Writes are serialized through the
/// journal writer; reads only take the index lock.
pub struct JournalStorage {
    path: PathBuf,
    writer: Mutex<JournalWriter>,
    index: RwLock<RecordIndex>,
}

impl JournalStorage {
    /// Open or create the journal at `path` and replay it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let fresh = !path.exists() || fs::metadata(&path)?.len() == 0;
        let (index, next_sequence) = if fresh {
            write_header(&path)?;
            (RecordIndex::default(), 0)
        } else {
            let replayed = replay(&path)?;
            if let Some(repair) = replayed.repair {
                repair_tail(&path, repair)?;
            }
            if fs::metadata(&path)?.len() == 0 {
                write_header(&path)?;
            }
            (replayed.index, replayed.last_sequence)
        };
        info!(
            path = %path.display(),
            records = index.len(),
            sequence = next_sequence,
            "certificate journal opened"
        );

        let file = OpenOptions::new().append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(JournalWriter {
                file,
                next_sequence,
            }),
            index: RwLock::new(index),
        })
    }

    /// Location of the journal file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrite the journal with one entry per live record, dropping superseded
    /// entries. Returns the number of records written.
    pub fn compact(&self) -> Result<usize> {
        let mut writer = self.writer.lock();
        let index = self.index.read();
        let mut records: Vec<&CertificateRecord> = index.records().collect();
        records.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));

        let staging = self.path.with_extension("compact");
        {
            let mut out = BufWriter::new(File::create(&staging)?);
            serde_json::to_writer(&mut out, &JournalHeader::new())?;
            out.write_all(b"\n")?;
            for (offset, record) in records.iter().enumerate() {
                let entry = EntryRef {
                    sequence: offset as u64 + 1,
                    recorded_at: Utc::now(),
                    record,
                };
                serde_json::to_writer(&mut out, &entry)?;
                out.write_all(b"\n")?;
            }
            out.flush()?;
            out.get_ref().sync_all()?;
        }
        fs::rename(&staging, &self.path)?;

        writer.file = OpenOptions::new().append(true).open(&self.path)?;
        writer.next_sequence = records.len() as u64;
        debug!(path = %self.path.display(), records = records.len(), "certificate journal compacted");
        Ok(records.len())
    }
}

impl std::fmt::Debug for JournalStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JournalStorage")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl CertificateStorage for JournalStorage {
    fn put(&self, record: CertificateRecord) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.append(&record)?;
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
        let mut writer = self.writer.lock();
        let Some(record) = self.index.read().updated(fingerprint, change) else {
            return Ok(false);
        };
        writer.append(&record)?;
        self.index.write().insert(record);
        Ok(true)
    }

    fn len(&self) -> Result<usize> {
        Ok(self.index.read().len())
    }
}

fn write_header(path: &Path) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut out, &JournalHeader::new())?;
    out.write_all(b"\n")?;
    out.flush()?;
    out.get_ref().sync_all()?;
    Ok(())
}

/// How to fix the last line of a journal after an interrupted write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TailRepair {
    /// Unterminated and unreadable: cut the file at this offset.
    Truncate(u64),
    /// Complete but missing its newline.
    Terminate,
}

struct Replay {
    index: RecordIndex,
    last_sequence: u64,
    repair: Option<TailRepair>,
}

fn replay(path: &Path) -> Result<Replay> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut replayed = Replay {
        index: RecordIndex::default(),
        last_sequence: 0,
        repair: None,
    };
    let mut raw = Vec::new();
    let mut offset = 0u64;
    let mut number = 0usize;

    loop {
        raw.clear();
        let read = reader.read_until(b'\n', &mut raw)?;
        if read == 0 {
            break;
        }
        number += 1;
        let start = offset;
        offset += read as u64;
        // Only the last line can lack its newline.
        let terminated = raw.last() == Some(&b'\n');

        let parsed = std::str::from_utf8(&raw)
            .map_err(|err| PersistenceError::Corrupted {
                line: number,
                reason: err.to_string(),
            })
            .and_then(|line| parse_line(line.trim(), number));
        let line = match parsed {
            Ok(line) => line,
            Err(err) if !terminated => {
                warn!(
                    path = %path.display(),
                    line = number,
                    error = %err,
                    "discarding torn journal tail"
                );
                replayed.repair = Some(TailRepair::Truncate(start));
                break;
            }
            Err(err) => return Err(err),
        };
        if !terminated {
            replayed.repair = Some(TailRepair::Terminate);
        }

        match line {
            JournalLine::Blank => {}
            JournalLine::Header(header) => {
                if header.version != JOURNAL_VERSION {
                    return Err(PersistenceError::Corrupted {
                        line: number,
                        reason: format!("unsupported journal version {}", header.version),
                    });
                }
            }
            JournalLine::Entry(entry) => {
                if entry.sequence <= replayed.last_sequence {
                    return Err(PersistenceError::Corrupted {
                        line: number,
                        reason: format!(
                            "sequence {} does not follow {}",
                            entry.sequence, replayed.last_sequence
                        ),
                    });
                }
                replayed.last_sequence = entry.sequence;
                replayed.index.insert(entry.record);
            }
        }
    }
    Ok(replayed)
}

enum JournalLine {
    Blank,
    Header(JournalHeader),
    Entry(Box<JournalEntry>),
}

fn parse_line(line: &str, number: usize) -> Result<JournalLine> {
    if line.is_empty() {
        return Ok(JournalLine::Blank);
    }
    if number == 1 {
        let header = serde_json::from_str(line).map_err(|err| corrupted(number, err))?;
        return Ok(JournalLine::Header(header));
    }
    let entry = serde_json::from_str(line).map_err(|err| corrupted(number, err))?;
    Ok(JournalLine::Entry(Box::new(entry)))
}

fn repair_tail(path: &Path, repair: TailRepair) -> Result<()> {
    let file = OpenOptions::new().append(true).open(path)?;
    match repair {
        TailRepair::Truncate(len) => file.set_len(len)?,
        TailRepair::Terminate => (&file).write_all(b"\n")?,
    }
    file.sync_all()?;
    Ok(())
}

fn corrupted(line: usize, err: serde_json::Error) -> PersistenceError {
    PersistenceError::Corrupted {
        line,
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::CertificateStatus;
    use tempfile::tempdir;

    fn record(fp: &str) -> CertificateRecord {
        CertificateRecord::new(fp, vec![1, 2], "ca", "alice")
    }

    #[test]
    fn replay_restores_last_write_per_fingerprint() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("certs.journal");
        {
            let journal = JournalStorage::open(&path).unwrap();
            journal.put(record("aa")).unwrap();
            journal.put(record("bb")).unwrap();
            journal
                .put(record("aa").with_status(CertificateStatus::Revoked))
                .unwrap();
        }

        let journal = JournalStorage::open(&path).unwrap();
        assert_eq!(journal.len().unwrap(), 2);
        assert_eq!(
            journal.get("aa").unwrap().unwrap().status,
            CertificateStatus::Revoked
        );
        let lines = fs::read_to_string(&path).unwrap().lines().count();
        assert_eq!(lines, 4);
    }

    #[test]
    fn compact_drops_superseded_entries_and_keeps_appending() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("certs.journal");
        let journal = JournalStorage::open(&path).unwrap();
        for _ in 0..3 {
            journal.put(record("aa")).unwrap();
        }
        journal.put(record("bb")).unwrap();

        assert_eq!(journal.compact().unwrap(), 2);
        journal.put(record("cc")).unwrap();
        drop(journal);

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 4);
        let reopened = JournalStorage::open(&path).unwrap();
        assert_eq!(reopened.len().unwrap(), 3);
    }

    #[test]
    fn garbage_line_reports_its_position() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("certs.journal");
        {
            let journal = JournalStorage::open(&path).unwrap();
            journal.put(record("aa")).unwrap();
        }
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{not json").unwrap();

        match JournalStorage::open(&path) {
            Err(PersistenceError::Corrupted { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected corruption error, got {other:?}"),
        }
    }

    #[test]
    fn update_is_journaled() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("certs.journal");
        {
            let journal = JournalStorage::open(&path).unwrap();
            journal.put(record("aa")).unwrap();
            assert!(journal
                .update("aa", &mut |r| r.tag = Some("rotated".into()))
                .unwrap());
            assert!(!journal.update("zz", &mut |_| {}).unwrap());
        }
        let journal = JournalStorage::open(&path).unwrap();
        assert_eq!(
            journal.get("aa").unwrap().unwrap().tag.as_deref(),
            Some("rotated")
        );
    }

    #[test]
    fn torn_tail_is_discarded_on_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("certs.journal");
        {
            let journal = JournalStorage::open(&path).unwrap();
            for fp in ["aa", "bb", "cc"] {
                journal.put(record(fp)).unwrap();
            }
        }
        let intact = fs::metadata(&path).unwrap().len();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(br#"{"sequence":4,"recorded_at":"2026"#).unwrap();
        drop(file);

        let journal = JournalStorage::open(&path).unwrap();
        assert_eq!(journal.len().unwrap(), 3);
        assert_eq!(fs::metadata(&path).unwrap().len(), intact);

        journal.put(record("dd")).unwrap();
        drop(journal);
        let reopened = JournalStorage::open(&path).unwrap();
        assert_eq!(reopened.len().unwrap(), 4);
        assert!(reopened.get("dd").unwrap().is_some());
    }

    #[test]
    fn complete_last_entry_without_newline_is_kept() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("certs.journal");
        {
            let journal = JournalStorage::open(&path).unwrap();
            journal.put(record("aa")).unwrap();
            journal.put(record("bb")).unwrap();
        }
        let contents = fs::read_to_string(&path).unwrap();
        fs::write(&path, contents.trim_end()).unwrap();

        let journal = JournalStorage::open(&path).unwrap();
        assert_eq!(journal.len().unwrap(), 2);
        journal.put(record("cc")).unwrap();
        drop(journal);

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 4);
        assert_eq!(JournalStorage::open(&path).unwrap().len().unwrap(), 3);
    }

    #[test]
    fn torn_header_starts_a_fresh_journal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("certs.journal");
        fs::write(&path, r#"{"version":1,"crea"#).unwrap();

        let journal = JournalStorage::open(&path).unwrap();
        assert!(journal.is_empty().unwrap());
        journal.put(record("aa")).unwrap();
        drop(journal);
        assert_eq!(JournalStorage::open(&path).unwrap().len().unwrap(), 1);
    }

    #[test]
    fn rollback_discards_partial_entry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("certs.journal");
        let journal = JournalStorage::open(&path).unwrap();
        journal.put(record("aa")).unwrap();
        {
            let mut writer = journal.writer.lock();
            let start = writer.file.metadata().unwrap().len();
            writer.file.write_all(br#"{"sequence":2,"rec"#).unwrap();
            writer.rollback(start);
            assert_eq!(writer.file.metadata().unwrap().len(), start);
        }
        journal.put(record("bb")).unwrap();
        drop(journal);

        let reopened = JournalStorage::open(&path).unwrap();
        assert_eq!(reopened.len().unwrap(), 2);
    }

    #[test]
    fn failed_append_keeps_sequence_and_length() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("certs.journal");
        {
            let journal = JournalStorage::open(&path).unwrap();
            journal.put(record("aa")).unwrap();
        }
        let before = fs::metadata(&path).unwrap().len();
        let mut writer = JournalWriter {
            file: File::open(&path).unwrap(),
            next_sequence: 5,
        };

        let err = writer.append(&record("bb")).unwrap_err();
        assert!(matches!(err, PersistenceError::Io(_)));
        assert_eq!(writer.next_sequence, 5);
        assert_eq!(fs::metadata(&path).unwrap().len(), before);
    }
}
