//! Verification records and their status history.
//!
//! A record is created once per verification id; a second create is refused so
//! colliding ids cannot silently share state. Status changes are appended, never
//! rewritten, so the history of a run stays auditable.
use crate::classify::ErrorInfo;
use crate::error::RecordError;
use crate::ids::validate_verification_id;
use crate::state::VerificationStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;

const RECORD_FILE: &str = "record.json";
const HISTORY_FILE: &str = "history.jsonl";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRecord {
    pub verification_id: String,
    pub vending_machine_id: String,
    pub layout_id: i64,
    #[serde(default)]
    pub layout_prefix: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEntry {
    pub status: VerificationStatus,
    pub stage: String,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl StatusEntry {
    pub fn new(status: VerificationStatus, stage: &str) -> Self {
        Self {
            status,
            stage: stage.to_string(),
            at: Utc::now(),
            detail: None,
            error: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_error(mut self, error: ErrorInfo) -> Self {
        self.error = Some(error);
        self
    }
}

pub trait RecordStore: Send + Sync {
    /// Create the record, failing with `AlreadyExists` if the id is taken.
    fn put_if_absent(&self, record: &VerificationRecord) -> Result<(), RecordError>;
    fn get(&self, verification_id: &str) -> Result<VerificationRecord, RecordError>;
    fn append_status(&self, verification_id: &str, entry: &StatusEntry) -> Result<(), RecordError>;
    /// Status entries in append order.
    fn history(&self, verification_id: &str) -> Result<Vec<StatusEntry>, RecordError>;
}

fn check_id(verification_id: &str) -> Result<(), RecordError> {
    validate_verification_id(verification_id).map_err(|reason| RecordError::InvalidId {
        id: verification_id.to_string(),
        reason,
    })
}

/// Directory under the store root that holds records.
pub const RECORDS_DIR: &str = "records";

/// Records under `<root>/records/<verification-id>/`.
#[derive(Debug, Clone)]
pub struct FsRecordStore {
    root: PathBuf,
}

impl FsRecordStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn record_dir(&self, verification_id: &str) -> PathBuf {
        self.root.join(RECORDS_DIR).join(verification_id)
    }
}

fn io_error(path: &Path, source: io::Error) -> RecordError {
    RecordError::Io {
        path: path.display().to_string(),
        source,
    }
}

impl RecordStore for FsRecordStore {
    fn put_if_absent(&self, record: &VerificationRecord) -> Result<(), RecordError> {
        check_id(&record.verification_id)?;
        let dir = self.record_dir(&record.verification_id);
        let path = dir.join(RECORD_FILE);
        fs::create_dir_all(&dir).map_err(|err| io_error(&dir, err))?;
        let text = serde_json::to_vec_pretty(record).map_err(|err| RecordError::Decode {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        let mut tmp = NamedTempFile::new_in(&dir).map_err(|err| io_error(&dir, err))?;
        tmp.write_all(&text).map_err(|err| io_error(&path, err))?;
        match tmp.persist_noclobber(&path) {
            Ok(_) => Ok(()),
            Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => {
                Err(RecordError::AlreadyExists(record.verification_id.clone()))
            }
            Err(err) => Err(io_error(&path, err.error)),
        }
    }

    fn get(&self, verification_id: &str) -> Result<VerificationRecord, RecordError> {
        check_id(verification_id)?;
        let path = self.record_dir(verification_id).join(RECORD_FILE);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(RecordError::NotFound(verification_id.to_string()))
            }
            Err(err) => return Err(io_error(&path, err)),
        };
        serde_json::from_slice(&bytes).map_err(|err| RecordError::Decode {
            path: path.display().to_string(),
            message: err.to_string(),
        })
    }

    fn append_status(&self, verification_id: &str, entry: &StatusEntry) -> Result<(), RecordError> {
        self.get(verification_id)?;
        let path = self.record_dir(verification_id).join(HISTORY_FILE);
        let mut line = serde_json::to_string(entry).map_err(|err| RecordError::Decode {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        line.push('\n');
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| io_error(&path, err))?;
        file.write_all(line.as_bytes())
            .map_err(|err| io_error(&path, err))?;
        Ok(())
    }

    fn history(&self, verification_id: &str) -> Result<Vec<StatusEntry>, RecordError> {
        self.get(verification_id)?;
        let path = self.record_dir(verification_id).join(HISTORY_FILE);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_error(&path, err)),
        };
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .enumerate()
            .map(|(index, line)| {
                serde_json::from_str(line).map_err(|err| RecordError::Decode {
                    path: format!("{}:{}", path.display(), index + 1),
                    message: err.to_string(),
                })
            })
            .collect()
    }
}

#[derive(Debug, Default)]
struct MemoryRecords {
    records: BTreeMap<String, VerificationRecord>,
    history: BTreeMap<String, Vec<StatusEntry>>,
}

/// In-process record store for tests.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    inner: Mutex<MemoryRecords>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryRecords> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RecordStore for MemoryRecordStore {
    fn put_if_absent(&self, record: &VerificationRecord) -> Result<(), RecordError> {
        check_id(&record.verification_id)?;
        let mut inner = self.lock();
        if inner.records.contains_key(&record.verification_id) {
            return Err(RecordError::AlreadyExists(record.verification_id.clone()));
        }
        inner
            .records
            .insert(record.verification_id.clone(), record.clone());
        Ok(())
    }

    fn get(&self, verification_id: &str) -> Result<VerificationRecord, RecordError> {
        self.lock()
            .records
            .get(verification_id)
            .cloned()
            .ok_or_else(|| RecordError::NotFound(verification_id.to_string()))
    }

    fn append_status(&self, verification_id: &str, entry: &StatusEntry) -> Result<(), RecordError> {
        let mut inner = self.lock();
        if !inner.records.contains_key(verification_id) {
            return Err(RecordError::NotFound(verification_id.to_string()));
        }
        inner
            .history
            .entry(verification_id.to_string())
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    fn history(&self, verification_id: &str) -> Result<Vec<StatusEntry>, RecordError> {
        let inner = self.lock();
        if !inner.records.contains_key(verification_id) {
            return Err(RecordError::NotFound(verification_id.to_string()));
        }
        Ok(inner
            .history
            .get(verification_id)
            .cloned()
            .unwrap_or_default())
    }
}
