//! Append-only audit trail
//!
//! Every successful mutation produces exactly one [`AuditRecord`]. Records
//! are written as JSON lines, one file per API, and never rewritten.

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{RegistryError, Result};
use crate::version::{ApiId, VersionTag};

/// Mutations the registry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    VersionCreated,
    VersionDeleted,
    CurrentVersionChanged,
    DocumentSaved,
    ReferencesUpdated,
    ComponentRenamed,
    ApiMetadataUpdated,
}

impl AuditEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEvent::VersionCreated => "version_created",
            AuditEvent::VersionDeleted => "version_deleted",
            AuditEvent::CurrentVersionChanged => "current_version_changed",
            AuditEvent::DocumentSaved => "document_saved",
            AuditEvent::ReferencesUpdated => "references_updated",
            AuditEvent::ComponentRenamed => "component_renamed",
            AuditEvent::ApiMetadataUpdated => "api_metadata_updated",
        }
    }
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn rfc3339<S: serde::Serializer>(ts: &DateTime<Utc>, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// A single immutable audit entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub api_id: ApiId,
    pub version: Option<VersionTag>,
    #[serde(serialize_with = "rfc3339")]
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
    /// User or agent that performed the mutation
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl AuditRecord {
    pub fn new(api_id: &ApiId, event: AuditEvent, actor: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            api_id: api_id.clone(),
            version: None,
            timestamp: Utc::now(),
            event,
            actor: actor.into(),
            rationale: None,
            details: serde_json::Value::Null,
        }
    }

    pub fn with_version(mut self, version: &VersionTag) -> Self {
        self.version = Some(version.clone());
        self
    }

    pub fn with_rationale(mut self, rationale: Option<&str>) -> Self {
        self.rationale = rationale.map(String::from);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Destination for audit records
pub trait AuditSink: Send + Sync {
    /// Append a record. The record must be durable when this returns.
    fn append(&self, record: &AuditRecord) -> Result<()>;

    /// All records for one API, oldest first
    fn records_for(&self, api_id: &ApiId) -> Result<Vec<AuditRecord>>;
}

/// JSON-lines audit log, one `<api>.jsonl` file per API
#[derive(Debug)]
pub struct FileAuditLog {
    dir: PathBuf,
    writers: Mutex<HashMap<ApiId, File>>,
}

impl FileAuditLog {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| RegistryError::io("create audit directory", &dir, e))?;
        Ok(Self {
            dir,
            writers: Mutex::new(HashMap::new()),
        })
    }

    pub fn path_for(&self, api_id: &ApiId) -> PathBuf {
        self.dir.join(format!("{}.jsonl", api_id))
    }
}

impl AuditSink for FileAuditLog {
    fn append(&self, record: &AuditRecord) -> Result<()> {
        let path = self.path_for(&record.api_id);
        let mut line = serde_json::to_string(record).map_err(|source| RegistryError::Json {
            operation: "serialize",
            path: path.display().to_string(),
            source,
        })?;
        line.push('\n');

        let mut writers = self.writers.lock().unwrap_or_else(PoisonError::into_inner);
        if !writers.contains_key(&record.api_id) {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| RegistryError::io("open audit log", &path, e))?;
            writers.insert(record.api_id.clone(), file);
        }
        if let Some(file) = writers.get_mut(&record.api_id) {
            file.write_all(line.as_bytes())
                .and_then(|_| file.sync_data())
                .map_err(|e| RegistryError::io("append audit record", &path, e))?;
        }
        Ok(())
    }

    fn records_for(&self, api_id: &ApiId) -> Result<Vec<AuditRecord>> {
        let path = self.path_for(api_id);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(RegistryError::io("open audit log", &path, e)),
        };

        let mut records = Vec::new();
        for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| RegistryError::io("read audit log", &path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(&line).map_err(|source| RegistryError::Json {
                operation: "parse",
                path: format!("{}:{}", path.display(), number + 1),
                source,
            })?;
            records.push(record);
        }
        Ok(records)
    }
}

/// In-memory audit log for tests
#[derive(Debug, Default, Clone)]
pub struct MemoryAuditLog {
    records: Arc<Mutex<Vec<AuditRecord>>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for MemoryAuditLog {
    fn append(&self, record: &AuditRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }

    fn records_for(&self, api_id: &ApiId) -> Result<Vec<AuditRecord>> {
        Ok(self
            .records()
            .into_iter()
            .filter(|r| &r.api_id == api_id)
            .collect())
    }
}

/// Discards every record; used when auditing is disabled in config
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAuditLog;

impl AuditSink for NullAuditLog {
    fn append(&self, _record: &AuditRecord) -> Result<()> {
        Ok(())
    }

    fn records_for(&self, _api_id: &ApiId) -> Result<Vec<AuditRecord>> {
        Ok(Vec::new())
    }
}
