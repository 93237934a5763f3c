//! # Audit Sinks
//!
//! The engine hands every write to an [`AuditLog`]. The binary either keeps
//! the entries in memory or appends them to a file, one JSON object per
//! line.

use crate::json::document_to_json;
use cmdb_core::{AuditEntry, AuditLog, AuditTrail, CmdbError};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Audit sink selected at runtime.
#[derive(Debug)]
pub enum AuditSink {
    /// Entries kept in memory and dropped on exit.
    Memory(AuditTrail),
    /// Entries appended to a JSON-lines file.
    Jsonl(JsonlAudit),
}

impl AuditSink {
    /// A file sink when a path is given, memory otherwise.
    #[must_use]
    pub fn for_path(path: Option<&Path>) -> Self {
        match path {
            Some(path) => Self::Jsonl(JsonlAudit::new(path)),
            None => Self::Memory(AuditTrail::new()),
        }
    }

    /// Entries written during this run.
    #[must_use]
    pub fn written(&self) -> usize {
        match self {
            Self::Memory(trail) => trail.entries().len(),
            Self::Jsonl(file) => file.written(),
        }
    }
}

impl AuditLog for AuditSink {
    fn save(&mut self, entries: Vec<AuditEntry>) -> Result<(), CmdbError> {
        match self {
            Self::Memory(trail) => trail.save(entries),
            Self::Jsonl(file) => file.save(entries),
        }
    }
}

/// Appends audit entries to a file as JSON lines.
#[derive(Debug, Clone)]
pub struct JsonlAudit {
    path: PathBuf,
    written: usize,
}

impl JsonlAudit {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            written: 0,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn written(&self) -> usize {
        self.written
    }
}

impl AuditLog for JsonlAudit {
    fn save(&mut self, entries: Vec<AuditEntry>) -> Result<(), CmdbError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| CmdbError::Io(format!("open {}: {}", self.path.display(), e)))?;

        let mut lines = String::new();
        for entry in &entries {
            lines.push_str(&entry_to_json(entry).to_string());
            lines.push('\n');
        }
        file.write_all(lines.as_bytes())
            .map_err(|e| CmdbError::Io(format!("write {}: {}", self.path.display(), e)))?;
        self.written = self.written.saturating_add(entries.len());
        Ok(())
    }
}

/// One audit line.
#[must_use]
pub fn entry_to_json(entry: &AuditEntry) -> serde_json::Value {
    serde_json::json!({
        "action": entry.action.to_string(),
        "resource": entry.resource,
        "resource_id": entry.resource_id,
        "bk_biz_id": entry.biz_id,
        "snapshot": document_to_json(&entry.snapshot),
    })
}
