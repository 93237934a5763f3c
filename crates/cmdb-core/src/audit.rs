//! # Audit Log
//!
//! Every state-changing operation of the engine ends by handing a snapshot
//! of the touched documents to an [`AuditLog`]. A failure to generate or
//! save the entries fails the operation even though the data change has
//! already committed, so a lost audit trail is always visible.

use crate::store::InstanceSource;
use crate::types::{CmdbError, Document, DocumentExt};
use crate::primitives::{FIELD_BIZ_ID, FIELD_ID};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
        })
    }
}

/// One immutable audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: AuditAction,
    /// Object id for instances, table name for registry records.
    pub resource: String,
    pub resource_id: Option<i64>,
    /// Business the resource belongs to, zero when global.
    pub biz_id: i64,
    pub snapshot: Document,
}

/// Audit sink consumed by the engine.
pub trait AuditLog {
    /// Turn a snapshot into entries, one per document.
    fn generate(
        &self,
        action: AuditAction,
        resource: &str,
        snapshot: &[Document],
    ) -> Result<Vec<AuditEntry>, CmdbError> {
        let id_field = InstanceSource::of(resource).id_field();
        Ok(snapshot
            .iter()
            .map(|doc| AuditEntry {
                action,
                resource: resource.to_string(),
                resource_id: doc.int(id_field).or_else(|| doc.int(FIELD_ID)),
                biz_id: doc.int(FIELD_BIZ_ID).unwrap_or(0),
                snapshot: doc.clone(),
            })
            .collect())
    }

    fn save(&mut self, entries: Vec<AuditEntry>) -> Result<(), CmdbError>;
}

/// Generate and save entries for `snapshot`, classifying failures.
pub fn record<A: AuditLog + ?Sized>(
    log: &mut A,
    action: AuditAction,
    resource: &str,
    snapshot: &[Document],
) -> Result<(), CmdbError> {
    if snapshot.is_empty() {
        return Ok(());
    }
    let entries = log
        .generate(action, resource, snapshot)
        .map_err(|e| match e {
            e @ CmdbError::AuditGenerateFailed(_) => e,
            other => CmdbError::AuditGenerateFailed(other.to_string()),
        })?;
    log.save(entries).map_err(|e| match e {
        e @ CmdbError::AuditSaveFailed(_) => e,
        other => CmdbError::AuditSaveFailed(other.to_string()),
    })
}

/// In-memory audit trail.
#[derive(Debug, Clone, Default)]
pub struct AuditTrail {
    entries: Vec<AuditEntry>,
}

impl AuditTrail {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    /// Entries of one action on one resource.
    pub fn of<'a>(
        &'a self,
        action: AuditAction,
        resource: &'a str,
    ) -> impl Iterator<Item = &'a AuditEntry> + 'a {
        self.entries
            .iter()
            .filter(move |e| e.action == action && e.resource == resource)
    }

    /// Remove and return everything recorded so far.
    pub fn drain(&mut self) -> Vec<AuditEntry> {
        std::mem::take(&mut self.entries)
    }
}

impl AuditLog for AuditTrail {
    fn save(&mut self, entries: Vec<AuditEntry>) -> Result<(), CmdbError> {
        self.entries.extend(entries);
        Ok(())
    }
}
