//! # Core Type Definitions
//!
//! This module contains the value types every other module speaks:
//! - Document representation (`Value`, `Document`, `DocumentExt`)
//! - Instance identifiers (`InstId`)
//! - Schema records (`model` submodule)
//! - Error types (`CmdbError`)
//!
//! ## Determinism Guarantees
//!
//! All types in this module:
//! - Use integer arithmetic only (no floating-point)
//! - Implement `Ord` for deterministic ordering in `BTreeMap`/`BTreeSet`

pub mod model;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub use model::{
    AssociationKind, Attribute, AttributeGroup, InstAssociation, Mapping, ModelAssociation,
    ObjectType, OnDelete, UniqueConstraint,
};

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Numeric id of an instance inside its object type's collection.
///
/// Ids are only unique per collection: a Set and a Module may share an id.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct InstId(pub i64);

impl InstId {
    /// Create a new instance id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw id value.
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for InstId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// DOCUMENT VALUES
// =============================================================================

/// A single field value of a stored document.
///
/// Externally tagged so it round-trips through postcard.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<Value>),
}

impl Value {
    /// Integer view of the value. Booleans are not coerced.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<InstId> for Value {
    fn from(v: InstId) -> Self {
        Value::Int(v.0)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

/// A flat stored document: field name to value.
pub type Document = BTreeMap<String, Value>;

/// Build a document from `(field, value)` pairs.
#[must_use]
pub fn document<I, K, V>(pairs: I) -> Document
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Typed field access on documents.
pub trait DocumentExt {
    fn int(&self, field: &str) -> Option<i64>;
    fn text(&self, field: &str) -> Option<&str>;
    fn flag(&self, field: &str) -> Option<bool>;

    /// The integer field, or `ParamsInvalid` naming it.
    fn require_int(&self, field: &str) -> Result<i64, CmdbError> {
        self.int(field)
            .ok_or_else(|| CmdbError::ParamsInvalid(field.to_string()))
    }

    /// The id stored in `field`.
    fn inst_id(&self, field: &str) -> Result<InstId, CmdbError> {
        self.require_int(field).map(InstId)
    }
}

impl DocumentExt for Document {
    fn int(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(Value::as_i64)
    }

    fn text(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    fn flag(&self, field: &str) -> Option<bool> {
        self.get(field).and_then(Value::as_bool)
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the consistency engine.
///
/// - No silent failures
/// - Every variant maps to a stable numeric code via [`CmdbError::code`]
/// - Validation and precondition errors are raised before any write
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CmdbError {
    /// Transport / engine failure of the instance store.
    #[error("store request failed: {0}")]
    Store(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("parameter {0} must be set")]
    ParamsNeedSet(String),

    #[error("parameter {0} is invalid")]
    ParamsInvalid(String),

    #[error("duplicate item: {0}")]
    DuplicateItem(String),

    #[error("object {0} does not exist")]
    ObjectNotFound(String),

    #[error("instance {id} of object {obj_id} does not exist")]
    InstanceNotFound { obj_id: String, id: InstId },

    #[error("built-in item {0} cannot be modified")]
    ForbiddenOperateBuiltIn(String),

    #[error("{0} still holds hosts")]
    HasHost(String),

    #[error("topology would have {levels} levels, the limit is {max}")]
    TopoLevelOverLimit { levels: usize, max: usize },

    #[error("association between {obj_id} and {asst_obj_id} already exists")]
    AssociationAlreadyExist { obj_id: String, asst_obj_id: String },

    #[error("association {0} has already been instantiated")]
    AssociationHasAlreadyBeenInstantiated(String),

    #[error("object association {0} does not exist")]
    ObjectAssociationNotExist(String),

    #[error("mainline association of {0} does not exist")]
    MainlineObjectAssociationNotExist(String),

    #[error("mainline chain is corrupt: {0}")]
    MainlineChainCorrupt(String),

    #[error("pre-defined association kind {0} cannot be deleted")]
    DeletePredefinedAssociationKind(String),

    #[error("association {0} is one-to-one and already instantiated on that side")]
    CreateMultipleInstancesForOneToOneAssociation(String),

    #[error("association {0} is one-to-many and the destination is already linked")]
    CreateMultipleInstancesForOneToManyAssociation(String),

    #[error("pre-defined association {0} cannot be deleted")]
    DeletePredefinedAssociation(String),

    #[error("association kind {0} is still used by model associations")]
    AssociationKindHasBeenUsed(String),

    #[error("instance {id} of {obj_id} still has associations")]
    InstHasAssociation { obj_id: String, id: InstId },

    #[error("the mainline association kind cannot be used here")]
    AssociationKindMainlineUnavailable,

    #[error("business {0} still holds hosts and cannot be archived")]
    ArchiveBusinessHasHost(InstId),

    #[error("business {0} is built-in and cannot be deleted")]
    ForbiddenDeleteBuiltInBiz(InstId),

    #[error("business {0} is not archived and cannot be deleted")]
    ForbiddenDeleteUnarchivedBiz(InstId),

    #[error("{0} is not a selectable mainline object")]
    MainlineSelectFailed(String),

    #[error("instance name {0} would repeat under the same parent")]
    MainlineInstNameRepeat(String),

    #[error("audit log generation failed: {0}")]
    AuditGenerateFailed(String),

    #[error("audit log save failed: {0}")]
    AuditSaveFailed(String),

    /// A multi-step operation failed after earlier steps committed.
    #[error("{operation} stopped at stage {stage}: {source}")]
    Incomplete {
        operation: &'static str,
        stage: String,
        source: Box<CmdbError>,
    },
}

impl CmdbError {
    /// Stable numeric error code.
    #[must_use]
    pub fn code(&self) -> u32 {
        match self {
            CmdbError::Store(_) => 1_199_002,
            CmdbError::Serialization(_) => 1_199_003,
            CmdbError::Io(_) => 1_199_004,
            CmdbError::ParamsNeedSet(_) => 1_199_010,
            CmdbError::ParamsInvalid(_) => 1_199_011,
            CmdbError::DuplicateItem(_) => 1_199_014,
            CmdbError::ObjectNotFound(_) | CmdbError::InstanceNotFound { .. } => 1_199_017,
            CmdbError::ForbiddenOperateBuiltIn(_) => 1_199_054,
            CmdbError::HasHost(_) => 1_101_030,
            CmdbError::TopoLevelOverLimit { .. } => 1_101_035,
            CmdbError::AssociationAlreadyExist { .. } => 1_101_038,
            CmdbError::AssociationHasAlreadyBeenInstantiated(_) => 1_101_043,
            CmdbError::ObjectAssociationNotExist(_) => 1_101_046,
            CmdbError::MainlineObjectAssociationNotExist(_)
            | CmdbError::MainlineChainCorrupt(_) => 1_101_048,
            CmdbError::DeletePredefinedAssociationKind(_) => 1_101_051,
            CmdbError::CreateMultipleInstancesForOneToOneAssociation(_) => 1_101_052,
            CmdbError::CreateMultipleInstancesForOneToManyAssociation(_) => 1_101_053,
            CmdbError::DeletePredefinedAssociation(_) => 1_101_055,
            CmdbError::AssociationKindHasBeenUsed(_) => 1_101_060,
            CmdbError::InstHasAssociation { .. } => 1_101_075,
            CmdbError::AssociationKindMainlineUnavailable => 1_101_082,
            CmdbError::ArchiveBusinessHasHost(_) => 1_101_087,
            CmdbError::ForbiddenDeleteBuiltInBiz(_) => 1_101_095,
            CmdbError::ForbiddenDeleteUnarchivedBiz(_) => 1_101_096,
            CmdbError::MainlineSelectFailed(_) => 1_101_139,
            CmdbError::MainlineInstNameRepeat(_) => 1_101_149,
            CmdbError::AuditSaveFailed(_) => 1_109_001,
            CmdbError::AuditGenerateFailed(_) => 1_109_002,
            CmdbError::Incomplete { source, .. } => source.code(),
        }
    }

    /// The innermost error, looking through `Incomplete` wrappers.
    #[must_use]
    pub fn root(&self) -> &CmdbError {
        match self {
            CmdbError::Incomplete { source, .. } => source.root(),
            other => other,
        }
    }

    /// Wrap a failure of `stage` inside a multi-step `operation`.
    #[must_use]
    pub fn at_stage(self, operation: &'static str, stage: impl fmt::Display) -> Self {
        CmdbError::Incomplete {
            operation,
            stage: stage.to_string(),
            source: Box::new(self),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
