//! # Schema Records
//!
//! Typed views of the registry documents: object types, attributes,
//! attribute groups, unique constraints, association kinds, model
//! associations and instance associations.
//!
//! Every record is stored as a flat [`Document`] in its own table and
//! converts in both directions through [`Record`].

use super::{CmdbError, Document, DocumentExt, InstId, Value};
use crate::primitives::{
    FIELD_ASST_ID, FIELD_ASST_INST_ID, FIELD_ASST_OBJ_ID, FIELD_BIZ_ID, FIELD_ID, FIELD_INST_ID,
    FIELD_OBJ_ASST_ID, FIELD_OBJ_ID, MAINLINE_KIND, TABLE_ASSOCIATION_KINDS, TABLE_ATTRIBUTES,
    TABLE_ATTRIBUTE_GROUPS, TABLE_INST_ASSOCIATIONS, TABLE_MODEL_ASSOCIATIONS, TABLE_OBJECTS,
    TABLE_UNIQUES,
};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// RECORD TRAIT
// =============================================================================

/// A typed record persisted as a document keyed by the `id` field.
pub trait Record: Sized {
    /// Table the record lives in.
    const TABLE: &'static str;

    fn to_document(&self) -> Document;

    fn from_document(doc: &Document) -> Result<Self, CmdbError>;
}

fn text(doc: &Document, field: &str) -> Result<String, CmdbError> {
    doc.text(field)
        .map(str::to_string)
        .ok_or_else(|| CmdbError::Serialization(format!("{field} missing or not a string")))
}

fn int_or_zero(doc: &Document, field: &str) -> i64 {
    doc.int(field).unwrap_or(0)
}

fn flag_or_false(doc: &Document, field: &str) -> bool {
    doc.flag(field).unwrap_or(false)
}

// =============================================================================
// OBJECT TYPE
// =============================================================================

/// An object (model) definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ObjectType {
    pub id: i64,
    pub obj_id: String,
    pub name: String,
    pub icon: String,
    pub classification: String,
    pub is_paused: bool,
    /// Built-in objects are pre-defined; custom ones are not.
    pub is_pre: bool,
}

impl ObjectType {
    /// A custom object definition.
    #[must_use]
    pub fn custom(
        obj_id: impl Into<String>,
        name: impl Into<String>,
        classification: impl Into<String>,
        icon: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            obj_id: obj_id.into(),
            name: name.into(),
            icon: icon.into(),
            classification: classification.into(),
            is_paused: false,
            is_pre: false,
        }
    }

    /// Custom (user-created) as opposed to built-in.
    #[must_use]
    pub fn is_common(&self) -> bool {
        !self.is_pre
    }
}

impl Record for ObjectType {
    const TABLE: &'static str = TABLE_OBJECTS;

    fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert(FIELD_ID.into(), Value::Int(self.id));
        doc.insert(FIELD_OBJ_ID.into(), self.obj_id.clone().into());
        doc.insert("bk_obj_name".into(), self.name.clone().into());
        doc.insert("bk_obj_icon".into(), self.icon.clone().into());
        doc.insert(
            "bk_classification_id".into(),
            self.classification.clone().into(),
        );
        doc.insert("bk_ispaused".into(), self.is_paused.into());
        doc.insert("ispre".into(), self.is_pre.into());
        doc
    }

    fn from_document(doc: &Document) -> Result<Self, CmdbError> {
        Ok(Self {
            id: int_or_zero(doc, FIELD_ID),
            obj_id: text(doc, FIELD_OBJ_ID)?,
            name: text(doc, "bk_obj_name")?,
            icon: doc.text("bk_obj_icon").unwrap_or_default().to_string(),
            classification: doc
                .text("bk_classification_id")
                .unwrap_or_default()
                .to_string(),
            is_paused: flag_or_false(doc, "bk_ispaused"),
            is_pre: flag_or_false(doc, "ispre"),
        })
    }
}

// =============================================================================
// ATTRIBUTE
// =============================================================================

/// A property definition of an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Attribute {
    pub id: i64,
    pub obj_id: String,
    pub property_id: String,
    pub property_name: String,
    pub property_type: String,
    pub property_group: String,
    pub property_index: i64,
    pub is_only: bool,
    pub is_required: bool,
    pub is_system: bool,
    pub is_editable: bool,
    /// Zero for global attributes, otherwise the business it is scoped to.
    pub biz_id: i64,
}

impl Record for Attribute {
    const TABLE: &'static str = TABLE_ATTRIBUTES;

    fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert(FIELD_ID.into(), Value::Int(self.id));
        doc.insert(FIELD_OBJ_ID.into(), self.obj_id.clone().into());
        doc.insert("bk_property_id".into(), self.property_id.clone().into());
        doc.insert("bk_property_name".into(), self.property_name.clone().into());
        doc.insert("bk_property_type".into(), self.property_type.clone().into());
        doc.insert(
            "bk_property_group".into(),
            self.property_group.clone().into(),
        );
        doc.insert("bk_property_index".into(), Value::Int(self.property_index));
        doc.insert("isonly".into(), self.is_only.into());
        doc.insert("isrequired".into(), self.is_required.into());
        doc.insert("issystem".into(), self.is_system.into());
        doc.insert("editable".into(), self.is_editable.into());
        doc.insert(FIELD_BIZ_ID.into(), Value::Int(self.biz_id));
        doc
    }

    fn from_document(doc: &Document) -> Result<Self, CmdbError> {
        Ok(Self {
            id: int_or_zero(doc, FIELD_ID),
            obj_id: text(doc, FIELD_OBJ_ID)?,
            property_id: text(doc, "bk_property_id")?,
            property_name: doc.text("bk_property_name").unwrap_or_default().into(),
            property_type: doc.text("bk_property_type").unwrap_or_default().into(),
            property_group: doc.text("bk_property_group").unwrap_or_default().into(),
            property_index: int_or_zero(doc, "bk_property_index"),
            is_only: flag_or_false(doc, "isonly"),
            is_required: flag_or_false(doc, "isrequired"),
            is_system: flag_or_false(doc, "issystem"),
            is_editable: flag_or_false(doc, "editable"),
            biz_id: int_or_zero(doc, FIELD_BIZ_ID),
        })
    }
}

// =============================================================================
// ATTRIBUTE GROUP
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AttributeGroup {
    pub id: i64,
    pub obj_id: String,
    pub group_id: String,
    pub group_name: String,
    pub group_index: i64,
    pub is_default: bool,
    pub biz_id: i64,
}

impl Record for AttributeGroup {
    const TABLE: &'static str = TABLE_ATTRIBUTE_GROUPS;

    fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert(FIELD_ID.into(), Value::Int(self.id));
        doc.insert(FIELD_OBJ_ID.into(), self.obj_id.clone().into());
        doc.insert("bk_group_id".into(), self.group_id.clone().into());
        doc.insert("bk_group_name".into(), self.group_name.clone().into());
        doc.insert("bk_group_index".into(), Value::Int(self.group_index));
        doc.insert("bk_isdefault".into(), self.is_default.into());
        doc.insert(FIELD_BIZ_ID.into(), Value::Int(self.biz_id));
        doc
    }

    fn from_document(doc: &Document) -> Result<Self, CmdbError> {
        Ok(Self {
            id: int_or_zero(doc, FIELD_ID),
            obj_id: text(doc, FIELD_OBJ_ID)?,
            group_id: text(doc, "bk_group_id")?,
            group_name: doc.text("bk_group_name").unwrap_or_default().into(),
            group_index: int_or_zero(doc, "bk_group_index"),
            is_default: flag_or_false(doc, "bk_isdefault"),
            biz_id: int_or_zero(doc, FIELD_BIZ_ID),
        })
    }
}

// =============================================================================
// UNIQUE CONSTRAINT
// =============================================================================

/// A uniqueness rule over a set of property ids of one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct UniqueConstraint {
    pub id: i64,
    pub obj_id: String,
    pub keys: Vec<String>,
    pub is_pre: bool,
}

impl Record for UniqueConstraint {
    const TABLE: &'static str = TABLE_UNIQUES;

    fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert(FIELD_ID.into(), Value::Int(self.id));
        doc.insert(FIELD_OBJ_ID.into(), self.obj_id.clone().into());
        doc.insert("keys".into(), self.keys.clone().into());
        doc.insert("ispre".into(), self.is_pre.into());
        doc
    }

    fn from_document(doc: &Document) -> Result<Self, CmdbError> {
        let keys = match doc.get("keys") {
            Some(Value::List(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        };
        Ok(Self {
            id: int_or_zero(doc, FIELD_ID),
            obj_id: text(doc, FIELD_OBJ_ID)?,
            keys,
            is_pre: flag_or_false(doc, "ispre"),
        })
    }
}

// =============================================================================
// ASSOCIATION KIND
// =============================================================================

/// A typed relationship category such as "belong" or "run".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AssociationKind {
    pub id: i64,
    pub asst_id: String,
    pub asst_name: String,
    pub is_pre: bool,
}

impl AssociationKind {
    #[must_use]
    pub fn is_mainline(&self) -> bool {
        self.asst_id == MAINLINE_KIND
    }
}

impl Record for AssociationKind {
    const TABLE: &'static str = TABLE_ASSOCIATION_KINDS;

    fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert(FIELD_ID.into(), Value::Int(self.id));
        doc.insert(FIELD_ASST_ID.into(), self.asst_id.clone().into());
        doc.insert("bk_asst_name".into(), self.asst_name.clone().into());
        doc.insert("ispre".into(), self.is_pre.into());
        doc
    }

    fn from_document(doc: &Document) -> Result<Self, CmdbError> {
        Ok(Self {
            id: int_or_zero(doc, FIELD_ID),
            asst_id: text(doc, FIELD_ASST_ID)?,
            asst_name: doc.text("bk_asst_name").unwrap_or_default().into(),
            is_pre: flag_or_false(doc, "ispre"),
        })
    }
}

// =============================================================================
// MAPPING & ON-DELETE
// =============================================================================

/// Cardinality of a model association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Mapping {
    #[serde(rename = "1:1")]
    OneToOne,
    #[serde(rename = "1:n")]
    OneToMany,
    /// Unconstrained.
    #[serde(rename = "n:n")]
    ManyToMany,
}

impl Mapping {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Mapping::OneToOne => "1:1",
            Mapping::OneToMany => "1:n",
            Mapping::ManyToMany => "n:n",
        }
    }

    /// Parse the stored form. Anything unknown is unconstrained.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "1:1" => Mapping::OneToOne,
            "1:n" => Mapping::OneToMany,
            _ => Mapping::ManyToMany,
        }
    }
}

impl fmt::Display for Mapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happens to linked instances when one side is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OnDelete {
    #[default]
    #[serde(rename = "none")]
    Nothing,
    #[serde(rename = "delete_src")]
    DeleteSource,
    #[serde(rename = "delete_dest")]
    DeleteDestination,
}

impl OnDelete {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            OnDelete::Nothing => "none",
            OnDelete::DeleteSource => "delete_src",
            OnDelete::DeleteDestination => "delete_dest",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "delete_src" => OnDelete::DeleteSource,
            "delete_dest" => OnDelete::DeleteDestination,
            _ => OnDelete::Nothing,
        }
    }
}

// =============================================================================
// MODEL ASSOCIATION
// =============================================================================

/// A schema edge from `obj_id` (source) to `asst_obj_id` (destination).
///
/// For mainline edges the source is the child and the destination the parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelAssociation {
    pub id: i64,
    pub obj_asst_id: String,
    pub obj_id: String,
    pub asst_obj_id: String,
    pub asst_kind: String,
    pub mapping: Mapping,
    pub on_delete: OnDelete,
    pub is_pre: bool,
}

impl ModelAssociation {
    /// Textual id of an edge: `"{obj}_{kind}_{asst_obj}"`.
    #[must_use]
    pub fn derive_id(obj_id: &str, kind: &str, asst_obj_id: &str) -> String {
        format!("{obj_id}_{kind}_{asst_obj_id}")
    }

    /// A mainline edge placing `child` directly under `parent`.
    #[must_use]
    pub fn mainline(child: &str, parent: &str) -> Self {
        Self {
            id: 0,
            obj_asst_id: Self::derive_id(child, MAINLINE_KIND, parent),
            obj_id: child.to_string(),
            asst_obj_id: parent.to_string(),
            asst_kind: MAINLINE_KIND.to_string(),
            mapping: Mapping::OneToOne,
            on_delete: OnDelete::Nothing,
            is_pre: false,
        }
    }

    #[must_use]
    pub fn is_mainline(&self) -> bool {
        self.asst_kind == MAINLINE_KIND
    }
}

impl Record for ModelAssociation {
    const TABLE: &'static str = TABLE_MODEL_ASSOCIATIONS;

    fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert(FIELD_ID.into(), Value::Int(self.id));
        doc.insert(FIELD_OBJ_ASST_ID.into(), self.obj_asst_id.clone().into());
        doc.insert(FIELD_OBJ_ID.into(), self.obj_id.clone().into());
        doc.insert(FIELD_ASST_OBJ_ID.into(), self.asst_obj_id.clone().into());
        doc.insert(FIELD_ASST_ID.into(), self.asst_kind.clone().into());
        doc.insert("mapping".into(), self.mapping.as_str().into());
        doc.insert("on_delete".into(), self.on_delete.as_str().into());
        doc.insert("ispre".into(), self.is_pre.into());
        doc
    }

    fn from_document(doc: &Document) -> Result<Self, CmdbError> {
        Ok(Self {
            id: int_or_zero(doc, FIELD_ID),
            obj_asst_id: text(doc, FIELD_OBJ_ASST_ID)?,
            obj_id: text(doc, FIELD_OBJ_ID)?,
            asst_obj_id: text(doc, FIELD_ASST_OBJ_ID)?,
            asst_kind: text(doc, FIELD_ASST_ID)?,
            mapping: Mapping::parse(doc.text("mapping").unwrap_or_default()),
            on_delete: OnDelete::parse(doc.text("on_delete").unwrap_or_default()),
            is_pre: flag_or_false(doc, "ispre"),
        })
    }
}

// =============================================================================
// INSTANCE ASSOCIATION
// =============================================================================

/// A data edge between two concrete instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstAssociation {
    pub id: i64,
    pub obj_asst_id: String,
    pub asst_kind: String,
    pub obj_id: String,
    pub inst_id: InstId,
    pub asst_obj_id: String,
    pub asst_inst_id: InstId,
    pub biz_id: i64,
}

impl Record for InstAssociation {
    const TABLE: &'static str = TABLE_INST_ASSOCIATIONS;

    fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert(FIELD_ID.into(), Value::Int(self.id));
        doc.insert(FIELD_OBJ_ASST_ID.into(), self.obj_asst_id.clone().into());
        doc.insert(FIELD_ASST_ID.into(), self.asst_kind.clone().into());
        doc.insert(FIELD_OBJ_ID.into(), self.obj_id.clone().into());
        doc.insert(FIELD_INST_ID.into(), self.inst_id.into());
        doc.insert(FIELD_ASST_OBJ_ID.into(), self.asst_obj_id.clone().into());
        doc.insert(FIELD_ASST_INST_ID.into(), self.asst_inst_id.into());
        doc.insert(FIELD_BIZ_ID.into(), Value::Int(self.biz_id));
        doc
    }

    fn from_document(doc: &Document) -> Result<Self, CmdbError> {
        Ok(Self {
            id: int_or_zero(doc, FIELD_ID),
            obj_asst_id: text(doc, FIELD_OBJ_ASST_ID)?,
            asst_kind: doc.text(FIELD_ASST_ID).unwrap_or_default().into(),
            obj_id: text(doc, FIELD_OBJ_ID)?,
            inst_id: InstId(int_or_zero(doc, FIELD_INST_ID)),
            asst_obj_id: text(doc, FIELD_ASST_OBJ_ID)?,
            asst_inst_id: InstId(int_or_zero(doc, FIELD_ASST_INST_ID)),
            biz_id: int_or_zero(doc, FIELD_BIZ_ID),
        })
    }
}
