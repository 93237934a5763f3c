//! # Model Registry
//!
//! Schema access layered over any [`InstanceStore`]: object definitions,
//! attributes, groups, unique constraints, association kinds and model
//! associations. Every record type lives in its own table and converts
//! through [`Record`].
//!
//! The registry performs the structural checks a schema write needs
//! (duplicate ids, pre-defined kinds) and nothing else; the mainline rules
//! live in [`crate::mainline`] and [`crate::association`].

use crate::filter::Filter;
use crate::primitives::{FIELD_ASST_ID, FIELD_ID, FIELD_OBJ_ASST_ID, FIELD_OBJ_ID};
use crate::store::{Collection, InstanceStore};
use crate::types::model::Record;
use crate::types::{
    AssociationKind, Attribute, AttributeGroup, CmdbError, Document, ModelAssociation, ObjectType,
    UniqueConstraint,
};

/// Table holding records of type `R`.
#[must_use]
pub fn collection<R: Record>() -> Collection {
    Collection::table(R::TABLE)
}

/// Schema operations available on every store.
pub trait ModelRegistry: InstanceStore {
    // =========================================================================
    // GENERIC RECORD ACCESS
    // =========================================================================

    fn read_records<R: Record>(&self, filter: &Filter) -> Result<Vec<R>, CmdbError> {
        self.find_all(&collection::<R>(), filter)?
            .iter()
            .map(R::from_document)
            .collect()
    }

    /// Insert a record, returning its stored document.
    fn create_record<R: Record>(&mut self, record: &R) -> Result<Document, CmdbError> {
        let mut doc = record.to_document();
        doc.remove(FIELD_ID);
        let id = self.create(&collection::<R>(), doc.clone())?;
        doc.insert(FIELD_ID.to_string(), id.into());
        Ok(doc)
    }

    /// Delete matching records, returning their documents.
    fn delete_records<R: Record>(&mut self, filter: &Filter) -> Result<Vec<Document>, CmdbError> {
        let docs = self.find_all(&collection::<R>(), filter)?;
        if !docs.is_empty() {
            self.delete(&collection::<R>(), filter)?;
        }
        Ok(docs)
    }

    // =========================================================================
    // OBJECTS
    // =========================================================================

    fn read_models(&self, filter: &Filter) -> Result<Vec<ObjectType>, CmdbError> {
        self.read_records(filter)
    }

    fn read_model(&self, obj_id: &str) -> Result<Option<ObjectType>, CmdbError> {
        Ok(self
            .read_records::<ObjectType>(&Filter::eq(FIELD_OBJ_ID, obj_id))?
            .into_iter()
            .next())
    }

    /// The object, or `ObjectNotFound`.
    fn require_model(&self, obj_id: &str) -> Result<ObjectType, CmdbError> {
        self.read_model(obj_id)?
            .ok_or_else(|| CmdbError::ObjectNotFound(obj_id.to_string()))
    }

    /// Create an object; both its id and its name must be unused.
    fn create_model(&mut self, object: &ObjectType) -> Result<ObjectType, CmdbError> {
        if object.obj_id.is_empty() {
            return Err(CmdbError::ParamsNeedSet(FIELD_OBJ_ID.to_string()));
        }
        if object.name.is_empty() {
            return Err(CmdbError::ParamsNeedSet("bk_obj_name".to_string()));
        }
        let clash = Filter::eq(FIELD_OBJ_ID, object.obj_id.as_str())
            .or(Filter::eq("bk_obj_name", object.name.as_str()));
        if self.count(&collection::<ObjectType>(), &clash)? > 0 {
            return Err(CmdbError::DuplicateItem(object.obj_id.clone()));
        }
        let doc = self.create_record(object)?;
        ObjectType::from_document(&doc)
    }

    /// Delete an object together with its attributes, groups and unique
    /// constraints. Returns the deleted object documents.
    fn delete_model(&mut self, obj_id: &str) -> Result<Vec<Document>, CmdbError> {
        let by_obj = Filter::eq(FIELD_OBJ_ID, obj_id);
        self.delete_records::<Attribute>(&by_obj)?;
        self.delete_records::<AttributeGroup>(&by_obj)?;
        self.delete_records::<UniqueConstraint>(&by_obj)?;
        self.delete_records::<ObjectType>(&by_obj)
    }

    // =========================================================================
    // ATTRIBUTES, GROUPS, UNIQUES
    // =========================================================================

    fn read_attributes(&self, filter: &Filter) -> Result<Vec<Attribute>, CmdbError> {
        self.read_records(filter)
    }

    fn create_attributes(&mut self, attributes: &[Attribute]) -> Result<Vec<Document>, CmdbError> {
        let mut created = Vec::with_capacity(attributes.len());
        for attribute in attributes {
            let clash = Filter::eq(FIELD_OBJ_ID, attribute.obj_id.as_str())
                .and(Filter::eq("bk_property_id", attribute.property_id.as_str()));
            if self.count(&collection::<Attribute>(), &clash)? > 0 {
                return Err(CmdbError::DuplicateItem(format!(
                    "{}.{}",
                    attribute.obj_id, attribute.property_id
                )));
            }
            created.push(self.create_record(attribute)?);
        }
        Ok(created)
    }

    fn create_attribute_group(&mut self, group: &AttributeGroup) -> Result<Document, CmdbError> {
        let clash = Filter::eq(FIELD_OBJ_ID, group.obj_id.as_str())
            .and(Filter::eq("bk_group_id", group.group_id.as_str()))
            .and(Filter::eq("bk_biz_id", group.biz_id));
        if self.count(&collection::<AttributeGroup>(), &clash)? > 0 {
            return Err(CmdbError::DuplicateItem(format!(
                "{}.{}",
                group.obj_id, group.group_id
            )));
        }
        self.create_record(group)
    }

    fn create_unique_constraint(
        &mut self,
        unique: &UniqueConstraint,
    ) -> Result<Document, CmdbError> {
        if unique.keys.is_empty() {
            return Err(CmdbError::ParamsNeedSet("keys".to_string()));
        }
        self.create_record(unique)
    }

    // =========================================================================
    // ASSOCIATION KINDS
    // =========================================================================

    fn read_association_kinds(&self, filter: &Filter) -> Result<Vec<AssociationKind>, CmdbError> {
        self.read_records(filter)
    }

    fn create_association_kind(&mut self, kind: &AssociationKind) -> Result<Document, CmdbError> {
        if kind.asst_id.is_empty() {
            return Err(CmdbError::ParamsNeedSet(FIELD_ASST_ID.to_string()));
        }
        let clash = Filter::eq(FIELD_ASST_ID, kind.asst_id.as_str());
        if self.count(&collection::<AssociationKind>(), &clash)? > 0 {
            return Err(CmdbError::DuplicateItem(kind.asst_id.clone()));
        }
        self.create_record(kind)
    }

    /// Delete a user-defined association kind that no model association uses.
    fn delete_association_kind(&mut self, asst_id: &str) -> Result<Vec<Document>, CmdbError> {
        let by_id = Filter::eq(FIELD_ASST_ID, asst_id);
        let kinds: Vec<AssociationKind> = self.read_records(&by_id)?;
        if kinds.is_empty() {
            return Ok(Vec::new());
        }
        if kinds.iter().any(|k| k.is_pre) {
            return Err(CmdbError::DeletePredefinedAssociationKind(
                asst_id.to_string(),
            ));
        }
        if self.count(&collection::<ModelAssociation>(), &by_id)? > 0 {
            return Err(CmdbError::AssociationKindHasBeenUsed(asst_id.to_string()));
        }
        self.delete_records::<AssociationKind>(&by_id)
    }

    // =========================================================================
    // MODEL ASSOCIATIONS
    // =========================================================================

    fn read_model_associations(
        &self,
        filter: &Filter,
    ) -> Result<Vec<ModelAssociation>, CmdbError> {
        self.read_records(filter)
    }

    fn read_model_association(
        &self,
        obj_asst_id: &str,
    ) -> Result<Option<ModelAssociation>, CmdbError> {
        Ok(self
            .read_model_associations(&Filter::eq(FIELD_OBJ_ASST_ID, obj_asst_id))?
            .into_iter()
            .next())
    }

    /// Create a model association; its textual id must be unused.
    fn create_model_association(
        &mut self,
        association: &ModelAssociation,
    ) -> Result<ModelAssociation, CmdbError> {
        let clash = Filter::eq(FIELD_OBJ_ASST_ID, association.obj_asst_id.as_str());
        if self.count(&collection::<ModelAssociation>(), &clash)? > 0 {
            return Err(CmdbError::DuplicateItem(association.obj_asst_id.clone()));
        }
        let doc = self.create_record(association)?;
        ModelAssociation::from_document(&doc)
    }

    /// Delete a model association by row id, returning its documents.
    fn delete_model_association(&mut self, id: i64) -> Result<Vec<Document>, CmdbError> {
        self.delete_records::<ModelAssociation>(&Filter::eq(FIELD_ID, id))
    }
}

impl<S: InstanceStore + ?Sized> ModelRegistry for S {}
