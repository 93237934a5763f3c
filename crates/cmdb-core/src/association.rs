//! # Association Consistency Checker
//!
//! Guards instance associations (data edges) against their model
//! association's mapping, and guards deletions against live edges.
//!
//! ## Mapping rules
//!
//! | Mapping | Refused when |
//! |---------|--------------|
//! | `1:1`   | the source or the destination already has an edge of this association |
//! | `1:n`   | the destination already has an edge of this association |
//! | `n:n`   | never |
//!
//! ## Dangling edges
//!
//! An edge whose counterpart instance no longer exists is pruned when an
//! instance it touches is about to be deleted. Only edges with a living
//! counterpart block the deletion.

use crate::audit::{AuditAction, AuditLog};
use crate::filter::Filter;
use crate::instance::{join_ids, module_host};
use crate::primitives::{
    BIZ, FIELD_ASST_ID, FIELD_ASST_INST_ID, FIELD_ASST_OBJ_ID, FIELD_BIZ_ID, FIELD_ID,
    FIELD_INST_ID, FIELD_MODULE_ID, FIELD_OBJ_ASST_ID, FIELD_OBJ_ID, MAINLINE_KIND, MODULE,
    TABLE_INST_ASSOCIATIONS, TABLE_MODEL_ASSOCIATIONS,
};
use crate::registry::{ModelRegistry, collection};
use crate::service::Cmdb;
use crate::store::{InstanceSource, InstanceStore};
use crate::types::model::Record;
use crate::types::{
    CmdbError, DocumentExt, InstAssociation, InstId, Mapping, ModelAssociation, OnDelete,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Every instance association touching one of `ids` of `obj_id`, on either side.
fn touching(obj_id: &str, ids: &[InstId]) -> Filter {
    let as_source = Filter::eq(FIELD_OBJ_ID, obj_id)
        .and(Filter::is_in(FIELD_INST_ID, ids.iter().copied()));
    let as_destination = Filter::eq(FIELD_ASST_OBJ_ID, obj_id)
        .and(Filter::is_in(FIELD_ASST_INST_ID, ids.iter().copied()));
    as_source.or(as_destination)
}

/// A user-defined association between two objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAssociation {
    pub obj_id: String,
    pub asst_obj_id: String,
    pub asst_kind: String,
    pub mapping: Mapping,
    #[serde(default)]
    pub on_delete: OnDelete,
}

impl<S: InstanceStore, A: AuditLog> Cmdb<S, A> {
    // =========================================================================
    // INSTANCE ASSOCIATIONS
    // =========================================================================

    /// Check that linking `src` to `dst` under `obj_asst_id` is allowed.
    pub fn validate_before_create_inst_association(
        &self,
        obj_asst_id: &str,
        src: InstId,
        dst: InstId,
    ) -> Result<ModelAssociation, CmdbError> {
        let model = self
            .store()
            .read_model_association(obj_asst_id)?
            .ok_or_else(|| CmdbError::ObjectAssociationNotExist(obj_asst_id.to_string()))?;
        if model.is_mainline() {
            return Err(CmdbError::AssociationKindMainlineUnavailable);
        }
        self.get_instance(&model.obj_id, src)?;
        self.get_instance(&model.asst_obj_id, dst)?;

        let edges = collection::<InstAssociation>();
        let same = Filter::eq(FIELD_OBJ_ASST_ID, obj_asst_id);
        let exact = same
            .clone()
            .and(Filter::eq(FIELD_INST_ID, src))
            .and(Filter::eq(FIELD_ASST_INST_ID, dst));
        if self.store().count(&edges, &exact)? > 0 {
            return Err(CmdbError::DuplicateItem(format!("{obj_asst_id} {src}->{dst}")));
        }

        match model.mapping {
            Mapping::OneToOne => {
                let taken = Filter::eq(FIELD_INST_ID, src).or(Filter::eq(FIELD_ASST_INST_ID, dst));
                if self.store().count(&edges, &same.and(taken))? > 0 {
                    return Err(CmdbError::CreateMultipleInstancesForOneToOneAssociation(
                        obj_asst_id.to_string(),
                    ));
                }
            }
            Mapping::OneToMany => {
                let taken = same.and(Filter::eq(FIELD_ASST_INST_ID, dst));
                if self.store().count(&edges, &taken)? > 0 {
                    return Err(CmdbError::CreateMultipleInstancesForOneToManyAssociation(
                        obj_asst_id.to_string(),
                    ));
                }
            }
            Mapping::ManyToMany => {}
        }
        Ok(model)
    }

    /// Link two instances under a model association.
    pub fn create_inst_association(
        &mut self,
        obj_asst_id: &str,
        src: InstId,
        dst: InstId,
    ) -> Result<InstAssociation, CmdbError> {
        let model = self.validate_before_create_inst_association(obj_asst_id, src, dst)?;
        let source_doc = self.get_instance(&model.obj_id, src)?;
        let edge = InstAssociation {
            id: 0,
            obj_asst_id: model.obj_asst_id.clone(),
            asst_kind: model.asst_kind.clone(),
            obj_id: model.obj_id.clone(),
            inst_id: src,
            asst_obj_id: model.asst_obj_id.clone(),
            asst_inst_id: dst,
            biz_id: source_doc.int(FIELD_BIZ_ID).unwrap_or(0),
        };
        let doc = self.store_mut().create_record(&edge)?;
        self.record_audit(AuditAction::Create, TABLE_INST_ASSOCIATIONS, &[doc.clone()])?;
        InstAssociation::from_document(&doc)
    }

    /// Remove one instance association by row id.
    pub fn delete_inst_association(&mut self, id: i64) -> Result<u64, CmdbError> {
        let deleted = self
            .store_mut()
            .delete_records::<InstAssociation>(&Filter::eq(FIELD_ID, id))?;
        self.record_audit(AuditAction::Delete, TABLE_INST_ASSOCIATIONS, &deleted)?;
        Ok(deleted.len() as u64)
    }

    /// Instance associations touching one instance, either side.
    pub fn read_inst_associations(
        &self,
        obj_id: &str,
        id: InstId,
    ) -> Result<Vec<InstAssociation>, CmdbError> {
        self.store().read_records(&touching(obj_id, &[id]))
    }

    /// Remove every instance association touching the given instances.
    pub fn delete_instance_associations(
        &mut self,
        obj_id: &str,
        ids: &[InstId],
    ) -> Result<u64, CmdbError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let deleted = self
            .store_mut()
            .delete_records::<InstAssociation>(&touching(obj_id, ids))?;
        self.record_audit(AuditAction::Delete, TABLE_INST_ASSOCIATIONS, &deleted)?;
        Ok(deleted.len() as u64)
    }

    // =========================================================================
    // DELETION GUARDS
    // =========================================================================

    /// Check that the given instances may be deleted: no live associations,
    /// and no hosts anywhere below a mainline instance.
    pub fn validate_before_delete_instances(
        &mut self,
        obj_id: &str,
        ids: &[InstId],
    ) -> Result<(), CmdbError> {
        self.check_instance_associations(obj_id, ids)?;
        self.ensure_no_hosts(obj_id, ids)
    }

    /// Prune dangling edges of the instances, then refuse if a live one remains.
    pub(crate) fn check_instance_associations(
        &mut self,
        obj_id: &str,
        ids: &[InstId],
    ) -> Result<(), CmdbError> {
        if ids.is_empty() {
            return Ok(());
        }
        let edges: Vec<InstAssociation> = self.store().read_records(&touching(obj_id, ids))?;
        if edges.is_empty() {
            return Ok(());
        }

        let mut dangling = Vec::new();
        let mut blocking = None;
        for edge in &edges {
            let outgoing = edge.obj_id == obj_id && ids.contains(&edge.inst_id);
            let (own, other_obj, other_id) = if outgoing {
                (edge.inst_id, edge.asst_obj_id.as_str(), edge.asst_inst_id)
            } else {
                (edge.asst_inst_id, edge.obj_id.as_str(), edge.inst_id)
            };
            let goes_too = other_obj == obj_id && ids.contains(&other_id);
            let source = InstanceSource::of(other_obj);
            let alive = !goes_too
                && source.count(self.store(), &Filter::eq(source.id_field(), other_id))? > 0;
            if alive {
                blocking.get_or_insert(own);
            } else {
                dangling.push(edge.id);
            }
        }

        if !dangling.is_empty() {
            warn!(obj = obj_id, edges = dangling.len(), "pruning dangling instance associations");
            let pruned = self
                .store_mut()
                .delete_records::<InstAssociation>(&Filter::is_in(FIELD_ID, dangling))?;
            self.record_audit(AuditAction::Delete, TABLE_INST_ASSOCIATIONS, &pruned)?;
        }
        match blocking {
            Some(id) => Err(CmdbError::InstHasAssociation {
                obj_id: obj_id.to_string(),
                id,
            }),
            None => Ok(()),
        }
    }

    /// Refuse when any module at or below the instances holds a host.
    pub(crate) fn ensure_no_hosts(&self, obj_id: &str, ids: &[InstId]) -> Result<(), CmdbError> {
        if ids.is_empty() {
            return Ok(());
        }
        let module_ids = if obj_id == MODULE {
            ids.to_vec()
        } else {
            let chain = self.get_mainline_chain(BIZ)?;
            if !chain.contains(obj_id) {
                return Ok(());
            }
            let mut parents = ids.to_vec();
            let mut parent_obj = obj_id;
            for child in chain.below(obj_id) {
                parents = InstanceSource::of(child).ids(
                    self.store(),
                    &chain.children_filter(parent_obj, child, parents.iter().copied()),
                )?;
                if parents.is_empty() {
                    return Ok(());
                }
                parent_obj = child.as_str();
            }
            parents
        };
        let hosted = Filter::is_in(FIELD_MODULE_ID, module_ids.iter().copied());
        if self.store().count(&module_host(), &hosted)? > 0 {
            return Err(CmdbError::HasHost(format!("{obj_id} {}", join_ids(ids))));
        }
        Ok(())
    }

    // =========================================================================
    // MODEL ASSOCIATIONS
    // =========================================================================

    /// Create a user-defined model association.
    pub fn create_common_association(
        &mut self,
        request: &NewAssociation,
    ) -> Result<ModelAssociation, CmdbError> {
        for (field, value) in [
            (FIELD_OBJ_ID, &request.obj_id),
            (FIELD_ASST_OBJ_ID, &request.asst_obj_id),
            (FIELD_ASST_ID, &request.asst_kind),
        ] {
            if value.is_empty() {
                return Err(CmdbError::ParamsNeedSet(field.to_string()));
            }
        }
        if request.asst_kind == MAINLINE_KIND {
            return Err(CmdbError::AssociationKindMainlineUnavailable);
        }
        if self
            .store()
            .read_association_kinds(&Filter::eq(
                FIELD_ASST_ID,
                request.asst_kind.as_str(),
            ))?
            .is_empty()
        {
            return Err(CmdbError::ParamsInvalid(
                FIELD_ASST_ID.to_string(),
            ));
        }
        self.store().require_model(&request.obj_id)?;
        self.store().require_model(&request.asst_obj_id)?;

        let obj_asst_id =
            ModelAssociation::derive_id(&request.obj_id, &request.asst_kind, &request.asst_obj_id);
        if self.store().read_model_association(&obj_asst_id)?.is_some() {
            return Err(CmdbError::AssociationAlreadyExist {
                obj_id: request.obj_id.clone(),
                asst_obj_id: request.asst_obj_id.clone(),
            });
        }

        let created = self.store_mut().create_model_association(&ModelAssociation {
            id: 0,
            obj_asst_id,
            obj_id: request.obj_id.clone(),
            asst_obj_id: request.asst_obj_id.clone(),
            asst_kind: request.asst_kind.clone(),
            mapping: request.mapping,
            on_delete: request.on_delete,
            is_pre: false,
        })?;
        self.record_audit(
            AuditAction::Create,
            TABLE_MODEL_ASSOCIATIONS,
            &[created.to_document()],
        )?;
        debug!(asst = %created.obj_asst_id, "model association created");
        Ok(created)
    }

    /// Check that a model association may be deleted.
    pub fn validate_model_association_deletable(
        &self,
        id: i64,
    ) -> Result<ModelAssociation, CmdbError> {
        let model = self
            .store()
            .read_model_associations(&Filter::eq(FIELD_ID, id))?
            .into_iter()
            .next()
            .ok_or_else(|| CmdbError::ObjectAssociationNotExist(id.to_string()))?;
        if model.is_pre {
            return Err(CmdbError::DeletePredefinedAssociation(model.obj_asst_id));
        }
        if model.is_mainline() {
            return Err(CmdbError::AssociationKindMainlineUnavailable);
        }
        let used = Filter::eq(FIELD_OBJ_ASST_ID, model.obj_asst_id.as_str());
        if self.store().count(&collection::<InstAssociation>(), &used)? > 0 {
            return Err(CmdbError::AssociationHasAlreadyBeenInstantiated(
                model.obj_asst_id,
            ));
        }
        Ok(model)
    }

    /// Delete a user-defined model association by row id.
    pub fn delete_common_association(&mut self, id: i64) -> Result<(), CmdbError> {
        self.validate_model_association_deletable(id)?;
        let deleted = self.store_mut().delete_model_association(id)?;
        self.record_audit(AuditAction::Delete, TABLE_MODEL_ASSOCIATIONS, &deleted)
    }
}
