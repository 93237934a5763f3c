//! # Instance Operations
//!
//! Generic create, read, update and delete of instances of any object,
//! keeping the mainline shape intact:
//! - a mainline instance always names an existing parent of the right type
//! - names are unique among siblings
//! - deleting an instance takes its whole mainline subtree with it, and is
//!   refused while hosts or live associations hang below it
//!
//! Hosts are placed into modules through module-host relations.

use crate::audit::{AuditAction, AuditLog};
use crate::filter::Filter;
use crate::mainline::MainlineChain;
use crate::primitives::{
    BIZ, DATA_STATUS_ENABLE, DEFAULT_FLAG_NORMAL, DEFAULT_FLAG_RESOURCE, FIELD_BIZ_ID,
    FIELD_DATA_STATUS, FIELD_DEFAULT, FIELD_HOST_ID, FIELD_MODULE_ID, FIELD_OBJ_ID,
    FIELD_PARENT_ID, FIELD_SET_ID, HOST, MODULE, SET, TABLE_MODULE_HOST,
};
use crate::registry::ModelRegistry;
use crate::service::Cmdb;
use crate::store::{Collection, FindResult, InstanceSource, InstanceStore, Page};
use crate::types::{CmdbError, Document, DocumentExt, InstId, Value, document};
use std::collections::BTreeMap;
use tracing::debug;

/// Module-host relation table.
pub(crate) fn module_host() -> Collection {
    Collection::table(TABLE_MODULE_HOST)
}

pub(crate) fn join_ids(ids: &[InstId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

impl<S: InstanceStore, A: AuditLog> Cmdb<S, A> {
    /// One instance by id, or `InstanceNotFound`.
    pub fn get_instance(&self, obj_id: &str, id: InstId) -> Result<Document, CmdbError> {
        let source = InstanceSource::of(obj_id);
        source
            .find(self.store(), &Filter::eq(source.id_field(), id), &Page::window(0, 1))?
            .rows
            .into_iter()
            .next()
            .ok_or_else(|| CmdbError::InstanceNotFound {
                obj_id: obj_id.to_string(),
                id,
            })
    }

    pub fn find_instances(
        &self,
        obj_id: &str,
        filter: &Filter,
        page: &Page,
    ) -> Result<FindResult, CmdbError> {
        self.store().require_model(obj_id)?;
        InstanceSource::of(obj_id).find(self.store(), filter, page)
    }

    /// Create one instance.
    ///
    /// Mainline instances need `bk_parent_id`; an idle set (`default` = 1)
    /// always sits directly under its business. `bk_biz_id` is derived
    /// from the parent.
    pub fn create_instance(&mut self, obj_id: &str, mut doc: Document) -> Result<InstId, CmdbError> {
        self.store().require_model(obj_id)?;
        let source = InstanceSource::of(obj_id);
        let name = match doc.text(source.name_field()) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => return Err(CmdbError::ParamsNeedSet(source.name_field().to_string())),
        };
        doc.remove(source.id_field());

        let chain = self.get_mainline_chain(BIZ)?;
        if obj_id == BIZ {
            if source.count(self.store(), &Filter::eq(source.name_field(), name.as_str()))? > 0 {
                return Err(CmdbError::DuplicateItem(name));
            }
            doc.entry(FIELD_DEFAULT.to_string())
                .or_insert(Value::Int(DEFAULT_FLAG_NORMAL));
            doc.entry(FIELD_DATA_STATUS.to_string())
                .or_insert_with(|| DATA_STATUS_ENABLE.into());
        } else if obj_id != HOST && chain.contains(obj_id) {
            self.place_under_parent(&chain, obj_id, &name, &mut doc)?;
        }

        let id = source.create(self.store_mut(), doc.clone())?;
        doc.insert(source.id_field().to_string(), id.into());
        if source.is_custom() {
            doc.insert(FIELD_OBJ_ID.to_string(), obj_id.into());
        }
        self.record_audit(AuditAction::Create, obj_id, &[doc])?;
        debug!(obj = obj_id, %id, "instance created");
        Ok(id)
    }

    /// Validate the parent of a mainline instance and stamp the derived fields.
    fn place_under_parent(
        &self,
        chain: &MainlineChain,
        obj_id: &str,
        name: &str,
        doc: &mut Document,
    ) -> Result<(), CmdbError> {
        let parent_obj = if obj_id == SET && doc.int(FIELD_DEFAULT) == Some(DEFAULT_FLAG_RESOURCE)
        {
            BIZ
        } else {
            chain
                .parent_of(obj_id)
                .ok_or_else(|| CmdbError::MainlineObjectAssociationNotExist(obj_id.to_string()))?
        };
        let parent_id = doc
            .int(FIELD_PARENT_ID)
            .map(InstId)
            .ok_or_else(|| CmdbError::ParamsNeedSet(FIELD_PARENT_ID.to_string()))?;
        let parent = self.get_instance(parent_obj, parent_id)?;

        let biz_id = if parent_obj == BIZ {
            parent_id.0
        } else {
            parent.int(FIELD_BIZ_ID).unwrap_or(0)
        };
        doc.insert(FIELD_BIZ_ID.to_string(), Value::Int(biz_id));
        doc.entry(FIELD_DEFAULT.to_string())
            .or_insert(Value::Int(DEFAULT_FLAG_NORMAL));
        if obj_id == MODULE {
            let set_id = self.enclosing_set(chain, parent_obj, &parent)?;
            doc.insert(FIELD_SET_ID.to_string(), Value::Int(set_id));
        }

        let source = InstanceSource::of(obj_id);
        let siblings = chain
            .children_filter(parent_obj, obj_id, [parent_id])
            .and(Filter::eq(source.name_field(), name));
        if source.count(self.store(), &siblings)? > 0 {
            return Err(CmdbError::DuplicateItem(name.to_string()));
        }
        Ok(())
    }

    /// Id of the set above a module's parent.
    fn enclosing_set(
        &self,
        chain: &MainlineChain,
        parent_obj: &str,
        parent: &Document,
    ) -> Result<i64, CmdbError> {
        let mut obj = parent_obj.to_string();
        let mut doc = parent.clone();
        for _ in 0..chain.len() {
            if obj == SET {
                return doc.require_int(FIELD_SET_ID);
            }
            let Some(up) = chain.parent_of(&obj) else {
                break;
            };
            let up = up.to_string();
            doc = self.get_instance(&up, doc.inst_id(FIELD_PARENT_ID)?)?;
            obj = up;
        }
        Err(CmdbError::MainlineObjectAssociationNotExist(SET.to_string()))
    }

    /// Patch every matching instance. Ids and placement fields are fixed.
    pub fn update_instances(
        &mut self,
        obj_id: &str,
        filter: &Filter,
        patch: &Document,
    ) -> Result<u64, CmdbError> {
        self.store().require_model(obj_id)?;
        let source = InstanceSource::of(obj_id);
        for field in [source.id_field(), FIELD_PARENT_ID, FIELD_OBJ_ID, FIELD_BIZ_ID] {
            if patch.contains_key(field) {
                return Err(CmdbError::ParamsInvalid(field.to_string()));
            }
        }

        let targets = source.find_all(self.store(), filter)?;
        if targets.is_empty() {
            return Ok(0);
        }
        if let Some(value) = patch.get(source.name_field()) {
            let name = match value.as_str() {
                Some(name) if !name.is_empty() => name,
                _ => return Err(CmdbError::ParamsInvalid(source.name_field().to_string())),
            };
            self.check_rename(&source, &targets, name)?;
        }

        let touched = source.update(self.store_mut(), filter, patch)?;
        let ids: Vec<InstId> = targets
            .iter()
            .filter_map(|d| d.int(source.id_field()).map(InstId))
            .collect();
        let after = source.find_all(self.store(), &source.ids_filter(&ids))?;
        self.record_audit(AuditAction::Update, obj_id, &after)?;
        Ok(touched)
    }

    /// A rename must not make two siblings share a name.
    fn check_rename(
        &self,
        source: &InstanceSource,
        targets: &[Document],
        name: &str,
    ) -> Result<(), CmdbError> {
        let chain = self.get_mainline_chain(BIZ)?;
        let parent_obj = |doc: &Document| {
            if source.obj_id() == SET && doc.int(FIELD_DEFAULT) == Some(DEFAULT_FLAG_RESOURCE) {
                BIZ
            } else {
                chain.parent_of(source.obj_id()).unwrap_or_default()
            }
        };
        let sibling_scope = |doc: &Document| {
            if source.obj_id() == BIZ {
                Filter::All
            } else {
                chain.children_filter(
                    parent_obj(doc),
                    source.obj_id(),
                    [doc.int(FIELD_PARENT_ID).unwrap_or(0)],
                )
            }
        };
        let mut per_parent: BTreeMap<Option<(&str, i64)>, usize> = BTreeMap::new();
        for doc in targets {
            let key = (source.obj_id() != BIZ)
                .then(|| (parent_obj(doc), doc.int(FIELD_PARENT_ID).unwrap_or(0)));
            let renamed = per_parent.entry(key).or_default();
            *renamed = renamed.saturating_add(1);
            if *renamed > 1 {
                return Err(CmdbError::DuplicateItem(name.to_string()));
            }
            let id = doc.int(source.id_field()).unwrap_or(0);
            let clash = sibling_scope(doc)
                .and(Filter::eq(source.name_field(), name))
                .and(Filter::ne(source.id_field(), id));
            if source.count(self.store(), &clash)? > 0 {
                return Err(CmdbError::DuplicateItem(name.to_string()));
            }
        }
        Ok(())
    }

    /// Delete instances together with their mainline subtrees.
    ///
    /// Businesses go through [`Cmdb::delete_business`]; idle sets and
    /// modules go with their business.
    pub fn delete_instances(&mut self, obj_id: &str, ids: &[InstId]) -> Result<u64, CmdbError> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.store().require_model(obj_id)?;
        if obj_id == BIZ {
            return Err(CmdbError::ForbiddenOperateBuiltIn(BIZ.to_string()));
        }
        let source = InstanceSource::of(obj_id);
        let existing = source.find_all(self.store(), &source.ids_filter(ids))?;
        if existing.is_empty() {
            return Ok(0);
        }
        if obj_id == SET || obj_id == MODULE {
            if let Some(doc) = existing
                .iter()
                .find(|d| d.int(FIELD_DEFAULT).is_some_and(|flag| flag != DEFAULT_FLAG_NORMAL))
            {
                return Err(CmdbError::ForbiddenOperateBuiltIn(format!(
                    "{obj_id} {}",
                    doc.int(source.id_field()).unwrap_or(0)
                )));
            }
        }
        let ids: Vec<InstId> = existing
            .iter()
            .filter_map(|d| d.int(source.id_field()).map(InstId))
            .collect();

        let chain = self.get_mainline_chain(BIZ)?;
        let mut plan = vec![(obj_id.to_string(), ids.clone())];
        if chain.contains(obj_id) {
            let mut parents = ids.clone();
            let mut parent_obj = obj_id;
            for child in chain.below(obj_id) {
                let child_ids = InstanceSource::of(child).ids(
                    self.store(),
                    &chain.children_filter(parent_obj, child, parents.iter().copied()),
                )?;
                if child_ids.is_empty() {
                    break;
                }
                plan.push((child.clone(), child_ids.clone()));
                parents = child_ids;
                parent_obj = child.as_str();
            }
        }

        for (obj, level_ids) in &plan {
            self.validate_before_delete_instances(obj, level_ids)?;
        }

        let mut removed = 0_u64;
        for (obj, level_ids) in plan.iter().rev() {
            removed = removed.saturating_add(self.purge_instances(obj, level_ids)?);
        }
        if obj_id == HOST {
            self.store_mut().delete(
                &module_host(),
                &Filter::is_in(FIELD_HOST_ID, ids.iter().copied()),
            )?;
        }
        debug!(obj = obj_id, ids = %join_ids(&ids), removed, "instances deleted");
        Ok(removed)
    }

    /// Delete instances and audit them. No checks.
    pub(crate) fn purge_instances(&mut self, obj_id: &str, ids: &[InstId]) -> Result<u64, CmdbError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let source = InstanceSource::of(obj_id);
        let filter = source.ids_filter(ids);
        let docs = source.find_all(self.store(), &filter)?;
        if docs.is_empty() {
            return Ok(0);
        }
        let removed = source.delete(self.store_mut(), &filter)?;
        self.record_audit(AuditAction::Delete, obj_id, &docs)?;
        Ok(removed)
    }

    // =========================================================================
    // HOST PLACEMENT
    // =========================================================================

    /// Place a host into a module. Placing it twice is a no-op.
    pub fn assign_host(&mut self, host_id: InstId, module_id: InstId) -> Result<(), CmdbError> {
        self.get_instance(HOST, host_id)?;
        let module = self.get_instance(MODULE, module_id)?;
        let placed = Filter::eq(FIELD_HOST_ID, host_id).and(Filter::eq(FIELD_MODULE_ID, module_id));
        if self.store().count(&module_host(), &placed)? > 0 {
            return Ok(());
        }
        let relation = document([
            (FIELD_HOST_ID, Value::from(host_id)),
            (FIELD_MODULE_ID, Value::from(module_id)),
            (FIELD_SET_ID, Value::Int(module.int(FIELD_SET_ID).unwrap_or(0))),
            (FIELD_BIZ_ID, Value::Int(module.int(FIELD_BIZ_ID).unwrap_or(0))),
        ]);
        self.store_mut().create(&module_host(), relation.clone())?;
        self.record_audit(AuditAction::Create, TABLE_MODULE_HOST, &[relation])
    }

    /// Take a host out of a module.
    pub fn unassign_host(&mut self, host_id: InstId, module_id: InstId) -> Result<u64, CmdbError> {
        let placed = Filter::eq(FIELD_HOST_ID, host_id).and(Filter::eq(FIELD_MODULE_ID, module_id));
        let relations = self.store().find_all(&module_host(), &placed)?;
        if relations.is_empty() {
            return Ok(0);
        }
        let removed = self.store_mut().delete(&module_host(), &placed)?;
        self.record_audit(AuditAction::Delete, TABLE_MODULE_HOST, &relations)?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditTrail;
    use crate::storage::MemoryStore;

    fn engine() -> Cmdb<MemoryStore, AuditTrail> {
        let mut cmdb = Cmdb::new(MemoryStore::new(), AuditTrail::new());
        cmdb.bootstrap().expect("bootstrap");
        cmdb
    }

    fn named(field: &str, name: &str, parent: InstId) -> Document {
        document([
            (field, Value::from(name)),
            (FIELD_PARENT_ID, Value::from(parent)),
        ])
    }

    #[test]
    fn mainline_instances_need_existing_parent() {
        let mut cmdb = engine();
        let err = cmdb.create_instance(SET, named("bk_set_name", "web", InstId(999)));
        assert!(matches!(err, Err(CmdbError::InstanceNotFound { .. })));

        let err = cmdb.create_instance(SET, document([("bk_set_name", "web")]));
        assert!(matches!(err, Err(CmdbError::ParamsNeedSet(f)) if f == FIELD_PARENT_ID));
    }

    #[test]
    fn sibling_names_are_unique() {
        let mut cmdb = engine();
        let biz = cmdb.create_business("shop", Document::new()).expect("biz");
        cmdb.create_instance(SET, named("bk_set_name", "web", biz.biz_id))
            .expect("first");
        let err = cmdb.create_instance(SET, named("bk_set_name", "web", biz.biz_id));
        assert!(matches!(err, Err(CmdbError::DuplicateItem(_))));
    }

    #[test]
    fn module_inherits_business_and_set() {
        let mut cmdb = engine();
        let biz = cmdb.create_business("shop", Document::new()).expect("biz");
        let set = cmdb
            .create_instance(SET, named("bk_set_name", "web", biz.biz_id))
            .expect("set");
        let module = cmdb
            .create_instance(MODULE, named("bk_module_name", "nginx", set))
            .expect("module");
        let doc = cmdb.get_instance(MODULE, module).expect("module");
        assert_eq!(doc.int(FIELD_BIZ_ID), Some(biz.biz_id.0));
        assert_eq!(doc.int(FIELD_SET_ID), Some(set.0));
    }

    #[test]
    fn delete_cascades_and_respects_hosts() {
        let mut cmdb = engine();
        let biz = cmdb.create_business("shop", Document::new()).expect("biz");
        let set = cmdb
            .create_instance(SET, named("bk_set_name", "web", biz.biz_id))
            .expect("set");
        let module = cmdb
            .create_instance(MODULE, named("bk_module_name", "nginx", set))
            .expect("module");
        let host = cmdb
            .create_instance(HOST, document([("bk_host_innerip", "10.0.0.1")]))
            .expect("host");
        cmdb.assign_host(host, module).expect("assign");

        let err = cmdb.delete_instances(SET, &[set]);
        assert!(matches!(err, Err(CmdbError::HasHost(_))));

        cmdb.unassign_host(host, module).expect("unassign");
        assert_eq!(cmdb.delete_instances(SET, &[set]).expect("delete"), 2);
        assert!(cmdb.get_instance(MODULE, module).is_err());
    }

    #[test]
    fn idle_pool_and_business_are_not_deleted_directly() {
        let mut cmdb = engine();
        let biz = cmdb.create_business("shop", Document::new()).expect("biz");
        let err = cmdb.delete_instances(SET, &[biz.idle_set_id]);
        assert!(matches!(err, Err(CmdbError::ForbiddenOperateBuiltIn(_))));
        let err = cmdb.delete_instances(BIZ, &[biz.biz_id]);
        assert!(matches!(err, Err(CmdbError::ForbiddenOperateBuiltIn(_))));
    }

    #[test]
    fn update_refuses_placement_fields_and_name_clash() {
        let mut cmdb = engine();
        let biz = cmdb.create_business("shop", Document::new()).expect("biz");
        let web = cmdb
            .create_instance(SET, named("bk_set_name", "web", biz.biz_id))
            .expect("set");
        cmdb.create_instance(SET, named("bk_set_name", "db", biz.biz_id))
            .expect("set");

        let err = cmdb.update_instances(
            SET,
            &Filter::eq(FIELD_SET_ID, web),
            &document([(FIELD_PARENT_ID, 1)]),
        );
        assert!(matches!(err, Err(CmdbError::ParamsInvalid(_))));

        let err = cmdb.update_instances(
            SET,
            &Filter::eq(FIELD_SET_ID, web),
            &document([("bk_set_name", "db")]),
        );
        assert!(matches!(err, Err(CmdbError::DuplicateItem(_))));

        let touched = cmdb
            .update_instances(
                SET,
                &Filter::eq(FIELD_SET_ID, web),
                &document([("bk_set_name", "frontend")]),
            )
            .expect("rename");
        assert_eq!(touched, 1);
        assert_eq!(
            cmdb.audit().of(AuditAction::Update, SET).count(),
            1
        );
    }

    #[test]
    fn find_requires_known_object() {
        let cmdb = engine();
        let err = cmdb.find_instances("nothing", &Filter::All, &Page::all());
        assert!(matches!(err, Err(CmdbError::ObjectNotFound(_))));
        let pools = cmdb
            .find_instances(BIZ, &Filter::All, &Page::all())
            .expect("find");
        assert_eq!(pools.count, 1);
    }
}
