//! # Business Lifecycle
//!
//! Creating a business seeds its idle pool: one idle set holding the idle,
//! fault and recycle modules plus any extra modules the configuration
//! names. A business is archived before it can be deleted.
//!
//! ## Teardown stages
//!
//! | # | Stage | Removes |
//! |---|-------|---------|
//! | 1 | Precheck | nothing; refuses built-in, unarchived or hosting businesses |
//! | 2 | DynamicGroups | dynamic groups |
//! | 3 | Processes | processes, their associations and relations |
//! | 4 | ServiceInstances | service instances |
//! | 5 | Modules | modules |
//! | 6 | Sets | sets |
//! | 7 | CustomTopology | custom-level instances, nearest the business first |
//! | 8 | Templates | set, process and service templates, service categories |
//! | 9 | Business | business-scoped attributes and groups, then the business |
//!
//! Every stage works in batches of the configured page size and finds
//! nothing to do on a re-run, so a teardown stopped by a failure can simply
//! be started again.

use crate::audit::{AuditAction, AuditLog};
use crate::filter::Filter;
use crate::instance::module_host;
use crate::primitives::{
    BIZ, DATA_STATUS_DISABLED, DATA_STATUS_ENABLE, DEFAULT_FLAG_FAULT_MODULE,
    DEFAULT_FLAG_IDLE_MODULE, DEFAULT_FLAG_NORMAL, DEFAULT_FLAG_RECYCLE_MODULE,
    DEFAULT_FLAG_RESOURCE, DEFAULT_FLAG_USER_MODULE, FIELD_BIZ_ID, FIELD_BIZ_NAME,
    FIELD_DATA_STATUS, FIELD_DEFAULT, FIELD_ID, FIELD_MODULE_NAME, FIELD_PARENT_ID,
    FIELD_PROCESS_ID, FIELD_SERVICE_CATEGORY_ID, FIELD_SERVICE_TEMPLATE_ID, FIELD_SET_NAME,
    FIELD_SET_TEMPLATE_ID, MODULE, PROCESS, SET, TABLE_ATTRIBUTES, TABLE_ATTRIBUTE_GROUPS,
    TABLE_DYNAMIC_GROUPS, TABLE_PROCESS_RELATIONS, TABLE_PROCESS_TEMPLATES,
    TABLE_SERVICE_CATEGORIES, TABLE_SERVICE_INSTANCES, TABLE_SERVICE_TEMPLATES,
    TABLE_SET_SERVICE_TEMPLATE_RELATIONS, TABLE_SET_TEMPLATES,
};
use crate::registry::ModelRegistry;
use crate::service::Cmdb;
use crate::store::{Collection, InstanceSource, InstanceStore};
use crate::types::{
    Attribute, AttributeGroup, CmdbError, Document, DocumentExt, InstId, Value, document,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, info};

const CREATE_BUSINESS: &str = "create business";
const DELETE_BUSINESS: &str = "delete business";

// =============================================================================
// TYPES
// =============================================================================

/// Ids created for a new business.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessSkeleton {
    pub biz_id: InstId,
    pub idle_set_id: InstId,
    /// `(default flag, module id)` of every idle-pool module.
    pub modules: Vec<(i64, InstId)>,
}

impl BusinessSkeleton {
    /// First idle-pool module carrying `flag`.
    #[must_use]
    pub fn module(&self, flag: i64) -> Option<InstId> {
        self.modules
            .iter()
            .find(|(f, _)| *f == flag)
            .map(|(_, id)| *id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CreateStage {
    IdleSet,
    IdleModules,
}

impl fmt::Display for CreateStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CreateStage::IdleSet => "idle set",
            CreateStage::IdleModules => "idle modules",
        })
    }
}

/// Stages of a business teardown, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DeleteStage {
    Precheck,
    DynamicGroups,
    Processes,
    ServiceInstances,
    Modules,
    Sets,
    CustomTopology,
    Templates,
    Business,
}

impl DeleteStage {
    /// Stages that remove data, in order.
    pub const CLEANUP: [DeleteStage; 8] = [
        DeleteStage::DynamicGroups,
        DeleteStage::Processes,
        DeleteStage::ServiceInstances,
        DeleteStage::Modules,
        DeleteStage::Sets,
        DeleteStage::CustomTopology,
        DeleteStage::Templates,
        DeleteStage::Business,
    ];

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            DeleteStage::Precheck => "precheck",
            DeleteStage::DynamicGroups => "dynamic groups",
            DeleteStage::Processes => "processes",
            DeleteStage::ServiceInstances => "service instances",
            DeleteStage::Modules => "modules",
            DeleteStage::Sets => "sets",
            DeleteStage::CustomTopology => "custom topology",
            DeleteStage::Templates => "templates",
            DeleteStage::Business => "business",
        }
    }

    /// Position in the teardown, starting at 1.
    #[must_use]
    pub fn number(&self) -> u8 {
        match self {
            DeleteStage::Precheck => 1,
            DeleteStage::DynamicGroups => 2,
            DeleteStage::Processes => 3,
            DeleteStage::ServiceInstances => 4,
            DeleteStage::Modules => 5,
            DeleteStage::Sets => 6,
            DeleteStage::CustomTopology => 7,
            DeleteStage::Templates => 8,
            DeleteStage::Business => 9,
        }
    }
}

impl fmt::Display for DeleteStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.number(), self.name())
    }
}

/// Documents removed per stage for one business.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessTeardown {
    pub biz_id: InstId,
    pub deleted: Vec<(DeleteStage, u64)>,
}

impl BusinessTeardown {
    #[must_use]
    pub fn count(&self, stage: DeleteStage) -> u64 {
        self.deleted
            .iter()
            .filter(|(s, _)| *s == stage)
            .map(|(_, n)| *n)
            .sum()
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.deleted.iter().map(|(_, n)| *n).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TeardownReport {
    pub businesses: Vec<BusinessTeardown>,
}

fn table(name: &'static str) -> Collection {
    Collection::table(name)
}

/// Order categories so every child precedes its parent.
fn children_first(categories: &[Document]) -> Vec<InstId> {
    let ids: BTreeSet<i64> = categories.iter().filter_map(|c| c.int(FIELD_ID)).collect();
    let mut children: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
    for category in categories {
        if let (Some(id), Some(parent)) = (category.int(FIELD_ID), category.int(FIELD_PARENT_ID)) {
            if ids.contains(&parent) && parent != id {
                children.entry(parent).or_default().push(id);
            }
        }
    }

    // Iterative post-order over (id, expanded) from every category, so
    // members of a parent cycle are still emitted once.
    let mut order = Vec::with_capacity(ids.len());
    let mut visited = BTreeSet::new();
    let mut stack: Vec<(i64, bool)> = ids.iter().rev().map(|&id| (id, false)).collect();
    while let Some((id, expanded)) = stack.pop() {
        if expanded {
            order.push(InstId(id));
            continue;
        }
        if !visited.insert(id) {
            continue;
        }
        stack.push((id, true));
        for &child in children.get(&id).into_iter().flatten() {
            if !visited.contains(&child) {
                stack.push((child, false));
            }
        }
    }
    order
}

// =============================================================================
// OPERATIONS
// =============================================================================

impl<S: InstanceStore, A: AuditLog> Cmdb<S, A> {
    /// Create a business with its idle pool.
    pub fn create_business(
        &mut self,
        name: &str,
        extra: Document,
    ) -> Result<BusinessSkeleton, CmdbError> {
        self.create_business_with_flag(name, extra, DEFAULT_FLAG_NORMAL)
    }

    pub(crate) fn create_business_with_flag(
        &mut self,
        name: &str,
        mut extra: Document,
        flag: i64,
    ) -> Result<BusinessSkeleton, CmdbError> {
        if name.is_empty() {
            return Err(CmdbError::ParamsNeedSet(FIELD_BIZ_NAME.to_string()));
        }
        let category = self.default_service_category()?;
        let pool = self.config().idle_pool.clone();
        let extra_modules = self.config().extra_idle_modules.clone();

        extra.insert(FIELD_BIZ_NAME.to_string(), name.into());
        extra.insert(FIELD_DEFAULT.to_string(), Value::Int(flag));
        extra.insert(FIELD_DATA_STATUS.to_string(), DATA_STATUS_ENABLE.into());
        let biz_id = self.create_instance(BIZ, extra)?;

        let idle_set_id = self
            .create_instance(
                SET,
                document([
                    (FIELD_SET_NAME, Value::from(pool.set.as_str())),
                    (FIELD_PARENT_ID, Value::from(biz_id)),
                    (FIELD_DEFAULT, Value::Int(DEFAULT_FLAG_RESOURCE)),
                ]),
            )
            .map_err(|e| e.at_stage(CREATE_BUSINESS, CreateStage::IdleSet))?;

        let mut wanted = vec![
            (DEFAULT_FLAG_IDLE_MODULE, pool.idle_module),
            (DEFAULT_FLAG_FAULT_MODULE, pool.fault_module),
            (DEFAULT_FLAG_RECYCLE_MODULE, pool.recycle_module),
        ];
        wanted.extend(
            extra_modules
                .into_iter()
                .map(|name| (DEFAULT_FLAG_USER_MODULE, name)),
        );

        let mut modules = Vec::with_capacity(wanted.len());
        for (module_flag, module_name) in wanted {
            let id = self
                .create_instance(
                    MODULE,
                    document([
                        (FIELD_MODULE_NAME, Value::from(module_name)),
                        (FIELD_PARENT_ID, Value::from(idle_set_id)),
                        (FIELD_DEFAULT, Value::Int(module_flag)),
                        (FIELD_SERVICE_TEMPLATE_ID, Value::Int(0)),
                        (FIELD_SET_TEMPLATE_ID, Value::Int(0)),
                        (FIELD_SERVICE_CATEGORY_ID, Value::from(category)),
                    ]),
                )
                .map_err(|e| e.at_stage(CREATE_BUSINESS, CreateStage::IdleModules))?;
            modules.push((module_flag, id));
        }

        info!(biz = %biz_id, name, modules = modules.len(), "business created");
        Ok(BusinessSkeleton {
            biz_id,
            idle_set_id,
            modules,
        })
    }

    /// Mark a business disabled. It must not be built-in or hold hosts.
    pub fn archive_business(&mut self, biz_id: InstId) -> Result<(), CmdbError> {
        let doc = self.get_instance(BIZ, biz_id)?;
        if doc.int(FIELD_DEFAULT) == Some(DEFAULT_FLAG_RESOURCE) {
            return Err(CmdbError::ForbiddenOperateBuiltIn(format!("{BIZ} {biz_id}")));
        }
        if self
            .store()
            .count(&module_host(), &Filter::eq(FIELD_BIZ_ID, biz_id))?
            > 0
        {
            return Err(CmdbError::ArchiveBusinessHasHost(biz_id));
        }
        self.set_business_status(biz_id, &doc, DATA_STATUS_DISABLED)
    }

    /// Bring an archived business back.
    pub fn revive_business(&mut self, biz_id: InstId) -> Result<(), CmdbError> {
        let doc = self.get_instance(BIZ, biz_id)?;
        self.set_business_status(biz_id, &doc, DATA_STATUS_ENABLE)
    }

    fn set_business_status(
        &mut self,
        biz_id: InstId,
        doc: &Document,
        status: &str,
    ) -> Result<(), CmdbError> {
        if doc.text(FIELD_DATA_STATUS) == Some(status) {
            return Ok(());
        }
        let source = InstanceSource::of(BIZ);
        let filter = Filter::eq(source.id_field(), biz_id);
        source.update(
            self.store_mut(),
            &filter,
            &document([(FIELD_DATA_STATUS, status)]),
        )?;
        let after = source.find_all(self.store(), &filter)?;
        self.record_audit(AuditAction::Update, BIZ, &after)?;
        info!(biz = %biz_id, status, "business status changed");
        Ok(())
    }

    /// Tear down archived businesses and everything they own.
    ///
    /// Every business is prechecked before anything is removed. A business
    /// that no longer exists passes the precheck and its cleanup stages
    /// find nothing left.
    pub fn delete_business(&mut self, biz_ids: &[InstId]) -> Result<TeardownReport, CmdbError> {
        for &biz_id in biz_ids {
            self.precheck_business_delete(biz_id)?;
        }

        let mut report = TeardownReport::default();
        for &biz_id in biz_ids {
            let mut teardown = BusinessTeardown {
                biz_id,
                deleted: Vec::with_capacity(DeleteStage::CLEANUP.len()),
            };
            for stage in DeleteStage::CLEANUP {
                let removed = self
                    .run_delete_stage(stage, biz_id)
                    .map_err(|e| e.at_stage(DELETE_BUSINESS, format!("{stage} of biz {biz_id}")))?;
                debug!(biz = %biz_id, stage = stage.name(), removed, "teardown stage done");
                teardown.deleted.push((stage, removed));
            }
            info!(biz = %biz_id, removed = teardown.total(), "business deleted");
            report.businesses.push(teardown);
        }
        Ok(report)
    }

    fn precheck_business_delete(&self, biz_id: InstId) -> Result<(), CmdbError> {
        if biz_id.0 <= 0 {
            return Err(CmdbError::ParamsInvalid(FIELD_BIZ_ID.to_string()));
        }
        let source = InstanceSource::of(BIZ);
        let Some(doc) = source
            .find_all(self.store(), &Filter::eq(source.id_field(), biz_id))?
            .into_iter()
            .next()
        else {
            return Ok(());
        };
        if doc.int(FIELD_DEFAULT) == Some(DEFAULT_FLAG_RESOURCE) {
            return Err(CmdbError::ForbiddenDeleteBuiltInBiz(biz_id));
        }
        if doc.text(FIELD_DATA_STATUS) != Some(DATA_STATUS_DISABLED) {
            return Err(CmdbError::ForbiddenDeleteUnarchivedBiz(biz_id));
        }
        if self
            .store()
            .count(&module_host(), &Filter::eq(FIELD_BIZ_ID, biz_id))?
            > 0
        {
            return Err(CmdbError::HasHost(format!("{BIZ} {biz_id}")));
        }
        Ok(())
    }

    fn run_delete_stage(&mut self, stage: DeleteStage, biz_id: InstId) -> Result<u64, CmdbError> {
        let owned = Filter::eq(FIELD_BIZ_ID, biz_id);
        match stage {
            DeleteStage::Precheck => Ok(0),
            DeleteStage::DynamicGroups => self.purge_table(TABLE_DYNAMIC_GROUPS, &owned),
            DeleteStage::Processes => self.delete_business_processes(&owned),
            DeleteStage::ServiceInstances => self.purge_table(TABLE_SERVICE_INSTANCES, &owned),
            DeleteStage::Modules => self.delete_business_level(MODULE, &owned),
            DeleteStage::Sets => self.delete_business_level(SET, &owned),
            DeleteStage::CustomTopology => {
                let chain = self.get_mainline_chain(BIZ)?;
                if !chain.contains(SET) {
                    return Err(CmdbError::MainlineObjectAssociationNotExist(SET.to_string()));
                }
                let mut removed = 0_u64;
                for level in chain.custom_levels().to_vec() {
                    removed = removed.saturating_add(self.delete_business_level(&level, &owned)?);
                }
                Ok(removed)
            }
            DeleteStage::Templates => self.delete_business_templates(&owned),
            DeleteStage::Business => {
                let attributes = self.store_mut().delete_records::<Attribute>(&owned)?;
                self.record_audit(AuditAction::Delete, TABLE_ATTRIBUTES, &attributes)?;
                let groups = self.store_mut().delete_records::<AttributeGroup>(&owned)?;
                self.record_audit(AuditAction::Delete, TABLE_ATTRIBUTE_GROUPS, &groups)?;
                let business = self.purge_instances(BIZ, &[biz_id])?;
                Ok((attributes.len() as u64)
                    .saturating_add(groups.len() as u64)
                    .saturating_add(business))
            }
        }
    }

    /// Delete rows of a plain table in batches.
    fn purge_table(&mut self, name: &'static str, filter: &Filter) -> Result<u64, CmdbError> {
        let ids = self.store().distinct_ids(&table(name), FIELD_ID, filter)?;
        self.purge_rows(name, &ids)
    }

    /// Delete rows by id, in the given order, in batches.
    fn purge_rows(&mut self, name: &'static str, ids: &[InstId]) -> Result<u64, CmdbError> {
        let mut removed = 0_u64;
        for chunk in ids.chunks(self.config().batch_size()) {
            let filter = Filter::is_in(FIELD_ID, chunk.iter().copied());
            let docs = self.store().find_all(&table(name), &filter)?;
            if docs.is_empty() {
                continue;
            }
            removed = removed.saturating_add(self.store_mut().delete(&table(name), &filter)?);
            self.record_audit(AuditAction::Delete, name, &docs)?;
        }
        Ok(removed)
    }

    fn delete_business_processes(&mut self, owned: &Filter) -> Result<u64, CmdbError> {
        let relations = table(TABLE_PROCESS_RELATIONS);
        let process_ids = self
            .store()
            .distinct_ids(&relations, FIELD_PROCESS_ID, owned)?;
        let mut removed = 0_u64;
        for chunk in process_ids.chunks(self.config().batch_size()) {
            self.delete_instance_associations(PROCESS, chunk)?;
            removed = removed.saturating_add(self.purge_instances(PROCESS, chunk)?);
            let filter = Filter::is_in(FIELD_PROCESS_ID, chunk.iter().copied());
            let docs = self.store().find_all(&relations, &filter)?;
            self.store_mut().delete(&relations, &filter)?;
            self.record_audit(AuditAction::Delete, TABLE_PROCESS_RELATIONS, &docs)?;
        }
        Ok(removed)
    }

    /// Delete every instance of one mainline level owned by a business.
    fn delete_business_level(&mut self, obj_id: &str, owned: &Filter) -> Result<u64, CmdbError> {
        let ids = InstanceSource::of(obj_id).ids(self.store(), owned)?;
        let mut removed = 0_u64;
        for chunk in ids.chunks(self.config().batch_size()) {
            self.delete_instance_associations(obj_id, chunk)?;
            removed = removed.saturating_add(self.purge_instances(obj_id, chunk)?);
        }
        Ok(removed)
    }

    fn delete_business_templates(&mut self, owned: &Filter) -> Result<u64, CmdbError> {
        let set_templates = self
            .store()
            .distinct_ids(&table(TABLE_SET_TEMPLATES), FIELD_ID, owned)?;
        let mut removed = 0_u64;
        for chunk in set_templates.chunks(self.config().batch_size()) {
            let relations = Filter::is_in(FIELD_SET_TEMPLATE_ID, chunk.iter().copied());
            let docs = self
                .store()
                .find_all(&table(TABLE_SET_SERVICE_TEMPLATE_RELATIONS), &relations)?;
            self.store_mut()
                .delete(&table(TABLE_SET_SERVICE_TEMPLATE_RELATIONS), &relations)?;
            self.record_audit(
                AuditAction::Delete,
                TABLE_SET_SERVICE_TEMPLATE_RELATIONS,
                &docs,
            )?;
            removed = removed.saturating_add(self.purge_rows(TABLE_SET_TEMPLATES, chunk)?);
        }

        removed = removed.saturating_add(self.purge_table(TABLE_PROCESS_TEMPLATES, owned)?);
        removed = removed.saturating_add(self.purge_table(TABLE_SERVICE_TEMPLATES, owned)?);

        let categories = self
            .store()
            .find_all(&table(TABLE_SERVICE_CATEGORIES), owned)?;
        removed = removed.saturating_add(
            self.purge_rows(TABLE_SERVICE_CATEGORIES, &children_first(&categories))?,
        );
        Ok(removed)
    }
}
