//! # Service Facade
//!
//! [`Cmdb`] owns an instance store, an audit sink and the engine
//! configuration. Every operation of the engine is a method on it; the
//! methods are grouped by concern across the `mainline`, `association`,
//! `topology`, `business` and `instance` modules.
//!
//! ## Bootstrap
//!
//! A fresh store holds nothing. [`Cmdb::bootstrap`] seeds the built-in
//! objects, the pre-defined association kinds, the default mainline
//! `biz -> set -> module -> host`, the built-in service categories and the
//! resource-pool business. It is idempotent.

use crate::audit::{self, AuditAction, AuditLog, AuditTrail};
use crate::config::CmdbConfig;
use crate::filter::{CmpOp, Filter};
use crate::primitives::{
    BIZ, BIZ_TOPO_CLASSIFICATION, DEFAULT_FLAG_RESOURCE, FIELD_ASST_ID, FIELD_BIZ_ID,
    FIELD_DEFAULT, FIELD_ID, FIELD_OBJ_ID, FIELD_PARENT_ID, HOST, HOST_MANAGE_CLASSIFICATION,
    MAINLINE_KIND, MODULE, PREDEFINED_KINDS, PROCESS, SET, TABLE_SERVICE_CATEGORIES,
};
use crate::registry::ModelRegistry;
use crate::store::{Collection, InstanceSource, InstanceStore};
use crate::types::{
    AssociationKind, Attribute, AttributeGroup, CmdbError, Document, DocumentExt, InstId,
    ModelAssociation, ObjectType, Value, document,
};
use tracing::{debug, info};

/// Name of the built-in resource-pool business.
pub const RESOURCE_POOL_NAME: &str = "资源池";

/// Name of both built-in service categories.
const DEFAULT_CATEGORY_NAME: &str = "Default";

/// The consistency engine.
#[derive(Debug)]
pub struct Cmdb<S, A = AuditTrail> {
    store: S,
    audit: A,
    config: CmdbConfig,
}

impl<S: InstanceStore, A: AuditLog> Cmdb<S, A> {
    /// Create an engine with the default configuration.
    pub fn new(store: S, audit: A) -> Self {
        Self::with_config(store, audit, CmdbConfig::default())
    }

    pub fn with_config(store: S, audit: A, config: CmdbConfig) -> Self {
        Self {
            store,
            audit,
            config,
        }
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    #[must_use]
    pub fn audit(&self) -> &A {
        &self.audit
    }

    pub fn audit_mut(&mut self) -> &mut A {
        &mut self.audit
    }

    #[must_use]
    pub fn config(&self) -> &CmdbConfig {
        &self.config
    }

    /// Split the engine back into its parts.
    pub fn into_parts(self) -> (S, A, CmdbConfig) {
        (self.store, self.audit, self.config)
    }

    /// Audit `snapshot` under `resource`.
    pub(crate) fn record_audit(
        &mut self,
        action: AuditAction,
        resource: &str,
        snapshot: &[Document],
    ) -> Result<(), CmdbError> {
        audit::record(&mut self.audit, action, resource, snapshot)
    }

    // =========================================================================
    // BOOTSTRAP
    // =========================================================================

    /// Seed the built-in schema and the resource-pool business.
    pub fn bootstrap(&mut self) -> Result<(), CmdbError> {
        for (asst_id, asst_name) in PREDEFINED_KINDS {
            if self
                .store
                .read_association_kinds(&Filter::eq(FIELD_ASST_ID, asst_id))?
                .is_empty()
            {
                self.store.create_association_kind(&AssociationKind {
                    id: 0,
                    asst_id: asst_id.to_string(),
                    asst_name: asst_name.to_string(),
                    is_pre: true,
                })?;
            }
        }

        let built_ins = [
            (BIZ, "Business", BIZ_TOPO_CLASSIFICATION, "icon-cc-business"),
            (SET, "Set", BIZ_TOPO_CLASSIFICATION, "icon-cc-set"),
            (MODULE, "Module", BIZ_TOPO_CLASSIFICATION, "icon-cc-module"),
            (HOST, "Host", HOST_MANAGE_CLASSIFICATION, "icon-cc-host"),
            (PROCESS, "Process", BIZ_TOPO_CLASSIFICATION, "icon-cc-process"),
        ];
        for (obj_id, name, classification, icon) in built_ins {
            if self.store.read_model(obj_id)?.is_some() {
                continue;
            }
            let mut object = ObjectType::custom(obj_id, name, classification, icon);
            object.is_pre = true;
            self.store.create_model(&object)?;
            self.seed_object_schema(obj_id, name)?;
            debug!(obj = obj_id, "built-in object seeded");
        }

        // A child that already has a mainline parent may sit below a custom level.
        for (child, parent) in [(HOST, MODULE), (MODULE, SET), (SET, BIZ)] {
            let linked = Filter::eq(FIELD_OBJ_ID, child).and(Filter::eq(FIELD_ASST_ID, MAINLINE_KIND));
            if self.store.read_model_associations(&linked)?.is_empty() {
                self.store
                    .create_model_association(&ModelAssociation::mainline(child, parent))?;
            }
        }

        self.seed_service_categories()?;

        let pool = InstanceSource::of(BIZ)
            .count(&self.store, &Filter::eq(FIELD_DEFAULT, DEFAULT_FLAG_RESOURCE))?;
        if pool == 0 {
            let skeleton = self.create_business_with_flag(
                RESOURCE_POOL_NAME,
                Document::new(),
                DEFAULT_FLAG_RESOURCE,
            )?;
            info!(biz = %skeleton.biz_id, "resource pool business created");
        }
        Ok(())
    }

    fn seed_object_schema(&mut self, obj_id: &str, name: &str) -> Result<(), CmdbError> {
        let group = AttributeGroup {
            id: 0,
            obj_id: obj_id.to_string(),
            group_id: "default".to_string(),
            group_name: "Default".to_string(),
            group_index: -1,
            is_default: true,
            biz_id: 0,
        };
        self.store.create_attribute_group(&group)?;
        let source = InstanceSource::of(obj_id);
        self.store.create_attributes(&[Attribute {
            obj_id: obj_id.to_string(),
            property_id: source.name_field().to_string(),
            property_name: format!("{name} name"),
            property_type: "singlechar".to_string(),
            property_group: group.group_id,
            property_index: 1,
            is_only: true,
            is_required: true,
            is_editable: true,
            ..Attribute::default()
        }])?;
        Ok(())
    }

    fn seed_service_categories(&mut self) -> Result<(), CmdbError> {
        let categories = Collection::table(TABLE_SERVICE_CATEGORIES);
        let built_in = Filter::eq("is_built_in", true);
        let root = match self
            .store
            .find_one(&categories, &built_in.clone().and(Filter::eq(FIELD_PARENT_ID, 0)))?
        {
            Some(doc) => doc.inst_id(FIELD_ID)?,
            None => self.store.create(
                &categories,
                document([
                    ("name", Value::from(DEFAULT_CATEGORY_NAME)),
                    (FIELD_PARENT_ID, Value::from(0)),
                    ("root_id", Value::from(0)),
                    (FIELD_BIZ_ID, Value::from(0)),
                    ("is_built_in", Value::from(true)),
                ]),
            )?,
        };
        let child = built_in.and(Filter::eq(FIELD_PARENT_ID, root));
        if self.store.count(&categories, &child)? == 0 {
            self.store.create(
                &categories,
                document([
                    ("name", Value::from(DEFAULT_CATEGORY_NAME)),
                    (FIELD_PARENT_ID, Value::from(root)),
                    ("root_id", Value::from(root)),
                    (FIELD_BIZ_ID, Value::from(0)),
                    ("is_built_in", Value::from(true)),
                ]),
            )?;
        }
        Ok(())
    }

    /// The built-in leaf service category new modules are filed under.
    pub(crate) fn default_service_category(&self) -> Result<InstId, CmdbError> {
        let filter = Filter::eq("is_built_in", true).and(Filter::cmp(
            FIELD_PARENT_ID,
            CmpOp::Gt,
            0,
        ));
        self.store
            .find_one(&Collection::table(TABLE_SERVICE_CATEGORIES), &filter)?
            .ok_or_else(|| CmdbError::ObjectNotFound("default service category".to_string()))?
            .inst_id(FIELD_ID)
    }
}
