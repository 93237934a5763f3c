//! # Mainline Topology Manager
//!
//! The mainline is the single chain of `bk_mainline` model associations
//! running from Business through optional custom levels down to Set and
//! Module. Host hangs below Module but is not part of the chain.
//!
//! ## Chain handling
//!
//! The chain is never cached: every operation loads a fresh
//! [`MainlineChain`] and passes it along. Walks are guarded by a visited
//! set and an iteration bound, so a corrupt schema surfaces as
//! [`CmdbError::MainlineChainCorrupt`] instead of a hang.
//!
//! ## Level splicing
//!
//! Inserting and removing a level are multi-step operations without a
//! surrounding transaction. Each step checks whether its effect is already
//! in place before acting, and a failing step is reported as
//! [`CmdbError::Incomplete`] naming the step.

use crate::audit::{AuditAction, AuditLog};
use crate::filter::Filter;
use crate::primitives::{
    BIZ, BUILT_IN_OBJECTS, DEFAULT_FLAG_RESOURCE, FIELD_ASST_ID, FIELD_ASST_OBJ_ID, FIELD_BIZ_ID,
    FIELD_DEFAULT, FIELD_OBJ_ID, FIELD_PARENT_ID, HOST, INST_NAME_FORBIDDEN_CHARS, MAINLINE_KIND,
    MODULE, SET, TABLE_MODEL_ASSOCIATIONS, TABLE_OBJECTS,
};
use crate::registry::{ModelRegistry, collection};
use crate::service::Cmdb;
use crate::store::{InstanceSource, InstanceStore};
use crate::types::model::Record;
use crate::types::{
    Attribute, AttributeGroup, CmdbError, Document, DocumentExt, InstId, ModelAssociation,
    ObjectType, UniqueConstraint, Value,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, info};

// =============================================================================
// MAINLINE CHAIN
// =============================================================================

/// Ordered mainline objects from a starting object down to the tail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MainlineChain {
    objects: Vec<String>,
}

impl MainlineChain {
    /// Load the chain starting at `from`, following child edges.
    pub fn load<S: InstanceStore + ?Sized>(
        store: &S,
        from: &str,
        max_walk: usize,
    ) -> Result<Self, CmdbError> {
        Self::load_skipping(store, from, max_walk, None)
    }

    /// Load the chain as if no mainline edge touched `skip`.
    fn load_skipping<S: InstanceStore + ?Sized>(
        store: &S,
        from: &str,
        max_walk: usize,
        skip: Option<&str>,
    ) -> Result<Self, CmdbError> {
        let edges = store.read_model_associations(&Filter::eq(FIELD_ASST_ID, MAINLINE_KIND))?;

        let mut child_of: BTreeMap<&str, &str> = BTreeMap::new();
        for edge in &edges {
            if edge.obj_id == HOST {
                continue;
            }
            if skip.is_some_and(|obj| edge.obj_id == obj || edge.asst_obj_id == obj) {
                continue;
            }
            if let Some(existing) = child_of.insert(&edge.asst_obj_id, &edge.obj_id) {
                return Err(CmdbError::MainlineChainCorrupt(format!(
                    "{} has two mainline children: {} and {}",
                    edge.asst_obj_id, existing, edge.obj_id
                )));
            }
        }

        let mut objects = vec![from.to_string()];
        let mut visited: BTreeSet<&str> = BTreeSet::from([from]);
        let mut current = from;
        while let Some(&child) = child_of.get(current) {
            if !visited.insert(child) {
                return Err(CmdbError::MainlineChainCorrupt(format!(
                    "cycle through {child}"
                )));
            }
            if objects.len() >= max_walk {
                return Err(CmdbError::MainlineChainCorrupt(format!(
                    "chain from {from} exceeds {max_walk} levels"
                )));
            }
            objects.push(child.to_string());
            current = child;
        }

        if current != MODULE {
            return Err(CmdbError::MainlineObjectAssociationNotExist(
                current.to_string(),
            ));
        }
        Ok(Self { objects })
    }

    #[must_use]
    pub fn objects(&self) -> &[String] {
        &self.objects
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Number of topology levels including Host.
    #[must_use]
    pub fn topo_levels(&self) -> usize {
        self.objects.len().saturating_add(1)
    }

    #[must_use]
    pub fn contains(&self, obj_id: &str) -> bool {
        self.position(obj_id).is_some()
    }

    #[must_use]
    pub fn position(&self, obj_id: &str) -> Option<usize> {
        self.objects.iter().position(|o| o == obj_id)
    }

    #[must_use]
    pub fn parent_of(&self, obj_id: &str) -> Option<&str> {
        let pos = self.position(obj_id)?;
        pos.checked_sub(1)
            .and_then(|p| self.objects.get(p))
            .map(String::as_str)
    }

    #[must_use]
    pub fn child_of(&self, obj_id: &str) -> Option<&str> {
        let pos = self.position(obj_id)?;
        self.objects.get(pos.saturating_add(1)).map(String::as_str)
    }

    /// Objects strictly below `obj_id`, nearest first.
    #[must_use]
    pub fn below(&self, obj_id: &str) -> &[String] {
        match self.position(obj_id) {
            Some(pos) => &self.objects[pos.saturating_add(1)..],
            None => &[],
        }
    }

    /// Filter for `child_obj` instances directly below the given `parent_obj`
    /// instances.
    ///
    /// Instance ids are only unique per object. Idle sets hang below their
    /// business whatever the chain says, so sets below a business and sets
    /// below a custom level are told apart by their default flag.
    #[must_use]
    pub fn children_filter<I, V>(&self, parent_obj: &str, child_obj: &str, parent_ids: I) -> Filter
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let below = Filter::is_in(FIELD_PARENT_ID, parent_ids);
        if child_obj != SET {
            return below;
        }
        if parent_obj != BIZ {
            below.and(Filter::ne(FIELD_DEFAULT, DEFAULT_FLAG_RESOURCE))
        } else if self.parent_of(SET) == Some(BIZ) {
            below
        } else {
            below.and(Filter::eq(FIELD_DEFAULT, DEFAULT_FLAG_RESOURCE))
        }
    }

    /// Custom levels strictly between Business and Set, nearest Business first.
    #[must_use]
    pub fn custom_levels(&self) -> &[String] {
        match (self.position(BIZ), self.position(SET)) {
            (Some(biz), Some(set)) if biz < set => &self.objects[biz.saturating_add(1)..set],
            _ => &[],
        }
    }
}

impl fmt::Display for MainlineChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.objects.join(" -> "))
    }
}

// =============================================================================
// REQUEST / RESULT TYPES
// =============================================================================

/// A new mainline level to splice in below `parent_obj_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLevel {
    pub obj_id: String,
    pub name: String,
    pub classification: String,
    pub icon: String,
    pub parent_obj_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelInsertion {
    pub object: ObjectType,
    /// One new instance per parent instance.
    pub created: Vec<InstId>,
    /// Number of old child instances re-pointed to the new level.
    pub reparented: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelRemoval {
    pub obj_id: String,
    pub removed: Vec<InstId>,
    pub reparented: u64,
}

/// Model-level view of one mainline object and its neighbours.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MainlineObjectTopo {
    pub obj_id: String,
    pub obj_name: String,
    pub pre_obj_id: Option<String>,
    pub pre_obj_name: Option<String>,
    pub next_obj_id: Option<String>,
    pub next_obj_name: Option<String>,
}

/// Steps of a level insertion, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum InsertStage {
    CreateObject,
    CreateInstances,
    LinkParent,
    RelinkChild,
    Audit,
}

impl fmt::Display for InsertStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InsertStage::CreateObject => "create object",
            InsertStage::CreateInstances => "create instances",
            InsertStage::LinkParent => "link parent",
            InsertStage::RelinkChild => "relink child",
            InsertStage::Audit => "audit",
        })
    }
}

/// Steps of a level removal, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RemoveStage {
    Reparent,
    DeleteInstances,
    DeleteAssociations,
    RelinkChild,
    DeleteObject,
}

impl fmt::Display for RemoveStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RemoveStage::Reparent => "reparent children",
            RemoveStage::DeleteInstances => "delete instances",
            RemoveStage::DeleteAssociations => "delete associations",
            RemoveStage::RelinkChild => "relink child",
            RemoveStage::DeleteObject => "delete object",
        })
    }
}

const INSERT_LEVEL: &str = "insert mainline level";
const REMOVE_LEVEL: &str = "remove mainline level";

/// Object ids: lowercase ascii letter first, then letters, digits or `_`.
fn valid_object_id(obj_id: &str) -> bool {
    let mut chars = obj_id.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && obj_id.len() <= 32
}

/// Instance name derived from an object name.
#[must_use]
pub fn instance_name_for(object_name: &str) -> String {
    object_name
        .chars()
        .filter(|c| !INST_NAME_FORBIDDEN_CHARS.contains(c))
        .collect()
}

// =============================================================================
// OPERATIONS
// =============================================================================

impl<S: InstanceStore, A: AuditLog> Cmdb<S, A> {
    /// Fresh chain from `from_obj_id` to the tail.
    pub fn get_mainline_chain(&self, from_obj_id: &str) -> Result<MainlineChain, CmdbError> {
        MainlineChain::load(self.store(), from_obj_id, self.config().max_chain_walk)
    }

    pub fn is_mainline_object(&self, obj_id: &str) -> Result<bool, CmdbError> {
        if obj_id == HOST {
            return Ok(false);
        }
        Ok(self.get_mainline_chain(BIZ)?.contains(obj_id))
    }

    /// Every mainline object with its parent and child, Business first.
    pub fn search_mainline_object_topo(&self) -> Result<Vec<MainlineObjectTopo>, CmdbError> {
        let chain = self.get_mainline_chain(BIZ)?;
        let names: BTreeMap<String, String> = self
            .store()
            .read_models(&Filter::is_in(FIELD_OBJ_ID, chain.objects().iter().cloned()))?
            .into_iter()
            .map(|o| (o.obj_id, o.name))
            .collect();
        let name_of = |obj: &str| names.get(obj).cloned().unwrap_or_else(|| obj.to_string());

        Ok(chain
            .objects()
            .iter()
            .map(|obj| {
                let pre = chain.parent_of(obj);
                let next = chain.child_of(obj);
                MainlineObjectTopo {
                    obj_id: obj.clone(),
                    obj_name: name_of(obj),
                    pre_obj_id: pre.map(str::to_string),
                    pre_obj_name: pre.map(name_of),
                    next_obj_id: next.map(str::to_string),
                    next_obj_name: next.map(name_of),
                }
            })
            .collect())
    }

    /// Splice a new level in directly below `level.parent_obj_id`.
    pub fn insert_mainline_level(&mut self, level: &NewLevel) -> Result<LevelInsertion, CmdbError> {
        if level.parent_obj_id.is_empty() {
            return Err(CmdbError::ParamsNeedSet(FIELD_ASST_OBJ_ID.to_string()));
        }
        if level.classification.is_empty() {
            return Err(CmdbError::ParamsNeedSet("bk_classification_id".to_string()));
        }
        if level.obj_id.is_empty() {
            return Err(CmdbError::ParamsNeedSet(FIELD_OBJ_ID.to_string()));
        }
        if level.name.is_empty() {
            return Err(CmdbError::ParamsNeedSet("bk_obj_name".to_string()));
        }
        if !valid_object_id(&level.obj_id) {
            return Err(CmdbError::ParamsInvalid(FIELD_OBJ_ID.to_string()));
        }

        let existing = self.store().read_model(&level.obj_id)?;
        let chain = match &existing {
            Some(object) => self.pending_level_chain(object, &level.parent_obj_id)?,
            None => self.get_mainline_chain(BIZ)?,
        };
        if !chain.contains(&level.parent_obj_id) {
            return Err(CmdbError::MainlineSelectFailed(level.parent_obj_id.clone()));
        }
        let Some(child) = chain.child_of(&level.parent_obj_id).map(str::to_string) else {
            return Err(CmdbError::MainlineSelectFailed(level.parent_obj_id.clone()));
        };
        let levels = chain.topo_levels().saturating_add(1);
        if levels > self.config().max_topo_level {
            return Err(CmdbError::TopoLevelOverLimit {
                levels,
                max: self.config().max_topo_level,
            });
        }

        debug!(
            obj = %level.obj_id,
            parent = %level.parent_obj_id,
            %chain,
            resume = existing.is_some(),
            "inserting mainline level"
        );

        let object = self
            .create_level_object(level, existing)
            .map_err(|e| e.at_stage(INSERT_LEVEL, InsertStage::CreateObject))?;

        let (created, reparented, snapshots) = self
            .create_level_instances(&object, &level.parent_obj_id, &child)
            .map_err(|e| e.at_stage(INSERT_LEVEL, InsertStage::CreateInstances))?;

        self.ensure_mainline_edge(&object.obj_id, &level.parent_obj_id)
            .map_err(|e| e.at_stage(INSERT_LEVEL, InsertStage::LinkParent))?;

        self.relink_mainline_child(&child, &level.parent_obj_id, &object.obj_id)
            .map_err(|e| e.at_stage(INSERT_LEVEL, InsertStage::RelinkChild))?;

        self.record_audit(AuditAction::Create, &object.obj_id, &snapshots)
            .map_err(|e| e.at_stage(INSERT_LEVEL, InsertStage::Audit))?;

        info!(
            obj = %object.obj_id,
            instances = created.len(),
            reparented,
            "mainline level inserted"
        );
        Ok(LevelInsertion {
            object,
            created,
            reparented,
        })
    }

    /// Chain to resume an interrupted insertion of `object` against.
    ///
    /// Only a custom object carrying the system parent attribute, not yet
    /// in the chain and linked to nothing but `parent_obj` qualifies.
    /// Anything else already exists.
    fn pending_level_chain(
        &self,
        object: &ObjectType,
        parent_obj: &str,
    ) -> Result<MainlineChain, CmdbError> {
        let duplicate = || CmdbError::DuplicateItem(object.obj_id.clone());
        if !object.is_common() || BUILT_IN_OBJECTS.contains(&object.obj_id.as_str()) {
            return Err(duplicate());
        }
        let marked = self
            .store()
            .read_attributes(
                &Filter::eq(FIELD_OBJ_ID, object.obj_id.as_str())
                    .and(Filter::eq("bk_property_id", FIELD_PARENT_ID)),
            )?
            .iter()
            .any(|attribute| attribute.is_system);
        if !marked {
            return Err(duplicate());
        }
        if self
            .get_mainline_chain(BIZ)
            .is_ok_and(|chain| chain.contains(&object.obj_id))
        {
            return Err(duplicate());
        }
        let parents = self.store().read_model_associations(
            &Filter::eq(FIELD_OBJ_ID, object.obj_id.as_str())
                .and(Filter::eq(FIELD_ASST_ID, MAINLINE_KIND)),
        )?;
        if parents.iter().any(|edge| edge.asst_obj_id != parent_obj) {
            return Err(duplicate());
        }
        MainlineChain::load_skipping(
            self.store(),
            BIZ,
            self.config().max_chain_walk,
            Some(&object.obj_id),
        )
    }

    /// Create the object, its parent and name attributes, its default group
    /// and the unique constraint over both attributes. Parts that already
    /// exist are kept.
    fn create_level_object(
        &mut self,
        level: &NewLevel,
        existing: Option<ObjectType>,
    ) -> Result<ObjectType, CmdbError> {
        let (object, created) = match existing {
            Some(object) => (object, false),
            None => {
                let object = self.store_mut().create_model(&ObjectType::custom(
                    level.obj_id.as_str(),
                    level.name.as_str(),
                    level.classification.as_str(),
                    level.icon.as_str(),
                ))?;
                (object, true)
            }
        };
        let by_obj = Filter::eq(FIELD_OBJ_ID, object.obj_id.as_str());

        let group = AttributeGroup {
            id: 0,
            obj_id: object.obj_id.clone(),
            group_id: "default".to_string(),
            group_name: "Default".to_string(),
            group_index: -1,
            is_default: true,
            biz_id: 0,
        };
        let source = InstanceSource::of(&object.obj_id);
        let name_attribute = Attribute {
            id: 0,
            obj_id: object.obj_id.clone(),
            property_id: source.name_field().to_string(),
            property_name: format!("{} name", object.name),
            property_type: "singlechar".to_string(),
            property_group: group.group_id.clone(),
            property_index: 1,
            is_only: true,
            is_required: true,
            is_system: false,
            is_editable: true,
            biz_id: 0,
        };
        let parent_attribute = Attribute {
            id: 0,
            obj_id: object.obj_id.clone(),
            property_id: FIELD_PARENT_ID.to_string(),
            property_name: "parent id".to_string(),
            property_type: "int".to_string(),
            property_group: group.group_id.clone(),
            property_index: -1,
            is_only: true,
            is_required: true,
            is_system: true,
            is_editable: false,
            biz_id: 0,
        };
        // The parent attribute goes first: it marks the object as a level.
        let present: BTreeSet<String> = self
            .store()
            .read_attributes(&by_obj)?
            .into_iter()
            .map(|attribute| attribute.property_id)
            .collect();
        let missing: Vec<Attribute> = [parent_attribute, name_attribute]
            .into_iter()
            .filter(|attribute| !present.contains(&attribute.property_id))
            .collect();
        self.store_mut().create_attributes(&missing)?;

        let group_filter = by_obj.clone().and(Filter::eq("bk_group_id", "default"));
        if self
            .store()
            .count(&collection::<AttributeGroup>(), &group_filter)?
            == 0
        {
            self.store_mut().create_attribute_group(&group)?;
        }

        if self
            .store()
            .count(&collection::<UniqueConstraint>(), &by_obj)?
            == 0
        {
            self.store_mut()
                .create_unique_constraint(&UniqueConstraint {
                    id: 0,
                    obj_id: object.obj_id.clone(),
                    keys: vec![FIELD_PARENT_ID.to_string(), source.name_field().to_string()],
                    is_pre: false,
                })?;
        }

        if created {
            self.record_audit(AuditAction::Create, TABLE_OBJECTS, &[object.to_document()])?;
        }
        Ok(object)
    }

    /// One new instance per parent instance, taking over that parent's
    /// children. Parents that already have one are reused.
    fn create_level_instances(
        &mut self,
        object: &ObjectType,
        parent_obj: &str,
        child_obj: &str,
    ) -> Result<(Vec<InstId>, u64, Vec<Document>), CmdbError> {
        let parent_source = InstanceSource::of(parent_obj);
        let child_source = InstanceSource::of(child_obj);
        let new_source = InstanceSource::of(&object.obj_id);

        let parents = parent_source.find_all(self.store(), &Filter::All)?;
        let parent_ids: Vec<InstId> = parents
            .iter()
            .filter_map(|p| p.int(parent_source.id_field()).map(InstId))
            .collect();

        // Children are fetched before anything moves.
        let mut child_filter = Filter::is_in(FIELD_PARENT_ID, parent_ids.iter().copied());
        if child_obj == SET {
            child_filter = child_filter.and(Filter::ne(FIELD_DEFAULT, DEFAULT_FLAG_RESOURCE));
        }
        let mut children_by_parent: BTreeMap<i64, Vec<InstId>> = BTreeMap::new();
        for child in child_source.find_all(self.store(), &child_filter)? {
            if let (Some(parent), Some(id)) =
                (child.int(FIELD_PARENT_ID), child.int(child_source.id_field()))
            {
                children_by_parent.entry(parent).or_default().push(InstId(id));
            }
        }

        let inst_name = instance_name_for(&object.name);
        let mut created = Vec::new();
        let mut snapshots = Vec::new();
        let mut reparented = 0_u64;

        for parent in &parents {
            let parent_id = parent.inst_id(parent_source.id_field())?;
            let biz_id = if parent_obj == BIZ {
                parent_id.0
            } else {
                parent.int(FIELD_BIZ_ID).unwrap_or(0)
            };

            let existing = new_source
                .find_all(self.store(), &Filter::eq(FIELD_PARENT_ID, parent_id))?
                .into_iter()
                .next();
            let new_id = match existing {
                Some(doc) => doc.inst_id(new_source.id_field())?,
                None => {
                    let mut doc = Document::new();
                    doc.insert(new_source.name_field().to_string(), inst_name.clone().into());
                    doc.insert(FIELD_PARENT_ID.to_string(), parent_id.into());
                    doc.insert(FIELD_BIZ_ID.to_string(), Value::Int(biz_id));
                    let id = new_source.create(self.store_mut(), doc.clone())?;
                    doc.insert(new_source.id_field().to_string(), id.into());
                    doc.insert(FIELD_OBJ_ID.to_string(), object.obj_id.clone().into());
                    snapshots.push(doc);
                    created.push(id);
                    id
                }
            };

            if let Some(children) = children_by_parent.get(&parent_id.0) {
                let mut patch = Document::new();
                patch.insert(FIELD_PARENT_ID.to_string(), new_id.into());
                reparented = reparented.saturating_add(child_source.update(
                    self.store_mut(),
                    &child_source.ids_filter(children),
                    &patch,
                )?);
            }
        }
        Ok((created, reparented, snapshots))
    }

    /// Create the mainline edge `child -> parent` unless present.
    fn ensure_mainline_edge(&mut self, child: &str, parent: &str) -> Result<(), CmdbError> {
        let edge = ModelAssociation::mainline(child, parent);
        if self
            .store()
            .read_model_association(&edge.obj_asst_id)?
            .is_some()
        {
            return Ok(());
        }
        let created = self.store_mut().create_model_association(&edge)?;
        self.record_audit(
            AuditAction::Create,
            TABLE_MODEL_ASSOCIATIONS,
            &[created.to_document()],
        )
    }

    /// Move `child`'s mainline edge from `old_parent` to `new_parent`.
    ///
    /// The new edge is written first, so an interrupted move still leaves
    /// the old chain readable without `new_parent`.
    fn relink_mainline_child(
        &mut self,
        child: &str,
        old_parent: &str,
        new_parent: &str,
    ) -> Result<(), CmdbError> {
        self.ensure_mainline_edge(child, new_parent)?;
        let old_edge = self.store().read_model_association(&ModelAssociation::derive_id(
            child,
            MAINLINE_KIND,
            old_parent,
        ))?;
        if let Some(edge) = old_edge {
            let deleted = self.store_mut().delete_model_association(edge.id)?;
            self.record_audit(AuditAction::Delete, TABLE_MODEL_ASSOCIATIONS, &deleted)?;
        }
        Ok(())
    }

    /// Splice a custom level out, moving its children to its parent.
    pub fn remove_mainline_level(&mut self, obj_id: &str) -> Result<LevelRemoval, CmdbError> {
        if BUILT_IN_OBJECTS.contains(&obj_id) {
            return Err(CmdbError::ForbiddenOperateBuiltIn(obj_id.to_string()));
        }
        let chain = self.get_mainline_chain(BIZ)?;
        let (Some(parent), Some(child)) = (chain.parent_of(obj_id), chain.child_of(obj_id)) else {
            return Err(CmdbError::MainlineSelectFailed(obj_id.to_string()));
        };
        let (parent, child) = (parent.to_string(), child.to_string());

        let source = InstanceSource::of(obj_id);
        let child_source = InstanceSource::of(&child);
        let instances = source.find_all(self.store(), &Filter::All)?;
        let ids: Vec<InstId> = instances
            .iter()
            .filter_map(|d| d.int(source.id_field()).map(InstId))
            .collect();

        self.check_instance_associations(obj_id, &ids)?;
        self.check_reparent_names(&chain, &instances, &parent, &source, &child_source)?;

        debug!(obj = obj_id, %parent, %child, instances = ids.len(), "removing mainline level");

        let mut reparented = 0_u64;
        for inst in &instances {
            let inst_id = inst.inst_id(source.id_field())?;
            let grandparent = inst.inst_id(FIELD_PARENT_ID)?;
            let mut patch = Document::new();
            patch.insert(FIELD_PARENT_ID.to_string(), grandparent.into());
            let moved = child_source
                .update(
                    self.store_mut(),
                    &chain.children_filter(obj_id, &child, [inst_id]),
                    &patch,
                )
                .map_err(|e| e.at_stage(REMOVE_LEVEL, RemoveStage::Reparent))?;
            reparented = reparented.saturating_add(moved);
        }

        if !ids.is_empty() {
            source
                .delete(self.store_mut(), &source.ids_filter(&ids))
                .and_then(|_| self.record_audit(AuditAction::Delete, obj_id, &instances))
                .map_err(|e| e.at_stage(REMOVE_LEVEL, RemoveStage::DeleteInstances))?;
        }

        self.delete_model_associations_of(obj_id)
            .map_err(|e| e.at_stage(REMOVE_LEVEL, RemoveStage::DeleteAssociations))?;

        self.ensure_mainline_edge(&child, &parent)
            .map_err(|e| e.at_stage(REMOVE_LEVEL, RemoveStage::RelinkChild))?;

        self.store_mut()
            .delete_model(obj_id)
            .and_then(|deleted| self.record_audit(AuditAction::Delete, TABLE_OBJECTS, &deleted))
            .map_err(|e| e.at_stage(REMOVE_LEVEL, RemoveStage::DeleteObject))?;

        info!(obj = obj_id, removed = ids.len(), reparented, "mainline level removed");
        Ok(LevelRemoval {
            obj_id: obj_id.to_string(),
            removed: ids,
            reparented,
        })
    }

    /// Children of the removed level must keep unique names under their
    /// new parent, including siblings already living there.
    fn check_reparent_names(
        &self,
        chain: &MainlineChain,
        instances: &[Document],
        parent_obj: &str,
        source: &InstanceSource,
        child_source: &InstanceSource,
    ) -> Result<(), CmdbError> {
        let mut grandparent_of: BTreeMap<i64, i64> = BTreeMap::new();
        for inst in instances {
            if let (Some(id), Some(parent)) =
                (inst.int(source.id_field()), inst.int(FIELD_PARENT_ID))
            {
                grandparent_of.insert(id, parent);
            }
        }

        let mut seen: BTreeSet<(i64, String)> = BTreeSet::new();
        let grandparents: BTreeSet<i64> = grandparent_of.values().copied().collect();
        let residents = child_source.find_all(
            self.store(),
            &chain.children_filter(
                parent_obj,
                child_source.obj_id(),
                grandparents.iter().copied(),
            ),
        )?;
        for resident in &residents {
            if let (Some(parent), Some(name)) = (
                resident.int(FIELD_PARENT_ID),
                resident.text(child_source.name_field()),
            ) {
                seen.insert((parent, name.to_string()));
            }
        }

        let movers = child_source.find_all(
            self.store(),
            &chain.children_filter(
                source.obj_id(),
                child_source.obj_id(),
                grandparent_of.keys().copied(),
            ),
        )?;
        for child in &movers {
            let Some(parent) = child.int(FIELD_PARENT_ID) else {
                continue;
            };
            let Some(&grandparent) = grandparent_of.get(&parent) else {
                continue;
            };
            let name = child.text(child_source.name_field()).unwrap_or_default();
            if !seen.insert((grandparent, name.to_string())) {
                return Err(CmdbError::MainlineInstNameRepeat(name.to_string()));
            }
        }
        Ok(())
    }

    /// Delete every model association touching `obj_id`.
    fn delete_model_associations_of(&mut self, obj_id: &str) -> Result<(), CmdbError> {
        let touching = Filter::eq(FIELD_OBJ_ID, obj_id).or(Filter::eq(FIELD_ASST_OBJ_ID, obj_id));
        let edges = self.store().read_model_associations(&touching)?;
        if let Some(pre) = edges.iter().find(|e| e.is_pre) {
            return Err(CmdbError::DeletePredefinedAssociation(
                pre.obj_asst_id.clone(),
            ));
        }
        for edge in edges {
            // A vanished edge counts as deleted.
            let deleted = self.store_mut().delete_model_association(edge.id)?;
            self.record_audit(AuditAction::Delete, TABLE_MODEL_ASSOCIATIONS, &deleted)?;
        }
        Ok(())
    }
}
