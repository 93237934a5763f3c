//! # Topology Reader
//!
//! Read-only views of instance topology:
//! - [`Cmdb::read_subtree`]: the mainline tree under one instance, with
//!   optional host, service-instance and host-apply-rule statistics
//! - [`Cmdb::read_ancestors`] / [`Cmdb::read_descendants`]: the instances
//!   linked to one instance through typed associations, grouped by object
//!
//! Subtrees are fetched level by level: one query per mainline object,
//! then assembled in memory.

use crate::audit::AuditLog;
use crate::filter::Filter;
use crate::primitives::{
    BIZ, DEFAULT_FLAG_RESOURCE, FIELD_ASST_ID, FIELD_ASST_INST_ID, FIELD_ASST_OBJ_ID,
    FIELD_BIZ_ID, FIELD_DEFAULT, FIELD_HOST_ID, FIELD_INST_ID, FIELD_MODULE_ID,
    FIELD_OBJ_ASST_ID, FIELD_OBJ_ID, FIELD_PARENT_ID, FIELD_SET_ID, MAINLINE_KIND, MODULE, SET,
    TABLE_HOST_APPLY_RULES, TABLE_SERVICE_INSTANCES,
};
use crate::instance::module_host;
use crate::registry::ModelRegistry;
use crate::service::Cmdb;
use crate::store::{Collection, InstanceSource, InstanceStore};
use crate::types::{CmdbError, Document, DocumentExt, InstAssociation, InstId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// SUBTREE
// =============================================================================

/// One instance of the mainline tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopoNode {
    pub obj_id: String,
    pub obj_name: String,
    pub inst_id: InstId,
    pub inst_name: String,
    /// `default` flag of the instance (idle set and modules are non-zero).
    pub default: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_instance_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_apply_rule_count: Option<u64>,
    pub children: Vec<TopoNode>,
}

impl TopoNode {
    /// Depth-first walk over this node and everything below it.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a TopoNode)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SubtreeOptions {
    pub with_statistics: bool,
    /// Include the idle set and its modules under a business root.
    pub with_default: bool,
}

/// A fetched instance before assembly.
struct Flat {
    level: usize,
    /// Level index of the node this one hangs under.
    attach: usize,
    parent: i64,
    id: i64,
    name: String,
    default: i64,
}

/// Per-module figures collected for statistics.
#[derive(Default)]
struct Tallies {
    hosts_by_module: BTreeMap<i64, BTreeSet<i64>>,
    hosts_by_set: BTreeMap<i64, BTreeSet<i64>>,
    hosts_by_biz: BTreeMap<i64, BTreeSet<i64>>,
    service_instances: BTreeMap<i64, u64>,
    apply_rules: BTreeMap<i64, u64>,
}

fn count_by(docs: &[Document], field: &str) -> BTreeMap<i64, u64> {
    let mut counts: BTreeMap<i64, u64> = BTreeMap::new();
    for doc in docs {
        if let Some(key) = doc.int(field) {
            let n = counts.entry(key).or_default();
            *n = n.saturating_add(1);
        }
    }
    counts
}

impl Tallies {
    /// Fill statistics bottom-up, returning the distinct hosts below `node`.
    fn fill(&self, node: &mut TopoNode) -> BTreeSet<i64> {
        let mut below = BTreeSet::new();
        let mut service_instances = 0_u64;
        for child in &mut node.children {
            below.extend(self.fill(child));
            service_instances =
                service_instances.saturating_add(child.service_instance_count.unwrap_or(0));
        }

        let id = node.inst_id.0;
        let hosts = match node.obj_id.as_str() {
            MODULE => {
                service_instances = self.service_instances.get(&id).copied().unwrap_or(0);
                node.host_apply_rule_count = Some(self.apply_rules.get(&id).copied().unwrap_or(0));
                self.hosts_by_module.get(&id).cloned().unwrap_or_default()
            }
            SET => self.hosts_by_set.get(&id).cloned().unwrap_or_default(),
            BIZ => self.hosts_by_biz.get(&id).cloned().unwrap_or_default(),
            _ => below,
        };
        node.host_count = Some(hosts.len() as u64);
        node.service_instance_count = Some(service_instances);
        hosts
    }
}

// =============================================================================
// ASSOCIATED INSTANCES
// =============================================================================

/// An instance reached through an association.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedInstance {
    pub inst_id: InstId,
    pub inst_name: String,
    /// Row id of the instance association.
    pub asso_id: i64,
}

/// Instances of one object linked to the queried instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociatedObject {
    pub obj_id: String,
    pub obj_name: String,
    pub obj_icon: String,
    pub count: usize,
    pub children: Vec<LinkedInstance>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// The queried instance is the association's destination.
    Ancestors,
    /// The queried instance is the association's source.
    Descendants,
}

impl<S: InstanceStore, A: AuditLog> Cmdb<S, A> {
    /// The mainline tree rooted at one instance.
    ///
    /// Under a business root the idle set hangs directly below the
    /// business, whatever custom levels the chain has.
    pub fn read_subtree(
        &self,
        root_obj: &str,
        root_id: InstId,
        options: SubtreeOptions,
    ) -> Result<Vec<TopoNode>, CmdbError> {
        let chain = self.get_mainline_chain(root_obj)?;
        let root_doc = self.get_instance(root_obj, root_id)?;
        let objects = chain.objects();

        let names: BTreeMap<String, String> = self
            .store()
            .read_models(&Filter::is_in(FIELD_OBJ_ID, objects.iter().cloned()))?
            .into_iter()
            .map(|o| (o.obj_id, o.name))
            .collect();

        let root_source = InstanceSource::of(root_obj);
        let mut flats = vec![Flat {
            level: 0,
            attach: 0,
            parent: 0,
            id: root_id.0,
            name: root_doc
                .text(root_source.name_field())
                .unwrap_or_default()
                .to_string(),
            default: root_doc.int(FIELD_DEFAULT).unwrap_or(0),
        }];
        let business_root = root_obj == BIZ;

        let idle_pool = business_root && options.with_default;
        let mut previous: Vec<i64> = vec![root_id.0];
        let mut parent_obj = root_obj;
        for (level, obj) in objects.iter().enumerate().skip(1) {
            let source = InstanceSource::of(obj);
            let mut filter = chain.children_filter(parent_obj, obj, previous.iter().copied());
            if obj == SET {
                filter = filter.and(Filter::ne(FIELD_DEFAULT, DEFAULT_FLAG_RESOURCE));
                if idle_pool {
                    filter = filter.or(Filter::eq(FIELD_PARENT_ID, root_id)
                        .and(Filter::eq(FIELD_DEFAULT, DEFAULT_FLAG_RESOURCE)));
                }
            }

            let mut current = Vec::new();
            for doc in source.find_all(self.store(), &filter)? {
                let (Some(id), Some(parent)) =
                    (doc.int(source.id_field()), doc.int(FIELD_PARENT_ID))
                else {
                    continue;
                };
                let default = doc.int(FIELD_DEFAULT).unwrap_or(0);
                let attach = if obj == SET && business_root && default == DEFAULT_FLAG_RESOURCE {
                    0
                } else {
                    level.saturating_sub(1)
                };
                current.push(id);
                flats.push(Flat {
                    level,
                    attach,
                    parent,
                    id,
                    name: doc.text(source.name_field()).unwrap_or_default().to_string(),
                    default,
                });
            }
            // An empty custom level must not hide the idle set further down.
            let set_ahead = objects
                .get(level.saturating_add(1)..)
                .is_some_and(|rest| rest.iter().any(|o| o == SET));
            if current.is_empty() && !(idle_pool && set_ahead) {
                break;
            }
            previous = current;
            parent_obj = obj.as_str();
        }

        let mut children_of: BTreeMap<(usize, i64), Vec<usize>> = BTreeMap::new();
        for (index, flat) in flats.iter().enumerate().skip(1) {
            children_of
                .entry((flat.attach, flat.parent))
                .or_default()
                .push(index);
        }
        let mut root = assemble(0, &flats, &children_of, objects, &names);

        if options.with_statistics {
            let mut module_ids = Vec::new();
            root.walk(&mut |node| {
                if node.obj_id == MODULE {
                    module_ids.push(node.inst_id.0);
                }
            });
            let tallies = self.tally(&module_ids, business_root.then_some(root_id))?;
            tallies.fill(&mut root);
        }
        Ok(vec![root])
    }

    fn tally(&self, module_ids: &[i64], biz: Option<InstId>) -> Result<Tallies, CmdbError> {
        let in_modules = Filter::is_in(FIELD_MODULE_ID, module_ids.iter().copied());
        let relation_filter = match biz {
            Some(biz) => in_modules.clone().or(Filter::eq(FIELD_BIZ_ID, biz)),
            None => in_modules.clone(),
        };
        let mut tallies = Tallies::default();
        for relation in self.store().find_all(&module_host(), &relation_filter)? {
            let Some(host) = relation.int(FIELD_HOST_ID) else {
                continue;
            };
            for (field, map) in [
                (FIELD_MODULE_ID, &mut tallies.hosts_by_module),
                (FIELD_SET_ID, &mut tallies.hosts_by_set),
                (FIELD_BIZ_ID, &mut tallies.hosts_by_biz),
            ] {
                if let Some(key) = relation.int(field) {
                    map.entry(key).or_default().insert(host);
                }
            }
        }
        let service_instances = self
            .store()
            .find_all(&Collection::table(TABLE_SERVICE_INSTANCES), &in_modules)?;
        tallies.service_instances = count_by(&service_instances, FIELD_MODULE_ID);
        let rules = self
            .store()
            .find_all(&Collection::table(TABLE_HOST_APPLY_RULES), &in_modules)?;
        tallies.apply_rules = count_by(&rules, FIELD_MODULE_ID);
        Ok(tallies)
    }

    /// Instances this instance is the destination of, grouped by object.
    pub fn read_ancestors(
        &self,
        obj_id: &str,
        inst_id: InstId,
    ) -> Result<Vec<AssociatedObject>, CmdbError> {
        self.read_associated(obj_id, inst_id, Direction::Ancestors)
    }

    /// Instances this instance is the source of, grouped by object.
    pub fn read_descendants(
        &self,
        obj_id: &str,
        inst_id: InstId,
    ) -> Result<Vec<AssociatedObject>, CmdbError> {
        self.read_associated(obj_id, inst_id, Direction::Descendants)
    }

    fn read_associated(
        &self,
        obj_id: &str,
        inst_id: InstId,
        direction: Direction,
    ) -> Result<Vec<AssociatedObject>, CmdbError> {
        if inst_id.0 == 0 {
            return Err(CmdbError::ParamsInvalid(FIELD_INST_ID.to_string()));
        }
        self.get_instance(obj_id, inst_id)?;

        let (own_obj, own_inst) = match direction {
            Direction::Descendants => (FIELD_OBJ_ID, FIELD_INST_ID),
            Direction::Ancestors => (FIELD_ASST_OBJ_ID, FIELD_ASST_INST_ID),
        };
        let models = self.store().read_model_associations(
            &Filter::eq(own_obj, obj_id).and(Filter::ne(FIELD_ASST_ID, MAINLINE_KIND)),
        )?;

        let mut grouped: BTreeMap<String, Vec<(i64, InstId)>> = BTreeMap::new();
        for model in &models {
            let other_obj = match direction {
                Direction::Descendants => &model.asst_obj_id,
                Direction::Ancestors => &model.obj_id,
            };
            let edges: Vec<InstAssociation> = self.store().read_records(
                &Filter::eq(FIELD_OBJ_ASST_ID, model.obj_asst_id.as_str())
                    .and(Filter::eq(own_inst, inst_id)),
            )?;
            let linked = grouped.entry(other_obj.clone()).or_default();
            for edge in edges {
                let other = match direction {
                    Direction::Descendants => edge.asst_inst_id,
                    Direction::Ancestors => edge.inst_id,
                };
                linked.push((edge.id, other));
            }
        }

        let mut result = Vec::with_capacity(grouped.len());
        for (other_obj, links) in grouped {
            let object = self.store().require_model(&other_obj)?;
            let source = InstanceSource::of(&other_obj);
            let ids: Vec<InstId> = links.iter().map(|(_, id)| *id).collect();
            let names: BTreeMap<i64, String> = source
                .find_all(self.store(), &source.ids_filter(&ids))?
                .into_iter()
                .filter_map(|doc| {
                    let id = doc.int(source.id_field())?;
                    Some((id, doc.text(source.name_field()).unwrap_or_default().to_string()))
                })
                .collect();
            let children: Vec<LinkedInstance> = links
                .into_iter()
                .filter_map(|(asso_id, id)| {
                    names.get(&id.0).map(|name| LinkedInstance {
                        inst_id: id,
                        inst_name: name.clone(),
                        asso_id,
                    })
                })
                .collect();
            result.push(AssociatedObject {
                obj_id: object.obj_id,
                obj_name: object.name,
                obj_icon: object.icon,
                count: children.len(),
                children,
            });
        }
        Ok(result)
    }
}

fn assemble(
    index: usize,
    flats: &[Flat],
    children_of: &BTreeMap<(usize, i64), Vec<usize>>,
    objects: &[String],
    names: &BTreeMap<String, String>,
) -> TopoNode {
    let flat = &flats[index];
    let obj_id = objects.get(flat.level).cloned().unwrap_or_default();
    let children = children_of
        .get(&(flat.level, flat.id))
        .map(|kids| {
            kids.iter()
                .map(|&kid| assemble(kid, flats, children_of, objects, names))
                .collect()
        })
        .unwrap_or_default();
    TopoNode {
        obj_name: names.get(&obj_id).cloned().unwrap_or_else(|| obj_id.clone()),
        obj_id,
        inst_id: InstId(flat.id),
        inst_name: flat.name.clone(),
        default: flat.default,
        host_count: None,
        service_instance_count: None,
        host_apply_rule_count: None,
        children,
    }
}
