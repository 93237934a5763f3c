//! # Scenario Tests (S1-S7)
//!
//! End-to-end walks through the public engine API:
//! - S1: Mainline level removal and name collisions
//! - S2: Business creation seeds the idle pool
//! - S3: Business teardown guards and idempotence
//! - S4: Instance association cardinality
//! - S5: Topology statistics
//! - S6: Topology consistency across level changes
//! - S7: Persistent backend

use cmdb_core::primitives::{
    BIZ, DEFAULT_FLAG_FAULT_MODULE, DEFAULT_FLAG_IDLE_MODULE, DEFAULT_FLAG_RECYCLE_MODULE,
    DEFAULT_FLAG_RESOURCE, FIELD_BIZ_ID, FIELD_DEFAULT, FIELD_MODULE_ID, FIELD_PARENT_ID,
    FIELD_SERVICE_TEMPLATE_ID, HOST, MAINLINE_KIND, MODULE, SET, TABLE_SERVICE_INSTANCES,
};
use cmdb_core::{
    AuditAction, AuditTrail, Cmdb, CmdbError, Collection, DeleteStage, Document, DocumentExt,
    Filter, InstId, InstanceSource, InstanceStore, Mapping, MemoryStore, ModelRegistry,
    NewAssociation, NewLevel, ObjectType, OnDelete, StorageBackend, SubtreeOptions, TopoNode,
    Value, document,
};
use std::collections::BTreeSet;

type Engine = Cmdb<MemoryStore, AuditTrail>;

fn engine() -> Engine {
    let mut cmdb = Cmdb::new(MemoryStore::new(), AuditTrail::new());
    cmdb.bootstrap().expect("bootstrap");
    cmdb
}

fn level(obj_id: &str, name: &str, parent: &str) -> NewLevel {
    NewLevel {
        obj_id: obj_id.to_string(),
        name: name.to_string(),
        classification: "bk_biz_topo".to_string(),
        icon: "icon-cc-default".to_string(),
        parent_obj_id: parent.to_string(),
    }
}

fn child<S: InstanceStore>(
    cmdb: &mut Cmdb<S, AuditTrail>,
    obj: &str,
    name: &str,
    parent: InstId,
) -> InstId {
    let field = InstanceSource::of(obj).name_field();
    cmdb.create_instance(
        obj,
        document([(field, Value::from(name)), (FIELD_PARENT_ID, Value::from(parent))]),
    )
    .expect("instance")
}

fn host(cmdb: &mut Engine, ip: &str) -> InstId {
    cmdb.create_instance(HOST, document([("bk_host_innerip", ip)]))
        .expect("host")
}

fn parent_of(cmdb: &Engine, obj: &str, id: InstId) -> i64 {
    cmdb.get_instance(obj, id)
        .expect("instance")
        .int(FIELD_PARENT_ID)
        .expect("parent id")
}

/// Every non-business mainline instance points at an existing parent.
fn assert_no_orphans<S: InstanceStore>(cmdb: &Cmdb<S, AuditTrail>) {
    let chain = cmdb.get_mainline_chain(BIZ).expect("chain");
    for obj in chain.objects().iter().skip(1) {
        let parent_obj = chain.parent_of(obj).expect("parent object");
        for doc in InstanceSource::of(obj)
            .find_all(cmdb.store(), &Filter::All)
            .expect("instances")
        {
            let parent = doc.inst_id(FIELD_PARENT_ID).expect("parent id");
            let idle_set = obj == SET && doc.int(FIELD_DEFAULT) == Some(DEFAULT_FLAG_RESOURCE);
            let expected = if idle_set { BIZ } else { parent_obj };
            assert!(
                cmdb.get_instance(expected, parent).is_ok(),
                "{obj} instance points at missing {expected} {parent}"
            );
        }
    }
}

/// Names of the non-idle sets reachable from a business.
fn reachable_sets(cmdb: &Engine, biz: InstId) -> BTreeSet<String> {
    let tree = cmdb
        .read_subtree(BIZ, biz, SubtreeOptions::default())
        .expect("subtree");
    let mut names = BTreeSet::new();
    for root in &tree {
        root.walk(&mut |node: &TopoNode| {
            if node.obj_id == SET {
                names.insert(node.inst_name.clone());
            }
        });
    }
    names
}

// =============================================================================
// S1: MAINLINE LEVEL REMOVAL
// =============================================================================

mod s1_level_removal {
    use super::*;

    /// S1.1: Two regions of one business holding equally named sets cannot
    /// be merged.
    #[test]
    fn colliding_set_names_block_removal() {
        let mut cmdb = engine();
        let biz = cmdb.create_business("b1", Document::new()).expect("biz");
        let inserted = cmdb
            .insert_mainline_level(&level("region", "Region", BIZ))
            .expect("insert");
        let first = InstanceSource::of("region")
            .ids(cmdb.store(), &Filter::eq(FIELD_PARENT_ID, biz.biz_id))
            .expect("regions")[0];
        assert!(inserted.created.contains(&first));
        let second = child(&mut cmdb, "region", "east", biz.biz_id);

        child(&mut cmdb, SET, "SetA", first);
        child(&mut cmdb, SET, "SetA", second);

        let err = cmdb.remove_mainline_level("region");
        assert!(matches!(err, Err(CmdbError::MainlineInstNameRepeat(name)) if name == "SetA"));

        // Nothing was touched.
        let chain = cmdb.get_mainline_chain(BIZ).expect("chain");
        assert_eq!(chain.objects(), ["biz", "region", "set", "module"]);
        assert_no_orphans(&cmdb);
    }

    /// S1.2: Distinct names splice cleanly and the sets land on the business.
    #[test]
    fn distinct_set_names_move_to_business() {
        let mut cmdb = engine();
        let biz = cmdb.create_business("b1", Document::new()).expect("biz");
        cmdb.insert_mainline_level(&level("region", "Region", BIZ))
            .expect("insert");
        let first = InstanceSource::of("region")
            .ids(cmdb.store(), &Filter::eq(FIELD_PARENT_ID, biz.biz_id))
            .expect("regions")[0];
        let second = child(&mut cmdb, "region", "east", biz.biz_id);
        let set_a = child(&mut cmdb, SET, "SetA", first);
        let set_b = child(&mut cmdb, SET, "SetB", second);

        let removal = cmdb.remove_mainline_level("region").expect("remove");
        assert_eq!(removal.reparented, 2);
        assert_eq!(parent_of(&cmdb, SET, set_a), biz.biz_id.0);
        assert_eq!(parent_of(&cmdb, SET, set_b), biz.biz_id.0);
        assert!(cmdb.store().read_model("region").expect("read").is_none());
        assert_no_orphans(&cmdb);
    }

    /// S1.3: A set name already used directly under the business also
    /// collides.
    #[test]
    fn resident_sibling_collides() {
        let mut cmdb = engine();
        let biz = cmdb.create_business("b1", Document::new()).expect("biz");
        cmdb.insert_mainline_level(&level("region", "Region", BIZ))
            .expect("insert");
        let region = InstanceSource::of("region")
            .ids(cmdb.store(), &Filter::eq(FIELD_PARENT_ID, biz.biz_id))
            .expect("regions")[0];
        let pool_name = cmdb.config().idle_pool.set.clone();
        child(&mut cmdb, SET, &pool_name, region);

        let err = cmdb.remove_mainline_level("region");
        assert!(matches!(err, Err(CmdbError::MainlineInstNameRepeat(_))));
    }

    /// S1.4: A level with live instance associations stays.
    #[test]
    fn associated_level_instances_block_removal() {
        let mut cmdb = engine();
        let biz = cmdb.create_business("b1", Document::new()).expect("biz");
        cmdb.insert_mainline_level(&level("region", "Region", BIZ))
            .expect("insert");
        let region = InstanceSource::of("region")
            .ids(cmdb.store(), &Filter::eq(FIELD_PARENT_ID, biz.biz_id))
            .expect("regions")[0];
        let model = cmdb
            .create_common_association(&NewAssociation {
                obj_id: HOST.into(),
                asst_obj_id: "region".into(),
                asst_kind: "belong".into(),
                mapping: Mapping::ManyToMany,
                on_delete: OnDelete::Nothing,
            })
            .expect("model association");
        let h1 = host(&mut cmdb, "10.0.0.1");
        cmdb.create_inst_association(&model.obj_asst_id, h1, region)
            .expect("edge");

        let err = cmdb.remove_mainline_level("region");
        assert!(matches!(err, Err(CmdbError::InstHasAssociation { .. })));
    }
}

// =============================================================================
// S2: BUSINESS CREATION
// =============================================================================

mod s2_business_creation {
    use super::*;

    /// S2.1: A new business gets one idle set and the three idle modules.
    #[test]
    fn idle_pool_is_seeded() {
        let mut cmdb = engine();
        let biz = cmdb.create_business("Test", Document::new()).expect("biz");

        let sets = InstanceSource::of(SET)
            .find_all(cmdb.store(), &Filter::eq(FIELD_BIZ_ID, biz.biz_id))
            .expect("sets");
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].text("bk_set_name"), Some("空闲机池"));
        assert_eq!(sets[0].int(FIELD_DEFAULT), Some(DEFAULT_FLAG_RESOURCE));

        let modules = InstanceSource::of(MODULE)
            .find_all(cmdb.store(), &Filter::eq(FIELD_BIZ_ID, biz.biz_id))
            .expect("modules");
        assert_eq!(modules.len(), 3);
        let flags: BTreeSet<i64> = modules.iter().filter_map(|m| m.int(FIELD_DEFAULT)).collect();
        assert_eq!(
            flags,
            BTreeSet::from([
                DEFAULT_FLAG_IDLE_MODULE,
                DEFAULT_FLAG_FAULT_MODULE,
                DEFAULT_FLAG_RECYCLE_MODULE
            ])
        );
        assert!(
            modules
                .iter()
                .all(|m| m.int(FIELD_SERVICE_TEMPLATE_ID) == Some(0))
        );
    }

    /// S2.2: Creation is audited per instance.
    #[test]
    fn creation_is_audited() {
        let mut cmdb = engine();
        cmdb.audit_mut().drain();
        let biz = cmdb.create_business("Test", Document::new()).expect("biz");

        let audit = cmdb.audit();
        assert_eq!(audit.of(AuditAction::Create, BIZ).count(), 1);
        assert_eq!(audit.of(AuditAction::Create, SET).count(), 1);
        assert_eq!(audit.of(AuditAction::Create, MODULE).count(), 3);
        assert!(
            audit
                .of(AuditAction::Create, MODULE)
                .all(|e| e.biz_id == biz.biz_id.0)
        );
    }
}

// =============================================================================
// S3: BUSINESS TEARDOWN
// =============================================================================

mod s3_business_teardown {
    use super::*;

    /// S3.1: An unarchived business is refused before anything is removed.
    #[test]
    fn unarchived_business_is_untouched() {
        let mut cmdb = engine();
        let biz = cmdb.create_business("Test", Document::new()).expect("biz");
        let web = child(&mut cmdb, SET, "web", biz.biz_id);
        child(&mut cmdb, MODULE, "nginx", web);
        cmdb.audit_mut().drain();

        let err = cmdb.delete_business(&[biz.biz_id]);
        assert!(matches!(err, Err(CmdbError::ForbiddenDeleteUnarchivedBiz(id)) if id == biz.biz_id));
        assert!(cmdb.audit().entries().is_empty());
        let sets = InstanceSource::of(SET)
            .count(cmdb.store(), &Filter::eq(FIELD_BIZ_ID, biz.biz_id))
            .expect("count");
        assert_eq!(sets, 2);
    }

    /// S3.2: One bad business in a batch stops the whole batch up front.
    #[test]
    fn batch_is_prechecked_as_a_whole() {
        let mut cmdb = engine();
        let archived = cmdb.create_business("old", Document::new()).expect("biz");
        let live = cmdb.create_business("new", Document::new()).expect("biz");
        cmdb.archive_business(archived.biz_id).expect("archive");

        let err = cmdb.delete_business(&[archived.biz_id, live.biz_id]);
        assert!(matches!(err, Err(CmdbError::ForbiddenDeleteUnarchivedBiz(_))));
        assert!(cmdb.get_instance(BIZ, archived.biz_id).is_ok());
    }

    /// S3.3: A second teardown of the same business is a no-op success.
    #[test]
    fn repeated_teardown_converges() {
        let mut cmdb = engine();
        let biz = cmdb.create_business("Test", Document::new()).expect("biz");
        cmdb.insert_mainline_level(&level("region", "Region", BIZ))
            .expect("insert");
        let region = InstanceSource::of("region")
            .ids(cmdb.store(), &Filter::eq(FIELD_PARENT_ID, biz.biz_id))
            .expect("regions")[0];
        let web = child(&mut cmdb, SET, "web", region);
        child(&mut cmdb, MODULE, "nginx", web);
        cmdb.archive_business(biz.biz_id).expect("archive");

        let first = cmdb.delete_business(&[biz.biz_id]).expect("delete");
        let teardown = &first.businesses[0];
        assert_eq!(teardown.count(DeleteStage::Modules), 4);
        assert_eq!(teardown.count(DeleteStage::Sets), 2);
        assert_eq!(teardown.count(DeleteStage::CustomTopology), 1);
        assert_eq!(teardown.count(DeleteStage::Business), 1);
        assert!(matches!(
            cmdb.get_instance(BIZ, biz.biz_id),
            Err(CmdbError::InstanceNotFound { .. })
        ));

        let second = cmdb.delete_business(&[biz.biz_id]).expect("delete again");
        assert_eq!(second.businesses[0].total(), 0);
        assert_no_orphans(&cmdb);
    }

    /// S3.4: Hosts keep a business alive.
    #[test]
    fn hosting_business_cannot_be_archived() {
        let mut cmdb = engine();
        let biz = cmdb.create_business("Test", Document::new()).expect("biz");
        let h1 = host(&mut cmdb, "10.0.0.1");
        let idle = biz.module(DEFAULT_FLAG_IDLE_MODULE).expect("idle module");
        cmdb.assign_host(h1, idle).expect("assign");

        let err = cmdb.archive_business(biz.biz_id);
        assert!(matches!(err, Err(CmdbError::ArchiveBusinessHasHost(_))));
    }
}

// =============================================================================
// S4: INSTANCE ASSOCIATIONS
// =============================================================================

mod s4_instance_associations {
    use super::*;

    fn with_switch() -> Engine {
        let mut cmdb = engine();
        cmdb.store_mut()
            .create_model(&ObjectType::custom("switch", "Switch", "network", "icon-switch"))
            .expect("switch");
        cmdb
    }

    fn connect(cmdb: &mut Engine, mapping: Mapping) -> String {
        cmdb.create_common_association(&NewAssociation {
            obj_id: HOST.into(),
            asst_obj_id: "switch".into(),
            asst_kind: "connect".into(),
            mapping,
            on_delete: OnDelete::Nothing,
        })
        .expect("model association")
        .obj_asst_id
    }

    fn switch(cmdb: &mut Engine, name: &str) -> InstId {
        cmdb.create_instance("switch", document([("bk_inst_name", name)]))
            .expect("switch")
    }

    /// S4.1: A one-to-one source can only be linked once.
    #[test]
    fn one_to_one_twice_from_same_source() {
        let mut cmdb = with_switch();
        let obj_asst_id = connect(&mut cmdb, Mapping::OneToOne);
        let h1 = host(&mut cmdb, "10.0.0.1");
        let (s1, s2) = (switch(&mut cmdb, "s1"), switch(&mut cmdb, "s2"));

        cmdb.create_inst_association(&obj_asst_id, h1, s1)
            .expect("first link");
        let err = cmdb.create_inst_association(&obj_asst_id, h1, s2);
        assert!(matches!(
            err,
            Err(CmdbError::CreateMultipleInstancesForOneToOneAssociation(id)) if id == obj_asst_id
        ));
    }

    /// S4.2: Ancestors and descendants see the link from either end.
    #[test]
    fn links_are_visible_from_both_ends() {
        let mut cmdb = with_switch();
        let obj_asst_id = connect(&mut cmdb, Mapping::ManyToMany);
        let h1 = host(&mut cmdb, "10.0.0.1");
        let s1 = switch(&mut cmdb, "core");
        cmdb.create_inst_association(&obj_asst_id, h1, s1)
            .expect("link");

        let below = cmdb.read_descendants(HOST, h1).expect("descendants");
        assert_eq!(below.len(), 1);
        assert_eq!(below[0].obj_id, "switch");
        assert_eq!(below[0].count, 1);
        assert_eq!(below[0].children[0].inst_name, "core");

        let above = cmdb.read_ancestors("switch", s1).expect("ancestors");
        assert_eq!(above.len(), 1);
        assert_eq!(above[0].obj_id, HOST);
        assert_eq!(above[0].children[0].inst_id, h1);
    }

    /// S4.3: A model association in use cannot be dropped until its
    /// instance links are gone.
    #[test]
    fn instantiated_model_association_is_kept() {
        let mut cmdb = with_switch();
        let obj_asst_id = connect(&mut cmdb, Mapping::ManyToMany);
        let h1 = host(&mut cmdb, "10.0.0.1");
        let s1 = switch(&mut cmdb, "s1");
        let edge = cmdb
            .create_inst_association(&obj_asst_id, h1, s1)
            .expect("link");
        let model = cmdb
            .store()
            .read_model_association(&obj_asst_id)
            .expect("read")
            .expect("model association");

        let err = cmdb.delete_common_association(model.id);
        assert!(matches!(
            err,
            Err(CmdbError::AssociationHasAlreadyBeenInstantiated(_))
        ));
        assert_eq!(cmdb.delete_inst_association(edge.id).expect("unlink"), 1);
        cmdb.delete_common_association(model.id).expect("drop");
    }

    /// S4.4: Mainline edges are neither created nor deleted through the
    /// common association API.
    #[test]
    fn mainline_edges_are_reserved() {
        let mut cmdb = with_switch();
        let err = cmdb.create_common_association(&NewAssociation {
            obj_id: "switch".into(),
            asst_obj_id: SET.into(),
            asst_kind: MAINLINE_KIND.into(),
            mapping: Mapping::OneToMany,
            on_delete: OnDelete::Nothing,
        });
        assert!(matches!(err, Err(CmdbError::AssociationKindMainlineUnavailable)));

        let edge = cmdb
            .store()
            .read_model_association("set_bk_mainline_biz")
            .expect("read")
            .expect("mainline edge");
        assert!(cmdb.delete_common_association(edge.id).is_err());
    }
}

// =============================================================================
// S5: TOPOLOGY STATISTICS
// =============================================================================

mod s5_topology_statistics {
    use super::*;

    fn stats() -> SubtreeOptions {
        SubtreeOptions {
            with_statistics: true,
            with_default: false,
        }
    }

    fn find<'a>(tree: &'a [TopoNode], obj: &str, name: &str) -> &'a TopoNode {
        let mut found = None;
        for root in tree {
            root.walk(&mut |node: &'a TopoNode| {
                if node.obj_id == obj && node.inst_name == name {
                    found = Some(node);
                }
            });
        }
        found.expect("node")
    }

    /// S5.1: Modules count distinct hosts; the business counts the union
    /// across its sets.
    #[test]
    fn business_host_count_is_a_union() {
        let mut cmdb = engine();
        let biz = cmdb.create_business("Test", Document::new()).expect("biz");
        let web = child(&mut cmdb, SET, "web", biz.biz_id);
        let db = child(&mut cmdb, SET, "db", biz.biz_id);
        let nginx = child(&mut cmdb, MODULE, "nginx", web);
        let mysql = child(&mut cmdb, MODULE, "mysql", db);
        let (h1, h2) = (host(&mut cmdb, "10.0.0.1"), host(&mut cmdb, "10.0.0.2"));
        cmdb.assign_host(h1, nginx).expect("assign");
        cmdb.assign_host(h1, mysql).expect("assign");
        cmdb.assign_host(h2, mysql).expect("assign");
        cmdb.assign_host(h2, mysql).expect("assign twice");

        let tree = cmdb.read_subtree(BIZ, biz.biz_id, stats()).expect("subtree");
        assert_eq!(find(&tree, MODULE, "nginx").host_count, Some(1));
        assert_eq!(find(&tree, MODULE, "mysql").host_count, Some(2));
        assert_eq!(find(&tree, SET, "web").host_count, Some(1));
        assert_eq!(find(&tree, SET, "db").host_count, Some(2));
        assert_eq!(tree[0].host_count, Some(2));
    }

    /// S5.2: Service instances add up along the tree.
    #[test]
    fn service_instances_are_summed() {
        let mut cmdb = engine();
        let biz = cmdb.create_business("Test", Document::new()).expect("biz");
        let web = child(&mut cmdb, SET, "web", biz.biz_id);
        let nginx = child(&mut cmdb, MODULE, "nginx", web);
        let php = child(&mut cmdb, MODULE, "php", web);
        let services = Collection::table(TABLE_SERVICE_INSTANCES);
        for module in [nginx, php, php] {
            cmdb.store_mut()
                .create(
                    &services,
                    document([
                        (FIELD_MODULE_ID, Value::from(module)),
                        (FIELD_BIZ_ID, Value::from(biz.biz_id)),
                    ]),
                )
                .expect("service instance");
        }

        let tree = cmdb.read_subtree(BIZ, biz.biz_id, stats()).expect("subtree");
        assert_eq!(find(&tree, MODULE, "php").service_instance_count, Some(2));
        assert_eq!(find(&tree, SET, "web").service_instance_count, Some(3));
        assert_eq!(tree[0].service_instance_count, Some(3));
    }

    /// S5.3: Without statistics no counts are reported.
    #[test]
    fn statistics_are_optional() {
        let mut cmdb = engine();
        let biz = cmdb.create_business("Test", Document::new()).expect("biz");
        child(&mut cmdb, SET, "web", biz.biz_id);
        let tree = cmdb
            .read_subtree(BIZ, biz.biz_id, SubtreeOptions::default())
            .expect("subtree");
        let mut counted = false;
        tree[0].walk(&mut |node: &TopoNode| counted |= node.host_count.is_some());
        assert!(!counted);
    }
}

// =============================================================================
// S6: CONSISTENCY ACROSS LEVEL CHANGES
// =============================================================================

mod s6_level_round_trip {
    use super::*;

    /// S6.1: Insert then remove restores the edge and the reachable sets.
    #[test]
    fn insert_then_remove_restores_topology() {
        let mut cmdb = engine();
        let b1 = cmdb.create_business("b1", Document::new()).expect("biz");
        let b2 = cmdb.create_business("b2", Document::new()).expect("biz");
        for (biz, name) in [(b1.biz_id, "web"), (b1.biz_id, "db"), (b2.biz_id, "cache")] {
            let set = child(&mut cmdb, SET, name, biz);
            child(&mut cmdb, MODULE, "main", set);
        }
        let before = (reachable_sets(&cmdb, b1.biz_id), reachable_sets(&cmdb, b2.biz_id));

        cmdb.insert_mainline_level(&level("zone", "Zone", BIZ))
            .expect("insert");
        assert_no_orphans(&cmdb);
        assert!(
            cmdb.store()
                .read_model_association("set_bk_mainline_biz")
                .expect("read")
                .is_none()
        );

        cmdb.remove_mainline_level("zone").expect("remove");
        assert_no_orphans(&cmdb);
        let chain = cmdb.get_mainline_chain(BIZ).expect("chain");
        assert_eq!(chain.objects(), ["biz", "set", "module"]);
        assert!(
            cmdb.store()
                .read_model_association("set_bk_mainline_biz")
                .expect("read")
                .is_some()
        );
        let after = (reachable_sets(&cmdb, b1.biz_id), reachable_sets(&cmdb, b2.biz_id));
        assert_eq!(before, after);
    }

    /// S6.2: Stacked levels keep modules attached to their sets.
    #[test]
    fn stacked_levels_keep_modules_placed() {
        let mut cmdb = engine();
        let biz = cmdb.create_business("b1", Document::new()).expect("biz");
        let web = child(&mut cmdb, SET, "web", biz.biz_id);
        let nginx = child(&mut cmdb, MODULE, "nginx", web);

        cmdb.insert_mainline_level(&level("region", "Region", BIZ))
            .expect("region");
        cmdb.insert_mainline_level(&level("zone", "Zone", "region"))
            .expect("zone");
        let chain = cmdb.get_mainline_chain(BIZ).expect("chain");
        assert_eq!(chain.custom_levels(), ["region", "zone"]);
        assert_eq!(parent_of(&cmdb, MODULE, nginx), web.0);
        assert_no_orphans(&cmdb);

        cmdb.remove_mainline_level("region").expect("remove region");
        let chain = cmdb.get_mainline_chain(BIZ).expect("chain");
        assert_eq!(chain.objects(), ["biz", "zone", "set", "module"]);
        let zone = parent_of(&cmdb, SET, web);
        assert_eq!(parent_of(&cmdb, "zone", InstId(zone)), biz.biz_id.0);
        assert_no_orphans(&cmdb);
    }

    /// S6.3: Re-running an insert that already happened is refused, not
    /// duplicated.
    #[test]
    fn repeated_insert_is_refused() {
        let mut cmdb = engine();
        cmdb.insert_mainline_level(&level("region", "Region", BIZ))
            .expect("insert");
        let err = cmdb.insert_mainline_level(&level("region", "Region", BIZ));
        assert!(matches!(err, Err(CmdbError::DuplicateItem(_))));
        let chain = cmdb.get_mainline_chain(BIZ).expect("chain");
        assert_eq!(chain.custom_levels(), ["region"]);
    }

    /// S6.4: Deleting a set removes its modules with it.
    #[test]
    fn set_delete_cascades_to_modules() {
        let mut cmdb = engine();
        let biz = cmdb.create_business("b1", Document::new()).expect("biz");
        let web = child(&mut cmdb, SET, "web", biz.biz_id);
        let nginx = child(&mut cmdb, MODULE, "nginx", web);
        child(&mut cmdb, MODULE, "php", web);

        assert_eq!(cmdb.delete_instances(SET, &[web]).expect("delete"), 3);
        assert!(matches!(
            cmdb.get_instance(MODULE, nginx),
            Err(CmdbError::InstanceNotFound { .. })
        ));
        assert_no_orphans(&cmdb);
    }

    /// S6.5: A business created under a custom level keeps its idle set
    /// even when a region shares its numeric id.
    #[test]
    fn late_business_keeps_idle_set() {
        let mut cmdb = engine();
        let first = cmdb.create_business("first", Document::new()).expect("first");
        let web = child(&mut cmdb, SET, "web", first.biz_id);
        cmdb.insert_mainline_level(&level("region", "Region", BIZ))
            .expect("insert");
        let late = cmdb.create_business("late", Document::new()).expect("late");
        assert_eq!(parent_of(&cmdb, SET, late.idle_set_id), late.biz_id.0);

        let mut regions = Vec::new();
        while regions.last().is_none_or(|id: &InstId| id.0 < late.biz_id.0) {
            let name = format!("east{}", regions.len());
            regions.push(child(&mut cmdb, "region", &name, first.biz_id));
        }
        let colliding = regions.pop().expect("colliding region");
        assert_eq!(colliding, late.biz_id);

        let with_default = SubtreeOptions { with_default: true, ..SubtreeOptions::default() };
        let tree = cmdb
            .read_subtree(BIZ, late.biz_id, with_default)
            .expect("subtree");
        let idle: Vec<InstId> = tree[0].children.iter().map(|node| node.inst_id).collect();
        assert_eq!(idle, vec![late.idle_set_id]);
        assert_eq!(tree[0].children[0].children.len(), 3);

        assert_eq!(cmdb.delete_instances("region", &[colliding]).expect("delete"), 1);
        assert_eq!(parent_of(&cmdb, SET, late.idle_set_id), late.biz_id.0);

        cmdb.remove_mainline_level("region").expect("remove region");
        assert_eq!(parent_of(&cmdb, SET, late.idle_set_id), late.biz_id.0);
        assert_eq!(parent_of(&cmdb, SET, web), first.biz_id.0);
        assert_eq!(reachable_sets(&cmdb, first.biz_id), BTreeSet::from(["web".to_string()]));
        let tree = cmdb
            .read_subtree(BIZ, late.biz_id, with_default)
            .expect("subtree");
        assert_eq!(tree[0].children.len(), 1);
        assert_no_orphans(&cmdb);
    }
}

// =============================================================================
// S7: PERSISTENT BACKEND
// =============================================================================

mod s7_persistent_backend {
    use super::*;

    /// S7.1: Schema and instances survive a reopen of the database.
    #[test]
    fn topology_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cmdb.redb");

        let biz_id = {
            let store = StorageBackend::redb(&path).expect("open");
            assert!(store.is_persistent());
            let mut cmdb = Cmdb::new(store, AuditTrail::new());
            cmdb.bootstrap().expect("bootstrap");
            let biz = cmdb.create_business("b1", Document::new()).expect("biz");
            child(&mut cmdb, SET, "web", biz.biz_id);
            cmdb.insert_mainline_level(&level("region", "Region", BIZ))
                .expect("insert");
            biz.biz_id
        };

        let mut cmdb = Cmdb::new(StorageBackend::redb(&path).expect("reopen"), AuditTrail::new());
        cmdb.bootstrap().expect("bootstrap again");
        let chain = cmdb.get_mainline_chain(BIZ).expect("chain");
        assert_eq!(chain.objects(), ["biz", "region", "set", "module"]);
        assert_no_orphans(&cmdb);

        let businesses = InstanceSource::of(BIZ)
            .count(cmdb.store(), &Filter::All)
            .expect("count");
        assert_eq!(businesses, 2);
        let region = InstanceSource::of("region")
            .find_all(cmdb.store(), &Filter::eq(FIELD_PARENT_ID, biz_id))
            .expect("regions");
        assert_eq!(region.len(), 1);
    }
}
