//! # Property-Based Tests
//!
//! Topology and teardown invariants checked over generated inputs.

use cmdb_core::mainline::instance_name_for;
use cmdb_core::primitives::{
    BIZ, DEFAULT_FLAG_RESOURCE, FIELD_BIZ_ID, FIELD_DEFAULT, FIELD_PARENT_ID, HOST,
    INST_NAME_FORBIDDEN_CHARS, MODULE, SET, TABLE_DYNAMIC_GROUPS,
};
use cmdb_core::{
    AuditTrail, Cmdb, CmdbConfig, CmdbError, Collection, DeleteStage, Document, DocumentExt,
    Filter, InstId, InstanceSource, InstanceStore, MemoryStore, NewLevel, Page, SubtreeOptions,
    TopoNode, Value, document,
};
use proptest::collection::vec;
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

type Engine = Cmdb<MemoryStore, AuditTrail>;

fn engine(config: CmdbConfig) -> Engine {
    let mut cmdb = Cmdb::with_config(MemoryStore::new(), AuditTrail::new(), config);
    cmdb.bootstrap().expect("bootstrap");
    cmdb
}

fn child(cmdb: &mut Engine, obj: &str, name: &str, parent: InstId) -> InstId {
    let field = InstanceSource::of(obj).name_field();
    cmdb.create_instance(
        obj,
        document([(field, Value::from(name)), (FIELD_PARENT_ID, Value::from(parent))]),
    )
    .expect("instance")
}

fn set_names(cmdb: &Engine, biz: InstId) -> BTreeSet<String> {
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

fn orphans(cmdb: &Engine) -> usize {
    let chain = cmdb.get_mainline_chain(BIZ).expect("chain");
    let mut missing = 0;
    for obj in chain.objects().iter().skip(1) {
        let parent_obj = chain.parent_of(obj).expect("parent object");
        for doc in InstanceSource::of(obj)
            .find_all(cmdb.store(), &Filter::All)
            .expect("instances")
        {
            let idle_set = obj == SET && doc.int(FIELD_DEFAULT) == Some(DEFAULT_FLAG_RESOURCE);
            let expected = if idle_set { BIZ } else { parent_obj };
            let parent = doc.inst_id(FIELD_PARENT_ID).expect("parent id");
            if cmdb.get_instance(expected, parent).is_err() {
                missing += 1;
            }
        }
    }
    missing
}

// =============================================================================
// MAINLINE PROPERTIES
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Any sequence of level inserts and removals keeps the chain rooted at
    /// the business, ending at the module, free of orphans, and every set
    /// reachable from the business it started in.
    #[test]
    fn level_changes_preserve_topology(
        ops in vec((any::<bool>(), 0usize..8), 1..10)
    ) {
        let mut cmdb = engine(CmdbConfig::default());
        let mut bizs = Vec::new();
        for name in ["b1", "b2"] {
            let biz = cmdb.create_business(name, Document::new()).expect("biz");
            for set in ["web", "db"] {
                let set_id = child(&mut cmdb, SET, set, biz.biz_id);
                child(&mut cmdb, MODULE, "main", set_id);
            }
            bizs.push(biz.biz_id);
        }
        let before: Vec<BTreeSet<String>> = bizs.iter().map(|&b| set_names(&cmdb, b)).collect();
        let max_levels = cmdb.config().max_topo_level;

        let mut custom: Vec<String> = Vec::new();
        for (serial, (insert, pick)) in ops.into_iter().enumerate() {
            let chain = cmdb.get_mainline_chain(BIZ).expect("chain");
            if insert || custom.is_empty() {
                let parents = &chain.objects()[..chain.len() - 1];
                let obj_id = format!("lvl{serial}");
                let result = cmdb.insert_mainline_level(&NewLevel {
                    obj_id: obj_id.clone(),
                    name: format!("Level {serial}"),
                    classification: "bk_biz_topo".to_string(),
                    icon: String::new(),
                    parent_obj_id: parents[pick % parents.len()].clone(),
                });
                match result {
                    Ok(_) => custom.push(obj_id),
                    Err(CmdbError::TopoLevelOverLimit { levels, max }) => {
                        prop_assert_eq!(max, max_levels);
                        prop_assert!(levels > max);
                    }
                    Err(other) => prop_assert!(false, "insert failed: {}", other),
                }
            } else {
                let obj_id = custom.remove(pick % custom.len());
                cmdb.remove_mainline_level(&obj_id).expect("remove");
            }

            let chain = cmdb.get_mainline_chain(BIZ).expect("chain");
            prop_assert_eq!(chain.objects().first().map(String::as_str), Some(BIZ));
            prop_assert_eq!(chain.objects().last().map(String::as_str), Some(MODULE));
            prop_assert_eq!(chain.len(), 3 + custom.len());
            prop_assert!(chain.topo_levels() <= max_levels);
            prop_assert_eq!(orphans(&cmdb), 0);
        }

        let after: Vec<BTreeSet<String>> = bizs.iter().map(|&b| set_names(&cmdb, b)).collect();
        prop_assert_eq!(before, after);
    }

    /// Businesses created after a level insert keep their idle set under
    /// themselves, however many custom-level instances are added around
    /// them, and the level can still be removed.
    #[test]
    fn late_businesses_keep_idle_sets(
        late_count in 1usize..4,
        regions in vec((0usize..4, any::<bool>()), 0..12),
    ) {
        let mut cmdb = engine(CmdbConfig::default());
        let first = cmdb.create_business("first", Document::new()).expect("first");
        child(&mut cmdb, SET, "web", first.biz_id);
        cmdb.insert_mainline_level(&NewLevel {
            obj_id: "region".to_string(),
            name: "Region".to_string(),
            classification: "bk_biz_topo".to_string(),
            icon: String::new(),
            parent_obj_id: BIZ.to_string(),
        })
        .expect("insert");

        let mut bizs = vec![(first.biz_id, first.idle_set_id)];
        for n in 0..late_count {
            let late = cmdb.create_business(&format!("late{n}"), Document::new()).expect("late");
            bizs.push((late.biz_id, late.idle_set_id));
        }
        for (i, (pick, with_set)) in regions.into_iter().enumerate() {
            let (biz, _) = bizs[pick % bizs.len()];
            let region = child(&mut cmdb, "region", &format!("r{i}"), biz);
            if with_set {
                child(&mut cmdb, SET, &format!("s{i}"), region);
            }
        }

        let with_default = SubtreeOptions { with_default: true, ..SubtreeOptions::default() };
        let idle_of = |cmdb: &Engine, biz: InstId| -> Vec<InstId> {
            let tree = cmdb.read_subtree(BIZ, biz, with_default).expect("subtree");
            let mut idle = Vec::new();
            for root in &tree {
                root.walk(&mut |node: &TopoNode| {
                    if node.obj_id == SET && node.default == DEFAULT_FLAG_RESOURCE {
                        idle.push(node.inst_id);
                    }
                });
            }
            idle
        };
        let parent = |cmdb: &Engine, set: InstId| {
            cmdb.get_instance(SET, set).expect("set").int(FIELD_PARENT_ID)
        };

        for &(biz, idle_set) in &bizs {
            prop_assert_eq!(parent(&cmdb, idle_set), Some(biz.0));
            prop_assert_eq!(idle_of(&cmdb, biz), vec![idle_set]);
        }
        prop_assert_eq!(orphans(&cmdb), 0);
        let before: Vec<BTreeSet<String>> = bizs.iter().map(|&(b, _)| set_names(&cmdb, b)).collect();

        cmdb.remove_mainline_level("region").expect("remove");

        for &(biz, idle_set) in &bizs {
            prop_assert_eq!(parent(&cmdb, idle_set), Some(biz.0));
            prop_assert_eq!(idle_of(&cmdb, biz), vec![idle_set]);
        }
        prop_assert_eq!(orphans(&cmdb), 0);
        let after: Vec<BTreeSet<String>> = bizs.iter().map(|&(b, _)| set_names(&cmdb, b)).collect();
        prop_assert_eq!(before, after);
    }

    /// Derived instance names never carry forbidden characters and keep
    /// everything else in order.
    #[test]
    fn instance_names_are_sanitized(name in "[a-z#/,><| ]{0,24}") {
        let clean = instance_name_for(&name);
        prop_assert!(!clean.chars().any(|c| INST_NAME_FORBIDDEN_CHARS.contains(&c)));
        let kept: String = name
            .chars()
            .filter(|c| !INST_NAME_FORBIDDEN_CHARS.contains(c))
            .collect();
        prop_assert_eq!(instance_name_for(&clean), clean.clone());
        prop_assert_eq!(clean, kept);
    }
}

// =============================================================================
// STORE AND FILTER PROPERTIES
// =============================================================================

proptest! {
    /// A page window returns the right slice and the full match count.
    #[test]
    fn page_window_slices_matches(
        values in vec(0i64..20, 0..40),
        start in 0usize..45,
        limit in 1usize..15,
    ) {
        let rows = Collection::table("cc_Sample");
        let mut store = MemoryStore::new();
        for v in &values {
            store.create(&rows, document([("v", *v)])).expect("create");
        }
        let even = Filter::is_in("v", (0i64..20).filter(|v| v % 2 == 0));
        let expected = values.iter().filter(|v| *v % 2 == 0).count();

        let page = store.find(&rows, &even, &Page::window(start, limit)).expect("find");
        prop_assert_eq!(page.count, expected as u64);
        prop_assert_eq!(page.rows.len(), expected.saturating_sub(start).min(limit));
        prop_assert!(page.rows.iter().all(|r| r.int("v").is_some_and(|v| v % 2 == 0)));
    }

    /// `and`/`or` compose like boolean logic and `not_in` negates `is_in`.
    #[test]
    fn filters_compose_logically(
        a in 0i64..5,
        b in 0i64..5,
        wanted in vec(0i64..5, 0..5),
    ) {
        let doc = document([("a", a), ("b", b)]);
        let on_a = Filter::eq("a", 2);
        let on_b = Filter::ne("b", 3);

        prop_assert_eq!(
            on_a.clone().and(on_b.clone()).matches(&doc),
            on_a.matches(&doc) && on_b.matches(&doc)
        );
        prop_assert_eq!(
            on_a.clone().or(on_b.clone()).matches(&doc),
            on_a.matches(&doc) || on_b.matches(&doc)
        );
        prop_assert_eq!(
            Filter::is_in("a", wanted.clone()).matches(&doc),
            !Filter::not_in("a", wanted).matches(&doc)
        );
    }
}

// =============================================================================
// BUSINESS PROPERTIES
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Teardown removes every owned row whatever the batch size, and a
    /// second run finds nothing.
    #[test]
    fn teardown_is_complete_and_idempotent(
        page_size in 1usize..6,
        groups in 0usize..12,
        sets in vec("[a-z]{3,8}", 0..5),
    ) {
        let mut cmdb = engine(CmdbConfig { page_size, ..CmdbConfig::default() });
        let biz = cmdb.create_business("doomed", Document::new()).expect("biz");
        let sets: BTreeSet<String> = sets.into_iter().collect();
        for name in &sets {
            let set_id = child(&mut cmdb, SET, name, biz.biz_id);
            child(&mut cmdb, MODULE, "main", set_id);
        }
        let owned = document([(FIELD_BIZ_ID, Value::from(biz.biz_id))]);
        for _ in 0..groups {
            cmdb.store_mut()
                .create(&Collection::table(TABLE_DYNAMIC_GROUPS), owned.clone())
                .expect("group");
        }

        cmdb.archive_business(biz.biz_id).expect("archive");
        let report = cmdb.delete_business(&[biz.biz_id]).expect("delete");
        let teardown = &report.businesses[0];
        prop_assert_eq!(teardown.count(DeleteStage::DynamicGroups), groups as u64);
        prop_assert_eq!(teardown.count(DeleteStage::Sets), sets.len() as u64 + 1);
        prop_assert_eq!(teardown.count(DeleteStage::Modules), sets.len() as u64 + 3);

        let by_biz = Filter::eq(FIELD_BIZ_ID, biz.biz_id);
        for obj in [SET, MODULE] {
            prop_assert_eq!(InstanceSource::of(obj).count(cmdb.store(), &by_biz).expect("count"), 0);
        }
        let again = cmdb.delete_business(&[biz.biz_id]).expect("delete again");
        prop_assert_eq!(again.businesses[0].total(), 0);
    }

    /// Host counts are distinct per module and a union per business.
    #[test]
    fn host_counts_are_distinct(
        placements in vec((0usize..6, 0usize..4), 0..20)
    ) {
        let mut cmdb = engine(CmdbConfig::default());
        let biz = cmdb.create_business("shop", Document::new()).expect("biz");
        let mut modules = Vec::new();
        for set in ["web", "db"] {
            let set_id = child(&mut cmdb, SET, set, biz.biz_id);
            for module in ["a", "b"] {
                modules.push(child(&mut cmdb, MODULE, module, set_id));
            }
        }
        let hosts: Vec<InstId> = (0..6)
            .map(|i| {
                cmdb.create_instance(HOST, document([("bk_host_innerip", format!("10.0.0.{i}"))]))
                    .expect("host")
            })
            .collect();

        let mut per_module: BTreeMap<InstId, BTreeSet<InstId>> = BTreeMap::new();
        for (host, module) in placements {
            cmdb.assign_host(hosts[host], modules[module]).expect("assign");
            per_module.entry(modules[module]).or_default().insert(hosts[host]);
        }
        let everyone: BTreeSet<InstId> = per_module.values().flatten().copied().collect();

        let tree = cmdb
            .read_subtree(BIZ, biz.biz_id, SubtreeOptions { with_statistics: true, with_default: false })
            .expect("subtree");
        prop_assert_eq!(tree[0].host_count, Some(everyone.len() as u64));
        let mut checked = 0;
        tree[0].walk(&mut |node: &TopoNode| {
            if node.obj_id == MODULE {
                let expected = per_module.get(&node.inst_id).map_or(0, BTreeSet::len);
                assert_eq!(node.host_count, Some(expected as u64));
                checked += 1;
            }
        });
        prop_assert_eq!(checked, modules.len());
    }
}
