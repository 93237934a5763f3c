//! # CLI Command Implementations
//!
//! Each `cmd_*` function opens the engine, runs one operation and prints
//! the outcome, as pretty JSON in `--json-mode` and as a short summary
//! otherwise.

use super::{
    AsstCommand, Backend, BizCommand, Context, HostCommand, InstCommand, LevelCommand,
    ModelAsstCommand,
};
use crate::audit::AuditSink;
use crate::json::{document_from_json, document_to_json};
use cmdb_core::{
    Cmdb, CmdbError, Document, DocumentExt, Filter, InstId, InstanceSource, Mapping,
    NewAssociation, NewLevel, OnDelete, Page, StorageBackend, SubtreeOptions, TopoNode,
    primitives::{FIELD_BIZ_ID, FIELD_PARENT_ID},
};
use serde::Serialize;
use tracing::{debug, info};

/// Engine as the binary runs it.
pub type Engine = Cmdb<StorageBackend, AuditSink>;

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Create the database and seed the built-in schema.
pub fn cmd_init(ctx: &Context, force: bool) -> Result<(), CmdbError> {
    if ctx.backend == Backend::Redb && ctx.database.exists() {
        if !force {
            return Err(CmdbError::Io(format!(
                "database {} already exists, use --force to overwrite",
                ctx.database.display()
            )));
        }
        std::fs::remove_file(&ctx.database)
            .map_err(|e| CmdbError::Io(format!("remove {}: {}", ctx.database.display(), e)))?;
        info!(database = %ctx.database.display(), "existing database removed");
    }

    let engine = open_engine(ctx)?;
    let chain = engine.get_mainline_chain(cmdb_core::primitives::BIZ)?;

    if ctx.json_mode {
        print_json(&serde_json::json!({
            "database": ctx.database.to_string_lossy(),
            "persistent": engine.store().is_persistent(),
            "chain": chain.objects(),
        }));
    } else if !ctx.quiet {
        println!("Initialized database at {:?}", ctx.database);
        println!("Mainline: {chain}");
    }
    Ok(())
}

// =============================================================================
// CHAIN COMMAND
// =============================================================================

/// Show the mainline chain.
pub fn cmd_chain(ctx: &Context) -> Result<(), CmdbError> {
    let engine = open_engine(ctx)?;
    let topo = engine.search_mainline_object_topo()?;

    if ctx.json_mode {
        print_json(&to_json(&topo)?);
        return Ok(());
    }
    if ctx.quiet {
        return Ok(());
    }
    println!("Mainline Chain");
    println!("==============");
    for object in &topo {
        println!(
            "{:<16} {:<20} parent: {:<12} child: {}",
            object.obj_id,
            object.obj_name,
            object.pre_obj_id.as_deref().unwrap_or("-"),
            object.next_obj_id.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

// =============================================================================
// LEVEL COMMANDS
// =============================================================================

pub fn cmd_level(ctx: &Context, command: LevelCommand) -> Result<(), CmdbError> {
    let mut engine = open_engine(ctx)?;
    match command {
        LevelCommand::Insert {
            obj_id,
            name,
            parent,
            classification,
            icon,
        } => {
            let inserted = engine.insert_mainline_level(&NewLevel {
                obj_id,
                name,
                classification,
                icon,
                parent_obj_id: parent.clone(),
            })?;
            report(ctx, &inserted, || {
                println!(
                    "Inserted {} below {}: {} instances created, {} re-parented",
                    inserted.object.obj_id,
                    parent,
                    inserted.created.len(),
                    inserted.reparented
                );
            })
        }
        LevelCommand::Remove { obj_id } => {
            let removed = engine.remove_mainline_level(&obj_id)?;
            report(ctx, &removed, || {
                println!(
                    "Removed {}: {} instances deleted, {} re-parented",
                    removed.obj_id,
                    removed.removed.len(),
                    removed.reparented
                );
            })
        }
    }
}

// =============================================================================
// BUSINESS COMMANDS
// =============================================================================

pub fn cmd_biz(ctx: &Context, command: BizCommand) -> Result<(), CmdbError> {
    let mut engine = open_engine(ctx)?;
    match command {
        BizCommand::Create { name, data } => {
            let extra = parse_data(data.as_deref())?;
            let skeleton = engine.create_business(&name, extra)?;
            report(ctx, &skeleton, || {
                println!(
                    "Created business {} ({}) with idle set {} and {} modules",
                    name,
                    skeleton.biz_id,
                    skeleton.idle_set_id,
                    skeleton.modules.len()
                );
            })
        }
        BizCommand::Archive { id } => {
            engine.archive_business(InstId(id))?;
            report(ctx, &serde_json::json!({ "bk_biz_id": id, "archived": true }), || {
                println!("Archived business {id}");
            })
        }
        BizCommand::Revive { id } => {
            engine.revive_business(InstId(id))?;
            report(ctx, &serde_json::json!({ "bk_biz_id": id, "archived": false }), || {
                println!("Revived business {id}");
            })
        }
        BizCommand::Delete { ids } => {
            let ids: Vec<InstId> = ids.into_iter().map(InstId).collect();
            let teardown = engine.delete_business(&ids)?;
            report(ctx, &teardown, || {
                for business in &teardown.businesses {
                    println!("Business {}: {} rows removed", business.biz_id, business.total());
                    for (stage, removed) in &business.deleted {
                        println!("  {:<24} {removed}", stage.to_string());
                    }
                }
            })
        }
    }
}

// =============================================================================
// INSTANCE COMMANDS
// =============================================================================

pub fn cmd_inst(ctx: &Context, command: InstCommand) -> Result<(), CmdbError> {
    let mut engine = open_engine(ctx)?;
    match command {
        InstCommand::Create { obj, data } => {
            let doc = document_from_json(&data)?;
            let id = engine.create_instance(&obj, doc)?;
            let created = engine.get_instance(&obj, id)?;
            report(ctx, &document_to_json(&created), || {
                println!("Created {obj} {id}");
            })
        }
        InstCommand::Update { obj, id, data } => {
            let patch = document_from_json(&data)?;
            let source = InstanceSource::of(&obj);
            let touched =
                engine.update_instances(&obj, &source.ids_filter(&[InstId(id)]), &patch)?;
            if touched == 0 {
                return Err(CmdbError::InstanceNotFound {
                    obj_id: obj,
                    id: InstId(id),
                });
            }
            let updated = engine.get_instance(&obj, InstId(id))?;
            report(ctx, &document_to_json(&updated), || {
                println!("Updated {obj} {id}");
            })
        }
        InstCommand::Delete { obj, ids } => {
            let ids: Vec<InstId> = ids.into_iter().map(InstId).collect();
            let removed = engine.delete_instances(&obj, &ids)?;
            report(ctx, &serde_json::json!({ "deleted": removed }), || {
                println!("Deleted {removed} instances");
            })
        }
        InstCommand::List {
            obj,
            parent,
            biz,
            start,
            limit,
        } => {
            let mut filter = Filter::All;
            if let Some(parent) = parent {
                filter = filter.and(Filter::eq(FIELD_PARENT_ID, parent));
            }
            if let Some(biz) = biz {
                filter = filter.and(Filter::eq(FIELD_BIZ_ID, biz));
            }
            let found = engine.find_instances(&obj, &filter, &Page::window(start, limit))?;
            let info: Vec<serde_json::Value> = found.rows.iter().map(document_to_json).collect();
            report(
                ctx,
                &serde_json::json!({ "count": found.count, "info": info }),
                || {
                    let source = InstanceSource::of(&obj);
                    println!("{} of {} {obj} instances", found.rows.len(), found.count);
                    for row in &found.rows {
                        println!(
                            "  {:>8}  {}",
                            row.int(source.id_field()).unwrap_or(0),
                            row.text(source.name_field()).unwrap_or("")
                        );
                    }
                },
            )
        }
    }
}

pub fn cmd_host(ctx: &Context, command: HostCommand) -> Result<(), CmdbError> {
    let mut engine = open_engine(ctx)?;
    match command {
        HostCommand::Assign { host, module } => {
            engine.assign_host(InstId(host), InstId(module))?;
            report(
                ctx,
                &serde_json::json!({ "bk_host_id": host, "bk_module_id": module }),
                || println!("Host {host} placed in module {module}"),
            )
        }
        HostCommand::Unassign { host, module } => {
            let removed = engine.unassign_host(InstId(host), InstId(module))?;
            report(ctx, &serde_json::json!({ "deleted": removed }), || {
                println!("Host {host} taken out of module {module} ({removed} relations)");
            })
        }
    }
}

// =============================================================================
// ASSOCIATION COMMANDS
// =============================================================================

pub fn cmd_asst(ctx: &Context, command: AsstCommand) -> Result<(), CmdbError> {
    let mut engine = open_engine(ctx)?;
    match command {
        AsstCommand::Create {
            obj_asst_id,
            src,
            dst,
        } => {
            let edge = engine.create_inst_association(&obj_asst_id, InstId(src), InstId(dst))?;
            report(ctx, &edge, || {
                println!(
                    "Linked {} {} -> {} {} ({})",
                    edge.obj_id, edge.inst_id, edge.asst_obj_id, edge.asst_inst_id, edge.id
                );
            })
        }
        AsstCommand::Delete { id } => {
            let removed = engine.delete_inst_association(id)?;
            report(ctx, &serde_json::json!({ "deleted": removed }), || {
                println!("Deleted {removed} instance associations");
            })
        }
        AsstCommand::Related { obj, id } => {
            let ancestors = engine.read_ancestors(&obj, InstId(id))?;
            let descendants = engine.read_descendants(&obj, InstId(id))?;
            report(
                ctx,
                &serde_json::json!({
                    "ancestors": to_json(&ancestors)?,
                    "descendants": to_json(&descendants)?,
                }),
                || {
                    for (label, groups) in [("Ancestors", &ancestors), ("Descendants", &descendants)] {
                        println!("{label}:");
                        for group in groups {
                            println!("  {} ({}): {}", group.obj_id, group.obj_name, group.count);
                            for linked in &group.children {
                                println!("    {:>8}  {}", linked.inst_id.value(), linked.inst_name);
                            }
                        }
                    }
                },
            )
        }
    }
}

pub fn cmd_model_asst(ctx: &Context, command: ModelAsstCommand) -> Result<(), CmdbError> {
    let mut engine = open_engine(ctx)?;
    match command {
        ModelAsstCommand::Create {
            obj,
            asst_obj,
            kind,
            mapping,
            on_delete,
        } => {
            let model = engine.create_common_association(&NewAssociation {
                obj_id: obj,
                asst_obj_id: asst_obj,
                asst_kind: kind,
                mapping: parse_mapping(&mapping)?,
                on_delete: parse_on_delete(&on_delete)?,
            })?;
            report(ctx, &model, || {
                println!("Created model association {} ({})", model.obj_asst_id, model.id);
            })
        }
        ModelAsstCommand::Delete { id } => {
            engine.delete_common_association(id)?;
            report(ctx, &serde_json::json!({ "deleted": id }), || {
                println!("Deleted model association {id}");
            })
        }
    }
}

// =============================================================================
// TOPOLOGY COMMAND
// =============================================================================

pub fn cmd_topo(
    ctx: &Context,
    obj: &str,
    id: i64,
    with_statistics: bool,
    with_default: bool,
) -> Result<(), CmdbError> {
    let engine = open_engine(ctx)?;
    let tree = engine.read_subtree(
        obj,
        InstId(id),
        SubtreeOptions {
            with_statistics,
            with_default,
        },
    )?;
    report(ctx, &tree, || {
        for root in &tree {
            print_tree(root, 0);
        }
    })
}

fn print_tree(node: &TopoNode, depth: usize) {
    let mut line = format!(
        "{:indent$}{} {} [{}]",
        "",
        node.obj_id,
        node.inst_name,
        node.inst_id,
        indent = depth * 2
    );
    if let Some(hosts) = node.host_count {
        line.push_str(&format!(" hosts={hosts}"));
    }
    if let Some(services) = node.service_instance_count {
        line.push_str(&format!(" service_instances={services}"));
    }
    if let Some(rules) = node.host_apply_rule_count {
        line.push_str(&format!(" apply_rules={rules}"));
    }
    println!("{line}");
    for child in &node.children {
        print_tree(child, depth + 1);
    }
}

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Open the configured store and seed the built-in schema.
pub fn open_engine(ctx: &Context) -> Result<Engine, CmdbError> {
    let store = match ctx.backend {
        Backend::Redb => StorageBackend::redb(&ctx.database)?,
        Backend::Memory => StorageBackend::default(),
    };
    let audit = AuditSink::for_path(ctx.audit_log.as_deref());
    let mut engine = Cmdb::with_config(store, audit, ctx.config.engine.clone());
    engine.bootstrap()?;
    debug!(
        database = %ctx.database.display(),
        persistent = engine.store().is_persistent(),
        "engine opened"
    );
    Ok(engine)
}

/// Strict form of [`Mapping::parse`].
pub fn parse_mapping(raw: &str) -> Result<Mapping, CmdbError> {
    match raw {
        "1:1" | "1:n" | "n:n" => Ok(Mapping::parse(raw)),
        _ => Err(CmdbError::ParamsInvalid("mapping".to_string())),
    }
}

/// Strict form of [`OnDelete::parse`].
pub fn parse_on_delete(raw: &str) -> Result<OnDelete, CmdbError> {
    match raw {
        "none" | "delete_src" | "delete_dest" => Ok(OnDelete::parse(raw)),
        _ => Err(CmdbError::ParamsInvalid("on_delete".to_string())),
    }
}

fn parse_data(raw: Option<&str>) -> Result<Document, CmdbError> {
    raw.map(document_from_json)
        .transpose()
        .map(Option::unwrap_or_default)
}

fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value, CmdbError> {
    serde_json::to_value(value).map_err(|e| CmdbError::Serialization(e.to_string()))
}

fn print_json(value: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_default()
    );
}

/// Print `value` as JSON in JSON mode, otherwise run `summary` unless quiet.
fn report<T: Serialize>(
    ctx: &Context,
    value: &T,
    summary: impl FnOnce(),
) -> Result<(), CmdbError> {
    if ctx.json_mode {
        print_json(&to_json(value)?);
    } else if !ctx.quiet {
        summary();
    }
    Ok(())
}
