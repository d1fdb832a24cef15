//! The diff engine: compares two normalized catalogs and emits an ordered,
//! deterministic DDL step sequence.
//!
//! Emission runs in four strictly ordered phases:
//! 1. pre-drop of materialized views that depend on dropped or structurally
//!    modified tables;
//! 2. drops in reverse dependency order;
//! 3. creates in dependency order, with FK-cycle edges deferred to separate
//!    `ALTER TABLE … ADD CONSTRAINT` statements and function-referencing
//!    policies deferred past `CREATE FUNCTION`;
//! 4. in-place modifications.
//!
//! The engine performs no I/O and treats its inputs as immutable; an
//! invariant violation in either catalog is an internal error.

mod table;
mod topo;

pub use topo::{Cycle, DepGraph};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex_lite::Regex;

use crate::ddl;
use crate::error::{PgplanError, Result};
use crate::model::{
    qualified, Catalog, ConstraintKind, Routine, Schema, Table, TypeDef, TypeKind, View,
};
use crate::parse::{directives_for, DirectiveMap};
use crate::plan::{Step, StepKind, StepOp};

pub(crate) struct DiffContext<'a> {
    pub target_schema: &'a str,
    pub directives: &'a DirectiveMap,
    /// Lowercased names (`name` and `schema.name`) of functions that exist
    /// only in the desired catalog.
    pub added_functions: BTreeSet<String>,
}

/// Compare two catalogs and produce the ordered step list.
///
/// `directives` carries `--pgschema-*` annotations scanned from the desired
/// DDL; pass an empty map when diffing two live snapshots.
pub fn diff(
    old: &Catalog,
    new: &Catalog,
    target_schema: &str,
    directives: &DirectiveMap,
) -> Result<Vec<Step>> {
    old.check_invariants()
        .map_err(|reason| PgplanError::DiffInternal {
            reason: format!("old catalog: {}", reason),
        })?;
    new.check_invariants()
        .map_err(|reason| PgplanError::DiffInternal {
            reason: format!("new catalog: {}", reason),
        })?;

    let empty_schema = Schema::new(target_schema);
    let old_schema = old.schema(target_schema).unwrap_or(&empty_schema);
    let new_schema = new.schema(target_schema).unwrap_or(&empty_schema);

    let ctx = DiffContext {
        target_schema,
        directives,
        added_functions: added_function_names(old_schema, new_schema),
    };

    let tables = partition(
        &managed_tables(old_schema),
        &managed_tables(new_schema),
        |a, b| a != b,
    );
    let views = partition(&borrow_map(&old_schema.views), &borrow_map(&new_schema.views), |a, b| {
        a != b
    });

    let mut steps: Vec<Step> = Vec::new();

    // ── Phase 1: pre-drop dependent materialized views ──
    let mut predropped_views: BTreeSet<String> = BTreeSet::new();
    let mut recreate_views: BTreeSet<String> = BTreeSet::new();
    {
        let mut touched_tables: BTreeSet<&str> = BTreeSet::new();
        for name in &tables.dropped {
            touched_tables.insert(*name);
        }
        for name in &tables.modified {
            let old_table = old_schema.tables.get(*name).unwrap();
            let new_table = new_schema.tables.get(*name).unwrap();
            if table::structurally_changed(old_table, new_table) {
                touched_tables.insert(*name);
            }
        }
        for (name, view) in &old_schema.views {
            if !view.materialized {
                continue;
            }
            let depends = touched_tables
                .iter()
                .any(|t| references_identifier(&view.query, t));
            if !depends {
                continue;
            }
            let survives = new_schema.views.contains_key(name);
            steps.push(Step::new(
                ddl::drop_view(view, target_schema),
                StepKind::View,
                if survives { StepOp::Recreate } else { StepOp::Drop },
                qualified(&view.schema, name),
            ));
            predropped_views.insert(name.clone());
            if survives {
                recreate_views.insert(name.clone());
            }
        }
    }

    // ── Phase 2: drops in reverse dependency order ──

    // Triggers removed or changed on surviving tables (they may reference
    // functions about to be dropped)
    for name in &tables.modified {
        let old_table = old_schema.tables.get(*name).unwrap();
        let new_table = new_schema.tables.get(*name).unwrap();
        for (trigger_name, trigger) in &old_table.triggers {
            let replaced = new_table.triggers.get(trigger_name);
            if replaced.is_none() || replaced != Some(trigger) {
                steps.push(Step::new(
                    ddl::drop_trigger(trigger, target_schema),
                    StepKind::TableTrigger,
                    if replaced.is_none() {
                        StepOp::Drop
                    } else {
                        StepOp::Recreate
                    },
                    format!("{}.{}", qualified(&old_table.schema, name), trigger_name),
                ));
            }
        }
    }

    // Dropped routines and aggregates
    for (key, routine) in &old_schema.functions {
        if !new_schema.functions.contains_key(key) {
            steps.push(drop_routine_step(routine, target_schema, StepKind::Function));
        }
    }
    for (key, routine) in &old_schema.procedures {
        if !new_schema.procedures.contains_key(key) {
            steps.push(drop_routine_step(routine, target_schema, StepKind::Procedure));
        }
    }
    for (key, aggregate) in &old_schema.aggregates {
        if !new_schema.aggregates.contains_key(key) {
            steps.push(Step::new(
                ddl::drop_aggregate(aggregate, target_schema),
                StepKind::Aggregate,
                StepOp::Drop,
                qualified(&aggregate.schema, key),
            ));
        }
    }

    // Dropped views, and modified materialized views not already pre-dropped,
    // in reverse view-dependency order
    {
        let order = view_topo_order(&old_schema.views, target_schema)?;
        for name in order.iter().rev() {
            if predropped_views.contains(name) {
                continue;
            }
            let view = old_schema.views.get(name).unwrap();
            let dropped = tables_contains(&views.dropped, name);
            let mat_changed = view.materialized && tables_contains(&views.modified, name);
            if dropped || mat_changed {
                steps.push(Step::new(
                    ddl::drop_view(view, target_schema),
                    StepKind::View,
                    if dropped { StepOp::Drop } else { StepOp::Recreate },
                    qualified(&view.schema, name),
                ));
                if mat_changed {
                    recreate_views.insert(name.clone());
                }
            }
        }
    }

    // Dropped tables in reverse FK order; FK constraints on surviving tables
    // that reference a dropped table are dropped first
    let mut early_dropped_constraints: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    {
        let dropped_set: BTreeSet<&str> = tables.dropped.iter().copied().collect();
        for (name, table) in old_schema.tables.iter() {
            if dropped_set.contains(name.as_str()) || table.is_external {
                continue;
            }
            for constraint in table.constraints.values() {
                if let ConstraintKind::ForeignKey {
                    ref_schema,
                    ref_table,
                    ..
                } = &constraint.kind
                {
                    if ref_schema == target_schema && dropped_set.contains(ref_table.as_str()) {
                        steps.push(Step::new(
                            ddl::drop_constraint(table, &constraint.name, target_schema),
                            StepKind::TableConstraint,
                            StepOp::Drop,
                            format!("{}.{}", qualified(&table.schema, name), constraint.name),
                        ));
                        early_dropped_constraints
                            .entry(name.clone())
                            .or_default()
                            .insert(constraint.name.clone());
                    }
                }
            }
        }

        let mut graph = DepGraph::new();
        for name in &tables.dropped {
            graph.add_node(name);
        }
        for name in &tables.dropped {
            let table = old_schema.tables.get(*name).unwrap();
            for constraint in table.constraints.values() {
                if let ConstraintKind::ForeignKey {
                    ref_schema,
                    ref_table,
                    ..
                } = &constraint.kind
                {
                    if ref_schema == target_schema {
                        graph.add_edge(name, ref_table);
                    }
                }
            }
        }
        // Cycles among dropped tables are cut by dropping one FK up front
        let order = loop {
            match graph.sort() {
                Ok(order) => break order,
                Err(cycle) => {
                    let (referrer, referenced) = cycle.break_edge();
                    let table = old_schema.tables.get(&referrer).unwrap();
                    for constraint in table.constraints.values() {
                        if fk_references(constraint, target_schema, &referenced) {
                            steps.push(Step::new(
                                ddl::drop_constraint(table, &constraint.name, target_schema),
                                StepKind::TableConstraint,
                                StepOp::Drop,
                                format!(
                                    "{}.{}",
                                    qualified(&table.schema, &referrer),
                                    constraint.name
                                ),
                            ));
                        }
                    }
                    graph.remove_edge(&referrer, &referenced);
                }
            }
        };
        // Create order lists referenced tables first; drop in reverse
        for name in order.iter().rev() {
            let table = old_schema.tables.get(name).unwrap();
            steps.push(Step::new(
                ddl::drop_table(table, target_schema),
                StepKind::Table,
                StepOp::Drop,
                qualified(&table.schema, name),
            ));
        }
    }

    // Dropped sequences, types, default privileges, extensions
    for (name, sequence) in &old_schema.sequences {
        if sequence.owned_by.is_some() {
            continue;
        }
        if !new_schema.sequences.contains_key(name) {
            steps.push(Step::new(
                ddl::drop_sequence(sequence, target_schema),
                StepKind::Sequence,
                StepOp::Drop,
                qualified(&sequence.schema, name),
            ));
        }
    }
    for (name, type_def) in &old_schema.types {
        if !new_schema.types.contains_key(name) {
            steps.push(Step::new(
                ddl::drop_type(type_def, target_schema),
                StepKind::Type,
                StepOp::Drop,
                qualified(&type_def.schema, name),
            ));
        }
    }
    for (key, privilege) in &old_schema.default_privileges {
        if !new_schema.default_privileges.contains_key(key) {
            steps.push(Step::new(
                ddl::revoke_default_privilege(privilege, target_schema),
                StepKind::DefaultPrivilege,
                StepOp::Drop,
                format!("{}.{}", target_schema, key),
            ));
        }
    }
    for extension in &old_schema.extensions {
        if !new_schema.extensions.contains(extension) {
            steps.push(Step::new(
                ddl::drop_extension(extension),
                StepKind::Extension,
                StepOp::Drop,
                format!("{}.{}", target_schema, extension),
            ));
        }
    }

    // ── Phase 3: creates in dependency order ──

    for extension in &new_schema.extensions {
        if !old_schema.extensions.contains(extension) {
            steps.push(Step::new(
                ddl::create_extension(extension),
                StepKind::Extension,
                StepOp::Create,
                format!("{}.{}", target_schema, extension),
            ));
        }
    }
    for (name, type_def) in &new_schema.types {
        if !old_schema.types.contains_key(name) {
            steps.push(Step::new(
                ddl::create_type(type_def, target_schema),
                StepKind::Type,
                StepOp::Create,
                qualified(&type_def.schema, name),
            ));
        }
    }
    for (name, sequence) in &new_schema.sequences {
        if sequence.owned_by.is_some() {
            continue;
        }
        if !old_schema.sequences.contains_key(name) {
            steps.push(Step::new(
                ddl::create_sequence(sequence, target_schema),
                StepKind::Sequence,
                StepOp::Create,
                qualified(&sequence.schema, name),
            ));
        }
    }

    // Order added tables by FK dependency. Cross-FKs between added tables
    // are always emitted as separate ALTER TABLE statements after all
    // creates: a cycle then only influences ordering, and it is cut by
    // removing one edge per cycle (the lexicographically-largest referrer
    // loses its edge). Self-referential FKs stay inline.
    let added_set: BTreeSet<&str> = tables.added.iter().copied().collect();
    let mut deferred_constraints: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for name in &tables.added {
        let table = new_schema.tables.get(*name).unwrap();
        for constraint in table.constraints.values() {
            if let ConstraintKind::ForeignKey {
                ref_schema,
                ref_table,
                ..
            } = &constraint.kind
            {
                if ref_schema == target_schema
                    && ref_table.as_str() != *name
                    && added_set.contains(ref_table.as_str())
                {
                    deferred_constraints
                        .entry((*name).to_string())
                        .or_default()
                        .insert(constraint.name.clone());
                }
            }
        }
    }
    let table_order = {
        let mut graph = DepGraph::new();
        for name in &tables.added {
            graph.add_node(name);
        }
        for name in &tables.added {
            let table = new_schema.tables.get(*name).unwrap();
            for constraint in table.constraints.values() {
                if let ConstraintKind::ForeignKey {
                    ref_schema,
                    ref_table,
                    ..
                } = &constraint.kind
                {
                    if ref_schema == target_schema && added_set.contains(ref_table.as_str()) {
                        graph.add_edge(name, ref_table);
                    }
                }
            }
        }
        loop {
            match graph.sort() {
                Ok(order) => break order,
                Err(cycle) => {
                    let (referrer, referenced) = cycle.break_edge();
                    graph.remove_edge(&referrer, &referenced);
                }
            }
        }
    };

    // Split the creates around CREATE FUNCTION for tables whose expressions
    // call a newly added function
    let mut first_wave = Vec::new();
    let mut second_wave = Vec::new();
    for name in &table_order {
        let table = new_schema.tables.get(name).unwrap();
        if table_references_added_function(table, &ctx) {
            second_wave.push(name.clone());
        } else {
            first_wave.push(name.clone());
        }
    }

    let mut deferred_policies: Vec<Step> = Vec::new();
    for name in &first_wave {
        emit_table_create(
            &mut steps,
            &mut deferred_policies,
            new_schema.tables.get(name).unwrap(),
            &ctx,
            &deferred_constraints,
        );
    }

    // Added routines and aggregates
    for (key, routine) in &new_schema.functions {
        if !old_schema.functions.contains_key(key) {
            steps.push(create_routine_step(routine, StepKind::Function, StepOp::Create));
        }
    }
    for (key, routine) in &new_schema.procedures {
        if !old_schema.procedures.contains_key(key) {
            steps.push(create_routine_step(routine, StepKind::Procedure, StepOp::Create));
        }
    }
    for (key, aggregate) in &new_schema.aggregates {
        if !old_schema.aggregates.contains_key(key) {
            steps.push(Step::new(
                ddl::create_aggregate(aggregate, target_schema),
                StepKind::Aggregate,
                StepOp::Create,
                qualified(&aggregate.schema, key),
            ));
        }
    }

    for name in &second_wave {
        emit_table_create(
            &mut steps,
            &mut deferred_policies,
            new_schema.tables.get(name).unwrap(),
            &ctx,
            &deferred_constraints,
        );
    }

    // Deferred FK constraints (cycle edges), after every table exists
    for (table_name, constraint_names) in &deferred_constraints {
        let table = new_schema.tables.get(table_name).unwrap();
        for constraint_name in constraint_names {
            let constraint = table.constraints.get(constraint_name).unwrap();
            steps.push(Step::new(
                ddl::add_constraint(table, constraint, target_schema, false),
                StepKind::TableConstraint,
                StepOp::Create,
                format!(
                    "{}.{}",
                    qualified(&table.schema, table_name),
                    constraint_name
                ),
            ));
        }
    }

    // Deferred policies (reference newly created functions)
    steps.append(&mut deferred_policies);

    // Triggers: on added tables, plus added/changed triggers on modified
    // tables — all after their functions exist
    for name in &table_order {
        let table = new_schema.tables.get(name).unwrap();
        for (trigger_name, trigger) in &table.triggers {
            steps.push(Step::new(
                ddl::create_trigger(trigger),
                StepKind::TableTrigger,
                StepOp::Create,
                format!("{}.{}", qualified(&table.schema, name), trigger_name),
            ));
        }
    }
    for name in &tables.modified {
        let old_table = old_schema.tables.get(*name).unwrap();
        let new_table = new_schema.tables.get(*name).unwrap();
        for (trigger_name, trigger) in &new_table.triggers {
            let prior = old_table.triggers.get(trigger_name);
            if prior.is_none() || prior != Some(trigger) {
                steps.push(Step::new(
                    ddl::create_trigger(trigger),
                    StepKind::TableTrigger,
                    if prior.is_none() {
                        StepOp::Create
                    } else {
                        StepOp::Recreate
                    },
                    format!("{}.{}", qualified(&new_table.schema, name), trigger_name),
                ));
            }
        }
    }

    // Added default privileges
    for (key, privilege) in &new_schema.default_privileges {
        if !old_schema.default_privileges.contains_key(key) {
            steps.push(Step::new(
                ddl::grant_default_privilege(privilege, target_schema),
                StepKind::DefaultPrivilege,
                StepOp::Create,
                format!("{}.{}", target_schema, key),
            ));
        }
    }

    // ── Phase 4: modifications ──

    for (name, new_type) in &new_schema.types {
        if let Some(old_type) = old_schema.types.get(name) {
            if old_type != new_type {
                emit_type_modification(&mut steps, old_type, new_type, target_schema);
            }
        }
    }
    for (name, new_sequence) in &new_schema.sequences {
        if new_sequence.owned_by.is_some() {
            continue;
        }
        if let Some(old_sequence) = old_schema.sequences.get(name) {
            if old_sequence != new_sequence {
                steps.push(Step::new(
                    ddl::alter_sequence(old_sequence, new_sequence, target_schema),
                    StepKind::Sequence,
                    StepOp::Alter,
                    qualified(&new_sequence.schema, name),
                ));
            }
        }
    }
    for name in &tables.modified {
        let old_table = old_schema.tables.get(*name).unwrap();
        let new_table = new_schema.tables.get(*name).unwrap();
        let skip = early_dropped_constraints
            .remove(*name)
            .unwrap_or_default();
        steps.extend(table::diff_modified_table(old_table, new_table, &ctx, &skip));
    }

    // Views: added views plus materialized views queued for recreation, in
    // dependency order. This runs after the table modifications so a
    // pre-dropped materialized view comes back against the table's new
    // shape.
    {
        let order = view_topo_order(&new_schema.views, target_schema)?;
        for name in &order {
            let added = tables_contains(&views.added, name);
            let recreate = recreate_views.contains(name);
            if !added && !recreate {
                continue;
            }
            let view = new_schema.views.get(name).unwrap();
            steps.push(Step::new(
                ddl::create_view(view, target_schema, false),
                StepKind::View,
                if added { StepOp::Create } else { StepOp::Recreate },
                qualified(&view.schema, name),
            ));
            if let Some(comment) = &view.comment {
                steps.push(Step::new(
                    ddl::comment_on(
                        if view.materialized {
                            "MATERIALIZED VIEW"
                        } else {
                            "VIEW"
                        },
                        &ddl::rel(&view.schema, name, target_schema),
                        Some(comment),
                    ),
                    StepKind::TableComment,
                    StepOp::Create,
                    qualified(&view.schema, name),
                ));
            }
            for index in view.indexes.values() {
                steps.push(Step::new(
                    ddl::create_index(index, false),
                    StepKind::TableIndex,
                    StepOp::Create,
                    format!("{}.{}", qualified(&view.schema, name), index.name),
                ));
            }
        }
    }

    for name in &views.modified {
        let view = new_schema.views.get(*name).unwrap();
        if view.materialized {
            continue; // handled as drop + create above
        }
        steps.push(Step::new(
            ddl::create_view(view, target_schema, true),
            StepKind::View,
            StepOp::Alter,
            qualified(&view.schema, name),
        ));
        let old_view = old_schema.views.get(*name).unwrap();
        if old_view.comment != view.comment {
            steps.push(Step::new(
                ddl::comment_on(
                    "VIEW",
                    &ddl::rel(&view.schema, name, target_schema),
                    view.comment.as_deref(),
                ),
                StepKind::TableComment,
                StepOp::Alter,
                qualified(&view.schema, name),
            ));
        }
    }
    for (key, routine) in &new_schema.functions {
        if let Some(old_routine) = old_schema.functions.get(key) {
            if old_routine != routine {
                steps.push(create_routine_step(routine, StepKind::Function, StepOp::Alter));
            }
        }
    }
    for (key, routine) in &new_schema.procedures {
        if let Some(old_routine) = old_schema.procedures.get(key) {
            if old_routine != routine {
                steps.push(create_routine_step(routine, StepKind::Procedure, StepOp::Alter));
            }
        }
    }
    for (key, aggregate) in &new_schema.aggregates {
        if let Some(old_aggregate) = old_schema.aggregates.get(key) {
            if old_aggregate != aggregate {
                steps.push(Step::new(
                    ddl::drop_aggregate(old_aggregate, target_schema),
                    StepKind::Aggregate,
                    StepOp::Recreate,
                    qualified(&aggregate.schema, key),
                ));
                steps.push(Step::new(
                    ddl::create_aggregate(aggregate, target_schema),
                    StepKind::Aggregate,
                    StepOp::Recreate,
                    qualified(&aggregate.schema, key),
                ));
            }
        }
    }
    for (key, privilege) in &new_schema.default_privileges {
        if let Some(old_privilege) = old_schema.default_privileges.get(key) {
            if old_privilege != privilege {
                steps.push(Step::new(
                    ddl::revoke_default_privilege(old_privilege, target_schema),
                    StepKind::DefaultPrivilege,
                    StepOp::Alter,
                    format!("{}.{}", target_schema, key),
                ));
                steps.push(Step::new(
                    ddl::grant_default_privilege(privilege, target_schema),
                    StepKind::DefaultPrivilege,
                    StepOp::Alter,
                    format!("{}.{}", target_schema, key),
                ));
            }
        }
    }

    apply_directives(&mut steps, directives);
    Ok(steps)
}

/// Names partitioned into added / dropped / modified.
struct Partition<'a> {
    added: Vec<&'a str>,
    dropped: Vec<&'a str>,
    modified: Vec<&'a str>,
}

fn partition<'a, T: PartialEq>(
    old: &BTreeMap<&'a str, &'a T>,
    new: &BTreeMap<&'a str, &'a T>,
    changed: impl Fn(&T, &T) -> bool,
) -> Partition<'a> {
    let mut added = Vec::new();
    let mut dropped = Vec::new();
    let mut modified = Vec::new();
    for (name, value) in new {
        match old.get(name) {
            None => added.push(*name),
            Some(prior) if changed(prior, value) => modified.push(*name),
            Some(_) => {}
        }
    }
    for name in old.keys() {
        if !new.contains_key(name) {
            dropped.push(*name);
        }
    }
    Partition {
        added,
        dropped,
        modified,
    }
}

fn borrow_map<T>(map: &BTreeMap<String, T>) -> BTreeMap<&str, &T> {
    map.iter().map(|(k, v)| (k.as_str(), v)).collect()
}

/// Managed (non-external) tables of a schema.
fn managed_tables(schema: &Schema) -> BTreeMap<&str, &Table> {
    schema
        .tables
        .iter()
        .filter(|(_, t)| !t.is_external)
        .map(|(k, v)| (k.as_str(), v))
        .collect()
}

fn tables_contains(names: &[&str], name: &str) -> bool {
    names.contains(&name)
}

fn fk_references(
    constraint: &crate::model::Constraint,
    target_schema: &str,
    table: &str,
) -> bool {
    matches!(
        &constraint.kind,
        ConstraintKind::ForeignKey {
            ref_schema,
            ref_table,
            ..
        } if ref_schema == target_schema && ref_table == table
    )
}

fn drop_routine_step(routine: &Routine, target_schema: &str, kind: StepKind) -> Step {
    let keyword = match kind {
        StepKind::Procedure => "PROCEDURE",
        _ => "FUNCTION",
    };
    Step::new(
        format!(
            "DROP {} {}({});",
            keyword,
            ddl::rel(&routine.schema, &routine.name, target_schema),
            routine.signature
        ),
        kind,
        StepOp::Drop,
        qualified(&routine.schema, &routine.key()),
    )
}

fn create_routine_step(routine: &Routine, kind: StepKind, op: StepOp) -> Step {
    Step::new(
        format!("{};", routine.definition.trim_end_matches(';')),
        kind,
        op,
        qualified(&routine.schema, &routine.key()),
    )
}

/// Emit the create sequence for one added table: CREATE TABLE (minus
/// deferred constraints), comments, indexes, RLS, and policies; policies
/// that call a newly added function go to `deferred_policies` instead.
fn emit_table_create(
    steps: &mut Vec<Step>,
    deferred_policies: &mut Vec<Step>,
    table: &Table,
    ctx: &DiffContext<'_>,
    deferred_constraints: &BTreeMap<String, BTreeSet<String>>,
) {
    let target = ctx.target_schema;
    let path = qualified(&table.schema, &table.name);
    let empty = BTreeSet::new();
    let deferred = deferred_constraints.get(&table.name).unwrap_or(&empty);

    steps.push(Step::new(
        ddl::create_table(table, target, deferred),
        StepKind::Table,
        StepOp::Create,
        path.clone(),
    ));

    if let Some(comment) = &table.comment {
        steps.push(Step::new(
            ddl::comment_on(
                "TABLE",
                &ddl::rel(&table.schema, &table.name, target),
                Some(comment),
            ),
            StepKind::TableComment,
            StepOp::Create,
            path.clone(),
        ));
    }
    for column in &table.columns {
        if let Some(comment) = &column.comment {
            steps.push(Step::new(
                ddl::comment_on(
                    "COLUMN",
                    &format!(
                        "{}.{}",
                        ddl::rel(&table.schema, &table.name, target),
                        ddl::ident(&column.name)
                    ),
                    Some(comment),
                ),
                StepKind::TableComment,
                StepOp::Create,
                format!("{}.{}", path, column.name),
            ));
        }
    }

    for index in table.indexes.values() {
        let index_path = format!("{}.{}", path, index.name);
        // A fresh table is empty, so a plain transactional create is the
        // default; an explicit CONCURRENTLY in the desired DDL wins.
        let concurrently = directives_for(ctx.directives, &index_path)
            .map(|d| d.concurrently)
            .unwrap_or(false);
        let step = if concurrently {
            Step::non_transactional(
                ddl::create_index(index, true),
                StepKind::TableIndex,
                StepOp::Create,
                index_path,
            )
        } else {
            Step::new(
                ddl::create_index(index, false),
                StepKind::TableIndex,
                StepOp::Create,
                index_path,
            )
        };
        steps.push(step);
    }

    if table.rls_enabled {
        steps.push(Step::new(
            ddl::set_rls(table, target, true),
            StepKind::TableRls,
            StepOp::Create,
            path.clone(),
        ));
    }

    for policy in table.policies.values() {
        let step = Step::new(
            ddl::create_policy(policy, target),
            StepKind::TablePolicy,
            StepOp::Create,
            format!("{}.{}", path, policy.name),
        );
        let uses_new_function = [&policy.using_expr, &policy.with_check_expr]
            .into_iter()
            .flatten()
            .any(|expr| references_added_function(expr, &ctx.added_functions));
        if uses_new_function {
            deferred_policies.push(step);
        } else {
            steps.push(step);
        }
    }
}

fn emit_type_modification(
    steps: &mut Vec<Step>,
    old_type: &TypeDef,
    new_type: &TypeDef,
    target_schema: &str,
) {
    let path = qualified(&new_type.schema, &new_type.name);
    // Enum label appends are the only in-place type change PostgreSQL
    // supports; everything else is a recreate.
    if let (TypeKind::Enum { labels: old_labels }, TypeKind::Enum { labels: new_labels }) =
        (&old_type.kind, &new_type.kind)
    {
        if new_labels.len() > old_labels.len() && new_labels.starts_with(old_labels) {
            for label in &new_labels[old_labels.len()..] {
                // ADD VALUE takes effect outside the surrounding transaction
                steps.push(Step::non_transactional(
                    ddl::add_enum_value(new_type, label, target_schema),
                    StepKind::Type,
                    StepOp::Alter,
                    path.clone(),
                ));
            }
            return;
        }
    }
    steps.push(Step::new(
        ddl::drop_type(old_type, target_schema),
        StepKind::Type,
        StepOp::Recreate,
        path.clone(),
    ));
    steps.push(Step::new(
        ddl::create_type(new_type, target_schema),
        StepKind::Type,
        StepOp::Recreate,
        path,
    ));
}

/// Topological order of views by the view-references-view relation.
/// Non-recursive views cannot cycle; a cycle therefore indicates an
/// internal error.
fn view_topo_order(
    views: &BTreeMap<String, View>,
    _target_schema: &str,
) -> Result<Vec<String>> {
    let mut graph = DepGraph::new();
    for name in views.keys() {
        graph.add_node(name);
    }
    for (name, view) in views {
        for other in views.keys() {
            if other != name && references_identifier(&view.query, other) {
                graph.add_edge(name, other);
            }
        }
    }
    graph.sort().map_err(|cycle| PgplanError::DiffInternal {
        reason: format!("view dependency cycle: {}", cycle.nodes.join(" -> ")),
    })
}

/// Word-boundary search for an identifier inside an expression or query.
fn references_identifier(text: &str, name: &str) -> bool {
    if name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        let pattern = format!(r"\b{}\b", name);
        if let Ok(re) = Regex::new(&pattern) {
            return re.is_match(text);
        }
    }
    text.contains(name)
}

/// Whether any expression owned by the table (column defaults, generated
/// expressions, check predicates, index predicates) calls a newly added
/// function. Such tables are created after `CREATE FUNCTION`.
fn table_references_added_function(table: &Table, ctx: &DiffContext<'_>) -> bool {
    for column in &table.columns {
        for expr in [&column.default, &column.generated].into_iter().flatten() {
            if references_added_function(expr, &ctx.added_functions) {
                return true;
            }
        }
    }
    for constraint in table.constraints.values() {
        if let ConstraintKind::Check { expression } = &constraint.kind {
            if references_added_function(expression, &ctx.added_functions) {
                return true;
            }
        }
    }
    for index in table.indexes.values() {
        if let Some(predicate) = &index.predicate {
            if references_added_function(predicate, &ctx.added_functions) {
                return true;
            }
        }
    }
    false
}

static FUNCTION_CALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)([A-Za-z_][A-Za-z0-9_]*)(?:\.([A-Za-z_][A-Za-z0-9_]*))?\s*\(").unwrap()
});

/// Scan an expression for `[schema.]name(` call sites that match an added
/// function (case-insensitive, qualified or not).
fn references_added_function(expr: &str, added: &BTreeSet<String>) -> bool {
    for caps in FUNCTION_CALL_RE.captures_iter(expr) {
        let first = caps.get(1).unwrap().as_str().to_lowercase();
        match caps.get(2) {
            Some(second) => {
                let qualified_name = format!("{}.{}", first, second.as_str().to_lowercase());
                if added.contains(&qualified_name)
                    || added.contains(&second.as_str().to_lowercase())
                {
                    return true;
                }
            }
            None => {
                if added.contains(&first) {
                    return true;
                }
            }
        }
    }
    false
}

fn added_function_names(old_schema: &Schema, new_schema: &Schema) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for (key, routine) in &new_schema.functions {
        if !old_schema.functions.contains_key(key) {
            names.insert(routine.name.to_lowercase());
            names.insert(format!(
                "{}.{}",
                routine.schema.to_lowercase(),
                routine.name.to_lowercase()
            ));
        }
    }
    names
}

fn apply_directives(steps: &mut [Step], directives: &DirectiveMap) {
    if directives.is_empty() {
        return;
    }
    for step in steps.iter_mut() {
        if let Some(d) = directives_for(directives, &step.path) {
            if d.no_transaction {
                step.can_run_in_transaction = false;
            }
            if let Some(timeout) = d.lock_timeout {
                step.lock_timeout_ms = Some(timeout.as_millis() as u64);
            }
        }
    }
}

#[cfg(test)]
mod tests;
