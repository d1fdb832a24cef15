//! Sub-diff of one modified table.
//!
//! Emits the minimal ALTER sequence for column, constraint, index, policy,
//! RLS, and comment changes. Trigger changes are handled by the phase
//! orchestrator (drops before function drops, creates after function
//! creates), not here.

use std::collections::BTreeSet;

use crate::ddl;
use crate::model::{qualified, Column, Constraint, ConstraintKind, Identity, Table};
use crate::plan::{Step, StepKind, StepOp};

use super::DiffContext;

/// True when the table's column shape changed — the signal used to pre-drop
/// dependent materialized views before ALTER TABLE runs.
pub(super) fn structurally_changed(old: &Table, new: &Table) -> bool {
    if old.columns.len() != new.columns.len() {
        return true;
    }
    old.columns.iter().zip(new.columns.iter()).any(|(o, n)| {
        o.name != n.name || o.type_name != n.type_name || o.generated != n.generated
    })
}

fn table_path(table: &Table) -> String {
    qualified(&table.schema, &table.name)
}

fn column_path(table: &Table, column: &str) -> String {
    format!("{}.{}", table_path(table), column)
}

/// Emit the composite modification steps for a table present on both sides.
///
/// `already_dropped_constraints` names constraints whose drop was emitted
/// earlier (ahead of a referenced table's drop); they are skipped here.
pub(super) fn diff_modified_table(
    old: &Table,
    new: &Table,
    ctx: &DiffContext<'_>,
    already_dropped_constraints: &BTreeSet<String>,
) -> Vec<Step> {
    let target = ctx.target_schema;
    let mut steps = Vec::new();

    // Comment
    if old.comment != new.comment {
        steps.push(Step::new(
            ddl::comment_on(
                "TABLE",
                &ddl::rel(&new.schema, &new.name, target),
                new.comment.as_deref(),
            ),
            StepKind::TableComment,
            StepOp::Alter,
            table_path(new),
        ));
    }

    // Dropped and modified policies: drop first (they may reference columns
    // about to change)
    for (name, policy) in &old.policies {
        let replaced = new.policies.get(name);
        if replaced.is_none() || replaced != Some(policy) {
            steps.push(Step::new(
                ddl::drop_policy(policy, target),
                StepKind::TablePolicy,
                if replaced.is_none() {
                    StepOp::Drop
                } else {
                    StepOp::Recreate
                },
                format!("{}.{}", table_path(old), name),
            ));
        }
    }

    // Index drops (including the drop half of a structural recreate)
    for (name, index) in &old.indexes {
        let replaced = new.indexes.get(name);
        if replaced.is_none() || replaced.map(|i| &i.definition) != Some(&index.definition) {
            steps.push(Step::new(
                ddl::drop_index(index, target),
                StepKind::TableIndex,
                if replaced.is_none() {
                    StepOp::Drop
                } else {
                    StepOp::Recreate
                },
                format!("{}.{}", table_path(old), name),
            ));
        }
    }

    // Constraint drops (including the drop half of a modify)
    for (name, constraint) in &old.constraints {
        if already_dropped_constraints.contains(name) {
            continue;
        }
        let replaced = new.constraints.get(name);
        if replaced.is_none() || constraint_changed(constraint, replaced.unwrap()) {
            steps.push(Step::new(
                ddl::drop_constraint(old, name, target),
                StepKind::TableConstraint,
                if replaced.is_none() {
                    StepOp::Drop
                } else {
                    StepOp::Recreate
                },
                format!("{}.{}", table_path(old), name),
            ));
        }
    }

    // Column drops
    for column in &old.columns {
        if new.column(&column.name).is_none() {
            steps.push(Step::new(
                format!(
                    "ALTER TABLE {} DROP COLUMN {};",
                    ddl::rel(&old.schema, &old.name, target),
                    ddl::ident(&column.name)
                ),
                StepKind::TableColumn,
                StepOp::Drop,
                column_path(old, &column.name),
            ));
        }
    }

    // Column adds
    for column in &new.columns {
        if old.column(&column.name).is_none() {
            steps.push(Step::new(
                format!(
                    "ALTER TABLE {} ADD COLUMN {};",
                    ddl::rel(&new.schema, &new.name, target),
                    ddl::column_def(column)
                ),
                StepKind::TableColumn,
                StepOp::Create,
                column_path(new, &column.name),
            ));
        }
    }

    // Column modifications
    for column in &new.columns {
        if let Some(old_column) = old.column(&column.name) {
            steps.extend(diff_column(old_column, column, new, target));
        }
    }

    // Constraint adds (including the add half of a modify); FK and CHECK on
    // an existing table go in as NOT VALID followed by VALIDATE
    for (name, constraint) in &new.constraints {
        let prior = old.constraints.get(name);
        let changed = prior.is_none_or(|p| constraint_changed(p, constraint));
        if !changed {
            continue;
        }
        let op = if prior.is_none() {
            StepOp::Create
        } else {
            StepOp::Recreate
        };
        let path = format!("{}.{}", table_path(new), name);
        let online_addable = matches!(
            constraint.kind,
            ConstraintKind::ForeignKey { .. } | ConstraintKind::Check { .. }
        );
        if online_addable {
            steps.push(Step::new(
                ddl::add_constraint(new, constraint, target, true),
                StepKind::TableConstraint,
                op,
                path.clone(),
            ));
            steps.push(Step::new(
                ddl::validate_constraint(new, name, target),
                StepKind::TableConstraint,
                StepOp::Alter,
                path,
            ));
        } else {
            steps.push(Step::new(
                ddl::add_constraint(new, constraint, target, false),
                StepKind::TableConstraint,
                op,
                path,
            ));
        }
    }

    // Index creates — CONCURRENTLY on an existing table (online-safe)
    for (name, index) in &new.indexes {
        let prior = old.indexes.get(name);
        let changed = prior.is_none_or(|p| p.definition != index.definition);
        if !changed {
            continue;
        }
        steps.push(Step::non_transactional(
            ddl::create_index(index, true),
            StepKind::TableIndex,
            if prior.is_none() {
                StepOp::Create
            } else {
                StepOp::Recreate
            },
            format!("{}.{}", table_path(new), name),
        ));
    }

    // RLS toggle
    if old.rls_enabled != new.rls_enabled {
        steps.push(Step::new(
            ddl::set_rls(new, target, new.rls_enabled),
            StepKind::TableRls,
            StepOp::Alter,
            table_path(new),
        ));
    }

    // Policy adds (including the create half of a recreate)
    for (name, policy) in &new.policies {
        let prior = old.policies.get(name);
        if prior.is_none() || prior != Some(policy) {
            steps.push(Step::new(
                ddl::create_policy(policy, target),
                StepKind::TablePolicy,
                if prior.is_none() {
                    StepOp::Create
                } else {
                    StepOp::Recreate
                },
                format!("{}.{}", table_path(new), name),
            ));
        }
    }

    steps
}

/// Two constraints are equivalent when their rendered bodies and validity
/// match; the rendered body covers kind, columns, targets, and actions.
fn constraint_changed(old: &Constraint, new: &Constraint) -> bool {
    // A previously NOT VALID constraint that the desired state considers
    // validated is handled as a VALIDATE, not a recreate; treat validity
    // drift alone as a change too so it gets re-emitted.
    old.not_valid != new.not_valid
        || ddl::constraint_body(old, "?") != ddl::constraint_body(new, "?")
}

/// Minimal per-column ALTER statements.
fn diff_column(old: &Column, new: &Column, table: &Table, target: &str) -> Vec<Step> {
    let mut steps = Vec::new();
    let relation = ddl::rel(&table.schema, &table.name, target);
    let path = column_path(table, &new.name);

    // A generated-expression change cannot be altered in place
    if old.generated != new.generated {
        steps.push(Step::new(
            format!(
                "ALTER TABLE {} DROP COLUMN {};",
                relation,
                ddl::ident(&old.name)
            ),
            StepKind::TableColumn,
            StepOp::Recreate,
            path.clone(),
        ));
        steps.push(Step::new(
            format!("ALTER TABLE {} ADD COLUMN {};", relation, ddl::column_def(new)),
            StepKind::TableColumn,
            StepOp::Recreate,
            path,
        ));
        return steps;
    }

    if old.type_name != new.type_name {
        steps.push(Step::new(
            format!(
                "ALTER TABLE {} ALTER COLUMN {} TYPE {} USING {}::{};",
                relation,
                ddl::ident(&new.name),
                new.type_name,
                ddl::ident(&new.name),
                new.type_name
            ),
            StepKind::TableColumn,
            StepOp::Alter,
            path.clone(),
        ));
    }

    if old.nullable != new.nullable {
        let clause = if new.nullable {
            "DROP NOT NULL"
        } else {
            "SET NOT NULL"
        };
        steps.push(Step::new(
            format!(
                "ALTER TABLE {} ALTER COLUMN {} {};",
                relation,
                ddl::ident(&new.name),
                clause
            ),
            StepKind::TableColumn,
            StepOp::Alter,
            path.clone(),
        ));
    }

    if old.default != new.default {
        let clause = match &new.default {
            Some(default) => format!("SET DEFAULT {}", default),
            None => "DROP DEFAULT".to_string(),
        };
        steps.push(Step::new(
            format!(
                "ALTER TABLE {} ALTER COLUMN {} {};",
                relation,
                ddl::ident(&new.name),
                clause
            ),
            StepKind::TableColumn,
            StepOp::Alter,
            path.clone(),
        ));
    }

    if old.identity != new.identity {
        let clause = match (&old.identity, &new.identity) {
            (None, Some(Identity::Always)) => "ADD GENERATED ALWAYS AS IDENTITY".to_string(),
            (None, Some(Identity::ByDefault)) => {
                "ADD GENERATED BY DEFAULT AS IDENTITY".to_string()
            }
            (Some(_), None) => "DROP IDENTITY".to_string(),
            (Some(_), Some(Identity::Always)) => "SET GENERATED ALWAYS".to_string(),
            (Some(_), Some(Identity::ByDefault)) => "SET GENERATED BY DEFAULT".to_string(),
            (None, None) => unreachable!(),
        };
        steps.push(Step::new(
            format!(
                "ALTER TABLE {} ALTER COLUMN {} {};",
                relation,
                ddl::ident(&new.name),
                clause
            ),
            StepKind::TableColumn,
            StepOp::Alter,
            path.clone(),
        ));
    }

    if old.comment != new.comment {
        steps.push(Step::new(
            ddl::comment_on(
                "COLUMN",
                &format!("{}.{}", relation, ddl::ident(&new.name)),
                new.comment.as_deref(),
            ),
            StepKind::TableComment,
            StepOp::Alter,
            path,
        ));
    }

    steps
}
