//! Desired-state DDL parsing via a validation sandbox.
//!
//! pgplan uses a reflected parse: the DDL runs in a temporary schema on a
//! sandbox connection, and the resulting objects are introspected with the
//! same code path the live database goes through. Parsing and normalization
//! are therefore identical for both sides of the diff, eliminating
//! parser/introspector asymmetry.
//!
//! The sandbox is any caller-owned connection; the temporary schema is
//! dropped on every exit path.

mod include;
mod statement;

pub use include::expand_includes;
pub use statement::{
    directives_for, scan_directives, split_statements, statement_path, DirectiveMap,
    StatementDirectives,
};

use std::path::Path;

use tokio_postgres::Client;

use crate::db::quote_ident;
use crate::error::{PgplanError, Result};
use crate::model::{Catalog, ConstraintKind, Schema};
use crate::normalize::canonicalize_statement;

/// The parser's output: an IR plus the execution directives scanned from
/// the DDL text.
#[derive(Debug)]
pub struct ParsedCatalog {
    pub catalog: Catalog,
    pub directives: DirectiveMap,
}

/// Parse a desired-state DDL file (expanding `\i` includes) into an IR.
pub async fn build_catalog_from_file(
    sandbox: &Client,
    path: &Path,
    target_schema: &str,
) -> Result<ParsedCatalog> {
    let sql = expand_includes(path)?;
    build_catalog(sandbox, &sql, target_schema, &path.display().to_string()).await
}

/// Parse desired-state DDL text into an IR via the sandbox.
pub async fn build_catalog(
    sandbox: &Client,
    sql: &str,
    target_schema: &str,
    source_name: &str,
) -> Result<ParsedCatalog> {
    let directives = scan_directives(sql, target_schema)?;

    let temp_schema = format!(
        "pgplan_parse_{}_{}",
        chrono::Utc::now().format("%Y%m%d%H%M%S"),
        fastrand::u16(..)
    );

    sandbox
        .batch_execute(&format!("CREATE SCHEMA {}", quote_ident(&temp_schema)))
        .await
        .map_err(|e| PgplanError::ParseError {
            source_path: source_name.to_string(),
            reason: format!(
                "cannot create sandbox schema: {}",
                crate::error::format_db_error(&e)
            ),
        })?;

    let result = run_reflected(sandbox, sql, target_schema, &temp_schema, source_name).await;

    // Tear the sandbox schema down on all exit paths
    if let Err(e) = sandbox
        .batch_execute(&format!(
            "DROP SCHEMA IF EXISTS {} CASCADE",
            quote_ident(&temp_schema)
        ))
        .await
    {
        log::warn!("Failed to drop sandbox schema {}: {}", temp_schema, e);
    }

    result.map(|catalog| ParsedCatalog {
        catalog,
        directives,
    })
}

async fn run_reflected(
    sandbox: &Client,
    sql: &str,
    target_schema: &str,
    temp_schema: &str,
    source_name: &str,
) -> Result<Catalog> {
    sandbox
        .batch_execute(&format!("SET search_path TO {}", quote_ident(temp_schema)))
        .await
        .map_err(PgplanError::DatabaseError)?;

    for stmt in split_statements(sql) {
        // Execute with target-schema qualification stripped so every object
        // lands in the sandbox schema via the search path.
        let rewritten = canonicalize_statement(stmt, target_schema);
        if rewritten.is_empty() || is_comment_only(&rewritten) {
            continue;
        }
        // CONCURRENTLY cannot run inside the sandbox pipeline (and the
        // sandbox schema is empty anyway); build the index plainly.
        let rewritten = rewritten.replace("INDEX CONCURRENTLY ", "INDEX ");
        if let Err(e) = sandbox.batch_execute(&rewritten).await {
            return Err(PgplanError::ParseError {
                source_path: source_name.to_string(),
                reason: format!(
                    "statement failed in sandbox: {}\n  Statement: {}",
                    crate::error::format_db_error(&e),
                    &rewritten[..rewritten.len().min(200)]
                ),
            });
        }
    }

    let catalog = crate::inspect::build_catalog(sandbox, temp_schema).await?;
    Ok(rename_schema(catalog, temp_schema, target_schema))
}

fn is_comment_only(stmt: &str) -> bool {
    stmt.lines().all(|l| {
        let t = l.trim();
        t.is_empty() || t.starts_with("--")
    })
}

/// Move every object introspected under `from` to `to`, fixing embedded
/// schema references. Used to relabel the sandbox schema as the target.
fn rename_schema(mut catalog: Catalog, from: &str, to: &str) -> Catalog {
    let Some(mut schema) = catalog.schemas.remove(from) else {
        return catalog;
    };
    schema.name = to.to_string();

    for (_, table) in std::mem::take(&mut schema.tables) {
        let mut table = table;
        table.schema = to.to_string();
        for constraint in table.constraints.values_mut() {
            if let ConstraintKind::ForeignKey { ref_schema, .. } = &mut constraint.kind {
                if ref_schema == from {
                    *ref_schema = to.to_string();
                }
            }
        }
        for index in table.indexes.values_mut() {
            index.schema = to.to_string();
            index.definition = canonicalize_statement(&index.definition, from);
        }
        for trigger in table.triggers.values_mut() {
            trigger.schema = to.to_string();
            if trigger.function_schema == from {
                trigger.function_schema = to.to_string();
            }
            trigger.definition = canonicalize_statement(&trigger.definition, from);
        }
        for policy in table.policies.values_mut() {
            policy.schema = to.to_string();
        }
        let name = table.name.clone();
        schema.tables.insert(name, table);
    }
    for view in schema.views.values_mut() {
        view.schema = to.to_string();
        view.query = canonicalize_statement(&view.query, from);
        for index in view.indexes.values_mut() {
            index.schema = to.to_string();
            index.definition = canonicalize_statement(&index.definition, from);
        }
    }
    for routine in schema
        .functions
        .values_mut()
        .chain(schema.procedures.values_mut())
    {
        routine.schema = to.to_string();
        routine.definition = canonicalize_statement(&routine.definition, from);
    }
    for sequence in schema.sequences.values_mut() {
        sequence.schema = to.to_string();
    }
    for type_def in schema.types.values_mut() {
        type_def.schema = to.to_string();
    }
    for aggregate in schema.aggregates.values_mut() {
        aggregate.schema = to.to_string();
    }

    let renamed = Schema {
        name: to.to_string(),
        ..schema
    };
    catalog.schemas.insert(to.to_string(), renamed);
    catalog
}
