//! Produce a migration plan from a desired-state DDL file.
//!
//! Both catalogs flow through the same inspect + normalize pipeline: the
//! live side directly, the desired side via the sandbox reflection in
//! [`crate::parse`]. The plan's fingerprint covers the live (source)
//! catalog, which is what the apply-time concurrent-change check compares
//! against.

use std::path::Path;

use tokio_postgres::Client;

use crate::error::Result;
use crate::plan::Plan;

/// Plan from a desired-state file, expanding `\i` includes.
pub async fn execute_from_file(
    client: &Client,
    sandbox: &Client,
    target_schema: &str,
    file: &Path,
) -> Result<Plan> {
    let sql = crate::parse::expand_includes(file)?;
    execute(
        client,
        sandbox,
        target_schema,
        &sql,
        &file.display().to_string(),
    )
    .await
}

/// Plan from desired-state DDL text.
pub async fn execute(
    client: &Client,
    sandbox: &Client,
    target_schema: &str,
    sql: &str,
    source_name: &str,
) -> Result<Plan> {
    let mut live = crate::inspect::build_catalog(client, target_schema).await?;
    crate::normalize::normalize(&mut live, target_schema);
    let fingerprint = crate::fingerprint::fingerprint(&live);

    let parsed = crate::parse::build_catalog(sandbox, sql, target_schema, source_name).await?;
    let mut desired = parsed.catalog;
    crate::normalize::normalize(&mut desired, target_schema);

    let steps = crate::diff::diff(&live, &desired, target_schema, &parsed.directives)?;
    let pg_version = crate::db::server_version(client).await?;

    log::info!(
        "Plan computed; schema={}, steps={}, fingerprint={}",
        target_schema,
        steps.len(),
        &fingerprint[..12]
    );
    Ok(Plan::new(fingerprint, pg_version, steps))
}
