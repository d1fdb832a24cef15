//! Dump the live schema as canonical DDL.
//!
//! A dump is the diff of an empty catalog against the live one: the same
//! engine that plans migrations renders the creation script, so dumped DDL
//! and plan output always agree on spelling and ordering.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio_postgres::Client;

use crate::error::Result;
use crate::model::Catalog;
use crate::parse::DirectiveMap;
use crate::plan::{Step, StepKind};

/// Result of a dump operation.
#[derive(Debug, Serialize)]
pub struct DumpReport {
    /// Schema that was dumped.
    pub schema: String,
    /// Ordered creation steps.
    pub steps: Vec<Step>,
    /// Number of objects rendered.
    pub objects: usize,
}

impl DumpReport {
    /// Render the dump as one SQL script.
    pub fn to_sql(&self) -> String {
        let mut out = String::new();
        for step in &self.steps {
            out.push_str(&step.sql);
            out.push_str("\n\n");
        }
        out
    }
}

/// Execute the dump command against a live database.
pub async fn execute(client: &Client, schema: &str) -> Result<DumpReport> {
    let mut catalog = crate::inspect::build_catalog(client, schema).await?;
    crate::normalize::normalize(&mut catalog, schema);
    let steps = crate::diff::diff(
        &Catalog::empty(schema),
        &catalog,
        schema,
        &DirectiveMap::new(),
    )?;
    let objects = steps
        .iter()
        .filter(|s| {
            matches!(
                s.kind,
                StepKind::Table
                    | StepKind::View
                    | StepKind::Function
                    | StepKind::Procedure
                    | StepKind::Aggregate
                    | StepKind::Sequence
                    | StepKind::Type
                    | StepKind::Extension
            )
        })
        .count();
    log::info!("Dumped schema; schema={}, objects={}", schema, objects);
    Ok(DumpReport {
        schema: schema.to_string(),
        steps,
        objects,
    })
}

/// Directory and file name a step is written to in multi-file mode.
fn multi_file_target(step: &Step) -> PathBuf {
    // path is schema.object[.sub]; the object segment names the file
    let object = step
        .path
        .split('.')
        .nth(1)
        .unwrap_or(&step.path)
        .split('(')
        .next()
        .unwrap_or("misc")
        .to_string();
    let dir = match step.kind {
        StepKind::Table
        | StepKind::TableColumn
        | StepKind::TableConstraint
        | StepKind::TableIndex
        | StepKind::TableTrigger
        | StepKind::TablePolicy
        | StepKind::TableRls
        | StepKind::TableComment => "tables",
        StepKind::View => "views",
        StepKind::Function | StepKind::Procedure => "functions",
        StepKind::Aggregate => "aggregates",
        StepKind::Sequence => "sequences",
        StepKind::Type => "types",
        StepKind::Extension => "extensions",
        StepKind::DefaultPrivilege => "privileges",
    };
    PathBuf::from(dir).join(format!("{}.sql", object))
}

/// Write the dump as one file per object plus a `main.sql` of `\i` includes
/// in dependency order. Returns the files written (main.sql first).
pub fn write_multi_file(report: &DumpReport, dir: &Path) -> Result<Vec<PathBuf>> {
    let mut buffers: BTreeMap<PathBuf, String> = BTreeMap::new();
    let mut include_order: Vec<PathBuf> = Vec::new();
    for step in &report.steps {
        let target = multi_file_target(step);
        if !buffers.contains_key(&target) {
            include_order.push(target.clone());
        }
        let buffer = buffers.entry(target).or_default();
        buffer.push_str(&step.sql);
        buffer.push_str("\n\n");
    }

    std::fs::create_dir_all(dir)?;
    let mut written = Vec::new();

    let mut main = String::new();
    for target in &include_order {
        main.push_str(&format!("\\i {}\n", target.display()));
    }
    let main_path = dir.join("main.sql");
    std::fs::write(&main_path, main)?;
    written.push(main_path);

    for (target, buffer) in &buffers {
        let path = dir.join(target);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, buffer)?;
        written.push(path);
    }
    Ok(written)
}
