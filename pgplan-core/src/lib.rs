//! Declarative PostgreSQL schema management.
//!
//! pgplan implements a Terraform-style workflow against a live database
//! without a migration-history table: *dump* the current schema as
//! canonical DDL, edit it as a source-of-truth file, *plan* a migration by
//! diffing desired versus actual state, and *apply* the plan with
//! concurrent-change detection.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use pgplan_core::config::{CliOverrides, PgplanConfig};
//! use pgplan_core::Pgplan;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PgplanConfig::load(None, &CliOverrides::default())?;
//! let pg = Pgplan::new(config).await?;
//! let plan = pg.plan_from_file(std::path::Path::new("schema.sql")).await?;
//! let report = pg.apply(&plan, None).await?;
//! println!("Applied {} steps", report.steps_applied);
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`config`] — Configuration loading (TOML, `PG*` env vars, CLI overrides)
//! - [`db`] — Database connections, TLS, session helpers
//! - [`model`] — The schema IR with its structural invariants
//! - [`inspect`] — Live-database introspection into the IR
//! - [`parse`] — Desired-state DDL parsing via a sandbox schema
//! - [`normalize`] — Canonicalization so two IRs are comparable
//! - [`diff`] — Ordered DDL step emission with dependency resolution
//! - [`ddl`] — Statement rendering from IR objects
//! - [`plan`] — The serializable plan artifact
//! - [`fingerprint`] — SHA-256 over the canonical IR
//! - [`commands`] — dump / plan / apply implementations
//! - [`error`] — Error types

pub mod commands;
pub mod config;
pub mod db;
pub mod ddl;
pub mod diff;
pub mod error;
pub mod fingerprint;
pub mod inspect;
pub mod model;
pub mod normalize;
pub mod parse;
pub mod plan;

use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use config::PgplanConfig;
use error::Result;
use tokio_postgres::Client;

pub use commands::apply::ApplyReport;
pub use commands::dump::DumpReport;
pub use config::CliOverrides;
pub use error::PgplanError;
pub use model::Catalog;
pub use plan::{Plan, Step, StepKind, StepOp};

/// Main entry point for the pgplan library.
///
/// Wraps a configuration and a database connection; the same connection
/// doubles as the parse sandbox unless a dedicated one is supplied.
pub struct Pgplan {
    pub config: PgplanConfig,
    client: Client,
}

impl Pgplan {
    /// Create a new instance, connecting to the configured database.
    pub async fn new(config: PgplanConfig) -> Result<Self> {
        let conn_string = config.connection_string()?;
        let client = db::connect_with_config(
            &conn_string,
            &config.database.ssl_mode,
            config.database.connect_retries,
            config.database.connect_timeout_secs,
            config.database.keepalive_secs,
        )
        .await?;
        Ok(Self { config, client })
    }

    /// Create an instance with an existing database client.
    pub fn with_client(config: PgplanConfig, client: Client) -> Self {
        Self { config, client }
    }

    /// Get a reference to the underlying database client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Introspect and normalize the live schema.
    pub async fn inspect(&self) -> Result<Catalog> {
        let mut catalog = inspect::build_catalog(&self.client, &self.config.schema).await?;
        normalize::normalize(&mut catalog, &self.config.schema);
        Ok(catalog)
    }

    /// Fingerprint of the current live schema.
    pub async fn fingerprint(&self) -> Result<String> {
        Ok(fingerprint::fingerprint(&self.inspect().await?))
    }

    /// Dump the live schema as canonical DDL steps.
    pub async fn dump(&self) -> Result<DumpReport> {
        commands::dump::execute(&self.client, &self.config.schema).await
    }

    /// Compute a plan from a desired-state DDL file, using this connection
    /// as the parse sandbox.
    pub async fn plan_from_file(&self, file: &Path) -> Result<Plan> {
        commands::plan::execute_from_file(&self.client, &self.client, &self.config.schema, file)
            .await
    }

    /// Compute a plan from desired-state DDL text.
    pub async fn plan_from_sql(&self, sql: &str, source_name: &str) -> Result<Plan> {
        commands::plan::execute(
            &self.client,
            &self.client,
            &self.config.schema,
            sql,
            source_name,
        )
        .await
    }

    /// Apply a plan. `cancel` stops the apply at the next transaction-group
    /// boundary when set.
    pub async fn apply(
        &self,
        plan: &Plan,
        cancel: Option<Arc<AtomicBool>>,
    ) -> Result<ApplyReport> {
        commands::apply::execute(
            &self.client,
            &self.config.apply,
            &self.config.schema,
            plan,
            cancel,
        )
        .await
    }
}
