//! Typed in-memory representation of a PostgreSQL schema.
//!
//! A [`Catalog`] is built either by introspecting a live database
//! ([`crate::inspect`]) or by reflecting desired-state DDL through a sandbox
//! ([`crate::parse`]). After [`crate::normalize`] has run, two catalogs that
//! describe semantically equal schemas serialize byte-identically, which is
//! what the diff engine and the fingerprint rely on.
//!
//! All collections are `BTreeMap`/`BTreeSet` so serialization order is stable.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Root of the schema IR: one entry per managed schema.
///
/// pgplan operates on a single target schema per run, but foreign keys may
/// point at tables in other schemas; those appear as external stubs inside
/// the same `Catalog` (see [`Table::is_external`]).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Catalog {
    pub schemas: BTreeMap<String, Schema>,
}

/// One PostgreSQL schema and everything pgplan manages inside it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Schema {
    /// Name of the schema (e.g. `public`).
    pub name: String,
    /// Base tables, keyed by table name.
    pub tables: BTreeMap<String, Table>,
    /// Views and materialized views, keyed by view name.
    pub views: BTreeMap<String, View>,
    /// Functions, keyed by `name(arg_type, …)` so overloads coexist.
    pub functions: BTreeMap<String, Routine>,
    /// Procedures, keyed the same way as functions.
    pub procedures: BTreeMap<String, Routine>,
    /// Standalone sequences, keyed by sequence name.
    pub sequences: BTreeMap<String, Sequence>,
    /// Enum, composite, and domain types, keyed by type name.
    pub types: BTreeMap<String, TypeDef>,
    /// User-defined aggregates, keyed by `name(arg_type, …)`.
    pub aggregates: BTreeMap<String, Aggregate>,
    /// Installed extensions (excluding plpgsql).
    pub extensions: BTreeSet<String>,
    /// `ALTER DEFAULT PRIVILEGES` entries, keyed by `role:object_type:grantee`.
    pub default_privileges: BTreeMap<String, DefaultPrivilege>,
}

impl Schema {
    pub fn new(name: &str) -> Self {
        Schema {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

/// A base table with its owned sub-objects.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Table {
    /// Schema the table belongs to.
    pub schema: String,
    /// Name of the table.
    pub name: String,
    /// Columns in ordinal-position order.
    pub columns: Vec<Column>,
    /// Constraints keyed by constraint name.
    pub constraints: BTreeMap<String, Constraint>,
    /// Indexes keyed by index name.
    pub indexes: BTreeMap<String, Index>,
    /// Triggers keyed by trigger name.
    pub triggers: BTreeMap<String, Trigger>,
    /// Row-level-security policies keyed by policy name.
    pub policies: BTreeMap<String, Policy>,
    /// Whether RLS is enabled on the table.
    pub rls_enabled: bool,
    /// True for tables referenced by the managed schema but owned elsewhere.
    /// External tables are never created, altered, or dropped.
    pub is_external: bool,
    /// `PARTITION BY` clause text, if the table is partitioned.
    pub partition_by: Option<String>,
    /// Table comment.
    pub comment: Option<String>,
}

impl Table {
    pub fn new(schema: &str, name: &str) -> Self {
        Table {
            schema: schema.to_string(),
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Stub for a table that is referenced but not managed.
    pub fn external(schema: &str, name: &str) -> Self {
        Table {
            is_external: true,
            ..Table::new(schema, name)
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// A table column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// 1-based ordinal position; unique and dense within a table.
    pub position: i32,
    /// Normalized type name with any length/precision folded in
    /// (e.g. `character varying(120)`).
    pub type_name: String,
    /// Whether the column allows NULL.
    pub nullable: bool,
    /// Default expression, canonicalized by the normalizer.
    pub default: Option<String>,
    /// Generation expression for `GENERATED ALWAYS AS (…) STORED` columns.
    pub generated: Option<String>,
    /// Identity attribute, if the column is an identity column.
    pub identity: Option<Identity>,
    /// Column comment.
    pub comment: Option<String>,
}

/// `GENERATED … AS IDENTITY` flavor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Identity {
    Always,
    ByDefault,
}

/// A table constraint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Constraint {
    /// Constraint name (map key in [`Table::constraints`]).
    pub name: String,
    /// Variant-specific payload.
    pub kind: ConstraintKind,
    /// Constrained columns, in definition order. Empty for expression-only
    /// check constraints and exclusion constraints.
    pub columns: Vec<String>,
    /// True when the constraint was added `NOT VALID` and has not been
    /// validated yet.
    pub not_valid: bool,
    /// `DEFERRABLE` flag (foreign keys only).
    pub deferrable: bool,
    /// `INITIALLY DEFERRED` flag.
    pub initially_deferred: bool,
}

/// The tagged payload of a [`Constraint`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConstraintKind {
    PrimaryKey,
    Unique,
    ForeignKey {
        /// Schema of the referenced table.
        ref_schema: String,
        /// Referenced table name.
        ref_table: String,
        /// Referenced columns, positionally matching [`Constraint::columns`].
        ref_columns: Vec<String>,
        on_delete: ReferentialAction,
        on_update: ReferentialAction,
    },
    Check {
        /// Normalized predicate text, without the outer `CHECK (…)`.
        expression: String,
    },
    Exclusion {
        /// Full definition as rendered by `pg_get_constraintdef`.
        definition: String,
    },
}

impl Constraint {
    pub fn is_foreign_key(&self) -> bool {
        matches!(self.kind, ConstraintKind::ForeignKey { .. })
    }
}

/// Referential action for `ON DELETE` / `ON UPDATE`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReferentialAction {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl ReferentialAction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
        }
    }
}

/// An index on a table or materialized view.
///
/// The `definition` field holds the canonical `CREATE INDEX` statement as
/// rendered by `pg_get_indexdef` and is the structural signature used for
/// comparison: two indexes are equal exactly when their definitions are.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Index {
    /// Schema of the indexed relation.
    pub schema: String,
    /// Relation the index is built on.
    pub table: String,
    /// Index name (map key in [`Table::indexes`]).
    pub name: String,
    /// Access method: btree, hash, gin, gist, spgist, brin.
    pub method: String,
    /// Key elements in order.
    pub elements: Vec<IndexElement>,
    /// Whether this is a UNIQUE index.
    pub unique: bool,
    /// Partial-index predicate, canonicalized.
    pub predicate: Option<String>,
    /// Non-key INCLUDE columns.
    pub include: Vec<String>,
    /// Canonical `CREATE INDEX` statement (no trailing semicolon).
    pub definition: String,
}

/// One key element of an index: a column or an expression.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexElement {
    /// Column name, or expression text wrapped in parentheses.
    pub expression: String,
    /// True for DESC elements.
    pub descending: bool,
    /// Non-default operator class, if any.
    pub opclass: Option<String>,
}

/// A view or materialized view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct View {
    pub schema: String,
    pub name: String,
    /// True for materialized views.
    pub materialized: bool,
    /// Canonical query text from `pg_get_viewdef(oid, true)`.
    pub query: String,
    /// View comment.
    pub comment: Option<String>,
    /// Indexes on the view. Only materialized views may carry entries.
    pub indexes: BTreeMap<String, Index>,
}

/// Whether a routine is a function or a procedure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RoutineKind {
    Function,
    Procedure,
}

/// Provided volatility of a function.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum Volatility {
    Immutable,
    Stable,
    #[default]
    Volatile,
}

/// A function or procedure.
///
/// Keyed in its schema map by [`Routine::key`] — `name(sig)` — so that
/// overloads with the same name but different argument types coexist.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Routine {
    pub schema: String,
    pub name: String,
    pub kind: RoutineKind,
    /// Normalized argument signature: comma-separated canonical type names.
    pub signature: String,
    /// Return type; `None` for procedures.
    pub returns: Option<String>,
    /// Implementation language (sql, plpgsql, c, …).
    pub language: String,
    pub volatility: Volatility,
    /// `STRICT` / `RETURNS NULL ON NULL INPUT`.
    pub strict: bool,
    /// `SECURITY DEFINER`.
    pub security_definer: bool,
    /// Complete `CREATE OR REPLACE` statement from `pg_get_functiondef`.
    pub definition: String,
    pub comment: Option<String>,
}

impl Routine {
    /// Map key: `name(type, type, …)`.
    pub fn key(&self) -> String {
        format!("{}({})", self.name, self.signature)
    }
}

/// A standalone or owned sequence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Sequence {
    pub schema: String,
    pub name: String,
    /// smallint, integer, or bigint.
    pub data_type: String,
    pub start: i64,
    pub increment: i64,
    pub min_value: i64,
    pub max_value: i64,
    pub cycle: bool,
    /// Owning table column for SERIAL/identity sequences. Owned sequences
    /// are created implicitly and skipped by the diff engine.
    pub owned_by: Option<SequenceOwner>,
}

/// `OWNED BY table.column` attribution of a sequence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SequenceOwner {
    pub table: String,
    pub column: String,
}

/// A user-defined type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TypeDef {
    pub schema: String,
    pub name: String,
    pub kind: TypeKind,
}

/// The tagged payload of a [`TypeDef`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum TypeKind {
    Enum {
        /// Labels in catalog (`enumsortorder`) order.
        labels: Vec<String>,
    },
    Composite {
        /// Fields in definition order.
        fields: Vec<CompositeField>,
    },
    Domain {
        /// Canonical base type name.
        base_type: String,
        not_null: bool,
        default: Option<String>,
        /// Check constraints on the domain, in name order.
        checks: Vec<DomainCheck>,
    },
}

/// One field of a composite type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompositeField {
    pub name: String,
    pub type_name: String,
}

/// One check constraint on a domain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DomainCheck {
    pub name: String,
    pub expression: String,
}

/// A user-defined aggregate, compared by whole definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Aggregate {
    pub schema: String,
    pub name: String,
    /// Normalized input signature, like [`Routine::signature`].
    pub signature: String,
    /// State transition function.
    pub state_func: String,
    /// State data type.
    pub state_type: String,
    /// Final function, if any.
    pub final_func: Option<String>,
    /// Initial condition literal, if any.
    pub initial_condition: Option<String>,
}

impl Aggregate {
    pub fn key(&self) -> String {
        format!("{}({})", self.name, self.signature)
    }
}

/// Trigger firing time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TriggerTiming {
    Before,
    After,
    InsteadOf,
}

/// Trigger firing event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum TriggerEvent {
    Insert,
    Update,
    Delete,
    Truncate,
}

/// A trigger on a table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Trigger {
    pub schema: String,
    /// Table the trigger is attached to.
    pub table: String,
    /// Trigger name (map key in [`Table::triggers`]).
    pub name: String,
    pub timing: TriggerTiming,
    /// Events, sorted.
    pub events: Vec<TriggerEvent>,
    /// `UPDATE OF` column list, if restricted.
    pub update_columns: Vec<String>,
    /// True for `FOR EACH ROW`, false for `FOR EACH STATEMENT`.
    pub for_each_row: bool,
    /// `WHEN (…)` predicate, canonicalized.
    pub when_clause: Option<String>,
    pub function_schema: String,
    pub function_name: String,
    pub function_args: Vec<String>,
    /// True for constraint triggers.
    pub is_constraint: bool,
    /// Canonical `CREATE TRIGGER` statement from `pg_get_triggerdef`.
    pub definition: String,
}

/// Command scope of an RLS policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PolicyCommand {
    All,
    Select,
    Insert,
    Update,
    Delete,
}

impl PolicyCommand {
    pub fn as_sql(&self) -> &'static str {
        match self {
            PolicyCommand::All => "ALL",
            PolicyCommand::Select => "SELECT",
            PolicyCommand::Insert => "INSERT",
            PolicyCommand::Update => "UPDATE",
            PolicyCommand::Delete => "DELETE",
        }
    }
}

/// A row-level-security policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Policy {
    pub schema: String,
    pub table: String,
    /// Policy name (map key in [`Table::policies`]).
    pub name: String,
    pub command: PolicyCommand,
    /// True = PERMISSIVE, false = RESTRICTIVE.
    pub permissive: bool,
    /// Roles the policy applies to; empty means PUBLIC.
    pub roles: Vec<String>,
    pub using_expr: Option<String>,
    pub with_check_expr: Option<String>,
}

/// One `ALTER DEFAULT PRIVILEGES` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DefaultPrivilege {
    /// Role whose object creations the entry applies to.
    pub role: String,
    /// TABLES, SEQUENCES, or FUNCTIONS.
    pub object_type: String,
    pub grantee: String,
    /// Sorted privilege names (SELECT, INSERT, …).
    pub privileges: Vec<String>,
}

impl DefaultPrivilege {
    pub fn key(&self) -> String {
        format!("{}:{}:{}", self.role, self.object_type, self.grantee)
    }
}

/// `schema.name` key used in step paths and cross-object references.
pub fn qualified(schema: &str, name: &str) -> String {
    format!("{}.{}", schema, name)
}

impl Catalog {
    /// Catalog containing a single empty schema. The diff of this against a
    /// populated catalog is a full creation script (used by `dump`).
    pub fn empty(schema: &str) -> Self {
        let mut schemas = BTreeMap::new();
        schemas.insert(schema.to_string(), Schema::new(schema));
        Catalog { schemas }
    }

    pub fn schema(&self, name: &str) -> Option<&Schema> {
        self.schemas.get(name)
    }

    /// Look up a table anywhere in the catalog by schema-qualified name.
    pub fn table(&self, schema: &str, name: &str) -> Option<&Table> {
        self.schemas.get(schema).and_then(|s| s.tables.get(name))
    }

    /// Verify the structural invariants the diff engine relies on.
    ///
    /// Returns a description of the first violation found. Callers that hit
    /// a violation report it as an internal error: both producers (inspect
    /// and parse) are expected to uphold these.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        for (schema_name, schema) in &self.schemas {
            if &schema.name != schema_name {
                return Err(format!(
                    "schema map key {} does not match schema name {}",
                    schema_name, schema.name
                ));
            }
            for (table_name, table) in &schema.tables {
                if &table.name != table_name {
                    return Err(format!(
                        "table map key {}.{} does not match table name {}",
                        schema_name, table_name, table.name
                    ));
                }
                let mut positions: Vec<i32> = table.columns.iter().map(|c| c.position).collect();
                positions.sort_unstable();
                for (i, p) in positions.iter().enumerate() {
                    if *p != i as i32 + 1 {
                        return Err(format!(
                            "column positions of {}.{} are not dense",
                            schema_name, table_name
                        ));
                    }
                }
                for (key, index) in &table.indexes {
                    if key != &index.name {
                        return Err(format!(
                            "index map key {} does not match index name {}",
                            key, index.name
                        ));
                    }
                }
                for (key, trigger) in &table.triggers {
                    if key != &trigger.name {
                        return Err(format!(
                            "trigger map key {} does not match trigger name {}",
                            key, trigger.name
                        ));
                    }
                }
                for constraint in table.constraints.values() {
                    if let ConstraintKind::ForeignKey {
                        ref_schema,
                        ref_table,
                        ..
                    } = &constraint.kind
                    {
                        let target = self.table(ref_schema, ref_table);
                        if target.is_none() {
                            return Err(format!(
                                "foreign key {} on {}.{} references missing table {}.{}",
                                constraint.name, schema_name, table_name, ref_schema, ref_table
                            ));
                        }
                    }
                }
            }
            for (key, routine) in schema.functions.iter().chain(schema.procedures.iter()) {
                if key != &routine.key() {
                    return Err(format!(
                        "routine map key {} does not match signature key {}",
                        key,
                        routine.key()
                    ));
                }
            }
            for sequence in schema.sequences.values() {
                if let Some(owner) = &sequence.owned_by {
                    let column_exists = schema
                        .tables
                        .get(&owner.table)
                        .is_some_and(|t| t.column(&owner.column).is_some());
                    if !column_exists {
                        return Err(format!(
                            "sequence {}.{} is owned by missing column {}.{}",
                            schema_name, sequence.name, owner.table, owner.column
                        ));
                    }
                }
            }
            for view in schema.views.values() {
                if !view.materialized && !view.indexes.is_empty() {
                    return Err(format!(
                        "non-materialized view {}.{} carries indexes",
                        schema_name, view.name
                    ));
                }
            }
        }
        Ok(())
    }
}
