//! Live-database schema introspection.
//!
//! Builds a [`Catalog`] from the PostgreSQL system catalogs, scoped to one
//! target schema. Expression strings returned by the server (`pg_get_expr`,
//! `pg_get_viewdef`, `pg_get_constraintdef`, …) are treated as authoritative
//! and never re-parsed — only canonicalized later by the normalizer.
//!
//! Cross-schema foreign-key targets are captured as external table stubs so
//! the diff engine leaves them alone.

use std::collections::BTreeMap;

use tokio_postgres::Client;

use crate::db::quote_ident;
use crate::error::{PgplanError, Result};
use crate::model::{
    Aggregate, Catalog, Column, CompositeField, Constraint, ConstraintKind, DefaultPrivilege,
    DomainCheck, Identity, Index, IndexElement, Policy, PolicyCommand, ReferentialAction, Routine,
    RoutineKind, Schema, Sequence, SequenceOwner, Table, Trigger, TriggerEvent, TriggerTiming,
    TypeDef, TypeKind, View, Volatility,
};

fn inspect_err(schema: &str, context: &str, e: tokio_postgres::Error) -> PgplanError {
    PgplanError::InspectError {
        schema: schema.to_string(),
        reason: format!("{}: {}", context, crate::error::format_db_error(&e)),
    }
}

/// Build the IR of `target_schema` from a live database.
pub async fn build_catalog(client: &Client, target_schema: &str) -> Result<Catalog> {
    // Pin the search path so server-rendered expressions spell in-schema
    // references unqualified and everything else qualified.
    client
        .batch_execute(&format!(
            "SET search_path TO {}",
            quote_ident(target_schema)
        ))
        .await
        .map_err(|e| inspect_err(target_schema, "set search_path", e))?;

    let mut schema = Schema::new(target_schema);

    schema.tables = inspect_tables(client, target_schema).await?;
    inspect_columns(client, target_schema, &mut schema.tables).await?;
    inspect_constraints(client, target_schema, &mut schema.tables).await?;

    let indexes = inspect_indexes(client, target_schema).await?;
    inspect_triggers(client, target_schema, &mut schema.tables).await?;
    inspect_policies(client, target_schema, &mut schema.tables).await?;

    schema.views = inspect_views(client, target_schema).await?;
    for (relation, index_map) in indexes {
        if let Some(table) = schema.tables.get_mut(&relation) {
            table.indexes = index_map;
        } else if let Some(view) = schema.views.get_mut(&relation) {
            view.indexes = index_map;
        }
    }

    let (functions, procedures) = inspect_routines(client, target_schema).await?;
    schema.functions = functions;
    schema.procedures = procedures;
    schema.aggregates = inspect_aggregates(client, target_schema).await?;
    schema.sequences = inspect_sequences(client, target_schema).await?;
    schema.types = inspect_types(client, target_schema).await?;
    schema.extensions = inspect_extensions(client, target_schema).await?;
    schema.default_privileges = inspect_default_privileges(client, target_schema).await?;

    let mut catalog = Catalog::default();
    // External FK targets become stub schemas/tables
    let mut externals: Vec<(String, String)> = Vec::new();
    for table in schema.tables.values() {
        for constraint in table.constraints.values() {
            if let ConstraintKind::ForeignKey {
                ref_schema,
                ref_table,
                ..
            } = &constraint.kind
            {
                if ref_schema != target_schema {
                    externals.push((ref_schema.clone(), ref_table.clone()));
                }
            }
        }
    }
    catalog
        .schemas
        .insert(target_schema.to_string(), schema);
    for (ext_schema, ext_table) in externals {
        let entry = catalog
            .schemas
            .entry(ext_schema.clone())
            .or_insert_with(|| Schema::new(&ext_schema));
        entry
            .tables
            .entry(ext_table.clone())
            .or_insert_with(|| Table::external(&ext_schema, &ext_table));
    }

    Ok(catalog)
}

async fn inspect_tables(client: &Client, schema: &str) -> Result<BTreeMap<String, Table>> {
    let rows = client
        .query(
            "SELECT c.relname,
                    c.relrowsecurity,
                    CASE WHEN c.relkind = 'p' THEN pg_get_partkeydef(c.oid) END,
                    obj_description(c.oid, 'pg_class')
             FROM pg_class c
             JOIN pg_namespace n ON n.oid = c.relnamespace
             WHERE n.nspname = $1
               AND c.relkind IN ('r', 'p')
             ORDER BY c.relname",
            &[&schema],
        )
        .await
        .map_err(|e| inspect_err(schema, "tables", e))?;

    let mut tables = BTreeMap::new();
    for row in &rows {
        let name: String = row.get(0);
        let mut table = Table::new(schema, &name);
        table.rls_enabled = row.get(1);
        table.partition_by = row.get(2);
        table.comment = row.get(3);
        tables.insert(name, table);
    }
    Ok(tables)
}

async fn inspect_columns(
    client: &Client,
    schema: &str,
    tables: &mut BTreeMap<String, Table>,
) -> Result<()> {
    let rows = client
        .query(
            "SELECT c.relname,
                    a.attname,
                    (row_number() OVER (PARTITION BY a.attrelid ORDER BY a.attnum))::int,
                    format_type(a.atttypid, a.atttypmod),
                    NOT a.attnotnull,
                    CASE WHEN a.atthasdef AND a.attgenerated = ''
                         THEN pg_get_expr(d.adbin, d.adrelid, true) END,
                    CASE WHEN a.attgenerated = 's'
                         THEN pg_get_expr(d.adbin, d.adrelid, true) END,
                    a.attidentity::text,
                    col_description(a.attrelid, a.attnum)
             FROM pg_attribute a
             JOIN pg_class c ON c.oid = a.attrelid
             JOIN pg_namespace n ON n.oid = c.relnamespace
             LEFT JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
             WHERE n.nspname = $1
               AND c.relkind IN ('r', 'p')
               AND a.attnum > 0
               AND NOT a.attisdropped
             ORDER BY c.relname, a.attnum",
            &[&schema],
        )
        .await
        .map_err(|e| inspect_err(schema, "columns", e))?;

    for row in &rows {
        let table_name: String = row.get(0);
        let identity: String = row.get(7);
        let column = Column {
            name: row.get(1),
            position: row.get(2),
            type_name: row.get(3),
            nullable: row.get(4),
            default: row.get(5),
            generated: row.get(6),
            identity: match identity.as_str() {
                "a" => Some(Identity::Always),
                "d" => Some(Identity::ByDefault),
                _ => None,
            },
            comment: row.get(8),
        };
        if let Some(table) = tables.get_mut(&table_name) {
            table.columns.push(column);
        }
    }
    Ok(())
}

fn referential_action(code: &str) -> ReferentialAction {
    match code {
        "r" => ReferentialAction::Restrict,
        "c" => ReferentialAction::Cascade,
        "n" => ReferentialAction::SetNull,
        "d" => ReferentialAction::SetDefault,
        _ => ReferentialAction::NoAction,
    }
}

async fn inspect_constraints(
    client: &Client,
    schema: &str,
    tables: &mut BTreeMap<String, Table>,
) -> Result<()> {
    let rows = client
        .query(
            "SELECT c.relname,
                    con.conname,
                    con.contype::text,
                    COALESCE((SELECT array_agg(a.attname ORDER BY k.ord)
                              FROM unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
                              JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum),
                             '{}'::name[])::text[],
                    rn.nspname,
                    rc.relname,
                    COALESCE((SELECT array_agg(a.attname ORDER BY k.ord)
                              FROM unnest(con.confkey) WITH ORDINALITY AS k(attnum, ord)
                              JOIN pg_attribute a ON a.attrelid = con.confrelid AND a.attnum = k.attnum),
                             '{}'::name[])::text[],
                    con.confdeltype::text,
                    con.confupdtype::text,
                    con.condeferrable,
                    con.condeferred,
                    NOT con.convalidated,
                    CASE WHEN con.contype = 'c'
                         THEN pg_get_expr(con.conbin, con.conrelid, true) END,
                    pg_get_constraintdef(con.oid, true)
             FROM pg_constraint con
             JOIN pg_class c ON c.oid = con.conrelid
             JOIN pg_namespace n ON n.oid = c.relnamespace
             LEFT JOIN pg_class rc ON rc.oid = con.confrelid
             LEFT JOIN pg_namespace rn ON rn.oid = rc.relnamespace
             WHERE n.nspname = $1
               AND con.contype IN ('p', 'u', 'f', 'c', 'x')
             ORDER BY c.relname, con.conname",
            &[&schema],
        )
        .await
        .map_err(|e| inspect_err(schema, "constraints", e))?;

    for row in &rows {
        let table_name: String = row.get(0);
        let name: String = row.get(1);
        let contype: String = row.get(2);
        let columns: Vec<String> = row.get(3);
        let kind = match contype.as_str() {
            "p" => ConstraintKind::PrimaryKey,
            "u" => ConstraintKind::Unique,
            "f" => {
                let del: String = row.get(7);
                let upd: String = row.get(8);
                ConstraintKind::ForeignKey {
                    ref_schema: row.get::<_, Option<String>>(4).unwrap_or_default(),
                    ref_table: row.get::<_, Option<String>>(5).unwrap_or_default(),
                    ref_columns: row.get(6),
                    on_delete: referential_action(&del),
                    on_update: referential_action(&upd),
                }
            }
            "c" => ConstraintKind::Check {
                expression: row.get::<_, Option<String>>(12).unwrap_or_default(),
            },
            _ => ConstraintKind::Exclusion {
                definition: row.get::<_, Option<String>>(13).unwrap_or_default(),
            },
        };
        let constraint = Constraint {
            name: name.clone(),
            kind,
            columns,
            not_valid: row.get(11),
            deferrable: row.get(9),
            initially_deferred: row.get(10),
        };
        if let Some(table) = tables.get_mut(&table_name) {
            table.constraints.insert(name, constraint);
        }
    }
    Ok(())
}

/// Fetch all plain indexes in the schema, grouped by relation name.
/// Constraint-backed indexes (primary key, unique constraint) are excluded —
/// they are owned by their constraint, not listed as separate objects.
async fn inspect_indexes(
    client: &Client,
    schema: &str,
) -> Result<BTreeMap<String, BTreeMap<String, Index>>> {
    let rows = client
        .query(
            "SELECT c.relname,
                    ic.relname,
                    am.amname,
                    i.indisunique,
                    pg_get_expr(i.indpred, i.indrelid, true),
                    i.indnkeyatts::int,
                    i.indnatts::int,
                    i.indexrelid::oid,
                    i.indoption::int2[]
             FROM pg_index i
             JOIN pg_class ic ON ic.oid = i.indexrelid
             JOIN pg_class c ON c.oid = i.indrelid
             JOIN pg_namespace n ON n.oid = c.relnamespace
             JOIN pg_am am ON am.oid = ic.relam
             WHERE n.nspname = $1
               AND NOT i.indisprimary
               AND NOT EXISTS (SELECT 1 FROM pg_constraint con WHERE con.conindid = i.indexrelid)
             ORDER BY c.relname, ic.relname",
            &[&schema],
        )
        .await
        .map_err(|e| inspect_err(schema, "indexes", e))?;

    let mut by_relation: BTreeMap<String, BTreeMap<String, Index>> = BTreeMap::new();
    for row in &rows {
        let relation: String = row.get(0);
        let name: String = row.get(1);
        let nkeys: i32 = row.get(5);
        let natts: i32 = row.get(6);
        let oid: tokio_postgres::types::Oid = row.get(7);
        let options: Vec<i16> = row.get(8);

        let mut elements = Vec::new();
        let mut include = Vec::new();
        for n in 1..=natts {
            let element_row = client
                .query_one(
                    "SELECT pg_get_indexdef($1::oid, $2::int, true)",
                    &[&oid, &n],
                )
                .await
                .map_err(|e| inspect_err(schema, "index elements", e))?;
            let expression: String = element_row.get(0);
            if n <= nkeys {
                let descending = options
                    .get((n - 1) as usize)
                    .is_some_and(|o| o & 1 == 1);
                elements.push(IndexElement {
                    expression,
                    descending,
                    opclass: None,
                });
            } else {
                include.push(expression);
            }
        }

        let mut index = Index {
            schema: schema.to_string(),
            table: relation.clone(),
            name: name.clone(),
            method: row.get(2),
            elements,
            unique: row.get(3),
            predicate: row.get(4),
            include,
            definition: String::new(),
        };
        index.definition = crate::ddl::index_definition(&index, schema);
        by_relation.entry(relation).or_default().insert(name, index);
    }
    Ok(by_relation)
}

async fn inspect_triggers(
    client: &Client,
    schema: &str,
    tables: &mut BTreeMap<String, Table>,
) -> Result<()> {
    let rows = client
        .query(
            "SELECT c.relname,
                    t.tgname,
                    t.tgtype::int,
                    fn.nspname,
                    p.proname,
                    pg_get_expr(t.tgqual, t.tgrelid, true),
                    t.tgisinternal,
                    t.tgconstraint <> 0,
                    pg_get_triggerdef(t.oid, true),
                    COALESCE((SELECT array_agg(a.attname ORDER BY k.ord)
                              FROM unnest(t.tgattr) WITH ORDINALITY AS k(attnum, ord)
                              JOIN pg_attribute a ON a.attrelid = t.tgrelid AND a.attnum = k.attnum),
                             '{}'::name[])::text[]
             FROM pg_trigger t
             JOIN pg_class c ON c.oid = t.tgrelid
             JOIN pg_namespace n ON n.oid = c.relnamespace
             JOIN pg_proc p ON p.oid = t.tgfoid
             JOIN pg_namespace fn ON fn.oid = p.pronamespace
             WHERE n.nspname = $1
               AND NOT t.tgisinternal
             ORDER BY c.relname, t.tgname",
            &[&schema],
        )
        .await
        .map_err(|e| inspect_err(schema, "triggers", e))?;

    for row in &rows {
        let table_name: String = row.get(0);
        let name: String = row.get(1);
        let tgtype: i32 = row.get(2);

        // tgtype bits: 1 = FOR EACH ROW, 2 = BEFORE, 64 = INSTEAD OF,
        // 4 = INSERT, 8 = DELETE, 16 = UPDATE, 32 = TRUNCATE
        let timing = if tgtype & 64 != 0 {
            TriggerTiming::InsteadOf
        } else if tgtype & 2 != 0 {
            TriggerTiming::Before
        } else {
            TriggerTiming::After
        };
        let mut events = Vec::new();
        if tgtype & 4 != 0 {
            events.push(TriggerEvent::Insert);
        }
        if tgtype & 8 != 0 {
            events.push(TriggerEvent::Delete);
        }
        if tgtype & 16 != 0 {
            events.push(TriggerEvent::Update);
        }
        if tgtype & 32 != 0 {
            events.push(TriggerEvent::Truncate);
        }

        let trigger = Trigger {
            schema: schema.to_string(),
            table: table_name.clone(),
            name: name.clone(),
            timing,
            events,
            update_columns: row.get(9),
            for_each_row: tgtype & 1 != 0,
            when_clause: row.get(5),
            function_schema: row.get(3),
            function_name: row.get(4),
            function_args: Vec::new(),
            is_constraint: row.get(7),
            definition: row.get(8),
        };
        if let Some(table) = tables.get_mut(&table_name) {
            table.triggers.insert(name, trigger);
        }
    }
    Ok(())
}

async fn inspect_policies(
    client: &Client,
    schema: &str,
    tables: &mut BTreeMap<String, Table>,
) -> Result<()> {
    let rows = client
        .query(
            "SELECT c.relname,
                    p.polname,
                    p.polcmd::text,
                    p.polpermissive,
                    COALESCE(ARRAY(SELECT rolname FROM pg_roles
                                   WHERE oid = ANY(p.polroles)
                                   ORDER BY rolname),
                             '{}'::name[])::text[],
                    pg_get_expr(p.polqual, p.polrelid, true),
                    pg_get_expr(p.polwithcheck, p.polrelid, true)
             FROM pg_policy p
             JOIN pg_class c ON c.oid = p.polrelid
             JOIN pg_namespace n ON n.oid = c.relnamespace
             WHERE n.nspname = $1
             ORDER BY c.relname, p.polname",
            &[&schema],
        )
        .await
        .map_err(|e| inspect_err(schema, "policies", e))?;

    for row in &rows {
        let table_name: String = row.get(0);
        let name: String = row.get(1);
        let command: String = row.get(2);
        let policy = Policy {
            schema: schema.to_string(),
            table: table_name.clone(),
            name: name.clone(),
            command: match command.as_str() {
                "r" => PolicyCommand::Select,
                "a" => PolicyCommand::Insert,
                "w" => PolicyCommand::Update,
                "d" => PolicyCommand::Delete,
                _ => PolicyCommand::All,
            },
            permissive: row.get(3),
            roles: row.get(4),
            using_expr: row.get(5),
            with_check_expr: row.get(6),
        };
        if let Some(table) = tables.get_mut(&table_name) {
            table.policies.insert(name, policy);
        }
    }
    Ok(())
}

async fn inspect_views(client: &Client, schema: &str) -> Result<BTreeMap<String, View>> {
    let rows = client
        .query(
            "SELECT c.relname,
                    c.relkind = 'm',
                    pg_get_viewdef(c.oid, true),
                    obj_description(c.oid, 'pg_class')
             FROM pg_class c
             JOIN pg_namespace n ON n.oid = c.relnamespace
             WHERE n.nspname = $1
               AND c.relkind IN ('v', 'm')
             ORDER BY c.relname",
            &[&schema],
        )
        .await
        .map_err(|e| inspect_err(schema, "views", e))?;

    let mut views = BTreeMap::new();
    for row in &rows {
        let name: String = row.get(0);
        views.insert(
            name.clone(),
            View {
                schema: schema.to_string(),
                name,
                materialized: row.get(1),
                query: row.get::<_, Option<String>>(2).unwrap_or_default(),
                comment: row.get(3),
                indexes: BTreeMap::new(),
            },
        );
    }
    Ok(views)
}

#[allow(clippy::type_complexity)]
async fn inspect_routines(
    client: &Client,
    schema: &str,
) -> Result<(BTreeMap<String, Routine>, BTreeMap<String, Routine>)> {
    let rows = client
        .query(
            "SELECT p.proname,
                    p.prokind::text,
                    pg_get_function_identity_arguments(p.oid),
                    pg_get_function_result(p.oid),
                    l.lanname,
                    p.provolatile::text,
                    p.proisstrict,
                    p.prosecdef,
                    pg_get_functiondef(p.oid),
                    obj_description(p.oid, 'pg_proc')
             FROM pg_proc p
             JOIN pg_namespace n ON n.oid = p.pronamespace
             JOIN pg_language l ON l.oid = p.prolang
             WHERE n.nspname = $1
               AND p.prokind IN ('f', 'p')
             ORDER BY p.proname",
            &[&schema],
        )
        .await
        .map_err(|e| inspect_err(schema, "functions", e))?;

    let mut functions = BTreeMap::new();
    let mut procedures = BTreeMap::new();
    for row in &rows {
        let prokind: String = row.get(1);
        let volatility: String = row.get(5);
        let routine = Routine {
            schema: schema.to_string(),
            name: row.get(0),
            kind: if prokind == "p" {
                RoutineKind::Procedure
            } else {
                RoutineKind::Function
            },
            signature: row.get(2),
            returns: row.get(3),
            language: row.get(4),
            volatility: match volatility.as_str() {
                "i" => Volatility::Immutable,
                "s" => Volatility::Stable,
                _ => Volatility::Volatile,
            },
            strict: row.get(6),
            security_definer: row.get(7),
            definition: row.get::<_, Option<String>>(8).unwrap_or_default(),
            comment: row.get(9),
        };
        let target = if routine.kind == RoutineKind::Procedure {
            &mut procedures
        } else {
            &mut functions
        };
        target.insert(routine.key(), routine);
    }
    Ok((functions, procedures))
}

async fn inspect_aggregates(
    client: &Client,
    schema: &str,
) -> Result<BTreeMap<String, Aggregate>> {
    let rows = client
        .query(
            "SELECT p.proname,
                    pg_get_function_identity_arguments(p.oid),
                    a.aggtransfn::regproc::text,
                    format_type(a.aggtranstype, NULL),
                    CASE WHEN a.aggfinalfn <> 0 THEN a.aggfinalfn::regproc::text END,
                    a.agginitval
             FROM pg_proc p
             JOIN pg_aggregate a ON a.aggfnoid = p.oid
             JOIN pg_namespace n ON n.oid = p.pronamespace
             WHERE n.nspname = $1
               AND p.prokind = 'a'
             ORDER BY p.proname",
            &[&schema],
        )
        .await
        .map_err(|e| inspect_err(schema, "aggregates", e))?;

    let mut aggregates = BTreeMap::new();
    for row in &rows {
        let aggregate = Aggregate {
            schema: schema.to_string(),
            name: row.get(0),
            signature: row.get(1),
            state_func: row.get(2),
            state_type: row.get(3),
            final_func: row.get(4),
            initial_condition: row.get(5),
        };
        aggregates.insert(aggregate.key(), aggregate);
    }
    Ok(aggregates)
}

async fn inspect_sequences(
    client: &Client,
    schema: &str,
) -> Result<BTreeMap<String, Sequence>> {
    let rows = client
        .query(
            "SELECT c.relname,
                    format_type(s.seqtypid, NULL),
                    s.seqstart,
                    s.seqincrement,
                    s.seqmin,
                    s.seqmax,
                    s.seqcycle,
                    oc.relname,
                    oa.attname
             FROM pg_sequence s
             JOIN pg_class c ON c.oid = s.seqrelid
             JOIN pg_namespace n ON n.oid = c.relnamespace
             LEFT JOIN pg_depend d ON d.objid = s.seqrelid
                  AND d.classid = 'pg_class'::regclass
                  AND d.refclassid = 'pg_class'::regclass
                  AND d.deptype IN ('a', 'i')
             LEFT JOIN pg_class oc ON oc.oid = d.refobjid
             LEFT JOIN pg_attribute oa ON oa.attrelid = d.refobjid AND oa.attnum = d.refobjsubid
             WHERE n.nspname = $1
             ORDER BY c.relname",
            &[&schema],
        )
        .await
        .map_err(|e| inspect_err(schema, "sequences", e))?;

    let mut sequences = BTreeMap::new();
    for row in &rows {
        let name: String = row.get(0);
        let owner_table: Option<String> = row.get(7);
        let owner_column: Option<String> = row.get(8);
        sequences.insert(
            name.clone(),
            Sequence {
                schema: schema.to_string(),
                name,
                data_type: row.get(1),
                start: row.get(2),
                increment: row.get(3),
                min_value: row.get(4),
                max_value: row.get(5),
                cycle: row.get(6),
                owned_by: match (owner_table, owner_column) {
                    (Some(table), Some(column)) => Some(SequenceOwner { table, column }),
                    _ => None,
                },
            },
        );
    }
    Ok(sequences)
}

async fn inspect_types(client: &Client, schema: &str) -> Result<BTreeMap<String, TypeDef>> {
    let mut types = BTreeMap::new();

    // Enums
    let rows = client
        .query(
            "SELECT t.typname, array_agg(e.enumlabel ORDER BY e.enumsortorder)::text[]
             FROM pg_type t
             JOIN pg_enum e ON e.enumtypid = t.oid
             JOIN pg_namespace n ON n.oid = t.typnamespace
             WHERE n.nspname = $1
             GROUP BY t.typname
             ORDER BY t.typname",
            &[&schema],
        )
        .await
        .map_err(|e| inspect_err(schema, "enum types", e))?;
    for row in &rows {
        let name: String = row.get(0);
        types.insert(
            name.clone(),
            TypeDef {
                schema: schema.to_string(),
                name,
                kind: TypeKind::Enum {
                    labels: row.get(1),
                },
            },
        );
    }

    // Standalone composite types (relkind 'c', not table row types)
    let rows = client
        .query(
            "SELECT t.typname, a.attname, format_type(a.atttypid, a.atttypmod)
             FROM pg_type t
             JOIN pg_class c ON c.oid = t.typrelid AND c.relkind = 'c'
             JOIN pg_namespace n ON n.oid = t.typnamespace
             JOIN pg_attribute a ON a.attrelid = c.oid AND a.attnum > 0 AND NOT a.attisdropped
             WHERE n.nspname = $1
             ORDER BY t.typname, a.attnum",
            &[&schema],
        )
        .await
        .map_err(|e| inspect_err(schema, "composite types", e))?;
    for row in &rows {
        let name: String = row.get(0);
        let field = CompositeField {
            name: row.get(1),
            type_name: row.get(2),
        };
        let entry = types.entry(name.clone()).or_insert_with(|| TypeDef {
            schema: schema.to_string(),
            name,
            kind: TypeKind::Composite { fields: Vec::new() },
        });
        if let TypeKind::Composite { fields } = &mut entry.kind {
            fields.push(field);
        }
    }

    // Domains
    let rows = client
        .query(
            "SELECT t.typname,
                    format_type(t.typbasetype, t.typtypmod),
                    t.typnotnull,
                    t.typdefault
             FROM pg_type t
             JOIN pg_namespace n ON n.oid = t.typnamespace
             WHERE n.nspname = $1
               AND t.typtype = 'd'
             ORDER BY t.typname",
            &[&schema],
        )
        .await
        .map_err(|e| inspect_err(schema, "domains", e))?;
    for row in &rows {
        let name: String = row.get(0);
        let check_rows = client
            .query(
                "SELECT con.conname, pg_get_constraintdef(con.oid, true)
                 FROM pg_constraint con
                 JOIN pg_type t ON t.oid = con.contypid
                 JOIN pg_namespace n ON n.oid = t.typnamespace
                 WHERE n.nspname = $1 AND t.typname = $2
                 ORDER BY con.conname",
                &[&schema, &name],
            )
            .await
            .map_err(|e| inspect_err(schema, "domain constraints", e))?;
        let checks = check_rows
            .iter()
            .map(|r| {
                let definition: String = r.get::<_, Option<String>>(1).unwrap_or_default();
                // pg_get_constraintdef renders `CHECK (expr)`; keep the bare expr
                let expression = definition
                    .trim()
                    .strip_prefix("CHECK (")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .unwrap_or(&definition)
                    .to_string();
                DomainCheck {
                    name: r.get(0),
                    expression,
                }
            })
            .collect();
        types.insert(
            name.clone(),
            TypeDef {
                schema: schema.to_string(),
                name,
                kind: TypeKind::Domain {
                    base_type: row.get(1),
                    not_null: row.get(2),
                    default: row.get(3),
                    checks,
                },
            },
        );
    }

    Ok(types)
}

async fn inspect_extensions(
    client: &Client,
    schema: &str,
) -> Result<std::collections::BTreeSet<String>> {
    let rows = client
        .query(
            "SELECT e.extname
             FROM pg_extension e
             JOIN pg_namespace n ON n.oid = e.extnamespace
             WHERE n.nspname = $1
               AND e.extname != 'plpgsql'
             ORDER BY e.extname",
            &[&schema],
        )
        .await
        .map_err(|e| inspect_err(schema, "extensions", e))?;
    Ok(rows.iter().map(|r| r.get(0)).collect())
}

async fn inspect_default_privileges(
    client: &Client,
    schema: &str,
) -> Result<BTreeMap<String, DefaultPrivilege>> {
    let rows = client
        .query(
            "SELECT r.rolname,
                    d.defaclobjtype::text,
                    COALESCE(g.rolname, 'PUBLIC'),
                    acl.privilege_type
             FROM pg_default_acl d
             JOIN pg_namespace n ON n.oid = d.defaclnamespace
             JOIN pg_roles r ON r.oid = d.defaclrole
             CROSS JOIN LATERAL aclexplode(d.defaclacl) acl
             LEFT JOIN pg_roles g ON g.oid = acl.grantee
             WHERE n.nspname = $1
             ORDER BY r.rolname, d.defaclobjtype, g.rolname, acl.privilege_type",
            &[&schema],
        )
        .await
        .map_err(|e| inspect_err(schema, "default privileges", e))?;

    let mut privileges: BTreeMap<String, DefaultPrivilege> = BTreeMap::new();
    for row in &rows {
        let role: String = row.get(0);
        let objtype: String = row.get(1);
        let grantee: String = row.get(2);
        let privilege: String = row.get(3);
        let object_type = match objtype.as_str() {
            "r" => "TABLES",
            "S" => "SEQUENCES",
            "f" => "FUNCTIONS",
            other => {
                log::debug!("Skipping unsupported default-privilege object type {}", other);
                continue;
            }
        }
        .to_string();
        let entry = privileges
            .entry(format!("{}:{}:{}", role, object_type, grantee))
            .or_insert_with(|| DefaultPrivilege {
                role: role.clone(),
                object_type,
                grantee: grantee.clone(),
                privileges: Vec::new(),
            });
        if !entry.privileges.contains(&privilege) {
            entry.privileges.push(privilege);
        }
    }
    for privilege in privileges.values_mut() {
        privilege.privileges.sort();
    }
    Ok(privileges)
}
