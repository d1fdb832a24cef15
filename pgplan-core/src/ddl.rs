//! DDL rendering from IR objects.
//!
//! All statement text the diff engine emits is produced here, so dump output
//! and plan output share one canonical spelling. Identifiers are quoted only
//! when necessary; relations inside the target schema are spelled
//! unqualified, everything else schema-qualified.

use crate::model::{
    Aggregate, Column, Constraint, ConstraintKind, DefaultPrivilege, Identity, Index, Policy,
    Sequence, Table, Trigger, TypeDef, TypeKind, View,
};

/// Quote an identifier only when it needs quoting.
pub fn ident(name: &str) -> String {
    let simple = !name.is_empty()
        && name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if simple {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

/// Render a relation name: bare inside the target schema, qualified outside.
pub fn rel(schema: &str, name: &str, target_schema: &str) -> String {
    if schema == target_schema {
        ident(name)
    } else {
        format!("{}.{}", ident(schema), ident(name))
    }
}

fn literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Render one column definition fragment for CREATE TABLE / ADD COLUMN.
pub fn column_def(column: &Column) -> String {
    let mut out = format!("{} {}", ident(&column.name), column.type_name);
    if let Some(generated) = &column.generated {
        out.push_str(&format!(" GENERATED ALWAYS AS ({}) STORED", generated));
    }
    if !column.nullable {
        out.push_str(" NOT NULL");
    }
    if let Some(default) = &column.default {
        out.push_str(&format!(" DEFAULT {}", default));
    }
    match column.identity {
        Some(Identity::Always) => out.push_str(" GENERATED ALWAYS AS IDENTITY"),
        Some(Identity::ByDefault) => out.push_str(" GENERATED BY DEFAULT AS IDENTITY"),
        None => {}
    }
    out
}

/// Render the body of a constraint (everything after `CONSTRAINT <name>`).
pub fn constraint_body(constraint: &Constraint, target_schema: &str) -> String {
    let columns = constraint
        .columns
        .iter()
        .map(|c| ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let mut out = match &constraint.kind {
        ConstraintKind::PrimaryKey => format!("PRIMARY KEY ({})", columns),
        ConstraintKind::Unique => format!("UNIQUE ({})", columns),
        ConstraintKind::Check { expression } => format!("CHECK ({})", expression),
        ConstraintKind::Exclusion { definition } => definition.clone(),
        ConstraintKind::ForeignKey {
            ref_schema,
            ref_table,
            ref_columns,
            on_delete,
            on_update,
        } => {
            let ref_cols = ref_columns
                .iter()
                .map(|c| ident(c))
                .collect::<Vec<_>>()
                .join(", ");
            let mut fk = format!(
                "FOREIGN KEY ({}) REFERENCES {} ({})",
                columns,
                rel(ref_schema, ref_table, target_schema),
                ref_cols
            );
            if *on_delete != crate::model::ReferentialAction::NoAction {
                fk.push_str(&format!(" ON DELETE {}", on_delete.as_sql()));
            }
            if *on_update != crate::model::ReferentialAction::NoAction {
                fk.push_str(&format!(" ON UPDATE {}", on_update.as_sql()));
            }
            fk
        }
    };
    if constraint.deferrable {
        out.push_str(" DEFERRABLE");
        if constraint.initially_deferred {
            out.push_str(" INITIALLY DEFERRED");
        }
    }
    out
}

/// `ALTER TABLE … ADD CONSTRAINT` statement. When `not_valid` is set the
/// constraint is added without scanning existing rows (FK and CHECK only).
pub fn add_constraint(
    table: &Table,
    constraint: &Constraint,
    target_schema: &str,
    not_valid: bool,
) -> String {
    let mut out = format!(
        "ALTER TABLE {} ADD CONSTRAINT {} {}",
        rel(&table.schema, &table.name, target_schema),
        ident(&constraint.name),
        constraint_body(constraint, target_schema)
    );
    if not_valid {
        out.push_str(" NOT VALID");
    }
    out.push(';');
    out
}

pub fn validate_constraint(table: &Table, constraint_name: &str, target_schema: &str) -> String {
    format!(
        "ALTER TABLE {} VALIDATE CONSTRAINT {};",
        rel(&table.schema, &table.name, target_schema),
        ident(constraint_name)
    )
}

pub fn drop_constraint(table: &Table, constraint_name: &str, target_schema: &str) -> String {
    format!(
        "ALTER TABLE {} DROP CONSTRAINT {};",
        rel(&table.schema, &table.name, target_schema),
        ident(constraint_name)
    )
}

/// Render a CREATE TABLE statement. Constraint names listed in
/// `deferred_constraints` are left out (they are emitted later as separate
/// ALTER TABLE statements, e.g. to break FK cycles).
pub fn create_table(
    table: &Table,
    target_schema: &str,
    deferred_constraints: &std::collections::BTreeSet<String>,
) -> String {
    let mut lines: Vec<String> = table
        .columns
        .iter()
        .map(|c| format!("    {}", column_def(c)))
        .collect();
    for constraint in table.constraints.values() {
        if deferred_constraints.contains(&constraint.name) {
            continue;
        }
        lines.push(format!(
            "    CONSTRAINT {} {}",
            ident(&constraint.name),
            constraint_body(constraint, target_schema)
        ));
    }
    let mut out = format!(
        "CREATE TABLE {} (\n{}\n)",
        rel(&table.schema, &table.name, target_schema),
        lines.join(",\n")
    );
    if let Some(partition_by) = &table.partition_by {
        out.push_str(&format!(" PARTITION BY {}", partition_by));
    }
    out.push(';');
    out
}

pub fn drop_table(table: &Table, target_schema: &str) -> String {
    format!(
        "DROP TABLE {};",
        rel(&table.schema, &table.name, target_schema)
    )
}

/// Canonical `CREATE INDEX` text (no trailing semicolon). Stored on the IR
/// as the index's structural signature and reused verbatim by the emitter.
pub fn index_definition(index: &Index, target_schema: &str) -> String {
    let unique = if index.unique { "UNIQUE " } else { "" };
    let mut out = format!(
        "CREATE {}INDEX {} ON {}",
        unique,
        ident(&index.name),
        rel(&index.schema, &index.table, target_schema)
    );
    if index.method != "btree" {
        out.push_str(&format!(" USING {}", index.method));
    }
    let elements = index
        .elements
        .iter()
        .map(|e| {
            let mut el = e.expression.clone();
            if let Some(opclass) = &e.opclass {
                el.push_str(&format!(" {}", opclass));
            }
            if e.descending {
                el.push_str(" DESC");
            }
            el
        })
        .collect::<Vec<_>>()
        .join(", ");
    out.push_str(&format!(" ({})", elements));
    if !index.include.is_empty() {
        let include = index
            .include
            .iter()
            .map(|c| ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        out.push_str(&format!(" INCLUDE ({})", include));
    }
    if let Some(predicate) = &index.predicate {
        out.push_str(&format!(" WHERE {}", predicate));
    }
    out
}

/// `CREATE INDEX` statement, optionally CONCURRENTLY.
pub fn create_index(index: &Index, concurrently: bool) -> String {
    let definition = &index.definition;
    if concurrently {
        // Inject after the INDEX keyword of the canonical definition
        if let Some(pos) = definition.find("INDEX ") {
            let (head, tail) = definition.split_at(pos + "INDEX ".len());
            return format!("{}CONCURRENTLY {};", head, tail);
        }
    }
    format!("{};", definition)
}

pub fn drop_index(index: &Index, target_schema: &str) -> String {
    format!(
        "DROP INDEX {};",
        rel(&index.schema, &index.name, target_schema)
    )
}

pub fn create_view(view: &View, target_schema: &str, or_replace: bool) -> String {
    let keyword = match (view.materialized, or_replace) {
        (true, _) => "MATERIALIZED VIEW",
        (false, true) => "OR REPLACE VIEW",
        (false, false) => "VIEW",
    };
    format!(
        "CREATE {} {} AS\n{};",
        keyword,
        rel(&view.schema, &view.name, target_schema),
        view.query.trim_end_matches(';')
    )
}

pub fn drop_view(view: &View, target_schema: &str) -> String {
    let keyword = if view.materialized {
        "MATERIALIZED VIEW"
    } else {
        "VIEW"
    };
    format!(
        "DROP {} {} RESTRICT;",
        keyword,
        rel(&view.schema, &view.name, target_schema)
    )
}

pub fn create_sequence(sequence: &Sequence, target_schema: &str) -> String {
    let mut out = format!(
        "CREATE SEQUENCE {}",
        rel(&sequence.schema, &sequence.name, target_schema)
    );
    if sequence.data_type != "bigint" {
        out.push_str(&format!(" AS {}", sequence.data_type));
    }
    out.push_str(&format!(
        " START WITH {} INCREMENT BY {} MINVALUE {} MAXVALUE {}",
        sequence.start, sequence.increment, sequence.min_value, sequence.max_value
    ));
    if sequence.cycle {
        out.push_str(" CYCLE");
    }
    out.push(';');
    out
}

/// Minimal `ALTER SEQUENCE` covering the attributes that changed.
pub fn alter_sequence(old: &Sequence, new: &Sequence, target_schema: &str) -> String {
    let mut clauses = Vec::new();
    if old.data_type != new.data_type {
        clauses.push(format!("AS {}", new.data_type));
    }
    if old.increment != new.increment {
        clauses.push(format!("INCREMENT BY {}", new.increment));
    }
    if old.min_value != new.min_value {
        clauses.push(format!("MINVALUE {}", new.min_value));
    }
    if old.max_value != new.max_value {
        clauses.push(format!("MAXVALUE {}", new.max_value));
    }
    if old.start != new.start {
        clauses.push(format!("START WITH {}", new.start));
    }
    if old.cycle != new.cycle {
        clauses.push(if new.cycle { "CYCLE" } else { "NO CYCLE" }.to_string());
    }
    format!(
        "ALTER SEQUENCE {} {};",
        rel(&new.schema, &new.name, target_schema),
        clauses.join(" ")
    )
}

pub fn drop_sequence(sequence: &Sequence, target_schema: &str) -> String {
    format!(
        "DROP SEQUENCE {};",
        rel(&sequence.schema, &sequence.name, target_schema)
    )
}

pub fn create_type(type_def: &TypeDef, target_schema: &str) -> String {
    let name = rel(&type_def.schema, &type_def.name, target_schema);
    match &type_def.kind {
        TypeKind::Enum { labels } => {
            let labels = labels
                .iter()
                .map(|l| literal(l))
                .collect::<Vec<_>>()
                .join(", ");
            format!("CREATE TYPE {} AS ENUM ({});", name, labels)
        }
        TypeKind::Composite { fields } => {
            let fields = fields
                .iter()
                .map(|f| format!("{} {}", ident(&f.name), f.type_name))
                .collect::<Vec<_>>()
                .join(", ");
            format!("CREATE TYPE {} AS ({});", name, fields)
        }
        TypeKind::Domain {
            base_type,
            not_null,
            default,
            checks,
        } => {
            let mut out = format!("CREATE DOMAIN {} AS {}", name, base_type);
            if let Some(default) = default {
                out.push_str(&format!(" DEFAULT {}", default));
            }
            if *not_null {
                out.push_str(" NOT NULL");
            }
            for check in checks {
                out.push_str(&format!(
                    " CONSTRAINT {} CHECK ({})",
                    ident(&check.name),
                    check.expression
                ));
            }
            out.push(';');
            out
        }
    }
}

pub fn drop_type(type_def: &TypeDef, target_schema: &str) -> String {
    let keyword = match type_def.kind {
        TypeKind::Domain { .. } => "DOMAIN",
        _ => "TYPE",
    };
    format!(
        "DROP {} {};",
        keyword,
        rel(&type_def.schema, &type_def.name, target_schema)
    )
}

/// Append one enum label. Only used when the old label list is a prefix of
/// the new one; any other change is a drop + recreate.
pub fn add_enum_value(type_def: &TypeDef, label: &str, target_schema: &str) -> String {
    format!(
        "ALTER TYPE {} ADD VALUE {};",
        rel(&type_def.schema, &type_def.name, target_schema),
        literal(label)
    )
}

pub fn create_trigger(trigger: &Trigger) -> String {
    format!("{};", trigger.definition.trim_end_matches(';'))
}

pub fn drop_trigger(trigger: &Trigger, target_schema: &str) -> String {
    format!(
        "DROP TRIGGER {} ON {};",
        ident(&trigger.name),
        rel(&trigger.schema, &trigger.table, target_schema)
    )
}

pub fn create_policy(policy: &Policy, target_schema: &str) -> String {
    let mut out = format!(
        "CREATE POLICY {} ON {}",
        ident(&policy.name),
        rel(&policy.schema, &policy.table, target_schema)
    );
    if !policy.permissive {
        out.push_str(" AS RESTRICTIVE");
    }
    out.push_str(&format!(" FOR {}", policy.command.as_sql()));
    if !policy.roles.is_empty() {
        let roles = policy
            .roles
            .iter()
            .map(|r| ident(r))
            .collect::<Vec<_>>()
            .join(", ");
        out.push_str(&format!(" TO {}", roles));
    }
    if let Some(using) = &policy.using_expr {
        out.push_str(&format!(" USING ({})", using));
    }
    if let Some(check) = &policy.with_check_expr {
        out.push_str(&format!(" WITH CHECK ({})", check));
    }
    out.push(';');
    out
}

pub fn drop_policy(policy: &Policy, target_schema: &str) -> String {
    format!(
        "DROP POLICY {} ON {};",
        ident(&policy.name),
        rel(&policy.schema, &policy.table, target_schema)
    )
}

pub fn set_rls(table: &Table, target_schema: &str, enabled: bool) -> String {
    let verb = if enabled { "ENABLE" } else { "DISABLE" };
    format!(
        "ALTER TABLE {} {} ROW LEVEL SECURITY;",
        rel(&table.schema, &table.name, target_schema),
        verb
    )
}

pub fn create_aggregate(aggregate: &Aggregate, target_schema: &str) -> String {
    let mut clauses = vec![
        format!("SFUNC = {}", aggregate.state_func),
        format!("STYPE = {}", aggregate.state_type),
    ];
    if let Some(final_func) = &aggregate.final_func {
        clauses.push(format!("FINALFUNC = {}", final_func));
    }
    if let Some(init) = &aggregate.initial_condition {
        clauses.push(format!("INITCOND = {}", literal(init)));
    }
    format!(
        "CREATE AGGREGATE {}({}) ({});",
        rel(&aggregate.schema, &aggregate.name, target_schema),
        aggregate.signature,
        clauses.join(", ")
    )
}

pub fn drop_aggregate(aggregate: &Aggregate, target_schema: &str) -> String {
    format!(
        "DROP AGGREGATE {}({});",
        rel(&aggregate.schema, &aggregate.name, target_schema),
        aggregate.signature
    )
}

pub fn create_extension(name: &str) -> String {
    format!("CREATE EXTENSION IF NOT EXISTS {};", ident(name))
}

pub fn drop_extension(name: &str) -> String {
    format!("DROP EXTENSION {};", ident(name))
}

pub fn grant_default_privilege(privilege: &DefaultPrivilege, schema_name: &str) -> String {
    format!(
        "ALTER DEFAULT PRIVILEGES FOR ROLE {} IN SCHEMA {} GRANT {} ON {} TO {};",
        ident(&privilege.role),
        ident(schema_name),
        privilege.privileges.join(", "),
        privilege.object_type,
        ident(&privilege.grantee)
    )
}

pub fn revoke_default_privilege(privilege: &DefaultPrivilege, schema_name: &str) -> String {
    format!(
        "ALTER DEFAULT PRIVILEGES FOR ROLE {} IN SCHEMA {} REVOKE {} ON {} FROM {};",
        ident(&privilege.role),
        ident(schema_name),
        privilege.privileges.join(", "),
        privilege.object_type,
        ident(&privilege.grantee)
    )
}

/// `COMMENT ON <kind> <path> IS …` — `None` clears the comment.
pub fn comment_on(object_kind: &str, path: &str, comment: Option<&str>) -> String {
    match comment {
        Some(text) => format!("COMMENT ON {} {} IS {};", object_kind, path, literal(text)),
        None => format!("COMMENT ON {} {} IS NULL;", object_kind, path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{IndexElement, ReferentialAction};
    use std::collections::BTreeSet;

    fn col(name: &str, position: i32, type_name: &str, nullable: bool) -> Column {
        Column {
            name: name.to_string(),
            position,
            type_name: type_name.to_string(),
            nullable,
            default: None,
            generated: None,
            identity: None,
            comment: None,
        }
    }

    #[test]
    fn test_ident_bare_when_simple() {
        assert_eq!(ident("users"), "users");
        assert_eq!(ident("user_accounts2"), "user_accounts2");
    }

    #[test]
    fn test_ident_quoted_when_needed() {
        assert_eq!(ident("Users"), "\"Users\"");
        assert_eq!(ident("my table"), "\"my table\"");
        assert_eq!(ident("1abc"), "\"1abc\"");
    }

    #[test]
    fn test_rel_unqualified_inside_target() {
        assert_eq!(rel("public", "users", "public"), "users");
        assert_eq!(rel("billing", "accounts", "public"), "billing.accounts");
    }

    #[test]
    fn test_column_def_variants() {
        assert_eq!(column_def(&col("age", 1, "integer", false)), "age integer NOT NULL");

        let mut with_default = col("status", 1, "text", true);
        with_default.default = Some("'open'".to_string());
        assert_eq!(column_def(&with_default), "status text DEFAULT 'open'");

        let mut identity = col("id", 1, "bigint", false);
        identity.identity = Some(Identity::Always);
        assert_eq!(
            column_def(&identity),
            "id bigint NOT NULL GENERATED ALWAYS AS IDENTITY"
        );

        let mut generated = col("area", 1, "numeric", true);
        generated.generated = Some("width * height".to_string());
        assert_eq!(
            column_def(&generated),
            "area numeric GENERATED ALWAYS AS (width * height) STORED"
        );
    }

    #[test]
    fn test_create_table_with_inline_pk() {
        let mut table = Table::new("public", "users");
        table.columns.push(col("id", 1, "integer", false));
        table.constraints.insert(
            "users_pkey".to_string(),
            Constraint {
                name: "users_pkey".to_string(),
                kind: ConstraintKind::PrimaryKey,
                columns: vec!["id".to_string()],
                not_valid: false,
                deferrable: false,
                initially_deferred: false,
            },
        );
        let sql = create_table(&table, "public", &BTreeSet::new());
        assert_eq!(
            sql,
            "CREATE TABLE users (\n    id integer NOT NULL,\n    CONSTRAINT users_pkey PRIMARY KEY (id)\n);"
        );
    }

    #[test]
    fn test_create_table_skips_deferred_constraints() {
        let mut table = Table::new("public", "dept");
        table.columns.push(col("id", 1, "integer", false));
        table.constraints.insert(
            "dept_mgr_fk".to_string(),
            Constraint {
                name: "dept_mgr_fk".to_string(),
                kind: ConstraintKind::ForeignKey {
                    ref_schema: "public".to_string(),
                    ref_table: "emp".to_string(),
                    ref_columns: vec!["id".to_string()],
                    on_delete: ReferentialAction::NoAction,
                    on_update: ReferentialAction::NoAction,
                },
                columns: vec!["id".to_string()],
                not_valid: false,
                deferrable: false,
                initially_deferred: false,
            },
        );
        let deferred: BTreeSet<String> = ["dept_mgr_fk".to_string()].into_iter().collect();
        let sql = create_table(&table, "public", &deferred);
        assert!(!sql.contains("FOREIGN KEY"));
    }

    #[test]
    fn test_fk_constraint_body_with_actions() {
        let constraint = Constraint {
            name: "orders_user_fk".to_string(),
            kind: ConstraintKind::ForeignKey {
                ref_schema: "public".to_string(),
                ref_table: "users".to_string(),
                ref_columns: vec!["id".to_string()],
                on_delete: ReferentialAction::Cascade,
                on_update: ReferentialAction::NoAction,
            },
            columns: vec!["user_id".to_string()],
            not_valid: false,
            deferrable: false,
            initially_deferred: false,
        };
        assert_eq!(
            constraint_body(&constraint, "public"),
            "FOREIGN KEY (user_id) REFERENCES users (id) ON DELETE CASCADE"
        );
    }

    #[test]
    fn test_add_constraint_not_valid() {
        let table = Table::new("public", "users");
        let constraint = Constraint {
            name: "users_age_check".to_string(),
            kind: ConstraintKind::Check {
                expression: "age >= 0".to_string(),
            },
            columns: vec![],
            not_valid: false,
            deferrable: false,
            initially_deferred: false,
        };
        assert_eq!(
            add_constraint(&table, &constraint, "public", true),
            "ALTER TABLE users ADD CONSTRAINT users_age_check CHECK (age >= 0) NOT VALID;"
        );
        assert_eq!(
            validate_constraint(&table, "users_age_check", "public"),
            "ALTER TABLE users VALIDATE CONSTRAINT users_age_check;"
        );
    }

    fn sample_index() -> Index {
        Index {
            schema: "public".to_string(),
            table: "users".to_string(),
            name: "idx_users_age".to_string(),
            method: "btree".to_string(),
            elements: vec![IndexElement {
                expression: "age".to_string(),
                descending: false,
                opclass: None,
            }],
            unique: false,
            predicate: None,
            include: vec![],
            definition: String::new(),
        }
    }

    #[test]
    fn test_index_definition_btree_omits_using() {
        let mut index = sample_index();
        index.definition = index_definition(&index, "public");
        assert_eq!(index.definition, "CREATE INDEX idx_users_age ON users (age)");
    }

    #[test]
    fn test_index_definition_gin_and_predicate() {
        let mut index = sample_index();
        index.method = "gin".to_string();
        index.predicate = Some("age > 0".to_string());
        let definition = index_definition(&index, "public");
        assert_eq!(
            definition,
            "CREATE INDEX idx_users_age ON users USING gin (age) WHERE age > 0"
        );
    }

    #[test]
    fn test_create_index_concurrently_injection() {
        let mut index = sample_index();
        index.definition = index_definition(&index, "public");
        assert_eq!(
            create_index(&index, true),
            "CREATE INDEX CONCURRENTLY idx_users_age ON users (age);"
        );
        assert_eq!(
            create_index(&index, false),
            "CREATE INDEX idx_users_age ON users (age);"
        );
    }

    #[test]
    fn test_create_index_concurrently_unique() {
        let mut index = sample_index();
        index.unique = true;
        index.definition = index_definition(&index, "public");
        assert_eq!(
            create_index(&index, true),
            "CREATE UNIQUE INDEX CONCURRENTLY idx_users_age ON users (age);"
        );
    }

    #[test]
    fn test_view_statements() {
        let view = View {
            schema: "public".to_string(),
            name: "active_users".to_string(),
            materialized: false,
            query: "SELECT id FROM users WHERE active".to_string(),
            comment: None,
            indexes: Default::default(),
        };
        assert_eq!(
            create_view(&view, "public", false),
            "CREATE VIEW active_users AS\nSELECT id FROM users WHERE active;"
        );
        assert_eq!(
            create_view(&view, "public", true),
            "CREATE OR REPLACE VIEW active_users AS\nSELECT id FROM users WHERE active;"
        );
        assert_eq!(drop_view(&view, "public"), "DROP VIEW active_users RESTRICT;");
    }

    #[test]
    fn test_materialized_view_drop_restrict() {
        let view = View {
            schema: "public".to_string(),
            name: "mv".to_string(),
            materialized: true,
            query: "SELECT 1".to_string(),
            comment: None,
            indexes: Default::default(),
        };
        assert_eq!(
            drop_view(&view, "public"),
            "DROP MATERIALIZED VIEW mv RESTRICT;"
        );
    }

    #[test]
    fn test_create_enum_type() {
        let type_def = TypeDef {
            schema: "public".to_string(),
            name: "status".to_string(),
            kind: TypeKind::Enum {
                labels: vec!["open".to_string(), "closed".to_string()],
            },
        };
        assert_eq!(
            create_type(&type_def, "public"),
            "CREATE TYPE status AS ENUM ('open', 'closed');"
        );
    }

    #[test]
    fn test_create_domain_with_check() {
        let type_def = TypeDef {
            schema: "public".to_string(),
            name: "positive_int".to_string(),
            kind: TypeKind::Domain {
                base_type: "integer".to_string(),
                not_null: true,
                default: None,
                checks: vec![crate::model::DomainCheck {
                    name: "positive_int_check".to_string(),
                    expression: "VALUE > 0".to_string(),
                }],
            },
        };
        assert_eq!(
            create_type(&type_def, "public"),
            "CREATE DOMAIN positive_int AS integer NOT NULL CONSTRAINT positive_int_check CHECK (VALUE > 0);"
        );
        assert_eq!(drop_type(&type_def, "public"), "DROP DOMAIN positive_int;");
    }

    #[test]
    fn test_create_policy_full() {
        let policy = Policy {
            schema: "public".to_string(),
            table: "docs".to_string(),
            name: "docs_owner".to_string(),
            command: crate::model::PolicyCommand::Select,
            permissive: false,
            roles: vec!["app_user".to_string()],
            using_expr: Some("owner = current_user".to_string()),
            with_check_expr: None,
        };
        assert_eq!(
            create_policy(&policy, "public"),
            "CREATE POLICY docs_owner ON docs AS RESTRICTIVE FOR SELECT TO app_user USING (owner = current_user);"
        );
    }

    #[test]
    fn test_sequence_statements() {
        let sequence = Sequence {
            schema: "public".to_string(),
            name: "order_seq".to_string(),
            data_type: "bigint".to_string(),
            start: 1,
            increment: 1,
            min_value: 1,
            max_value: i64::MAX,
            cycle: false,
            owned_by: None,
        };
        assert_eq!(
            create_sequence(&sequence, "public"),
            format!(
                "CREATE SEQUENCE order_seq START WITH 1 INCREMENT BY 1 MINVALUE 1 MAXVALUE {};",
                i64::MAX
            )
        );

        let mut changed = sequence.clone();
        changed.increment = 10;
        assert_eq!(
            alter_sequence(&sequence, &changed, "public"),
            "ALTER SEQUENCE order_seq INCREMENT BY 10;"
        );
    }

    #[test]
    fn test_comment_on() {
        assert_eq!(
            comment_on("TABLE", "users", Some("Registered users")),
            "COMMENT ON TABLE users IS 'Registered users';"
        );
        assert_eq!(
            comment_on("COLUMN", "users.age", None),
            "COMMENT ON COLUMN users.age IS NULL;"
        );
    }

    #[test]
    fn test_default_privilege_statements() {
        let privilege = DefaultPrivilege {
            role: "owner".to_string(),
            object_type: "TABLES".to_string(),
            grantee: "readers".to_string(),
            privileges: vec!["SELECT".to_string()],
        };
        assert_eq!(
            grant_default_privilege(&privilege, "public"),
            "ALTER DEFAULT PRIVILEGES FOR ROLE owner IN SCHEMA public GRANT SELECT ON TABLES TO readers;"
        );
        assert_eq!(
            revoke_default_privilege(&privilege, "public"),
            "ALTER DEFAULT PRIVILEGES FOR ROLE owner IN SCHEMA public REVOKE SELECT ON TABLES FROM readers;"
        );
    }
}
