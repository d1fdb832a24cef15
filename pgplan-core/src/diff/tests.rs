use std::collections::BTreeMap;

use super::*;
use crate::model::{
    Column, Constraint, Index, IndexElement, Policy, PolicyCommand, ReferentialAction, Routine,
    RoutineKind, Volatility,
};
use crate::parse::StatementDirectives;

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

fn pk(name: &str, columns: &[&str]) -> Constraint {
    Constraint {
        name: name.to_string(),
        kind: ConstraintKind::PrimaryKey,
        columns: columns.iter().map(|c| c.to_string()).collect(),
        not_valid: false,
        deferrable: false,
        initially_deferred: false,
    }
}

fn fk(name: &str, columns: &[&str], ref_table: &str, ref_columns: &[&str]) -> Constraint {
    Constraint {
        name: name.to_string(),
        kind: ConstraintKind::ForeignKey {
            ref_schema: "public".to_string(),
            ref_table: ref_table.to_string(),
            ref_columns: ref_columns.iter().map(|c| c.to_string()).collect(),
            on_delete: ReferentialAction::NoAction,
            on_update: ReferentialAction::NoAction,
        },
        columns: columns.iter().map(|c| c.to_string()).collect(),
        not_valid: false,
        deferrable: false,
        initially_deferred: false,
    }
}

fn index(table: &str, name: &str, column: &str) -> Index {
    let mut idx = Index {
        schema: "public".to_string(),
        table: table.to_string(),
        name: name.to_string(),
        method: "btree".to_string(),
        elements: vec![IndexElement {
            expression: column.to_string(),
            descending: false,
            opclass: None,
        }],
        unique: false,
        predicate: None,
        include: vec![],
        definition: String::new(),
    };
    idx.definition = ddl::index_definition(&idx, "public");
    idx
}

fn function(name: &str) -> Routine {
    Routine {
        schema: "public".to_string(),
        name: name.to_string(),
        kind: RoutineKind::Function,
        signature: String::new(),
        returns: Some("boolean".to_string()),
        language: "sql".to_string(),
        volatility: Volatility::Stable,
        strict: false,
        security_definer: false,
        definition: format!(
            "CREATE OR REPLACE FUNCTION {}() RETURNS boolean LANGUAGE sql AS $$ SELECT true $$",
            name
        ),
        comment: None,
    }
}

fn users_table() -> Table {
    let mut table = Table::new("public", "users");
    table.columns.push(col("id", 1, "integer", false));
    table
        .constraints
        .insert("users_pkey".to_string(), pk("users_pkey", &["id"]));
    table
}

fn catalog_with_tables(tables: Vec<Table>) -> Catalog {
    let mut catalog = Catalog::empty("public");
    let schema = catalog.schemas.get_mut("public").unwrap();
    for table in tables {
        schema.tables.insert(table.name.clone(), table);
    }
    catalog
}

fn no_directives() -> DirectiveMap {
    DirectiveMap::new()
}

fn run_diff(old: &Catalog, new: &Catalog) -> Vec<Step> {
    diff(old, new, "public", &no_directives()).unwrap()
}

// ── Scenario S1: add column ──

#[test]
fn test_add_column_emits_single_alter() {
    let old = catalog_with_tables(vec![users_table()]);
    let mut updated = users_table();
    updated.columns.push(col("age", 2, "integer", false));
    let new = catalog_with_tables(vec![updated]);

    let steps = run_diff(&old, &new);
    assert_eq!(steps.len(), 1);
    assert_eq!(
        steps[0].sql,
        "ALTER TABLE users ADD COLUMN age integer NOT NULL;"
    );
    assert_eq!(steps[0].kind, StepKind::TableColumn);
    assert_eq!(steps[0].op, StepOp::Create);
    assert_eq!(steps[0].path, "public.users.age");
    assert!(steps[0].can_run_in_transaction);
}

// ── Scenario S2: add index concurrently on an existing table ──

#[test]
fn test_add_index_on_existing_table_is_concurrent() {
    let old = catalog_with_tables(vec![{
        let mut t = users_table();
        t.columns.push(col("age", 2, "integer", true));
        t
    }]);
    let new = catalog_with_tables(vec![{
        let mut t = users_table();
        t.columns.push(col("age", 2, "integer", true));
        t.indexes
            .insert("idx_users_age".to_string(), index("users", "idx_users_age", "age"));
        t
    }]);

    let steps = run_diff(&old, &new);
    assert_eq!(steps.len(), 1);
    assert_eq!(
        steps[0].sql,
        "CREATE INDEX CONCURRENTLY idx_users_age ON users (age);"
    );
    assert!(!steps[0].can_run_in_transaction);
    assert_eq!(steps[0].kind, StepKind::TableIndex);
}

// ── Scenario S3: circular foreign keys ──

#[test]
fn test_circular_fk_defers_both_constraints() {
    let mut dept = Table::new("public", "dept");
    dept.columns.push(col("id", 1, "integer", false));
    dept.columns.push(col("mgr_emp_no", 2, "integer", true));
    dept.constraints
        .insert("dept_pkey".to_string(), pk("dept_pkey", &["id"]));
    dept.constraints.insert(
        "dept_mgr_fk".to_string(),
        fk("dept_mgr_fk", &["mgr_emp_no"], "emp", &["id"]),
    );

    let mut emp = Table::new("public", "emp");
    emp.columns.push(col("id", 1, "integer", false));
    emp.columns.push(col("dept_no", 2, "integer", true));
    emp.constraints
        .insert("emp_pkey".to_string(), pk("emp_pkey", &["id"]));
    emp.constraints.insert(
        "emp_dept_fk".to_string(),
        fk("emp_dept_fk", &["dept_no"], "dept", &["id"]),
    );

    let old = Catalog::empty("public");
    let new = catalog_with_tables(vec![dept, emp]);
    let steps = run_diff(&old, &new);

    let creates: Vec<&Step> = steps.iter().filter(|s| s.kind == StepKind::Table).collect();
    assert_eq!(creates.len(), 2);
    for create in &creates {
        assert!(
            !create.sql.contains("FOREIGN KEY"),
            "cross-FK must not be inline: {}",
            create.sql
        );
    }

    let alters: Vec<&Step> = steps
        .iter()
        .filter(|s| s.kind == StepKind::TableConstraint)
        .collect();
    assert_eq!(alters.len(), 2);
    for alter in &alters {
        assert!(alter.sql.starts_with("ALTER TABLE"));
        assert!(alter.sql.contains("FOREIGN KEY"));
    }

    // All table creates precede all deferred constraints
    let last_create = steps
        .iter()
        .rposition(|s| s.kind == StepKind::Table)
        .unwrap();
    let first_alter = steps
        .iter()
        .position(|s| s.kind == StepKind::TableConstraint)
        .unwrap();
    assert!(last_create < first_alter);
}

#[test]
fn test_fk_to_existing_table_stays_inline() {
    let old = catalog_with_tables(vec![users_table()]);
    let mut orders = Table::new("public", "orders");
    orders.columns.push(col("id", 1, "integer", false));
    orders.columns.push(col("user_id", 2, "integer", false));
    orders.constraints.insert(
        "orders_user_fk".to_string(),
        fk("orders_user_fk", &["user_id"], "users", &["id"]),
    );
    let new = catalog_with_tables(vec![users_table(), orders]);

    let steps = run_diff(&old, &new);
    let create = steps
        .iter()
        .find(|s| s.kind == StepKind::Table)
        .expect("table create step");
    assert!(create.sql.contains("FOREIGN KEY (user_id) REFERENCES users (id)"));
    assert!(!steps.iter().any(|s| s.kind == StepKind::TableConstraint));
}

// ── Scenario S4: policy references a newly added function ──

#[test]
fn test_policy_on_new_table_waits_for_function() {
    let mut docs = Table::new("public", "docs");
    docs.columns.push(col("id", 1, "integer", false));
    docs.rls_enabled = true;
    docs.policies.insert(
        "p".to_string(),
        Policy {
            schema: "public".to_string(),
            table: "docs".to_string(),
            name: "p".to_string(),
            command: PolicyCommand::All,
            permissive: true,
            roles: vec![],
            using_expr: Some("is_admin()".to_string()),
            with_check_expr: None,
        },
    );

    let old = Catalog::empty("public");
    let mut new = catalog_with_tables(vec![docs]);
    let f = function("is_admin");
    new.schemas
        .get_mut("public")
        .unwrap()
        .functions
        .insert(f.key(), f);

    let steps = run_diff(&old, &new);
    let function_pos = steps
        .iter()
        .position(|s| s.kind == StepKind::Function)
        .expect("function create step");
    let policy_pos = steps
        .iter()
        .position(|s| s.kind == StepKind::TablePolicy)
        .expect("policy create step");
    assert!(
        function_pos < policy_pos,
        "CREATE FUNCTION must precede CREATE POLICY"
    );
}

#[test]
fn test_policy_added_to_existing_table_still_follows_function() {
    let old = catalog_with_tables(vec![users_table()]);
    let mut new = catalog_with_tables(vec![{
        let mut t = users_table();
        t.policies.insert(
            "admin_only".to_string(),
            Policy {
                schema: "public".to_string(),
                table: "users".to_string(),
                name: "admin_only".to_string(),
                command: PolicyCommand::Select,
                permissive: true,
                roles: vec![],
                using_expr: Some("is_admin()".to_string()),
                with_check_expr: None,
            },
        );
        t
    }]);
    let f = function("is_admin");
    new.schemas
        .get_mut("public")
        .unwrap()
        .functions
        .insert(f.key(), f);

    let steps = run_diff(&old, &new);
    let function_pos = steps.iter().position(|s| s.kind == StepKind::Function).unwrap();
    let policy_pos = steps.iter().position(|s| s.kind == StepKind::TablePolicy).unwrap();
    assert!(function_pos < policy_pos);
}

// ── Scenario S5: drop table with dependent materialized view ──

#[test]
fn test_matview_predropped_before_table() {
    let mut old = catalog_with_tables(vec![users_table()]);
    old.schemas.get_mut("public").unwrap().views.insert(
        "mv".to_string(),
        View {
            schema: "public".to_string(),
            name: "mv".to_string(),
            materialized: true,
            query: "SELECT id FROM users".to_string(),
            comment: None,
            indexes: BTreeMap::new(),
        },
    );
    let new = Catalog::empty("public");

    let steps = run_diff(&old, &new);
    assert_eq!(steps[0].sql, "DROP MATERIALIZED VIEW mv RESTRICT;");
    assert_eq!(steps[0].op, StepOp::Drop);
    let table_drop = steps.iter().position(|s| s.sql == "DROP TABLE users;").unwrap();
    assert!(table_drop > 0);
}

#[test]
fn test_matview_recreated_around_structural_table_change() {
    let mut old = catalog_with_tables(vec![users_table()]);
    old.schemas.get_mut("public").unwrap().views.insert(
        "mv".to_string(),
        View {
            schema: "public".to_string(),
            name: "mv".to_string(),
            materialized: true,
            query: "SELECT id FROM users".to_string(),
            comment: None,
            indexes: BTreeMap::new(),
        },
    );
    let mut new = catalog_with_tables(vec![{
        let mut t = users_table();
        t.columns.push(col("age", 2, "integer", true));
        t
    }]);
    new.schemas.get_mut("public").unwrap().views.insert(
        "mv".to_string(),
        View {
            schema: "public".to_string(),
            name: "mv".to_string(),
            materialized: true,
            query: "SELECT id FROM users".to_string(),
            comment: None,
            indexes: BTreeMap::new(),
        },
    );

    let steps = run_diff(&old, &new);
    assert_eq!(steps[0].sql, "DROP MATERIALIZED VIEW mv RESTRICT;");
    assert_eq!(steps[0].op, StepOp::Recreate);
    let add_column = steps
        .iter()
        .position(|s| s.sql.contains("ADD COLUMN age"))
        .unwrap();
    let recreate = steps
        .iter()
        .position(|s| s.sql.starts_with("CREATE MATERIALIZED VIEW mv"))
        .unwrap();
    assert!(add_column < recreate, "view recreation follows the ALTER");
    assert!(steps[recreate].op == StepOp::Recreate);
}

// ── Properties ──

#[test]
fn test_identical_catalogs_diff_empty() {
    let catalog = catalog_with_tables(vec![users_table()]);
    assert!(run_diff(&catalog, &catalog).is_empty());
}

#[test]
fn test_composition_add_then_remove_column_reverses() {
    let a = catalog_with_tables(vec![users_table()]);
    let mut with_age = users_table();
    with_age.columns.push(col("age", 2, "integer", true));
    let b = catalog_with_tables(vec![with_age]);

    let forward = run_diff(&a, &b);
    assert_eq!(forward.len(), 1);
    assert!(forward[0].sql.contains("ADD COLUMN age"));

    // The reverse diff undoes the change, flagged as irreversible
    let backward = run_diff(&b, &a);
    assert_eq!(backward.len(), 1);
    assert_eq!(backward[0].sql, "ALTER TABLE users DROP COLUMN age;");
    assert!(backward[0].is_destructive());
}

#[test]
fn test_column_type_change_uses_using_clause() {
    let old = catalog_with_tables(vec![{
        let mut t = users_table();
        t.columns.push(col("age", 2, "text", true));
        t
    }]);
    let new = catalog_with_tables(vec![{
        let mut t = users_table();
        t.columns.push(col("age", 2, "integer", true));
        t
    }]);

    let steps = run_diff(&old, &new);
    assert_eq!(steps.len(), 1);
    assert_eq!(
        steps[0].sql,
        "ALTER TABLE users ALTER COLUMN age TYPE integer USING age::integer;"
    );
    assert_eq!(steps[0].op, StepOp::Alter);
}

#[test]
fn test_nullability_and_default_changes_are_minimal_alters() {
    let old = catalog_with_tables(vec![{
        let mut t = users_table();
        t.columns.push(col("age", 2, "integer", true));
        t
    }]);
    let new = catalog_with_tables(vec![{
        let mut t = users_table();
        let mut age = col("age", 2, "integer", false);
        age.default = Some("0".to_string());
        t.columns.push(age);
        t
    }]);

    let steps = run_diff(&old, &new);
    assert_eq!(steps.len(), 2);
    assert_eq!(
        steps[0].sql,
        "ALTER TABLE users ALTER COLUMN age SET NOT NULL;"
    );
    assert_eq!(
        steps[1].sql,
        "ALTER TABLE users ALTER COLUMN age SET DEFAULT 0;"
    );
}

#[test]
fn test_structural_index_change_is_drop_then_concurrent_create() {
    let old = catalog_with_tables(vec![{
        let mut t = users_table();
        t.columns.push(col("age", 2, "integer", true));
        t.indexes
            .insert("idx_users_age".to_string(), index("users", "idx_users_age", "age"));
        t
    }]);
    let new = catalog_with_tables(vec![{
        let mut t = users_table();
        t.columns.push(col("age", 2, "integer", true));
        let mut idx = index("users", "idx_users_age", "age");
        idx.unique = true;
        idx.definition = ddl::index_definition(&idx, "public");
        t.indexes.insert("idx_users_age".to_string(), idx);
        t
    }]);

    let steps = run_diff(&old, &new);
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0].sql, "DROP INDEX idx_users_age;");
    assert_eq!(steps[0].op, StepOp::Recreate);
    assert_eq!(
        steps[1].sql,
        "CREATE UNIQUE INDEX CONCURRENTLY idx_users_age ON users (age);"
    );
    assert!(!steps[1].can_run_in_transaction);
}

#[test]
fn test_rls_toggle_emitted() {
    let old = catalog_with_tables(vec![users_table()]);
    let new = catalog_with_tables(vec![{
        let mut t = users_table();
        t.rls_enabled = true;
        t
    }]);

    let steps = run_diff(&old, &new);
    assert_eq!(steps.len(), 1);
    assert_eq!(
        steps[0].sql,
        "ALTER TABLE users ENABLE ROW LEVEL SECURITY;"
    );
}

#[test]
fn test_diff_is_deterministic() {
    let old = Catalog::empty("public");
    let mut tables = Vec::new();
    for name in ["alpha", "beta", "gamma"] {
        let mut t = Table::new("public", name);
        t.columns.push(col("id", 1, "integer", false));
        tables.push(t);
    }
    let new = catalog_with_tables(tables);
    let first = run_diff(&old, &new);
    for _ in 0..5 {
        assert_eq!(first, run_diff(&old, &new));
    }
}

#[test]
fn test_added_tables_ordered_referenced_first() {
    let mut parent = Table::new("public", "zparent");
    parent.columns.push(col("id", 1, "integer", false));
    parent
        .constraints
        .insert("zparent_pkey".to_string(), pk("zparent_pkey", &["id"]));
    let mut child = Table::new("public", "achild");
    child.columns.push(col("id", 1, "integer", false));
    child.columns.push(col("parent_id", 2, "integer", true));
    child.constraints.insert(
        "achild_parent_fk".to_string(),
        fk("achild_parent_fk", &["parent_id"], "zparent", &["id"]),
    );

    let steps = run_diff(&Catalog::empty("public"), &catalog_with_tables(vec![parent, child]));
    let creates: Vec<&str> = steps
        .iter()
        .filter(|s| s.kind == StepKind::Table)
        .map(|s| s.path.as_str())
        .collect();
    assert_eq!(creates, vec!["public.zparent", "public.achild"]);
}

#[test]
fn test_external_tables_never_touched() {
    let mut old = catalog_with_tables(vec![users_table()]);
    let mut billing = Schema::new("billing");
    billing.tables.insert(
        "accounts".to_string(),
        Table::external("billing", "accounts"),
    );
    old.schemas.insert("billing".to_string(), billing);

    let new = catalog_with_tables(vec![users_table()]);
    let steps = run_diff(&old, &new);
    assert!(steps.is_empty());
}

#[test]
fn test_owned_sequences_skipped() {
    let mut old = catalog_with_tables(vec![users_table()]);
    old.schemas.get_mut("public").unwrap().sequences.insert(
        "users_id_seq".to_string(),
        crate::model::Sequence {
            schema: "public".to_string(),
            name: "users_id_seq".to_string(),
            data_type: "bigint".to_string(),
            start: 1,
            increment: 1,
            min_value: 1,
            max_value: i64::MAX,
            cycle: false,
            owned_by: Some(crate::model::SequenceOwner {
                table: "users".to_string(),
                column: "id".to_string(),
            }),
        },
    );
    let new = catalog_with_tables(vec![users_table()]);
    assert!(run_diff(&old, &new).is_empty());
}

#[test]
fn test_dropped_function_dropped_before_dropped_table() {
    // Function drops precede table drops in phase 2
    let mut old = catalog_with_tables(vec![users_table()]);
    let f = function("is_admin");
    old.schemas
        .get_mut("public")
        .unwrap()
        .functions
        .insert(f.key(), f);
    let new = Catalog::empty("public");

    let steps = run_diff(&old, &new);
    let function_pos = steps.iter().position(|s| s.kind == StepKind::Function).unwrap();
    let table_pos = steps.iter().position(|s| s.kind == StepKind::Table).unwrap();
    assert!(function_pos < table_pos);
}

#[test]
fn test_fk_on_surviving_table_dropped_before_referenced_table() {
    let mut users = users_table();
    users.columns.push(col("team_id", 2, "integer", true));
    users.constraints.insert(
        "users_team_fk".to_string(),
        fk("users_team_fk", &["team_id"], "teams", &["id"]),
    );
    let mut teams = Table::new("public", "teams");
    teams.columns.push(col("id", 1, "integer", false));
    teams
        .constraints
        .insert("teams_pkey".to_string(), pk("teams_pkey", &["id"]));

    let old = catalog_with_tables(vec![users.clone(), teams]);
    // Desired: drop teams, keep users without the FK
    let mut users_after = users_table();
    users_after.columns.push(col("team_id", 2, "integer", true));
    let new = catalog_with_tables(vec![users_after]);

    let steps = run_diff(&old, &new);
    let constraint_drop = steps
        .iter()
        .position(|s| s.sql.contains("DROP CONSTRAINT users_team_fk"))
        .expect("constraint dropped");
    let table_drop = steps
        .iter()
        .position(|s| s.sql == "DROP TABLE teams;")
        .expect("table dropped");
    assert!(constraint_drop < table_drop);
    // The modification phase must not drop the constraint again
    let drops: Vec<&Step> = steps
        .iter()
        .filter(|s| s.sql.contains("DROP CONSTRAINT users_team_fk"))
        .collect();
    assert_eq!(drops.len(), 1);
}

#[test]
fn test_modified_table_fk_added_not_valid_then_validated() {
    let old = catalog_with_tables(vec![users_table(), {
        let mut t = Table::new("public", "teams");
        t.columns.push(col("id", 1, "integer", false));
        t.constraints
            .insert("teams_pkey".to_string(), pk("teams_pkey", &["id"]));
        t
    }]);
    let new = catalog_with_tables(vec![
        {
            let mut t = users_table();
            t.columns.push(col("team_id", 2, "integer", true));
            t.constraints.insert(
                "users_team_fk".to_string(),
                fk("users_team_fk", &["team_id"], "teams", &["id"]),
            );
            t
        },
        {
            let mut t = Table::new("public", "teams");
            t.columns.push(col("id", 1, "integer", false));
            t.constraints
                .insert("teams_pkey".to_string(), pk("teams_pkey", &["id"]));
            t
        },
    ]);

    let steps = run_diff(&old, &new);
    let not_valid = steps
        .iter()
        .position(|s| s.sql.contains("ADD CONSTRAINT users_team_fk") && s.sql.ends_with("NOT VALID;"))
        .expect("NOT VALID add");
    let validate = steps
        .iter()
        .position(|s| s.sql == "ALTER TABLE users VALIDATE CONSTRAINT users_team_fk;")
        .expect("VALIDATE step");
    assert!(not_valid < validate);
    assert!(steps[not_valid].can_run_in_transaction);
    assert!(steps[validate].can_run_in_transaction);
}

#[test]
fn test_view_create_ordered_after_referenced_view() {
    let mut new = catalog_with_tables(vec![users_table()]);
    let schema = new.schemas.get_mut("public").unwrap();
    schema.views.insert(
        "a_outer".to_string(),
        View {
            schema: "public".to_string(),
            name: "a_outer".to_string(),
            materialized: false,
            query: "SELECT id FROM z_inner".to_string(),
            comment: None,
            indexes: BTreeMap::new(),
        },
    );
    schema.views.insert(
        "z_inner".to_string(),
        View {
            schema: "public".to_string(),
            name: "z_inner".to_string(),
            materialized: false,
            query: "SELECT id FROM users".to_string(),
            comment: None,
            indexes: BTreeMap::new(),
        },
    );

    let steps = run_diff(&catalog_with_tables(vec![users_table()]), &new);
    let views: Vec<&str> = steps
        .iter()
        .filter(|s| s.kind == StepKind::View)
        .map(|s| s.path.as_str())
        .collect();
    assert_eq!(views, vec!["public.z_inner", "public.a_outer"]);
}

#[test]
fn test_enum_label_append_is_alter() {
    let mut old = catalog_with_tables(vec![]);
    old.schemas.get_mut("public").unwrap().types.insert(
        "status".to_string(),
        TypeDef {
            schema: "public".to_string(),
            name: "status".to_string(),
            kind: TypeKind::Enum {
                labels: vec!["open".to_string()],
            },
        },
    );
    let mut new = catalog_with_tables(vec![]);
    new.schemas.get_mut("public").unwrap().types.insert(
        "status".to_string(),
        TypeDef {
            schema: "public".to_string(),
            name: "status".to_string(),
            kind: TypeKind::Enum {
                labels: vec!["open".to_string(), "closed".to_string()],
            },
        },
    );

    let steps = run_diff(&old, &new);
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].sql, "ALTER TYPE status ADD VALUE 'closed';");
    assert!(!steps[0].can_run_in_transaction);
}

#[test]
fn test_enum_label_reorder_is_recreate() {
    let mut old = catalog_with_tables(vec![]);
    old.schemas.get_mut("public").unwrap().types.insert(
        "status".to_string(),
        TypeDef {
            schema: "public".to_string(),
            name: "status".to_string(),
            kind: TypeKind::Enum {
                labels: vec!["open".to_string(), "closed".to_string()],
            },
        },
    );
    let mut new = catalog_with_tables(vec![]);
    new.schemas.get_mut("public").unwrap().types.insert(
        "status".to_string(),
        TypeDef {
            schema: "public".to_string(),
            name: "status".to_string(),
            kind: TypeKind::Enum {
                labels: vec!["closed".to_string(), "open".to_string()],
            },
        },
    );

    let steps = run_diff(&old, &new);
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0].op, StepOp::Recreate);
    assert!(steps[0].sql.starts_with("DROP TYPE"));
    assert!(steps[1].sql.starts_with("CREATE TYPE"));
}

#[test]
fn test_modified_function_emits_create_or_replace() {
    let mut old = catalog_with_tables(vec![]);
    let f = function("is_admin");
    old.schemas
        .get_mut("public")
        .unwrap()
        .functions
        .insert(f.key(), f);

    let mut new = catalog_with_tables(vec![]);
    let mut f2 = function("is_admin");
    f2.definition = "CREATE OR REPLACE FUNCTION is_admin() RETURNS boolean LANGUAGE sql AS $$ SELECT false $$".to_string();
    new.schemas
        .get_mut("public")
        .unwrap()
        .functions
        .insert(f2.key(), f2);

    let steps = run_diff(&old, &new);
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].op, StepOp::Alter);
    assert!(steps[0].sql.starts_with("CREATE OR REPLACE FUNCTION"));
}

#[test]
fn test_changed_signature_is_drop_plus_create() {
    let mut old = catalog_with_tables(vec![]);
    let f = function("is_admin");
    old.schemas
        .get_mut("public")
        .unwrap()
        .functions
        .insert(f.key(), f);

    let mut new = catalog_with_tables(vec![]);
    let mut f2 = function("is_admin");
    f2.signature = "integer".to_string();
    new.schemas
        .get_mut("public")
        .unwrap()
        .functions
        .insert(f2.key(), f2);

    let steps = run_diff(&old, &new);
    assert_eq!(steps.len(), 2);
    assert!(steps.iter().any(|s| s.sql.starts_with("DROP FUNCTION is_admin()")));
    assert!(steps.iter().any(|s| s.op == StepOp::Create));
}

#[test]
fn test_no_transaction_directive_applies_to_step() {
    let old = catalog_with_tables(vec![users_table()]);
    let mut updated = users_table();
    updated.columns.push(col("age", 2, "integer", true));
    let new = catalog_with_tables(vec![updated]);

    let mut directives = DirectiveMap::new();
    directives.insert(
        "public.users".to_string(),
        StatementDirectives {
            no_transaction: true,
            lock_timeout: Some(std::time::Duration::from_secs(5)),
            concurrently: false,
        },
    );

    let steps = diff(&old, &new, "public", &directives).unwrap();
    // The column step's path is public.users.age; directives attached to
    // the table path do not leak onto it
    assert!(steps[0].can_run_in_transaction);

    let mut directives = DirectiveMap::new();
    directives.insert(
        "public.users.age".to_string(),
        StatementDirectives {
            no_transaction: true,
            lock_timeout: Some(std::time::Duration::from_secs(5)),
            concurrently: false,
        },
    );
    let steps = diff(&old, &new, "public", &directives).unwrap();
    assert!(!steps[0].can_run_in_transaction);
    assert_eq!(steps[0].lock_timeout_ms, Some(5000));
}

#[test]
fn test_concurrently_directive_preserved_on_new_table_index() {
    let mut table = users_table();
    table
        .indexes
        .insert("idx_users_id".to_string(), index("users", "idx_users_id", "id"));
    let new = catalog_with_tables(vec![table]);

    let mut directives = DirectiveMap::new();
    directives.insert(
        "public.users.idx_users_id".to_string(),
        StatementDirectives {
            no_transaction: false,
            lock_timeout: None,
            concurrently: true,
        },
    );

    let steps = diff(&Catalog::empty("public"), &new, "public", &directives).unwrap();
    let index_step = steps
        .iter()
        .find(|s| s.kind == StepKind::TableIndex)
        .unwrap();
    assert!(index_step.sql.contains("CONCURRENTLY"));
    assert!(!index_step.can_run_in_transaction);
}

#[test]
fn test_new_table_index_plain_without_directive() {
    let mut table = users_table();
    table
        .indexes
        .insert("idx_users_id".to_string(), index("users", "idx_users_id", "id"));
    let new = catalog_with_tables(vec![table]);

    let steps = run_diff(&Catalog::empty("public"), &new);
    let index_step = steps
        .iter()
        .find(|s| s.kind == StepKind::TableIndex)
        .unwrap();
    assert_eq!(index_step.sql, "CREATE INDEX idx_users_id ON users (id);");
    assert!(index_step.can_run_in_transaction);
}

#[test]
fn test_table_with_function_default_created_after_function() {
    let mut audit = Table::new("public", "audit");
    let mut id_col = col("id", 1, "integer", false);
    id_col.default = Some("next_audit_id()".to_string());
    audit.columns.push(id_col);

    let mut new = catalog_with_tables(vec![audit]);
    let f = function("next_audit_id");
    new.schemas
        .get_mut("public")
        .unwrap()
        .functions
        .insert(f.key(), f);

    let steps = run_diff(&Catalog::empty("public"), &new);
    let function_pos = steps.iter().position(|s| s.kind == StepKind::Function).unwrap();
    let table_pos = steps.iter().position(|s| s.kind == StepKind::Table).unwrap();
    assert!(function_pos < table_pos);
}

#[test]
fn test_invariant_violation_is_internal_error() {
    let mut catalog = Catalog::empty("public");
    let mut table = Table::new("public", "users");
    table.columns.push(col("id", 3, "integer", false)); // sparse position
    catalog
        .schemas
        .get_mut("public")
        .unwrap()
        .tables
        .insert("users".to_string(), table);

    let err = diff(&catalog, &Catalog::empty("public"), "public", &no_directives()).unwrap_err();
    assert!(matches!(err, PgplanError::DiffInternal { .. }));
}

#[test]
fn test_dump_from_empty_produces_full_script() {
    let mut table = users_table();
    table
        .indexes
        .insert("idx_users_id".to_string(), index("users", "idx_users_id", "id"));
    let mut new = catalog_with_tables(vec![table]);
    let schema = new.schemas.get_mut("public").unwrap();
    schema.views.insert(
        "v".to_string(),
        View {
            schema: "public".to_string(),
            name: "v".to_string(),
            materialized: false,
            query: "SELECT id FROM users".to_string(),
            comment: None,
            indexes: BTreeMap::new(),
        },
    );

    let steps = run_diff(&Catalog::empty("public"), &new);
    assert!(steps.iter().any(|s| s.sql.starts_with("CREATE TABLE users")));
    assert!(steps.iter().any(|s| s.sql.starts_with("CREATE INDEX")));
    assert!(steps.iter().any(|s| s.sql.starts_with("CREATE VIEW v")));
    // Topological validity: the view comes after the table
    let table_pos = steps.iter().position(|s| s.kind == StepKind::Table).unwrap();
    let view_pos = steps.iter().position(|s| s.kind == StepKind::View).unwrap();
    assert!(table_pos < view_pos);
}
