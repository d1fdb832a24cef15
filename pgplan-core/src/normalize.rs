//! Canonicalization of schema IR values.
//!
//! The inspector and the parser both feed their output through this module,
//! so that two catalogs describing the same schema compare byte-identical.
//! Rewrites cover PostgreSQL type synonyms, server expression renderings,
//! identifier case, and schema qualification relative to the target schema.

use std::sync::LazyLock;

use regex_lite::Regex;

use crate::model::{Catalog, ConstraintKind, TypeKind};

/// Collapse a PostgreSQL type synonym to its canonical name.
///
/// Handles parameterized forms (`varchar(120)` → `character varying(120)`)
/// by normalizing the base name and reattaching the modifier.
pub fn normalize_type(type_name: &str) -> String {
    let trimmed = type_name.trim();
    // Split off a trailing (…) modifier or [] suffix
    let (base, suffix) = match trimmed.find('(') {
        Some(pos) => (&trimmed[..pos], &trimmed[pos..]),
        None => match trimmed.find("[]") {
            Some(pos) => (&trimmed[..pos], &trimmed[pos..]),
            None => (trimmed, ""),
        },
    };
    let lower = base.trim().to_lowercase();
    let canonical = match lower.as_str() {
        "int" | "int4" => "integer",
        "int8" => "bigint",
        "int2" => "smallint",
        "serial" | "serial4" => "integer",
        "bigserial" | "serial8" => "bigint",
        "smallserial" | "serial2" => "smallint",
        "float4" => "real",
        "float" | "float8" => "double precision",
        "bool" => "boolean",
        "varchar" => "character varying",
        "char" | "bpchar" => "character",
        "timestamptz" => "timestamp with time zone",
        "timestamp" => "timestamp without time zone",
        "timetz" => "time with time zone",
        "time" => "time without time zone",
        "decimal" => "numeric",
        other => other,
    };
    format!("{}{}", canonical, suffix)
}

/// Normalize a comma-separated argument signature.
pub fn normalize_signature(signature: &str) -> String {
    if signature.trim().is_empty() {
        return String::new();
    }
    signature
        .split(',')
        .map(|t| normalize_type(t.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

static ANY_ARRAY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"=\s*ANY\s*\(ARRAY\[(.*?)\](?:::[a-zA-Z_ ]+\[\])?\)").unwrap()
});
static LITERAL_CAST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"('(?:[^']|'')*')::(?:text|bpchar|character varying(?:\(\d+\))?|varchar(?:\(\d+\))?|character(?:\(\d+\))?)").unwrap()
});
static INTERVAL_LITERAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"('(?:[^']|'')*')::interval").unwrap());

/// Canonicalize an expression string rendered by `pg_get_expr` /
/// `pg_get_viewdef` so both IR pipelines agree on one form.
pub fn canonicalize_expression(expr: &str, target_schema: &str) -> String {
    let mut out = expr.trim().to_string();

    out = strip_outer_parens(&out);

    // `col = ANY (ARRAY['a'::text, 'b'::text])` → `col IN ('a', 'b')`
    out = ANY_ARRAY_RE
        .replace_all(&out, |caps: &regex_lite::Captures| {
            let items = caps.get(1).map_or("", |m| m.as_str());
            let cleaned: Vec<String> = items
                .split(',')
                .map(|item| strip_literal_cast(item.trim()))
                .collect();
            format!("IN ({})", cleaned.join(", "))
        })
        .to_string();

    // `'1 day'::interval` → `INTERVAL '1 day'`
    out = INTERVAL_LITERAL_RE
        .replace_all(&out, "INTERVAL $1")
        .to_string();

    // `'lit'::text` → `'lit'`
    out = LITERAL_CAST_RE.replace_all(&out, "$1").to_string();

    // `~~` / `!~~` are the internal spellings of LIKE / NOT LIKE
    out = out.replace(" !~~ ", " NOT LIKE ").replace(" ~~ ", " LIKE ");

    // References inside the target schema are spelled unqualified
    out = unqualify(&out, target_schema);

    collapse_whitespace(&out)
}

/// Remove one or more pairs of parentheses that wrap the whole expression.
fn strip_outer_parens(expr: &str) -> String {
    let mut s = expr.trim();
    while s.starts_with('(') && s.ends_with(')') {
        let inner = &s[1..s.len() - 1];
        let mut depth = 0i32;
        let mut wraps = true;
        for (i, c) in inner.char_indices() {
            match c {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth < 0 && i < inner.len() - 1 {
                        wraps = false;
                        break;
                    }
                }
                _ => {}
            }
        }
        if wraps && depth == 0 {
            s = inner.trim();
        } else {
            break;
        }
    }
    s.to_string()
}

/// Drop a trailing `::type` cast from a single quoted literal.
fn strip_literal_cast(item: &str) -> String {
    if let Some(pos) = item.rfind("::") {
        let (lit, _) = item.split_at(pos);
        if lit.starts_with('\'') && lit.ends_with('\'') {
            return lit.to_string();
        }
    }
    item.to_string()
}

/// Remove `target_schema.` qualification; names in other schemas stay
/// qualified. Quoted identifiers are left untouched.
fn unqualify(expr: &str, target_schema: &str) -> String {
    let needle = format!("{}.", target_schema);
    let mut out = String::with_capacity(expr.len());
    let bytes = expr.as_bytes();
    let mut i = 0;
    let mut in_string = false;
    let mut in_quote_ident = false;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            '\'' if !in_quote_ident => in_string = !in_string,
            '"' if !in_string => in_quote_ident = !in_quote_ident,
            _ => {}
        }
        if !in_string && !in_quote_ident && expr[i..].starts_with(&needle) {
            // Only strip when at an identifier boundary
            let at_boundary = i == 0
                || !((bytes[i - 1] as char).is_ascii_alphanumeric()
                    || bytes[i - 1] == b'_'
                    || bytes[i - 1] == b'.');
            if at_boundary {
                i += needle.len();
                continue;
            }
        }
        out.push(c);
        i += 1;
    }
    out
}

fn collapse_whitespace(expr: &str) -> String {
    let mut out = String::with_capacity(expr.len());
    let mut in_string = false;
    let mut last_was_space = false;
    for c in expr.chars() {
        if c == '\'' {
            in_string = !in_string;
        }
        if !in_string && c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
                last_was_space = true;
            }
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    out.trim().to_string()
}

/// Canonicalize a whole DDL statement: target-schema qualification removed,
/// surrounding whitespace trimmed. Unlike [`canonicalize_expression`] this
/// never collapses interior whitespace — statements may contain `--`
/// comments and newline-sensitive function bodies.
pub fn canonicalize_statement(stmt: &str, target_schema: &str) -> String {
    unqualify(stmt.trim(), target_schema)
}

/// Lowercase an identifier unless it is a quoted, case-sensitive name.
pub fn normalize_ident(name: &str) -> String {
    if name.starts_with('"') && name.ends_with('"') && name.len() >= 2 {
        return name.to_string();
    }
    name.to_lowercase()
}

fn canonicalize_opt(expr: &Option<String>, target_schema: &str) -> Option<String> {
    expr.as_ref()
        .map(|e| canonicalize_expression(e, target_schema))
}

/// Normalize an entire catalog in place.
///
/// After this call, two catalogs describing semantically equal schemas are
/// structurally equal and serialize byte-identically.
pub fn normalize(catalog: &mut Catalog, target_schema: &str) {
    for schema in catalog.schemas.values_mut() {
        for table in schema.tables.values_mut() {
            for column in &mut table.columns {
                column.type_name = normalize_type(&column.type_name);
                column.default = canonicalize_opt(&column.default, target_schema);
                column.generated = canonicalize_opt(&column.generated, target_schema);
            }
            for constraint in table.constraints.values_mut() {
                if let ConstraintKind::Check { expression } = &mut constraint.kind {
                    *expression = canonicalize_expression(expression, target_schema);
                }
            }
            for index in table.indexes.values_mut() {
                index.predicate = canonicalize_opt(&index.predicate, target_schema);
                let definition = crate::ddl::index_definition(index, target_schema);
                index.definition = definition;
            }
            for trigger in table.triggers.values_mut() {
                trigger.when_clause = canonicalize_opt(&trigger.when_clause, target_schema);
                trigger.definition = canonicalize_statement(&trigger.definition, target_schema);
                trigger.events.sort();
            }
            for policy in table.policies.values_mut() {
                policy.using_expr = canonicalize_opt(&policy.using_expr, target_schema);
                policy.with_check_expr =
                    canonicalize_opt(&policy.with_check_expr, target_schema);
                policy.roles.sort();
            }
        }
        for view in schema.views.values_mut() {
            view.query = canonicalize_expression(&view.query, target_schema);
            for index in view.indexes.values_mut() {
                index.predicate = canonicalize_opt(&index.predicate, target_schema);
                let definition = crate::ddl::index_definition(index, target_schema);
                index.definition = definition;
            }
        }
        for routine in schema
            .functions
            .values_mut()
            .chain(schema.procedures.values_mut())
        {
            routine.signature = normalize_signature(&routine.signature);
            if let Some(returns) = &routine.returns {
                routine.returns = Some(normalize_type(returns));
            }
            routine.definition = canonicalize_statement(&routine.definition, target_schema);
        }
        rekey_by_signature(&mut schema.functions);
        rekey_by_signature(&mut schema.procedures);
        for sequence in schema.sequences.values_mut() {
            sequence.data_type = normalize_type(&sequence.data_type);
        }
        for type_def in schema.types.values_mut() {
            match &mut type_def.kind {
                TypeKind::Domain {
                    base_type,
                    default,
                    checks,
                    ..
                } => {
                    *base_type = normalize_type(base_type);
                    *default = canonicalize_opt(default, target_schema);
                    for check in checks.iter_mut() {
                        check.expression =
                            canonicalize_expression(&check.expression, target_schema);
                    }
                }
                TypeKind::Composite { fields } => {
                    for field in fields.iter_mut() {
                        field.type_name = normalize_type(&field.type_name);
                    }
                }
                TypeKind::Enum { .. } => {}
            }
        }
        for aggregate in schema.aggregates.values_mut() {
            aggregate.signature = normalize_signature(&aggregate.signature);
        }
        let aggregates = std::mem::take(&mut schema.aggregates);
        schema.aggregates = aggregates
            .into_values()
            .map(|a| (a.key(), a))
            .collect();
    }
}

/// Re-key a routine map after signature normalization changed the keys.
fn rekey_by_signature(map: &mut std::collections::BTreeMap<String, crate::model::Routine>) {
    let routines = std::mem::take(map);
    *map = routines.into_values().map(|r| (r.key(), r)).collect();
}
