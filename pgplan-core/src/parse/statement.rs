//! Statement-level scanning of desired-state DDL.
//!
//! The reflected parse executes DDL in a sandbox and introspects the result,
//! so no full grammar lives here. What the sandbox cannot tell us is scanned
//! textually: statement boundaries (quote- and dollar-quote-aware),
//! `--pgschema-*` directive comments, and the object path each statement
//! creates so directives can be attached to the matching plan step.

use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Duration;

use regex_lite::Regex;

use crate::error::{PgplanError, Result};

/// Execution directives attached to one object path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatementDirectives {
    /// `--pgschema-no-transaction`: run the matching step outside any
    /// transaction.
    pub no_transaction: bool,
    /// `--pgschema-lock-timeout <duration>`: per-step lock timeout override.
    pub lock_timeout: Option<Duration>,
    /// The desired DDL spelled `CREATE INDEX CONCURRENTLY`; the emitted
    /// create preserves it.
    pub concurrently: bool,
}

impl StatementDirectives {
    pub fn is_empty(&self) -> bool {
        !self.no_transaction && self.lock_timeout.is_none() && !self.concurrently
    }
}

/// Object path → directives, consumed by the diff engine.
pub type DirectiveMap = BTreeMap<String, StatementDirectives>;

/// Byte cursor over SQL text that knows how to jump over the regions where
/// a `;` is not a statement boundary: comments, string literals, and
/// dollar-quoted bodies.
struct SqlCursor<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> SqlCursor<'a> {
    fn new(src: &'a str) -> Self {
        SqlCursor { src, pos: 0 }
    }

    fn at(&self, offset: usize) -> Option<u8> {
        self.src.as_bytes().get(self.pos + offset).copied()
    }

    fn bump(&mut self) {
        self.pos += 1;
    }

    /// Advance past `-- …` up to and including the newline.
    fn skip_line_comment(&mut self) {
        while let Some(b) = self.at(0) {
            self.bump();
            if b == b'\n' {
                break;
            }
        }
    }

    /// Advance past a `/* … */` block, honoring nesting.
    fn skip_block_comment(&mut self) {
        self.pos += 2;
        let mut open = 1u32;
        while open > 0 {
            match (self.at(0), self.at(1)) {
                (Some(b'/'), Some(b'*')) => {
                    open += 1;
                    self.pos += 2;
                }
                (Some(b'*'), Some(b'/')) => {
                    open -= 1;
                    self.pos += 2;
                }
                (Some(_), _) => self.bump(),
                (None, _) => break,
            }
        }
    }

    /// True when the quote at the cursor follows a standalone `E`/`e`
    /// marker, making it a C-style escape string where backslash escapes.
    fn quote_is_escape_string(&self) -> bool {
        let bytes = self.src.as_bytes();
        if self.pos == 0 || (bytes[self.pos - 1] != b'E' && bytes[self.pos - 1] != b'e') {
            return false;
        }
        match self.pos.checked_sub(2).map(|i| bytes[i]) {
            Some(before_marker) => {
                !(before_marker.is_ascii_alphanumeric() || before_marker == b'_')
            }
            None => true,
        }
    }

    /// Advance past a quoted literal, from its opening quote to just after
    /// its closing quote. `''` always reads as an escaped quote; backslash
    /// escapes only count in C-style strings.
    fn skip_string(&mut self, c_style: bool) {
        self.bump();
        while let Some(b) = self.at(0) {
            match b {
                b'\\' if c_style => self.pos += 2,
                b'\'' if self.at(1) == Some(b'\'') => self.pos += 2,
                b'\'' => {
                    self.bump();
                    return;
                }
                _ => self.bump(),
            }
        }
    }

    /// Advance past `$tag$ … $tag$`. Returns false when the `$` at the
    /// cursor does not open a dollar quote (e.g. a positional parameter),
    /// leaving the cursor untouched.
    fn skip_dollar_quote(&mut self) -> bool {
        let rest = &self.src[self.pos..];
        let bytes = rest.as_bytes();
        let mut tag_end = 1;
        while tag_end < bytes.len()
            && (bytes[tag_end].is_ascii_alphanumeric() || bytes[tag_end] == b'_')
        {
            tag_end += 1;
        }
        if bytes.get(tag_end) != Some(&b'$') {
            return false;
        }
        let tag = &rest[..=tag_end];
        self.pos += tag.len();
        // `$` is ASCII, so the position is a char boundary whenever it
        // matches and the slice below cannot split a code point
        while let Some(b) = self.at(0) {
            if b == b'$' && self.src[self.pos..].starts_with(tag) {
                self.pos += tag.len();
                return true;
            }
            self.bump();
        }
        true
    }
}

/// Split SQL text into statements at top-level semicolons.
///
/// Separators inside comments, literals (`'…'` and `E'…'`), and
/// dollar-quoted bodies do not count. Comment lines above a statement stay
/// attached to it, which is what lets directive scanning see them.
pub fn split_statements(sql: &str) -> Vec<&str> {
    let mut cursor = SqlCursor::new(sql);
    let mut pieces = Vec::new();
    let mut anchor = 0;

    while let Some(b) = cursor.at(0) {
        match b {
            b'-' if cursor.at(1) == Some(b'-') => cursor.skip_line_comment(),
            b'/' if cursor.at(1) == Some(b'*') => cursor.skip_block_comment(),
            b'\'' => {
                let c_style = cursor.quote_is_escape_string();
                cursor.skip_string(c_style);
            }
            b'$' => {
                if !cursor.skip_dollar_quote() {
                    cursor.bump();
                }
            }
            b';' => {
                let piece = sql[anchor..cursor.pos].trim();
                if !piece.is_empty() {
                    pieces.push(piece);
                }
                cursor.bump();
                anchor = cursor.pos;
            }
            _ => cursor.bump(),
        }
    }

    let tail = sql[anchor..].trim();
    if !tail.is_empty() {
        pieces.push(tail);
    }

    pieces
}

// Object-path extraction patterns. Only CREATE forms matter — directives
// attach to the object a statement creates.
static CREATE_TABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)CREATE\s+TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?(?:(\w+)\.)?(\w+)").unwrap()
});
static CREATE_INDEX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)CREATE\s+(?:UNIQUE\s+)?INDEX\s+(CONCURRENTLY\s+)?(?:IF\s+NOT\s+EXISTS\s+)?(\w+)\s+ON\s+(?:ONLY\s+)?(?:(\w+)\.)?(\w+)").unwrap()
});
static CREATE_VIEW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)CREATE\s+(?:OR\s+REPLACE\s+)?(?:MATERIALIZED\s+)?VIEW\s+(?:(\w+)\.)?(\w+)")
        .unwrap()
});
static CREATE_ROUTINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)CREATE\s+(?:OR\s+REPLACE\s+)?(?:FUNCTION|PROCEDURE)\s+(?:(\w+)\.)?(\w+)")
        .unwrap()
});
static CREATE_POLICY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)CREATE\s+POLICY\s+(\w+)\s+ON\s+(?:(\w+)\.)?(\w+)").unwrap()
});
static CREATE_TRIGGER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)CREATE\s+(?:CONSTRAINT\s+)?TRIGGER\s+(\w+)[\s\S]*?\sON\s+(?:(\w+)\.)?(\w+)")
        .unwrap()
});
static CREATE_SEQUENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)CREATE\s+SEQUENCE\s+(?:IF\s+NOT\s+EXISTS\s+)?(?:(\w+)\.)?(\w+)").unwrap()
});
static CREATE_TYPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)CREATE\s+(?:TYPE|DOMAIN)\s+(?:(\w+)\.)?(\w+)").unwrap()
});
static ALTER_TABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)ALTER\s+TABLE\s+(?:ONLY\s+)?(?:IF\s+EXISTS\s+)?(?:(\w+)\.)?(\w+)").unwrap()
});

fn schema_of(captured: Option<regex_lite::Match<'_>>, target_schema: &str) -> String {
    captured
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| target_schema.to_string())
}

/// Determine the `schema.object[.sub]` path of the object a statement
/// creates or alters. Returns `None` for statements without a stable path
/// (e.g. DML, GRANT).
pub fn statement_path(stmt: &str, target_schema: &str) -> Option<String> {
    if let Some(caps) = CREATE_INDEX_RE.captures(stmt) {
        let schema = schema_of(caps.get(3), target_schema);
        let table = caps.get(4).unwrap().as_str();
        let index = caps.get(2).unwrap().as_str();
        return Some(format!("{}.{}.{}", schema, table, index));
    }
    if let Some(caps) = CREATE_POLICY_RE.captures(stmt) {
        let schema = schema_of(caps.get(2), target_schema);
        let table = caps.get(3).unwrap().as_str();
        let policy = caps.get(1).unwrap().as_str();
        return Some(format!("{}.{}.{}", schema, table, policy));
    }
    if let Some(caps) = CREATE_TRIGGER_RE.captures(stmt) {
        let schema = schema_of(caps.get(2), target_schema);
        let table = caps.get(3).unwrap().as_str();
        let trigger = caps.get(1).unwrap().as_str();
        return Some(format!("{}.{}.{}", schema, table, trigger));
    }
    for re in [
        &*CREATE_TABLE_RE,
        &*CREATE_VIEW_RE,
        &*CREATE_ROUTINE_RE,
        &*CREATE_SEQUENCE_RE,
        &*CREATE_TYPE_RE,
        &*ALTER_TABLE_RE,
    ] {
        if let Some(caps) = re.captures(stmt) {
            let schema = schema_of(caps.get(1), target_schema);
            let name = caps.get(2).unwrap().as_str();
            return Some(format!("{}.{}", schema, name));
        }
    }
    None
}

/// Parse the directive comments directly above the statement body.
///
/// Directives must sit on the line(s) immediately preceding the first
/// non-comment line of the statement.
fn leading_directives(stmt: &str) -> Result<StatementDirectives> {
    let mut directives = StatementDirectives::default();
    // Collect comment lines until the statement body starts, keeping only
    // the run adjacent to the body.
    let mut adjacent: Vec<&str> = Vec::new();
    for line in stmt.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            adjacent.clear();
            continue;
        }
        if let Some(comment) = trimmed.strip_prefix("--") {
            adjacent.push(comment.trim());
        } else {
            break;
        }
    }
    for comment in adjacent {
        if comment == "pgschema-no-transaction" {
            directives.no_transaction = true;
        } else if let Some(value) = comment
            .strip_prefix("pgschema-lock-timeout")
            .filter(|rest| rest.is_empty() || rest.starts_with(char::is_whitespace))
        {
            let value = value.trim();
            let duration =
                crate::config::parse_duration(value).map_err(|_| PgplanError::ParseError {
                    source_path: "<ddl>".to_string(),
                    reason: format!("invalid --pgschema-lock-timeout value '{}'", value),
                })?;
            directives.lock_timeout = Some(duration);
        }
    }
    Ok(directives)
}

/// Scan DDL text for `--pgschema-*` directives and CONCURRENTLY markers,
/// keyed by the object path of the statement they precede.
pub fn scan_directives(sql: &str, target_schema: &str) -> Result<DirectiveMap> {
    let mut map = DirectiveMap::new();
    for stmt in split_statements(sql) {
        let mut directives = leading_directives(stmt)?;
        if let Some(caps) = CREATE_INDEX_RE.captures(stmt) {
            if caps.get(1).is_some() {
                directives.concurrently = true;
            }
        }
        if directives.is_empty() {
            continue;
        }
        match statement_path(stmt, target_schema) {
            Some(path) => {
                map.insert(path, directives);
            }
            None => {
                log::warn!(
                    "Ignoring pgschema directive on unrecognized statement: {}",
                    &stmt[..stmt.len().min(60)]
                );
            }
        }
    }
    Ok(map)
}

/// Look up directives for a step path, falling back to the object path with
/// a routine signature suffix stripped (`public.f(integer)` → `public.f`).
pub fn directives_for<'a>(
    map: &'a DirectiveMap,
    path: &str,
) -> Option<&'a StatementDirectives> {
    if let Some(d) = map.get(path) {
        return Some(d);
    }
    if let Some(pos) = path.find('(') {
        return map.get(&path[..pos]);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statements_split_on_semicolons() {
        let pieces = split_statements("CREATE TABLE a (id int); CREATE TABLE b (id int);");
        assert_eq!(
            pieces,
            vec!["CREATE TABLE a (id int)", "CREATE TABLE b (id int)"]
        );
    }

    #[test]
    fn test_semicolon_inside_literal_not_a_boundary() {
        let pieces =
            split_statements("ALTER TABLE t ALTER COLUMN c SET DEFAULT 'a;b'; DROP TABLE u;");
        assert_eq!(
            pieces,
            vec![
                "ALTER TABLE t ALTER COLUMN c SET DEFAULT 'a;b'",
                "DROP TABLE u"
            ]
        );
    }

    #[test]
    fn test_function_body_semicolons_not_boundaries() {
        let sql = "CREATE FUNCTION f() RETURNS void AS $$ BEGIN NULL; END; $$ LANGUAGE plpgsql; DROP TABLE t;";
        let pieces = split_statements(sql);
        assert_eq!(pieces.len(), 2);
        assert!(pieces[0].contains("BEGIN NULL; END;"));
        assert_eq!(pieces[1], "DROP TABLE t");
    }

    #[test]
    fn test_tagged_dollar_quote_spans_semicolons() {
        let sql =
            "CREATE FUNCTION f() RETURNS void AS $body$ one; two; $body$ LANGUAGE plpgsql; SELECT 1;";
        assert_eq!(split_statements(sql).len(), 2);
    }

    #[test]
    fn test_block_comment_hides_semicolon() {
        let pieces = split_statements("CREATE TABLE a (id int) /* not ; here */; DROP TABLE b;");
        assert_eq!(pieces.len(), 2);
        assert!(pieces[0].starts_with("CREATE TABLE a"));
    }

    #[test]
    fn test_escape_string_backslash_quote() {
        let pieces = split_statements(r"SELECT E'ends with \'; not really'; SELECT 2;");
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[1], "SELECT 2");
    }

    #[test]
    fn test_positional_parameter_is_not_a_dollar_quote() {
        let pieces = split_statements("CREATE POLICY p ON t USING (id = $1); DROP TABLE u;");
        assert_eq!(pieces.len(), 2);
    }

    #[test]
    fn test_final_statement_without_semicolon_kept() {
        let pieces = split_statements("CREATE TABLE a (id int);\nCREATE TABLE b (id int)");
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[1], "CREATE TABLE b (id int)");
    }

    #[test]
    fn test_directive_comment_stays_attached() {
        let sql = "CREATE TABLE a (id int);\n--pgschema-no-transaction\nCREATE INDEX i ON a (id);";
        let pieces = split_statements(sql);
        assert_eq!(pieces.len(), 2);
        assert!(pieces[1].starts_with("--pgschema-no-transaction"));
    }

    #[test]
    fn test_statement_path_create_table() {
        assert_eq!(
            statement_path("CREATE TABLE users (id int)", "public"),
            Some("public.users".to_string())
        );
        assert_eq!(
            statement_path("CREATE TABLE sales.orders (id int)", "public"),
            Some("sales.orders".to_string())
        );
    }

    #[test]
    fn test_statement_path_create_index() {
        assert_eq!(
            statement_path("CREATE INDEX idx_age ON users (age)", "public"),
            Some("public.users.idx_age".to_string())
        );
        assert_eq!(
            statement_path(
                "CREATE UNIQUE INDEX CONCURRENTLY u_email ON users (email)",
                "public"
            ),
            Some("public.users.u_email".to_string())
        );
    }

    #[test]
    fn test_statement_path_policy_and_trigger() {
        assert_eq!(
            statement_path("CREATE POLICY p ON docs USING (true)", "public"),
            Some("public.docs.p".to_string())
        );
        assert_eq!(
            statement_path(
                "CREATE TRIGGER trg BEFORE INSERT ON docs FOR EACH ROW EXECUTE FUNCTION f()",
                "public"
            ),
            Some("public.docs.trg".to_string())
        );
    }

    #[test]
    fn test_statement_path_none_for_dml() {
        assert_eq!(statement_path("INSERT INTO t VALUES (1)", "public"), None);
    }

    #[test]
    fn test_scan_no_transaction_directive() {
        let sql = "--pgschema-no-transaction\nCREATE TABLE big (id int);";
        let map = scan_directives(sql, "public").unwrap();
        let d = map.get("public.big").unwrap();
        assert!(d.no_transaction);
        assert!(d.lock_timeout.is_none());
    }

    #[test]
    fn test_scan_lock_timeout_directive() {
        let sql = "--pgschema-lock-timeout 5s\nALTER TABLE users ADD COLUMN age int;";
        let map = scan_directives(sql, "public").unwrap();
        let d = map.get("public.users").unwrap();
        assert_eq!(d.lock_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_scan_invalid_lock_timeout_fails() {
        let sql = "--pgschema-lock-timeout soon\nALTER TABLE users ADD COLUMN age int;";
        assert!(scan_directives(sql, "public").is_err());
    }

    #[test]
    fn test_directive_must_be_adjacent() {
        // A blank line between directive and statement detaches it
        let sql = "--pgschema-no-transaction\n\nCREATE TABLE big (id int);";
        let map = scan_directives(sql, "public").unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn test_concurrently_recorded_without_comment() {
        let sql = "CREATE INDEX CONCURRENTLY idx ON users (age);";
        let map = scan_directives(sql, "public").unwrap();
        assert!(map.get("public.users.idx").unwrap().concurrently);
    }

    #[test]
    fn test_plain_create_index_not_recorded() {
        let sql = "CREATE INDEX idx ON users (age);";
        let map = scan_directives(sql, "public").unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn test_directives_for_strips_signature() {
        let mut map = DirectiveMap::new();
        map.insert(
            "public.f".to_string(),
            StatementDirectives {
                no_transaction: true,
                ..Default::default()
            },
        );
        assert!(directives_for(&map, "public.f(integer)").is_some());
        assert!(directives_for(&map, "public.g(integer)").is_none());
    }

    #[test]
    fn test_multiple_directives_one_statement() {
        let sql =
            "--pgschema-no-transaction\n--pgschema-lock-timeout 750ms\nCREATE TABLE t (id int);";
        let map = scan_directives(sql, "public").unwrap();
        let d = map.get("public.t").unwrap();
        assert!(d.no_transaction);
        assert_eq!(d.lock_timeout, Some(Duration::from_millis(750)));
    }
}
