//! The serializable migration plan artifact.
//!
//! A plan wraps the ordered step list produced by the diff engine together
//! with the fingerprint of the live database it was computed against. Plans
//! are short-lived: created by `plan`, consumed by `apply`, with the
//! fingerprint guarding against concurrent schema changes in between.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{PgplanError, Result};

/// Wire-format version of the plan JSON. Loaders reject anything else.
pub const PLAN_FORMAT_VERSION: u32 = 1;

/// Object category a step operates on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum StepKind {
    #[serde(rename = "extension")]
    Extension,
    #[serde(rename = "type")]
    Type,
    #[serde(rename = "sequence")]
    Sequence,
    #[serde(rename = "table")]
    Table,
    #[serde(rename = "table.column")]
    TableColumn,
    #[serde(rename = "table.constraint")]
    TableConstraint,
    #[serde(rename = "table.index")]
    TableIndex,
    #[serde(rename = "table.trigger")]
    TableTrigger,
    #[serde(rename = "table.policy")]
    TablePolicy,
    #[serde(rename = "table.rls")]
    TableRls,
    #[serde(rename = "table.comment")]
    TableComment,
    #[serde(rename = "view")]
    View,
    #[serde(rename = "function")]
    Function,
    #[serde(rename = "procedure")]
    Procedure,
    #[serde(rename = "aggregate")]
    Aggregate,
    #[serde(rename = "default_privilege")]
    DefaultPrivilege,
}

impl StepKind {
    /// Human label used in plan summaries.
    pub fn label(&self) -> &'static str {
        match self {
            StepKind::Extension => "extension",
            StepKind::Type => "type",
            StepKind::Sequence => "sequence",
            StepKind::Table => "table",
            StepKind::TableColumn => "column",
            StepKind::TableConstraint => "constraint",
            StepKind::TableIndex => "index",
            StepKind::TableTrigger => "trigger",
            StepKind::TablePolicy => "policy",
            StepKind::TableRls => "row level security",
            StepKind::TableComment => "comment",
            StepKind::View => "view",
            StepKind::Function => "function",
            StepKind::Procedure => "procedure",
            StepKind::Aggregate => "aggregate",
            StepKind::DefaultPrivilege => "default privilege",
        }
    }
}

/// What a step does to its object.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum StepOp {
    Create,
    Alter,
    Drop,
    Recreate,
}

/// One DDL statement in a plan, with execution metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Step {
    /// The statement to execute, terminated with a semicolon.
    pub sql: String,
    /// Object category.
    pub kind: StepKind,
    /// Operation performed.
    pub op: StepOp,
    /// `schema.object[.sub]` path of the affected object.
    pub path: String,
    /// False for statements that must run outside a transaction
    /// (e.g. CREATE INDEX CONCURRENTLY).
    pub can_run_in_transaction: bool,
    /// Per-step lock timeout override from a `--pgschema-lock-timeout`
    /// directive, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_timeout_ms: Option<u64>,
}

impl Step {
    pub fn new(sql: String, kind: StepKind, op: StepOp, path: String) -> Self {
        Step {
            sql,
            kind,
            op,
            path,
            can_run_in_transaction: true,
            lock_timeout_ms: None,
        }
    }

    pub fn non_transactional(sql: String, kind: StepKind, op: StepOp, path: String) -> Self {
        Step {
            can_run_in_transaction: false,
            ..Step::new(sql, kind, op, path)
        }
    }

    /// Whether the step destroys data that a reverse plan cannot restore.
    pub fn is_destructive(&self) -> bool {
        matches!(self.op, StepOp::Drop | StepOp::Recreate)
            && matches!(
                self.kind,
                StepKind::Table | StepKind::TableColumn | StepKind::Sequence | StepKind::Type
            )
    }
}

/// A complete migration plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Plan {
    /// Wire-format version; always [`PLAN_FORMAT_VERSION`] when produced here.
    pub version: u32,
    /// SHA-256 fingerprint of the live (source) catalog at plan time.
    pub fingerprint: String,
    /// RFC3339 creation timestamp.
    pub created_at: String,
    /// Server version the plan was computed against (`major.minor`).
    pub pg_version: String,
    /// Ordered statements to execute.
    pub steps: Vec<Step>,
}

impl Plan {
    pub fn new(fingerprint: String, pg_version: String, steps: Vec<Step>) -> Self {
        Plan {
            version: PLAN_FORMAT_VERSION,
            fingerprint,
            created_at: Utc::now().to_rfc3339(),
            pg_version,
            steps,
        }
    }

    /// True when the plan contains no work.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).expect("plan serialization cannot fail")
    }

    /// Parse a plan from JSON, rejecting unknown format versions.
    pub fn from_json(json: &str) -> Result<Plan> {
        // Check the version before a full typed parse so a future format
        // fails with a version error, not a shape error.
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| PgplanError::ConfigError(format!("Invalid plan JSON: {}", e)))?;
        let version = value
            .get("version")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| PgplanError::ConfigError("Plan JSON has no version field".to_string()))?
            as u32;
        if version != PLAN_FORMAT_VERSION {
            return Err(PgplanError::PlanVersionMismatch {
                found: version,
                expected: PLAN_FORMAT_VERSION,
            });
        }
        serde_json::from_value(value)
            .map_err(|e| PgplanError::ConfigError(format!("Invalid plan JSON: {}", e)))
    }

    /// Count steps grouped by (kind, op), sorted for stable display.
    pub fn summary_counts(&self) -> Vec<(StepKind, StepOp, usize)> {
        let mut counts: std::collections::BTreeMap<(StepKind, StepOp), usize> =
            std::collections::BTreeMap::new();
        for step in &self.steps {
            *counts.entry((step.kind, step.op)).or_default() += 1;
        }
        counts
            .into_iter()
            .map(|((kind, op), n)| (kind, op, n))
            .collect()
    }

    /// Steps flagged as irreversible (dropped tables/columns and the like).
    pub fn destructive_steps(&self) -> Vec<&Step> {
        self.steps.iter().filter(|s| s.is_destructive()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_plan() -> Plan {
        Plan::new(
            "ab".repeat(32),
            "16.2".to_string(),
            vec![
                Step::new(
                    "ALTER TABLE users ADD COLUMN age integer NOT NULL;".to_string(),
                    StepKind::TableColumn,
                    StepOp::Create,
                    "public.users.age".to_string(),
                ),
                Step::non_transactional(
                    "CREATE INDEX CONCURRENTLY idx_users_age ON users (age);".to_string(),
                    StepKind::TableIndex,
                    StepOp::Create,
                    "public.users.idx_users_age".to_string(),
                ),
            ],
        )
    }

    #[test]
    fn test_json_round_trip() {
        let plan = sample_plan();
        let json = plan.to_json();
        let parsed = Plan::from_json(&json).unwrap();
        assert_eq!(plan, parsed);
    }

    #[test]
    fn test_json_field_names_match_wire_format() {
        let plan = sample_plan();
        let value: serde_json::Value = serde_json::from_str(&plan.to_json()).unwrap();
        assert_eq!(value["version"], 1);
        assert!(value["fingerprint"].is_string());
        assert!(value["created_at"].is_string());
        assert_eq!(value["pg_version"], "16.2");
        let step = &value["steps"][0];
        assert_eq!(step["kind"], "table.column");
        assert_eq!(step["op"], "create");
        assert_eq!(step["path"], "public.users.age");
        assert_eq!(step["can_run_in_transaction"], true);
        assert!(step.get("lock_timeout_ms").is_none());
        assert_eq!(value["steps"][1]["can_run_in_transaction"], false);
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut value: serde_json::Value =
            serde_json::from_str(&sample_plan().to_json()).unwrap();
        value["version"] = serde_json::json!(2);
        let err = Plan::from_json(&value.to_string()).unwrap_err();
        assert!(matches!(
            err,
            PgplanError::PlanVersionMismatch {
                found: 2,
                expected: 1
            }
        ));
    }

    #[test]
    fn test_missing_version_rejected() {
        let err = Plan::from_json("{\"steps\": []}").unwrap_err();
        assert!(err.to_string().contains("version"));
    }

    #[test]
    fn test_summary_counts() {
        let plan = sample_plan();
        let counts = plan.summary_counts();
        assert_eq!(counts.len(), 2);
        assert!(counts
            .iter()
            .any(|(k, o, n)| *k == StepKind::TableColumn && *o == StepOp::Create && *n == 1));
    }

    #[test]
    fn test_destructive_flagging() {
        let drop_table = Step::new(
            "DROP TABLE users;".to_string(),
            StepKind::Table,
            StepOp::Drop,
            "public.users".to_string(),
        );
        assert!(drop_table.is_destructive());

        let create_index = Step::new(
            "CREATE INDEX i ON t (c);".to_string(),
            StepKind::TableIndex,
            StepOp::Create,
            "public.t.i".to_string(),
        );
        assert!(!create_index.is_destructive());

        let drop_policy = Step::new(
            "DROP POLICY p ON t;".to_string(),
            StepKind::TablePolicy,
            StepOp::Drop,
            "public.t.p".to_string(),
        );
        assert!(!drop_policy.is_destructive());
    }
}
