//! Apply a migration plan to a live database.
//!
//! The executor re-fingerprints the live schema, groups consecutive
//! transactional steps into SQL-level transactions, sets a lock timeout
//! before every statement, and reports the last successful step boundary on
//! failure. Committed groups are never reverted — there is no undo log.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio_postgres::Client;

use crate::config::ApplySettings;
use crate::error::{PgplanError, Result};
use crate::plan::{Plan, Step};

/// One executed step in the report.
#[derive(Debug, Serialize)]
pub struct AppliedStep {
    /// Object path of the step.
    pub path: String,
    /// The executed statement.
    pub sql: String,
    /// Execution time in milliseconds.
    pub execution_time_ms: i32,
}

/// Report returned after an apply operation.
#[derive(Debug, Serialize)]
pub struct ApplyReport {
    /// Total steps in the plan.
    pub steps_total: usize,
    /// Steps successfully applied (equals `steps_total` unless cancelled).
    pub steps_applied: usize,
    /// Total execution time in milliseconds.
    pub total_time_ms: i32,
    /// Per-step details in execution order.
    pub details: Vec<AppliedStep>,
    /// True when a cancellation request stopped the apply early.
    pub cancelled: bool,
}

/// Consecutive steps sharing a transaction mode.
struct StepGroup<'a> {
    transactional: bool,
    steps: Vec<&'a Step>,
}

fn group_steps(steps: &[Step]) -> Vec<StepGroup<'_>> {
    let mut groups: Vec<StepGroup<'_>> = Vec::new();
    for step in steps {
        match groups.last_mut() {
            Some(group) if group.transactional == step.can_run_in_transaction => {
                group.steps.push(step);
            }
            _ => groups.push(StepGroup {
                transactional: step.can_run_in_transaction,
                steps: vec![step],
            }),
        }
    }
    groups
}

/// Execute the apply command.
///
/// `cancel` is polled between transaction groups; the in-flight group
/// completes before the apply stops (a group is all-or-nothing).
pub async fn execute(
    client: &Client,
    settings: &ApplySettings,
    target_schema: &str,
    plan: &Plan,
    cancel: Option<Arc<AtomicBool>>,
) -> Result<ApplyReport> {
    // Concurrent-change detection: the live schema must still match the
    // fingerprint captured at plan time.
    if settings.allow_drift {
        log::warn!("Skipping fingerprint check (--allow-drift)");
    } else {
        let mut live = crate::inspect::build_catalog(client, target_schema).await?;
        crate::normalize::normalize(&mut live, target_schema);
        let actual = crate::fingerprint::fingerprint(&live);
        if actual != plan.fingerprint {
            return Err(PgplanError::ConcurrentChange {
                expected: plan.fingerprint.clone(),
                actual,
            });
        }
    }

    // Steps spell target-schema objects unqualified; pin the search path
    client
        .batch_execute(&format!(
            "SET search_path TO {}",
            crate::db::quote_ident(target_schema)
        ))
        .await?;

    let mut report = ApplyReport {
        steps_total: plan.steps.len(),
        steps_applied: 0,
        total_time_ms: 0,
        details: Vec::new(),
        cancelled: false,
    };

    let default_timeout_ms = settings.lock_timeout.as_millis() as u64;

    for group in group_steps(&plan.steps) {
        if cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
        {
            log::warn!(
                "Apply cancelled; steps_applied={}, steps_total={}",
                report.steps_applied,
                report.steps_total
            );
            report.cancelled = true;
            return Ok(report);
        }

        if group.transactional {
            apply_transactional_group(client, &group, default_timeout_ms, &mut report).await?;
        } else {
            for step in &group.steps {
                apply_bare_step(client, step, default_timeout_ms, &mut report).await?;
            }
        }
    }

    log::info!(
        "Apply completed; steps_applied={}, total_time_ms={}",
        report.steps_applied,
        report.total_time_ms
    );
    Ok(report)
}

async fn apply_transactional_group(
    client: &Client,
    group: &StepGroup<'_>,
    default_timeout_ms: u64,
    report: &mut ApplyReport,
) -> Result<()> {
    // Steps recorded inside this group are rolled back together on failure;
    // the committed boundary is where the group started.
    let committed_boundary = report.steps_applied;

    client.batch_execute("BEGIN").await?;

    for step in &group.steps {
        let timeout = step.lock_timeout_ms.unwrap_or(default_timeout_ms);
        let start = std::time::Instant::now();
        let run = async {
            crate::db::set_lock_timeout(client, timeout).await?;
            client
                .batch_execute(&step.sql)
                .await
                .map_err(PgplanError::DatabaseError)
        };
        if let Err(e) = run.await {
            if let Err(rollback_err) = client.batch_execute("ROLLBACK").await {
                log::warn!("Failed to rollback transaction: {}", rollback_err);
            }
            return Err(statement_error(step, &e, committed_boundary, report.steps_total));
        }
        let elapsed = start.elapsed().as_millis() as i32;
        record(report, step, elapsed);
    }

    client.batch_execute("COMMIT").await?;
    Ok(())
}

async fn apply_bare_step(
    client: &Client,
    step: &Step,
    default_timeout_ms: u64,
    report: &mut ApplyReport,
) -> Result<()> {
    let timeout = step.lock_timeout_ms.unwrap_or(default_timeout_ms);
    crate::db::set_lock_timeout(client, timeout).await?;
    let start = std::time::Instant::now();
    if let Err(e) = client.batch_execute(&step.sql).await {
        let e = PgplanError::DatabaseError(e);
        return Err(statement_error(step, &e, report.steps_applied, report.steps_total));
    }
    let elapsed = start.elapsed().as_millis() as i32;
    record(report, step, elapsed);
    Ok(())
}

fn record(report: &mut ApplyReport, step: &Step, elapsed: i32) {
    log::info!("Applied step; path={}, time_ms={}", step.path, elapsed);
    report.steps_applied += 1;
    report.total_time_ms += elapsed;
    report.details.push(AppliedStep {
        path: step.path.clone(),
        sql: step.sql.clone(),
        execution_time_ms: elapsed,
    });
}

/// A statement failure names the failing object and the committed boundary
/// so an operator can resume by hand. Rolled-back steps of the failed group
/// do not count as applied.
fn statement_error(
    step: &Step,
    cause: &PgplanError,
    applied: usize,
    total: usize,
) -> PgplanError {
    let reason = match cause {
        PgplanError::DatabaseError(db_err) => crate::error::format_db_error(db_err),
        other => other.to_string(),
    };
    PgplanError::StatementError {
        path: step.path.clone(),
        reason: format!(
            "{}\n  Last committed step boundary: {}/{}",
            reason, applied, total
        ),
    }
}
