//! Terminal output formatting for pgplan commands.
//! Uses comfy-table for tabular summaries and colored for
//! add/drop/modify-aware styling.

use colored::Colorize;
use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, ContentArrangement, Table};

use pgplan_core::{ApplyReport, DumpReport, Plan, StepOp};

fn op_marker(op: StepOp) -> String {
    match op {
        StepOp::Create => "+".green().bold().to_string(),
        StepOp::Drop => "-".red().bold().to_string(),
        StepOp::Alter => "~".yellow().bold().to_string(),
        StepOp::Recreate => "±".magenta().bold().to_string(),
    }
}

fn op_label(op: StepOp) -> &'static str {
    match op {
        StepOp::Create => "create",
        StepOp::Drop => "drop",
        StepOp::Alter => "alter",
        StepOp::Recreate => "recreate",
    }
}

/// Print a plan as a colored human-readable summary.
pub fn print_plan(plan: &Plan) {
    if plan.is_empty() {
        println!("{}", "No changes. Schema is up to date.".green());
        return;
    }

    let counts = plan.summary_counts();
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Object"),
            Cell::new("Operation"),
            Cell::new("Count"),
        ]);
    for (kind, op, count) in &counts {
        table.add_row(vec![
            Cell::new(kind.label()),
            Cell::new(op_label(*op)),
            Cell::new(count),
        ]);
    }
    println!("{table}");
    println!();

    for step in &plan.steps {
        println!("{} {}", op_marker(step.op), step.path.bold());
        for line in step.sql.lines() {
            println!("    {}", line.dimmed());
        }
        if !step.can_run_in_transaction {
            println!("    {}", "(runs outside a transaction)".yellow());
        }
    }

    let destructive = plan.destructive_steps();
    if !destructive.is_empty() {
        println!();
        println!(
            "{} {} irreversible change(s):",
            "WARNING:".red().bold(),
            destructive.len()
        );
        for step in destructive {
            println!("  {} {}", "-".red(), step.path);
        }
    }

    println!();
    println!(
        "{}",
        format!(
            "Plan: {} step(s), fingerprint {}, server {}",
            plan.steps.len(),
            &plan.fingerprint[..12.min(plan.fingerprint.len())],
            plan.pg_version
        )
        .dimmed()
    );
}

/// Print an apply report summary.
pub fn print_apply_report(report: &ApplyReport) {
    if report.cancelled {
        println!(
            "{}",
            format!(
                "Apply cancelled after {}/{} step(s). The schema is partially migrated.",
                report.steps_applied, report.steps_total
            )
            .yellow()
            .bold()
        );
        return;
    }

    if report.steps_applied == 0 {
        println!("{}", "No changes applied. Schema is up to date.".green());
        return;
    }

    println!(
        "{}",
        format!(
            "Successfully applied {} step(s) (execution time {}ms)",
            report.steps_applied, report.total_time_ms
        )
        .green()
        .bold()
    );
    for detail in &report.details {
        println!(
            "  {} {} ({}ms)",
            "→".green(),
            detail.path,
            detail.execution_time_ms
        );
    }
}

/// Print a dump summary to stderr (the DDL itself goes to stdout or a file).
pub fn print_dump_summary(report: &DumpReport, destination: &str) {
    eprintln!(
        "{}",
        format!(
            "Dumped schema '{}' ({} object(s)) to {}",
            report.schema, report.objects, destination
        )
        .green()
    );
}
