//! CLI entry point for the pgplan schema management tool.
//! Provides clap-based command routing for dump/plan/apply, exit code
//! mapping based on error type, and interactive apply confirmation.

mod output;

use std::io::Write;
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;

use pgplan_core::config::{CliOverrides, PgplanConfig};
use pgplan_core::error::PgplanError;
use pgplan_core::{Pgplan, Plan};

/// Print a report as JSON (when `--json` is active) or via a terminal formatter.
macro_rules! print_report {
    ($report:expr, $json:expr, $printer:path) => {
        if $json {
            println!(
                "{}",
                serde_json::to_string_pretty(&$report).expect("JSON serialization failed")
            );
        } else {
            $printer(&$report);
        }
    };
}

/// Top-level CLI definition with global connection flags and subcommands.
#[derive(Parser)]
#[command(
    name = "pgplan",
    about = "Declarative schema management for PostgreSQL",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file path (default: pgplan.toml if present)
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<String>,

    /// Database URL (overrides host/port/user/db)
    #[arg(long, value_name = "URL", global = true)]
    url: Option<String>,

    /// Database server host
    #[arg(long, value_name = "HOST", global = true)]
    host: Option<String>,

    /// Database server port
    #[arg(long, value_name = "PORT", global = true)]
    port: Option<u16>,

    /// Database user
    #[arg(long, value_name = "USER", global = true)]
    user: Option<String>,

    /// Database password (prefer PGPASSWORD or .env)
    #[arg(long, value_name = "PASS", global = true)]
    password: Option<String>,

    /// Database name
    #[arg(long = "db", value_name = "NAME", global = true)]
    database: Option<String>,

    /// Target schema
    #[arg(long, value_name = "SCHEMA", global = true)]
    schema: Option<String>,

    /// SSL/TLS mode: disable, prefer, require
    #[arg(long, value_name = "MODE", global = true)]
    ssl_mode: Option<String>,

    /// Number of retries when connecting to the database
    #[arg(long, value_name = "N", global = true)]
    connect_retries: Option<u32>,

    /// Connection timeout in seconds (0 = no timeout)
    #[arg(long, value_name = "SECS", global = true)]
    connect_timeout: Option<u32>,

    /// Output results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Enable verbose/debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// All available pgplan subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Write the live schema as canonical DDL
    Dump {
        /// Write to a single file instead of stdout
        #[arg(long, value_name = "PATH", conflicts_with = "multi_file")]
        file: Option<PathBuf>,

        /// Write one file per object under this directory
        #[arg(long, value_name = "DIR")]
        multi_file: Option<PathBuf>,
    },

    /// Diff a desired-state DDL file against the live schema
    Plan {
        /// Desired-state DDL file (supports \i includes)
        #[arg(long, value_name = "PATH")]
        file: PathBuf,

        /// Write the plan as JSON to this path
        #[arg(long, value_name = "PATH")]
        output_json: Option<PathBuf>,

        /// Write the human-readable summary to this path instead of stdout
        #[arg(long, value_name = "PATH")]
        output_human: Option<PathBuf>,
    },

    /// Apply a plan (or plan-and-apply a desired-state file)
    Apply {
        /// Previously saved plan JSON
        #[arg(long, value_name = "PATH", conflicts_with = "file")]
        plan: Option<PathBuf>,

        /// Desired-state DDL file to plan and apply in one go
        #[arg(long, value_name = "PATH")]
        file: Option<PathBuf>,

        /// Skip the interactive confirmation
        #[arg(long)]
        auto_approve: bool,

        /// Skip the concurrent-change fingerprint check
        #[arg(long)]
        allow_drift: bool,

        /// Per-step lock timeout (e.g. 30s, 750ms)
        #[arg(long, value_name = "DURATION")]
        lock_timeout: Option<String>,
    },
}

/// Exit code 2: the plan produced changes but apply was declined.
const EXIT_DECLINED: i32 = 2;

#[tokio::main]
async fn main() {
    // Best-effort .env loading before anything reads the environment
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let filter = if cli.json {
        "error"
    } else if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    env_logger::Builder::new()
        .parse_env(env_logger::Env::default().default_filter_or(filter))
        .format_target(false)
        .format_timestamp(None)
        .init();

    match run(cli).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            process::exit(exit_code(&e));
        }
    }
}

/// Map error types to the documented exit codes: 1 = user error,
/// 3 = apply failed partway (or internal bug), 4 = concurrent change.
fn exit_code(error: &PgplanError) -> i32 {
    match error {
        PgplanError::ConcurrentChange { .. } => 4,
        PgplanError::StatementError { .. } => 3,
        PgplanError::DiffInternal { .. } => 3,
        PgplanError::ConfigError(_) => 1,
        PgplanError::ConnectError(_) => 1,
        PgplanError::InspectError { .. } => 1,
        PgplanError::ParseError { .. } => 1,
        PgplanError::CircularInclude { .. } => 1,
        PgplanError::PlanVersionMismatch { .. } => 1,
        PgplanError::DatabaseError(_) => 1,
        PgplanError::IoError(_) => 1,
    }
}

/// Build configuration and dispatch the chosen subcommand.
/// Returns the process exit code for non-error outcomes.
async fn run(cli: Cli) -> Result<i32, PgplanError> {
    let json_output = cli.json;
    let quiet = cli.quiet;

    let lock_timeout = match &cli.command {
        Commands::Apply { lock_timeout, .. } => lock_timeout.clone(),
        _ => None,
    };
    let allow_drift = matches!(&cli.command, Commands::Apply { allow_drift: true, .. });

    let overrides = CliOverrides {
        url: cli.url,
        host: cli.host,
        port: cli.port,
        user: cli.user,
        password: cli.password,
        database: cli.database,
        schema: cli.schema,
        ssl_mode: cli.ssl_mode,
        connect_retries: cli.connect_retries,
        connect_timeout: cli.connect_timeout,
        lock_timeout,
        allow_drift: if allow_drift { Some(true) } else { None },
    };

    let config = PgplanConfig::load(cli.config.as_deref(), &overrides)?;
    let pg = Pgplan::new(config).await?;

    match cli.command {
        Commands::Dump { file, multi_file } => {
            let report = pg.dump().await?;
            if let Some(dir) = multi_file {
                let written = pgplan_core::commands::dump::write_multi_file(&report, &dir)?;
                if !quiet {
                    output::print_dump_summary(&report, &dir.display().to_string());
                    for path in &written {
                        eprintln!("  {} {}", "→".green(), path.display());
                    }
                }
            } else if let Some(path) = file {
                std::fs::write(&path, report.to_sql())?;
                if !quiet {
                    output::print_dump_summary(&report, &path.display().to_string());
                }
            } else if json_output {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report).expect("JSON serialization failed")
                );
            } else {
                print!("{}", report.to_sql());
            }
            Ok(0)
        }

        Commands::Plan {
            file,
            output_json,
            output_human,
        } => {
            let plan = pg.plan_from_file(&file).await?;
            if let Some(path) = &output_json {
                std::fs::write(path, plan.to_json())?;
                log::info!("Plan written; path={}", path.display());
            }
            if let Some(path) = &output_human {
                std::fs::write(path, human_plan_text(&plan))?;
            }
            if json_output {
                println!("{}", plan.to_json());
            } else if !quiet {
                output::print_plan(&plan);
            }
            Ok(0)
        }

        Commands::Apply {
            plan,
            file,
            auto_approve,
            ..
        } => {
            let plan = match (plan, file) {
                (Some(path), None) => {
                    let json = std::fs::read_to_string(&path)?;
                    Plan::from_json(&json)?
                }
                (None, Some(path)) => pg.plan_from_file(&path).await?,
                _ => {
                    return Err(PgplanError::ConfigError(
                        "apply requires exactly one of --plan or --file".to_string(),
                    ))
                }
            };

            if plan.is_empty() {
                if !quiet {
                    println!("{}", "No changes. Schema is up to date.".green());
                }
                return Ok(0);
            }

            if !auto_approve {
                output::print_plan(&plan);
                if !confirm_apply()? {
                    eprintln!("{}", "Apply declined.".yellow());
                    return Ok(EXIT_DECLINED);
                }
            } else if !quiet && !json_output {
                output::print_plan(&plan);
            }

            // A cancellation signal finishes the in-flight transaction
            // group, then stops
            let cancel = Arc::new(AtomicBool::new(false));
            {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        log::warn!("Cancellation requested; finishing the current step group");
                        cancel.store(true, Ordering::Relaxed);
                    }
                });
            }

            let report = pg.apply(&plan, Some(cancel)).await?;
            print_report!(report, json_output, output::print_apply_report);
            Ok(0)
        }
    }
}

/// Ask for explicit confirmation on stdin. Only `yes` approves.
fn confirm_apply() -> Result<bool, PgplanError> {
    print!("\nDo you want to apply these changes? Only 'yes' will be accepted: ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(answer.trim() == "yes")
}

/// Plain-text rendering of a plan for --output-human files.
fn human_plan_text(plan: &Plan) -> String {
    let mut out = String::new();
    for (kind, op, count) in plan.summary_counts() {
        out.push_str(&format!("{:<20} {:<10} {}\n", kind.label(), format!("{:?}", op).to_lowercase(), count));
    }
    out.push('\n');
    for step in &plan.steps {
        out.push_str(&format!("-- {}\n{}\n\n", step.path, step.sql));
    }
    out
}
