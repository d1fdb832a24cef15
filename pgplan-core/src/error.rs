//! Error types for pgplan operations.

use thiserror::Error;

/// Render a tokio_postgres error including the server-side context its
/// Display output drops (message, detail, hint, error position).
pub fn format_db_error(e: &tokio_postgres::Error) -> String {
    if let Some(db_err) = e.as_db_error() {
        let mut out = db_err.message().to_string();
        for (label, value) in [("Detail", db_err.detail()), ("Hint", db_err.hint())] {
            if let Some(value) = value {
                out.push_str(&format!("\n  {}: {}", label, value));
            }
        }
        if let Some(position) = db_err.position() {
            out.push_str(&format!("\n  Position: {:?}", position));
        }
        return out;
    }
    // No DbError means a protocol or transport failure; chain the causes
    let mut out = e.to_string();
    let mut cause = std::error::Error::source(e);
    while let Some(c) = cause {
        out.push_str(&format!(": {}", c));
        cause = c.source();
    }
    if e.is_closed() {
        out.push_str(
            "\n  Note: the connection closed unexpectedly; the server may have restarted or the network dropped.",
        );
    }
    out
}

/// All error types that pgplan operations can produce.
#[derive(Error, Debug)]
pub enum PgplanError {
    /// Invalid or missing configuration (bad flags, TOML parse errors, missing
    /// connection parameters, etc.).
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Could not establish a database connection.
    #[error("Connection error: {0}")]
    ConnectError(String),

    /// A system-catalog query failed while building the schema IR.
    #[error("Inspect failed for schema {schema}: {reason}")]
    InspectError { schema: String, reason: String },

    /// The desired-state DDL could not be parsed or executed in the sandbox.
    #[error("Parse error in {source_path}: {reason}")]
    ParseError { source_path: String, reason: String },

    /// An `\i` include chain loops back on itself.
    #[error("Circular include detected: {path}")]
    CircularInclude { path: String },

    /// The diff engine hit a state that violates one of its own invariants.
    /// This is a bug in pgplan, not in the input.
    #[error("Internal diff error: {reason}")]
    DiffInternal { reason: String },

    /// A plan file was produced by an incompatible pgplan version.
    #[error("Unsupported plan version {found} (expected {expected})")]
    PlanVersionMismatch { found: u32, expected: u32 },

    /// The live database changed between plan and apply.
    #[error("Concurrent change detected: the database no longer matches the plan fingerprint (expected {expected}, found {actual}). Re-run plan, or pass --allow-drift to apply anyway.")]
    ConcurrentChange { expected: String, actual: String },

    /// A plan step failed against the live database. The in-flight
    /// transaction was rolled back; earlier committed groups remain applied.
    #[error("Statement failed for {path}: {reason}")]
    StatementError { path: String, reason: String },

    /// A database query or protocol-level operation failed.
    #[error("Database error: {}", format_db_error(.0))]
    DatabaseError(#[from] tokio_postgres::Error),

    /// A filesystem I/O operation failed (reading DDL files, writing plans).
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Convenience type alias for `Result<T, PgplanError>`.
pub type Result<T> = std::result::Result<T, PgplanError>;
