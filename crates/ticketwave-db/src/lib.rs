//! # ticketwave-db
//!
//! SQLite persistence for the ticket pool, waves, recipients, invites and
//! the pending-delivery ledger. One database file, `ticketwave.db`, lives
//! in the data directory.
//!
//! Query functions are plain synchronous calls over a borrowed
//! [`Connection`]. Async callers share one connection through
//! [`SharedConnection`] and hold its lock for a single logical operation;
//! anything that must land together goes through one transaction inside a
//! query function. Timestamps are Unix epoch milliseconds.

pub mod migrations;
pub mod queries;
pub mod schema;

use std::path::Path;
use std::sync::Arc;

use rusqlite::ErrorCode;

pub use rusqlite::Connection;

/// Schema version recorded in `PRAGMA user_version`.
pub const SCHEMA_VERSION: u32 = 2;

/// The one connection shared by every store component.
pub type SharedConnection = Arc<tokio::sync::Mutex<Connection>>;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    /// A stored value no longer parses into its domain type.
    #[error("corrupt stored value: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Open the database file, creating and migrating it as needed.
pub fn open(path: &Path) -> Result<Connection> {
    prepare(Connection::open(path)?)
}

/// Fresh in-memory database with the full schema.
pub fn open_memory() -> Result<Connection> {
    prepare(Connection::open_in_memory()?)
}

/// Wrap a connection for sharing between async components.
pub fn shared(conn: Connection) -> SharedConnection {
    Arc::new(tokio::sync::Mutex::new(conn))
}

fn prepare(conn: Connection) -> Result<Connection> {
    // Ticket rows reference waves and ledger rows reference tickets; the
    // cascade from tickets into the ledger depends on foreign keys.
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    migrations::run(&conn)?;
    Ok(conn)
}

/// Map a UNIQUE/CHECK violation to [`DbError::Constraint`], leaving other errors as-is.
pub(crate) fn constraint_or(err: rusqlite::Error, what: &str) -> DbError {
    match err {
        rusqlite::Error::SqliteFailure(ref e, _) if e.code == ErrorCode::ConstraintViolation => {
            DbError::Constraint(what.to_string())
        }
        other => DbError::Sqlite(other),
    }
}
