//! # nibble-db
//!
//! Local store for the nibble sync engine, backed by a single SQLite file.
//!
//! ## Schema
//!
//! - WAL mode, foreign keys enforced
//! - All timestamps are Unix epoch milliseconds (i64)
//! - Schema version stored in `PRAGMA user_version`
//! - Entities are soft-deleted; deltas are append-only
//!
//! Every entity write goes through [`Store`], which pairs it with exactly one
//! outbox delta inside a single transaction.

pub mod migrations;
pub mod outbox;
pub mod queries;
pub mod repo;
pub mod schema;
pub mod store;

use rusqlite::Connection;
use std::path::Path;

pub use repo::{ActivityRepo, CategoryRepo, CursorRepo, DeltaLog};
pub use store::{Mutation, Store};

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Database error types.
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

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for DbError {
    fn from(e: serde_json::Error) -> Self {
        DbError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

/// An entity row together with the device that authored the stored version.
#[derive(Clone, Debug, PartialEq)]
pub struct Stored<T> {
    pub entity: T,
    pub origin_device: String,
}

/// Open or create the local store database at the given path.
///
/// Configures WAL mode, foreign keys, and runs any pending migrations.
pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    configure(&conn)?;
    migrations::run(&conn)?;
    Ok(conn)
}

/// Open an in-memory database (for testing).
pub fn open_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure(&conn)?;
    migrations::run(&conn)?;
    Ok(conn)
}

/// Configure SQLite pragmas.
fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(())
}
