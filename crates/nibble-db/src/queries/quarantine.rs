//! Pulled deltas that could not be applied.
//!
//! A quarantined entry is durably recorded, so the cursor may move past its
//! sequence number without losing it.

use rusqlite::{Connection, Row};

use crate::Result;

/// One quarantined delta.
#[derive(Debug, Clone, PartialEq)]
pub struct QuarantineRow {
    pub id: i64,
    pub owner: String,
    pub server_seq: Option<i64>,
    pub delta_id: Option<String>,
    /// The delta exactly as received.
    pub raw: String,
    pub error: String,
    pub received_at: i64,
}

fn from_row(row: &Row<'_>) -> rusqlite::Result<QuarantineRow> {
    Ok(QuarantineRow {
        id: row.get(0)?,
        owner: row.get(1)?,
        server_seq: row.get(2)?,
        delta_id: row.get(3)?,
        raw: row.get(4)?,
        error: row.get(5)?,
        received_at: row.get(6)?,
    })
}

/// Record a delta that failed to apply.
pub fn insert(
    conn: &Connection,
    owner: &str,
    server_seq: Option<i64>,
    delta_id: Option<&str>,
    raw: &str,
    error: &str,
    received_at: i64,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO quarantine (owner, server_seq, delta_id, raw, error, received_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![owner, server_seq, delta_id, raw, error, received_at],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Quarantined deltas for an owner, in server order.
pub fn list(conn: &Connection, owner: &str) -> Result<Vec<QuarantineRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, owner, server_seq, delta_id, raw, error, received_at
         FROM quarantine WHERE owner = ?1
         ORDER BY server_seq, id",
    )?;
    let rows = stmt
        .query_map([owner], from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Number of quarantined deltas for an owner.
pub fn count(conn: &Connection, owner: &str) -> Result<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM quarantine WHERE owner = ?1",
        [owner],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

/// Drop a quarantined entry once it has been applied.
pub fn remove(conn: &Connection, id: i64) -> Result<()> {
    conn.execute("DELETE FROM quarantine WHERE id = ?1", [id])?;
    Ok(())
}
