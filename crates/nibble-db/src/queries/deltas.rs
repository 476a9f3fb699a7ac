//! Outbox (delta log) query functions.

use nibble_types::{Delta, DeltaOp, EntityKind};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};

use crate::{DbError, Result};

const COLUMNS: &str =
    "id, owner, device_id, entity_kind, entity_id, op, payload, local_ts, sent_at, server_seq";

fn conversion_error(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn from_row(row: &Row<'_>) -> rusqlite::Result<Delta> {
    let entity_kind: String = row.get(3)?;
    let op: String = row.get(5)?;
    let payload: String = row.get(6)?;
    Ok(Delta {
        id: row.get(0)?,
        owner: row.get(1)?,
        device_id: row.get(2)?,
        entity_kind: entity_kind
            .parse::<EntityKind>()
            .map_err(|e| conversion_error(3, e))?,
        entity_id: row.get(4)?,
        op: op.parse::<DeltaOp>().map_err(|e| conversion_error(5, e))?,
        payload: serde_json::from_str(&payload).map_err(|e| conversion_error(6, e))?,
        local_ts: row.get(7)?,
        sent_at: row.get(8)?,
        server_seq: row.get(9)?,
    })
}

/// Append a delta. Never overwrites: a duplicate id is a constraint violation.
pub fn insert(conn: &Connection, delta: &Delta) -> Result<()> {
    let payload = serde_json::to_string(&delta.payload)?;
    conn.execute(
        &format!("INSERT INTO deltas ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
        rusqlite::params![
            delta.id,
            delta.owner,
            delta.device_id,
            delta.entity_kind.as_str(),
            delta.entity_id,
            delta.op.as_str(),
            payload,
            delta.local_ts,
            delta.sent_at,
            delta.server_seq,
        ],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            DbError::Constraint(format!("delta '{}' already recorded", delta.id))
        }
        other => DbError::Sqlite(other),
    })?;
    Ok(())
}

/// Get a delta by id.
pub fn get(conn: &Connection, id: &str) -> Result<Option<Delta>> {
    let row = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM deltas WHERE id = ?1"),
            [id],
            from_row,
        )
        .optional()?;
    Ok(row)
}

/// Unsent deltas for an owner, oldest first (ties broken by insertion order).
pub fn unsent(conn: &Connection, owner: &str, limit: Option<u32>) -> Result<Vec<Delta>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM deltas
         WHERE owner = ?1 AND sent_at IS NULL
         ORDER BY local_ts, rowid
         LIMIT ?2"
    ))?;

    // SQLite treats a negative LIMIT as "no limit".
    let limit = limit.map(i64::from).unwrap_or(-1);
    let rows = stmt
        .query_map(rusqlite::params![owner, limit], from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Number of unsent deltas for an owner.
pub fn count_unsent(conn: &Connection, owner: &str) -> Result<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM deltas WHERE owner = ?1 AND sent_at IS NULL",
        [owner],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

/// Every delta recorded for one entity, in recording order.
pub fn for_entity(conn: &Connection, entity_id: &str) -> Result<Vec<Delta>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM deltas WHERE entity_id = ?1 ORDER BY local_ts, rowid"
    ))?;
    let rows = stmt
        .query_map([entity_id], from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Stamp `sent_at`/`server_seq` on exactly the given ids.
///
/// Rows already marked sent are left untouched, so repeating a call is a
/// no-op. Returns the number of rows that changed.
pub fn mark_sent(conn: &Connection, ids: &[String], server_seq: i64, sent_at: i64) -> Result<usize> {
    let mut stmt = conn.prepare(
        "UPDATE deltas SET sent_at = ?1, server_seq = ?2
         WHERE id = ?3 AND sent_at IS NULL",
    )?;

    let mut changed = 0;
    for id in ids {
        changed += stmt.execute(rusqlite::params![sent_at, server_seq, id])?;
    }
    Ok(changed)
}

/// Delete acknowledged deltas sent before `cutoff`. Unsent deltas are never purged.
pub fn purge_acknowledged(conn: &Connection, owner: &str, cutoff: i64) -> Result<usize> {
    let purged = conn.execute(
        "DELETE FROM deltas WHERE owner = ?1 AND sent_at IS NOT NULL AND sent_at < ?2",
        rusqlite::params![owner, cutoff],
    )?;
    Ok(purged)
}
