//! Per-owner sync cursor.

use rusqlite::Connection;

use crate::Result;

/// Create the cursor row for an owner if it does not exist yet.
pub fn ensure(conn: &Connection, owner: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO sync_state (owner, last_server_seq) VALUES (?1, 0)",
        [owner],
    )?;
    Ok(())
}

/// Current cursor for an owner, 0 if never synced.
pub fn get(conn: &Connection, owner: &str) -> Result<i64> {
    let seq: i64 = conn
        .query_row(
            "SELECT last_server_seq FROM sync_state WHERE owner = ?1",
            [owner],
            |row| row.get(0),
        )
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(0),
            other => Err(other),
        })?;
    Ok(seq)
}

/// Move the cursor forward to `seq`. Never moves it backwards.
///
/// Returns `true` if the stored cursor changed.
pub fn advance(conn: &Connection, owner: &str, seq: i64) -> Result<bool> {
    let changed = conn.execute(
        "INSERT INTO sync_state (owner, last_server_seq) VALUES (?1, ?2)
         ON CONFLICT(owner) DO UPDATE SET last_server_seq = excluded.last_server_seq
         WHERE excluded.last_server_seq > sync_state.last_server_seq",
        rusqlite::params![owner, seq],
    )?;
    Ok(changed > 0)
}
