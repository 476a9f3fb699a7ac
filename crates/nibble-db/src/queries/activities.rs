//! Activity query functions.

use nibble_types::Activity;
use rusqlite::{Connection, OptionalExtension, Row};

use crate::{DbError, Result, Stored};

const COLUMNS: &str = "id, owner, category_id, created_at, updated_at, lat, lng, app_version, \
                       description, amount, score, metadata, deleted_at, origin_device";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Stored<Activity>> {
    Ok(Stored {
        entity: Activity {
            id: row.get(0)?,
            owner: row.get(1)?,
            category_id: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
            lat: row.get(5)?,
            lng: row.get(6)?,
            app_version: row.get(7)?,
            description: row.get(8)?,
            amount: row.get(9)?,
            score: row.get(10)?,
            metadata: row.get(11)?,
            deleted_at: row.get(12)?,
        },
        origin_device: row.get(13)?,
    })
}

fn execute_write(conn: &Connection, sql: &str, activity: &Activity, origin: &str) -> Result<()> {
    conn.execute(
        sql,
        rusqlite::params![
            activity.id,
            activity.owner,
            activity.category_id,
            activity.created_at,
            activity.updated_at,
            activity.lat,
            activity.lng,
            activity.app_version,
            activity.description,
            activity.amount,
            activity.score,
            activity.metadata,
            activity.deleted_at,
            origin,
        ],
    )?;
    Ok(())
}

/// Insert a new activity. Fails if the id already exists.
pub fn insert(conn: &Connection, activity: &Activity, origin_device: &str) -> Result<()> {
    execute_write(
        conn,
        &format!(
            "INSERT INTO activities ({COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
        ),
        activity,
        origin_device,
    )
}

/// Insert an activity or overwrite every column of the existing row.
pub fn put(conn: &Connection, activity: &Activity, origin_device: &str) -> Result<()> {
    execute_write(
        conn,
        &format!(
            "INSERT INTO activities ({COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT(id) DO UPDATE SET
                owner = excluded.owner,
                category_id = excluded.category_id,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                lat = excluded.lat,
                lng = excluded.lng,
                app_version = excluded.app_version,
                description = excluded.description,
                amount = excluded.amount,
                score = excluded.score,
                metadata = excluded.metadata,
                deleted_at = excluded.deleted_at,
                origin_device = excluded.origin_device"
        ),
        activity,
        origin_device,
    )
}

/// Look up an activity by id regardless of owner or tombstone state.
pub fn find(conn: &Connection, id: &str) -> Result<Option<Stored<Activity>>> {
    let row = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM activities WHERE id = ?1"),
            [id],
            from_row,
        )
        .optional()?;
    Ok(row)
}

/// Get an owner's activity by id, tombstones included.
pub fn get(conn: &Connection, owner: &str, id: &str) -> Result<Activity> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM activities WHERE id = ?1 AND owner = ?2"),
        [id, owner],
        from_row,
    )
    .map(|stored| stored.entity)
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => DbError::NotFound(format!("activity '{id}'")),
        other => DbError::Sqlite(other),
    })
}

/// List an owner's live activities, newest first.
pub fn list(conn: &Connection, owner: &str, limit: u32) -> Result<Vec<Activity>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM activities
         WHERE owner = ?1 AND deleted_at IS NULL
         ORDER BY created_at DESC, id
         LIMIT ?2"
    ))?;

    let rows = stmt
        .query_map(rusqlite::params![owner, limit], |row| {
            from_row(row).map(|stored| stored.entity)
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// List an owner's live activities in one category, newest first.
pub fn list_by_category(
    conn: &Connection,
    owner: &str,
    category_id: &str,
    limit: u32,
) -> Result<Vec<Activity>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM activities
         WHERE owner = ?1 AND category_id = ?2 AND deleted_at IS NULL
         ORDER BY created_at DESC, id
         LIMIT ?3"
    ))?;

    let rows = stmt
        .query_map(rusqlite::params![owner, category_id, limit], |row| {
            from_row(row).map(|stored| stored.entity)
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}
