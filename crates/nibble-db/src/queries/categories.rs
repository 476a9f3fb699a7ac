//! Category query functions.

use nibble_types::Category;
use rusqlite::{Connection, OptionalExtension, Row};

use crate::{DbError, Result, Stored};

const COLUMNS: &str =
    "id, owner, name, color, created_at, updated_at, deleted_at, origin_device";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Stored<Category>> {
    Ok(Stored {
        entity: Category {
            id: row.get(0)?,
            owner: row.get(1)?,
            name: row.get(2)?,
            color: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
            deleted_at: row.get(6)?,
        },
        origin_device: row.get(7)?,
    })
}

/// Insert a new category. Fails if the id already exists.
pub fn insert(conn: &Connection, category: &Category, origin_device: &str) -> Result<()> {
    conn.execute(
        &format!("INSERT INTO categories ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
        rusqlite::params![
            category.id,
            category.owner,
            category.name,
            category.color,
            category.created_at,
            category.updated_at,
            category.deleted_at,
            origin_device,
        ],
    )?;
    Ok(())
}

/// Insert a category or overwrite every column of the existing row.
pub fn put(conn: &Connection, category: &Category, origin_device: &str) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO categories ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                owner = excluded.owner,
                name = excluded.name,
                color = excluded.color,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                deleted_at = excluded.deleted_at,
                origin_device = excluded.origin_device"
        ),
        rusqlite::params![
            category.id,
            category.owner,
            category.name,
            category.color,
            category.created_at,
            category.updated_at,
            category.deleted_at,
            origin_device,
        ],
    )?;
    Ok(())
}

/// Look up a category by id regardless of owner or tombstone state.
pub fn find(conn: &Connection, id: &str) -> Result<Option<Stored<Category>>> {
    let row = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM categories WHERE id = ?1"),
            [id],
            from_row,
        )
        .optional()?;
    Ok(row)
}

/// Get an owner's category by id, tombstones included.
pub fn get(conn: &Connection, owner: &str, id: &str) -> Result<Category> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM categories WHERE id = ?1 AND owner = ?2"),
        [id, owner],
        from_row,
    )
    .map(|stored| stored.entity)
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => DbError::NotFound(format!("category '{id}'")),
        other => DbError::Sqlite(other),
    })
}

/// List an owner's live categories ordered by name.
pub fn list(conn: &Connection, owner: &str) -> Result<Vec<Category>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM categories
         WHERE owner = ?1 AND deleted_at IS NULL
         ORDER BY name, id"
    ))?;

    let rows = stmt
        .query_map([owner], |row| from_row(row).map(|stored| stored.entity))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}
