//! Typed storage interfaces, one per persisted collection.
//!
//! The merge engine and orchestrator are written against these traits. The
//! SQLite backend implements them on [`rusqlite::Connection`], so they are
//! usable both on a bare connection and inside a transaction (which derefs
//! to one).

use nibble_types::{Activity, Category, Delta};
use rusqlite::Connection;

use crate::{queries, Result, Stored};

/// Category rows.
pub trait CategoryRepo {
    /// Lookup by id only; tombstones are returned.
    fn find_category(&self, id: &str) -> Result<Option<Stored<Category>>>;

    /// Insert or fully replace a category row.
    fn put_category(&self, category: &Category, origin_device: &str) -> Result<()>;
}

/// Activity rows.
pub trait ActivityRepo {
    fn find_activity(&self, id: &str) -> Result<Option<Stored<Activity>>>;

    fn put_activity(&self, activity: &Activity, origin_device: &str) -> Result<()>;
}

/// The append-only delta log.
pub trait DeltaLog {
    fn append_delta(&self, delta: &Delta) -> Result<()>;

    fn unsent_deltas(&self, owner: &str, limit: Option<u32>) -> Result<Vec<Delta>>;

    /// Idempotent: already-sent ids are left as they are.
    fn mark_deltas_sent(&self, ids: &[String], server_seq: i64, sent_at: i64) -> Result<usize>;
}

/// The per-owner pull cursor.
pub trait CursorRepo {
    fn cursor(&self, owner: &str) -> Result<i64>;

    /// Monotonic: returns `false` and changes nothing if `seq` is not ahead.
    fn advance_cursor(&self, owner: &str, seq: i64) -> Result<bool>;
}

impl CategoryRepo for Connection {
    fn find_category(&self, id: &str) -> Result<Option<Stored<Category>>> {
        queries::categories::find(self, id)
    }

    fn put_category(&self, category: &Category, origin_device: &str) -> Result<()> {
        queries::categories::put(self, category, origin_device)
    }
}

impl ActivityRepo for Connection {
    fn find_activity(&self, id: &str) -> Result<Option<Stored<Activity>>> {
        queries::activities::find(self, id)
    }

    fn put_activity(&self, activity: &Activity, origin_device: &str) -> Result<()> {
        queries::activities::put(self, activity, origin_device)
    }
}

impl DeltaLog for Connection {
    fn append_delta(&self, delta: &Delta) -> Result<()> {
        queries::deltas::insert(self, delta)
    }

    fn unsent_deltas(&self, owner: &str, limit: Option<u32>) -> Result<Vec<Delta>> {
        queries::deltas::unsent(self, owner, limit)
    }

    fn mark_deltas_sent(&self, ids: &[String], server_seq: i64, sent_at: i64) -> Result<usize> {
        queries::deltas::mark_sent(self, ids, server_seq, sent_at)
    }
}

impl CursorRepo for Connection {
    fn cursor(&self, owner: &str) -> Result<i64> {
        queries::sync_state::get(self, owner)
    }

    fn advance_cursor(&self, owner: &str, seq: i64) -> Result<bool> {
        queries::sync_state::advance(self, owner, seq)
    }
}
