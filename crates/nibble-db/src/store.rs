//! The local store: one owned connection plus the atomic mutation API.
//!
//! Every create/update/delete runs in a single transaction that writes the
//! entity row and appends exactly one delta. Either both commit or neither
//! is visible.

use std::path::Path;

use nibble_types::{
    now_ms, Activity, ActivityPatch, Category, CategoryPatch, Delta, DeltaOp, EntityKind,
    NewActivity, NewCategory,
};
use rusqlite::{Connection, Transaction};

use crate::queries::quarantine::QuarantineRow;
use crate::repo::{CursorRepo, DeltaLog};
use crate::{outbox, queries, DbError, Result};

/// Settings key holding this installation's device id.
pub const DEVICE_ID_KEY: &str = "device_id";

/// Result of a local write.
///
/// Receiving one means the outbox has grown; callers hand it to whatever
/// schedules sync instead of syncing inline.
#[derive(Debug, Clone)]
pub struct Mutation<T> {
    pub entity: T,
    pub delta: Delta,
}

/// Owner-scoped local persistence.
pub struct Store {
    conn: Connection,
}

/// Timestamp for a new version of a row: the wall clock, but always strictly
/// after the version it replaces so a backwards clock cannot make a local
/// edit lose to its own predecessor on other replicas.
fn next_version_ts(previous: i64) -> i64 {
    now_ms().max(previous.saturating_add(1))
}

fn live_category(conn: &Connection, owner: &str, id: &str) -> Result<Category> {
    let category = queries::categories::get(conn, owner, id)?;
    if category.is_deleted() {
        return Err(DbError::NotFound(format!("category '{id}'")));
    }
    Ok(category)
}

fn live_activity(conn: &Connection, owner: &str, id: &str) -> Result<Activity> {
    let activity = queries::activities::get(conn, owner, id)?;
    if activity.is_deleted() {
        return Err(DbError::NotFound(format!("activity '{id}'")));
    }
    Ok(activity)
}

impl Store {
    /// Open or create the store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            conn: crate::open(path)?,
        })
    }

    /// In-memory store (for testing).
    pub fn open_memory() -> Result<Self> {
        Ok(Self {
            conn: crate::open_memory()?,
        })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Begin a transaction for multi-step work such as applying a pull page.
    pub fn transaction(&mut self) -> Result<Transaction<'_>> {
        Ok(self.conn.transaction()?)
    }

    /// Stable per-installation device id, created on first use.
    pub fn device_id(&self) -> Result<String> {
        if let Some(id) = queries::settings::get_opt(&self.conn, DEVICE_ID_KEY)? {
            return Ok(id);
        }
        let fresh = uuid::Uuid::new_v4().to_string();
        let id = queries::settings::get_or_insert(&self.conn, DEVICE_ID_KEY, &fresh)?;
        tracing::info!(device_id = %id, "generated device id");
        Ok(id)
    }

    // ---- Categories ----------------------------------------------------

    pub fn create_category(
        &mut self,
        owner: &str,
        device_id: &str,
        input: NewCategory,
    ) -> Result<Mutation<Category>> {
        if input.name.trim().is_empty() {
            return Err(DbError::Constraint("category name must not be empty".into()));
        }
        let now = now_ms();
        let category = Category {
            id: uuid::Uuid::new_v4().to_string(),
            owner: owner.to_string(),
            name: input.name,
            color: input.color,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        let tx = self.conn.transaction()?;
        queries::categories::insert(&tx, &category, device_id)?;
        let delta = outbox::record(
            &tx,
            owner,
            device_id,
            EntityKind::Category,
            &category.id,
            DeltaOp::Upsert,
            &category,
        )?;
        tx.commit()?;

        Ok(Mutation { entity: category, delta })
    }

    pub fn update_category(
        &mut self,
        owner: &str,
        device_id: &str,
        id: &str,
        patch: &CategoryPatch,
    ) -> Result<Mutation<Category>> {
        if patch.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(DbError::Constraint("category name must not be empty".into()));
        }

        let tx = self.conn.transaction()?;
        let mut category = live_category(&tx, owner, id)?;
        patch.apply_to(&mut category);
        category.updated_at = next_version_ts(category.updated_at);

        queries::categories::put(&tx, &category, device_id)?;
        let delta = outbox::record(
            &tx,
            owner,
            device_id,
            EntityKind::Category,
            id,
            DeltaOp::Upsert,
            &category,
        )?;
        tx.commit()?;

        Ok(Mutation { entity: category, delta })
    }

    /// Tombstone a category. The delta carries the full tombstoned snapshot.
    pub fn delete_category(
        &mut self,
        owner: &str,
        device_id: &str,
        id: &str,
    ) -> Result<Mutation<Category>> {
        let tx = self.conn.transaction()?;
        let mut category = live_category(&tx, owner, id)?;
        let ts = next_version_ts(category.updated_at);
        category.updated_at = ts;
        category.deleted_at = Some(ts);

        queries::categories::put(&tx, &category, device_id)?;
        let delta = outbox::record(
            &tx,
            owner,
            device_id,
            EntityKind::Category,
            id,
            DeltaOp::Delete,
            &category,
        )?;
        tx.commit()?;

        Ok(Mutation { entity: category, delta })
    }

    /// Point lookup; tombstones are returned.
    pub fn get_category(&self, owner: &str, id: &str) -> Result<Category> {
        queries::categories::get(&self.conn, owner, id)
    }

    pub fn list_categories(&self, owner: &str) -> Result<Vec<Category>> {
        queries::categories::list(&self.conn, owner)
    }

    // ---- Activities ----------------------------------------------------

    pub fn create_activity(
        &mut self,
        owner: &str,
        device_id: &str,
        app_version: &str,
        input: NewActivity,
    ) -> Result<Mutation<Activity>> {
        let now = now_ms();
        let activity = Activity {
            id: uuid::Uuid::new_v4().to_string(),
            owner: owner.to_string(),
            category_id: input.category_id,
            created_at: now,
            updated_at: now,
            lat: input.lat,
            lng: input.lng,
            app_version: app_version.to_string(),
            description: input.description,
            amount: input.amount,
            score: input.score,
            metadata: input.metadata,
            deleted_at: None,
        };

        let tx = self.conn.transaction()?;
        live_category(&tx, owner, &activity.category_id)?;
        queries::activities::insert(&tx, &activity, device_id)?;
        let delta = outbox::record(
            &tx,
            owner,
            device_id,
            EntityKind::Activity,
            &activity.id,
            DeltaOp::Upsert,
            &activity,
        )?;
        tx.commit()?;

        Ok(Mutation { entity: activity, delta })
    }

    pub fn update_activity(
        &mut self,
        owner: &str,
        device_id: &str,
        app_version: &str,
        id: &str,
        patch: &ActivityPatch,
    ) -> Result<Mutation<Activity>> {
        let tx = self.conn.transaction()?;
        let mut activity = live_activity(&tx, owner, id)?;
        if let Some(category_id) = &patch.category_id {
            live_category(&tx, owner, category_id)?;
        }
        patch.apply_to(&mut activity);
        activity.updated_at = next_version_ts(activity.updated_at);
        activity.app_version = app_version.to_string();

        queries::activities::put(&tx, &activity, device_id)?;
        let delta = outbox::record(
            &tx,
            owner,
            device_id,
            EntityKind::Activity,
            id,
            DeltaOp::Upsert,
            &activity,
        )?;
        tx.commit()?;

        Ok(Mutation { entity: activity, delta })
    }

    pub fn delete_activity(
        &mut self,
        owner: &str,
        device_id: &str,
        id: &str,
    ) -> Result<Mutation<Activity>> {
        let tx = self.conn.transaction()?;
        let mut activity = live_activity(&tx, owner, id)?;
        let ts = next_version_ts(activity.updated_at);
        activity.updated_at = ts;
        activity.deleted_at = Some(ts);

        queries::activities::put(&tx, &activity, device_id)?;
        let delta = outbox::record(
            &tx,
            owner,
            device_id,
            EntityKind::Activity,
            id,
            DeltaOp::Delete,
            &activity,
        )?;
        tx.commit()?;

        Ok(Mutation { entity: activity, delta })
    }

    /// Point lookup; tombstones are returned.
    pub fn get_activity(&self, owner: &str, id: &str) -> Result<Activity> {
        queries::activities::get(&self.conn, owner, id)
    }

    pub fn list_activities(&self, owner: &str, limit: u32) -> Result<Vec<Activity>> {
        queries::activities::list(&self.conn, owner, limit)
    }

    pub fn list_activities_by_category(
        &self,
        owner: &str,
        category_id: &str,
        limit: u32,
    ) -> Result<Vec<Activity>> {
        queries::activities::list_by_category(&self.conn, owner, category_id, limit)
    }

    // ---- Outbox and cursor ---------------------------------------------

    /// Unsent deltas, oldest first.
    pub fn unsent(&self, owner: &str, limit: Option<u32>) -> Result<Vec<Delta>> {
        self.conn.unsent_deltas(owner, limit)
    }

    pub fn unsent_count(&self, owner: &str) -> Result<u64> {
        queries::deltas::count_unsent(&self.conn, owner)
    }

    /// Mark exactly `ids` as acknowledged at `server_seq`. Idempotent.
    pub fn mark_sent(&mut self, ids: &[String], server_seq: i64) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let changed = tx.mark_deltas_sent(ids, server_seq, now_ms())?;
        tx.commit()?;
        Ok(changed)
    }

    /// Create the cursor row for `owner` if this is its first sync.
    pub fn init_sync_state(&self, owner: &str) -> Result<()> {
        queries::sync_state::ensure(&self.conn, owner)
    }

    pub fn cursor(&self, owner: &str) -> Result<i64> {
        self.conn.cursor(owner)
    }

    pub fn quarantined(&self, owner: &str) -> Result<Vec<QuarantineRow>> {
        queries::quarantine::list(&self.conn, owner)
    }

    pub fn quarantined_count(&self, owner: &str) -> Result<u64> {
        queries::quarantine::count(&self.conn, owner)
    }

    /// Delete acknowledged deltas sent before `cutoff`.
    pub fn purge_acknowledged(&self, owner: &str, cutoff: i64) -> Result<usize> {
        let purged = queries::deltas::purge_acknowledged(&self.conn, owner, cutoff)?;
        if purged > 0 {
            tracing::info!(owner, purged, cutoff, "purged acknowledged deltas");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWNER: &str = "yak";
    const DEVICE: &str = "dev-a";

    fn store() -> Store {
        Store::open_memory().expect("open store")
    }

    fn gym(store: &mut Store) -> Category {
        store
            .create_category(
                OWNER,
                DEVICE,
                NewCategory {
                    name: "Gym".into(),
                    color: Some("#00FF00".into()),
                },
            )
            .expect("create category")
            .entity
    }

    fn run(store: &mut Store, category_id: &str) -> Activity {
        store
            .create_activity(
                OWNER,
                DEVICE,
                "1.2.0",
                NewActivity {
                    category_id: category_id.to_string(),
                    lat: Some(0.0),
                    description: Some("5k".into()),
                    amount: Some(5.0),
                    metadata: Some(r#"{"shoes":"old"}"#.into()),
                    ..Default::default()
                },
            )
            .expect("create activity")
            .entity
    }

    #[test]
    fn test_create_category_writes_one_upsert_delta() {
        let mut store = store();
        let mutation = store
            .create_category(OWNER, DEVICE, NewCategory { name: "Gym".into(), color: None })
            .expect("create");

        let unsent = store.unsent(OWNER, None).expect("unsent");
        assert_eq!(unsent.len(), 1);
        assert_eq!(unsent[0].id, mutation.delta.id);
        assert_eq!(unsent[0].op, DeltaOp::Upsert);
        assert_eq!(unsent[0].entity_kind, EntityKind::Category);
        assert_eq!(unsent[0].entity_id, mutation.entity.id);
        assert_eq!(unsent[0].device_id, DEVICE);
    }

    #[test]
    fn test_create_activity_payload_matches_stored_row() {
        let mut store = store();
        let category = gym(&mut store);
        let activity = run(&mut store, &category.id);

        let deltas = queries::deltas::for_entity(store.conn(), &activity.id).expect("deltas");
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].op, DeltaOp::Upsert);

        let decoded: Activity = deltas[0].decode_payload().expect("decode");
        let stored = store.get_activity(OWNER, &activity.id).expect("get");
        assert_eq!(decoded, stored);
        assert_eq!(stored.lat, Some(0.0));
        assert_eq!(stored.app_version, "1.2.0");
    }

    #[test]
    fn test_create_activity_requires_live_category() {
        let mut store = store();
        let result = store.create_activity(
            OWNER,
            DEVICE,
            "1.0.0",
            NewActivity {
                category_id: "missing".into(),
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(DbError::NotFound(_))));
        assert_eq!(store.unsent_count(OWNER).expect("count"), 0);
    }

    #[test]
    fn test_update_bumps_version_and_records_delta() {
        let mut store = store();
        let category = gym(&mut store);

        let patch = CategoryPatch {
            name: Some("Weights".into()),
            color: Some(None),
        };
        let updated = store
            .update_category(OWNER, DEVICE, &category.id, &patch)
            .expect("update")
            .entity;

        assert!(updated.updated_at > category.updated_at);
        assert_eq!(updated.created_at, category.created_at);
        assert_eq!(updated.color, None);
        assert_eq!(store.unsent_count(OWNER).expect("count"), 2);
    }

    #[test]
    fn test_soft_delete_activity() {
        let mut store = store();
        let category = gym(&mut store);
        let activity = run(&mut store, &category.id);

        let deleted = store
            .delete_activity(OWNER, DEVICE, &activity.id)
            .expect("delete")
            .entity;
        let ts = deleted.deleted_at.expect("tombstoned");

        assert!(store.list_activities(OWNER, 100).expect("list").is_empty());
        let fetched = store.get_activity(OWNER, &activity.id).expect("get");
        assert_eq!(fetched.deleted_at, Some(ts));

        let deltas = queries::deltas::for_entity(store.conn(), &activity.id).expect("deltas");
        assert_eq!(deltas.last().map(|d| d.op), Some(DeltaOp::Delete));
        let payload: Activity = deltas[1].decode_payload().expect("decode");
        assert_eq!(payload.deleted_at, Some(ts));
    }

    #[test]
    fn test_mutating_tombstone_is_not_found() {
        let mut store = store();
        let category = gym(&mut store);
        store
            .delete_category(OWNER, DEVICE, &category.id)
            .expect("delete");

        let patch = CategoryPatch {
            name: Some("Back".into()),
            ..Default::default()
        };
        assert!(matches!(
            store.update_category(OWNER, DEVICE, &category.id, &patch),
            Err(DbError::NotFound(_))
        ));
        assert!(matches!(
            store.delete_category(OWNER, DEVICE, &category.id),
            Err(DbError::NotFound(_))
        ));
        assert_eq!(store.unsent_count(OWNER).expect("count"), 2);
    }

    #[test]
    fn test_other_owner_cannot_mutate() {
        let mut store = store();
        let category = gym(&mut store);
        assert!(matches!(
            store.delete_category("ox", DEVICE, &category.id),
            Err(DbError::NotFound(_))
        ));
    }

    #[test]
    fn test_failed_delta_insert_rolls_back_entity() {
        let mut store = store();
        store
            .conn()
            .execute_batch(
                "CREATE TRIGGER reject_deltas BEFORE INSERT ON deltas
                 BEGIN SELECT RAISE(ABORT, 'outbox unavailable'); END;",
            )
            .expect("install trigger");

        let result =
            store.create_category(OWNER, DEVICE, NewCategory { name: "Gym".into(), color: None });
        assert!(result.is_err());
        assert!(store.list_categories(OWNER).expect("list").is_empty());
        assert_eq!(store.unsent_count(OWNER).expect("count"), 0);
    }

    #[test]
    fn test_failed_update_leaves_previous_version() {
        let mut store = store();
        let category = gym(&mut store);
        store
            .conn()
            .execute_batch(
                "CREATE TRIGGER reject_deltas BEFORE INSERT ON deltas
                 BEGIN SELECT RAISE(ABORT, 'outbox unavailable'); END;",
            )
            .expect("install trigger");

        let patch = CategoryPatch {
            name: Some("Weights".into()),
            ..Default::default()
        };
        assert!(store.update_category(OWNER, DEVICE, &category.id, &patch).is_err());
        assert_eq!(store.get_category(OWNER, &category.id).expect("get"), category);
    }

    #[test]
    fn test_empty_name_rejected() {
        let mut store = store();
        let result =
            store.create_category(OWNER, DEVICE, NewCategory { name: "  ".into(), color: None });
        assert!(matches!(result, Err(DbError::Constraint(_))));
    }

    #[test]
    fn test_device_id_is_stable() {
        let store = store();
        let first = store.device_id().expect("device id");
        let second = store.device_id().expect("device id");
        assert_eq!(first, second);
        assert!(uuid::Uuid::parse_str(&first).is_ok());
    }

    #[test]
    fn test_device_id_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nibble.db");
        let first = Store::open(&path).expect("open").device_id().expect("id");
        let second = Store::open(&path).expect("reopen").device_id().expect("id");
        assert_eq!(first, second);
    }

    #[test]
    fn test_mark_sent_twice_same_state() {
        let mut store = store();
        let mutation = store
            .create_category(OWNER, DEVICE, NewCategory { name: "Gym".into(), color: None })
            .expect("create");
        let ids = vec![mutation.delta.id.clone()];

        assert_eq!(store.mark_sent(&ids, 4).expect("mark"), 1);
        let once = queries::deltas::get(store.conn(), &ids[0]).expect("get");
        assert_eq!(store.mark_sent(&ids, 4).expect("mark again"), 0);
        let twice = queries::deltas::get(store.conn(), &ids[0]).expect("get");

        assert_eq!(once, twice);
        assert!(store.unsent(OWNER, None).expect("unsent").is_empty());
    }

    #[test]
    fn test_list_activities_by_category() {
        let mut store = store();
        let category = gym(&mut store);
        let other = store
            .create_category(OWNER, DEVICE, NewCategory { name: "Read".into(), color: None })
            .expect("create")
            .entity;
        run(&mut store, &category.id);
        run(&mut store, &other.id);

        let rows = store
            .list_activities_by_category(OWNER, &category.id, 10)
            .expect("list");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].category_id, category.id);
    }
}
