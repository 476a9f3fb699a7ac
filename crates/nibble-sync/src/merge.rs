//! Deterministic last-write-wins merge of remote deltas.
//!
//! A version is ordered by `(updated_at, origin_device, canonical JSON)`.
//! An incoming version replaces the stored one only if it is strictly
//! greater, so every replica that sees the same set of deltas settles on the
//! same row regardless of arrival order, and re-applying a delta is a no-op.

use std::cmp::Ordering;

use nibble_db::{ActivityRepo, CategoryRepo, DbError, Stored};
use nibble_types::{Activity, Category, Delta, DeltaOp, EntityKind};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

/// Storage the merge engine reads and writes.
pub trait EntityRepo: CategoryRepo + ActivityRepo {}

impl<R: CategoryRepo + ActivityRepo + ?Sized> EntityRepo for R {}

/// What happened to the local row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// No local row existed.
    Inserted,
    /// The incoming version won.
    Replaced,
    /// The local version won or was identical.
    Kept,
}

impl MergeOutcome {
    pub fn changed(self) -> bool {
        !matches!(self, MergeOutcome::Kept)
    }
}

/// Why a delta could not be applied.
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    /// The delta itself is unusable. Callers quarantine it.
    #[error("malformed delta: {0}")]
    Malformed(String),

    /// The store failed. Callers abort and roll back.
    #[error(transparent)]
    Persistence(#[from] DbError),
}

/// An entity type that travels through the delta log.
pub trait Syncable: Serialize + DeserializeOwned {
    const KIND: EntityKind;

    fn id(&self) -> &str;

    fn owner(&self) -> &str;

    fn updated_at(&self) -> i64;

    /// Minimal row every tombstone is built on.
    fn skeleton(id: &str, owner: &str, ts: i64) -> Self;

    fn find<R: EntityRepo + ?Sized>(repo: &R, id: &str) -> Result<Option<Stored<Self>>, DbError>;

    fn put<R: EntityRepo + ?Sized>(
        repo: &R,
        entity: &Self,
        origin_device: &str,
    ) -> Result<(), DbError>;
}

impl Syncable for Category {
    const KIND: EntityKind = EntityKind::Category;

    fn id(&self) -> &str {
        &self.id
    }

    fn owner(&self) -> &str {
        &self.owner
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn skeleton(id: &str, owner: &str, ts: i64) -> Self {
        Category {
            id: id.to_string(),
            owner: owner.to_string(),
            name: String::new(),
            color: None,
            created_at: ts,
            updated_at: ts,
            deleted_at: None,
        }
    }

    fn find<R: EntityRepo + ?Sized>(repo: &R, id: &str) -> Result<Option<Stored<Self>>, DbError> {
        repo.find_category(id)
    }

    fn put<R: EntityRepo + ?Sized>(
        repo: &R,
        entity: &Self,
        origin_device: &str,
    ) -> Result<(), DbError> {
        repo.put_category(entity, origin_device)
    }
}

impl Syncable for Activity {
    const KIND: EntityKind = EntityKind::Activity;

    fn id(&self) -> &str {
        &self.id
    }

    fn owner(&self) -> &str {
        &self.owner
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn skeleton(id: &str, owner: &str, ts: i64) -> Self {
        Activity {
            id: id.to_string(),
            owner: owner.to_string(),
            category_id: String::new(),
            created_at: ts,
            updated_at: ts,
            lat: None,
            lng: None,
            app_version: String::new(),
            description: None,
            amount: None,
            score: None,
            metadata: None,
            deleted_at: None,
        }
    }

    fn find<R: EntityRepo + ?Sized>(repo: &R, id: &str) -> Result<Option<Stored<Self>>, DbError> {
        repo.find_activity(id)
    }

    fn put<R: EntityRepo + ?Sized>(
        repo: &R,
        entity: &Self,
        origin_device: &str,
    ) -> Result<(), DbError> {
        repo.put_activity(entity, origin_device)
    }
}

fn canonical<T: Serialize>(entity: &T) -> Result<String, DbError> {
    Ok(serde_json::to_string(entity)?)
}

/// Total order over stored versions.
fn compare<T: Syncable>(
    incoming: &T,
    incoming_origin: &str,
    local: &Stored<T>,
) -> Result<Ordering, DbError> {
    let ordering = incoming
        .updated_at()
        .cmp(&local.entity.updated_at())
        .then_with(|| incoming_origin.cmp(local.origin_device.as_str()));
    match ordering {
        Ordering::Equal => Ok(canonical(incoming)?.cmp(&canonical(&local.entity)?)),
        decided => Ok(decided),
    }
}

/// Merge one incoming version into the store.
pub fn merge<T: Syncable, R: EntityRepo + ?Sized>(
    repo: &R,
    incoming: &T,
    origin_device: &str,
) -> Result<MergeOutcome, DbError> {
    let Some(local) = T::find(repo, incoming.id())? else {
        T::put(repo, incoming, origin_device)?;
        return Ok(MergeOutcome::Inserted);
    };

    if compare(incoming, origin_device, &local)? == Ordering::Greater {
        T::put(repo, incoming, origin_device)?;
        Ok(MergeOutcome::Replaced)
    } else {
        Ok(MergeOutcome::Kept)
    }
}

pub fn merge_category<R: EntityRepo + ?Sized>(
    repo: &R,
    incoming: &Category,
    origin_device: &str,
) -> Result<MergeOutcome, DbError> {
    merge(repo, incoming, origin_device)
}

pub fn merge_activity<R: EntityRepo + ?Sized>(
    repo: &R,
    incoming: &Activity,
    origin_device: &str,
) -> Result<MergeOutcome, DbError> {
    merge(repo, incoming, origin_device)
}

/// Apply a pulled delta.
///
/// Owner and sequence checks belong to the caller; this only validates that
/// the payload describes the entity the delta names.
pub fn apply_delta<R: EntityRepo + ?Sized>(
    repo: &R,
    delta: &Delta,
) -> Result<MergeOutcome, ApplyError> {
    match delta.entity_kind {
        EntityKind::Category => apply_as::<Category, R>(repo, delta),
        EntityKind::Activity => apply_as::<Activity, R>(repo, delta),
    }
}

fn apply_as<T: Syncable, R: EntityRepo + ?Sized>(
    repo: &R,
    delta: &Delta,
) -> Result<MergeOutcome, ApplyError> {
    let incoming: T = match delta.op {
        DeltaOp::Upsert => delta
            .decode_payload()
            .map_err(|e| ApplyError::Malformed(format!("{} payload: {e}", T::KIND)))?,
        DeltaOp::Delete => tombstone::<T>(delta)?,
    };

    if incoming.id() != delta.entity_id {
        return Err(ApplyError::Malformed(format!(
            "payload id '{}' does not match entity_id '{}'",
            incoming.id(),
            delta.entity_id
        )));
    }
    if incoming.owner() != delta.owner {
        return Err(ApplyError::Malformed(format!(
            "payload owner '{}' does not match delta owner",
            incoming.owner()
        )));
    }

    Ok(merge(repo, &incoming, &delta.device_id)?)
}

/// Build the tombstone a delete delta describes.
///
/// Payload fields are laid over a skeleton, never over the stored row, so the
/// tombstone depends only on the delta and every replica builds the same one.
/// A missing `deleted_at` falls back to the delta's `local_ts`, and a missing
/// `updated_at` to `deleted_at`.
fn tombstone<T: Syncable>(delta: &Delta) -> Result<T, ApplyError> {
    let overlay = delta
        .payload
        .as_object()
        .ok_or_else(|| ApplyError::Malformed("delete payload is not an object".into()))?;

    let deleted_at = overlay
        .get("deleted_at")
        .and_then(Value::as_i64)
        .unwrap_or(delta.local_ts);
    let updated_at = overlay
        .get("updated_at")
        .and_then(Value::as_i64)
        .unwrap_or(deleted_at);

    let base = T::skeleton(&delta.entity_id, &delta.owner, deleted_at);

    let mut fields = match serde_json::to_value(&base).map_err(DbError::from)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    for (key, value) in overlay {
        fields.insert(key.clone(), value.clone());
    }
    fields.remove("user_id");
    fields.insert("owner".into(), Value::from(delta.owner.clone()));
    fields.insert("deleted_at".into(), Value::from(deleted_at));
    fields.insert("updated_at".into(), Value::from(updated_at));

    serde_json::from_value(Value::Object(fields))
        .map_err(|e| ApplyError::Malformed(format!("{} tombstone: {e}", T::KIND)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;
    use serde_json::json;

    const OWNER: &str = "yak";

    fn test_db() -> Connection {
        nibble_db::open_memory().expect("open test db")
    }

    fn category(name: &str, updated_at: i64) -> Category {
        Category {
            id: "c1".into(),
            owner: OWNER.into(),
            name: name.into(),
            color: None,
            created_at: 100,
            updated_at,
            deleted_at: None,
        }
    }

    fn delta(id: &str, device: &str, op: DeltaOp, payload: Value, local_ts: i64) -> Delta {
        Delta {
            id: id.into(),
            owner: OWNER.into(),
            device_id: device.into(),
            entity_kind: EntityKind::Category,
            entity_id: "c1".into(),
            op,
            payload,
            local_ts,
            sent_at: None,
            server_seq: Some(1),
        }
    }

    fn stored_name(conn: &Connection) -> String {
        conn.find_category("c1")
            .expect("find")
            .expect("present")
            .entity
            .name
    }

    #[test]
    fn test_insert_when_absent() {
        let conn = test_db();
        let outcome = merge_category(&conn, &category("Gym", 200), "dev-b").expect("merge");
        assert_eq!(outcome, MergeOutcome::Inserted);
        assert_eq!(stored_name(&conn), "Gym");
    }

    #[test]
    fn test_newer_wins_older_loses() {
        let conn = test_db();
        merge_category(&conn, &category("Gym", 200), "dev-a").expect("merge");

        let older = merge_category(&conn, &category("Old", 150), "dev-b").expect("merge");
        assert_eq!(older, MergeOutcome::Kept);
        assert_eq!(stored_name(&conn), "Gym");

        let newer = merge_category(&conn, &category("New", 250), "dev-b").expect("merge");
        assert_eq!(newer, MergeOutcome::Replaced);
        assert_eq!(stored_name(&conn), "New");
    }

    #[test]
    fn test_equal_timestamps_break_on_origin_device() {
        let conn = test_db();
        merge_category(&conn, &category("FromB", 200), "dev-b").expect("merge");

        let lower = merge_category(&conn, &category("FromA", 200), "dev-a").expect("merge");
        assert_eq!(lower, MergeOutcome::Kept);

        let higher = merge_category(&conn, &category("FromC", 200), "dev-c").expect("merge");
        assert_eq!(higher, MergeOutcome::Replaced);
        assert_eq!(stored_name(&conn), "FromC");
    }

    #[test]
    fn test_equal_timestamp_and_origin_break_on_content() {
        let conn = test_db();
        merge_category(&conn, &category("Alpha", 200), "dev-a").expect("merge");
        let outcome = merge_category(&conn, &category("Beta", 200), "dev-a").expect("merge");
        assert_eq!(outcome, MergeOutcome::Replaced);
        assert_eq!(stored_name(&conn), "Beta");
    }

    #[test]
    fn test_identical_version_is_noop() {
        let conn = test_db();
        merge_category(&conn, &category("Gym", 200), "dev-a").expect("merge");
        let outcome = merge_category(&conn, &category("Gym", 200), "dev-a").expect("merge");
        assert_eq!(outcome, MergeOutcome::Kept);
    }

    #[test]
    fn test_order_independent_convergence() {
        let versions = [
            (category("One", 300), "dev-a"),
            (category("Two", 300), "dev-b"),
            (category("Three", 100), "dev-c"),
            (category("Four", 299), "dev-z"),
        ];

        let forward = test_db();
        for (v, origin) in versions.iter() {
            merge_category(&forward, v, origin).expect("merge");
        }
        let backward = test_db();
        for (v, origin) in versions.iter().rev() {
            merge_category(&backward, v, origin).expect("merge");
        }

        assert_eq!(stored_name(&forward), "Two");
        assert_eq!(
            forward.find_category("c1").expect("find"),
            backward.find_category("c1").expect("find")
        );
    }

    #[test]
    fn test_upsert_delta_applies_snapshot() {
        let conn = test_db();
        let payload = serde_json::to_value(category("Gym", 200)).expect("json");
        let outcome =
            apply_delta(&conn, &delta("d1", "dev-b", DeltaOp::Upsert, payload, 200)).expect("apply");
        assert_eq!(outcome, MergeOutcome::Inserted);

        let stored = conn.find_category("c1").expect("find").expect("present");
        assert_eq!(stored.origin_device, "dev-b");
    }

    #[test]
    fn test_upsert_accepts_legacy_user_id() {
        let conn = test_db();
        let payload = json!({
            "id": "c1", "user_id": OWNER, "name": "Gym", "color": null,
            "created_at": 1, "updated_at": 1, "deleted_at": null
        });
        apply_delta(&conn, &delta("d1", "dev-b", DeltaOp::Upsert, payload, 1)).expect("apply");
        assert_eq!(stored_name(&conn), "Gym");
    }

    #[test]
    fn test_upsert_with_partial_payload_is_malformed() {
        let conn = test_db();
        let result = apply_delta(
            &conn,
            &delta("d1", "dev-b", DeltaOp::Upsert, json!({"name": "Gym"}), 1),
        );
        assert!(matches!(result, Err(ApplyError::Malformed(_))));
        assert!(conn.find_category("c1").expect("find").is_none());
    }

    #[test]
    fn test_upsert_with_mismatched_id_is_malformed() {
        let conn = test_db();
        let mut other = category("Gym", 1);
        other.id = "c2".into();
        let payload = serde_json::to_value(other).expect("json");
        let result = apply_delta(&conn, &delta("d1", "dev-b", DeltaOp::Upsert, payload, 1));
        assert!(matches!(result, Err(ApplyError::Malformed(_))));
    }

    #[test]
    fn test_delete_with_full_snapshot() {
        let conn = test_db();
        merge_category(&conn, &category("Gym", 200), "dev-a").expect("merge");

        let mut gone = category("Gym", 300);
        gone.deleted_at = Some(300);
        let payload = serde_json::to_value(gone).expect("json");
        let outcome =
            apply_delta(&conn, &delta("d2", "dev-b", DeltaOp::Delete, payload, 300)).expect("apply");
        assert_eq!(outcome, MergeOutcome::Replaced);

        let stored = conn.find_category("c1").expect("find").expect("present");
        assert_eq!(stored.entity.deleted_at, Some(300));
    }

    #[test]
    fn test_partial_delete_ignores_local_row() {
        let conn = test_db();
        merge_category(&conn, &category("Gym", 200), "dev-a").expect("merge");

        let outcome = apply_delta(
            &conn,
            &delta("d2", "dev-b", DeltaOp::Delete, json!({"id": "c1"}), 500),
        )
        .expect("apply");
        assert_eq!(outcome, MergeOutcome::Replaced);

        let stored = conn.find_category("c1").expect("find").expect("present");
        assert_eq!(stored.entity.name, "");
        assert_eq!(stored.entity.created_at, 500);
        assert_eq!(stored.entity.deleted_at, Some(500));
        assert_eq!(stored.entity.updated_at, 500);
    }

    #[test]
    fn test_partial_delete_converges_in_either_order() {
        let upsert = delta(
            "d1",
            "dev-a",
            DeltaOp::Upsert,
            serde_json::to_value(category("Gym", 200)).expect("json"),
            200,
        );
        let delete = delta(
            "d2",
            "dev-b",
            DeltaOp::Delete,
            json!({"deleted_at": 500}),
            500,
        );

        let upsert_first = test_db();
        apply_delta(&upsert_first, &upsert).expect("upsert");
        apply_delta(&upsert_first, &delete).expect("delete");

        let delete_first = test_db();
        apply_delta(&delete_first, &delete).expect("delete");
        let late = apply_delta(&delete_first, &upsert).expect("upsert");
        assert_eq!(late, MergeOutcome::Kept);

        let x = upsert_first.find_category("c1").expect("find");
        let y = delete_first.find_category("c1").expect("find");
        assert_eq!(x, y);
        assert!(x.expect("present").entity.is_deleted());
    }

    #[test]
    fn test_partial_delete_without_local_row_creates_tombstone() {
        let conn = test_db();
        apply_delta(&conn, &delta("d1", "dev-b", DeltaOp::Delete, json!({}), 700)).expect("apply");

        let stored = conn.find_category("c1").expect("find").expect("present");
        assert_eq!(stored.entity.owner, OWNER);
        assert_eq!(stored.entity.deleted_at, Some(700));
    }

    #[test]
    fn test_stale_delete_loses_to_newer_edit() {
        let conn = test_db();
        merge_category(&conn, &category("Renamed", 900), "dev-a").expect("merge");

        let outcome = apply_delta(
            &conn,
            &delta("d2", "dev-b", DeltaOp::Delete, json!({"deleted_at": 500}), 500),
        )
        .expect("apply");
        assert_eq!(outcome, MergeOutcome::Kept);
        let stored = conn.find_category("c1").expect("find").expect("present");
        assert!(!stored.entity.is_deleted());
    }

    #[test]
    fn test_delete_payload_must_be_object() {
        let conn = test_db();
        let result = apply_delta(&conn, &delta("d1", "dev-b", DeltaOp::Delete, json!(42), 1));
        assert!(matches!(result, Err(ApplyError::Malformed(_))));
    }

    #[test]
    fn test_activity_delta() {
        let conn = test_db();
        let activity = Activity {
            id: "a1".into(),
            owner: OWNER.into(),
            category_id: "c1".into(),
            created_at: 10,
            updated_at: 10,
            lat: Some(1.5),
            lng: None,
            app_version: "1.0.0".into(),
            description: Some("run".into()),
            amount: Some(5.0),
            score: None,
            metadata: None,
            deleted_at: None,
        };
        let mut d = delta(
            "d1",
            "dev-b",
            DeltaOp::Upsert,
            serde_json::to_value(&activity).expect("json"),
            10,
        );
        d.entity_kind = EntityKind::Activity;
        d.entity_id = "a1".into();

        apply_delta(&conn, &d).expect("apply");
        let again = apply_delta(&conn, &d).expect("reapply");
        assert_eq!(again, MergeOutcome::Kept);

        let stored = conn.find_activity("a1").expect("find").expect("present");
        assert_eq!(stored.entity, activity);
    }
}
