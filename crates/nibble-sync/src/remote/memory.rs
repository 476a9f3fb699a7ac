//! In-process sync authority.
//!
//! Implements the same contract as the HTTP authority: a global sequence,
//! at-most-once storage per delta id, owner-scoped pulls in pages. Faults
//! can be armed to exercise the engine's failure paths.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use nibble_types::wire::{PullRequest, PullResponse, PushRequest, PushResponse};
use nibble_types::{Delta, PULL_PAGE_LIMIT};
use serde_json::Value;
use tokio::sync::Mutex;

use super::RemoteSync;
use crate::auth::Credentials;
use crate::{Result, SyncError};

struct Entry {
    seq: i64,
    owner: String,
    raw: Value,
}

#[derive(Default)]
struct Faults {
    /// Fail the next push before storing anything.
    push_before_store: bool,
    /// Store the next push, then fail as if the response was lost.
    push_after_store: bool,
    /// Leave this many trailing ids out of the next ack.
    withhold_acks: usize,
    fail_pull: bool,
}

struct Authority {
    log: Vec<Entry>,
    ids: HashSet<String>,
    tokens: HashMap<String, String>,
    page_limit: usize,
    faults: Faults,
    pushes: usize,
}

impl Authority {
    fn owner_for(&self, auth: &Credentials) -> Result<String> {
        self.tokens
            .get(&auth.token)
            .cloned()
            .ok_or_else(|| SyncError::Network("HTTP 401: Invalid authentication credentials".into()))
    }

    fn append(&mut self, owner: &str, mut raw: Value) -> i64 {
        let seq = self.log.last().map_or(1, |e| e.seq + 1);
        if let Value::Object(map) = &mut raw {
            map.insert("server_seq".into(), Value::from(seq));
            map.remove("sent_at");
        }
        self.log.push(Entry {
            seq,
            owner: owner.to_string(),
            raw,
        });
        seq
    }

    fn last_seq_for(&self, owner: &str) -> i64 {
        self.log
            .iter()
            .rev()
            .find(|e| e.owner == owner)
            .map_or(0, |e| e.seq)
    }
}

pub struct MemoryRemote {
    inner: Mutex<Authority>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Authority {
                log: Vec::new(),
                ids: HashSet::new(),
                tokens: HashMap::new(),
                page_limit: PULL_PAGE_LIMIT,
                faults: Faults::default(),
                pushes: 0,
            }),
        }
    }

    /// Smaller pages, to exercise multi-page pulls.
    pub async fn with_page_limit(self, limit: usize) -> Self {
        self.inner.lock().await.page_limit = limit.max(1);
        self
    }

    /// Accept `token` as authenticating `owner`. Returns matching credentials.
    pub async fn register(&self, token: &str, owner: &str) -> Credentials {
        self.inner
            .lock()
            .await
            .tokens
            .insert(token.to_string(), owner.to_string());
        Credentials::new(token, owner)
    }

    /// Store a raw delta as if another client had pushed it, bypassing all
    /// validation. Returns its sequence number.
    pub async fn inject_raw(&self, owner: &str, raw: Value) -> i64 {
        let mut authority = self.inner.lock().await;
        if let Some(id) = raw.get("id").and_then(Value::as_str) {
            authority.ids.insert(id.to_string());
        }
        authority.append(owner, raw)
    }

    pub async fn fail_next_push(&self) {
        self.inner.lock().await.faults.push_before_store = true;
    }

    pub async fn lose_next_push_response(&self) {
        self.inner.lock().await.faults.push_after_store = true;
    }

    pub async fn withhold_acks(&self, count: usize) {
        self.inner.lock().await.faults.withhold_acks = count;
    }

    pub async fn fail_next_pull(&self) {
        self.inner.lock().await.faults.fail_pull = true;
    }

    /// Number of deltas stored across all owners.
    pub async fn stored_count(&self) -> usize {
        self.inner.lock().await.log.len()
    }

    /// Number of push requests that reached the authority.
    pub async fn push_count(&self) -> usize {
        self.inner.lock().await.pushes
    }

    /// An owner's stored deltas in sequence order.
    pub async fn deltas_for(&self, owner: &str) -> Vec<Value> {
        self.inner
            .lock()
            .await
            .log
            .iter()
            .filter(|e| e.owner == owner)
            .map(|e| e.raw.clone())
            .collect()
    }
}

#[async_trait]
impl RemoteSync for MemoryRemote {
    async fn push(&self, auth: &Credentials, request: &PushRequest) -> Result<PushResponse> {
        let mut authority = self.inner.lock().await;
        authority.pushes += 1;
        let owner = authority.owner_for(auth)?;

        if std::mem::take(&mut authority.faults.push_before_store) {
            return Err(SyncError::Network("connection reset".into()));
        }
        if request.deltas.iter().any(|d| d.owner != owner) {
            return Err(SyncError::Network(
                "HTTP 403: Cannot push deltas for other users".into(),
            ));
        }

        let mut acked = Vec::with_capacity(request.deltas.len());
        for delta in &request.deltas {
            if authority.ids.insert(delta.id.clone()) {
                let raw = serde_json::to_value(Delta {
                    sent_at: None,
                    server_seq: None,
                    ..delta.clone()
                })
                .map_err(|e| SyncError::Protocol(e.to_string()))?;
                authority.append(&owner, raw);
            }
            acked.push(delta.id.clone());
        }

        if std::mem::take(&mut authority.faults.push_after_store) {
            return Err(SyncError::Network("response lost".into()));
        }
        let withheld = std::mem::take(&mut authority.faults.withhold_acks);
        acked.truncate(acked.len().saturating_sub(withheld));

        Ok(PushResponse {
            acked,
            last_server_seq: authority.last_seq_for(&owner),
        })
    }

    async fn pull(&self, auth: &Credentials, request: &PullRequest) -> Result<PullResponse> {
        let mut authority = self.inner.lock().await;
        let owner = authority.owner_for(auth)?;

        if std::mem::take(&mut authority.faults.fail_pull) {
            return Err(SyncError::Network("connection reset".into()));
        }

        let page: Vec<&Entry> = authority
            .log
            .iter()
            .filter(|e| e.owner == owner && e.seq > request.cursor)
            .take(authority.page_limit)
            .collect();

        let cursor = page.last().map_or(request.cursor, |e| e.seq);
        Ok(PullResponse {
            deltas: page.into_iter().map(|e| e.raw.clone()).collect(),
            cursor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nibble_types::{DeltaOp, EntityKind};
    use serde_json::json;

    fn delta(id: &str, owner: &str) -> Delta {
        Delta {
            id: id.into(),
            owner: owner.into(),
            device_id: "dev-a".into(),
            entity_kind: EntityKind::Category,
            entity_id: format!("c-{id}"),
            op: DeltaOp::Upsert,
            payload: json!({}),
            local_ts: 1,
            sent_at: None,
            server_seq: None,
        }
    }

    fn push_of(ids: &[&str], owner: &str) -> PushRequest {
        PushRequest {
            device_id: "dev-a".into(),
            deltas: ids.iter().map(|id| delta(id, owner)).collect(),
        }
    }

    fn pull_from(cursor: i64) -> PullRequest {
        PullRequest {
            cursor,
            device_id: "dev-b".into(),
        }
    }

    #[tokio::test]
    async fn test_push_is_idempotent_by_id() {
        let remote = MemoryRemote::new();
        let auth = remote.register("t", "yak").await;

        let first = remote.push(&auth, &push_of(&["d1", "d2"], "yak")).await.expect("push");
        assert_eq!(first.acked, vec!["d1", "d2"]);
        assert_eq!(first.last_server_seq, 2);

        let again = remote.push(&auth, &push_of(&["d1", "d2"], "yak")).await.expect("push");
        assert_eq!(again.acked, vec!["d1", "d2"]);
        assert_eq!(remote.stored_count().await, 2);
    }

    #[tokio::test]
    async fn test_pull_is_owner_scoped_and_paged() {
        let remote = MemoryRemote::new().with_page_limit(2).await;
        let yak = remote.register("t1", "yak").await;
        let ox = remote.register("t2", "ox").await;

        remote.push(&yak, &push_of(&["a", "b", "c"], "yak")).await.expect("push");
        remote.push(&ox, &push_of(&["z"], "ox")).await.expect("push");

        let page = remote.pull(&yak, &pull_from(0)).await.expect("pull");
        assert_eq!(page.deltas.len(), 2);
        assert_eq!(page.cursor, 2);

        let page = remote.pull(&yak, &pull_from(page.cursor)).await.expect("pull");
        assert_eq!(page.deltas.len(), 1);
        assert_eq!(page.deltas[0]["server_seq"], 3);

        let page = remote.pull(&yak, &pull_from(page.cursor)).await.expect("pull");
        assert!(page.deltas.is_empty());
        assert_eq!(page.cursor, 3);
    }

    #[tokio::test]
    async fn test_foreign_owner_rejected() {
        let remote = MemoryRemote::new();
        let yak = remote.register("t", "yak").await;
        let result = remote.push(&yak, &push_of(&["d1"], "ox")).await;
        assert!(matches!(result, Err(SyncError::Network(msg)) if msg.contains("403")));
        assert_eq!(remote.stored_count().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_token_rejected() {
        let remote = MemoryRemote::new();
        let result = remote
            .pull(&Credentials::new("nope", "yak"), &pull_from(0))
            .await;
        assert!(matches!(result, Err(SyncError::Network(msg)) if msg.contains("401")));
    }

    #[tokio::test]
    async fn test_lost_response_still_stores() {
        let remote = MemoryRemote::new();
        let auth = remote.register("t", "yak").await;
        remote.lose_next_push_response().await;

        assert!(remote.push(&auth, &push_of(&["d1"], "yak")).await.is_err());
        assert_eq!(remote.stored_count().await, 1);
    }
}
