//! SQL schema definitions.

/// Complete schema for the v1 local store.
pub const SCHEMA_V1: &str = r#"
-- ============================================================
-- Entities (soft-deleted via deleted_at, never removed)
-- ============================================================

CREATE TABLE IF NOT EXISTS categories (
    id TEXT PRIMARY KEY,
    owner TEXT NOT NULL,
    name TEXT NOT NULL,
    color TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    deleted_at INTEGER,
    origin_device TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_categories_owner ON categories(owner, name);

CREATE TABLE IF NOT EXISTS activities (
    id TEXT PRIMARY KEY,
    owner TEXT NOT NULL,
    category_id TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    lat REAL,
    lng REAL,
    app_version TEXT NOT NULL,
    description TEXT,
    amount REAL,
    score REAL,
    metadata TEXT,
    deleted_at INTEGER,
    origin_device TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_activities_owner ON activities(owner, created_at);
CREATE INDEX IF NOT EXISTS idx_activities_category ON activities(category_id);

-- ============================================================
-- Outbox
-- ============================================================

CREATE TABLE IF NOT EXISTS deltas (
    id TEXT PRIMARY KEY,
    owner TEXT NOT NULL,
    device_id TEXT NOT NULL,
    entity_kind TEXT NOT NULL CHECK (entity_kind IN ('category', 'activity')),
    entity_id TEXT NOT NULL,
    op TEXT NOT NULL CHECK (op IN ('upsert', 'delete')),
    payload TEXT NOT NULL,
    local_ts INTEGER NOT NULL,
    sent_at INTEGER,
    server_seq INTEGER
);

CREATE INDEX IF NOT EXISTS idx_deltas_unsent ON deltas(owner, sent_at, local_ts);

-- ============================================================
-- Sync bookkeeping
-- ============================================================

CREATE TABLE IF NOT EXISTS sync_state (
    owner TEXT PRIMARY KEY,
    last_server_seq INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS quarantine (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner TEXT NOT NULL,
    server_seq INTEGER,
    delta_id TEXT,
    raw TEXT NOT NULL,
    error TEXT NOT NULL,
    received_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_quarantine_owner ON quarantine(owner, server_seq);

CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;
