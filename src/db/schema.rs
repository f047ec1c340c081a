/// Schema for the local database.
pub const SCHEMA: &str = r#"
-- Last known server snapshot of each record, partitioned by business scope
CREATE TABLE IF NOT EXISTS cached_records (
    entity_type TEXT NOT NULL,
    business_id INTEGER NOT NULL,
    record_id TEXT NOT NULL,
    data BLOB NOT NULL,
    search_text TEXT NOT NULL DEFAULT '',
    cached_at TEXT NOT NULL,
    PRIMARY KEY (entity_type, business_id, record_id)
);

CREATE INDEX IF NOT EXISTS idx_cached_records_scope
    ON cached_records(business_id, entity_type);

-- One row per entity type, written after each full refresh
CREATE TABLE IF NOT EXISTS sync_metadata (
    entity_type TEXT PRIMARY KEY,
    last_sync TEXT NOT NULL,
    data_hash TEXT,
    record_count INTEGER NOT NULL DEFAULT 0
);

-- Orders taken while offline, waiting to be submitted
CREATE TABLE IF NOT EXISTS pending_transactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    business_id INTEGER NOT NULL,
    order_data TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    error TEXT,
    created_at TEXT NOT NULL,
    synced_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_pending_transactions_status
    ON pending_transactions(status, created_at);
"#;
