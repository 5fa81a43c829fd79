//! SQL migration definitions for the Magpie registry database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a set of SQL statements executed within a transaction.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: items, syntheses, embeddings, runs",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Per-item pipeline state, one row per source item
CREATE TABLE IF NOT EXISTS items (
    id                TEXT PRIMARY KEY,
    source_url        TEXT NOT NULL,
    raw_json          TEXT,
    media_json        TEXT NOT NULL DEFAULT '[]',
    cached            INTEGER NOT NULL DEFAULT 0,
    media_processed   INTEGER NOT NULL DEFAULT 0,
    categorized       INTEGER NOT NULL DEFAULT 0,
    kb_item_generated INTEGER NOT NULL DEFAULT 0,
    synthesized       INTEGER NOT NULL DEFAULT 0,
    embedded          INTEGER NOT NULL DEFAULT 0,
    synced            INTEGER NOT NULL DEFAULT 0,
    main_category     TEXT,
    sub_category      TEXT,
    item_name         TEXT,
    kb_item_path      TEXT,
    failed_phase      TEXT,
    error_message     TEXT,
    created_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_items_category ON items(main_category, sub_category);
CREATE INDEX IF NOT EXISTS idx_items_failed ON items(failed_phase);

-- One consolidated document per (main, sub) category group
CREATE TABLE IF NOT EXISTS syntheses (
    main_category TEXT NOT NULL,
    sub_category  TEXT NOT NULL,
    fingerprint   TEXT NOT NULL,
    doc_path      TEXT NOT NULL,
    generated_at  TEXT NOT NULL,
    PRIMARY KEY (main_category, sub_category)
);

-- Document embeddings, little-endian f32 vectors
CREATE TABLE IF NOT EXISTS embeddings (
    item_id    TEXT PRIMARY KEY REFERENCES items(id) ON DELETE CASCADE,
    model      TEXT NOT NULL,
    dims       INTEGER NOT NULL,
    vector     BLOB NOT NULL,
    created_at TEXT NOT NULL
);

-- Pipeline run history
CREATE TABLE IF NOT EXISTS runs (
    id          TEXT PRIMARY KEY,
    started_at  TEXT NOT NULL,
    finished_at TEXT,
    stats_json  TEXT
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
