//! SQL migration definitions for the chunk store.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

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
        description: "Initial schema: chunks, files_tracker, ingest_runs, FTS5",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Text chunks, one per (source, header)
CREATE TABLE IF NOT EXISTS chunks (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    file_hash    TEXT NOT NULL,
    file_name    TEXT NOT NULL,
    page         INTEGER NOT NULL DEFAULT 0,
    level        INTEGER NOT NULL DEFAULT 0,
    type         TEXT NOT NULL,
    header       TEXT NOT NULL,
    chunk        TEXT NOT NULL,
    bloc         TEXT,
    content_hash TEXT NOT NULL,
    updated_at   TEXT NOT NULL,
    UNIQUE(file_hash, file_name, header)
);

CREATE INDEX IF NOT EXISTS idx_chunks_file_hash ON chunks(file_hash);

-- Per-source processing state
CREATE TABLE IF NOT EXISTS files_tracker (
    file_hash              TEXT PRIMARY KEY,
    file_name              TEXT NOT NULL,
    present_in_last_update INTEGER NOT NULL DEFAULT 1,
    parsed                 INTEGER NOT NULL DEFAULT 0,
    embedded               INTEGER NOT NULL DEFAULT 0,
    indexed                INTEGER NOT NULL DEFAULT 0,
    updated_at             TEXT NOT NULL
);

-- Ingest run history
CREATE TABLE IF NOT EXISTS ingest_runs (
    id          TEXT PRIMARY KEY,
    source      TEXT NOT NULL,
    started_at  TEXT NOT NULL,
    finished_at TEXT,
    stats_json  TEXT
);

-- Keyword search over chunk headers and text
CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
    header,
    chunk,
    content=chunks,
    content_rowid=id
);

-- Triggers to keep FTS in sync with chunks table
CREATE TRIGGER IF NOT EXISTS chunks_fts_insert AFTER INSERT ON chunks BEGIN
    INSERT INTO chunks_fts(rowid, header, chunk)
    VALUES (new.id, new.header, new.chunk);
END;

CREATE TRIGGER IF NOT EXISTS chunks_fts_delete AFTER DELETE ON chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, header, chunk)
    VALUES ('delete', old.id, old.header, old.chunk);
END;

CREATE TRIGGER IF NOT EXISTS chunks_fts_update AFTER UPDATE ON chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, header, chunk)
    VALUES ('delete', old.id, old.header, old.chunk);
    INSERT INTO chunks_fts(rowid, header, chunk)
    VALUES (new.id, new.header, new.chunk);
END;

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
