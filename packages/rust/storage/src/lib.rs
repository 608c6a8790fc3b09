//! libSQL chunk store.
//!
//! The [`Storage`] struct wraps a local libSQL database holding text chunks,
//! the files tracker consumed by the embedding stage, ingest run history, and
//! an FTS5 index over chunk text.
//!
//! **Access rules:**
//! - `dashscrape ingest`: read-write via [`Storage::open`]
//! - `export`, `search`, `status`: read-only via [`Storage::open_readonly`]

mod migrations;

use std::path::Path;

use chrono::Utc;
use dashscrape_shared::{ChunkRecord, DashscrapeError, FileTrackerEntry, Result, RunId, content_hash};
use libsql::{Connection, Database, params};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

/// What an upsert did to the stored chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkUpsert {
    Inserted,
    Updated,
    Unchanged,
}

/// Row counts across the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub chunks: u64,
    pub files: u64,
    pub parsed: u64,
    pub embedded: u64,
    pub indexed: u64,
    pub runs: u64,
}

/// A search hit from FTS5.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub file_hash: String,
    pub file_name: String,
    pub header: String,
    pub chunk: String,
    /// FTS5 rank score (lower is better).
    pub score: f64,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| DashscrapeError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;
        let conn = db.connect().map_err(db_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` without write access.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DashscrapeError::Storage(format!(
                "database not found: {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;
        let conn = db.connect().map_err(db_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        DashscrapeError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 on a fresh database.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0,
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(DashscrapeError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------------

    /// Open a write transaction on this connection. Every write until
    /// [`Storage::commit`] or [`Storage::rollback`] lands atomically.
    pub async fn begin(&self) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .await
            .map_err(db_err)?;
        Ok(())
    }

    pub async fn commit(&self) -> Result<()> {
        self.conn.execute_batch("COMMIT").await.map_err(db_err)?;
        Ok(())
    }

    pub async fn rollback(&self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK").await.map_err(db_err)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Chunk operations
    // -----------------------------------------------------------------------

    /// Insert or update the chunk keyed by `(file_hash, file_name, header)`.
    ///
    /// Only the chunk text is rewritten on update; a text with the same
    /// content hash leaves the row untouched.
    pub async fn upsert_chunk(&self, chunk: &ChunkRecord) -> Result<ChunkUpsert> {
        self.check_writable()?;
        let hash = content_hash(&chunk.chunk);
        let now = Utc::now().to_rfc3339();

        let mut rows = self
            .conn
            .query(
                "SELECT content_hash FROM chunks
                 WHERE file_hash = ?1 AND file_name = ?2 AND header = ?3",
                params![
                    chunk.file_hash.as_str(),
                    chunk.file_name.as_str(),
                    chunk.header.as_str()
                ],
            )
            .await
            .map_err(db_err)?;

        let existing: Option<String> = match rows.next().await.map_err(db_err)? {
            Some(row) => Some(row.get(0).map_err(db_err)?),
            None => None,
        };

        match existing {
            None => {
                self.conn
                    .execute(
                        "INSERT INTO chunks
                            (file_hash, file_name, page, level, type, header, chunk, bloc,
                             content_hash, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                        params![
                            chunk.file_hash.as_str(),
                            chunk.file_name.as_str(),
                            chunk.page,
                            chunk.level,
                            chunk.kind.as_str(),
                            chunk.header.as_str(),
                            chunk.chunk.as_str(),
                            chunk.bloc.as_deref(),
                            hash.as_str(),
                            now.as_str()
                        ],
                    )
                    .await
                    .map_err(db_err)?;
                Ok(ChunkUpsert::Inserted)
            }
            Some(stored) if stored == hash => Ok(ChunkUpsert::Unchanged),
            Some(_) => {
                self.conn
                    .execute(
                        "UPDATE chunks SET chunk = ?1, content_hash = ?2, updated_at = ?3
                         WHERE file_hash = ?4 AND file_name = ?5 AND header = ?6",
                        params![
                            chunk.chunk.as_str(),
                            hash.as_str(),
                            now.as_str(),
                            chunk.file_hash.as_str(),
                            chunk.file_name.as_str(),
                            chunk.header.as_str()
                        ],
                    )
                    .await
                    .map_err(db_err)?;
                Ok(ChunkUpsert::Updated)
            }
        }
    }

    /// All chunks in insertion order.
    pub async fn list_chunks(&self) -> Result<Vec<ChunkRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT file_hash, file_name, page, level, type, header, chunk, bloc
                 FROM chunks ORDER BY id",
                params![],
            )
            .await
            .map_err(db_err)?;

        let mut chunks = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            chunks.push(row_to_chunk(&row)?);
        }
        Ok(chunks)
    }

    // -----------------------------------------------------------------------
    // Files tracker
    // -----------------------------------------------------------------------

    /// Record a source as parsed. Re-parsing a known source clears its
    /// embedded and indexed flags so downstream stages pick it up again.
    pub async fn upsert_file(&self, entry: &FileTrackerEntry) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO files_tracker
                    (file_hash, file_name, present_in_last_update, parsed, embedded, indexed,
                     updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(file_hash) DO UPDATE SET
                    file_name = excluded.file_name,
                    present_in_last_update = excluded.present_in_last_update,
                    parsed = excluded.parsed,
                    embedded = excluded.embedded,
                    indexed = excluded.indexed,
                    updated_at = excluded.updated_at",
                params![
                    entry.file_hash.as_str(),
                    entry.file_name.as_str(),
                    entry.present_in_last_update as i64,
                    entry.parsed as i64,
                    entry.embedded as i64,
                    entry.indexed as i64,
                    now.as_str()
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Mark every tracked source whose name starts with `prefix` as absent
    /// from the latest listing. Returns the number of rows touched.
    pub async fn clear_presence(&self, prefix: &str) -> Result<u64> {
        self.check_writable()?;
        let pattern = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
        self.conn
            .execute(
                "UPDATE files_tracker SET present_in_last_update = 0
                 WHERE file_name LIKE ?1 ESCAPE '\\'",
                params![pattern.as_str()],
            )
            .await
            .map_err(db_err)
    }

    pub async fn get_file(&self, file_hash: &str) -> Result<Option<FileTrackerEntry>> {
        let mut rows = self
            .conn
            .query(
                "SELECT file_hash, file_name, present_in_last_update, parsed, embedded, indexed
                 FROM files_tracker WHERE file_hash = ?1",
                params![file_hash],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(FileTrackerEntry {
                file_hash: row.get(0).map_err(db_err)?,
                file_name: row.get(1).map_err(db_err)?,
                present_in_last_update: row.get::<i64>(2).map_err(db_err)? != 0,
                parsed: row.get::<i64>(3).map_err(db_err)? != 0,
                embedded: row.get::<i64>(4).map_err(db_err)? != 0,
                indexed: row.get::<i64>(5).map_err(db_err)? != 0,
            })),
            None => Ok(None),
        }
    }

    // -----------------------------------------------------------------------
    // Ingest runs
    // -----------------------------------------------------------------------

    /// Start an ingest run for `source`. Returns the generated run ID.
    pub async fn insert_ingest_run(&self, source: &str) -> Result<RunId> {
        self.check_writable()?;
        let id = RunId::new();
        let id_text = id.to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO ingest_runs (id, source, started_at) VALUES (?1, ?2, ?3)",
                params![id_text.as_str(), source, now.as_str()],
            )
            .await
            .map_err(db_err)?;
        Ok(id)
    }

    /// Close an ingest run with its summary.
    pub async fn finish_ingest_run(&self, run: &RunId, stats_json: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let id_text = run.to_string();
        self.conn
            .execute(
                "UPDATE ingest_runs SET finished_at = ?1, stats_json = ?2 WHERE id = ?3",
                params![now.as_str(), stats_json, id_text.as_str()],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Stats and search
    // -----------------------------------------------------------------------

    pub async fn stats(&self) -> Result<StoreStats> {
        let mut rows = self
            .conn
            .query(
                "SELECT
                    (SELECT COUNT(*) FROM chunks),
                    (SELECT COUNT(*) FROM files_tracker),
                    (SELECT COUNT(*) FROM files_tracker WHERE parsed = 1),
                    (SELECT COUNT(*) FROM files_tracker WHERE embedded = 1),
                    (SELECT COUNT(*) FROM files_tracker WHERE indexed = 1),
                    (SELECT COUNT(*) FROM ingest_runs)",
                params![],
            )
            .await
            .map_err(db_err)?;

        let Some(row) = rows.next().await.map_err(db_err)? else {
            return Ok(StoreStats::default());
        };
        let count = |i: i32| row.get::<i64>(i).map(|n| n as u64).map_err(db_err);
        Ok(StoreStats {
            chunks: count(0)?,
            files: count(1)?,
            parsed: count(2)?,
            embedded: count(3)?,
            indexed: count(4)?,
            runs: count(5)?,
        })
    }

    /// Full-text search over chunk headers and text.
    pub async fn search(&self, query: &str, limit: u32) -> Result<Vec<SearchResult>> {
        let mut rows = self
            .conn
            .query(
                "SELECT c.file_hash, c.file_name, c.header, c.chunk, rank
                 FROM chunks_fts fts
                 JOIN chunks c ON c.id = fts.rowid
                 WHERE chunks_fts MATCH ?1
                 ORDER BY rank
                 LIMIT ?2",
                params![query, limit],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(SearchResult {
                file_hash: row.get(0).map_err(db_err)?,
                file_name: row.get(1).map_err(db_err)?,
                header: row.get(2).map_err(db_err)?,
                chunk: row.get(3).map_err(db_err)?,
                score: row.get(4).unwrap_or(0.0),
            });
        }
        Ok(results)
    }
}

fn db_err(e: libsql::Error) -> DashscrapeError {
    DashscrapeError::Storage(e.to_string())
}

fn row_to_chunk(row: &libsql::Row) -> Result<ChunkRecord> {
    Ok(ChunkRecord {
        file_hash: row.get(0).map_err(db_err)?,
        file_name: row.get(1).map_err(db_err)?,
        page: row.get(2).map_err(db_err)?,
        level: row.get(3).map_err(db_err)?,
        kind: row.get(4).map_err(db_err)?,
        header: row.get(5).map_err(db_err)?,
        chunk: row.get(6).map_err(db_err)?,
        bloc: row.get::<Option<String>>(7).map_err(db_err)?,
    })
}
