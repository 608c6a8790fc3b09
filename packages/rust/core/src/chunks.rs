//! Table → chunk conversion and ingestion into the chunk store.

use std::io::Write;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use dashscrape_decoder::{CellValue, Table};
use dashscrape_shared::{
    CHUNK_TYPE_DASHBOARD, ChunkConfig, ChunkRecord, DashscrapeError, FileTrackerEntry, Result,
    RunId,
};
use dashscrape_storage::{ChunkUpsert, Storage};

use crate::pipeline::ProgressReporter;

/// Prefix of files-tracker names for dashboard records.
pub const TRACKER_PREFIX: &str = "PowerBI_";

/// Chunks extracted from one table row, plus its tracker entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSource {
    pub tracker: FileTrackerEntry,
    pub chunks: Vec<ChunkRecord>,
}

/// Outcome of an ingest run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestSummary {
    pub run_id: Option<RunId>,
    pub sources: usize,
    pub skipped_rows: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

/// Split every row of `table` into one chunk per content column.
///
/// The first `leading_columns` columns are metadata and never become
/// chunks. Rows without a record id are skipped.
pub fn table_to_chunks(table: &Table, config: &ChunkConfig) -> Result<(Vec<ChunkSource>, usize)> {
    let id_index = table.column_index(&config.record_id_column).ok_or_else(|| {
        DashscrapeError::validation(format!(
            "table has no record id column '{}'",
            config.record_id_column
        ))
    })?;
    let title_indexes = config
        .title_columns
        .iter()
        .map(|name| {
            table.column_index(name).ok_or_else(|| {
                DashscrapeError::validation(format!("table has no title column '{name}'"))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let headers: Vec<(usize, String)> = table
        .columns()
        .iter()
        .enumerate()
        .skip(config.leading_columns)
        .map(|(index, name)| (index, name.replace('_', " ")))
        .collect();

    let mut sources = Vec::with_capacity(table.len());
    let mut skipped = 0;
    for row in table.rows() {
        let Some(record_id) = chunk_text(&row[id_index]) else {
            skipped += 1;
            continue;
        };

        let file_name = title_indexes
            .iter()
            .filter_map(|&index| chunk_text(&row[index]))
            .collect::<Vec<_>>()
            .join(", ");

        let chunks = headers
            .iter()
            .filter_map(|(index, header)| {
                chunk_text(&row[*index]).map(|text| ChunkRecord {
                    file_hash: record_id.clone(),
                    file_name: file_name.clone(),
                    page: 0,
                    level: 0,
                    kind: CHUNK_TYPE_DASHBOARD.to_string(),
                    header: header.clone(),
                    chunk: text,
                    bloc: None,
                })
            })
            .collect();

        sources.push(ChunkSource {
            tracker: FileTrackerEntry {
                file_name: format!("{TRACKER_PREFIX}{record_id}"),
                file_hash: record_id,
                present_in_last_update: true,
                parsed: true,
                embedded: false,
                indexed: false,
            },
            chunks,
        });
    }

    Ok((sources, skipped))
}

/// Rendered cell text, or `None` for null, blank and `nan` cells.
fn chunk_text(cell: &CellValue) -> Option<String> {
    let text = cell.to_string();
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") {
        None
    } else {
        Some(text)
    }
}

/// Upsert every chunk of `table` into `storage` and record the run.
///
/// Presence reset, upserts and the run summary share one transaction. On
/// failure nothing is written except the run row, left unfinished.
#[instrument(skip_all, fields(source = source_label))]
pub async fn ingest(
    storage: &Storage,
    table: &Table,
    config: &ChunkConfig,
    source_label: &str,
    progress: &dyn ProgressReporter,
) -> Result<IngestSummary> {
    let (sources, skipped_rows) = table_to_chunks(table, config)?;
    if skipped_rows > 0 {
        warn!(skipped_rows, "rows without a record id were skipped");
    }

    let run_id = storage.insert_ingest_run(source_label).await?;
    info!(%run_id, sources = sources.len(), "starting ingest");

    progress.phase("Ingesting chunks");
    storage.begin().await?;
    let written = write_sources(storage, &sources, skipped_rows, &run_id, progress).await;
    let mut summary = match written {
        Ok(summary) => summary,
        Err(e) => {
            if let Err(rollback_err) = storage.rollback().await {
                warn!(%run_id, error = %rollback_err, "rollback failed");
            }
            warn!(%run_id, error = %e, "ingest rolled back");
            return Err(e);
        }
    };
    storage.commit().await?;
    summary.run_id = Some(run_id);

    info!(
        inserted = summary.inserted,
        updated = summary.updated,
        unchanged = summary.unchanged,
        "ingest complete"
    );
    Ok(summary)
}

async fn write_sources(
    storage: &Storage,
    sources: &[ChunkSource],
    skipped_rows: usize,
    run_id: &RunId,
    progress: &dyn ProgressReporter,
) -> Result<IngestSummary> {
    storage.clear_presence(TRACKER_PREFIX).await?;

    let mut summary = IngestSummary {
        sources: sources.len(),
        skipped_rows,
        ..IngestSummary::default()
    };
    let total = sources.len();
    for (i, source) in sources.iter().enumerate() {
        for chunk in &source.chunks {
            match storage.upsert_chunk(chunk).await? {
                ChunkUpsert::Inserted => summary.inserted += 1,
                ChunkUpsert::Updated => summary.updated += 1,
                ChunkUpsert::Unchanged => summary.unchanged += 1,
            }
        }
        storage.upsert_file(&source.tracker).await?;
        debug!(record = %source.tracker.file_hash, chunks = source.chunks.len(), "source ingested");
        progress.item_done(&source.tracker.file_name, i + 1, total);
    }

    let stats_json = serde_json::to_string(&summary)
        .map_err(|e| DashscrapeError::Storage(format!("failed to encode run stats: {e}")))?;
    storage.finish_ingest_run(run_id, &stats_json).await?;
    Ok(summary)
}

/// Write every stored chunk as CSV. Returns the number of rows written.
pub async fn export_chunks<W: Write>(storage: &Storage, writer: W) -> Result<usize> {
    let chunks = storage.list_chunks().await?;
    let mut csv_writer = csv::Writer::from_writer(writer);
    for chunk in &chunks {
        csv_writer
            .serialize(chunk)
            .map_err(|e| DashscrapeError::Csv(e.to_string()))?;
    }
    csv_writer
        .flush()
        .map_err(|e| DashscrapeError::Csv(e.to_string()))?;
    Ok(chunks.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::SilentProgress;
    use std::path::PathBuf;

    fn config() -> ChunkConfig {
        ChunkConfig {
            database: PathBuf::new(),
            record_id_column: "Record ID".into(),
            title_columns: vec!["Type".into(), "Entity Name".into()],
            leading_columns: 3,
        }
    }

    fn table() -> Table {
        Table::try_new(
            vec![
                "Record ID".into(),
                "Type".into(),
                "Entity Name".into(),
                "Core_Principle__Digital_Commons".into(),
                "Process description".into(),
            ],
            vec![
                vec![
                    "17".into(),
                    "Government".into(),
                    "France".into(),
                    "Open access".into(),
                    "nan".into(),
                ],
                vec![
                    CellValue::from(18),
                    "Company".into(),
                    CellValue::Null,
                    "  ".into(),
                    "Consulted widely".into(),
                ],
                vec![
                    CellValue::Null,
                    "Individual".into(),
                    "Someone".into(),
                    "x".into(),
                    "y".into(),
                ],
            ],
        )
        .expect("table")
    }

    fn temp_db() -> PathBuf {
        std::env::temp_dir().join(format!("dashscrape_core_{}.db", uuid::Uuid::now_v7()))
    }

    async fn test_storage() -> Storage {
        Storage::open(&temp_db()).await.expect("open test db")
    }

    /// Run `sql` on a separate connection to the database at `path`.
    async fn execute_raw(path: &std::path::Path, sql: &str) {
        let db = libsql::Builder::new_local(path).build().await.expect("open raw db");
        let conn = db.connect().expect("connect raw db");
        conn.execute_batch(sql).await.expect("raw sql");
    }

    /// `table()` with both content cells rewritten.
    fn edited_table() -> Table {
        let mut rows = table().rows().to_vec();
        rows[0][3] = "Open access for all".into();
        rows[1][4] = "Consulted nobody".into();
        Table::try_new(table().columns().to_vec(), rows).expect("table")
    }

    #[test]
    fn rows_become_chunks_per_content_column() {
        let (sources, skipped) = table_to_chunks(&table(), &config()).unwrap();
        assert_eq!(skipped, 1);
        assert_eq!(sources.len(), 2);

        let first = &sources[0];
        assert_eq!(first.tracker.file_name, "PowerBI_17");
        assert!(first.tracker.parsed && !first.tracker.embedded);
        assert_eq!(first.chunks.len(), 1);
        assert_eq!(first.chunks[0].file_name, "Government, France");
        assert_eq!(first.chunks[0].header, "Core Principle  Digital Commons");
        assert_eq!(first.chunks[0].kind, "PowerBI");

        let second = &sources[1];
        assert_eq!(second.tracker.file_hash, "18");
        assert_eq!(second.chunks[0].file_name, "Company");
        assert_eq!(second.chunks[0].header, "Process description");
    }

    #[test]
    fn missing_title_column_rejected() {
        let mut config = config();
        config.title_columns.push("Location formatted".into());
        let err = table_to_chunks(&table(), &config).unwrap_err();
        assert!(err.to_string().contains("Location formatted"));
    }

    #[tokio::test]
    async fn second_ingest_is_unchanged() {
        let storage = test_storage().await;

        let first = ingest(&storage, &table(), &config(), "merged.csv", &SilentProgress)
            .await
            .unwrap();
        assert_eq!((first.inserted, first.updated, first.unchanged), (2, 0, 0));
        assert!(first.run_id.is_some());

        let second = ingest(&storage, &table(), &config(), "merged.csv", &SilentProgress)
            .await
            .unwrap();
        assert_eq!((second.inserted, second.updated, second.unchanged), (0, 0, 2));

        let tracked = storage.get_file("17").await.unwrap().expect("tracked");
        assert!(tracked.present_in_last_update);
        assert_eq!(storage.stats().await.unwrap().runs, 2);
    }

    #[tokio::test]
    async fn failed_ingest_leaves_store_untouched() {
        let path = temp_db();
        let storage = Storage::open(&path).await.expect("open test db");
        ingest(&storage, &table(), &config(), "merged.csv", &SilentProgress)
            .await
            .unwrap();
        let before = storage.list_chunks().await.unwrap();

        execute_raw(
            &path,
            "CREATE TRIGGER reject_18 BEFORE UPDATE ON chunks WHEN NEW.file_hash = '18'
             BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
        )
        .await;

        let err = ingest(&storage, &edited_table(), &config(), "merged.csv", &SilentProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, DashscrapeError::Storage(_)));

        // Record 17 was rewritten before 18 failed; the rollback undoes it.
        assert_eq!(storage.list_chunks().await.unwrap(), before);
        for id in ["17", "18"] {
            let tracked = storage.get_file(id).await.unwrap().expect("tracked");
            assert!(tracked.present_in_last_update, "{id} lost presence");
        }
        assert_eq!(storage.stats().await.unwrap().runs, 2);

        // The connection is usable again once the fault is gone.
        execute_raw(&path, "DROP TRIGGER reject_18;").await;
        let retry = ingest(&storage, &edited_table(), &config(), "merged.csv", &SilentProgress)
            .await
            .unwrap();
        assert_eq!((retry.inserted, retry.updated, retry.unchanged), (0, 2, 0));
    }

    #[tokio::test]
    async fn export_writes_embedding_layout() {
        let storage = test_storage().await;
        ingest(&storage, &table(), &config(), "merged.csv", &SilentProgress)
            .await
            .unwrap();

        let mut buf = Vec::new();
        let written = export_chunks(&storage, &mut buf).await.unwrap();
        assert_eq!(written, 2);

        let csv = String::from_utf8(buf).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("file_hash,file_name,page,level,type,header,chunk,bloc")
        );
        assert_eq!(
            lines.next(),
            Some("17,\"Government, France\",0,0,PowerBI,Core Principle  Digital Commons,Open access,")
        );
    }
}
