//! End-to-end `scrape` pipeline: page one → record ids → per-topic queries → merged CSV.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{info, instrument, warn};

use dashscrape_decoder::{Table, decode, parse_response_str};
use dashscrape_query::{QueryClient, QueryTemplate};
use dashscrape_shared::{DashscrapeError, Result, ScrapeConfig};

use crate::merge;

/// File name of the merged table inside the output directory.
pub const MERGED_CSV: &str = "merged.csv";

/// Result of the `scrape` pipeline.
#[derive(Debug)]
pub struct ScrapeResult {
    /// The merged table.
    pub table: Table,
    /// Where the merged CSV was written.
    pub output_path: PathBuf,
    /// Topics whose columns made it into the table.
    pub merged_topics: Vec<String>,
    /// Topics that failed, with the error message.
    pub failed_topics: Vec<(String, String)>,
    /// Total elapsed time.
    pub elapsed: Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after each topic query or ingested source.
    fn item_done(&self, label: &str, current: usize, total: usize);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn item_done(&self, _label: &str, _current: usize, _total: usize) {}
}

/// Decode a saved query response from a JSON file.
pub fn decode_file(path: &Path) -> Result<Table> {
    let content = std::fs::read_to_string(path).map_err(|e| DashscrapeError::io(path, e))?;
    decode(&parse_response_str(&content)?)
}

/// Run the full `scrape` pipeline.
///
/// 1. Query page one for the master table
/// 2. Rewrite the topic payload with the master's record ids
/// 3. Query each topic and join its columns onto the master
/// 4. Join the trailing columns from the last topic table
/// 5. Write the merged CSV
///
/// A failing page-one query aborts the run; a failing topic is logged,
/// recorded and skipped.
#[instrument(skip_all, fields(topics = config.topics.len()))]
pub async fn scrape(
    client: &QueryClient,
    config: &ScrapeConfig,
    progress: &dyn ProgressReporter,
) -> Result<ScrapeResult> {
    let start = Instant::now();

    // --- Phase 1: Page one ---
    progress.phase("Querying page one");
    let page_one = QueryTemplate::load(&config.page_one_payload)?;
    let mut table = client.query_table(page_one.payload()).await?;

    let record_ids: Vec<String> = table
        .column(&config.record_id_column)
        .ok_or_else(|| {
            DashscrapeError::validation(format!(
                "page one has no '{}' column",
                config.record_id_column
            ))
        })?
        .filter(|cell| !cell.is_null())
        .map(|cell| cell.to_string())
        .collect();
    if record_ids.is_empty() {
        return Err(DashscrapeError::validation("page one returned no records"));
    }
    info!(records = record_ids.len(), "page one decoded");

    // --- Phase 2: Topics ---
    progress.phase("Querying topics");
    let mut topic_template = QueryTemplate::load(&config.topic_payload)?;
    topic_template.set_record_ids(&config.record_ids_pointer, &record_ids)?;

    let mut merged_topics = Vec::new();
    let mut failed_topics = Vec::new();
    let mut last_topic_table = None;
    let total = config.topics.len();

    for (i, topic) in config.topics.iter().enumerate() {
        let outcome = async {
            let payload = topic_template.with_topic(&config.topic_pointer, topic)?;
            let topic_table = client.query_table(&payload).await?;
            let joined = merge::join_topic(
                &table,
                &topic_table,
                &config.record_id_column,
                &config.topic_columns,
                &config.column_aliases,
                topic,
            )?;
            Ok::<_, DashscrapeError>((joined, topic_table))
        }
        .await;

        match outcome {
            Ok((joined, topic_table)) => {
                info!(topic = %topic, rows = topic_table.len(), "topic merged");
                table = joined;
                last_topic_table = Some(topic_table);
                merged_topics.push(topic.clone());
            }
            Err(e) => {
                warn!(topic = %topic, error = %e, "topic query failed, skipping");
                failed_topics.push((topic.clone(), e.to_string()));
            }
        }
        progress.item_done(topic, i + 1, total);
    }

    // --- Phase 3: Trailing columns ---
    if !config.trailing_columns.is_empty() {
        match &last_topic_table {
            Some(last) => {
                table = merge::join_trailing(
                    &table,
                    last,
                    &config.record_id_column,
                    &config.trailing_columns,
                )?;
            }
            None => warn!("no topic table available, trailing columns not added"),
        }
    }

    // --- Phase 4: Write CSV ---
    progress.phase("Writing merged table");
    std::fs::create_dir_all(&config.output_dir)
        .map_err(|e| DashscrapeError::io(&config.output_dir, e))?;
    let output_path = config.output_dir.join(MERGED_CSV);
    let file =
        std::fs::File::create(&output_path).map_err(|e| DashscrapeError::io(&output_path, e))?;
    table.write_csv(file)?;

    let elapsed = start.elapsed();
    info!(
        rows = table.len(),
        columns = table.columns().len(),
        failed = failed_topics.len(),
        elapsed_ms = elapsed.as_millis() as u64,
        "scrape complete"
    );

    Ok(ScrapeResult {
        table,
        output_path,
        merged_topics,
        failed_topics,
        elapsed,
    })
}
