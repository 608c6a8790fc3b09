//! CLI command definitions, routing, and tracing setup.

use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use dashscrape_core::{IngestSummary, ProgressReporter, ScrapeResult};
use dashscrape_decoder::Table;
use dashscrape_query::QueryClient;
use dashscrape_shared::{
    AppConfig, ChunkConfig, EndpointConfig, ScrapeConfig, init_config, init_config_at,
    load_config, load_config_from,
};
use dashscrape_storage::Storage;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// dashscrape: scrape a public dashboard into CSV and retrievable chunks.
#[derive(Parser)]
#[command(
    name = "dashscrape",
    version,
    about = "Decode public dashboard query responses into tables and text chunks.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file to use instead of ~/.dashscrape/dashscrape.toml.
    #[arg(long, global = true, env = "DASHSCRAPE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Decode a saved query response (JSON) into CSV.
    Decode {
        /// Response body captured from the query endpoint.
        input: PathBuf,

        /// Output CSV file (defaults to stdout).
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Query page one and every topic, then write the merged CSV.
    Scrape {
        /// Output directory (overrides `scrape.output_dir`).
        #[arg(short, long)]
        out_dir: Option<PathBuf>,

        /// Topic to query; repeat to query several (overrides `scrape.topics`).
        #[arg(long = "topic")]
        topics: Vec<String>,
    },

    /// Load a merged CSV into the chunk store.
    Ingest {
        /// CSV written by `scrape`.
        input: PathBuf,

        /// Chunk database (overrides `chunks.database`).
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Export stored chunks as CSV for the embedding stage.
    Export {
        /// Output CSV file (defaults to stdout).
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Chunk database (overrides `chunks.database`).
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Keyword search over stored chunks.
    Search {
        /// FTS5 query, e.g. `broadband` or `"digital commons"`.
        query: String,

        /// Maximum number of hits.
        #[arg(short, long, default_value = "10")]
        limit: u32,

        /// Chunk database (overrides `chunks.database`).
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Show chunk store counts.
    Status {
        /// Chunk database (overrides `chunks.database`).
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "dashscrape=info",
        1 => "dashscrape=debug",
        _ => "dashscrape=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    // Logs go to stderr so CSV written to stdout stays clean.
    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    match cli.command {
        Command::Decode { input, out } => cmd_decode(&input, out.as_deref()),
        Command::Scrape { out_dir, topics } => {
            cmd_scrape(&resolve_config(config_path.as_deref())?, out_dir, topics).await
        }
        Command::Ingest { input, db } => {
            cmd_ingest(&resolve_config(config_path.as_deref())?, &input, db).await
        }
        Command::Export { out, db } => {
            cmd_export(&resolve_config(config_path.as_deref())?, out.as_deref(), db).await
        }
        Command::Search { query, limit, db } => {
            cmd_search(&resolve_config(config_path.as_deref())?, &query, limit, db).await
        }
        Command::Status { db } => cmd_status(&resolve_config(config_path.as_deref())?, db).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(config_path.as_deref()),
            ConfigAction::Show => cmd_config_show(config_path.as_deref()),
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    })
}

fn database_path(config: &AppConfig, db: Option<PathBuf>) -> PathBuf {
    db.unwrap_or_else(|| ChunkConfig::from(config).database)
}

/// Open `out` for writing, or stdout when absent.
fn output_writer(out: Option<&Path>) -> Result<Box<dyn Write>> {
    Ok(match out {
        Some(path) => {
            let file = std::fs::File::create(path)
                .map_err(|e| eyre!("cannot create '{}': {e}", path.display()))?;
            Box::new(std::io::BufWriter::new(file))
        }
        None => Box::new(std::io::stdout().lock()),
    })
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

fn cmd_decode(input: &Path, out: Option<&Path>) -> Result<()> {
    let table = dashscrape_core::decode_file(input)?;
    info!(
        input = %input.display(),
        rows = table.len(),
        columns = table.columns().len(),
        "decoded response"
    );
    table.write_csv(output_writer(out)?)?;
    Ok(())
}

async fn cmd_scrape(config: &AppConfig, out_dir: Option<PathBuf>, topics: Vec<String>) -> Result<()> {
    let endpoint = EndpointConfig::try_from(config)?;
    let mut scrape_config = ScrapeConfig::from(config);
    if let Some(dir) = out_dir {
        scrape_config.output_dir = dir;
    }
    if !topics.is_empty() {
        scrape_config.topics = topics;
    }

    info!(url = %endpoint.url, topics = scrape_config.topics.len(), "starting scrape");

    let client = QueryClient::new(endpoint)?;
    let reporter = CliProgress::new()?;
    let result = dashscrape_core::scrape(&client, &scrape_config, &reporter).await;
    reporter.finish();
    print_scrape_summary(&result?);
    Ok(())
}

fn print_scrape_summary(result: &ScrapeResult) {
    println!();
    println!("  Scrape complete!");
    println!("  Rows:    {}", result.table.len());
    println!("  Columns: {}", result.table.columns().len());
    println!("  Topics:  {}", result.merged_topics.len());
    for (topic, error) in &result.failed_topics {
        println!("  Failed:  {topic} ({error})");
    }
    println!("  Output:  {}", result.output_path.display());
    println!("  Time:    {:.1}s", result.elapsed.as_secs_f64());
    println!();
}

async fn cmd_ingest(config: &AppConfig, input: &Path, db: Option<PathBuf>) -> Result<()> {
    let mut chunk_config = ChunkConfig::from(config);
    chunk_config.database = database_path(config, db);

    let file = std::fs::File::open(input)
        .map_err(|e| eyre!("cannot open '{}': {e}", input.display()))?;
    let table = Table::read_csv(file)?;
    info!(input = %input.display(), rows = table.len(), "loaded merged table");

    let storage = Storage::open(&chunk_config.database).await?;
    let reporter = CliProgress::new()?;
    let label = input.to_string_lossy();
    let result = dashscrape_core::ingest(&storage, &table, &chunk_config, &label, &reporter).await;
    reporter.finish();
    print_ingest_summary(&result?, &chunk_config.database);
    Ok(())
}

fn print_ingest_summary(summary: &IngestSummary, database: &Path) {
    println!();
    println!("  Ingest complete!");
    if let Some(run_id) = &summary.run_id {
        println!("  Run:       {run_id}");
    }
    println!("  Sources:   {}", summary.sources);
    println!("  Skipped:   {}", summary.skipped_rows);
    println!("  Inserted:  {}", summary.inserted);
    println!("  Updated:   {}", summary.updated);
    println!("  Unchanged: {}", summary.unchanged);
    println!("  Database:  {}", database.display());
    println!();
}

async fn cmd_export(config: &AppConfig, out: Option<&Path>, db: Option<PathBuf>) -> Result<()> {
    let storage = Storage::open_readonly(&database_path(config, db)).await?;
    let written = dashscrape_core::export_chunks(&storage, output_writer(out)?).await?;
    info!(chunks = written, "exported chunks");
    Ok(())
}

async fn cmd_search(config: &AppConfig, query: &str, limit: u32, db: Option<PathBuf>) -> Result<()> {
    let storage = Storage::open_readonly(&database_path(config, db)).await?;
    let hits = storage.search(query, limit).await?;

    if hits.is_empty() {
        println!("No matches for '{query}'.");
        return Ok(());
    }
    for hit in &hits {
        println!("{} [{}] {}", hit.file_hash, hit.file_name, hit.header);
        println!("    {}", preview(&hit.chunk, 160));
    }
    Ok(())
}

/// First `max` characters of `text` on one line.
fn preview(text: &str, max: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(max) {
        Some((cut, _)) => format!("{}…", &flat[..cut]),
        None => flat,
    }
}

async fn cmd_status(config: &AppConfig, db: Option<PathBuf>) -> Result<()> {
    let path = database_path(config, db);
    let storage = Storage::open_readonly(&path).await?;
    let stats = storage.stats().await?;

    println!("Database:  {}", path.display());
    println!("Chunks:    {}", stats.chunks);
    println!("Sources:   {}", stats.files);
    println!("  parsed:   {}", stats.parsed);
    println!("  embedded: {}", stats.embedded);
    println!("  indexed:  {}", stats.indexed);
    println!("Runs:      {}", stats.runs);
    Ok(())
}

fn cmd_config_init(path: Option<&Path>) -> Result<()> {
    let path = match path {
        Some(path) => {
            init_config_at(path)?;
            path.to_path_buf()
        }
        None => init_config()?,
    };
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = resolve_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Result<Self> {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")?
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Ok(Self { spinner })
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn item_done(&self, label: &str, current: usize, total: usize) {
        self.spinner.set_message(format!("[{current}/{total}] {label}"));
    }
}
