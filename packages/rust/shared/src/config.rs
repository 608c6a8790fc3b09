//! Application configuration for dashscrape.
//!
//! User config lives at `~/.dashscrape/dashscrape.toml`.
//! CLI flags override config file values, which override defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{DashscrapeError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "dashscrape.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".dashscrape";

/// Prefix of every `Where` clause in the dashboard's semantic query payload.
const WHERE_POINTER: &str = "/queries/0/Query/Commands/0/SemanticQueryDataShapeCommand/Query/Where";

// ---------------------------------------------------------------------------
// Config structs (matching dashscrape.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Query endpoint settings.
    #[serde(default)]
    pub endpoint: EndpointSection,

    /// Dashboard scrape settings.
    #[serde(default)]
    pub scrape: ScrapeSection,

    /// Chunk store settings.
    #[serde(default)]
    pub chunks: ChunksSection,
}

/// `[endpoint]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointSection {
    /// Query API URL.
    #[serde(default = "default_endpoint_url")]
    pub url: String,

    /// Name of the env var holding the dashboard resource key (never store the key itself).
    #[serde(default = "default_resource_key_env")]
    pub resource_key_env: String,

    /// User-Agent sent with every query.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries for transient failures (connect errors, 429, 5xx).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff between retries.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Minimum ms between consecutive queries.
    #[serde(default = "default_rate_limit")]
    pub rate_limit_ms: u64,
}

impl Default for EndpointSection {
    fn default() -> Self {
        Self {
            url: default_endpoint_url(),
            resource_key_env: default_resource_key_env(),
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            rate_limit_ms: default_rate_limit(),
        }
    }
}

fn default_endpoint_url() -> String {
    "https://wabi-north-europe-j-primary-api.analysis.windows.net/public/reports/querydata?synchronous=true".into()
}
fn default_resource_key_env() -> String {
    "DASHSCRAPE_RESOURCE_KEY".into()
}
fn default_user_agent() -> String {
    concat!("dashscrape/", env!("CARGO_PKG_VERSION")).into()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    500
}
fn default_rate_limit() -> u64 {
    250
}

/// `[scrape]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeSection {
    /// JSON payload template for the master (page one) query.
    #[serde(default = "default_page_one_payload")]
    pub page_one_payload: String,

    /// JSON payload template for the per-topic query.
    #[serde(default = "default_topic_payload")]
    pub topic_payload: String,

    /// JSON pointer to the topic literal inside the topic payload.
    #[serde(default = "default_topic_pointer")]
    pub topic_pointer: String,

    /// JSON pointer to the record-id `In.Values` list inside the topic payload.
    #[serde(default = "default_record_ids_pointer")]
    pub record_ids_pointer: String,

    /// Column shared by the master and topic tables.
    #[serde(default = "default_record_id_column")]
    pub record_id_column: String,

    /// Topics queried one by one after the master table.
    #[serde(default = "default_topics")]
    pub topics: Vec<String>,

    /// Columns taken from each topic table, suffixed with the topic.
    #[serde(default = "default_topic_columns")]
    pub topic_columns: Vec<String>,

    /// Stems used instead of a topic column's own name when suffixing.
    #[serde(default = "default_column_aliases")]
    pub column_aliases: BTreeMap<String, String>,

    /// Columns taken unsuffixed from the last topic table.
    #[serde(default = "default_trailing_columns")]
    pub trailing_columns: Vec<String>,

    /// Directory receiving the merged CSV.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

impl Default for ScrapeSection {
    fn default() -> Self {
        Self {
            page_one_payload: default_page_one_payload(),
            topic_payload: default_topic_payload(),
            topic_pointer: default_topic_pointer(),
            record_ids_pointer: default_record_ids_pointer(),
            record_id_column: default_record_id_column(),
            topics: default_topics(),
            topic_columns: default_topic_columns(),
            column_aliases: default_column_aliases(),
            trailing_columns: default_trailing_columns(),
            output_dir: default_output_dir(),
        }
    }
}

fn default_page_one_payload() -> String {
    "queries/page_one.json".into()
}
fn default_topic_payload() -> String {
    "queries/topics.json".into()
}
fn default_topic_pointer() -> String {
    format!("{WHERE_POINTER}/0/Condition/In/Values/0/0/Literal/Value")
}
fn default_record_ids_pointer() -> String {
    format!("{WHERE_POINTER}/1/Condition/In/Values")
}
fn default_record_id_column() -> String {
    "Record ID".into()
}
fn default_topics() -> Vec<String> {
    [
        "Accountability for Discrimination/Misleading Content",
        "Connect all People",
        "Digital Commons",
        "Human Rights Online",
        "Internet Fragmentation",
        "Other Area",
        "Protect Data",
        "Regulation of AI",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
fn default_topic_columns() -> Vec<String> {
    vec![
        "Core Principles".into(),
        "Commitments, pledges or actions".into(),
    ]
}
fn default_column_aliases() -> BTreeMap<String, String> {
    BTreeMap::from([("Core Principles".into(), "Core Principle".into())])
}
fn default_trailing_columns() -> Vec<String> {
    vec!["Process description".into()]
}
fn default_output_dir() -> String {
    "data".into()
}

/// `[chunks]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunksSection {
    /// Path of the local chunk database.
    #[serde(default = "default_database")]
    pub database: String,

    /// Column whose value becomes each chunk's `file_hash`.
    #[serde(default = "default_record_id_column")]
    pub record_id_column: String,

    /// Columns joined with ", " to form each chunk's `file_name`.
    #[serde(default = "default_title_columns")]
    pub title_columns: Vec<String>,

    /// Number of leading identity columns; every later column is chunk content.
    #[serde(default = "default_leading_columns")]
    pub leading_columns: usize,
}

impl Default for ChunksSection {
    fn default() -> Self {
        Self {
            database: default_database(),
            record_id_column: default_record_id_column(),
            title_columns: default_title_columns(),
            leading_columns: default_leading_columns(),
        }
    }
}

fn default_database() -> String {
    "data/chunks.db".into()
}
fn default_title_columns() -> Vec<String> {
    ["Type", "Location formatted", "Contact Name", "Entity Name"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_leading_columns() -> usize {
    5
}

// ---------------------------------------------------------------------------
// Runtime configs (derived from AppConfig)
// ---------------------------------------------------------------------------

/// Runtime endpoint configuration with the URL validated and the key resolved.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Query API URL.
    pub url: Url,
    /// Dashboard resource key sent as a header.
    pub resource_key: String,
    /// User-Agent header value.
    pub user_agent: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Retries for transient failures.
    pub max_retries: u32,
    /// Base backoff delay between retries.
    pub retry_backoff: Duration,
    /// Minimum delay between consecutive queries.
    pub rate_limit: Duration,
}

impl TryFrom<&AppConfig> for EndpointConfig {
    type Error = DashscrapeError;

    fn try_from(config: &AppConfig) -> Result<Self> {
        let section = &config.endpoint;
        let url = Url::parse(&section.url).map_err(|e| {
            DashscrapeError::config(format!("invalid endpoint url '{}': {e}", section.url))
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(DashscrapeError::config(format!(
                "endpoint url must be http(s), got '{}'",
                url.scheme()
            )));
        }

        Ok(Self {
            url,
            resource_key: resolve_resource_key(config)?,
            user_agent: section.user_agent.clone(),
            timeout: Duration::from_secs(section.timeout_secs),
            max_retries: section.max_retries,
            retry_backoff: Duration::from_millis(section.retry_backoff_ms),
            rate_limit: Duration::from_millis(section.rate_limit_ms),
        })
    }
}

/// Runtime scrape configuration.
#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    pub page_one_payload: PathBuf,
    pub topic_payload: PathBuf,
    pub topic_pointer: String,
    pub record_ids_pointer: String,
    pub record_id_column: String,
    pub topics: Vec<String>,
    pub topic_columns: Vec<String>,
    pub column_aliases: BTreeMap<String, String>,
    pub trailing_columns: Vec<String>,
    pub output_dir: PathBuf,
}

impl From<&AppConfig> for ScrapeConfig {
    fn from(config: &AppConfig) -> Self {
        let s = &config.scrape;
        Self {
            page_one_payload: PathBuf::from(&s.page_one_payload),
            topic_payload: PathBuf::from(&s.topic_payload),
            topic_pointer: s.topic_pointer.clone(),
            record_ids_pointer: s.record_ids_pointer.clone(),
            record_id_column: s.record_id_column.clone(),
            topics: s.topics.clone(),
            topic_columns: s.topic_columns.clone(),
            column_aliases: s.column_aliases.clone(),
            trailing_columns: s.trailing_columns.clone(),
            output_dir: PathBuf::from(&s.output_dir),
        }
    }
}

/// Runtime chunk-ingestion configuration.
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    pub database: PathBuf,
    pub record_id_column: String,
    pub title_columns: Vec<String>,
    pub leading_columns: usize,
}

impl From<&AppConfig> for ChunkConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            database: PathBuf::from(&config.chunks.database),
            record_id_column: config.chunks.record_id_column.clone(),
            title_columns: config.chunks.title_columns.clone(),
            leading_columns: config.chunks.leading_columns,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.dashscrape/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| DashscrapeError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.dashscrape/dashscrape.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| DashscrapeError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        DashscrapeError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let path = config_file_path()?;
    init_config_at(&path)?;
    Ok(path)
}

/// Write a default config file at `path`, creating parent directories.
pub fn init_config_at(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| DashscrapeError::io(dir, e))?;
    }

    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| DashscrapeError::config(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| DashscrapeError::io(path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(())
}

/// Read the dashboard resource key from the env var named in the config.
pub fn resolve_resource_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.endpoint.resource_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(DashscrapeError::config(format!(
            "dashboard resource key not found. Set the {var_name} environment variable \
             (copy it from the X-PowerBI-ResourceKey request header of the public report)."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("resource_key_env"));
        assert!(toml_str.contains("DASHSCRAPE_RESOURCE_KEY"));
        assert!(toml_str.contains("Regulation of AI"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.endpoint.max_retries, 3);
        assert_eq!(parsed.scrape.topics.len(), 8);
        assert_eq!(
            parsed.scrape.column_aliases.get("Core Principles").map(String::as_str),
            Some("Core Principle")
        );
        assert_eq!(parsed.chunks.leading_columns, 5);
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let toml_str = r#"
[scrape]
topics = ["Digital Commons"]
output_dir = "/tmp/out"

[chunks]
leading_columns = 2
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.scrape.topics, vec!["Digital Commons".to_string()]);
        assert_eq!(config.scrape.record_id_column, "Record ID");
        assert_eq!(config.chunks.leading_columns, 2);
        assert_eq!(config.endpoint.timeout_secs, 30);
        assert_eq!(config.scrape.column_aliases.len(), 1);
    }

    #[test]
    fn column_aliases_replace_defaults() {
        let toml_str = r#"
[scrape.column_aliases]
"Commitments, pledges or actions" = "Commitment"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        let scrape = ScrapeConfig::from(&config);
        assert_eq!(scrape.column_aliases.len(), 1);
        assert_eq!(
            scrape.column_aliases["Commitments, pledges or actions"],
            "Commitment"
        );
        assert!(!scrape.column_aliases.contains_key("Core Principles"));
    }

    #[test]
    fn scrape_config_from_app_config() {
        let app = AppConfig::default();
        let scrape = ScrapeConfig::from(&app);
        assert_eq!(scrape.output_dir, PathBuf::from("data"));
        assert!(scrape.topic_pointer.ends_with("/Where/0/Condition/In/Values/0/0/Literal/Value"));
        assert!(scrape.record_ids_pointer.ends_with("/Where/1/Condition/In/Values"));
    }

    #[test]
    fn missing_resource_key_is_config_error() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.endpoint.resource_key_env = "DS_TEST_NONEXISTENT_KEY_12345".into();
        let result = EndpointConfig::try_from(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("resource key not found"));
    }

    #[test]
    fn init_config_at_writes_loadable_defaults() {
        let path = std::env::temp_dir()
            .join(format!("dashscrape_cfg_{}", uuid::Uuid::now_v7()))
            .join("dashscrape.toml");
        init_config_at(&path).expect("init");
        let loaded = load_config_from(&path).expect("load");
        assert_eq!(loaded.chunks.database, "data/chunks.db");
    }

    #[test]
    fn invalid_endpoint_url_rejected() {
        let mut config = AppConfig::default();
        config.endpoint.url = "ftp://example.com/query".into();
        let err = EndpointConfig::try_from(&config).unwrap_err();
        assert!(err.to_string().contains("http(s)"));
    }
}
