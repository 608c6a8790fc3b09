//! Shared types, error model, and configuration for dashscrape.
//!
//! This crate is the foundation depended on by all other dashscrape crates.
//! It provides:
//! - [`DashscrapeError`]: the unified error type
//! - Domain types ([`ChunkRecord`], [`FileTrackerEntry`], [`RunId`])
//! - Configuration ([`AppConfig`], [`EndpointConfig`], [`ScrapeConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ChunkConfig, ChunksSection, EndpointConfig, EndpointSection, ScrapeConfig,
    ScrapeSection, config_dir, config_file_path, init_config, init_config_at, load_config,
    load_config_from, resolve_resource_key,
};
pub use error::{DashscrapeError, Result};
pub use types::{CHUNK_TYPE_DASHBOARD, ChunkRecord, FileTrackerEntry, RunId, content_hash};
