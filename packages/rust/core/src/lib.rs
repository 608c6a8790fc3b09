//! Pipeline orchestration for dashscrape.
//!
//! This crate ties the query client, the decoder and the chunk store into
//! end-to-end workflows: `scrape` (dashboard → merged CSV) and `ingest`
//! (merged table → chunk store).

pub mod chunks;
pub mod merge;
pub mod pipeline;

pub use chunks::{ChunkSource, IngestSummary, TRACKER_PREFIX, export_chunks, ingest, table_to_chunks};
pub use pipeline::{
    MERGED_CSV, ProgressReporter, ScrapeResult, SilentProgress, decode_file, scrape,
};
