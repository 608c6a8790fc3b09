//! dashscrape CLI: scrape a public dashboard into CSV and text chunks.
//!
//! Decodes the dashboard's columnar query responses, merges the per-topic
//! tables, and loads the result into a local chunk store for retrieval.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
