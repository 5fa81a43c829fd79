//! Magpie CLI: bookmarked tweets into a curated knowledge base.
//!
//! Drives the phase pipeline: caching, media interpretation, categorization,
//! kb item generation, synthesis, embedding, and repository sync.

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
