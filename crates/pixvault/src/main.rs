//! Pixvault CLI - media-library ingestion backend.
//!
//! Pixvault imports images from single uploads, zip archives and web pages,
//! deduplicates them by content, generates thumbnails, and tracks every
//! import as a job that clients can poll.
//!
//! # Usage
//!
//! ```bash
//! # Run the Jobs API
//! pixvault serve --bind 0.0.0.0:8080
//!
//! # Import an archive locally with a progress bar
//! pixvault import ./holiday.zip --outcomes
//!
//! # Crawl a gallery page
//! pixvault import https://example.com/gallery --max-images 50
//!
//! # View configuration
//! pixvault config show
//! ```

use clap::{Parser, Subcommand};

mod cli;
mod logging;
mod server;

/// Pixvault - image-import ingestion pipeline with a Jobs API.
#[derive(Parser, Debug)]
#[command(name = "pixvault")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP Jobs API
    Serve(cli::serve::ServeArgs),

    /// Import a file, archive or URL as a local job
    Import(cli::import::ImportArgs),

    /// View and manage configuration
    Config(cli::config::ConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logging isn't up yet, so config problems go to stderr directly.
    let config = match pixvault_core::Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "Warning: Failed to load config: {e}\n  \
                 Using default configuration. Check your config file with `pixvault config check`."
            );
            pixvault_core::Config::default()
        }
    };
    logging::init_from_config(&config, cli.verbose, cli.json_logs);

    tracing::debug!("pixvault v{}", pixvault_core::VERSION);

    match cli.command {
        Commands::Serve(args) => cli::serve::execute(args).await,
        Commands::Import(args) => cli::import::execute(args).await,
        Commands::Config(args) => cli::config::execute(args).await,
    }
}
