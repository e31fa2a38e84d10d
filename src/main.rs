// SPDX-License-Identifier: MPL-2.0

use bsky_feeds::{BskyClient, CacheDb, FeedService, OutputFormat, Settings, runtime};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Print the Atom or RSS feed of a Bluesky profile
#[derive(Parser, Debug)]
#[command(name = "bsky-feeds", version, about)]
struct Cli {
    /// Handle (alice.bsky.social) or DID (did:plc:...)
    identifier: String,

    /// posts_and_author_threads, posts_no_replies, posts_with_media or posts_with_replies
    #[arg(short, long)]
    filter: Option<String>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Atom)]
    format: OutputFormat,

    /// Settings file; defaults to the user config directory
    #[arg(long)]
    settings: Option<PathBuf>,

    /// SQLite cache; overrides the settings file
    #[arg(long)]
    database: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(body) => {
            println!("{body}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            eprintln!("bsky-feeds: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<String, Box<dyn std::error::Error>> {
    let settings = match &cli.settings {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    };

    let db = match cli.database.as_ref().or(settings.database_path.as_ref()) {
        Some(path) => CacheDb::open(path)?,
        None => CacheDb::open_default()?,
    };
    let client = BskyClient::new(&settings.service_url, settings.request_timeout())?;
    let service = FeedService::new(db, Arc::new(client), settings);

    let document = runtime::block_on(service.get_feed(
        &cli.identifier,
        cli.filter.as_deref(),
        cli.format,
    ))??;
    Ok(document.body)
}
