//! Probe: fetch the configured feed once and show what the next cycle would
//! announce. Never notifies and never writes the state file.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use opencollective_notifier::config::{self, AppConfig, CONFIG_PATH, Config, FeedKind};
use opencollective_notifier::detector::NoveltyDetector;
use opencollective_notifier::feed::{Feed, TransactionFeed, apply_floor};
use opencollective_notifier::notifier::format_message;
use opencollective_notifier::store::WatermarkStore;

#[derive(Parser)]
#[command(name = "probe_feed", about = "Dry-run one detection cycle against the live feed")]
struct Args {
    /// Feed to poll (overrides the config file)
    #[arg(long, value_enum)]
    feed: Option<FeedKind>,

    /// Start date floor (defaults to the Unix epoch)
    #[arg(long, env = "START_DATE")]
    start_date: Option<String>,

    /// Path to the TOML config file
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,

    /// Path to the watermark state file (overrides the config file)
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Print every decoded record
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if dotenvy::dotenv().is_err() {
        info!("No .env file found");
    }
    let args = Args::parse();

    let file = AppConfig::load(&args.config)?;
    let start_date = args
        .start_date
        .unwrap_or_else(|| "1970-01-01T00:00:00".to_string());
    let cli = config::Args {
        start_date: Some(start_date),
        token: Some("probe".to_string()),
        periodicity: None,
        feed: args.feed,
        config: args.config,
        state_file: args.state_file,
        once: true,
    };
    let config = Config::resolve(cli, file)?;

    println!("=== Probe: {:?} feed ===", config.feed);
    let client = config.http_client().context("failed to build HTTP client")?;
    let feed = Feed::from_config(&config, client);

    let mut batch = feed.fetch().await?;
    println!("Fetched {} records", batch.len());
    let dropped = apply_floor(&mut batch, config.start_date);
    println!("Dropped {dropped} at or before {}", config.start_date.to_rfc3339());

    if args.verbose {
        println!("{}", serde_json::to_string_pretty(&batch)?);
    }

    let sorted = batch.windows(2).all(|w| w[0].timestamp >= w[1].timestamp);
    println!("Newest-first order holds: {sorted}");
    if let (Some(first), Some(max)) = (batch.first(), batch.iter().map(|r| r.timestamp).max()) {
        println!("Position 0: {}  true max: {}", first.timestamp, max);
    }
    let ids = batch.iter().filter(|r| r.id.is_some()).count();
    println!("Records with id: {ids}/{}", batch.len());

    let store = WatermarkStore::new(&config.state_path);
    let prior = store.load_for(config.watermark_mode)?;
    println!(
        "Watermark at {}: {}",
        store.path().display(),
        prior
            .as_ref()
            .map(|w| serde_json::to_string(w).unwrap_or_default())
            .unwrap_or_else(|| "absent".to_string())
    );

    let Some(prior) = prior else {
        println!("Next cycle records a baseline from the full fetch and sends nothing");
        return Ok(());
    };

    let detection = NoveltyDetector::new(config.watermark_mode).detect(&batch, Some(&prior));
    println!("New records: {}", detection.new.len());
    match format_message(&detection.new) {
        Some((message, lines)) => {
            println!("Would send {lines} line(s):");
            println!("{message}");
        }
        None => println!("Would send nothing"),
    }

    Ok(())
}
