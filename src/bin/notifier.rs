use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use opencollective_notifier::config::{AppConfig, Args, Config};
use opencollective_notifier::detector::NoveltyDetector;
use opencollective_notifier::feed::Feed;
use opencollective_notifier::notifier::WebhookNotifier;
use opencollective_notifier::poll::Poller;
use opencollective_notifier::reporter;
use opencollective_notifier::store::WatermarkStore;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    // .env must be loaded before clap reads the environment
    if dotenvy::dotenv().is_err() {
        info!("No .env file found");
    }
    let args = Args::parse();

    let file = AppConfig::load(&args.config)?;
    let config = Config::resolve(args, file)?;
    info!(
        "Starting notifier: feed={:?} watermark={} start={} state={}",
        config.feed,
        config.watermark_mode,
        config.start_date.to_rfc3339(),
        config.state_path.display(),
    );

    let client = config
        .http_client()
        .context("failed to build HTTP client")?;
    let feed = Feed::from_config(&config, client.clone());
    let notifier = WebhookNotifier::new(client, &config.webhook_base, &config.token)?;
    let poller = Poller::new(
        feed,
        notifier,
        NoveltyDetector::new(config.watermark_mode),
        WatermarkStore::new(&config.state_path),
        config.start_date,
    );

    let watermark = poller.load_watermark()?;
    match &watermark {
        Some(wm) => info!("Loaded {} watermark", wm.mode()),
        None => info!("No saved watermark, the first cycle only records a baseline"),
    }

    if config.once {
        let outcome = poller.run_cycle(watermark).await?;
        reporter::report_cycle(&outcome.report());
        return Ok(());
    }

    let interval = config
        .periodicity
        .context("PERIODICITY is required unless --once is given")?;
    info!(
        "Entering polling loop (interval: {}m). Press Ctrl+C to stop.",
        interval.as_secs() / 60
    );
    poller.run(watermark, interval).await?;
    Ok(())
}
