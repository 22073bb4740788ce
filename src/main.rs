use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use stormfeed::config::Config;
use stormfeed::delivery::{BrokerClient, KafkaBroker, MemoryBroker, Publisher};
use stormfeed::feed::{BackfillDate, FeedDate};
use stormfeed::pipeline::{Pipeline, Scheduler, TriggerHandle};
use stormfeed::report::Normalizer;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser, Debug)]
#[command(
    name = "stormfeed",
    about = "Publish storm prediction center reports to Kafka"
)]
struct Args {
    /// Configuration file (missing file means defaults)
    #[arg(long, value_name = "FILE", default_value = "stormfeed.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run on the configured interval until SIGINT/SIGTERM; SIGHUP runs now
    Serve,
    /// Run once and exit
    Run {
        /// Backfill day as YYYY-MM-DD or unix seconds (default: today's feeds)
        #[arg(long, value_name = "DATE")]
        date: Option<BackfillDate>,

        /// Publish to an in-memory broker and print the messages instead
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = Config::resolve(&args.config)
        .with_context(|| format!("Failed to load config from '{}'", args.config.display()))?;

    match args.command {
        Command::Serve => serve(&config).await,
        Command::Run { date, dry_run } => {
            let date = date.map_or(FeedDate::Today, FeedDate::Backfill);
            run_once(&config, date, dry_run).await
        }
    }
}

fn build_pipeline(config: &Config, broker: Arc<dyn BrokerClient>) -> Result<Pipeline> {
    let client = reqwest::Client::builder()
        .user_agent(concat!("stormfeed/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;

    let publisher = Arc::new(Publisher::new(
        broker,
        config.retry_policy(),
        config.delivery.max_message_bytes,
    ));

    Ok(Pipeline::new(
        client,
        config.base_url()?,
        config.feed_limits(),
        Normalizer::default(),
        publisher,
        config.broker.topic.clone(),
    ))
}

async fn serve(config: &Config) -> Result<()> {
    let broker = Arc::new(KafkaBroker::new(config.kafka_settings()));
    let pipeline = Arc::new(build_pipeline(config, broker)?);

    let (scheduler, trigger) =
        Scheduler::new(pipeline, config.interval(), config.shutdown_grace());
    forward_hangups(trigger)?;
    let shutdown = shutdown_signal()?;
    scheduler.run_until(shutdown).await;
    Ok(())
}

/// SIGHUP requests an immediate run of today's feeds.
#[cfg(unix)]
fn forward_hangups(trigger: TriggerHandle) -> Result<()> {
    let mut sighup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
    tokio::spawn(async move {
        while sighup.recv().await.is_some() {
            tracing::info!("Received SIGHUP, triggering run");
            trigger.trigger(FeedDate::Today);
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn forward_hangups(_trigger: TriggerHandle) -> Result<()> {
    Ok(())
}

async fn run_once(config: &Config, date: FeedDate, dry_run: bool) -> Result<()> {
    let memory = Arc::new(MemoryBroker::new());
    let broker: Arc<dyn BrokerClient> = if dry_run {
        memory.clone()
    } else {
        Arc::new(KafkaBroker::new(config.kafka_settings()))
    };
    let pipeline = build_pipeline(config, broker)?;

    let shutdown = shutdown_signal()?;
    let summary = pipeline
        .run_to_completion(&date, shutdown, config.shutdown_grace())
        .await
        .with_context(|| format!("Run for {date} failed"))?;

    if dry_run {
        for message in memory.sent() {
            println!("{}", String::from_utf8_lossy(&message.payload));
        }
    }
    println!(
        "{}: {} tornado, {} hail, {} wind; {} delivered, {} dropped",
        date, summary.tornado, summary.hail, summary.wind, summary.delivered, summary.dropped
    );
    Ok(())
}

/// Resolves on the first SIGTERM or SIGINT (Ctrl-C elsewhere).
fn shutdown_signal() -> Result<impl std::future::Future<Output = ()>> {
    #[cfg(unix)]
    {
        let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
        Ok(async move {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down gracefully"),
                _ = sigint.recv() => tracing::info!("Received SIGINT, shutting down gracefully"),
            }
        })
    }
    #[cfg(not(unix))]
    {
        Ok(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received Ctrl-C, shutting down gracefully");
            }
        })
    }
}
