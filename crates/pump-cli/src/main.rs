use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::time::{Duration, sleep};
use tracing::info;

use pump_core::app::{ConsumerLoop, ErrorPolicy, PublishReport, PublisherLoop, PumpConfig};
use pump_core::domain::{Metrics, MetricsSnapshot};
use pump_core::impls::{FsPayloadStore, InMemoryTransport};

#[derive(Debug, Parser)]
#[command(name = "pump", about = "Publish to a topic, consume its queue, persist payloads")]
struct Cli {
    /// TOML config file; defaults apply when omitted.
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Publish a batch through an in-memory topic and consume it into the storage directory.
    Run {
        /// Override `publisher.total`.
        #[arg(long)]
        total: Option<u64>,
        /// Override `consumer.storage_dir`.
        #[arg(long)]
        storage_dir: Option<PathBuf>,
    },
    /// Print the effective configuration.
    Config,
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let mut config = match &cli.config {
        Some(path) => PumpConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => PumpConfig::default(),
    };

    match cli.command.unwrap_or(Command::Run {
        total: None,
        storage_dir: None,
    }) {
        Command::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Command::Run { total, storage_dir } => {
            if let Some(total) = total {
                config.publisher.total = total;
            }
            if let Some(dir) = storage_dir {
                config.consumer.storage_dir = dir;
            }
            config.validate()?;
            run(config).await
        }
    }
}

async fn run(config: PumpConfig) -> anyhow::Result<()> {
    // (A) topic → queue の配線
    let transport = Arc::new(InMemoryTransport::new());
    transport
        .subscribe(&config.publisher.topic, &config.consumer.queue)
        .await;
    if let ErrorPolicy::DeadLetter { topic } = &config.consumer.error_policy {
        transport.create_topic(topic).await;
    }

    // (B) consumer を起動
    let store = Arc::new(
        FsPayloadStore::open(&config.consumer.storage_dir)
            .await
            .context("preparing storage directory")?,
    );
    let metrics = Arc::new(Metrics::new());
    let consumer =
        ConsumerLoop::from_config(transport.clone(), store, metrics.clone(), &config.consumer)
            .spawn();

    // (C) publish（全 unit of work の完了まで待つ）
    let publisher = PublisherLoop::from_config(transport.clone(), &config.publisher)?;
    let report = publisher.run(config.publisher.total).await;

    // (D) consumer が追いつくか、halt するか、Ctrl-C まで待つ
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        let snapshot = metrics.snapshot();
        if consumer.is_finished() || caught_up(&snapshot, &report) {
            break;
        }
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupted");
                break;
            }
            _ = sleep(Duration::from_millis(20)) => {}
        }
    }

    let result = consumer.shutdown_and_join().await;
    let summary = serde_json::json!({
        "publish": report,
        "consume": metrics.snapshot(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    result.context("consumer halted")
}

/// Every published message has been deleted from the queue. Dead-lettered
/// messages are deleted too, so they are already in `acknowledged`. Failures
/// are not counted: a skipped message can come back and be acknowledged later.
fn caught_up(snapshot: &MetricsSnapshot, report: &PublishReport) -> bool {
    snapshot.acknowledged >= report.succeeded
}
