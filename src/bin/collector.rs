use std::{sync::Arc, time::Duration};

use anyhow::{Context, bail};
use clap::Parser;
use hostwatch::{
    actors::ingest::{spawn_offline_sweeper, spawn_upsert_worker},
    api::{ApiConfig, CollectorState, ingest::Gatekeeper, spawn_collector_api},
    config::{CollectorConfig, read_config_file},
    storage::{CollectorStore, collector::SqliteCollectorStore},
};
use tracing::{error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,
}

fn init(level: Option<&str>) {
    let level = level
        .and_then(|level| level.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::INFO);

    let filter = filter::Targets::new().with_targets(vec![
        ("hostwatch", level),
        ("hostwatch_collector", level),
        ("tower_http", LevelFilter::DEBUG.min(level)),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let config = read_config_file::<CollectorConfig>(&args.file)?
        .with_env_overrides()
        .validate()?;
    init(config.log_level.as_deref());
    trace!("started with args: {args:?}");

    if config.secret.is_empty() {
        bail!("refusing to start without a shared secret (set `secret` or HOSTWATCH_SECRET)");
    }

    let store: Arc<dyn CollectorStore> = Arc::new(
        SqliteCollectorStore::open(&config.database)
            .await
            .with_context(|| format!("opening {}", config.database.path.display()))?,
    );

    let (queue, worker) = spawn_upsert_worker(store.clone());
    let sweeper = spawn_offline_sweeper(
        store.clone(),
        Duration::from_secs(config.offline_after),
        Duration::from_secs(config.sweep_interval),
    );

    let state = CollectorState::new(store.clone(), Gatekeeper::new(config.secret.as_str(), queue));
    let (addr, server) = spawn_collector_api(ApiConfig::new(config.bind_addr), state).await?;
    info!("collector ready on {addr}");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
        result = server => {
            if let Err(e) = result {
                error!("API server task failed: {e}");
            }
        }
    }

    sweeper.abort();
    worker.abort();
    if let Err(e) = store.close().await {
        error!("closing store failed: {e}");
    }

    Ok(())
}
