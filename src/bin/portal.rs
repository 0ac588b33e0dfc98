use std::{sync::Arc, time::Duration};

use anyhow::Context;
use clap::Parser;
use hostwatch::{
    actors::{
        fanout::FanoutRegistry,
        sync::{SyncConfig, SyncHandle},
    },
    api::{ApiConfig, PortalState, spawn_portal_api},
    config::{PortalConfig, read_config_file},
    storage::{PortalStore, portal::SqlitePortalStore},
};
use tracing::{debug, error, info, level_filters::LevelFilter, trace};
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
        ("hostwatch_portal", level),
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

    let config = read_config_file::<PortalConfig>(&args.file)?
        .with_env_overrides()
        .validate()?;
    init(config.log_level.as_deref());
    trace!("started with args: {args:?}");

    let thresholds = config.resolve_thresholds()?;
    debug!("thresholds: {thresholds:?}");

    let store: Arc<dyn PortalStore> = Arc::new(
        SqlitePortalStore::open(&config.database)
            .await
            .with_context(|| format!("opening {}", config.database.path.display()))?,
    );

    let sync = SyncHandle::spawn(
        SyncConfig {
            collector_url: config.collector_url.clone(),
            interval: Duration::from_secs(config.sync_interval),
            backfill: Duration::from_secs(config.backfill),
            request_timeout: Duration::from_secs(config.request_timeout),
        },
        store.clone(),
        thresholds,
    )?;
    let fanout = FanoutRegistry::new(store.clone(), Duration::from_secs(config.fanout_interval));

    let state = PortalState::new(store.clone(), fanout.clone(), Some(sync.clone()));
    let (addr, server) =
        spawn_portal_api(ApiConfig::new(config.bind_addr), state, config.api_token.clone()).await?;
    info!("portal ready on {addr}, syncing from {}", config.collector_url);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
        result = server => {
            if let Err(e) = result {
                error!("API server task failed: {e}");
            }
        }
    }

    fanout.shutdown();
    if let Err(e) = sync.shutdown().await {
        debug!("sync bridge already stopped: {e}");
    }
    if let Err(e) = store.close().await {
        error!("closing store failed: {e}");
    }

    Ok(())
}
