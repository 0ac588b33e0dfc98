use std::sync::Arc;

use clap::Parser;
use hostwatch::{
    actors::{
        producer::{SnapshotProducer, handoff},
        uploader::{StreamUploader, run_upload_loop},
    },
    config::{AgentConfig, read_config_file},
    monitors::host::SysinfoSource,
};
use tracing::{info, level_filters::LevelFilter, trace, warn};
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
        ("hostwatch_agent", level),
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

    let config = read_config_file::<AgentConfig>(&args.file)?
        .with_env_overrides()
        .validate()?;
    init(config.log_level.as_deref());
    trace!("started with args: {args:?}");

    if config.secret.is_empty() {
        warn!("no shared secret configured, the collector will reject the handshake");
    }

    let (slot, samples) = handoff();
    let producer = SnapshotProducer::new(SysinfoSource::new(), slot, config.collect_period());
    let uploader = Arc::new(StreamUploader::new(
        config.server_url.clone(),
        config.secret.clone(),
        config.io_timeout(),
    ));

    info!("reporting to {} every {:?}", config.server_url, config.upload_period());

    let mut producer_task = tokio::spawn(producer.run());
    let mut upload_task = tokio::spawn(run_upload_loop(uploader.clone(), samples, config.upload_period()));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
        _ = &mut producer_task => warn!("snapshot producer stopped"),
        _ = &mut upload_task => warn!("upload loop stopped"),
    }

    producer_task.abort();
    upload_task.abort();
    uploader.close().await;

    Ok(())
}
