use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use fleetwatch::{
    config::read_config_file,
    monitor::Monitor,
    scheduler::Scheduler,
};
use tracing::{info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("fleetwatch", LevelFilter::DEBUG),
        ("fleetwatch_hub", LevelFilter::TRACE),
        ("tower_http", LevelFilter::DEBUG),
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
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;

    let monitor = Arc::new(Monitor::from_config(&config).await?);
    info!(
        "monitoring {} instances with {} rules",
        monitor.registry().len(),
        config.rules.len()
    );

    let scheduler = Scheduler::start(
        monitor.clone(),
        Duration::from_secs(config.scheduler.fast_interval_secs),
        Duration::from_secs(config.scheduler.slow_interval_secs),
    );

    #[cfg(feature = "api")]
    {
        let state = fleetwatch::api::ApiState::new(monitor.clone());
        let addr = fleetwatch::api::spawn_api_server(config.api.clone(), state).await?;
        info!("API available at http://{addr}/api/v1");
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    scheduler.stop().await;
    monitor.shutdown().await;

    Ok(())
}
