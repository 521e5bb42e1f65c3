use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};
use vigil::{
    agent::MonitorAgent,
    config::MonitorConfig,
    snapshot::SnapshotCollector,
    util::{DEFAULT_PUSH_INTERVAL, get_broker, get_broker_port, get_listen_port},
};

/// Pushes snapshots of this machine to a vigil broker
#[derive(Debug, Clone, Parser)]
#[command(name = "vigil-monitor", version)]
struct Args {
    /// Broker host [env: VIGIL_BROKER]
    #[arg(short, long)]
    broker: Option<String>,

    /// Broker monitor port [env: VIGIL_BROKER_PORT]
    #[arg(short = 'p', long)]
    broker_port: Option<u16>,

    /// Port to listen on for direct update requests [env: VIGIL_LISTEN_PORT]
    #[arg(short, long)]
    listen_port: Option<u16>,

    /// Seconds between two pushes
    #[arg(short, long, default_value_t = DEFAULT_PUSH_INTERVAL, value_parser = clap::value_parser!(u64).range(1..))]
    interval: u64,

    /// Socket timeout in seconds
    #[arg(short, long, default_value_t = 3.0)]
    timeout: f64,

    /// Log at DEBUG level
    #[arg(short, long)]
    debug: bool,
}

impl Args {
    fn into_config(self) -> anyhow::Result<MonitorConfig> {
        let connection_timeout = Duration::try_from_secs_f64(self.timeout)
            .ok()
            .filter(|timeout| !timeout.is_zero())
            .with_context(|| {
                format!("timeout must be a positive number of seconds, got {}", self.timeout)
            })?;

        Ok(MonitorConfig {
            broker: self.broker.unwrap_or_else(get_broker),
            broker_port: self.broker_port.unwrap_or_else(get_broker_port),
            listen_port: self.listen_port.unwrap_or_else(get_listen_port),
            interval: self.interval,
            connection_timeout,
        })
    }
}

fn init(debug: bool) {
    dotenv::dotenv().ok();

    let level = if debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let filter =
        filter::Targets::new().with_targets(vec![("vigil", level), ("vigil_monitor", level)]);
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
    let args = Args::parse();
    init(args.debug);
    trace!("started with args: {args:?}");

    let config = args.into_config()?;
    info!(
        "reporting to {}:{} every {}s",
        config.broker, config.broker_port, config.interval
    );

    let collector = tokio::task::spawn_blocking(SnapshotCollector::new).await?;
    MonitorAgent::new(config, collector)
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("failed to listen for ctrl-c, running until killed: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await
}
