use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, fmt::writer::BoxMakeWriter, layer::SubscriberExt, util::SubscriberInitExt};
use vigil::{broker::Broker, config::BrokerArgs};

fn init(debug: bool, log_file: Option<&Path>) -> anyhow::Result<()> {
    let level = if debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let filter =
        filter::Targets::new().with_targets(vec![("vigil", level), ("vigil_broker", level)]);

    let writer = match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            BoxMakeWriter::new(Arc::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = BrokerArgs::parse();
    let config = args.into_config()?;
    init(config.debug, config.log_file.as_deref())?;
    trace!("started with config: {config:?}");

    let broker = match Broker::bind(config).await {
        Ok(broker) => broker,
        Err(e) => {
            error!("failed to start broker: {e:#}");
            return Err(e);
        }
    };

    broker
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("failed to listen for ctrl-c, running until killed: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    info!("broker stopped");
    Ok(())
}
