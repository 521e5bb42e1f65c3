//! Command line client of the broker's command port
//!
//! Runs the command given as arguments, or reads commands from stdin until
//! `QUIT` or end of input.

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};
use vigil::{
    client::CommandClient,
    protocol::{Command, Response},
};

#[derive(Debug, Clone, Parser)]
#[command(name = "vigil-client", version)]
#[command(about = "Query monitors through a vigil broker")]
struct Args {
    /// Broker host
    #[arg(short, long, default_value = "127.0.0.1")]
    broker: String,

    /// Broker command port
    #[arg(short, long, default_value_t = 6665)]
    port: u16,

    /// Seconds to wait for an answer
    #[arg(short, long, default_value_t = 10.0)]
    timeout: f64,

    /// Command to run, e.g. `GET ALL`
    command: Vec<String>,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("vigil", LevelFilter::WARN),
        ("vigil_client", LevelFilter::WARN),
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

fn print_response(response: &Response) {
    println!("{}", response.status_line());
    if !response.body.is_empty() {
        println!("{}", response.body);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();
    let args = Args::parse();
    let timeout = Duration::try_from_secs_f64(args.timeout)
        .ok()
        .filter(|timeout| !timeout.is_zero())
        .with_context(|| {
            format!("timeout must be a positive number of seconds, got {}", args.timeout)
        })?;

    let addr = format!("{}:{}", args.broker, args.port);
    let mut client = CommandClient::connect(addr.as_str(), timeout)
        .await
        .with_context(|| format!("failed to connect to {addr}"))?;

    if !args.command.is_empty() {
        let response = client.send(&args.command.join(" ")).await?;
        print_response(&response);
        if !response.is_ok() {
            std::process::exit(1);
        }
        return Ok(());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = client.send(&line).await?;
        print_response(&response);

        if matches!(line.parse::<Command>(), Ok(Command::Quit)) {
            break;
        }
    }

    Ok(())
}
