//! The broker: accepts monitors and clients and serves the registry
//!
//! ## Architecture Overview
//!
//! ```text
//!   monitor port            command port
//!        │                       │
//!        └──────► Dispatcher ◄───┘          GarbageCollector
//!                 │        │                      │
//!       spawns    │        │  spawns              │ evicts
//!                 ▼        ▼                      ▼
//!     MonitorHandler    CommandHandler ──────► Registry
//!          │                 │    │
//!          └──► Registry ◄───┘    └──► monitor (UPDATE <id>) / multicast (UPDATE ALL)
//! ```
//!
//! Every accepted connection gets its own task. The registry is the only
//! state shared between them.

pub mod command_handler;
pub mod dispatcher;
pub mod gc;
pub mod monitor_handler;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::Snapshot;
use crate::config::BrokerConfig;
use crate::error::{BrokerError, BrokerResult};
use crate::multicast::Multicaster;
use crate::registry::Registry;

pub use command_handler::CommandHandler;
pub use dispatcher::Broker;
pub use gc::{GarbageCollector, GcHandle};
pub use monitor_handler::MonitorHandler;

/// State shared by every connection handler
#[derive(Debug)]
pub struct BrokerContext {
    pub config: BrokerConfig,
    pub registry: Arc<Registry<Snapshot>>,
    pub multicaster: Multicaster,
}

impl BrokerContext {
    pub fn new(
        config: BrokerConfig,
        registry: Arc<Registry<Snapshot>>,
        multicaster: Multicaster,
    ) -> Self {
        Self {
            config,
            registry,
            multicaster,
        }
    }
}

/// Run a socket operation bounded by `limit`.
pub(crate) async fn with_timeout<T, E>(
    limit: Duration,
    operation: impl Future<Output = Result<T, E>>,
) -> BrokerResult<T>
where
    E: Into<BrokerError>,
{
    match tokio::time::timeout(limit, operation).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(BrokerError::Timeout(limit)),
    }
}
