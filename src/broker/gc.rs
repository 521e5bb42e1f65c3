//! GarbageCollector - Evicts monitors that stopped reporting
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick → Registry::evict_older_than(ttl)
//!     ↑
//!     └─── Commands (FlushNow, Shutdown)
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, instrument, warn};

use crate::Snapshot;
use crate::registry::Registry;

#[derive(Debug)]
pub enum GcCommand {
    /// Run a sweep right away and report how many monitors it evicted
    FlushNow { respond_to: oneshot::Sender<usize> },
    Shutdown,
}

/// Actor sweeping the registry at a fixed interval
pub struct GarbageCollector {
    registry: Arc<Registry<Snapshot>>,
    /// Maximum age of a record before it is evicted
    ttl: Duration,
    interval: Duration,
    command_rx: mpsc::Receiver<GcCommand>,
}

impl GarbageCollector {
    pub fn new(
        registry: Arc<Registry<Snapshot>>,
        ttl: Duration,
        interval: Duration,
        command_rx: mpsc::Receiver<GcCommand>,
    ) -> Self {
        Self {
            registry,
            ttl,
            interval,
            command_rx,
        }
    }

    /// Runs until a `Shutdown` command arrives or every handle is dropped.
    #[instrument(skip(self), fields(ttl = ?self.ttl, interval = ?self.interval))]
    pub async fn run(mut self) {
        debug!("starting garbage collector");

        let mut ticker = interval(self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep();
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        GcCommand::FlushNow { respond_to } => {
                            debug!("received FlushNow command");
                            let _ = respond_to.send(self.sweep());
                        }

                        GcCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("garbage collector stopped");
    }

    fn sweep(&self) -> usize {
        let evicted = self.registry.evict_older_than(self.ttl);
        if evicted > 0 {
            info!("evicted {evicted} monitors without news for {:?}", self.ttl);
        }
        evicted
    }
}

/// Handle owning the garbage collector task
pub struct GcHandle {
    sender: mpsc::Sender<GcCommand>,
    task: JoinHandle<()>,
}

impl GcHandle {
    pub fn spawn(registry: Arc<Registry<Snapshot>>, ttl: Duration, interval: Duration) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let actor = GarbageCollector::new(registry, ttl, interval, cmd_rx);

        Self {
            sender: cmd_tx,
            task: tokio::spawn(actor.run()),
        }
    }

    /// Sweep immediately instead of waiting for the next tick.
    pub async fn flush_now(&self) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(GcCommand::FlushNow { respond_to: tx })
            .await
            .context("failed to send FlushNow command")?;

        rx.await.context("failed to receive response")
    }

    /// Stop the collector and wait for its task to finish.
    pub async fn shutdown(self) -> Result<()> {
        self.sender
            .send(GcCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        self.task.await.context("garbage collector task failed")
    }
}
