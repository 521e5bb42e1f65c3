//! Accept loop of the broker
//!
//! Owns both listening sockets, hands every accepted connection to a fresh
//! handler task and coordinates shutdown: stop accepting, let running
//! handlers finish, stop the garbage collector, then release the sockets.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpSocket};
use tracing::{debug, error, info, instrument, warn};

use super::{BrokerContext, CommandHandler, GcHandle, MonitorHandler};
use crate::Snapshot;
use crate::config::BrokerConfig;
use crate::live_set::LiveSet;
use crate::multicast::Multicaster;
use crate::registry::Registry;

pub struct Broker {
    ctx: Arc<BrokerContext>,
    monitor_listener: TcpListener,
    command_listener: TcpListener,
    monitor_handlers: LiveSet,
    command_handlers: LiveSet,
}

impl Broker {
    /// Validate `config` and open every socket the broker needs.
    pub async fn bind(config: BrokerConfig) -> Result<Self> {
        config.validate()?;

        let monitor_listener = listen(config.monitor_addr(), config.connection_queue_size)
            .with_context(|| format!("failed to listen for monitors on {}", config.monitor_addr()))?;
        let command_listener = listen(config.command_addr(), config.connection_queue_size)
            .with_context(|| format!("failed to listen for clients on {}", config.command_addr()))?;
        let multicaster = Multicaster::bind(config.multicast_addr(), config.multicast_ttl)
            .await
            .context("failed to create multicast socket")?;

        info!(
            "listening for monitors on {}",
            monitor_listener.local_addr()?
        );
        info!(
            "listening for clients on {}",
            command_listener.local_addr()?
        );

        let ctx = BrokerContext::new(config, Arc::new(Registry::new()), multicaster);

        Ok(Self {
            ctx: Arc::new(ctx),
            monitor_listener,
            command_listener,
            monitor_handlers: LiveSet::new("monitor"),
            command_handlers: LiveSet::new("command"),
        })
    }

    pub fn monitor_addr(&self) -> Result<SocketAddr> {
        Ok(self.monitor_listener.local_addr()?)
    }

    pub fn command_addr(&self) -> Result<SocketAddr> {
        Ok(self.command_listener.local_addr()?)
    }

    pub fn registry(&self) -> Arc<Registry<Snapshot>> {
        self.ctx.registry.clone()
    }

    /// Serve until `shutdown` resolves.
    ///
    /// Connections already accepted are served to completion before this
    /// returns; none are cut off.
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let config = &self.ctx.config;
        let gc = GcHandle::spawn(
            self.ctx.registry.clone(),
            config.data_life_time(),
            config.gc_interval(),
        );
        debug!(
            "garbage collector evicts after {:?}, sweeping every {:?}",
            config.data_life_time(),
            config.gc_interval()
        );

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = self.monitor_listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!("monitor connection from {peer}");
                        let guard = self.monitor_handlers.register();
                        let handler = MonitorHandler::new(stream, peer, self.ctx.clone());
                        tokio::spawn(async move {
                            handler.run().await;
                            guard.unregister();
                        });
                    }
                    Err(e) => warn!("failed to accept monitor connection: {e}"),
                },

                accepted = self.command_listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!("client connection from {peer}");
                        let guard = self.command_handlers.register();
                        let handler = CommandHandler::new(stream, peer, self.ctx.clone());
                        tokio::spawn(async move {
                            handler.run().await;
                            guard.unregister();
                        });
                    }
                    Err(e) => warn!("failed to accept client connection: {e}"),
                },

                _ = &mut shutdown => {
                    info!("shutting down, no longer accepting connections");
                    break;
                }
            }
        }

        debug!(
            "waiting for {} monitor and {} client handlers",
            self.monitor_handlers.len(),
            self.command_handlers.len()
        );
        self.monitor_handlers.wait_all().await;
        info!("all monitor handlers finished");
        self.command_handlers.wait_all().await;
        info!("all client handlers finished");

        if let Err(e) = gc.shutdown().await {
            error!("failed to stop garbage collector: {e:#}");
        }

        drop(self.monitor_listener);
        info!("monitor listener closed");
        drop(self.command_listener);
        info!("client listener closed");

        Ok(())
    }
}

fn listen(addr: SocketAddr, backlog: u32) -> std::io::Result<TcpListener> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(backlog)
}
