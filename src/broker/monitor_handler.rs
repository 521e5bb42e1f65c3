//! Monitor side of the broker
//!
//! One handler per accepted monitor connection, finished after a single
//! exchange:
//!
//! ```text
//! AwaitHeader ──BEL──► NewMonitor ──► Update ──► Close
//!      │                                ▲
//!      └──────────────SOH───────────────┘
//! ```
//!
//! Every failure is answered with its response code before the socket is
//! closed; nothing escapes to the dispatcher.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::Framed;
use tracing::{debug, instrument, trace, warn};

use super::{BrokerContext, with_timeout};
use crate::error::{BrokerError, BrokerResult};
use crate::protocol::frame::{self, MonitorHeader};
use crate::protocol::{MonitorCodec, Response};
use crate::snapshot::decode_snapshot;

#[derive(Debug, Clone, PartialEq, Eq)]
enum MonitorState {
    AwaitHeader,
    NewMonitor { port: String },
    Update { id: String },
    /// Terminal; carries the final answer, if any
    Close(Option<Response>),
}

pub struct MonitorHandler<S> {
    stream: Framed<S, MonitorCodec>,
    peer: SocketAddr,
    ctx: Arc<BrokerContext>,
}

impl<S> MonitorHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, peer: SocketAddr, ctx: Arc<BrokerContext>) -> Self {
        Self {
            stream: Framed::new(stream, MonitorCodec::new()),
            peer,
            ctx,
        }
    }

    #[instrument(skip_all, fields(peer = %self.peer))]
    pub async fn run(mut self) {
        let mut state = MonitorState::AwaitHeader;

        let mut unread_input = false;

        loop {
            state = match state {
                MonitorState::Close(response) => {
                    if let Some(response) = response {
                        unread_input = !response.is_ok();
                        self.finish(&response).await;
                    }
                    break;
                }
                current => match self.step(current).await {
                    Ok(next) => next,
                    Err(e) => {
                        debug!("monitor exchange failed: {e}");
                        MonitorState::Close(Some(Response::from(&e)))
                    }
                },
            };
        }

        // best effort, the peer may already be gone
        let _ = self.stream.get_mut().shutdown().await;
        if unread_input {
            self.drain().await;
        }
        debug!("monitor handler closed connection");
    }

    /// Consume what the peer still sends after a refused message.
    ///
    /// Closing with unread input resets the connection, which can destroy
    /// the answer before the peer read it.
    async fn drain(&mut self) {
        let limit = self.ctx.config.connection_timeout();
        let mut sink = tokio::io::sink();
        let mut rest = self.stream.get_mut().take(frame::MAX_FRAME_LEN as u64);
        let _ = tokio::time::timeout(limit, tokio::io::copy(&mut rest, &mut sink)).await;
    }

    async fn step(&mut self, state: MonitorState) -> BrokerResult<MonitorState> {
        match state {
            MonitorState::AwaitHeader => {
                let Some(header) = self.read_frame().await? else {
                    trace!("monitor closed the connection without a message");
                    return Ok(MonitorState::Close(None));
                };
                Ok(match MonitorHeader::parse(&header)? {
                    MonitorHeader::NewMonitor { port } => MonitorState::NewMonitor { port },
                    MonitorHeader::Update { id } => MonitorState::Update { id },
                })
            }
            MonitorState::NewMonitor { port } => self.new_monitor(&port).await,
            MonitorState::Update { id } => self.update_monitor(&id).await,
            closed @ MonitorState::Close(_) => Ok(closed),
        }
    }

    async fn new_monitor(&mut self, port: &str) -> BrokerResult<MonitorState> {
        let port = frame::parse_advertised_port(port, &self.ctx.config.monitor_ports())?;
        let id = self.ctx.registry.register(self.peer.ip(), port);

        let config = &self.ctx.config;
        let handshake = Response::ok(format!(
            "{id} {} {}",
            config.multicast_group, config.multicast_port
        ));
        self.write(&handshake).await?;
        debug!("new monitor {id} advertised port {port}");

        Ok(MonitorState::Update { id })
    }

    async fn update_monitor(&mut self, id: &str) -> BrokerResult<MonitorState> {
        if !self.ctx.registry.exists(id) {
            return Err(BrokerError::NotFound(id.to_string()));
        }
        self.ctx.registry.keep_alive(id)?;

        let payload = self.read_frame().await?.ok_or_else(|| {
            BrokerError::BadMessage("connection closed before snapshot".to_string())
        })?;
        trace!("{} bytes of snapshot from {id}", payload.len());

        let snapshot = decode_snapshot(&payload)?;
        self.ctx.registry.update(id, snapshot)?;
        debug!("monitor {id} updated");

        Ok(MonitorState::Close(Some(Response::ok("Update successful"))))
    }

    async fn read_frame(&mut self) -> BrokerResult<Option<Bytes>> {
        let limit = self.ctx.config.connection_timeout();
        with_timeout(limit, async { self.stream.next().await.transpose() }).await
    }

    async fn write(&mut self, response: &Response) -> BrokerResult<()> {
        let limit = self.ctx.config.connection_timeout();
        with_timeout(limit, self.stream.send(response)).await
    }

    async fn finish(&mut self, response: &Response) {
        if let Err(e) = self.write(response).await {
            warn!("failed to answer monitor ({}): {e}", response.status_line());
        }
    }
}
