//! Client side of the broker
//!
//! One handler per accepted client connection. Unlike monitors, clients keep
//! their session open and send one command per line until `QUIT` or EOF.
//! A failing command is answered and the session goes on; only an idle
//! timeout ends it early.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, instrument, trace, warn};

use super::{BrokerContext, with_timeout};
use crate::error::{BrokerError, BrokerResult};
use crate::protocol::codec::MAX_COMMAND_LEN;
use crate::protocol::command::MONITOR_UPDATE_REQUEST;
use crate::protocol::{Command, CommandCodec, Response, Target};
use crate::snapshot::encode_optional_snapshot;

pub struct CommandHandler<S> {
    stream: Framed<S, CommandCodec>,
    peer: SocketAddr,
    ctx: Arc<BrokerContext>,
}

impl<S> CommandHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, peer: SocketAddr, ctx: Arc<BrokerContext>) -> Self {
        Self {
            stream: Framed::new(stream, CommandCodec::new()),
            peer,
            ctx,
        }
    }

    #[instrument(skip_all, fields(peer = %self.peer))]
    pub async fn run(mut self) {
        loop {
            let line = match self.read_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    debug!("client disconnected");
                    break;
                }
                Err(e @ BrokerError::Timeout(_)) => {
                    debug!("client session timed out");
                    self.finish(&Response::from(&e)).await;
                    break;
                }
                Err(e @ BrokerError::BadMessage(_)) => {
                    self.finish(&Response::from(&e)).await;
                    break;
                }
                Err(e) => {
                    debug!("client connection failed: {e}");
                    break;
                }
            };

            let command = match line {
                Ok(text) if text.trim().is_empty() => continue,
                Ok(text) => text.parse::<Command>(),
                Err(e) => Err(e),
            };

            let (response, quit) = match command {
                Ok(Command::Quit) => (Response::ok("Bye"), true),
                Ok(command) => {
                    trace!("executing {command}");
                    let response = self.execute(command).await.unwrap_or_else(|e| {
                        debug!("command failed: {e}");
                        Response::from(&e)
                    });
                    (response, false)
                }
                Err(e) => (Response::from(&e), false),
            };

            if let Err(e) = self.write(&response).await {
                debug!("failed to answer client: {e}");
                break;
            }
            if quit {
                break;
            }
        }

        let _ = self.stream.get_mut().shutdown().await;
        debug!("command handler closed connection");
    }

    async fn execute(&self, command: Command) -> BrokerResult<Response> {
        let registry = &self.ctx.registry;

        match command {
            Command::List => {
                let ids = registry.list();
                Ok(Response::ok(format!("{} monitors", ids.len())).with_body(ids.join("\n")))
            }
            Command::Get(Target::Monitor(id)) => {
                let view = registry.get(&id)?;
                let snapshot = encode_optional_snapshot(view.snapshot.as_deref())?;
                Ok(Response::ok(id).with_body(format!("{} {}\n{snapshot}", view.ip, view.port)))
            }
            Command::Get(Target::All) => {
                let views = registry.get_all();
                let mut body = Vec::with_capacity(views.len() * 2);
                for view in &views {
                    body.push(format!("{} {} {}", view.id, view.ip, view.port));
                    body.push(encode_optional_snapshot(view.snapshot.as_deref())?);
                }
                Ok(Response::ok(format!("{} monitors", views.len())).with_body(body.join("\n")))
            }
            Command::Update(Target::Monitor(id)) => {
                let view = registry.get(&id)?;
                registry.keep_alive(&id)?;
                self.relay_update(view.ip, view.port).await
            }
            Command::Update(Target::All) => {
                self.ctx.multicaster.send_update().await?;
                Ok(Response::ok(format!(
                    "Update requested from {}",
                    self.ctx.multicaster.group()
                )))
            }
            Command::Help => Ok(Response::ok("Commands").with_body(Command::USAGE)),
            Command::Quit => Ok(Response::ok("Bye")),
        }
    }

    /// Ask the monitor at `ip:port` for an update and translate its answer.
    #[instrument(skip(self))]
    async fn relay_update(&self, ip: IpAddr, port: u16) -> BrokerResult<Response> {
        let addr = SocketAddr::new(ip, port);
        let limit = self.ctx.config.connection_timeout();
        let unreachable = |e: BrokerError| match e {
            BrokerError::Timeout(_) => e,
            other => BrokerError::Unreachable(format!("{addr}: {other}")),
        };

        let stream = with_timeout(limit, TcpStream::connect(addr))
            .await
            .map_err(unreachable)?;
        let mut lines = Framed::new(stream, LinesCodec::new_with_max_length(MAX_COMMAND_LEN));

        with_timeout(limit, lines.send(MONITOR_UPDATE_REQUEST.trim_end()))
            .await
            .map_err(unreachable)?;

        let answer = with_timeout(limit, async { lines.next().await.transpose() })
            .await
            .map_err(unreachable)?;
        let Some(line) = answer else {
            return Err(BrokerError::Unreachable(format!(
                "{addr}: connection closed without an answer"
            )));
        };

        let answer = Response::parse_status_line(&line).map_err(|_| {
            BrokerError::Unreachable(format!("{addr}: unexpected answer '{}'", line.trim()))
        })?;

        if answer.is_ok() {
            debug!("monitor at {addr} accepted the update request");
            Ok(Response::ok(answer.detail))
        } else {
            warn!("monitor at {addr} refused the update request: {}", answer.status_line());
            Err(BrokerError::Unreachable(format!(
                "{addr}: monitor answered '{}'",
                answer.status_line()
            )))
        }
    }

    /// Next line of the session, `None` once the client closed it
    async fn read_line(&mut self) -> BrokerResult<Option<BrokerResult<String>>> {
        let limit = self.ctx.config.connection_timeout();
        with_timeout(limit, async { self.stream.next().await.transpose() }).await
    }

    async fn write(&mut self, response: &Response) -> BrokerResult<()> {
        let limit = self.ctx.config.connection_timeout();
        with_timeout(limit, self.stream.send(response)).await
    }

    async fn finish(&mut self, response: &Response) {
        if let Err(e) = self.write(response).await {
            trace!("failed to send final answer ({}): {e}", response.status_line());
        }
    }
}
