//! Monitor agent: the pushing side of the monitor protocol
//!
//! ```text
//! tick / wake ──► registered? ──no──► handshake (BEL port ETX, first snapshot)
//!                     │
//!                    yes ──► push (SOH id ETX snapshot ETX) ──501──► handshake
//! ```
//!
//! Wakes come from the broker: a direct `update` request on the advertised
//! TCP port, or an `update` datagram on the multicast group.

use std::future::Future;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio::time::interval;
use tokio_util::codec::Framed;
use tracing::{debug, info, instrument, trace, warn};

use crate::Snapshot;
use crate::broker::with_timeout;
use crate::config::MonitorConfig;
use crate::error::{BrokerError, BrokerResult};
use crate::multicast::join_group;
use crate::protocol::command::is_update_request;
use crate::protocol::codec::next_response;
use crate::protocol::frame::{self, MonitorHeader};
use crate::protocol::{CommandCodec, Response, ResponseCode, ResponseCodec};
use crate::snapshot::{SnapshotCollector, encode_snapshot};

/// Something able to take a snapshot of the local machine.
///
/// `collect` may block; it always runs on the blocking thread pool.
pub trait SnapshotSource: Send + 'static {
    fn collect(&mut self) -> Snapshot;
}

impl SnapshotSource for SnapshotCollector {
    fn collect(&mut self) -> Snapshot {
        SnapshotCollector::collect(self)
    }
}

/// What the broker told us during the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub id: String,
    pub multicast_group: Ipv4Addr,
    pub multicast_port: u16,
}

impl FromStr for Registration {
    type Err = BrokerError;

    /// Parses the `<id> <group> <port>` detail of a handshake answer.
    fn from_str(detail: &str) -> Result<Self, Self::Err> {
        let invalid = || BrokerError::BadMessage(format!("invalid handshake answer '{detail}'"));

        let mut parts = detail.split_whitespace();
        let (Some(id), Some(group), Some(port), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };

        Ok(Self {
            id: id.to_string(),
            multicast_group: group.parse().map_err(|_| invalid())?,
            multicast_port: port.parse().map_err(|_| invalid())?,
        })
    }
}

pub struct MonitorAgent<C> {
    config: MonitorConfig,
    source: Arc<Mutex<C>>,
    /// Port announced to the broker, the bound port once `run` started
    advertised_port: u16,
    registration: Option<Registration>,
}

impl<C: SnapshotSource> MonitorAgent<C> {
    pub fn new(config: MonitorConfig, source: C) -> Self {
        Self {
            advertised_port: config.listen_port,
            config,
            source: Arc::new(Mutex::new(source)),
            registration: None,
        }
    }

    pub fn registration(&self) -> Option<&Registration> {
        self.registration.as_ref()
    }

    /// Push a snapshot, registering first if needed.
    ///
    /// A `501` from the broker means it forgot about us (eviction or
    /// restart), so the agent registers again right away.
    pub async fn report(&mut self) -> BrokerResult<()> {
        if let Some(id) = self.registration.as_ref().map(|r| r.id.clone()) {
            match self.push(&id).await {
                Err(BrokerError::NotFound(_)) => {
                    info!("broker no longer knows {id}, registering again");
                    self.registration = None;
                }
                other => return other,
            }
        }

        let registration = self.handshake().await?;
        info!("registered as {}", registration.id);
        self.registration = Some(registration);
        Ok(())
    }

    /// Register with the broker and deliver the first snapshot.
    #[instrument(skip(self), fields(port = self.advertised_port))]
    pub async fn handshake(&self) -> BrokerResult<Registration> {
        let mut stream = self.connect().await?;

        let header = MonitorHeader::NewMonitor {
            port: self.advertised_port.to_string(),
        };
        let answer = self.round_trip(&mut stream, header.encode()).await?;
        let registration: Registration = expect_ok(answer)?.detail.parse()?;
        debug!("broker assigned id {}", registration.id);

        let payload = frame::encode_payload(self.snapshot_json().await?.as_bytes())?;
        expect_ok(self.round_trip(&mut stream, payload).await?)?;

        Ok(registration)
    }

    /// Send one snapshot for an already registered `id`.
    #[instrument(skip(self))]
    pub async fn push(&self, id: &str) -> BrokerResult<()> {
        let message = frame::encode_update(id, self.snapshot_json().await?.as_bytes())?;
        let mut stream = self.connect().await?;

        let answer = expect_ok(self.round_trip(&mut stream, message).await?)?;
        trace!("broker accepted snapshot: {}", answer.detail);
        Ok(())
    }

    /// Report every `interval` seconds and whenever the broker asks, until
    /// `shutdown` resolves.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, self.config.listen_port))
            .await
            .with_context(|| format!("failed to listen on port {}", self.config.listen_port))?;
        self.advertised_port = listener.local_addr()?.port();
        info!("listening for update requests on port {}", self.advertised_port);

        let wake = Arc::new(Notify::new());
        let mut tasks = JoinSet::new();
        tasks.spawn(serve_update_requests(
            listener,
            wake.clone(),
            self.config.connection_timeout,
        ));

        let mut multicast_joined = false;
        let mut ticker = interval(Duration::from_secs(self.config.interval.max(1)));
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = ticker.tick() => trace!("push interval elapsed"),
                _ = wake.notified() => debug!("broker requested an update"),
                _ = &mut shutdown => {
                    info!("shutting down");
                    break;
                }
            }

            if let Err(e) = self.report().await {
                warn!("failed to report to {}: {e}", self.config.broker);
            }

            if !multicast_joined && let Some(registration) = &self.registration {
                // joined once; a failure is not retried every tick
                multicast_joined = true;
                match join_group(registration.multicast_group, registration.multicast_port) {
                    Ok(socket) => {
                        tasks.spawn(serve_multicast(socket, wake.clone()));
                    }
                    Err(e) => warn!(
                        "failed to join multicast group {}:{}: {e}",
                        registration.multicast_group, registration.multicast_port
                    ),
                }
            }
        }

        tasks.shutdown().await;
        Ok(())
    }

    async fn snapshot_json(&self) -> BrokerResult<String> {
        let source = self.source.clone();
        let snapshot = tokio::task::spawn_blocking(move || source.lock().collect())
            .await
            .map_err(|e| BrokerError::Internal(format!("snapshot collection failed: {e}")))?;
        encode_snapshot(&snapshot)
    }

    async fn connect(&self) -> BrokerResult<Framed<TcpStream, ResponseCodec>> {
        let broker = (self.config.broker.as_str(), self.config.broker_port);
        let stream = with_timeout(self.config.connection_timeout, TcpStream::connect(broker))
            .await
            .map_err(|e| match e {
                BrokerError::Timeout(_) => e,
                other => BrokerError::Unreachable(format!(
                    "{}:{}: {other}",
                    self.config.broker, self.config.broker_port
                )),
            })?;
        Ok(Framed::new(stream, ResponseCodec::new()))
    }

    async fn round_trip(
        &self,
        stream: &mut Framed<TcpStream, ResponseCodec>,
        message: Vec<u8>,
    ) -> BrokerResult<Response> {
        let limit = self.config.connection_timeout;
        with_timeout(limit, stream.send(message)).await?;
        with_timeout(limit, next_response(stream)).await
    }
}

fn expect_ok(response: Response) -> BrokerResult<Response> {
    match response.code {
        ResponseCode::Ok => Ok(response),
        ResponseCode::NotFound => Err(BrokerError::NotFound(response.detail)),
        _ => Err(BrokerError::Internal(format!(
            "broker answered '{}'",
            response.status_line()
        ))),
    }
}

async fn serve_update_requests(listener: TcpListener, wake: Arc<Notify>, timeout: Duration) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                trace!("update request connection from {peer}");
                let wake = wake.clone();
                tokio::spawn(async move {
                    if let Err(e) = answer_update_request(stream, &wake, timeout).await {
                        debug!("failed to answer {peer}: {e}");
                    }
                });
            }
            Err(e) => warn!("failed to accept update request: {e}"),
        }
    }
}

async fn answer_update_request(
    stream: TcpStream,
    wake: &Notify,
    timeout: Duration,
) -> BrokerResult<()> {
    let mut session = Framed::new(stream, CommandCodec::new());
    let Some(request) = with_timeout(timeout, async { session.next().await.transpose() }).await?
    else {
        return Ok(());
    };

    let response = match request {
        Ok(line) if is_update_request(&line) => {
            wake.notify_one();
            Response::ok("Update scheduled")
        }
        Ok(line) => Response::new(
            ResponseCode::BadMessage,
            format!("unexpected request '{}'", line.trim()),
        ),
        Err(e) => Response::from(&e),
    };

    with_timeout(timeout, session.send(&response)).await?;
    with_timeout(timeout, session.get_mut().shutdown()).await
}

async fn serve_multicast(socket: UdpSocket, wake: Arc<Notify>) {
    let mut buf = [0u8; 64];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, from)) => {
                if std::str::from_utf8(&buf[..len]).is_ok_and(is_update_request) {
                    trace!("multicast update request from {from}");
                    wake.notify_one();
                }
            }
            Err(e) => {
                warn!("multicast socket failed: {e}");
                break;
            }
        }
    }
}
