//! Client of the broker's command port

use std::time::Duration;

use futures_util::SinkExt;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::Framed;
use tracing::trace;

use crate::error::{BrokerError, BrokerResult};
use crate::protocol::codec::next_response;
use crate::protocol::{Response, ResponseCodec};

/// One open session with a broker
pub struct CommandClient {
    stream: Framed<TcpStream, ResponseCodec>,
    timeout: Duration,
}

impl CommandClient {
    pub async fn connect(addr: impl ToSocketAddrs, timeout: Duration) -> BrokerResult<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| BrokerError::Timeout(timeout))?
            .map_err(|e| BrokerError::Unreachable(e.to_string()))?;

        Ok(Self {
            stream: Framed::new(stream, ResponseCodec::new()),
            timeout,
        })
    }

    /// Send one command line and wait for its complete response.
    pub async fn send(&mut self, command: &str) -> BrokerResult<Response> {
        let line = format!("{}\n", command.trim_end());
        trace!("sending '{}'", line.trim_end());

        self.stream.send(line).await?;
        tokio::time::timeout(self.timeout, next_response(&mut self.stream))
            .await
            .map_err(|_| BrokerError::Timeout(self.timeout))?
    }
}
