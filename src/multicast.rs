//! UDP multicast fan-out of update requests
//!
//! The broker only sends on the group, monitors only receive. Delivery is best
//! effort: the broker never learns who received a request.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use tokio::net::UdpSocket;
use tracing::{debug, trace};

use crate::error::{BrokerError, BrokerResult};
use crate::protocol::command::MONITOR_UPDATE_REQUEST;

/// Send-only socket addressing the multicast group
#[derive(Debug)]
pub struct Multicaster {
    socket: UdpSocket,
    group: SocketAddr,
}

impl Multicaster {
    /// Create the socket without joining the group.
    pub async fn bind(group: SocketAddr, ttl: u32) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.set_multicast_ttl_v4(ttl)?;
        debug!("multicast socket created for {group} (ttl {ttl}, not joined)");

        Ok(Self { socket, group })
    }

    pub fn group(&self) -> SocketAddr {
        self.group
    }

    /// Ask every listening monitor to push an update.
    pub async fn send_update(&self) -> BrokerResult<()> {
        let payload = MONITOR_UPDATE_REQUEST.as_bytes();
        let sent = self
            .socket
            .send_to(payload, self.group)
            .await
            .map_err(|e| BrokerError::Internal(format!("multicast send failed: {e}")))?;

        if sent != payload.len() {
            return Err(BrokerError::Internal(format!(
                "short multicast write ({sent} of {} bytes)",
                payload.len()
            )));
        }

        trace!("sent update request to {}", self.group);
        Ok(())
    }
}

/// Bind a socket to `port` and join `group` on every interface.
///
/// Address reuse is enabled so several monitors on one host can listen at once.
#[cfg(feature = "agent")]
pub fn join_group(group: Ipv4Addr, port: u16) -> std::io::Result<UdpSocket> {
    use socket2::{Domain, Protocol, Socket, Type};

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())?;
    socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
    socket.set_nonblocking(true)?;

    debug!("joined multicast group {group}:{port}");
    UdpSocket::from_std(socket.into())
}
