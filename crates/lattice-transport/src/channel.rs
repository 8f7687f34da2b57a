//! Datagram channel between a replica and the outside world

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::{ToSocketAddrs, UdpSocket};
use tracing::trace;

use crate::error::TransportResult;

/// Unreliable, unordered, at-most-once datagram channel.
///
/// Implementations may lose or reorder datagrams; callers never assume
/// delivery.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Send one datagram to `target`
    async fn send_to(&self, data: &[u8], target: SocketAddr) -> TransportResult<usize>;

    /// Wait for the next datagram
    async fn recv_from(&self, buf: &mut [u8]) -> TransportResult<(usize, SocketAddr)>;

    /// Address this endpoint is bound to
    fn local_addr(&self) -> TransportResult<SocketAddr>;
}

/// Channel backed by a UDP socket
pub struct UdpChannel {
    socket: UdpSocket,
}

impl UdpChannel {
    pub async fn bind(addr: impl ToSocketAddrs) -> TransportResult<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self { socket })
    }

    pub fn from_socket(socket: UdpSocket) -> Self {
        Self { socket }
    }
}

#[async_trait]
impl Channel for UdpChannel {
    async fn send_to(&self, data: &[u8], target: SocketAddr) -> TransportResult<usize> {
        let sent = self.socket.send_to(data, target).await?;
        trace!(target = %target, bytes = sent, "datagram sent");
        Ok(sent)
    }

    async fn recv_from(&self, buf: &mut [u8]) -> TransportResult<(usize, SocketAddr)> {
        let (len, from) = self.socket.recv_from(buf).await?;
        trace!(from = %from, bytes = len, "datagram received");
        Ok((len, from))
    }

    fn local_addr(&self) -> TransportResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_udp_send_and_receive() {
        let a = UdpChannel::bind("127.0.0.1:0").await.unwrap();
        let b = UdpChannel::bind("127.0.0.1:0").await.unwrap();
        let b_addr = b.local_addr().unwrap();

        a.send_to(b"COUNTER:1,0", b_addr).await.unwrap();

        let mut buf = [0u8; 64];
        let (len, from) = b.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"COUNTER:1,0");
        assert_eq!(from, a.local_addr().unwrap());
    }
}
