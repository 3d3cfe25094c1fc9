use std::net::SocketAddr;

use tokio::net::UdpSocket;

use crate::error::Result;

/// Receive buffer for one datagram.
///
/// IPMI packets are small; 8 KiB leaves generous headroom.
const RECV_BUFFER_SIZE: usize = 8192;

/// One UDP endpoint bound to an ephemeral local port.
///
/// The socket is deliberately left unconnected so every received datagram
/// carries its source address; the session drops replies that do not come
/// from its target.
pub(crate) struct Transport {
    socket: UdpSocket,
    target: SocketAddr,
    buf: Vec<u8>,
}

impl Transport {
    /// Bind an ephemeral local endpoint for the given target.
    pub(crate) async fn bind(target: SocketAddr) -> Result<Self> {
        let bind_addr = match target {
            SocketAddr::V4(_) => "0.0.0.0:0",
            SocketAddr::V6(_) => "[::]:0",
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        Ok(Self {
            socket,
            target,
            buf: vec![0u8; RECV_BUFFER_SIZE],
        })
    }

    pub(crate) fn target(&self) -> SocketAddr {
        self.target
    }

    /// Send one datagram to the target.
    pub(crate) async fn send(&self, datagram: &[u8]) -> Result<()> {
        self.socket.send_to(datagram, self.target).await?;
        Ok(())
    }

    /// Receive one datagram, surfacing its source address.
    pub(crate) async fn recv(&mut self) -> Result<(Vec<u8>, SocketAddr)> {
        let (n, from) = self.socket.recv_from(&mut self.buf).await?;
        Ok((self.buf[..n].to_vec(), from))
    }
}
