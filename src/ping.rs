//! RMCP/ASF presence discovery.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use rand::RngCore;
use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};

use crate::codec::{self, AsfMessage, RmcpMessage};
use crate::config::DEFAULT_PORT;
use crate::debug;

/// Probe `host` on the standard RMCP port for IPMI support.
///
/// Sends one ASF presence ping from a transient endpoint and reports whether
/// a pong arrived whose supported-entities byte advertises IPMI. Any error or
/// timeout yields `false`.
pub async fn ping(host: IpAddr, wait: Duration) -> bool {
    ping_addr(SocketAddr::new(host, DEFAULT_PORT), wait).await
}

/// [`ping`] against an explicit socket address.
pub async fn ping_addr(target: SocketAddr, wait: Duration) -> bool {
    match probe(target, wait).await {
        Ok(supported) => supported,
        Err(_) => false,
    }
}

async fn probe(target: SocketAddr, wait: Duration) -> crate::error::Result<bool> {
    let bind_addr = match target {
        SocketAddr::V4(_) => "0.0.0.0:0",
        SocketAddr::V6(_) => "[::]:0",
    };
    let socket = UdpSocket::bind(bind_addr).await?;

    let tag = (rand::rng().next_u32() & 0xFF) as u8;
    let request = codec::encode_asf_ping(0x00, tag);
    debug::dump_hex("asf ping", &request);
    socket.send_to(&request, target).await?;

    let deadline = Instant::now() + wait;
    let mut buf = [0u8; 512];
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(false);
        }

        let (n, from) = match timeout(remaining, socket.recv_from(&mut buf)).await {
            Err(_) => return Ok(false),
            Ok(received) => received?,
        };
        if from != target {
            continue;
        }
        debug::dump_hex("asf response", &buf[..n]);

        // ACKs and unrelated traffic are ignored; only a pong for our tag
        // settles the probe.
        let Ok(message) = codec::decode_rmcp(&buf[..n]) else {
            continue;
        };
        let RmcpMessage::Asf { message: AsfMessage::Pong(pong), .. } = &message else {
            continue;
        };
        if pong.tag != tag {
            continue;
        }
        if let Some(ack) = message.required_ack() {
            let _ = socket.send_to(&ack, target).await;
        }
        return Ok(pong.supports_ipmi());
    }
}
