//! # Node Discovery
//!
//! Zero-configuration coordinator discovery over UDP broadcast. Workers
//! shout a fixed probe at the discovery port; the coordinator answers each
//! probe with its own tag, and the reply's source address becomes the
//! coordinator's address for every later TCP connection.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::common::protocol::{DISCOVERY_PROBE, DISCOVERY_REPLY, DISCOVERY_TIMEOUT_SECS};

/// Broadcast rounds per discovery call before giving up.
const BROADCAST_ROUNDS: u32 = 5;

/// Answers discovery probes forever.
///
/// Datagrams that do not carry the probe tag are dropped without a reply.
/// Only the initial bind can fail; per-packet errors are logged and the
/// responder keeps going.
pub async fn respond_to_probes(port: u16) -> Result<()> {
    let socket = UdpSocket::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind discovery responder on port {}", port))?;
    info!("📡 Discovery responder on port {}", port);

    let mut buf = [0u8; 64];
    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                warn!("⚠️ Discovery receive failed: {}", e);
                continue;
            }
        };

        let probe = String::from_utf8_lossy(&buf[..len]);
        if probe == DISCOVERY_PROBE {
            debug!("📨 Probe from {}, sending reply", peer.ip());
            if let Err(e) = socket.send_to(DISCOVERY_REPLY.as_bytes(), peer).await {
                warn!("⚠️ Discovery reply to {} failed: {}", peer, e);
            }
        }
    }
}

/// Broadcasts probes until a coordinator answers, returning its address.
///
/// Each round broadcasts once and waits one receive-timeout interval for a
/// correctly tagged reply; unrelated datagrams are ignored. Rounds are
/// bounded, so a network without a coordinator produces an error the
/// caller's own retry policy can act on.
pub async fn find_coordinator(port: u16) -> Result<IpAddr> {
    let socket = UdpSocket::bind(("0.0.0.0", 0))
        .await
        .context("Failed to bind discovery probe socket")?;
    socket
        .set_broadcast(true)
        .context("Failed to enable broadcast on probe socket")?;

    let target = SocketAddr::from((Ipv4Addr::BROADCAST, port));
    let mut buf = [0u8; 64];

    for round in 1..=BROADCAST_ROUNDS {
        socket
            .send_to(DISCOVERY_PROBE.as_bytes(), target)
            .await
            .context("Failed to send discovery broadcast")?;

        match timeout(
            Duration::from_secs(DISCOVERY_TIMEOUT_SECS),
            socket.recv_from(&mut buf),
        )
        .await
        {
            Ok(Ok((len, peer))) => {
                let reply = String::from_utf8_lossy(&buf[..len]);
                if reply == DISCOVERY_REPLY {
                    info!("📡 Found coordinator at {}", peer.ip());
                    return Ok(peer.ip());
                }
                debug!("🤷 Ignoring unrelated datagram from {}", peer);
            }
            Ok(Err(e)) => warn!("⚠️ Discovery receive failed: {}", e),
            Err(_) => debug!("⏱️ No reply in round {}, re-broadcasting", round),
        }
    }

    bail!("No coordinator answered after {} broadcasts", BROADCAST_ROUNDS)
}

// ===== Tests =====
