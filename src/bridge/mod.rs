//! # Bridge Module
//!
//! The long-running tasks built on the CRSF codec:
//!
//! - `forward`: serial ↔ UDP bridge
//! - `router`: fan-out of simulator telemetry to registered clients
//! - `receiver`: RC channel decoding on the network side
//! - `telemetry_link`: simulator telemetry → CRSF telemetry frames
//! - `stats`: sliding-window throughput and error counters
//!
//! Every task takes a `watch::Receiver<bool>` shutdown signal and returns
//! once it changes (or its sender is dropped).

pub mod forward;
pub mod receiver;
pub mod router;
pub mod stats;
pub mod telemetry_link;

use std::io;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::debug;

use crate::error::{CrsfBridgeError, Result};

/// Shutdown signal shared by all tasks
pub type Shutdown = watch::Receiver<bool>;

/// Failed datagram send that is not fatal to the sending task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendFailure {
    /// Peer refused or could not be reached; the datagram is lost
    Unreachable,
    /// Socket not ready; nothing was sent
    NotReady,
}

/// Sort a datagram send error into recoverable kinds
///
/// # Errors
///
/// Returns the original error for anything other than an unreachable peer
/// or a socket that is not ready.
pub fn classify_send_error(err: io::Error) -> Result<SendFailure> {
    match err.kind() {
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::HostUnreachable
        | io::ErrorKind::NetworkUnreachable => Ok(SendFailure::Unreachable),
        io::ErrorKind::NotConnected | io::ErrorKind::WouldBlock => Ok(SendFailure::NotReady),
        _ => Err(CrsfBridgeError::Io(err)),
    }
}

/// Send one datagram, treating an unreachable destination as a dropped sample
///
/// Returns whether the datagram was handed to the network.
pub async fn send_or_drop(socket: &UdpSocket, data: &[u8], dest: SocketAddr) -> Result<bool> {
    match socket.send_to(data, dest).await {
        Ok(_) => Ok(true),
        Err(e) => match classify_send_error(e)? {
            SendFailure::Unreachable => {
                debug!("{} unreachable, dropped {} bytes", dest, data.len());
                Ok(false)
            }
            SendFailure::NotReady => Ok(false),
        },
    }
}

/// Wildcard address of the same family as `peer`, for ephemeral sockets
pub(crate) fn unspecified_for(peer: SocketAddr) -> SocketAddr {
    match peer {
        SocketAddr::V4(_) => SocketAddr::from(([0, 0, 0, 0], 0)),
        SocketAddr::V6(_) => SocketAddr::from(([0u16; 8], 0)),
    }
}
