//! # Serial ↔ UDP Forwarder
//!
//! Serial to network: bytes are accumulated in a [`FrameReader`], every valid
//! frame is sent as a `type + payload` datagram and frames failing the CRC
//! check are counted and dropped.
//!
//! Network to serial: datagrams arriving on the link socket (replies from the
//! receiver) or on the input socket (local telemetry producers) are framed
//! and written to the serial port as-is.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::stats::{self, SharedStats, StatsEvent};
use super::{send_or_drop, unspecified_for, Shutdown};
use crate::config::Config;
use crate::crsf::decoder::{FrameReader, RawFrameResult};
use crate::crsf::encoder::build_frame_from_body;
use crate::crsf::protocol::CRSF_MAX_DATAGRAM_SIZE;
use crate::error::{CrsfBridgeError, Result};
use crate::serial::{ByteSink, ByteSource, CrsfSerial};

/// Serial read size
const READ_CHUNK_SIZE: usize = 512;

/// Pump frames from the serial port to `dest`
///
/// # Errors
///
/// Returns [`CrsfBridgeError::StreamClosed`] when the port reports
/// end-of-stream, and propagates read and fatal send errors.
pub async fn serial_to_network<S: ByteSource>(
    mut source: S,
    socket: Arc<UdpSocket>,
    dest: SocketAddr,
    stats: SharedStats,
    mut shutdown: Shutdown,
) -> Result<()> {
    let mut reader = FrameReader::new();
    let mut buf = [0u8; READ_CHUNK_SIZE];

    loop {
        let n = tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            read = source.read(&mut buf) => read?,
        };

        if n == 0 {
            return Err(CrsfBridgeError::StreamClosed("serial port".to_string()));
        }

        reader.extend(&buf[..n]);

        for result in reader.drain_frames() {
            match result {
                RawFrameResult::Ok(frame) => {
                    stats.record(StatsEvent::Frame(frame.as_bytes().len()));
                    send_or_drop(&socket, frame.body(), dest).await?;
                }
                RawFrameResult::CrcError => {
                    debug!("Dropped frame with bad CRC");
                    stats.record(StatsEvent::CrcError);
                }
            }
        }
    }
}

/// Which socket a datagram came in on
enum Inbound {
    Link,
    Input,
}

/// Frame datagrams from either socket and write them to the serial port
///
/// # Errors
///
/// Returns [`CrsfBridgeError::Serial`] if the port cannot be written, and
/// propagates socket receive errors.
pub async fn network_to_serial<K: ByteSink>(
    mut sink: K,
    link: Arc<UdpSocket>,
    input: Arc<UdpSocket>,
    stats: SharedStats,
    mut shutdown: Shutdown,
) -> Result<()> {
    let mut link_buf = [0u8; CRSF_MAX_DATAGRAM_SIZE];
    let mut input_buf = [0u8; CRSF_MAX_DATAGRAM_SIZE];

    loop {
        let (inbound, n, from) = tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            received = link.recv_from(&mut link_buf) => {
                let (n, from) = received?;
                (Inbound::Link, n, from)
            }
            received = input.recv_from(&mut input_buf) => {
                let (n, from) = received?;
                (Inbound::Input, n, from)
            }
        };

        let body = match inbound {
            Inbound::Link => &link_buf[..n],
            Inbound::Input => &input_buf[..n],
        };

        let frame = match build_frame_from_body(body) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping datagram from {}: {}", from, e);
                continue;
            }
        };

        sink.write_all(frame.as_bytes())
            .await
            .map_err(|e| CrsfBridgeError::Serial(format!("Failed to write frame: {}", e)))?;
        sink.flush()
            .await
            .map_err(|e| CrsfBridgeError::Serial(format!("Failed to flush serial port: {}", e)))?;

        stats.record(StatsEvent::Telemetry);
    }
}

/// Open the serial port and sockets and spawn the forwarder tasks
pub async fn start(config: &Config, tasks: &mut JoinSet<Result<()>>, shutdown: &Shutdown) -> Result<()> {
    let serial = CrsfSerial::open(&config.serial)?;
    let (reader, writer) = serial.into_split();

    let dest = config.forward.dest;
    let link = Arc::new(UdpSocket::bind(unspecified_for(dest)).await?);
    let input = Arc::new(UdpSocket::bind(config.forward.src).await?);
    info!(
        "Forwarding frames to {} from {}, accepting telemetry on {}",
        dest,
        link.local_addr()?,
        input.local_addr()?
    );

    let stats = SharedStats::new(Duration::from_millis(config.stats.window_ms));

    tasks.spawn(serial_to_network(reader, link.clone(), dest, stats.clone(), shutdown.clone()));
    tasks.spawn(network_to_serial(writer, link, input, stats.clone(), shutdown.clone()));
    tasks.spawn(stats::report(
        stats,
        Duration::from_millis(config.stats.display_interval_ms),
        shutdown.clone(),
    ));

    Ok(())
}
