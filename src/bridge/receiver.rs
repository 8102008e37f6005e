//! # RC Channel Receiver
//!
//! Network side of the RC link.
//!
//! Receives `type + payload` datagrams from the forwarder, unpacks RC channel
//! frames and hands changed channel sets to a [`ChannelSink`]. The address the
//! frames come from is published as the return path for telemetry.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::telemetry_link::{self, ReturnPath};
use super::Shutdown;
use crate::config::Config;
use crate::crsf::decoder::decode_rc_channels;
use crate::crsf::encoder::build_frame_from_body;
use crate::crsf::protocol::{ticks_to_us, ChannelSet, CRSF_MAX_DATAGRAM_SIZE};
use crate::error::{CrsfBridgeError, Result};

/// Consumer of decoded channel sets
pub trait ChannelSink: Send {
    /// Act on a new channel set
    ///
    /// `previous` is the last set that was dispatched successfully, so
    /// implementations can limit themselves to the channels that changed.
    fn dispatch(&mut self, channels: &ChannelSet, previous: Option<&ChannelSet>) -> Result<()>;
}

/// Sink that logs channel changes as pulse widths
#[derive(Debug, Default)]
pub struct LoggingSink;

impl ChannelSink for LoggingSink {
    fn dispatch(&mut self, channels: &ChannelSet, previous: Option<&ChannelSet>) -> Result<()> {
        match previous {
            None => {
                let pulses: Vec<u16> = channels.iter().map(|&ticks| ticks_to_us(ticks)).collect();
                info!("First channel set (us): {:?}", pulses);
            }
            Some(previous) => {
                for (index, (&value, &old)) in channels.iter().zip(previous.iter()).enumerate() {
                    if value != old {
                        debug!("ch{} {}us -> {}us", index + 1, ticks_to_us(old), ticks_to_us(value));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Decodes RC frames and dispatches changes
#[derive(Debug)]
pub struct ChannelReceiver<S> {
    sink: S,
    axis_max: u16,
    previous: Option<ChannelSet>,
}

impl<S: ChannelSink> ChannelReceiver<S> {
    pub fn new(sink: S, axis_max: u16) -> Self {
        Self {
            sink,
            axis_max,
            previous: None,
        }
    }

    /// Last successfully dispatched channel set
    pub fn previous(&self) -> Option<&ChannelSet> {
        self.previous.as_ref()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Handle one `type + payload` datagram
    ///
    /// Returns the dispatched channel set, or `None` for frames that are not
    /// RC channels and for sets identical to the previous one.
    ///
    /// # Errors
    ///
    /// Returns [`CrsfBridgeError::ChannelOutOfRange`] if any channel is above
    /// the configured axis maximum, and any error from the sink. In both cases
    /// the previous set is left unchanged.
    pub fn handle_datagram(&mut self, body: &[u8]) -> Result<Option<ChannelSet>> {
        let frame = build_frame_from_body(body)?;
        let Some(channels) = decode_rc_channels(&frame) else {
            debug!("Ignoring {:?} frame", frame.frame_type());
            return Ok(None);
        };

        self.validate(&channels)?;

        if self.previous == Some(channels) {
            return Ok(None);
        }

        self.sink.dispatch(&channels, self.previous.as_ref())?;
        self.previous = Some(channels);
        Ok(Some(channels))
    }

    fn validate(&self, channels: &ChannelSet) -> Result<()> {
        match channels.iter().enumerate().find(|&(_, &value)| value > self.axis_max) {
            Some((index, &value)) => Err(CrsfBridgeError::ChannelOutOfRange {
                index,
                value,
                max: self.axis_max,
            }),
            None => Ok(()),
        }
    }
}

/// Receive RC frames until shutdown, publishing the sender as return address
pub async fn receive_channels<S: ChannelSink>(
    socket: Arc<UdpSocket>,
    mut receiver: ChannelReceiver<S>,
    return_addr: watch::Sender<Option<SocketAddr>>,
    mut shutdown: Shutdown,
) -> Result<()> {
    let mut buf = [0u8; CRSF_MAX_DATAGRAM_SIZE];

    loop {
        let (n, from) = tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            received = socket.recv_from(&mut buf) => received?,
        };

        return_addr.send_if_modified(|current| {
            if *current == Some(from) {
                return false;
            }
            info!("Return address is now {}", from);
            *current = Some(from);
            true
        });

        match receiver.handle_datagram(&buf[..n]) {
            Ok(_) => {}
            Err(e @ CrsfBridgeError::ChannelOutOfRange { .. }) => warn!("Rejected channels from {}: {}", from, e),
            Err(e) => debug!("Dropped datagram from {}: {}", from, e),
        }
    }
}

/// Bind the receiver socket and spawn the receiver (and telemetry) tasks
pub async fn start(config: &Config, tasks: &mut JoinSet<Result<()>>, shutdown: &Shutdown) -> Result<()> {
    let socket = Arc::new(UdpSocket::bind(config.receiver.bind).await?);
    info!("Receiving RC frames on {}", socket.local_addr()?);

    let (return_tx, return_rx) = watch::channel(None);
    let receiver = ChannelReceiver::new(LoggingSink, config.receiver.axis_max);
    tasks.spawn(receive_channels(socket.clone(), receiver, return_tx, shutdown.clone()));

    if config.telemetry.enabled {
        telemetry_link::start(&config.telemetry, socket, ReturnPath::Learned(return_rx), tasks, shutdown).await?;
    }

    Ok(())
}
