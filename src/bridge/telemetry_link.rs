//! # Telemetry Link
//!
//! Simulator telemetry to CRSF telemetry.
//!
//! Three tasks cooperate through a `watch` channel holding the latest record:
//!
//! - the receive task decodes simulator datagrams as they arrive
//! - the keepalive task keeps the registration with the router alive
//! - the encode task wakes on a fixed cadence and sends the latest record,
//!   as CRSF `type + payload` datagrams, to the return path
//!
//! The encoder runs independently of the simulator's update rate: a record
//! is re-sent until a newer one arrives or it exceeds the maximum age.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use super::router::ControlCommand;
use super::{send_or_drop, unspecified_for, Shutdown};
use crate::config::TelemetryConfig;
use crate::error::Result;
use crate::telemetry::{DecodePlan, TelemetryEncoder, TelemetryRecord};

/// Largest simulator telemetry datagram
const MAX_TELEMETRY_DATAGRAM: usize = 65_507;

/// Where encoded telemetry is sent
#[derive(Debug, Clone)]
pub enum ReturnPath {
    /// Fixed address from configuration
    Fixed(SocketAddr),
    /// Address learned from incoming RC traffic, unknown until the first frame
    Learned(watch::Receiver<Option<SocketAddr>>),
}

impl ReturnPath {
    pub fn current(&self) -> Option<SocketAddr> {
        match self {
            Self::Fixed(addr) => Some(*addr),
            Self::Learned(rx) => *rx.borrow(),
        }
    }
}

/// Latest decoded record and when it arrived
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub record: TelemetryRecord,
    pub received: Instant,
}

/// Socket the simulator telemetry arrives on
#[derive(Debug)]
pub struct TelemetrySource {
    socket: Arc<UdpSocket>,
    router: Option<SocketAddr>,
}

impl TelemetrySource {
    /// Bind an ephemeral socket when going through the router, or the
    /// configured telemetry port otherwise
    pub async fn bind(config: &TelemetryConfig) -> Result<Self> {
        let socket = match config.router {
            Some(router) => UdpSocket::bind(unspecified_for(router)).await?,
            None => UdpSocket::bind(config.bind).await?,
        };
        Ok(Self {
            socket: Arc::new(socket),
            router: config.router,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn router(&self) -> Option<SocketAddr> {
        self.router
    }

    pub fn socket(&self) -> Arc<UdpSocket> {
        self.socket.clone()
    }
}

/// Register with the router every `period`, unregister on shutdown
pub async fn keepalive(
    socket: Arc<UdpSocket>,
    router: SocketAddr,
    period: Duration,
    mut shutdown: Shutdown,
) -> Result<()> {
    let register = [ControlCommand::Register.opcode()];
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                send_or_drop(&socket, &[ControlCommand::Unregister.opcode()], router).await?;
                info!("Unregistered from router {}", router);
                return Ok(());
            }
            _ = ticker.tick() => {
                if send_or_drop(&socket, &register, router).await? {
                    debug!("Registered with router {}", router);
                }
            }
        }
    }
}

/// Decode simulator datagrams into `latest` until shutdown
pub async fn receive_records(
    socket: Arc<UdpSocket>,
    plan: DecodePlan,
    latest: watch::Sender<Option<Snapshot>>,
    mut shutdown: Shutdown,
) -> Result<()> {
    let mut buf = vec![0u8; MAX_TELEMETRY_DATAGRAM];

    loop {
        let (n, from) = tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            received = socket.recv_from(&mut buf) => received?,
        };

        match plan.decode(&buf[..n]) {
            Ok(record) => {
                latest.send_replace(Some(Snapshot {
                    record,
                    received: Instant::now(),
                }));
            }
            Err(e) => debug!("Ignoring telemetry from {}: {}", from, e),
        }
    }
}

/// Encoder cadence and staleness limit
#[derive(Debug, Clone, Copy)]
pub struct EncodeTiming {
    pub period: Duration,
    pub max_age: Duration,
}

/// Encode the latest record every `timing.period` and send it to the return path
pub async fn encode_records(
    latest: watch::Receiver<Option<Snapshot>>,
    mut encoder: TelemetryEncoder,
    out: Arc<UdpSocket>,
    path: ReturnPath,
    timing: EncodeTiming,
    mut shutdown: Shutdown,
) -> Result<()> {
    let mut ticker = interval(timing.period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            _ = ticker.tick() => {}
        }

        let Some(snapshot) = latest.borrow().clone() else {
            continue;
        };
        if snapshot.received.elapsed() > timing.max_age {
            continue;
        }
        let Some(dest) = path.current() else {
            continue;
        };

        for payload in encoder.encode(&snapshot.record) {
            send_or_drop(&out, &payload.body(), dest).await?;
        }
    }
}

/// Spawn the telemetry tasks, sending encoded frames from `out` to `path`
pub async fn start(
    config: &TelemetryConfig,
    out: Arc<UdpSocket>,
    path: ReturnPath,
    tasks: &mut JoinSet<Result<()>>,
    shutdown: &Shutdown,
) -> Result<()> {
    let plan = config.decode_plan()?;
    let source = TelemetrySource::bind(config).await?;
    match source.router() {
        Some(router) => info!("Telemetry via router {} on {}", router, source.local_addr()?),
        None => info!("Telemetry on {}", source.local_addr()?),
    }

    let (latest_tx, latest_rx) = watch::channel(None);
    tasks.spawn(receive_records(source.socket(), plan, latest_tx, shutdown.clone()));

    if let Some(router) = source.router() {
        tasks.spawn(keepalive(
            source.socket(),
            router,
            config.keepalive_interval(),
            shutdown.clone(),
        ));
    }

    let timing = EncodeTiming {
        period: config.interval(),
        max_age: config.max_age(),
    };
    tasks.spawn(encode_records(
        latest_rx,
        TelemetryEncoder::new(config.origin()),
        out,
        path,
        timing,
        shutdown.clone(),
    ));

    Ok(())
}

/// Standalone deployment: encoded frames go to `crsf_dest`
pub async fn start_standalone(
    config: &TelemetryConfig,
    tasks: &mut JoinSet<Result<()>>,
    shutdown: &Shutdown,
) -> Result<()> {
    let out = Arc::new(UdpSocket::bind(unspecified_for(config.crsf_dest)).await?);
    info!("Sending CRSF telemetry to {}", config.crsf_dest);
    start(config, out, ReturnPath::Fixed(config.crsf_dest), tasks, shutdown).await
}
