//! # Link Statistics
//!
//! Sliding-window throughput and error counters.
//!
//! Events are timestamped as they happen and evicted once they fall out of
//! the window, so a summary always describes the most recent window only.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

use super::Shutdown;
use crate::error::Result;

/// Something worth counting on the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsEvent {
    /// Valid frame received, with its size in bytes
    Frame(usize),
    /// Frame dropped for a bad checksum
    CrcError,
    /// Telemetry frame written back to the link
    Telemetry,
}

/// Counters over the current window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSummary {
    pub frames: usize,
    pub bytes: usize,
    pub crc_errors: usize,
    pub telemetry_frames: usize,
}

impl fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} frames ({} bytes), {} CRC errors, {} telemetry frames",
            self.frames, self.bytes, self.crc_errors, self.telemetry_frames
        )
    }
}

/// Time-bounded event log
#[derive(Debug)]
pub struct StatsWindow {
    window: Duration,
    events: VecDeque<(Instant, StatsEvent)>,
}

impl StatsWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            events: VecDeque::new(),
        }
    }

    pub fn record(&mut self, event: StatsEvent) {
        self.record_at(Instant::now(), event);
    }

    /// Record an event at a given time; times must not go backwards
    pub fn record_at(&mut self, now: Instant, event: StatsEvent) {
        self.events.push_back((now, event));
        self.evict(now);
    }

    fn evict(&mut self, now: Instant) {
        while let Some(&(at, _)) = self.events.front() {
            if now.duration_since(at) <= self.window {
                break;
            }
            self.events.pop_front();
        }
    }

    pub fn summary(&mut self) -> StatsSummary {
        self.summary_at(Instant::now())
    }

    pub fn summary_at(&mut self, now: Instant) -> StatsSummary {
        self.evict(now);
        self.events
            .iter()
            .fold(StatsSummary::default(), |mut summary, &(_, event)| {
                match event {
                    StatsEvent::Frame(bytes) => {
                        summary.frames += 1;
                        summary.bytes += bytes;
                    }
                    StatsEvent::CrcError => summary.crc_errors += 1,
                    StatsEvent::Telemetry => summary.telemetry_frames += 1,
                }
                summary
            })
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Stats window shared between the bridge directions
#[derive(Debug, Clone)]
pub struct SharedStats(Arc<Mutex<StatsWindow>>);

impl SharedStats {
    pub fn new(window: Duration) -> Self {
        Self(Arc::new(Mutex::new(StatsWindow::new(window))))
    }

    pub fn record(&self, event: StatsEvent) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).record(event);
    }

    pub fn summary(&self) -> StatsSummary {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).summary()
    }
}

/// Log the current window every `period` until shutdown
pub async fn report(stats: SharedStats, period: Duration, mut shutdown: Shutdown) -> Result<()> {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // First tick fires immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            _ = ticker.tick() => {
                let summary = stats.summary();
                if summary != StatsSummary::default() {
                    info!("Link: {}", summary);
                }
            }
        }
    }
}
