//! Progress stream parsing and throttled emission.

use std::sync::Arc;
use std::time::Duration;

use encast_models::ProgressSample;
use tokio::sync::{mpsc, Mutex};
use tokio::time::MissedTickBehavior;

/// Throttle window between progress emissions.
pub const EMIT_INTERVAL: Duration = Duration::from_millis(250);

/// Parse an `out_time_ms=<value>` line into seconds.
///
/// Despite the key name the value is microseconds. Anything that is not
/// the exact key or not a plain unsigned number (the encoder writes `N/A`
/// and negative sentinels before the first frame) is ignored.
pub fn parse_out_time(line: &str) -> Option<f64> {
    let value = line.trim().strip_prefix("out_time_ms=")?;
    let micros: u64 = value.parse().ok()?;
    Some(micros as f64 / 1_000_000.0)
}

/// Collapses the raw progress stream into throttled samples.
///
/// The first position observed after a reset becomes the run's `start`,
/// so resumed encodes report where they picked up from. Every later
/// observation replaces the pending sample; a burst of lines therefore
/// yields one emission carrying the newest position. Positions lower than
/// the last emitted one are dropped, keeping emissions non-decreasing
/// within a run.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    start: Option<f64>,
    pending: Option<f64>,
    last_emitted: Option<f64>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything; the next observation starts a new run.
    pub fn reset(&mut self) {
        self.start = None;
        self.pending = None;
        self.last_emitted = None;
    }

    /// Feed one raw line. Returns true when the line carried a position.
    pub fn observe_line(&mut self, line: &str) -> bool {
        match parse_out_time(line) {
            Some(seconds) => {
                self.observe(seconds);
                true
            }
            None => false,
        }
    }

    /// Feed one parsed position.
    pub fn observe(&mut self, seconds: f64) {
        if self.start.is_none() {
            self.start = Some(seconds);
        }
        if let Some(last) = self.last_emitted {
            if seconds < last {
                return;
            }
        }
        self.pending = Some(seconds);
    }

    /// Take the pending sample, if any, marking it emitted.
    pub fn take_pending(&mut self) -> Option<ProgressSample> {
        let current = self.pending.take()?;
        let start = self.start.unwrap_or(current);
        self.last_emitted = Some(current);
        Some(ProgressSample::new(current, start))
    }
}

/// Drive a line stream into throttled progress emissions.
///
/// At most one sample per `interval` leaves the tracker while lines flow.
/// When the stream ends the final pending sample is flushed, so runs
/// shorter than a window still report.
pub async fn pump_lines(
    mut lines: mpsc::Receiver<String>,
    tracker: Arc<Mutex<ProgressTracker>>,
    samples: mpsc::UnboundedSender<ProgressSample>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            line = lines.recv() => match line {
                Some(line) => {
                    tracker.lock().await.observe_line(&line);
                }
                None => break,
            },
            _ = ticker.tick() => {
                if let Some(sample) = tracker.lock().await.take_pending() {
                    if samples.send(sample).is_err() {
                        return;
                    }
                }
            }
        }
    }

    // Flush whatever arrived after the last tick.
    if let Some(sample) = tracker.lock().await.take_pending() {
        let _ = samples.send(sample);
    }
}
