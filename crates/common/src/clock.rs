//! Playback clock and tick pacing.
//!
//! A single time cursor drives both picture and sound. The cursor is kept as
//! a base position plus a whole number of ticks so that long runs do not
//! accumulate floating-point drift:
//! - `PlaybackClock` owns the cursor and the Stopped/Running state machine
//! - `FramePacer` spaces ticks against the wall clock
//! - `DriftMeasurement` compares a stream position against the cursor

use std::time::Duration;

use crate::config::Pacing;

/// Tick rate used for preview and export.
pub const DEFAULT_TICK_HZ: u32 = 30;

/// Playback keeps running this long past the last frame before stopping.
pub const END_GRACE_SECS: f64 = 1.0;

/// Clock state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
    Stopped,
    Running,
}

/// Result of a single clock tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// The cursor moved forward to `time_secs`.
    Advanced { time_secs: f64 },
    /// The cursor passed the end of the grace window. The clock is now
    /// stopped and rewound to zero.
    Finished,
    /// The clock was not running; nothing happened.
    Idle,
}

/// The playback time cursor.
#[derive(Debug, Clone)]
pub struct PlaybackClock {
    tick_hz: u32,
    grace_secs: f64,
    total_duration_secs: f64,
    base_secs: f64,
    ticks: u64,
    state: ClockState,
}

impl PlaybackClock {
    /// Create a stopped clock at `t = 0` ticking at `tick_hz`.
    pub fn new(tick_hz: u32) -> Self {
        Self {
            tick_hz: tick_hz.max(1),
            grace_secs: END_GRACE_SECS,
            total_duration_secs: 0.0,
            base_secs: 0.0,
            ticks: 0,
            state: ClockState::Stopped,
        }
    }

    /// Override the grace window past the end of the timeline.
    pub fn with_grace(mut self, grace_secs: f64) -> Self {
        self.grace_secs = grace_secs.max(0.0);
        self
    }

    /// Current cursor position in seconds.
    pub fn time_secs(&self) -> f64 {
        self.base_secs + self.ticks as f64 / self.tick_hz as f64
    }

    pub fn state(&self) -> ClockState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == ClockState::Running
    }

    pub fn tick_hz(&self) -> u32 {
        self.tick_hz
    }

    /// Seconds covered by one tick.
    pub fn frame_duration_secs(&self) -> f64 {
        1.0 / self.tick_hz as f64
    }

    /// Wall-clock interval between ticks.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(self.frame_duration_secs())
    }

    pub fn total_duration_secs(&self) -> f64 {
        self.total_duration_secs
    }

    /// Update the length of the visual timeline. Negative values clamp to zero.
    pub fn set_total_duration(&mut self, secs: f64) {
        self.total_duration_secs = if secs.is_finite() { secs.max(0.0) } else { 0.0 };
    }

    /// Cursor position at which a running clock stops on its own.
    pub fn end_secs(&self) -> f64 {
        self.total_duration_secs + self.grace_secs
    }

    /// Start running. A cursor at or past the end of the timeline rewinds to
    /// zero first. Returns the position playback starts from.
    pub fn play(&mut self) -> f64 {
        if self.time_secs() >= self.total_duration_secs {
            self.rewind();
        }
        self.state = ClockState::Running;
        self.time_secs()
    }

    /// Stop running and keep the cursor where it is.
    pub fn pause(&mut self) {
        self.state = ClockState::Stopped;
    }

    /// Stop running and rewind to zero.
    pub fn stop(&mut self) {
        self.state = ClockState::Stopped;
        self.rewind();
    }

    /// Move the cursor without changing state.
    pub fn seek(&mut self, secs: f64) {
        self.base_secs = if secs.is_finite() { secs.max(0.0) } else { 0.0 };
        self.ticks = 0;
    }

    /// Advance one tick.
    pub fn tick(&mut self) -> TickOutcome {
        if self.state != ClockState::Running {
            return TickOutcome::Idle;
        }
        self.ticks += 1;
        let time_secs = self.time_secs();
        if time_secs >= self.end_secs() {
            self.state = ClockState::Stopped;
            self.rewind();
            return TickOutcome::Finished;
        }
        TickOutcome::Advanced { time_secs }
    }

    fn rewind(&mut self) {
        self.base_secs = 0.0;
        self.ticks = 0;
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_HZ)
    }
}

/// Drift between a stream position and the playback cursor.
#[derive(Debug, Clone, Copy)]
pub struct DriftMeasurement {
    /// Where the clock says the stream should be (seconds).
    pub reference_secs: f64,
    /// Where the stream reports it is (seconds).
    pub measured_secs: f64,
}

impl DriftMeasurement {
    /// Drift in seconds (positive = measured is ahead).
    pub fn drift_secs(&self) -> f64 {
        self.measured_secs - self.reference_secs
    }

    /// Drift in milliseconds.
    pub fn drift_ms(&self) -> f64 {
        self.drift_secs() * 1000.0
    }

    /// Whether drift exceeds an acceptable threshold.
    pub fn exceeds_threshold_secs(&self, threshold_secs: f64) -> bool {
        self.drift_secs().abs() > threshold_secs
    }
}

/// Spaces ticks against the wall clock.
///
/// The interval is created lazily so a pacer can be built outside a tokio
/// runtime and only needs one when it first waits.
#[derive(Debug)]
pub struct FramePacer {
    pacing: Pacing,
    period: Duration,
    interval: Option<tokio::time::Interval>,
}

impl FramePacer {
    pub fn new(pacing: Pacing, tick_hz: u32) -> Self {
        Self {
            pacing,
            period: Duration::from_secs_f64(1.0 / tick_hz.max(1) as f64),
            interval: None,
        }
    }

    pub fn pacing(&self) -> Pacing {
        self.pacing
    }

    /// Wait until the next tick is due.
    pub async fn wait(&mut self) {
        match self.pacing {
            Pacing::RealTime => {
                let period = self.period;
                let interval = self.interval.get_or_insert_with(|| {
                    let mut interval =
                        tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Burst);
                    interval
                });
                interval.tick().await;
            }
            Pacing::Unthrottled => tokio::task::yield_now().await,
        }
    }

    /// Drop the current schedule so the next wait starts a fresh period.
    pub fn reset(&mut self) {
        self.interval = None;
    }
}
