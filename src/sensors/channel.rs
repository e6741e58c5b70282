//! Filtered temperature acquisition.
//!
//! Each `read()` takes K raw sub-readings over a short window and keeps
//! their median, so a single conversion spike cannot move the accepted
//! value. Raw readings are rejected before filtering when they are outside
//! the plausible range or imply an impossible step from the last accepted
//! value. A short history of accepted samples feeds stuck detection: a
//! probe that reports a bit-identical value past the stuck window is
//! flagged, not trusted.
//!
//! The channel never fabricates a reading: every outcome is either the
//! median of real conversions or an invalid sample carrying the fault.
//! There is no fallback to a cached "last known good" value — staleness is
//! always visible to callers.

use heapless::HistoryBuffer;
use log::warn;
use serde::Serialize;

use crate::app::ports::SensorBus;
use crate::config::SensorFilterConfig;
use crate::error::SensorError;

/// Two accepted readings closer than this count as identical.
const STUCK_EPSILON: f32 = 0.01;

/// Accepted samples required before the stuck detector may arm.
const MIN_STUCK_SAMPLES: usize = 3;

/// Accepted-sample history depth.
const HISTORY_LEN: usize = 10;

/// One validated measurement. Immutable once created.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Sample {
    pub value: f32,
    pub timestamp_ms: u64,
    pub valid: bool,
    pub fault: Option<SensorError>,
}

impl Sample {
    fn fresh(value: f32, timestamp_ms: u64) -> Self {
        Self { value, timestamp_ms, valid: true, fault: None }
    }

    fn invalid(timestamp_ms: u64, fault: SensorError) -> Self {
        Self { value: f32::NAN, timestamp_ms, valid: false, fault: Some(fault) }
    }

    /// A reading whose value is evidenced but must not be controlled on
    /// (currently only `Stuck`).
    fn flagged(value: f32, timestamp_ms: u64, fault: SensorError) -> Self {
        Self { value, timestamp_ms, valid: false, fault: Some(fault) }
    }
}

/// Median-filtered, stuck-aware acquisition channel over a [`SensorBus`].
pub struct SensorChannel<B: SensorBus> {
    bus: B,
    cfg: SensorFilterConfig,
    stuck_window_ms: u64,
    history: HistoryBuffer<f32, HISTORY_LEN>,
    last_accepted: Option<f32>,
    /// Set when the identical-value streak was first noticed.
    stuck_since_ms: Option<u64>,
    consecutive_errors: u32,
}

impl<B: SensorBus> SensorChannel<B> {
    pub fn new(bus: B, cfg: SensorFilterConfig, stuck_window_secs: u32) -> Self {
        Self {
            bus,
            cfg,
            stuck_window_ms: u64::from(stuck_window_secs) * 1000,
            history: HistoryBuffer::new(),
            last_accepted: None,
            stuck_since_ms: None,
            consecutive_errors: 0,
        }
    }

    /// Acquire one validated sample.
    pub fn read(&mut self, now_ms: u64) -> Sample {
        let mut accepted: heapless::Vec<f32, 16> = heapless::Vec::new();
        let mut bus_failures = 0u32;
        let mut range_rejects = 0u32;
        let mut rate_rejects = 0u32;

        for _ in 0..self.cfg.subsamples {
            match self.read_one() {
                Ok(raw) => {
                    if raw < self.cfg.plausible_min_c || raw > self.cfg.plausible_max_c {
                        range_rejects += 1;
                        continue;
                    }
                    if let Some(last) = self.last_accepted {
                        if (raw - last).abs() > self.cfg.max_step_c {
                            rate_rejects += 1;
                            continue;
                        }
                    }
                    let _ = accepted.push(raw);
                }
                Err(_) => bus_failures += 1,
            }
        }

        if accepted.is_empty() {
            self.consecutive_errors += 1;
            let fault = if bus_failures >= self.cfg.subsamples {
                SensorError::BusReadFailed
            } else if rate_rejects >= range_rejects {
                SensorError::RateRejected
            } else {
                SensorError::OutOfRange
            };
            warn!(
                "Sensor read failed ({fault}): {bus_failures} bus / {range_rejects} range / \
                 {rate_rejects} rate rejects, consecutive errors {}",
                self.consecutive_errors
            );
            return Sample::invalid(now_ms, fault);
        }

        accepted.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(core::cmp::Ordering::Equal));
        let median = accepted[accepted.len() / 2];
        self.consecutive_errors = 0;

        self.update_stuck_tracking(median, now_ms);
        self.last_accepted = Some(median);
        self.history.write(median);

        if self.stuck_duration_ms(now_ms) >= self.stuck_window_ms {
            warn!(
                "Sensor stuck at {median:.2} for {} s",
                self.stuck_duration_ms(now_ms) / 1000
            );
            return Sample::flagged(median, now_ms, SensorError::Stuck);
        }

        Sample::fresh(median, now_ms)
    }

    /// How long the accepted value has been bit-identical. Zero when the
    /// detector is not armed.
    pub fn stuck_duration_ms(&self, now_ms: u64) -> u64 {
        self.stuck_since_ms
            .map_or(0, |since| now_ms.saturating_sub(since))
    }

    /// Consecutive `read()` calls that produced no usable reading.
    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    /// The recovery ladder operates directly on the bus.
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Re-seed the channel after a successful sensor recovery: the validated
    /// post-reset value becomes the new baseline and stuck tracking clears.
    pub fn reseed(&mut self, value: f32) {
        self.history = HistoryBuffer::new();
        self.history.write(value);
        self.last_accepted = Some(value);
        self.stuck_since_ms = None;
    }

    // ── Internal ──────────────────────────────────────────────────

    /// One sub-reading, with bounded bus retries.
    fn read_one(&mut self) -> Result<f32, SensorError> {
        let mut last_err = SensorError::BusReadFailed;
        for _ in 0..self.cfg.max_retries {
            match self.bus.read_raw() {
                Ok(raw) => return Ok(raw),
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }

    fn update_stuck_tracking(&mut self, median: f32, now_ms: u64) {
        let identical = self
            .last_accepted
            .is_some_and(|last| (median - last).abs() < STUCK_EPSILON);

        if identical && self.history_is_flat(median) {
            if self.stuck_since_ms.is_none() {
                warn!("Potential stuck reading at {median:.2}");
                self.stuck_since_ms = Some(now_ms);
            }
        } else if !identical {
            self.stuck_since_ms = None;
        }
    }

    /// True when the recent history holds enough samples and every one of
    /// them matches `value` within [`STUCK_EPSILON`].
    fn history_is_flat(&self, value: f32) -> bool {
        if self.history.len() < MIN_STUCK_SAMPLES {
            return false;
        }
        self.history
            .oldest_ordered()
            .all(|&v| (v - value).abs() < STUCK_EPSILON)
    }
}
