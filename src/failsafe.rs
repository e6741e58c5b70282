//! Failsafe supervisor with bounded automated recovery.
//!
//! Runs **every control tick before the PID step** and classifies sensor
//! health into a four-state machine:
//!
//! ```text
//!  Healthy ──[stuck ≥ 75% window | soft ceiling]──▶ Warning
//!  Warning ──[stuck ≥ full window]───────────────▶ Recovering
//!  Warning ──[condition clears]──────────────────▶ Healthy
//!  Recovering ──[validation succeeds]────────────▶ Healthy
//!  Recovering ──[attempts exhausted]─────────────▶ EmergencyShutdown
//!  any state ──[hard ceiling | external stop]────▶ EmergencyShutdown
//! ```
//!
//! `EmergencyShutdown` is terminal for the run. A stuck probe must never
//! keep the heater running against a frozen reading: the machine fails
//! loud and safe instead of controlling blind.
//!
//! Recovery walks the reset ladder on the sensor bus — resource cleanup,
//! bus reset, device hard-reset, re-initialization — then takes fresh
//! validation readings. Success requires the new readings to be internally
//! consistent *and* to have moved off the stuck value; a probe that echoes
//! the same number after a hard reset is dead, not recovered.

use heapless::Vec;
use log::{error, info, warn};

use crate::app::ports::SensorBus;
use crate::config::SafetyLimits;
use crate::error::{SafetyFault, SensorError};
use crate::sensors::{Sample, SensorChannel};

/// Health classification, from the supervisor's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum HealthState {
    Healthy,
    Warning,
    Recovering,
    EmergencyShutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    Success,
    Failure,
}

/// Ladder steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStep {
    Cleanup,
    BusReset,
    HardReset,
    Reinit,
    Validate,
}

/// Record of one recovery attempt. Kept in a bounded rolling log.
#[derive(Debug, Clone)]
pub struct RecoveryAttempt {
    pub trigger_ms: u64,
    pub steps: Vec<RecoveryStep, 5>,
    pub outcome: RecoveryOutcome,
    pub attempt_number: u32,
}

/// Rolling attempt-log depth.
const ATTEMPT_LOG_LEN: usize = 8;

/// Watches the sensor channel and escalates through warning, bounded
/// recovery, and emergency shutdown.
pub struct FailsafeRecovery {
    limits: SafetyLimits,
    state: HealthState,
    /// Attempts consumed in the current failure episode.
    episode_attempts: u32,
    last_attempt_ms: Option<u64>,
    attempts: Vec<RecoveryAttempt, ATTEMPT_LOG_LEN>,
    /// Last time any usable reading (valid or stuck-flagged) was seen.
    last_usable_ms: Option<u64>,
    shutdown_cause: Option<SafetyFault>,
}

impl FailsafeRecovery {
    pub fn new(limits: SafetyLimits) -> Self {
        Self {
            limits,
            state: HealthState::Healthy,
            episode_attempts: 0,
            last_attempt_ms: None,
            attempts: Vec::new(),
            last_usable_ms: None,
            shutdown_cause: None,
        }
    }

    /// Evaluate the latest sample and advance the health machine. May run a
    /// recovery attempt against the channel's bus. Returns the new state.
    pub fn evaluate<B: SensorBus>(
        &mut self,
        sample: &Sample,
        channel: &mut SensorChannel<B>,
        now_ms: u64,
    ) -> HealthState {
        if self.state == HealthState::EmergencyShutdown {
            return self.state;
        }

        // A stuck-flagged sample is still evidence the bus is alive; only
        // true read failures feed the silent timeout.
        let usable = sample.valid || sample.fault == Some(SensorError::Stuck);
        if usable {
            self.last_usable_ms = Some(sample.timestamp_ms);
        } else if self.last_usable_ms.is_none() {
            self.last_usable_ms = Some(now_ms);
        }

        // Hard ceiling bypasses every other consideration.
        if usable && sample.value > self.limits.hard_ceiling_c {
            self.shutdown(SafetyFault::OverTemperature, now_ms);
            return self.state;
        }

        let silent_ms = u64::from(self.limits.silent_timeout_secs) * 1000;
        if now_ms.saturating_sub(self.last_usable_ms.unwrap_or(now_ms)) >= silent_ms {
            self.shutdown(SafetyFault::SensorSilent, now_ms);
            return self.state;
        }

        let stuck_ms = channel.stuck_duration_ms(now_ms);
        let window_ms = u64::from(self.limits.stuck_window_secs) * 1000;
        let warn_ms = window_ms * 3 / 4;
        let over_soft = usable && sample.value > self.limits.soft_ceiling_c;

        match self.state {
            HealthState::Healthy => {
                if stuck_ms >= warn_ms || over_soft {
                    warn!(
                        "Health: Warning (stuck {} s, temp {:.1})",
                        stuck_ms / 1000,
                        sample.value
                    );
                    self.state = HealthState::Warning;
                }
            }
            HealthState::Warning => {
                if stuck_ms >= window_ms {
                    // Recovery runs on the next tick; Recovering is
                    // observable for at least one full tick.
                    warn!("Health: Recovering (stuck past full window)");
                    self.state = HealthState::Recovering;
                } else if stuck_ms < warn_ms && !over_soft {
                    info!("Health: Warning cleared");
                    self.state = HealthState::Healthy;
                    self.reset_episode();
                }
            }
            HealthState::Recovering => {
                if stuck_ms == 0 && !over_soft {
                    // The channel unstuck (recovery reseed, or the probe
                    // came back on its own).
                    info!("Health: recovered, resuming normal control");
                    self.state = HealthState::Healthy;
                    self.reset_episode();
                } else if sample.value.is_finite() {
                    // A bus-failed sample carries no stuck value to
                    // validate against; wait for the next readable tick.
                    self.try_recover(channel, sample.value, now_ms);
                }
            }
            HealthState::EmergencyShutdown => {}
        }

        self.state
    }

    /// External emergency stop, or an internally detected fatal condition
    /// from outside the sensor path (e.g. storage). Terminal.
    pub fn emergency_stop(&mut self, cause: SafetyFault) {
        if self.state != HealthState::EmergencyShutdown {
            error!("EMERGENCY SHUTDOWN: {cause}");
            self.state = HealthState::EmergencyShutdown;
            self.shutdown_cause = Some(cause);
        }
    }

    pub fn state(&self) -> HealthState {
        self.state
    }

    pub fn shutdown_cause(&self) -> Option<SafetyFault> {
        self.shutdown_cause
    }

    /// Rolling log of recovery attempts (most recent last).
    pub fn recovery_attempts(&self) -> &[RecoveryAttempt] {
        &self.attempts
    }

    // ── Internal ──────────────────────────────────────────────────

    fn shutdown(&mut self, cause: SafetyFault, now_ms: u64) {
        error!("EMERGENCY SHUTDOWN at t={} s: {cause}", now_ms / 1000);
        self.state = HealthState::EmergencyShutdown;
        self.shutdown_cause = Some(cause);
    }

    fn reset_episode(&mut self) {
        self.episode_attempts = 0;
        self.last_attempt_ms = None;
    }

    fn cooldown_ok(&self, now_ms: u64) -> bool {
        let cooldown_ms = u64::from(self.limits.recovery.cooldown_secs) * 1000;
        self.last_attempt_ms
            .is_none_or(|last| now_ms.saturating_sub(last) >= cooldown_ms)
    }

    fn try_recover<B: SensorBus>(
        &mut self,
        channel: &mut SensorChannel<B>,
        stuck_value: f32,
        now_ms: u64,
    ) {
        if self.episode_attempts >= self.limits.recovery.max_attempts {
            self.shutdown(SafetyFault::RecoveryExhausted, now_ms);
            return;
        }
        if !self.cooldown_ok(now_ms) {
            return;
        }

        self.episode_attempts += 1;
        self.last_attempt_ms = Some(now_ms);
        let attempt_number = self.episode_attempts;
        info!(
            "Recovery attempt {attempt_number}/{} (stuck at {stuck_value:.2})",
            self.limits.recovery.max_attempts
        );

        let mut steps: Vec<RecoveryStep, 5> = Vec::new();
        let recovered = self.run_ladder(channel, stuck_value, &mut steps);

        match recovered {
            Some(median) => {
                info!("Recovery successful, new reading {median:.2}");
                channel.reseed(median);
                self.record_attempt(now_ms, steps, RecoveryOutcome::Success, attempt_number);
                self.state = HealthState::Healthy;
                self.reset_episode();
            }
            None => {
                warn!("Recovery attempt {attempt_number} failed");
                self.record_attempt(now_ms, steps, RecoveryOutcome::Failure, attempt_number);
                if self.episode_attempts >= self.limits.recovery.max_attempts {
                    self.shutdown(SafetyFault::RecoveryExhausted, now_ms);
                }
            }
        }
    }

    /// Execute the reset ladder and validation reads. Returns the validated
    /// median on success.
    fn run_ladder<B: SensorBus>(
        &self,
        channel: &mut SensorChannel<B>,
        stuck_value: f32,
        steps: &mut Vec<RecoveryStep, 5>,
    ) -> Option<f32> {
        let policy = self.limits.recovery;
        let bus = channel.bus_mut();

        bus.release_resources();
        let _ = steps.push(RecoveryStep::Cleanup);

        if bus.reset_bus().is_err() {
            warn!("Recovery: bus reset failed");
            return None;
        }
        let _ = steps.push(RecoveryStep::BusReset);

        if bus.hard_reset().is_err() {
            warn!("Recovery: device hard reset failed");
            return None;
        }
        let _ = steps.push(RecoveryStep::HardReset);

        if bus.reinit().is_err() {
            warn!("Recovery: device re-initialization failed");
            return None;
        }
        let _ = steps.push(RecoveryStep::Reinit);

        let mut readings: heapless::Vec<f32, 16> = heapless::Vec::new();
        for _ in 0..policy.validation_reads.min(16) {
            if let Ok(raw) = bus.read_raw() {
                let _ = readings.push(raw);
            }
        }
        let _ = steps.push(RecoveryStep::Validate);

        if readings.is_empty() {
            warn!("Recovery validation: no readings");
            return None;
        }
        readings.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(core::cmp::Ordering::Equal));
        let spread = readings[readings.len() - 1] - readings[0];
        if spread > policy.max_spread_c {
            warn!("Recovery validation: spread {spread:.2} too large");
            return None;
        }
        let median = readings[readings.len() / 2];
        if (median - stuck_value).abs() <= policy.min_delta_c {
            warn!("Recovery validation: still pinned at {median:.2}");
            return None;
        }
        Some(median)
    }

    fn record_attempt(
        &mut self,
        trigger_ms: u64,
        steps: Vec<RecoveryStep, 5>,
        outcome: RecoveryOutcome,
        attempt_number: u32,
    ) {
        if self.attempts.is_full() {
            self.attempts.remove(0);
        }
        let _ = self.attempts.push(RecoveryAttempt {
            trigger_ms,
            steps,
            outcome,
            attempt_number,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RecoveryPolicy, SafetyLimits, SensorFilterConfig};

    /// Bus whose probe is pinned at a value until a hard reset "repairs"
    /// it (if `repairable`), after which it reports a varied signal.
    struct FaultyBus {
        pinned_at: f32,
        repairable: bool,
        repaired: bool,
        step: u32,
    }

    impl FaultyBus {
        fn new(pinned_at: f32, repairable: bool) -> Self {
            Self { pinned_at, repairable, repaired: false, step: 0 }
        }
    }

    impl SensorBus for FaultyBus {
        fn read_raw(&mut self) -> Result<f32, SensorError> {
            if self.repaired {
                self.step += 1;
                Ok(23.0 + (self.step % 5) as f32 * 0.1)
            } else {
                Ok(self.pinned_at)
            }
        }
        fn reset_bus(&mut self) -> Result<(), SensorError> {
            Ok(())
        }
        fn hard_reset(&mut self) -> Result<(), SensorError> {
            if self.repairable {
                self.repaired = true;
            }
            Ok(())
        }
        fn reinit(&mut self) -> Result<(), SensorError> {
            Ok(())
        }
    }

    fn limits() -> SafetyLimits {
        SafetyLimits {
            stuck_window_secs: 120,
            // Zero cooldown so escalation is observable in a fast test.
            recovery: RecoveryPolicy { cooldown_secs: 0, ..RecoveryPolicy::default() },
            ..SafetyLimits::default()
        }
    }

    fn channel(bus: FaultyBus) -> SensorChannel<FaultyBus> {
        SensorChannel::new(bus, SensorFilterConfig::default(), 120)
    }

    /// Drive reads + evaluation one tick per second.
    fn run_ticks(
        fs: &mut FailsafeRecovery,
        ch: &mut SensorChannel<FaultyBus>,
        from_s: u64,
        to_s: u64,
    ) -> HealthState {
        let mut state = fs.state();
        for t in from_s..to_s {
            let now = t * 1000;
            let sample = ch.read(now);
            state = fs.evaluate(&sample, ch, now);
            if state == HealthState::EmergencyShutdown {
                break;
            }
        }
        state
    }

    #[test]
    fn stuck_sensor_walks_healthy_warning_recovering() {
        let mut fs = FailsafeRecovery::new(limits());
        let mut ch = channel(FaultyBus::new(19.1, false));

        // 75% of the 120 s window ≈ 93 s (detector arms a few seconds in).
        let state = run_ticks(&mut fs, &mut ch, 0, 80);
        assert_eq!(state, HealthState::Healthy);

        let state = run_ticks(&mut fs, &mut ch, 80, 110);
        assert_eq!(state, HealthState::Warning);

        let state = run_ticks(&mut fs, &mut ch, 110, 200);
        // Unrepairable probe: recovery validation keeps failing and the
        // machine escalates to shutdown.
        assert_eq!(state, HealthState::EmergencyShutdown);
        assert_eq!(fs.shutdown_cause(), Some(SafetyFault::RecoveryExhausted));

        // Exactly max_attempts were consumed, all failures.
        let attempts = fs.recovery_attempts();
        assert_eq!(attempts.len(), 3);
        assert!(attempts.iter().all(|a| a.outcome == RecoveryOutcome::Failure));
    }

    #[test]
    fn repairable_sensor_recovers_to_healthy() {
        let mut fs = FailsafeRecovery::new(limits());
        let mut ch = channel(FaultyBus::new(19.1, true));

        let state = run_ticks(&mut fs, &mut ch, 0, 130);
        assert_eq!(state, HealthState::Healthy);

        let attempts = fs.recovery_attempts();
        assert_eq!(attempts.last().unwrap().outcome, RecoveryOutcome::Success);
        // Ladder ran to completion.
        assert_eq!(
            attempts.last().unwrap().steps.as_slice(),
            &[
                RecoveryStep::Cleanup,
                RecoveryStep::BusReset,
                RecoveryStep::HardReset,
                RecoveryStep::Reinit,
                RecoveryStep::Validate,
            ]
        );
        // Channel was reseeded off the stuck value.
        assert_eq!(ch.stuck_duration_ms(130_000), 0);
    }

    #[test]
    fn hard_ceiling_is_fatal_from_healthy() {
        let mut fs = FailsafeRecovery::new(limits());
        let mut ch = channel(FaultyBus::new(44.5, false));
        let sample = ch.read(0);
        let state = fs.evaluate(&sample, &mut ch, 0);
        assert_eq!(state, HealthState::EmergencyShutdown);
        assert_eq!(fs.shutdown_cause(), Some(SafetyFault::OverTemperature));
    }

    #[test]
    fn soft_ceiling_raises_warning_and_clears() {
        let mut fs = FailsafeRecovery::new(limits());
        // 39 > soft ceiling (38) but < hard ceiling (43).
        let mut ch = channel(FaultyBus::new(39.0, true));
        let sample = ch.read(0);
        assert_eq!(fs.evaluate(&sample, &mut ch, 0), HealthState::Warning);

        // Simulate the chamber cooling back off.
        ch.reseed(30.0);
        let cool = Sample { value: 30.0, timestamp_ms: 1000, valid: true, fault: None };
        assert_eq!(fs.evaluate(&cool, &mut ch, 1000), HealthState::Healthy);
    }

    #[test]
    fn silent_sensor_times_out() {
        struct DeadBus;
        impl SensorBus for DeadBus {
            fn read_raw(&mut self) -> Result<f32, SensorError> {
                Err(SensorError::BusReadFailed)
            }
            fn reset_bus(&mut self) -> Result<(), SensorError> {
                Err(SensorError::BusReadFailed)
            }
            fn hard_reset(&mut self) -> Result<(), SensorError> {
                Err(SensorError::BusReadFailed)
            }
            fn reinit(&mut self) -> Result<(), SensorError> {
                Err(SensorError::BusReadFailed)
            }
        }

        let mut fs = FailsafeRecovery::new(limits());
        let mut ch = SensorChannel::new(DeadBus, SensorFilterConfig::default(), 120);
        let mut state = HealthState::Healthy;
        for t in 0..=70u64 {
            let now = t * 1000;
            let sample = ch.read(now);
            state = fs.evaluate(&sample, &mut ch, now);
            if state == HealthState::EmergencyShutdown {
                break;
            }
        }
        assert_eq!(state, HealthState::EmergencyShutdown);
        assert_eq!(fs.shutdown_cause(), Some(SafetyFault::SensorSilent));
    }

    #[test]
    fn external_stop_is_terminal() {
        let mut fs = FailsafeRecovery::new(limits());
        fs.emergency_stop(SafetyFault::ExternalStop);
        assert_eq!(fs.state(), HealthState::EmergencyShutdown);

        // Healthy samples cannot resurrect the run.
        let mut ch = channel(FaultyBus::new(23.0, true));
        let sample = ch.read(0);
        assert_eq!(fs.evaluate(&sample, &mut ch, 0), HealthState::EmergencyShutdown);
        assert_eq!(fs.shutdown_cause(), Some(SafetyFault::ExternalStop));
    }

    #[test]
    fn cooldown_separates_attempts() {
        let mut fs = FailsafeRecovery::new(SafetyLimits {
            recovery: RecoveryPolicy { cooldown_secs: 60, ..RecoveryPolicy::default() },
            ..limits()
        });
        let mut ch = channel(FaultyBus::new(19.1, false));

        // Run long enough for the first attempt plus most of a cooldown.
        run_ticks(&mut fs, &mut ch, 0, 150);
        assert_eq!(fs.recovery_attempts().len(), 1);
        assert_eq!(fs.state(), HealthState::Recovering);

        // After the cooldown the second attempt fires.
        run_ticks(&mut fs, &mut ch, 150, 200);
        assert_eq!(fs.recovery_attempts().len(), 2);
    }
}
