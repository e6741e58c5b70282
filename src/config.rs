//! Experiment configuration.
//!
//! All tunable parameters for a run, loaded once at startup from a JSON
//! document and validated before any actuator is touched. Invalid values are
//! rejected with [`ConfigError::ValidationFailed`], never silently clamped.

use serde::{Deserialize, Serialize};

use crate::actuators::{ActuatorId, ActuatorTarget, Transition};
use crate::error::ConfigError;

/// Top-level experiment configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    // --- Stochastic sequencing ---
    /// Number of hidden environmental states.
    pub num_states: usize,
    /// Deterministic default ordering of state indices.
    pub canonical_sequence: Vec<usize>,
    /// Probability of deviating from the canonical sequence at a transition.
    pub markovian_p: f32,
    /// Seed for the engine's random stream. Same seed + config → same run.
    pub rng_seed: u64,
    /// Optional one-time sequence substitution.
    pub lock_in: Option<LockInConfig>,
    /// One definition per state, ordered by index.
    pub hes: Vec<HesDefinition>,

    // --- Thermal control ---
    /// Setpoint used outside any HES-specific override (°C).
    pub basal_temp_c: f32,
    pub pid: PidGains,

    // --- Safety ---
    pub safety: SafetyLimits,

    // --- Sensor filtering ---
    pub sensor: SensorFilterConfig,

    // --- Timing ---
    /// Control loop period (milliseconds).
    pub control_interval_ms: u64,
    /// Snapshot logging period (milliseconds).
    pub snapshot_interval_ms: u64,
    /// Telemetry emission period (milliseconds).
    pub telemetry_interval_ms: u64,

    // --- Logging ---
    pub logger: LoggerConfig,

    // --- Supervisor ---
    /// Consecutive error-heavy cycles tolerated before the run is finalized
    /// with an error status.
    pub max_consecutive_cycle_errors: u32,
}

/// One-time, irreversible substitution of the canonical sequence after a
/// configured number of completed cycles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInConfig {
    /// Completed-cycle count at which the swap fires.
    pub trigger_cycles: u32,
    /// Replacement sequence. Must be a permutation of `0..num_states`.
    pub new_sequence: Vec<usize>,
}

/// A hidden environmental state: dwell policy, optional thermal setpoint,
/// and the stimulus targets issued on entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HesDefinition {
    pub index: usize,
    pub duration: DurationPolicy,
    /// Thermal setpoint while this state is active. `None` keeps the basal
    /// setpoint.
    pub setpoint_c: Option<f32>,
    /// Stimulus actuator targets applied on entry. Thermal actuators are
    /// owned by the PID loop and are rejected here at validation.
    pub targets: Vec<ActuatorTarget>,
}

/// Dwell duration policy for a state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum DurationPolicy {
    /// Hold for exactly this many minutes.
    Fixed { minutes: u32 },
    /// Hold for a uniform-random number of minutes in `[min, max]`.
    Random { min_minutes: u32, max_minutes: u32 },
}

/// PID tuning for the heater/cooler pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PidGains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    /// Multiplier applied to the magnitude of negative output before it is
    /// handed to the cooler (TEC elements pump less heat per percent than
    /// the PTC element delivers).
    pub cooling_gain: f32,
    /// Half-width of the idle deadband around the setpoint (°C).
    pub deadband_c: f32,
    /// Clamp on the accumulated integral term.
    pub integral_limit: f32,
    /// Setpoint change that resets the integral and derivative state (°C).
    pub setpoint_jump_reset_c: f32,
    /// Ticks an invalid sample may hold the previous output before the
    /// controller drops to idle.
    pub stale_hold_ticks: u32,
}

/// Thermal safety limits and recovery policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SafetyLimits {
    /// Lowest plausible chamber temperature (°C).
    pub min_temp_c: f32,
    /// Soft ceiling: exceeding it raises a warning (°C).
    pub soft_ceiling_c: f32,
    /// Hard ceiling: exceeding it forces emergency shutdown (°C).
    pub hard_ceiling_c: f32,
    /// Seconds of bit-identical readings before the sensor counts as stuck.
    pub stuck_window_secs: u32,
    /// Seconds without any valid reading before emergency shutdown.
    pub silent_timeout_secs: u32,
    pub recovery: RecoveryPolicy,
}

/// Bounds on automated sensor recovery.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RecoveryPolicy {
    /// Attempts per failure episode before escalation.
    pub max_attempts: u32,
    /// Seconds between attempts.
    pub cooldown_secs: u32,
    /// Post-recovery readings must differ from the stuck value by more
    /// than this (°C).
    pub min_delta_c: f32,
    /// Post-recovery readings must span no more than this (°C).
    pub max_spread_c: f32,
    /// Number of validation readings taken after a reset.
    pub validation_reads: u32,
}

/// Acquisition-side filtering parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SensorFilterConfig {
    /// Raw sub-readings taken per `read()`; the median is kept.
    pub subsamples: u32,
    /// Largest plausible change per reading from the last accepted value.
    pub max_step_c: f32,
    /// Lowest reading accepted as physically plausible (°C).
    pub plausible_min_c: f32,
    /// Highest reading accepted as physically plausible (°C).
    pub plausible_max_c: f32,
    /// Bus read retries before a sub-reading is abandoned.
    pub max_retries: u32,
}

/// Integrity-logger policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LoggerConfig {
    /// Manifest entry cap; oldest completed-cycle entries trim first.
    pub manifest_max_entries: usize,
    /// Manifest file is rewritten every N appends.
    pub manifest_flush_every: u32,
    /// Consecutive-failure count at which the logger reports unhealthy.
    pub write_failure_threshold: u32,
    /// Per-file write retries.
    pub write_retries: u32,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            // Sequencing: five states, canonical ring order
            num_states: 5,
            canonical_sequence: vec![0, 1, 2, 3, 4],
            markovian_p: 0.3,
            rng_seed: 0,
            lock_in: None,
            hes: default_hes(),

            // Thermal: production gains for the PTC/TEC pair at 1 kHz PWM
            basal_temp_c: 23.0,
            pid: PidGains::default(),

            safety: SafetyLimits::default(),
            sensor: SensorFilterConfig::default(),

            // Timing
            control_interval_ms: 1_000,
            snapshot_interval_ms: 10_000,
            telemetry_interval_ms: 60_000,

            logger: LoggerConfig::default(),
            max_consecutive_cycle_errors: 3,
        }
    }
}

impl Default for PidGains {
    fn default() -> Self {
        Self {
            kp: 6.0,
            ki: 0.02,
            kd: 1.5,
            cooling_gain: 1.35,
            deadband_c: 0.3,
            integral_limit: 200.0,
            setpoint_jump_reset_c: 2.0,
            stale_hold_ticks: 3,
        }
    }
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            min_temp_c: 4.0,
            soft_ceiling_c: 38.0,
            hard_ceiling_c: 43.0,
            stuck_window_secs: 120,
            silent_timeout_secs: 60,
            recovery: RecoveryPolicy::default(),
        }
    }
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            cooldown_secs: 300,
            min_delta_c: 0.05,
            max_spread_c: 10.0,
            validation_reads: 5,
        }
    }
}

impl Default for SensorFilterConfig {
    fn default() -> Self {
        Self {
            subsamples: 5,
            max_step_c: 5.0,
            plausible_min_c: -50.0,
            plausible_max_c: 100.0,
            max_retries: 3,
        }
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            manifest_max_entries: 50,
            manifest_flush_every: 5,
            write_failure_threshold: 10,
            write_retries: 3,
        }
    }
}

/// Default five-state schedule: basal rest states interleaved with a
/// heat-shock state and two stimulus states.
fn default_hes() -> Vec<HesDefinition> {
    vec![
        HesDefinition {
            index: 0,
            duration: DurationPolicy::Random { min_minutes: 200, max_minutes: 400 },
            setpoint_c: None,
            targets: vec![],
        },
        HesDefinition {
            index: 1,
            duration: DurationPolicy::Fixed { minutes: 30 },
            setpoint_c: Some(32.0),
            targets: vec![],
        },
        HesDefinition {
            index: 2,
            duration: DurationPolicy::Fixed { minutes: 30 },
            setpoint_c: None,
            targets: vec![ActuatorTarget {
                id: ActuatorId::Led,
                value: 25.0,
                transition: Transition::Instant,
            }],
        },
        HesDefinition {
            index: 3,
            duration: DurationPolicy::Fixed { minutes: 30 },
            setpoint_c: None,
            targets: vec![ActuatorTarget {
                id: ActuatorId::Vibration,
                value: 100.0,
                transition: Transition::Pulsed { on_secs: 20, off_secs: 60 },
            }],
        },
        HesDefinition {
            index: 4,
            duration: DurationPolicy::Random { min_minutes: 100, max_minutes: 200 },
            setpoint_c: None,
            targets: vec![],
        },
    ]
}

impl ExperimentConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json(doc: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(doc).map_err(|e| {
            log::error!("Config parse error: {e}");
            ConfigError::Malformed
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every field. Called before the run starts; a failure here
    /// means no actuator has been touched.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_states < 2 {
            return Err(ConfigError::ValidationFailed("num_states must be >= 2"));
        }
        if !is_permutation(&self.canonical_sequence, self.num_states) {
            return Err(ConfigError::ValidationFailed(
                "canonical_sequence is not a permutation of 0..num_states",
            ));
        }
        if !(0.0..=1.0).contains(&self.markovian_p) {
            return Err(ConfigError::ValidationFailed("markovian_p outside [0, 1]"));
        }
        if let Some(lock_in) = &self.lock_in {
            if lock_in.trigger_cycles == 0 {
                return Err(ConfigError::ValidationFailed("lock_in.trigger_cycles must be > 0"));
            }
            if !is_permutation(&lock_in.new_sequence, self.num_states) {
                return Err(ConfigError::ValidationFailed(
                    "lock_in.new_sequence is not a permutation of 0..num_states",
                ));
            }
        }

        if self.hes.len() != self.num_states {
            return Err(ConfigError::ValidationFailed("hes count must equal num_states"));
        }
        for (i, hes) in self.hes.iter().enumerate() {
            if hes.index != i {
                return Err(ConfigError::ValidationFailed("hes entries must be ordered by index"));
            }
            match hes.duration {
                DurationPolicy::Fixed { minutes } if minutes == 0 => {
                    return Err(ConfigError::ValidationFailed("fixed duration must be > 0 minutes"));
                }
                DurationPolicy::Random { min_minutes, max_minutes }
                    if min_minutes == 0 || min_minutes > max_minutes =>
                {
                    return Err(ConfigError::ValidationFailed(
                        "random duration requires 0 < min <= max",
                    ));
                }
                _ => {}
            }
            if let Some(setpoint) = hes.setpoint_c {
                if setpoint <= self.safety.min_temp_c || setpoint >= self.safety.soft_ceiling_c {
                    return Err(ConfigError::ValidationFailed(
                        "hes setpoint outside safe band",
                    ));
                }
            }
            for target in &hes.targets {
                if matches!(target.id, ActuatorId::Heater | ActuatorId::Cooler) {
                    return Err(ConfigError::ValidationFailed(
                        "thermal actuators are owned by the control loop",
                    ));
                }
                if !(0.0..=100.0).contains(&target.value) {
                    return Err(ConfigError::ValidationFailed("stimulus target outside 0..100"));
                }
                match target.transition {
                    Transition::Ramp { duration_ms } if duration_ms == 0 => {
                        return Err(ConfigError::ValidationFailed("ramp duration must be > 0"));
                    }
                    Transition::Pulsed { on_secs, off_secs } if on_secs == 0 || off_secs == 0 => {
                        return Err(ConfigError::ValidationFailed(
                            "pulse on/off times must be > 0",
                        ));
                    }
                    _ => {}
                }
            }
        }

        if self.basal_temp_c <= self.safety.min_temp_c
            || self.basal_temp_c >= self.safety.soft_ceiling_c
        {
            return Err(ConfigError::ValidationFailed("basal_temp_c outside safe band"));
        }
        if self.safety.min_temp_c >= self.safety.soft_ceiling_c
            || self.safety.soft_ceiling_c >= self.safety.hard_ceiling_c
        {
            return Err(ConfigError::ValidationFailed(
                "safety limits must satisfy min < soft < hard",
            ));
        }
        if self.safety.stuck_window_secs == 0 || self.safety.silent_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed("safety windows must be > 0"));
        }
        if self.safety.recovery.max_attempts == 0 || self.safety.recovery.validation_reads == 0 {
            return Err(ConfigError::ValidationFailed("recovery bounds must be > 0"));
        }

        if self.sensor.subsamples == 0 || self.sensor.subsamples > 15 {
            return Err(ConfigError::ValidationFailed("subsamples must be in 1..=15"));
        }
        if self.sensor.max_step_c <= 0.0 {
            return Err(ConfigError::ValidationFailed("max_step_c must be > 0"));
        }
        if self.sensor.plausible_min_c >= self.sensor.plausible_max_c {
            return Err(ConfigError::ValidationFailed("plausible range is empty"));
        }

        if self.control_interval_ms == 0 || self.snapshot_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed("intervals must be > 0"));
        }
        if self.logger.manifest_max_entries == 0
            || self.logger.manifest_flush_every == 0
            || self.logger.write_failure_threshold == 0
            || self.logger.write_retries == 0
        {
            return Err(ConfigError::ValidationFailed("logger bounds must be > 0"));
        }
        if self.max_consecutive_cycle_errors == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_consecutive_cycle_errors must be > 0",
            ));
        }
        Ok(())
    }

    /// Seconds per control tick, for PID `dt`.
    pub fn tick_secs(&self) -> f32 {
        self.control_interval_ms as f32 / 1000.0
    }
}

fn is_permutation(seq: &[usize], n: usize) -> bool {
    if seq.len() != n {
        return false;
    }
    let mut seen = vec![false; n];
    for &s in seq {
        if s >= n || seen[s] {
            return false;
        }
        seen[s] = true;
    }
    true
}
