//! Experiment supervisor — the top-level control loop.
//!
//! Owns every subsystem exclusively and wires them together each tick:
//!
//! ```text
//!  SensorBus ──▶ SensorChannel ──▶ FailsafeRecovery ──▶ PidController
//!                                        │                    │
//!                                        ▼                    ▼
//!  TransitionEngine ────────────▶ ActuatorCoordinator ──▶ ActuatorBank
//!                                        │
//!                                        ▼
//!                                 IntegrityLogger ──▶ StoragePort
//! ```
//!
//! Within a tick the stages run strictly in order — sensor acquisition,
//! failsafe evaluation, control computation, sequencing, actuator
//! application, logging — so every stage observes a fully-updated view of
//! the stages before it. Ownership is explicit: each piece of mutable state
//! has exactly one home here, and nothing is reached through globals.
//!
//! The supervisor is the only component allowed to halt the run. It does so
//! on emergency shutdown from the failsafe, on an unhealthy logger at a
//! cycle boundary, or on an external stop command; in every case actuators
//! are forced safe and the terminal status is written durably first.

use log::{info, warn};

use crate::actuators::{ActuatorBank, ActuatorCoordinator, ActuatorId, ActuatorTarget, Transition};
use crate::config::ExperimentConfig;
use crate::control::PidController;
use crate::error::{Error, SafetyFault};
use crate::failsafe::{FailsafeRecovery, HealthState};
use crate::logger::{CycleStats, IntegrityLogger, RunStatus, Snapshot, experiment_id_from_unix};
use crate::markov::{TransitionEngine, TransitionKind};
use crate::scheduler::{Duty, Scheduler};
use crate::sensors::{Sample, SensorChannel};

use super::commands::ExternalCommand;
use super::events::{AppEvent, StatusReport};
use super::ports::{EventSink, SensorBus, StoragePort};

/// Invalid samples in one cycle that mark it as error-heavy.
const CYCLE_ERROR_BUDGET: u32 = 3;

/// Manifest flush period independent of the append-driven flushes.
const MANIFEST_FLUSH_INTERVAL_MS: u64 = 60_000;

/// The top-level loop. Generic over the sensor bus and storage medium so
/// the whole run executes under test with mock adapters.
pub struct ExperimentSupervisor<B: SensorBus, S: StoragePort> {
    config: ExperimentConfig,
    sensor: SensorChannel<B>,
    pid: PidController,
    coordinator: ActuatorCoordinator,
    failsafe: FailsafeRecovery,
    engine: TransitionEngine,
    logger: IntegrityLogger<S>,
    scheduler: Scheduler,

    target_c: f32,
    last_sample: Option<Sample>,
    stats: CycleStats,
    /// Monotonic cycle number (1-based), independent of lock-in resets.
    cycle: u32,
    consecutive_cycle_errors: u32,
    started: bool,
    halted: bool,
}

impl<B: SensorBus, S: StoragePort> ExperimentSupervisor<B, S> {
    /// Build the supervisor. Fails fast on invalid configuration, before
    /// any actuator or storage access.
    pub fn new(
        config: ExperimentConfig,
        bus: B,
        storage: S,
        start_unix_secs: u64,
    ) -> Result<Self, Error> {
        config.validate()?;

        let sensor = SensorChannel::new(bus, config.sensor, config.safety.stuck_window_secs);
        let pid = PidController::new(config.pid);
        let failsafe = FailsafeRecovery::new(config.safety);
        let engine = TransitionEngine::new(&config);
        let logger = IntegrityLogger::new(
            storage,
            config.logger,
            experiment_id_from_unix(start_unix_secs),
        );

        let mut scheduler = Scheduler::new();
        scheduler.add("control", Duty::Control, config.control_interval_ms);
        scheduler.add("snapshot", Duty::Snapshot, config.snapshot_interval_ms);
        scheduler.add("manifest-flush", Duty::ManifestFlush, MANIFEST_FLUSH_INTERVAL_MS);
        scheduler.add("telemetry", Duty::Telemetry, config.telemetry_interval_ms);

        let target_c = config.basal_temp_c;
        Ok(Self {
            config,
            sensor,
            pid,
            coordinator: ActuatorCoordinator::new(),
            failsafe,
            engine,
            logger,
            scheduler,
            target_c,
            last_sample: None,
            stats: CycleStats::new(1),
            cycle: 1,
            consecutive_cycle_errors: 0,
            started: false,
            halted: false,
        })
    }

    /// Initialize the experiment on storage and enter the first HES.
    /// A failed meta write here aborts the run before any control happens.
    pub fn start(&mut self, now_ms: u64, sink: &mut impl EventSink) -> Result<(), Error> {
        self.logger.init_experiment(&self.config)?;
        self.logger.set_cycle(self.cycle);

        let record = self.engine.start(now_ms);
        self.enter_hes(record.to, now_ms, sink);
        self.started = true;
        sink.emit(&AppEvent::Started { hes: record.to });
        info!(
            "[EXP:{}] run started in HES {}",
            self.logger.experiment_id(),
            record.to
        );
        Ok(())
    }

    /// Run one loop iteration. Duties fire according to their periods; a
    /// tick where nothing is due is a no-op.
    pub fn tick(
        &mut self,
        now_ms: u64,
        bank: &mut impl ActuatorBank,
        sink: &mut impl EventSink,
    ) {
        if self.halted || !self.started {
            return;
        }
        let duties = self.scheduler.due(now_ms);

        if duties.contains(&Duty::Control) {
            self.control_step(now_ms, bank, sink);
            if self.halted {
                return;
            }
        }
        if duties.contains(&Duty::Snapshot) {
            self.snapshot_step(now_ms);
        }
        if duties.contains(&Duty::ManifestFlush) {
            let _ = self.logger.flush_manifest();
        }
        if duties.contains(&Duty::Telemetry) {
            sink.emit(&AppEvent::Telemetry(self.status()));
        }
    }

    /// Process an external command. Range violations come back to the
    /// caller; nothing is partially applied.
    pub fn handle_command(
        &mut self,
        cmd: ExternalCommand,
        now_ms: u64,
        bank: &mut impl ActuatorBank,
        sink: &mut impl EventSink,
    ) -> Result<(), Error> {
        match cmd {
            ExternalCommand::SetTarget { actuator, value, ramp_ms } => {
                if self.halted {
                    return Err(Error::Safety(
                        self.failsafe
                            .shutdown_cause()
                            .unwrap_or(SafetyFault::ExternalStop),
                    ));
                }
                let transition = match ramp_ms {
                    Some(duration_ms) => Transition::Ramp { duration_ms },
                    None => Transition::Instant,
                };
                self.coordinator
                    .set(ActuatorTarget { id: actuator, value, transition }, now_ms)?;
                Ok(())
            }
            ExternalCommand::EmergencyStop => {
                self.failsafe.emergency_stop(SafetyFault::ExternalStop);
                self.halt(SafetyFault::ExternalStop, bank, sink);
                Ok(())
            }
        }
    }

    /// Current status for presentation and network layers.
    pub fn status(&self) -> StatusReport {
        StatusReport {
            sample: self.last_sample,
            control: self.pid.state(),
            actuators: self.coordinator.values(),
            current_hes: self.engine.current_hes(),
            cycle: self.cycle,
            health: self.failsafe.state(),
            logger_healthy: self.logger.healthy(),
            halted: self.halted,
        }
    }

    /// True once the run has been terminated.
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn health(&self) -> HealthState {
        self.failsafe.state()
    }

    /// Monotonic cycle number (1-based).
    pub fn cycle(&self) -> u32 {
        self.cycle
    }

    /// The integrity logger, for diagnostics and external verification.
    pub fn logger(&self) -> &IntegrityLogger<S> {
        &self.logger
    }

    // ── Per-tick stages ───────────────────────────────────────────

    fn control_step(
        &mut self,
        now_ms: u64,
        bank: &mut impl ActuatorBank,
        sink: &mut impl EventSink,
    ) {
        // Stage 1: acquisition.
        let sample = self.sensor.read(now_ms);
        self.last_sample = Some(sample);

        // Stage 2: health. The failsafe may run recovery on the bus here.
        let prev_health = self.failsafe.state();
        let health = self.failsafe.evaluate(&sample, &mut self.sensor, now_ms);
        if health != prev_health {
            sink.emit(&AppEvent::HealthChanged { from: prev_health, to: health });
        }
        if health == HealthState::EmergencyShutdown {
            let cause = self
                .failsafe
                .shutdown_cause()
                .unwrap_or(SafetyFault::RecoveryExhausted);
            self.halt(cause, bank, sink);
            return;
        }

        if sample.valid {
            self.stats.record_temp(sample.value);
        } else {
            self.stats.record_error();
        }

        // Stage 3: control computation.
        self.pid.step(&sample, self.target_c, self.config.tick_secs());
        let (heat, cool) = self.pid.thermal_demands();
        self.issue_thermal(ActuatorId::Heater, heat, now_ms);
        self.issue_thermal(ActuatorId::Cooler, cool, now_ms);

        // Stage 4: sequencing. A cycle can complete here, which is the one
        // place the run may be gated on logger health.
        let cycles_before = self.engine.completed_cycles();
        let records = self.engine.tick(now_ms);
        let mut lock_in_fired = false;
        for record in &records {
            sink.emit(&AppEvent::Transition(*record));
            if record.kind == TransitionKind::LockIn {
                lock_in_fired = true;
                sink.emit(&AppEvent::LockInApplied { at_cycle: self.cycle });
            }
        }
        let cycle_completed = self.engine.completed_cycles() > cycles_before || lock_in_fired;
        if cycle_completed {
            self.on_cycle_completed(bank, sink);
            if self.halted {
                // Cycle gate tripped: actuators are already safe.
                return;
            }
        }
        if let Some(entered) = records
            .iter()
            .rev()
            .find(|r| r.kind != TransitionKind::LockIn)
        {
            self.enter_hes(entered.to, now_ms, sink);
        }

        // Stage 5: actuation. Everything computed above lands on hardware.
        self.coordinator.tick(now_ms, bank);
        if self.coordinator.value(ActuatorId::Led) > 0.0
            || self.coordinator.value(ActuatorId::Vibration) > 0.0
        {
            self.stats.record_stimulus_tick();
        }
    }

    fn snapshot_step(&mut self, now_ms: u64) {
        let Some(sample) = self.last_sample else {
            return;
        };
        let snap = Snapshot {
            timestamp_ms: now_ms,
            sample,
            control: self.pid.state(),
            actuators: self.coordinator.values(),
            hes: self.engine.current_hes(),
            cycle: self.cycle,
            health: self.failsafe.state(),
        };
        // Failures feed the logger's health counter; the run-halt decision
        // is taken at the next cycle boundary, not here.
        let _ = self.logger.snapshot(&snap);
    }

    // ── Cycle and HES bookkeeping ─────────────────────────────────

    fn on_cycle_completed(&mut self, bank: &mut impl ActuatorBank, sink: &mut impl EventSink) {
        let _ = self.logger.cycle_summary(&self.stats, self.engine.records());
        sink.emit(&AppEvent::CycleCompleted { cycle: self.cycle });

        if self.stats.error_count >= CYCLE_ERROR_BUDGET {
            self.consecutive_cycle_errors += 1;
            warn!(
                "Cycle {} was error-heavy ({} invalid reads), consecutive {}",
                self.cycle, self.stats.error_count, self.consecutive_cycle_errors
            );
        } else {
            self.consecutive_cycle_errors = 0;
        }

        // Gate the next cycle on storage and error health: the run must
        // not keep accumulating unlogged state in memory.
        if !self.logger.healthy() {
            sink.emit(&AppEvent::LoggerUnhealthy {
                failures: self.logger.consecutive_write_failures(),
            });
            self.failsafe.emergency_stop(SafetyFault::StorageUnhealthy);
            self.halt(SafetyFault::StorageUnhealthy, bank, sink);
            return;
        }
        if self.consecutive_cycle_errors >= self.config.max_consecutive_cycle_errors {
            self.failsafe.emergency_stop(SafetyFault::SensorSilent);
            self.halt(SafetyFault::SensorSilent, bank, sink);
            return;
        }

        self.cycle += 1;
        self.logger.set_cycle(self.cycle);
        self.stats = CycleStats::new(self.cycle);
        info!("Cycle {} starting", self.cycle);
    }

    fn enter_hes(&mut self, index: usize, now_ms: u64, sink: &mut impl EventSink) {
        let hes = &self.config.hes[index];
        self.target_c = hes.setpoint_c.unwrap_or(self.config.basal_temp_c);

        // Stimulus actuators not named by this state fall back to off, so
        // a stimulus never outlives the state that requested it.
        let mut requested = [false; ActuatorId::COUNT];
        let targets: Vec<ActuatorTarget> = hes.targets.clone();
        for target in targets {
            requested[target.id as usize] = true;
            if let Err(e) = self.coordinator.set(target, now_ms) {
                warn!("HES {index}: target for {} rejected: {e}", target.id.name());
            }
        }
        for id in [ActuatorId::Led, ActuatorId::Vibration] {
            if !requested[id as usize] {
                let off = ActuatorTarget { id, value: 0.0, transition: Transition::Instant };
                let _ = self.coordinator.set(off, now_ms);
            }
        }

        let dwell_ms = self.engine.dwell_deadline_ms().saturating_sub(now_ms);
        sink.emit(&AppEvent::HesEntered { index, dwell_ms });
        info!(
            "HES {index} entered: setpoint {:.1} C, dwell {} min",
            self.target_c,
            dwell_ms / 60_000
        );
    }

    fn issue_thermal(&mut self, id: ActuatorId, value: f32, now_ms: u64) {
        let target = ActuatorTarget { id, value, transition: Transition::Instant };
        if let Err(e) = self.coordinator.set(target, now_ms) {
            warn!("{}: thermal demand rejected: {e}", id.name());
        }
    }

    // ── Halt paths ────────────────────────────────────────────────

    /// Terminal stop: actuators safe first, then the durable finalize,
    /// then the event. Nothing runs after this.
    fn halt(
        &mut self,
        cause: SafetyFault,
        bank: &mut impl ActuatorBank,
        sink: &mut impl EventSink,
    ) {
        if self.halted {
            return;
        }
        self.coordinator.emergency_stop(bank);
        let reason = cause.to_string();
        let _ = self.logger.finalize(RunStatus::Error, Some(&reason));
        self.halted = true;
        sink.emit(&AppEvent::EmergencyShutdown { cause });
    }
}
