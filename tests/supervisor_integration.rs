//! End-to-end integration tests for the supervisory loop.
//!
//! The full core runs against mock hardware at accelerated time: one
//! `tick()` per simulated second. Storage is in-memory with injectable
//! failures; the probe can be pinned (stuck fault) or killed (dead bus).

use std::cell::RefCell;
use std::rc::Rc;

use incubator::actuators::{ActuatorBank, ActuatorId};
use incubator::adapters::mem_storage::MemStorage;
use incubator::adapters::sim_bus::SimChamber;
use incubator::app::commands::ExternalCommand;
use incubator::app::events::AppEvent;
use incubator::app::ports::{EventSink, SensorBus, StoragePort};
use incubator::app::supervisor::ExperimentSupervisor;
use incubator::config::{DurationPolicy, ExperimentConfig, HesDefinition, LockInConfig};
use incubator::failsafe::HealthState;
use incubator::{ActuatorError, Error, SafetyFault, SensorError, StorageError};

// ── Mock hardware ─────────────────────────────────────────────

/// Records every applied actuator value.
#[derive(Default)]
struct RecordingBank {
    applied: [f32; ActuatorId::COUNT],
}

impl RecordingBank {
    fn value(&self, id: ActuatorId) -> f32 {
        self.applied[id as usize]
    }

    /// The thermal pair must never be energised together once a tick has
    /// fully settled.
    fn assert_thermal_exclusive(&self) {
        let heat = self.value(ActuatorId::Heater);
        let cool = self.value(ActuatorId::Cooler);
        assert!(
            heat == 0.0 || cool == 0.0,
            "heater ({heat}) and cooler ({cool}) energised together"
        );
    }
}

impl ActuatorBank for RecordingBank {
    fn apply(&mut self, id: ActuatorId, value: f32) -> Result<(), ActuatorError> {
        self.applied[id as usize] = value;
        Ok(())
    }
}

/// A probe that can be pinned to a fixed value; a hard reset repairs it
/// only if `repairable`.
struct FaultProbeState {
    reading: f32,
    pinned: Option<f32>,
    repairable: bool,
    step: u32,
}

#[derive(Clone)]
struct FaultProbe(Rc<RefCell<FaultProbeState>>);

impl FaultProbe {
    fn new(reading: f32, repairable: bool) -> Self {
        Self(Rc::new(RefCell::new(FaultProbeState {
            reading,
            pinned: None,
            repairable,
            step: 0,
        })))
    }

    fn pin(&self, value: f32) {
        self.0.borrow_mut().pinned = Some(value);
    }
}

impl SensorBus for FaultProbe {
    fn read_raw(&mut self) -> Result<f32, SensorError> {
        let mut s = self.0.borrow_mut();
        if let Some(pinned) = s.pinned {
            return Ok(pinned);
        }
        s.step += 1;
        Ok(s.reading + (s.step % 5) as f32 * 0.03)
    }
    fn reset_bus(&mut self) -> Result<(), SensorError> {
        Ok(())
    }
    fn hard_reset(&mut self) -> Result<(), SensorError> {
        let mut s = self.0.borrow_mut();
        if s.repairable {
            s.pinned = None;
        }
        Ok(())
    }
    fn reinit(&mut self) -> Result<(), SensorError> {
        Ok(())
    }
}

/// Storage handle the test keeps after the supervisor takes ownership,
/// so failures can be injected mid-run.
#[derive(Clone)]
struct SharedStorage(Rc<RefCell<MemStorage>>);

impl SharedStorage {
    fn new() -> Self {
        Self(Rc::new(RefCell::new(MemStorage::new())))
    }

    fn set_offline(&self, offline: bool) {
        self.0.borrow_mut().set_offline(offline);
    }
}

impl StoragePort for SharedStorage {
    fn write_file(&mut self, name: &str, contents: &[u8]) -> Result<(), StorageError> {
        self.0.borrow_mut().write_file(name, contents)
    }
}

/// Collects every emitted event for later assertions.
#[derive(Default)]
struct CollectingSink {
    events: Vec<AppEvent>,
}

impl CollectingSink {
    fn count(&self, pred: impl Fn(&AppEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }
}

impl EventSink for CollectingSink {
    fn emit(&mut self, event: &AppEvent) {
        self.events.push(event.clone());
    }
}

// ── Configurations ────────────────────────────────────────────

/// Minimal deterministic config: `n` states on one-minute dwells, no
/// stochastic jumps, fast recovery windows for test speed.
fn fast_config(num_states: usize) -> ExperimentConfig {
    let hes = (0..num_states)
        .map(|index| HesDefinition {
            index,
            duration: DurationPolicy::Fixed { minutes: 1 },
            setpoint_c: None,
            targets: vec![],
        })
        .collect();
    let mut config = ExperimentConfig {
        num_states,
        canonical_sequence: (0..num_states).collect(),
        markovian_p: 0.0,
        rng_seed: 99,
        lock_in: None,
        hes,
        ..ExperimentConfig::default()
    };
    config.safety.stuck_window_secs = 60;
    config.safety.recovery.cooldown_secs = 0;
    config
}

// ── Tests ─────────────────────────────────────────────────────

#[test]
fn run_progresses_through_cycles_and_logs_durably() {
    let config = fast_config(2);
    let (mut chamber, bus, _unused_bank) = SimChamber::new(23.0, 21.0);
    let mut bank = RecordingBank::default();
    let mut sink = CollectingSink::default();

    let mut sup = ExperimentSupervisor::new(config, bus, MemStorage::new(), 1_700_000_000).unwrap();
    sup.start(0, &mut sink).unwrap();

    // Ten simulated minutes: five 2-minute cycles.
    for t in 0..600u64 {
        sup.tick(t * 1000, &mut bank, &mut sink);
        bank.assert_thermal_exclusive();
        chamber.step(1.0);
    }

    assert!(!sup.is_halted());
    assert!(sup.cycle() >= 4, "only reached cycle {}", sup.cycle());
    assert!(sink.count(|e| matches!(e, AppEvent::CycleCompleted { .. })) >= 4);
    assert!(sink.count(|e| matches!(e, AppEvent::HesEntered { .. })) >= 8);

    // Files exist: meta, snapshots, summaries, manifest.
    let storage = sup.logger().storage();
    let paths = storage.paths();
    assert!(paths.iter().any(|p| p.ends_with("meta.json")));
    assert!(paths.iter().any(|p| p.ends_with("manifest.json")));
    assert!(paths.iter().any(|p| p.contains("_summary")));
    let snapshots = paths
        .iter()
        .filter(|p| p.contains("cycle_") && !p.contains("summary"))
        .count();
    // One snapshot per 10 s over 600 s.
    assert!(snapshots >= 55, "only {snapshots} snapshots");

    // External integrity verification: every manifest entry's digest
    // matches the stored file bytes.
    let id = sup.logger().experiment_id().to_string();
    for entry in sup.logger().manifest_entries() {
        let bytes = storage
            .file(&format!("{id}/{}", entry.filename))
            .expect("manifest references a missing file");
        let digest = hex::encode(hmac_sha256::Hash::hash(&bytes));
        assert_eq!(digest, entry.sha256, "digest mismatch for {}", entry.filename);
    }
}

#[test]
fn thermal_control_regulates_toward_setpoint() {
    let config = fast_config(2); // basal 23.0
    let (mut chamber, bus, mut bank) = SimChamber::new(21.0, 20.0);
    let mut sink = CollectingSink::default();

    let mut sup = ExperimentSupervisor::new(config, bus, MemStorage::new(), 1_700_000_000).unwrap();
    sup.start(0, &mut sink).unwrap();

    for t in 0..1_800u64 {
        sup.tick(t * 1000, &mut bank, &mut sink);
        chamber.step(1.0);
    }

    assert!(!sup.is_halted());
    let final_temp = chamber.temperature_c();
    assert!(final_temp > 21.5, "chamber never warmed: {final_temp:.2}");
    assert!(final_temp < 24.0, "chamber overshot: {final_temp:.2}");
}

#[test]
fn stuck_probe_recovers_and_run_continues() {
    let config = fast_config(2);
    let probe = FaultProbe::new(23.0, true);
    let mut bank = RecordingBank::default();
    let mut sink = CollectingSink::default();

    let mut sup =
        ExperimentSupervisor::new(config, probe.clone(), MemStorage::new(), 1_700_000_000).unwrap();
    sup.start(0, &mut sink).unwrap();

    for t in 0..300u64 {
        if t == 30 {
            probe.pin(22.4);
        }
        sup.tick(t * 1000, &mut bank, &mut sink);
    }

    assert!(!sup.is_halted());
    assert_eq!(sup.health(), HealthState::Healthy);
    // The machine walked Warning → Recovering → Healthy.
    assert!(sink.count(|e| matches!(
        e,
        AppEvent::HealthChanged { to: HealthState::Recovering, .. }
    )) >= 1);
    assert!(sink.count(|e| matches!(
        e,
        AppEvent::HealthChanged { to: HealthState::Healthy, .. }
    )) >= 1);
}

#[test]
fn unrepairable_stuck_probe_escalates_to_shutdown() {
    let config = fast_config(2);
    let probe = FaultProbe::new(23.0, false);
    let mut bank = RecordingBank::default();
    let mut sink = CollectingSink::default();

    let mut sup =
        ExperimentSupervisor::new(config, probe.clone(), MemStorage::new(), 1_700_000_000).unwrap();
    sup.start(0, &mut sink).unwrap();

    probe.pin(19.1);
    let mut halted_at = None;
    for t in 0..600u64 {
        sup.tick(t * 1000, &mut bank, &mut sink);
        if sup.is_halted() {
            halted_at = Some(t);
            break;
        }
    }

    // Stuck window is 60 s; three failed recovery attempts follow.
    let halted_at = halted_at.expect("run never halted");
    assert!(halted_at < 120, "halted too late: {halted_at} s");
    assert_eq!(sup.health(), HealthState::EmergencyShutdown);

    // Actuators forced safe.
    for id in ActuatorId::ALL {
        assert_eq!(bank.value(id), 0.0, "{} not safe", id.name());
    }

    // Terminal status written durably with the reason.
    assert_eq!(
        sink.count(|e| matches!(
            e,
            AppEvent::EmergencyShutdown { cause: SafetyFault::RecoveryExhausted }
        )),
        1
    );
    let id = sup.logger().experiment_id().to_string();
    let manifest = sup
        .logger()
        .storage()
        .file(&format!("{id}/manifest.json"))
        .expect("manifest not finalized");
    let text = String::from_utf8(manifest).unwrap();
    assert!(text.contains("\"status\":\"error\""));
    assert!(text.contains("recovery exhausted"));

    // The run stays down: further ticks change nothing.
    let cycle = sup.cycle();
    for t in 600..700u64 {
        sup.tick(t * 1000, &mut bank, &mut sink);
    }
    assert_eq!(sup.cycle(), cycle);
}

#[test]
fn storage_failures_halt_the_run_at_the_cycle_boundary() {
    let config = fast_config(2);
    let (mut chamber, bus, _b) = SimChamber::new(23.0, 21.0);
    let mut bank = RecordingBank::default();
    let mut sink = CollectingSink::default();

    let storage = SharedStorage::new();
    let mut sup =
        ExperimentSupervisor::new(config, bus, storage.clone(), 1_700_000_000).unwrap();
    sup.start(0, &mut sink).unwrap();

    // Healthy first minute, then the card dies for good. Snapshots every
    // 10 s keep failing; once the streak crosses the threshold (10) the
    // *next cycle boundary* refuses to start a new cycle and the run halts.
    let mut halted_at = None;
    for t in 0..2_000u64 {
        if t == 60 {
            storage.set_offline(true);
        }
        sup.tick(t * 1000, &mut bank, &mut sink);
        chamber.step(1.0);
        if sup.is_halted() {
            halted_at = Some(t);
            break;
        }
    }

    let halted_at = halted_at.expect("run never halted on dead storage");
    // Cycles are 2 minutes; the first boundary after the failure streak
    // crossed the threshold is at t = 240 s.
    assert_eq!(halted_at, 240, "halted at {halted_at} s");
    assert!(!sup.status().logger_healthy);
    assert!(sink.count(|e| matches!(e, AppEvent::LoggerUnhealthy { .. })) >= 1);
    assert_eq!(
        sink.count(|e| matches!(
            e,
            AppEvent::EmergencyShutdown { cause: SafetyFault::StorageUnhealthy }
        )),
        1
    );

    // No new cycle was started after the gate tripped.
    assert_eq!(sup.cycle(), 2);
    for id in ActuatorId::ALL {
        assert_eq!(bank.value(id), 0.0);
    }
}

#[test]
fn lock_in_fires_exactly_once_end_to_end() {
    let mut config = fast_config(3);
    config.lock_in = Some(LockInConfig {
        trigger_cycles: 2,
        new_sequence: vec![1, 2, 0],
    });
    let (mut chamber, bus, _b) = SimChamber::new(23.0, 21.0);
    let mut bank = RecordingBank::default();
    let mut sink = CollectingSink::default();

    let mut sup = ExperimentSupervisor::new(config, bus, MemStorage::new(), 1_700_000_000).unwrap();
    sup.start(0, &mut sink).unwrap();

    // 3-minute cycles; run 30 minutes so many boundaries pass after the
    // trigger.
    for t in 0..1_800u64 {
        sup.tick(t * 1000, &mut bank, &mut sink);
        chamber.step(1.0);
    }

    assert!(!sup.is_halted());
    assert_eq!(
        sink.count(|e| matches!(e, AppEvent::LockInApplied { .. })),
        1,
        "lock-in must fire exactly once"
    );
}

#[test]
fn emergency_stop_command_is_immediate_and_terminal() {
    let config = fast_config(2);
    let (mut chamber, bus, _b) = SimChamber::new(23.0, 21.0);
    let mut bank = RecordingBank::default();
    let mut sink = CollectingSink::default();

    let mut sup = ExperimentSupervisor::new(config, bus, MemStorage::new(), 1_700_000_000).unwrap();
    sup.start(0, &mut sink).unwrap();

    for t in 0..30u64 {
        sup.tick(t * 1000, &mut bank, &mut sink);
        chamber.step(1.0);
    }
    assert!(!sup.is_halted());

    sup.handle_command(ExternalCommand::EmergencyStop, 30_000, &mut bank, &mut sink)
        .unwrap();

    assert!(sup.is_halted());
    assert_eq!(sup.health(), HealthState::EmergencyShutdown);
    for id in ActuatorId::ALL {
        assert_eq!(bank.value(id), 0.0);
    }
    let id = sup.logger().experiment_id().to_string();
    let manifest = sup
        .logger()
        .storage()
        .file(&format!("{id}/manifest.json"))
        .unwrap();
    assert!(String::from_utf8(manifest).unwrap().contains("external emergency stop"));
}

#[test]
fn set_target_command_rejects_out_of_range_and_applies_valid() {
    let config = fast_config(2);
    let (mut chamber, bus, _b) = SimChamber::new(23.0, 21.0);
    let mut bank = RecordingBank::default();
    let mut sink = CollectingSink::default();

    let mut sup = ExperimentSupervisor::new(config, bus, MemStorage::new(), 1_700_000_000).unwrap();
    sup.start(0, &mut sink).unwrap();
    sup.tick(0, &mut bank, &mut sink);

    // Out of range: caller-visible rejection, nothing applied.
    let err = sup.handle_command(
        ExternalCommand::SetTarget { actuator: ActuatorId::Led, value: 130.0, ramp_ms: None },
        1_000,
        &mut bank,
        &mut sink,
    );
    assert!(matches!(err, Err(Error::Actuator(ActuatorError::OutOfRange))));

    // Valid override applies on the next control tick.
    sup.handle_command(
        ExternalCommand::SetTarget { actuator: ActuatorId::Led, value: 40.0, ramp_ms: None },
        1_000,
        &mut bank,
        &mut sink,
    )
    .unwrap();
    sup.tick(1_000, &mut bank, &mut sink);
    chamber.step(1.0);
    assert_eq!(bank.value(ActuatorId::Led), 40.0);
}

#[test]
fn invalid_samples_are_snapshotted_as_invalid_never_laundered() {
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

    let config = fast_config(2);
    let mut bank = RecordingBank::default();
    let mut sink = CollectingSink::default();
    let mut sup =
        ExperimentSupervisor::new(config, DeadBus, MemStorage::new(), 1_700_000_000).unwrap();
    sup.start(0, &mut sink).unwrap();

    // The silent-sensor timeout (60 s) will halt the run; before that,
    // snapshots at 10 s cadence must carry valid=false.
    for t in 0..120u64 {
        sup.tick(t * 1000, &mut bank, &mut sink);
        if sup.is_halted() {
            break;
        }
    }
    assert!(sup.is_halted());
    assert_eq!(
        sink.count(|e| matches!(
            e,
            AppEvent::EmergencyShutdown { cause: SafetyFault::SensorSilent }
        )),
        1
    );

    let storage = sup.logger().storage();
    let snapshot_paths: Vec<String> = storage
        .paths()
        .into_iter()
        .filter(|p| p.contains("cycle_") && !p.contains("summary"))
        .collect();
    assert!(!snapshot_paths.is_empty());
    for path in snapshot_paths {
        let text = String::from_utf8(storage.file(&path).unwrap()).unwrap();
        assert!(
            text.contains("\"valid\":false"),
            "snapshot {path} hides an invalid sample"
        );
        assert!(text.contains("BusReadFailed"));
    }
}

#[test]
fn telemetry_is_emitted_periodically() {
    let config = fast_config(2); // telemetry every 60 s
    let (mut chamber, bus, _b) = SimChamber::new(23.0, 21.0);
    let mut bank = RecordingBank::default();
    let mut sink = CollectingSink::default();

    let mut sup = ExperimentSupervisor::new(config, bus, MemStorage::new(), 1_700_000_000).unwrap();
    sup.start(0, &mut sink).unwrap();
    for t in 0..300u64 {
        sup.tick(t * 1000, &mut bank, &mut sink);
        chamber.step(1.0);
    }
    let telemetry = sink.count(|e| matches!(e, AppEvent::Telemetry(_)));
    assert!((4..=7).contains(&telemetry), "telemetry count {telemetry}");
}

#[test]
fn invalid_configuration_is_rejected_before_any_io() {
    let mut config = fast_config(2);
    config.markovian_p = 2.0;
    let (_chamber, bus, _b) = SimChamber::new(23.0, 21.0);
    let storage = MemStorage::new();
    let result = ExperimentSupervisor::new(config, bus, storage, 0);
    assert!(result.is_err());
}
