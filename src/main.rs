//! Host simulation entry point.
//!
//! Runs the full supervisory core against the simulated chamber at
//! accelerated time: one loop iteration per simulated second. Useful for
//! dry-running an experiment configuration and for watching the failsafe
//! ladder work — a probe fault is injected partway through the run.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  Adapters (outer ring)                   │
//! │                                                          │
//! │  SimSensorBus   SimActuatorBank   FsStorage   LogSink    │
//! │                                                          │
//! │  ────────────── Port Trait Boundary ──────────────       │
//! │                                                          │
//! │  ┌────────────────────────────────────────────────────┐  │
//! │  │        ExperimentSupervisor (pure logic)           │  │
//! │  │  SensorChannel · PID · Failsafe · Markov · Logger  │  │
//! │  └────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use log::{info, LevelFilter, Metadata, Record};

use incubator::adapters::fs_storage::FsStorage;
use incubator::adapters::log_sink::LogEventSink;
use incubator::adapters::sim_bus::SimChamber;
use incubator::app::supervisor::ExperimentSupervisor;
use incubator::config::{DurationPolicy, ExperimentConfig, LockInConfig};

/// Simulated run length (seconds).
const RUN_SECS: u64 = 4 * 3600;

/// Simulated second at which the probe gets pinned (stuck fault demo).
const FAULT_AT_SECS: u64 = 5_400;

struct StderrLogger;

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

/// Demo configuration: the default experiment with dwells short enough to
/// see several cycles in a four-hour simulation.
fn demo_config() -> ExperimentConfig {
    let mut config = ExperimentConfig::default();
    for hes in &mut config.hes {
        hes.duration = DurationPolicy::Fixed { minutes: 5 };
    }
    config.hes[0].duration = DurationPolicy::Random { min_minutes: 4, max_minutes: 8 };
    config.lock_in = Some(LockInConfig {
        trigger_cycles: 2,
        new_sequence: vec![0, 2, 1, 4, 3],
    });
    config.rng_seed = 2024;
    config
}

fn main() -> Result<()> {
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(LevelFilter::Info);

    let start_secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock before epoch")?
        .as_secs();

    let config = demo_config();
    let (mut chamber, bus, mut bank) = SimChamber::new(23.0, 21.0);
    let storage = FsStorage::new("data");

    let mut supervisor = ExperimentSupervisor::new(config, bus, storage, start_secs)
        .context("supervisor construction failed")?;
    let mut sink = LogEventSink::new();
    supervisor.start(0, &mut sink).context("experiment start failed")?;

    info!("Simulating {RUN_SECS} s, probe fault at t={FAULT_AT_SECS} s");
    for sim_secs in 0..RUN_SECS {
        if sim_secs == FAULT_AT_SECS {
            info!("--- injecting stuck probe ---");
            chamber.pin_probe(Some(19.1));
        }
        supervisor.tick(sim_secs * 1000, &mut bank, &mut sink);
        if supervisor.is_halted() {
            info!("Run halted at t={sim_secs} s");
            break;
        }
        chamber.step(1.0);
    }

    let status = supervisor.status();
    info!(
        "Final: cycle {}, HES {}, health {:?}, chamber {:.2} C, halted {}",
        status.cycle,
        status.current_hes,
        status.health,
        chamber.temperature_c(),
        status.halted
    );
    Ok(())
}
