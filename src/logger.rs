//! Integrity-checked experiment logging.
//!
//! Every record is serialized to JSON, written through the storage port
//! with bounded retries, checksummed with SHA-256, and only then entered
//! into the in-memory manifest — append-after-durable-write, never before.
//! An external verifier can replay the manifest and confirm every claimed
//! file matches its digest.
//!
//! Write health is a counter, not a flag: each failed write increments it,
//! each success decrements it by one. A single good write after a failure
//! streak does not clear the streak — the logger demands sustained success,
//! and past the threshold it reports unhealthy so the supervisor can halt
//! the run instead of accumulating unlogged state in memory.

use hmac_sha256::Hash;
use log::{error, info, warn};
use serde::Serialize;

use crate::actuators::ActuatorId;
use crate::app::ports::StoragePort;
use crate::config::{ExperimentConfig, LoggerConfig};
use crate::control::ControlState;
use crate::error::StorageError;
use crate::failsafe::HealthState;
use crate::markov::TransitionRecord;
use crate::sensors::Sample;

/// Point-in-time record of the whole system, one per logging interval.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub timestamp_ms: u64,
    /// Carries `valid` and the fault code verbatim: a stale or invalid
    /// reading is logged as exactly that, never laundered into a number.
    pub sample: Sample,
    pub control: ControlState,
    /// Applied values, indexed by `ActuatorId as usize`.
    pub actuators: [f32; ActuatorId::COUNT],
    pub hes: usize,
    pub cycle: u32,
    pub health: HealthState,
}

/// Aggregated statistics for one completed cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleStats {
    pub cycle: u32,
    pub min_temp_c: f32,
    pub max_temp_c: f32,
    pub mean_temp_c: f32,
    pub samples: u32,
    pub error_count: u32,
    pub stimulus_ticks: u32,
    #[serde(skip)]
    temp_sum: f32,
}

impl CycleStats {
    pub fn new(cycle: u32) -> Self {
        Self {
            cycle,
            min_temp_c: f32::INFINITY,
            max_temp_c: f32::NEG_INFINITY,
            mean_temp_c: 0.0,
            samples: 0,
            error_count: 0,
            stimulus_ticks: 0,
            temp_sum: 0.0,
        }
    }

    pub fn record_temp(&mut self, value: f32) {
        self.min_temp_c = self.min_temp_c.min(value);
        self.max_temp_c = self.max_temp_c.max(value);
        self.temp_sum += value;
        self.samples += 1;
        self.mean_temp_c = self.temp_sum / self.samples as f32;
    }

    pub fn record_error(&mut self) {
        self.error_count += 1;
    }

    pub fn record_stimulus_tick(&mut self) {
        self.stimulus_ticks += 1;
    }
}

/// Terminal run status written at finalize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Error,
}

impl RunStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

/// One manifest line: a durably written file and its digest.
#[derive(Debug, Clone, Serialize)]
pub struct ManifestEntry {
    pub filename: String,
    pub sha256: String,
    pub cycle: u32,
}

#[derive(Serialize)]
struct ManifestDoc<'a> {
    experiment_id: &'a str,
    status: &'a str,
    reason: Option<&'a str>,
    files: &'a [ManifestEntry],
}

#[derive(Serialize)]
struct MetaDoc<'a> {
    experiment_id: &'a str,
    firmware: &'a str,
    parameters: &'a ExperimentConfig,
}

#[derive(Serialize)]
struct SummaryDoc<'a> {
    experiment_id: &'a str,
    stats: &'a CycleStats,
    sequential_transitions: u32,
    stochastic_jumps: u32,
    transitions: &'a [TransitionRecord],
}

/// Collision-resistant, human-sortable experiment directory name.
pub fn experiment_id_from_unix(secs: u64) -> String {
    format!("exp_{secs:010}")
}

/// Durable, checksummed experiment logger.
pub struct IntegrityLogger<S: StoragePort> {
    storage: S,
    cfg: LoggerConfig,
    experiment_id: String,
    entries: Vec<ManifestEntry>,
    consecutive_write_failures: u32,
    appends_since_flush: u32,
    current_cycle: u32,
    finalized: bool,
}

impl<S: StoragePort> IntegrityLogger<S> {
    pub fn new(storage: S, cfg: LoggerConfig, experiment_id: String) -> Self {
        Self {
            storage,
            cfg,
            experiment_id,
            entries: Vec::new(),
            consecutive_write_failures: 0,
            appends_since_flush: 0,
            current_cycle: 0,
            finalized: false,
        }
    }

    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Write the run's `meta.json` (parameters, firmware version). Called
    /// once before the first cycle.
    pub fn init_experiment(&mut self, config: &ExperimentConfig) -> Result<(), StorageError> {
        let meta = MetaDoc {
            experiment_id: &self.experiment_id,
            firmware: env!("CARGO_PKG_VERSION"),
            parameters: config,
        };
        let bytes = serde_json::to_vec(&meta).map_err(|_| StorageError::Serialize)?;
        self.write_with_retries("meta.json", &bytes)?;
        info!("[EXP:{}] experiment initialized", self.experiment_id);
        Ok(())
    }

    /// The cycle new manifest entries are attributed to. Entries from the
    /// current cycle are exempt from trimming.
    pub fn set_cycle(&mut self, cycle: u32) {
        self.current_cycle = cycle;
    }

    /// Persist one snapshot and enter it into the manifest.
    pub fn snapshot(&mut self, snap: &Snapshot) -> Result<(), StorageError> {
        let filename = format!("cycle_{}_{}.json", snap.cycle, snap.timestamp_ms);
        let bytes = serde_json::to_vec(snap).map_err(|_| StorageError::Serialize)?;
        self.write_tracked(filename, &bytes)
    }

    /// Persist the end-of-cycle summary with the full transition history.
    pub fn cycle_summary(
        &mut self,
        stats: &CycleStats,
        transitions: &[TransitionRecord],
    ) -> Result<(), StorageError> {
        let sequential = transitions
            .iter()
            .filter(|t| t.kind == crate::markov::TransitionKind::Sequential)
            .count() as u32;
        let jumps = transitions
            .iter()
            .filter(|t| t.kind == crate::markov::TransitionKind::StochasticJump)
            .count() as u32;
        let doc = SummaryDoc {
            experiment_id: &self.experiment_id,
            stats,
            sequential_transitions: sequential,
            stochastic_jumps: jumps,
            transitions,
        };
        let filename = format!("cycle_{}_summary.json", stats.cycle);
        let bytes = serde_json::to_vec(&doc).map_err(|_| StorageError::Serialize)?;
        let result = self.write_tracked(filename, &bytes);
        if result.is_ok() {
            info!(
                "[EXP:{}] cycle {} summary logged ({} samples)",
                self.experiment_id, stats.cycle, stats.samples
            );
        }
        result
    }

    /// Rewrite the manifest file from the in-memory entries.
    pub fn flush_manifest(&mut self) -> Result<(), StorageError> {
        self.write_manifest("running", None)
    }

    /// Durably record the terminal status and reason. The run must not keep
    /// controlling actuators after this.
    pub fn finalize(&mut self, status: RunStatus, reason: Option<&str>) -> Result<(), StorageError> {
        self.finalized = true;
        let result = self.write_manifest(status.as_str(), reason);
        match &result {
            Ok(()) => info!("[EXP:{}] experiment {}", self.experiment_id, status.as_str()),
            Err(e) => error!(
                "[EXP:{}] finalize write failed: {e}",
                self.experiment_id
            ),
        }
        result
    }

    /// False once sustained write failures crossed the threshold. The
    /// supervisor checks this before starting a new cycle.
    pub fn healthy(&self) -> bool {
        self.consecutive_write_failures < self.cfg.write_failure_threshold
    }

    pub fn consecutive_write_failures(&self) -> u32 {
        self.consecutive_write_failures
    }

    pub fn manifest_entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// The storage adapter, for diagnostics and external verification.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    // ── Internal ──────────────────────────────────────────────────

    /// Write a data file; on confirmed success append its digest to the
    /// manifest and flush the manifest on schedule.
    fn write_tracked(&mut self, filename: String, bytes: &[u8]) -> Result<(), StorageError> {
        self.write_with_retries(&filename, bytes)?;

        // The write is durable; only now may the manifest claim the file.
        let digest = hex::encode(Hash::hash(bytes));
        self.entries.push(ManifestEntry {
            filename,
            sha256: digest,
            cycle: self.current_cycle,
        });
        self.trim_manifest();

        self.appends_since_flush += 1;
        if self.appends_since_flush >= self.cfg.manifest_flush_every {
            self.appends_since_flush = 0;
            // A flush failure is tracked by the same health counter; the
            // entries stay in memory for the next flush.
            let _ = self.flush_manifest();
        }
        Ok(())
    }

    fn write_manifest(&mut self, status: &str, reason: Option<&str>) -> Result<(), StorageError> {
        let doc = ManifestDoc {
            experiment_id: &self.experiment_id,
            status,
            reason,
            files: &self.entries,
        };
        let bytes = serde_json::to_vec(&doc).map_err(|_| StorageError::Serialize)?;
        self.write_with_retries("manifest.json", &bytes)
    }

    /// Bounded-retry write with failure-streak accounting.
    fn write_with_retries(&mut self, filename: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = format!("{}/{}", self.experiment_id, filename);
        let mut last_err = StorageError::WriteFailed;
        for _ in 0..self.cfg.write_retries {
            match self.storage.write_file(&path, bytes) {
                Ok(()) => {
                    // Sustained success is required to clear a streak.
                    self.consecutive_write_failures =
                        self.consecutive_write_failures.saturating_sub(1);
                    return Ok(());
                }
                Err(e) => last_err = e,
            }
        }

        self.consecutive_write_failures += 1;
        warn!(
            "Storage write failed for {path}: {last_err} (streak {})",
            self.consecutive_write_failures
        );
        if self.consecutive_write_failures == self.cfg.write_failure_threshold {
            error!(
                "Storage unhealthy: {} consecutive write failures",
                self.consecutive_write_failures
            );
        }
        Err(last_err)
    }

    /// Keep the manifest bounded. Trimming is metadata-only — the files
    /// stay on storage — and never drops an entry belonging to the cycle
    /// still in progress.
    fn trim_manifest(&mut self) {
        while self.entries.len() > self.cfg.manifest_max_entries {
            let Some(pos) = self
                .entries
                .iter()
                .position(|e| e.cycle < self.current_cycle)
            else {
                warn!("Manifest over cap but every entry is from the current cycle");
                break;
            };
            self.entries.remove(pos);
        }
    }
}
