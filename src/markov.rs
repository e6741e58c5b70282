//! Markovian experiment-state sequencing.
//!
//! The chamber moves through hidden environmental states (HES). Each
//! transition follows the canonical sequence with probability `1 − p` and
//! otherwise jumps uniformly to one of the `n − 1` states that are not the
//! sequential successor — which may be the current state itself, so
//! self-loops are a legal outcome of the jump draw.
//!
//! ```text
//!   r ~ U[0,1)
//!   r < 1 − p   →  next in sequence          (probability 1 − p)
//!   otherwise   →  uniform over non-successor (probability p / (n − 1) each)
//! ```
//!
//! A cycle completes when a transition enters the active sequence's
//! starting index. If lock-in is configured, the canonical sequence is
//! swapped exactly once at the configured cycle boundary — irreversibly for
//! the run — and a distinguished record marks the event.
//!
//! The engine owns a single seeded random stream for both transition and
//! dwell draws; identical seed and configuration reproduce the full record
//! sequence exactly.

use log::info;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::config::{DurationPolicy, ExperimentConfig, LockInConfig};

/// How a transition was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransitionKind {
    /// The run's starting state.
    Initial,
    /// Followed the canonical sequence.
    Sequential,
    /// Deviated from the sequence.
    StochasticJump,
    /// The one-time sequence substitution.
    LockIn,
}

/// One entry in the append-only experiment history. Never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TransitionRecord {
    pub from: usize,
    pub to: usize,
    pub timestamp_ms: u64,
    pub kind: TransitionKind,
    /// Selection probability of this outcome under the transition rule.
    pub probability: f32,
}

/// Drives the HES sequence for one run.
pub struct TransitionEngine {
    sequence: Vec<usize>,
    num_states: usize,
    markovian_p: f32,
    durations: Vec<DurationPolicy>,
    lock_in: Option<LockInConfig>,
    lock_in_applied: bool,
    rng: SmallRng,
    current: usize,
    /// Index whose re-entry completes a cycle (head of the active sequence).
    start_index: usize,
    completed_cycles: u32,
    records: Vec<TransitionRecord>,
    dwell_deadline_ms: u64,
}

impl TransitionEngine {
    pub fn new(config: &ExperimentConfig) -> Self {
        Self {
            sequence: config.canonical_sequence.clone(),
            num_states: config.num_states,
            markovian_p: config.markovian_p,
            durations: config.hes.iter().map(|h| h.duration).collect(),
            lock_in: config.lock_in.clone(),
            lock_in_applied: false,
            rng: SmallRng::seed_from_u64(config.rng_seed),
            current: config.canonical_sequence[0],
            start_index: config.canonical_sequence[0],
            completed_cycles: 0,
            records: Vec::new(),
            dwell_deadline_ms: 0,
        }
    }

    /// Enter the starting state and draw its dwell. Call once before the
    /// first `tick`.
    pub fn start(&mut self, now_ms: u64) -> TransitionRecord {
        let record = TransitionRecord {
            from: self.current,
            to: self.current,
            timestamp_ms: now_ms,
            kind: TransitionKind::Initial,
            probability: 1.0,
        };
        self.records.push(record);
        let dwell = self.draw_dwell_ms();
        self.dwell_deadline_ms = now_ms + dwell;
        info!(
            "HES start: state {} for {} min",
            self.current,
            dwell / 60_000
        );
        record
    }

    /// Advance if the current dwell has elapsed. Returns every record
    /// appended this tick (a lock-in boundary appends two).
    pub fn tick(&mut self, now_ms: u64) -> Vec<TransitionRecord> {
        if now_ms < self.dwell_deadline_ms {
            return Vec::new();
        }
        let before = self.records.len();
        self.advance(now_ms);
        let dwell = self.draw_dwell_ms();
        self.dwell_deadline_ms = now_ms + dwell;
        self.records[before..].to_vec()
    }

    /// Apply the transition rule once, immediately. Exposed for statistical
    /// validation; the periodic path goes through `tick`.
    pub fn advance(&mut self, now_ms: u64) -> TransitionRecord {
        let from = self.current;
        let pos = self
            .sequence
            .iter()
            .position(|&s| s == from)
            .unwrap_or(0);
        let next_seq = self.sequence[(pos + 1) % self.sequence.len()];

        let n = self.num_states;
        let r = self.rng.gen_range(0.0f32..1.0);
        let (to, kind, probability) = if r < 1.0 - self.markovian_p {
            (next_seq, TransitionKind::Sequential, 1.0 - self.markovian_p)
        } else {
            // Uniform over the n−1 states excluding only the sequential
            // successor; the current state stays eligible.
            let k = self.rng.gen_range(0..n - 1);
            let to = (0..n)
                .filter(|&s| s != next_seq)
                .nth(k)
                .unwrap_or(next_seq);
            (to, TransitionKind::StochasticJump, self.markovian_p / (n - 1) as f32)
        };

        self.current = to;
        let record = TransitionRecord { from, to, timestamp_ms: now_ms, kind, probability };
        self.records.push(record);

        if to == self.start_index {
            self.completed_cycles += 1;
            info!("Cycle {} completed", self.completed_cycles);
            self.maybe_lock_in(now_ms);
        }
        record
    }

    /// Current HES index.
    pub fn current_hes(&self) -> usize {
        self.current
    }

    /// Cycles completed under the active sequence.
    pub fn completed_cycles(&self) -> u32 {
        self.completed_cycles
    }

    /// Full append-only run history.
    pub fn records(&self) -> &[TransitionRecord] {
        &self.records
    }

    pub fn lock_in_applied(&self) -> bool {
        self.lock_in_applied
    }

    /// Monotonic deadline at which the current dwell ends.
    pub fn dwell_deadline_ms(&self) -> u64 {
        self.dwell_deadline_ms
    }

    // ── Internal ──────────────────────────────────────────────────

    fn maybe_lock_in(&mut self, now_ms: u64) {
        let Some(lock_in) = &self.lock_in else {
            return;
        };
        if self.lock_in_applied || self.completed_cycles != lock_in.trigger_cycles {
            return;
        }
        info!(
            "Lock-in: swapping sequence {:?} -> {:?} after {} cycles",
            self.sequence, lock_in.new_sequence, self.completed_cycles
        );
        self.sequence = lock_in.new_sequence.clone();
        self.start_index = self.sequence[0];
        self.completed_cycles = 0;
        self.lock_in_applied = true;
        self.records.push(TransitionRecord {
            from: self.current,
            to: self.current,
            timestamp_ms: now_ms,
            kind: TransitionKind::LockIn,
            probability: 1.0,
        });
    }

    fn draw_dwell_ms(&mut self) -> u64 {
        let minutes = match self.durations[self.current] {
            DurationPolicy::Fixed { minutes } => minutes,
            DurationPolicy::Random { min_minutes, max_minutes } => {
                self.rng.gen_range(min_minutes..=max_minutes)
            }
        };
        u64::from(minutes) * 60_000
    }
}
