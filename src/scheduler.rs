//! Fixed-period duty scheduler.
//!
//! The supervisor's periodic work — the control step, snapshot logging,
//! manifest flushing, telemetry — is multiplexed on one cooperative loop.
//! Each duty is a named entry with its own period; `due(now)` returns the
//! set of duties that should run this tick. There are no timer callbacks
//! and no implicit chains: the supervisor dispatches each due duty as a
//! discrete step function, in its own fixed order.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                 Supervisor loop (1 tick)             │
//! │                                                      │
//! │   Scheduler.due(now) ──▶ [Control, Snapshot, ...]    │
//! │          │                                           │
//! │          ▼                                           │
//! │   dispatch in stage order:                           │
//! │   control ▶ transition ▶ actuate ▶ snapshot ▶ flush  │
//! └──────────────────────────────────────────────────────┘
//! ```

use heapless::Vec;
use log::info;

/// The periodic duties the supervisor multiplexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Duty {
    /// Sensor read, failsafe evaluation, PID step, actuator application.
    Control,
    /// Serialize and persist a snapshot.
    Snapshot,
    /// Rewrite the manifest file.
    ManifestFlush,
    /// Emit a telemetry status report.
    Telemetry,
}

/// Maximum number of registered duties (stack-allocated).
const MAX_DUTIES: usize = 8;

/// Internal bookkeeping for a registered duty.
#[derive(Debug, Clone, Copy)]
struct DutyEntry {
    label: &'static str,
    duty: Duty,
    period_ms: u64,
    next_due_ms: u64,
    enabled: bool,
}

/// Fixed-period multiplexer. Decoupled from the duties themselves: it only
/// decides *when*, the supervisor decides *what*, keeping both testable in
/// isolation.
pub struct Scheduler {
    entries: Vec<DutyEntry, MAX_DUTIES>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Register a duty. The first fire happens on the first `due()` call.
    pub fn add(&mut self, label: &'static str, duty: Duty, period_ms: u64) {
        info!("Scheduler: '{label}' every {period_ms} ms");
        let _ = self.entries.push(DutyEntry {
            label,
            duty,
            period_ms,
            next_due_ms: 0,
            enabled: true,
        });
    }

    /// Enable or disable a duty without losing its phase.
    pub fn set_enabled(&mut self, duty: Duty, enabled: bool) {
        for entry in self.entries.iter_mut() {
            if entry.duty == duty {
                entry.enabled = enabled;
            }
        }
    }

    /// Collect every duty due at `now_ms`, advancing each one's deadline.
    /// A duty that fell multiple periods behind fires once and re-phases
    /// from `now` — missed fires are skipped, not replayed in a burst.
    pub fn due(&mut self, now_ms: u64) -> Vec<Duty, MAX_DUTIES> {
        let mut due: Vec<Duty, MAX_DUTIES> = Vec::new();
        for entry in self.entries.iter_mut() {
            if !entry.enabled || now_ms < entry.next_due_ms {
                continue;
            }
            entry.next_due_ms = now_ms + entry.period_ms;
            let _ = due.push(entry.duty);
        }
        due
    }

    /// Number of enabled duties.
    pub fn active_count(&self) -> usize {
        self.entries.iter().filter(|e| e.enabled).count()
    }

    /// Label of a registered duty, for diagnostics.
    pub fn label(&self, duty: Duty) -> Option<&'static str> {
        self.entries.iter().find(|e| e.duty == duty).map(|e| e.label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> Scheduler {
        let mut s = Scheduler::new();
        s.add("control", Duty::Control, 1_000);
        s.add("snapshot", Duty::Snapshot, 10_000);
        s
    }

    #[test]
    fn everything_fires_on_first_call() {
        let mut s = scheduler();
        let due = s.due(0);
        assert!(due.contains(&Duty::Control));
        assert!(due.contains(&Duty::Snapshot));
    }

    #[test]
    fn periods_are_respected() {
        let mut s = scheduler();
        s.due(0);

        // 1 s later: control only.
        let due = s.due(1_000);
        assert!(due.contains(&Duty::Control));
        assert!(!due.contains(&Duty::Snapshot));

        // 10 s: both.
        for t in 2..=9u64 {
            s.due(t * 1_000);
        }
        let due = s.due(10_000);
        assert!(due.contains(&Duty::Control));
        assert!(due.contains(&Duty::Snapshot));
    }

    #[test]
    fn nothing_due_between_ticks() {
        let mut s = scheduler();
        s.due(0);
        assert!(s.due(500).is_empty());
    }

    #[test]
    fn disabled_duty_never_fires() {
        let mut s = scheduler();
        s.set_enabled(Duty::Snapshot, false);
        for t in 0..30u64 {
            assert!(!s.due(t * 1_000).contains(&Duty::Snapshot));
        }
        assert_eq!(s.active_count(), 1);
    }

    #[test]
    fn lagging_duty_fires_once_not_in_a_burst() {
        let mut s = scheduler();
        s.due(0);
        // The loop stalls 5 s; control fires once and re-phases.
        let due = s.due(5_000);
        assert_eq!(due.iter().filter(|d| **d == Duty::Control).count(), 1);
        assert!(s.due(5_500).is_empty());
        assert!(s.due(6_000).contains(&Duty::Control));
    }

    #[test]
    fn labels_are_queryable() {
        let s = scheduler();
        assert_eq!(s.label(Duty::Control), Some("control"));
        assert_eq!(s.label(Duty::Telemetry), None);
    }
}
