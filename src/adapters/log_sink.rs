//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing structured application events to
//! the logger (UART / USB-CDC in production, stderr on the host). A
//! display or network adapter would implement the same trait.

use log::info;

use crate::app::events::AppEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`AppEvent`] to the serial console.
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LogEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AppEvent) {
        match event {
            AppEvent::Telemetry(t) => {
                let temp = t
                    .sample
                    .filter(|s| s.valid)
                    .map_or_else(|| "--".to_string(), |s| format!("{:.1}", s.value));
                info!(
                    "TELEM | cycle={} hes={} | T={temp}\u{00b0}C -> {:.1}\u{00b0}C | \
                     mode={:?} out={:.0}% | health={:?} | logger={}",
                    t.cycle,
                    t.current_hes,
                    t.control.setpoint,
                    t.control.mode,
                    t.control.output_percent,
                    t.health,
                    if t.logger_healthy { "OK" } else { "UNHEALTHY" },
                );
            }
            AppEvent::Started { hes } => {
                info!("START | initial_hes={hes}");
            }
            AppEvent::HesEntered { index, dwell_ms } => {
                info!("HES   | entered {index}, dwell {} min", dwell_ms / 60_000);
            }
            AppEvent::Transition(r) => {
                info!(
                    "TRANS | {} -> {} ({:?}, p={:.3})",
                    r.from, r.to, r.kind, r.probability
                );
            }
            AppEvent::CycleCompleted { cycle } => {
                info!("CYCLE | {cycle} completed");
            }
            AppEvent::LockInApplied { at_cycle } => {
                info!("LOCK  | sequence substituted at cycle {at_cycle}");
            }
            AppEvent::HealthChanged { from, to } => {
                info!("HEALTH| {:?} -> {:?}", from, to);
            }
            AppEvent::LoggerUnhealthy { failures } => {
                info!("STORE | unhealthy after {failures} consecutive write failures");
            }
            AppEvent::EmergencyShutdown { cause } => {
                info!("HALT  | {cause}");
            }
        }
    }
}
