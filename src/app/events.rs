//! Outbound application events.
//!
//! The [`ExperimentSupervisor`](super::supervisor::ExperimentSupervisor)
//! emits these through the [`EventSink`](super::ports::EventSink) port.
//! Adapters on the other side decide what to do with them — log to serial,
//! drive a display, publish to a network layer.

use serde::Serialize;

use crate::actuators::ActuatorId;
use crate::control::ControlState;
use crate::error::SafetyFault;
use crate::failsafe::HealthState;
use crate::markov::TransitionRecord;
use crate::sensors::Sample;

/// Structured events emitted by the supervisory core.
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// The run has started (carries the initial HES index).
    Started { hes: usize },

    /// A hidden environmental state was entered.
    HesEntered { index: usize, dwell_ms: u64 },

    /// The transition engine moved (or marked a lock-in).
    Transition(TransitionRecord),

    /// A cycle completed and its summary was queued for storage.
    CycleCompleted { cycle: u32 },

    /// The one-time sequence substitution fired.
    LockInApplied { at_cycle: u32 },

    /// The failsafe machine changed state.
    HealthChanged { from: HealthState, to: HealthState },

    /// The logger crossed its consecutive-write-failure threshold.
    LoggerUnhealthy { failures: u32 },

    /// The run was terminated. Actuators are safe and the terminal status
    /// has been written durably before this event is emitted.
    EmergencyShutdown { cause: SafetyFault },

    /// Periodic status snapshot.
    Telemetry(StatusReport),
}

/// A point-in-time status report for presentation and network layers.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// Latest sample, if at least one control tick has run.
    pub sample: Option<Sample>,
    pub control: ControlState,
    /// Applied actuator values, indexed by `ActuatorId as usize`.
    pub actuators: [f32; ActuatorId::COUNT],
    pub current_hes: usize,
    pub cycle: u32,
    pub health: HealthState,
    pub logger_healthy: bool,
    pub halted: bool,
}
