//! Inbound commands to the supervisor.
//!
//! These represent actions requested by the outside world (serial console,
//! network configuration layer, operator UI) that the
//! [`ExperimentSupervisor`](super::supervisor::ExperimentSupervisor)
//! interprets and acts upon.

use crate::actuators::ActuatorId;

/// Commands that external collaborators can send into the core.
#[derive(Debug, Clone, Copy)]
pub enum ExternalCommand {
    /// Override an actuator, instantly or ramped over `ramp_ms`.
    ///
    /// Rejected with a caller-visible error if the value is outside the
    /// actuator's declared range. Thermal actuators are re-asserted by the
    /// PID loop on the next control tick, so overriding them is only
    /// meaningful between ticks (e.g. during commissioning).
    SetTarget {
        actuator: ActuatorId,
        value: f32,
        ramp_ms: Option<u64>,
    },

    /// Immediate emergency shutdown, regardless of internal state.
    /// Terminal for the run.
    EmergencyStop,
}
