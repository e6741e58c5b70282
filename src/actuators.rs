//! Actuator registry and transition coordinator.
//!
//! Every actuator is addressed by a typed [`ActuatorId`] — a closed set, so
//! a missing wiring is a compile error rather than a runtime string-lookup
//! failure. The [`ActuatorCoordinator`] owns the in-flight targets: instant
//! steps, linear ramps, and pulsed duty cycling, at most one active target
//! per actuator.
//!
//! ```text
//!  PID ───(heater/cooler)──▶ ┌──────────────────┐
//!                            │ ActuatorCoordin. │──▶ ActuatorBank ──▶ drivers
//!  HES ───(led/vibration)──▶ └──────────────────┘
//! ```
//!
//! Out-of-range *requests* are rejected whole with
//! [`ActuatorError::OutOfRange`]; values produced by interpolation are
//! clamped to the declared safety range before being applied.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::ActuatorError;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Enumeration of every actuator wired into the chamber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ActuatorId {
    /// PTC heating element.
    Heater = 0,
    /// TEC cooling element.
    Cooler = 1,
    /// Stimulus LED.
    Led = 2,
    /// Vibration motor.
    Vibration = 3,
}

impl ActuatorId {
    /// Total number of actuators — used to size the target table.
    pub const COUNT: usize = 4;

    pub const ALL: [Self; Self::COUNT] = [Self::Heater, Self::Cooler, Self::Led, Self::Vibration];

    pub fn name(self) -> &'static str {
        match self {
            Self::Heater => "heater",
            Self::Cooler => "cooler",
            Self::Led => "led",
            Self::Vibration => "vibration",
        }
    }

    /// Declared safety range and safe resting value.
    pub fn range(self) -> RangeSpec {
        // All four are percent-duty devices; safe value is fully off.
        RangeSpec { min: 0.0, max: 100.0, safe: 0.0 }
    }
}

/// Declared operating range for an actuator.
#[derive(Debug, Clone, Copy)]
pub struct RangeSpec {
    pub min: f32,
    pub max: f32,
    /// Value the actuator is forced to on emergency stop.
    pub safe: f32,
}

// ---------------------------------------------------------------------------
// Driver-side traits
// ---------------------------------------------------------------------------

/// A single dumb actuator driver. Implementations hold no policy: range
/// enforcement and transition shaping happen in the coordinator.
pub trait Actuator {
    /// Apply an output level (percent duty for all chamber actuators).
    fn apply(&mut self, value: f32) -> Result<(), ActuatorError>;
}

/// The full bank of wired actuators, addressed by [`ActuatorId`].
///
/// The supervisor consumes this via generics, so the domain core never
/// touches hardware directly. Constructing a concrete bank requires a
/// driver for every id.
pub trait ActuatorBank {
    fn apply(&mut self, id: ActuatorId, value: f32) -> Result<(), ActuatorError>;
}

/// A bank assembled from four concrete drivers. The type signature is the
/// wiring proof: no id can be left without a driver.
pub struct DriverBank<H, C, L, V> {
    pub heater: H,
    pub cooler: C,
    pub led: L,
    pub vibration: V,
}

impl<H: Actuator, C: Actuator, L: Actuator, V: Actuator> ActuatorBank for DriverBank<H, C, L, V> {
    fn apply(&mut self, id: ActuatorId, value: f32) -> Result<(), ActuatorError> {
        match id {
            ActuatorId::Heater => self.heater.apply(value),
            ActuatorId::Cooler => self.cooler.apply(value),
            ActuatorId::Led => self.led.apply(value),
            ActuatorId::Vibration => self.vibration.apply(value),
        }
    }
}

// ---------------------------------------------------------------------------
// Targets and transitions
// ---------------------------------------------------------------------------

/// How a requested value takes effect.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Transition {
    /// Applied atomically on the next tick.
    Instant,
    /// Linear interpolation from the current level over `duration_ms`.
    Ramp { duration_ms: u64 },
    /// Square-wave duty cycling between the target value and zero.
    Pulsed { on_secs: u32, off_secs: u32 },
}

/// A requested actuator change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ActuatorTarget {
    pub id: ActuatorId,
    pub value: f32,
    pub transition: Transition,
}

/// Internal bookkeeping for an accepted target.
#[derive(Debug, Clone, Copy)]
struct ActiveTarget {
    value: f32,
    transition: Transition,
    /// Level the transition started from. For superseded ramps this is the
    /// interpolated level at supersession time, not the original start.
    from_value: f32,
    started_at_ms: u64,
    /// Pulse phase bookkeeping.
    pulse_on: bool,
    last_toggle_ms: u64,
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Owns every in-flight actuator target and drives the bank each tick.
pub struct ActuatorCoordinator {
    targets: [Option<ActiveTarget>; ActuatorId::COUNT],
    /// Last value applied per actuator (the interpolated level for ramps).
    current: [f32; ActuatorId::COUNT],
}

impl Default for ActuatorCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ActuatorCoordinator {
    pub fn new() -> Self {
        Self {
            targets: [None; ActuatorId::COUNT],
            current: [0.0; ActuatorId::COUNT],
        }
    }

    /// Accept a new target, superseding any in-flight transition for the
    /// same actuator. Rejects values outside the declared range without
    /// applying anything.
    pub fn set(&mut self, target: ActuatorTarget, now_ms: u64) -> Result<(), ActuatorError> {
        let range = target.id.range();
        if !(range.min..=range.max).contains(&target.value) {
            warn!(
                "Rejected {} target {:.1} (range {:.0}..{:.0})",
                target.id.name(),
                target.value,
                range.min,
                range.max
            );
            return Err(ActuatorError::OutOfRange);
        }

        let idx = target.id as usize;
        self.targets[idx] = Some(ActiveTarget {
            value: target.value,
            transition: target.transition,
            from_value: self.current[idx],
            started_at_ms: now_ms,
            pulse_on: true,
            last_toggle_ms: now_ms,
        });
        Ok(())
    }

    /// Recompute every effective value and push it through the bank.
    pub fn tick(&mut self, now_ms: u64, bank: &mut impl ActuatorBank) {
        for id in ActuatorId::ALL {
            let idx = id as usize;
            let Some(target) = &mut self.targets[idx] else {
                continue;
            };

            let effective = match target.transition {
                Transition::Instant => target.value,
                Transition::Ramp { duration_ms } => {
                    let elapsed = now_ms.saturating_sub(target.started_at_ms);
                    if elapsed >= duration_ms {
                        target.value
                    } else {
                        let frac = elapsed as f32 / duration_ms as f32;
                        target.from_value + (target.value - target.from_value) * frac
                    }
                }
                Transition::Pulsed { on_secs, off_secs } => {
                    let phase_ms = if target.pulse_on {
                        u64::from(on_secs) * 1000
                    } else {
                        u64::from(off_secs) * 1000
                    };
                    if now_ms.saturating_sub(target.last_toggle_ms) >= phase_ms {
                        target.pulse_on = !target.pulse_on;
                        target.last_toggle_ms = now_ms;
                    }
                    if target.pulse_on { target.value } else { 0.0 }
                }
            };

            let range = id.range();
            let clamped = effective.clamp(range.min, range.max);
            if bank.apply(id, clamped).is_err() {
                warn!("{}: driver apply failed at {:.1}", id.name(), clamped);
            }
            self.current[idx] = clamped;
        }
    }

    /// Cancel all in-flight transitions and force every actuator to its
    /// declared safe value. Used for emergency shutdown only.
    pub fn emergency_stop(&mut self, bank: &mut impl ActuatorBank) {
        info!("Actuators: emergency stop — forcing safe values");
        for id in ActuatorId::ALL {
            let idx = id as usize;
            let safe = id.range().safe;
            self.targets[idx] = None;
            // Applied unconditionally; a failed driver write cannot be
            // allowed to abort the remaining shutdowns.
            if bank.apply(id, safe).is_err() {
                warn!("{}: safe-value apply failed during emergency stop", id.name());
            }
            self.current[idx] = safe;
        }
    }

    /// Last applied value for one actuator.
    pub fn value(&self, id: ActuatorId) -> f32 {
        self.current[id as usize]
    }

    /// Last applied values, indexed by `ActuatorId as usize`.
    pub fn values(&self) -> [f32; ActuatorId::COUNT] {
        self.current
    }
}
