//! PID controller for chamber temperature
//!
//! Bidirectional proportional-integral-derivative controller driving the
//! heater/cooler pair: positive output heats, negative output cools, and a
//! deadband around the setpoint keeps both elements quiet when the chamber
//! is on target. The two elements are never energised together — the output
//! sign alone selects which side runs.

use log::{debug, warn};
use serde::Serialize;

use crate::config::PidGains;
use crate::sensors::Sample;

/// Which side of the thermal pair is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ControlMode {
    Heating,
    Cooling,
    Idle,
}

/// Controller output for one tick. Owned by [`PidController`]; everyone
/// else reads copies.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ControlState {
    pub setpoint: f32,
    pub mode: ControlMode,
    /// Signed demand in [-100, 100]; positive heats, negative cools.
    pub output_percent: f32,
    pub integral_term: f32,
}

impl ControlState {
    fn idle(setpoint: f32, integral_term: f32) -> Self {
        Self { setpoint, mode: ControlMode::Idle, output_percent: 0.0, integral_term }
    }
}

/// PID controller
pub struct PidController {
    gains: PidGains,
    integral: f32,
    prev_error: f32,
    last_target: Option<f32>,
    last_state: ControlState,
    /// Ticks the controller has been holding output against invalid samples.
    stale_ticks: u32,
}

impl PidController {
    pub fn new(gains: PidGains) -> Self {
        Self {
            gains,
            integral: 0.0,
            prev_error: 0.0,
            last_target: None,
            last_state: ControlState::idle(0.0, 0.0),
            stale_ticks: 0,
        }
    }

    /// Compute one control step.
    ///
    /// An invalid sample never updates the integral or derivative state:
    /// the previous output is held for at most `stale_hold_ticks` ticks,
    /// after which the controller drops to idle and leaves escalation to
    /// the failsafe supervisor.
    pub fn step(&mut self, sample: &Sample, target: f32, dt: f32) -> ControlState {
        // A large setpoint move resets the accumulated state so the old
        // integral cannot shock the new operating point.
        if let Some(last) = self.last_target {
            if (target - last).abs() > self.gains.setpoint_jump_reset_c {
                debug!("Setpoint moved {last:.1} -> {target:.1}, resetting integral");
                self.integral = 0.0;
                self.prev_error = 0.0;
            }
        }
        self.last_target = Some(target);

        if !sample.valid {
            self.stale_ticks += 1;
            if self.stale_ticks <= self.gains.stale_hold_ticks {
                // Hold the previous demand; the chamber changes slowly
                // enough that a few held ticks are safe.
                let mut held = self.last_state;
                held.setpoint = target;
                return held;
            }
            if self.stale_ticks == self.gains.stale_hold_ticks + 1 {
                warn!("Stale-sample budget exhausted, dropping to idle");
            }
            self.last_state = ControlState::idle(target, self.integral);
            return self.last_state;
        }
        self.stale_ticks = 0;

        let error = target - sample.value;

        // Deadband: close enough — both elements off, no further windup.
        if error.abs() <= self.gains.deadband_c {
            self.prev_error = error;
            self.last_state = ControlState::idle(target, self.integral);
            return self.last_state;
        }

        // Integral (clamped against windup)
        self.integral = (self.integral + error * dt)
            .clamp(-self.gains.integral_limit, self.gains.integral_limit);

        // Derivative
        let derivative = if dt > 0.0 { (error - self.prev_error) / dt } else { 0.0 };
        self.prev_error = error;

        let raw = self.gains.kp * error + self.gains.ki * self.integral + self.gains.kd * derivative;
        let output = raw.clamp(-100.0, 100.0);

        // Anti-windup: while saturated, give back this tick's accumulation.
        if (output >= 100.0 || output <= -100.0) && raw != output {
            self.integral -= error * dt;
        }

        let mode = if output > 0.0 { ControlMode::Heating } else { ControlMode::Cooling };
        self.last_state = ControlState {
            setpoint: target,
            mode,
            output_percent: output,
            integral_term: self.integral,
        };
        self.last_state
    }

    /// Split the signed output into per-element demands.
    ///
    /// Exactly one of the pair is ever nonzero. The cooler demand carries
    /// the configured cooling gain (TEC elements move less heat per percent
    /// than the PTC delivers) and is capped at 100.
    pub fn thermal_demands(&self) -> (f32, f32) {
        match self.last_state.mode {
            ControlMode::Heating => (self.last_state.output_percent, 0.0),
            ControlMode::Cooling => {
                let cool =
                    (self.last_state.output_percent.abs() * self.gains.cooling_gain).min(100.0);
                (0.0, cool)
            }
            ControlMode::Idle => (0.0, 0.0),
        }
    }

    /// The most recent control state.
    pub fn state(&self) -> ControlState {
        self.last_state
    }

    /// True once the stale-sample budget has been exhausted.
    pub fn stale_exhausted(&self) -> bool {
        self.stale_ticks > self.gains.stale_hold_ticks
    }

    /// Reset controller state
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.prev_error = 0.0;
        self.stale_ticks = 0;
    }
}
