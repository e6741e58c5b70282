//! Simulated chamber for host-side runs.
//!
//! A first-order thermal plant shared between a [`SensorBus`] adapter and
//! an [`ActuatorBank`] adapter: heater duty warms the chamber, cooler duty
//! cools it, and everything leaks toward ambient. Probe faults (stuck
//! value, dead bus) are injectable, which makes the failsafe path
//! demonstrable end to end without hardware.

use std::cell::RefCell;
use std::rc::Rc;

use crate::actuators::{ActuatorBank, ActuatorId};
use crate::app::ports::SensorBus;
use crate::error::{ActuatorError, SensorError};

/// Shared plant state.
struct ChamberState {
    temperature_c: f32,
    ambient_c: f32,
    heater_duty: f32,
    cooler_duty: f32,
    led_duty: f32,
    vibration_duty: f32,
    /// Probe reports this fixed value when set, regardless of the plant.
    pinned_reading: Option<f32>,
    /// Probe bus is dead when set.
    bus_dead: bool,
    /// Deterministic noise state.
    noise: u32,
}

impl ChamberState {
    fn step(&mut self, dt_secs: f32) {
        // Degrees per second at full duty, plus passive leak to ambient.
        const HEAT_RATE: f32 = 0.02;
        const COOL_RATE: f32 = 0.015;
        const LEAK_RATE: f32 = 0.001;
        self.temperature_c += (self.heater_duty / 100.0) * HEAT_RATE * dt_secs;
        self.temperature_c -= (self.cooler_duty / 100.0) * COOL_RATE * dt_secs;
        self.temperature_c -= (self.temperature_c - self.ambient_c) * LEAK_RATE * dt_secs;
    }

    fn probe_reading(&mut self) -> f32 {
        if let Some(pinned) = self.pinned_reading {
            return pinned;
        }
        // Small deterministic measurement noise (±0.02).
        self.noise = self.noise.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        let jitter = ((self.noise >> 16) % 5) as f32 * 0.01 - 0.02;
        self.temperature_c + jitter
    }
}

/// Owner handle that advances the physics and injects faults.
pub struct SimChamber {
    state: Rc<RefCell<ChamberState>>,
}

impl SimChamber {
    /// Build a chamber plus its sensor-bus and actuator-bank adapters.
    pub fn new(initial_c: f32, ambient_c: f32) -> (Self, SimSensorBus, SimActuatorBank) {
        let state = Rc::new(RefCell::new(ChamberState {
            temperature_c: initial_c,
            ambient_c,
            heater_duty: 0.0,
            cooler_duty: 0.0,
            led_duty: 0.0,
            vibration_duty: 0.0,
            pinned_reading: None,
            bus_dead: false,
            noise: 0x5eed,
        }));
        let bus = SimSensorBus { state: Rc::clone(&state) };
        let bank = SimActuatorBank { state: Rc::clone(&state) };
        (Self { state }, bus, bank)
    }

    /// Advance the plant by `dt_secs` of simulated time.
    pub fn step(&mut self, dt_secs: f32) {
        self.state.borrow_mut().step(dt_secs);
    }

    pub fn temperature_c(&self) -> f32 {
        self.state.borrow().temperature_c
    }

    pub fn actuator_duty(&self, id: ActuatorId) -> f32 {
        let s = self.state.borrow();
        match id {
            ActuatorId::Heater => s.heater_duty,
            ActuatorId::Cooler => s.cooler_duty,
            ActuatorId::Led => s.led_duty,
            ActuatorId::Vibration => s.vibration_duty,
        }
    }

    /// Pin the probe at a fixed reading (stuck-sensor fault), or clear it.
    pub fn pin_probe(&mut self, reading: Option<f32>) {
        self.state.borrow_mut().pinned_reading = reading;
    }

    /// Kill or revive the probe bus.
    pub fn set_bus_dead(&mut self, dead: bool) {
        self.state.borrow_mut().bus_dead = dead;
    }
}

/// Simulated probe on the shared chamber.
pub struct SimSensorBus {
    state: Rc<RefCell<ChamberState>>,
}

impl SensorBus for SimSensorBus {
    fn read_raw(&mut self) -> Result<f32, SensorError> {
        let mut s = self.state.borrow_mut();
        if s.bus_dead {
            return Err(SensorError::BusReadFailed);
        }
        Ok(s.probe_reading())
    }

    fn reset_bus(&mut self) -> Result<(), SensorError> {
        Ok(())
    }

    fn hard_reset(&mut self) -> Result<(), SensorError> {
        // A hard reset repairs a pinned probe but not a dead bus.
        let mut s = self.state.borrow_mut();
        if s.bus_dead {
            return Err(SensorError::BusReadFailed);
        }
        s.pinned_reading = None;
        Ok(())
    }

    fn reinit(&mut self) -> Result<(), SensorError> {
        if self.state.borrow().bus_dead {
            return Err(SensorError::BusReadFailed);
        }
        Ok(())
    }
}

/// Simulated actuator drivers on the shared chamber.
pub struct SimActuatorBank {
    state: Rc<RefCell<ChamberState>>,
}

impl ActuatorBank for SimActuatorBank {
    fn apply(&mut self, id: ActuatorId, value: f32) -> Result<(), ActuatorError> {
        let mut s = self.state.borrow_mut();
        match id {
            ActuatorId::Heater => s.heater_duty = value,
            ActuatorId::Cooler => s.cooler_duty = value,
            ActuatorId::Led => s.led_duty = value,
            ActuatorId::Vibration => s.vibration_duty = value,
        }
        Ok(())
    }
}
