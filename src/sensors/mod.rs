//! Sensor subsystem — noise-filtered acquisition of the chamber probe.
//!
//! One validated [`Sample`] is produced per control tick by
//! [`SensorChannel`]; the PID loop and the failsafe supervisor both consume
//! it. Staleness is always visible: an unusable reading comes back with
//! `valid = false` and a fault code, never as a silently recycled value.

pub mod channel;

pub use channel::{Sample, SensorChannel};
