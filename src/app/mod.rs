//! Application core — pure domain logic, zero I/O.
//!
//! This module contains the run-level rules for the incubator: cycle
//! orchestration, health gating, command handling, and telemetry. All
//! interaction with hardware and storage happens through **port traits**
//! defined in [`ports`], keeping this layer fully testable without real
//! peripherals.

pub mod commands;
pub mod events;
pub mod ports;
pub mod supervisor;
