//! Smart incubator supervisory control core.
//!
//! Exposes the pure-logic modules for integration testing and external
//! inspection: filtered sensor acquisition, dual-actuator PID thermal
//! control, failsafe/automated recovery, Markovian experiment sequencing,
//! and integrity-checked logging, wired together by the
//! [`ExperimentSupervisor`](app::supervisor::ExperimentSupervisor) on a
//! single-threaded fixed-tick loop. Hardware and storage enter through the
//! port traits in [`app::ports`].

#![deny(unused_must_use)]

pub mod actuators;
pub mod app;
pub mod config;
pub mod control;
pub mod failsafe;
pub mod logger;
pub mod markov;
pub mod scheduler;
pub mod sensors;

mod error;

pub use error::{ActuatorError, ConfigError, Error, Result, SafetyFault, SensorError, StorageError};

// Host/simulation implementations of the port traits.
pub mod adapters;
