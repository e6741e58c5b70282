//! Closed-loop thermal control.

pub mod pid;

pub use pid::{ControlMode, ControlState, PidController};
