//! Unified error types for the incubator supervisory core.
//!
//! A single `Error` enum that every subsystem can convert into, keeping the
//! top-level control loop's error handling uniform. All variants are `Copy`
//! so they can be cheaply passed through the failsafe supervisor and the
//! snapshot path without allocation.

use core::fmt;

use serde::Serialize;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible operation in the core funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A sensor could not be read or returned unusable data.
    Sensor(SensorError),
    /// An actuator request was rejected or failed to apply.
    Actuator(ActuatorError),
    /// A safety condition forced the run down.
    Safety(SafetyFault),
    /// A storage write or flush failed.
    Storage(StorageError),
    /// Configuration is invalid or could not be loaded.
    Config(ConfigError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sensor(e) => write!(f, "sensor: {e}"),
            Self::Actuator(e) => write!(f, "actuator: {e}"),
            Self::Safety(e) => write!(f, "safety: {e}"),
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Sensor errors
// ---------------------------------------------------------------------------

/// Sensor-level faults. Also used as the fault code carried by an invalid
/// [`Sample`](crate::sensors::Sample), so it is serializable for snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SensorError {
    /// Bus transaction failed or timed out after bounded retries.
    BusReadFailed,
    /// Reading is outside the physically plausible range.
    OutOfRange,
    /// Every sub-reading was rejected by the rate-of-change filter.
    RateRejected,
    /// Value has been bit-identical for longer than the stuck window.
    Stuck,
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BusReadFailed => write!(f, "bus read failed"),
            Self::OutOfRange => write!(f, "reading out of range"),
            Self::RateRejected => write!(f, "all readings rate-rejected"),
            Self::Stuck => write!(f, "reading stuck"),
        }
    }
}

impl From<SensorError> for Error {
    fn from(e: SensorError) -> Self {
        Self::Sensor(e)
    }
}

// ---------------------------------------------------------------------------
// Actuator errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorError {
    /// Requested value is outside the actuator's declared safety range.
    /// The request is rejected whole; nothing is applied.
    OutOfRange,
    /// The underlying driver refused or failed the write.
    ApplyFailed,
}

impl fmt::Display for ActuatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfRange => write!(f, "requested value out of range"),
            Self::ApplyFailed => write!(f, "driver apply failed"),
        }
    }
}

impl From<ActuatorError> for Error {
    fn from(e: ActuatorError) -> Self {
        Self::Actuator(e)
    }
}

// ---------------------------------------------------------------------------
// Safety faults
// ---------------------------------------------------------------------------

/// Conditions that drive [`FailsafeRecovery`](crate::failsafe::FailsafeRecovery)
/// toward emergency shutdown. Carried in shutdown events and the finalize
/// reason string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SafetyFault {
    /// Sensor stuck past the full window with recovery exhausted.
    RecoveryExhausted,
    /// No valid reading for longer than the silent-sensor timeout.
    SensorSilent,
    /// Hard temperature ceiling breached.
    OverTemperature,
    /// External emergency-stop command.
    ExternalStop,
    /// Sustained storage write failures.
    StorageUnhealthy,
}

impl fmt::Display for SafetyFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RecoveryExhausted => write!(f, "sensor recovery exhausted"),
            Self::SensorSilent => write!(f, "no valid sensor readings"),
            Self::OverTemperature => write!(f, "hard temperature ceiling breached"),
            Self::ExternalStop => write!(f, "external emergency stop"),
            Self::StorageUnhealthy => write!(f, "sustained storage write failures"),
        }
    }
}

impl From<SafetyFault> for Error {
    fn from(e: SafetyFault) -> Self {
        Self::Safety(e)
    }
}

// ---------------------------------------------------------------------------
// Storage errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// The write did not complete after bounded retries.
    WriteFailed,
    /// The backing medium is not mounted or has been taken offline.
    Unavailable,
    /// Serialization of the record failed before any write was attempted.
    Serialize,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WriteFailed => write!(f, "write failed"),
            Self::Unavailable => write!(f, "storage unavailable"),
            Self::Serialize => write!(f, "serialization failed"),
        }
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Raised at load time, before any actuator is touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// The document could not be parsed at all.
    Malformed,
    /// A field failed range or structural validation.
    /// The `&'static str` names which field and why.
    ValidationFailed(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed => write!(f, "malformed document"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {msg}"),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
