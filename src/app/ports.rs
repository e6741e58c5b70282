//! Port traits — the boundary between the supervisory core and the outside
//! world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ ExperimentSupervisor (domain)
//! ```
//!
//! Driven adapters (the sensor bus, storage, event sinks) implement these
//! traits. The supervisor consumes them via generics, so the domain core
//! never touches hardware directly and the whole loop runs under test with
//! mock adapters.
//!
//! The sensor bus and the storage medium may share a physical bus. The
//! single-threaded tick orders every stage strictly (acquire → control →
//! actuate → log) and each port is reached through exactly one `&mut`
//! borrow at a time, so no two bus operations can ever be in flight
//! together.

use crate::error::{SensorError, StorageError};

// ───────────────────────────────────────────────────────────────
// Sensor bus (driven adapter: hardware → domain)
// ───────────────────────────────────────────────────────────────

/// Raw access to the temperature probe and its communication bus.
///
/// `read_raw` is a single bounded attempt; retry policy lives in
/// [`SensorChannel`](crate::sensors::SensorChannel). Any settling delay
/// between attempts belongs to the adapter, which knows the bus timing.
///
/// The reset operations are the recovery ladder used by
/// [`FailsafeRecovery`](crate::failsafe::FailsafeRecovery), ordered from
/// least to most invasive.
pub trait SensorBus {
    /// One conversion attempt. Must not block beyond the bus timeout.
    fn read_raw(&mut self) -> Result<f32, SensorError>;

    /// Clear the communication bus (flush pending transactions).
    fn reset_bus(&mut self) -> Result<(), SensorError>;

    /// Hard-reset the probe device itself.
    fn hard_reset(&mut self) -> Result<(), SensorError>;

    /// Re-run device initialization after a hard reset.
    fn reinit(&mut self) -> Result<(), SensorError>;

    /// Release any reclaimable resources before a recovery attempt.
    /// Default is a no-op for adapters with nothing to free.
    fn release_resources(&mut self) {}
}

// ───────────────────────────────────────────────────────────────
// Storage (driven adapter: domain → SD card / filesystem)
// ───────────────────────────────────────────────────────────────

/// Durable file storage for the integrity logger.
///
/// `write_file` must be all-or-nothing: on `Ok` the file is fully written
/// and flushed; a partially-written file must surface as `Err`. The logger
/// appends a manifest entry only after a confirmed write.
pub trait StoragePort {
    /// Write `contents` to `name` (relative path), replacing any existing
    /// file. One bounded attempt; the logger owns the retry policy.
    fn write_file(&mut self, name: &str, contents: &[u8]) -> Result<(), StorageError>;
}

// ───────────────────────────────────────────────────────────────
// Event sink (driven adapter: domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The supervisor emits structured [`AppEvent`](super::events::AppEvent)s
/// through this port. Adapters decide where they go (serial log, display,
/// network layer).
pub trait EventSink {
    fn emit(&mut self, event: &super::events::AppEvent);
}
