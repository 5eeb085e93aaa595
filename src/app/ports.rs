//! Port traits: the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ AppService (domain)
//! ```
//!
//! Driven adapters (GPIO, simulated hardware, event sinks, clocks)
//! implement these traits.  The [`AppService`](super::service::AppService)
//! and the sampling loops consume them via generics, so the domain core
//! never touches hardware directly.
//!
//! All port errors are typed; a failed read or write is reported as a
//! fault, never swallowed.

use crate::config::{ChannelId, LineId};
use crate::error::{ActuatorError, SensorError};

use super::events::KioskEvent;

// ───────────────────────────────────────────────────────────────
// Sensor port (driven adapter: hardware → domain)
// ───────────────────────────────────────────────────────────────

/// Read-side port: raw digital levels of intake and feedback lines.
pub trait SensorPort {
    /// Current electrical level of `channel` (`true` = high).
    fn read_level(&mut self, channel: ChannelId) -> Result<bool, SensorError>;
}

// ───────────────────────────────────────────────────────────────
// Hopper port (driven adapter: domain → hardware)
// ───────────────────────────────────────────────────────────────

/// Write-side port: hopper motor output lines.
pub trait HopperPort {
    /// Drive `line` to the given electrical level (`true` = high).
    fn set_output(&mut self, line: LineId, high: bool) -> Result<(), ActuatorError>;
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / display)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`KioskEvent`]s through this port.
/// Adapters decide where they go (serial log, UI display, audit trail).
pub trait EventSink {
    fn emit(&mut self, event: &KioskEvent);
}

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// Monotonic millisecond time source.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

impl<T: SensorPort + ?Sized> SensorPort for &mut T {
    fn read_level(&mut self, channel: ChannelId) -> Result<bool, SensorError> {
        (**self).read_level(channel)
    }
}

impl<T: HopperPort + ?Sized> HopperPort for &mut T {
    fn set_output(&mut self, line: LineId, high: bool) -> Result<(), ActuatorError> {
        (**self).set_output(line, high)
    }
}

impl<T: EventSink + ?Sized> EventSink for &mut T {
    fn emit(&mut self, event: &KioskEvent) {
        (**self).emit(event)
    }
}
