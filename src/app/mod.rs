//! Application core: pure domain logic, zero I/O.
//!
//! The payment session rules live here: the coordinator service, the
//! session and settlement records, and the hopper stock ledger.  All
//! interaction with hardware happens through **port traits** defined in
//! [`ports`], keeping this layer fully testable without real peripherals.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
pub mod session;
pub mod stock;
