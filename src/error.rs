//! Unified error types for the coinbox controller.
//!
//! A single `Error` enum that every subsystem converts into, keeping the
//! control loop's error handling uniform.  All variants are `Copy` so they
//! can be carried inside events and outcomes without allocation.
//!
//! Hardware *faults* (stuck sensors, stalls, overdispense) are not errors:
//! they are reported as typed records through the event sink.  The types
//! here cover operations that can be refused or fail outright.

use core::fmt;

use serde::Serialize;

use crate::config::Amount;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible operation in the controller funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A sensor line could not be read.
    Sensor(SensorError),
    /// An output line could not be driven.
    Actuator(ActuatorError),
    /// Configuration is invalid.
    Config(ConfigError),
    /// The change calculator could not produce an exact plan.
    Change(ChangeError),
    /// A command was refused in the current state.
    Command(CommandError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sensor(e) => write!(f, "sensor: {e}"),
            Self::Actuator(e) => write!(f, "actuator: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Change(e) => write!(f, "change: {e}"),
            Self::Command(e) => write!(f, "command: {e}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Sensor errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    /// GPIO read returned an error.
    GpioReadFailed,
    /// No input is wired to the requested channel.
    UnknownChannel,
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GpioReadFailed => write!(f, "GPIO read failed"),
            Self::UnknownChannel => write!(f, "unknown channel"),
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
    /// GPIO set failed.
    GpioWriteFailed,
    /// No output is wired to the requested line.
    UnknownLine,
}

impl fmt::Display for ActuatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GpioWriteFailed => write!(f, "GPIO write failed"),
            Self::UnknownLine => write!(f, "unknown output line"),
        }
    }
}

impl From<ActuatorError> for Error {
    fn from(e: ActuatorError) -> Self {
        Self::Actuator(e)
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Invalid ranges are rejected, never silently clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// A field failed validation.  The message names the field and why.
    ValidationFailed(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
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
// Change calculation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChangeError {
    /// The stock on hand cannot make `requested` exactly; `remainder` is
    /// what was left after the greedy pass.
    ExactChangeUnavailable { requested: Amount, remainder: Amount },
}

impl fmt::Display for ChangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExactChangeUnavailable {
                requested,
                remainder,
            } => write!(
                f,
                "exact change unavailable for {requested} ({remainder} unrepresentable)"
            ),
        }
    }
}

impl From<ChangeError> for Error {
    fn from(e: ChangeError) -> Self {
        Self::Change(e)
    }
}

// ---------------------------------------------------------------------------
// Command errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CommandError {
    /// A session is already in progress.
    SessionActive,
    /// The command only applies while collecting payment.
    NotCollecting,
    /// Amount must be non-zero.
    InvalidAmount,
    /// The denomination is not configured.
    UnknownDenomination,
    /// The denomination has no hopper.
    NoHopper,
    /// The hopper is still working on a previous request.
    HopperBusy,
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionActive => write!(f, "session already active"),
            Self::NotCollecting => write!(f, "not collecting payment"),
            Self::InvalidAmount => write!(f, "invalid amount"),
            Self::UnknownDenomination => write!(f, "unknown denomination"),
            Self::NoHopper => write!(f, "denomination has no hopper"),
            Self::HopperBusy => write!(f, "hopper busy"),
        }
    }
}

impl From<CommandError> for Error {
    fn from(e: CommandError) -> Self {
        Self::Command(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_nests_subsystem_message() {
        let e: Error = ChangeError::ExactChangeUnavailable {
            requested: 2,
            remainder: 2,
        }
        .into();
        assert_eq!(
            e.to_string(),
            "change: exact change unavailable for 2 (2 unrepresentable)"
        );

        let e: Error = ActuatorError::UnknownLine.into();
        assert_eq!(e.to_string(), "actuator: unknown output line");
    }
}
