//! Hopper dispense controller.
//!
//! One controller per coin hopper.  Runs the motor until the independent
//! exit sensor has counted the requested number of coins, then verifies
//! nothing else falls out.
//!
//! ```text
//!   Idle ──request(n)──▶ Dispensing ──n pulses──▶ Verifying ──window──▶ Completed
//!                          │    ▲                    │
//!                 timeout  │    │ retry              │ extra pulse
//!                          ▼    │                    ▼
//!                        (motor off) ──retries out──▶ Faulted
//! ```
//!
//! The count is whatever the feedback sensor saw, never what was asked
//! for.  A finished request stays in `Completed`/`Faulted` until the
//! coordinator collects it with [`HopperController::take_outcome`].

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::HopperPort;
use crate::config::{Amount, DenomId, HopperSpec, HopperTiming};
use crate::drivers::hopper::HopperDriver;
use crate::error::CommandError;

/// Why a dispense request did not complete cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispenseFault {
    /// No feedback pulse within the unit timeout and retries exhausted.
    Stall,
    /// A coin came out after the requested count was reached.
    Overdispense,
    /// The motor output line could not be driven.
    Actuator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HopperState {
    Idle,
    Dispensing,
    Verifying,
    Completed,
    Faulted(DispenseFault),
}

/// Result of one dispense request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispenseOutcome {
    pub denomination: DenomId,
    pub face_value: Amount,
    pub requested_count: u32,
    /// Coins verified by the feedback sensor; never exceeds the request.
    pub dispensed_count: u32,
    pub faulted: bool,
    pub fault_reason: Option<DispenseFault>,
}

impl DispenseOutcome {
    /// Value requested but not verified as paid out.
    pub fn undispensed_value(&self) -> Amount {
        (self.requested_count - self.dispensed_count) * self.face_value
    }
}

/// What a feedback pulse meant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackResult {
    /// One more coin verified.
    Counted { dispensed: u32, requested: u32 },
    /// A coin after the request was satisfied; the request is now faulted.
    Overdispense,
    /// No dispense in progress.
    Spurious,
}

pub struct HopperController {
    denomination: DenomId,
    face_value: Amount,
    driver: HopperDriver,
    timing: HopperTiming,
    state: HopperState,
    requested: u32,
    dispensed: u32,
    retries_used: u8,
    /// Last request start, pulse, or retry while Dispensing; entry time
    /// while Verifying.
    mark_ms: u64,
}

impl HopperController {
    pub fn new(
        denomination: DenomId,
        face_value: Amount,
        spec: &HopperSpec,
        timing: HopperTiming,
    ) -> Self {
        Self {
            denomination,
            face_value,
            driver: HopperDriver::new(spec.output_line, spec.output_polarity),
            timing,
            state: HopperState::Idle,
            requested: 0,
            dispensed: 0,
            retries_used: 0,
            mark_ms: 0,
        }
    }

    pub fn denomination(&self) -> DenomId {
        self.denomination
    }

    pub fn state(&self) -> HopperState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, HopperState::Completed | HopperState::Faulted(_))
    }

    pub fn driver(&self) -> &HopperDriver {
        &self.driver
    }

    /// Start dispensing `count` coins.  Returns immediately; the outcome
    /// is collected later with [`take_outcome`](Self::take_outcome).
    pub fn request(
        &mut self,
        count: u32,
        now_ms: u64,
        port: &mut impl HopperPort,
    ) -> Result<(), CommandError> {
        if self.state != HopperState::Idle {
            return Err(CommandError::HopperBusy);
        }
        self.requested = count;
        self.dispensed = 0;
        self.retries_used = 0;
        self.mark_ms = now_ms;

        if count == 0 {
            self.state = HopperState::Completed;
            return Ok(());
        }

        info!(
            "HOPPER {:?}: dispensing {} x {}",
            self.denomination, count, self.face_value
        );
        self.state = match self.driver.activate(port) {
            Ok(()) => HopperState::Dispensing,
            Err(_) => HopperState::Faulted(DispenseFault::Actuator),
        };
        Ok(())
    }

    /// One debounced pulse from this hopper's exit sensor.
    pub fn on_feedback(&mut self, now_ms: u64, port: &mut impl HopperPort) -> FeedbackResult {
        match self.state {
            HopperState::Dispensing => {
                self.dispensed += 1;
                self.mark_ms = now_ms;
                if self.dispensed >= self.requested {
                    self.state = match self.driver.deactivate(port) {
                        Ok(()) => HopperState::Verifying,
                        Err(_) => HopperState::Faulted(DispenseFault::Actuator),
                    };
                }
                FeedbackResult::Counted {
                    dispensed: self.dispensed,
                    requested: self.requested,
                }
            }
            HopperState::Verifying => {
                error!(
                    "HOPPER {:?}: overdispense, coin after {} of {}",
                    self.denomination, self.dispensed, self.requested
                );
                self.state = HopperState::Faulted(DispenseFault::Overdispense);
                FeedbackResult::Overdispense
            }
            _ => {
                warn!(
                    "HOPPER {:?}: feedback pulse with no dispense in progress",
                    self.denomination
                );
                FeedbackResult::Spurious
            }
        }
    }

    /// Advance timers.  Call once per control tick.
    pub fn tick(&mut self, now_ms: u64, port: &mut impl HopperPort) {
        let elapsed = now_ms.saturating_sub(self.mark_ms);
        match self.state {
            HopperState::Dispensing if elapsed >= self.timing.unit_timeout_ms as u64 => {
                if self.driver.deactivate(port).is_err() {
                    self.state = HopperState::Faulted(DispenseFault::Actuator);
                    return;
                }
                if self.retries_used < self.timing.max_retries {
                    self.retries_used += 1;
                    warn!(
                        "HOPPER {:?}: no coin for {}ms, retry {}/{}",
                        self.denomination, elapsed, self.retries_used, self.timing.max_retries
                    );
                    self.mark_ms = now_ms;
                    if self.driver.activate(port).is_err() {
                        self.state = HopperState::Faulted(DispenseFault::Actuator);
                    }
                } else {
                    error!(
                        "HOPPER {:?}: stalled at {} of {}",
                        self.denomination, self.dispensed, self.requested
                    );
                    self.state = HopperState::Faulted(DispenseFault::Stall);
                }
            }
            HopperState::Verifying if elapsed >= self.timing.verify_window_ms as u64 => {
                debug!("HOPPER {:?}: verified {}", self.denomination, self.dispensed);
                self.state = HopperState::Completed;
            }
            _ => {}
        }
    }

    /// Collect a finished request and return to Idle.
    pub fn take_outcome(&mut self) -> Option<DispenseOutcome> {
        let fault_reason = match self.state {
            HopperState::Completed => None,
            HopperState::Faulted(reason) => Some(reason),
            _ => return None,
        };
        self.state = HopperState::Idle;
        Some(DispenseOutcome {
            denomination: self.denomination,
            face_value: self.face_value,
            requested_count: self.requested,
            dispensed_count: self.dispensed.min(self.requested),
            faulted: fault_reason.is_some(),
            fault_reason,
        })
    }
}
