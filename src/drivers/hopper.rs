//! Hopper motor output driver.
//!
//! One instance per hopper.  Translates logical on/off into the wired
//! electrical level and writes it through the [`HopperPort`].  Tracks the
//! last commanded state so a repeated command is still written (the relay
//! board does not report back) but callers can query what was asked for.
//!
//! The driver is a dumb actuator; counting and timeouts live in
//! [`HopperController`](crate::control::hopper::HopperController).

use log::error;

use crate::app::ports::HopperPort;
use crate::config::{LineId, Polarity};
use crate::error::ActuatorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorState {
    Stopped,
    Running,
}

#[derive(Debug, Clone)]
pub struct HopperDriver {
    line: LineId,
    polarity: Polarity,
    state: MotorState,
}

impl HopperDriver {
    pub fn new(line: LineId, polarity: Polarity) -> Self {
        Self {
            line,
            polarity,
            state: MotorState::Stopped,
        }
    }

    pub fn activate(&mut self, port: &mut impl HopperPort) -> Result<(), ActuatorError> {
        self.write(port, MotorState::Running)
    }

    pub fn deactivate(&mut self, port: &mut impl HopperPort) -> Result<(), ActuatorError> {
        self.write(port, MotorState::Stopped)
    }

    fn write(&mut self, port: &mut impl HopperPort, state: MotorState) -> Result<(), ActuatorError> {
        let level = self.polarity.level_for(state == MotorState::Running);
        port.set_output(self.line, level).inspect_err(|e| {
            error!("HOPPER line {}: write {:?} failed: {}", self.line, state, e);
        })?;
        self.state = state;
        Ok(())
    }

    pub fn state(&self) -> MotorState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == MotorState::Running
    }
}
