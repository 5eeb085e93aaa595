//! GPIO adapter: bridges `embedded-hal` pins to the domain port traits.
//!
//! Owns one input pin per sensor channel and one output pin per hopper
//! motor line, keyed by the identifiers used in
//! [`KioskConfig`](crate::config::KioskConfig).  Works with any HAL that
//! implements `embedded-hal` 1.0 digital traits.

use embedded_hal::digital::{InputPin, OutputPin, PinState};

use crate::app::ports::{HopperPort, SensorPort};
use crate::config::{ChannelId, LineId};
use crate::error::{ActuatorError, SensorError};

pub struct GpioAdapter<I, O> {
    inputs: Vec<(ChannelId, I)>,
    outputs: Vec<(LineId, O)>,
}

impl<I, O> Default for GpioAdapter<I, O> {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }
}

impl<I: InputPin, O: OutputPin> GpioAdapter<I, O> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input(mut self, channel: ChannelId, pin: I) -> Self {
        self.inputs.push((channel, pin));
        self
    }

    pub fn with_output(mut self, line: LineId, pin: O) -> Self {
        self.outputs.push((line, pin));
        self
    }
}

impl<I: InputPin, O> SensorPort for GpioAdapter<I, O> {
    fn read_level(&mut self, channel: ChannelId) -> Result<bool, SensorError> {
        let (_, pin) = self
            .inputs
            .iter_mut()
            .find(|(id, _)| *id == channel)
            .ok_or(SensorError::UnknownChannel)?;
        pin.is_high().map_err(|_| SensorError::GpioReadFailed)
    }
}

impl<I, O: OutputPin> HopperPort for GpioAdapter<I, O> {
    fn set_output(&mut self, line: LineId, high: bool) -> Result<(), ActuatorError> {
        let (_, pin) = self
            .outputs
            .iter_mut()
            .find(|(id, _)| *id == line)
            .ok_or(ActuatorError::UnknownLine)?;
        pin.set_state(PinState::from(high))
            .map_err(|_| ActuatorError::GpioWriteFailed)
    }
}
