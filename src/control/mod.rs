//! Dispensing control: hopper controllers and the change calculator.

pub mod change;
pub mod hopper;
