//! Actuator drivers.

pub mod hopper;
