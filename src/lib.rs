//! Coinbox vending-kiosk payment controller.
//!
//! Debounces coin and bill intake lines, runs the payment session state
//! machine, computes change against hopper stock and drives the change
//! hoppers.  Hardware is reached only through the traits in
//! [`app::ports`]; [`adapters`] provides GPIO, simulated and logging
//! implementations.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod control;
pub mod drivers;
pub mod error;
pub mod events;
pub mod fsm;
pub mod pins;
pub mod runtime;
pub mod sensors;
