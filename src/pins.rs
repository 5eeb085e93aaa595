//! GPIO assignments for the reference kiosk controller board.
//!
//! Channel and line identifiers in [`KioskConfig`](crate::config::KioskConfig)
//! are the GPIO numbers below, so a log line naming a channel points at a
//! physical header pin.
//!
//! | Function                 | GPIO | Direction | Idle  |
//! |--------------------------|------|-----------|-------|
//! | 1-peso coin sensor       | 4    | in        | high  |
//! | 5-peso coin sensor       | 5    | in        | high  |
//! | 10-peso coin sensor      | 6    | in        | high  |
//! | Bill validator pulse out | 7    | in        | high  |
//! | 1-peso hopper feedback   | 8    | in        | high  |
//! | 5-peso hopper feedback   | 9    | in        | high  |
//! | 10-peso hopper feedback  | 10   | in        | high  |
//! | 1-peso hopper motor      | 16   | out       | low   |
//! | 5-peso hopper motor      | 17   | out       | low   |
//! | 10-peso hopper motor     | 18   | out       | low   |

// ── Intake sensors (active-low, external pull-up) ─────────────
pub const COIN_1_SENSE_GPIO: u8 = 4;
pub const COIN_5_SENSE_GPIO: u8 = 5;
pub const COIN_10_SENSE_GPIO: u8 = 6;
pub const BILL_PULSE_GPIO: u8 = 7;

// ── Hopper feedback opto sensors (active-low) ─────────────────
pub const HOPPER_1_FEEDBACK_GPIO: u8 = 8;
pub const HOPPER_5_FEEDBACK_GPIO: u8 = 9;
pub const HOPPER_10_FEEDBACK_GPIO: u8 = 10;

// ── Hopper motor relays (active-high) ─────────────────────────
pub const HOPPER_1_MOTOR_GPIO: u8 = 16;
pub const HOPPER_5_MOTOR_GPIO: u8 = 17;
pub const HOPPER_10_MOTOR_GPIO: u8 = 18;
