//! Inbound commands to the application service.
//!
//! These represent actions requested by the outside world (kiosk UI,
//! attendant panel, test harness) that the
//! [`AppService`](super::service::AppService) interprets and acts upon.
//! They travel through the same control queue as intake and feedback
//! messages, so ordering against hardware events is preserved.

use serde::{Deserialize, Serialize};

use crate::config::{Amount, DenomId};

/// Commands that external adapters can send into the application core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppCommand {
    /// Open a payment session for `target` (Idle only, `target > 0`).
    StartCheckout { target: Amount },

    /// Cancel the collecting session and report the amount to refund.
    Cancel,

    /// Attendant reloaded `count` coins into a hopper.
    Refill { denomination: DenomId, count: u32 },
}
