//! Outbound application events.
//!
//! The [`AppService`](super::service::AppService) emits these through the
//! [`EventSink`](super::ports::EventSink) port.  Adapters on the other
//! side decide what to do with them: show the balance on the kiosk
//! screen, write the settlement to a transaction log, page an attendant.

use serde::Serialize;

use crate::config::{Amount, DenomId};
use crate::error::CommandError;
use crate::events::FaultReport;
use crate::fsm::StateId;

use super::commands::AppCommand;
use super::session::{CancelledSession, SessionId, Settlement};

/// Structured events emitted by the application core.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum KioskEvent {
    /// A checkout opened.  `carried_over` is credit from coins inserted
    /// before the session existed.
    SessionStarted {
        session_id: SessionId,
        target_amount: Amount,
        carried_over: Amount,
    },

    /// The collecting session was credited.
    BalanceUpdate {
        session_id: SessionId,
        accumulated_amount: Amount,
        target_amount: Amount,
        latest: Amount,
    },

    /// A hopper verified one more coin.
    DispenseProgress {
        denomination: DenomId,
        dispensed_count: u32,
        requested_count: u32,
    },

    /// Final record of a settled session.
    Settlement(Settlement),

    /// A collecting session was cancelled; carries the refund amount.
    SessionCancelled(CancelledSession),

    /// Hardware anomaly or settlement fault.
    Fault(FaultReport),

    /// The coordinator FSM changed state.
    StateChanged { from: StateId, to: StateId },

    /// Hopper stock at or below the configured threshold.
    StockLow { denomination: DenomId, remaining: u32 },

    /// A command could not be applied in the current state.
    CommandRejected {
        command: AppCommand,
        reason: CommandError,
    },
}
