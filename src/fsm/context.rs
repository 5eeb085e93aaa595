//! Shared mutable context threaded through every FSM handler.
//!
//! `FsmContext` is the single struct that state handlers read from and
//! write to.  It holds the live session, the stock ledger, the change
//! plan and the dispense outcomes collected so far, plus timing and
//! configuration.  Think of it as the "blackboard" in a blackboard
//! architecture: the service writes inputs, handlers decide, the service
//! applies what they leave behind (`dispatch_pending`, `record`).

use heapless::Vec;

use crate::app::session::{CancelReason, PaymentSession, SessionRecord};
use crate::app::stock::StockLedger;
use crate::config::{KioskConfig, MAX_DENOMINATIONS};
use crate::control::change::DispensePlan;
use crate::control::hopper::DispenseOutcome;
use crate::error::ChangeError;

/// The shared context passed to every state handler function.
pub struct FsmContext {
    // -- Timing --
    /// Time of the current tick (milliseconds, monotonic).
    pub now_ms: u64,

    // -- Configuration --
    pub config: KioskConfig,

    // -- Session --
    /// The session being collected or settled.
    pub session: Option<PaymentSession>,
    /// Why the session is being cancelled; set before entering `Cancelled`.
    pub cancel: Option<CancelReason>,

    // -- Settlement --
    pub stock: StockLedger,
    pub plan: Option<DispensePlan>,
    pub change_error: Option<ChangeError>,
    /// Outcomes collected from the hoppers for the current plan.
    pub outcomes: Vec<DispenseOutcome, MAX_DENOMINATIONS>,
    /// Set on entering `Settling`; the service issues the hopper requests
    /// and clears it.
    pub dispatch_pending: bool,

    // -- Output --
    /// Record of a session that just ended; the service emits and takes it.
    pub record: Option<SessionRecord>,
}

impl FsmContext {
    /// Create a new context with the given configuration.
    pub fn new(config: KioskConfig) -> Self {
        Self {
            now_ms: 0,
            stock: StockLedger::from_config(&config),
            config,
            session: None,
            cancel: None,
            plan: None,
            change_error: None,
            outcomes: Vec::new(),
            dispatch_pending: false,
            record: None,
        }
    }

    /// True once every planned line has reported an outcome.
    pub fn all_outcomes_in(&self) -> bool {
        let planned = self.plan.as_ref().map_or(0, |p| p.lines().len());
        !self.dispatch_pending && self.outcomes.len() >= planned
    }

    /// Drop everything tied to the previous session.
    pub fn clear_session(&mut self) {
        self.session = None;
        self.cancel = None;
        self.plan = None;
        self.change_error = None;
        self.outcomes.clear();
        self.dispatch_pending = false;
    }
}
