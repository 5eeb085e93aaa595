//! Payment session records.
//!
//! [`PaymentSession`] is the live running balance, owned by the
//! coordinator.  [`Settlement`] and [`CancelledSession`] are the immutable
//! records handed out when a session ends; both serialize so the caller
//! can append them to a transaction log.

use heapless::Vec as BoundedVec;
use serde::{Deserialize, Serialize};

use crate::config::{Amount, DenomId, MAX_DENOMINATIONS};
use crate::control::change::DispensePlan;
use crate::control::hopper::{DispenseFault, DispenseOutcome};
use crate::events::IntakeEvent;

pub type SessionId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptedUnit {
    pub denomination: DenomId,
    pub face_value: Amount,
    pub timestamp_ms: u64,
}

/// A checkout in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentSession {
    id: SessionId,
    target_amount: Amount,
    accumulated_amount: Amount,
    accepted_units: Vec<AcceptedUnit>,
    started_ms: u64,
}

impl PaymentSession {
    pub fn new(id: SessionId, target_amount: Amount, started_ms: u64) -> Self {
        Self {
            id,
            target_amount,
            accumulated_amount: 0,
            accepted_units: Vec::new(),
            started_ms,
        }
    }

    /// Credit one accepted unit.  The only way the balance changes.
    pub fn credit(&mut self, event: &IntakeEvent) -> Amount {
        self.accepted_units.push(AcceptedUnit {
            denomination: event.denomination,
            face_value: event.face_value,
            timestamp_ms: event.timestamp_ms,
        });
        self.accumulated_amount = self.accumulated_amount.saturating_add(event.face_value);
        self.accumulated_amount
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn target_amount(&self) -> Amount {
        self.target_amount
    }

    pub fn accumulated_amount(&self) -> Amount {
        self.accumulated_amount
    }

    pub fn accepted_units(&self) -> &[AcceptedUnit] {
        &self.accepted_units
    }

    pub fn started_ms(&self) -> u64 {
        self.started_ms
    }

    pub fn is_paid(&self) -> bool {
        self.accumulated_amount >= self.target_amount
    }

    pub fn change_due(&self) -> Amount {
        self.accumulated_amount.saturating_sub(self.target_amount)
    }
}

/// Why settlement did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementFault {
    /// Stock could not make the change; no hopper was driven.
    NoExactChange,
    /// At least one hopper faulted; the first fault seen.
    Dispense(DispenseFault),
}

/// Final record of a paid session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub session_id: SessionId,
    pub target_amount: Amount,
    pub accumulated_amount: Amount,
    pub change_due: Amount,
    pub plan: DispensePlan,
    pub outcomes: BoundedVec<DispenseOutcome, MAX_DENOMINATIONS>,
    pub success: bool,
    pub fault: Option<SettlementFault>,
    /// Change owed to the customer that was not paid out.
    pub shortfall: Amount,
}

impl Settlement {
    /// Verified value actually paid out.
    pub fn dispensed_value(&self) -> Amount {
        self.outcomes
            .iter()
            .map(|o| o.dispensed_count * o.face_value)
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelReason {
    UserRequest,
    CollectionTimeout,
}

/// Refund bookkeeping for a cancelled session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelledSession {
    pub session_id: SessionId,
    pub target_amount: Amount,
    /// Exact amount to refund.
    pub accumulated_amount: Amount,
    pub accepted_units: Vec<AcceptedUnit>,
    pub reason: CancelReason,
}

/// How the last session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionRecord {
    Settled(Settlement),
    Cancelled(CancelledSession),
}

impl SessionRecord {
    pub fn session_id(&self) -> SessionId {
        match self {
            Self::Settled(s) => s.session_id,
            Self::Cancelled(c) => c.session_id,
        }
    }
}
