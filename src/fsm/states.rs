//! Concrete state handler functions and table builder.
//!
//! Each state is defined by three plain `fn` pointers: no closures, no
//! dynamic dispatch, no heap.  This is the classic embedded C FSM pattern
//! expressed in safe Rust.
//!
//! ```text
//!  IDLE ──[StartCheckout]──▶ COLLECTING ──[cancel / timeout]──▶ CANCELLED
//!    ▲                           │                                 │
//!    │                      [paid in full]                         │
//!    │                           ▼                                 │
//!    │                     READY_TO_SETTLE ──[no exact change]──┐  │
//!    │                           │                              │  │
//!    │                      [plan ready]                        │  │
//!    │                           ▼                              ▼  │
//!    │                       SETTLING ──[hopper fault]──▶ SETTLEMENT_FAULTED
//!    │                           │                              │  │
//!    │                     [all verified]                       │  │
//!    │                           ▼                              │  │
//!    └───────[next tick]─── COMPLETED ◀─────────────────────────┴──┘
//! ```
//!
//! Terminal states write a [`SessionRecord`] to the context on entry and
//! fall back to Idle on their first update.

use log::{error, info, warn};

use super::context::FsmContext;
use super::{StateDescriptor, StateId};
use crate::app::session::{
    CancelReason, CancelledSession, SessionRecord, Settlement, SettlementFault,
};
use crate::control::change::plan_change;

// ═══════════════════════════════════════════════════════════════════════════
//  Table builder
// ═══════════════════════════════════════════════════════════════════════════

/// Build the static state table.  Called once at startup.
pub fn build_state_table() -> [StateDescriptor; StateId::COUNT] {
    [
        // Index 0: Idle
        StateDescriptor {
            id: StateId::Idle,
            name: "Idle",
            on_enter: Some(idle_enter),
            on_exit: None,
            on_update: idle_update,
        },
        // Index 1: Collecting
        StateDescriptor {
            id: StateId::Collecting,
            name: "Collecting",
            on_enter: Some(collecting_enter),
            on_exit: None,
            on_update: collecting_update,
        },
        // Index 2: ReadyToSettle
        StateDescriptor {
            id: StateId::ReadyToSettle,
            name: "ReadyToSettle",
            on_enter: Some(ready_enter),
            on_exit: None,
            on_update: ready_update,
        },
        // Index 3: Cancelled
        StateDescriptor {
            id: StateId::Cancelled,
            name: "Cancelled",
            on_enter: Some(cancelled_enter),
            on_exit: None,
            on_update: terminal_update,
        },
        // Index 4: Settling
        StateDescriptor {
            id: StateId::Settling,
            name: "Settling",
            on_enter: Some(settling_enter),
            on_exit: None,
            on_update: settling_update,
        },
        // Index 5: Completed
        StateDescriptor {
            id: StateId::Completed,
            name: "Completed",
            on_enter: Some(settled_enter),
            on_exit: None,
            on_update: terminal_update,
        },
        // Index 6: SettlementFaulted
        StateDescriptor {
            id: StateId::SettlementFaulted,
            name: "SettlementFaulted",
            on_enter: Some(settled_enter),
            on_exit: None,
            on_update: terminal_update,
        },
    ]
}

// ═══════════════════════════════════════════════════════════════════════════
//  IDLE state
// ═══════════════════════════════════════════════════════════════════════════

fn idle_enter(ctx: &mut FsmContext) {
    ctx.clear_session();
    info!("IDLE: waiting for checkout");
}

fn idle_update(_ctx: &mut FsmContext) -> Option<StateId> {
    // Checkout starts by command; see AppService::handle_command.
    None
}

// ═══════════════════════════════════════════════════════════════════════════
//  COLLECTING state: crediting intake toward the target
// ═══════════════════════════════════════════════════════════════════════════

fn collecting_enter(ctx: &mut FsmContext) {
    if let Some(s) = &ctx.session {
        info!(
            "COLLECTING: session {} target {}",
            s.id(),
            s.target_amount()
        );
    }
}

fn collecting_update(ctx: &mut FsmContext) -> Option<StateId> {
    let Some(session) = &ctx.session else {
        error!("COLLECTING: no session, returning to Idle");
        return Some(StateId::Idle);
    };

    if ctx.cancel.is_some() {
        return Some(StateId::Cancelled);
    }

    // A full payment settles even on the tick the timeout expires.
    if session.is_paid() {
        return Some(StateId::ReadyToSettle);
    }

    if let Some(timeout) = ctx.config.collection_timeout_ms {
        if ctx.now_ms.saturating_sub(session.started_ms()) >= timeout as u64 {
            warn!(
                "COLLECTING: session {} timed out with {} of {}",
                session.id(),
                session.accumulated_amount(),
                session.target_amount()
            );
            ctx.cancel = Some(CancelReason::CollectionTimeout);
            return Some(StateId::Cancelled);
        }
    }
    None
}

// ═══════════════════════════════════════════════════════════════════════════
//  READY_TO_SETTLE state: planning change against current stock
// ═══════════════════════════════════════════════════════════════════════════

fn ready_enter(ctx: &mut FsmContext) {
    let Some(session) = &ctx.session else {
        return;
    };
    let change = session.change_due();
    match plan_change(change, &ctx.stock.snapshot()) {
        Ok(plan) => {
            info!(
                "READY: session {} change {} in {} line(s)",
                session.id(),
                change,
                plan.lines().len()
            );
            ctx.plan = Some(plan);
        }
        Err(e) => {
            warn!("READY: session {}: {}", session.id(), e);
            ctx.change_error = Some(e);
        }
    }
}

fn ready_update(ctx: &mut FsmContext) -> Option<StateId> {
    if ctx.change_error.is_some() || ctx.plan.is_none() {
        return Some(StateId::SettlementFaulted);
    }
    Some(StateId::Settling)
}

// ═══════════════════════════════════════════════════════════════════════════
//  SETTLING state: hoppers running, waiting on every outcome
// ═══════════════════════════════════════════════════════════════════════════

fn settling_enter(ctx: &mut FsmContext) {
    ctx.outcomes.clear();
    ctx.dispatch_pending = true;
}

fn settling_update(ctx: &mut FsmContext) -> Option<StateId> {
    if !ctx.all_outcomes_in() {
        return None;
    }
    let clean = ctx
        .outcomes
        .iter()
        .all(|o| !o.faulted && o.dispensed_count == o.requested_count);
    if clean {
        Some(StateId::Completed)
    } else {
        Some(StateId::SettlementFaulted)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  Terminal states
// ═══════════════════════════════════════════════════════════════════════════

fn settled_enter(ctx: &mut FsmContext) {
    let Some(settlement) = build_settlement(ctx) else {
        error!("SETTLE: no session to settle");
        return;
    };
    for o in &settlement.outcomes {
        ctx.stock.consume(o.denomination, o.dispensed_count);
    }
    if settlement.success {
        info!(
            "COMPLETED: session {} paid {}, change {} dispensed",
            settlement.session_id, settlement.accumulated_amount, settlement.change_due
        );
    } else {
        error!(
            "SETTLEMENT FAULTED: session {} {:?}, shortfall {}",
            settlement.session_id, settlement.fault, settlement.shortfall
        );
    }
    ctx.record = Some(SessionRecord::Settled(settlement));
}

fn cancelled_enter(ctx: &mut FsmContext) {
    let Some(session) = ctx.session.take() else {
        error!("CANCELLED: no session to cancel");
        return;
    };
    let reason = ctx.cancel.unwrap_or(CancelReason::UserRequest);
    info!(
        "CANCELLED: session {} ({:?}), refund {}",
        session.id(),
        reason,
        session.accumulated_amount()
    );
    ctx.record = Some(SessionRecord::Cancelled(CancelledSession {
        session_id: session.id(),
        target_amount: session.target_amount(),
        accumulated_amount: session.accumulated_amount(),
        accepted_units: session.accepted_units().to_vec(),
        reason,
    }));
}

fn terminal_update(_ctx: &mut FsmContext) -> Option<StateId> {
    Some(StateId::Idle)
}

/// Aggregate the session, plan and outcomes into a settlement record.
fn build_settlement(ctx: &FsmContext) -> Option<Settlement> {
    let session = ctx.session.as_ref()?;
    let change_due = session.change_due();
    let outcomes = ctx.outcomes.clone();

    let (fault, shortfall) = if ctx.change_error.is_some() {
        (Some(SettlementFault::NoExactChange), change_due)
    } else {
        let fault = outcomes
            .iter()
            .find_map(|o| o.fault_reason)
            .map(SettlementFault::Dispense);
        let shortfall = outcomes
            .iter()
            .filter(|o| o.faulted)
            .map(|o| o.undispensed_value())
            .sum();
        (fault, shortfall)
    };
    let success =
        fault.is_none() && outcomes.iter().all(|o| o.dispensed_count == o.requested_count);

    Some(Settlement {
        session_id: session.id(),
        target_amount: session.target_amount(),
        accumulated_amount: session.accumulated_amount(),
        change_due,
        plan: ctx.plan.clone().unwrap_or_default(),
        outcomes,
        success,
        fault,
        shortfall,
    })
}
