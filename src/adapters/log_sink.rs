//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing structured kiosk events to the
//! `log` facade (serial console on the controller board, the
//! `tracing-subscriber` formatter in the simulator).  A UI or
//! transaction-log adapter would implement the same trait.

use log::{error, info, warn};

use crate::app::events::KioskEvent;
use crate::app::ports::EventSink;
use crate::app::session::SettlementFault;

/// Adapter that logs every [`KioskEvent`].
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &KioskEvent) {
        match event {
            KioskEvent::SessionStarted {
                session_id,
                target_amount,
                carried_over,
            } => {
                info!(
                    "SESSION | #{} started | target={} carried_over={}",
                    session_id, target_amount, carried_over
                );
            }
            KioskEvent::BalanceUpdate {
                session_id,
                accumulated_amount,
                target_amount,
                latest,
            } => {
                info!(
                    "BALANCE | #{} | {}/{} (+{})",
                    session_id, accumulated_amount, target_amount, latest
                );
            }
            KioskEvent::DispenseProgress {
                denomination,
                dispensed_count,
                requested_count,
            } => {
                info!(
                    "DISPENSE | {:?} {}/{}",
                    denomination, dispensed_count, requested_count
                );
            }
            KioskEvent::Settlement(s) => match s.fault {
                None => info!(
                    "SETTLED | #{} | paid={} target={} change={} OK",
                    s.session_id, s.accumulated_amount, s.target_amount, s.change_due
                ),
                Some(SettlementFault::NoExactChange) => error!(
                    "SETTLED | #{} | no exact change for {}, attendant owes {}",
                    s.session_id, s.change_due, s.shortfall
                ),
                Some(SettlementFault::Dispense(reason)) => error!(
                    "SETTLED | #{} | dispense {:?}, attendant owes {}",
                    s.session_id, reason, s.shortfall
                ),
            },
            KioskEvent::SessionCancelled(c) => {
                info!(
                    "CANCELLED | #{} ({:?}) | refund {}",
                    c.session_id, c.reason, c.accumulated_amount
                );
            }
            KioskEvent::Fault(r) => {
                if r.kind.is_transient() {
                    warn!("FAULT | {:?} | {:?}", r.kind, r.context);
                } else {
                    error!("FAULT | {:?} | {:?}", r.kind, r.context);
                }
            }
            KioskEvent::StateChanged { from, to } => {
                info!("STATE | {:?} -> {:?}", from, to);
            }
            KioskEvent::StockLow {
                denomination,
                remaining,
            } => {
                warn!("STOCK | {:?} low, {} left", denomination, remaining);
            }
            KioskEvent::CommandRejected { command, reason } => {
                warn!("REJECTED | {:?}: {}", command, reason);
            }
        }
    }
}
