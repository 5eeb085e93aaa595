//! Application service: the hexagonal core.
//!
//! [`AppService`] owns the coordinator FSM, the hopper controllers and the
//! shared context.  It is the single serialized entry point for session
//! state: every intake, feedback pulse, fault and command arrives through
//! [`AppService::handle_msg`], and time advances through
//! [`AppService::tick`].  All I/O flows through port traits injected at
//! call sites, making the entire service testable with mock adapters.
//!
//! ```text
//!  ControlMsg ──▶ ┌────────────────────────────┐ ──▶ EventSink
//!                 │         AppService          │
//!  HopperPort ◀───│  FSM · Hoppers · Stock      │
//!                 └────────────────────────────┘
//! ```

use heapless::Vec as BoundedVec;
use log::{error, info, warn};

use crate::config::{Amount, DenomId, KioskConfig, MAX_DENOMINATIONS};
use crate::control::change::PlanLine;
use crate::control::hopper::{
    DispenseFault, DispenseOutcome, FeedbackResult, HopperController, HopperState,
};
use crate::error::{CommandError, Result};
use crate::events::{ControlMsg, FaultKind, FaultReport, FeedbackPulse, IntakeEvent};
use crate::fsm::context::FsmContext;
use crate::fsm::states::build_state_table;
use crate::fsm::{Fsm, StateId};

use super::commands::AppCommand;
use super::events::KioskEvent;
use super::ports::{EventSink, HopperPort};
use super::session::{
    CancelReason, PaymentSession, SessionId, SessionRecord, SettlementFault,
};
use super::stock::StockLedger;

// ───────────────────────────────────────────────────────────────
// AppService
// ───────────────────────────────────────────────────────────────

/// The payment session coordinator.
pub struct AppService {
    fsm: Fsm,
    ctx: FsmContext,
    hoppers: Vec<HopperController>,
    /// Units inserted while no session was collecting.
    carry_over: Vec<IntakeEvent>,
    next_session_id: SessionId,
    last_record: Option<SessionRecord>,
    /// Denominations already reported low; cleared by refill.
    low_reported: BoundedVec<DenomId, MAX_DENOMINATIONS>,
}

impl AppService {
    /// Construct the service from a validated configuration.
    ///
    /// Does **not** start the FSM; call [`start`](Self::start) next.
    pub fn new(config: KioskConfig) -> Result<Self> {
        config.validate()?;

        let hoppers = config
            .denominations()
            .filter_map(|(id, d)| {
                d.hopper
                    .as_ref()
                    .map(|spec| HopperController::new(id, d.face_value, spec, config.hopper))
            })
            .collect();
        let ctx = FsmContext::new(config);
        let fsm = Fsm::new(build_state_table(), StateId::Idle);

        Ok(Self {
            fsm,
            ctx,
            hoppers,
            carry_over: Vec::new(),
            next_session_id: 1,
            last_record: None,
            low_reported: BoundedVec::new(),
        })
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Start the FSM in Idle.
    pub fn start(&mut self, now_ms: u64) {
        self.ctx.now_ms = now_ms;
        self.fsm.start(&mut self.ctx);
        info!(
            "AppService started with {} hopper(s), {} denomination(s)",
            self.hoppers.len(),
            self.ctx.config.denominations.len()
        );
    }

    // ── Inbound messages ──────────────────────────────────────

    /// Apply one message from the control queue.
    pub fn handle_msg(
        &mut self,
        msg: ControlMsg,
        now_ms: u64,
        hw: &mut impl HopperPort,
        sink: &mut impl EventSink,
    ) {
        self.advance_clock(now_ms);
        match msg {
            ControlMsg::Intake(event) => self.on_intake(event, sink),
            ControlMsg::Feedback(pulse) => self.on_feedback(pulse, hw, sink),
            ControlMsg::Fault(report) => {
                let report = self.tag_session(report);
                sink.emit(&KioskEvent::Fault(report));
            }
            ControlMsg::Command(cmd) => {
                // Rejections are reported through the sink.
                let _ = self.handle_command(cmd, now_ms, sink);
            }
        }
    }

    fn on_intake(&mut self, event: IntakeEvent, sink: &mut impl EventSink) {
        let collecting = self.fsm.current_state() == StateId::Collecting;
        match self.ctx.session.as_mut().filter(|_| collecting) {
            Some(session) => {
                let accumulated = session.credit(&event);
                info!(
                    "INTAKE: +{} -> {}/{} (session {})",
                    event.face_value,
                    accumulated,
                    session.target_amount(),
                    session.id()
                );
                sink.emit(&KioskEvent::BalanceUpdate {
                    session_id: session.id(),
                    accumulated_amount: accumulated,
                    target_amount: session.target_amount(),
                    latest: event.face_value,
                });
            }
            None => {
                warn!(
                    "INTAKE: {} received in {:?}, held for next session",
                    event.face_value,
                    self.fsm.current_state()
                );
                self.carry_over.push(event);
                sink.emit(&KioskEvent::Fault(
                    FaultReport::new(FaultKind::UnexpectedIntake, event.timestamp_ms)
                        .for_denomination(event.denomination)
                        .with_amount(event.face_value),
                ));
            }
        }
    }

    fn on_feedback(
        &mut self,
        pulse: FeedbackPulse,
        hw: &mut impl HopperPort,
        sink: &mut impl EventSink,
    ) {
        let Some(hopper) = self
            .hoppers
            .iter_mut()
            .find(|h| h.denomination() == pulse.denomination)
        else {
            warn!("FEEDBACK: no hopper for {:?}", pulse.denomination);
            return;
        };
        match hopper.on_feedback(pulse.timestamp_ms, hw) {
            FeedbackResult::Counted {
                dispensed,
                requested,
            } => sink.emit(&KioskEvent::DispenseProgress {
                denomination: pulse.denomination,
                dispensed_count: dispensed,
                requested_count: requested,
            }),
            // Reported with the outcome once collected.
            FeedbackResult::Overdispense => {}
            FeedbackResult::Spurious => sink.emit(&KioskEvent::Fault(
                FaultReport::new(FaultKind::SpuriousFeedback, pulse.timestamp_ms)
                    .for_denomination(pulse.denomination),
            )),
        }
    }

    // ── Command handling ──────────────────────────────────────

    /// Process an external command.  A refused command is also reported
    /// as [`KioskEvent::CommandRejected`].
    pub fn handle_command(
        &mut self,
        cmd: AppCommand,
        now_ms: u64,
        sink: &mut impl EventSink,
    ) -> Result<()> {
        self.advance_clock(now_ms);
        let result = match cmd {
            AppCommand::StartCheckout { target } => self.start_checkout(target, sink),
            AppCommand::Cancel => self.cancel(sink),
            AppCommand::Refill {
                denomination,
                count,
            } => self.refill(denomination, count),
        };
        if let Err(reason) = result {
            warn!("Command {:?} rejected: {}", cmd, reason);
            sink.emit(&KioskEvent::CommandRejected {
                command: cmd,
                reason,
            });
        }
        result.map_err(Into::into)
    }

    fn start_checkout(
        &mut self,
        target: Amount,
        sink: &mut impl EventSink,
    ) -> core::result::Result<(), CommandError> {
        if target == 0 {
            return Err(CommandError::InvalidAmount);
        }
        let state = self.fsm.current_state();
        if state.is_terminal() {
            // Finished session not yet ticked back to Idle.
            self.transition(StateId::Idle, sink);
        } else if state != StateId::Idle {
            return Err(CommandError::SessionActive);
        }

        let id = self.next_session_id;
        self.next_session_id = self.next_session_id.wrapping_add(1);

        let mut session = PaymentSession::new(id, target, self.ctx.now_ms);
        let mut latest = 0;
        for event in self.carry_over.drain(..) {
            session.credit(&event);
            latest = event.face_value;
        }
        let carried_over = session.accumulated_amount();
        self.ctx.session = Some(session);
        self.transition(StateId::Collecting, sink);

        sink.emit(&KioskEvent::SessionStarted {
            session_id: id,
            target_amount: target,
            carried_over,
        });
        if carried_over > 0 {
            info!("Session {}: {} carried over", id, carried_over);
            sink.emit(&KioskEvent::BalanceUpdate {
                session_id: id,
                accumulated_amount: carried_over,
                target_amount: target,
                latest,
            });
        }
        Ok(())
    }

    fn cancel(&mut self, sink: &mut impl EventSink) -> core::result::Result<(), CommandError> {
        if self.fsm.current_state() != StateId::Collecting {
            return Err(CommandError::NotCollecting);
        }
        self.ctx.cancel = Some(CancelReason::UserRequest);
        self.transition(StateId::Cancelled, sink);
        self.flush_record(sink);
        Ok(())
    }

    fn refill(
        &mut self,
        denomination: DenomId,
        count: u32,
    ) -> core::result::Result<(), CommandError> {
        if count == 0 {
            return Err(CommandError::InvalidAmount);
        }
        if self.ctx.config.denomination(denomination).is_none() {
            return Err(CommandError::UnknownDenomination);
        }
        self.ctx.stock.refill(denomination, count)?;
        if !self.ctx.stock.is_low(denomination) {
            self.low_reported.retain(|d| *d != denomination);
        }
        Ok(())
    }

    // ── Per-tick orchestration ────────────────────────────────

    /// Run one control cycle: hopper timers → collect outcomes → FSM →
    /// dispatch dispense requests → emit records.
    pub fn tick(&mut self, now_ms: u64, hw: &mut impl HopperPort, sink: &mut impl EventSink) {
        self.advance_clock(now_ms);

        // 1. Hopper timers (stall, retry, verify window)
        for hopper in self.hoppers.iter_mut() {
            hopper.tick(now_ms, hw);
        }

        // 2. Join finished hoppers
        if self.fsm.current_state() == StateId::Settling {
            self.collect_outcomes(sink);
        }

        // 3. FSM tick (pure state logic)
        let prev_state = self.fsm.current_state();
        self.fsm.tick(&mut self.ctx);
        let new_state = self.fsm.current_state();
        if new_state != prev_state {
            sink.emit(&KioskEvent::StateChanged {
                from: prev_state,
                to: new_state,
            });
        }

        // 4. Apply what the handlers left on the context
        if self.ctx.dispatch_pending {
            self.dispatch(now_ms, hw);
        }
        self.flush_record(sink);
    }

    fn collect_outcomes(&mut self, sink: &mut impl EventSink) {
        let session_id = self.ctx.session.as_ref().map(|s| s.id());
        for hopper in self.hoppers.iter_mut() {
            let Some(outcome) = hopper.take_outcome() else {
                continue;
            };
            if let Some(reason) = outcome.fault_reason {
                let mut report = FaultReport::new(fault_kind(reason), self.ctx.now_ms)
                    .for_denomination(outcome.denomination)
                    .with_amount(outcome.undispensed_value());
                if let Some(id) = session_id {
                    report = report.in_session(id);
                }
                sink.emit(&KioskEvent::Fault(report));
            }
            if self.ctx.outcomes.push(outcome).is_err() {
                error!("SETTLE: outcome table full, dropping {:?}", outcome);
            }
        }
    }

    /// Issue one request per plan line, all at once.
    fn dispatch(&mut self, now_ms: u64, hw: &mut impl HopperPort) {
        self.ctx.dispatch_pending = false;
        let lines: BoundedVec<PlanLine, MAX_DENOMINATIONS> = self
            .ctx
            .plan
            .as_ref()
            .map(|p| p.lines().iter().copied().collect())
            .unwrap_or_default();

        for line in lines {
            let requested = self
                .hoppers
                .iter_mut()
                .find(|h| h.denomination() == line.denomination)
                .map(|h| h.request(line.count, now_ms, hw));
            if !matches!(requested, Some(Ok(()))) {
                error!(
                    "SETTLE: hopper {:?} unavailable for {} coin(s)",
                    line.denomination, line.count
                );
                let _ = self.ctx.outcomes.push(DispenseOutcome {
                    denomination: line.denomination,
                    face_value: line.face_value,
                    requested_count: line.count,
                    dispensed_count: 0,
                    faulted: true,
                    fault_reason: Some(DispenseFault::Actuator),
                });
            }
        }
    }

    /// Emit and retain the record of a session that just ended.
    fn flush_record(&mut self, sink: &mut impl EventSink) {
        let Some(record) = self.ctx.record.take() else {
            return;
        };
        match &record {
            SessionRecord::Settled(settlement) => {
                if settlement.fault == Some(SettlementFault::NoExactChange) {
                    sink.emit(&KioskEvent::Fault(
                        FaultReport::new(FaultKind::NoExactChange, self.ctx.now_ms)
                            .in_session(settlement.session_id)
                            .with_amount(settlement.change_due),
                    ));
                }
                sink.emit(&KioskEvent::Settlement(settlement.clone()));
                self.report_low_stock(sink);
            }
            SessionRecord::Cancelled(cancelled) => {
                sink.emit(&KioskEvent::SessionCancelled(cancelled.clone()));
            }
        }
        self.last_record = Some(record);
    }

    fn report_low_stock(&mut self, sink: &mut impl EventSink) {
        for level in self.ctx.stock.levels() {
            if !self.ctx.stock.is_low(level.denomination)
                || self.low_reported.contains(&level.denomination)
            {
                continue;
            }
            warn!(
                "STOCK {:?}: low ({} left)",
                level.denomination, level.count
            );
            sink.emit(&KioskEvent::StockLow {
                denomination: level.denomination,
                remaining: level.count,
            });
            let _ = self.low_reported.push(level.denomination);
        }
    }

    // ── Queries ───────────────────────────────────────────────

    /// Current FSM state.
    pub fn state(&self) -> StateId {
        self.fsm.current_state()
    }

    /// The live session, if one is collecting or settling.
    pub fn session(&self) -> Option<&PaymentSession> {
        self.ctx.session.as_ref()
    }

    /// How the most recent session ended.
    pub fn last_record(&self) -> Option<&SessionRecord> {
        self.last_record.as_ref()
    }

    pub fn stock(&self) -> &StockLedger {
        &self.ctx.stock
    }

    /// Credit waiting for the next session.
    pub fn carry_over_amount(&self) -> Amount {
        self.carry_over.iter().map(|e| e.face_value).sum()
    }

    pub fn hopper_state(&self, denomination: DenomId) -> Option<HopperState> {
        self.hoppers
            .iter()
            .find(|h| h.denomination() == denomination)
            .map(|h| h.state())
    }

    pub fn config(&self) -> &KioskConfig {
        &self.ctx.config
    }


    // ── Internal ──────────────────────────────────────────────

    fn advance_clock(&mut self, now_ms: u64) {
        self.ctx.now_ms = self.ctx.now_ms.max(now_ms);
    }

    fn transition(&mut self, to: StateId, sink: &mut impl EventSink) {
        let from = self.fsm.current_state();
        self.fsm.force_transition(to, &mut self.ctx);
        if from != to {
            sink.emit(&KioskEvent::StateChanged { from, to });
        }
    }

    fn tag_session(&self, report: FaultReport) -> FaultReport {
        match (&self.ctx.session, report.context.session_id) {
            (Some(s), None) => report.in_session(s.id()),
            _ => report,
        }
    }
}

fn fault_kind(reason: DispenseFault) -> FaultKind {
    match reason {
        DispenseFault::Stall => FaultKind::Stall,
        DispenseFault::Overdispense => FaultKind::Overdispense,
        DispenseFault::Actuator => FaultKind::ActuatorFailed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LineId;
    use crate::error::{ActuatorError, Error};

    #[derive(Default)]
    struct Outputs(std::vec::Vec<(LineId, bool)>);

    impl HopperPort for Outputs {
        fn set_output(&mut self, line: LineId, high: bool) -> core::result::Result<(), ActuatorError> {
            self.0.push((line, high));
            Ok(())
        }
    }

    #[derive(Default)]
    struct Events(std::vec::Vec<KioskEvent>);

    impl EventSink for Events {
        fn emit(&mut self, event: &KioskEvent) {
            self.0.push(event.clone());
        }
    }

    fn service() -> AppService {
        let mut app = AppService::new(KioskConfig::default()).unwrap();
        app.start(0);
        app
    }

    fn coin(face_value: Amount, denom: u8, t: u64) -> ControlMsg {
        ControlMsg::Intake(IntakeEvent {
            denomination: DenomId(denom),
            face_value,
            timestamp_ms: t,
        })
    }

    #[test]
    fn rejects_invalid_config() {
        let mut config = KioskConfig::default();
        config.control_period_ms = 0;
        assert!(matches!(AppService::new(config), Err(Error::Config(_))));
    }

    #[test]
    fn checkout_requires_idle_and_positive_target() {
        let mut app = service();
        let mut ev = Events::default();
        assert_eq!(
            app.handle_command(AppCommand::StartCheckout { target: 0 }, 1, &mut ev),
            Err(Error::Command(CommandError::InvalidAmount))
        );
        app.handle_command(AppCommand::StartCheckout { target: 20 }, 1, &mut ev)
            .unwrap();
        assert_eq!(app.state(), StateId::Collecting);
        assert_eq!(
            app.handle_command(AppCommand::StartCheckout { target: 20 }, 2, &mut ev),
            Err(Error::Command(CommandError::SessionActive))
        );
        assert!(ev.0.iter().any(|e| matches!(
            e,
            KioskEvent::CommandRejected {
                reason: CommandError::SessionActive,
                ..
            }
        )));
    }

    #[test]
    fn intake_outside_session_carries_over() {
        let mut app = service();
        let mut hw = Outputs::default();
        let mut ev = Events::default();

        app.handle_msg(coin(5, 1, 10), 10, &mut hw, &mut ev);
        assert_eq!(app.carry_over_amount(), 5);
        assert!(matches!(
            ev.0.last(),
            Some(KioskEvent::Fault(r)) if r.kind == FaultKind::UnexpectedIntake
        ));

        app.handle_command(AppCommand::StartCheckout { target: 10 }, 20, &mut ev)
            .unwrap();
        assert_eq!(app.session().map(|s| s.accumulated_amount()), Some(5));
        assert_eq!(app.carry_over_amount(), 0);
    }

    #[test]
    fn cancel_outside_collecting_is_rejected() {
        let mut app = service();
        let mut ev = Events::default();
        assert_eq!(
            app.handle_command(AppCommand::Cancel, 0, &mut ev),
            Err(Error::Command(CommandError::NotCollecting))
        );
    }

    #[test]
    fn refill_validates_denomination() {
        let mut app = service();
        let mut ev = Events::default();
        let refill = |d, count| AppCommand::Refill {
            denomination: DenomId(d),
            count,
        };
        assert!(app.handle_command(refill(0, 50), 0, &mut ev).is_ok());
        assert_eq!(app.stock().level(DenomId(0)).map(|l| l.count), Some(250));
        assert_eq!(
            app.handle_command(refill(4, 1), 0, &mut ev),
            Err(Error::Command(CommandError::NoHopper))
        );
        assert_eq!(
            app.handle_command(refill(9, 1), 0, &mut ev),
            Err(Error::Command(CommandError::UnknownDenomination))
        );
    }
}
