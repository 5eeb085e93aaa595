//! Integration tests for the AppService → FSM → hoppers pipeline.
//!
//! Messages are fed straight into the coordinator with explicit
//! timestamps, the way the control task would deliver them, and the mock
//! hardware records every motor write.

use crate::mock_hw::{MockHardware, RecordingSink};

use coinbox::app::commands::AppCommand;
use coinbox::app::events::KioskEvent;
use coinbox::app::service::AppService;
use coinbox::app::session::{CancelReason, SessionRecord, Settlement, SettlementFault};
use coinbox::config::{Amount, DenomId, KioskConfig};
use coinbox::control::hopper::{DispenseFault, HopperState};
use coinbox::error::{CommandError, Error};
use coinbox::events::{ControlMsg, FaultKind, FeedbackPulse, IntakeEvent};
use coinbox::fsm::StateId;
use coinbox::pins;

const ONE: DenomId = DenomId(0);
const FIVE: DenomId = DenomId(1);
const TEN: DenomId = DenomId(2);
const BILL_20: DenomId = DenomId(3);

struct Rig {
    app: AppService,
    hw: MockHardware,
    sink: RecordingSink,
}

impl Rig {
    fn new(config: KioskConfig) -> Self {
        let mut app = AppService::new(config).unwrap();
        app.start(0);
        Self {
            app,
            hw: MockHardware::new(),
            sink: RecordingSink::new(),
        }
    }

    fn checkout(&mut self, target: Amount, t: u64) {
        self.app
            .handle_command(AppCommand::StartCheckout { target }, t, &mut self.sink)
            .unwrap();
    }

    fn insert(&mut self, denomination: DenomId, face_value: Amount, t: u64) {
        let msg = ControlMsg::Intake(IntakeEvent {
            denomination,
            face_value,
            timestamp_ms: t,
        });
        self.app.handle_msg(msg, t, &mut self.hw, &mut self.sink);
    }

    fn feed(&mut self, denomination: DenomId, t: u64) {
        let msg = ControlMsg::Feedback(FeedbackPulse {
            denomination,
            timestamp_ms: t,
        });
        self.app.handle_msg(msg, t, &mut self.hw, &mut self.sink);
    }

    fn tick(&mut self, t: u64) {
        self.app.tick(t, &mut self.hw, &mut self.sink);
    }

    /// Tick every 10ms over `[from, to]`.
    fn run(&mut self, from: u64, to: u64) {
        for t in (from..=to).step_by(10) {
            self.tick(t);
        }
    }

    fn settlement(&self) -> &Settlement {
        match self.app.last_record() {
            Some(SessionRecord::Settled(s)) => s,
            other => panic!("expected a settlement, got {:?}", other),
        }
    }

    fn stock(&self, denomination: DenomId) -> u32 {
        self.app.stock().level(denomination).unwrap().count
    }
}

fn default_rig() -> Rig {
    Rig::new(KioskConfig::default())
}

// ── Exact payment ─────────────────────────────────────────────

#[test]
fn exact_payment_completes_without_change() {
    let mut rig = default_rig();
    rig.checkout(35, 0);
    rig.insert(TEN, 10, 100);
    rig.insert(TEN, 10, 200);
    rig.insert(TEN, 10, 300);
    rig.insert(FIVE, 5, 400);
    assert_eq!(rig.app.session().unwrap().accumulated_amount(), 35);

    rig.tick(500);
    assert_eq!(rig.app.state(), StateId::ReadyToSettle);

    rig.tick(510);
    assert_eq!(rig.app.state(), StateId::Settling);
    rig.tick(520);
    assert_eq!(rig.app.state(), StateId::Completed);

    let s = rig.settlement();
    assert!(s.success);
    assert_eq!(s.change_due, 0);
    assert!(s.plan.is_empty());
    assert!(s.outcomes.is_empty());
    assert!(rig.hw.writes.is_empty(), "no hopper may run for zero change");

    rig.tick(530);
    assert_eq!(rig.app.state(), StateId::Idle);
    assert!(rig.app.session().is_none());
}

#[test]
fn balance_updates_track_every_unit() {
    let mut rig = default_rig();
    rig.checkout(100, 0);
    rig.insert(BILL_20, 20, 100);
    rig.insert(FIVE, 5, 200);

    let balances: Vec<Amount> = rig
        .sink
        .events
        .iter()
        .filter_map(|e| match e {
            KioskEvent::BalanceUpdate {
                accumulated_amount, ..
            } => Some(*accumulated_amount),
            _ => None,
        })
        .collect();
    assert_eq!(balances, vec![20, 25]);
}

// ── Exact change unavailable ──────────────────────────────────

#[test]
fn no_exact_change_faults_before_any_hopper_runs() {
    let mut config = KioskConfig::default();
    if let Some(h) = config.denominations[0].hopper.as_mut() {
        h.initial_stock = 0;
    }
    let mut rig = Rig::new(config);
    rig.checkout(18, 0);
    rig.insert(TEN, 10, 100);
    rig.insert(TEN, 10, 200);

    rig.tick(300);
    assert_eq!(rig.app.state(), StateId::ReadyToSettle);
    rig.tick(310);
    assert_eq!(rig.app.state(), StateId::SettlementFaulted);

    let s = rig.settlement();
    assert!(!s.success);
    assert_eq!(s.fault, Some(SettlementFault::NoExactChange));
    assert_eq!(s.change_due, 2);
    assert_eq!(s.shortfall, 2);
    assert!(s.outcomes.is_empty());
    assert!(rig.hw.writes.is_empty());
    assert!(rig.sink.faults().contains(&FaultKind::NoExactChange));
}

// ── Cancellation ──────────────────────────────────────────────

#[test]
fn cancel_reports_exact_refund() {
    let mut rig = default_rig();
    rig.checkout(50, 0);
    rig.insert(TEN, 10, 100);
    rig.insert(FIVE, 5, 200);

    rig.app
        .handle_command(AppCommand::Cancel, 300, &mut rig.sink)
        .unwrap();
    assert_eq!(rig.app.state(), StateId::Cancelled);

    match rig.app.last_record() {
        Some(SessionRecord::Cancelled(c)) => {
            assert_eq!(c.accumulated_amount, 15);
            assert_eq!(c.target_amount, 50);
            assert_eq!(c.accepted_units.len(), 2);
            assert_eq!(c.reason, CancelReason::UserRequest);
        }
        other => panic!("expected cancellation, got {:?}", other),
    }
    assert_eq!(
        rig.sink
            .count(|e| matches!(e, KioskEvent::SessionCancelled(_))),
        1
    );

    rig.tick(310);
    assert_eq!(rig.app.state(), StateId::Idle);
    assert_eq!(
        rig.app.handle_command(AppCommand::Cancel, 320, &mut rig.sink),
        Err(Error::Command(CommandError::NotCollecting))
    );
}

#[test]
fn collecting_session_times_out() {
    let mut config = KioskConfig::default();
    config.collection_timeout_ms = Some(1_000);
    let mut rig = Rig::new(config);
    rig.checkout(50, 0);
    rig.insert(TEN, 10, 100);

    rig.tick(990);
    assert_eq!(rig.app.state(), StateId::Collecting);
    rig.tick(1_000);
    assert_eq!(rig.app.state(), StateId::Cancelled);

    match rig.app.last_record() {
        Some(SessionRecord::Cancelled(c)) => {
            assert_eq!(c.accumulated_amount, 10);
            assert_eq!(c.reason, CancelReason::CollectionTimeout);
        }
        other => panic!("expected timeout, got {:?}", other),
    }
}

#[test]
fn payment_completed_at_timeout_still_settles() {
    let mut config = KioskConfig::default();
    config.collection_timeout_ms = Some(1_000);
    let mut rig = Rig::new(config);
    rig.checkout(10, 0);
    rig.insert(TEN, 10, 995);

    rig.tick(1_000);
    assert_eq!(rig.app.state(), StateId::ReadyToSettle);
    assert!(rig.app.last_record().is_none());
    assert_eq!(
        rig.sink
            .count(|e| matches!(e, KioskEvent::SessionCancelled(_))),
        0
    );

    rig.run(1_010, 1_050);
    assert!(rig.settlement().success);
}

// ── Carry-over ────────────────────────────────────────────────

#[test]
fn coin_during_settling_credits_next_session() {
    let mut rig = default_rig();
    rig.checkout(5, 0);
    rig.insert(TEN, 10, 100);

    rig.tick(200);
    rig.tick(210);
    assert_eq!(rig.app.state(), StateId::Settling);
    assert_eq!(rig.hw.output(pins::HOPPER_5_MOTOR_GPIO), Some(true));

    rig.insert(ONE, 1, 220);
    assert_eq!(rig.app.carry_over_amount(), 1);
    assert!(rig.sink.faults().contains(&FaultKind::UnexpectedIntake));
    assert_eq!(rig.app.session().unwrap().accumulated_amount(), 10);

    rig.feed(FIVE, 300);
    assert_eq!(rig.hw.output(pins::HOPPER_5_MOTOR_GPIO), Some(false));
    rig.run(310, 600);
    assert_eq!(rig.app.state(), StateId::Idle);
    assert!(rig.settlement().success);
    assert_eq!(rig.settlement().dispensed_value(), 5);

    rig.sink.clear();
    rig.checkout(1, 700);
    assert!(rig.sink.events.iter().any(|e| matches!(
        e,
        KioskEvent::SessionStarted {
            carried_over: 1,
            ..
        }
    )));
    assert_eq!(rig.app.carry_over_amount(), 0);
    rig.tick(710);
    assert_eq!(rig.app.state(), StateId::ReadyToSettle);
}

// ── Hoppers ───────────────────────────────────────────────────

#[test]
fn settlement_waits_for_every_hopper() {
    let mut rig = default_rig();
    rig.checkout(4, 0);
    rig.insert(BILL_20, 20, 100);

    rig.tick(200);
    rig.tick(210);
    assert_eq!(rig.app.state(), StateId::Settling);
    for line in [
        pins::HOPPER_1_MOTOR_GPIO,
        pins::HOPPER_5_MOTOR_GPIO,
        pins::HOPPER_10_MOTOR_GPIO,
    ] {
        assert_eq!(rig.hw.output(line), Some(true), "line {} not started", line);
    }

    rig.feed(TEN, 250);
    rig.feed(FIVE, 260);
    rig.run(270, 600);
    assert_eq!(rig.app.state(), StateId::Settling);
    assert_eq!(rig.app.hopper_state(TEN), Some(HopperState::Idle));
    assert_eq!(rig.app.hopper_state(ONE), Some(HopperState::Dispensing));

    rig.feed(ONE, 700);
    rig.run(710, 900);
    let s = rig.settlement();
    assert!(s.success);
    assert_eq!(s.change_due, 16);
    assert_eq!(s.outcomes.len(), 3);
    assert_eq!(s.dispensed_value(), 16);
    for d in [ONE, FIVE, TEN] {
        assert_eq!(rig.stock(d), 199);
    }
}

#[test]
fn stalled_hopper_recovers_on_retry() {
    let mut rig = default_rig();
    rig.checkout(9, 0);
    rig.insert(TEN, 10, 100);
    rig.tick(200);
    rig.tick(210);

    // Default unit timeout is 2s.
    rig.run(220, 2_210);
    assert_eq!(
        rig.hw.writes_to(pins::HOPPER_1_MOTOR_GPIO),
        vec![true, false, true]
    );

    rig.feed(ONE, 2_300);
    rig.run(2_310, 2_600);
    let s = rig.settlement();
    assert!(s.success);
    assert_eq!(s.fault, None);
    assert!(!rig.sink.faults().contains(&FaultKind::Stall));
    assert_eq!(rig.hw.output(pins::HOPPER_1_MOTOR_GPIO), Some(false));
}

#[test]
fn stall_without_retries_reports_shortfall() {
    let mut config = KioskConfig::default();
    config.hopper.max_retries = 0;
    let mut rig = Rig::new(config);
    rig.checkout(8, 0);
    rig.insert(TEN, 10, 100);
    rig.tick(200);
    rig.tick(210);

    rig.feed(ONE, 300);
    rig.run(310, 2_400);
    assert_eq!(rig.app.state(), StateId::Idle);

    let s = rig.settlement();
    assert!(!s.success);
    assert_eq!(s.fault, Some(SettlementFault::Dispense(DispenseFault::Stall)));
    assert_eq!(s.shortfall, 1);
    assert_eq!(s.outcomes[0].dispensed_count, 1);
    assert_eq!(s.outcomes[0].requested_count, 2);
    assert!(rig.sink.faults().contains(&FaultKind::Stall));
    assert_eq!(rig.stock(ONE), 199);
    assert_eq!(rig.hw.output(pins::HOPPER_1_MOTOR_GPIO), Some(false));
}

#[test]
fn extra_coin_is_overdispense_and_not_counted() {
    let mut rig = default_rig();
    rig.checkout(9, 0);
    rig.insert(TEN, 10, 100);
    rig.tick(200);
    rig.tick(210);

    rig.feed(ONE, 300);
    rig.feed(ONE, 350);
    rig.tick(360);
    assert_eq!(rig.app.state(), StateId::SettlementFaulted);

    let s = rig.settlement();
    assert_eq!(
        s.fault,
        Some(SettlementFault::Dispense(DispenseFault::Overdispense))
    );
    assert_eq!(s.outcomes[0].dispensed_count, 1);
    assert_eq!(s.shortfall, 0);
    assert!(rig.sink.faults().contains(&FaultKind::Overdispense));
    assert_eq!(rig.stock(ONE), 199);
}

#[test]
fn failed_motor_write_faults_the_hopper() {
    let mut rig = default_rig();
    rig.hw.broken_line = Some(pins::HOPPER_1_MOTOR_GPIO);
    rig.checkout(9, 0);
    rig.insert(TEN, 10, 100);
    rig.run(200, 240);

    let s = rig.settlement();
    assert_eq!(s.fault, Some(SettlementFault::Dispense(DispenseFault::Actuator)));
    assert_eq!(s.shortfall, 1);
    assert!(rig.sink.faults().contains(&FaultKind::ActuatorFailed));
}

#[test]
fn feedback_while_idle_is_spurious() {
    let mut rig = default_rig();
    rig.feed(FIVE, 10);
    assert_eq!(rig.sink.faults(), vec![FaultKind::SpuriousFeedback]);
    assert_eq!(rig.app.state(), StateId::Idle);
}

// ── Stock ─────────────────────────────────────────────────────

#[test]
fn stock_low_reported_once_until_refill() {
    let mut config = KioskConfig::default();
    if let Some(h) = config.denominations[0].hopper.as_mut() {
        h.initial_stock = 21;
    }
    let mut rig = Rig::new(config);

    let mut t = 0;
    for _ in 0..2 {
        rig.checkout(9, t);
        rig.insert(TEN, 10, t + 100);
        rig.run(t + 200, t + 210);
        rig.feed(ONE, t + 300);
        rig.run(t + 310, t + 600);
        assert!(rig.settlement().success);
        t += 1_000;
    }
    assert_eq!(rig.stock(ONE), 19);

    let lows: Vec<_> = rig
        .sink
        .events
        .iter()
        .filter_map(|e| match e {
            KioskEvent::StockLow {
                denomination,
                remaining,
            } => Some((*denomination, *remaining)),
            _ => None,
        })
        .collect();
    assert_eq!(lows, vec![(ONE, 20)]);

    rig.app
        .handle_command(
            AppCommand::Refill {
                denomination: ONE,
                count: 100,
            },
            t,
            &mut rig.sink,
        )
        .unwrap();
    assert_eq!(rig.stock(ONE), 119);
    assert!(!rig.app.stock().is_low(ONE));
}

#[test]
fn refill_is_capped_at_capacity() {
    let mut rig = default_rig();
    rig.app
        .handle_command(
            AppCommand::Refill {
                denomination: TEN,
                count: 10_000,
            },
            0,
            &mut rig.sink,
        )
        .unwrap();
    assert_eq!(rig.stock(TEN), 500);
}
