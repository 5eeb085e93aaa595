//! End-to-end tests over the simulated kiosk.
//!
//! Raw line levels come from [`SimHardware`]; the samplers, the control
//! queue and the coordinator run exactly as on the device.  Time is a
//! [`ManualClock`] stepped 1ms at a time, except for the last test which
//! drives the async runtime in real time.

use core::cell::RefCell;
use core::time::Duration;

use crate::mock_hw::RecordingSink;

use coinbox::adapters::sim::{HopperFault, SimHardware};
use coinbox::adapters::time::{ManualClock, MonotonicClock};
use coinbox::app::commands::AppCommand;
use coinbox::app::events::KioskEvent;
use coinbox::app::ports::Clock;
use coinbox::app::session::{SessionRecord, Settlement, SettlementFault};
use coinbox::config::{Amount, DenomId, KioskConfig};
use coinbox::control::hopper::DispenseFault;
use coinbox::events::{ControlMsg, ControlQueue, FaultKind};
use coinbox::fsm::StateId;
use coinbox::pins;
use coinbox::runtime::{self, SyncLoop};

const ONE: DenomId = DenomId(0);
const FIVE: DenomId = DenomId(1);
const TEN: DenomId = DenomId(2);
const BILL_20: DenomId = DenomId(3);

struct Kiosk {
    clock: ManualClock,
    sim: SimHardware<ManualClock>,
    queue: ControlQueue,
    control: SyncLoop,
    sink: RecordingSink,
    now: u64,
}

impl Kiosk {
    fn new(config: KioskConfig) -> Self {
        let clock = ManualClock::new();
        let sim = SimHardware::new(&config, clock.clone());
        Self {
            clock,
            sim,
            queue: ControlQueue::new(),
            control: SyncLoop::new(config).unwrap(),
            sink: RecordingSink::new(),
            now: 0,
        }
    }

    fn command(&mut self, cmd: AppCommand) {
        self.queue.try_send(ControlMsg::Command(cmd)).unwrap();
    }

    /// Step 1ms at a time up to `until_ms`.
    fn run_until(&mut self, until_ms: u64) {
        while self.now < until_ms {
            self.now += 1;
            self.clock.set(self.now);
            self.control
                .step(self.now, &mut self.sim, &self.queue, &mut self.sink);
        }
    }

    fn settlement(&self) -> &Settlement {
        match self.control.app().last_record() {
            Some(SessionRecord::Settled(s)) => s,
            other => panic!("expected a settlement, got {:?}", other),
        }
    }

    fn accumulated(&self) -> Option<Amount> {
        self.control.app().session().map(|s| s.accumulated_amount())
    }
}

#[test]
fn coins_pay_exact_price() {
    let mut k = Kiosk::new(KioskConfig::default());
    k.command(AppCommand::StartCheckout { target: 35 });
    assert!(k.sim.insert(TEN, 100, false));
    assert!(k.sim.insert(TEN, 400, true));
    assert!(k.sim.insert(TEN, 700, false));
    assert!(k.sim.insert(FIVE, 1_000, true));

    k.run_until(1_500);
    let s = k.settlement();
    assert!(s.success);
    assert_eq!(s.accumulated_amount, 35);
    assert_eq!(s.change_due, 0);
    assert!(k.sim.writes().is_empty());
    assert_eq!(k.control.app().state(), StateId::Idle);
}

#[test]
fn bill_pays_with_change_from_three_hoppers() {
    let mut k = Kiosk::new(KioskConfig::default());
    k.command(AppCommand::StartCheckout { target: 4 });
    assert!(k.sim.insert(BILL_20, 100, false));

    k.run_until(2_000);
    let s = k.settlement();
    assert!(s.success, "settlement: {:?}", s);
    assert_eq!(s.accumulated_amount, 20);
    assert_eq!(s.dispensed_value(), 16);
    for d in [ONE, FIVE, TEN] {
        assert_eq!(k.sim.coins(d), Some(199));
        assert_eq!(k.control.app().stock().level(d).map(|l| l.count), Some(199));
        assert!(!k.sim.is_running(d));
    }
}

#[test]
fn jam_cleared_by_restart_completes() {
    let mut k = Kiosk::new(KioskConfig::default());
    k.sim.inject(
        ONE,
        HopperFault::Jam {
            after: 0,
            clears_on_restart: true,
        },
    );
    k.command(AppCommand::StartCheckout { target: 9 });
    assert!(k.sim.insert(TEN, 100, false));

    k.run_until(3_000);
    assert!(k.settlement().success);
    let motor: Vec<bool> = k
        .sim
        .writes()
        .iter()
        .filter(|(line, _)| *line == pins::HOPPER_1_MOTOR_GPIO)
        .map(|(_, high)| *high)
        .collect();
    assert_eq!(motor, vec![true, false, true, false]);
}

#[test]
fn permanent_jam_settles_faulted() {
    let mut k = Kiosk::new(KioskConfig::default());
    k.sim.inject(
        ONE,
        HopperFault::Jam {
            after: 0,
            clears_on_restart: false,
        },
    );
    k.command(AppCommand::StartCheckout { target: 9 });
    assert!(k.sim.insert(TEN, 100, false));

    // Three 2s attempts.
    k.run_until(7_000);
    let s = k.settlement();
    assert_eq!(s.fault, Some(SettlementFault::Dispense(DispenseFault::Stall)));
    assert_eq!(s.shortfall, 1);
    assert!(k.sink.faults().contains(&FaultKind::Stall));
    assert!(!k.sim.is_running(ONE));
    assert_eq!(k.sim.coins(ONE), Some(200));
}

#[test]
fn motor_overrun_is_overdispense() {
    let mut k = Kiosk::new(KioskConfig::default());
    k.sim.inject(ONE, HopperFault::Overrun { delay_ms: 40 });
    k.command(AppCommand::StartCheckout { target: 9 });
    assert!(k.sim.insert(TEN, 100, false));

    k.run_until(1_500);
    let s = k.settlement();
    assert_eq!(
        s.fault,
        Some(SettlementFault::Dispense(DispenseFault::Overdispense))
    );
    assert_eq!(s.outcomes[0].dispensed_count, 1);
    assert_eq!(k.sim.coins(ONE), Some(198));
    assert_eq!(k.control.app().stock().level(ONE).map(|l| l.count), Some(199));
}

#[test]
fn stuck_line_credits_nothing_then_counting_resumes() {
    let mut k = Kiosk::new(KioskConfig::default());
    k.command(AppCommand::StartCheckout { target: 100 });
    k.sim.hold_active(pins::COIN_5_SENSE_GPIO, 100, 3_000);

    k.run_until(3_500);
    assert_eq!(
        k.sink
            .count(|e| matches!(e, KioskEvent::Fault(r) if r.kind == FaultKind::StuckSensor)),
        1
    );
    // A stuck line credits nothing, not even its leading edge.
    assert_eq!(k.accumulated(), Some(0));

    assert!(k.sim.insert(TEN, 3_600, false));
    k.run_until(3_800);
    assert_eq!(k.accumulated(), Some(10));
}

#[test]
fn contact_bounce_counts_once() {
    let mut k = Kiosk::new(KioskConfig::default());
    k.command(AppCommand::StartCheckout { target: 100 });
    for i in 0..5 {
        assert!(k.sim.insert(ONE, 100 + i * 200, true));
    }
    k.run_until(1_500);
    assert_eq!(k.accumulated(), Some(5));
}

#[test]
fn failing_sensor_is_reported_once() {
    let mut k = Kiosk::new(KioskConfig::default());
    k.sim.fail_channel(Some(pins::COIN_10_SENSE_GPIO));
    k.run_until(200);
    assert_eq!(k.sink.faults(), vec![FaultKind::SensorReadFailed]);

    k.sim.fail_channel(None);
    k.command(AppCommand::StartCheckout { target: 10 });
    assert!(k.sim.insert(TEN, 300, false));
    k.run_until(800);
    assert!(k.settlement().success);
}

#[test]
fn async_runtime_settles_a_purchase() {
    let config = KioskConfig::default();
    let clock = MonotonicClock::new();
    let mut sim = SimHardware::new(&config, clock).with_release_period(40);
    assert!(sim.insert(TEN, 50, false));
    assert!(sim.insert(FIVE, 250, false));

    let queue = ControlQueue::new();
    queue
        .try_send(ControlMsg::Command(AppCommand::StartCheckout { target: 12 }))
        .unwrap();

    let hw = RefCell::new(sim);
    let sink = RefCell::new(RecordingSink::new());
    let stop = async {
        let settled = |s: &RecordingSink| s.count(|e| matches!(e, KioskEvent::Settlement(_))) > 0;
        while !settled(&sink.borrow()) && clock.now_ms() < 10_000 {
            async_io_mini::Timer::after(Duration::from_millis(5)).await;
        }
    };

    let app = runtime::run(config, &hw, &sink, &clock, &queue, stop).unwrap();
    match app.last_record() {
        Some(SessionRecord::Settled(s)) => {
            assert!(s.success, "settlement: {:?}", s);
            assert_eq!(s.change_due, 3);
            assert_eq!(s.dispensed_value(), 3);
        }
        other => panic!("expected a settlement, got {:?}", other),
    }
    assert_eq!(hw.borrow().coins(ONE), Some(197));
}
