//! coinbox-sim: scripted purchase against simulated kiosk hardware.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │  SimHardware (SensorPort + HopperPort)   MonotonicClock        │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │  runtime::run - intake · feedback · control tasks      │    │
//! │  │  AppService (FSM · Hoppers · Stock)                    │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │  RecordingSink ─▶ LogEventSink + settlement capture           │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Starts a checkout for `--price`, inserts `--coins` one after another,
//! waits for the session to end and prints its record as JSON.

use core::cell::RefCell;
use core::time::Duration;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{info, warn};
use tracing_subscriber::EnvFilter;

use coinbox::adapters::log_sink::LogEventSink;
use coinbox::adapters::sim::{HopperFault, SimHardware};
use coinbox::adapters::time::MonotonicClock;
use coinbox::app::commands::AppCommand;
use coinbox::app::events::KioskEvent;
use coinbox::app::ports::{Clock, EventSink};
use coinbox::config::{Amount, DenomId, KioskConfig};
use coinbox::events::{ControlMsg, ControlQueue};
use coinbox::runtime;

/// Coinbox payment controller simulator
#[derive(Parser, Debug)]
#[command(name = "coinbox-sim", version, about)]
struct Args {
    /// JSON configuration file; built-in defaults when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Purchase price
    #[arg(short, long, default_value_t = 35)]
    price: Amount,

    /// Face values inserted, in order (coins or bills)
    #[arg(long, value_delimiter = ',', default_value = "10,10,10,5")]
    coins: Vec<Amount>,

    /// Gap between insertions (ms)
    #[arg(long, default_value_t = 400)]
    insert_gap_ms: u64,

    /// Jam the hopper of this face value before its first coin
    #[arg(long)]
    jam: Option<Amount>,

    /// Let a motor restart clear the injected jam
    #[arg(long, requires = "jam")]
    jam_clears: bool,

    /// Release one extra coin from the hopper of this face value
    #[arg(long)]
    overrun: Option<Amount>,

    /// Hopper coin release period (ms)
    #[arg(long, default_value_t = 80)]
    release_period_ms: u64,

    /// Give up after this long (ms)
    #[arg(long, default_value_t = 30_000)]
    deadline_ms: u64,
}

/// Logs every event and notes when the session has ended.
#[derive(Default)]
struct RecordingSink {
    log: LogEventSink,
    finished: bool,
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &KioskEvent) {
        self.log.emit(event);
        if matches!(
            event,
            KioskEvent::Settlement(_) | KioskEvent::SessionCancelled(_)
        ) {
            self.finished = true;
        }
    }
}

fn denomination_for(config: &KioskConfig, face: Amount) -> Result<DenomId> {
    config
        .denominations()
        .find(|(_, d)| d.face_value == face)
        .map(|(id, _)| id)
        .with_context(|| format!("no denomination with face value {face}"))
}

fn load_config(path: Option<&PathBuf>) -> Result<KioskConfig> {
    let Some(path) = path else {
        return Ok(KioskConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let config: KioskConfig =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    config.validate().map_err(coinbox::error::Error::from)?;
    Ok(config)
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;

    let clock = MonotonicClock::new();
    let mut sim = SimHardware::new(&config, clock).with_release_period(args.release_period_ms);

    if let Some(face) = args.jam {
        sim.inject(
            denomination_for(&config, face)?,
            HopperFault::Jam {
                after: 0,
                clears_on_restart: args.jam_clears,
            },
        );
    }
    if let Some(face) = args.overrun {
        sim.inject(
            denomination_for(&config, face)?,
            HopperFault::Overrun { delay_ms: 40 },
        );
    }

    // Leave the samplers a moment to take their baseline.
    let mut at_ms = clock.now_ms() + 100;
    for &face in &args.coins {
        let denomination = denomination_for(&config, face)?;
        if !sim.insert(denomination, at_ms, false) {
            bail!("{face} cannot be inserted (no intake channel)");
        }
        at_ms += args.insert_gap_ms;
    }

    let queue = ControlQueue::new();
    if queue
        .try_send(ControlMsg::Command(AppCommand::StartCheckout {
            target: args.price,
        }))
        .is_err()
    {
        bail!("control queue rejected checkout");
    }

    info!(
        "coinbox-sim: price {}, inserting {:?}",
        args.price, args.coins
    );

    let hw = RefCell::new(sim);
    let sink = RefCell::new(RecordingSink::default());
    let deadline = clock.now_ms() + args.deadline_ms;
    let stop = async {
        while !sink.borrow().finished && clock.now_ms() < deadline {
            async_io_mini::Timer::after(Duration::from_millis(5)).await;
        }
    };

    let app = runtime::run(config, &hw, &sink, &clock, &queue, stop)?;

    let Some(record) = app.last_record() else {
        warn!("coinbox-sim: no session ended before the deadline");
        bail!("deadline of {}ms reached in {:?}", args.deadline_ms, app.state());
    };
    info!("coinbox-sim: session #{} ended", record.session_id());
    println!("{}", serde_json::to_string_pretty(record)?);
    Ok(())
}
