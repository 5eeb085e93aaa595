//! Controller runtime: sampling tasks and the control task.
//!
//! Two ways to drive the same pieces:
//!
//! - [`run`] spawns three cooperative tasks on an `edge-executor`
//!   [`LocalExecutor`](edge_executor::LocalExecutor), paced by
//!   `async-io-mini` timers:
//!
//! ```text
//!  ┌───────────────────────────────────────────────────────────┐
//!  │  LocalExecutor (single thread)                            │
//!  │  ┌──────────────┐  ┌──────────────┐                       │
//!  │  │ Intake loop  │  │ Feedback loop│   sample_period ⏱     │
//!  │  └──────┬───────┘  └──────┬───────┘                       │
//!  │         └────── ControlQueue ──────▶ ┌─────────────────┐  │
//!  │                  (bounded)           │  Control loop   │  │
//!  │  commands ─────────────────────────▶ │ wake-on-message │  │
//!  │                                      │ control_period ⏱│  │
//!  │                                      └─────────────────┘  │
//!  └───────────────────────────────────────────────────────────┘
//! ```
//!
//! - [`SyncLoop`] runs one sample-and-control step per call with an
//!   explicit timestamp, for deterministic tests and host simulation.
//!
//! In both, only the control side touches the [`AppService`].

use core::cell::RefCell;
use core::future::Future;
use core::time::Duration;

use log::{error, info};

use crate::app::ports::{Clock, EventSink, HopperPort, SensorPort};
use crate::app::service::AppService;
use crate::config::KioskConfig;
use crate::error::Result;
use crate::events::{drain_queue, ControlMsg, ControlQueue};
use crate::sensors::{FeedbackSampler, IntakeSampler};

fn enqueue(queue: &ControlQueue, msg: ControlMsg) {
    if let Err(e) = queue.try_send(msg) {
        error!("Control queue full, dropping {:?}", e);
    }
}

// ───────────────────────────────────────────────────────────────
// Synchronous stepping
// ───────────────────────────────────────────────────────────────

/// Samplers plus coordinator, stepped by the caller.
pub struct SyncLoop {
    app: AppService,
    intake: IntakeSampler,
    feedback: FeedbackSampler,
    control_period_ms: u64,
    next_tick_ms: u64,
}

impl SyncLoop {
    pub fn new(config: KioskConfig) -> Result<Self> {
        let intake = IntakeSampler::from_config(&config);
        let feedback = FeedbackSampler::from_config(&config);
        let control_period_ms = config.control_period_ms as u64;
        let mut app = AppService::new(config)?;
        app.start(0);
        Ok(Self {
            app,
            intake,
            feedback,
            control_period_ms,
            next_tick_ms: 0,
        })
    }

    /// One sample period: read every line, apply queued messages, and
    /// run the control tick when it is due.
    pub fn step<H, E>(&mut self, now_ms: u64, hw: &mut H, queue: &ControlQueue, sink: &mut E)
    where
        H: SensorPort + HopperPort,
        E: EventSink,
    {
        self.intake.sample(now_ms, hw, |m| enqueue(queue, m));
        self.feedback.sample(now_ms, hw, |m| enqueue(queue, m));

        let app = &mut self.app;
        drain_queue(queue, |m| app.handle_msg(m, now_ms, hw, sink));

        if now_ms >= self.next_tick_ms {
            self.app.tick(now_ms, hw, sink);
            self.next_tick_ms = now_ms + self.control_period_ms;
        }
    }

    pub fn app(&self) -> &AppService {
        &self.app
    }

    pub fn app_mut(&mut self) -> &mut AppService {
        &mut self.app
    }
}

// ───────────────────────────────────────────────────────────────
// Async tasks
// ───────────────────────────────────────────────────────────────

async fn intake_loop<H: SensorPort, C: Clock>(
    mut sampler: IntakeSampler,
    hw: &RefCell<H>,
    clock: &C,
    queue: &ControlQueue,
    period: Duration,
) {
    loop {
        sampler.sample(clock.now_ms(), &mut *hw.borrow_mut(), |m| enqueue(queue, m));
        async_io_mini::Timer::after(period).await;
    }
}

async fn feedback_loop<H: SensorPort, C: Clock>(
    mut sampler: FeedbackSampler,
    hw: &RefCell<H>,
    clock: &C,
    queue: &ControlQueue,
    period: Duration,
) {
    loop {
        sampler.sample(clock.now_ms(), &mut *hw.borrow_mut(), |m| enqueue(queue, m));
        async_io_mini::Timer::after(period).await;
    }
}

/// Wakes on every queued message and at least once per control period.
async fn control_loop<H: HopperPort, E: EventSink, C: Clock>(
    app: &RefCell<AppService>,
    hw: &RefCell<H>,
    sink: &RefCell<E>,
    clock: &C,
    queue: &ControlQueue,
    period_ms: u64,
) {
    let period = Duration::from_millis(period_ms);
    let mut next_tick_ms = clock.now_ms();
    loop {
        let msg = futures_lite::future::or(async { Some(queue.receive().await) }, async {
            async_io_mini::Timer::after(period).await;
            None
        })
        .await;

        let now = clock.now_ms();
        let mut app = app.borrow_mut();
        let mut hw = hw.borrow_mut();
        let mut sink = sink.borrow_mut();

        if let Some(msg) = msg {
            app.handle_msg(msg, now, &mut *hw, &mut *sink);
            drain_queue(queue, |m| app.handle_msg(m, now, &mut *hw, &mut *sink));
        }
        if now >= next_tick_ms {
            app.tick(now, &mut *hw, &mut *sink);
            next_tick_ms = now + period_ms;
        }
    }
}

/// Run the controller until `stop` resolves, then hand back the
/// coordinator for inspection.
///
/// Commands enter through `queue` like every other message; the caller
/// may push them before or during the run.
pub fn run<H, E, C, S>(
    config: KioskConfig,
    hw: &RefCell<H>,
    sink: &RefCell<E>,
    clock: &C,
    queue: &ControlQueue,
    stop: S,
) -> Result<AppService>
where
    H: SensorPort + HopperPort,
    E: EventSink,
    C: Clock,
    S: Future<Output = ()>,
{
    let sample_period = Duration::from_millis(config.sample_period_ms as u64);
    let control_period_ms = config.control_period_ms as u64;
    let intake = IntakeSampler::from_config(&config);
    let feedback = FeedbackSampler::from_config(&config);

    let mut app = AppService::new(config)?;
    app.start(clock.now_ms());
    let app = RefCell::new(app);

    {
        let executor: edge_executor::LocalExecutor<'_, 4> = edge_executor::LocalExecutor::new();

        executor
            .spawn(intake_loop(intake, hw, clock, queue, sample_period))
            .detach();
        executor
            .spawn(feedback_loop(feedback, hw, clock, queue, sample_period))
            .detach();
        executor
            .spawn(control_loop(&app, hw, sink, clock, queue, control_period_ms))
            .detach();

        info!(
            "Runtime started (sample {}ms, control {}ms)",
            sample_period.as_millis(),
            control_period_ms
        );
        futures_lite::future::block_on(executor.run(stop));
    }

    info!("Runtime stopped");
    Ok(app.into_inner())
}
