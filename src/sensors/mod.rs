//! Sensor subsystem: debouncers, the intake counter, and the two
//! samplers that feed the control queue.
//!
//! Each sampler owns the debouncers for its channel group and is polled
//! once per sample period.  Its output is a stream of [`ControlMsg`]s;
//! nothing here touches session state.
//!
//! | Sampler           | Channels        | Emits                         |
//! |-------------------|-----------------|-------------------------------|
//! | [`IntakeSampler`] | coin/bill lines | `Intake`, `Fault`             |
//! | [`FeedbackSampler`] | hopper exits  | `Feedback`, `Fault`           |

pub mod debounce;
pub mod intake;

use log::{info, warn};

use crate::app::ports::SensorPort;
use crate::config::{ChannelId, DenomId, KioskConfig, Polarity};
use crate::events::{ControlMsg, FaultKind, FaultReport, FeedbackPulse};
use debounce::{DebouncedTransition, EdgeDebouncer};
use intake::{IntakeCounter, IntakeOutput};

impl From<IntakeOutput> for ControlMsg {
    fn from(out: IntakeOutput) -> Self {
        match out {
            IntakeOutput::Accepted(event) => ControlMsg::Intake(event),
            IntakeOutput::Fault(report) => ControlMsg::Fault(report),
        }
    }
}

/// What one raw read produced.
enum Sampled {
    /// First good sample: the baseline level.
    Baseline(bool),
    Transition(DebouncedTransition),
    Nothing,
}

/// A debounced input line with read-failure tracking.
struct SampledChannel {
    debouncer: EdgeDebouncer,
    /// Set while reads keep failing; one fault per failure streak.
    failing: bool,
}

impl SampledChannel {
    fn new(channel: ChannelId, debounce_ms: u32) -> Self {
        Self {
            debouncer: EdgeDebouncer::new(channel, debounce_ms),
            failing: false,
        }
    }

    fn read(
        &mut self,
        now_ms: u64,
        port: &mut impl SensorPort,
        emit: &mut impl FnMut(ControlMsg),
    ) -> Sampled {
        let channel = self.debouncer.channel();
        let level = match port.read_level(channel) {
            Ok(level) => level,
            Err(e) => {
                if !self.failing {
                    self.failing = true;
                    warn!("SENSOR ch{}: read failed: {}", channel, e);
                    emit(ControlMsg::Fault(
                        FaultReport::new(FaultKind::SensorReadFailed, now_ms).on_channel(channel),
                    ));
                }
                return Sampled::Nothing;
            }
        };
        if self.failing {
            self.failing = false;
            info!("SENSOR ch{}: reads recovered", channel);
        }

        let first = self.debouncer.settled().is_none();
        match self.debouncer.sample(now_ms, level) {
            Some(tr) => Sampled::Transition(tr),
            None if first => Sampled::Baseline(level),
            None => Sampled::Nothing,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Intake
// ───────────────────────────────────────────────────────────────

/// Samples every coin and bill intake line.
pub struct IntakeSampler {
    channels: Vec<SampledChannel>,
    counter: IntakeCounter,
}

impl IntakeSampler {
    pub fn from_config(config: &KioskConfig) -> Self {
        let channels = config
            .channels
            .iter()
            .filter(|c| c.role.is_intake())
            .map(|c| SampledChannel::new(c.id, c.debounce_ms))
            .collect();
        Self {
            channels,
            counter: IntakeCounter::from_config(config),
        }
    }

    /// Read every intake line once and run the time-driven checks.
    pub fn sample(
        &mut self,
        now_ms: u64,
        port: &mut impl SensorPort,
        mut emit: impl FnMut(ControlMsg),
    ) {
        for ch in self.channels.iter_mut() {
            match ch.read(now_ms, port, &mut emit) {
                Sampled::Baseline(level) => {
                    self.counter
                        .on_baseline(ch.debouncer.channel(), level, now_ms)
                }
                Sampled::Transition(tr) => {
                    if let Some(out) = self.counter.on_transition(&tr) {
                        emit(out.into());
                    }
                }
                Sampled::Nothing => {}
            }
        }
        self.counter.poll(now_ms, |out| emit(out.into()));
    }
}

// ───────────────────────────────────────────────────────────────
// Hopper feedback
// ───────────────────────────────────────────────────────────────

struct FeedbackChannel {
    input: SampledChannel,
    polarity: Polarity,
    denomination: DenomId,
}

/// Samples every hopper exit sensor.  One pulse is one coin out.
pub struct FeedbackSampler {
    channels: Vec<FeedbackChannel>,
}

impl FeedbackSampler {
    pub fn from_config(config: &KioskConfig) -> Self {
        let channels = config
            .channels
            .iter()
            .filter_map(|c| {
                let denomination = config.hopper_for_feedback(c.id)?;
                Some(FeedbackChannel {
                    input: SampledChannel::new(c.id, c.debounce_ms),
                    polarity: c.polarity,
                    denomination,
                })
            })
            .collect();
        Self { channels }
    }

    pub fn sample(
        &mut self,
        now_ms: u64,
        port: &mut impl SensorPort,
        mut emit: impl FnMut(ControlMsg),
    ) {
        for ch in self.channels.iter_mut() {
            if let Sampled::Transition(tr) = ch.input.read(now_ms, port, &mut emit) {
                if ch.polarity.is_active(tr.new_level) {
                    emit(ControlMsg::Feedback(FeedbackPulse {
                        denomination: ch.denomination,
                        timestamp_ms: tr.timestamp_ms,
                    }));
                }
            }
        }
    }
}
