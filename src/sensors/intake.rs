//! Coin and bill intake counter.
//!
//! Consumes debounced transitions from intake channels and turns them into
//! [`IntakeEvent`]s.  A unit is counted on the idle→active edge only (the
//! "coin present" pulse start; high→low for the usual active-low sensor)
//! and carries that edge's timestamp.
//!
//! ## Channel modes
//!
//! | Mode         | Counting                                          |
//! |--------------|---------------------------------------------------|
//! | `Dedicated`  | Each active edge is one unit of the wired coin,   |
//! |              | released once the line returns to idle in time    |
//! | `PulseTrain` | Edges accumulate; the train closes after a quiet  |
//! |              | gap and `pulses × pulse_value` picks the unit     |
//!
//! ## Stuck sensors
//!
//! A line held active past `stuck_after_ms` is reported once, its pending
//! unit is dropped, and it is ignored until it goes idle again.  A line
//! that is already active on the very first sample is treated the same
//! way, so a shorted sensor is never counted as a coin.

use heapless::Vec;
use log::{info, warn};

use crate::config::{
    Amount, ChannelId, DenomId, IntakeMode, KioskConfig, MAX_DENOMINATIONS, Polarity,
};
use crate::events::{FaultKind, FaultReport, IntakeEvent};

use super::debounce::DebouncedTransition;

/// Output of the intake counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeOutput {
    Accepted(IntakeEvent),
    Fault(FaultReport),
}

#[derive(Debug, Clone)]
enum Classifier {
    Dedicated {
        denomination: DenomId,
        face_value: Amount,
    },
    PulseTrain {
        pulse_value: Amount,
        gap_ms: u32,
        /// `(face_value, denomination)` routed to this channel.
        table: Vec<(Amount, DenomId), MAX_DENOMINATIONS>,
    },
}

#[derive(Debug, Clone, Copy)]
struct Train {
    pulses: u32,
    last_pulse_ms: u64,
}

#[derive(Debug, Clone)]
struct IntakeChannel {
    id: ChannelId,
    polarity: Polarity,
    classifier: Classifier,
    /// Time the line went active, while it is active.
    active_since: Option<u64>,
    stuck: bool,
    /// Dedicated unit seen on the active edge, held until the line idles.
    pending: Option<IntakeEvent>,
    train: Option<Train>,
}

impl IntakeChannel {
    fn on_active_edge(&mut self, at_ms: u64) {
        match &self.classifier {
            Classifier::Dedicated {
                denomination,
                face_value,
            } => {
                self.pending = Some(IntakeEvent {
                    denomination: *denomination,
                    face_value: *face_value,
                    timestamp_ms: at_ms,
                });
            }
            Classifier::PulseTrain { .. } => {
                let train = self.train.get_or_insert(Train {
                    pulses: 0,
                    last_pulse_ms: at_ms,
                });
                train.pulses += 1;
                train.last_pulse_ms = at_ms;
            }
        }
    }

    /// Close an open pulse train once its quiet gap has elapsed.
    fn close_train(&mut self, now_ms: u64) -> Option<IntakeOutput> {
        let Classifier::PulseTrain {
            pulse_value,
            gap_ms,
            table,
        } = &self.classifier
        else {
            return None;
        };
        let train = self.train?;
        // Still mid-pulse or inside the gap.
        if self.active_since.is_some()
            || now_ms.saturating_sub(train.last_pulse_ms) < *gap_ms as u64
        {
            return None;
        }
        self.train = None;

        let value = train.pulses * pulse_value;
        match table.iter().find(|(face, _)| *face == value) {
            Some(&(face_value, denomination)) => Some(IntakeOutput::Accepted(IntakeEvent {
                denomination,
                face_value,
                timestamp_ms: train.last_pulse_ms,
            })),
            None => {
                warn!(
                    "INTAKE ch{}: {} pulses ({}) match no denomination",
                    self.id, train.pulses, value
                );
                Some(IntakeOutput::Fault(
                    FaultReport::new(FaultKind::UnrecognizedPulseTrain, now_ms)
                        .on_channel(self.id)
                        .with_amount(value),
                ))
            }
        }
    }
}

/// Counts units across every intake channel.
pub struct IntakeCounter {
    channels: std::vec::Vec<IntakeChannel>,
    stuck_after_ms: u32,
}

impl IntakeCounter {
    /// Build one counter per intake channel in `config`.
    pub fn from_config(config: &KioskConfig) -> Self {
        let channels = config
            .channels
            .iter()
            .filter(|c| c.role.is_intake())
            .filter_map(|c| {
                let classifier = match c.mode {
                    IntakeMode::Dedicated => {
                        // Validated config maps every intake channel.
                        let (denomination, d) = config.denominations_on(c.id).next()?;
                        Classifier::Dedicated {
                            denomination,
                            face_value: d.face_value,
                        }
                    }
                    IntakeMode::PulseTrain {
                        pulse_value,
                        train_gap_ms,
                    } => {
                        let mut table = Vec::new();
                        for (id, d) in config.denominations_on(c.id) {
                            // Capacity matches MAX_DENOMINATIONS; validated config never overflows.
                            let _ = table.push((d.face_value, id));
                        }
                        Classifier::PulseTrain {
                            pulse_value,
                            gap_ms: train_gap_ms,
                            table,
                        }
                    }
                };
                Some(IntakeChannel {
                    id: c.id,
                    polarity: c.polarity,
                    classifier,
                    active_since: None,
                    stuck: false,
                    pending: None,
                    train: None,
                })
            })
            .collect();

        Self {
            channels,
            stuck_after_ms: config.stuck_sensor_ms,
        }
    }

    /// Channels this counter listens to.
    pub fn channel_ids(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.channels.iter().map(|c| c.id)
    }

    /// Record the baseline level seen on the first sample of `channel`.
    /// Never counts; a line that starts active is tracked for stuck detection.
    pub fn on_baseline(&mut self, channel: ChannelId, level: bool, now_ms: u64) {
        if let Some(ch) = self.channel_mut(channel) {
            if ch.polarity.is_active(level) {
                warn!("INTAKE ch{}: active at power-up, not counted", channel);
                ch.active_since = Some(now_ms);
            }
        }
    }

    /// Process one debounced transition.
    pub fn on_transition(&mut self, tr: &DebouncedTransition) -> Option<IntakeOutput> {
        let ch = self.channel_mut(tr.channel)?;

        if ch.polarity.is_active(tr.new_level) {
            ch.active_since = Some(tr.timestamp_ms);
            ch.on_active_edge(tr.timestamp_ms);
            None
        } else {
            ch.active_since = None;
            if ch.stuck {
                ch.stuck = false;
                info!("INTAKE ch{}: stuck line released, counting resumed", ch.id);
            }
            ch.pending.take().map(IntakeOutput::Accepted)
        }
    }

    /// Time-driven checks: stuck lines and pulse-train closure.
    pub fn poll(&mut self, now_ms: u64, mut emit: impl FnMut(IntakeOutput)) {
        let stuck_after = self.stuck_after_ms as u64;
        for ch in self.channels.iter_mut() {
            if let Some(since) = ch.active_since {
                if !ch.stuck && now_ms.saturating_sub(since) > stuck_after {
                    ch.stuck = true;
                    if ch.train.take().is_some() {
                        warn!("INTAKE ch{}: open pulse train discarded", ch.id);
                    }
                    if ch.pending.take().is_some() {
                        warn!("INTAKE ch{}: pending unit discarded", ch.id);
                    }
                    warn!(
                        "INTAKE ch{}: held active {}ms, marked stuck",
                        ch.id,
                        now_ms - since
                    );
                    emit(IntakeOutput::Fault(
                        FaultReport::new(FaultKind::StuckSensor, now_ms).on_channel(ch.id),
                    ));
                }
            }
            if let Some(out) = ch.close_train(now_ms) {
                emit(out);
            }
        }
    }

    fn channel_mut(&mut self, channel: ChannelId) -> Option<&mut IntakeChannel> {
        self.channels.iter_mut().find(|c| c.id == channel)
    }
}
