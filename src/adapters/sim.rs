//! Simulated kiosk hardware.
//!
//! An in-memory coin mechanism for the simulator binary and integration
//! tests.  Implements [`SensorPort`] and [`HopperPort`] against a
//! [`Clock`], so every read reflects the simulated time:
//!
//! - **Intake**: scripted insertions become active pulses on the wired
//!   channel (optionally with contact bounce).  Bills on a pulse-train
//!   channel become a burst of `face / pulse_value` pulses.
//! - **Hoppers**: while a motor output is active the hopper releases one
//!   coin every `release_period_ms`, each producing a feedback pulse.
//!   Jams, empty hoppers and a coin overrunning the motor stop can be
//!   injected.

use log::debug;

use crate::app::ports::{Clock, HopperPort, SensorPort};
use crate::config::{
    ChannelId, DenomId, IntakeMode, KioskConfig, LineId, Polarity,
};
use crate::error::{ActuatorError, SensorError};

/// Active time of a coin passing an intake sensor.
const COIN_PULSE_MS: u64 = 30;
/// Spacing of pulses in a bill validator burst.
const TRAIN_PERIOD_MS: u64 = 60;
/// Active time of a coin passing a hopper exit sensor.
const FEEDBACK_PULSE_MS: u64 = 12;
/// Contact chatter at the start of a bouncy pulse.
const BOUNCE_MS: u64 = 3;

#[derive(Debug, Clone, Copy)]
struct Pulse {
    channel: ChannelId,
    start_ms: u64,
    end_ms: u64,
    bounce: bool,
}

impl Pulse {
    fn active_at(&self, now_ms: u64) -> bool {
        if now_ms < self.start_ms || now_ms >= self.end_ms {
            return false;
        }
        let offset = now_ms - self.start_ms;
        !(self.bounce && offset < BOUNCE_MS && offset % 2 == 1)
    }
}

/// Hopper fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HopperFault {
    /// Stop releasing after `after` coins; a motor restart clears the jam
    /// when `clears_on_restart` is set.
    Jam { after: u32, clears_on_restart: bool },
    /// One extra coin falls `delay_ms` after the motor stops.
    Overrun { delay_ms: u64 },
}

#[derive(Debug, Clone)]
struct SimHopper {
    denomination: DenomId,
    line: LineId,
    polarity: Polarity,
    feedback_channel: ChannelId,
    coins: u32,
    running_since: Option<u64>,
    /// Coins released in the current motor run.
    released_this_run: u32,
    /// Coins released since the fault was armed.
    released_total: u32,
    fault: Option<HopperFault>,
    jammed: bool,
}

pub struct SimHardware<C: Clock> {
    clock: C,
    release_period_ms: u64,
    intake: Vec<(ChannelId, Polarity, IntakeMode)>,
    feedback_polarity: Vec<(ChannelId, Polarity)>,
    denominations: Vec<(DenomId, u32, Option<ChannelId>)>,
    hoppers: Vec<SimHopper>,
    pulses: Vec<Pulse>,
    failing_channel: Option<ChannelId>,
    writes: Vec<(LineId, bool)>,
}

impl<C: Clock> SimHardware<C> {
    pub fn new(config: &KioskConfig, clock: C) -> Self {
        let intake = config
            .channels
            .iter()
            .filter(|c| c.role.is_intake())
            .map(|c| (c.id, c.polarity, c.mode))
            .collect();
        let feedback_polarity = config
            .channels
            .iter()
            .filter(|c| !c.role.is_intake())
            .map(|c| (c.id, c.polarity))
            .collect();
        let denominations = config
            .denominations()
            .map(|(id, d)| (id, d.face_value, d.intake_channel))
            .collect();
        let hoppers = config
            .denominations()
            .filter_map(|(id, d)| {
                d.hopper.map(|h| SimHopper {
                    denomination: id,
                    line: h.output_line,
                    polarity: h.output_polarity,
                    feedback_channel: h.feedback_channel,
                    coins: h.initial_stock,
                    running_since: None,
                    released_this_run: 0,
                    released_total: 0,
                    fault: None,
                    jammed: false,
                })
            })
            .collect();

        Self {
            clock,
            release_period_ms: 80,
            intake,
            feedback_polarity,
            denominations,
            hoppers,
            pulses: Vec::new(),
            failing_channel: None,
            writes: Vec::new(),
        }
    }

    pub fn with_release_period(mut self, ms: u64) -> Self {
        self.release_period_ms = ms.max(FEEDBACK_PULSE_MS * 2);
        self
    }

    /// Schedule `denomination` to be inserted at `at_ms`.  Returns false
    /// if it cannot be inserted (no intake channel).
    pub fn insert(&mut self, denomination: DenomId, at_ms: u64, bounce: bool) -> bool {
        let Some(&(_, face, Some(channel))) =
            self.denominations.iter().find(|(id, _, _)| *id == denomination)
        else {
            return false;
        };
        let Some(&(_, _, mode)) = self.intake.iter().find(|(id, _, _)| *id == channel) else {
            return false;
        };
        let count = match mode {
            IntakeMode::Dedicated => 1,
            IntakeMode::PulseTrain { pulse_value, .. } => (face / pulse_value) as u64,
        };
        for i in 0..count {
            let start_ms = at_ms + i * TRAIN_PERIOD_MS;
            self.pulses.push(Pulse {
                channel,
                start_ms,
                end_ms: start_ms + COIN_PULSE_MS,
                bounce,
            });
        }
        true
    }

    /// Hold an intake line active from `at_ms` for `duration_ms`.
    pub fn hold_active(&mut self, channel: ChannelId, at_ms: u64, duration_ms: u64) {
        self.pulses.push(Pulse {
            channel,
            start_ms: at_ms,
            end_ms: at_ms + duration_ms,
            bounce: false,
        });
    }

    /// Arm a fault on the hopper for `denomination`.
    pub fn inject(&mut self, denomination: DenomId, fault: HopperFault) {
        if let Some(h) = self.hopper_mut(denomination) {
            h.fault = Some(fault);
            h.released_total = 0;
            h.jammed = false;
        }
    }

    /// Coins physically loaded in the simulated hopper.
    pub fn set_coins(&mut self, denomination: DenomId, coins: u32) {
        if let Some(h) = self.hopper_mut(denomination) {
            h.coins = coins;
        }
    }

    /// Make reads of `channel` fail.
    pub fn fail_channel(&mut self, channel: Option<ChannelId>) {
        self.failing_channel = channel;
    }

    pub fn coins(&self, denomination: DenomId) -> Option<u32> {
        self.hoppers
            .iter()
            .find(|h| h.denomination == denomination)
            .map(|h| h.coins)
    }

    pub fn is_running(&self, denomination: DenomId) -> bool {
        self.hoppers
            .iter()
            .any(|h| h.denomination == denomination && h.running_since.is_some())
    }

    /// Every output write, in order.
    pub fn writes(&self) -> &[(LineId, bool)] {
        &self.writes
    }

    fn hopper_mut(&mut self, denomination: DenomId) -> Option<&mut SimHopper> {
        self.hoppers
            .iter_mut()
            .find(|h| h.denomination == denomination)
    }

    /// Release every coin due up to `now_ms`.
    fn advance(&mut self, now_ms: u64) {
        let period = self.release_period_ms;
        for h in self.hoppers.iter_mut() {
            let Some(since) = h.running_since else {
                continue;
            };
            loop {
                let due = since + period * (h.released_this_run as u64 + 1);
                if due > now_ms || h.jammed || h.coins == 0 {
                    break;
                }
                if let Some(HopperFault::Jam { after, .. }) = h.fault {
                    if h.released_total >= after {
                        debug!("SIM hopper {:?}: jammed", h.denomination);
                        h.jammed = true;
                        break;
                    }
                }
                h.coins -= 1;
                h.released_this_run += 1;
                h.released_total += 1;
                self.pulses.push(Pulse {
                    channel: h.feedback_channel,
                    start_ms: due,
                    end_ms: due + FEEDBACK_PULSE_MS,
                    bounce: false,
                });
            }
        }
        self.pulses
            .retain(|p| p.end_ms + 1_000 > now_ms);
    }
}

impl<C: Clock> SensorPort for SimHardware<C> {
    fn read_level(&mut self, channel: ChannelId) -> Result<bool, SensorError> {
        if self.failing_channel == Some(channel) {
            return Err(SensorError::GpioReadFailed);
        }
        let polarity = self
            .intake
            .iter()
            .find(|(id, _, _)| *id == channel)
            .map(|(_, p, _)| *p)
            .or_else(|| {
                self.feedback_polarity
                    .iter()
                    .find(|(id, _)| *id == channel)
                    .map(|(_, p)| *p)
            })
            .ok_or(SensorError::UnknownChannel)?;

        let now = self.clock.now_ms();
        self.advance(now);
        let active = self
            .pulses
            .iter()
            .any(|p| p.channel == channel && p.active_at(now));
        Ok(polarity.level_for(active))
    }
}

impl<C: Clock> HopperPort for SimHardware<C> {
    fn set_output(&mut self, line: LineId, high: bool) -> Result<(), ActuatorError> {
        let now = self.clock.now_ms();
        self.advance(now);
        self.writes.push((line, high));

        let h = self
            .hoppers
            .iter_mut()
            .find(|h| h.line == line)
            .ok_or(ActuatorError::UnknownLine)?;
        let on = h.polarity.is_active(high);

        match (on, h.running_since) {
            (true, None) => {
                h.running_since = Some(now);
                h.released_this_run = 0;
                if let Some(HopperFault::Jam {
                    clears_on_restart: true,
                    ..
                }) = h.fault
                {
                    if h.jammed {
                        debug!("SIM hopper {:?}: jam cleared by restart", h.denomination);
                        h.fault = None;
                        h.jammed = false;
                    }
                }
            }
            (false, Some(_)) => {
                h.running_since = None;
                if let Some(HopperFault::Overrun { delay_ms }) = h.fault {
                    if h.coins > 0 {
                        h.coins -= 1;
                        h.fault = None;
                        let start_ms = now + delay_ms;
                        self.pulses.push(Pulse {
                            channel: h.feedback_channel,
                            start_ms,
                            end_ms: start_ms + FEEDBACK_PULSE_MS,
                            bounce: false,
                        });
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}
