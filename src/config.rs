//! Controller configuration.
//!
//! Every tunable parameter for the payment controller lives here.  The
//! configuration arrives already parsed (the kiosk shell owns file and
//! network loading) and is immutable once handed to the controller.
//! [`KioskConfig::validate`] rejects bad values instead of clamping them.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::pins;

/// Money amount in the smallest currency unit.
pub type Amount = u32;

/// Physical input line identifier (GPIO number on the reference board).
pub type ChannelId = u8;

/// Physical output line identifier.
pub type LineId = u8;

/// Upper bound on configured denominations.  Sizes every fixed-capacity
/// collection keyed by denomination (plans, outcomes, stock).
pub const MAX_DENOMINATIONS: usize = 8;

/// Index of a denomination in [`KioskConfig::denominations`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DenomId(pub u8);

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

/// Which electrical level means "something is there".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Polarity {
    /// Idle high, active low (open-collector sensors with pull-up).
    ActiveLow,
    /// Idle low, active high.
    ActiveHigh,
}

impl Polarity {
    /// True if the raw `level` (true = high) is the active level.
    pub fn is_active(self, level: bool) -> bool {
        match self {
            Self::ActiveLow => !level,
            Self::ActiveHigh => level,
        }
    }

    /// Raw level to drive or expect for the given logical state.
    pub fn level_for(self, active: bool) -> bool {
        match self {
            Self::ActiveLow => !active,
            Self::ActiveHigh => active,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelRole {
    CoinIntake,
    BillIntake,
    HopperFeedback,
}

impl ChannelRole {
    pub fn is_intake(self) -> bool {
        matches!(self, Self::CoinIntake | Self::BillIntake)
    }
}

/// How pulses on an intake channel map to denominations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntakeMode {
    /// One pulse is one unit of the single denomination wired here.
    Dedicated,
    /// A burst of pulses encodes value: `pulses × pulse_value`.  The burst
    /// closes once `train_gap_ms` passes without a new pulse.
    PulseTrain { pulse_value: Amount, train_gap_ms: u32 },
}

/// A physical input line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorChannel {
    pub id: ChannelId,
    pub role: ChannelRole,
    pub polarity: Polarity,
    /// Minimum stable duration before a level change is accepted.
    pub debounce_ms: u32,
    /// Ignored for feedback channels.
    pub mode: IntakeMode,
}

// ---------------------------------------------------------------------------
// Denominations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DenominationKind {
    Coin,
    Bill,
}

/// Coin hopper wiring and capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopperSpec {
    pub output_line: LineId,
    pub output_polarity: Polarity,
    pub feedback_channel: ChannelId,
    pub capacity: u32,
    /// Coins loaded at power-up.
    pub initial_stock: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Denomination {
    pub kind: DenominationKind,
    pub face_value: Amount,
    /// Intake channel, if this denomination can be inserted.
    pub intake_channel: Option<ChannelId>,
    /// Dispensing hopper (coins only).
    pub hopper: Option<HopperSpec>,
}

// ---------------------------------------------------------------------------
// Hopper timing
// ---------------------------------------------------------------------------

/// Hopper dispense timing.  Defaults are explicit in [`Default`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopperTiming {
    /// Longest wait for the next feedback pulse while the motor runs.
    pub unit_timeout_ms: u32,
    /// Motor restarts allowed after a stall before the hopper faults.
    pub max_retries: u8,
    /// Motor-off window after the last requested coin in which a further
    /// feedback pulse is treated as overdispense.
    pub verify_window_ms: u32,
}

impl Default for HopperTiming {
    fn default() -> Self {
        Self {
            unit_timeout_ms: 2000,
            max_retries: 2,
            verify_window_ms: 150,
        }
    }
}

// ---------------------------------------------------------------------------
// KioskConfig
// ---------------------------------------------------------------------------

/// Core controller configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KioskConfig {
    // --- Timing ---
    /// Raw sensor sampling period (milliseconds).
    pub sample_period_ms: u32,
    /// Coordinator control tick period (milliseconds).
    pub control_period_ms: u32,

    // --- Wiring ---
    pub channels: Vec<SensorChannel>,
    pub denominations: Vec<Denomination>,

    // --- Hoppers ---
    pub hopper: HopperTiming,
    /// Remaining coins at or below which a `StockLow` event fires.
    pub low_stock_threshold: u32,

    // --- Fault detection ---
    /// An intake line held active longer than this is a stuck sensor.
    pub stuck_sensor_ms: u32,

    // --- Sessions ---
    /// Collecting sessions older than this are cancelled.  `None` disables.
    pub collection_timeout_ms: Option<u32>,
}

impl Default for KioskConfig {
    fn default() -> Self {
        use ChannelRole::*;

        let intake = |id, role| SensorChannel {
            id,
            role,
            polarity: Polarity::ActiveLow,
            debounce_ms: 5,
            mode: IntakeMode::Dedicated,
        };
        let feedback = |id| SensorChannel {
            id,
            role: HopperFeedback,
            polarity: Polarity::ActiveLow,
            debounce_ms: 3,
            mode: IntakeMode::Dedicated,
        };
        let coin = |face_value, sense, motor, fb| Denomination {
            kind: DenominationKind::Coin,
            face_value,
            intake_channel: Some(sense),
            hopper: Some(HopperSpec {
                output_line: motor,
                output_polarity: Polarity::ActiveHigh,
                feedback_channel: fb,
                capacity: 500,
                initial_stock: 200,
            }),
        };
        let bill = |face_value| Denomination {
            kind: DenominationKind::Bill,
            face_value,
            intake_channel: Some(pins::BILL_PULSE_GPIO),
            hopper: None,
        };

        Self {
            sample_period_ms: 1,
            control_period_ms: 10,

            channels: vec![
                intake(pins::COIN_1_SENSE_GPIO, CoinIntake),
                intake(pins::COIN_5_SENSE_GPIO, CoinIntake),
                intake(pins::COIN_10_SENSE_GPIO, CoinIntake),
                SensorChannel {
                    // Validator emits one pulse per 10 pesos.
                    mode: IntakeMode::PulseTrain {
                        pulse_value: 10,
                        train_gap_ms: 200,
                    },
                    ..intake(pins::BILL_PULSE_GPIO, BillIntake)
                },
                feedback(pins::HOPPER_1_FEEDBACK_GPIO),
                feedback(pins::HOPPER_5_FEEDBACK_GPIO),
                feedback(pins::HOPPER_10_FEEDBACK_GPIO),
            ],
            denominations: vec![
                coin(
                    1,
                    pins::COIN_1_SENSE_GPIO,
                    pins::HOPPER_1_MOTOR_GPIO,
                    pins::HOPPER_1_FEEDBACK_GPIO,
                ),
                coin(
                    5,
                    pins::COIN_5_SENSE_GPIO,
                    pins::HOPPER_5_MOTOR_GPIO,
                    pins::HOPPER_5_FEEDBACK_GPIO,
                ),
                coin(
                    10,
                    pins::COIN_10_SENSE_GPIO,
                    pins::HOPPER_10_MOTOR_GPIO,
                    pins::HOPPER_10_FEEDBACK_GPIO,
                ),
                bill(20),
                bill(50),
                bill(100),
            ],

            hopper: HopperTiming::default(),
            low_stock_threshold: 20,

            stuck_sensor_ms: 2000,
            collection_timeout_ms: Some(120_000),
        }
    }
}

impl KioskConfig {
    /// Look up a channel by id.
    pub fn channel(&self, id: ChannelId) -> Option<&SensorChannel> {
        self.channels.iter().find(|c| c.id == id)
    }

    /// Look up a denomination by id.
    pub fn denomination(&self, id: DenomId) -> Option<&Denomination> {
        self.denominations.get(id.0 as usize)
    }

    /// Iterate `(id, denomination)` pairs.
    pub fn denominations(&self) -> impl Iterator<Item = (DenomId, &Denomination)> {
        self.denominations
            .iter()
            .enumerate()
            .map(|(i, d)| (DenomId(i as u8), d))
    }

    /// Denominations counted on `channel`.
    pub fn denominations_on(&self, channel: ChannelId) -> impl Iterator<Item = (DenomId, &Denomination)> {
        self.denominations()
            .filter(move |(_, d)| d.intake_channel == Some(channel))
    }

    /// The denomination whose hopper reports on feedback `channel`.
    pub fn hopper_for_feedback(&self, channel: ChannelId) -> Option<DenomId> {
        self.denominations()
            .find(|(_, d)| d.hopper.is_some_and(|h| h.feedback_channel == channel))
            .map(|(id, _)| id)
    }

    /// Check every cross-reference and range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        use ConfigError::ValidationFailed as Invalid;

        if self.sample_period_ms == 0 {
            return Err(Invalid("sample_period_ms must be > 0"));
        }
        if self.control_period_ms == 0 {
            return Err(Invalid("control_period_ms must be > 0"));
        }
        if self.stuck_sensor_ms == 0 {
            return Err(Invalid("stuck_sensor_ms must be > 0"));
        }
        if self.hopper.unit_timeout_ms == 0 {
            return Err(Invalid("hopper.unit_timeout_ms must be > 0"));
        }
        if self.collection_timeout_ms == Some(0) {
            return Err(Invalid("collection_timeout_ms must be > 0 when set"));
        }
        if self.denominations.is_empty() {
            return Err(Invalid("at least one denomination required"));
        }
        if self.denominations.len() > MAX_DENOMINATIONS {
            return Err(Invalid("too many denominations"));
        }

        for (i, ch) in self.channels.iter().enumerate() {
            if self.channels[..i].iter().any(|c| c.id == ch.id) {
                return Err(Invalid("duplicate channel id"));
            }
            if ch.debounce_ms == 0 {
                return Err(Invalid("debounce_ms must be > 0"));
            }
            if ch.debounce_ms < self.sample_period_ms {
                return Err(Invalid("debounce_ms shorter than sample period"));
            }
            if let IntakeMode::PulseTrain {
                pulse_value,
                train_gap_ms,
            } = ch.mode
            {
                if !ch.role.is_intake() {
                    return Err(Invalid("pulse-train mode on a feedback channel"));
                }
                if pulse_value == 0 || train_gap_ms == 0 {
                    return Err(Invalid("pulse train needs non-zero value and gap"));
                }
            }
        }

        for (id, d) in self.denominations() {
            if d.face_value == 0 {
                return Err(Invalid("face_value must be > 0"));
            }
            if let Some(ch_id) = d.intake_channel {
                let ch = self
                    .channel(ch_id)
                    .ok_or(Invalid("intake_channel not configured"))?;
                if !ch.role.is_intake() {
                    return Err(Invalid("intake_channel is not an intake channel"));
                }
                match ch.mode {
                    IntakeMode::Dedicated => {
                        if self.denominations_on(ch_id).any(|(other, _)| other != id) {
                            return Err(Invalid("dedicated channel shared by denominations"));
                        }
                    }
                    IntakeMode::PulseTrain { pulse_value, .. } => {
                        if d.face_value % pulse_value != 0 {
                            return Err(Invalid("face_value not a multiple of pulse_value"));
                        }
                    }
                }
            }
            if let Some(h) = d.hopper {
                if d.kind != DenominationKind::Coin {
                    return Err(Invalid("only coins can have a hopper"));
                }
                let fb = self
                    .channel(h.feedback_channel)
                    .ok_or(Invalid("hopper feedback channel not configured"))?;
                if fb.role != ChannelRole::HopperFeedback {
                    return Err(Invalid("hopper feedback channel has wrong role"));
                }
                if h.initial_stock > h.capacity {
                    return Err(Invalid("initial_stock exceeds capacity"));
                }
                let shared = self.denominations().any(|(other, o)| {
                    other != id
                        && o.hopper.is_some_and(|oh| {
                            oh.output_line == h.output_line
                                || oh.feedback_channel == h.feedback_channel
                        })
                });
                if shared {
                    return Err(Invalid("hoppers must not share output or feedback lines"));
                }
            }
        }

        if self
            .channels
            .iter()
            .any(|c| c.role.is_intake() && self.denominations_on(c.id).next().is_none())
        {
            return Err(Invalid("intake channel has no denomination"));
        }

        Ok(())
    }
}
