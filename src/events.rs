//! Control-queue message vocabulary.
//!
//! Sampling tasks produce these; the coordinator consumes them one at a
//! time through a single bounded channel, so session state is only ever
//! mutated from one place.
//!
//! ```text
//! ┌──────────────────┐
//! │ Intake sampler   │──┐    ┌──────────────┐     ┌──────────────┐
//! └──────────────────┘  ├───▶│ ControlQueue │────▶│  AppService  │
//! ┌──────────────────┐  │    │  (bounded)   │     │  (consumer)  │
//! │ Feedback sampler │──┤    └──────────────┘     └──────────────┘
//! └──────────────────┘  │
//!   Commands ───────────┘
//! ```

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use serde::{Deserialize, Serialize};

use crate::app::commands::AppCommand;
use crate::app::session::SessionId;
use crate::config::{Amount, ChannelId, DenomId};

/// Queue depth.  A full pulse train plus a burst of coins on every
/// intake channel fits comfortably.
pub const CONTROL_QUEUE_DEPTH: usize = 64;

/// The serialized entry point into the coordinator.
pub type ControlQueue = Channel<CriticalSectionRawMutex, ControlMsg, CONTROL_QUEUE_DEPTH>;

/// One accepted coin or bill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntakeEvent {
    pub denomination: DenomId,
    pub face_value: Amount,
    pub timestamp_ms: u64,
}

/// One debounced feedback pulse from a hopper exit sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedbackPulse {
    pub denomination: DenomId,
    pub timestamp_ms: u64,
}

/// Fault and anomaly categories reported to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultKind {
    /// Intake line held active past the stuck threshold.
    StuckSensor,
    /// Hopper stopped producing feedback pulses and retries ran out.
    Stall,
    /// Hopper released more coins than requested.
    Overdispense,
    /// Change could not be made exactly from stock.
    NoExactChange,
    /// Feedback pulse with no dispense in progress.
    SpuriousFeedback,
    /// Pulse train whose value matches no denomination.
    UnrecognizedPulseTrain,
    /// Coin or bill inserted outside a collecting session.
    UnexpectedIntake,
    /// A sensor line read failed.
    SensorReadFailed,
    /// An output line write failed.
    ActuatorFailed,
}

impl FaultKind {
    /// Transient anomalies are logged and excluded; they never end a session.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::StuckSensor
                | Self::SpuriousFeedback
                | Self::UnrecognizedPulseTrain
                | Self::UnexpectedIntake
                | Self::SensorReadFailed
        )
    }
}

/// Where and when a fault happened.  Fields that do not apply are `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FaultContext {
    pub timestamp_ms: u64,
    pub channel: Option<ChannelId>,
    pub denomination: Option<DenomId>,
    pub session_id: Option<SessionId>,
    /// Money involved (unrecognized train value, shortfall, credit).
    pub amount: Option<Amount>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultReport {
    pub kind: FaultKind,
    pub context: FaultContext,
}

impl FaultReport {
    pub fn new(kind: FaultKind, timestamp_ms: u64) -> Self {
        Self {
            kind,
            context: FaultContext {
                timestamp_ms,
                ..FaultContext::default()
            },
        }
    }

    pub fn on_channel(mut self, channel: ChannelId) -> Self {
        self.context.channel = Some(channel);
        self
    }

    pub fn for_denomination(mut self, denomination: DenomId) -> Self {
        self.context.denomination = Some(denomination);
        self
    }

    pub fn in_session(mut self, session_id: SessionId) -> Self {
        self.context.session_id = Some(session_id);
        self
    }

    pub fn with_amount(mut self, amount: Amount) -> Self {
        self.context.amount = Some(amount);
        self
    }
}

/// Everything that can arrive at the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMsg {
    Intake(IntakeEvent),
    Feedback(FeedbackPulse),
    Fault(FaultReport),
    Command(AppCommand),
}

/// Drain every queued message into `handler` in FIFO order.
pub fn drain_queue(queue: &ControlQueue, mut handler: impl FnMut(ControlMsg)) {
    while let Ok(msg) = queue.try_receive() {
        handler(msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_preserves_fifo_order() {
        let queue = ControlQueue::new();
        for ts in 0..3u64 {
            let pulse = FeedbackPulse {
                denomination: DenomId(0),
                timestamp_ms: ts,
            };
            assert!(queue.try_send(ControlMsg::Feedback(pulse)).is_ok());
        }

        let mut seen = Vec::new();
        drain_queue(&queue, |msg| {
            if let ControlMsg::Feedback(p) = msg {
                seen.push(p.timestamp_ms);
            }
        });
        assert_eq!(seen, vec![0, 1, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn transient_classification() {
        assert!(FaultKind::StuckSensor.is_transient());
        assert!(FaultKind::SpuriousFeedback.is_transient());
        assert!(!FaultKind::Overdispense.is_transient());
        assert!(!FaultKind::Stall.is_transient());
        assert!(!FaultKind::NoExactChange.is_transient());
    }

    #[test]
    fn report_builder_fills_context() {
        let r = FaultReport::new(FaultKind::StuckSensor, 42)
            .on_channel(4)
            .with_amount(10);
        assert_eq!(r.context.timestamp_ms, 42);
        assert_eq!(r.context.channel, Some(4));
        assert_eq!(r.context.amount, Some(10));
        assert_eq!(r.context.denomination, None);
    }
}
