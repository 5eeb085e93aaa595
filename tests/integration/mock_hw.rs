//! Mock hardware adapters for integration tests.
//!
//! Records every output write and every emitted event so tests can
//! assert on the full history without touching real GPIO.

use std::collections::HashMap;

use coinbox::app::events::KioskEvent;
use coinbox::app::ports::{EventSink, HopperPort, SensorPort};
use coinbox::config::{ChannelId, LineId};
use coinbox::error::{ActuatorError, SensorError};
use coinbox::events::FaultKind;

// ── MockHardware ──────────────────────────────────────────────

/// Output lines record every write; input lines idle high (active-low
/// wiring) unless set.
#[derive(Default)]
pub struct MockHardware {
    pub writes: Vec<(LineId, bool)>,
    pub levels: HashMap<ChannelId, bool>,
    /// Writes to this line fail.
    pub broken_line: Option<LineId>,
}

#[allow(dead_code)]
impl MockHardware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last level written to `line`, if any.
    pub fn output(&self, line: LineId) -> Option<bool> {
        self.writes
            .iter()
            .rev()
            .find(|(l, _)| *l == line)
            .map(|(_, high)| *high)
    }

    pub fn writes_to(&self, line: LineId) -> Vec<bool> {
        self.writes
            .iter()
            .filter(|(l, _)| *l == line)
            .map(|(_, high)| *high)
            .collect()
    }
}

impl HopperPort for MockHardware {
    fn set_output(&mut self, line: LineId, high: bool) -> Result<(), ActuatorError> {
        if self.broken_line == Some(line) {
            return Err(ActuatorError::GpioWriteFailed);
        }
        self.writes.push((line, high));
        Ok(())
    }
}

impl SensorPort for MockHardware {
    fn read_level(&mut self, channel: ChannelId) -> Result<bool, SensorError> {
        Ok(self.levels.get(&channel).copied().unwrap_or(true))
    }
}

// ── RecordingSink ─────────────────────────────────────────────

/// Collects every event in order.
#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<KioskEvent>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn faults(&self) -> Vec<FaultKind> {
        self.events
            .iter()
            .filter_map(|e| match e {
                KioskEvent::Fault(r) => Some(r.kind),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&KioskEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &KioskEvent) {
        self.events.push(event.clone());
    }
}
