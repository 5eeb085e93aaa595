//! Hopper stock ledger.
//!
//! Tracks coins on hand per dispensable denomination.  Starts from each
//! hopper's `initial_stock`, drops by verified dispensed counts only, and
//! never exceeds hopper capacity.

use heapless::Vec;
use log::info;

use crate::config::{Amount, DenomId, KioskConfig, MAX_DENOMINATIONS};
use crate::control::change::StockEntry;
use crate::error::CommandError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockLevel {
    pub denomination: DenomId,
    pub face_value: Amount,
    pub count: u32,
    pub capacity: u32,
}

#[derive(Debug, Clone)]
pub struct StockLedger {
    levels: Vec<StockLevel, MAX_DENOMINATIONS>,
    low_threshold: u32,
}

impl StockLedger {
    pub fn from_config(config: &KioskConfig) -> Self {
        let levels = config
            .denominations()
            .filter_map(|(id, d)| {
                d.hopper.map(|h| StockLevel {
                    denomination: id,
                    face_value: d.face_value,
                    count: h.initial_stock.min(h.capacity),
                    capacity: h.capacity,
                })
            })
            .take(MAX_DENOMINATIONS)
            .collect();
        Self {
            levels,
            low_threshold: config.low_stock_threshold,
        }
    }

    /// Snapshot for the change calculator.
    pub fn snapshot(&self) -> Vec<StockEntry, MAX_DENOMINATIONS> {
        self.levels
            .iter()
            .map(|l| StockEntry {
                denomination: l.denomination,
                face_value: l.face_value,
                available: l.count,
            })
            .collect()
    }

    pub fn level(&self, denomination: DenomId) -> Option<&StockLevel> {
        self.levels.iter().find(|l| l.denomination == denomination)
    }

    pub fn levels(&self) -> &[StockLevel] {
        &self.levels
    }

    /// Add coins, capped at capacity.  Returns the new count.
    pub fn refill(&mut self, denomination: DenomId, count: u32) -> Result<u32, CommandError> {
        let level = self
            .levels
            .iter_mut()
            .find(|l| l.denomination == denomination)
            .ok_or(CommandError::NoHopper)?;
        level.count = level.count.saturating_add(count).min(level.capacity);
        info!(
            "STOCK {:?}: refilled to {}/{}",
            denomination, level.count, level.capacity
        );
        Ok(level.count)
    }

    /// Remove verified dispensed coins.  Returns the new count.
    pub fn consume(&mut self, denomination: DenomId, count: u32) -> Option<u32> {
        let level = self
            .levels
            .iter_mut()
            .find(|l| l.denomination == denomination)?;
        level.count = level.count.saturating_sub(count);
        Some(level.count)
    }

    pub fn is_low(&self, denomination: DenomId) -> bool {
        self.level(denomination)
            .is_some_and(|l| l.count <= self.low_threshold)
    }
}
