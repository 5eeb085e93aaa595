//! Change calculator.
//!
//! Greedy, largest face value first, limited by what each hopper holds.
//! Either the plan pays out the change exactly or no plan is returned at
//! all; a partial plan never reaches the hoppers.
//!
//! With limited stock greedy is not optimal for every coin system, but
//! it is exact whenever each face value divides the next larger one
//! (1/5/10, 1/2/5/10 …), which is how kiosk hopper sets are chosen.

use heapless::Vec;
use serde::{Deserialize, Serialize};

use crate::config::{Amount, DenomId, MAX_DENOMINATIONS};
use crate::error::ChangeError;

/// Coins of one denomination in a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLine {
    pub denomination: DenomId,
    pub face_value: Amount,
    pub count: u32,
}

/// Coins to dispense, largest face value first.  Lines with zero count
/// are omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispensePlan {
    lines: Vec<PlanLine, MAX_DENOMINATIONS>,
    total: Amount,
}

impl DispensePlan {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> &[PlanLine] {
        &self.lines
    }

    pub fn total(&self) -> Amount {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Coins planned for `denomination`.
    pub fn count_for(&self, denomination: DenomId) -> u32 {
        self.lines
            .iter()
            .find(|l| l.denomination == denomination)
            .map_or(0, |l| l.count)
    }
}

/// Stock snapshot entry for one dispensable denomination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockEntry {
    pub denomination: DenomId,
    pub face_value: Amount,
    pub available: u32,
}

/// Plan `amount` in change from `stock`.
pub fn plan_change(amount: Amount, stock: &[StockEntry]) -> Result<DispensePlan, ChangeError> {
    let mut order: Vec<&StockEntry, MAX_DENOMINATIONS> = stock
        .iter()
        .filter(|s| s.face_value > 0)
        .take(MAX_DENOMINATIONS)
        .collect();
    order.sort_unstable_by(|a, b| b.face_value.cmp(&a.face_value));

    let mut plan = DispensePlan::empty();
    let mut remaining = amount;

    for entry in order {
        if remaining == 0 {
            break;
        }
        let count = (remaining / entry.face_value).min(entry.available);
        if count == 0 {
            continue;
        }
        remaining -= count * entry.face_value;
        // At most one line per entry and entries were capped above.
        let _ = plan.lines.push(PlanLine {
            denomination: entry.denomination,
            face_value: entry.face_value,
            count,
        });
    }

    if remaining != 0 {
        return Err(ChangeError::ExactChangeUnavailable {
            requested: amount,
            remainder: remaining,
        });
    }
    plan.total = amount;
    Ok(plan)
}
