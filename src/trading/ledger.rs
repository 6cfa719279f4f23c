//! Shared account state: open positions, available capital and the daily
//! P&L accumulator.
//!
//! The decision loop, the executor and the monitor all mutate this state.
//! Holders of the lock see admission and close as one critical section.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, MutexGuard};

use super::risk::{AccountView, DailyLossTracker};
use crate::models::{AccountBalanceSnapshot, Position};

#[derive(Debug, Clone)]
pub struct LedgerState {
    /// OPEN positions keyed by instrument; at most one per instrument
    pub open: BTreeMap<String, Position>,
    pub available_capital: Decimal,
    pub daily: DailyLossTracker,
}

impl LedgerState {
    pub fn new(available_capital: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            open: BTreeMap::new(),
            available_capital,
            daily: DailyLossTracker::new(now.date_naive(), available_capital),
        }
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn has_position(&self, instrument: &str) -> bool {
        self.open.contains_key(instrument)
    }

    pub fn positions_value(&self) -> Decimal {
        self.open.values().map(|p| p.market_value()).sum()
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        self.open.values().map(|p| p.unrealized_pnl).sum()
    }

    /// Cash plus marked value of open positions.
    pub fn total_capital(&self) -> Decimal {
        self.available_capital + self.positions_value()
    }

    pub fn account_view(&self) -> AccountView {
        AccountView {
            open_positions: self.open_count(),
            available_capital: self.available_capital,
            total_capital: self.total_capital(),
        }
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> AccountBalanceSnapshot {
        AccountBalanceSnapshot {
            total_capital: self.total_capital(),
            available_capital: self.available_capital,
            positions_value: self.positions_value(),
            unrealized_pnl: self.unrealized_pnl(),
            timestamp: now,
        }
    }
}

pub struct Ledger {
    state: Mutex<LedgerState>,
}

impl Ledger {
    pub fn new(state: LedgerState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PositionSide;
    use rust_decimal_macros::dec;

    #[test]
    fn test_capital_figures() {
        let mut state = LedgerState::new(dec!(800000), Utc::now());
        let mut pos = Position::open("BTC", PositionSide::Long, dec!(100), dec!(2000), dec!(98), dec!(106), "t");
        pos.update_price(dec!(105));
        state.open.insert("BTC".into(), pos);

        assert_eq!(state.positions_value(), dec!(210000));
        assert_eq!(state.unrealized_pnl(), dec!(10000));
        assert_eq!(state.total_capital(), dec!(1010000));

        let view = state.account_view();
        assert_eq!(view.open_positions, 1);
        assert_eq!(view.available_capital, dec!(800000));
    }
}
