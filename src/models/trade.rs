//! Closed-position summaries and account bookkeeping records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::position::{Position, PositionSide};

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    TimeoutLoss,
    /// Opposite-direction signal selected for the instrument
    SignalExit,
    /// Venue no longer reports the holding
    PhantomCleanup,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "STOP_LOSS",
            ExitReason::TakeProfit => "TAKE_PROFIT",
            ExitReason::TimeoutLoss => "TIMEOUT_LOSS",
            ExitReason::SignalExit => "SIGNAL_EXIT",
            ExitReason::PhantomCleanup => "PHANTOM_CLEANUP",
        }
    }

    /// Close without sending an order to the venue.
    pub fn is_local_only(&self) -> bool {
        matches!(self, ExitReason::PhantomCleanup)
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ExitReason::StopLoss => "stop loss",
            ExitReason::TakeProfit => "take profit",
            ExitReason::TimeoutLoss => "timeout loss",
            ExitReason::SignalExit => "signal exit",
            ExitReason::PhantomCleanup => "phantom cleanup",
        };
        f.write_str(text)
    }
}

impl FromStr for ExitReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STOP_LOSS" => Ok(ExitReason::StopLoss),
            "TAKE_PROFIT" => Ok(ExitReason::TakeProfit),
            "TIMEOUT_LOSS" => Ok(ExitReason::TimeoutLoss),
            "SIGNAL_EXIT" => Ok(ExitReason::SignalExit),
            "PHANTOM_CLEANUP" => Ok(ExitReason::PhantomCleanup),
            other => Err(format!("unknown exit reason: {}", other)),
        }
    }
}

/// Summary of a closed position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub position_id: i64,
    pub instrument: String,
    pub strategy: String,
    pub side: PositionSide,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub quantity: Decimal,
    pub pnl: Decimal,
    pub pnl_pct: Decimal,
    pub holding_minutes: i64,
    pub exit_reason: ExitReason,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
}

impl Trade {
    /// Build the trade for closing `position` at `exit_price`.
    ///
    /// P&L is recomputed from entry, exit, quantity and side; the position's
    /// unrealized estimate is ignored.
    pub fn from_close(
        position: &Position,
        exit_price: Decimal,
        reason: ExitReason,
        closed_at: DateTime<Utc>,
    ) -> Self {
        let pnl = calculate_pnl(position.side, position.entry_price, exit_price, position.quantity);
        let basis = position.entry_price * position.quantity;
        let pnl_pct = if basis.is_zero() {
            Decimal::ZERO
        } else {
            pnl / basis * Decimal::ONE_HUNDRED
        };

        Self {
            position_id: position.id,
            instrument: position.instrument.clone(),
            strategy: position.strategy.clone(),
            side: position.side,
            entry_price: position.entry_price,
            exit_price,
            quantity: position.quantity,
            pnl,
            pnl_pct,
            holding_minutes: (closed_at - position.opened_at).num_minutes(),
            exit_reason: reason,
            opened_at: position.opened_at,
            closed_at,
        }
    }

    pub fn is_win(&self) -> bool {
        self.pnl > Decimal::ZERO
    }
}

/// `(exit - entry) * qty` for longs, `(entry - exit) * qty` for shorts.
pub fn calculate_pnl(side: PositionSide, entry: Decimal, exit: Decimal, quantity: Decimal) -> Decimal {
    match side {
        PositionSide::Long => (exit - entry) * quantity,
        PositionSide::Short => (entry - exit) * quantity,
    }
}

/// One record per calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPerformance {
    pub date: NaiveDate,
    pub starting_balance: Decimal,
    pub ending_balance: Decimal,
    pub realized_pnl: Decimal,
    pub pnl_pct: Decimal,
    pub total_trades: i64,
    pub winning_trades: i64,
    pub losing_trades: i64,
    pub paused: bool,
}

/// Point-in-time account valuation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBalanceSnapshot {
    pub total_capital: Decimal,
    pub available_capital: Decimal,
    pub positions_value: Decimal,
    pub unrealized_pnl: Decimal,
    pub timestamp: DateTime<Utc>,
}
