//! Trading configuration: admission policy, execution, exits and cadences.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::models::Timeframe;

/// Paper fills are synthesized locally; live orders go to the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeMode {
    Paper,
    Live,
}

impl TradeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeMode::Paper => "paper",
            TradeMode::Live => "live",
        }
    }
}

impl fmt::Display for TradeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "paper" => Ok(TradeMode::Paper),
            "live" => Ok(TradeMode::Live),
            other => Err(format!("unknown trade mode: {}", other)),
        }
    }
}

/// Admission policy and position sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Starting capital when the store has no balance history
    pub initial_capital: Decimal,

    /// Base fraction of available capital per position
    pub risk_fraction: Decimal,

    /// Daily loss limit, percent of the day's starting balance
    pub max_daily_loss_pct: Decimal,

    /// Maximum concurrent OPEN positions
    pub max_open_positions: usize,

    /// Minimum profit distance / loss distance
    pub min_reward_risk: Decimal,

    /// Minimum signal confidence (0-1)
    pub min_confidence: f64,

    /// Position size bounds as fractions of available capital
    pub min_position_pct: Decimal,
    pub max_position_pct: Decimal,

    /// Size multiplier is 1 / (1 + factor * loss_distance_pct)
    pub stop_distance_factor: Decimal,

    /// Skip new entries while available capital is below this
    pub min_available_capital: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            initial_capital: dec!(1000000),
            risk_fraction: dec!(0.10),       // 10% base allocation
            max_daily_loss_pct: dec!(5),     // pause at 5% daily loss
            max_open_positions: 3,
            min_reward_risk: dec!(1.2),
            min_confidence: 0.6,
            min_position_pct: dec!(0.01),    // 1% of available
            max_position_pct: dec!(0.30),    // 30% of available
            stop_distance_factor: dec!(10),
            min_available_capital: dec!(10000),
        }
    }
}

/// Order placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    pub mode: TradeMode,

    /// Orders below this notional are rejected before any venue call
    pub min_notional: Decimal,

    /// Live limit price offset from top of book (+ buy / - sell)
    pub limit_offset_pct: Decimal,

    /// Quantity precision
    pub quantity_dp: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            mode: TradeMode::Paper,
            min_notional: dec!(5000),
            limit_offset_pct: dec!(0.005),   // 0.5% through the book
            quantity_dp: 8,
        }
    }
}

/// Exit supervision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Unrealized gain (percent) that arms the trailing ratchet
    pub trailing_trigger_pct: Decimal,

    /// Ratchet stop as a multiple of entry (longs); shorts use 2 - factor
    pub trailing_stop_factor: Decimal,

    /// Age after which a losing position is force-closed
    pub timeout_hours: i64,

    /// Unrealized P&L (percent) below which a timed-out position is closed
    pub timeout_loss_pct: Decimal,

    /// Venue holding below this fraction of recorded quantity is a phantom
    pub phantom_threshold: Decimal,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            trailing_trigger_pct: dec!(5),
            trailing_stop_factor: dec!(1.01),
            timeout_hours: 24,
            timeout_loss_pct: dec!(-1),
            phantom_threshold: dec!(0.01),
        }
    }
}

/// Market data and indicator inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDataConfig {
    pub timeframe: Timeframe,
    pub min_bars: usize,
    pub bar_capacity: usize,

    /// Top-N levels aggregated per side
    pub book_depth: usize,

    /// Level size over side average that counts as a wall
    pub wall_multiplier: f64,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            timeframe: Timeframe::M1,
            min_bars: 50,
            bar_capacity: 300,
            book_depth: 10,
            wall_multiplier: 3.0,
        }
    }
}

/// Loop cadences, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub cycle_secs: u64,
    pub monitor_secs: u64,
    pub price_secs: u64,
    pub orderbook_secs: u64,
    pub indicator_secs: u64,
    pub reconcile_secs: u64,
    pub weight_secs: u64,

    /// Upper bound on any single venue or store call
    pub call_timeout_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cycle_secs: 60,
            monitor_secs: 10,
            price_secs: 5,
            orderbook_secs: 1,
            indicator_secs: 60,
            reconcile_secs: 300,
            weight_secs: 3600,
            call_timeout_secs: 10,
        }
    }
}

impl ScheduleConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trade_mode_parse() {
        assert_eq!("LIVE".parse::<TradeMode>(), Ok(TradeMode::Live));
        assert_eq!("paper".parse::<TradeMode>(), Ok(TradeMode::Paper));
        assert!("demo".parse::<TradeMode>().is_err());
    }

    #[test]
    fn test_defaults_are_consistent() {
        let risk = RiskConfig::default();
        assert!(risk.min_position_pct < risk.max_position_pct);
        assert!(risk.risk_fraction <= risk.max_position_pct);
        assert_eq!(ScheduleConfig::default().call_timeout(), Duration::from_secs(10));
    }
}
