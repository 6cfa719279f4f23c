//! Registered strategy record.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    TrendFollowing,
    MeanReversion,
    MomentumBreakout,
    OrderBookImbalance,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::TrendFollowing => "trend_following",
            StrategyKind::MeanReversion => "mean_reversion",
            StrategyKind::MomentumBreakout => "momentum_breakout",
            StrategyKind::OrderBookImbalance => "orderbook_imbalance",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trend_following" => Ok(StrategyKind::TrendFollowing),
            "mean_reversion" => Ok(StrategyKind::MeanReversion),
            "momentum_breakout" => Ok(StrategyKind::MomentumBreakout),
            "orderbook_imbalance" => Ok(StrategyKind::OrderBookImbalance),
            other => Err(format!("unknown strategy kind: {}", other)),
        }
    }
}

/// Persistent identity and weight of a strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyRecord {
    pub id: i64,
    pub name: String,
    pub kind: StrategyKind,
    pub params: serde_json::Value,
    pub active: bool,

    /// Normalized over active strategies, in [0, 1]
    pub weight: f64,
}
