//! Directional opinion emitted by a strategy evaluator.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Buy => "BUY",
            Direction::Sell => "SELL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidSignal {
    #[error("strength {0} outside [0, 100]")]
    Strength(f64),
    #[error("confidence {0} outside [0, 1]")]
    Confidence(f64),
    #[error("levels out of order for {direction:?}: stop {stop}, entry {entry}, target {target}")]
    Levels {
        direction: Direction,
        stop: Decimal,
        entry: Decimal,
        target: Decimal,
    },
}

/// A validated opinion. Only constructible through [`Signal::new`], so
/// the stop/entry/target ordering always holds for its direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Name of the emitting strategy
    pub strategy: String,
    pub instrument: String,
    pub direction: Direction,

    /// 0..=100
    pub strength: f64,

    /// 0..=1
    pub confidence: f64,

    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub rationale: String,
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

/// Levels a strategy proposes for a signal.
#[derive(Debug, Clone, Copy)]
pub struct Levels {
    pub entry: Decimal,
    pub stop: Decimal,
    pub target: Decimal,
}

impl Signal {
    pub fn new(
        strategy: impl Into<String>,
        instrument: impl Into<String>,
        direction: Direction,
        strength: f64,
        confidence: f64,
        levels: Levels,
        rationale: impl Into<String>,
    ) -> Result<Self, InvalidSignal> {
        if !(0.0..=100.0).contains(&strength) {
            return Err(InvalidSignal::Strength(strength));
        }
        if !(0.0..=1.0).contains(&confidence) {
            return Err(InvalidSignal::Confidence(confidence));
        }

        let Levels { entry, stop, target } = levels;
        let ordered = match direction {
            Direction::Buy => stop < entry && entry < target,
            Direction::Sell => target < entry && entry < stop,
        };
        if !ordered {
            return Err(InvalidSignal::Levels {
                direction,
                stop,
                entry,
                target,
            });
        }

        Ok(Self {
            strategy: strategy.into(),
            instrument: instrument.into(),
            direction,
            strength,
            confidence,
            entry_price: entry,
            stop_loss: stop,
            take_profit: target,
            rationale: rationale.into(),
            metadata: BTreeMap::new(),
            timestamp: Utc::now(),
        })
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Absolute distance from entry to stop.
    pub fn loss_distance(&self) -> Decimal {
        (self.entry_price - self.stop_loss).abs()
    }

    /// Absolute distance from entry to target.
    pub fn profit_distance(&self) -> Decimal {
        (self.take_profit - self.entry_price).abs()
    }

    /// Profit distance over loss distance.
    pub fn reward_risk(&self) -> Decimal {
        let loss = self.loss_distance();
        if loss.is_zero() {
            return Decimal::ZERO;
        }
        self.profit_distance() / loss
    }

    /// Loss distance as a fraction of entry.
    pub fn loss_distance_pct(&self) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        self.loss_distance() / self.entry_price
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn levels(entry: Decimal, stop: Decimal, target: Decimal) -> Levels {
        Levels { entry, stop, target }
    }

    #[test]
    fn test_buy_ordering_enforced() {
        let ok = Signal::new("t", "BTC", Direction::Buy, 80.0, 0.8, levels(dec!(100), dec!(98), dec!(106)), "");
        assert!(ok.is_ok());

        let bad = Signal::new("t", "BTC", Direction::Buy, 80.0, 0.8, levels(dec!(100), dec!(101), dec!(106)), "");
        assert!(matches!(bad, Err(InvalidSignal::Levels { .. })));
    }

    #[test]
    fn test_sell_ordering_enforced() {
        let ok = Signal::new("t", "BTC", Direction::Sell, 50.0, 0.5, levels(dec!(100), dec!(102), dec!(94)), "");
        assert!(ok.is_ok());

        let bad = Signal::new("t", "BTC", Direction::Sell, 50.0, 0.5, levels(dec!(100), dec!(98), dec!(106)), "");
        assert!(bad.is_err());
    }

    #[test]
    fn test_ranges_enforced() {
        let l = levels(dec!(100), dec!(98), dec!(106));
        assert!(matches!(
            Signal::new("t", "BTC", Direction::Buy, 101.0, 0.5, l, ""),
            Err(InvalidSignal::Strength(_))
        ));
        assert!(matches!(
            Signal::new("t", "BTC", Direction::Buy, 50.0, 1.5, l, ""),
            Err(InvalidSignal::Confidence(_))
        ));
    }

    #[test]
    fn test_reward_risk() {
        let s = Signal::new("t", "BTC", Direction::Buy, 80.0, 0.8, levels(dec!(100), dec!(98), dec!(106)), "")
            .unwrap();
        assert_eq!(s.reward_risk(), dec!(3));
        assert_eq!(s.loss_distance_pct(), dec!(0.02));
    }
}
