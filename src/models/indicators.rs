//! Indicator snapshot consumed by strategy evaluators.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bar timeframe for indicator computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
}

impl Timeframe {
    pub fn minutes(&self) -> usize {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Timeframe::M1),
            "5m" => Ok(Timeframe::M5),
            "15m" => Ok(Timeframe::M15),
            other => Err(format!("unsupported timeframe: {}", other)),
        }
    }
}

/// Named indicator values for one instrument/timeframe.
///
/// Every field is `None` until its rolling window is filled. Evaluators must
/// abstain on `None`; nothing here defaults to zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub close: Option<f64>,

    // Moving averages
    pub ema_9: Option<f64>,
    pub ema_21: Option<f64>,
    pub ema_50: Option<f64>,
    pub ema_200: Option<f64>,

    // Momentum oscillators
    pub rsi_14: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub stoch_k: Option<f64>,
    pub stoch_d: Option<f64>,

    // Volatility
    pub bb_upper: Option<f64>,
    pub bb_middle: Option<f64>,
    pub bb_lower: Option<f64>,
    pub atr_14: Option<f64>,

    /// ADX 14
    pub trend_strength: Option<f64>,

    // Volume
    pub volume_sma_20: Option<f64>,
    pub volume_ratio: Option<f64>,

    // Price change ratios over 1/5/15/60 bars
    pub change_1: Option<f64>,
    pub change_5: Option<f64>,
    pub change_15: Option<f64>,
    pub change_60: Option<f64>,

    pub bars: usize,
    pub computed_at: Option<DateTime<Utc>>,
}

impl IndicatorSnapshot {
    /// Position of `price` inside the Bollinger band, 0 = lower, 1 = upper.
    pub fn band_position(&self, price: f64) -> Option<f64> {
        let (upper, lower) = (self.bb_upper?, self.bb_lower?);
        let width = upper - lower;
        if width <= 0.0 {
            return None;
        }
        Some((price - lower) / width)
    }

    /// ATR as a fraction of price.
    pub fn volatility(&self, price: f64) -> Option<f64> {
        let atr = self.atr_14?;
        if price <= 0.0 {
            return None;
        }
        Some(atr / price)
    }
}
