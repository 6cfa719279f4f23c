//! Trend following: moving-average ordering confirmed by MACD, RSI and ADX.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::{checklist, MarketConditions, MarketView, Strategy};
use crate::models::{Direction, IndicatorSnapshot, Levels, Signal, StrategyKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendParams {
    /// ADX below this: no opinion
    pub min_trend_strength: f64,
    /// ADX above this counts as a strong trend
    pub strong_trend: f64,
    pub rsi_low: f64,
    pub rsi_high: f64,
    pub buy_threshold: f64,
    pub sell_threshold: f64,
    pub stop_pct: Decimal,
    pub target_pct: Decimal,
    pub min_confidence: f64,
    /// ATR / price above this fails validation
    pub max_volatility: f64,
}

impl Default for TrendParams {
    fn default() -> Self {
        Self {
            min_trend_strength: 25.0,
            strong_trend: 30.0,
            rsi_low: 40.0,
            rsi_high: 70.0,
            buy_threshold: 0.75,
            sell_threshold: 0.66,
            stop_pct: dec!(0.02),
            target_pct: dec!(0.06),
            min_confidence: 0.6,
            max_volatility: 0.10,
        }
    }
}

pub struct TrendFollowing {
    params: TrendParams,
}

impl TrendFollowing {
    pub fn new(params: TrendParams) -> Self {
        Self { params }
    }
}

impl Strategy for TrendFollowing {
    fn name(&self) -> &str {
        "trend_following"
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::TrendFollowing
    }

    fn params(&self) -> serde_json::Value {
        serde_json::to_value(&self.params).unwrap_or_default()
    }

    fn generate_signal(
        &self,
        instrument: &str,
        market: &MarketView,
        ind: &IndicatorSnapshot,
    ) -> Option<Signal> {
        let p = &self.params;
        let price = market.price()?;
        let (ema9, ema21, ema50) = (ind.ema_9?, ind.ema_21?, ind.ema_50?);
        let (macd, macd_signal) = (ind.macd?, ind.macd_signal?);
        let adx = ind.trend_strength?;
        let rsi = ind.rsi_14?;

        if adx < p.min_trend_strength {
            return None;
        }

        let entry = market.state.price;
        let buy = checklist(&[
            ema9 > ema21 && price > ema50,
            macd > macd_signal && macd > 0.0,
            rsi > p.rsi_low && rsi < p.rsi_high,
            adx > p.strong_trend,
        ]);
        if buy >= p.buy_threshold {
            let levels = Levels {
                entry,
                stop: entry * (Decimal::ONE - p.stop_pct),
                target: entry * (Decimal::ONE + p.target_pct),
            };
            return Signal::new(
                self.name(),
                instrument,
                Direction::Buy,
                buy * 100.0,
                buy,
                levels,
                format!("uptrend: ema9 {:.2} > ema21 {:.2}, adx {:.1}, rsi {:.1}", ema9, ema21, adx, rsi),
            )
            .ok()
            .map(|s| s.with_meta("adx", adx).with_meta("rsi", rsi));
        }

        let sell = checklist(&[
            ema9 < ema21 || price < ema50,
            macd < macd_signal,
            rsi > p.rsi_high,
        ]);
        if sell >= p.sell_threshold {
            let levels = Levels {
                entry,
                stop: entry * (Decimal::ONE + p.stop_pct),
                target: entry * (Decimal::ONE - p.target_pct),
            };
            return Signal::new(
                self.name(),
                instrument,
                Direction::Sell,
                sell * 100.0,
                sell,
                levels,
                format!("trend breakdown: ema9 {:.2} / ema21 {:.2}, rsi {:.1}", ema9, ema21, rsi),
            )
            .ok()
            .map(|s| s.with_meta("adx", adx).with_meta("rsi", rsi));
        }

        None
    }

    fn validate_signal(&self, signal: &Signal, conditions: &MarketConditions) -> bool {
        if signal.confidence < self.params.min_confidence {
            return false;
        }
        matches!(conditions.volatility, Some(v) if v <= self.params.max_volatility)
    }
}
