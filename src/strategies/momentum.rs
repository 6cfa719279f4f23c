//! Momentum breakout on a volume surge with moving-average alignment.
//! Stop and target are ATR multiples.

use serde::{Deserialize, Serialize};

use super::{checklist, to_decimal, MarketConditions, MarketView, Strategy};
use crate::models::{Direction, IndicatorSnapshot, Levels, Signal, StrategyKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MomentumParams {
    /// Current volume / 20-bar average required to consider a breakout
    pub min_volume_ratio: f64,
    pub rsi_floor: f64,
    pub rsi_ceiling: f64,
    /// Required distance from EMA21, in ATR-percent multiples
    pub breakout_atr_multiple: f64,
    pub stop_atr_multiple: f64,
    pub target_atr_multiple: f64,
    pub threshold: f64,
    pub min_confidence: f64,
}

impl Default for MomentumParams {
    fn default() -> Self {
        Self {
            min_volume_ratio: 1.5,
            rsi_floor: 50.0,
            rsi_ceiling: 75.0,
            breakout_atr_multiple: 2.0,
            stop_atr_multiple: 1.5,
            target_atr_multiple: 3.0,
            threshold: 0.75,
            min_confidence: 0.7,
        }
    }
}

pub struct MomentumBreakout {
    params: MomentumParams,
}

impl MomentumBreakout {
    pub fn new(params: MomentumParams) -> Self {
        Self { params }
    }
}

impl Strategy for MomentumBreakout {
    fn name(&self) -> &str {
        "momentum_breakout"
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::MomentumBreakout
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
        let volume_ratio = ind.volume_ratio?;
        if volume_ratio < p.min_volume_ratio {
            return None;
        }
        let (ema21, ema50) = (ind.ema_21?, ind.ema_50?);
        let rsi = ind.rsi_14?;
        let atr = ind.atr_14?;
        if atr <= 0.0 || ema21 <= 0.0 {
            return None;
        }

        let atr_pct = atr / price;
        let distance = (price - ema21) / ema21;
        let entry = market.state.price;
        let stop_offset = to_decimal(atr * p.stop_atr_multiple)?;
        let target_offset = to_decimal(atr * p.target_atr_multiple)?;
        let volume_factor = (volume_ratio / 2.0).min(1.0);

        let buy = checklist(&[
            price > ema21 && ema21 > ema50,
            volume_ratio >= p.min_volume_ratio,
            rsi > p.rsi_floor && rsi < p.rsi_ceiling,
            distance > atr_pct * p.breakout_atr_multiple,
        ]);
        if buy >= p.threshold {
            let levels = Levels {
                entry,
                stop: entry - stop_offset,
                target: entry + target_offset,
            };
            return Signal::new(
                self.name(),
                instrument,
                Direction::Buy,
                buy * 100.0,
                buy * volume_factor,
                levels,
                format!("breakout: volume x{:.2}, {:.2}% above ema21", volume_ratio, distance * 100.0),
            )
            .ok()
            .map(|s| s.with_meta("volume_ratio", volume_ratio).with_meta("atr", atr));
        }

        let sell = checklist(&[
            price < ema21 && ema21 < ema50,
            volume_ratio >= p.min_volume_ratio,
            rsi < p.rsi_floor && rsi > 100.0 - p.rsi_ceiling,
            -distance > atr_pct * p.breakout_atr_multiple,
        ]);
        if sell >= p.threshold {
            let levels = Levels {
                entry,
                stop: entry + stop_offset,
                target: entry - target_offset,
            };
            return Signal::new(
                self.name(),
                instrument,
                Direction::Sell,
                sell * 100.0,
                sell * volume_factor,
                levels,
                format!("breakdown: volume x{:.2}, {:.2}% below ema21", volume_ratio, -distance * 100.0),
            )
            .ok()
            .map(|s| s.with_meta("volume_ratio", volume_ratio).with_meta("atr", atr));
        }

        None
    }

    fn validate_signal(&self, signal: &Signal, conditions: &MarketConditions) -> bool {
        if signal.confidence < self.params.min_confidence {
            return false;
        }
        matches!(conditions.volume_ratio, Some(v) if v >= self.params.min_volume_ratio)
    }
}
