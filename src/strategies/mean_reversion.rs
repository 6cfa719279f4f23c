//! Mean reversion on Bollinger band extremes, confirmed by RSI and stochastic.
//!
//! Unsafe in strong trends: disabled above the ADX ceiling both when
//! generating and when validating.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::{checklist, to_decimal, MarketConditions, MarketView, Strategy};
use crate::models::{Direction, IndicatorSnapshot, Levels, Signal, StrategyKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeanReversionParams {
    /// Band position (0 = lower band, 1 = upper band)
    pub lower_band_entry: f64,
    pub upper_band_entry: f64,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub stoch_oversold: f64,
    pub stoch_overbought: f64,
    pub threshold: f64,
    pub stop_pct: Decimal,
    /// Target is the middle band shifted by this fraction
    pub target_offset: Decimal,
    /// ADX above this disables the strategy
    pub max_trend_strength: f64,
    pub min_confidence: f64,
}

impl Default for MeanReversionParams {
    fn default() -> Self {
        Self {
            lower_band_entry: 0.2,
            upper_band_entry: 0.8,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            stoch_oversold: 20.0,
            stoch_overbought: 80.0,
            threshold: 0.75,
            stop_pct: dec!(0.03),
            target_offset: dec!(0.02),
            max_trend_strength: 30.0,
            min_confidence: 0.65,
        }
    }
}

pub struct MeanReversion {
    params: MeanReversionParams,
}

impl MeanReversion {
    pub fn new(params: MeanReversionParams) -> Self {
        Self { params }
    }
}

impl Strategy for MeanReversion {
    fn name(&self) -> &str {
        "mean_reversion"
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::MeanReversion
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
        let adx = ind.trend_strength?;
        if adx > p.max_trend_strength {
            return None;
        }

        let position = ind.band_position(price)?;
        let middle = ind.bb_middle?;
        let rsi = ind.rsi_14?;
        let stoch = ind.stoch_k?;
        let entry = market.state.price;
        let middle_dec = to_decimal(middle)?;

        let buy = checklist(&[
            position < p.lower_band_entry,
            rsi < p.rsi_oversold,
            stoch < p.stoch_oversold,
            price < middle,
        ]);
        if buy >= p.threshold {
            let levels = Levels {
                entry,
                stop: entry * (Decimal::ONE - p.stop_pct),
                target: middle_dec * (Decimal::ONE + p.target_offset),
            };
            // target at or below entry fails construction: abstain
            return Signal::new(
                self.name(),
                instrument,
                Direction::Buy,
                buy * 100.0,
                buy,
                levels,
                format!("oversold: band {:.2}, rsi {:.1}, stoch {:.1}", position, rsi, stoch),
            )
            .ok()
            .map(|s| s.with_meta("band_position", position));
        }

        let sell = checklist(&[
            position > p.upper_band_entry,
            rsi > p.rsi_overbought,
            stoch > p.stoch_overbought,
            price > middle,
        ]);
        if sell >= p.threshold {
            let levels = Levels {
                entry,
                stop: entry * (Decimal::ONE + p.stop_pct),
                target: middle_dec * (Decimal::ONE - p.target_offset),
            };
            return Signal::new(
                self.name(),
                instrument,
                Direction::Sell,
                sell * 100.0,
                sell,
                levels,
                format!("overbought: band {:.2}, rsi {:.1}, stoch {:.1}", position, rsi, stoch),
            )
            .ok()
            .map(|s| s.with_meta("band_position", position));
        }

        None
    }

    fn validate_signal(&self, signal: &Signal, conditions: &MarketConditions) -> bool {
        if signal.confidence < self.params.min_confidence {
            return false;
        }
        matches!(conditions.trend_strength, Some(adx) if adx <= self.params.max_trend_strength)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::testing::view;

    fn oversold() -> IndicatorSnapshot {
        IndicatorSnapshot {
            bb_upper: Some(110.0),
            bb_middle: Some(100.0),
            bb_lower: Some(90.0),
            rsi_14: Some(25.0),
            stoch_k: Some(15.0),
            trend_strength: Some(18.0),
            bars: 60,
            ..Default::default()
        }
    }

    #[test]
    fn test_buy_at_lower_band() {
        let strat = MeanReversion::new(MeanReversionParams::default());
        let signal = strat.generate_signal("ETH", &view(dec!(91)), &oversold()).unwrap();

        assert_eq!(signal.direction, Direction::Buy);
        assert_eq!(signal.stop_loss, dec!(88.27));
        assert_eq!(signal.take_profit, dec!(102));
    }

    #[test]
    fn test_disabled_in_strong_trend() {
        let strat = MeanReversion::new(MeanReversionParams::default());
        let mut ind = oversold();
        ind.trend_strength = Some(40.0);
        assert!(strat.generate_signal("ETH", &view(dec!(91)), &ind).is_none());
    }

    #[test]
    fn test_validation_enforces_trend_ceiling() {
        let strat = MeanReversion::new(MeanReversionParams::default());
        let signal = strat.generate_signal("ETH", &view(dec!(91)), &oversold()).unwrap();

        let ranging = MarketConditions {
            trend_strength: Some(20.0),
            ..Default::default()
        };
        let trending = MarketConditions {
            trend_strength: Some(31.0),
            ..Default::default()
        };
        assert!(strat.validate_signal(&signal, &ranging));
        assert!(!strat.validate_signal(&signal, &trending));
    }

    #[test]
    fn test_abstains_when_target_not_above_entry() {
        let strat = MeanReversion::new(MeanReversionParams::default());
        let mut ind = oversold();
        // middle band below price: three of four checks hold but the
        // reversion target sits under entry
        ind.bb_middle = Some(80.0);
        ind.bb_lower = Some(75.0);
        ind.bb_upper = Some(120.0);
        assert!(strat.generate_signal("ETH", &view(dec!(82)), &ind).is_none());
    }
}
