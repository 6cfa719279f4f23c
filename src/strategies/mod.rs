//! Strategy evaluators and their registration set.
//!
//! Each evaluator is a value type over an immutable parameter set plus, where
//! needed, a small per-instrument memory it owns. Evaluation has no other
//! side effects, so instruments can be evaluated independently.

mod mean_reversion;
mod momentum;
mod orderbook;
mod trend;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{IndicatorSnapshot, MarketState, OrderBookState, Signal, StrategyKind};

pub use mean_reversion::{MeanReversion, MeanReversionParams};
pub use momentum::{MomentumBreakout, MomentumParams};
pub use orderbook::{OrderBookImbalance, OrderBookParams};
pub use trend::{TrendFollowing, TrendParams};

/// What an evaluator sees of the market for one instrument.
#[derive(Debug, Clone)]
pub struct MarketView {
    pub state: MarketState,
    pub orderbook: Option<OrderBookState>,
}

impl MarketView {
    pub fn price(&self) -> Option<f64> {
        self.state.price.to_f64().filter(|p| *p > 0.0)
    }
}

/// Conditions a signal is re-checked against before selection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketConditions {
    pub price: Decimal,
    pub spread_pct: Option<f64>,
    pub trend_strength: Option<f64>,
    /// ATR / price
    pub volatility: Option<f64>,
    pub volume_ratio: Option<f64>,
}

impl MarketConditions {
    pub fn from_view(view: &MarketView, indicators: &IndicatorSnapshot) -> Self {
        Self {
            price: view.state.price,
            spread_pct: view.orderbook.as_ref().map(|b| b.spread_pct),
            trend_strength: indicators.trend_strength,
            volatility: view.price().and_then(|p| indicators.volatility(p)),
            volume_ratio: indicators.volume_ratio,
        }
    }
}

pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> StrategyKind;

    /// Parameter set, persisted with the strategy record.
    fn params(&self) -> serde_json::Value;

    /// An opinion for `instrument`, or `None` to abstain.
    fn generate_signal(
        &self,
        instrument: &str,
        market: &MarketView,
        indicators: &IndicatorSnapshot,
    ) -> Option<Signal>;

    fn validate_signal(&self, signal: &Signal, conditions: &MarketConditions) -> bool;
}

/// Parameters for the default evaluator set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyParams {
    pub trend: TrendParams,
    pub mean_reversion: MeanReversionParams,
    pub momentum: MomentumParams,
    pub orderbook: OrderBookParams,
}

/// A signal tagged with its strategy's registration order.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub order: usize,
    pub signal: Signal,
}

pub struct RegisteredStrategy {
    pub order: usize,
    pub active: bool,
    pub strategy: Box<dyn Strategy>,
}

/// Evaluators in explicit registration order.
#[derive(Default)]
pub struct StrategySet {
    entries: Vec<RegisteredStrategy>,
}

impl StrategySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The four built-in families, in fixed order.
    pub fn with_defaults(params: &StrategyParams) -> Self {
        let mut set = Self::new();
        set.register(Box::new(TrendFollowing::new(params.trend.clone())));
        set.register(Box::new(MeanReversion::new(params.mean_reversion.clone())));
        set.register(Box::new(MomentumBreakout::new(params.momentum.clone())));
        set.register(Box::new(OrderBookImbalance::new(params.orderbook.clone())));
        set
    }

    /// Append a strategy; returns its registration order.
    pub fn register(&mut self, strategy: Box<dyn Strategy>) -> usize {
        let order = self.entries.len();
        self.entries.push(RegisteredStrategy {
            order,
            active: true,
            strategy,
        });
        order
    }

    pub fn set_active(&mut self, name: &str, active: bool) {
        for entry in self.entries.iter_mut().filter(|e| e.strategy.name() == name) {
            entry.active = active;
        }
    }

    pub fn entries(&self) -> &[RegisteredStrategy] {
        &self.entries
    }

    pub fn active_names(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.active)
            .map(|e| e.strategy.name().to_string())
            .collect()
    }

    /// Run every active evaluator and keep the signals that pass validation.
    pub fn evaluate(
        &self,
        instrument: &str,
        market: &MarketView,
        indicators: &IndicatorSnapshot,
    ) -> Vec<Candidate> {
        let conditions = MarketConditions::from_view(market, indicators);

        self.entries
            .iter()
            .filter(|e| e.active)
            .filter_map(|e| {
                let signal = e.strategy.generate_signal(instrument, market, indicators)?;
                if !e.strategy.validate_signal(&signal, &conditions) {
                    debug!(
                        instrument = %instrument,
                        strategy = %e.strategy.name(),
                        confidence = signal.confidence,
                        "Signal failed validation"
                    );
                    return None;
                }
                Some(Candidate {
                    order: e.order,
                    signal,
                })
            })
            .collect()
    }
}

/// Fraction of satisfied checks.
pub(crate) fn checklist(checks: &[bool]) -> f64 {
    if checks.is_empty() {
        return 0.0;
    }
    checks.iter().filter(|c| **c).count() as f64 / checks.len() as f64
}

pub(crate) fn to_decimal(v: f64) -> Option<Decimal> {
    if !v.is_finite() {
        return None;
    }
    Decimal::try_from(v).ok().map(|d| d.round_dp(8))
}


#[cfg(test)]
mod tests {
    use super::testing::view;
    use super::*;
    use crate::models::{Direction, Levels};
    use rust_decimal_macros::dec;

    struct Fixed {
        name: &'static str,
        confidence: f64,
        valid: bool,
    }

    impl Strategy for Fixed {
        fn name(&self) -> &str {
            self.name
        }
        fn kind(&self) -> StrategyKind {
            StrategyKind::TrendFollowing
        }
        fn params(&self) -> serde_json::Value {
            serde_json::Value::Null
        }
        fn generate_signal(&self, instrument: &str, market: &MarketView, _: &IndicatorSnapshot) -> Option<Signal> {
            let p = market.state.price;
            Signal::new(
                self.name,
                instrument,
                Direction::Buy,
                50.0,
                self.confidence,
                Levels {
                    entry: p,
                    stop: p * dec!(0.98),
                    target: p * dec!(1.06),
                },
                "fixed",
            )
            .ok()
        }
        fn validate_signal(&self, _: &Signal, _: &MarketConditions) -> bool {
            self.valid
        }
    }

    #[test]
    fn test_evaluate_keeps_registration_order_and_filters_invalid() {
        let mut set = StrategySet::new();
        set.register(Box::new(Fixed { name: "a", confidence: 0.7, valid: true }));
        set.register(Box::new(Fixed { name: "b", confidence: 0.9, valid: false }));
        set.register(Box::new(Fixed { name: "c", confidence: 0.8, valid: true }));

        let out = set.evaluate("BTC", &view(dec!(100)), &IndicatorSnapshot::default());
        let names: Vec<_> = out.iter().map(|c| (c.order, c.signal.strategy.as_str())).collect();
        assert_eq!(names, vec![(0, "a"), (2, "c")]);
    }

    #[test]
    fn test_inactive_strategies_skipped() {
        let mut set = StrategySet::new();
        set.register(Box::new(Fixed { name: "a", confidence: 0.7, valid: true }));
        set.set_active("a", false);

        assert!(set.evaluate("BTC", &view(dec!(100)), &IndicatorSnapshot::default()).is_empty());
        assert!(set.active_names().is_empty());
    }

    #[test]
    fn test_checklist_fraction() {
        assert_eq!(checklist(&[true, true, true, false]), 0.75);
        assert_eq!(checklist(&[]), 0.0);
    }
}
