//! Order-book microstructure: volume imbalance backed by a nearby wall.

use std::collections::HashMap;
use std::sync::Mutex;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::{checklist, MarketConditions, MarketView, Strategy};
use crate::models::{BookSide, Direction, IndicatorSnapshot, Levels, OrderBookState, Signal, StrategyKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookParams {
    /// bid/ask volume ratio for BUY; its reciprocal for SELL
    pub imbalance_threshold: f64,
    /// Supporting wall must be at least this many times the level average
    pub min_wall_ratio: f64,
    /// Supporting wall must sit within this percent of mid
    pub max_wall_distance_pct: f64,
    /// Opposing walls below this ratio count as weak
    pub weak_wall_ratio: f64,
    pub tight_spread_pct: f64,
    pub max_spread_pct: f64,
    pub threshold: f64,
    pub stop_pct: Decimal,
    pub target_pct: Decimal,
    pub min_confidence: f64,
}

impl Default for OrderBookParams {
    fn default() -> Self {
        Self {
            imbalance_threshold: 1.8,
            min_wall_ratio: 5.0,
            max_wall_distance_pct: 1.0,
            weak_wall_ratio: 3.0,
            tight_spread_pct: 0.1,
            max_spread_pct: 0.3,
            threshold: 0.75,
            stop_pct: dec!(0.005),
            target_pct: dec!(0.015),
            min_confidence: 0.7,
        }
    }
}

pub struct OrderBookImbalance {
    params: OrderBookParams,
    /// Previous observed price per instrument
    last_price: Mutex<HashMap<String, Decimal>>,
}

impl OrderBookImbalance {
    pub fn new(params: OrderBookParams) -> Self {
        Self {
            params,
            last_price: Mutex::new(HashMap::new()),
        }
    }

    fn remember(&self, instrument: &str, price: Decimal) -> Option<Decimal> {
        let mut memory = self.last_price.lock().unwrap_or_else(|e| e.into_inner());
        memory.insert(instrument.to_string(), price)
    }

    fn supporting_wall(&self, book: &OrderBookState, side: BookSide) -> Option<f64> {
        let walls = match side {
            BookSide::Bid => &book.bid_walls,
            BookSide::Ask => &book.ask_walls,
        };
        walls
            .iter()
            .filter(|w| w.distance_pct <= self.params.max_wall_distance_pct)
            .map(|w| w.ratio)
            .filter(|r| *r >= self.params.min_wall_ratio)
            .reduce(f64::max)
    }
}

impl Strategy for OrderBookImbalance {
    fn name(&self) -> &str {
        "orderbook_imbalance"
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::OrderBookImbalance
    }

    fn params(&self) -> serde_json::Value {
        serde_json::to_value(&self.params).unwrap_or_default()
    }

    fn generate_signal(
        &self,
        instrument: &str,
        market: &MarketView,
        _indicators: &IndicatorSnapshot,
    ) -> Option<Signal> {
        let p = &self.params;
        let entry = market.state.price;
        let previous = self.remember(instrument, entry);

        let book = market.orderbook.as_ref()?;
        let imbalance = book.imbalance?;
        if book.spread_pct > p.max_spread_pct || imbalance <= 0.0 {
            return None;
        }

        let (direction, support, opposing, pressure) = if imbalance >= p.imbalance_threshold {
            (Direction::Buy, BookSide::Bid, BookSide::Ask, imbalance)
        } else if imbalance <= 1.0 / p.imbalance_threshold {
            (Direction::Sell, BookSide::Ask, BookSide::Bid, 1.0 / imbalance)
        } else {
            return None;
        };

        let wall_ratio = self.supporting_wall(book, support)?;
        let opposing_weak = book
            .max_wall_ratio(opposing)
            .map_or(true, |r| r < p.weak_wall_ratio);
        // price must not be running away from the wall
        let steady = match (previous, direction) {
            (Some(prev), Direction::Buy) => entry >= prev,
            (Some(prev), Direction::Sell) => entry <= prev,
            (None, _) => true,
        };

        let score = checklist(&[
            pressure >= p.imbalance_threshold,
            wall_ratio >= p.min_wall_ratio,
            book.spread_pct < p.tight_spread_pct,
            opposing_weak,
            steady,
        ]);
        if score < p.threshold {
            return None;
        }

        let strength = (pressure / p.imbalance_threshold * 50.0 + score * 50.0).min(100.0);
        let levels = match direction {
            Direction::Buy => Levels {
                entry,
                stop: entry * (Decimal::ONE - p.stop_pct),
                target: entry * (Decimal::ONE + p.target_pct),
            },
            Direction::Sell => Levels {
                entry,
                stop: entry * (Decimal::ONE + p.stop_pct),
                target: entry * (Decimal::ONE - p.target_pct),
            },
        };

        Signal::new(
            self.name(),
            instrument,
            direction,
            strength,
            score,
            levels,
            format!(
                "imbalance {:.2}, wall x{:.1}, spread {:.3}%",
                imbalance, wall_ratio, book.spread_pct
            ),
        )
        .ok()
        .map(|s| s.with_meta("imbalance", imbalance).with_meta("wall_ratio", wall_ratio))
    }

    fn validate_signal(&self, signal: &Signal, conditions: &MarketConditions) -> bool {
        if signal.confidence < self.params.min_confidence {
            return false;
        }
        matches!(conditions.spread_pct, Some(s) if s <= self.params.max_spread_pct)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::analyze_orderbook;
    use crate::models::{BookLevel, MarketState};
    use crate::venue::RawOrderBook;

    fn bid_heavy_view(price: Decimal) -> MarketView {
        // 9 small bid levels and one large wall 0.2% under mid
        let mut bids: Vec<BookLevel> = (0..9)
            .map(|i| BookLevel::new(dec!(99.99) - Decimal::from(i) * dec!(0.01), dec!(2)))
            .collect();
        bids.push(BookLevel::new(dec!(99.8), dec!(60)));
        let asks = vec![
            BookLevel::new(dec!(100.01), dec!(5)),
            BookLevel::new(dec!(100.02), dec!(5)),
            BookLevel::new(dec!(100.03), dec!(5)),
        ];
        let book = analyze_orderbook("BTC", &RawOrderBook { bids, asks }, 10, 3.0).unwrap();
        MarketView {
            state: MarketState::new("BTC", price, dec!(1000)),
            orderbook: Some(book),
        }
    }

    #[test]
    fn test_buy_on_bid_imbalance_with_wall() {
        let strat = OrderBookImbalance::new(OrderBookParams::default());
        let signal = strat
            .generate_signal("BTC", &bid_heavy_view(dec!(100)), &IndicatorSnapshot::default())
            .unwrap();

        assert_eq!(signal.direction, Direction::Buy);
        assert_eq!(signal.stop_loss, dec!(99.5));
        assert_eq!(signal.take_profit, dec!(101.5));
        assert!(signal.strength <= 100.0);
    }

    #[test]
    fn test_price_memory_blocks_falling_entry() {
        let strat = OrderBookImbalance::new(OrderBookParams::default());
        let empty = IndicatorSnapshot::default();

        let mut view = bid_heavy_view(dec!(100.5));
        // widen the spread so only the memory check decides
        if let Some(book) = view.orderbook.as_mut() {
            book.spread_pct = 0.2;
        }
        assert!(strat.generate_signal("BTC", &view, &empty).is_some());

        view.state.price = dec!(100);
        assert!(strat.generate_signal("BTC", &view, &empty).is_none());
    }

    #[test]
    fn test_confidence_counts_every_check() {
        let strat = OrderBookImbalance::new(OrderBookParams::default());
        let mut view = bid_heavy_view(dec!(100));
        if let Some(book) = view.orderbook.as_mut() {
            book.spread_pct = 0.2;
        }

        // imbalance, wall, weak opposition and steady price pass; spread is not tight
        let signal = strat
            .generate_signal("BTC", &view, &IndicatorSnapshot::default())
            .unwrap();
        assert!((signal.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_missing_imbalance_abstains() {
        let strat = OrderBookImbalance::new(OrderBookParams::default());
        let mut view = bid_heavy_view(dec!(100));
        if let Some(book) = view.orderbook.as_mut() {
            book.imbalance = None;
        }
        assert!(strat.generate_signal("BTC", &view, &IndicatorSnapshot::default()).is_none());
    }

    #[test]
    fn test_validation_rejects_wide_spread() {
        let strat = OrderBookImbalance::new(OrderBookParams::default());
        let signal = strat
            .generate_signal("BTC", &bid_heavy_view(dec!(100)), &IndicatorSnapshot::default())
            .unwrap();

        let wide = MarketConditions {
            spread_pct: Some(0.4),
            ..Default::default()
        };
        assert!(!strat.validate_signal(&signal, &wide));
        assert!(!strat.validate_signal(&signal, &MarketConditions::default()));
    }
}
