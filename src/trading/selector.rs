//! Picks at most one signal per instrument per cycle and keeps the
//! per-strategy weights that bias the pick.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use tracing::{debug, info, warn};

use crate::db::Database;
use crate::error::EngineResult;
use crate::metrics::{PerformanceCalculator, StrategyPerformance};
use crate::models::{Signal, Trade};
use crate::strategies::Candidate;

/// Trailing window for weight recomputation.
pub const WEIGHT_WINDOW_DAYS: i64 = 30;

/// Raw score for a strategy with no closed trades in the window.
pub const UNPROVEN_SCORE: f64 = 0.2;

const MIN_SCORE: f64 = 0.1;

/// Average P&L that maps to the full 0.5 contribution, in quote currency.
const AVG_PNL_SCALE: f64 = 100_000.0;

pub fn score(signal: &Signal, weight: f64) -> f64 {
    signal.confidence * (signal.strength / 100.0) * (1.0 + weight)
}

/// Highest score wins; equal scores go to the earliest registered strategy.
pub fn select(candidates: Vec<Candidate>, weights: &HashMap<String, f64>) -> Option<Candidate> {
    let mut best: Option<(f64, Candidate)> = None;

    for candidate in candidates {
        let weight = weights.get(&candidate.signal.strategy).copied().unwrap_or(0.0);
        let s = score(&candidate.signal, weight);
        let better = match &best {
            None => true,
            Some((top, current)) => s > *top || (s == *top && candidate.order < current.order),
        };
        if better {
            best = Some((s, candidate));
        }
    }

    best.map(|(s, c)| {
        debug!(
            instrument = %c.signal.instrument,
            strategy = %c.signal.strategy,
            direction = c.signal.direction.as_str(),
            score = s,
            "Selected signal"
        );
        c
    })
}

/// Unnormalized weight from one strategy's trailing performance.
pub fn raw_weight(perf: &StrategyPerformance) -> f64 {
    if !perf.has_trades() {
        return UNPROVEN_SCORE;
    }
    let avg = perf.avg_pnl.to_f64().unwrap_or(0.0);
    let value = 0.4 * perf.win_rate
        + 0.3 * (perf.sharpe_ratio / 2.0).min(0.5)
        + 0.3 * (avg / AVG_PNL_SCALE).min(0.5);
    value.max(MIN_SCORE)
}

/// Normalized weights for `active` strategies from the window's trades.
/// Trades of inactive strategies are ignored.
pub fn compute_weights(active: &[String], trades: &[Trade]) -> BTreeMap<String, f64> {
    let mut by_strategy: HashMap<&str, Vec<Trade>> = HashMap::new();
    for trade in trades {
        by_strategy.entry(trade.strategy.as_str()).or_default().push(trade.clone());
    }

    let raw: BTreeMap<String, f64> = active
        .iter()
        .map(|name| {
            let window = by_strategy.get(name.as_str()).map(Vec::as_slice).unwrap_or(&[]);
            let perf = PerformanceCalculator::calculate(name, window);
            (name.clone(), raw_weight(&perf))
        })
        .collect();

    let total: f64 = raw.values().sum();
    if total <= 0.0 {
        return raw;
    }
    raw.into_iter().map(|(name, w)| (name, w / total)).collect()
}

/// Current weights, read by the decision loop and replaced by the
/// recompute task.
#[derive(Default)]
pub struct SignalSelector {
    weights: RwLock<HashMap<String, f64>>,
}

impl SignalSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn weights(&self) -> HashMap<String, f64> {
        match self.weights.read() {
            Ok(w) => w.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn select(&self, candidates: Vec<Candidate>) -> Option<Candidate> {
        select(candidates, &self.weights())
    }

    pub fn set_weights(&self, weights: HashMap<String, f64>) {
        match self.weights.write() {
            Ok(mut w) => *w = weights,
            Err(poisoned) => *poisoned.into_inner() = weights,
        }
    }

    /// Recompute from the last 30 days of trades and persist each weight.
    pub async fn recompute(
        &self,
        db: &Database,
        active: &[String],
        now: DateTime<Utc>,
    ) -> EngineResult<BTreeMap<String, f64>> {
        let since = now - Duration::days(WEIGHT_WINDOW_DAYS);
        let trades = db.get_trades_since(since).await?;
        let weights = compute_weights(active, &trades);

        for (name, weight) in &weights {
            if let Err(e) = db.set_strategy_weight(name, *weight).await {
                warn!(strategy = %name, error = %e, "Failed to store strategy weight");
            }
        }

        info!(
            strategies = weights.len(),
            trades = trades.len(),
            "Strategy weights recomputed"
        );
        self.set_weights(weights.iter().map(|(k, v)| (k.clone(), *v)).collect());
        Ok(weights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Direction, ExitReason, Levels, Position, PositionSide};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn make_candidate(strategy: &str, order: usize, strength: f64, confidence: f64) -> Candidate {
        let signal = Signal::new(
            strategy,
            "BTC",
            Direction::Buy,
            strength,
            confidence,
            Levels {
                entry: dec!(100),
                stop: dec!(98),
                target: dec!(106),
            },
            "",
        )
        .unwrap();
        Candidate { order, signal }
    }

    fn make_trade(strategy: &str, pnl: Decimal) -> Trade {
        let pos = Position::open("BTC", PositionSide::Long, dec!(100), dec!(1), dec!(98), dec!(106), strategy);
        let mut trade = Trade::from_close(&pos, dec!(100), ExitReason::TakeProfit, Utc::now());
        trade.pnl = pnl;
        trade
    }

    #[test]
    fn test_highest_score_wins() {
        let picked = select(
            vec![
                make_candidate("a", 0, 60.0, 0.7),
                make_candidate("b", 1, 90.0, 0.9),
            ],
            &HashMap::new(),
        )
        .unwrap();
        assert_eq!(picked.signal.strategy, "b");
    }

    #[test]
    fn test_weight_tips_the_balance() {
        let weights = HashMap::from([("a".to_string(), 0.8), ("b".to_string(), 0.0)]);
        let picked = select(
            vec![
                make_candidate("a", 0, 80.0, 0.8),
                make_candidate("b", 1, 85.0, 0.85),
            ],
            &weights,
        )
        .unwrap();
        assert_eq!(picked.signal.strategy, "a");
    }

    #[test]
    fn test_tie_goes_to_registration_order() {
        let picked = select(
            vec![
                make_candidate("late", 3, 80.0, 0.8),
                make_candidate("early", 1, 80.0, 0.8),
            ],
            &HashMap::new(),
        )
        .unwrap();
        assert_eq!(picked.signal.strategy, "early");
        assert!(select(Vec::new(), &HashMap::new()).is_none());
    }

    #[test]
    fn test_weights_normalize_and_floor() {
        let active = vec!["winner".to_string(), "loser".to_string(), "new".to_string()];
        let trades = vec![
            make_trade("winner", dec!(50000)),
            make_trade("winner", dec!(30000)),
            make_trade("loser", dec!(-20000)),
            make_trade("loser", dec!(-10000)),
            make_trade("retired", dec!(90000)),
        ];

        let weights = compute_weights(&active, &trades);
        assert_eq!(weights.len(), 3);
        assert!((weights.values().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(weights["winner"] > weights["new"]);
        assert!(weights["new"] > weights["loser"]);

        let loser = PerformanceCalculator::from_pnls("loser", &[dec!(-20000), dec!(-10000)]);
        assert_eq!(raw_weight(&loser), MIN_SCORE);
    }

    #[tokio::test]
    async fn test_recompute_persists_weights() {
        let db = Database::in_memory().await.unwrap();
        db.upsert_strategy("trend_following", crate::models::StrategyKind::TrendFollowing, &serde_json::json!({}), 0)
            .await
            .unwrap();

        let selector = SignalSelector::new();
        let weights = selector
            .recompute(&db, &["trend_following".to_string()], Utc::now())
            .await
            .unwrap();

        assert_eq!(weights["trend_following"], 1.0);
        assert_eq!(selector.weights()["trend_following"], 1.0);
        let stored = db.get_strategies().await.unwrap();
        assert_eq!(stored[0].weight, 1.0);
    }
}
