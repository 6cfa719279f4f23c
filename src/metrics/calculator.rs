//! Per-strategy performance over a window of closed trades: win rate,
//! Sharpe ratio, average P&L and drawdown.

use std::fmt;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use statrs::statistics::Statistics;

use crate::models::Trade;

/// Realized performance of one strategy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StrategyPerformance {
    pub strategy: String,
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,

    /// 0-1
    pub win_rate: f64,

    /// Mean P&L over its population standard deviation; 0 below two trades
    pub sharpe_ratio: f64,

    pub avg_pnl: Decimal,
    pub total_pnl: Decimal,

    /// Largest peak-to-trough drop of the cumulative P&L curve
    pub max_drawdown: Decimal,
}

impl StrategyPerformance {
    pub fn has_trades(&self) -> bool {
        self.total_trades > 0
    }
}

impl fmt::Display for StrategyPerformance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} trades ({}W/{}L), win {:.1}%, sharpe {:.2}, avg {:.0}, total {:.0}, mdd {:.0}",
            self.strategy,
            self.total_trades,
            self.winning_trades,
            self.losing_trades,
            self.win_rate * 100.0,
            self.sharpe_ratio,
            self.avg_pnl,
            self.total_pnl,
            self.max_drawdown,
        )
    }
}

pub struct PerformanceCalculator;

impl PerformanceCalculator {
    /// Metrics for `strategy` from its trades, in close order.
    pub fn calculate(strategy: &str, trades: &[Trade]) -> StrategyPerformance {
        let pnls: Vec<Decimal> = trades.iter().map(|t| t.pnl).collect();
        Self::from_pnls(strategy, &pnls)
    }

    pub fn from_pnls(strategy: &str, pnls: &[Decimal]) -> StrategyPerformance {
        let mut perf = StrategyPerformance {
            strategy: strategy.to_string(),
            ..Default::default()
        };
        if pnls.is_empty() {
            return perf;
        }

        perf.total_trades = pnls.len() as u32;
        perf.winning_trades = pnls.iter().filter(|p| **p > Decimal::ZERO).count() as u32;
        perf.losing_trades = pnls.iter().filter(|p| **p < Decimal::ZERO).count() as u32;
        perf.win_rate = perf.winning_trades as f64 / pnls.len() as f64;
        perf.total_pnl = pnls.iter().copied().sum();
        perf.avg_pnl = perf.total_pnl / Decimal::from(pnls.len() as u32);
        perf.sharpe_ratio = Self::sharpe(pnls);
        perf.max_drawdown = Self::max_drawdown(pnls);

        perf
    }

    fn sharpe(pnls: &[Decimal]) -> f64 {
        if pnls.len() < 2 {
            return 0.0;
        }
        let values: Vec<f64> = pnls.iter().filter_map(|p| p.to_f64()).collect();
        let mean = values.iter().mean();
        let std_dev = values.iter().population_std_dev();

        if std_dev > 0.0 && std_dev.is_finite() {
            mean / std_dev
        } else {
            0.0
        }
    }

    fn max_drawdown(pnls: &[Decimal]) -> Decimal {
        let mut equity = Decimal::ZERO;
        let mut peak = Decimal::ZERO;
        let mut max_dd = Decimal::ZERO;

        for pnl in pnls {
            equity += pnl;
            peak = peak.max(equity);
            max_dd = max_dd.max(peak - equity);
        }
        max_dd
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_pnl_metrics() {
        let pnls = vec![
            dec!(100),   // Win
            dec!(-50),   // Loss
            dec!(200),   // Win
            dec!(-30),   // Loss
            dec!(150),   // Win
        ];
        let perf = PerformanceCalculator::from_pnls("trend_following", &pnls);

        assert_eq!(perf.winning_trades, 3);
        assert_eq!(perf.losing_trades, 2);
        assert_eq!(perf.total_pnl, dec!(370));
        assert_eq!(perf.avg_pnl, dec!(74));
        assert!((perf.win_rate - 0.6).abs() < 0.001);
        assert!(perf.sharpe_ratio > 0.0);
    }

    #[test]
    fn test_sharpe_needs_two_trades() {
        let perf = PerformanceCalculator::from_pnls("momentum_breakout", &[dec!(500)]);
        assert_eq!(perf.sharpe_ratio, 0.0);

        // zero variance
        let flat = PerformanceCalculator::from_pnls("momentum_breakout", &[dec!(10), dec!(10)]);
        assert_eq!(flat.sharpe_ratio, 0.0);
    }

    #[test]
    fn test_sharpe_uses_population_deviation() {
        // mean 2, population std 1
        let perf = PerformanceCalculator::from_pnls("mean_reversion", &[dec!(1), dec!(3)]);
        assert!((perf.sharpe_ratio - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_drawdown() {
        let pnls = vec![
            dec!(100),   // Equity: 100
            dec!(50),    // Equity: 150, Peak: 150
            dec!(-80),   // Equity: 70
            dec!(-20),   // Equity: 50, DD: 100
            dec!(100),   // Equity: 150
        ];
        let perf = PerformanceCalculator::from_pnls("orderbook_imbalance", &pnls);
        assert_eq!(perf.max_drawdown, dec!(100));
    }

    #[test]
    fn test_empty_history() {
        let perf = PerformanceCalculator::from_pnls("trend_following", &[]);
        assert!(!perf.has_trades());
        assert_eq!(perf.win_rate, 0.0);
    }
}
