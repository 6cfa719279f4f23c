//! Admission policy: ordered checks, first failure wins.
//!
//! 1. daily loss limit (pauses trading until the next UTC day)
//! 2. open-position ceiling
//! 3. reward/risk ratio
//! 4. confidence floor
//! 5. position size bounds

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::warn;

use super::{PositionSizer, RiskConfig};
use crate::error::RejectReason;
use crate::models::{DailyPerformance, Signal, Trade};

/// Today's realized P&L against the day's starting balance.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyLossTracker {
    pub date: NaiveDate,
    pub starting_balance: Decimal,
    pub realized_pnl: Decimal,
    pub total_trades: i64,
    pub winning_trades: i64,
    pub losing_trades: i64,

    /// Sticky for the rest of `date`
    pub paused: bool,
}

impl DailyLossTracker {
    pub fn new(date: NaiveDate, starting_balance: Decimal) -> Self {
        Self {
            date,
            starting_balance,
            realized_pnl: Decimal::ZERO,
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            paused: false,
        }
    }

    /// Resume a day from its persisted record.
    pub fn from_performance(perf: &DailyPerformance) -> Self {
        Self {
            date: perf.date,
            starting_balance: perf.starting_balance,
            realized_pnl: perf.realized_pnl,
            total_trades: perf.total_trades,
            winning_trades: perf.winning_trades,
            losing_trades: perf.losing_trades,
            paused: perf.paused,
        }
    }

    /// Start a fresh day if `now` has moved past `date`. Returns true on rollover.
    pub fn roll(&mut self, now: DateTime<Utc>, current_balance: Decimal) -> bool {
        let today = now.date_naive();
        if today == self.date {
            return false;
        }
        *self = Self::new(today, current_balance);
        true
    }

    pub fn record(&mut self, trade: &Trade) {
        self.realized_pnl += trade.pnl;
        self.total_trades += 1;
        if trade.pnl > Decimal::ZERO {
            self.winning_trades += 1;
        } else if trade.pnl < Decimal::ZERO {
            self.losing_trades += 1;
        }
    }

    /// Realized P&L in percent of the starting balance.
    pub fn pnl_pct(&self) -> Decimal {
        if self.starting_balance.is_zero() {
            return Decimal::ZERO;
        }
        self.realized_pnl / self.starting_balance * Decimal::ONE_HUNDRED
    }

    /// True while trading is allowed today.
    ///
    /// Once this returns false it keeps returning false until the date rolls,
    /// at which point the day restarts from `current_balance`.
    pub fn check_daily_loss_limit(
        &mut self,
        now: DateTime<Utc>,
        current_balance: Decimal,
        max_daily_loss_pct: Decimal,
    ) -> bool {
        self.roll(now, current_balance);
        if self.paused {
            return false;
        }
        if self.pnl_pct().abs() >= max_daily_loss_pct {
            warn!(
                date = %self.date,
                pnl = %self.realized_pnl,
                pnl_pct = %self.pnl_pct().round_dp(2),
                "Daily loss limit reached, pausing until next day"
            );
            self.paused = true;
            return false;
        }
        true
    }

    pub fn to_performance(&self, ending_balance: Decimal) -> DailyPerformance {
        DailyPerformance {
            date: self.date,
            starting_balance: self.starting_balance,
            ending_balance,
            realized_pnl: self.realized_pnl,
            pnl_pct: self.pnl_pct(),
            total_trades: self.total_trades,
            winning_trades: self.winning_trades,
            losing_trades: self.losing_trades,
            paused: self.paused,
        }
    }
}

/// Account figures the gate needs for one decision.
#[derive(Debug, Clone, Copy)]
pub struct AccountView {
    pub open_positions: usize,
    pub available_capital: Decimal,
    pub total_capital: Decimal,
}

pub struct RiskGate {
    config: RiskConfig,
    sizer: PositionSizer,
}

impl RiskGate {
    pub fn new(config: RiskConfig) -> Self {
        let sizer = PositionSizer::new(config.clone());
        Self { config, sizer }
    }

    /// Admit `signal` and return the sized notional, or the first failed check.
    pub fn admit(
        &self,
        signal: &Signal,
        daily: &mut DailyLossTracker,
        account: AccountView,
        now: DateTime<Utc>,
    ) -> Result<Decimal, RejectReason> {
        if !daily.check_daily_loss_limit(now, account.total_capital, self.config.max_daily_loss_pct) {
            return Err(RejectReason::DailyLossLimit);
        }

        if account.open_positions >= self.config.max_open_positions {
            return Err(RejectReason::MaxOpenPositions);
        }

        if signal.loss_distance().is_zero() {
            return Err(RejectReason::InvalidLevels);
        }
        if signal.reward_risk() < self.config.min_reward_risk {
            return Err(RejectReason::RiskRewardBelowMinimum);
        }

        if signal.confidence < self.config.min_confidence {
            return Err(RejectReason::ConfidenceBelowMinimum);
        }

        self.sizer.check(account.available_capital, signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Direction, Levels, Position, PositionSide, ExitReason};
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn make_signal(entry: Decimal, stop: Decimal, target: Decimal, confidence: f64) -> Signal {
        Signal::new(
            "trend_following",
            "BTC",
            Direction::Buy,
            80.0,
            confidence,
            Levels { entry, stop, target },
            "",
        )
        .unwrap()
    }

    fn account(open: usize) -> AccountView {
        AccountView {
            open_positions: open,
            available_capital: dec!(1000000),
            total_capital: dec!(1000000),
        }
    }

    fn make_trade(pnl: Decimal) -> Trade {
        let pos = Position::open("BTC", PositionSide::Long, dec!(100), dec!(1), dec!(98), dec!(106), "t");
        let mut trade = Trade::from_close(&pos, dec!(100), ExitReason::StopLoss, noon());
        trade.pnl = pnl;
        trade
    }

    #[test]
    fn test_reward_risk_scenarios() {
        let gate = RiskGate::new(RiskConfig::default());
        let mut daily = DailyLossTracker::new(noon().date_naive(), dec!(1000000));

        let good = make_signal(dec!(100), dec!(98), dec!(106), 0.8);
        assert!(gate.admit(&good, &mut daily, account(0), noon()).is_ok());

        let poor = make_signal(dec!(100), dec!(99), dec!(100.5), 0.8);
        let rejected = gate.admit(&poor, &mut daily, account(0), noon()).unwrap_err();
        assert_eq!(rejected, RejectReason::RiskRewardBelowMinimum);
        assert_eq!(rejected.to_string(), "risk/reward below minimum");
    }

    #[test]
    fn test_checks_run_in_order() {
        let gate = RiskGate::new(RiskConfig::default());
        let mut daily = DailyLossTracker::new(noon().date_naive(), dec!(1000000));

        // ceiling is checked before reward/risk and confidence
        let poor = make_signal(dec!(100), dec!(99), dec!(100.5), 0.1);
        assert_eq!(
            gate.admit(&poor, &mut daily, account(3), noon()),
            Err(RejectReason::MaxOpenPositions)
        );

        let unsure = make_signal(dec!(100), dec!(98), dec!(106), 0.5);
        assert_eq!(
            gate.admit(&unsure, &mut daily, account(0), noon()),
            Err(RejectReason::ConfidenceBelowMinimum)
        );
    }

    #[test]
    fn test_daily_limit_sticky_until_rollover() {
        let mut daily = DailyLossTracker::new(noon().date_naive(), dec!(1000000));
        daily.record(&make_trade(dec!(-60000)));

        assert!(!daily.check_daily_loss_limit(noon(), dec!(940000), dec!(5)));

        // a later winner does not lift the pause
        daily.record(&make_trade(dec!(30000)));
        assert!(!daily.check_daily_loss_limit(noon() + Duration::hours(3), dec!(970000), dec!(5)));

        let tomorrow = noon() + Duration::days(1);
        assert!(daily.check_daily_loss_limit(tomorrow, dec!(970000), dec!(5)));
        assert_eq!(daily.starting_balance, dec!(970000));
        assert_eq!(daily.realized_pnl, Decimal::ZERO);
    }

    #[test]
    fn test_paused_day_rejects_everything() {
        let gate = RiskGate::new(RiskConfig::default());
        let mut daily = DailyLossTracker::new(noon().date_naive(), dec!(1000000));
        daily.paused = true;

        let good = make_signal(dec!(100), dec!(98), dec!(106), 0.9);
        assert_eq!(
            gate.admit(&good, &mut daily, account(0), noon()),
            Err(RejectReason::DailyLossLimit)
        );
    }

    #[test]
    fn test_performance_record() {
        let mut daily = DailyLossTracker::new(noon().date_naive(), dec!(1000000));
        daily.record(&make_trade(dec!(1000)));
        daily.record(&make_trade(dec!(-400)));

        let perf = daily.to_performance(dec!(1000600));
        assert_eq!(perf.total_trades, 2);
        assert_eq!(perf.winning_trades, 1);
        assert_eq!(perf.losing_trades, 1);
        assert_eq!(perf.pnl_pct, dec!(0.06));
    }
}
