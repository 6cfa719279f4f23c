//! Exit supervision for open positions.
//!
//! Each tick marks every open position to the cached price and closes it on
//! stop, target or timeout. The trailing ratchet only ever tightens a stop.
//! Reconciliation drops positions the venue no longer holds.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use super::executor::Executor;
use super::ledger::Ledger;
use super::MonitorConfig;
use crate::db::Database;
use crate::error::EngineResult;
use crate::market::MarketCache;
use crate::models::{ExitReason, Position, PositionSide, Trade};
use crate::notify::{EngineEvent, Notifier};
use crate::venue::Venue;

/// Mark `position` at `price` and decide whether it should exit.
///
/// Stop beats target; the ratchet is applied after both are checked so a
/// freshly raised stop only fires on a later tick.
pub fn evaluate_exit(
    position: &mut Position,
    price: Decimal,
    now: DateTime<Utc>,
    config: &MonitorConfig,
) -> Option<ExitReason> {
    position.update_price(price);

    let (stop_hit, target_hit) = match position.side {
        PositionSide::Long => (price <= position.stop_loss, price >= position.take_profit),
        PositionSide::Short => (price >= position.stop_loss, price <= position.take_profit),
    };
    if stop_hit {
        return Some(ExitReason::StopLoss);
    }
    if target_hit {
        return Some(ExitReason::TakeProfit);
    }

    let pnl_pct = position.pnl_pct();
    if pnl_pct >= config.trailing_trigger_pct {
        ratchet_stop(position, config.trailing_stop_factor);
    }

    if position.holding_duration(now) > Duration::hours(config.timeout_hours)
        && pnl_pct < config.timeout_loss_pct
    {
        return Some(ExitReason::TimeoutLoss);
    }

    None
}

fn ratchet_stop(position: &mut Position, factor: Decimal) {
    let previous = position.stop_loss;
    position.stop_loss = match position.side {
        PositionSide::Long => previous.max(position.entry_price * factor),
        PositionSide::Short => previous.min(position.entry_price * (Decimal::TWO - factor)),
    };
    if position.stop_loss != previous {
        debug!(
            instrument = %position.instrument,
            from = %previous,
            to = %position.stop_loss,
            "Trailing stop raised"
        );
    }
}

/// Outcome of one monitor pass.
#[derive(Debug, Default, Clone)]
pub struct MonitorReport {
    pub checked: usize,
    pub closed: Vec<Trade>,
    pub errors: usize,
}

pub struct PositionMonitor {
    cache: Arc<MarketCache>,
    executor: Arc<Executor>,
    ledger: Arc<Ledger>,
    db: Arc<Database>,
    notifier: Arc<dyn Notifier>,
    config: MonitorConfig,
}

impl PositionMonitor {
    pub fn new(
        cache: Arc<MarketCache>,
        executor: Arc<Executor>,
        ledger: Arc<Ledger>,
        db: Arc<Database>,
        notifier: Arc<dyn Notifier>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            cache,
            executor,
            ledger,
            db,
            notifier,
            config,
        }
    }

    /// Check every open position once. Instruments with no cached price are
    /// skipped until the price producer catches up.
    pub async fn tick(&self, now: DateTime<Utc>) -> MonitorReport {
        let instruments: Vec<String> = self.ledger.lock().await.open.keys().cloned().collect();
        let mut report = MonitorReport::default();

        for instrument in instruments {
            let Some(market) = self.cache.get(&instrument) else {
                debug!(instrument = %instrument, "No cached price, skipping");
                continue;
            };

            let mut state = self.ledger.lock().await;
            let Some(position) = state.open.get_mut(&instrument) else {
                continue;
            };
            report.checked += 1;

            let Some(reason) = evaluate_exit(position, market.price, now, &self.config) else {
                let marked = position.clone();
                drop(state);
                if let Err(e) = self.db.update_position_mark(&marked).await {
                    warn!(instrument = %instrument, error = %e, "Failed to store position mark");
                }
                continue;
            };

            match self
                .executor
                .close(&mut state, &instrument, market.price, reason, now)
                .await
            {
                Ok(Some(trade)) => {
                    self.notifier.notify(EngineEvent::closed(&trade));
                    report.closed.push(trade);
                }
                Ok(None) => {}
                Err(e) => {
                    report.errors += 1;
                    warn!(
                        instrument = %instrument,
                        reason = %reason,
                        error = %e,
                        "Exit failed, will retry next tick"
                    );
                }
            }
        }

        report
    }

    /// Close positions whose venue holding has vanished.
    ///
    /// A holding below `phantom_threshold` of the recorded quantity counts as
    /// gone. The close is booked locally at the last known price.
    pub async fn reconcile(&self, venue: &dyn Venue, now: DateTime<Utc>) -> EngineResult<Vec<Trade>> {
        let balance = venue.get_balance().await?;
        let mut cleaned = Vec::new();

        let mut state = self.ledger.lock().await;
        let phantoms: Vec<(String, Decimal, Decimal)> = state
            .open
            .values()
            .filter_map(|p| {
                let held = balance.holding(&p.instrument);
                (held < p.quantity * self.config.phantom_threshold)
                    .then(|| (p.instrument.clone(), p.quantity, held))
            })
            .collect();

        for (instrument, recorded, held) in phantoms {
            let price = match self.cache.get(&instrument) {
                Some(market) => market.price,
                None => state
                    .open
                    .get(&instrument)
                    .map(|p| p.current_price)
                    .unwrap_or(Decimal::ZERO),
            };

            warn!(
                instrument = %instrument,
                recorded = %recorded,
                venue = %held,
                "Venue holding missing, closing phantom position"
            );

            if let Some(trade) = self
                .executor
                .close(&mut state, &instrument, price, ExitReason::PhantomCleanup, now)
                .await?
            {
                self.notifier.notify(EngineEvent::PhantomCleaned {
                    position_id: trade.position_id,
                    instrument: instrument.clone(),
                    recorded_quantity: recorded,
                    venue_quantity: held,
                });
                cleaned.push(trade);
            }
        }

        if !cleaned.is_empty() {
            info!(count = cleaned.len(), "Reconciliation closed phantom positions");
        }
        Ok(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Direction, Levels, MarketState, Signal};
    use crate::notify::RecordingNotifier;
    use crate::trading::{ExecutionConfig, LedgerState, RiskConfig, RiskGate, TradeMode};
    use crate::venue::mock::ScriptedVenue;
    use rust_decimal_macros::dec;

    fn make_position() -> Position {
        Position::open("BTC", PositionSide::Long, dec!(100), dec!(10), dec!(98), dec!(110), "trend_following")
    }

    #[test]
    fn test_trailing_stop_ratchets_and_holds() {
        let config = MonitorConfig::default();
        let mut pos = make_position();
        let now = pos.opened_at;

        assert_eq!(evaluate_exit(&mut pos, dec!(106), now, &config), None);
        assert!(pos.stop_loss >= dec!(101));

        // a pullback never loosens the stop
        assert_eq!(evaluate_exit(&mut pos, dec!(102), now, &config), None);
        assert!(pos.stop_loss >= dec!(101));

        assert_eq!(evaluate_exit(&mut pos, dec!(100.5), now, &config), Some(ExitReason::StopLoss));
    }

    #[test]
    fn test_stop_and_target() {
        let config = MonitorConfig::default();
        let mut pos = make_position();
        let now = pos.opened_at;
        assert_eq!(evaluate_exit(&mut pos, dec!(98), now, &config), Some(ExitReason::StopLoss));

        let mut pos = make_position();
        assert_eq!(evaluate_exit(&mut pos, dec!(110), now, &config), Some(ExitReason::TakeProfit));
    }

    #[test]
    fn test_short_levels_are_mirrored() {
        let config = MonitorConfig::default();
        let mut pos = Position::open("BTC", PositionSide::Short, dec!(100), dec!(1), dec!(102), dec!(90), "t");
        let now = pos.opened_at;

        assert_eq!(evaluate_exit(&mut pos, dec!(94), now, &config), None);
        assert!(pos.stop_loss <= dec!(99));
        assert_eq!(evaluate_exit(&mut pos, dec!(89), now, &config), Some(ExitReason::TakeProfit));
    }

    #[test]
    fn test_timeout_only_when_losing() {
        let config = MonitorConfig::default();
        let mut pos = make_position();
        let later = pos.opened_at + Duration::hours(25);

        assert_eq!(evaluate_exit(&mut pos, dec!(100.5), later, &config), None);
        assert_eq!(evaluate_exit(&mut pos, dec!(98.5), later, &config), Some(ExitReason::TimeoutLoss));
    }

    async fn setup() -> (Arc<ScriptedVenue>, Arc<MarketCache>, Arc<Ledger>, Arc<RecordingNotifier>, PositionMonitor) {
        let venue = Arc::new(ScriptedVenue::new());
        let db = Arc::new(Database::in_memory().await.unwrap());
        let cache = Arc::new(MarketCache::new());
        let ledger = Arc::new(Ledger::new(LedgerState::new(dec!(1000000), Utc::now())));
        let recorder = Arc::new(RecordingNotifier::default());
        let executor = Arc::new(Executor::new(
            venue.clone(),
            db.clone(),
            ExecutionConfig {
                mode: TradeMode::Paper,
                ..Default::default()
            },
        ));

        let signal = Signal::new(
            "trend_following",
            "BTC",
            Direction::Buy,
            80.0,
            0.8,
            Levels {
                entry: dec!(100),
                stop: dec!(98),
                target: dec!(110),
            },
            "",
        )
        .unwrap();
        {
            let mut state = ledger.lock().await;
            executor.open(&mut state, &signal, None, dec!(100000)).await.unwrap();
        }

        let monitor = PositionMonitor::new(
            cache.clone(),
            executor,
            ledger.clone(),
            db,
            recorder.clone(),
            MonitorConfig::default(),
        );
        (venue, cache, ledger, recorder, monitor)
    }

    #[tokio::test]
    async fn test_tick_closes_once() {
        let (_venue, cache, ledger, recorder, monitor) = setup().await;
        cache.put(MarketState::new("BTC", dec!(97), dec!(1)));

        let first = monitor.tick(Utc::now()).await;
        assert_eq!(first.closed.len(), 1);
        assert_eq!(first.closed[0].exit_reason, ExitReason::StopLoss);

        let second = monitor.tick(Utc::now()).await;
        assert!(second.closed.is_empty());
        assert_eq!(ledger.lock().await.open_count(), 0);
        assert_eq!(recorder.events().len(), 1);
    }

    #[tokio::test]
    async fn test_tick_skips_without_price() {
        let (_venue, _cache, ledger, _recorder, monitor) = setup().await;
        let report = monitor.tick(Utc::now()).await;

        assert_eq!(report.checked, 0);
        assert_eq!(ledger.lock().await.open_count(), 1);
    }

    #[tokio::test]
    async fn test_phantom_position_frees_slot() {
        let (venue, cache, ledger, recorder, monitor) = setup().await;
        cache.put(MarketState::new("BTC", dec!(101), dec!(1)));
        venue.set_holding("BTC", Decimal::ZERO);

        let cleaned = monitor.reconcile(venue.as_ref(), Utc::now()).await.unwrap();
        assert_eq!(cleaned.len(), 1);
        assert_eq!(cleaned[0].exit_reason, ExitReason::PhantomCleanup);
        assert!(venue.placed_orders().is_empty());
        assert!(matches!(recorder.events()[0], EngineEvent::PhantomCleaned { .. }));

        let gate = RiskGate::new(RiskConfig {
            max_open_positions: 1,
            ..Default::default()
        });
        let mut state = ledger.lock().await;
        let view = state.account_view();
        assert_eq!(view.open_positions, 0);

        let signal = Signal::new(
            "trend_following",
            "ETH",
            Direction::Buy,
            80.0,
            0.8,
            Levels {
                entry: dec!(100),
                stop: dec!(98),
                target: dec!(110),
            },
            "",
        )
        .unwrap();
        assert!(gate.admit(&signal, &mut state.daily, view, Utc::now()).is_ok());
    }

    #[tokio::test]
    async fn test_reconcile_keeps_held_positions() {
        let (venue, _cache, ledger, _recorder, monitor) = setup().await;
        venue.set_holding("BTC", dec!(1000));

        let cleaned = monitor.reconcile(venue.as_ref(), Utc::now()).await.unwrap();
        assert!(cleaned.is_empty());
        assert_eq!(ledger.lock().await.open_count(), 1);
    }
}
