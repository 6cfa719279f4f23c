//! Order placement and position bookkeeping.
//!
//! Paper and live modes return the same shapes. A venue failure leaves the
//! ledger and the store untouched; the caller retries on its next cycle.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::ledger::LedgerState;
use super::{ExecutionConfig, TradeMode};
use crate::db::Database;
use crate::error::{EngineError, EngineResult, RejectReason};
use crate::models::{
    Direction, ExitReason, Order, OrderRole, OrderSide, OrderStatus, Position, PositionSide,
    Signal, Trade,
};
use crate::venue::Venue;

/// Result of a fill, paper or live.
#[derive(Debug, Clone)]
struct Fill {
    price: Decimal,
    external_id: String,
}

pub struct Executor {
    venue: Arc<dyn Venue>,
    db: Arc<Database>,
    config: ExecutionConfig,
}

impl Executor {
    pub fn new(venue: Arc<dyn Venue>, db: Arc<Database>, config: ExecutionConfig) -> Self {
        Self { venue, db, config }
    }

    /// Open a position for `signal` with `sized_capital` of notional.
    ///
    /// Below the minimum notional nothing is sent to the venue. On success
    /// the position and its opening order are stored together and the
    /// position's cost is taken from available capital.
    pub async fn open(
        &self,
        state: &mut LedgerState,
        signal: &Signal,
        signal_id: Option<i64>,
        sized_capital: Decimal,
    ) -> EngineResult<Position> {
        if sized_capital < self.config.min_notional {
            return Err(EngineError::Rejected(RejectReason::BelowMinNotional));
        }
        if signal.entry_price <= Decimal::ZERO {
            return Err(EngineError::Rejected(RejectReason::InvalidLevels));
        }

        let quantity = (sized_capital / signal.entry_price)
            .round_dp_with_strategy(self.config.quantity_dp, RoundingStrategy::ToZero);
        if quantity <= Decimal::ZERO {
            return Err(EngineError::Rejected(RejectReason::PositionTooSmall));
        }

        let side = match signal.direction {
            Direction::Buy => PositionSide::Long,
            Direction::Sell => PositionSide::Short,
        };
        let order_side = side.opening_order();

        let fill = self
            .fill(&signal.instrument, order_side, quantity, signal.entry_price)
            .await?;

        let mut position = Position::open(
            &signal.instrument,
            side,
            fill.price,
            quantity,
            signal.stop_loss,
            signal.take_profit,
            &signal.strategy,
        );
        position.signal_id = signal_id;

        let order = Order {
            position_id: 0,
            role: OrderRole::Open,
            side: order_side,
            price: fill.price,
            quantity,
            filled_quantity: quantity,
            status: OrderStatus::Filled,
            external_id: Some(fill.external_id),
            created_at: position.opened_at,
        };

        position.id = self.db.insert_position(&position, &order).await?;

        state.available_capital -= position.cost_basis();
        state.open.insert(position.instrument.clone(), position.clone());

        info!(
            instrument = %position.instrument,
            strategy = %position.strategy,
            side = position.side.as_str(),
            entry = %position.entry_price,
            quantity = %position.quantity,
            stop = %position.stop_loss,
            target = %position.take_profit,
            mode = %self.config.mode,
            "Opened position"
        );

        Ok(position)
    }

    /// Close the OPEN position on `instrument` at `price`.
    ///
    /// Returns `None` when there is nothing to close, so repeated exits are
    /// no-ops. Local-only reasons never reach the venue.
    pub async fn close(
        &self,
        state: &mut LedgerState,
        instrument: &str,
        price: Decimal,
        reason: ExitReason,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<Trade>> {
        let Some(position) = state.open.get(instrument).cloned() else {
            debug!(instrument = %instrument, "No open position to close");
            return Ok(None);
        };

        let order_side = position.side.closing_order();
        let (order_price, external_id, status) = if reason.is_local_only() {
            (price, None, OrderStatus::Reconciled)
        } else {
            let fill = self.fill(instrument, order_side, position.quantity, price).await?;
            (fill.price, Some(fill.external_id), OrderStatus::Filled)
        };

        let order = Order {
            position_id: position.id,
            role: OrderRole::Close,
            side: order_side,
            price: order_price,
            quantity: position.quantity,
            filled_quantity: position.quantity,
            status,
            external_id,
            created_at: now,
        };
        // Both legs priced where their orders went out.
        let trade = Trade::from_close(&position, order_price, reason, now);

        let closed = match self.db.close_position(&trade, &order).await {
            Ok(closed) => closed,
            Err(EngineError::DataConflict(msg)) => {
                debug!(instrument = %instrument, conflict = %msg, "Close already recorded");
                false
            }
            Err(e) => return Err(e),
        };

        state.open.remove(instrument);
        if !closed {
            warn!(
                instrument = %instrument,
                position_id = position.id,
                "Position was not OPEN in store, dropped from ledger"
            );
            return Ok(None);
        }

        state.available_capital += position.cost_basis() + trade.pnl;
        let total = state.total_capital();
        state.daily.roll(now, total);
        state.daily.record(&trade);

        info!(
            instrument = %instrument,
            strategy = %trade.strategy,
            reason = %reason,
            entry = %trade.entry_price,
            exit = %trade.exit_price,
            pnl = %trade.pnl,
            pnl_pct = %trade.pnl_pct.round_dp(2),
            "Closed position"
        );

        self.record_account(state, now).await;
        Ok(Some(trade))
    }

    /// Upsert today's performance and append a balance snapshot.
    /// Failures are logged only; the close itself is already durable.
    ///
    /// The daily record is rolled first so a snapshot taken after midnight
    /// starts a new day instead of rewriting yesterday's.
    pub async fn record_account(&self, state: &mut LedgerState, now: DateTime<Utc>) {
        let total = state.total_capital();
        state.daily.roll(now, total);
        let snapshot = state.snapshot(now);
        let perf = state.daily.to_performance(snapshot.total_capital);

        if let Err(e) = self.db.upsert_daily_performance(&perf).await {
            warn!(error = %e, "Failed to store daily performance");
        }
        if let Err(e) = self.db.insert_balance_snapshot(&snapshot).await {
            warn!(error = %e, "Failed to store balance snapshot");
        }
    }

    async fn fill(
        &self,
        instrument: &str,
        side: OrderSide,
        quantity: Decimal,
        reference: Decimal,
    ) -> EngineResult<Fill> {
        match self.config.mode {
            TradeMode::Paper => Ok(Fill {
                price: reference,
                external_id: format!("paper_{}_{}", instrument, Uuid::new_v4().simple()),
            }),
            TradeMode::Live => {
                let price = self.limit_price(instrument, side, reference).await;
                let ack = self
                    .venue
                    .place_order(instrument, side, quantity, Some(price))
                    .await?;
                debug!(
                    instrument = %instrument,
                    side = %side,
                    order_id = %ack.order_id,
                    status = %ack.status,
                    "Order accepted"
                );
                Ok(Fill {
                    price,
                    external_id: ack.order_id,
                })
            }
        }
    }

    /// Top of book offset through the spread; `reference` when the book is unavailable.
    async fn limit_price(&self, instrument: &str, side: OrderSide, reference: Decimal) -> Decimal {
        let top = match self.venue.get_orderbook(instrument).await {
            Ok(book) => match side {
                OrderSide::Buy => book.asks.first().map(|l| l.price),
                OrderSide::Sell => book.bids.first().map(|l| l.price),
            },
            Err(e) => {
                warn!(instrument = %instrument, error = %e, "Order book unavailable, pricing from reference");
                None
            }
        };
        let base = top.filter(|p| *p > Decimal::ZERO).unwrap_or(reference);

        let price = match side {
            OrderSide::Buy => base * (Decimal::ONE + self.config.limit_offset_pct),
            OrderSide::Sell => base * (Decimal::ONE - self.config.limit_offset_pct),
        };
        price.round_dp(8)
    }
}
