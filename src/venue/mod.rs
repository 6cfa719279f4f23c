//! Exchange capability consumed by the engine.
//!
//! The engine only talks to `dyn Venue`. Every call made through
//! [`TimedVenue`] is bounded; elapsed calls surface as retryable timeouts.

mod rest;
#[cfg(test)]
pub mod mock;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{with_timeout, EngineResult};
use crate::indicators::Bar;
use crate::models::{BookLevel, OrderSide, Timeframe};

pub use rest::{Credentials, RestVenue};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub price: Decimal,
    pub volume_24h: Decimal,
}

/// Raw book levels, best first on both sides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawOrderBook {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    /// Quote-currency cash available for new orders
    pub available: Decimal,

    /// Base-asset holdings keyed by instrument
    pub holdings: HashMap<String, Decimal>,
}

impl Balance {
    pub fn holding(&self, instrument: &str) -> Decimal {
        self.holdings.get(instrument).copied().unwrap_or(Decimal::ZERO)
    }
}

#[async_trait]
pub trait Venue: Send + Sync {
    async fn get_quote(&self, instrument: &str) -> EngineResult<Quote>;

    async fn get_orderbook(&self, instrument: &str) -> EngineResult<RawOrderBook>;

    /// Limit order when `price` is set, market order otherwise.
    async fn place_order(
        &self,
        instrument: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Option<Decimal>,
    ) -> EngineResult<OrderAck>;

    async fn get_balance(&self) -> EngineResult<Balance>;

    /// Recent bars for indicator warm-up. Venues without history return none.
    async fn get_candles(&self, _instrument: &str, _timeframe: Timeframe) -> EngineResult<Vec<Bar>> {
        Ok(Vec::new())
    }
}

/// Applies a fixed timeout to every call of the wrapped venue.
pub struct TimedVenue {
    inner: Arc<dyn Venue>,
    limit: Duration,
}

impl TimedVenue {
    pub fn new(inner: Arc<dyn Venue>, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

#[async_trait]
impl Venue for TimedVenue {
    async fn get_quote(&self, instrument: &str) -> EngineResult<Quote> {
        with_timeout("get_quote", self.limit, self.inner.get_quote(instrument)).await
    }

    async fn get_orderbook(&self, instrument: &str) -> EngineResult<RawOrderBook> {
        with_timeout("get_orderbook", self.limit, self.inner.get_orderbook(instrument)).await
    }

    async fn place_order(
        &self,
        instrument: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Option<Decimal>,
    ) -> EngineResult<OrderAck> {
        with_timeout(
            "place_order",
            self.limit,
            self.inner.place_order(instrument, side, quantity, price),
        )
        .await
    }

    async fn get_balance(&self) -> EngineResult<Balance> {
        with_timeout("get_balance", self.limit, self.inner.get_balance()).await
    }

    async fn get_candles(&self, instrument: &str, timeframe: Timeframe) -> EngineResult<Vec<Bar>> {
        with_timeout("get_candles", self.limit, self.inner.get_candles(instrument, timeframe)).await
    }
}
