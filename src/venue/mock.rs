//! Scripted in-memory venue for tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::{Balance, OrderAck, Quote, RawOrderBook, Venue};
use crate::error::{EngineError, EngineResult};
use crate::models::{BookLevel, OrderSide};

#[derive(Debug, Clone, PartialEq)]
pub struct PlacedOrder {
    pub instrument: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
}

#[derive(Default)]
struct Script {
    quotes: HashMap<String, Quote>,
    books: HashMap<String, RawOrderBook>,
    balance: Balance,
    failing: bool,
    delay: Option<Duration>,
    placed: Vec<PlacedOrder>,
    next_id: u64,
}

#[derive(Default)]
pub struct ScriptedVenue {
    script: Mutex<Script>,
}

impl ScriptedVenue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_quote(&self, instrument: &str, price: Decimal, volume: Decimal) {
        self.script.lock().unwrap().quotes.insert(
            instrument.to_string(),
            Quote {
                price,
                volume_24h: volume,
            },
        );
    }

    pub fn set_book(&self, instrument: &str, bids: &[(Decimal, Decimal)], asks: &[(Decimal, Decimal)]) {
        let to_levels = |levels: &[(Decimal, Decimal)]| {
            levels.iter().map(|(p, q)| BookLevel::new(*p, *q)).collect()
        };
        self.script.lock().unwrap().books.insert(
            instrument.to_string(),
            RawOrderBook {
                bids: to_levels(bids),
                asks: to_levels(asks),
            },
        );
    }

    pub fn set_holding(&self, instrument: &str, quantity: Decimal) {
        self.script
            .lock()
            .unwrap()
            .balance
            .holdings
            .insert(instrument.to_string(), quantity);
    }

    pub fn set_available(&self, available: Decimal) {
        self.script.lock().unwrap().balance.available = available;
    }

    pub fn set_failing(&self, failing: bool) {
        self.script.lock().unwrap().failing = failing;
    }

    pub fn set_delay(&self, delay: Duration) {
        self.script.lock().unwrap().delay = Some(delay);
    }

    pub fn placed_orders(&self) -> Vec<PlacedOrder> {
        self.script.lock().unwrap().placed.clone()
    }

    async fn gate(&self) -> EngineResult<()> {
        let (delay, failing) = {
            let script = self.script.lock().unwrap();
            (script.delay, script.failing)
        };
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        if failing {
            return Err(EngineError::Venue("scripted failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Venue for ScriptedVenue {
    async fn get_quote(&self, instrument: &str) -> EngineResult<Quote> {
        self.gate().await?;
        self.script
            .lock()
            .unwrap()
            .quotes
            .get(instrument)
            .cloned()
            .ok_or_else(|| EngineError::Venue(format!("no quote for {}", instrument)))
    }

    async fn get_orderbook(&self, instrument: &str) -> EngineResult<RawOrderBook> {
        self.gate().await?;
        self.script
            .lock()
            .unwrap()
            .books
            .get(instrument)
            .cloned()
            .ok_or_else(|| EngineError::Venue(format!("no book for {}", instrument)))
    }

    async fn place_order(
        &self,
        instrument: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Option<Decimal>,
    ) -> EngineResult<OrderAck> {
        self.gate().await?;
        let mut script = self.script.lock().unwrap();
        script.next_id += 1;
        let order_id = format!("scripted-{}", script.next_id);
        script.placed.push(PlacedOrder {
            instrument: instrument.to_string(),
            side,
            quantity,
            price,
        });
        Ok(OrderAck {
            order_id,
            status: "0000".into(),
        })
    }

    async fn get_balance(&self) -> EngineResult<Balance> {
        self.gate().await?;
        Ok(self.script.lock().unwrap().balance.clone())
    }
}
