//! Latest-value market views: quote state and order-book aggregate.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Latest known price/volume for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketState {
    pub instrument: String,

    /// Last traded price in quote currency
    pub price: Decimal,

    /// Rolling 24h traded volume in base units
    pub volume_24h: Decimal,

    pub timestamp: DateTime<Utc>,
}

impl MarketState {
    pub fn new(instrument: impl Into<String>, price: Decimal, volume_24h: Decimal) -> Self {
        Self {
            instrument: instrument.into(),
            price,
            volume_24h,
            timestamp: Utc::now(),
        }
    }
}

/// One price level of a raw book.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

impl BookLevel {
    pub fn new(price: Decimal, quantity: Decimal) -> Self {
        Self { price, quantity }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookSide {
    Bid,
    Ask,
}

/// A level whose size stands out against the side's average level size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wall {
    pub side: BookSide,
    pub price: Decimal,
    pub quantity: Decimal,

    /// quantity / average level quantity on that side
    pub ratio: f64,

    /// Distance from mid price, in percent
    pub distance_pct: f64,
}

/// Aggregated top-N order-book view for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookState {
    pub instrument: String,
    pub best_bid: Decimal,
    pub best_ask: Decimal,
    pub spread: Decimal,

    /// Spread as percent of the mid price
    pub spread_pct: f64,

    pub bid_volume: Decimal,
    pub ask_volume: Decimal,

    /// bid_volume / ask_volume; `None` when the ask side is empty
    pub imbalance: Option<f64>,

    pub bid_walls: Vec<Wall>,
    pub ask_walls: Vec<Wall>,
    pub timestamp: DateTime<Utc>,
}

impl OrderBookState {
    pub fn mid_price(&self) -> Decimal {
        (self.best_bid + self.best_ask) / Decimal::TWO
    }

    /// Largest wall ratio on a side, if any wall was detected.
    pub fn max_wall_ratio(&self, side: BookSide) -> Option<f64> {
        let walls = match side {
            BookSide::Bid => &self.bid_walls,
            BookSide::Ask => &self.ask_walls,
        };
        walls.iter().map(|w| w.ratio).reduce(f64::max)
    }
}
