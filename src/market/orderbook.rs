//! Order-book aggregation: imbalance, spread, walls and anomaly flags.

use std::collections::HashMap;

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::models::{BookLevel, BookSide, OrderBookState, Wall};
use crate::venue::RawOrderBook;

/// Aggregate the top `depth` levels of each side.
///
/// Returns `None` when either side is empty: without a best bid and a best
/// ask there is no spread or mid, and evaluators must abstain. An ask side
/// with zero total size yields `imbalance: None`, never a neutral 1.0.
pub fn analyze_orderbook(
    instrument: &str,
    raw: &RawOrderBook,
    depth: usize,
    wall_multiplier: f64,
) -> Option<OrderBookState> {
    let bids = &raw.bids[..raw.bids.len().min(depth)];
    let asks = &raw.asks[..raw.asks.len().min(depth)];
    let best_bid = bids.first()?.price;
    let best_ask = asks.first()?.price;

    let bid_volume: Decimal = bids.iter().map(|l| l.quantity).sum();
    let ask_volume: Decimal = asks.iter().map(|l| l.quantity).sum();

    let imbalance = if ask_volume.is_zero() {
        None
    } else {
        (bid_volume / ask_volume).to_f64()
    };

    let spread = best_ask - best_bid;
    let mid = (best_bid + best_ask) / Decimal::TWO;
    let spread_pct = if mid.is_zero() {
        0.0
    } else {
        (spread / mid * Decimal::ONE_HUNDRED).to_f64().unwrap_or(0.0)
    };

    Some(OrderBookState {
        instrument: instrument.to_string(),
        best_bid,
        best_ask,
        spread,
        spread_pct,
        bid_volume,
        ask_volume,
        imbalance,
        bid_walls: detect_walls(BookSide::Bid, bids, mid, wall_multiplier),
        ask_walls: detect_walls(BookSide::Ask, asks, mid, wall_multiplier),
        timestamp: Utc::now(),
    })
}

/// Levels whose size exceeds `multiplier` times the side's average level size.
fn detect_walls(side: BookSide, levels: &[BookLevel], mid: Decimal, multiplier: f64) -> Vec<Wall> {
    if levels.is_empty() {
        return Vec::new();
    }
    let total: Decimal = levels.iter().map(|l| l.quantity).sum();
    let avg = (total / Decimal::from(levels.len())).to_f64().unwrap_or(0.0);
    if avg <= 0.0 {
        return Vec::new();
    }
    let mid = mid.to_f64().unwrap_or(0.0);

    levels
        .iter()
        .filter_map(|l| {
            let qty = l.quantity.to_f64()?;
            if qty <= avg * multiplier {
                return None;
            }
            let price = l.price.to_f64()?;
            let distance_pct = if mid > 0.0 {
                (price - mid).abs() / mid * 100.0
            } else {
                0.0
            };
            Some(Wall {
                side,
                price: l.price,
                quantity: l.quantity,
                ratio: qty / avg,
                distance_pct,
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum BookAnomaly {
    ExtremeImbalance(f64),
    WhaleWall { side: BookSide, ratio: f64 },
    SpreadSpike { change_pct: f64 },
    VolumeSurge { change_pct: f64 },
}

/// Compares each book against the previous one seen for the instrument.
#[derive(Debug, Default)]
pub struct AnomalyDetector {
    previous: HashMap<String, (f64, Decimal)>,
}

impl AnomalyDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, book: &OrderBookState) -> Vec<BookAnomaly> {
        let mut found = Vec::new();

        if let Some(imb) = book.imbalance {
            if imb > 2.0 || imb < 0.5 {
                found.push(BookAnomaly::ExtremeImbalance(imb));
            }
        }
        for wall in book.bid_walls.iter().chain(book.ask_walls.iter()) {
            if wall.ratio > 5.0 {
                found.push(BookAnomaly::WhaleWall {
                    side: wall.side,
                    ratio: wall.ratio,
                });
            }
        }

        let volume = book.bid_volume + book.ask_volume;
        if let Some((prev_spread, prev_volume)) = self.previous.get(&book.instrument) {
            if *prev_spread > 0.0 {
                let change_pct = (book.spread_pct - prev_spread) / prev_spread * 100.0;
                if change_pct > 50.0 {
                    found.push(BookAnomaly::SpreadSpike { change_pct });
                }
            }
            if !prev_volume.is_zero() {
                let change_pct = ((volume - prev_volume) / prev_volume * Decimal::ONE_HUNDRED)
                    .to_f64()
                    .unwrap_or(0.0);
                if change_pct > 100.0 {
                    found.push(BookAnomaly::VolumeSurge { change_pct });
                }
            }
        }
        self.previous
            .insert(book.instrument.clone(), (book.spread_pct, volume));

        found
    }
}
