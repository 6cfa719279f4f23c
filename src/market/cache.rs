//! Latest-value cache shared between producers and the decision loop.
//!
//! Each slot has exactly one writer (its producer). Locks are held only for a
//! map insert or an `Arc` clone, so readers never wait on network I/O.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::models::{IndicatorSnapshot, MarketState, OrderBookState, Timeframe};

type Slots<K, V> = RwLock<HashMap<K, Arc<V>>>;

#[derive(Default)]
pub struct MarketCache {
    quotes: Slots<String, MarketState>,
    books: Slots<String, OrderBookState>,
    indicators: Slots<(String, Timeframe), IndicatorSnapshot>,
}

fn read<K, V>(slots: &Slots<K, V>, key: &K) -> Option<Arc<V>>
where
    K: std::hash::Hash + Eq,
{
    let map = slots.read().unwrap_or_else(|e| e.into_inner());
    map.get(key).cloned()
}

fn write<K, V>(slots: &Slots<K, V>, key: K, value: V)
where
    K: std::hash::Hash + Eq,
{
    let value = Arc::new(value);
    let mut map = slots.write().unwrap_or_else(|e| e.into_inner());
    map.insert(key, value);
}

impl MarketCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest quote state, or `None` before the first write.
    pub fn get(&self, instrument: &str) -> Option<MarketState> {
        read(&self.quotes, &instrument.to_string()).map(|s| (*s).clone())
    }

    pub fn get_orderbook(&self, instrument: &str) -> Option<OrderBookState> {
        read(&self.books, &instrument.to_string()).map(|s| (*s).clone())
    }

    pub fn get_indicators(&self, instrument: &str, timeframe: Timeframe) -> Option<IndicatorSnapshot> {
        read(&self.indicators, &(instrument.to_string(), timeframe)).map(|s| (*s).clone())
    }

    /// Last write wins.
    pub fn put(&self, state: MarketState) {
        write(&self.quotes, state.instrument.clone(), state);
    }

    pub fn put_orderbook(&self, book: OrderBookState) {
        write(&self.books, book.instrument.clone(), book);
    }

    pub fn put_indicators(&self, instrument: &str, timeframe: Timeframe, snapshot: IndicatorSnapshot) {
        write(&self.indicators, (instrument.to_string(), timeframe), snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_absent_before_first_write() {
        let cache = MarketCache::new();
        assert!(cache.get("BTC").is_none());
        assert!(cache.get_orderbook("BTC").is_none());
        assert!(cache.get_indicators("BTC", Timeframe::M1).is_none());
    }

    #[test]
    fn test_last_write_wins() {
        let cache = MarketCache::new();
        cache.put(MarketState::new("BTC", dec!(100), dec!(5)));
        cache.put(MarketState::new("BTC", dec!(101), dec!(6)));
        cache.put(MarketState::new("ETH", dec!(10), dec!(1)));

        assert_eq!(cache.get("BTC").unwrap().price, dec!(101));
        assert_eq!(cache.get("ETH").unwrap().price, dec!(10));
    }

    #[test]
    fn test_concurrent_readers_and_writer() {
        let cache = Arc::new(MarketCache::new());
        let writer = {
            let cache = cache.clone();
            std::thread::spawn(move || {
                for i in 0..1000 {
                    cache.put(MarketState::new("BTC", rust_decimal::Decimal::from(i), dec!(0)));
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    let mut last = dec!(-1);
                    for _ in 0..1000 {
                        if let Some(s) = cache.get("BTC") {
                            // single writer, monotone values
                            assert!(s.price >= last);
                            last = s.price;
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(cache.get("BTC").unwrap().price, dec!(999));
    }
}
