//! Market state: latest-value cache, order-book analysis and the producers
//! that keep both fresh.

mod cache;
mod collectors;
mod orderbook;

pub use cache::MarketCache;
pub use collectors::{refresh_indicators, spawn_producers, warm_up, ProducerContext};
pub(crate) use collectors::wait_tick;
pub use orderbook::{analyze_orderbook, AnomalyDetector, BookAnomaly};
