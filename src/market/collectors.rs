//! Background producers refreshing the market cache on fixed cadences.
//!
//! Producers only read from the venue and write their own cache slots. They
//! never place orders and never wait on the decision loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::orderbook::{analyze_orderbook, AnomalyDetector};
use super::MarketCache;
use crate::error::EngineError;
use crate::indicators::{BarStore, IndicatorProvider};
use crate::models::MarketState;
use crate::trading::{MarketDataConfig, ScheduleConfig};
use crate::venue::Venue;

/// Shared inputs for all producers.
#[derive(Clone)]
pub struct ProducerContext {
    pub venue: Arc<dyn Venue>,
    pub cache: Arc<MarketCache>,
    pub bars: Arc<BarStore>,
    pub provider: Arc<dyn IndicatorProvider>,
    pub instruments: Vec<String>,
    pub market: MarketDataConfig,
}

/// Spawn the price, order-book and indicator producers.
pub fn spawn_producers(
    ctx: ProducerContext,
    schedule: &ScheduleConfig,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    vec![
        tokio::spawn(price_producer(
            ctx.clone(),
            Duration::from_secs(schedule.price_secs),
            shutdown.clone(),
        )),
        tokio::spawn(orderbook_producer(
            ctx.clone(),
            Duration::from_secs(schedule.orderbook_secs),
            shutdown.clone(),
        )),
        tokio::spawn(indicator_producer(
            ctx,
            Duration::from_secs(schedule.indicator_secs),
            shutdown,
        )),
    ]
}

/// Seed bar history from the venue so indicators are usable before
/// `min_bars` minutes of live quotes have accumulated.
pub async fn warm_up(ctx: &ProducerContext) {
    for instrument in &ctx.instruments {
        match ctx.venue.get_candles(instrument, ctx.market.timeframe).await {
            Ok(history) if !history.is_empty() => {
                debug!(instrument = %instrument, bars = history.len(), "Seeded bar history");
                ctx.bars.seed(instrument, history);
            }
            Ok(_) => {}
            Err(e) => warn!(instrument = %instrument, error = %e, "Bar warm-up failed"),
        }
    }
    refresh_indicators(ctx);
}

pub(crate) async fn wait_tick(ticker: &mut tokio::time::Interval, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return false;
    }
    tokio::select! {
        _ = ticker.tick() => true,
        _ = shutdown.changed() => false,
    }
}

async fn price_producer(ctx: ProducerContext, every: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(every_secs = every.as_secs(), "Price producer started");

    while wait_tick(&mut ticker, &mut shutdown).await {
        let quotes = join_all(ctx.instruments.iter().map(|i| ctx.venue.get_quote(i))).await;
        for (instrument, quote) in ctx.instruments.iter().zip(quotes) {
            match quote {
                Ok(q) => {
                    let now = Utc::now();
                    ctx.bars.push_quote(instrument, q.price, q.volume_24h, now);
                    ctx.cache.put(MarketState {
                        instrument: instrument.clone(),
                        price: q.price,
                        volume_24h: q.volume_24h,
                        timestamp: now,
                    });
                }
                Err(e) => log_fetch_error("quote", instrument, &e),
            }
        }
    }
    info!("Price producer stopped");
}

async fn orderbook_producer(ctx: ProducerContext, every: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut detector = AnomalyDetector::new();
    info!(every_secs = every.as_secs(), "Order-book producer started");

    while wait_tick(&mut ticker, &mut shutdown).await {
        let books = join_all(ctx.instruments.iter().map(|i| ctx.venue.get_orderbook(i))).await;
        for (instrument, book) in ctx.instruments.iter().zip(books) {
            let raw = match book {
                Ok(raw) => raw,
                Err(e) => {
                    log_fetch_error("orderbook", instrument, &e);
                    continue;
                }
            };
            let Some(state) = analyze_orderbook(instrument, &raw, ctx.market.book_depth, ctx.market.wall_multiplier)
            else {
                debug!(instrument = %instrument, "One-sided book, slot left unchanged");
                continue;
            };
            for anomaly in detector.observe(&state) {
                debug!(instrument = %instrument, anomaly = ?anomaly, "Order-book anomaly");
            }
            ctx.cache.put_orderbook(state);
        }
    }
    info!("Order-book producer stopped");
}

async fn indicator_producer(ctx: ProducerContext, every: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(every_secs = every.as_secs(), timeframe = %ctx.market.timeframe, "Indicator producer started");

    while wait_tick(&mut ticker, &mut shutdown).await {
        refresh_indicators(&ctx);
    }
    info!("Indicator producer stopped");
}

/// Recompute every instrument's snapshot. Thin histories are still written
/// so the accessor can report how many bars exist.
pub fn refresh_indicators(ctx: &ProducerContext) {
    for instrument in &ctx.instruments {
        match ctx.provider.get_snapshot(instrument, ctx.market.timeframe, 0) {
            Ok(snapshot) => {
                if snapshot.bars < ctx.market.min_bars {
                    debug!(
                        instrument = %instrument,
                        bars = snapshot.bars,
                        required = ctx.market.min_bars,
                        "Indicator history still filling"
                    );
                }
                ctx.cache.put_indicators(instrument, ctx.market.timeframe, snapshot);
            }
            Err(e) => warn!(instrument = %instrument, error = %e, "Indicator refresh failed"),
        }
    }
}

fn log_fetch_error(what: &'static str, instrument: &str, e: &EngineError) {
    match e {
        EngineError::Timeout { .. } => debug!(instrument = %instrument, what, error = %e, "Fetch timed out"),
        _ => warn!(instrument = %instrument, what, error = %e, "Fetch failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::BarIndicatorProvider;
    use crate::models::Timeframe;
    use crate::venue::mock::ScriptedVenue;
    use rust_decimal_macros::dec;

    fn context(venue: Arc<ScriptedVenue>) -> ProducerContext {
        let bars = Arc::new(BarStore::new(300));
        ProducerContext {
            venue,
            cache: Arc::new(MarketCache::new()),
            bars: bars.clone(),
            provider: Arc::new(BarIndicatorProvider::new(bars)),
            instruments: vec!["BTC".into(), "ETH".into()],
            market: MarketDataConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_producers_fill_cache_and_stop_on_shutdown() {
        let venue = Arc::new(ScriptedVenue::new());
        venue.set_quote("BTC", dec!(100), dec!(10));
        // ETH has no quote: its fetch fails without affecting BTC
        venue.set_book("BTC", &[(dec!(99), dec!(2))], &[(dec!(101), dec!(1))]);

        let ctx = context(venue);
        let schedule = ScheduleConfig {
            price_secs: 1,
            orderbook_secs: 1,
            indicator_secs: 1,
            ..Default::default()
        };
        let (tx, rx) = watch::channel(false);
        let handles = spawn_producers(ctx.clone(), &schedule, rx);

        // first interval tick fires immediately
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(ctx.cache.get("BTC").unwrap().price, dec!(100));
        assert!(ctx.cache.get("ETH").is_none());
        assert_eq!(ctx.cache.get_orderbook("BTC").unwrap().imbalance, Some(2.0));
        assert!(ctx.cache.get_indicators("BTC", Timeframe::M1).is_some());
    }
}
