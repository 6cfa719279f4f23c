//! Indicator provider capability and the pull-based accessor used by the
//! decision loop.

mod bars;
mod provider;
mod wilder;

use std::sync::Arc;

use crate::error::{EngineError, EngineResult};
use crate::market::MarketCache;
use crate::models::{IndicatorSnapshot, Timeframe};

pub use bars::{Bar, BarSeries, BarStore};
pub use provider::BarIndicatorProvider;

/// Source of precomputed indicator snapshots.
pub trait IndicatorProvider: Send + Sync {
    fn get_snapshot(
        &self,
        instrument: &str,
        timeframe: Timeframe,
        min_bars: usize,
    ) -> EngineResult<IndicatorSnapshot>;
}

/// Reads the snapshots the indicator producer last wrote into the cache.
#[derive(Clone)]
pub struct IndicatorAccess {
    cache: Arc<MarketCache>,
    min_bars: usize,
}

impl IndicatorAccess {
    pub fn new(cache: Arc<MarketCache>, min_bars: usize) -> Self {
        Self { cache, min_bars }
    }

    /// Latest snapshot, or `InsufficientData` when fewer than `min_bars`
    /// bars backed it (or nothing has been computed yet).
    pub fn get_indicators(&self, instrument: &str, timeframe: Timeframe) -> EngineResult<IndicatorSnapshot> {
        match self.cache.get_indicators(instrument, timeframe) {
            Some(snap) if snap.bars >= self.min_bars => Ok(snap),
            Some(snap) => Err(EngineError::InsufficientData {
                instrument: instrument.to_string(),
                bars: snap.bars,
                required: self.min_bars,
            }),
            None => Err(EngineError::InsufficientData {
                instrument: instrument.to_string(),
                bars: 0,
                required: self.min_bars,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_requires_min_bars() {
        let cache = Arc::new(MarketCache::new());
        let access = IndicatorAccess::new(cache.clone(), 50);

        assert!(matches!(
            access.get_indicators("BTC", Timeframe::M1),
            Err(EngineError::InsufficientData { bars: 0, .. })
        ));

        let thin = IndicatorSnapshot {
            bars: 49,
            ..Default::default()
        };
        cache.put_indicators("BTC", Timeframe::M1, thin);
        assert!(access.get_indicators("BTC", Timeframe::M1).is_err());

        let full = IndicatorSnapshot {
            bars: 50,
            rsi_14: Some(55.0),
            ..Default::default()
        };
        cache.put_indicators("BTC", Timeframe::M1, full);
        let snap = access.get_indicators("BTC", Timeframe::M1).unwrap();
        assert_eq!(snap.rsi_14, Some(55.0));
    }
}
