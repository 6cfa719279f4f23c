//! Indicator snapshots computed from bar series.

use std::sync::Arc;

use chrono::Utc;
use ta::indicators::{
    BollingerBands, ExponentialMovingAverage, MovingAverageConvergenceDivergence,
    RelativeStrengthIndex, SimpleMovingAverage,
};
use ta::Next;

use super::wilder;
use super::{Bar, BarStore, IndicatorProvider};
use crate::error::{EngineError, EngineResult};
use crate::models::{IndicatorSnapshot, Timeframe};

const RSI_PERIOD: usize = 14;
const MACD_FAST: usize = 12;
const MACD_SLOW: usize = 26;
const MACD_SIGNAL: usize = 9;
const BB_PERIOD: usize = 20;
const BB_MULTIPLIER: f64 = 2.0;
const ATR_PERIOD: usize = 14;
const ADX_PERIOD: usize = 14;
const STOCH_K: usize = 14;
const STOCH_D: usize = 3;
const VOLUME_SMA: usize = 20;

/// Computes snapshots from the shared [`BarStore`].
pub struct BarIndicatorProvider {
    bars: Arc<BarStore>,
}

impl BarIndicatorProvider {
    pub fn new(bars: Arc<BarStore>) -> Self {
        Self { bars }
    }
}

impl IndicatorProvider for BarIndicatorProvider {
    fn get_snapshot(
        &self,
        instrument: &str,
        timeframe: Timeframe,
        min_bars: usize,
    ) -> EngineResult<IndicatorSnapshot> {
        let bars = self.bars.bars(instrument, timeframe);
        if bars.len() < min_bars {
            return Err(EngineError::InsufficientData {
                instrument: instrument.to_string(),
                bars: bars.len(),
                required: min_bars,
            });
        }
        Ok(compute_snapshot(&bars))
    }
}

fn ema(closes: &[f64], period: usize) -> Option<f64> {
    if closes.len() < period {
        return None;
    }
    let mut ind = ExponentialMovingAverage::new(period).ok()?;
    closes.iter().map(|c| ind.next(*c)).last()
}

fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if closes.len() <= period {
        return None;
    }
    let mut ind = RelativeStrengthIndex::new(period).ok()?;
    closes.iter().map(|c| ind.next(*c)).last()
}

fn sma(values: &[f64], period: usize) -> Option<f64> {
    if values.len() < period {
        return None;
    }
    let mut ind = SimpleMovingAverage::new(period).ok()?;
    values.iter().map(|v| ind.next(*v)).last()
}

/// Ratio of the last close to the close `lookback` bars earlier, minus one.
fn change(closes: &[f64], lookback: usize) -> Option<f64> {
    let n = closes.len();
    if n <= lookback {
        return None;
    }
    let then = closes[n - 1 - lookback];
    if then == 0.0 {
        return None;
    }
    Some(closes[n - 1] / then - 1.0)
}

pub fn compute_snapshot(bars: &[Bar]) -> IndicatorSnapshot {
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();

    let mut snap = IndicatorSnapshot {
        close: closes.last().copied(),
        ema_9: ema(&closes, 9),
        ema_21: ema(&closes, 21),
        ema_50: ema(&closes, 50),
        ema_200: ema(&closes, 200),
        rsi_14: rsi(&closes, RSI_PERIOD),
        change_1: change(&closes, 1),
        change_5: change(&closes, 5),
        change_15: change(&closes, 15),
        change_60: change(&closes, 60),
        bars: bars.len(),
        computed_at: Some(Utc::now()),
        ..Default::default()
    };

    if closes.len() >= MACD_SLOW + MACD_SIGNAL {
        if let Ok(mut macd) = MovingAverageConvergenceDivergence::new(MACD_FAST, MACD_SLOW, MACD_SIGNAL) {
            if let Some(out) = closes.iter().map(|c| macd.next(*c)).last() {
                snap.macd = Some(out.macd);
                snap.macd_signal = Some(out.signal);
                snap.macd_histogram = Some(out.histogram);
            }
        }
    }

    if closes.len() >= BB_PERIOD {
        if let Ok(mut bb) = BollingerBands::new(BB_PERIOD, BB_MULTIPLIER) {
            if let Some(out) = closes.iter().map(|c| bb.next(*c)).last() {
                snap.bb_upper = Some(out.upper);
                snap.bb_middle = Some(out.average);
                snap.bb_lower = Some(out.lower);
            }
        }
    }

    snap.atr_14 = wilder::last(&wilder::atr(bars, ATR_PERIOD));
    snap.trend_strength = wilder::last(&wilder::adx(bars, ADX_PERIOD));
    let (k, d) = wilder::stochastic(bars, STOCH_K, STOCH_D);
    snap.stoch_k = wilder::last(&k);
    snap.stoch_d = wilder::last(&d);

    snap.volume_sma_20 = sma(&volumes, VOLUME_SMA);
    snap.volume_ratio = match (snap.volume_sma_20, volumes.last()) {
        (Some(avg), Some(v)) if avg > 0.0 => Some(v / avg),
        _ => None,
    };

    snap
}
