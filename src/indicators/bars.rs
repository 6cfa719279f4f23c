//! OHLCV bars built from polled quotes.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::Timeframe;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub start: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Bounded series of one-minute bars for one instrument.
#[derive(Debug, Clone)]
pub struct BarSeries {
    bars: VecDeque<Bar>,
    capacity: usize,
    last_volume_24h: Option<f64>,
}

impl BarSeries {
    pub fn new(capacity: usize) -> Self {
        Self {
            bars: VecDeque::with_capacity(capacity),
            capacity,
            last_volume_24h: None,
        }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Fold a quote into the current minute's bar.
    ///
    /// Bar volume is the growth of the venue's rolling 24h volume between
    /// quotes; a shrinking rolling window contributes nothing.
    pub fn push_quote(&mut self, price: Decimal, volume_24h: Decimal, at: DateTime<Utc>) {
        let Some(price) = price.to_f64() else {
            return;
        };
        let volume_24h = volume_24h.to_f64().unwrap_or(0.0);
        let traded = match self.last_volume_24h {
            Some(prev) => (volume_24h - prev).max(0.0),
            None => 0.0,
        };
        self.last_volume_24h = Some(volume_24h);

        let start = at.duration_trunc(TimeDelta::minutes(1)).unwrap_or(at);
        match self.bars.back_mut() {
            Some(bar) if bar.start == start => {
                bar.high = bar.high.max(price);
                bar.low = bar.low.min(price);
                bar.close = price;
                bar.volume += traded;
            }
            Some(bar) if bar.start > start => {}
            _ => self.push_bar(Bar {
                start,
                open: price,
                high: price,
                low: price,
                close: price,
                volume: traded,
            }),
        }
    }

    /// Seed from venue history. Only bars older than the current tail are taken.
    pub fn seed(&mut self, mut history: Vec<Bar>) {
        history.sort_by_key(|b| b.start);
        let cutoff = self.bars.front().map(|b| b.start);
        let mut merged: VecDeque<Bar> = history
            .into_iter()
            .filter(|b| cutoff.map_or(true, |c| b.start < c))
            .collect();
        merged.extend(self.bars.drain(..));
        while merged.len() > self.capacity {
            merged.pop_front();
        }
        self.bars = merged;
    }

    fn push_bar(&mut self, bar: Bar) {
        if self.bars.len() == self.capacity {
            self.bars.pop_front();
        }
        self.bars.push_back(bar);
    }

    /// Bars aggregated to `timeframe`, oldest first.
    pub fn aggregate(&self, timeframe: Timeframe) -> Vec<Bar> {
        let minutes = timeframe.minutes() as i64;
        if minutes == 1 {
            return self.bars.iter().copied().collect();
        }

        let bucket = TimeDelta::minutes(minutes);
        let mut out: Vec<Bar> = Vec::new();
        for bar in &self.bars {
            let start = bar.start.duration_trunc(bucket).unwrap_or(bar.start);
            match out.last_mut() {
                Some(agg) if agg.start == start => {
                    agg.high = agg.high.max(bar.high);
                    agg.low = agg.low.min(bar.low);
                    agg.close = bar.close;
                    agg.volume += bar.volume;
                }
                _ => out.push(Bar { start, ..*bar }),
            }
        }
        out
    }
}

/// Per-instrument bar series shared by the price producer (writer) and the
/// indicator producer (reader).
pub struct BarStore {
    series: Mutex<HashMap<String, BarSeries>>,
    capacity: usize,
}

impl BarStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            series: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    pub fn push_quote(&self, instrument: &str, price: Decimal, volume_24h: Decimal, at: DateTime<Utc>) {
        let mut series = self.series.lock().unwrap_or_else(|e| e.into_inner());
        series
            .entry(instrument.to_string())
            .or_insert_with(|| BarSeries::new(self.capacity))
            .push_quote(price, volume_24h, at);
    }

    pub fn seed(&self, instrument: &str, history: Vec<Bar>) {
        let mut series = self.series.lock().unwrap_or_else(|e| e.into_inner());
        series
            .entry(instrument.to_string())
            .or_insert_with(|| BarSeries::new(self.capacity))
            .seed(history);
    }

    pub fn bars(&self, instrument: &str, timeframe: Timeframe) -> Vec<Bar> {
        let series = self.series.lock().unwrap_or_else(|e| e.into_inner());
        series
            .get(instrument)
            .map(|s| s.aggregate(timeframe))
            .unwrap_or_default()
    }
}
