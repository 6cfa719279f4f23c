//! Range-based indicators: ATR, ADX (Wilder smoothing) and stochastic.
//!
//! Series functions return one value per input bar, `NaN` until the
//! lookback is filled.

use super::Bar;

/// TR[0] = high - low; TR[t] = max(high-low, |high-prev_close|, |low-prev_close|).
pub fn true_range(bars: &[Bar]) -> Vec<f64> {
    let mut tr = Vec::with_capacity(bars.len());
    for (i, bar) in bars.iter().enumerate() {
        if i == 0 {
            tr.push(bar.high - bar.low);
            continue;
        }
        let pc = bars[i - 1].close;
        tr.push(
            (bar.high - bar.low)
                .max((bar.high - pc).abs())
                .max((bar.low - pc).abs()),
        );
    }
    tr
}

/// Wilder smoothing (alpha = 1/period), seeded with the mean of the first
/// `period` finite values.
pub fn wilder_smooth(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut out = vec![f64::NAN; n];
    if period == 0 {
        return out;
    }

    let Some(first) = values.iter().position(|v| v.is_finite()) else {
        return out;
    };
    let seed_end = first + period;
    if seed_end > n || values[first..seed_end].iter().any(|v| !v.is_finite()) {
        return out;
    }

    let mut prev = values[first..seed_end].iter().sum::<f64>() / period as f64;
    out[seed_end - 1] = prev;
    for i in seed_end..n {
        if values[i].is_finite() {
            prev = (prev * (period as f64 - 1.0) + values[i]) / period as f64;
        }
        out[i] = prev;
    }
    out
}

pub fn atr(bars: &[Bar], period: usize) -> Vec<f64> {
    // TR[0] has no previous close; the seed window starts at bar 1.
    let mut tr = true_range(bars);
    if let Some(first) = tr.first_mut() {
        *first = f64::NAN;
    }
    wilder_smooth(&tr, period)
}

pub fn adx(bars: &[Bar], period: usize) -> Vec<f64> {
    let n = bars.len();
    if n < 2 {
        return vec![f64::NAN; n];
    }

    let mut plus_dm = vec![f64::NAN; n];
    let mut minus_dm = vec![f64::NAN; n];
    for i in 1..n {
        let up = bars[i].high - bars[i - 1].high;
        let down = bars[i - 1].low - bars[i].low;
        plus_dm[i] = if up > down && up > 0.0 { up } else { 0.0 };
        minus_dm[i] = if down > up && down > 0.0 { down } else { 0.0 };
    }

    let smooth_tr = atr(bars, period);
    let smooth_plus = wilder_smooth(&plus_dm, period);
    let smooth_minus = wilder_smooth(&minus_dm, period);

    let mut dx = vec![f64::NAN; n];
    for i in 0..n {
        let (tr, p, m) = (smooth_tr[i], smooth_plus[i], smooth_minus[i]);
        if !tr.is_finite() || !p.is_finite() || !m.is_finite() || tr == 0.0 {
            continue;
        }
        let plus_di = 100.0 * p / tr;
        let minus_di = 100.0 * m / tr;
        let sum = plus_di + minus_di;
        dx[i] = if sum == 0.0 {
            0.0
        } else {
            100.0 * (plus_di - minus_di).abs() / sum
        };
    }

    wilder_smooth(&dx, period)
}

/// Stochastic oscillator: (%K, %D) where %D is the SMA of %K.
pub fn stochastic(bars: &[Bar], k_period: usize, d_period: usize) -> (Vec<f64>, Vec<f64>) {
    let n = bars.len();
    let mut k = vec![f64::NAN; n];
    if k_period == 0 || d_period == 0 {
        return (k.clone(), k);
    }

    for i in (k_period - 1)..n {
        let window = &bars[i + 1 - k_period..=i];
        let hh = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let ll = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
        let range = hh - ll;
        k[i] = if range > 0.0 {
            100.0 * (bars[i].close - ll) / range
        } else {
            50.0
        };
    }

    let mut d = vec![f64::NAN; n];
    for i in 0..n {
        if i + 1 < d_period {
            continue;
        }
        let window = &k[i + 1 - d_period..=i];
        if window.iter().all(|v| v.is_finite()) {
            d[i] = window.iter().sum::<f64>() / d_period as f64;
        }
    }

    (k, d)
}

/// Last finite value of a series.
pub fn last(series: &[f64]) -> Option<f64> {
    series.last().copied().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn make_bars(data: &[(f64, f64, f64)]) -> Vec<Bar> {
        let base = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        data.iter()
            .enumerate()
            .map(|(i, &(high, low, close))| Bar {
                start: base + Duration::minutes(i as i64),
                open: close,
                high,
                low,
                close,
                volume: 1.0,
            })
            .collect()
    }

    fn trending(n: usize, step: f64) -> Vec<Bar> {
        let data: Vec<_> = (0..n)
            .map(|i| {
                let base = 100.0 + i as f64 * step;
                (base + 1.0, base - 1.0, base + 0.5)
            })
            .collect();
        make_bars(&data)
    }

    #[test]
    fn test_wilder_seed_is_mean() {
        let out = wilder_smooth(&[1.0, 2.0, 3.0, 4.0], 3);
        assert!(out[1].is_nan());
        assert_eq!(out[2], 2.0);
        assert!((out[3] - (2.0 * 2.0 + 4.0) / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_atr_constant_range() {
        let bars = make_bars(&[(11.0, 9.0, 10.0); 20]);
        let out = atr(&bars, 14);
        assert!(out[13].is_nan());
        assert!((last(&out).unwrap() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_adx_bounds_and_trend() {
        let bars = trending(60, 2.0);
        let out = adx(&bars, 14);
        for v in out.iter().filter(|v| v.is_finite()) {
            assert!((0.0..=100.0).contains(v));
        }
        assert!(last(&out).unwrap() > 25.0);
    }

    #[test]
    fn test_adx_too_few_bars() {
        let bars = trending(10, 1.0);
        assert_eq!(last(&adx(&bars, 14)), None);
    }

    #[test]
    fn test_stochastic_at_top_of_range() {
        let bars = trending(20, 1.0);
        let (k, d) = stochastic(&bars, 14, 3);
        let k_last = last(&k).unwrap();
        assert!(k_last > 90.0 && k_last <= 100.0);
        assert!(last(&d).is_some());
    }
}
