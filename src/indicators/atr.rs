// =============================================================================
// Average True Range (ATR) — rolling-mean variant
// =============================================================================
//
// ATR measures volatility by decomposing the entire range of a bar.
//
// True Range (TR) for each bar:
//   TR_0 = H_0 - L_0                      (no previous close yet)
//   TR_i = max(H - L, |H - prevClose|, |L - prevClose|)
//
// ATR here is the plain arithmetic mean of TR over a rolling window with a
// full-window minimum: ATR_i is defined only once `period` TR values exist.
// The whole pipeline shares this one scale (period 14 on the primary
// timeframe), so thresholds stay comparable across subsystems.

use crate::market_data::Bar;

/// Shared ATR period for the pipeline.
pub const ATR_PERIOD: usize = 14;

/// Rolling ATR aligned to the input bars: `out[i]` is the ATR at bar `i`,
/// `None` until a full window of `period` TR values is available.
pub fn atr_series(bars: &[Bar], period: usize) -> Vec<Option<f64>> {
    let n = bars.len();
    if period == 0 || n == 0 {
        return vec![None; n];
    }

    let mut tr = Vec::with_capacity(n);
    for (i, bar) in bars.iter().enumerate() {
        let hl = bar.high - bar.low;
        let value = if i == 0 {
            hl
        } else {
            let prev_close = bars[i - 1].close;
            hl.max((bar.high - prev_close).abs())
                .max((bar.low - prev_close).abs())
        };
        tr.push(value);
    }

    let mut out = vec![None; n];
    let mut rolling_sum = 0.0;
    for i in 0..n {
        rolling_sum += tr[i];
        if i >= period {
            rolling_sum -= tr[i - period];
        }
        if i + 1 >= period {
            let atr = rolling_sum / period as f64;
            if atr.is_finite() {
                out[i] = Some(atr);
            }
        }
    }
    out
}

/// Most recent defined ATR value, or `None` when the series never filled a
/// window.
pub fn atr_last(bars: &[Bar], period: usize) -> Option<f64> {
    atr_series(bars, period).into_iter().rev().flatten().next()
}

/// Median of all defined ATR values. Values are sorted before reduction so
/// the result is bit-stable regardless of accumulation order.
pub fn atr_median(bars: &[Bar], period: usize) -> Option<f64> {
    let mut values: Vec<f64> = atr_series(bars, period).into_iter().flatten().collect();
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    let median = if values.len() % 2 == 1 {
        values[mid]
    } else {
        (values[mid - 1] + values[mid]) / 2.0
    };
    Some(median)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn bar(open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            open_time: 0,
            close_time: 0,
            open,
            high,
            low,
            close,
            volume: 1.0,
            complete: true,
        }
    }

    #[test]
    fn series_undefined_until_full_window() {
        let bars: Vec<Bar> = (0..20)
            .map(|i| bar(100.0, 105.0, 95.0, 100.0 + i as f64 * 0.01))
            .collect();
        let series = atr_series(&bars, 14);
        assert_eq!(series.len(), 20);
        assert!(series[12].is_none());
        assert!(series[13].is_some());
    }

    #[test]
    fn constant_range_converges_to_range() {
        // Every bar spans 10 with close at midpoint: TR is constant 10.
        let bars: Vec<Bar> = (0..30)
            .map(|i| {
                let base = 100.0 + i as f64 * 0.1;
                bar(base, base + 5.0, base - 5.0, base)
            })
            .collect();
        let atr = atr_last(&bars, 14).unwrap();
        assert!((atr - 10.0).abs() < 1.0, "expected ATR near 10.0, got {atr}");
    }

    #[test]
    fn true_range_uses_prev_close_on_gaps() {
        let bars = vec![
            bar(100.0, 105.0, 95.0, 95.0),
            // Gap up: |115 - 95| = 20 > 115 - 108 = 7.
            bar(110.0, 115.0, 108.0, 112.0),
            bar(112.0, 118.0, 110.0, 115.0),
        ];
        let series = atr_series(&bars, 3);
        let atr = series[2].unwrap();
        assert!(atr > 7.0, "ATR should reflect the gap, got {atr}");
    }

    #[test]
    fn insufficient_data_returns_none() {
        let bars: Vec<Bar> = (0..5).map(|_| bar(100.0, 101.0, 99.0, 100.0)).collect();
        assert!(atr_last(&bars, 14).is_none());
        assert!(atr_median(&bars, 14).is_none());
        assert!(atr_last(&[], 14).is_none());
        assert!(atr_last(&bars, 0).is_none());
    }

    #[test]
    fn median_is_stable() {
        let bars: Vec<Bar> = (0..40)
            .map(|i| {
                let spread = 1.0 + (i % 7) as f64;
                bar(100.0, 100.0 + spread, 100.0 - spread, 100.0)
            })
            .collect();
        let m1 = atr_median(&bars, 14).unwrap();
        let m2 = atr_median(&bars, 14).unwrap();
        assert_eq!(m1.to_bits(), m2.to_bits());
        assert!(m1 > 0.0);
    }
}
