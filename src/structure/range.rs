// =============================================================================
// Dealing range — trailing window extremes with a deviation state
// =============================================================================
//
// The active range is the highest high / lowest low over the trailing
// `min_range_bars` window, EQ at the midpoint. The state compares the last
// close to EQ plus/minus a band of `tolerance_pct * span`: above the band is
// DEV_UP, below is DEV_DOWN, inside is INSIDE.

use crate::market_data::Bar;
use crate::types::{SmcRange, SmcRangeState};

/// Detect the active trailing range; `(None, NONE)` when the series is too
/// short.
pub fn detect_active_range(
    bars: &[Bar],
    min_range_bars: usize,
    tolerance_pct: f64,
) -> (Option<SmcRange>, SmcRangeState) {
    if bars.is_empty() || bars.len() < min_range_bars || min_range_bars == 0 {
        return (None, SmcRangeState::None);
    }

    let window = &bars[bars.len() - min_range_bars..];
    let highest = window.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
    let lowest = window.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
    let eq_level = lowest + (highest - lowest) / 2.0;

    let span = (highest - lowest).max(1e-9);
    let band = span * tolerance_pct;
    let last_close = window.last().map_or(eq_level, |b| b.close);

    let state = if last_close >= eq_level + band {
        SmcRangeState::DevUp
    } else if last_close <= eq_level - band {
        SmcRangeState::DevDown
    } else {
        SmcRangeState::Inside
    };

    let range = SmcRange {
        high: highest,
        low: lowest,
        eq_level,
        start_time: window[0].open_time,
        end_time: window.last().map(|b| b.open_time),
        state,
    };
    (Some(range), state)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn bar(i: i64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            open_time: i * 300_000,
            close_time: i * 300_000 + 299_999,
            open: close,
            high,
            low,
            close,
            volume: 1.0,
            complete: true,
        }
    }

    fn window(close_last: f64) -> Vec<Bar> {
        let mut bars: Vec<Bar> = (0..11).map(|i| bar(i, 110.0, 100.0, 105.0)).collect();
        bars.push(bar(11, 110.0, 100.0, close_last));
        bars
    }

    #[test]
    fn too_short_yields_none() {
        let bars = vec![bar(0, 110.0, 100.0, 105.0)];
        let (range, state) = detect_active_range(&bars, 12, 0.12);
        assert!(range.is_none());
        assert_eq!(state, SmcRangeState::None);
    }

    #[test]
    fn inside_when_close_near_eq() {
        let (range, state) = detect_active_range(&window(105.0), 12, 0.12);
        let range = range.unwrap();
        assert!((range.eq_level - 105.0).abs() < f64::EPSILON);
        assert_eq!(state, SmcRangeState::Inside);
        assert_eq!(range.state, SmcRangeState::Inside);
    }

    #[test]
    fn dev_up_and_dev_down() {
        // span = 10, band = 1.2, EQ = 105.
        let (_, state) = detect_active_range(&window(106.5), 12, 0.12);
        assert_eq!(state, SmcRangeState::DevUp);
        let (_, state) = detect_active_range(&window(103.5), 12, 0.12);
        assert_eq!(state, SmcRangeState::DevDown);
    }

    #[test]
    fn range_bounds_track_window_extremes() {
        let mut bars = window(105.0);
        bars[3].high = 140.0;
        bars[7].low = 90.0;
        let (range, _) = detect_active_range(&bars, 12, 0.12);
        let range = range.unwrap();
        assert!((range.high - 140.0).abs() < f64::EPSILON);
        assert!((range.low - 90.0).abs() < f64::EPSILON);
        assert_eq!(range.start_time, bars[0].open_time);
        assert_eq!(range.end_time, Some(bars[11].open_time));
    }
}
