// =============================================================================
// Swing detection — symmetric-window local extrema
// =============================================================================
//
// A bar is a swing HIGH when its high is >= every high within `window` bars
// on both sides (ties inclusive), and symmetrically for LOW. The inclusive
// comparison keeps HH/LL sequences stable on noisy series. A bar can be both
// a HIGH and a LOW swing (flat bars); the HIGH is emitted first, matching
// the fixed output order downstream consumers rely on.

use crate::market_data::Bar;
use crate::types::{LevelSide, SmcSwing};

/// Detect swing points. `min_separation` is the half-window; the effective
/// window is `max(1, min_separation)` and strength equals the window.
pub fn detect_swings(bars: &[Bar], min_separation: usize) -> Vec<SmcSwing> {
    let window = min_separation.max(1);
    let total = bars.len();
    if total < window * 2 + 1 {
        return Vec::new();
    }

    let mut swings = Vec::new();
    for idx in window..total - window {
        let local_high = bars[idx].high;
        let left_high = bars[idx - window..idx]
            .iter()
            .map(|b| b.high)
            .fold(f64::NEG_INFINITY, f64::max);
        let right_high = bars[idx + 1..idx + 1 + window]
            .iter()
            .map(|b| b.high)
            .fold(f64::NEG_INFINITY, f64::max);
        if local_high >= left_high && local_high >= right_high {
            swings.push(SmcSwing {
                index: idx,
                time: bars[idx].open_time,
                price: local_high,
                kind: LevelSide::High,
                strength: window as u32,
            });
        }

        let local_low = bars[idx].low;
        let left_low = bars[idx - window..idx]
            .iter()
            .map(|b| b.low)
            .fold(f64::INFINITY, f64::min);
        let right_low = bars[idx + 1..idx + 1 + window]
            .iter()
            .map(|b| b.low)
            .fold(f64::INFINITY, f64::min);
        if local_low <= left_low && local_low <= right_low {
            swings.push(SmcSwing {
                index: idx,
                time: bars[idx].open_time,
                price: local_low,
                kind: LevelSide::Low,
                strength: window as u32,
            });
        }
    }

    swings.sort_by_key(|s| s.index);
    swings
}
