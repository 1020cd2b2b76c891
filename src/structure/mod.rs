// =============================================================================
// SMC structure pipeline: swings → legs → trend → events → range → OTE
// =============================================================================
//
// The state is assembled in a fixed order: swing detector → HH/HL/LH/LL leg
// builder → trend inference → BOS/CHOCH with ATR thresholds → active range
// and deviation → OTE zones filtered by bias and the last CHOCH timestamp.
// A malformed or empty primary frame produces a well-formed empty state with
// the reason recorded in meta — never an error.

pub mod engine;
pub mod history;
pub mod ote;
pub mod range;
pub mod swings;

use tracing::debug;

use crate::config::SmcConfig;
use crate::indicators::{atr_series, ATR_PERIOD};
use crate::market_data::Frame;
use crate::types::{
    SmcInput, SmcStructureEvent, SmcStructureState, SmcTrend, StructureEventType, StructureMeta,
    TradeBias,
};

pub use history::{event_history, reset_event_history};

/// Build the full structure state for the snapshot's primary timeframe.
pub fn compute_structure_state(snapshot: &SmcInput, cfg: &SmcConfig) -> SmcStructureState {
    let frame = match prepare_frame(snapshot.primary_frame(), cfg.max_lookback_bars) {
        Some(frame) => frame,
        None => {
            return empty_state(snapshot, cfg, "empty_or_malformed_frame");
        }
    };

    let bars = frame.bars();
    let snapshot_start_ts = bars.first().map(|b| b.open_time);
    let snapshot_end_ts = bars.last().map(|b| b.open_time);

    let swings = swings::detect_swings(bars, cfg.min_swing_bars);
    let legs = engine::build_legs(&swings);
    let trend = engine::infer_trend(&legs);
    let atr = atr_series(bars, ATR_PERIOD);
    let atr_available = atr.iter().any(Option::is_some);
    let (atr_last, atr_median) = atr_stats(&atr);
    let events = engine::detect_events(&legs, bars, &atr, cfg);
    let events_history = event_history().update_history(
        &snapshot.symbol,
        &snapshot.tf_primary,
        &events,
        snapshot_end_ts,
        cfg.structure_event_history_max_minutes,
        cfg.structure_event_history_max_entries,
    );
    let (bias, last_choch_ts) = derive_bias(trend, &events);
    let (active_range, range_state) =
        range::detect_active_range(bars, cfg.min_range_bars, cfg.eq_tolerance_pct);
    let ranges = active_range.clone().into_iter().collect();
    let ote_zones = ote::build_ote_zones(&legs, trend, cfg, &atr, bias, last_choch_ts);

    debug!(
        symbol = %snapshot.symbol,
        tf = %snapshot.tf_primary,
        swings = swings.len(),
        legs = legs.len(),
        events = events.len(),
        trend = %trend,
        bias = %bias,
        "structure state built"
    );

    let swing_times: Vec<i64> = swings.iter().map(|s| s.time).collect();

    SmcStructureState {
        primary_tf: snapshot.tf_primary.clone(),
        trend,
        swings,
        legs,
        ranges,
        active_range,
        range_state,
        events,
        event_history: events_history,
        ote_zones,
        bias,
        meta: StructureMeta {
            bar_count: frame.len(),
            cfg_min_swing: cfg.min_swing_bars,
            cfg_min_range_bars: cfg.min_range_bars,
            bos_min_move_atr: cfg.bos_min_move_atr,
            bos_min_move_pct: cfg.bos_min_move_pct,
            leg_min_amplitude_atr: cfg.leg_min_amplitude_atr,
            ote_trend_only: cfg.ote_trend_only,
            ote_max_active_per_side: cfg.ote_max_active_per_side,
            atr_period: atr_available.then_some(ATR_PERIOD),
            atr_available,
            atr_last,
            atr_median,
            bias: Some(bias),
            last_choch_ts,
            symbol: snapshot.symbol.clone(),
            tf_input: snapshot.tf_primary.clone(),
            snapshot_start_ts,
            snapshot_end_ts,
            swing_times,
            events_retained_total: 0,
            events_recent_total: 0,
            reason: None,
        },
    }
    .with_history_totals()
}

impl SmcStructureState {
    fn with_history_totals(mut self) -> Self {
        self.meta.events_retained_total = self.event_history.len();
        self.meta.events_recent_total = self.events.len();
        self
    }
}

/// Trim to the lookback window. The frame is already sorted and deduplicated
/// by construction; an empty frame is rejected here.
fn prepare_frame(frame: Option<&Frame>, max_bars: usize) -> Option<Frame> {
    let frame = frame?;
    if frame.is_empty() {
        return None;
    }
    if max_bars > 0 && frame.len() > max_bars {
        Some(frame.tail_frame(max_bars))
    } else {
        Some(frame.clone())
    }
}

fn empty_state(snapshot: &SmcInput, cfg: &SmcConfig, reason: &str) -> SmcStructureState {
    SmcStructureState {
        primary_tf: snapshot.tf_primary.clone(),
        meta: StructureMeta {
            cfg_min_swing: cfg.min_swing_bars,
            cfg_min_range_bars: cfg.min_range_bars,
            bos_min_move_atr: cfg.bos_min_move_atr,
            bos_min_move_pct: cfg.bos_min_move_pct,
            leg_min_amplitude_atr: cfg.leg_min_amplitude_atr,
            ote_trend_only: cfg.ote_trend_only,
            ote_max_active_per_side: cfg.ote_max_active_per_side,
            bias: Some(TradeBias::Neutral),
            symbol: snapshot.symbol.clone(),
            tf_input: snapshot.tf_primary.clone(),
            reason: Some(reason.to_string()),
            ..StructureMeta::default()
        },
        ..SmcStructureState::default()
    }
}

fn atr_stats(atr: &[Option<f64>]) -> (Option<f64>, Option<f64>) {
    let mut values: Vec<f64> = atr.iter().copied().flatten().collect();
    if values.is_empty() {
        return (None, None);
    }
    let last = *values.last().expect("non-empty");
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    let median = if values.len() % 2 == 1 {
        values[mid]
    } else {
        (values[mid - 1] + values[mid]) / 2.0
    };
    (Some(last), Some(median))
}

/// Latest CHOCH wins; otherwise fall back to the trend.
fn derive_bias(trend: SmcTrend, events: &[SmcStructureEvent]) -> (TradeBias, Option<i64>) {
    let mut last_choch: Option<&SmcStructureEvent> = None;
    for event in events {
        if event.event_type != StructureEventType::Choch {
            continue;
        }
        if last_choch.map_or(true, |prev| event.time >= prev.time) {
            last_choch = Some(event);
        }
    }
    if let Some(choch) = last_choch {
        let bias = match choch.direction {
            crate::types::Direction::Long => TradeBias::Long,
            crate::types::Direction::Short => TradeBias::Short,
        };
        return (bias, Some(choch.time));
    }
    let bias = match trend {
        SmcTrend::Up => TradeBias::Long,
        SmcTrend::Down => TradeBias::Short,
        _ => TradeBias::Neutral,
    };
    (bias, None)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::Bar;
    use crate::types::Direction;
    use std::collections::BTreeMap;

    fn frame_from(values: &[(f64, f64, f64, f64)]) -> Frame {
        Frame::from_bars(
            values
                .iter()
                .enumerate()
                .map(|(i, &(o, h, l, c))| Bar {
                    open_time: i as i64 * 300_000,
                    close_time: i as i64 * 300_000 + 299_999,
                    open: o,
                    high: h,
                    low: l,
                    close: c,
                    volume: 1.0,
                    complete: true,
                })
                .collect(),
        )
    }

    fn input(symbol: &str, frame: Frame) -> SmcInput {
        let mut ohlc = BTreeMap::new();
        ohlc.insert("5m".to_string(), frame);
        SmcInput {
            symbol: symbol.to_string(),
            tf_primary: "5m".to_string(),
            ohlc_by_tf: ohlc,
            context: Default::default(),
        }
    }

    #[test]
    fn empty_frame_yields_empty_state_with_reason() {
        let snapshot = input("TEST_EMPTY", Frame::default());
        let state = compute_structure_state(&snapshot, &SmcConfig::default());
        assert!(state.swings.is_empty());
        assert!(state.legs.is_empty());
        assert!(state.events.is_empty());
        assert_eq!(state.bias, TradeBias::Neutral);
        assert_eq!(
            state.meta.reason.as_deref(),
            Some("empty_or_malformed_frame")
        );
    }

    #[test]
    fn missing_primary_tf_yields_empty_state() {
        let snapshot = SmcInput {
            symbol: "TEST_MISSING".into(),
            tf_primary: "5m".into(),
            ohlc_by_tf: BTreeMap::new(),
            context: Default::default(),
        };
        let state = compute_structure_state(&snapshot, &SmcConfig::default());
        assert_eq!(state.meta.bar_count, 0);
        assert!(state.meta.reason.is_some());
    }

    #[test]
    fn bos_short_after_lower_low() {
        // Down-stair price path: swing high, lower high, then a lower low
        // with a strong close through the reference. min_swing_bars=1 keeps
        // the fixture small.
        let mut cfg = SmcConfig::default();
        cfg.min_swing_bars = 1;
        cfg.min_range_bars = 4;

        let frame = frame_from(&[
            (100.0, 100.5, 99.5, 100.0),
            (100.0, 103.0, 99.8, 102.5), // swing high 103
            (101.0, 101.2, 98.0, 98.3),  // swing low 98
            (98.5, 101.5, 98.4, 101.2),  // lower high 101.5
            (101.0, 101.2, 94.0, 94.2),  // lower low 94, close-through
            (94.5, 95.0, 94.1, 94.6),
            (94.6, 95.2, 94.2, 94.8),
        ]);
        let snapshot = input("TEST_BOS_SHORT", frame);
        let state = compute_structure_state(&snapshot, &cfg);

        let shorts: Vec<_> = state
            .events
            .iter()
            .filter(|e| e.direction == Direction::Short)
            .collect();
        assert!(
            !shorts.is_empty(),
            "expected a SHORT structure event, got {:?}",
            state.events
        );
        assert_eq!(state.bias, TradeBias::Short);
    }

    #[test]
    fn meta_carries_atr_and_history_totals() {
        let values: Vec<(f64, f64, f64, f64)> = (0..40)
            .map(|i| {
                let base = 100.0 + ((i % 8) as f64 - 4.0);
                (base, base + 1.0, base - 1.0, base + 0.3)
            })
            .collect();
        let snapshot = input("TEST_META_ATR", frame_from(&values));
        let state = compute_structure_state(&snapshot, &SmcConfig::default());
        assert!(state.meta.atr_available);
        assert!(state.meta.atr_last.unwrap() > 0.0);
        assert!(state.meta.atr_median.unwrap() > 0.0);
        assert_eq!(state.meta.events_recent_total, state.events.len());
        assert_eq!(state.meta.events_retained_total, state.event_history.len());
        assert_eq!(state.meta.bar_count, 40);
    }
}
