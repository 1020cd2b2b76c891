// =============================================================================
// Execution detector — 1m micro-events gated by the in-play filter
// =============================================================================
//
// The 1m frame is a trigger, not a brain: events only fire when price is
// in_play — inside the entry band of a POI (near an edge, not anywhere in
// the rectangle) or within an ATR radius of a target level. Targets are the
// pdh/pdl/pwh/pwl context levels and completed-session extremes; active
// sessions and the liquidity_targets list are excluded on purpose, both
// would make the gate almost always true.
//
// Events, all computed on the last one or two bars:
//   SWEEP       — wick through the nearest target with a close back across.
//   MICRO_BOS / MICRO_CHOCH — close through the local pivot window; CHOCH
//                 when the break runs against the 5m bias.
//   RETEST_OK   — two-bar break&hold or sweep&reject confirmation.

use tracing::debug;

use crate::config::SmcConfig;
use crate::market_data::{Bar, Frame};
use crate::types::{
    Direction, ExecEventMeta, ExecEventType, ExecRef, ExecutionMeta, InPlayRef, LevelSide,
    SmcExecutionEvent, SmcExecutionState, SmcInput, SmcLiquidityState, SmcStructureState,
    SmcZone, SmcZonesState, TradeBias,
};

/// Compute the Stage5 execution state. Soft-fail: missing or short 1m data
/// produces an empty state with the reason in meta.
pub fn compute_execution_state(
    snapshot: &SmcInput,
    structure: Option<&SmcStructureState>,
    liquidity: Option<&SmcLiquidityState>,
    zones: Option<&SmcZonesState>,
    cfg: &SmcConfig,
) -> SmcExecutionState {
    let _ = liquidity; // reserved: significant liquidity levels behind a flag

    if !cfg.exec_enabled {
        return SmcExecutionState {
            execution_events: Vec::new(),
            meta: ExecutionMeta {
                exec_enabled: false,
                ..ExecutionMeta::default()
            },
        };
    }

    let frame = match snapshot.frame(&cfg.exec_tf) {
        Some(frame) if !frame.is_empty() => frame,
        _ => {
            return empty_state(cfg, "no_exec_frame", None);
        }
    };
    // The sweep/retest templates look at bars [-2] and [-1].
    if frame.len() < 3 {
        return empty_state(cfg, "insufficient_exec_bars", Some(frame.len()));
    }
    let last_close = match frame.last_close() {
        Some(close) if close.is_finite() => close,
        _ => return empty_state(cfg, "no_last_close", None),
    };

    let atr = extract_atr(structure, frame);
    let poi_zones = select_poi_zones(zones);
    let targets = collect_targets(snapshot);
    let radius = atr.filter(|a| *a > 0.0).map(|a| cfg.exec_in_play_radius_atr * a);

    let (in_play_now, in_play_ref) = is_in_play(last_close, &poi_zones, &targets, radius);
    let (context_ref, poi_zone_id) = context_ref_fields(&in_play_ref);

    let in_play = if cfg.exec_in_play_hold_bars > 0 {
        in_play_holds(frame, cfg.exec_in_play_hold_bars, &poi_zones, &targets, radius)
    } else {
        in_play_now
    };

    let meta = ExecutionMeta {
        exec_enabled: true,
        exec_tf: Some(cfg.exec_tf.clone()),
        reason: None,
        exec_bars: None,
        atr_ref: atr,
        in_play,
        in_play_now,
        in_play_ref: Some(in_play_ref),
        radius,
        poi_count: poi_zones.len(),
        targets_count: targets.len(),
        hold_bars: cfg.exec_in_play_hold_bars,
        impulse_atr_mul: cfg.exec_impulse_atr_mul,
        micro_pivot_bars: cfg.exec_micro_pivot_bars,
    };

    if !in_play {
        return SmcExecutionState {
            execution_events: Vec::new(),
            meta,
        };
    }

    // Anti-noise: only the nearest target inside the radius may sweep.
    let mut sweep_levels: Vec<f64> = Vec::new();
    if let (Some(nearest), Some(radius)) = (nearest_level(last_close, &targets), radius) {
        if (nearest - last_close).abs() <= radius {
            sweep_levels.push(nearest);
        }
    }

    let bias = structure.map_or(TradeBias::Neutral, |s| s.bias);
    let mut events: Vec<SmcExecutionEvent> = Vec::new();

    events.extend(detect_sweeps_last_bar(
        frame.bars(),
        &sweep_levels,
        atr,
        cfg,
        context_ref,
    ));
    if let Some(micro) = detect_micro_break_last_bar(
        frame.bars(),
        bias,
        atr,
        cfg,
        context_ref,
        poi_zone_id.clone(),
    ) {
        events.push(micro);
    }
    if let Some(retest) = detect_retest_ok(
        frame.bars(),
        bias,
        atr,
        cfg,
        &sweep_levels,
        context_ref,
        poi_zone_id,
    ) {
        events.push(retest);
    }

    if cfg.exec_max_events > 0 && events.len() > cfg.exec_max_events {
        let skip = events.len() - cfg.exec_max_events;
        events.drain(0..skip);
    }

    debug!(
        symbol = %snapshot.symbol,
        in_play,
        events = events.len(),
        "execution state built"
    );

    SmcExecutionState {
        execution_events: events,
        meta,
    }
}

fn empty_state(cfg: &SmcConfig, reason: &str, bars: Option<usize>) -> SmcExecutionState {
    SmcExecutionState {
        execution_events: Vec::new(),
        meta: ExecutionMeta {
            exec_enabled: true,
            exec_tf: Some(cfg.exec_tf.clone()),
            reason: Some(reason.to_string()),
            exec_bars: bars,
            ..ExecutionMeta::default()
        },
    }
}

// =============================================================================
// In-play gate
// =============================================================================

fn select_poi_zones(zones: Option<&SmcZonesState>) -> Vec<SmcZone> {
    let zones = match zones {
        Some(zones) => zones,
        None => return Vec::new(),
    };
    if !zones.poi_zones.is_empty() {
        return zones.poi_zones.clone();
    }
    zones.active_zones.clone()
}

/// Target levels: pdh/pdl/pwh/pwl plus completed-session extremes. The
/// active session is skipped — its extremes trail price too closely.
fn collect_targets(snapshot: &SmcInput) -> Vec<f64> {
    let ctx = &snapshot.context;
    let mut levels: Vec<f64> = Vec::new();
    for value in [ctx.pdh, ctx.pdl, ctx.pwh, ctx.pwl] {
        if let Some(v) = value.filter(|v| v.is_finite()) {
            levels.push(v);
        }
    }
    if let Some(sessions) = &ctx.smc_sessions {
        for payload in sessions.values() {
            if payload.is_active == Some(true) {
                continue;
            }
            for value in [payload.high, payload.low] {
                if let Some(v) = value.filter(|v| v.is_finite()) {
                    levels.push(v);
                }
            }
        }
    }
    // Dedup with a stable order.
    let mut out: Vec<f64> = Vec::with_capacity(levels.len());
    for v in levels {
        if !out.iter().any(|existing| *existing == v) {
            out.push(v);
        }
    }
    out
}

/// In-play means "in the entry band" of a POI (near either edge, capped by
/// the ATR radius) or within the radius of a target.
fn is_in_play(
    price: f64,
    poi_zones: &[SmcZone],
    targets: &[f64],
    radius: Option<f64>,
) -> (bool, InPlayRef) {
    for zone in poi_zones {
        let (lo, hi) = (zone.price_min, zone.price_max);
        if !(lo <= price && price <= hi) {
            continue;
        }
        let width = (hi - lo).max(1e-9);
        let mut band = 0.20 * width;
        if let Some(radius) = radius.filter(|r| *r > 0.0) {
            band = band.min(radius);
        }
        if (price - lo).min(hi - price) <= band {
            return (
                true,
                InPlayRef::Poi {
                    poi_zone_id: zone.zone_id.clone(),
                    poi_min: lo,
                    poi_max: hi,
                },
            );
        }
    }

    if let Some(radius) = radius.filter(|r| *r > 0.0) {
        if let Some(nearest) = nearest_level(price, targets) {
            if (nearest - price).abs() <= radius {
                return (true, InPlayRef::Target { level: nearest });
            }
        }
    }

    (false, InPlayRef::None)
}

fn in_play_holds(
    frame: &Frame,
    hold_bars: usize,
    poi_zones: &[SmcZone],
    targets: &[f64],
    radius: Option<f64>,
) -> bool {
    if hold_bars == 0 || frame.len() < hold_bars {
        return false;
    }
    frame
        .tail(hold_bars)
        .iter()
        .all(|bar| is_in_play(bar.close, poi_zones, targets, radius).0)
}

fn context_ref_fields(in_play_ref: &InPlayRef) -> (ExecRef, Option<String>) {
    match in_play_ref {
        InPlayRef::Poi { poi_zone_id, .. } => (ExecRef::Poi, Some(poi_zone_id.clone())),
        InPlayRef::Target { .. } => (ExecRef::Target, None),
        InPlayRef::None => (ExecRef::Unknown, None),
    }
}

/// Fallback ATR when structure did not provide one: median range of the
/// last 30 exec bars.
fn extract_atr(structure: Option<&SmcStructureState>, frame: &Frame) -> Option<f64> {
    if let Some(structure) = structure {
        let atr = structure.meta.atr_last.or(structure.meta.atr_median);
        if let Some(value) = atr.filter(|v| *v > 0.0) {
            return Some(value);
        }
    }
    let mut ranges: Vec<f64> = frame
        .tail(30)
        .iter()
        .map(|b| (b.high - b.low).abs())
        .collect();
    if ranges.is_empty() {
        return None;
    }
    ranges.sort_by(f64::total_cmp);
    let mid = ranges.len() / 2;
    let median = if ranges.len() % 2 == 1 {
        ranges[mid]
    } else {
        (ranges[mid - 1] + ranges[mid]) / 2.0
    };
    (median > 0.0).then_some(median)
}

fn nearest_level(price: f64, levels: &[f64]) -> Option<f64> {
    levels
        .iter()
        .copied()
        .min_by(|a, b| (a - price).abs().total_cmp(&(b - price).abs()))
}

// =============================================================================
// Event detectors
// =============================================================================

fn passes_impulse_filter(bar: &Bar, atr: Option<f64>, cfg: &SmcConfig) -> bool {
    if cfg.exec_impulse_atr_mul <= 0.0 {
        return true;
    }
    match atr {
        Some(atr) if atr > 0.0 => bar.body() >= cfg.exec_impulse_atr_mul * atr,
        _ => true,
    }
}

/// SWEEP: a wick through the level with the close back across, on the last
/// bar only.
fn detect_sweeps_last_bar(
    bars: &[Bar],
    levels: &[f64],
    atr: Option<f64>,
    cfg: &SmcConfig,
    context_ref: ExecRef,
) -> Vec<SmcExecutionEvent> {
    let last = match bars.last() {
        Some(bar) => bar,
        None => return Vec::new(),
    };
    if !passes_impulse_filter(last, atr, cfg) {
        return Vec::new();
    }

    let mut out = Vec::new();
    for &level in levels {
        if last.high > level && last.close < level {
            out.push(SmcExecutionEvent {
                event_type: ExecEventType::Sweep,
                direction: Direction::Short,
                time: last.open_time,
                price: last.close,
                level,
                ref_kind: ExecRef::Target,
                poi_zone_id: None,
                meta: ExecEventMeta {
                    sweep_side: Some(LevelSide::High),
                    context_ref: Some(context_ref),
                    ..ExecEventMeta::default()
                },
            });
        }
        if last.low < level && last.close > level {
            out.push(SmcExecutionEvent {
                event_type: ExecEventType::Sweep,
                direction: Direction::Long,
                time: last.open_time,
                price: last.close,
                level,
                ref_kind: ExecRef::Target,
                poi_zone_id: None,
                meta: ExecEventMeta {
                    sweep_side: Some(LevelSide::Low),
                    context_ref: Some(context_ref),
                    ..ExecEventMeta::default()
                },
            });
        }
    }
    out
}

/// Micro BOS/CHOCH: the last close breaks the pivot-window extreme. Close,
/// not wick — wicks are noise on 1m.
fn detect_micro_break_last_bar(
    bars: &[Bar],
    bias: TradeBias,
    atr: Option<f64>,
    cfg: &SmcConfig,
    ref_kind: ExecRef,
    poi_zone_id: Option<String>,
) -> Option<SmcExecutionEvent> {
    let window = cfg.exec_micro_pivot_bars.max(3);
    if bars.len() < window + 1 {
        return None;
    }
    let tail = &bars[bars.len() - (window + 1)..];
    let (prev, last) = tail.split_at(window);
    let last = &last[0];

    if !passes_impulse_filter(last, atr, cfg) {
        return None;
    }

    let prev_high = prev.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
    let prev_low = prev.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);

    if last.close > prev_high {
        let event_type = match bias {
            TradeBias::Short => ExecEventType::MicroChoch,
            _ => ExecEventType::MicroBos,
        };
        return Some(SmcExecutionEvent {
            event_type,
            direction: Direction::Long,
            time: last.open_time,
            price: last.close,
            level: prev_high,
            ref_kind,
            poi_zone_id,
            meta: ExecEventMeta {
                pivot_window: Some(window),
                pivot_kind: Some(LevelSide::High),
                ..ExecEventMeta::default()
            },
        });
    }

    if last.close < prev_low {
        let event_type = match bias {
            TradeBias::Long => ExecEventType::MicroChoch,
            _ => ExecEventType::MicroBos,
        };
        return Some(SmcExecutionEvent {
            event_type,
            direction: Direction::Short,
            time: last.open_time,
            price: last.close,
            level: prev_low,
            ref_kind,
            poi_zone_id,
            meta: ExecEventMeta {
                pivot_window: Some(window),
                pivot_kind: Some(LevelSide::Low),
                ..ExecEventMeta::default()
            },
        });
    }

    None
}

/// RETEST_OK: a two-bar confirmation. Either sweep&reject (bar[-2] sweeps a
/// target level and closes back, bar[-1] retests and holds) or break&hold
/// (bar[-2] breaks the pivot, bar[-1] retests the level and closes on the
/// break side).
#[allow(clippy::too_many_arguments)]
fn detect_retest_ok(
    bars: &[Bar],
    bias: TradeBias,
    atr: Option<f64>,
    cfg: &SmcConfig,
    sweep_levels: &[f64],
    ref_kind: ExecRef,
    poi_zone_id: Option<String>,
) -> Option<SmcExecutionEvent> {
    if bars.len() < 4 {
        return None;
    }
    let b2 = &bars[bars.len() - 2];
    let b1 = &bars[bars.len() - 1];

    // The impulse filter applies to the break candidate, bar[-2].
    if !passes_impulse_filter(b2, atr, cfg) {
        return None;
    }

    // Sweep&reject against a known target level.
    for &level in sweep_levels {
        let touched = b1.low <= level && level <= b1.high;
        if b2.high > level && b2.close < level && touched && b1.close < level {
            return Some(SmcExecutionEvent {
                event_type: ExecEventType::RetestOk,
                direction: Direction::Short,
                time: b1.open_time,
                price: b1.close,
                level,
                ref_kind: ExecRef::Target,
                poi_zone_id: None,
                meta: ExecEventMeta {
                    source: Some("sweep_reject".to_string()),
                    bias: Some(bias),
                    context_ref: Some(ref_kind),
                    ..ExecEventMeta::default()
                },
            });
        }
        if b2.low < level && b2.close > level && touched && b1.close > level {
            return Some(SmcExecutionEvent {
                event_type: ExecEventType::RetestOk,
                direction: Direction::Long,
                time: b1.open_time,
                price: b1.close,
                level,
                ref_kind: ExecRef::Target,
                poi_zone_id: None,
                meta: ExecEventMeta {
                    source: Some("sweep_reject".to_string()),
                    bias: Some(bias),
                    context_ref: Some(ref_kind),
                    ..ExecEventMeta::default()
                },
            });
        }
    }

    // Break&hold against the pivot window before bar[-2].
    let window = cfg.exec_micro_pivot_bars.max(3);
    if bars.len() < window + 2 {
        return None;
    }
    let prev = &bars[bars.len() - (window + 2)..bars.len() - 2];
    let prev_high = prev.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
    let prev_low = prev.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);

    if b2.close > prev_high {
        let touched = b1.low <= prev_high && prev_high <= b1.high;
        if touched && b1.close >= prev_high {
            return Some(SmcExecutionEvent {
                event_type: ExecEventType::RetestOk,
                direction: Direction::Long,
                time: b1.open_time,
                price: b1.close,
                level: prev_high,
                ref_kind,
                poi_zone_id,
                meta: ExecEventMeta {
                    source: Some("break_hold".to_string()),
                    bias: Some(bias),
                    ..ExecEventMeta::default()
                },
            });
        }
    }
    if b2.close < prev_low {
        let touched = b1.low <= prev_low && prev_low <= b1.high;
        if touched && b1.close <= prev_low {
            return Some(SmcExecutionEvent {
                event_type: ExecEventType::RetestOk,
                direction: Direction::Short,
                time: b1.open_time,
                price: b1.close,
                level: prev_low,
                ref_kind,
                poi_zone_id,
                meta: ExecEventMeta {
                    source: Some("break_hold".to_string()),
                    bias: Some(bias),
                    ..ExecEventMeta::default()
                },
            });
        }
    }

    None
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        BiasAtCreation, EntryMode, Role, SmcZoneType, StructureMeta, ZoneDirection, ZoneMeta,
        ZoneQuality,
    };
    use std::collections::BTreeMap;

    fn bar(i: i64, o: f64, h: f64, l: f64, c: f64) -> Bar {
        Bar {
            open_time: i * 60_000,
            close_time: i * 60_000 + 59_999,
            open: o,
            high: h,
            low: l,
            close: c,
            volume: 1.0,
            complete: true,
        }
    }

    fn flat_bars(n: usize, price: f64) -> Vec<Bar> {
        (0..n as i64)
            .map(|i| bar(i, price, price + 0.1, price - 0.1, price))
            .collect()
    }

    fn snapshot(exec_bars: Vec<Bar>) -> SmcInput {
        let mut ohlc = BTreeMap::new();
        ohlc.insert("1m".to_string(), Frame::from_bars(exec_bars));
        SmcInput {
            symbol: "XAUUSD".into(),
            tf_primary: "5m".into(),
            ohlc_by_tf: ohlc,
            context: Default::default(),
        }
    }

    fn structure_with_bias(bias: TradeBias) -> SmcStructureState {
        SmcStructureState {
            bias,
            meta: StructureMeta {
                atr_last: Some(1.0),
                ..StructureMeta::default()
            },
            ..SmcStructureState::default()
        }
    }

    fn poi_zone(lo: f64, hi: f64) -> SmcZonesState {
        SmcZonesState {
            poi_zones: vec![SmcZone {
                zone_type: SmcZoneType::OrderBlock,
                price_min: lo,
                price_max: hi,
                timeframe: "5m".into(),
                origin_time: 0,
                direction: ZoneDirection::Long,
                role: Role::Primary,
                strength: 1.0,
                confidence: 0.6,
                components: vec![],
                zone_id: "z1".into(),
                entry_mode: EntryMode::Wick05,
                quality: ZoneQuality::Unknown,
                reference_leg_id: None,
                reference_event_id: None,
                bias_at_creation: BiasAtCreation::Unknown,
                meta: ZoneMeta::default(),
            }],
            ..SmcZonesState::default()
        }
    }

    #[test]
    fn missing_exec_frame_reports_reason() {
        let mut snap = snapshot(vec![]);
        snap.ohlc_by_tf.clear();
        let state =
            compute_execution_state(&snap, None, None, None, &SmcConfig::default());
        assert!(state.execution_events.is_empty());
        assert_eq!(state.meta.reason.as_deref(), Some("no_exec_frame"));
    }

    #[test]
    fn short_frame_reports_reason() {
        let snap = snapshot(flat_bars(2, 100.0));
        let state =
            compute_execution_state(&snap, None, None, None, &SmcConfig::default());
        assert_eq!(state.meta.reason.as_deref(), Some("insufficient_exec_bars"));
        assert_eq!(state.meta.exec_bars, Some(2));
    }

    #[test]
    fn not_in_play_yields_no_events() {
        // Price far from any POI and no targets.
        let snap = snapshot(flat_bars(20, 100.0));
        let structure = structure_with_bias(TradeBias::Long);
        let zones = poi_zone(80.0, 82.0);
        let state = compute_execution_state(
            &snap,
            Some(&structure),
            None,
            Some(&zones),
            &SmcConfig::default(),
        );
        assert!(!state.meta.in_play);
        assert!(state.execution_events.is_empty());
    }

    #[test]
    fn in_play_edge_band_of_poi() {
        // POI [99.8, 102.0], close 100.0 near the lower edge.
        let snap = snapshot(flat_bars(20, 100.0));
        let structure = structure_with_bias(TradeBias::Long);
        let zones = poi_zone(99.8, 102.0);
        let state = compute_execution_state(
            &snap,
            Some(&structure),
            None,
            Some(&zones),
            &SmcConfig::default(),
        );
        assert!(state.meta.in_play);
        match state.meta.in_play_ref {
            Some(InPlayRef::Poi { ref poi_zone_id, .. }) => assert_eq!(poi_zone_id, "z1"),
            ref other => panic!("expected POI ref, got {other:?}"),
        }
    }

    #[test]
    fn center_of_wide_poi_is_not_in_play() {
        // Same POI but the close sits mid-rectangle, outside the edge band.
        let snap = snapshot(flat_bars(20, 100.9));
        let structure = structure_with_bias(TradeBias::Long);
        let zones = poi_zone(99.8, 102.0);
        let state = compute_execution_state(
            &snap,
            Some(&structure),
            None,
            Some(&zones),
            &SmcConfig::default(),
        );
        assert!(!state.meta.in_play);
    }

    #[test]
    fn sweep_short_on_target_pierce() {
        // Target at 101 via pdh; the last bar pierces it and closes below.
        let mut bars = flat_bars(20, 100.5);
        let n = bars.len() as i64;
        bars.push(bar(n, 100.5, 101.4, 100.3, 100.6));
        let mut snap = snapshot(bars);
        snap.context.pdh = Some(101.0);

        let structure = structure_with_bias(TradeBias::Short);
        let state = compute_execution_state(
            &snap,
            Some(&structure),
            None,
            None,
            &SmcConfig::default(),
        );
        assert!(state.meta.in_play);
        let sweeps: Vec<_> = state
            .execution_events
            .iter()
            .filter(|e| e.event_type == ExecEventType::Sweep)
            .collect();
        assert_eq!(sweeps.len(), 1);
        assert_eq!(sweeps[0].direction, Direction::Short);
        assert!((sweeps[0].level - 101.0).abs() < f64::EPSILON);
        assert_eq!(sweeps[0].meta.sweep_side, Some(LevelSide::High));
    }

    #[test]
    fn micro_bos_follows_bias_micro_choch_against() {
        // Close breaks above the pivot high; LONG bias ⇒ MICRO_BOS.
        let mut bars = flat_bars(12, 100.0);
        let n = bars.len() as i64;
        bars.push(bar(n, 100.0, 100.6, 99.9, 100.5));
        let mut snap = snapshot(bars.clone());
        snap.context.pdh = Some(100.4); // keeps the gate in play

        let structure = structure_with_bias(TradeBias::Long);
        let state = compute_execution_state(
            &snap,
            Some(&structure),
            None,
            None,
            &SmcConfig::default(),
        );
        assert!(state
            .execution_events
            .iter()
            .any(|e| e.event_type == ExecEventType::MicroBos && e.direction == Direction::Long));

        // Same geometry under SHORT bias flips the label.
        let mut snap = snapshot(bars);
        snap.context.pdh = Some(100.4);
        let structure = structure_with_bias(TradeBias::Short);
        let state = compute_execution_state(
            &snap,
            Some(&structure),
            None,
            None,
            &SmcConfig::default(),
        );
        assert!(state
            .execution_events
            .iter()
            .any(|e| e.event_type == ExecEventType::MicroChoch && e.direction == Direction::Long));
    }

    #[test]
    fn retest_ok_break_hold() {
        // bar[-2] closes above the pivot high, bar[-1] retests and holds.
        let mut bars = flat_bars(12, 100.0);
        let n = bars.len() as i64;
        bars.push(bar(n, 100.0, 100.8, 99.9, 100.7)); // break
        bars.push(bar(n + 1, 100.7, 100.75, 100.05, 100.2)); // retest, holds above 100.1
        let mut snap = snapshot(bars);
        snap.context.pdh = Some(100.3);

        let structure = structure_with_bias(TradeBias::Long);
        let state = compute_execution_state(
            &snap,
            Some(&structure),
            None,
            None,
            &SmcConfig::default(),
        );
        let retests: Vec<_> = state
            .execution_events
            .iter()
            .filter(|e| e.event_type == ExecEventType::RetestOk)
            .collect();
        assert!(!retests.is_empty());
        assert_eq!(retests[0].meta.source.as_deref(), Some("break_hold"));
        assert_eq!(retests[0].direction, Direction::Long);
    }

    #[test]
    fn events_capped_at_max() {
        let mut cfg = SmcConfig::default();
        cfg.exec_max_events = 1;
        // Geometry producing a sweep and a micro break simultaneously.
        let mut bars = flat_bars(12, 100.0);
        let n = bars.len() as i64;
        bars.push(bar(n, 100.0, 101.4, 99.9, 100.6));
        let mut snap = snapshot(bars);
        snap.context.pdh = Some(101.0);
        let structure = structure_with_bias(TradeBias::Long);
        let state =
            compute_execution_state(&snap, Some(&structure), None, None, &cfg);
        assert!(state.execution_events.len() <= 1);
    }
}
