// =============================================================================
// SMC zones pipeline: order blocks, breakers, FVGs, merge, active, POI
// =============================================================================
//
// Detection runs first (OB → breakers → FVG), then normalization: overlap
// merge inside (type, role, direction, timeframe) groups (Case E), the
// distance and span filters for the active set (Case D), and finally POI
// selection with its counters. The meta block republishes the thresholds so
// offline consumers (journal, QA) can classify removals without guessing.

pub mod breaker;
pub mod fvg;
pub mod order_block;
pub mod poi;

use tracing::debug;

use crate::config::SmcConfig;
use crate::types::{
    BreakerParams, FvgParams, MergeStats, SmcInput, SmcLiquidityState, SmcStructureState,
    SmcZone, SmcZoneType, SmcZonesState, ZonesMeta,
};

pub use breaker::detect_breakers;
pub use fvg::detect_fvg_zones;
pub use order_block::detect_order_blocks;
pub use poi::build_active_poi_zones;

/// Build the zones state: detectors → merge → active selection → POI.
pub fn compute_zones_state(
    snapshot: &SmcInput,
    structure: &SmcStructureState,
    liquidity: Option<&SmcLiquidityState>,
    cfg: &SmcConfig,
) -> SmcZonesState {
    let bar_count = snapshot.primary_frame().map_or(0, |f| f.len());

    let orderblocks = detect_order_blocks(snapshot, structure, cfg);
    let breakers = detect_breakers(snapshot, structure, liquidity, &orderblocks, cfg);
    let fvgs = detect_fvg_zones(snapshot, structure, cfg);

    let mut zones: Vec<SmcZone> = Vec::new();
    zones.extend(orderblocks);
    zones.extend(breakers);
    zones.extend(fvgs);

    let merge_stats = merge_zones_by_overlap(&mut zones, cfg.zone_merge_iou_threshold);

    let atr = structure.meta.atr_last.or(structure.meta.atr_median);
    let last_close = snapshot.primary_frame().and_then(|f| f.last_close());
    let (active_zones, filtered_by_span) =
        select_active_zones(&zones, atr, last_close, cfg);

    let (poi_zones, active_poi, poi_counters) =
        build_active_poi_zones(snapshot, structure, &zones, cfg);

    debug!(
        symbol = %snapshot.symbol,
        zones = zones.len(),
        active = active_zones.len(),
        poi = poi_zones.len(),
        merged_losers = merge_stats.merged_losers,
        "zones state built"
    );

    SmcZonesState {
        meta: ZonesMeta {
            bar_count,
            zone_count: zones.len(),
            active_count: active_zones.len(),
            poi_count: poi_zones.len(),
            max_zone_span_atr: cfg.max_zone_span_atr,
            zones_filtered_by_span_atr: filtered_by_span,
            active_zone_distance_threshold_atr: cfg.ob_max_active_distance_atr,
            touch_epsilon: cfg.touch_epsilon,
            merge: merge_stats,
            poi: poi_counters,
            active_poi,
            fvg_params: FvgParams {
                fvg_max_age_minutes: cfg.fvg_max_age_minutes,
            },
            breaker_params: BreakerParams {
                breaker_max_ob_age_minutes: cfg.breaker_max_ob_age_minutes,
                breaker_max_sweep_delay_minutes: cfg.breaker_max_sweep_delay_minutes,
            },
            atr_last: structure.meta.atr_last,
        },
        zones,
        active_zones,
        poi_zones,
    }
}

/// IoU of two price intervals.
fn interval_iou(a: (f64, f64), b: (f64, f64)) -> f64 {
    let inter = (a.1.min(b.1) - a.0.max(b.0)).max(0.0);
    let union = a.1.max(b.1) - a.0.min(b.0);
    if union <= 0.0 {
        return 0.0;
    }
    inter / union
}

/// Case E: within (type, role, direction, timeframe) groups, merge pairs
/// whose IoU clears the threshold. The zone with the better composite score
/// survives and records the losers in `meta.merged_from`.
fn merge_zones_by_overlap(zones: &mut Vec<SmcZone>, threshold: Option<f64>) -> MergeStats {
    let threshold = match threshold {
        Some(t) if t > 0.0 => t,
        _ => return MergeStats::default(),
    };
    if zones.len() < 2 {
        return MergeStats::default();
    }

    let group_key = |z: &SmcZone| {
        (
            z.zone_type,
            z.role,
            z.direction,
            z.timeframe.clone(),
        )
    };

    let mut groups_with_pairs = 0usize;
    let mut removed_total = 0usize;
    let mut keep: Vec<SmcZone> = Vec::with_capacity(zones.len());
    let mut consumed: Vec<usize> = Vec::new();

    // Deterministic winner resolution: scan in input order; on a qualifying
    // overlap the better-scored zone absorbs the other.
    let snapshot: Vec<SmcZone> = zones.clone();
    let mut group_seen: Vec<(SmcZoneType, crate::types::Role, crate::types::ZoneDirection, String)> =
        Vec::new();
    for i in 0..snapshot.len() {
        if consumed.contains(&i) {
            continue;
        }
        let mut winner = snapshot[i].clone();
        let key_i = group_key(&winner);
        let mut had_pair = false;
        for (j, other) in snapshot.iter().enumerate().skip(i + 1) {
            if consumed.contains(&j) {
                continue;
            }
            if group_key(other) != key_i {
                continue;
            }
            let iou = interval_iou(
                (winner.price_min, winner.price_max),
                (other.price_min, other.price_max),
            );
            if iou < threshold {
                continue;
            }
            had_pair = true;
            consumed.push(j);
            removed_total += 1;
            if other.composite_score() > winner.composite_score() {
                let loser_id = winner.zone_id.clone();
                let mut merged_from = winner.meta.merged_from.clone();
                winner = other.clone();
                merged_from.push(loser_id);
                merged_from.extend(winner.meta.merged_from.clone());
                winner.meta.merged_from = merged_from;
                winner.meta.merged_from.sort();
                winner.meta.merged_from.dedup();
            } else {
                winner.meta.merged_from.push(other.zone_id.clone());
                winner
                    .meta
                    .merged_from
                    .extend(other.meta.merged_from.clone());
                winner.meta.merged_from.sort();
                winner.meta.merged_from.dedup();
            }
        }
        if had_pair && !group_seen.contains(&key_i) {
            group_seen.push(key_i);
            groups_with_pairs += 1;
        }
        keep.push(winner);
    }

    *zones = keep;
    MergeStats {
        merged_losers: removed_total,
        groups: groups_with_pairs,
    }
}

/// Case D + distance filter for the active zone set.
fn select_active_zones(
    zones: &[SmcZone],
    atr: Option<f64>,
    last_close: Option<f64>,
    cfg: &SmcConfig,
) -> (Vec<SmcZone>, usize) {
    let mut filtered_by_span = 0usize;
    let mut active = Vec::new();

    for zone in zones {
        if let (Some(threshold), Some(atr), Some(close)) =
            (cfg.ob_max_active_distance_atr, atr, last_close)
        {
            if atr > 0.0 && (zone.center() - close).abs() / atr > threshold {
                continue;
            }
        }
        if let (Some(max_span), Some(atr)) = (cfg.max_zone_span_atr, atr) {
            if atr > 0.0 && zone.span() / atr > max_span {
                filtered_by_span += 1;
                continue;
            }
        }
        active.push(zone.clone());
    }
    (active, filtered_by_span)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::{Bar, Frame};
    use crate::types::{
        BiasAtCreation, EntryMode, Role, StructureMeta, TradeBias, ZoneDirection, ZoneMeta,
        ZoneQuality,
    };
    use std::collections::BTreeMap;

    fn bar(i: i64, o: f64, h: f64, l: f64, c: f64) -> Bar {
        Bar {
            open_time: i * 300_000,
            close_time: i * 300_000 + 299_999,
            open: o,
            high: h,
            low: l,
            close: c,
            volume: 1.0,
            complete: true,
        }
    }

    fn snapshot(bars: Vec<Bar>) -> SmcInput {
        let mut ohlc = BTreeMap::new();
        ohlc.insert("5m".to_string(), Frame::from_bars(bars));
        SmcInput {
            symbol: "XAUUSD".into(),
            tf_primary: "5m".into(),
            ohlc_by_tf: ohlc,
            context: Default::default(),
        }
    }

    fn zone(zone_id: &str, lo: f64, hi: f64, strength: f64) -> SmcZone {
        SmcZone {
            zone_type: SmcZoneType::OrderBlock,
            price_min: lo,
            price_max: hi,
            timeframe: "5m".into(),
            origin_time: 0,
            direction: ZoneDirection::Long,
            role: Role::Primary,
            strength,
            confidence: 1.0,
            components: vec![],
            zone_id: zone_id.into(),
            entry_mode: EntryMode::Wick05,
            quality: ZoneQuality::Unknown,
            reference_leg_id: None,
            reference_event_id: None,
            bias_at_creation: BiasAtCreation::Long,
            meta: ZoneMeta::default(),
        }
    }

    #[test]
    fn merge_by_overlap_keeps_best_and_marks_merged_from() {
        // IoU for [100..110] vs [101..109]: inter 8 / union 10 = 0.8.
        let mut zones = vec![zone("z_best", 100.0, 110.0, 2.0), zone("z_dup", 101.0, 109.0, 0.1)];
        let stats = merge_zones_by_overlap(&mut zones, Some(0.6));

        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].zone_id, "z_best");
        assert!(zones[0].meta.merged_from.contains(&"z_dup".to_string()));
        assert_eq!(stats.merged_losers, 1);
        assert_eq!(stats.groups, 1);
    }

    #[test]
    fn merge_keeps_higher_score_even_when_second() {
        let mut zones = vec![zone("z_weak", 100.0, 110.0, 0.1), zone("z_strong", 101.0, 109.0, 2.5)];
        merge_zones_by_overlap(&mut zones, Some(0.6));
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].zone_id, "z_strong");
        assert!(zones[0].meta.merged_from.contains(&"z_weak".to_string()));
    }

    #[test]
    fn no_surviving_pair_overlaps_above_threshold() {
        let mut zones = vec![
            zone("a", 100.0, 110.0, 1.0),
            zone("b", 101.0, 109.0, 0.5),
            zone("c", 130.0, 140.0, 0.5),
        ];
        merge_zones_by_overlap(&mut zones, Some(0.6));
        for i in 0..zones.len() {
            for j in i + 1..zones.len() {
                let iou = interval_iou(
                    (zones[i].price_min, zones[i].price_max),
                    (zones[j].price_min, zones[j].price_max),
                );
                assert!(iou < 0.6, "zones {i} and {j} still overlap (iou={iou})");
            }
        }
    }

    #[test]
    fn merge_disabled_when_threshold_none() {
        let mut zones = vec![zone("a", 100.0, 110.0, 1.0), zone("b", 101.0, 109.0, 0.5)];
        let stats = merge_zones_by_overlap(&mut zones, None);
        assert_eq!(zones.len(), 2);
        assert_eq!(stats.merged_losers, 0);
    }

    #[test]
    fn different_groups_never_merge() {
        let mut a = zone("a", 100.0, 110.0, 1.0);
        let mut b = zone("b", 101.0, 109.0, 0.5);
        a.direction = ZoneDirection::Long;
        b.direction = ZoneDirection::Short;
        let mut zones = vec![a, b];
        merge_zones_by_overlap(&mut zones, Some(0.6));
        assert_eq!(zones.len(), 2);
    }

    #[test]
    fn active_selection_filters_span_and_distance() {
        let mut cfg = SmcConfig::default();
        cfg.ob_max_active_distance_atr = Some(5.0);
        cfg.max_zone_span_atr = Some(2.0);

        let wide = zone("z_wide", 90.0, 96.0, 1.0); // span 6 ATR
        let far = zone("z_far", 150.0, 151.0, 1.0); // 50 ATR away
        let ok = zone("z_ok", 98.0, 99.0, 1.0);
        let (active, filtered) = select_active_zones(
            &[wide, far, ok],
            Some(1.0),
            Some(100.0),
            &cfg,
        );
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].zone_id, "z_ok");
        assert_eq!(filtered, 1); // only the wide one counts for the span metric
    }

    #[test]
    fn compute_zones_state_end_to_end_bullish_fvg() {
        // Spec seed: three 5m bars with a clean bullish gap.
        let bars = vec![
            bar(0, 99.6, 100.0, 99.2, 99.8),
            bar(1, 100.2, 101.0, 100.1, 100.8),
            bar(2, 102.8, 103.0, 102.7, 102.9),
        ];
        let snap = snapshot(bars);
        let structure = SmcStructureState {
            primary_tf: "5m".into(),
            bias: TradeBias::Long,
            meta: StructureMeta {
                atr_last: Some(1.0),
                ..StructureMeta::default()
            },
            ..SmcStructureState::default()
        };
        let state = compute_zones_state(&snap, &structure, None, &SmcConfig::default());
        let imbalances: Vec<&SmcZone> = state
            .zones
            .iter()
            .filter(|z| z.zone_type == SmcZoneType::Imbalance)
            .collect();
        assert_eq!(imbalances.len(), 1);
        assert_eq!(imbalances[0].direction, ZoneDirection::Long);
        assert!((imbalances[0].price_min - 100.0).abs() < 1e-9);
        assert!((imbalances[0].price_max - 102.7).abs() < 1e-9);
        assert!((imbalances[0].meta.gap.unwrap() - 2.7).abs() < 1e-9);
        assert_eq!(state.meta.zone_count, state.zones.len());
        assert_eq!(state.meta.touch_epsilon, 0.0);
    }
}
