// =============================================================================
// Frame records — one marker per snapshot for preview/close reconciliation
// =============================================================================
//
// Written on every snapshot even when the diff produced no events. Active
// ids cover the extended entity set (zones, pools, magnets, structure
// events, range state, active range, OTE, AMD phase, wick clusters) with
// tick-quantized prices so micro-shifts of a level do not read as deltas.
// The overlap matrix counts active-zone pairs at IoU >= 0.2 / 0.4 / 0.6 —
// the offline "two zones acting as one" metric.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::serialize::ms_to_rfc3339;
use crate::types::{ComputeKind, SmcHint};

use super::ids::{magnet_id_quantized, pool_id_quantized, q_price, resolve_tick};

/// Pair counts at the fixed IoU thresholds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PairsIouGe {
    #[serde(rename = "0.2")]
    pub ge_02: usize,
    #[serde(rename = "0.4")]
    pub ge_04: usize,
    #[serde(rename = "0.6")]
    pub ge_06: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZoneOverlapActive {
    pub n_active: usize,
    pub total_pairs: usize,
    pub pairs_iou_ge: PairsIouGe,
}

/// One frame marker line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub ts: String,
    pub symbol: String,
    pub tf: String,
    pub kind: ComputeKind,
    pub primary_close_ms: i64,
    pub bar_complete: bool,
    pub counts: BTreeMap<String, usize>,
    pub active_ids: BTreeMap<String, Vec<String>>,
    pub zone_overlap_active: ZoneOverlapActive,
}

const FRAME_ENTITY_KEYS: [&str; 9] = [
    "zone",
    "pool",
    "magnet",
    "structure_event",
    "range_state",
    "active_range",
    "ote",
    "amd_phase",
    "wick_cluster",
];

/// Stable active ids for the frame record, grouped per entity key.
pub fn extract_active_ids(hint: &SmcHint) -> BTreeMap<String, Vec<String>> {
    let tick = resolve_tick(hint);
    let mut out: BTreeMap<String, Vec<String>> = FRAME_ENTITY_KEYS
        .iter()
        .map(|k| (k.to_string(), Vec::new()))
        .collect();

    if let Some(zones) = &hint.zones {
        let bucket = out.get_mut("zone").expect("seeded");
        for zone in &zones.zones {
            bucket.push(zone.zone_id.clone());
        }
    }

    if let Some(liquidity) = &hint.liquidity {
        {
            let bucket = out.get_mut("pool").expect("seeded");
            for pool in &liquidity.pools {
                bucket.push(pool_id_quantized(pool, tick));
            }
        }
        {
            let bucket = out.get_mut("magnet").expect("seeded");
            for magnet in &liquidity.magnets {
                bucket.push(magnet_id_quantized(magnet, tick));
            }
        }
        if let Some(phase) = liquidity.amd_phase {
            let name = serde_json::to_value(phase)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            out.get_mut("amd_phase")
                .expect("seeded")
                .push(format!("amd:{name}"));
        }
        let bucket = out.get_mut("wick_cluster").expect("seeded");
        for cluster in &liquidity.meta.wick_clusters {
            match cluster.cluster_id.as_deref().filter(|c| !c.is_empty()) {
                Some(cid) => bucket.push(format!("wcluster:{cid}")),
                None => bucket.push(format!(
                    "wcluster:{}:{}",
                    cluster.side.name(),
                    q_price(cluster.level, tick)
                )),
            }
        }
    }

    if let Some(structure) = &hint.structure {
        {
            let bucket = out.get_mut("structure_event").expect("seeded");
            for event in &structure.events {
                bucket.push(format!(
                    "{}:{}:{}:{}->{}",
                    event.event_type.name(),
                    event.direction.name(),
                    event.time / 1000,
                    event.source_leg.from_swing.index,
                    event.source_leg.to_swing.index
                ));
            }
        }
        out.get_mut("range_state")
            .expect("seeded")
            .push(format!("range_state:{}", structure.range_state));
        if let Some(range) = &structure.active_range {
            // Deliberately no end_time: it rolls every bar.
            out.get_mut("active_range").expect("seeded").push(format!(
                "range:{}:{}:{}",
                range.start_time / 1000,
                q_price(range.low, tick),
                q_price(range.high, tick)
            ));
        }
        let bucket = out.get_mut("ote").expect("seeded");
        for ote in &structure.ote_zones {
            bucket.push(format!(
                "ote:{}:{}:{}->{}:{}:{}",
                ote.direction.name(),
                ote.role.name(),
                ote.leg.from_swing.index,
                ote.leg.to_swing.index,
                q_price(ote.ote_min, tick),
                q_price(ote.ote_max, tick)
            ));
        }
    }

    for bucket in out.values_mut() {
        bucket.sort();
        bucket.dedup();
    }
    out
}

/// Build one frame marker record for the snapshot.
pub fn build_frame_record(
    symbol: &str,
    tf: &str,
    now_ms: i64,
    kind: ComputeKind,
    primary_close_ms: i64,
    bar_complete: bool,
    hint: &SmcHint,
) -> FrameRecord {
    let active_ids = extract_active_ids(hint);
    let counts: BTreeMap<String, usize> = active_ids
        .iter()
        .map(|(k, v)| (k.clone(), v.len()))
        .collect();

    let mut overlap = ZoneOverlapActive::default();
    if let Some(zones) = &hint.zones {
        let bounds: Vec<(f64, f64)> = zones
            .active_zones
            .iter()
            .filter_map(|z| {
                let lo = z.price_min.min(z.price_max);
                let hi = z.price_min.max(z.price_max);
                (hi > lo).then_some((lo, hi))
            })
            .collect();
        let n = bounds.len();
        overlap.n_active = n;
        overlap.total_pairs = n * n.saturating_sub(1) / 2;
        for i in 0..n {
            for j in i + 1..n {
                let (a_lo, a_hi) = bounds[i];
                let (b_lo, b_hi) = bounds[j];
                let inter = (a_hi.min(b_hi) - a_lo.max(b_lo)).max(0.0);
                let union = a_hi.max(b_hi) - a_lo.min(b_lo);
                if union <= 0.0 {
                    continue;
                }
                let iou = inter / union;
                if iou >= 0.2 {
                    overlap.pairs_iou_ge.ge_02 += 1;
                }
                if iou >= 0.4 {
                    overlap.pairs_iou_ge.ge_04 += 1;
                }
                if iou >= 0.6 {
                    overlap.pairs_iou_ge.ge_06 += 1;
                }
            }
        }
    }

    FrameRecord {
        ts: ms_to_rfc3339(now_ms),
        symbol: symbol.to_uppercase(),
        tf: tf.to_string(),
        kind,
        primary_close_ms,
        bar_complete,
        counts,
        active_ids,
        zone_overlap_active: overlap,
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        BiasAtCreation, EntryMode, Role, SmcZone, SmcZoneType, SmcZonesState, ZoneDirection,
        ZoneMeta, ZoneQuality,
    };

    fn zone(zone_id: &str, lo: f64, hi: f64) -> SmcZone {
        SmcZone {
            zone_type: SmcZoneType::OrderBlock,
            price_min: lo,
            price_max: hi,
            timeframe: "5m".into(),
            origin_time: 0,
            direction: ZoneDirection::Long,
            role: Role::Primary,
            strength: 1.0,
            confidence: 0.5,
            components: vec![],
            zone_id: zone_id.into(),
            entry_mode: EntryMode::Wick05,
            quality: ZoneQuality::Unknown,
            reference_leg_id: None,
            reference_event_id: None,
            bias_at_creation: BiasAtCreation::Unknown,
            meta: ZoneMeta::default(),
        }
    }

    #[test]
    fn overlap_matrix_counts_thresholds() {
        // IoU([100,110], [104,110]) = 6/10 = 0.6; both 0.2 and 0.4 and 0.6.
        // IoU([100,110], [108,112]) = 2/12 ≈ 0.167: none.
        let z1 = zone("z1", 100.0, 110.0);
        let z2 = zone("z2", 104.0, 110.0);
        let z3 = zone("z3", 108.0, 112.0);
        let hint = SmcHint {
            zones: Some(SmcZonesState {
                zones: vec![z1.clone(), z2.clone(), z3.clone()],
                active_zones: vec![z1, z2, z3],
                ..SmcZonesState::default()
            }),
            ..SmcHint::default()
        };
        let record =
            build_frame_record("xauusd", "5m", 0, ComputeKind::Preview, 0, false, &hint);
        assert_eq!(record.symbol, "XAUUSD");
        assert_eq!(record.zone_overlap_active.n_active, 3);
        assert_eq!(record.zone_overlap_active.total_pairs, 3);
        // z1-z2 at 0.6; z2-z3 IoU = 2/8 = 0.25 also >= 0.2.
        assert_eq!(record.zone_overlap_active.pairs_iou_ge.ge_02, 2);
        assert_eq!(record.zone_overlap_active.pairs_iou_ge.ge_04, 1);
        assert_eq!(record.zone_overlap_active.pairs_iou_ge.ge_06, 1);
    }

    #[test]
    fn preview_vs_close_pair_of_zones() {
        // Seed scenario: two zones with IoU ~0.33 ⇒ one pair over 0.2 only.
        let z1 = zone("z1", 100.0, 110.0);
        let z2 = zone("z2", 105.0, 115.0);
        let hint = SmcHint {
            zones: Some(SmcZonesState {
                active_zones: vec![z1, z2],
                ..SmcZonesState::default()
            }),
            ..SmcHint::default()
        };
        let record =
            build_frame_record("eurusd", "5m", 1_000, ComputeKind::Preview, 900, false, &hint);
        assert_eq!(record.zone_overlap_active.n_active, 2);
        assert_eq!(record.zone_overlap_active.total_pairs, 1);
        assert_eq!(record.zone_overlap_active.pairs_iou_ge.ge_02, 1);
        assert_eq!(record.zone_overlap_active.pairs_iou_ge.ge_04, 0);
        assert_eq!(record.zone_overlap_active.pairs_iou_ge.ge_06, 0);
    }

    #[test]
    fn counts_match_active_ids() {
        let hint = SmcHint {
            zones: Some(SmcZonesState {
                zones: vec![zone("z1", 1.0, 2.0)],
                ..SmcZonesState::default()
            }),
            ..SmcHint::default()
        };
        let record = build_frame_record("x", "5m", 0, ComputeKind::Close, 0, true, &hint);
        assert_eq!(record.counts["zone"], 1);
        assert_eq!(record.active_ids["zone"], vec!["z1".to_string()]);
        // Every entity key is present even when empty.
        for key in FRAME_ENTITY_KEYS {
            assert!(record.counts.contains_key(key));
        }
    }
}
