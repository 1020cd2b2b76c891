// =============================================================================
// POI / FTA selection — score, archive, cap to three per side
// =============================================================================
//
// Every zone is scored (composite confidence/strength, freshness bonus, fill
// penalty) and either becomes an active POI or is archived with a subreason:
// wide span (Case D), invalidated by price, fully filled, or a non-positive
// score. At most three POI survive per side; each carries at least two short
// `why` strings plus the flat summary used by the UI.

use crate::config::SmcConfig;
use crate::market_data::Bar;
use crate::types::{
    ActivePoi, PoiCounters, SmcInput, SmcStructureState, SmcZone, SmcZoneType, ZoneDirection,
};

const POI_MAX_PER_SIDE: usize = 3;
const FRESHNESS_WINDOW_BARS: usize = 20;
const FRESHNESS_BONUS: f64 = 0.1;

/// Build POI zones plus the flat active summaries and QA counters.
pub fn build_active_poi_zones(
    snapshot: &SmcInput,
    structure: &SmcStructureState,
    zones: &[SmcZone],
    cfg: &SmcConfig,
) -> (Vec<SmcZone>, Vec<ActivePoi>, PoiCounters) {
    let mut counters = PoiCounters {
        poi_candidates: zones.len(),
        poi_max_per_side: POI_MAX_PER_SIDE,
        ..PoiCounters::default()
    };

    let bars = snapshot.primary_frame().map_or(&[][..], |f| f.bars());
    let last_close = bars.last().map(|b| b.close);
    let atr = structure.meta.atr_last.or(structure.meta.atr_median);

    let mut scored: Vec<(SmcZone, f64, Option<f64>)> = Vec::new();
    for zone in zones {
        // Case D: too wide in ATR terms to be a tradable zone.
        if let (Some(max_span), Some(atr)) = (cfg.max_zone_span_atr, atr) {
            if atr > 0.0 && zone.span() / atr > max_span {
                counters.poi_archived += 1;
                counters.poi_archived_wide_span_atr += 1;
                continue;
            }
        }

        let filled_pct = filled_pct_since_origin(zone, bars);

        // Price invalidation: a LONG zone loses meaning once price closes
        // below it, a SHORT zone once price closes above it.
        if let Some(close) = last_close {
            let invalidated = match zone.direction {
                ZoneDirection::Long => close < zone.price_min,
                ZoneDirection::Short => close > zone.price_max,
                ZoneDirection::Both => false,
            };
            if invalidated {
                counters.poi_archived += 1;
                counters.poi_archived_invalidated += 1;
                continue;
            }
        }

        if filled_pct.map_or(false, |f| f >= 0.99) {
            counters.poi_archived += 1;
            counters.poi_archived_filled += 1;
            continue;
        }

        let score = poi_score(zone, filled_pct, bars);
        if score <= 0.0 {
            counters.poi_archived += 1;
            counters.poi_archived_score += 1;
            continue;
        }

        scored.push((zone.clone(), score, filled_pct));
    }

    // Cap per side by score, best first.
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    let mut poi_zones: Vec<SmcZone> = Vec::new();
    let mut active_poi: Vec<ActivePoi> = Vec::new();
    let mut long_count = 0usize;
    let mut short_count = 0usize;

    for (mut zone, score, filled_pct) in scored {
        let slot = match zone.direction {
            ZoneDirection::Long | ZoneDirection::Both => &mut long_count,
            ZoneDirection::Short => &mut short_count,
        };
        if *slot >= POI_MAX_PER_SIDE {
            counters.poi_dropped_due_cap += 1;
            continue;
        }
        *slot += 1;

        let dist_atr = match (last_close, atr) {
            (Some(close), Some(atr)) if atr > 0.0 => Some((zone.center() - close).abs() / atr),
            _ => None,
        };
        let why = build_why(&zone, score, filled_pct, dist_atr);

        zone.meta.poi_type = Some(poi_type_tag(zone.zone_type).to_string());
        zone.meta.filled_pct = filled_pct;
        zone.meta.score = Some(round4(score));
        zone.meta.why = why.clone();

        active_poi.push(ActivePoi {
            poi_type: poi_type_tag(zone.zone_type).to_string(),
            zone_id: zone.zone_id.clone(),
            direction: zone.direction,
            price_min: zone.price_min,
            price_max: zone.price_max,
            filled_pct,
            score: Some(round4(score)),
            why,
        });
        poi_zones.push(zone);
    }

    counters.poi_active = poi_zones.len();
    (poi_zones, active_poi, counters)
}

/// How deep price has traded into the zone since its origin, as a fraction
/// of the zone span. `None` when no bars exist after the origin.
fn filled_pct_since_origin(zone: &SmcZone, bars: &[Bar]) -> Option<f64> {
    let span = zone.span().max(1e-9);
    let after: Vec<&Bar> = bars
        .iter()
        .filter(|b| b.open_time > zone.origin_time)
        .collect();
    if after.is_empty() {
        return Some(0.0);
    }
    let depth = match zone.direction {
        // A LONG zone is entered from above: penetration is measured from
        // its top down to the lowest low seen.
        ZoneDirection::Long | ZoneDirection::Both => {
            let min_low = after.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
            zone.price_max - min_low
        }
        ZoneDirection::Short => {
            let max_high = after.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
            max_high - zone.price_min
        }
    };
    Some((depth / span).clamp(0.0, 1.0))
}

/// Additive score: composite plus a freshness bonus minus the fill depth.
/// Fresher, unfilled zones rank higher.
fn poi_score(zone: &SmcZone, filled_pct: Option<f64>, bars: &[Bar]) -> f64 {
    let base = zone.composite_score();
    let fill_penalty = filled_pct.unwrap_or(0.0);
    let freshness = bars
        .len()
        .checked_sub(FRESHNESS_WINDOW_BARS)
        .and_then(|cut| bars.get(cut))
        .map_or(true, |cutoff| zone.origin_time >= cutoff.open_time);
    let bonus = if freshness { FRESHNESS_BONUS } else { 0.0 };
    base + bonus - fill_penalty
}

fn build_why(
    zone: &SmcZone,
    score: f64,
    filled_pct: Option<f64>,
    dist_atr: Option<f64>,
) -> Vec<String> {
    let mut why = vec![
        format!("role:{}", zone.role.name()),
        format!("score:{:.2}", score),
    ];
    if let Some(filled) = filled_pct {
        why.push(format!("filled_pct:{:.2}", filled));
    }
    if let Some(dist) = dist_atr {
        why.push(format!("dist_atr:{:.2}", dist));
    }
    why
}

fn poi_type_tag(zone_type: SmcZoneType) -> &'static str {
    match zone_type {
        SmcZoneType::OrderBlock => "OB",
        SmcZoneType::Breaker => "BREAKER",
        SmcZoneType::Imbalance | SmcZoneType::FairValueGap => "FVG",
        other => other.name(),
    }
}

fn round4(v: f64) -> f64 {
    (v * 1e4).round() / 1e4
}
