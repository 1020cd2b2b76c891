// =============================================================================
// Fair Value Gap (imbalance) detection — 3-bar non-overlapping wick gaps
// =============================================================================
//
// A LONG FVG exists when low[i+2] > high[i]; a SHORT FVG when
// high[i+2] < low[i]. The gap must clear max(ATR * fvg_min_gap_atr,
// price_ref * fvg_min_gap_pct) and be younger than fvg_max_age_minutes.

use crate::config::SmcConfig;
use crate::types::{
    Direction, Role, SmcInput, SmcStructureState, SmcZone, SmcZoneType, TradeBias, ZoneDirection,
    ZoneMeta, ZoneQuality,
};

/// Detect imbalance zones by the three-bar pattern.
pub fn detect_fvg_zones(
    snapshot: &SmcInput,
    structure: &SmcStructureState,
    cfg: &SmcConfig,
) -> Vec<SmcZone> {
    let frame = match snapshot.primary_frame() {
        Some(frame) if frame.len() >= 3 => frame,
        _ => return Vec::new(),
    };
    let bars = frame.bars();
    let atr = structure.meta.atr_last.or(structure.meta.atr_median);
    let bias = structure.bias;
    let last_ts = bars.last().map(|b| b.open_time);

    let mut zones = Vec::new();
    for idx in 0..bars.len() - 2 {
        let first = &bars[idx];
        let third = &bars[idx + 2];

        let (direction, price_min, price_max) = if third.low > first.high {
            (Direction::Long, first.high, third.low)
        } else if third.high < first.low {
            (Direction::Short, third.high, first.low)
        } else {
            continue;
        };

        let gap = (price_max - price_min).abs();
        if gap <= 0.0 {
            continue;
        }
        let price_ref = (price_min + price_max) / 2.0;
        let atr_condition = atr.map_or(false, |a| a > 0.0 && gap >= cfg.fvg_min_gap_atr * a);
        let pct_condition = price_ref > 0.0 && gap / price_ref >= cfg.fvg_min_gap_pct;
        if !(atr_condition || pct_condition) {
            continue;
        }

        let origin_time = third.open_time;
        let age_min = last_ts.map(|ts| (ts - origin_time) as f64 / 60_000.0);
        if let Some(age) = age_min {
            if age > f64::from(cfg.fvg_max_age_minutes) {
                continue;
            }
        }

        let atr_value = atr.filter(|a| *a > 0.0).unwrap_or(gap);
        let strength = (gap / atr_value).clamp(0.1, 3.0);
        let aligned = matches!(
            (bias, direction),
            (TradeBias::Long, Direction::Long) | (TradeBias::Short, Direction::Short)
        );
        let confidence = if aligned { 0.35 } else { 0.2 };

        zones.push(SmcZone {
            zone_type: SmcZoneType::Imbalance,
            price_min: price_min.min(price_max),
            price_max: price_min.max(price_max),
            timeframe: snapshot.tf_primary.clone(),
            origin_time,
            direction: match direction {
                Direction::Long => ZoneDirection::Long,
                Direction::Short => ZoneDirection::Short,
            },
            role: role_from_bias(bias, direction),
            strength,
            confidence,
            components: vec!["fvg".to_string(), format!("gap_idx_{idx}")],
            zone_id: format!("fvg_{}_{}_{}", snapshot.tf_primary, origin_time, idx),
            entry_mode: crate::types::EntryMode::Wick05,
            quality: if confidence >= 0.3 {
                ZoneQuality::Medium
            } else {
                ZoneQuality::Weak
            },
            reference_leg_id: None,
            reference_event_id: None,
            bias_at_creation: bias.into(),
            meta: ZoneMeta {
                gap: Some(gap),
                gap_atr: atr.filter(|a| *a > 0.0).map(|a| gap / a),
                gap_pct: (price_ref > 0.0).then(|| gap / price_ref),
                age_min: age_min.map(|v| (v * 100.0).round() / 100.0),
                source_idx: Some(idx),
                ..ZoneMeta::default()
            },
        });
    }
    zones
}

fn role_from_bias(bias: TradeBias, direction: Direction) -> Role {
    match bias {
        TradeBias::Neutral => Role::Neutral,
        TradeBias::Long => {
            if direction == Direction::Long {
                Role::Primary
            } else {
                Role::Countertrend
            }
        }
        TradeBias::Short => {
            if direction == Direction::Short {
                Role::Primary
            } else {
                Role::Countertrend
            }
        }
    }
}
