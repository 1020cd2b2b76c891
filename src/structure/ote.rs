// =============================================================================
// OTE zones — 62–79% retracement of the last qualifying impulses
// =============================================================================
//
// Only legs after the last CHOCH qualify (stale impulses are cut off). A leg
// must be trend-aligned (when `ote_trend_only` is set), clear the amplitude
// threshold max(ATR * leg_min_amplitude_atr, |price| * bos_min_move_pct),
// and each side is capped at `ote_max_active_per_side`. Output is newest
// first within each side, LONG side before SHORT.

use crate::config::SmcConfig;
use crate::types::{Direction, LegLabel, Role, SmcLeg, SmcOteZone, SmcTrend, TradeBias};

/// Build OTE zones from legs with trend/ATR/bias-role filtering.
pub fn build_ote_zones(
    legs: &[SmcLeg],
    trend: SmcTrend,
    cfg: &SmcConfig,
    atr: &[Option<f64>],
    bias: TradeBias,
    last_choch_time: Option<i64>,
) -> Vec<SmcOteZone> {
    if legs.is_empty() || cfg.ote_min >= cfg.ote_max {
        return Vec::new();
    }

    let scoped = legs_after_marker(legs, last_choch_time);
    if scoped.is_empty() {
        return Vec::new();
    }

    let allowed = allowed_trends(trend, bias);
    let per_side_limit = cfg.ote_max_active_per_side.max(1);
    let mut zones_long: Vec<SmcOteZone> = Vec::new();
    let mut zones_short: Vec<SmcOteZone> = Vec::new();

    for leg in scoped.iter().rev() {
        let leg_trend = match leg.label {
            LegLabel::Hh => SmcTrend::Up,
            LegLabel::Ll => SmcTrend::Down,
            _ => continue,
        };
        if cfg.ote_trend_only && !allowed.is_empty() && !allowed.contains(&leg_trend) {
            continue;
        }
        if !passes_amplitude_threshold(leg, atr, cfg) {
            continue;
        }
        let mut zone = match build_zone(leg, cfg.ote_min, cfg.ote_max) {
            Some(zone) => zone,
            None => continue,
        };
        zone.role = resolve_zone_role(bias, zone.direction);

        match zone.direction {
            Direction::Long => {
                if zones_long.len() < per_side_limit {
                    zones_long.push(zone);
                }
            }
            Direction::Short => {
                if zones_short.len() < per_side_limit {
                    zones_short.push(zone);
                }
            }
        }
    }

    // Collected newest-first while walking backwards; present each side in
    // chronological order, LONG side first.
    zones_long.reverse();
    zones_short.reverse();
    zones_long.into_iter().chain(zones_short).collect()
}

fn build_zone(leg: &SmcLeg, fib_min: f64, fib_max: f64) -> Option<SmcOteZone> {
    let price_delta = leg.to_swing.price - leg.from_swing.price;
    if price_delta.abs() < 1e-9 {
        return None;
    }

    let (ote_min, ote_max, direction) = if price_delta > 0.0 {
        let span = price_delta;
        (
            leg.to_swing.price - span * fib_max,
            leg.to_swing.price - span * fib_min,
            Direction::Long,
        )
    } else {
        let span = price_delta.abs();
        (
            leg.to_swing.price + span * fib_min,
            leg.to_swing.price + span * fib_max,
            Direction::Short,
        )
    };

    if ote_min == ote_max {
        return None;
    }

    Some(SmcOteZone {
        leg: leg.clone(),
        ote_min: ote_min.min(ote_max),
        ote_max: ote_min.max(ote_max),
        direction,
        role: Role::Primary,
    })
}

fn legs_after_marker(legs: &[SmcLeg], marker_ts: Option<i64>) -> Vec<&SmcLeg> {
    let marker = match marker_ts {
        Some(ts) => ts,
        None => return legs.iter().collect(),
    };
    match legs.iter().position(|leg| leg.to_swing.time >= marker) {
        Some(start) => legs[start..].iter().collect(),
        None => Vec::new(),
    }
}

fn resolve_zone_role(bias: TradeBias, direction: Direction) -> Role {
    match (bias, direction) {
        (TradeBias::Neutral, _) => Role::Neutral,
        (TradeBias::Long, Direction::Long) | (TradeBias::Short, Direction::Short) => Role::Primary,
        _ => Role::Countertrend,
    }
}

fn allowed_trends(trend: SmcTrend, bias: TradeBias) -> Vec<SmcTrend> {
    let bias_trend = match bias {
        TradeBias::Long => Some(SmcTrend::Up),
        TradeBias::Short => Some(SmcTrend::Down),
        TradeBias::Neutral => None,
    };

    if matches!(trend, SmcTrend::Up | SmcTrend::Down) {
        let mut allowed = vec![trend];
        if let Some(bt) = bias_trend {
            if !allowed.contains(&bt) {
                allowed.push(bt);
            }
        }
        return allowed;
    }

    // Trend undefined but a bias exists: keep both directions so the
    // countertrend zone stays visible for diagnostics (PRIMARY is decided by
    // role, not by this filter).
    if bias_trend.is_some() {
        return vec![SmcTrend::Up, SmcTrend::Down];
    }
    Vec::new()
}

fn passes_amplitude_threshold(leg: &SmcLeg, atr: &[Option<f64>], cfg: &SmcConfig) -> bool {
    let amplitude = leg.amplitude();
    let atr_value = atr.get(leg.to_swing.index).copied().flatten();
    let atr_component = atr_value.map_or(0.0, |a| a * cfg.leg_min_amplitude_atr);
    let pct_component = leg.to_swing.price.abs() * cfg.bos_min_move_pct;
    let threshold = atr_component.max(pct_component);
    threshold == 0.0 || amplitude >= threshold
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LevelSide, SmcSwing};

    fn swing(index: usize, price: f64, kind: LevelSide) -> SmcSwing {
        SmcSwing {
            index,
            time: index as i64 * 300_000,
            price,
            kind,
            strength: 2,
        }
    }

    fn leg(from: SmcSwing, to: SmcSwing, label: LegLabel) -> SmcLeg {
        SmcLeg {
            from_swing: from,
            to_swing: to,
            label,
            reference_price: Some(from.price),
        }
    }

    fn up_leg() -> SmcLeg {
        leg(
            swing(0, 100.0, LevelSide::Low),
            swing(4, 110.0, LevelSide::High),
            LegLabel::Hh,
        )
    }

    #[test]
    fn projects_62_79_band_against_the_leg() {
        let cfg = SmcConfig::default();
        let atr = vec![Some(1.0); 5];
        let zones = build_ote_zones(
            &[up_leg()],
            SmcTrend::Up,
            &cfg,
            &atr,
            TradeBias::Long,
            None,
        );
        assert_eq!(zones.len(), 1);
        let z = &zones[0];
        assert_eq!(z.direction, Direction::Long);
        assert_eq!(z.role, Role::Primary);
        // span 10: 110 - 7.9 = 102.1 .. 110 - 6.2 = 103.8
        assert!((z.ote_min - 102.1).abs() < 1e-9);
        assert!((z.ote_max - 103.8).abs() < 1e-9);
    }

    #[test]
    fn short_leg_projects_upward() {
        let cfg = SmcConfig::default();
        let down = leg(
            swing(0, 110.0, LevelSide::High),
            swing(4, 100.0, LevelSide::Low),
            LegLabel::Ll,
        );
        let atr = vec![Some(1.0); 5];
        let zones = build_ote_zones(
            &[down],
            SmcTrend::Down,
            &cfg,
            &atr,
            TradeBias::Short,
            None,
        );
        assert_eq!(zones.len(), 1);
        let z = &zones[0];
        assert_eq!(z.direction, Direction::Short);
        assert!((z.ote_min - 106.2).abs() < 1e-9);
        assert!((z.ote_max - 107.9).abs() < 1e-9);
    }

    #[test]
    fn amplitude_threshold_blocks_small_legs() {
        let cfg = SmcConfig::default();
        let tiny = leg(
            swing(0, 100.0, LevelSide::Low),
            swing(4, 100.3, LevelSide::High),
            LegLabel::Hh,
        );
        // ATR 1.0 ⇒ threshold 0.8, amplitude 0.3 fails.
        let zones = build_ote_zones(
            &[tiny],
            SmcTrend::Up,
            &cfg,
            &[Some(1.0); 5],
            TradeBias::Long,
            None,
        );
        assert!(zones.is_empty());
    }

    #[test]
    fn per_side_cap_keeps_newest() {
        let mut cfg = SmcConfig::default();
        cfg.ote_max_active_per_side = 1;
        let older = up_leg();
        let newer = leg(
            swing(6, 101.0, LevelSide::Low),
            swing(10, 112.0, LevelSide::High),
            LegLabel::Hh,
        );
        let atr = vec![Some(1.0); 11];
        let zones = build_ote_zones(
            &[older, newer.clone()],
            SmcTrend::Up,
            &cfg,
            &atr,
            TradeBias::Long,
            None,
        );
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].leg.to_swing.index, newer.to_swing.index);
    }

    #[test]
    fn choch_marker_cuts_older_legs() {
        let cfg = SmcConfig::default();
        let old = up_leg(); // to_swing.time = 4 * 300_000
        let atr = vec![Some(1.0); 5];
        let zones = build_ote_zones(
            &[old],
            SmcTrend::Up,
            &cfg,
            &atr,
            TradeBias::Long,
            Some(10 * 300_000),
        );
        assert!(zones.is_empty());
    }

    #[test]
    fn countertrend_role_when_bias_opposes() {
        let mut cfg = SmcConfig::default();
        cfg.ote_trend_only = false;
        let atr = vec![Some(1.0); 5];
        let zones = build_ote_zones(
            &[up_leg()],
            SmcTrend::Up,
            &cfg,
            &atr,
            TradeBias::Short,
            None,
        );
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].role, Role::Countertrend);
    }
}
