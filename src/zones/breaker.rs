// =============================================================================
// Breaker detection — order blocks broken after a sweep of their level
// =============================================================================
//
// A breaker forms when a PRIMARY order block has its relevant edge swept
// (an SFP on the LOW side for a LONG OB, on the HIGH side for a SHORT OB)
// and an opposite-direction BOS follows within the configured delay while
// the OB is still young enough. The BOS must displace price by at least
// breaker_min_displacement_atr from the swept level, and the BOS candle's
// body share must clear breaker_min_body_pct.

use tracing::debug;

use crate::config::SmcConfig;
use crate::types::{
    Direction, LevelSide, Role, SfpEvent, SmcInput, SmcLiquidityState, SmcStructureState,
    SmcZone, SmcZoneType, StructureEventType, TradeBias, ZoneDirection, ZoneMeta, ZoneQuality,
};

/// Detect breaker zones from already-detected order blocks.
pub fn detect_breakers(
    snapshot: &SmcInput,
    structure: &SmcStructureState,
    liquidity: Option<&SmcLiquidityState>,
    orderblocks: &[SmcZone],
    cfg: &SmcConfig,
) -> Vec<SmcZone> {
    if orderblocks.is_empty() {
        return Vec::new();
    }
    let sfp_events: &[SfpEvent] = liquidity.map_or(&[], |l| l.meta.sfp_events.as_slice());
    if sfp_events.is_empty() {
        return Vec::new();
    }
    let bars = match snapshot.primary_frame() {
        Some(frame) if !frame.is_empty() => frame.bars(),
        _ => return Vec::new(),
    };
    let atr = structure
        .meta
        .atr_last
        .or(structure.meta.atr_median)
        .unwrap_or(0.0);
    if atr <= 0.0 {
        return Vec::new();
    }

    let mut breakers = Vec::new();
    for ob in orderblocks {
        if ob.role != Role::Primary {
            continue;
        }
        let (sweep_side, ob_level, break_direction) = match ob.direction {
            ZoneDirection::Long => (LevelSide::Low, ob.price_min, Direction::Short),
            ZoneDirection::Short => (LevelSide::High, ob.price_max, Direction::Long),
            ZoneDirection::Both => continue,
        };

        // 1) A sweep of the OB's relevant edge after its origin.
        let level_tol = (ob_level.abs() * cfg.breaker_level_tolerance_pct).max(1e-9);
        let sweep = sfp_events.iter().find(|event| {
            event.side == sweep_side
                && event.time >= ob.origin_time
                && (event.level - ob_level).abs() <= level_tol
        });
        let sweep = match sweep {
            Some(sweep) => sweep,
            None => continue,
        };

        // 2) An opposite-direction BOS after the sweep, inside the windows.
        let ob_age_limit_ms = i64::from(cfg.breaker_max_ob_age_minutes) * 60_000;
        let sweep_delay_limit_ms = i64::from(cfg.breaker_max_sweep_delay_minutes) * 60_000;
        let bos = structure.events.iter().find(|event| {
            event.event_type == StructureEventType::Bos
                && event.direction == break_direction
                && event.time >= sweep.time
                && event.time - sweep.time <= sweep_delay_limit_ms
                && event.time - ob.origin_time <= ob_age_limit_ms
        });
        let bos = match bos {
            Some(bos) => bos,
            None => continue,
        };

        // 3) Displacement between swept level and BOS level, in ATR.
        let displacement_atr = (bos.price_level - sweep.level).abs() / atr;
        if displacement_atr < cfg.breaker_min_displacement_atr {
            continue;
        }

        // 4) Body share of the BOS candle (the target swing's bar).
        let bos_bar = match bars.get(bos.source_leg.to_swing.index) {
            Some(bar) => bar,
            None => continue,
        };
        let body_pct = bos_bar.body() / bos_bar.full_range().max(1e-9);
        if body_pct < cfg.breaker_min_body_pct {
            continue;
        }

        let role = breaker_role(structure.bias, break_direction);
        let break_event_id = format!("bos_{}", bos.time);
        debug!(
            ob_id = %ob.zone_id,
            direction = ?break_direction,
            displacement_atr,
            "breaker formed"
        );

        breakers.push(SmcZone {
            zone_type: SmcZoneType::Breaker,
            price_min: ob.price_min,
            price_max: ob.price_max,
            timeframe: ob.timeframe.clone(),
            origin_time: bos.time,
            direction: match break_direction {
                Direction::Long => ZoneDirection::Long,
                Direction::Short => ZoneDirection::Short,
            },
            role,
            strength: displacement_atr.clamp(0.1, 3.0),
            confidence: (0.5 + 0.1 * displacement_atr).clamp(0.2, 0.95),
            components: vec!["breaker".to_string(), ob.zone_id.clone()],
            zone_id: format!("brk_{}_{}", ob.zone_id, bos.time),
            entry_mode: ob.entry_mode,
            quality: ZoneQuality::Strong,
            reference_leg_id: ob.reference_leg_id.clone(),
            reference_event_id: Some(break_event_id.clone()),
            bias_at_creation: structure.bias.into(),
            meta: ZoneMeta {
                derived_from_ob_id: Some(ob.zone_id.clone()),
                sweep_source: Some(sweep.source.clone()),
                break_event_id: Some(break_event_id),
                displacement_atr: Some(displacement_atr),
                ..ZoneMeta::default()
            },
        });
    }

    breakers
}

fn breaker_role(bias: TradeBias, direction: Direction) -> Role {
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
