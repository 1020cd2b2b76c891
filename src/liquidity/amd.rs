// =============================================================================
// AMD phase — Accumulation / Manipulation / Distribution state machine
// =============================================================================
//
// Classification with a fixed priority (first match wins):
//
//   1. MANIPULATION  — active range deviating (DEV_UP/DEV_DOWN) with sweep
//                      signals (SFP events or wick clusters) near the
//                      extremes.
//   2. DISTRIBUTION  — no range deviation, a directional trend, a BOS
//                      aligned with the bias, and at least one PRIMARY
//                      TLQ/SLQ pool.
//   3. ACCUMULATION  — range INSIDE, calm ATR (last <= median * 1.25) and
//                      no BOS among the last three events.
//   4. NEUTRAL       — nothing matched.
//
// The reason string lands in `liquidity.meta.amd_reason`.

use tracing::debug;

use crate::types::{
    Direction, Role, SmcAmdPhase, SmcLiquidityState, SmcLiquidityType, SmcRangeState,
    SmcStructureState, SmcTrend, StructureEventType, StructureMeta, TradeBias,
};

const LOW_ATR_RATIO: f64 = 1.25;
const RECENT_EVENT_WINDOW: usize = 3;
const TREND_POOL_MIN: usize = 1;

/// Classify the AMD phase. Returns `(phase, reason)`.
pub fn derive_amd_phase(
    structure: &SmcStructureState,
    liquidity: &SmcLiquidityState,
) -> (SmcAmdPhase, String) {
    let decision = evaluate_manipulation(structure, liquidity)
        .or_else(|| evaluate_distribution(structure, liquidity))
        .or_else(|| evaluate_accumulation(structure));

    let (phase, reason) =
        decision.unwrap_or((SmcAmdPhase::Neutral, "fsm conditions not met".to_string()));
    debug!(phase = ?phase, reason = %reason, "AMD phase derived");
    (phase, reason)
}

fn evaluate_manipulation(
    structure: &SmcStructureState,
    liquidity: &SmcLiquidityState,
) -> Option<(SmcAmdPhase, String)> {
    structure.active_range.as_ref()?;
    if !matches!(
        structure.range_state,
        SmcRangeState::DevUp | SmcRangeState::DevDown
    ) {
        return None;
    }
    if !has_sweep_signals(liquidity) {
        return None;
    }
    Some((
        SmcAmdPhase::Manipulation,
        format!(
            "range deviation {} with sweep signals at the extremes",
            structure.range_state
        ),
    ))
}

fn evaluate_distribution(
    structure: &SmcStructureState,
    liquidity: &SmcLiquidityState,
) -> Option<(SmcAmdPhase, String)> {
    if structure.active_range.is_some() && structure.range_state != SmcRangeState::None {
        return None;
    }
    if !matches!(structure.trend, SmcTrend::Up | SmcTrend::Down) {
        return None;
    }
    if !has_trend_bos(structure) {
        return None;
    }
    if !trend_pools_dominate(liquidity, structure.bias) {
        return None;
    }
    Some((
        SmcAmdPhase::Distribution,
        format!(
            "trend {} with a BOS confirmed by trend-liquidity pools",
            structure.trend
        ),
    ))
}

fn evaluate_accumulation(structure: &SmcStructureState) -> Option<(SmcAmdPhase, String)> {
    structure.active_range.as_ref()?;
    if structure.range_state != SmcRangeState::Inside {
        return None;
    }
    if !is_atr_calm(&structure.meta) {
        return None;
    }
    if has_recent_bos(structure) {
        return None;
    }
    Some((
        SmcAmdPhase::Accumulation,
        "range INSIDE with calm ATR and no fresh BOS".to_string(),
    ))
}

fn has_sweep_signals(liquidity: &SmcLiquidityState) -> bool {
    !liquidity.meta.sfp_events.is_empty() || !liquidity.meta.wick_clusters.is_empty()
}

fn has_trend_bos(structure: &SmcStructureState) -> bool {
    let direction = match structure.bias {
        TradeBias::Long => Some(Direction::Long),
        TradeBias::Short => Some(Direction::Short),
        TradeBias::Neutral => match structure.trend {
            SmcTrend::Up => Some(Direction::Long),
            SmcTrend::Down => Some(Direction::Short),
            _ => None,
        },
    };
    let Some(direction) = direction else {
        return false;
    };

    structure
        .events
        .iter()
        .rev()
        .any(|e| e.event_type == StructureEventType::Bos && e.direction == direction)
}

fn trend_pools_dominate(liquidity: &SmcLiquidityState, bias: TradeBias) -> bool {
    let target_type = match bias {
        TradeBias::Long => SmcLiquidityType::Tlq,
        TradeBias::Short => SmcLiquidityType::Slq,
        TradeBias::Neutral => return false,
    };
    let count = liquidity
        .pools
        .iter()
        .filter(|p| p.liq_type == target_type && p.role == Role::Primary)
        .count();
    count >= TREND_POOL_MIN
}

fn is_atr_calm(meta: &StructureMeta) -> bool {
    let atr_last = match meta.atr_last {
        Some(v) => v,
        None => return false,
    };
    match meta.atr_median {
        None => true,
        Some(median) if median == 0.0 => true,
        Some(median) => atr_last <= median * LOW_ATR_RATIO,
    }
}

fn has_recent_bos(structure: &SmcStructureState) -> bool {
    structure
        .events
        .iter()
        .rev()
        .take(RECENT_EVENT_WINDOW)
        .any(|e| e.event_type == StructureEventType::Bos)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        LegLabel, LevelSide, LiquidityMeta, PoolMeta, SfpEvent, SmcLeg, SmcLiquidityPool,
        SmcRange, SmcStructureEvent, SmcSwing,
    };

    fn event(event_type: StructureEventType, direction: Direction) -> SmcStructureEvent {
        let swing = |idx: usize, price: f64, kind: LevelSide| SmcSwing {
            index: idx,
            time: idx as i64 * 300_000,
            price,
            kind,
            strength: 2,
        };
        SmcStructureEvent {
            event_type,
            direction,
            price_level: 100.0,
            time: 300_000,
            source_leg: SmcLeg {
                from_swing: swing(0, 99.0, LevelSide::Low),
                to_swing: swing(1, 100.0, LevelSide::High),
                label: LegLabel::Hh,
                reference_price: Some(99.0),
            },
        }
    }

    fn range(state: SmcRangeState) -> SmcRange {
        SmcRange {
            high: 110.0,
            low: 100.0,
            eq_level: 105.0,
            start_time: 0,
            end_time: Some(300_000),
            state,
        }
    }

    fn liquidity_with_sfp() -> SmcLiquidityState {
        SmcLiquidityState {
            meta: LiquidityMeta {
                sfp_events: vec![SfpEvent {
                    level: 110.0,
                    side: LevelSide::High,
                    time: 0,
                    close: 108.0,
                    source: "range".into(),
                }],
                ..LiquidityMeta::default()
            },
            ..SmcLiquidityState::default()
        }
    }

    #[test]
    fn manipulation_needs_deviation_and_sweeps() {
        let mut structure = SmcStructureState::default();
        structure.active_range = Some(range(SmcRangeState::DevUp));
        structure.range_state = SmcRangeState::DevUp;

        let (phase, reason) = derive_amd_phase(&structure, &liquidity_with_sfp());
        assert_eq!(phase, SmcAmdPhase::Manipulation);
        assert!(reason.contains("DEV_UP"));

        // Without sweeps the same geometry is not manipulation.
        let (phase, _) = derive_amd_phase(&structure, &SmcLiquidityState::default());
        assert_ne!(phase, SmcAmdPhase::Manipulation);
    }

    #[test]
    fn distribution_needs_trend_bos_and_trend_pool() {
        let mut structure = SmcStructureState::default();
        structure.trend = SmcTrend::Up;
        structure.bias = TradeBias::Long;
        structure
            .events
            .push(event(StructureEventType::Bos, Direction::Long));

        let mut liquidity = SmcLiquidityState::default();
        liquidity.pools.push(SmcLiquidityPool {
            level: 95.0,
            liq_type: SmcLiquidityType::Tlq,
            strength: 1.0,
            n_touches: 1,
            first_time: None,
            last_time: None,
            role: Role::Primary,
            source_swings: vec![],
            meta: PoolMeta::default(),
        });

        let (phase, reason) = derive_amd_phase(&structure, &liquidity);
        assert_eq!(phase, SmcAmdPhase::Distribution);
        assert!(reason.contains("UP"));

        // Drop the trend pool: falls through to NEUTRAL.
        liquidity.pools.clear();
        let (phase, _) = derive_amd_phase(&structure, &liquidity);
        assert_eq!(phase, SmcAmdPhase::Neutral);
    }

    #[test]
    fn accumulation_needs_inside_calm_and_no_fresh_bos() {
        let mut structure = SmcStructureState::default();
        structure.active_range = Some(range(SmcRangeState::Inside));
        structure.range_state = SmcRangeState::Inside;
        structure.meta.atr_last = Some(1.0);
        structure.meta.atr_median = Some(1.0);

        let (phase, _) = derive_amd_phase(&structure, &SmcLiquidityState::default());
        assert_eq!(phase, SmcAmdPhase::Accumulation);

        // A fresh BOS breaks accumulation.
        structure
            .events
            .push(event(StructureEventType::Bos, Direction::Long));
        let (phase, _) = derive_amd_phase(&structure, &SmcLiquidityState::default());
        assert_eq!(phase, SmcAmdPhase::Neutral);

        // Elevated ATR breaks accumulation too.
        structure.events.clear();
        structure.meta.atr_last = Some(2.0);
        let (phase, _) = derive_amd_phase(&structure, &SmcLiquidityState::default());
        assert_eq!(phase, SmcAmdPhase::Neutral);
    }

    #[test]
    fn manipulation_outranks_accumulation() {
        // Deviating range with sweeps AND calm ATR: priority picks
        // MANIPULATION.
        let mut structure = SmcStructureState::default();
        structure.active_range = Some(range(SmcRangeState::DevDown));
        structure.range_state = SmcRangeState::DevDown;
        structure.meta.atr_last = Some(1.0);
        structure.meta.atr_median = Some(1.0);

        let (phase, _) = derive_amd_phase(&structure, &liquidity_with_sfp());
        assert_eq!(phase, SmcAmdPhase::Manipulation);
    }
}
