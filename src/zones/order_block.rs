// =============================================================================
// Order Block detection — last opposite candle before an impulsive leg
// =============================================================================
//
// For each leg aligned with its direction the detector searches a short
// prelude window before the impulse for the last opposite-color candle
// (falling back to the extremum bar). Legs must clear the amplitude filter
// (ob_leg_min_atr_mul * ATR) and stay within ob_leg_max_bars. The candle's
// body share picks the entry mode: dominant bodies are BODY_05, thin bodies
// BODY_TOUCH, the rest stay wick-based.

use crate::config::SmcConfig;
use crate::market_data::Bar;
use crate::types::{
    BiasAtCreation, Direction, EntryMode, LegLabel, Role, SmcInput, SmcLeg, SmcStructureEvent,
    SmcStructureState, SmcZone, SmcZoneType, StructureEventType, TradeBias, ZoneDirection,
    ZoneMeta, ZoneQuality,
};

/// Detect order blocks from the structure's legs over the primary frame.
pub fn detect_order_blocks(
    snapshot: &SmcInput,
    structure: &SmcStructureState,
    cfg: &SmcConfig,
) -> Vec<SmcZone> {
    if structure.legs.is_empty() {
        return Vec::new();
    }
    let frame = match snapshot.primary_frame() {
        Some(frame) if !frame.is_empty() => frame,
        _ => return Vec::new(),
    };
    let bars = frame.bars();

    let atr = structure
        .meta
        .atr_last
        .or(structure.meta.atr_median)
        .unwrap_or(0.0);
    let bias = structure.bias;
    let mut zones = Vec::new();

    for leg in &structure.legs {
        let direction = match leg_direction(leg) {
            Some(direction) => direction,
            None => continue,
        };

        let start_pos = leg.from_swing.index.min(leg.to_swing.index);
        let end_pos = leg.from_swing.index.max(leg.to_swing.index);
        if end_pos <= start_pos || end_pos >= bars.len() {
            continue;
        }
        let bar_count = end_pos - start_pos + 1;
        if bar_count > cfg.ob_leg_max_bars {
            continue;
        }

        let amplitude = leg.amplitude();
        if atr > 0.0 && amplitude < cfg.ob_leg_min_atr_mul * atr {
            continue;
        }

        let candidate_pos = match find_ob_candidate(bars, start_pos, direction, cfg) {
            Some(pos) => pos,
            None => continue,
        };

        let bos_event = leg_bos_event(&structure.events, leg, direction);
        if let Some(zone) = build_zone_from_bar(
            snapshot,
            bars,
            candidate_pos,
            direction,
            leg,
            bias,
            atr,
            amplitude,
            bar_count,
            bos_event,
            cfg,
        ) {
            zones.push(zone);
        }
    }

    zones
}

fn leg_direction(leg: &SmcLeg) -> Option<Direction> {
    match leg.label {
        LegLabel::Hh | LegLabel::Hl => Some(Direction::Long),
        LegLabel::Lh | LegLabel::Ll => Some(Direction::Short),
        LegLabel::Undefined => None,
    }
}

/// Last opposite-color candle in the prelude window, else the extremum bar.
fn find_ob_candidate(
    bars: &[Bar],
    start_pos: usize,
    direction: Direction,
    cfg: &SmcConfig,
) -> Option<usize> {
    let pre_start = start_pos.saturating_sub(cfg.ob_prelude_max_bars);
    let window = &bars[pre_start..=start_pos.min(bars.len() - 1)];
    if window.is_empty() {
        return None;
    }

    let is_opposite = |bar: &Bar| match direction {
        Direction::Long => bar.close < bar.open,
        Direction::Short => bar.close > bar.open,
    };

    for (rel, bar) in window.iter().enumerate().rev() {
        if is_opposite(bar) {
            return Some(pre_start + rel);
        }
    }

    // Fallback: the most extreme candle in the window.
    let rel = match direction {
        Direction::Long => window
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.low.total_cmp(&b.1.low))
            .map(|(i, _)| i)?,
        Direction::Short => window
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.high.total_cmp(&b.1.high))
            .map(|(i, _)| i)?,
    };
    Some(pre_start + rel)
}

fn leg_bos_event<'a>(
    events: &'a [SmcStructureEvent],
    leg: &SmcLeg,
    direction: Direction,
) -> Option<&'a SmcStructureEvent> {
    let target = leg_signature(leg);
    events.iter().find(|event| {
        event.event_type == StructureEventType::Bos
            && event.direction == direction
            && leg_signature(&event.source_leg) == target
    })
}

fn leg_signature(leg: &SmcLeg) -> (usize, usize, LegLabel) {
    (leg.from_swing.index, leg.to_swing.index, leg.label)
}

#[allow(clippy::too_many_arguments)]
fn build_zone_from_bar(
    snapshot: &SmcInput,
    bars: &[Bar],
    row_pos: usize,
    direction: Direction,
    leg: &SmcLeg,
    bias: TradeBias,
    atr: f64,
    amplitude: f64,
    bar_count: usize,
    bos_event: Option<&SmcStructureEvent>,
    cfg: &SmcConfig,
) -> Option<SmcZone> {
    let bar = bars.get(row_pos)?;
    let full_range = bar.full_range().max(1e-9);
    let body_high = bar.body_high();
    let body_low = bar.body_low();
    let body_pct = (body_high - body_low) / full_range;
    let wick_top_pct = (bar.high - body_high) / full_range;
    let wick_bottom_pct = (body_low - bar.low) / full_range;

    let (zone_low, zone_high, entry_mode) = if body_pct >= cfg.ob_body_domination_pct {
        (body_low, body_high, EntryMode::Body05)
    } else if body_pct <= cfg.ob_body_min_pct {
        (body_low, body_high, EntryMode::BodyTouch)
    } else if direction == Direction::Short {
        (bar.low, bar.high, EntryMode::WickTouch)
    } else {
        (bar.low, bar.high, EntryMode::Wick05)
    };

    let has_bos = bos_event.is_some();
    let strength = if atr > 0.0 {
        (amplitude / atr.max(1e-9)).clamp(0.1, 3.0)
    } else {
        (body_pct * 2.0).clamp(0.1, 3.0)
    };
    let mut confidence = 0.45 + 0.25 * body_pct.min(1.0);
    if has_bos {
        confidence += 0.15;
    }
    let confidence = confidence.clamp(0.2, 0.95);

    let quality = if has_bos {
        ZoneQuality::Strong
    } else {
        ZoneQuality::Weak
    };
    let role = derive_role(direction, bias, has_bos);
    let leg_id = leg.leg_id();
    let zone_id = format!(
        "ob_{}_{}_{}_{}",
        snapshot.symbol.to_lowercase(),
        snapshot.tf_primary,
        row_pos,
        leg.to_swing.index
    );
    let reference_event_id = bos_event.map(|event| format!("bos_{}", event.time));

    Some(SmcZone {
        zone_type: SmcZoneType::OrderBlock,
        price_min: zone_low.min(zone_high),
        price_max: zone_low.max(zone_high),
        timeframe: snapshot.tf_primary.clone(),
        origin_time: bar.open_time,
        direction: match direction {
            Direction::Long => ZoneDirection::Long,
            Direction::Short => ZoneDirection::Short,
        },
        role,
        strength,
        confidence,
        components: vec!["orderblock".to_string(), leg_id.clone()],
        zone_id,
        entry_mode,
        quality,
        reference_leg_id: Some(leg_id),
        reference_event_id,
        bias_at_creation: bias.into(),
        meta: ZoneMeta {
            body_pct: Some(body_pct),
            wick_top_pct: Some(wick_top_pct),
            wick_bottom_pct: Some(wick_bottom_pct),
            has_bos: Some(has_bos),
            bar_count: Some(bar_count),
            amplitude: Some(amplitude),
            ..ZoneMeta::default()
        },
    })
}

fn derive_role(direction: Direction, bias: TradeBias, has_bos: bool) -> Role {
    if !has_bos {
        return Role::Neutral;
    }
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

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::Frame;
    use crate::types::{LevelSide, SmcSwing, StructureMeta};
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

    fn swing(index: usize, price: f64, kind: LevelSide) -> SmcSwing {
        SmcSwing {
            index,
            time: index as i64 * 300_000,
            price,
            kind,
            strength: 2,
        }
    }

    /// Bearish prelude candle at index 1, then an impulsive rally to 106.
    fn bullish_fixture() -> (SmcInput, SmcStructureState) {
        let bars = vec![
            bar(0, 100.0, 100.6, 99.6, 100.4),
            bar(1, 100.4, 100.8, 99.8, 100.0), // opposite (bearish) candle
            bar(2, 100.0, 102.0, 99.9, 101.8),
            bar(3, 101.8, 104.0, 101.5, 103.8),
            bar(4, 103.8, 106.0, 103.5, 105.8),
            bar(5, 105.8, 106.2, 105.0, 105.5),
        ];
        let mut ohlc = BTreeMap::new();
        ohlc.insert("5m".to_string(), Frame::from_bars(bars));
        let snapshot = SmcInput {
            symbol: "XAUUSD".into(),
            tf_primary: "5m".into(),
            ohlc_by_tf: ohlc,
            context: Default::default(),
        };

        let from = swing(1, 99.8, LevelSide::Low);
        let to = swing(4, 106.0, LevelSide::High);
        let leg = SmcLeg {
            from_swing: from,
            to_swing: to,
            label: LegLabel::Hh,
            reference_price: Some(100.0),
        };
        let structure = SmcStructureState {
            primary_tf: "5m".into(),
            swings: vec![from, to],
            legs: vec![leg],
            bias: TradeBias::Long,
            meta: StructureMeta {
                atr_last: Some(1.0),
                ..StructureMeta::default()
            },
            ..SmcStructureState::default()
        };
        (snapshot, structure)
    }

    #[test]
    fn detects_ob_from_opposite_candle() {
        let (snapshot, structure) = bullish_fixture();
        let zones = detect_order_blocks(&snapshot, &structure, &SmcConfig::default());
        assert_eq!(zones.len(), 1);
        let zone = &zones[0];
        assert_eq!(zone.zone_type, SmcZoneType::OrderBlock);
        assert_eq!(zone.direction, ZoneDirection::Long);
        // The bearish candle at index 1 is the candidate.
        assert_eq!(zone.origin_time, 300_000);
        assert!(zone.zone_id.starts_with("ob_xauusd_5m_1_"));
        assert_eq!(zone.meta.has_bos, Some(false));
        // No BOS ⇒ NEUTRAL role and WEAK quality.
        assert_eq!(zone.role, Role::Neutral);
        assert_eq!(zone.quality, ZoneQuality::Weak);
        assert_eq!(zone.bias_at_creation, BiasAtCreation::Long);
    }

    #[test]
    fn bos_upgrades_role_and_quality() {
        let (snapshot, mut structure) = bullish_fixture();
        let leg = structure.legs[0].clone();
        structure.events.push(SmcStructureEvent {
            event_type: StructureEventType::Bos,
            direction: Direction::Long,
            price_level: leg.to_swing.price,
            time: leg.to_swing.time,
            source_leg: leg,
        });
        let zones = detect_order_blocks(&snapshot, &structure, &SmcConfig::default());
        assert_eq!(zones.len(), 1);
        let zone = &zones[0];
        assert_eq!(zone.role, Role::Primary);
        assert_eq!(zone.quality, ZoneQuality::Strong);
        assert!(zone.reference_event_id.as_deref().unwrap().starts_with("bos_"));
        assert!(zone.confidence > 0.6);
    }

    #[test]
    fn amplitude_filter_blocks_small_legs() {
        let (snapshot, mut structure) = bullish_fixture();
        // Raise ATR so the 6.2 amplitude is below 0.8 * ATR.
        structure.meta.atr_last = Some(10.0);
        let zones = detect_order_blocks(&snapshot, &structure, &SmcConfig::default());
        assert!(zones.is_empty());
    }

    #[test]
    fn leg_length_filter_blocks_long_legs() {
        let (snapshot, structure) = bullish_fixture();
        let mut cfg = SmcConfig::default();
        cfg.ob_leg_max_bars = 2; // leg spans 4 bars
        let zones = detect_order_blocks(&snapshot, &structure, &cfg);
        assert!(zones.is_empty());
    }

    #[test]
    fn entry_mode_from_body_share() {
        let (snapshot, structure) = bullish_fixture();
        // Candle 1: body 0.4, range 1.0 ⇒ 40% body: wick-family for LONG.
        let zones = detect_order_blocks(&snapshot, &structure, &SmcConfig::default());
        assert_eq!(zones[0].entry_mode, EntryMode::Wick05);
        // Full range is the zone for wick modes.
        assert!((zones[0].price_min - 99.8).abs() < 1e-9);
        assert!((zones[0].price_max - 100.8).abs() < 1e-9);
    }

    #[test]
    fn no_legs_or_empty_frame_is_quiet() {
        let (snapshot, _) = bullish_fixture();
        let zones =
            detect_order_blocks(&snapshot, &SmcStructureState::default(), &SmcConfig::default());
        assert!(zones.is_empty());
    }
}
