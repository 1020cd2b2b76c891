// =============================================================================
// Leg building, trend inference and BOS/CHOCH detection
// =============================================================================
//
// Legs connect consecutive swings and are labeled against the price of the
// last same-kind extremum (HH/LH for HIGH targets, HL/LL for LOW targets,
// UNDEFINED when no reference exists yet). A leg produces a structure event
// when the close at its target swing clears the reference by at least
// max(ATR * k_atr, |close| * k_pct); a rolling structural bias decides
// whether that break is a BOS or the first break against the previous bias
// (CHOCH).

use tracing::debug;

use crate::config::SmcConfig;
use crate::market_data::Bar;
use crate::types::{
    Direction, LegLabel, LevelSide, SmcLeg, SmcStructureEvent, SmcSwing, SmcTrend,
    StructureEventType,
};

/// Turn a swing sequence into labeled legs.
pub fn build_legs(swings: &[SmcSwing]) -> Vec<SmcLeg> {
    if swings.len() < 2 {
        return Vec::new();
    }

    let mut legs = Vec::with_capacity(swings.len() - 1);
    let mut last_high: Option<f64> = None;
    let mut last_low: Option<f64> = None;

    let first = &swings[0];
    match first.kind {
        LevelSide::High => last_high = Some(first.price),
        LevelSide::Low => last_low = Some(first.price),
    }

    for pair in swings.windows(2) {
        let (prev, curr) = (&pair[0], &pair[1]);
        match prev.kind {
            LevelSide::High => last_high = Some(prev.price),
            LevelSide::Low => last_low = Some(prev.price),
        }

        let reference = match curr.kind {
            LevelSide::High => last_high,
            LevelSide::Low => last_low,
        };
        let label = match (curr.kind, reference) {
            (_, None) => LegLabel::Undefined,
            (LevelSide::High, Some(r)) if curr.price > r => LegLabel::Hh,
            (LevelSide::High, Some(_)) => LegLabel::Lh,
            (LevelSide::Low, Some(r)) if curr.price > r => LegLabel::Hl,
            (LevelSide::Low, Some(_)) => LegLabel::Ll,
        };
        match curr.kind {
            LevelSide::High => last_high = Some(curr.price),
            LevelSide::Low => last_low = Some(curr.price),
        }

        legs.push(SmcLeg {
            from_swing: *prev,
            to_swing: *curr,
            label,
            reference_price: reference,
        });
    }

    legs
}

/// Trend from the most recent HIGH-target and LOW-target leg labels.
pub fn infer_trend(legs: &[SmcLeg]) -> SmcTrend {
    let last_high_label = last_label_for_kind(legs, LevelSide::High);
    let last_low_label = last_label_for_kind(legs, LevelSide::Low);

    match (last_high_label, last_low_label) {
        (Some(LegLabel::Hh), Some(LegLabel::Hl)) => SmcTrend::Up,
        (Some(LegLabel::Lh), Some(LegLabel::Ll)) => SmcTrend::Down,
        (None, None) => SmcTrend::Unknown,
        _ => SmcTrend::Range,
    }
}

/// BOS/CHOCH events from labeled legs, gated by the break threshold.
pub fn detect_events(
    legs: &[SmcLeg],
    bars: &[Bar],
    atr: &[Option<f64>],
    cfg: &SmcConfig,
) -> Vec<SmcStructureEvent> {
    let mut events = Vec::new();
    let mut structural_bias = SmcTrend::Unknown;

    debug!(
        legs = legs.len(),
        bos_min_move_atr = cfg.bos_min_move_atr,
        bos_min_move_pct = cfg.bos_min_move_pct,
        "BOS/CHOCH scan started"
    );

    for leg in legs {
        if leg.label == LegLabel::Undefined {
            continue;
        }
        let close = match bars.get(leg.to_swing.index) {
            Some(bar) => bar.close,
            None => continue,
        };
        let reference = match leg.reference_price {
            Some(r) => r,
            None => continue,
        };
        let atr_value = atr.get(leg.to_swing.index).copied().flatten();
        if !passes_break_threshold(close, reference, atr_value, cfg) {
            continue;
        }

        let decision = match leg.label {
            LegLabel::Hh => {
                let event = if structural_bias == SmcTrend::Down {
                    (StructureEventType::Choch, Direction::Long)
                } else {
                    (StructureEventType::Bos, Direction::Long)
                };
                structural_bias = SmcTrend::Up;
                Some(event)
            }
            LegLabel::Ll => {
                let event = if structural_bias == SmcTrend::Up {
                    (StructureEventType::Choch, Direction::Short)
                } else {
                    (StructureEventType::Bos, Direction::Short)
                };
                structural_bias = SmcTrend::Down;
                Some(event)
            }
            LegLabel::Lh if structural_bias == SmcTrend::Down => {
                Some((StructureEventType::Bos, Direction::Short))
            }
            LegLabel::Hl if structural_bias == SmcTrend::Up => {
                Some((StructureEventType::Bos, Direction::Long))
            }
            _ => None,
        };

        if let Some((event_type, direction)) = decision {
            events.push(SmcStructureEvent {
                event_type,
                direction,
                price_level: leg.to_swing.price,
                time: leg.to_swing.time,
                source_leg: leg.clone(),
            });
        }
    }

    debug!(events_total = events.len(), "BOS/CHOCH scan finished");
    events
}

fn last_label_for_kind(legs: &[SmcLeg], kind: LevelSide) -> Option<LegLabel> {
    legs.iter()
        .rev()
        .find(|leg| leg.to_swing.kind == kind)
        .map(|leg| leg.label)
}

fn passes_break_threshold(
    close: f64,
    reference: f64,
    atr_value: Option<f64>,
    cfg: &SmcConfig,
) -> bool {
    let delta = (close - reference).abs();
    let atr_component = atr_value.map_or(0.0, |atr| atr * cfg.bos_min_move_atr);
    let pct_component = close.abs() * cfg.bos_min_move_pct;
    delta >= atr_component.max(pct_component)
}
