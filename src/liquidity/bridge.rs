// =============================================================================
// Liquidity bridge — flat summary of liquidity features for downstream gates
// =============================================================================
//
// Pulls the key liquidity facts out of a finished hint into a flat record:
// whether PRIMARY magnets exist above/below, the relative distance to the
// nearest one, the AMD phase, and the nearest internal/external targets with
// why/confidence. When no target candidates exist the optional fallbacks
// (nearest PRIMARY magnet, session extremes) keep the UI supplied with an
// object — at confidence 0.1 and with an explicit reason.

use serde::{Deserialize, Serialize};

use crate::config::SmcConfig;
use crate::types::{
    LiquidityTarget, Role, SessionLevels, SmcHint, SmcLiquidityMagnet, TargetRole, TargetSide,
};

use super::targets::pick_nearest_target;

/// Flat bridge record. Field names are the wire keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiquidityBridgeHint {
    pub smc_liq_has_above: bool,
    pub smc_liq_has_below: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub smc_liq_dist_to_primary: Option<f64>,
    pub smc_liq_amd_phase: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub smc_liq_nearest_internal: Option<LiquidityTarget>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub smc_liq_nearest_external: Option<LiquidityTarget>,
    pub smc_liq_nearest_internal_why: Vec<String>,
    pub smc_liq_nearest_external_why: Vec<String>,
    pub smc_liq_nearest_internal_confidence: f64,
    pub smc_liq_nearest_external_confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub smc_liq_ref_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub smc_liq_primary_magnets: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub smc_liq_amd_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub smc_session_tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub smc_session_high: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub smc_session_low: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub smc_session_tf: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub smc_sessions: Option<std::collections::BTreeMap<String, SessionLevels>>,
}

/// Build the Stage2-facing bridge record from a finished hint.
pub fn build_liquidity_hint(hint: &SmcHint, cfg: &SmcConfig) -> LiquidityBridgeHint {
    let mut out = LiquidityBridgeHint {
        smc_liq_amd_phase: "NEUTRAL".to_string(),
        smc_liq_nearest_internal_why: vec!["not_computed".to_string()],
        smc_liq_nearest_external_why: vec!["not_computed".to_string()],
        ..LiquidityBridgeHint::default()
    };

    let liquidity = match &hint.liquidity {
        Some(liquidity) => liquidity,
        None => return out,
    };

    if let Some(phase) = liquidity.amd_phase {
        out.smc_liq_amd_phase = serde_json::to_value(phase)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "NEUTRAL".to_string());
    }
    out.smc_liq_amd_reason = liquidity.meta.amd_reason.clone();

    // Session context pass-through.
    out.smc_session_tag = hint.meta.smc_session_tag.clone();
    out.smc_session_high = hint.meta.smc_session_high;
    out.smc_session_low = hint.meta.smc_session_low;
    out.smc_session_tf = hint.meta.smc_session_tf.clone();
    out.smc_sessions = hint.meta.smc_sessions.clone();

    let price = hint.meta.last_price;
    let primary_magnets: Vec<&SmcLiquidityMagnet> = liquidity
        .magnets
        .iter()
        .filter(|m| m.role == Role::Primary)
        .collect();

    if !primary_magnets.is_empty() {
        out.smc_liq_primary_magnets = Some(primary_magnets.len());
    }

    let price = match price {
        Some(p) if p != 0.0 => p,
        _ => {
            out.smc_liq_nearest_internal_why = vec!["no_ref_price".to_string()];
            out.smc_liq_nearest_external_why = vec!["no_ref_price".to_string()];
            return out;
        }
    };
    out.smc_liq_ref_price = Some(price);

    out.smc_liq_has_above = primary_magnets.iter().any(|m| m.center > price);
    out.smc_liq_has_below = primary_magnets.iter().any(|m| m.center < price);
    out.smc_liq_dist_to_primary = nearest_relative_distance(&primary_magnets, price);

    let targets = liquidity.meta.liquidity_targets.as_deref().unwrap_or(&[]);
    if !targets.is_empty() {
        match pick_nearest_target(targets, TargetRole::Internal, price) {
            Some(target) => {
                out.smc_liq_nearest_internal = Some(target.clone());
                out.smc_liq_nearest_internal_why = vec!["from:liquidity_targets".to_string()];
                out.smc_liq_nearest_internal_confidence = 1.0;
            }
            None => {
                out.smc_liq_nearest_internal_why = vec!["no_candidates_internal".to_string()];
            }
        }
        match pick_nearest_target(targets, TargetRole::External, price) {
            Some(target) => {
                out.smc_liq_nearest_external = Some(target.clone());
                out.smc_liq_nearest_external_why = vec!["from:liquidity_targets".to_string()];
                out.smc_liq_nearest_external_confidence = 1.0;
            }
            None => {
                out.smc_liq_nearest_external_why = vec!["no_candidates_external".to_string()];
            }
        }
    } else {
        out.smc_liq_nearest_internal_why = vec!["no_candidates_internal".to_string()];
        out.smc_liq_nearest_external_why = vec!["no_candidates_external".to_string()];
    }

    if cfg.liquidity_nearest_fallback_enabled {
        if out.smc_liq_nearest_internal.is_none() {
            if let Some(fallback) = fallback_internal_from_primary_magnets(
                &primary_magnets,
                price,
                &liquidity.meta.primary_tf,
            ) {
                out.smc_liq_nearest_internal = Some(fallback);
                out.smc_liq_nearest_internal_why =
                    vec!["fallback:nearest_primary_magnet".to_string()];
                out.smc_liq_nearest_internal_confidence = 0.1;
            }
        }
        if out.smc_liq_nearest_external.is_none() {
            if let Some(fallback) =
                fallback_external_from_sessions(hint.meta.smc_sessions.as_ref(), price)
            {
                out.smc_liq_nearest_external = Some(fallback);
                out.smc_liq_nearest_external_why =
                    vec!["fallback:smc_sessions_extreme".to_string()];
                out.smc_liq_nearest_external_confidence = 0.1;
            }
        }
    }

    out
}

fn nearest_relative_distance(magnets: &[&SmcLiquidityMagnet], price: f64) -> Option<f64> {
    if magnets.is_empty() || price == 0.0 {
        return None;
    }
    let nearest = magnets
        .iter()
        .map(|m| (m.center - price).abs())
        .min_by(f64::total_cmp)?;
    Some(((nearest / price.abs()) * 1e6).round() / 1e6)
}

fn fallback_internal_from_primary_magnets(
    magnets: &[&SmcLiquidityMagnet],
    ref_price: f64,
    tf: &str,
) -> Option<LiquidityTarget> {
    let best = magnets
        .iter()
        .min_by(|a, b| (a.center - ref_price).abs().total_cmp(&(b.center - ref_price).abs()))?;
    Some(LiquidityTarget {
        role: TargetRole::Internal,
        tf: tf.to_string(),
        side: if best.center >= ref_price {
            TargetSide::Above
        } else {
            TargetSide::Below
        },
        price: best.center,
        kind: "MAGNET_PRIMARY".to_string(),
        strength: 0.0,
        reason: vec!["fallback".to_string()],
    })
}

fn fallback_external_from_sessions(
    sessions: Option<&std::collections::BTreeMap<String, SessionLevels>>,
    ref_price: f64,
) -> Option<LiquidityTarget> {
    let sessions = sessions?;
    let mut best: Option<(f64, LiquidityTarget)> = None;
    for (tag, payload) in sessions {
        for (kind, value) in [
            ("SESSION_HIGH", payload.high),
            ("SESSION_LOW", payload.low),
        ] {
            let price = match value {
                Some(v) if v.is_finite() => v,
                _ => continue,
            };
            let dist = (price - ref_price).abs();
            let candidate = LiquidityTarget {
                role: TargetRole::External,
                tf: payload.tf.clone().unwrap_or_default(),
                side: if price >= ref_price {
                    TargetSide::Above
                } else {
                    TargetSide::Below
                },
                price,
                kind: kind.to_string(),
                strength: 0.0,
                reason: vec![format!("fallback:{tag}")],
            };
            if best.as_ref().map_or(true, |(d, _)| dist < *d) {
                best = Some((dist, candidate));
            }
        }
    }
    best.map(|(_, t)| t)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        HintMeta, LiquidityMeta, MagnetMeta, SmcAmdPhase, SmcLiquidityState, TradeBias,
    };

    fn magnet(center: f64, role: Role) -> SmcLiquidityMagnet {
        SmcLiquidityMagnet {
            price_min: center - 0.1,
            price_max: center + 0.1,
            center,
            liq_type: crate::types::SmcLiquidityType::Eqh,
            role,
            pools: vec![],
            meta: MagnetMeta {
                pool_count: 0,
                source_types: vec![],
                symbol: "X".into(),
                bias: TradeBias::Neutral,
            },
        }
    }

    fn hint_with(magnets: Vec<SmcLiquidityMagnet>, last_price: Option<f64>) -> SmcHint {
        SmcHint {
            liquidity: Some(SmcLiquidityState {
                magnets,
                amd_phase: Some(SmcAmdPhase::Manipulation),
                meta: LiquidityMeta {
                    primary_tf: "5m".into(),
                    amd_reason: Some("range deviation".into()),
                    ..LiquidityMeta::default()
                },
                ..SmcLiquidityState::default()
            }),
            meta: HintMeta {
                snapshot_tf: "5m".into(),
                last_price,
                ..HintMeta::default()
            },
            ..SmcHint::default()
        }
    }

    #[test]
    fn empty_hint_defaults() {
        let bridge = build_liquidity_hint(&SmcHint::default(), &SmcConfig::default());
        assert_eq!(bridge.smc_liq_amd_phase, "NEUTRAL");
        assert_eq!(
            bridge.smc_liq_nearest_internal_why,
            vec!["not_computed".to_string()]
        );
        assert!(!bridge.smc_liq_has_above);
    }

    #[test]
    fn primary_magnets_drive_above_below_flags() {
        let hint = hint_with(
            vec![
                magnet(110.0, Role::Primary),
                magnet(95.0, Role::Primary),
                magnet(200.0, Role::Neutral),
            ],
            Some(100.0),
        );
        let bridge = build_liquidity_hint(&hint, &SmcConfig::default());
        assert!(bridge.smc_liq_has_above);
        assert!(bridge.smc_liq_has_below);
        assert_eq!(bridge.smc_liq_primary_magnets, Some(2));
        // Nearest primary is 95 ⇒ dist = 5 / 100 = 0.05.
        assert!((bridge.smc_liq_dist_to_primary.unwrap() - 0.05).abs() < 1e-9);
        assert_eq!(bridge.smc_liq_amd_phase, "MANIPULATION");
    }

    #[test]
    fn fallback_internal_fires_with_low_confidence() {
        let hint = hint_with(vec![magnet(101.0, Role::Primary)], Some(100.0));
        let bridge = build_liquidity_hint(&hint, &SmcConfig::default());
        let nearest = bridge.smc_liq_nearest_internal.expect("fallback target");
        assert_eq!(nearest.kind, "MAGNET_PRIMARY");
        assert!((bridge.smc_liq_nearest_internal_confidence - 0.1).abs() < 1e-9);
        assert_eq!(
            bridge.smc_liq_nearest_internal_why,
            vec!["fallback:nearest_primary_magnet".to_string()]
        );
    }

    #[test]
    fn fallback_disabled_by_config() {
        let mut cfg = SmcConfig::default();
        cfg.liquidity_nearest_fallback_enabled = false;
        let hint = hint_with(vec![magnet(101.0, Role::Primary)], Some(100.0));
        let bridge = build_liquidity_hint(&hint, &cfg);
        assert!(bridge.smc_liq_nearest_internal.is_none());
        assert_eq!(
            bridge.smc_liq_nearest_internal_why,
            vec!["no_candidates_internal".to_string()]
        );
    }

    #[test]
    fn no_price_sets_reason() {
        let hint = hint_with(vec![magnet(101.0, Role::Primary)], None);
        let bridge = build_liquidity_hint(&hint, &SmcConfig::default());
        assert_eq!(
            bridge.smc_liq_nearest_internal_why,
            vec!["no_ref_price".to_string()]
        );
        assert!(bridge.smc_liq_ref_price.is_none());
    }

    #[test]
    fn targets_take_priority_over_fallback() {
        let mut hint = hint_with(vec![magnet(101.0, Role::Primary)], Some(100.0));
        if let Some(liquidity) = hint.liquidity.as_mut() {
            liquidity.meta.liquidity_targets = Some(vec![LiquidityTarget {
                role: TargetRole::Internal,
                tf: "5m".into(),
                side: TargetSide::Above,
                price: 100.4,
                kind: "EQH".into(),
                strength: 80.0,
                reason: vec!["source:magnet".into()],
            }]);
        }
        let bridge = build_liquidity_hint(&hint, &SmcConfig::default());
        let nearest = bridge.smc_liq_nearest_internal.unwrap();
        assert!((nearest.price - 100.4).abs() < 1e-9);
        assert!((bridge.smc_liq_nearest_internal_confidence - 1.0).abs() < 1e-9);
    }
}
