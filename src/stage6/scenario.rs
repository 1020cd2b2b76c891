// =============================================================================
// Stage6 scenario classifier — continuation-short (4_2) vs break&hold (4_3)
// =============================================================================
//
// Gates first (each failure is an honest UNCLEAR with a reason tag), then a
// deterministic weighted score over HTF bias, premium/discount, sweep,
// post-sweep structure truth, the mutually exclusive hold switch, and
// nearby targets/POI. The hold/failed-hold switch is anchored to one
// canonical level — the 5m range high — so the invalidation level cannot
// drift between snapshots.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::indicators::atr_series;
use crate::market_data::{Bar, Frame};
use crate::types::{
    Direction, SmcInput, SmcLiquidityPool, SmcLiquidityState, SmcStructureEvent,
    SmcStructureState, SmcZonesState, StructureEventType, TradeBias, ZoneDirection,
};

// ── HTF-Lite defaults ──────────────────────────────────────────────────────

pub const HTF_LITE_ATR_PERIOD: usize = 14;
pub const HTF_LITE_MIN_BARS: usize = HTF_LITE_ATR_PERIOD + 2; // 16
pub const HTF_LITE_DR_LOOKBACK_1H: usize = 48; // ~2 days
pub const HTF_LITE_DR_LOOKBACK_4H: usize = 30; // ~5 days

// ── Hold switch ────────────────────────────────────────────────────────────

pub const HOLD_BARS: usize = 3; // 5m closes
pub const HOLD_EPS_ATR: f64 = 0.05;
pub const HOLD_EPS_ATR_HTF: f64 = 0.03;

const W_HOLD: f64 = 3.2;
const W_HOLD_PENALTY: f64 = 2.4;
const W_FAIL_HOLD: f64 = 2.8;
const W_FAIL_HOLD_PENALTY: f64 = 2.2;

const MIN_SCORE: f64 = 2.1;
const SCORE_DELTA: f64 = 0.65;

/// Scenario tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScenarioId {
    #[serde(rename = "4_2")]
    FourTwo,
    #[serde(rename = "4_3")]
    FourThree,
    #[serde(rename = "UNCLEAR")]
    Unclear,
}

impl ScenarioId {
    pub fn name(&self) -> &'static str {
        match self {
            Self::FourTwo => "4_2",
            Self::FourThree => "4_3",
            Self::Unclear => "UNCLEAR",
        }
    }
}

/// Direction attached to the scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScenarioDirection {
    Long,
    Short,
    Neutral,
}

impl ScenarioDirection {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Long => "LONG",
            Self::Short => "SHORT",
            Self::Neutral => "NEUTRAL",
        }
    }
}

/// HTF bias as Stage6 sees it (context or fallback inference).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HtfBias {
    Long,
    Short,
    Mixed,
    Neutral,
    Unknown,
}

impl HtfBias {
    fn name(&self) -> &'static str {
        match self {
            Self::Long => "LONG",
            Self::Short => "SHORT",
            Self::Mixed => "MIXED",
            Self::Neutral => "NEUTRAL",
            Self::Unknown => "UNKNOWN",
        }
    }
}

// =============================================================================
// Output shapes
// =============================================================================

/// Nested `smc` payload for the UI map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SmcView {
    pub htf: HtfView,
    pub structure_5m: Structure5mView,
    pub facts: FactsView,
    pub poi_active: Vec<PoiNearItem>,
    pub targets_near: Vec<TargetNearItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HtfView {
    pub ready: bool,
    pub bars_1h: usize,
    pub bars_4h: usize,
    pub min_bars: usize,
    pub dr_high: Option<f64>,
    pub dr_low: Option<f64>,
    pub dr_mid: Option<f64>,
    pub pd: Option<String>,
    pub atr14: Option<f64>,
    pub magnets: Vec<HtfMagnetItem>,
    pub bias: Option<String>,
    pub bias_src: Option<String>,
    pub bias_raw: Option<String>,
    pub bias_raw_src: Option<String>,
    pub dr_tf: Option<String>,
    pub atr_tf: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Structure5mView {
    pub range_high: Option<f64>,
    pub range_low: Option<f64>,
    pub range_mid: Option<f64>,
    pub bias_5m: Option<String>,
    pub last_event: Option<LastEventView>,
    pub events_after_sweep: EventsAfterSweepView,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastEventView {
    pub kind: String,
    #[serde(with = "crate::serialize::ts_ms_opt", default)]
    pub ts: Option<i64>,
    pub price_level: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventsAfterSweepView {
    pub truth: String,
    #[serde(with = "crate::serialize::ts_ms_opt", default)]
    pub ts: Option<i64>,
}

impl Default for EventsAfterSweepView {
    fn default() -> Self {
        Self {
            truth: "NONE".to_string(),
            ts: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FactsView {
    pub sweep: Option<SweepFact>,
    pub hold: HoldFact,
    pub failed_hold: FailedHoldFact,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepFact {
    pub side: String,
    pub level: f64,
    pub pool_type: String,
    #[serde(with = "crate::serialize::ts_ms_opt", default)]
    pub ts: Option<i64>,
    pub age_bars: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldFact {
    pub level_up: Option<f64>,
    pub k: usize,
    pub ok: bool,
}

impl Default for HoldFact {
    fn default() -> Self {
        Self {
            level_up: None,
            k: HOLD_BARS,
            ok: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FailedHoldFact {
    pub level_up: Option<f64>,
    pub ok: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HtfMagnetItem {
    pub name: String,
    pub level: f64,
    pub src: String,
    pub strength: Option<f64>,
    pub dist_atr: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetNearItem {
    pub tf: String,
    pub role: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub level: f64,
    pub strength: Option<f64>,
    pub dist_atr: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoiNearItem {
    pub side: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub tf: String,
    pub score: f64,
    pub filled_pct: Option<f64>,
    pub dist_atr: f64,
    pub why: String,
}

/// Key levels published alongside the decision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyLevels {
    pub smc: SmcView,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub htf_atr14: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub htf_dr_high: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub htf_dr_low: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub htf_dr_mid: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub range_high: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub range_low: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub range_eq: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub swept_level: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub hold_level_up: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub hold_level_dn: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScorePair {
    #[serde(rename = "4_2")]
    pub s42: f64,
    #[serde(rename = "4_3")]
    pub s43: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepTelemetry {
    pub side: String,
    pub level: f64,
    pub pool_type: String,
    #[serde(with = "crate::serialize::ts_ms_opt", default)]
    pub time: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventsAfterSweepFlags {
    pub truth: String,
    #[serde(with = "crate::serialize::ts_ms_opt", default)]
    pub ts: Option<i64>,
    pub bos_down: bool,
    pub bos_up: bool,
    pub choch_up: bool,
    pub choch_down: bool,
    pub chop: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HoldTelemetry {
    pub k: usize,
    pub eps_atr: f64,
    pub eps: f64,
    pub atr_ref: f64,
    pub atr_ref_src: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LevelSrc {
    pub level: f64,
    pub src: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BreakHoldTelemetry {
    pub ok: bool,
    pub retest_hold: bool,
    pub level: f64,
}

/// Full Stage6 telemetry block for QA.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stage6Telemetry {
    pub inputs_ok: bool,
    pub gates: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub unclear_reason: Option<String>,
    pub score: ScorePair,
    pub htf_bars_1h: usize,
    pub htf_bars_4h: usize,
    pub htf_min_bars: usize,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub htf_atr14: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub htf_atr_tf: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub htf_lite_dr_tf: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub htf_lite_dr_n: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub htf_lite_dr_n_used: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub htf_lite_pd_zone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub htf_lite_bias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub htf_bias_raw: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub htf_bias_raw_src: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub htf_bias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub htf_bias_src: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub range_src: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub is_premium: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub is_discount: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sweep: Option<SweepTelemetry>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub events_after_sweep: Option<EventsAfterSweepFlags>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub hold: Option<HoldTelemetry>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub hold_level_up: Option<LevelSrc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub hold_level_dn: Option<LevelSrc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub hold_above_up: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub failed_hold_up: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub break_hold_up: Option<BreakHoldTelemetry>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub min_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub score_delta: Option<f64>,
}

/// Raw Stage6 decision (before hysteresis).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage6Decision {
    pub scenario_id: ScenarioId,
    pub direction: ScenarioDirection,
    pub confidence: f64,
    pub why: Vec<String>,
    pub key_levels: KeyLevels,
    pub telemetry: Stage6Telemetry,
}

impl Stage6Decision {
    fn unclear(reason: &str, why: Vec<String>, key_levels: KeyLevels, mut telemetry: Stage6Telemetry) -> Self {
        telemetry.inputs_ok = false;
        telemetry.unclear_reason = Some(reason.to_string());
        Self {
            scenario_id: ScenarioId::Unclear,
            direction: ScenarioDirection::Neutral,
            confidence: 0.0,
            why,
            key_levels,
            telemetry,
        }
    }
}

// =============================================================================
// Decision
// =============================================================================

/// Produce the deterministic 4_2 / 4_3 / UNCLEAR decision for one snapshot.
pub fn decide_42_43(
    snapshot: &SmcInput,
    structure: Option<&SmcStructureState>,
    liquidity: Option<&SmcLiquidityState>,
    zones: Option<&SmcZonesState>,
) -> Stage6Decision {
    let mut telemetry = Stage6Telemetry {
        inputs_ok: true,
        htf_min_bars: HTF_LITE_MIN_BARS,
        ..Stage6Telemetry::default()
    };
    let mut key_levels = KeyLevels::default();
    key_levels.smc.htf.min_bars = HTF_LITE_MIN_BARS;

    let primary_frame = snapshot.primary_frame();
    let last_price = match primary_frame.and_then(Frame::last_close).filter(|v| v.is_finite() && *v > 0.0) {
        Some(price) => price,
        None => {
            telemetry.gates.push("no_last_price".to_string());
            return Stage6Decision::unclear(
                "NO_LAST_PRICE",
                vec!["gate: no last price in the primary frame".to_string()],
                KeyLevels::default(),
                telemetry,
            );
        }
    };

    // ── HTF-Lite warm-up: both 1h and 4h need enough complete bars ────────

    let frame_1h = snapshot.frame("1h");
    let frame_4h = snapshot.frame("4h");
    let bars_1h = frame_1h.map_or(0, Frame::count_complete);
    let bars_4h = frame_4h.map_or(0, Frame::count_complete);
    telemetry.htf_bars_1h = bars_1h;
    telemetry.htf_bars_4h = bars_4h;
    key_levels.smc.htf.bars_1h = bars_1h;
    key_levels.smc.htf.bars_4h = bars_4h;

    if bars_1h < HTF_LITE_MIN_BARS || bars_4h < HTF_LITE_MIN_BARS {
        telemetry.gates.push("no_htf_frames".to_string());
        return Stage6Decision::unclear(
            "NO_HTF_FRAMES",
            vec![
                format!(
                    "gate: no_htf_frames (need >= {HTF_LITE_MIN_BARS} complete bars on 1h and 4h)"
                ),
                format!("1h={bars_1h}, 4h={bars_4h}"),
            ],
            key_levels,
            telemetry,
        );
    }

    // ── ATR(14): 4h first, fall back to 1h ────────────────────────────────

    let atr_4h = frame_4h.and_then(|f| htf_atr(f, HTF_LITE_ATR_PERIOD));
    let atr_1h = frame_1h.and_then(|f| htf_atr(f, HTF_LITE_ATR_PERIOD));
    let (htf_atr14, htf_atr_tf) = match (atr_4h, atr_1h) {
        (Some(atr), _) => (atr, "4h"),
        (None, Some(atr)) => (atr, "1h"),
        (None, None) => {
            telemetry.gates.push("atr_unavailable".to_string());
            return Stage6Decision::unclear(
                "ATR_UNAVAILABLE",
                vec!["gate: atr_unavailable (ATR(14) failed on both 4h and 1h)".to_string()],
                KeyLevels::default(),
                telemetry,
            );
        }
    };
    telemetry.htf_atr14 = Some(htf_atr14);
    telemetry.htf_atr_tf = Some(htf_atr_tf.to_string());
    key_levels.htf_atr14 = Some(htf_atr14);
    key_levels.smc.htf.atr14 = Some(htf_atr14);
    key_levels.smc.htf.atr_tf = Some(htf_atr_tf.to_string());

    // ── HTF-Lite dealing range: 4h first ──────────────────────────────────

    let dr_4h = frame_4h.and_then(|f| dr_levels(f, HTF_LITE_DR_LOOKBACK_4H));
    let dr_1h = frame_1h.and_then(|f| dr_levels(f, HTF_LITE_DR_LOOKBACK_1H));
    let (dr_high, dr_low, dr_mid, dr_n_used, dr_tf, dr_n) = match (dr_4h, dr_1h) {
        (Some((h, l, m, n)), _) => (h, l, m, n, "4h", HTF_LITE_DR_LOOKBACK_4H),
        (None, Some((h, l, m, n))) => (h, l, m, n, "1h", HTF_LITE_DR_LOOKBACK_1H),
        (None, None) => {
            telemetry.gates.push("no_htf_frames".to_string());
            return Stage6Decision::unclear(
                "NO_HTF_FRAMES",
                vec!["gate: no_htf_frames (could not build the HTF-Lite dealing range)".to_string()],
                KeyLevels::default(),
                telemetry,
            );
        }
    };
    telemetry.htf_lite_dr_tf = Some(dr_tf.to_string());
    telemetry.htf_lite_dr_n = Some(dr_n);
    telemetry.htf_lite_dr_n_used = Some(dr_n_used);
    key_levels.htf_dr_high = Some(dr_high);
    key_levels.htf_dr_low = Some(dr_low);
    key_levels.htf_dr_mid = Some(dr_mid);
    key_levels.smc.htf.ready = true;
    key_levels.smc.htf.dr_high = Some(dr_high);
    key_levels.smc.htf.dr_low = Some(dr_low);
    key_levels.smc.htf.dr_mid = Some(dr_mid);
    key_levels.smc.htf.dr_tf = Some(dr_tf.to_string());

    // PD zone and the HTF-Lite fallback bias.
    let (pd_zone, htf_lite_bias) = if last_price > dr_mid {
        ("PREMIUM", HtfBias::Short)
    } else if last_price < dr_mid {
        ("DISCOUNT", HtfBias::Long)
    } else {
        ("MID", HtfBias::Neutral)
    };
    telemetry.htf_lite_pd_zone = Some(pd_zone.to_string());
    telemetry.htf_lite_bias = Some(htf_lite_bias.name().to_string());
    key_levels.smc.htf.pd = Some(pd_zone.to_string());

    // ── HTF bias: context first, frames fallback, HTF-Lite last ───────────

    let (bias_raw, bias_raw_src) = infer_htf_bias(snapshot, frame_1h, frame_4h);
    telemetry.htf_bias_raw = Some(bias_raw.name().to_string());
    telemetry.htf_bias_raw_src = Some(bias_raw_src.clone());
    key_levels.smc.htf.bias_raw = Some(bias_raw.name().to_string());
    key_levels.smc.htf.bias_raw_src = Some(bias_raw_src.clone());

    let (htf_bias, htf_bias_src) = if matches!(bias_raw, HtfBias::Unknown | HtfBias::Neutral)
        && matches!(htf_lite_bias, HtfBias::Long | HtfBias::Short)
    {
        (htf_lite_bias, "htf_lite(pd)".to_string())
    } else {
        (bias_raw, bias_raw_src)
    };
    telemetry.htf_bias = Some(htf_bias.name().to_string());
    telemetry.htf_bias_src = Some(htf_bias_src.clone());
    key_levels.smc.htf.bias = Some(htf_bias.name().to_string());
    key_levels.smc.htf.bias_src = Some(htf_bias_src);

    if matches!(htf_bias, HtfBias::Unknown | HtfBias::Neutral) {
        telemetry.gates.push("no_htf_bias".to_string());
        return Stage6Decision::unclear(
            "NO_HTF",
            vec![
                "gate: no valid HTF bias (context and frames NEUTRAL/UNKNOWN, HTF-Lite gives none)"
                    .to_string(),
            ],
            key_levels,
            telemetry,
        );
    }

    // HTF magnets the trader sees on the map.
    let pools: Vec<SmcLiquidityPool> = liquidity.map_or(Vec::new(), |l| l.pools.clone());
    key_levels.smc.htf.magnets = build_htf_magnets(snapshot, &pools, last_price, htf_atr14, 3);

    // ── Dealing range on 5m (or proxy) ────────────────────────────────────

    let (range_high, range_low, range_eq, range_src) =
        extract_dealing_range(structure, primary_frame);
    telemetry.range_src = Some(range_src);
    let (range_high, range_low) = match (range_high, range_low) {
        (Some(h), Some(l)) if h > l => (h, l),
        _ => {
            telemetry.gates.push("no_range".to_string());
            return Stage6Decision::unclear(
                "NO_RANGE",
                vec!["gate: no dealing range (range_high/range_low)".to_string()],
                KeyLevels::default(),
                telemetry,
            );
        }
    };

    // Structure gate: at least one event or two swings on 5m.
    let structure_ok = structure.map_or(false, |s| !s.events.is_empty() || s.swings.len() >= 2);
    if !structure_ok {
        telemetry.gates.push("no_structure".to_string());
        return Stage6Decision::unclear(
            "NO_STRUCTURE",
            vec!["gate: not enough 5m structure (BOS/CHOCH or swings)".to_string()],
            key_levels,
            telemetry,
        );
    }

    key_levels.range_high = Some(range_high);
    key_levels.range_low = Some(range_low);
    key_levels.range_eq = range_eq;
    let range_mid = (range_high + range_low) / 2.0;
    key_levels.smc.structure_5m.range_high = Some(range_high);
    key_levels.smc.structure_5m.range_low = Some(range_low);
    key_levels.smc.structure_5m.range_mid = Some(range_mid);

    let bias_5m = structure.map(|s| match s.bias {
        TradeBias::Neutral => "MIXED".to_string(),
        other => other.name().to_string(),
    });
    key_levels.smc.structure_5m.bias_5m = bias_5m;

    let is_premium = match range_eq {
        Some(eq) => last_price > eq,
        None => last_price > range_low + (range_high - range_low) * 0.5,
    };
    let is_discount = !is_premium;
    telemetry.is_premium = Some(is_premium);
    telemetry.is_discount = Some(is_discount);

    // ── Events: sweep, post-sweep truth, hold switch ──────────────────────

    let sweep = detect_sweep(primary_frame, &pools);
    if let Some(sweep) = &sweep {
        key_levels.swept_level = Some(sweep.level);
        telemetry.sweep = Some(SweepTelemetry {
            side: sweep.side.to_string(),
            level: sweep.level,
            pool_type: sweep.pool_type.clone(),
            time: Some(sweep.time),
        });
        let age_bars = primary_frame
            .and_then(Frame::last)
            .map(|bar| ((bar.open_time - sweep.time) as f64 / 300_000.0).round() as i64);
        key_levels.smc.facts.sweep = Some(SweepFact {
            side: sweep.side.to_string(),
            level: sweep.level,
            pool_type: sweep.pool_type.clone(),
            ts: Some(sweep.time),
            age_bars,
        });
    }

    let events: Vec<SmcStructureEvent> = structure.map_or(Vec::new(), |s| s.events.clone());
    key_levels.smc.structure_5m.last_event = extract_last_event(&events);

    let sweep_time = sweep.as_ref().map(|s| s.time);
    let (truth, truth_ts) = events_after_sweep_truth(&events, sweep_time);
    key_levels.smc.structure_5m.events_after_sweep = EventsAfterSweepView {
        truth: truth.clone(),
        ts: truth_ts,
    };
    let flags = EventsAfterSweepFlags {
        bos_down: truth == "BOS_DOWN",
        bos_up: truth == "BOS_UP",
        choch_up: truth == "CHOCH_UP",
        choch_down: truth == "CHOCH_DOWN",
        chop: truth == "CHOP",
        truth: truth.clone(),
        ts: truth_ts,
    };
    telemetry.events_after_sweep = Some(flags.clone());

    // Hold switch: one canonical level (5m range high / low) so it cannot
    // be range_high today and htf_dr_high tomorrow.
    let atr_5m = structure.and_then(|s| s.meta.atr_last).filter(|v| *v > 0.0);
    let (atr_ref, eps_atr, atr_ref_src) = match atr_5m {
        Some(atr) => (atr, HOLD_EPS_ATR, "5m"),
        None => (htf_atr14, HOLD_EPS_ATR_HTF, "htf"),
    };
    let hold_eps = atr_ref * eps_atr;
    telemetry.hold = Some(HoldTelemetry {
        k: HOLD_BARS,
        eps_atr,
        eps: hold_eps,
        atr_ref,
        atr_ref_src: atr_ref_src.to_string(),
    });

    let hold_level_up = range_high;
    let hold_level_dn = range_low;
    key_levels.hold_level_up = Some(hold_level_up);
    key_levels.hold_level_dn = Some(hold_level_dn);
    telemetry.hold_level_up = Some(LevelSrc {
        level: hold_level_up,
        src: "range_high".to_string(),
    });
    telemetry.hold_level_dn = Some(LevelSrc {
        level: hold_level_dn,
        src: "range_low".to_string(),
    });

    let hold_above_up = hold_above(primary_frame, hold_level_up, HOLD_BARS, hold_eps);
    let swept_up_level = sweep
        .as_ref()
        .filter(|s| s.side == SweepSide::Up)
        .map(|s| s.level);
    let failed_hold_up =
        failed_hold_up_check(primary_frame, hold_level_up, swept_up_level, hold_above_up, hold_eps);
    telemetry.hold_above_up = Some(hold_above_up);
    telemetry.failed_hold_up = Some(failed_hold_up);
    key_levels.smc.facts.hold = HoldFact {
        level_up: Some(hold_level_up),
        k: HOLD_BARS,
        ok: hold_above_up,
    };
    key_levels.smc.facts.failed_hold = FailedHoldFact {
        level_up: Some(hold_level_up),
        ok: failed_hold_up,
    };

    // The older break&hold pattern stays as a weak confirmer.
    let (break_hold_up, retest_hold_up) =
        detect_break_hold_up(primary_frame, range_high, HOLD_BARS);
    telemetry.break_hold_up = Some(BreakHoldTelemetry {
        ok: break_hold_up,
        retest_hold: retest_hold_up,
        level: range_high,
    });

    // ── Light POI / target features ───────────────────────────────────────

    let bearish_poi_near = near_poi(zones, Direction::Short, last_price, atr_5m, is_premium);
    let bullish_poi_near = near_poi(zones, Direction::Long, last_price, atr_5m, is_discount);
    let targets_down_near = targets_near(&pools, false, last_price, atr_5m);
    let targets_up_near = targets_near(&pools, true, last_price, atr_5m);

    key_levels.smc.poi_active = pick_poi_active(zones, last_price, htf_atr14, 3);
    key_levels.smc.targets_near = pick_targets_near(&pools, last_price, htf_atr14, 3);

    // ── Scoring ───────────────────────────────────────────────────────────

    let mut score_42 = 0.0;
    let mut score_43 = 0.0;

    match htf_bias {
        HtfBias::Short => {
            score_42 += 2.2;
            score_43 -= 0.6;
        }
        HtfBias::Long => {
            score_43 += 1.2;
            score_42 -= 0.4;
        }
        _ => {
            // MIXED
            score_43 += 0.4;
        }
    }

    if is_premium {
        score_42 += 0.9;
    } else {
        score_43 += 0.4;
    }

    if let Some(sweep) = &sweep {
        match sweep.side {
            SweepSide::Up => {
                score_42 += 0.9;
                score_43 += 0.2;
            }
            SweepSide::Down => {
                score_43 += 0.6;
            }
        }
    }

    if flags.bos_down {
        score_42 += 1.8;
    }
    if flags.bos_up {
        score_43 += 1.6;
    }
    if flags.choch_up {
        score_43 += 1.2;
    }

    if break_hold_up {
        score_43 += 2.2;
        score_42 -= 0.6;
    }
    if retest_hold_up {
        score_43 += 0.6;
    }

    // Mutually exclusive switch: removes score CONFLICTs by construction.
    if hold_above_up {
        score_43 += W_HOLD;
        score_42 -= W_HOLD_PENALTY;
    }
    if failed_hold_up {
        score_42 += W_FAIL_HOLD;
        score_43 -= W_FAIL_HOLD_PENALTY;
    }

    if targets_down_near {
        score_42 += 0.8;
    }
    if targets_up_near {
        score_43 += 0.5;
    }
    if bearish_poi_near {
        score_42 += 0.6;
    }
    if bullish_poi_near {
        score_43 += 0.4;
    }

    telemetry.score = ScorePair {
        s42: round4(score_42),
        s43: round4(score_43),
    };
    telemetry.min_score = Some(MIN_SCORE);
    telemetry.score_delta = Some(SCORE_DELTA);

    debug!(
        symbol = %snapshot.symbol,
        score_42,
        score_43,
        htf_bias = htf_bias.name(),
        hold_above_up,
        failed_hold_up,
        "stage6 scored"
    );

    let why_ctx = WhyContext {
        htf: &key_levels.smc.htf,
        structure_5m: &key_levels.smc.structure_5m,
        facts: &key_levels.smc.facts,
        targets: &key_levels.smc.targets_near,
        poi: &key_levels.smc.poi_active,
    };

    if score_42.max(score_43) < MIN_SCORE {
        telemetry.unclear_reason = Some("LOW_SCORE".to_string());
        let why = build_why_canonical(&why_ctx, "UNCLEAR (score below threshold)");
        return Stage6Decision {
            scenario_id: ScenarioId::Unclear,
            direction: ScenarioDirection::Neutral,
            confidence: 0.0,
            why,
            key_levels,
            telemetry,
        };
    }

    if (score_42 - score_43).abs() < SCORE_DELTA {
        telemetry.unclear_reason = Some("CONFLICT".to_string());
        let why = build_why_canonical(&why_ctx, "UNCLEAR (score conflict)");
        return Stage6Decision {
            scenario_id: ScenarioId::Unclear,
            direction: ScenarioDirection::Neutral,
            confidence: 0.0,
            why,
            key_levels,
            telemetry,
        };
    }

    let (scenario_id, direction, winner, loser) = if score_42 >= score_43 {
        (ScenarioId::FourTwo, ScenarioDirection::Short, score_42, score_43)
    } else {
        (ScenarioId::FourThree, ScenarioDirection::Long, score_43, score_42)
    };
    let confidence = confidence_from_scores(winner, loser);
    let conclusion = format!("{} {}", scenario_id.name(), direction.name());
    let why = build_why_canonical(&why_ctx, &conclusion);

    Stage6Decision {
        scenario_id,
        direction,
        confidence,
        why,
        key_levels,
        telemetry,
    }
}

// =============================================================================
// Internal helpers
// =============================================================================

/// ATR(period) over the tail of complete bars, with margin for warm-up.
fn htf_atr(frame: &Frame, period: usize) -> Option<f64> {
    let bars = frame.tail_complete(period + 64);
    if bars.len() < period + 1 {
        return None;
    }
    atr_series(&bars, period)
        .into_iter()
        .rev()
        .flatten()
        .next()
        .filter(|v| v.is_finite() && *v > 0.0)
}

/// HTF-Lite dealing range over the last `lookback` complete bars.
fn dr_levels(frame: &Frame, lookback: usize) -> Option<(f64, f64, f64, usize)> {
    let bars = frame.tail_complete(lookback);
    if bars.is_empty() {
        return None;
    }
    let high = bars.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
    let low = bars.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
    if !high.is_finite() || !low.is_finite() || high <= low {
        return None;
    }
    let mid = (high + low) / 2.0;
    mid.is_finite().then_some((high, low, mid, bars.len()))
}

fn infer_htf_bias(
    snapshot: &SmcInput,
    frame_1h: Option<&Frame>,
    frame_4h: Option<&Frame>,
) -> (HtfBias, String) {
    let bias_4h = read_bias_from_context(snapshot.context.trend_context_4h.as_ref());
    let bias_1h = read_bias_from_context(snapshot.context.trend_context_h1.as_ref());

    if bias_4h != HtfBias::Unknown || bias_1h != HtfBias::Unknown {
        if bias_4h != HtfBias::Unknown && bias_1h != HtfBias::Unknown && bias_4h != bias_1h {
            return (HtfBias::Mixed, "context(4h+1h)".to_string());
        }
        if bias_4h != HtfBias::Unknown {
            return (bias_4h, "context(4h)".to_string());
        }
        return (bias_1h, "context(1h)".to_string());
    }

    // Fallback: rough close slope on the loaded HTF frames.
    let b4 = frame_4h.map_or(HtfBias::Unknown, bias_from_frame);
    let b1 = frame_1h.map_or(HtfBias::Unknown, bias_from_frame);
    if b4 != HtfBias::Unknown || b1 != HtfBias::Unknown {
        if b4 != HtfBias::Unknown && b1 != HtfBias::Unknown && b4 != b1 {
            return (HtfBias::Mixed, "frames(4h+1h)".to_string());
        }
        if b4 != HtfBias::Unknown && b4 != HtfBias::Neutral {
            return (b4, "frames(4h)".to_string());
        }
        if b1 != HtfBias::Unknown && b1 != HtfBias::Neutral {
            return (b1, "frames(1h)".to_string());
        }
        // Both neutral: not a usable bias.
        return (HtfBias::Neutral, "frames(neutral)".to_string());
    }

    (HtfBias::Unknown, "none".to_string())
}

fn read_bias_from_context(value: Option<&crate::types::TrendContext>) -> HtfBias {
    let value = match value {
        Some(value) => value,
        None => return HtfBias::Unknown,
    };
    let raw = value
        .bias
        .as_deref()
        .or(value.trend.as_deref())
        .or(value.direction.as_deref());
    match raw.map(|s| s.trim().to_uppercase()) {
        Some(s) if ["LONG", "UP", "BULL", "BULLISH"].contains(&s.as_str()) => HtfBias::Long,
        Some(s) if ["SHORT", "DOWN", "BEAR", "BEARISH"].contains(&s.as_str()) => HtfBias::Short,
        Some(s) if ["NEUTRAL", "RANGE", "MIXED"].contains(&s.as_str()) => HtfBias::Neutral,
        _ => HtfBias::Unknown,
    }
}

/// Rough close slope over the last 40 bars; ±0.2% decides the direction.
fn bias_from_frame(frame: &Frame) -> HtfBias {
    if frame.len() < 6 {
        return HtfBias::Unknown;
    }
    let tail = frame.tail(40);
    let first = tail[0].close;
    let last = tail[tail.len() - 1].close;
    if !first.is_finite() || !last.is_finite() || first <= 0.0 {
        return HtfBias::Unknown;
    }
    let delta_pct = (last - first) / first.abs();
    if delta_pct >= 0.002 {
        HtfBias::Long
    } else if delta_pct <= -0.002 {
        HtfBias::Short
    } else {
        HtfBias::Neutral
    }
}

fn extract_dealing_range(
    structure: Option<&SmcStructureState>,
    primary_frame: Option<&Frame>,
) -> (Option<f64>, Option<f64>, Option<f64>, String) {
    if let Some(range) = structure.and_then(|s| s.active_range.as_ref()) {
        return (
            Some(range.high),
            Some(range.low),
            Some(range.eq_level),
            "structure.active_range".to_string(),
        );
    }
    // Proxy range over the last ~6 hours of 5m bars: worse than structure
    // but better than a permanent UNCLEAR.
    let n = 72;
    let frame = match primary_frame {
        Some(frame) if !frame.is_empty() => frame,
        _ => return (None, None, None, "none".to_string()),
    };
    let tail = frame.tail(n);
    let hi = tail.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
    let lo = tail.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
    if hi.is_finite() && lo.is_finite() && hi > lo {
        let eq = (hi + lo) / 2.0;
        return (Some(hi), Some(lo), Some(eq), format!("proxy(last_{n}_bars)"));
    }
    (None, None, None, "none".to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SweepSide {
    Up,
    Down,
}

impl std::fmt::Display for SweepSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Up => write!(f, "UP"),
            Self::Down => write!(f, "DOWN"),
        }
    }
}

#[derive(Debug, Clone)]
struct Sweep {
    side: SweepSide,
    level: f64,
    pool_type: String,
    time: i64,
}

/// Scan the last 10 primary bars against the strongest pools (top 12) for a
/// wick-through-and-close-back. The newest sweep wins; a DOWN sweep only
/// displaces an UP sweep when strictly newer.
fn detect_sweep(primary_frame: Option<&Frame>, pools: &[SmcLiquidityPool]) -> Option<Sweep> {
    let frame = primary_frame?;
    if frame.is_empty() {
        return None;
    }
    let tail = frame.tail(10);

    let mut pools_sorted: Vec<&SmcLiquidityPool> = pools.iter().collect();
    pools_sorted.sort_by(|a, b| b.strength.total_cmp(&a.strength));
    pools_sorted.truncate(12);

    let mut best: Option<Sweep> = None;
    for pool in pools_sorted {
        let level = pool.level;
        if !level.is_finite() || level <= 0.0 {
            continue;
        }

        // Sweep UP: high > L and close < L — take the latest matching bar.
        if let Some(bar) = tail
            .iter()
            .rev()
            .find(|b| b.high > level && b.close < level)
        {
            best = Some(Sweep {
                side: SweepSide::Up,
                level,
                pool_type: pool.liq_type.name().to_string(),
                time: bar.open_time,
            });
        }

        // Sweep DOWN: low < L and close > L — only displaces when newer.
        if let Some(bar) = tail
            .iter()
            .rev()
            .find(|b| b.low < level && b.close > level)
        {
            let candidate = Sweep {
                side: SweepSide::Down,
                level,
                pool_type: pool.liq_type.name().to_string(),
                time: bar.open_time,
            };
            if best.as_ref().map_or(true, |b| candidate.time > b.time) {
                best = Some(candidate);
            }
        }
    }
    best
}

fn event_kind(event: &SmcStructureEvent) -> String {
    let et = event.event_type.name();
    let d = match event.direction {
        Direction::Long => "UP",
        Direction::Short => "DOWN",
    };
    format!("{et}_{d}")
}

fn extract_last_event(events: &[SmcStructureEvent]) -> Option<LastEventView> {
    let last = events.iter().max_by_key(|e| e.time)?;
    Some(LastEventView {
        kind: event_kind(last),
        ts: Some(last.time),
        price_level: Some(last.price_level),
    })
}

/// One truth after the sweep: the last valid direction, or CHOP when the two
/// latest post-sweep events oppose each other within one 5m bar.
fn events_after_sweep_truth(
    events: &[SmcStructureEvent],
    sweep_time: Option<i64>,
) -> (String, Option<i64>) {
    let sweep_time = match sweep_time {
        Some(ts) => ts,
        None => return ("NONE".to_string(), None),
    };

    let mut after: Vec<&SmcStructureEvent> =
        events.iter().filter(|e| e.time >= sweep_time).collect();
    if after.is_empty() {
        return ("NONE".to_string(), None);
    }
    after.sort_by_key(|e| e.time);

    let last = after[after.len() - 1];
    if after.len() >= 2 {
        let prev = after[after.len() - 2];
        if last.direction != prev.direction && last.time - prev.time <= 5 * 60_000 {
            return ("CHOP".to_string(), Some(last.time));
        }
    }
    (event_kind(last), Some(last.time))
}

fn hold_above(primary_frame: Option<&Frame>, level: f64, k: usize, eps: f64) -> bool {
    let frame = match primary_frame {
        Some(frame) => frame,
        None => return false,
    };
    let k = k.max(1);
    if frame.len() < k {
        return false;
    }
    let threshold = level + eps.max(0.0);
    frame.tail(k).iter().all(|b| b.close > threshold)
}

/// failed_hold requires a sweep — otherwise any pullback would qualify.
fn failed_hold_up_check(
    primary_frame: Option<&Frame>,
    level: f64,
    swept_level: Option<f64>,
    hold_above: bool,
    eps: f64,
) -> bool {
    if swept_level.map_or(true, |v| !v.is_finite()) {
        return false;
    }
    let last_close = match primary_frame.and_then(Frame::last_close) {
        Some(close) if close.is_finite() => close,
        _ => return false,
    };
    let threshold = level - eps.max(0.0);
    last_close < threshold && !hold_above
}

fn detect_break_hold_up(
    primary_frame: Option<&Frame>,
    key_level: f64,
    hold_bars: usize,
) -> (bool, bool) {
    let frame = match primary_frame {
        Some(frame) if !frame.is_empty() => frame,
        _ => return (false, false),
    };
    let eps = (key_level.abs() * 0.0001).max(1e-9);
    if frame.len() < hold_bars {
        return (false, false);
    }
    let held = frame
        .tail(hold_bars)
        .iter()
        .all(|b| b.close > key_level + eps);
    if !held {
        return (false, false);
    }
    // Retest&hold: within the last 8 bars a low touched the level while the
    // close stayed above.
    let retest = frame
        .tail(8)
        .iter()
        .any(|b| b.low <= key_level && b.close > key_level + eps);
    (true, retest)
}

fn build_htf_magnets(
    snapshot: &SmcInput,
    pools: &[SmcLiquidityPool],
    last_price: f64,
    atr: f64,
    limit: usize,
) -> Vec<HtfMagnetItem> {
    let mut out: Vec<HtfMagnetItem> = Vec::new();
    let ctx = &snapshot.context;
    for (name, key, value) in [
        ("PDH", "pdh", ctx.pdh),
        ("PDL", "pdl", ctx.pdl),
        ("PWH", "pwh", ctx.pwh),
        ("PWL", "pwl", ctx.pwl),
        ("SESSION_HIGH", "smc_session_high", ctx.smc_session_high),
        ("SESSION_LOW", "smc_session_low", ctx.smc_session_low),
    ] {
        if let Some(level) = value.filter(|v| v.is_finite()) {
            out.push(HtfMagnetItem {
                name: name.to_string(),
                level,
                src: format!("context:{key}"),
                strength: None,
                dist_atr: dist_atr(level, last_price, atr),
            });
        }
    }

    let mut strong: Vec<&SmcLiquidityPool> = pools
        .iter()
        .filter(|p| {
            matches!(
                p.liq_type.name(),
                "EQH" | "EQL" | "SESSION_HIGH" | "SESSION_LOW" | "RANGE_EXTREME"
            )
        })
        .collect();
    strong.sort_by(|a, b| b.strength.total_cmp(&a.strength));
    for pool in strong {
        if out.len() >= 12 {
            break;
        }
        if !pool.level.is_finite() {
            continue;
        }
        out.push(HtfMagnetItem {
            name: pool.liq_type.name().to_string(),
            level: pool.level,
            src: "liquidity_pool".to_string(),
            strength: Some(pool.strength),
            dist_atr: dist_atr(pool.level, last_price, atr),
        });
    }

    // Dedup close levels, keep the most useful (nearest in ATR).
    let mut dedup: Vec<HtfMagnetItem> = Vec::new();
    let tol = (atr * 0.08).max(1e-6);
    for item in out {
        if dedup.iter().any(|x| (x.level - item.level).abs() <= tol) {
            continue;
        }
        dedup.push(item);
    }
    dedup.sort_by(|a, b| a.dist_atr.total_cmp(&b.dist_atr));
    dedup.truncate(limit);
    dedup
}

fn pick_targets_near(
    pools: &[SmcLiquidityPool],
    last_price: f64,
    atr: f64,
    limit: usize,
) -> Vec<TargetNearItem> {
    let mut items: Vec<TargetNearItem> = pools
        .iter()
        .filter(|p| p.level.is_finite())
        .map(|p| TargetNearItem {
            tf: "5m".to_string(),
            role: p.role.name().to_string(),
            kind: p.liq_type.name().to_string(),
            level: p.level,
            strength: Some(p.strength),
            dist_atr: dist_atr(p.level, last_price, atr),
        })
        .collect();
    items.sort_by(|a, b| a.dist_atr.total_cmp(&b.dist_atr));
    items.truncate(limit);
    items
}

fn pick_poi_active(
    zones: Option<&SmcZonesState>,
    last_price: f64,
    atr: f64,
    limit_per_side: usize,
) -> Vec<PoiNearItem> {
    let zones = match zones {
        Some(zones) => zones,
        None => return Vec::new(),
    };
    let candidates: &[crate::types::SmcZone] = if !zones.poi_zones.is_empty() {
        &zones.poi_zones
    } else if !zones.active_zones.is_empty() {
        &zones.active_zones
    } else {
        &zones.zones
    };
    if candidates.is_empty() {
        return Vec::new();
    }

    let mut sorted: Vec<&crate::types::SmcZone> = candidates.iter().collect();
    sorted.sort_by(|a, b| b.composite_score().total_cmp(&a.composite_score()));
    sorted.truncate(60);

    let mut out: Vec<PoiNearItem> = Vec::new();
    let mut long_count = 0usize;
    let mut short_count = 0usize;
    for zone in sorted {
        if long_count >= limit_per_side && short_count >= limit_per_side {
            break;
        }
        let center = zone.center();
        let dist = dist_atr(center, last_price, atr);
        let item = |side: &str| PoiNearItem {
            side: side.to_string(),
            kind: zone.zone_type.name().to_string(),
            tf: zone.timeframe.clone(),
            score: round4(zone.composite_score()),
            filled_pct: zone.meta.filled_pct,
            dist_atr: dist,
            why: format!("dist_atr={dist:.2} tf={}", zone.timeframe),
        };
        match zone.direction {
            ZoneDirection::Long => {
                if long_count < limit_per_side {
                    out.push(item("LONG"));
                    long_count += 1;
                }
            }
            ZoneDirection::Short => {
                if short_count < limit_per_side {
                    out.push(item("SHORT"));
                    short_count += 1;
                }
            }
            ZoneDirection::Both => {
                if long_count < limit_per_side {
                    out.push(item("LONG"));
                    long_count += 1;
                }
                if short_count < limit_per_side {
                    out.push(item("SHORT"));
                    short_count += 1;
                }
            }
        }
    }

    // Stable UI order: SHORT first, then by distance, then type.
    out.sort_by(|a, b| {
        let ka = (if a.side == "SHORT" { 0 } else { 1 }, a.dist_atr);
        let kb = (if b.side == "SHORT" { 0 } else { 1 }, b.dist_atr);
        ka.partial_cmp(&kb)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.kind.cmp(&b.kind))
    });
    out
}

fn near_poi(
    zones: Option<&SmcZonesState>,
    side: Direction,
    price: f64,
    atr: Option<f64>,
    side_zone_ok: bool,
) -> bool {
    if !side_zone_ok {
        return false;
    }
    let zones = match zones {
        Some(zones) => zones,
        None => return false,
    };
    let candidates: &[crate::types::SmcZone] = if !zones.poi_zones.is_empty() {
        &zones.poi_zones
    } else {
        &zones.active_zones
    };
    let dist_thr = atr.map_or(price.abs() * 0.003, |a| a * 2.2);

    candidates.iter().take(12).any(|zone| {
        zone.direction.matches(side) && (zone.center() - price).abs() <= dist_thr
    })
}

fn targets_near(pools: &[SmcLiquidityPool], up: bool, price: f64, atr: Option<f64>) -> bool {
    if pools.is_empty() {
        return false;
    }
    let thr = atr.map_or(price.abs() * 0.004, |a| a * 3.0);
    pools.iter().take(24).any(|pool| {
        let level = pool.level;
        if !level.is_finite() || level <= 0.0 {
            return false;
        }
        if up {
            level > price && level - price <= thr
        } else {
            level < price && price - level <= thr
        }
    })
}

struct WhyContext<'a> {
    htf: &'a HtfView,
    structure_5m: &'a Structure5mView,
    facts: &'a FactsView,
    targets: &'a [TargetNearItem],
    poi: &'a [PoiNearItem],
}

/// Canonical 3–7 line why[] in a fixed order: HTF frame, key event, switch,
/// 5m structure, targets, optional POI, conclusion.
fn build_why_canonical(ctx: &WhyContext<'_>, conclusion: &str) -> Vec<String> {
    let mut out = Vec::with_capacity(7);

    out.push(format!(
        "HTF: DR({})[{}..{}] PD={} ATR14({})={} bias={}({})",
        ctx.htf.dr_tf.as_deref().unwrap_or("-"),
        fmt_num(ctx.htf.dr_low),
        fmt_num(ctx.htf.dr_high),
        ctx.htf.pd.as_deref().unwrap_or("-"),
        ctx.htf.atr_tf.as_deref().unwrap_or("-"),
        fmt_num(ctx.htf.atr14),
        ctx.htf.bias.as_deref().unwrap_or("-"),
        ctx.htf.bias_src.as_deref().unwrap_or("-"),
    ));

    match &ctx.facts.sweep {
        Some(sweep) => out.push(format!(
            "key event: sweep {} {}@{} age={}",
            sweep.side,
            sweep.pool_type,
            fmt_num(Some(sweep.level)),
            sweep
                .age_bars
                .map_or("-".to_string(), |v| v.to_string()),
        )),
        None => out.push("key event: sweep — none".to_string()),
    }

    if ctx.facts.hold.ok {
        out.push(format!(
            "switch: hold_above(level={}, k={})",
            fmt_num(ctx.facts.hold.level_up),
            ctx.facts.hold.k
        ));
    } else if ctx.facts.failed_hold.ok {
        out.push(format!(
            "switch: failed_hold_after_sweep(level={})",
            fmt_num(ctx.facts.failed_hold.level_up)
        ));
    } else {
        out.push("switch: —".to_string());
    }

    out.push(format!(
        "structure 5m: bias={} last={} after_sweep={}",
        ctx.structure_5m.bias_5m.as_deref().unwrap_or("-"),
        ctx.structure_5m
            .last_event
            .as_ref()
            .map_or("-", |e| e.kind.as_str()),
        ctx.structure_5m.events_after_sweep.truth,
    ));

    if ctx.targets.is_empty() {
        out.push("targets: —".to_string());
    } else {
        let parts: Vec<String> = ctx
            .targets
            .iter()
            .take(3)
            .map(|t| {
                format!(
                    "{}@{} d_atr={}",
                    t.kind,
                    fmt_num(Some(t.level)),
                    fmt_num(Some(t.dist_atr))
                )
            })
            .collect();
        out.push(format!("targets: {}", parts.join(", ")));
    }

    let top_poi = ctx
        .poi
        .iter()
        .find(|p| p.side == "SHORT")
        .or_else(|| ctx.poi.first());
    if let Some(poi) = top_poi {
        out.push(format!(
            "POI: {} {} score={} filled%={}",
            poi.side,
            poi.kind,
            fmt_num(Some(poi.score)),
            fmt_num(poi.filled_pct)
        ));
    }

    out.push(format!("conclusion: {conclusion}"));

    if out.len() > 7 {
        out.retain(|line| !line.starts_with("POI:"));
    }
    out.truncate(7);
    out
}

fn fmt_num(v: Option<f64>) -> String {
    match v {
        Some(v) if v.is_finite() => format!("{v:.5}"),
        _ => "-".to_string(),
    }
}

fn dist_atr(level: f64, price: f64, atr: f64) -> f64 {
    if !atr.is_finite() || atr <= 0.0 {
        return 999.0;
    }
    (level - price).abs() / atr
}

/// Sigmoid over the score difference, clamped to [0.5, 0.95].
fn confidence_from_scores(winner: f64, loser: f64) -> f64 {
    let x = (winner - loser) / 2.0;
    let sig = 1.0 / (1.0 + (-x).exp());
    (0.5 + sig * 0.45).clamp(0.5, 0.95)
}

fn round4(v: f64) -> f64 {
    (v * 1e4).round() / 1e4
}
