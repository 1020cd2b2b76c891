// =============================================================================
// SMC Configuration — frozen thresholds with serde defaults and atomic save
// =============================================================================
//
// Every tunable of the analysis core lives here, grouped by subsystem.
// Defaults are frozen: changing them is a release event, not a runtime knob.
// All fields carry `#[serde(default)]` so that loading an older JSON file
// missing new fields never breaks.
//
// Persistence uses the atomic tmp + rename pattern to prevent corruption on
// crash.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_min_swing_bars() -> usize {
    3
}

fn default_min_range_bars() -> usize {
    12
}

fn default_eq_tolerance_pct() -> f64 {
    0.12
}

fn default_ote_min() -> f64 {
    0.62
}

fn default_ote_max() -> f64 {
    0.79
}

fn default_max_lookback_bars() -> usize {
    300
}

fn default_bos_min_move_atr() -> f64 {
    0.6
}

fn default_bos_min_move_pct() -> f64 {
    0.0018
}

fn default_leg_min_amplitude_atr() -> f64 {
    0.8
}

fn default_true() -> bool {
    true
}

fn default_ote_max_active_per_side() -> usize {
    1
}

fn default_event_history_max_minutes() -> u32 {
    60 * 24 * 7
}

fn default_event_history_max_entries() -> usize {
    500
}

fn default_ob_leg_min_atr_mul() -> f64 {
    0.8
}

fn default_ob_leg_max_bars() -> usize {
    40
}

fn default_ob_prelude_max_bars() -> usize {
    6
}

fn default_ob_body_domination_pct() -> f64 {
    0.65
}

fn default_ob_body_min_pct() -> f64 {
    0.25
}

fn default_ob_max_active_distance_atr() -> Option<f64> {
    Some(15.0)
}

fn default_breaker_max_ob_age_minutes() -> u32 {
    60 * 12
}

fn default_breaker_max_sweep_delay_minutes() -> u32 {
    180
}

fn default_breaker_level_tolerance_pct() -> f64 {
    0.0015
}

fn default_breaker_min_body_pct() -> f64 {
    0.35
}

fn default_breaker_min_displacement_atr() -> f64 {
    0.75
}

fn default_fvg_min_gap_atr() -> f64 {
    0.5
}

fn default_fvg_min_gap_pct() -> f64 {
    0.0015
}

fn default_fvg_max_age_minutes() -> u32 {
    60 * 24 * 3
}

fn default_max_zone_span_atr() -> Option<f64> {
    Some(2.0)
}

fn default_zone_merge_iou_threshold() -> Option<f64> {
    Some(0.6)
}

fn default_exec_tf() -> String {
    "1m".to_string()
}

fn default_exec_in_play_radius_atr() -> f64 {
    0.9
}

fn default_exec_micro_pivot_bars() -> usize {
    8
}

fn default_exec_max_events() -> usize {
    6
}

fn default_pools_max_total() -> usize {
    64
}

fn default_eq_topk_per_side() -> usize {
    12
}

fn default_wick_cluster_topk_per_side() -> usize {
    8
}

fn default_sfp_topk_per_side() -> usize {
    6
}

fn default_other_topk_per_group() -> usize {
    12
}

fn default_wick_cluster_track_tol_pct() -> f64 {
    0.0012
}

fn default_wick_cluster_track_max_abs_move_atr() -> f64 {
    0.60
}

fn default_wick_cluster_min_life_bars() -> u32 {
    2
}

fn default_wick_cluster_min_density() -> f64 {
    0.02
}

fn default_wick_cluster_min_amp_atr() -> f64 {
    0.20
}

// =============================================================================
// SmcConfig
// =============================================================================

/// Thresholds that define the baseline sensitivity of the SMC core.
///
/// Grouped by subsystem: structure, order blocks, breakers, FVG, zone
/// selection, execution gating, and liquidity throttling. The struct is
/// plain data — pass it by reference through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmcConfig {
    // --- Structure -----------------------------------------------------------

    /// Symmetric swing-detection window in bars.
    #[serde(default = "default_min_swing_bars")]
    pub min_swing_bars: usize,

    /// Trailing window used for the dealing range.
    #[serde(default = "default_min_range_bars")]
    pub min_range_bars: usize,

    /// Relative tolerance for EQ clustering and the range EQ band.
    #[serde(default = "default_eq_tolerance_pct")]
    pub eq_tolerance_pct: f64,

    /// Lower bound of the OTE retracement band.
    #[serde(default = "default_ote_min")]
    pub ote_min: f64,

    /// Upper bound of the OTE retracement band.
    #[serde(default = "default_ote_max")]
    pub ote_max: f64,

    /// Hard cap on the number of bars any component looks back.
    #[serde(default = "default_max_lookback_bars")]
    pub max_lookback_bars: usize,

    /// BOS threshold: ATR multiple component.
    #[serde(default = "default_bos_min_move_atr")]
    pub bos_min_move_atr: f64,

    /// BOS threshold: price-fraction component (0.0018 = 0.18%).
    #[serde(default = "default_bos_min_move_pct")]
    pub bos_min_move_pct: f64,

    /// Minimum leg amplitude in ATR for OTE qualification.
    #[serde(default = "default_leg_min_amplitude_atr")]
    pub leg_min_amplitude_atr: f64,

    /// Restrict OTE zones to legs aligned with the trend.
    #[serde(default = "default_true")]
    pub ote_trend_only: bool,

    /// Maximum active OTE zones per side.
    #[serde(default = "default_ote_max_active_per_side")]
    pub ote_max_active_per_side: usize,

    /// Structure event-history retention in minutes (up to a week).
    #[serde(default = "default_event_history_max_minutes")]
    pub structure_event_history_max_minutes: u32,

    /// Structure event-history entry cap.
    #[serde(default = "default_event_history_max_entries")]
    pub structure_event_history_max_entries: usize,

    // --- Order blocks --------------------------------------------------------

    /// Minimum impulse amplitude in ATR for an OB leg.
    #[serde(default = "default_ob_leg_min_atr_mul")]
    pub ob_leg_min_atr_mul: f64,

    /// Maximum bar length of a leg considered for OBs.
    #[serde(default = "default_ob_leg_max_bars")]
    pub ob_leg_max_bars: usize,

    /// Prelude window searched for the candidate candle before the impulse.
    #[serde(default = "default_ob_prelude_max_bars")]
    pub ob_prelude_max_bars: usize,

    /// Body share at or above which the zone is BODY_05.
    #[serde(default = "default_ob_body_domination_pct")]
    pub ob_body_domination_pct: f64,

    /// Body share at or below which the zone is BODY_TOUCH.
    #[serde(default = "default_ob_body_min_pct")]
    pub ob_body_min_pct: f64,

    /// Active-zone distance filter in ATR. `None` disables it.
    #[serde(default = "default_ob_max_active_distance_atr")]
    pub ob_max_active_distance_atr: Option<f64>,

    // --- Breakers ------------------------------------------------------------

    /// Maximum OB age when a breaker is formed.
    #[serde(default = "default_breaker_max_ob_age_minutes")]
    pub breaker_max_ob_age_minutes: u32,

    /// Maximum pause between the sweep and the confirming BOS.
    #[serde(default = "default_breaker_max_sweep_delay_minutes")]
    pub breaker_max_sweep_delay_minutes: u32,

    /// Level tolerance matching the sweep to the OB.
    #[serde(default = "default_breaker_level_tolerance_pct")]
    pub breaker_level_tolerance_pct: f64,

    /// Minimum body share of the BOS candle.
    #[serde(default = "default_breaker_min_body_pct")]
    pub breaker_min_body_pct: f64,

    /// Minimum displacement between sweep and BOS in ATR.
    #[serde(default = "default_breaker_min_displacement_atr")]
    pub breaker_min_displacement_atr: f64,

    // --- FVG -----------------------------------------------------------------

    /// Minimum gap between candles in ATR.
    #[serde(default = "default_fvg_min_gap_atr")]
    pub fvg_min_gap_atr: f64,

    /// Minimum gap as a price fraction (0.0015 = 0.15%).
    #[serde(default = "default_fvg_min_gap_pct")]
    pub fvg_min_gap_pct: f64,

    /// Imbalance TTL, at most three days.
    #[serde(default = "default_fvg_max_age_minutes")]
    pub fvg_max_age_minutes: u32,

    // --- Zone selection (Cases D/E/F) ----------------------------------------

    /// A zone wider than this many ATR is treated as an area, not a zone,
    /// and dropped from active/POI. `None` disables the filter.
    #[serde(default = "default_max_zone_span_atr")]
    pub max_zone_span_atr: Option<f64>,

    /// IoU threshold above which same-group zones are merged, keeping the
    /// better one. `None` disables merging.
    #[serde(default = "default_zone_merge_iou_threshold")]
    pub zone_merge_iou_threshold: Option<f64>,

    /// Deterministic touch epsilon in absolute price units (not ATR), so
    /// offline audits replay identically.
    #[serde(default)]
    pub touch_epsilon: f64,

    // --- Execution (1m) ------------------------------------------------------

    /// Master switch for the 1m execution detector.
    #[serde(default = "default_true")]
    pub exec_enabled: bool,

    /// Execution timeframe, normally "1m".
    #[serde(default = "default_exec_tf")]
    pub exec_tf: String,

    /// In-play radius around POI/targets in ATR.
    #[serde(default = "default_exec_in_play_radius_atr")]
    pub exec_in_play_radius_atr: f64,

    /// If > 0, in_play must hold for this many 1m closes.
    #[serde(default)]
    pub exec_in_play_hold_bars: usize,

    /// If > 0, require a candle body of at least k*ATR.
    #[serde(default)]
    pub exec_impulse_atr_mul: f64,

    /// Pivot window for micro BOS/CHOCH.
    #[serde(default = "default_exec_micro_pivot_bars")]
    pub exec_micro_pivot_bars: usize,

    /// Hard cap on emitted events.
    #[serde(default = "default_exec_max_events")]
    pub exec_max_events: usize,

    // --- Liquidity bridge ----------------------------------------------------

    /// Allow low-confidence fallback nearest targets when no candidates
    /// exist, so the UI always has an object to render.
    #[serde(default = "default_true")]
    pub liquidity_nearest_fallback_enabled: bool,

    // --- Liquidity pools throttling ------------------------------------------

    /// Global cap over all pools in the liquidity state.
    #[serde(default = "default_pools_max_total")]
    pub liquidity_pools_max_total: usize,

    /// EQH/EQL: top-K clusters per side.
    #[serde(default = "default_eq_topk_per_side")]
    pub liquidity_eq_topk_per_side: usize,

    /// WICK_CLUSTER: top-K per side.
    #[serde(default = "default_wick_cluster_topk_per_side")]
    pub liquidity_wick_cluster_topk_per_side: usize,

    /// SFP: top-K per side.
    #[serde(default = "default_sfp_topk_per_side")]
    pub liquidity_sfp_topk_per_side: usize,

    /// Other types: top-K per (type, role, side) group.
    #[serde(default = "default_other_topk_per_group")]
    pub liquidity_other_topk_per_group: usize,

    // --- Wick-cluster tracker + noise filters (Case G) -----------------------

    /// Keep `cluster_id` stable across bars via closest-level matching.
    #[serde(default = "default_true")]
    pub liquidity_wick_cluster_track_enabled: bool,

    /// Level tolerance as a price fraction for the tracker match.
    #[serde(default = "default_wick_cluster_track_tol_pct")]
    pub liquidity_wick_cluster_track_tol_pct: f64,

    /// Maximum level drift in ATR for the tracker match.
    #[serde(default = "default_wick_cluster_track_max_abs_move_atr")]
    pub liquidity_wick_cluster_track_max_abs_move_atr: f64,

    /// Minimum cluster lifetime in bars (by first/last timestamps).
    #[serde(default = "default_wick_cluster_min_life_bars")]
    pub liquidity_wick_cluster_min_life_bars: u32,

    /// Minimum density: count / lookback bars.
    #[serde(default = "default_wick_cluster_min_density")]
    pub liquidity_wick_cluster_min_density: f64,

    /// Minimum amplitude: max_wick / ATR (when ATR is available).
    #[serde(default = "default_wick_cluster_min_amp_atr")]
    pub liquidity_wick_cluster_min_amp_atr: f64,

    /// Preview is not truth: on preview snapshots the noisy SFP/WICK_CLUSTER
    /// extras are skipped unless this is set.
    #[serde(default)]
    pub liquidity_preview_include_sfp_and_wicks: bool,
}

impl Default for SmcConfig {
    fn default() -> Self {
        // Deserializing an empty object applies every serde default in one
        // place, so the two default paths cannot drift apart.
        serde_json::from_str("{}").expect("empty SmcConfig must deserialize")
    }
}

impl SmcConfig {
    /// Load configuration from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read SMC config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse SMC config from {}", path.display()))?;
        info!(path = %path.display(), "SMC config loaded");
        Ok(config)
    }

    /// Persist to `path` atomically (write `.tmp` sibling, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content =
            serde_json::to_string_pretty(self).context("failed to serialise SMC config")?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;
        info!(path = %path.display(), "SMC config saved (atomic)");
        Ok(())
    }
}
