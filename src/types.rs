// =============================================================================
// Shared domain types for the SMC analysis engine
// =============================================================================
//
// Every record here is a plain serde-serialisable value: no interior
// mutability, no shared-owner graphs. Legs and events embed copies of their
// swings, so a serialized hint is self-contained. Enums serialize as their
// SCREAMING_SNAKE_CASE name strings — the wire form downstream consumers
// (UI, journal, QA tooling) key on.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::market_data::Frame;
use crate::serialize::{ts_ms, ts_ms_opt};
use crate::stage6::SmcSignal;

// =============================================================================
// Core enums
// =============================================================================

/// Direction of market structure in the SMC interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SmcTrend {
    Up,
    Down,
    Range,
    Unknown,
}

impl std::fmt::Display for SmcTrend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Up => write!(f, "UP"),
            Self::Down => write!(f, "DOWN"),
            Self::Range => write!(f, "RANGE"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Dealing-range state: inside the range or deviating beyond the EQ band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SmcRangeState {
    None,
    Inside,
    DevUp,
    DevDown,
}

impl std::fmt::Display for SmcRangeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "NONE"),
            Self::Inside => write!(f, "INSIDE"),
            Self::DevUp => write!(f, "DEV_UP"),
            Self::DevDown => write!(f, "DEV_DOWN"),
        }
    }
}

/// Zone/POI families surfaced in hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SmcZoneType {
    OrderBlock,
    Breaker,
    Imbalance,
    FairValueGap,
    LiquidityVoid,
    PremiumZone,
    DiscountZone,
    RangeExtreme,
    Custom,
}

impl SmcZoneType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::OrderBlock => "ORDER_BLOCK",
            Self::Breaker => "BREAKER",
            Self::Imbalance => "IMBALANCE",
            Self::FairValueGap => "FAIR_VALUE_GAP",
            Self::LiquidityVoid => "LIQUIDITY_VOID",
            Self::PremiumZone => "PREMIUM_ZONE",
            Self::DiscountZone => "DISCOUNT_ZONE",
            Self::RangeExtreme => "RANGE_EXTREME",
            Self::Custom => "CUSTOM",
        }
    }
}

/// Liquidity families available to downstream filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SmcLiquidityType {
    Eqh,
    Eql,
    Tlq,
    Slq,
    RangeExtreme,
    SessionHigh,
    SessionLow,
    Sfp,
    WickCluster,
    Other,
}

impl SmcLiquidityType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Eqh => "EQH",
            Self::Eql => "EQL",
            Self::Tlq => "TLQ",
            Self::Slq => "SLQ",
            Self::RangeExtreme => "RANGE_EXTREME",
            Self::SessionHigh => "SESSION_HIGH",
            Self::SessionLow => "SESSION_LOW",
            Self::Sfp => "SFP",
            Self::WickCluster => "WICK_CLUSTER",
            Self::Other => "OTHER",
        }
    }
}

/// Simplified AMD (Accumulation / Manipulation / Distribution) phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SmcAmdPhase {
    Accumulation,
    Manipulation,
    Distribution,
    Neutral,
}

/// Trade direction of an event, leg impulse or zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Long => "LONG",
            Self::Short => "SHORT",
        }
    }
}

/// Zone direction, which unlike [`Direction`] may be two-sided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ZoneDirection {
    Long,
    Short,
    Both,
}

impl ZoneDirection {
    pub fn matches(&self, side: Direction) -> bool {
        matches!(
            (self, side),
            (Self::Long, Direction::Long) | (Self::Short, Direction::Short) | (Self::Both, _)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Long => "LONG",
            Self::Short => "SHORT",
            Self::Both => "BOTH",
        }
    }
}

/// Trading bias derived from structure: last CHOCH direction, else trend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeBias {
    Long,
    Short,
    Neutral,
}

impl TradeBias {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Long => "LONG",
            Self::Short => "SHORT",
            Self::Neutral => "NEUTRAL",
        }
    }
}

impl std::fmt::Display for TradeBias {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Role relative to the current bias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Primary,
    Countertrend,
    Neutral,
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Primary => "PRIMARY",
            Self::Countertrend => "COUNTERTREND",
            Self::Neutral => "NEUTRAL",
        }
    }
}

/// How a zone should be entered, derived from the body share of its candle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryMode {
    #[serde(rename = "BODY_05")]
    Body05,
    #[serde(rename = "WICK_05")]
    Wick05,
    #[serde(rename = "BODY_TOUCH")]
    BodyTouch,
    #[serde(rename = "WICK_TOUCH")]
    WickTouch,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

/// Zone quality bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ZoneQuality {
    Strong,
    Medium,
    Weak,
    Unknown,
}

/// Bias recorded at zone creation time (may be unknown for stubs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BiasAtCreation {
    Long,
    Short,
    Neutral,
    Unknown,
}

impl From<TradeBias> for BiasAtCreation {
    fn from(bias: TradeBias) -> Self {
        match bias {
            TradeBias::Long => Self::Long,
            TradeBias::Short => Self::Short,
            TradeBias::Neutral => Self::Neutral,
        }
    }
}

/// Side of a price level (wick clusters, SFP, range extremes, sessions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LevelSide {
    High,
    Low,
}

impl LevelSide {
    pub fn name(&self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Low => "LOW",
        }
    }
}

/// Swing kind — a local extremum on highs or on lows.
pub type SwingKind = LevelSide;

/// Leg classification against the last same-kind extremum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LegLabel {
    Hh,
    Hl,
    Lh,
    Ll,
    Undefined,
}

impl LegLabel {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hh => "HH",
            Self::Hl => "HL",
            Self::Lh => "LH",
            Self::Ll => "LL",
            Self::Undefined => "UNDEFINED",
        }
    }
}

/// Structure event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StructureEventType {
    Bos,
    Choch,
}

impl StructureEventType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bos => "BOS",
            Self::Choch => "CHOCH",
        }
    }
}

/// Whether the snapshot was computed mid-bar (preview) or on a closed bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeKind {
    Preview,
    Close,
}

// =============================================================================
// Structure records
// =============================================================================

/// Local swing high/low on the primary timeframe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SmcSwing {
    pub index: usize,
    #[serde(with = "ts_ms")]
    pub time: i64,
    pub price: f64,
    pub kind: SwingKind,
    pub strength: u32,
}

/// Transition between two adjacent swings with an HH/HL/LH/LL label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmcLeg {
    pub from_swing: SmcSwing,
    pub to_swing: SmcSwing,
    pub label: LegLabel,
    /// Price of the last same-kind extremum the label was derived against.
    pub reference_price: Option<f64>,
}

impl SmcLeg {
    /// Deterministic leg identifier used in zone components/references.
    pub fn leg_id(&self) -> String {
        format!("leg_{}_{}", self.from_swing.index, self.to_swing.index)
    }

    pub fn amplitude(&self) -> f64 {
        (self.to_swing.price - self.from_swing.price).abs()
    }
}

/// Trading range with EQ level and deviation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmcRange {
    pub high: f64,
    pub low: f64,
    pub eq_level: f64,
    #[serde(with = "ts_ms")]
    pub start_time: i64,
    #[serde(with = "ts_ms_opt", default)]
    pub end_time: Option<i64>,
    pub state: SmcRangeState,
}

/// BOS / CHOCH structure event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmcStructureEvent {
    pub event_type: StructureEventType,
    pub direction: Direction,
    pub price_level: f64,
    #[serde(with = "ts_ms")]
    pub time: i64,
    pub source_leg: SmcLeg,
}

/// OTE (62–79% retracement) zone on the last qualifying impulse.
///
/// `role` gates usage: PRIMARY follows the bias, COUNTERTREND is diagnostic
/// only, NEUTRAL means structure has no expressed bias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmcOteZone {
    pub leg: SmcLeg,
    pub ote_min: f64,
    pub ote_max: f64,
    pub direction: Direction,
    pub role: Role,
}

/// Diagnostic block published alongside the structure state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructureMeta {
    pub bar_count: usize,
    pub cfg_min_swing: usize,
    pub cfg_min_range_bars: usize,
    pub bos_min_move_atr: f64,
    pub bos_min_move_pct: f64,
    pub leg_min_amplitude_atr: f64,
    pub ote_trend_only: bool,
    pub ote_max_active_per_side: usize,
    pub atr_period: Option<usize>,
    pub atr_available: bool,
    pub atr_last: Option<f64>,
    pub atr_median: Option<f64>,
    pub bias: Option<TradeBias>,
    #[serde(with = "ts_ms_opt", default)]
    pub last_choch_ts: Option<i64>,
    pub symbol: String,
    pub tf_input: String,
    #[serde(with = "ts_ms_opt", default)]
    pub snapshot_start_ts: Option<i64>,
    #[serde(with = "ts_ms_opt", default)]
    pub snapshot_end_ts: Option<i64>,
    #[serde(with = "crate::serialize::ts_ms_vec", default)]
    pub swing_times: Vec<i64>,
    pub events_retained_total: usize,
    pub events_recent_total: usize,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<String>,
}

/// Aggregated structure state: trend, swings, legs, events, range and OTE.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SmcStructureState {
    pub primary_tf: String,
    pub trend: SmcTrend,
    pub swings: Vec<SmcSwing>,
    pub legs: Vec<SmcLeg>,
    pub ranges: Vec<SmcRange>,
    pub active_range: Option<SmcRange>,
    pub range_state: SmcRangeState,
    pub events: Vec<SmcStructureEvent>,
    pub event_history: Vec<SmcStructureEvent>,
    pub ote_zones: Vec<SmcOteZone>,
    pub bias: TradeBias,
    pub meta: StructureMeta,
}

impl Default for SmcTrend {
    fn default() -> Self {
        Self::Unknown
    }
}

impl Default for SmcRangeState {
    fn default() -> Self {
        Self::None
    }
}

impl Default for TradeBias {
    fn default() -> Self {
        Self::Neutral
    }
}

// =============================================================================
// Liquidity records
// =============================================================================

/// Pool metadata. Only the fields relevant to a given pool kind are set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolMeta {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub side: Option<LevelSide>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cluster_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub level_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub session_tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cluster_id: Option<String>,
    #[serde(with = "ts_ms_opt", skip_serializing_if = "Option::is_none", default)]
    pub ref_ts: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub throttled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub throttled_cluster_size: Option<usize>,
}

/// Liquidity pool: a clustered level that attracts price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmcLiquidityPool {
    pub level: f64,
    pub liq_type: SmcLiquidityType,
    pub strength: f64,
    pub n_touches: u32,
    #[serde(with = "ts_ms_opt", default)]
    pub first_time: Option<i64>,
    #[serde(with = "ts_ms_opt", default)]
    pub last_time: Option<i64>,
    pub role: Role,
    pub source_swings: Vec<SmcSwing>,
    pub meta: PoolMeta,
}

/// SFP event: a wick beyond a reference level with a close back across.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SfpEvent {
    pub level: f64,
    pub side: LevelSide,
    #[serde(with = "ts_ms")]
    pub time: i64,
    pub close: f64,
    pub source: String,
}

/// Wick cluster: repeated wick rejections near a level, tracked across
/// snapshots with a stable `cluster_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WickCluster {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cluster_id: Option<String>,
    pub level: f64,
    pub side: LevelSide,
    pub count: u32,
    pub max_wick: f64,
    pub source: String,
    #[serde(with = "ts_ms_opt", default)]
    pub first_ts: Option<i64>,
    #[serde(with = "ts_ms_opt", default)]
    pub last_ts: Option<i64>,
}

/// Magnet metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MagnetMeta {
    pub pool_count: usize,
    pub source_types: Vec<String>,
    pub symbol: String,
    pub bias: TradeBias,
}

/// Magnet zone aggregating nearby liquidity pools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmcLiquidityMagnet {
    pub price_min: f64,
    pub price_max: f64,
    pub center: f64,
    pub liq_type: SmcLiquidityType,
    pub role: Role,
    pub pools: Vec<SmcLiquidityPool>,
    pub meta: MagnetMeta,
}

/// Target role: internal (primary-TF magnets) vs external (HTF levels).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetRole {
    Internal,
    External,
}

/// Side of a target relative to the reference price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetSide {
    Above,
    Below,
}

/// A liquidity target the price can be expected to travel toward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidityTarget {
    pub role: TargetRole,
    pub tf: String,
    pub side: TargetSide,
    pub price: f64,
    #[serde(rename = "type")]
    pub kind: String,
    pub strength: f64,
    pub reason: Vec<String>,
}

/// Liquidity meta block: SFP/wick telemetry plus optional targets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiquidityMeta {
    pub bar_count: usize,
    pub symbol: String,
    pub primary_tf: String,
    pub pool_count: usize,
    pub magnet_count: usize,
    pub bias: TradeBias,
    pub sfp_events: Vec<SfpEvent>,
    pub wick_clusters: Vec<WickCluster>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub amd_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub liquidity_targets: Option<Vec<LiquidityTarget>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub liquidity_targets_reason: Option<Vec<String>>,
}

/// Summary of pools, magnets and the AMD phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SmcLiquidityState {
    pub pools: Vec<SmcLiquidityPool>,
    pub magnets: Vec<SmcLiquidityMagnet>,
    pub amd_phase: Option<SmcAmdPhase>,
    pub meta: LiquidityMeta,
}

// =============================================================================
// Zone records
// =============================================================================

/// Zone metadata. Detector-specific fields are optional and skipped when
/// absent so OB, breaker and FVG zones stay readable on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZoneMeta {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub body_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub wick_top_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub wick_bottom_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub has_bos: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub bar_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub amplitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub gap: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub gap_atr: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub gap_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub age_min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source_idx: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub merged_from: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub derived_from_ob_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sweep_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub break_event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub displacement_atr: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub filled_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub poi_type: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub why: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub score: Option<f64>,
}

/// Zone/POI returned for downstream filters and the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmcZone {
    pub zone_type: SmcZoneType,
    pub price_min: f64,
    pub price_max: f64,
    pub timeframe: String,
    #[serde(with = "ts_ms")]
    pub origin_time: i64,
    pub direction: ZoneDirection,
    pub role: Role,
    pub strength: f64,
    pub confidence: f64,
    pub components: Vec<String>,
    pub zone_id: String,
    pub entry_mode: EntryMode,
    pub quality: ZoneQuality,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reference_leg_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reference_event_id: Option<String>,
    pub bias_at_creation: BiasAtCreation,
    pub meta: ZoneMeta,
}

impl SmcZone {
    pub fn center(&self) -> f64 {
        (self.price_min + self.price_max) / 2.0
    }

    pub fn span(&self) -> f64 {
        (self.price_max - self.price_min).abs()
    }

    /// Composite score used by merge and POI selection.
    pub fn composite_score(&self) -> f64 {
        self.confidence * 0.7 + self.strength * 0.3
    }
}

/// Flat POI summary (one line per active POI) for the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivePoi {
    #[serde(rename = "type")]
    pub poi_type: String,
    pub zone_id: String,
    pub direction: ZoneDirection,
    pub price_min: f64,
    pub price_max: f64,
    pub filled_pct: Option<f64>,
    pub score: Option<f64>,
    pub why: Vec<String>,
}

/// Zone merge statistics (Case E).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeStats {
    pub merged_losers: usize,
    pub groups: usize,
}

/// POI counters published for QA.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoiCounters {
    pub poi_candidates: usize,
    pub poi_active: usize,
    pub poi_archived: usize,
    pub poi_max_per_side: usize,
    pub poi_dropped_due_cap: usize,
    pub poi_archived_invalidated: usize,
    pub poi_archived_filled: usize,
    pub poi_archived_score: usize,
    pub poi_archived_wide_span_atr: usize,
}

/// Zone TTL parameters the journal's removal classifier reads back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FvgParams {
    pub fvg_max_age_minutes: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BreakerParams {
    pub breaker_max_ob_age_minutes: u32,
    pub breaker_max_sweep_delay_minutes: u32,
}

/// Zones meta: thresholds, merge stats and POI counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZonesMeta {
    pub bar_count: usize,
    pub zone_count: usize,
    pub active_count: usize,
    pub poi_count: usize,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub max_zone_span_atr: Option<f64>,
    pub zones_filtered_by_span_atr: usize,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub active_zone_distance_threshold_atr: Option<f64>,
    pub touch_epsilon: f64,
    pub merge: MergeStats,
    pub poi: PoiCounters,
    pub active_poi: Vec<ActivePoi>,
    pub fvg_params: FvgParams,
    pub breaker_params: BreakerParams,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub atr_last: Option<f64>,
}

/// Summary of all detected zones and the selected active/POI subsets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SmcZonesState {
    pub zones: Vec<SmcZone>,
    pub active_zones: Vec<SmcZone>,
    pub poi_zones: Vec<SmcZone>,
    pub meta: ZonesMeta,
}

// =============================================================================
// Execution records
// =============================================================================

/// Micro-event kinds emitted by the 1m execution detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecEventType {
    Sweep,
    MicroBos,
    MicroChoch,
    RetestOk,
}

/// What the in-play gate matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecRef {
    Poi,
    Target,
    Unknown,
}

/// Execution event metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecEventMeta {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sweep_side: Option<LevelSide>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub context_ref: Option<ExecRef>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pivot_window: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pivot_kind: Option<LevelSide>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub bias: Option<TradeBias>,
}

/// A 1m execution micro-event (SWEEP / MICRO_BOS / MICRO_CHOCH / RETEST_OK).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmcExecutionEvent {
    pub event_type: ExecEventType,
    pub direction: Direction,
    #[serde(with = "ts_ms")]
    pub time: i64,
    pub price: f64,
    pub level: f64,
    #[serde(rename = "ref")]
    pub ref_kind: ExecRef,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub poi_zone_id: Option<String>,
    pub meta: ExecEventMeta,
}

/// What the in-play gate matched: a POI edge-band or a target level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "ref", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InPlayRef {
    Poi {
        poi_zone_id: String,
        poi_min: f64,
        poi_max: f64,
    },
    Target {
        level: f64,
    },
    None,
}

/// Execution meta block: gate telemetry and degenerate-state reasons.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMeta {
    pub exec_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub exec_tf: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub exec_bars: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub atr_ref: Option<f64>,
    pub in_play: bool,
    pub in_play_now: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub in_play_ref: Option<InPlayRef>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub radius: Option<f64>,
    pub poi_count: usize,
    pub targets_count: usize,
    pub hold_bars: usize,
    pub impulse_atr_mul: f64,
    pub micro_pivot_bars: usize,
}

/// Stage5 execution state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SmcExecutionState {
    pub execution_events: Vec<SmcExecutionEvent>,
    pub meta: ExecutionMeta,
}

// =============================================================================
// Input & hint
// =============================================================================

/// Per-session extremes carried in the caller context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionLevels {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub high: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub low: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub is_active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tf: Option<String>,
}

/// HTF trend context entry (e.g. `trend_context_4h`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrendContext {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub bias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub trend: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub direction: Option<String>,
}

/// Free-form caller context with the recognized keys typed out. Unknown
/// keys are ignored on deserialization (forward-compat).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmcContext {
    pub trend_context_4h: Option<TrendContext>,
    pub trend_context_h1: Option<TrendContext>,
    pub pdh: Option<f64>,
    pub pdl: Option<f64>,
    pub pwh: Option<f64>,
    pub pwl: Option<f64>,
    pub session_tag: Option<String>,
    pub smc_session_tag: Option<String>,
    pub smc_session_start_ms: Option<i64>,
    pub smc_session_end_ms: Option<i64>,
    pub smc_session_high: Option<f64>,
    pub smc_session_low: Option<f64>,
    pub smc_session_tf: Option<String>,
    pub smc_sessions: Option<BTreeMap<String, SessionLevels>>,
    pub smc_compute_kind: Option<ComputeKind>,
    pub prev_wick_clusters: Option<Vec<WickCluster>>,
    pub tick: Option<f64>,
    pub atr_last: Option<f64>,
    /// Anything the caller attached that the core does not interpret.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Input snapshot for one pipeline call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SmcInput {
    pub symbol: String,
    pub tf_primary: String,
    pub ohlc_by_tf: BTreeMap<String, Frame>,
    #[serde(default)]
    pub context: SmcContext,
}

impl SmcInput {
    pub fn primary_frame(&self) -> Option<&Frame> {
        self.ohlc_by_tf.get(&self.tf_primary)
    }

    pub fn frame(&self, tf: &str) -> Option<&Frame> {
        self.ohlc_by_tf.get(tf)
    }
}

/// Hint meta: snapshot context the UI and journal key on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HintMeta {
    pub snapshot_tf: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub smc_compute_kind: Option<ComputeKind>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub session_tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub smc_session_tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub smc_session_start_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub smc_session_end_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub smc_session_high: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub smc_session_low: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub smc_session_tf: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub smc_sessions: Option<BTreeMap<String, SessionLevels>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tick: Option<f64>,
}

/// Final result of one pipeline call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SmcHint {
    pub structure: Option<SmcStructureState>,
    pub liquidity: Option<SmcLiquidityState>,
    pub zones: Option<SmcZonesState>,
    pub signals: Vec<SmcSignal>,
    pub execution: Option<SmcExecutionState>,
    pub meta: HintMeta,
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enums_serialize_as_screaming_names() {
        assert_eq!(serde_json::to_string(&SmcTrend::Up).unwrap(), "\"UP\"");
        assert_eq!(
            serde_json::to_string(&SmcRangeState::DevUp).unwrap(),
            "\"DEV_UP\""
        );
        assert_eq!(
            serde_json::to_string(&SmcLiquidityType::WickCluster).unwrap(),
            "\"WICK_CLUSTER\""
        );
        assert_eq!(
            serde_json::to_string(&SmcZoneType::OrderBlock).unwrap(),
            "\"ORDER_BLOCK\""
        );
        assert_eq!(
            serde_json::to_string(&EntryMode::Body05).unwrap(),
            "\"BODY_05\""
        );
        assert_eq!(
            serde_json::to_string(&ComputeKind::Preview).unwrap(),
            "\"preview\""
        );
    }

    #[test]
    fn leg_id_is_deterministic() {
        let swing = |idx: usize, price: f64, kind: SwingKind| SmcSwing {
            index: idx,
            time: 0,
            price,
            kind,
            strength: 2,
        };
        let leg = SmcLeg {
            from_swing: swing(3, 101.0, LevelSide::High),
            to_swing: swing(8, 99.0, LevelSide::Low),
            label: LegLabel::Ll,
            reference_price: Some(100.0),
        };
        assert_eq!(leg.leg_id(), "leg_3_8");
        assert!((leg.amplitude() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn swing_time_serializes_as_rfc3339() {
        let swing = SmcSwing {
            index: 0,
            time: 1_704_067_200_000,
            price: 1.0,
            kind: LevelSide::High,
            strength: 1,
        };
        let v = serde_json::to_value(&swing).unwrap();
        assert_eq!(v["time"], "2024-01-01T00:00:00.000Z");
        let back: SmcSwing = serde_json::from_value(v).unwrap();
        assert_eq!(back.time, 1_704_067_200_000);
    }

    #[test]
    fn context_ignores_unknown_keys() {
        let ctx: SmcContext = serde_json::from_str(
            r#"{"pdh": 110.5, "made_up_key": {"nested": true}, "smc_compute_kind": "close"}"#,
        )
        .unwrap();
        assert_eq!(ctx.pdh, Some(110.5));
        assert_eq!(ctx.smc_compute_kind, Some(ComputeKind::Close));
        assert!(ctx.extra.contains_key("made_up_key"));
    }

    #[test]
    fn zone_composite_score() {
        let zone = SmcZone {
            zone_type: SmcZoneType::OrderBlock,
            price_min: 98.0,
            price_max: 99.0,
            timeframe: "5m".into(),
            origin_time: 0,
            direction: ZoneDirection::Long,
            role: Role::Primary,
            strength: 1.0,
            confidence: 0.5,
            components: vec![],
            zone_id: "z1".into(),
            entry_mode: EntryMode::Unknown,
            quality: ZoneQuality::Unknown,
            reference_leg_id: None,
            reference_event_id: None,
            bias_at_creation: BiasAtCreation::Unknown,
            meta: ZoneMeta::default(),
        };
        assert!((zone.composite_score() - 0.65).abs() < 1e-12);
        assert!((zone.center() - 98.5).abs() < 1e-12);
    }
}
