// =============================================================================
// SMC lifecycle journal — created/removed/touched/merged diffing per symbol
// =============================================================================
//
// A stateful diff over consecutive hints for one (symbol, timeframe):
//   - created for new (entity, id) pairs; magnets also emit merged with
//     their member pool ids;
//   - removed with a classified reason and a finer reason_sub; on preview
//     snapshots removals are never finalized, and on close a grace of
//     `removed_confirm_close_steps` missing steps applies first;
//   - touched at most once per lifetime when the bar first intersects the
//     entity, plus a single possible late touch shortly after removal;
//   - lifetime histograms and counters through the `MetricsSink`.
//
// One journal instance owns one (symbol, tf) stream; snapshots must arrive
// in non-decreasing close-time order.

pub mod frame_record;
pub mod ids;
pub mod writer;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::metrics::{MetricsSink, NoopMetrics};
use crate::serialize::ms_to_rfc3339;
use crate::types::{ComputeKind, SmcHint, SmcRangeState, TradeBias};

pub use frame_record::{build_frame_record, FrameRecord};
pub use ids::{magnet_id, pool_id, resolve_tick};
pub use writer::{JsonlFramesWriter, JsonlJournalWriter};

/// Entity kinds tracked by the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalEntity {
    Zone,
    Pool,
    Magnet,
}

impl JournalEntity {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Zone => "zone",
            Self::Pool => "pool",
            Self::Magnet => "magnet",
        }
    }
}

/// Minimal bar description for touch detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BarSnapshot {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub close_time_ms: i64,
    pub complete: bool,
}

/// Event context: snapshot facts plus event-specific fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JournalCtx {
    pub bar_complete: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub compute_kind: Option<ComputeKind>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub primary_close_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub atr_last: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub range_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub bias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub prev_bias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub prev_range_state: Option<String>,
    pub touch_epsilon: f64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason_sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub lifetime_bars: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub touch_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub late: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub removed_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub removed_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub removed_reason_sub: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub merged_from: Vec<String>,
}

/// One JSONL journal line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEventRecord {
    pub ts: String,
    pub symbol: String,
    pub tf: String,
    pub entity: String,
    pub event: String,
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub direction: String,
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub price_min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub price_max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub level: Option<f64>,
    pub ctx: JournalCtx,
}

#[derive(Debug, Clone)]
struct EntityState {
    entity: JournalEntity,
    id: String,
    entity_type: String,
    direction: String,
    role: String,
    price_min: Option<f64>,
    price_max: Option<f64>,
    level: Option<f64>,
    created_step: u64,
    was_touched: bool,
}

#[derive(Debug, Clone)]
struct SnapshotCtx {
    bar_complete: bool,
    compute_kind: Option<ComputeKind>,
    primary_close_ms: Option<i64>,
    atr_last: Option<f64>,
    range_state: Option<SmcRangeState>,
    bias: Option<TradeBias>,
    last_price: Option<f64>,
    poi_dropped_due_cap: usize,
    active_zone_distance_threshold_atr: Option<f64>,
    touch_epsilon: f64,
    prev_bias: Option<String>,
    prev_range_state: Option<String>,
}

impl SnapshotCtx {
    fn to_journal_ctx(&self) -> JournalCtx {
        JournalCtx {
            bar_complete: self.bar_complete,
            compute_kind: self.compute_kind,
            primary_close_ms: self.primary_close_ms,
            atr_last: self.atr_last,
            range_state: self.range_state.map(|rs| rs.to_string()),
            bias: self.bias.map(|b| b.name().to_string()),
            last_price: self.last_price,
            prev_bias: self.prev_bias.clone(),
            prev_range_state: self.prev_range_state.clone(),
            touch_epsilon: self.touch_epsilon,
            ..JournalCtx::default()
        }
    }
}

type EntityKey = (JournalEntity, String);

/// Stateful diff + journal generator for one symbol/timeframe.
pub struct SmcLifecycleJournal {
    symbol: String,
    tf: String,
    metrics: Box<dyn MetricsSink>,
    /// Preview is not truth: removals finalize only on close, after this
    /// many consecutive missing close steps.
    removed_confirm_close_steps: u32,
    step: u64,
    prev: HashMap<EntityKey, EntityState>,
    removed_cache: HashMap<EntityKey, (EntityState, String, String, i64)>,
    missing_close_steps: HashMap<EntityKey, u32>,
    prev_poi_dropped_due_cap: usize,
    prev_bias: Option<String>,
    prev_range_state: Option<String>,
}

impl SmcLifecycleJournal {
    pub fn new(symbol: impl Into<String>, tf: impl Into<String>) -> Self {
        Self::with_metrics(symbol, tf, Box::new(NoopMetrics))
    }

    pub fn with_metrics(
        symbol: impl Into<String>,
        tf: impl Into<String>,
        metrics: Box<dyn MetricsSink>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            tf: tf.into(),
            metrics,
            removed_confirm_close_steps: 1,
            step: 0,
            prev: HashMap::new(),
            removed_cache: HashMap::new(),
            missing_close_steps: HashMap::new(),
            prev_poi_dropped_due_cap: 0,
            prev_bias: None,
            prev_range_state: None,
        }
    }

    /// Configure the missing-for-N-close-steps grace before a removal is
    /// finalized.
    pub fn set_removed_confirm_close_steps(&mut self, steps: u32) {
        self.removed_confirm_close_steps = steps.max(1);
    }

    /// Process one hint and return the journal events for this step.
    pub fn process_snapshot(
        &mut self,
        hint: &SmcHint,
        now_ms: i64,
        bar: Option<&BarSnapshot>,
        compute_kind: Option<ComputeKind>,
        primary_close_ms: Option<i64>,
    ) -> Vec<JournalEventRecord> {
        self.step += 1;

        let (cur, ctx) = self.extract_entities(hint, bar, compute_kind, primary_close_ms);
        let mut events: Vec<JournalEventRecord> = Vec::new();

        let mut created_keys: Vec<EntityKey> = cur
            .keys()
            .filter(|k| !self.prev.contains_key(*k))
            .cloned()
            .collect();
        created_keys.sort();

        let is_preview = compute_kind == Some(ComputeKind::Preview);
        let mut removed_keys: Vec<EntityKey> = if is_preview {
            Vec::new()
        } else {
            self.prev
                .keys()
                .filter(|k| !cur.contains_key(*k))
                .cloned()
                .collect()
        };
        removed_keys.sort();

        // 1) created (+ merged for magnets)
        for key in created_keys {
            let mut state = cur.get(&key).expect("created key is current").clone();
            state.created_step = self.step;
            events.push(self.event_record(&state, "created", now_ms, ctx.to_journal_ctx()));
            self.metrics.inc_created(state.entity.name());

            if state.entity == JournalEntity::Magnet {
                let merged_from = self.extract_magnet_pool_ids(hint, &state.id);
                if !merged_from.is_empty() {
                    let mut merged_ctx = ctx.to_journal_ctx();
                    merged_ctx.merged_from = merged_from;
                    events.push(self.event_record(&state, "merged", now_ms, merged_ctx));
                    self.metrics.inc_merged(state.entity.name());
                }
            }
            self.prev.insert(key, state);
        }

        // Reappearing keys reset their missing counter.
        self.missing_close_steps.retain(|key, _| !cur.contains_key(key));

        // 2) removed (grace applies on close only)
        let confirm_steps = self.removed_confirm_close_steps.max(1);
        for key in removed_keys.drain(..) {
            let state = match self.prev.get(&key) {
                Some(state) => state.clone(),
                None => continue,
            };

            if confirm_steps > 1 && !is_preview {
                let missing = self.missing_close_steps.get(&key).copied().unwrap_or(0) + 1;
                if missing < confirm_steps {
                    self.missing_close_steps.insert(key, missing);
                    continue;
                }
                self.missing_close_steps.remove(&key);
            }

            let reason = self.classify_removed_reason(&state, hint, &ctx);
            let reason_sub = self.classify_removed_reason_sub(&state, hint, &ctx, &reason);
            let lifetime_bars = (self.step.saturating_sub(state.created_step)) as u32;
            self.metrics
                .observe_lifetime_bars(state.entity.name(), lifetime_bars);
            self.metrics.inc_removed(state.entity.name(), &reason);

            self.removed_cache
                .insert(key.clone(), (state.clone(), reason.clone(), reason_sub.clone(), now_ms));

            let mut removed_ctx = ctx.to_journal_ctx();
            removed_ctx.reason = Some(reason);
            removed_ctx.reason_sub = Some(reason_sub);
            removed_ctx.lifetime_bars = Some(lifetime_bars);
            events.push(self.event_record(&state, "removed", now_ms, removed_ctx));
            self.prev.remove(&key);
        }

        // 3) touched for surviving entities
        let mut surviving: Vec<EntityKey> = cur
            .keys()
            .filter(|k| self.prev.contains_key(*k))
            .cloned()
            .collect();
        surviving.sort();
        for key in surviving {
            let state = self.prev.get_mut(&key).expect("surviving key");
            if let Some(bar) = bar {
                if !state.was_touched {
                    if let Some(touch_type) = entity_touch(state, bar, ctx.touch_epsilon) {
                        state.was_touched = true;
                        let snapshot = state.clone();
                        self.metrics.inc_touched(snapshot.entity.name(), false);
                        let mut touch_ctx = ctx.to_journal_ctx();
                        touch_ctx.touch_type = Some(touch_type.to_string());
                        touch_ctx.late = Some(false);
                        events.push(self.event_record(&snapshot, "touched", now_ms, touch_ctx));
                    }
                }
            }
        }

        // 4) late touches after removal
        if let Some(bar) = bar {
            events.extend(self.check_late_touches(bar, now_ms, &ctx));
        }

        // 5) carry context forward
        self.prev_poi_dropped_due_cap = ctx.poi_dropped_due_cap;
        self.prev_bias = ctx.bias.map(|b| b.name().to_string());
        self.prev_range_state = ctx.range_state.map(|rs| rs.to_string());

        debug!(
            symbol = %self.symbol,
            tf = %self.tf,
            step = self.step,
            events = events.len(),
            tracked = self.prev.len(),
            "journal snapshot processed"
        );

        events
    }

    fn check_late_touches(
        &mut self,
        bar: &BarSnapshot,
        now_ms: i64,
        ctx: &SnapshotCtx,
    ) -> Vec<JournalEventRecord> {
        let mut events = Vec::new();
        let mut emitted: Vec<EntityKey> = Vec::new();

        let mut keys: Vec<EntityKey> = self.removed_cache.keys().cloned().collect();
        keys.sort();
        for key in keys {
            let (state, reason, reason_sub, removed_ms) =
                self.removed_cache.get(&key).expect("cached key").clone();
            let touch_type = match entity_touch(&state, bar, ctx.touch_epsilon) {
                Some(touch_type) => touch_type,
                None => continue,
            };
            let mut late_ctx = ctx.to_journal_ctx();
            late_ctx.touch_type = Some(touch_type.to_string());
            late_ctx.late = Some(true);
            late_ctx.removed_ms = Some(removed_ms);
            late_ctx.removed_reason = Some(reason);
            late_ctx.removed_reason_sub = Some(reason_sub);
            events.push(self.event_record(&state, "touched", now_ms, late_ctx));
            self.metrics.inc_touched(state.entity.name(), true);
            emitted.push(key);
        }
        // One late touch per removed entity; drop emitted entries.
        for key in emitted {
            self.removed_cache.remove(&key);
        }
        events
    }

    fn extract_entities(
        &self,
        hint: &SmcHint,
        bar: Option<&BarSnapshot>,
        compute_kind: Option<ComputeKind>,
        primary_close_ms: Option<i64>,
    ) -> (HashMap<EntityKey, EntityState>, SnapshotCtx) {
        let mut ctx = SnapshotCtx {
            bar_complete: bar.map_or(true, |b| b.complete),
            compute_kind,
            primary_close_ms,
            atr_last: None,
            range_state: None,
            bias: None,
            last_price: bar.map(|b| b.close),
            poi_dropped_due_cap: 0,
            active_zone_distance_threshold_atr: None,
            touch_epsilon: 0.0,
            prev_bias: self.prev_bias.clone(),
            prev_range_state: self.prev_range_state.clone(),
        };

        if let Some(structure) = &hint.structure {
            ctx.bias = Some(structure.bias);
            ctx.range_state = Some(structure.range_state);
            ctx.atr_last = structure.meta.atr_last;
        }
        if let Some(zones) = &hint.zones {
            ctx.active_zone_distance_threshold_atr = zones.meta.active_zone_distance_threshold_atr;
            ctx.touch_epsilon = zones.meta.touch_epsilon;
            ctx.poi_dropped_due_cap = zones.meta.poi.poi_dropped_due_cap;
        }

        let mut out: HashMap<EntityKey, EntityState> = HashMap::new();

        if let Some(zones) = &hint.zones {
            for zone in &zones.zones {
                if zone.zone_id.is_empty() {
                    continue;
                }
                out.insert(
                    (JournalEntity::Zone, zone.zone_id.clone()),
                    EntityState {
                        entity: JournalEntity::Zone,
                        id: zone.zone_id.clone(),
                        entity_type: zone.zone_type.name().to_string(),
                        direction: zone.direction.name().to_string(),
                        role: zone.role.name().to_string(),
                        price_min: Some(zone.price_min),
                        price_max: Some(zone.price_max),
                        level: None,
                        created_step: self.step,
                        was_touched: false,
                    },
                );
            }
        }

        if let Some(liquidity) = &hint.liquidity {
            for pool in &liquidity.pools {
                let id = pool_id(pool);
                out.insert(
                    (JournalEntity::Pool, id.clone()),
                    EntityState {
                        entity: JournalEntity::Pool,
                        id,
                        entity_type: pool.liq_type.name().to_string(),
                        direction: pool
                            .meta
                            .side
                            .map_or("UNKNOWN".to_string(), |s| s.name().to_string()),
                        role: pool.role.name().to_string(),
                        price_min: None,
                        price_max: None,
                        level: Some(pool.level),
                        created_step: self.step,
                        was_touched: false,
                    },
                );
            }
            for magnet in &liquidity.magnets {
                let id = magnet_id(magnet);
                out.insert(
                    (JournalEntity::Magnet, id.clone()),
                    EntityState {
                        entity: JournalEntity::Magnet,
                        id,
                        entity_type: magnet.liq_type.name().to_string(),
                        direction: "UNKNOWN".to_string(),
                        role: magnet.role.name().to_string(),
                        price_min: Some(magnet.price_min),
                        price_max: Some(magnet.price_max),
                        level: None,
                        created_step: self.step,
                        was_touched: false,
                    },
                );
            }
        }

        (out, ctx)
    }

    fn extract_magnet_pool_ids(&self, hint: &SmcHint, target_magnet_id: &str) -> Vec<String> {
        let liquidity = match &hint.liquidity {
            Some(liquidity) => liquidity,
            None => return Vec::new(),
        };
        for magnet in &liquidity.magnets {
            if magnet_id(magnet) == target_magnet_id {
                return magnet.pools.iter().map(pool_id).collect();
            }
        }
        Vec::new()
    }

    fn classify_removed_reason(
        &self,
        state: &EntityState,
        hint: &SmcHint,
        ctx: &SnapshotCtx,
    ) -> String {
        // 1) replaced_by_merge: someone in the current hint references it.
        if collect_merged_from_ids(hint).iter().any(|id| id == &state.id) {
            return "replaced_by_merge".to_string();
        }

        // 2) expired_ttl for zones with a configured max age.
        if state.entity == JournalEntity::Zone {
            if let Some(max_age_min) = max_age_minutes_for_zone(hint, &state.entity_type) {
                let tf_min = tf_minutes(&self.tf);
                let age_by_bars_min =
                    self.step.saturating_sub(state.created_step) as u32 * tf_min;
                if age_by_bars_min >= max_age_min {
                    return "expired_ttl".to_string();
                }
            }
        }

        // 3) evicted_cap: the POI drop counter grew this step.
        if ctx.poi_dropped_due_cap > self.prev_poi_dropped_due_cap {
            return "evicted_cap".to_string();
        }

        // 4) dropped_distance: the entity ended far from price in ATR.
        if let (Some(atr), Some(last_price), Some(price_min), Some(price_max)) = (
            ctx.atr_last.filter(|a| *a > 0.0),
            ctx.last_price,
            state.price_min,
            state.price_max,
        ) {
            let center = 0.5 * (price_min + price_max);
            let dist_atr = (center - last_price).abs() / atr;
            let threshold = ctx.active_zone_distance_threshold_atr.unwrap_or(15.0);
            if dist_atr > threshold {
                return "dropped_distance".to_string();
            }
        }

        "invalidated_rule".to_string()
    }

    fn classify_removed_reason_sub(
        &self,
        state: &EntityState,
        hint: &SmcHint,
        ctx: &SnapshotCtx,
        reason: &str,
    ) -> String {
        match reason {
            "replaced_by_merge" => return "merged".to_string(),
            "expired_ttl" => return "ttl_expired".to_string(),
            "evicted_cap" => return "cap_evicted".to_string(),
            "dropped_distance" => return "distance_drop".to_string(),
            _ => {}
        }

        // invalidated_rule: look for a context flip first.
        let cur_bias = ctx.bias.map(|b| b.name().to_string());
        let cur_rs = ctx.range_state.map(|rs| rs.to_string());
        let bias_flip = matches!(
            (&ctx.prev_bias, &cur_bias),
            (Some(prev), Some(cur)) if prev != cur
        );
        let rs_flip = matches!(
            (&ctx.prev_range_state, &cur_rs),
            (Some(prev), Some(cur)) if prev != cur
        );
        if bias_flip || rs_flip {
            return "context_flip".to_string();
        }

        if state.entity == JournalEntity::Pool {
            return self.pool_reason_sub(state, hint, ctx);
        }

        // Zones/magnets: price position at removal.
        if let (Some(last_price), Some(price_min), Some(price_max)) =
            (ctx.last_price, state.price_min, state.price_max)
        {
            if price_min <= last_price && last_price <= price_max {
                return "price_inside_at_remove".to_string();
            }
            if state.direction.contains("LONG") && last_price < price_min {
                return "price_invalidated".to_string();
            }
            if state.direction.contains("SHORT") && last_price > price_max {
                return "price_invalidated".to_string();
            }
        }

        "unknown".to_string()
    }

    /// Pool churn taxonomy: flicker, level near price, time-window
    /// rebucketing, level shifts and vanished kinds.
    fn pool_reason_sub(&self, state: &EntityState, hint: &SmcHint, ctx: &SnapshotCtx) -> String {
        let life_bars = self.step.saturating_sub(state.created_step);
        if state.entity_type.contains("WICK_CLUSTER") && life_bars <= 2 {
            return "flicker_short_lived".to_string();
        }

        let tick = resolve_tick(hint);
        let tol = tick
            .filter(|t| *t > 0.0)
            .map(|t| t * 2.0)
            .or_else(|| ctx.atr_last.filter(|a| *a > 0.0).map(|a| a * 0.002));

        if let (Some(tol), Some(last_price), Some(level)) = (tol, ctx.last_price, state.level) {
            if (last_price - level).abs() <= tol {
                return "price_near_level_at_remove".to_string();
            }
        }

        let prev_parts = ids::parse_pool_id(&state.id);
        let lvl_tol = tick
            .filter(|t| *t > 0.0)
            .map(|t| t * 3.0)
            .or_else(|| ctx.atr_last.filter(|a| *a > 0.0).map(|a| a * 0.002));

        let pools = hint
            .liquidity
            .as_ref()
            .map(|l| l.pools.as_slice())
            .unwrap_or(&[]);
        if let (Some(level), Some(lvl_tol)) = (state.level, lvl_tol) {
            let mut found_same_kind = false;
            for pool in pools {
                if pool.liq_type.name() != state.entity_type || pool.role.name() != state.role {
                    continue;
                }
                found_same_kind = true;
                if (pool.level - level).abs() > lvl_tol {
                    continue;
                }

                if let Some(parts) = &prev_parts {
                    let first = pool.first_time.map_or(String::new(), |v| v.to_string());
                    let last = pool.last_time.map_or(String::new(), |v| v.to_string());
                    if first == parts.first && last != parts.last {
                        return "rollover_last_time".to_string();
                    }
                    if first != parts.first && last == parts.last {
                        return "rollover_first_time".to_string();
                    }
                    if first != parts.first || last != parts.last {
                        return "rebucket_time_window".to_string();
                    }
                }
                return "level_shift".to_string();
            }
            if found_same_kind {
                return "vanished_same_type_role".to_string();
            }
        }

        "unknown".to_string()
    }

    fn event_record(
        &self,
        state: &EntityState,
        event: &str,
        now_ms: i64,
        ctx: JournalCtx,
    ) -> JournalEventRecord {
        JournalEventRecord {
            ts: ms_to_rfc3339(now_ms),
            symbol: self.symbol.clone(),
            tf: self.tf.clone(),
            entity: state.entity.name().to_string(),
            event: event.to_string(),
            id: state.id.clone(),
            entity_type: state.entity_type.clone(),
            direction: state.direction.clone(),
            role: state.role.clone(),
            price_min: state.price_min,
            price_max: state.price_max,
            level: state.level,
            ctx,
        }
    }
}

/// Deterministic touch (Case F): zones/magnets intersect [min−eps, max+eps]
/// with wick → body → close refinement; pools need the level inside
/// [low, high].
fn entity_touch(state: &EntityState, bar: &BarSnapshot, eps: f64) -> Option<&'static str> {
    match state.entity {
        JournalEntity::Zone | JournalEntity::Magnet => {
            let (price_min, price_max) = (state.price_min?, state.price_max?);
            let e = eps.max(0.0);
            let pmin = price_min - e;
            let pmax = price_max + e;
            if bar.low <= pmax && bar.high >= pmin {
                let body_low = bar.open.min(bar.close);
                let body_high = bar.open.max(bar.close);
                if body_low <= pmax && body_high >= pmin {
                    if pmin <= bar.close && bar.close <= pmax {
                        return Some("close");
                    }
                    return Some("body");
                }
                return Some("wick");
            }
            None
        }
        JournalEntity::Pool => {
            let level = state.level?;
            (bar.low <= level && level <= bar.high).then_some("level")
        }
    }
}

fn collect_merged_from_ids(hint: &SmcHint) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(zones) = &hint.zones {
        for zone in &zones.zones {
            for id in &zone.meta.merged_from {
                if !id.is_empty() && !out.contains(id) {
                    out.push(id.clone());
                }
            }
        }
    }
    out
}

fn max_age_minutes_for_zone(hint: &SmcHint, zone_type: &str) -> Option<u32> {
    let meta = &hint.zones.as_ref()?.meta;
    let zt = zone_type.to_uppercase();
    if zt.contains("FVG") || zt.contains("FAIR_VALUE_GAP") || zt.contains("IMBALANCE") {
        return Some(meta.fvg_params.fvg_max_age_minutes);
    }
    if zt.contains("BREAKER") {
        return Some(meta.breaker_params.breaker_max_ob_age_minutes);
    }
    // Order blocks have no direct TTL.
    None
}

fn tf_minutes(tf: &str) -> u32 {
    let tf_norm = tf.trim().to_lowercase();
    if let Some(minutes) = tf_norm.strip_suffix('m').and_then(|v| v.parse::<u32>().ok()) {
        return minutes;
    }
    if let Some(hours) = tf_norm.strip_suffix('h').and_then(|v| v.parse::<u32>().ok()) {
        return hours * 60;
    }
    0
}
