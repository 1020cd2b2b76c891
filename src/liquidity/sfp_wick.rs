// =============================================================================
// SFP and wick-cluster detectors over the finished structure
// =============================================================================
//
// Reference levels come from the structure's swings plus the active-range
// extremes. A bar that pierces a level by more than max(level * break_pct,
// MIN_BREAK_PCT) but closes back across it is an SFP (one event per level).
// Bars whose wick is at least WICK_RATIO times the body and whose wick tip
// lands within tolerance of a level accumulate into wick clusters; after
// top-K and the noise filters the tracker matches clusters to the previous
// snapshot's set (`context.prev_wick_clusters`) so `cluster_id` stays stable
// across bars.

use tracing::trace;

use crate::config::SmcConfig;
use crate::market_data::Bar;
use crate::types::{
    LevelSide, PoolMeta, SfpEvent, SmcInput, SmcLiquidityPool, SmcLiquidityType,
    SmcStructureState, WickCluster,
};

use super::pools::resolve_role_for_bias;

const SFP_BREAK_FRACTION: f64 = 0.25;
const MIN_BREAK_PCT: f64 = 0.002;
const WICK_RATIO: f64 = 2.5;

#[derive(Debug, Clone)]
struct LevelInfo {
    level: f64,
    side: LevelSide,
    source: &'static str,
    key: String,
}

/// Output: extra pools (SFP + WICK_CLUSTER), SFP events and the tracked
/// wick clusters for the liquidity meta block.
pub fn detect_sfp_and_wicks(
    snapshot: &SmcInput,
    structure: &SmcStructureState,
    cfg: &SmcConfig,
) -> (Vec<SmcLiquidityPool>, Vec<SfpEvent>, Vec<WickCluster>) {
    let frame = match snapshot.primary_frame() {
        Some(frame) if !frame.is_empty() => frame.tail_frame(cfg.max_lookback_bars.max(1)),
        _ => return (Vec::new(), Vec::new(), Vec::new()),
    };
    let bars = frame.bars();

    let levels = collect_levels(structure);
    if levels.is_empty() {
        return (Vec::new(), Vec::new(), Vec::new());
    }

    let tolerance_pct = cfg.eq_tolerance_pct.max(0.001);
    let break_pct = (tolerance_pct * SFP_BREAK_FRACTION).max(MIN_BREAK_PCT);

    let mut sfp_events: Vec<SfpEvent> = Vec::new();
    let mut extra_pools: Vec<SmcLiquidityPool> = Vec::new();
    let mut sfp_recorded: Vec<String> = Vec::new();
    let mut wick_clusters: Vec<(String, WickCluster)> = Vec::new();

    for bar in bars {
        let body = bar.body().max(1e-6);
        let upper_wick = bar.upper_wick();
        let lower_wick = bar.lower_wick();

        for level in &levels {
            let price_tol = (level.level * break_pct).max(MIN_BREAK_PCT);
            let swept_high = level.side == LevelSide::High
                && bar.high >= level.level + price_tol
                && bar.close < level.level;
            let swept_low = level.side == LevelSide::Low
                && bar.low <= level.level - price_tol
                && bar.close > level.level;

            if (swept_high || swept_low) && !sfp_recorded.contains(&level.key) {
                sfp_events.push(SfpEvent {
                    level: level.level,
                    side: level.side,
                    time: bar.open_time,
                    close: bar.close,
                    source: level.source.to_string(),
                });
                extra_pools.push(SmcLiquidityPool {
                    level: level.level,
                    liq_type: SmcLiquidityType::Sfp,
                    strength: 1.0,
                    n_touches: 1,
                    first_time: Some(bar.open_time),
                    last_time: Some(bar.open_time),
                    role: resolve_role_for_bias(
                        structure.bias,
                        SmcLiquidityType::Sfp,
                        Some(level.side),
                    ),
                    source_swings: Vec::new(),
                    meta: PoolMeta {
                        source: "sfp".to_string(),
                        side: Some(level.side),
                        level_source: Some(level.source.to_string()),
                        ..PoolMeta::default()
                    },
                });
                sfp_recorded.push(level.key.clone());
                continue;
            }

            match level.side {
                LevelSide::High => {
                    if upper_wick >= body * WICK_RATIO
                        && (level.level - bar.high).abs() <= price_tol
                    {
                        collect_wick(&mut wick_clusters, level, bar, upper_wick);
                    }
                }
                LevelSide::Low => {
                    if lower_wick >= body * WICK_RATIO && (level.level - bar.low).abs() <= price_tol
                    {
                        collect_wick(&mut wick_clusters, level, bar, lower_wick);
                    }
                }
            }
        }
    }

    let mut clusters: Vec<WickCluster> = wick_clusters.into_iter().map(|(_, c)| c).collect();

    // Top-K per side before the filters so noisy levels never crowd the UI.
    let topk = cfg.liquidity_wick_cluster_topk_per_side;
    if topk > 0 && !clusters.is_empty() {
        let mut out = Vec::new();
        for side in [LevelSide::High, LevelSide::Low] {
            let mut items: Vec<WickCluster> =
                clusters.iter().filter(|c| c.side == side).cloned().collect();
            items.sort_by(|a, b| cluster_score(b).total_cmp(&cluster_score(a)));
            items.truncate(topk);
            out.extend(items);
        }
        clusters = out;
    }

    // Noise filters: lifetime, density, amplitude (in ATR). Applied to both
    // tracked and new clusters.
    let lookback_bars = bars.len();
    let atr_last = structure.meta.atr_last.filter(|v| *v > 0.0);
    let price_ref = bars.last().map_or(0.0, |b| b.close);
    clusters.retain(|cluster| {
        let life_bars = estimate_life_bars(cluster.first_ts, cluster.last_ts, &snapshot.tf_primary);
        let density = if lookback_bars == 0 {
            0.0
        } else {
            f64::from(cluster.count) / lookback_bars as f64
        };
        let min_life = cfg.liquidity_wick_cluster_min_life_bars;
        if min_life > 0 && life_bars < min_life {
            trace!(level = cluster.level, "wick cluster dropped: short lived");
            return false;
        }
        if cfg.liquidity_wick_cluster_min_density > 0.0
            && density < cfg.liquidity_wick_cluster_min_density
        {
            return false;
        }
        if cfg.liquidity_wick_cluster_min_amp_atr > 0.0 {
            if let Some(atr) = atr_last {
                if cluster.max_wick / atr < cfg.liquidity_wick_cluster_min_amp_atr {
                    return false;
                }
            }
        }
        true
    });

    // Tracker: carry stable cluster ids across snapshots.
    track_wick_clusters(
        &mut clusters,
        snapshot.context.prev_wick_clusters.as_deref(),
        price_ref,
        atr_last,
        cfg,
    );

    for cluster in &clusters {
        extra_pools.push(SmcLiquidityPool {
            level: cluster.level,
            liq_type: SmcLiquidityType::WickCluster,
            strength: cluster.max_wick,
            n_touches: cluster.count,
            first_time: cluster.first_ts,
            last_time: cluster.last_ts,
            role: resolve_role_for_bias(
                structure.bias,
                SmcLiquidityType::WickCluster,
                Some(cluster.side),
            ),
            source_swings: Vec::new(),
            meta: PoolMeta {
                source: "wick_cluster".to_string(),
                side: Some(cluster.side),
                level_source: Some(cluster.source.clone()),
                count: Some(cluster.count),
                cluster_id: cluster.cluster_id.clone(),
                ..PoolMeta::default()
            },
        });
    }

    (extra_pools, sfp_events, clusters)
}

/// Assign stable `cluster_id`s by greedy closest-level matching against the
/// previous snapshot's clusters. Thresholds: max(price * tol_pct,
/// max_abs_move_atr * ATR); sides must agree. Stronger/denser clusters are
/// matched first so the assignment is deterministic.
fn track_wick_clusters(
    clusters: &mut [WickCluster],
    prev_clusters: Option<&[WickCluster]>,
    price_ref: f64,
    atr_last: Option<f64>,
    cfg: &SmcConfig,
) {
    if clusters.is_empty() || !cfg.liquidity_wick_cluster_track_enabled {
        return;
    }

    let prev: Vec<&WickCluster> = prev_clusters
        .unwrap_or(&[])
        .iter()
        .filter(|p| p.cluster_id.is_some())
        .collect();

    let tol_price = price_ref.abs() * cfg.liquidity_wick_cluster_track_tol_pct;
    let tol_atr = atr_last.map_or(0.0, |atr| cfg.liquidity_wick_cluster_track_max_abs_move_atr * atr);
    let tol = tol_price.max(tol_atr);

    let mut used_prev_ids: Vec<String> = Vec::new();

    let mut order: Vec<usize> = (0..clusters.len()).collect();
    order.sort_by(|&a, &b| cluster_score(&clusters[b]).total_cmp(&cluster_score(&clusters[a])));

    for idx in order {
        let (side, level) = (clusters[idx].side, clusters[idx].level);
        if !level.is_finite() {
            continue;
        }

        let mut best: Option<(&WickCluster, f64)> = None;
        for p in &prev {
            if p.side != side {
                continue;
            }
            let pid = p.cluster_id.as_deref().unwrap_or_default();
            if pid.is_empty() || used_prev_ids.iter().any(|u| u == pid) {
                continue;
            }
            if !p.level.is_finite() {
                continue;
            }
            let dist = (level - p.level).abs();
            if dist > tol {
                continue;
            }
            if best.map_or(true, |(_, d)| dist < d) {
                best = Some((p, dist));
            }
        }

        match best {
            Some((prev_cluster, _)) => {
                let pid = prev_cluster
                    .cluster_id
                    .clone()
                    .expect("filtered to Some above");
                used_prev_ids.push(pid.clone());
                clusters[idx].cluster_id = Some(pid);
                // Inherit the birth timestamp so lifetime survives the match.
                if prev_cluster.first_ts.is_some() {
                    clusters[idx].first_ts = prev_cluster.first_ts;
                }
            }
            None => {
                // Deterministic new id from side + quantized level; the
                // tracker picks it up on the next snapshot.
                clusters[idx].cluster_id =
                    Some(format!("wc:{}:{:.2}", side.name(), level));
            }
        }
    }
}

fn cluster_score(cluster: &WickCluster) -> f64 {
    cluster.max_wick * f64::from(cluster.count)
}

fn estimate_life_bars(first_ts: Option<i64>, last_ts: Option<i64>, tf: &str) -> u32 {
    let (first, last) = match (first_ts, last_ts) {
        (Some(f), Some(l)) => (f, l),
        _ => return 0,
    };
    let tf_s = tf_seconds(tf);
    if tf_s <= 0 {
        return 0;
    }
    let dt_s = (last - first).abs() / 1000;
    (dt_s / tf_s) as u32 + 1
}

fn tf_seconds(tf: &str) -> i64 {
    let tf_norm = tf.trim().to_lowercase();
    match tf_norm.as_str() {
        "1m" => 60,
        "5m" => 300,
        "15m" => 900,
        "1h" => 3_600,
        "4h" => 14_400,
        other => {
            if let Some(minutes) = other.strip_suffix('m').and_then(|v| v.parse::<i64>().ok()) {
                minutes * 60
            } else if let Some(hours) = other.strip_suffix('h').and_then(|v| v.parse::<i64>().ok())
            {
                hours * 3_600
            } else {
                0
            }
        }
    }
}

fn collect_levels(structure: &SmcStructureState) -> Vec<LevelInfo> {
    let mut levels: Vec<LevelInfo> = Vec::new();
    let mut push_unique = |level: f64, side: LevelSide, source: &'static str| {
        let key = format!("{}:{}:{:.4}", source, side.name(), level);
        if !levels.iter().any(|l| l.key == key) {
            levels.push(LevelInfo {
                level,
                side,
                source,
                key,
            });
        }
    };

    for swing in &structure.swings {
        push_unique(swing.price, swing.kind, "swing");
    }
    if let Some(range) = &structure.active_range {
        push_unique(range.high, LevelSide::High, "range");
        push_unique(range.low, LevelSide::Low, "range");
    }
    levels
}

fn collect_wick(
    clusters: &mut Vec<(String, WickCluster)>,
    level: &LevelInfo,
    bar: &Bar,
    wick_size: f64,
) {
    if let Some(pos) = clusters.iter().position(|(key, _)| *key == level.key) {
        let cluster = &mut clusters[pos].1;
        cluster.count += 1;
        cluster.max_wick = cluster.max_wick.max(wick_size);
        cluster.last_ts = Some(bar.open_time);
    } else {
        clusters.push((
            level.key.clone(),
            WickCluster {
                cluster_id: None,
                level: level.level,
                side: level.side,
                count: 1,
                max_wick: wick_size,
                source: level.source.to_string(),
                first_ts: Some(bar.open_time),
                last_ts: Some(bar.open_time),
            },
        ));
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::Frame;
    use crate::types::{SmcSwing, StructureMeta, TradeBias};
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

    fn snapshot_with(bars: Vec<Bar>) -> SmcInput {
        let mut ohlc = BTreeMap::new();
        ohlc.insert("5m".to_string(), Frame::from_bars(bars));
        SmcInput {
            symbol: "TEST".into(),
            tf_primary: "5m".into(),
            ohlc_by_tf: ohlc,
            context: Default::default(),
        }
    }

    fn structure_with_high(level: f64) -> SmcStructureState {
        SmcStructureState {
            swings: vec![SmcSwing {
                index: 1,
                time: 300_000,
                price: level,
                kind: LevelSide::High,
                strength: 2,
            }],
            bias: TradeBias::Short,
            meta: StructureMeta {
                atr_last: Some(1.0),
                ..StructureMeta::default()
            },
            ..SmcStructureState::default()
        }
    }

    #[test]
    fn sfp_fires_once_per_level() {
        let level = 100.0;
        // Break tolerance is level * max(eq_tol * 0.25, 0.002) = 3.0 here.
        // Two sweeping bars over the same level: only the first records.
        let bars = vec![
            bar(0, 99.0, 99.5, 98.5, 99.2),
            bar(1, 99.5, 103.5, 99.0, 99.4), // pierce 100 + tol, close below
            bar(2, 99.4, 103.2, 99.0, 99.3), // pierce again
        ];
        let snapshot = snapshot_with(bars);
        let structure = structure_with_high(level);
        let (pools, events, _) = detect_sfp_and_wicks(&snapshot, &structure, &SmcConfig::default());

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].side, LevelSide::High);
        assert!((events[0].level - level).abs() < f64::EPSILON);
        assert_eq!(events[0].source, "swing");
        let sfp_pools: Vec<_> = pools
            .iter()
            .filter(|p| p.liq_type == SmcLiquidityType::Sfp)
            .collect();
        assert_eq!(sfp_pools.len(), 1);
        // SHORT bias + HIGH side sweep ⇒ PRIMARY.
        assert_eq!(sfp_pools[0].role, crate::types::Role::Primary);
    }

    #[test]
    fn wick_cluster_accumulates_and_gets_id() {
        let level = 100.0;
        let mut cfg = SmcConfig::default();
        cfg.liquidity_wick_cluster_min_density = 0.0;
        cfg.liquidity_wick_cluster_min_life_bars = 0;

        // Long upper wicks ending exactly at the level, tiny bodies.
        let bars: Vec<Bar> = (0..4)
            .map(|i| bar(i, 99.0, level, 98.9, 99.05))
            .collect();
        let snapshot = snapshot_with(bars);
        let structure = structure_with_high(level);
        let (_, _, clusters) = detect_sfp_and_wicks(&snapshot, &structure, &cfg);

        assert_eq!(clusters.len(), 1);
        let c = &clusters[0];
        assert_eq!(c.count, 4);
        assert_eq!(c.side, LevelSide::High);
        assert_eq!(c.cluster_id.as_deref(), Some("wc:HIGH:100.00"));
    }

    #[test]
    fn tracker_keeps_previous_cluster_id() {
        let level = 100.0;
        let mut cfg = SmcConfig::default();
        cfg.liquidity_wick_cluster_min_density = 0.0;
        cfg.liquidity_wick_cluster_min_life_bars = 0;

        let bars: Vec<Bar> = (0..4).map(|i| bar(i, 99.0, level, 98.9, 99.05)).collect();
        let mut snapshot = snapshot_with(bars);
        snapshot.context.prev_wick_clusters = Some(vec![WickCluster {
            cluster_id: Some("wc:HIGH:99.98".to_string()),
            level: 99.98,
            side: LevelSide::High,
            count: 3,
            max_wick: 0.9,
            source: "swing".into(),
            first_ts: Some(0),
            last_ts: Some(300_000),
        }]);
        let structure = structure_with_high(level);
        let (_, _, clusters) = detect_sfp_and_wicks(&snapshot, &structure, &cfg);

        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].cluster_id.as_deref(), Some("wc:HIGH:99.98"));
        // Birth timestamp inherited from the matched cluster.
        assert_eq!(clusters[0].first_ts, Some(0));
    }

    #[test]
    fn noise_filters_drop_thin_clusters() {
        let level = 100.0;
        let mut cfg = SmcConfig::default();
        cfg.liquidity_wick_cluster_min_density = 0.9; // impossible density

        let bars: Vec<Bar> = (0..10).map(|i| bar(i, 99.0, 99.4, 98.9, 99.05)).collect();
        let mut with_wick = bars.clone();
        with_wick[5] = bar(5, 99.0, level, 98.9, 99.05);
        let snapshot = snapshot_with(with_wick);
        let structure = structure_with_high(level);
        let (_, _, clusters) = detect_sfp_and_wicks(&snapshot, &structure, &cfg);
        assert!(clusters.is_empty());
    }

    #[test]
    fn empty_inputs_are_quiet() {
        let snapshot = snapshot_with(vec![]);
        let structure = SmcStructureState::default();
        let (pools, events, clusters) =
            detect_sfp_and_wicks(&snapshot, &structure, &SmcConfig::default());
        assert!(pools.is_empty());
        assert!(events.is_empty());
        assert!(clusters.is_empty());
    }

    #[test]
    fn tf_seconds_parses_common_frames() {
        assert_eq!(tf_seconds("5m"), 300);
        assert_eq!(tf_seconds("4H"), 14_400);
        assert_eq!(tf_seconds("30m"), 1_800);
        assert_eq!(tf_seconds("junk"), 0);
    }
}
