// =============================================================================
// Liquidity pools — EQH/EQL clustering, trend/range/session levels, throttle
// =============================================================================
//
// Pools are built on top of the finished structure without mutating it.
// Swings cluster by price with the relative tolerance `eq_tolerance_pct`
// (clusters need at least two touches to become EQH/EQL); additional pools
// come from the active range and the session context. `throttle_pools` is
// the deterministic feed filter: per-group level clustering, per-type top-K
// and a global priority cap.

use crate::config::SmcConfig;
use crate::types::{
    LevelSide, PoolMeta, Role, SmcInput, SmcLiquidityPool, SmcLiquidityType, SmcStructureState,
    SmcSwing, TradeBias,
};

/// Cluster swing highs/lows into EQH/EQL pools.
pub fn build_eq_pools_from_swings(
    structure: &SmcStructureState,
    cfg: &SmcConfig,
) -> Vec<SmcLiquidityPool> {
    if structure.swings.is_empty() {
        return Vec::new();
    }

    let tolerance = cfg.eq_tolerance_pct.max(0.001);
    let highs: Vec<&SmcSwing> = structure
        .swings
        .iter()
        .filter(|s| s.kind == LevelSide::High)
        .collect();
    let lows: Vec<&SmcSwing> = structure
        .swings
        .iter()
        .filter(|s| s.kind == LevelSide::Low)
        .collect();

    let mut pools = Vec::new();
    pools.extend(clusters_to_pools(
        &highs,
        tolerance,
        SmcLiquidityType::Eqh,
        structure.bias,
    ));
    pools.extend(clusters_to_pools(
        &lows,
        tolerance,
        SmcLiquidityType::Eql,
        structure.bias,
    ));
    pools
}

/// Append TLQ/SLQ pools from the last swing low/high under the bias.
pub fn add_trend_pools(pools: &mut Vec<SmcLiquidityPool>, structure: &SmcStructureState) {
    let last_low = last_swing(&structure.swings, LevelSide::Low);
    let last_high = last_swing(&structure.swings, LevelSide::High);
    let ref_ts = structure.meta.snapshot_end_ts;

    if structure.bias == TradeBias::Long {
        if let Some(low) = last_low {
            pools.push(SmcLiquidityPool {
                level: low.price,
                liq_type: SmcLiquidityType::Tlq,
                strength: f64::from(low.strength.max(1)),
                n_touches: 1,
                first_time: Some(low.time),
                last_time: Some(low.time),
                role: resolve_role_for_bias(TradeBias::Long, SmcLiquidityType::Tlq, None),
                source_swings: vec![*low],
                meta: PoolMeta {
                    source: "last_low".to_string(),
                    side: Some(LevelSide::Low),
                    ref_ts,
                    ..PoolMeta::default()
                },
            });
        }
    }
    if structure.bias == TradeBias::Short {
        if let Some(high) = last_high {
            pools.push(SmcLiquidityPool {
                level: high.price,
                liq_type: SmcLiquidityType::Slq,
                strength: f64::from(high.strength.max(1)),
                n_touches: 1,
                first_time: Some(high.time),
                last_time: Some(high.time),
                role: resolve_role_for_bias(TradeBias::Short, SmcLiquidityType::Slq, None),
                source_swings: vec![*high],
                meta: PoolMeta {
                    source: "last_high".to_string(),
                    side: Some(LevelSide::High),
                    ref_ts,
                    ..PoolMeta::default()
                },
            });
        }
    }
}

/// Append range-extreme and session pools.
pub fn add_range_and_session_pools(
    pools: &mut Vec<SmcLiquidityPool>,
    structure: &SmcStructureState,
    snapshot: &SmcInput,
) {
    add_range_pools(pools, structure);
    add_session_pools(pools, structure, snapshot);
}

fn add_range_pools(pools: &mut Vec<SmcLiquidityPool>, structure: &SmcStructureState) {
    let active_range = match &structure.active_range {
        Some(range) => range,
        None => return,
    };
    let strength = active_range.high - active_range.low;
    for (level, side) in [
        (active_range.low, LevelSide::Low),
        (active_range.high, LevelSide::High),
    ] {
        pools.push(SmcLiquidityPool {
            level,
            liq_type: SmcLiquidityType::RangeExtreme,
            strength,
            n_touches: 1,
            first_time: Some(active_range.start_time),
            last_time: active_range.end_time.or(Some(active_range.start_time)),
            role: resolve_role_for_bias(
                structure.bias,
                SmcLiquidityType::RangeExtreme,
                Some(side),
            ),
            source_swings: Vec::new(),
            meta: PoolMeta {
                source: "range".to_string(),
                side: Some(side),
                ..PoolMeta::default()
            },
        });
    }
}

fn add_session_pools(
    pools: &mut Vec<SmcLiquidityPool>,
    structure: &SmcStructureState,
    snapshot: &SmcInput,
) {
    let ctx = &snapshot.context;
    let ref_ts = structure.meta.snapshot_end_ts;
    let session_tag = ctx
        .smc_session_tag
        .clone()
        .or_else(|| ctx.session_tag.clone());

    let levels = [
        (ctx.smc_session_low, SmcLiquidityType::SessionLow, LevelSide::Low),
        (
            ctx.smc_session_high,
            SmcLiquidityType::SessionHigh,
            LevelSide::High,
        ),
    ];
    for (value, liq_type, side) in levels {
        let level = match value {
            Some(v) if v.is_finite() => v,
            _ => continue,
        };
        pools.push(SmcLiquidityPool {
            level,
            liq_type,
            strength: 1.0,
            n_touches: 1,
            first_time: ref_ts,
            last_time: ref_ts,
            role: resolve_role_for_bias(structure.bias, liq_type, None),
            source_swings: Vec::new(),
            meta: PoolMeta {
                source: "session".to_string(),
                side: Some(side),
                key: Some(
                    if side == LevelSide::Low {
                        "smc_session_low"
                    } else {
                        "smc_session_high"
                    }
                    .to_string(),
                ),
                session_tag: session_tag.clone(),
                ..PoolMeta::default()
            },
        });
    }
}

/// Role of a pool relative to the bias. SFP/WICK_CLUSTER are side-aware:
/// under a LONG bias a LOW-side sweep level is PRIMARY, a HIGH-side one is
/// countertrend (and symmetrically for SHORT).
pub fn resolve_role_for_bias(
    bias: TradeBias,
    liq_type: SmcLiquidityType,
    side: Option<LevelSide>,
) -> Role {
    use SmcLiquidityType as T;

    if matches!(liq_type, T::Sfp | T::WickCluster) {
        return match (bias, side) {
            (TradeBias::Long, Some(LevelSide::Low)) => Role::Primary,
            (TradeBias::Long, Some(LevelSide::High)) => Role::Countertrend,
            (TradeBias::Short, Some(LevelSide::High)) => Role::Primary,
            (TradeBias::Short, Some(LevelSide::Low)) => Role::Countertrend,
            _ => Role::Neutral,
        };
    }

    match bias {
        TradeBias::Long => match liq_type {
            T::Eql | T::Tlq | T::SessionLow => Role::Primary,
            T::Eqh | T::Slq | T::SessionHigh => Role::Countertrend,
            T::RangeExtreme => match side {
                Some(LevelSide::Low) => Role::Primary,
                Some(LevelSide::High) => Role::Countertrend,
                None => Role::Neutral,
            },
            _ => Role::Neutral,
        },
        TradeBias::Short => match liq_type {
            T::Eqh | T::Slq | T::SessionHigh => Role::Primary,
            T::Eql | T::Tlq | T::SessionLow => Role::Countertrend,
            T::RangeExtreme => match side {
                Some(LevelSide::High) => Role::Primary,
                Some(LevelSide::Low) => Role::Countertrend,
                None => Role::Neutral,
            },
            _ => Role::Neutral,
        },
        TradeBias::Neutral => Role::Neutral,
    }
}

// =============================================================================
// Throttling — deterministic feed filter for pools
// =============================================================================

/// Tame pool churn: cluster levels within (type, role, side) groups, keep
/// top-K per type, then apply the global cap ordered by type priority.
pub fn throttle_pools(pools: Vec<SmcLiquidityPool>, cfg: &SmcConfig) -> Vec<SmcLiquidityPool> {
    if pools.is_empty() {
        return pools;
    }
    let tolerance = cfg.eq_tolerance_pct.max(0.001);

    // 1) Cluster within each group.
    let mut clustered: Vec<SmcLiquidityPool> = Vec::new();
    for (_, items) in group_pools(pools) {
        clustered.extend(cluster_pools_by_level(items, tolerance));
    }

    // 2) Top-K per type/group.
    let mut capped: Vec<SmcLiquidityPool> = Vec::new();
    for ((liq_type, _role, _side), mut items) in group_pools(clustered) {
        let k = topk_for_group(liq_type, cfg);
        items.sort_by(|a, b| {
            (b.strength, b.n_touches)
                .partial_cmp(&(a.strength, a.n_touches))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        if k > 0 {
            items.truncate(k);
        }
        capped.extend(items);
    }

    // 3) Global cap, important types first.
    let max_total = cfg.liquidity_pools_max_total;
    if max_total > 0 && capped.len() > max_total {
        capped.sort_by(|a, b| {
            let ka = (type_priority(a.liq_type), a.strength, a.n_touches);
            let kb = (type_priority(b.liq_type), b.strength, b.n_touches);
            kb.partial_cmp(&ka).unwrap_or(std::cmp::Ordering::Equal)
        });
        capped.truncate(max_total);
    }

    capped
}

fn type_priority(liq_type: SmcLiquidityType) -> i32 {
    use SmcLiquidityType as T;
    match liq_type {
        T::RangeExtreme => 100,
        T::SessionHigh | T::SessionLow => 90,
        T::Tlq | T::Slq => 80,
        T::Eqh | T::Eql => 50,
        T::Sfp => 30,
        T::WickCluster => 25,
        T::Other => 10,
    }
}

fn topk_for_group(liq_type: SmcLiquidityType, cfg: &SmcConfig) -> usize {
    use SmcLiquidityType as T;
    match liq_type {
        T::Eqh | T::Eql => cfg.liquidity_eq_topk_per_side,
        T::WickCluster => cfg.liquidity_wick_cluster_topk_per_side,
        T::Sfp => cfg.liquidity_sfp_topk_per_side,
        _ => cfg.liquidity_other_topk_per_group,
    }
}

/// Side used for grouping: explicit meta side wins, else the type implies it.
fn pool_side(pool: &SmcLiquidityPool) -> &'static str {
    if let Some(side) = pool.meta.side {
        return side.name();
    }
    use SmcLiquidityType as T;
    match pool.liq_type {
        T::Eqh | T::SessionHigh | T::Slq => "HIGH",
        T::Eql | T::SessionLow => "LOW",
        _ => "UNKNOWN",
    }
}

type GroupKey = (SmcLiquidityType, Role, &'static str);

fn group_pools(pools: Vec<SmcLiquidityPool>) -> Vec<(GroupKey, Vec<SmcLiquidityPool>)> {
    let mut groups: Vec<(GroupKey, Vec<SmcLiquidityPool>)> = Vec::new();
    for pool in pools {
        let key = (pool.liq_type, pool.role, pool_side(&pool));
        if let Some(pos) = groups.iter().position(|(k, _)| *k == key) {
            groups[pos].1.push(pool);
        } else {
            groups.push((key, vec![pool]));
        }
    }
    groups
}

fn cluster_pools_by_level(
    pools: Vec<SmcLiquidityPool>,
    tolerance_pct: f64,
) -> Vec<SmcLiquidityPool> {
    if pools.is_empty() {
        return pools;
    }
    let mut items = pools;
    items.sort_by(|a, b| a.level.total_cmp(&b.level));

    let mut clusters: Vec<Vec<SmcLiquidityPool>> = Vec::new();
    for pool in items {
        let mut matched = false;
        for cluster in clusters.iter_mut() {
            let center: f64 =
                cluster.iter().map(|p| p.level).sum::<f64>() / cluster.len().max(1) as f64;
            if within_tolerance(pool.level, center, tolerance_pct) {
                cluster.push(pool.clone());
                matched = true;
                break;
            }
        }
        if !matched {
            clusters.push(vec![pool]);
        }
    }

    let mut out = Vec::with_capacity(clusters.len());
    for cluster in clusters {
        if cluster.len() == 1 {
            out.push(cluster.into_iter().next().expect("len 1"));
            continue;
        }

        let strength_sum: f64 = cluster.iter().map(|p| p.strength).sum();
        let touches_sum: u32 = cluster.iter().map(|p| p.n_touches).sum();
        let level_avg: f64 = cluster.iter().map(|p| p.level).sum::<f64>() / cluster.len() as f64;
        let first_time = cluster.iter().filter_map(|p| p.first_time).min();
        let last_time = cluster.iter().filter_map(|p| p.last_time).max();
        let repr = cluster
            .iter()
            .max_by(|a, b| {
                (a.strength, a.n_touches)
                    .partial_cmp(&(b.strength, b.n_touches))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .expect("non-empty cluster")
            .clone();

        let mut meta = repr.meta.clone();
        meta.throttled = Some(true);
        meta.throttled_cluster_size = Some(cluster.len());

        out.push(SmcLiquidityPool {
            level: level_avg,
            liq_type: repr.liq_type,
            strength: strength_sum,
            n_touches: if touches_sum > 0 {
                touches_sum
            } else {
                repr.n_touches
            },
            first_time,
            last_time,
            role: repr.role,
            source_swings: repr.source_swings.clone(),
            meta,
        });
    }
    out
}

// =============================================================================
// Cluster helpers
// =============================================================================

fn clusters_to_pools(
    swings: &[&SmcSwing],
    tolerance_pct: f64,
    liq_type: SmcLiquidityType,
    bias: TradeBias,
) -> Vec<SmcLiquidityPool> {
    let clusters = cluster_swings(swings, tolerance_pct);
    clusters
        .into_iter()
        .map(|cluster| {
            let level = cluster.iter().map(|s| s.price).sum::<f64>() / cluster.len() as f64;
            let strength: f64 = cluster.iter().map(|s| f64::from(s.strength)).sum();
            let first_time = cluster.iter().map(|s| s.time).min();
            let last_time = cluster.iter().map(|s| s.time).max();
            SmcLiquidityPool {
                level,
                liq_type,
                strength,
                n_touches: cluster.len() as u32,
                first_time,
                last_time,
                role: resolve_role_for_bias(bias, liq_type, None),
                meta: PoolMeta {
                    source: "eq_cluster".to_string(),
                    cluster_size: Some(cluster.len()),
                    ..PoolMeta::default()
                },
                source_swings: cluster,
            }
        })
        .collect()
}

/// Greedy single-pass clustering against the running cluster average.
/// Clusters with at least two touches qualify.
fn cluster_swings(swings: &[&SmcSwing], tolerance_pct: f64) -> Vec<Vec<SmcSwing>> {
    let mut clusters: Vec<Vec<SmcSwing>> = Vec::new();
    for swing in swings {
        let mut matched = false;
        for cluster in clusters.iter_mut() {
            let avg = cluster.iter().map(|s| s.price).sum::<f64>() / cluster.len() as f64;
            if within_tolerance(swing.price, avg, tolerance_pct) {
                cluster.push(**swing);
                matched = true;
                break;
            }
        }
        if !matched {
            clusters.push(vec![**swing]);
        }
    }
    clusters.retain(|c| c.len() >= 2);
    clusters
}

pub(crate) fn within_tolerance(price: f64, reference: f64, tolerance_pct: f64) -> bool {
    if reference == 0.0 {
        return (price - reference).abs() <= tolerance_pct;
    }
    (price - reference).abs() / reference.abs().max(1e-6) <= tolerance_pct
}

fn last_swing(swings: &[SmcSwing], kind: LevelSide) -> Option<&SmcSwing> {
    swings.iter().rev().find(|s| s.kind == kind)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StructureMeta;

    fn swing(index: usize, price: f64, kind: LevelSide) -> SmcSwing {
        SmcSwing {
            index,
            time: index as i64 * 300_000,
            price,
            kind,
            strength: 2,
        }
    }

    fn structure_with(swings: Vec<SmcSwing>, bias: TradeBias) -> SmcStructureState {
        SmcStructureState {
            swings,
            bias,
            meta: StructureMeta {
                snapshot_end_ts: Some(3_000_000),
                ..StructureMeta::default()
            },
            ..SmcStructureState::default()
        }
    }

    #[test]
    fn eq_clusters_require_two_touches() {
        // Two equal highs within tolerance plus one isolated low.
        let structure = structure_with(
            vec![
                swing(1, 100.0, LevelSide::High),
                swing(3, 100.05, LevelSide::High),
                swing(5, 90.0, LevelSide::Low),
            ],
            TradeBias::Short,
        );
        let pools = build_eq_pools_from_swings(&structure, &SmcConfig::default());
        assert_eq!(pools.len(), 1);
        let eqh = &pools[0];
        assert_eq!(eqh.liq_type, SmcLiquidityType::Eqh);
        assert_eq!(eqh.n_touches, 2);
        assert!((eqh.level - 100.025).abs() < 1e-9);
        assert!((eqh.strength - 4.0).abs() < f64::EPSILON);
        assert_eq!(eqh.role, Role::Primary); // SHORT bias ⇒ EQH primary
    }

    #[test]
    fn trend_pool_follows_bias() {
        let mut structure = structure_with(
            vec![
                swing(1, 100.0, LevelSide::High),
                swing(3, 95.0, LevelSide::Low),
            ],
            TradeBias::Long,
        );
        let mut pools = Vec::new();
        add_trend_pools(&mut pools, &structure);
        assert_eq!(pools.len(), 1);
        assert_eq!(pools[0].liq_type, SmcLiquidityType::Tlq);
        assert_eq!(pools[0].role, Role::Primary);
        assert!((pools[0].level - 95.0).abs() < f64::EPSILON);

        structure.bias = TradeBias::Short;
        let mut pools = Vec::new();
        add_trend_pools(&mut pools, &structure);
        assert_eq!(pools[0].liq_type, SmcLiquidityType::Slq);
        assert!((pools[0].level - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn role_resolution_table() {
        use SmcLiquidityType as T;
        assert_eq!(
            resolve_role_for_bias(TradeBias::Long, T::Eql, None),
            Role::Primary
        );
        assert_eq!(
            resolve_role_for_bias(TradeBias::Long, T::Eqh, None),
            Role::Countertrend
        );
        assert_eq!(
            resolve_role_for_bias(TradeBias::Short, T::RangeExtreme, Some(LevelSide::High)),
            Role::Primary
        );
        assert_eq!(
            resolve_role_for_bias(TradeBias::Long, T::Sfp, Some(LevelSide::Low)),
            Role::Primary
        );
        assert_eq!(
            resolve_role_for_bias(TradeBias::Short, T::WickCluster, Some(LevelSide::Low)),
            Role::Countertrend
        );
        assert_eq!(
            resolve_role_for_bias(TradeBias::Neutral, T::Eqh, None),
            Role::Neutral
        );
    }

    #[test]
    fn throttle_applies_topk_and_global_cap() {
        let mut cfg = SmcConfig::default();
        cfg.liquidity_eq_topk_per_side = 2;
        cfg.liquidity_pools_max_total = 3;

        // Five well-separated EQH pools plus one RANGE_EXTREME: the range
        // pool must survive the global cap (priority 100).
        let mut pools: Vec<SmcLiquidityPool> = (0..5)
            .map(|i| SmcLiquidityPool {
                level: 100.0 + i as f64 * 50.0,
                liq_type: SmcLiquidityType::Eqh,
                strength: 1.0 + i as f64,
                n_touches: 2,
                first_time: None,
                last_time: None,
                role: Role::Neutral,
                source_swings: vec![],
                meta: PoolMeta {
                    source: "eq_cluster".into(),
                    side: Some(LevelSide::High),
                    ..PoolMeta::default()
                },
            })
            .collect();
        pools.push(SmcLiquidityPool {
            level: 500.0,
            liq_type: SmcLiquidityType::RangeExtreme,
            strength: 0.5,
            n_touches: 1,
            first_time: None,
            last_time: None,
            role: Role::Primary,
            source_swings: vec![],
            meta: PoolMeta {
                source: "range".into(),
                side: Some(LevelSide::High),
                ..PoolMeta::default()
            },
        });

        let out = throttle_pools(pools, &cfg);
        assert_eq!(out.len(), 3);
        assert!(out
            .iter()
            .any(|p| p.liq_type == SmcLiquidityType::RangeExtreme));
        // Highest-strength EQH clusters survive.
        assert!(out.iter().any(|p| (p.strength - 5.0).abs() < 1e-9));
    }

    #[test]
    fn throttle_merges_nearby_same_group_pools() {
        let cfg = SmcConfig::default();
        let make = |level: f64, strength: f64| SmcLiquidityPool {
            level,
            liq_type: SmcLiquidityType::Eqh,
            strength,
            n_touches: 2,
            first_time: Some(0),
            last_time: Some(600_000),
            role: Role::Neutral,
            source_swings: vec![],
            meta: PoolMeta {
                source: "eq_cluster".into(),
                side: Some(LevelSide::High),
                ..PoolMeta::default()
            },
        };
        let out = throttle_pools(vec![make(100.0, 1.0), make(100.01, 3.0)], &cfg);
        assert_eq!(out.len(), 1);
        let merged = &out[0];
        assert!((merged.strength - 4.0).abs() < 1e-9);
        assert_eq!(merged.n_touches, 4);
        assert_eq!(merged.meta.throttled, Some(true));
        assert_eq!(merged.meta.throttled_cluster_size, Some(2));
    }
}
