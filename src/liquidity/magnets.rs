// =============================================================================
// Liquidity magnets — price clusters of pools
// =============================================================================
//
// Pools sorted by level are greedily clustered against the running cluster
// center within the relative tolerance. Each cluster becomes a magnet whose
// type follows a fixed priority order (RANGE_EXTREME > SESSION > TLQ/SLQ >
// EQH/EQL) and whose role is PRIMARY if any member is, COUNTERTREND if all
// are, NEUTRAL otherwise.

use crate::config::SmcConfig;
use crate::types::{
    MagnetMeta, Role, SmcInput, SmcLiquidityMagnet, SmcLiquidityPool, SmcLiquidityType,
    SmcStructureState,
};

use super::pools::within_tolerance;

/// Group pools by price level into magnets.
pub fn build_magnets_from_pools_and_range(
    pools: &[SmcLiquidityPool],
    structure: &SmcStructureState,
    snapshot: &SmcInput,
    cfg: &SmcConfig,
) -> Vec<SmcLiquidityMagnet> {
    if pools.is_empty() {
        return Vec::new();
    }

    let tolerance = cfg.eq_tolerance_pct.max(0.001);
    let clusters = cluster_pools(pools, tolerance);

    clusters
        .into_iter()
        .map(|cluster| {
            let levels: Vec<f64> = cluster.iter().map(|p| p.level).collect();
            let price_min = levels.iter().copied().fold(f64::INFINITY, f64::min);
            let price_max = levels.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let center = levels.iter().sum::<f64>() / levels.len() as f64;
            SmcLiquidityMagnet {
                price_min,
                price_max,
                center,
                liq_type: infer_magnet_type(&cluster),
                role: derive_magnet_role(&cluster),
                meta: MagnetMeta {
                    pool_count: cluster.len(),
                    source_types: cluster.iter().map(|p| p.liq_type.name().to_string()).collect(),
                    symbol: snapshot.symbol.clone(),
                    bias: structure.bias,
                },
                pools: cluster,
            }
        })
        .collect()
}

fn cluster_pools(pools: &[SmcLiquidityPool], tolerance_pct: f64) -> Vec<Vec<SmcLiquidityPool>> {
    let mut sorted: Vec<&SmcLiquidityPool> = pools.iter().collect();
    sorted.sort_by(|a, b| a.level.total_cmp(&b.level));

    let mut clusters: Vec<Vec<SmcLiquidityPool>> = Vec::new();
    for pool in sorted {
        let mut matched = false;
        for cluster in clusters.iter_mut() {
            let center = cluster.iter().map(|p| p.level).sum::<f64>() / cluster.len() as f64;
            if within_tolerance(pool.level, center, tolerance_pct) {
                cluster.push(pool.clone());
                matched = true;
                break;
            }
        }
        if !matched {
            clusters.push(vec![pool.clone()]);
        }
    }
    clusters
}

fn infer_magnet_type(cluster: &[SmcLiquidityPool]) -> SmcLiquidityType {
    use SmcLiquidityType as T;
    const PRIORITY: [T; 7] = [
        T::RangeExtreme,
        T::SessionHigh,
        T::SessionLow,
        T::Tlq,
        T::Slq,
        T::Eqh,
        T::Eql,
    ];
    for liq_type in PRIORITY {
        if cluster.iter().any(|p| p.liq_type == liq_type) {
            return liq_type;
        }
    }
    cluster.first().map_or(T::Other, |p| p.liq_type)
}

fn derive_magnet_role(cluster: &[SmcLiquidityPool]) -> Role {
    if cluster.iter().any(|p| p.role == Role::Primary) {
        return Role::Primary;
    }
    if !cluster.is_empty() && cluster.iter().all(|p| p.role == Role::Countertrend) {
        return Role::Countertrend;
    }
    Role::Neutral
}
