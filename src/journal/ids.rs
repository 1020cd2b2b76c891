// =============================================================================
// Journal identity — deterministic fingerprints for pools and magnets
// =============================================================================
//
// Zones carry a stable `zone_id`; pools and magnets do not, so the journal
// derives deterministic ids from their shape. Wick-cluster pools reuse the
// tracker's `cluster_id` so the same level does not churn ids bar to bar.
// The quantized variants (tick-rounded prices) feed the frame records where
// micro-shifts of a level must not register as deltas.

use crate::types::{SmcHint, SmcLiquidityMagnet, SmcLiquidityPool, SmcLiquidityType};

/// Best-effort tick for price quantization: explicit context tick first,
/// else 1% of the structure ATR.
pub fn resolve_tick(hint: &SmcHint) -> Option<f64> {
    if let Some(tick) = hint.meta.tick.filter(|t| *t > 0.0) {
        return Some(tick);
    }
    let atr = hint
        .structure
        .as_ref()
        .and_then(|s| s.meta.atr_last)
        .or_else(|| hint.zones.as_ref().and_then(|z| z.meta.atr_last))
        .filter(|a| *a > 0.0)?;
    let tick = atr * 0.01;
    (tick > 0.0).then_some(tick)
}

/// Quantize a price for stable ids. Without a tick: plain 6-decimal text.
pub fn q_price(price: f64, tick: Option<f64>) -> String {
    let tick = match tick {
        Some(tick) if tick > 0.0 => tick,
        _ => return format!("{price:.6}"),
    };
    let quantized = (price / tick).round() * tick;
    let decimals = (-(tick.log10().floor()) as i32 + 1).clamp(0, 10) as usize;
    format!("{quantized:.decimals$}")
}

fn time_part(ts: Option<i64>) -> String {
    ts.map_or(String::new(), |v| v.to_string())
}

/// Deterministic pool id: `pool:{type}:{role}:{level}:{first}:{last}`, or
/// the cluster-id form for tracked wick clusters.
pub fn pool_id(pool: &SmcLiquidityPool) -> String {
    if pool.liq_type == SmcLiquidityType::WickCluster {
        if let Some(cid) = pool.meta.cluster_id.as_deref().filter(|c| !c.is_empty()) {
            let cid_s = cid.replace(':', "_");
            return format!(
                "pool:{}:{}:cid_{}:-:-",
                pool.liq_type.name(),
                pool.role.name(),
                cid_s
            );
        }
    }
    format!(
        "pool:{}:{}:{:.6}:{}:{}",
        pool.liq_type.name(),
        pool.role.name(),
        pool.level,
        time_part(pool.first_time),
        time_part(pool.last_time)
    )
}

/// Frame-record variant with a tick-quantized level.
pub fn pool_id_quantized(pool: &SmcLiquidityPool, tick: Option<f64>) -> String {
    if pool.liq_type == SmcLiquidityType::WickCluster {
        if let Some(cid) = pool.meta.cluster_id.as_deref().filter(|c| !c.is_empty()) {
            let cid_s = cid.replace(':', "_");
            return format!(
                "pool:{}:{}:cid_{}:-:-",
                pool.liq_type.name(),
                pool.role.name(),
                cid_s
            );
        }
    }
    format!(
        "pool:{}:{}:{}:{}:{}",
        pool.liq_type.name(),
        pool.role.name(),
        q_price(pool.level, tick),
        time_part(pool.first_time),
        time_part(pool.last_time)
    )
}

/// Deterministic magnet id from its geometry.
pub fn magnet_id(magnet: &SmcLiquidityMagnet) -> String {
    format!(
        "magnet:{}:{}:{:.6}:{:.6}:{:.6}",
        magnet.liq_type.name(),
        magnet.role.name(),
        magnet.center,
        magnet.price_min,
        magnet.price_max
    )
}

/// Frame-record variant with tick-quantized prices.
pub fn magnet_id_quantized(magnet: &SmcLiquidityMagnet, tick: Option<f64>) -> String {
    format!(
        "magnet:{}:{}:{}:{}:{}",
        magnet.liq_type.name(),
        magnet.role.name(),
        q_price(magnet.center, tick),
        q_price(magnet.price_min, tick),
        q_price(magnet.price_max, tick)
    )
}

/// Parsed fields of a [`pool_id`]. Best-effort: the cluster-id form yields
/// empty time fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolIdParts {
    pub liq_type: String,
    pub role: String,
    pub level_s: String,
    pub first: String,
    pub last: String,
}

pub fn parse_pool_id(id: &str) -> Option<PoolIdParts> {
    let parts: Vec<&str> = id.split(':').collect();
    if parts.len() < 6 || parts[0] != "pool" {
        return None;
    }
    Some(PoolIdParts {
        liq_type: parts[1].to_string(),
        role: parts[2].to_string(),
        level_s: parts[3].to_string(),
        first: parts[4].to_string(),
        last: parts[5].to_string(),
    })
}
