// =============================================================================
// SMC liquidity pipeline: EQH/EQL plus trend, range, session and sweep pools
// =============================================================================
//
// Builds the liquidity state on top of the finished structure: clustered
// pools → trend/range/session additions → SFP and wick-cluster detection →
// throttling → magnets → AMD phase → optional targets. On preview snapshots
// the noisy SFP/WICK_CLUSTER extras are skipped unless explicitly enabled.

pub mod amd;
pub mod bridge;
pub mod magnets;
pub mod pools;
pub mod sfp_wick;
pub mod targets;

use tracing::debug;

use crate::config::SmcConfig;
use crate::types::{
    ComputeKind, LiquidityMeta, SmcAmdPhase, SmcInput, SmcLiquidityState, SmcStructureState,
};

pub use bridge::{build_liquidity_hint, LiquidityBridgeHint};

/// Build the liquidity state from swings, the range and the session context.
pub fn compute_liquidity_state(
    snapshot: &SmcInput,
    structure: &SmcStructureState,
    cfg: &SmcConfig,
) -> SmcLiquidityState {
    let bar_count = snapshot.primary_frame().map_or(0, |f| f.len());

    let mut pools = pools::build_eq_pools_from_swings(structure, cfg);
    pools::add_trend_pools(&mut pools, structure);
    pools::add_range_and_session_pools(&mut pools, structure, snapshot);

    let is_preview = snapshot.context.smc_compute_kind == Some(ComputeKind::Preview);
    let include_extras = !is_preview || cfg.liquidity_preview_include_sfp_and_wicks;
    let (sfp_pools, sfp_events, wick_clusters) = if include_extras {
        sfp_wick::detect_sfp_and_wicks(snapshot, structure, cfg)
    } else {
        (Vec::new(), Vec::new(), Vec::new())
    };
    pools.extend(sfp_pools);

    let pools = pools::throttle_pools(pools, cfg);
    let magnets = magnets::build_magnets_from_pools_and_range(&pools, structure, snapshot, cfg);

    let mut state = SmcLiquidityState {
        meta: LiquidityMeta {
            bar_count,
            symbol: snapshot.symbol.clone(),
            primary_tf: if structure.primary_tf.is_empty() {
                snapshot.tf_primary.clone()
            } else {
                structure.primary_tf.clone()
            },
            pool_count: pools.len(),
            magnet_count: magnets.len(),
            bias: structure.bias,
            sfp_events,
            wick_clusters,
            ..LiquidityMeta::default()
        },
        pools,
        magnets,
        amd_phase: Some(SmcAmdPhase::Neutral),
    };

    let (phase, reason) = amd::derive_amd_phase(structure, &state);
    state.amd_phase = Some(phase);
    state.meta.amd_reason = Some(reason);

    let (liquidity_targets, target_reasons) =
        targets::build_liquidity_targets(snapshot, &state.magnets, cfg);
    if !liquidity_targets.is_empty() {
        state.meta.liquidity_targets = Some(liquidity_targets);
    } else if !target_reasons.is_empty() {
        state.meta.liquidity_targets_reason = Some(target_reasons);
    }

    debug!(
        symbol = %snapshot.symbol,
        pools = state.pools.len(),
        magnets = state.magnets.len(),
        amd = ?state.amd_phase,
        sfp_events = state.meta.sfp_events.len(),
        wick_clusters = state.meta.wick_clusters.len(),
        "liquidity state built"
    );

    state
}
