// =============================================================================
// SMC engine — orchestrates the pipeline for one snapshot
// =============================================================================
//
// One synchronous, pure pass per snapshot: structure → liquidity → zones →
// execution → Stage6, then the hint meta (snapshot tf, last price, compute
// kind, session context pass-through). Execution and Stage6 are optional
// subsystems: their degenerate states carry a reason instead of failing the
// hint. Identical inputs always produce a byte-identical canonical
// serialization.

use tracing::debug;

use crate::config::SmcConfig;
use crate::liquidity;
use crate::serialize::canonical_json_string;
use crate::stage6;
use crate::structure;
use crate::types::{HintMeta, SmcHint, SmcInput};
use crate::zones;

/// The pipeline facade. Stateless apart from the shared structure event
/// history; cheap to clone per symbol task.
#[derive(Debug, Clone)]
pub struct SmcEngine {
    cfg: SmcConfig,
}

impl SmcEngine {
    pub fn new(cfg: SmcConfig) -> Self {
        Self { cfg }
    }

    pub fn with_defaults() -> Self {
        Self::new(SmcConfig::default())
    }

    pub fn config(&self) -> &SmcConfig {
        &self.cfg
    }

    /// Build the hint for one input snapshot.
    pub fn process_snapshot(&self, snapshot: &SmcInput) -> SmcHint {
        debug!(symbol = %snapshot.symbol, tf = %snapshot.tf_primary, "processing SMC snapshot");

        let structure_state = structure::compute_structure_state(snapshot, &self.cfg);
        let liquidity_state =
            liquidity::compute_liquidity_state(snapshot, &structure_state, &self.cfg);
        let zones_state = zones::compute_zones_state(
            snapshot,
            &structure_state,
            Some(&liquidity_state),
            &self.cfg,
        );

        // Stage5: micro-events only when in_play near POI/targets.
        let execution_state = crate::execution::compute_execution_state(
            snapshot,
            Some(&structure_state),
            Some(&liquidity_state),
            Some(&zones_state),
            &self.cfg,
        );

        // Stage6: scenario classification, never a hard failure — gates
        // resolve to UNCLEAR with a reason.
        let decision = stage6::decide_42_43(
            snapshot,
            Some(&structure_state),
            Some(&liquidity_state),
            Some(&zones_state),
        );
        let signals = vec![stage6::to_signal(decision)];

        let last_price = snapshot.primary_frame().and_then(|f| f.last_close());
        let ctx = &snapshot.context;
        let meta = HintMeta {
            snapshot_tf: snapshot.tf_primary.clone(),
            last_price,
            smc_compute_kind: ctx.smc_compute_kind,
            session_tag: ctx.session_tag.clone(),
            smc_session_tag: ctx.smc_session_tag.clone(),
            smc_session_start_ms: ctx.smc_session_start_ms,
            smc_session_end_ms: ctx.smc_session_end_ms,
            smc_session_high: ctx.smc_session_high,
            smc_session_low: ctx.smc_session_low,
            smc_session_tf: ctx.smc_session_tf.clone(),
            smc_sessions: ctx.smc_sessions.clone(),
            tick: ctx.tick,
        };

        SmcHint {
            structure: Some(structure_state),
            liquidity: Some(liquidity_state),
            zones: Some(zones_state),
            signals,
            execution: Some(execution_state),
            meta,
        }
    }
}

/// Canonical transport serialization of a hint: recursively sorted keys,
/// enums as name strings, timestamps as RFC3339 `Z`.
pub fn to_plain_json(hint: &SmcHint) -> String {
    canonical_json_string(hint)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::{Bar, Frame};
    use crate::stage6::ScenarioId;
    use crate::types::{ComputeKind, TrendContext};
    use std::collections::BTreeMap;

    fn bar(i: i64, step_ms: i64, o: f64, h: f64, l: f64, c: f64) -> Bar {
        Bar {
            open_time: i * step_ms,
            close_time: i * step_ms + step_ms - 1,
            open: o,
            high: h,
            low: l,
            close: c,
            volume: 1.0,
            complete: true,
        }
    }

    fn wave_frame(n: usize, step_ms: i64) -> Frame {
        Frame::from_bars(
            (0..n as i64)
                .map(|i| {
                    let base = 100.0 + ((i % 12) as f64 - 6.0) * 0.8;
                    bar(i, step_ms, base, base + 1.0, base - 1.0, base + 0.4)
                })
                .collect(),
        )
    }

    fn full_snapshot(symbol: &str) -> SmcInput {
        let mut ohlc = BTreeMap::new();
        ohlc.insert("5m".to_string(), wave_frame(120, 300_000));
        ohlc.insert("1m".to_string(), wave_frame(120, 60_000));
        ohlc.insert("1h".to_string(), wave_frame(60, 3_600_000));
        ohlc.insert("4h".to_string(), wave_frame(40, 14_400_000));
        let mut input = SmcInput {
            symbol: symbol.to_string(),
            tf_primary: "5m".to_string(),
            ohlc_by_tf: ohlc,
            context: Default::default(),
        };
        input.context.trend_context_4h = Some(TrendContext {
            bias: Some("SHORT".into()),
            trend: None,
            direction: None,
        });
        input
    }

    #[test]
    fn full_pipeline_produces_all_sections() {
        let engine = SmcEngine::with_defaults();
        let snapshot = full_snapshot("ENGINE_FULL");
        let hint = engine.process_snapshot(&snapshot);

        let structure = hint.structure.as_ref().unwrap();
        assert!(structure.meta.bar_count > 0);
        assert!(!structure.swings.is_empty());

        let liquidity = hint.liquidity.as_ref().unwrap();
        assert!(liquidity.amd_phase.is_some());

        assert!(hint.zones.is_some());
        assert!(hint.execution.is_some());
        assert_eq!(hint.signals.len(), 1);
        assert_eq!(hint.signals[0].signal_type, "SCENARIO");
        assert_eq!(hint.meta.snapshot_tf, "5m");
        assert!(hint.meta.last_price.is_some());
    }

    #[test]
    fn empty_input_never_panics_and_yields_wellformed_hint() {
        let engine = SmcEngine::with_defaults();
        let snapshot = SmcInput {
            symbol: "ENGINE_EMPTY".into(),
            tf_primary: "5m".into(),
            ohlc_by_tf: BTreeMap::new(),
            context: Default::default(),
        };
        let hint = engine.process_snapshot(&snapshot);
        assert!(hint.structure.is_some());
        assert!(hint.liquidity.is_some());
        assert!(hint.zones.is_some());
        // Stage6 gates resolve to UNCLEAR, not an error.
        assert_eq!(hint.signals[0].meta.scenario_id, ScenarioId::Unclear);
        assert!(hint.meta.last_price.is_none());
    }

    #[test]
    fn deterministic_serialization() {
        let engine = SmcEngine::with_defaults();
        let snapshot = full_snapshot("ENGINE_DET");
        let one = to_plain_json(&engine.process_snapshot(&snapshot));
        let two = to_plain_json(&engine.process_snapshot(&snapshot));
        assert_eq!(one, two);
        // Canonical output has sorted top-level keys.
        let value: serde_json::Value = serde_json::from_str(&one).unwrap();
        assert!(value.get("structure").is_some());
        assert!(value.get("liquidity").is_some());
    }

    #[test]
    fn compute_kind_flows_into_meta() {
        let engine = SmcEngine::with_defaults();
        let mut snapshot = full_snapshot("ENGINE_KIND");
        snapshot.context.smc_compute_kind = Some(ComputeKind::Preview);
        let hint = engine.process_snapshot(&snapshot);
        assert_eq!(hint.meta.smc_compute_kind, Some(ComputeKind::Preview));
    }

    #[test]
    fn session_context_passes_through() {
        let engine = SmcEngine::with_defaults();
        let mut snapshot = full_snapshot("ENGINE_SESSION");
        snapshot.context.smc_session_tag = Some("LONDON".into());
        snapshot.context.smc_session_high = Some(105.5);
        let hint = engine.process_snapshot(&snapshot);
        assert_eq!(hint.meta.smc_session_tag.as_deref(), Some("LONDON"));
        assert_eq!(hint.meta.smc_session_high, Some(105.5));
    }
}
