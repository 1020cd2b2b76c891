// =============================================================================
// Stage6 state manager — anti-flip hysteresis over raw scenario decisions
// =============================================================================
//
// Per symbol the manager keeps the stable scenario and only lets it change
// when one of three things happens:
//   1. the raw decision matches the stable one (refresh, clear pending);
//   2. the same pending id has been seen for >= confirm_bars consecutive
//      snapshots AND the raw confidence clears stable + switch_delta;
//   3. the stable entry's TTL expired (switch immediately, reason "ttl").
// Hard invalidations short-circuit all of that: a failed hold against a
// stable 4_3, or CHOP after a sweep while a directional scenario is stable,
// flips immediately with reason "hard_invalidation:<tag>".
//
// The caller must feed monotonically non-decreasing `now_unix` values.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::scenario::{ScenarioDirection, ScenarioId, Stage6Decision};

/// A recorded scenario switch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioFlip {
    pub from: String,
    pub to: String,
    pub reason: String,
}

/// Stable output for one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage6StableResult {
    pub scenario_id: ScenarioId,
    pub scenario_direction: ScenarioDirection,
    pub scenario_confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub scenario_unclear_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub scenario_pending_id: Option<String>,
    pub scenario_pending_count: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub scenario_flip: Option<ScenarioFlip>,
}

#[derive(Debug, Clone)]
struct SymbolScenarioState {
    stable_id: ScenarioId,
    stable_direction: ScenarioDirection,
    stable_confidence: f64,
    stable_unclear_reason: Option<String>,
    last_update_unix: f64,
    pending_id: Option<ScenarioId>,
    pending_count: u32,
}

/// Per-symbol hysteresis over Stage6 raw decisions. Owned by the caller,
/// one instance per symbol universe; not shareable across threads without
/// external synchronization.
#[derive(Debug, Default)]
pub struct SmcStateManager {
    states: HashMap<String, SymbolScenarioState>,
    flip_counters: HashMap<String, u64>,
}

impl SmcStateManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one raw decision and return the stable scenario.
    pub fn apply_stage6_hysteresis(
        &mut self,
        symbol: &str,
        raw: &Stage6Decision,
        ttl_sec: u64,
        confirm_bars: u32,
        switch_delta: f64,
        now_unix: f64,
    ) -> Stage6StableResult {
        let key = symbol.to_uppercase();

        if !self.states.contains_key(&key) {
            // First decision becomes stable as-is.
            let state = SymbolScenarioState {
                stable_id: raw.scenario_id,
                stable_direction: raw.direction,
                stable_confidence: raw.confidence,
                stable_unclear_reason: raw.telemetry.unclear_reason.clone(),
                last_update_unix: now_unix,
                pending_id: None,
                pending_count: 0,
            };
            self.states.insert(key.clone(), state);
            return Self::result_from(&self.states[&key], None);
        }
        let state = self.states.get_mut(&key).expect("present: checked above");

        // 1) Same scenario: refresh and clear pending.
        if raw.scenario_id == state.stable_id {
            state.stable_direction = raw.direction;
            state.stable_confidence = raw.confidence;
            state.stable_unclear_reason = raw.telemetry.unclear_reason.clone();
            state.last_update_unix = now_unix;
            state.pending_id = None;
            state.pending_count = 0;
            return Self::result_from(state, None);
        }

        // 2) Hard invalidation overrides confirmation and TTL.
        if let Some(tag) = hard_invalidation_tag(state.stable_id, raw) {
            let reason = format!("hard_invalidation:{tag}");
            *self.flip_counters.entry(reason.clone()).or_insert(0) += 1;
            let flip = Self::switch(state, raw, now_unix, &reason);
            debug!(symbol = %key, reason = %reason, "stage6 hard invalidation flip");
            return Self::result_from(state, Some(flip));
        }

        // 3) Confirmed switch: enough consecutive pending snapshots plus a
        // confidence edge over the stable scenario.
        let pending_matches = state.pending_id == Some(raw.scenario_id);
        let next_pending_count = if pending_matches {
            state.pending_count + 1
        } else {
            1
        };
        let confidence_ok = raw.confidence >= state.stable_confidence + switch_delta;
        if confidence_ok && next_pending_count >= confirm_bars.max(1) {
            let flip = Self::switch(state, raw, now_unix, "confirmed");
            *self.flip_counters.entry("confirmed".to_string()).or_insert(0) += 1;
            return Self::result_from(state, Some(flip));
        }

        // 4) TTL expiry: the stable scenario is stale, take the raw one.
        if ttl_sec > 0 && now_unix - state.last_update_unix > ttl_sec as f64 {
            let flip = Self::switch(state, raw, now_unix, "ttl");
            *self.flip_counters.entry("ttl".to_string()).or_insert(0) += 1;
            return Self::result_from(state, Some(flip));
        }

        // 5) Keep stable; remember the challenger.
        state.pending_id = Some(raw.scenario_id);
        state.pending_count = next_pending_count;
        Self::result_from(state, None)
    }

    /// Flip counters by reason, for QA dashboards.
    pub fn flip_counters(&self) -> &HashMap<String, u64> {
        &self.flip_counters
    }

    /// Drop the state for one symbol (out-of-order snapshots must reset).
    pub fn reset(&mut self, symbol: &str) {
        self.states.remove(&symbol.to_uppercase());
    }

    fn switch(
        state: &mut SymbolScenarioState,
        raw: &Stage6Decision,
        now_unix: f64,
        reason: &str,
    ) -> ScenarioFlip {
        let flip = ScenarioFlip {
            from: state.stable_id.name().to_string(),
            to: raw.scenario_id.name().to_string(),
            reason: reason.to_string(),
        };
        state.stable_id = raw.scenario_id;
        state.stable_direction = raw.direction;
        state.stable_confidence = raw.confidence;
        state.stable_unclear_reason = raw.telemetry.unclear_reason.clone();
        state.last_update_unix = now_unix;
        state.pending_id = None;
        state.pending_count = 0;
        flip
    }

    fn result_from(state: &SymbolScenarioState, flip: Option<ScenarioFlip>) -> Stage6StableResult {
        Stage6StableResult {
            scenario_id: state.stable_id,
            scenario_direction: state.stable_direction,
            scenario_confidence: state.stable_confidence,
            scenario_unclear_reason: state.stable_unclear_reason.clone(),
            scenario_pending_id: state.pending_id.map(|id| id.name().to_string()),
            scenario_pending_count: state.pending_count,
            scenario_flip: flip,
        }
    }
}

/// Hard-invalidation triggers read from raw telemetry:
/// - a failed hold while 4_3 (break&hold long) is stable;
/// - CHOP after a sweep while any directional scenario is stable.
fn hard_invalidation_tag(stable_id: ScenarioId, raw: &Stage6Decision) -> Option<&'static str> {
    if stable_id == ScenarioId::FourThree && raw.telemetry.failed_hold_up == Some(true) {
        return Some("failed_hold");
    }
    let chop = raw
        .telemetry
        .events_after_sweep
        .as_ref()
        .map_or(false, |flags| flags.chop);
    if chop && matches!(stable_id, ScenarioId::FourTwo | ScenarioId::FourThree) {
        return Some("chop_after_sweep");
    }
    None
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage6::scenario::{EventsAfterSweepFlags, KeyLevels, Stage6Telemetry};

    fn raw(id: ScenarioId, confidence: f64) -> Stage6Decision {
        let direction = match id {
            ScenarioId::FourTwo => ScenarioDirection::Short,
            ScenarioId::FourThree => ScenarioDirection::Long,
            ScenarioId::Unclear => ScenarioDirection::Neutral,
        };
        Stage6Decision {
            scenario_id: id,
            direction,
            confidence,
            why: vec![],
            key_levels: KeyLevels::default(),
            telemetry: Stage6Telemetry::default(),
        }
    }

    #[test]
    fn first_decision_becomes_stable() {
        let mut sm = SmcStateManager::new();
        let result =
            sm.apply_stage6_hysteresis("xauusd", &raw(ScenarioId::FourTwo, 0.8), 180, 2, 0.08, 0.0);
        assert_eq!(result.scenario_id, ScenarioId::FourTwo);
        assert!(result.scenario_flip.is_none());
    }

    #[test]
    fn alternating_decisions_do_not_flip() {
        // Seed scenario: 4_2, 4_3, 4_2, 4_3 with equal confidences inside
        // TTL, confirm_bars=2, switch_delta=0.08 ⇒ stays on the first.
        let mut sm = SmcStateManager::new();
        let ids = [
            ScenarioId::FourTwo,
            ScenarioId::FourThree,
            ScenarioId::FourTwo,
            ScenarioId::FourThree,
        ];
        let mut last = None;
        for (i, id) in ids.iter().enumerate() {
            last = Some(sm.apply_stage6_hysteresis(
                "XAUUSD",
                &raw(*id, 0.7),
                180,
                2,
                0.08,
                i as f64 * 10.0,
            ));
        }
        let last = last.unwrap();
        assert_eq!(last.scenario_id, ScenarioId::FourTwo);
        assert!(last.scenario_flip.is_none());
        assert_eq!(last.scenario_pending_id.as_deref(), Some("4_3"));
    }

    #[test]
    fn confirmed_switch_needs_confidence_and_consecutive_bars() {
        let mut sm = SmcStateManager::new();
        sm.apply_stage6_hysteresis("X", &raw(ScenarioId::FourTwo, 0.6), 600, 2, 0.08, 0.0);

        // First challenger snapshot: pending 1, no flip.
        let r1 = sm.apply_stage6_hysteresis("X", &raw(ScenarioId::FourThree, 0.8), 600, 2, 0.08, 10.0);
        assert_eq!(r1.scenario_id, ScenarioId::FourTwo);
        assert_eq!(r1.scenario_pending_count, 1);

        // Second consecutive challenger with a confidence edge: flip.
        let r2 = sm.apply_stage6_hysteresis("X", &raw(ScenarioId::FourThree, 0.8), 600, 2, 0.08, 20.0);
        assert_eq!(r2.scenario_id, ScenarioId::FourThree);
        let flip = r2.scenario_flip.unwrap();
        assert_eq!(flip.from, "4_2");
        assert_eq!(flip.to, "4_3");
        assert_eq!(flip.reason, "confirmed");
    }

    #[test]
    fn low_confidence_challenger_never_confirms() {
        let mut sm = SmcStateManager::new();
        sm.apply_stage6_hysteresis("X", &raw(ScenarioId::FourTwo, 0.9), 600, 2, 0.08, 0.0);
        for i in 1..10 {
            let r = sm.apply_stage6_hysteresis(
                "X",
                &raw(ScenarioId::FourThree, 0.6),
                600,
                2,
                0.08,
                i as f64 * 10.0,
            );
            assert_eq!(r.scenario_id, ScenarioId::FourTwo);
        }
    }

    #[test]
    fn ttl_expiry_switches_immediately() {
        let mut sm = SmcStateManager::new();
        sm.apply_stage6_hysteresis("X", &raw(ScenarioId::FourTwo, 0.9), 180, 3, 0.08, 0.0);
        let r = sm.apply_stage6_hysteresis("X", &raw(ScenarioId::Unclear, 0.0), 180, 3, 0.08, 200.0);
        assert_eq!(r.scenario_id, ScenarioId::Unclear);
        assert_eq!(r.scenario_flip.unwrap().reason, "ttl");
    }

    #[test]
    fn refresh_resets_ttl_and_pending() {
        let mut sm = SmcStateManager::new();
        sm.apply_stage6_hysteresis("X", &raw(ScenarioId::FourTwo, 0.7), 180, 2, 0.08, 0.0);
        sm.apply_stage6_hysteresis("X", &raw(ScenarioId::FourThree, 0.9), 180, 2, 0.08, 10.0);
        // Matching decision clears the pending challenger.
        let r = sm.apply_stage6_hysteresis("X", &raw(ScenarioId::FourTwo, 0.7), 180, 2, 0.08, 20.0);
        assert!(r.scenario_pending_id.is_none());
        assert_eq!(r.scenario_pending_count, 0);
        // TTL measured from the refresh: no flip at t=190.
        let r = sm.apply_stage6_hysteresis("X", &raw(ScenarioId::Unclear, 0.0), 180, 2, 0.08, 190.0);
        assert_eq!(r.scenario_id, ScenarioId::FourTwo);
    }

    #[test]
    fn hard_invalidation_failed_hold_flips_stable_43() {
        let mut sm = SmcStateManager::new();
        sm.apply_stage6_hysteresis("X", &raw(ScenarioId::FourThree, 0.9), 600, 3, 0.08, 0.0);

        let mut challenger = raw(ScenarioId::FourTwo, 0.6);
        challenger.telemetry.failed_hold_up = Some(true);
        let r = sm.apply_stage6_hysteresis("X", &challenger, 600, 3, 0.08, 10.0);
        assert_eq!(r.scenario_id, ScenarioId::FourTwo);
        assert_eq!(
            r.scenario_flip.unwrap().reason,
            "hard_invalidation:failed_hold"
        );
        assert_eq!(
            sm.flip_counters().get("hard_invalidation:failed_hold"),
            Some(&1)
        );
    }

    #[test]
    fn hard_invalidation_chop_flips_directional_stable() {
        let mut sm = SmcStateManager::new();
        sm.apply_stage6_hysteresis("X", &raw(ScenarioId::FourTwo, 0.9), 600, 3, 0.08, 0.0);

        let mut challenger = raw(ScenarioId::Unclear, 0.0);
        challenger.telemetry.events_after_sweep = Some(EventsAfterSweepFlags {
            truth: "CHOP".into(),
            chop: true,
            ..EventsAfterSweepFlags::default()
        });
        let r = sm.apply_stage6_hysteresis("X", &challenger, 600, 3, 0.08, 10.0);
        assert_eq!(r.scenario_id, ScenarioId::Unclear);
        assert_eq!(
            r.scenario_flip.unwrap().reason,
            "hard_invalidation:chop_after_sweep"
        );
    }

    #[test]
    fn symbols_are_independent() {
        let mut sm = SmcStateManager::new();
        sm.apply_stage6_hysteresis("AAA", &raw(ScenarioId::FourTwo, 0.7), 180, 2, 0.08, 0.0);
        let r = sm.apply_stage6_hysteresis("BBB", &raw(ScenarioId::FourThree, 0.7), 180, 2, 0.08, 0.0);
        assert_eq!(r.scenario_id, ScenarioId::FourThree);
    }
}
