// =============================================================================
// Stage6 — deterministic 4_2 / 4_3 scenario classification
// =============================================================================
//
// Not an entry signal: a technical read of what price did after a sweep in
// HTF context. The raw decision is computed per snapshot by
// `scenario::decide_42_43`; anti-flip (TTL, confirm bars, switch delta,
// hard invalidation) lives in `hysteresis::SmcStateManager`, which the
// caller owns per symbol. Both are allowed to answer UNCLEAR.

pub mod hysteresis;
pub mod scenario;

use serde::{Deserialize, Serialize};

pub use hysteresis::{ScenarioFlip, SmcStateManager, Stage6StableResult};
pub use scenario::{
    decide_42_43, KeyLevels, ScenarioDirection, ScenarioId, Stage6Decision, Stage6Telemetry,
};

/// Signal wrapper placed into `SmcHint.signals`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmcSignal {
    #[serde(rename = "type")]
    pub signal_type: String,
    pub direction: ScenarioDirection,
    pub confidence: f64,
    pub meta: SignalMeta,
}

/// Signal payload: the raw Stage6 decision, verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalMeta {
    pub scenario_id: ScenarioId,
    pub why: Vec<String>,
    pub key_levels: KeyLevels,
    pub telemetry: Stage6Telemetry,
}

/// Convert a decision into the hint signal shape.
pub fn to_signal(decision: Stage6Decision) -> SmcSignal {
    SmcSignal {
        signal_type: "SCENARIO".to_string(),
        direction: decision.direction,
        confidence: decision.confidence,
        meta: SignalMeta {
            scenario_id: decision.scenario_id,
            why: decision.why,
            key_levels: decision.key_levels,
            telemetry: decision.telemetry,
        },
    }
}
