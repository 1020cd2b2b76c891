// =============================================================================
// Aurora SMC — Smart-Money-Concepts market-structure analysis core
// =============================================================================
//
// A streaming, multi-timeframe pipeline: given OHLCV frames for a symbol it
// computes a structured hint describing market structure (swings, legs,
// trend, BOS/CHOCH, dealing range, OTE), liquidity (pools, magnets, SFP and
// wick-cluster events, AMD phase), zones/POI (order blocks, breakers, FVGs),
// 1m execution micro-events, and a deterministic 4_2/4_3 scenario decision.
//
// The crate is a pure library: every snapshot call is a synchronous
// computation over an immutable input. Transport (Redis, WebSocket), servers
// and UI serialisation live in the caller. Two stateful companions —
// `stage6::SmcStateManager` (anti-flip hysteresis) and
// `journal::SmcLifecycleJournal` (created/removed/touched/merged diffing) —
// are owned per (symbol, timeframe) by the caller and driven snapshot by
// snapshot.
// =============================================================================

pub mod config;
pub mod engine;
pub mod execution;
pub mod indicators;
pub mod journal;
pub mod liquidity;
pub mod market_data;
pub mod metrics;
pub mod serialize;
pub mod stage6;
pub mod structure;
pub mod types;
pub mod zones;

pub use config::SmcConfig;
pub use engine::SmcEngine;
pub use types::{SmcHint, SmcInput};
