// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free implementations of the indicators used by the SMC
// core. Every public function returns `Option<T>` so callers are forced to
// handle insufficient-data and numerical-edge-case scenarios.

pub mod atr;

pub use atr::{atr_last, atr_median, atr_series, ATR_PERIOD};
