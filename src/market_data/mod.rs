// =============================================================================
// Market Data Module
// =============================================================================
//
// OHLCV frames (validated, sorted, deduplicated bar series) and the
// best-effort validators for the transport wire contracts. No transport
// code lives here — only shapes and validation.

pub mod contracts;
pub mod frame;

pub use contracts::{
    validate_ohlcv_message, validate_price_tick_message, validate_status_message, OhlcvMessage,
    PriceTickMessage, StatusMessage,
};
pub use frame::{Bar, Frame};
