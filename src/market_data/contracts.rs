// =============================================================================
// Wire contracts — best-effort validation for transport messages
// =============================================================================
//
// The transport layer (out of scope for this crate) delivers three message
// shapes: OHLCV batches, bid/ask ticks and aggregated status. The validators
// here are the single source of truth for what the core accepts:
//   - forward-compatible: unknown fields are preserved on bars and ignored
//     elsewhere;
//   - no exceptions outward: malformed bars are dropped, a message with no
//     valid bar left yields `None`;
//   - numbers arriving as strings are coerced.

use serde_json::{Map, Value};

use super::frame::{Bar, Frame};

/// Validated OHLCV batch. `bars` keeps the raw objects (extra fields and
/// all); [`OhlcvMessage::to_frame`] produces the typed series.
#[derive(Debug, Clone, PartialEq)]
pub struct OhlcvMessage {
    pub symbol: String,
    pub tf: String,
    pub bars: Vec<Map<String, Value>>,
    pub sig: Option<String>,
}

impl OhlcvMessage {
    /// Convert the validated bars into a normalized [`Frame`].
    pub fn to_frame(&self) -> Frame {
        let bars: Vec<Bar> = self
            .bars
            .iter()
            .filter_map(|raw| serde_json::from_value(Value::Object(raw.clone())).ok())
            .collect();
        Frame::from_bars(bars)
    }
}

/// Validated bid/ask tick snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceTickMessage {
    pub symbol: String,
    pub bid: f64,
    pub ask: f64,
    pub mid: f64,
    pub tick_ts: f64,
    pub snap_ts: f64,
}

/// Validated aggregated status. Every field is optional — partial payloads
/// are part of the contract.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusMessage {
    pub ts: Option<f64>,
    pub process: Option<String>,
    pub market: Option<String>,
    pub price: Option<String>,
    pub ohlcv: Option<String>,
    pub note: Option<String>,
    pub session: Option<Map<String, Value>>,
}

fn coerce_object(raw: &str) -> Option<Map<String, Value>> {
    let text = raw.trim();
    if text.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn coerce_f64(value: Option<&Value>) -> Option<f64> {
    let num = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    num.is_finite().then_some(num)
}

fn coerce_i64(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f as i64),
        _ => None,
    }
}

fn coerce_string(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

/// Validate an OHLCV message. Bars missing required fields, with NaN prices
/// or `close_time < open_time` are dropped; unknown bar fields survive.
pub fn validate_ohlcv_message(raw: &str) -> Option<OhlcvMessage> {
    let obj = coerce_object(raw)?;
    let symbol = coerce_string(obj.get("symbol"))?;
    let tf = coerce_string(obj.get("tf").or_else(|| obj.get("timeframe")))?;
    let bars = obj.get("bars")?.as_array()?;

    let mut safe_bars: Vec<Map<String, Value>> = Vec::with_capacity(bars.len());
    for bar in bars {
        let bar = match bar {
            Value::Object(map) => map,
            _ => continue,
        };
        let open_time = match coerce_i64(bar.get("open_time")) {
            Some(v) => v,
            None => continue,
        };
        let close_time = match coerce_i64(bar.get("close_time")) {
            Some(v) => v,
            None => continue,
        };
        if close_time < open_time {
            continue;
        }
        let open = coerce_f64(bar.get("open"));
        let high = coerce_f64(bar.get("high"));
        let low = coerce_f64(bar.get("low"));
        let close = coerce_f64(bar.get("close"));
        let volume = coerce_f64(bar.get("volume"));
        let (open, high, low, close, volume) = match (open, high, low, close, volume) {
            (Some(o), Some(h), Some(l), Some(c), Some(v)) => (o, h, l, c, v),
            _ => continue,
        };

        // Rebuild with normalized numerics first, then carry every other
        // field forward untouched (forward-compat).
        let mut normalized = Map::new();
        normalized.insert("open_time".into(), open_time.into());
        normalized.insert("close_time".into(), close_time.into());
        normalized.insert("open".into(), serde_json::json!(open));
        normalized.insert("high".into(), serde_json::json!(high));
        normalized.insert("low".into(), serde_json::json!(low));
        normalized.insert("close".into(), serde_json::json!(close));
        normalized.insert("volume".into(), serde_json::json!(volume));
        for (key, value) in bar {
            if !normalized.contains_key(key) {
                normalized.insert(key.clone(), value.clone());
            }
        }
        safe_bars.push(normalized);
    }

    if safe_bars.is_empty() {
        return None;
    }

    Some(OhlcvMessage {
        symbol,
        tf,
        bars: safe_bars,
        sig: coerce_string(obj.get("sig")),
    })
}

/// Validate a bid/ask tick snapshot.
pub fn validate_price_tick_message(raw: &str) -> Option<PriceTickMessage> {
    let obj = coerce_object(raw)?;
    Some(PriceTickMessage {
        symbol: coerce_string(obj.get("symbol"))?,
        bid: coerce_f64(obj.get("bid"))?,
        ask: coerce_f64(obj.get("ask"))?,
        mid: coerce_f64(obj.get("mid"))?,
        tick_ts: coerce_f64(obj.get("tick_ts"))?,
        snap_ts: coerce_f64(obj.get("snap_ts"))?,
    })
}

/// Validate an aggregated status message. Partial payloads are fine; a
/// non-object `session` or unparseable `ts` rejects the message.
pub fn validate_status_message(raw: &str) -> Option<StatusMessage> {
    let obj = coerce_object(raw)?;
    let mut out = StatusMessage::default();

    if let Some(ts) = obj.get("ts") {
        out.ts = Some(coerce_f64(Some(ts))?);
    }
    out.process = coerce_string(obj.get("process"));
    out.market = coerce_string(obj.get("market"));
    out.price = coerce_string(obj.get("price"));
    out.ohlcv = coerce_string(obj.get("ohlcv"));
    out.note = coerce_string(obj.get("note"));

    if let Some(session) = obj.get("session") {
        match session {
            Value::Object(map) => out.session = Some(map.clone()),
            Value::Null => {}
            _ => return None,
        }
    }
    Some(out)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ohlcv_happy_path_with_extra_fields() {
        let raw = r#"{
            "symbol": "XAUUSD",
            "tf": "5m",
            "bars": [
                {"open_time": 0, "close_time": 299999, "open": "100.0", "high": 101,
                 "low": 99.5, "close": 100.5, "volume": "12.5",
                 "synthetic": true, "source": "replay", "microstructure": {"ticks": 42}}
            ]
        }"#;
        let msg = validate_ohlcv_message(raw).expect("should validate");
        assert_eq!(msg.symbol, "XAUUSD");
        assert_eq!(msg.tf, "5m");
        assert_eq!(msg.bars.len(), 1);
        // Unknown fields preserved forward.
        assert_eq!(msg.bars[0]["synthetic"], serde_json::json!(true));
        assert!(msg.bars[0].contains_key("microstructure"));
        let frame = msg.to_frame();
        assert_eq!(frame.len(), 1);
        assert!((frame.bars()[0].open - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn ohlcv_drops_malformed_bars_only() {
        let raw = r#"{
            "symbol": "XAUUSD", "tf": "5m",
            "bars": [
                {"open_time": 0, "close_time": 299999, "open": 1, "high": 2, "low": 0.5, "close": 1.5, "volume": 1},
                {"open_time": 300000, "close_time": 100, "open": 1, "high": 2, "low": 0.5, "close": 1.5, "volume": 1},
                {"open_time": 600000, "close_time": 899999, "open": "NaN", "high": 2, "low": 0.5, "close": 1.5, "volume": 1},
                {"open_time": 900000, "close_time": 1199999, "open": 1, "high": 2, "low": 0.5, "close": 1.5}
            ]
        }"#;
        let msg = validate_ohlcv_message(raw).expect("one valid bar remains");
        assert_eq!(msg.bars.len(), 1);
        assert_eq!(msg.bars[0]["open_time"], serde_json::json!(0));
    }

    #[test]
    fn ohlcv_rejects_when_nothing_valid_remains() {
        let raw = r#"{"symbol": "X", "tf": "5m", "bars": [{"open_time": 1}]}"#;
        assert!(validate_ohlcv_message(raw).is_none());
        assert!(validate_ohlcv_message("").is_none());
        assert!(validate_ohlcv_message("not json").is_none());
        assert!(validate_ohlcv_message(r#"{"tf": "5m", "bars": []}"#).is_none());
    }

    #[test]
    fn ohlcv_accepts_timeframe_alias() {
        let raw = r#"{"symbol": "X", "timeframe": "1h",
            "bars": [{"open_time": 0, "close_time": 1, "open": 1, "high": 1, "low": 1, "close": 1, "volume": 0}]}"#;
        let msg = validate_ohlcv_message(raw).unwrap();
        assert_eq!(msg.tf, "1h");
    }

    #[test]
    fn price_tick_roundtrip() {
        let raw = r#"{"symbol": "EURUSD", "bid": 1.1, "ask": 1.2, "mid": 1.15,
                      "tick_ts": 1700000000.5, "snap_ts": 1700000001.0}"#;
        let msg = validate_price_tick_message(raw).unwrap();
        assert_eq!(msg.symbol, "EURUSD");
        assert!((msg.mid - 1.15).abs() < f64::EPSILON);
        assert!(validate_price_tick_message(r#"{"symbol": "EURUSD"}"#).is_none());
    }

    #[test]
    fn status_accepts_partial_payloads() {
        let msg = validate_status_message(r#"{"market": "open"}"#).unwrap();
        assert_eq!(msg.market.as_deref(), Some("open"));
        assert!(msg.ts.is_none());

        let msg = validate_status_message(r#"{"ts": 1700000000, "session": {"tag": "NY"}}"#).unwrap();
        assert!(msg.ts.is_some());
        assert!(msg.session.is_some());

        // Non-object session rejects the whole message.
        assert!(validate_status_message(r#"{"session": "NY"}"#).is_none());
    }
}
