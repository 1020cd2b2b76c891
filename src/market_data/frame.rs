// =============================================================================
// OHLCV Frame — validated bar series for one (symbol, timeframe)
// =============================================================================
//
// A `Frame` is the core's only view of price data: bars strictly increasing
// by `open_time` with keep-first dedup on ties, all prices finite. Malformed
// bars are dropped during normalization rather than raised — validators
// return an absent value meaning "skip".

use serde::{Deserialize, Serialize};

fn default_complete() -> bool {
    true
}

/// A single OHLCV bar. Times are UTC milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub open_time: i64,
    /// Derived as `open_time` when the source omitted it.
    #[serde(default)]
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
    /// Incomplete bars are excluded from complete-only computations.
    #[serde(default = "default_complete")]
    pub complete: bool,
}

impl Bar {
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn full_range(&self) -> f64 {
        (self.high - self.low).abs()
    }

    pub fn body_high(&self) -> f64 {
        self.open.max(self.close)
    }

    pub fn body_low(&self) -> f64 {
        self.open.min(self.close)
    }

    pub fn upper_wick(&self) -> f64 {
        (self.high - self.body_high()).max(0.0)
    }

    pub fn lower_wick(&self) -> f64 {
        (self.body_low() - self.low).max(0.0)
    }

    /// Close below open. Bars with `close == open` count as bullish.
    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    fn prices_finite(&self) -> bool {
        self.open.is_finite() && self.high.is_finite() && self.low.is_finite() && self.close.is_finite()
    }
}

/// Validated, ordered bar series.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Frame {
    bars: Vec<Bar>,
}

impl Frame {
    /// Normalize a raw bar list: drop non-finite bars, derive missing
    /// `close_time`, stable-sort by `open_time`, keep-first on duplicates.
    pub fn from_bars(raw: Vec<Bar>) -> Self {
        let mut bars: Vec<Bar> = raw
            .into_iter()
            .filter(|b| b.prices_finite() && b.volume.is_finite())
            .map(|mut b| {
                if b.close_time < b.open_time {
                    b.close_time = b.open_time;
                }
                b
            })
            .collect();
        bars.sort_by_key(|b| b.open_time);
        bars.dedup_by_key(|b| b.open_time);
        Self { bars }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn get(&self, idx: usize) -> Option<&Bar> {
        self.bars.get(idx)
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn last_close(&self) -> Option<f64> {
        self.bars.last().map(|b| b.close)
    }

    /// Last `n` bars (all of them when the frame is shorter).
    pub fn tail(&self, n: usize) -> &[Bar] {
        let start = self.bars.len().saturating_sub(n);
        &self.bars[start..]
    }

    /// A new frame holding only the last `n` bars.
    pub fn tail_frame(&self, n: usize) -> Frame {
        Frame {
            bars: self.tail(n).to_vec(),
        }
    }

    /// Bars that are not explicitly incomplete.
    pub fn complete_bars(&self) -> Vec<Bar> {
        self.bars.iter().filter(|b| b.complete).copied().collect()
    }

    pub fn count_complete(&self) -> usize {
        self.bars.iter().filter(|b| b.complete).count()
    }

    /// Last `n` complete bars.
    pub fn tail_complete(&self, n: usize) -> Vec<Bar> {
        let complete = self.complete_bars();
        let start = complete.len().saturating_sub(n.max(1));
        complete[start..].to_vec()
    }
}

impl From<Vec<Bar>> for Frame {
    fn from(bars: Vec<Bar>) -> Self {
        Self::from_bars(bars)
    }
}
