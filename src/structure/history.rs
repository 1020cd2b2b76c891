// =============================================================================
// Structure event history — per (symbol, timeframe) TTL'd BOS/CHOCH memory
// =============================================================================
//
// The only process-wide state of the pipeline besides metrics. A single map
// guarded by one lock, keyed by lower-cased (symbol, timeframe); entries are
// keyed by (event_type, direction, time, price) so re-detections of the same
// event refresh `last_seen` instead of duplicating. Pruning drops entries
// older than the retention window (measured against the snapshot end time)
// and then caps the bucket to the newest `max_entries`, sorted by event
// time.

use std::collections::HashMap;
use std::sync::OnceLock;

use parking_lot::Mutex;
use tracing::debug;

use crate::types::SmcStructureEvent;

#[derive(Debug, Clone)]
struct TrackedEvent {
    event: SmcStructureEvent,
    #[allow(dead_code)]
    first_seen: i64,
    last_seen: i64,
}

/// BOS/CHOCH memory with TTL and an entry cap.
#[derive(Default)]
pub struct StructureEventHistory {
    store: Mutex<HashMap<(String, String), Vec<(String, TrackedEvent)>>>,
}

impl StructureEventHistory {
    /// Merge this snapshot's events into the bucket and return the retained
    /// history sorted by event time.
    pub fn update_history(
        &self,
        symbol: &str,
        timeframe: &str,
        events: &[SmcStructureEvent],
        snapshot_end_ts: Option<i64>,
        retention_minutes: u32,
        max_entries: usize,
    ) -> Vec<SmcStructureEvent> {
        let key = (symbol.to_lowercase(), timeframe.to_lowercase());
        let now = snapshot_end_ts.unwrap_or(0);

        let mut store = self.store.lock();
        let bucket = store.entry(key.clone()).or_default();

        let mut added = 0usize;
        for event in events {
            let event_key = event_key(event);
            if let Some(pos) = bucket.iter().position(|(k, _)| *k == event_key) {
                let tracked = &mut bucket[pos].1;
                tracked.event = event.clone();
                tracked.last_seen = tracked.last_seen.max(now);
            } else {
                bucket.push((
                    event_key,
                    TrackedEvent {
                        event: event.clone(),
                        first_seen: now,
                        last_seen: now,
                    },
                ));
                added += 1;
            }
        }

        let pruned = prune_bucket(bucket, now, retention_minutes, max_entries);

        debug!(
            symbol = %key.0,
            timeframe = %key.1,
            added,
            pruned,
            retained = bucket.len(),
            retention_minutes,
            max_entries,
            "BOS/CHOCH history updated"
        );

        bucket.iter().map(|(_, t)| t.event.clone()).collect()
    }

    /// Retained events without mutating the bucket.
    pub fn get_history(&self, symbol: &str, timeframe: &str) -> Vec<SmcStructureEvent> {
        let key = (symbol.to_lowercase(), timeframe.to_lowercase());
        let store = self.store.lock();
        store
            .get(&key)
            .map(|bucket| bucket.iter().map(|(_, t)| t.event.clone()).collect())
            .unwrap_or_default()
    }

    /// Drop buckets. `None`/`None` clears everything; a filter clears only
    /// the matching symbol and/or timeframe.
    pub fn clear(&self, symbol: Option<&str>, timeframe: Option<&str>) {
        let mut store = self.store.lock();
        if symbol.is_none() && timeframe.is_none() {
            store.clear();
            return;
        }
        let symbol_key = symbol.map(str::to_lowercase);
        let timeframe_key = timeframe.map(str::to_lowercase);
        store.retain(|(existing_symbol, existing_tf), _| {
            let symbol_match = symbol_key
                .as_deref()
                .map_or(true, |s| s == existing_symbol);
            let tf_match = timeframe_key.as_deref().map_or(true, |t| t == existing_tf);
            !(symbol_match && tf_match)
        });
    }
}

fn prune_bucket(
    bucket: &mut Vec<(String, TrackedEvent)>,
    now: i64,
    retention_minutes: u32,
    max_entries: usize,
) -> usize {
    let before = bucket.len();
    if retention_minutes > 0 {
        let cutoff = now - i64::from(retention_minutes) * 60_000;
        bucket.retain(|(_, tracked)| tracked.event.time >= cutoff);
    }
    bucket.sort_by_key(|(_, tracked)| tracked.event.time);
    if max_entries > 0 && bucket.len() > max_entries {
        let excess = bucket.len() - max_entries;
        bucket.drain(0..excess);
    }
    before - bucket.len()
}

fn event_key(event: &SmcStructureEvent) -> String {
    format!(
        "{}:{}:{}:{:.6}",
        event.event_type.name(),
        event.direction.name(),
        event.time,
        event.price_level
    )
}

static EVENT_HISTORY: OnceLock<StructureEventHistory> = OnceLock::new();

/// Process-wide history instance.
pub fn event_history() -> &'static StructureEventHistory {
    EVENT_HISTORY.get_or_init(StructureEventHistory::default)
}

/// Reset the history cache for tests or diagnostics.
pub fn reset_event_history(symbol: Option<&str>, timeframe: Option<&str>) {
    event_history().clear(symbol, timeframe);
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        Direction, LegLabel, LevelSide, SmcLeg, SmcSwing, StructureEventType,
    };

    fn event(time: i64, price: f64) -> SmcStructureEvent {
        let swing = |idx: usize, p: f64, kind: LevelSide| SmcSwing {
            index: idx,
            time,
            price: p,
            kind,
            strength: 2,
        };
        SmcStructureEvent {
            event_type: StructureEventType::Bos,
            direction: Direction::Long,
            price_level: price,
            time,
            source_leg: SmcLeg {
                from_swing: swing(0, price - 1.0, LevelSide::Low),
                to_swing: swing(1, price, LevelSide::High),
                label: LegLabel::Hh,
                reference_price: Some(price - 1.0),
            },
        }
    }

    #[test]
    fn dedupes_repeated_events() {
        let history = StructureEventHistory::default();
        let ev = event(1_000_000, 100.0);
        let first = history.update_history("sym_a", "5m", &[ev.clone()], Some(1_000_000), 60, 10);
        assert_eq!(first.len(), 1);
        let second = history.update_history("SYM_A", "5M", &[ev], Some(1_300_000), 60, 10);
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn retention_prunes_old_events() {
        let history = StructureEventHistory::default();
        let old = event(0, 100.0);
        let fresh = event(10 * 60_000, 101.0);
        history.update_history("sym_b", "5m", &[old], Some(0), 5, 10);
        let retained =
            history.update_history("sym_b", "5m", &[fresh], Some(10 * 60_000), 5, 10);
        assert_eq!(retained.len(), 1);
        assert!((retained[0].price_level - 101.0).abs() < f64::EPSILON);
    }

    #[test]
    fn cap_keeps_newest() {
        let history = StructureEventHistory::default();
        let events: Vec<SmcStructureEvent> =
            (0..5).map(|i| event(i * 60_000, 100.0 + i as f64)).collect();
        let retained =
            history.update_history("sym_c", "5m", &events, Some(5 * 60_000), 0, 3);
        assert_eq!(retained.len(), 3);
        assert!((retained[0].price_level - 102.0).abs() < f64::EPSILON);
        assert!((retained[2].price_level - 104.0).abs() < f64::EPSILON);
    }

    #[test]
    fn clear_by_symbol() {
        let history = StructureEventHistory::default();
        history.update_history("sym_d", "5m", &[event(0, 1.0)], Some(0), 0, 10);
        history.update_history("sym_e", "5m", &[event(0, 2.0)], Some(0), 0, 10);
        history.clear(Some("sym_d"), None);
        assert!(history.get_history("sym_d", "5m").is_empty());
        assert_eq!(history.get_history("sym_e", "5m").len(), 1);
    }
}
