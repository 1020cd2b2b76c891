// =============================================================================
// Metrics sink — lifecycle counters behind a pluggable trait
// =============================================================================
//
// The journal increments counters through `MetricsSink` so the core never
// owns an exporter. `RecorderMetricsSink` forwards to the process-wide
// `metrics` recorder (whatever the host installed — Prometheus or nothing);
// `NoopMetrics` is the default and the safe choice in tests.

use metrics::{counter, histogram};

/// Journal entity kinds tracked by the metrics.
pub type JournalEntity = &'static str;

/// Counter surface the lifecycle journal drives.
pub trait MetricsSink: Send {
    fn inc_created(&self, entity: JournalEntity);
    fn inc_removed(&self, entity: JournalEntity, reason: &str);
    fn inc_touched(&self, entity: JournalEntity, late: bool);
    fn inc_merged(&self, entity: JournalEntity);
    fn observe_lifetime_bars(&self, entity: JournalEntity, lifetime_bars: u32);
}

/// No-op sink: the default when nothing is recording.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn inc_created(&self, _entity: JournalEntity) {}
    fn inc_removed(&self, _entity: JournalEntity, _reason: &str) {}
    fn inc_touched(&self, _entity: JournalEntity, _late: bool) {}
    fn inc_merged(&self, _entity: JournalEntity) {}
    fn observe_lifetime_bars(&self, _entity: JournalEntity, _lifetime_bars: u32) {}
}

/// Sink forwarding to the globally installed `metrics` recorder. Counter
/// names are stable; exporting them is the host's concern.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecorderMetricsSink;

impl MetricsSink for RecorderMetricsSink {
    fn inc_created(&self, entity: JournalEntity) {
        counter!("smc_lifecycle_created_total", "entity" => entity).increment(1);
    }

    fn inc_removed(&self, entity: JournalEntity, reason: &str) {
        counter!(
            "smc_lifecycle_removed_total",
            "entity" => entity,
            "reason" => reason.to_string()
        )
        .increment(1);
    }

    fn inc_touched(&self, entity: JournalEntity, late: bool) {
        counter!(
            "smc_lifecycle_touched_total",
            "entity" => entity,
            "late" => if late { "true" } else { "false" }
        )
        .increment(1);
    }

    fn inc_merged(&self, entity: JournalEntity) {
        counter!("smc_lifecycle_merged_total", "entity" => entity).increment(1);
    }

    fn observe_lifetime_bars(&self, entity: JournalEntity, lifetime_bars: u32) {
        histogram!("smc_lifecycle_lifetime_bars", "entity" => entity)
            .record(f64::from(lifetime_bars));
    }
}
