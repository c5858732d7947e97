use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use serde::{Deserialize, Serialize};

/// Live engine counters. Every field is a 64-bit atomic so the stats ticker
/// and the sink forwarder can read concurrently with the collector without
/// synchronization; readers may observe any consistent interleaving but
/// never torn values.
#[derive(Debug, Default)]
pub struct Stats {
    pub current_rate: AtomicI64,
    pub current_vus: AtomicI64,
    pub last_segment: AtomicI64,
    pub current_segment: AtomicI64,
    pub current_step: AtomicI64,
    pub samples_recorded: AtomicI64,
    pub samples_skipped: AtomicI64,
    pub success: AtomicI64,
    pub failed: AtomicI64,
    pub call_timeout: AtomicI64,
    pub run_stopped: AtomicBool,
    pub run_failed: AtomicBool,
    pub duration_nanos: AtomicI64,
    pub time_unit_nanos: AtomicI64,
}

impl Stats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            current_rps: self.current_rate.load(Ordering::Relaxed),
            current_instances: self.current_vus.load(Ordering::Relaxed),
            last_segment: self.last_segment.load(Ordering::Relaxed),
            current_segment: self.current_segment.load(Ordering::Relaxed),
            current_step: self.current_step.load(Ordering::Relaxed),
            samples_recorded: self.samples_recorded.load(Ordering::Relaxed),
            samples_skipped: self.samples_skipped.load(Ordering::Relaxed),
            success: self.success.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            call_timeout: self.call_timeout.load(Ordering::Relaxed),
            run_stopped: self.run_stopped.load(Ordering::Relaxed),
            run_failed: self.run_failed.load(Ordering::Relaxed),
            duration_nanos: self.duration_nanos.load(Ordering::Relaxed),
            time_unit_nanos: self.time_unit_nanos.load(Ordering::Relaxed),
        }
    }
}

/// Flat point-in-time stats export, shipped to the sink with
/// `test_data_type = "stats"` labels and printed by harnesses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub current_rps: i64,
    pub current_instances: i64,
    pub last_segment: i64,
    pub current_segment: i64,
    pub current_step: i64,
    pub samples_recorded: i64,
    pub samples_skipped: i64,
    pub success: i64,
    pub failed: i64,
    #[serde(rename = "callTimeout")]
    pub call_timeout: i64,
    pub run_stopped: bool,
    pub run_failed: bool,
    pub duration_nanos: i64,
    pub time_unit_nanos: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let stats = Stats::default();
        stats.current_rate.store(5, Ordering::Relaxed);
        stats.success.fetch_add(3, Ordering::Relaxed);
        stats.failed.fetch_add(1, Ordering::Relaxed);
        stats.run_failed.store(true, Ordering::Relaxed);

        let snap = stats.snapshot();
        assert_eq!(snap.current_rps, 5);
        assert_eq!(snap.success, 3);
        assert_eq!(snap.failed, 1);
        assert!(snap.run_failed);
        assert!(!snap.run_stopped);
    }

    #[test]
    fn snapshot_serializes_with_wire_names() {
        let stats = Stats::default();
        stats.call_timeout.store(2, Ordering::Relaxed);
        let json = serde_json::to_value(stats.snapshot()).expect("serialize");
        assert_eq!(json["callTimeout"], 2);
        assert_eq!(json["current_rps"], 0);
        assert_eq!(json["current_instances"], 0);
        assert_eq!(json["run_stopped"], false);
    }
}
