use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::Error;

/// Label attached to forwarded call results.
pub const TEST_DATA_TYPE_LABEL: &str = "test_data_type";
/// Label carrying [`crate::CallResult::group`] on forwarded results.
pub const CALL_GROUP_LABEL: &str = "call_group";

/// External log-aggregation endpoint consuming line-delimited structured
/// records. The shipping client itself lives outside this crate; the engine
/// only drives this interface.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Append one line with a label set.
    async fn handle(
        &self,
        labels: &HashMap<String, String>,
        timestamp: DateTime<Utc>,
        line: String,
    ) -> Result<(), Error>;

    /// Append one JSON-marshalled record with a label set.
    async fn handle_struct(
        &self,
        labels: &HashMap<String, String>,
        timestamp: DateTime<Utc>,
        payload: Value,
    ) -> Result<(), Error> {
        let line = serde_json::to_string(&payload)
            .map_err(|e| Error::Sink(format!("failed to marshal payload: {e}")))?;
        self.handle(labels, timestamp, line).await
    }

    /// Flush and shut down the sink.
    async fn stop(&self);
}

/// Sink wiring for an engine.
pub struct SinkConfig {
    pub sink: Arc<dyn LogSink>,
    /// Publish-error tolerance: `-1` ignore all (default), `0` fail on the
    /// first error, `k > 0` tolerate `k - 1`.
    pub max_errors: i64,
    /// Extra labels merged into the engine's default label set for every
    /// record.
    pub extra_labels: HashMap<String, String>,
}

impl SinkConfig {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self {
            sink,
            max_errors: -1,
            extra_labels: HashMap::new(),
        }
    }

    pub fn with_max_errors(mut self, max_errors: i64) -> Self {
        self.max_errors = max_errors;
        self
    }
}

/// Counts sink publish errors against the configured threshold.
#[derive(Debug)]
pub(crate) struct ErrorBudget {
    max_errors: i64,
    seen: AtomicI64,
}

impl ErrorBudget {
    pub(crate) fn new(max_errors: i64) -> Self {
        Self {
            max_errors,
            seen: AtomicI64::new(0),
        }
    }

    /// Record one failure; returns `true` when the budget is exhausted and
    /// the run must be aborted.
    pub(crate) fn record_failure(&self) -> bool {
        let seen = self.seen.fetch_add(1, Ordering::Relaxed) + 1;
        if self.max_errors < 0 {
            return false;
        }
        seen >= self.max_errors.max(1)
    }
}

/// One record captured by [`InMemorySink`].
#[derive(Debug, Clone)]
pub struct SinkEntry {
    pub labels: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
    pub line: String,
}

/// Sink that keeps records in memory, for tests and for streaming-less runs
/// where results should still be inspectable as sink entries.
#[derive(Debug, Default)]
pub struct InMemorySink {
    entries: Mutex<Vec<SinkEntry>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<SinkEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Entries whose label set contains `key = value`.
    pub fn entries_with_label(&self, key: &str, value: &str) -> Vec<SinkEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.labels.get(key).map(String::as_str) == Some(value))
            .collect()
    }
}

#[async_trait]
impl LogSink for InMemorySink {
    async fn handle(
        &self,
        labels: &HashMap<String, String>,
        timestamp: DateTime<Utc>,
        line: String,
    ) -> Result<(), Error> {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(SinkEntry {
                labels: labels.clone(),
                timestamp,
                line,
            });
        }
        Ok(())
    }

    async fn stop(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_sink_records_entries() {
        let sink = InMemorySink::new();
        let labels = HashMap::from([("a".to_string(), "b".to_string())]);
        sink.handle(&labels, Utc::now(), "line".to_string())
            .await
            .expect("handle");

        let entries = sink.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].line, "line");
        assert_eq!(entries[0].labels["a"], "b");
    }

    #[tokio::test]
    async fn handle_struct_marshals_json() {
        let sink = InMemorySink::new();
        sink.handle_struct(
            &HashMap::new(),
            Utc::now(),
            serde_json::json!({"success": 3}),
        )
        .await
        .expect("handle_struct");

        let entries = sink.entries();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].line.contains("\"success\":3"));
    }

    #[tokio::test]
    async fn entries_with_label_filters() {
        let sink = InMemorySink::new();
        let stats = HashMap::from([(TEST_DATA_TYPE_LABEL.to_string(), "stats".to_string())]);
        let responses =
            HashMap::from([(TEST_DATA_TYPE_LABEL.to_string(), "responses".to_string())]);
        sink.handle(&stats, Utc::now(), "s".into()).await.unwrap();
        sink.handle(&responses, Utc::now(), "r".into())
            .await
            .unwrap();

        assert_eq!(sink.entries_with_label(TEST_DATA_TYPE_LABEL, "stats").len(), 1);
        assert_eq!(
            sink.entries_with_label(TEST_DATA_TYPE_LABEL, "responses")[0].line,
            "r"
        );
    }

    #[test]
    fn budget_ignore_never_exhausts() {
        let budget = ErrorBudget::new(-1);
        for _ in 0..1000 {
            assert!(!budget.record_failure());
        }
    }

    #[test]
    fn budget_zero_fails_on_first() {
        let budget = ErrorBudget::new(0);
        assert!(budget.record_failure());
    }

    #[test]
    fn budget_k_tolerates_k_minus_one() {
        let budget = ErrorBudget::new(3);
        assert!(!budget.record_failure());
        assert!(!budget.record_failure());
        assert!(budget.record_failure());
    }
}
