use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Utc;
use tokio::time::{interval, MissedTickBehavior};

use crate::engine::{Inner, SinkRuntime};
use crate::results::CallResult;
use crate::sink::{CALL_GROUP_LABEL, TEST_DATA_TYPE_LABEL};

/// Fan-in of call outcomes from the pacer and every virtual user.
///
/// Single-threaded by design: per-buffer append order equals channel-receive
/// order. Bound to the data context so it outlives the workers and drains
/// whatever is still queued when the run ends.
pub(crate) fn spawn_collector(inner: Arc<Inner>) {
    let Some(mut rx) = inner.take_results_rx() else {
        return;
    };
    let tracker = inner.data_tracker.clone();
    tracker.spawn(async move {
        loop {
            tokio::select! {
                biased;
                received = rx.recv() => match received {
                    Some(result) => handle_result(&inner, result).await,
                    None => break,
                },
                _ = inner.data_token.cancelled() => {
                    while let Ok(result) = rx.try_recv() {
                        handle_result(&inner, result).await;
                    }
                    break;
                }
            }
        }
        tracing::info!(generator = %inner.name, "collector exited");
    });
}

/// Stamp, gate, classify, and store one call outcome.
async fn handle_result(inner: &Arc<Inner>, mut result: CallResult) {
    if result.finished_at.is_none() {
        result.finished_at = Some(Utc::now());
    }
    if result.duration.is_zero() {
        if let (Some(started), Some(finished)) = (result.started_at, result.finished_at) {
            result.duration = (finished - started).to_std().unwrap_or_default();
        }
    }

    // spurious late arrival: slower than the deadline yet not reaped as a
    // timeout; not counted anywhere
    if result.duration > inner.call_timeout && !result.timeout {
        tracing::warn!(
            generator = %inner.name,
            duration = ?result.duration,
            "dropping late call result",
        );
        return;
    }

    let stats = &inner.stats;
    if !inner.sampler.should_record(&result) {
        stats.samples_skipped.fetch_add(1, Ordering::Relaxed);
        return;
    }
    stats.samples_recorded.fetch_add(1, Ordering::Relaxed);

    if result.timeout {
        stats.call_timeout.fetch_add(1, Ordering::Relaxed);
        stats.failed.fetch_add(1, Ordering::Relaxed);
        stats.run_failed.store(true, Ordering::Relaxed);
        inner.record_error(result.error.clone());
        inner.data.append_fail(result.clone());
    } else if result.failed || !result.error.is_empty() {
        stats.failed.fetch_add(1, Ordering::Relaxed);
        stats.run_failed.store(true, Ordering::Relaxed);
        inner.record_error(result.error.clone());
        inner.data.append_fail(result.clone());
        tracing::error!(generator = %inner.name, error = %result.error, "load generator call failed");
    } else {
        stats.success.fetch_add(1, Ordering::Relaxed);
        inner.data.append_ok(result.clone());
    }

    if let Some(sink_rt) = &inner.sink {
        // streaming is best-effort: a forwarder that far behind means the
        // sink is gone, and the collector must not wait on it
        if sink_rt.tx.try_send(result).is_err() {
            tracing::warn!(generator = %inner.name, "sink channel full, dropping result");
        }
    }
}

/// The two sink forwarders, both bound to the data context.
pub(crate) fn spawn_forwarders(inner: Arc<Inner>) {
    spawn_results_forwarder(inner.clone());
    spawn_stats_forwarder(inner);
}

fn spawn_results_forwarder(inner: Arc<Inner>) {
    let Some(mut rx) = inner.take_sink_rx() else {
        return;
    };
    let tracker = inner.data_tracker.clone();
    tracker.spawn(async move {
        let Some(sink_rt) = &inner.sink else {
            return;
        };
        loop {
            tokio::select! {
                biased;
                received = rx.recv() => match received {
                    Some(result) => forward_result(&inner, sink_rt, result).await,
                    None => break,
                },
                _ = inner.data_token.cancelled() => {
                    while let Ok(result) = rx.try_recv() {
                        forward_result(&inner, sink_rt, result).await;
                    }
                    break;
                }
            }
        }
        tracing::info!(generator = %inner.name, "sink results forwarder exited");
    });
}

fn spawn_stats_forwarder(inner: Arc<Inner>) {
    let tracker = inner.data_tracker.clone();
    tracker.spawn(async move {
        let Some(sink_rt) = &inner.sink else {
            return;
        };
        let mut ticker = interval(inner.stats_poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = inner.data_token.cancelled() => break,
                _ = ticker.tick() => push_stats(&inner, sink_rt).await,
            }
        }
        tracing::info!(generator = %inner.name, "sink stats forwarder exited");
    });
}

/// Ship one call result: merge the response labels, clear the wall-clock
/// stamps (duration is already computed), and hand the payload to the sink.
async fn forward_result(inner: &Arc<Inner>, sink_rt: &SinkRuntime, mut result: CallResult) {
    let mut labels = sink_rt.labels.clone();
    labels.insert(TEST_DATA_TYPE_LABEL.to_string(), "responses".to_string());
    if !result.group.is_empty() {
        labels.insert(CALL_GROUP_LABEL.to_string(), result.group.clone());
    }
    let timestamp = result.finished_at.unwrap_or_else(Utc::now);
    result.started_at = None;
    result.finished_at = None;

    let payload = match serde_json::to_value(&result) {
        Ok(payload) => payload,
        Err(err) => {
            on_sink_error(inner, sink_rt, err.to_string());
            return;
        }
    };
    if let Err(err) = sink_rt.sink.handle_struct(&labels, timestamp, payload).await {
        on_sink_error(inner, sink_rt, err.to_string());
    }
}

/// Ship one stats snapshot with `test_data_type = "stats"` labels.
pub(crate) async fn push_stats(inner: &Arc<Inner>, sink_rt: &SinkRuntime) {
    let mut labels = sink_rt.labels.clone();
    labels.insert(TEST_DATA_TYPE_LABEL.to_string(), "stats".to_string());
    let payload = match serde_json::to_value(inner.stats.snapshot()) {
        Ok(payload) => payload,
        Err(err) => {
            on_sink_error(inner, sink_rt, err.to_string());
            return;
        }
    };
    if let Err(err) = sink_rt.sink.handle_struct(&labels, Utc::now(), payload).await {
        on_sink_error(inner, sink_rt, err.to_string());
    }
}

/// Count a publish failure against the error budget; an exhausted budget is
/// fatal for the whole process.
fn on_sink_error(inner: &Arc<Inner>, sink_rt: &SinkRuntime, error: String) {
    tracing::error!(generator = %inner.name, error = %error, "sink publish error");
    if sink_rt.budget.record_failure() {
        tracing::error!(
            generator = %inner.name,
            "sink error threshold exceeded, terminating",
        );
        std::process::exit(1);
    }
}
