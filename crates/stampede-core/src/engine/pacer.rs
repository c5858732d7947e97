use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::engine::{pause_gate, Inner};
use crate::error::Error;
use crate::load::{Gun, RunContext};
use crate::results::CallResult;

pub(crate) fn spawn_pacer(inner: Arc<Inner>) {
    let tracker = inner.work_tracker.clone();
    tracker.spawn(async move { run_pacer(inner).await });
}

/// Rate-mode driver: one permit, one call attempt. The limiter pointer is
/// snapshotted before each take, so a mid-wait rate change affects the next
/// permit, never the current one.
async fn run_pacer(inner: Arc<Inner>) {
    let Some(gun) = inner.gun.clone() else {
        return;
    };
    let ctx = inner.run_ctx();
    let mut paused = inner.paused.subscribe();
    loop {
        if !pause_gate(&mut paused, &inner.work_token).await {
            break;
        }
        let limiter = inner.limiter.load();
        tokio::select! {
            _ = inner.work_token.cancelled() => break,
            _ = limiter.until_ready() => {}
        }
        spawn_call_attempt(&inner, gun.clone(), ctx.clone());
    }
    tracing::info!(generator = %inner.name, "rate pacer stopped");
}

/// One paced call, split into a worker/reaper pair on the work tracker.
///
/// The worker always runs the gun call to completion — a call in flight is
/// never aborted by the per-call deadline, only its delivery is abandoned.
/// The reaper races the delivery against the deadline and forwards exactly
/// one result per permit: the gun's own, stamped on completion, or a
/// synthetic timeout.
fn spawn_call_attempt(inner: &Arc<Inner>, gun: Arc<dyn Gun>, ctx: RunContext) {
    let tracker = inner.work_tracker.clone();
    let call_timeout = inner.call_timeout;
    let started_at = Utc::now();
    let started = Instant::now();

    let (result_tx, mut result_rx) = oneshot::channel();
    let worker_ctx = ctx.clone();
    tracker.spawn(async move {
        // the send fails when the reaper has already given up on this
        // attempt; the completed result is simply discarded
        let _ = result_tx.send(gun.call(&worker_ctx).await);
    });

    tracker.spawn(async move {
        let result = tokio::select! {
            biased;
            received = &mut result_rx => match received {
                Ok(mut result) => {
                    if result.started_at.is_none() {
                        result.started_at = Some(started_at);
                    }
                    result.finished_at = Some(Utc::now());
                    result.duration = started.elapsed();
                    result
                }
                // worker died without delivering
                Err(_) => synthetic_timeout(started_at, started.elapsed()),
            },
            _ = tokio::time::sleep(call_timeout) => {
                synthetic_timeout(started_at, started.elapsed())
            }
        };
        ctx.report(result).await;
    });
}

fn synthetic_timeout(started_at: DateTime<Utc>, duration: Duration) -> CallResult {
    CallResult {
        timeout: true,
        error: Error::CallTimeout.to_string(),
        duration,
        started_at: Some(started_at),
        finished_at: Some(Utc::now()),
        ..CallResult::default()
    }
}
