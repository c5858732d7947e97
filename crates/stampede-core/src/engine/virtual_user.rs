use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::engine::Inner;
use crate::error::Error;
use crate::load::VirtualUser;
use crate::results::CallResult;

/// Scheduler-side handle to one live virtual-user instance. Exactly one stop
/// token per instance; stopping is signal-only, the worker tears down on its
/// own time and stays on the work tracker until it exits.
pub(crate) struct VuHandle {
    token: CancellationToken,
}

impl VuHandle {
    pub(crate) fn stop(&self) {
        self.token.cancel();
    }
}

/// Run one virtual user: `setup`, then `call` in a loop, then `teardown`
/// once the work context or the instance's stop token fires.
///
/// Each iteration hands the instance to a child task that always runs the
/// call to completion — an in-flight call is never aborted. When the
/// per-call deadline elapses first, a synthetic timeout is published and the
/// loop resumes once the overrunning call hands the instance back (calls are
/// strictly sequential per instance); whatever the late call reported is
/// discarded by the collector's late-arrival rule. Cancellation is observed
/// between iterations, never mid-call.
///
/// A `setup` error stops the whole engine and marks the run failed.
pub(crate) fn spawn_vu(mut user: Box<dyn VirtualUser>, inner: Arc<Inner>) -> VuHandle {
    let token = CancellationToken::new();
    let worker_token = token.clone();
    let tracker = inner.work_tracker.clone();
    tracker.spawn(async move {
        let ctx = inner.run_ctx();

        if let Err(err) = user.setup(&ctx).await {
            tracing::error!(
                generator = %inner.name,
                error = %err,
                "virtual user setup failed, stopping the run",
            );
            inner.record_error(err.to_string());
            inner.stats.run_failed.store(true, Ordering::Relaxed);
            inner.stats.run_stopped.store(true, Ordering::Relaxed);
            inner.work_token.cancel();
            return;
        }

        loop {
            if inner.work_token.is_cancelled() || worker_token.is_cancelled() {
                break;
            }

            let (done_tx, mut done_rx) = oneshot::channel();
            let iteration_ctx = ctx.clone();
            let mut active = user;
            inner.work_tracker.spawn(async move {
                active.call(&iteration_ctx).await;
                let _ = done_tx.send(active);
            });

            let outcome = tokio::select! {
                biased;
                outcome = &mut done_rx => outcome,
                _ = tokio::time::sleep(inner.call_timeout) => {
                    ctx.report(CallResult {
                        timeout: true,
                        error: Error::CallTimeout.to_string(),
                        duration: inner.call_timeout,
                        finished_at: Some(Utc::now()),
                        ..CallResult::default()
                    })
                    .await;
                    done_rx.await
                }
            };
            match outcome {
                Ok(returned) => user = returned,
                // the child dropped the instance without returning it
                Err(_) => return,
            }
        }

        if let Err(err) = user.teardown(&ctx).await {
            tracing::error!(generator = %inner.name, error = %err, "virtual user teardown failed");
            inner.record_error(err.to_string());
            inner.stats.run_failed.store(true, Ordering::Relaxed);
        }
    });
    VuHandle { token }
}
