use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::buffer::RingBuffer;
use crate::config::{Config, LoadType};
use crate::error::Error;
use crate::limiter::RateLimiterHandle;
use crate::load::{Gun, RunContext, VirtualUser};
use crate::results::{CallResult, ResponseData};
use crate::sampler::Sampler;
use crate::schedule::{total_duration, Segment};
use crate::sink::{ErrorBudget, LogSink, SinkConfig};
use crate::stats::Stats;

mod collector;
mod pacer;
mod scheduler;
mod virtual_user;

/// One scheduled workload driver.
///
/// Cheap to clone; all clones share the same run. Built from a [`Config`],
/// started with [`Engine::start`] (or [`Engine::run`] to start and wait),
/// terminated by schedule exhaustion, the schedule deadline, or
/// [`Engine::stop`].
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

pub(crate) struct Inner {
    pub(crate) name: String,
    pub(crate) load_type: LoadType,
    pub(crate) schedule: Vec<Segment>,
    pub(crate) call_timeout: Duration,
    pub(crate) stats_poll_interval: Duration,
    pub(crate) rate_limit_unit: Duration,
    pub(crate) sampler: Sampler,
    pub(crate) gun: Option<Arc<dyn Gun>>,
    pub(crate) vu_template: StdMutex<Option<Box<dyn VirtualUser>>>,
    pub(crate) shared: Option<Arc<dyn Any + Send + Sync>>,
    pub(crate) total_duration: Duration,

    pub(crate) stats: Arc<Stats>,
    pub(crate) data: Arc<ResponseData>,
    pub(crate) errors: StdMutex<RingBuffer<String>>,

    /// Governs the pacer, virtual users, the scheduler, and the stats
    /// ticker; fires at the schedule deadline or on stop.
    pub(crate) work_token: CancellationToken,
    /// Governs the collector and sink forwarders; cancelled only after all
    /// tracked work has drained so the last in-flight result is recorded.
    pub(crate) data_token: CancellationToken,
    pub(crate) work_tracker: TaskTracker,
    pub(crate) data_tracker: TaskTracker,

    pub(crate) results_tx: mpsc::Sender<CallResult>,
    results_rx: StdMutex<Option<mpsc::Receiver<CallResult>>>,

    pub(crate) sink: Option<SinkRuntime>,
    pub(crate) limiter: RateLimiterHandle,
    pub(crate) paused: watch::Sender<bool>,
    started: AtomicBool,
    finalized: tokio::sync::Mutex<bool>,
}

pub(crate) struct SinkRuntime {
    pub(crate) sink: Arc<dyn LogSink>,
    pub(crate) budget: ErrorBudget,
    /// Engine labels merged with the sink config's extras.
    pub(crate) labels: HashMap<String, String>,
    pub(crate) tx: mpsc::Sender<CallResult>,
    rx: StdMutex<Option<mpsc::Receiver<CallResult>>>,
}

impl Engine {
    /// Validate the config and wire up channels, contexts, buffers, and the
    /// sink. Does not start any work.
    pub fn new(mut cfg: Config) -> Result<Self, Error> {
        cfg.validate()?;

        let (results_tx, results_rx) = mpsc::channel(1);
        let total = total_duration(&cfg.schedule);

        let stats = Arc::new(Stats::default());
        stats
            .duration_nanos
            .store(total.as_nanos() as i64, Ordering::Relaxed);
        stats
            .time_unit_nanos
            .store(cfg.rate_limit_unit.as_nanos() as i64, Ordering::Relaxed);

        let first = &cfg.schedule[0];
        let limiter = RateLimiterHandle::new(
            first.from,
            first.rate_unit.unwrap_or(cfg.rate_limit_unit),
        );

        let sink_cfg = cfg.sink.take();
        let sink = sink_cfg.map(|sink_cfg| {
            let SinkConfig {
                sink,
                max_errors,
                extra_labels,
            } = sink_cfg;
            let mut labels = cfg.labels.clone();
            labels.extend(extra_labels);
            let (tx, rx) = mpsc::channel(cfg.call_result_buf_len);
            SinkRuntime {
                sink,
                budget: ErrorBudget::new(max_errors),
                labels,
                tx,
                rx: StdMutex::new(Some(rx)),
            }
        });

        let (paused, _) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(Inner {
                name: cfg.name,
                load_type: cfg.load_type,
                schedule: cfg.schedule,
                call_timeout: cfg.call_timeout,
                stats_poll_interval: cfg.stats_poll_interval,
                rate_limit_unit: cfg.rate_limit_unit,
                sampler: Sampler::new(cfg.sampler.success_record_percent),
                gun: cfg.gun,
                vu_template: StdMutex::new(cfg.vu),
                shared: cfg.shared_data,
                total_duration: total,
                stats,
                data: Arc::new(ResponseData::new(cfg.call_result_buf_len)),
                errors: StdMutex::new(RingBuffer::new(cfg.call_result_buf_len)),
                work_token: CancellationToken::new(),
                data_token: CancellationToken::new(),
                work_tracker: TaskTracker::new(),
                data_tracker: TaskTracker::new(),
                results_tx,
                results_rx: StdMutex::new(Some(results_rx)),
                sink,
                limiter,
                paused,
                started: AtomicBool::new(false),
                finalized: tokio::sync::Mutex::new(false),
            }),
        })
    }

    /// Start the run without blocking: the deadline watchdog, the stats
    /// ticker, the sink forwarders, the collector, and the scheduler walk.
    /// Idempotent.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = &self.inner;
        tracing::info!(generator = %inner.name, duration = ?inner.total_duration, "load generator started");

        spawn_deadline(inner);
        spawn_stats_ticker(inner);
        collector::spawn_collector(inner.clone());
        if inner.sink.is_some() {
            collector::spawn_forwarders(inner.clone());
        }
        scheduler::spawn_scheduler(inner.clone());

        inner.work_tracker.close();
        inner.data_tracker.close();
    }

    /// Start and block until the run completes. Returns the collected
    /// response data and whether any call failed or timed out.
    pub async fn run(&self) -> (Arc<ResponseData>, bool) {
        self.start();
        self.wait().await
    }

    /// Block until all tracked work has drained, flush the sink, and return
    /// the collected data and the failure flag.
    pub async fn wait(&self) -> (Arc<ResponseData>, bool) {
        if self.inner.started.load(Ordering::SeqCst) {
            self.inner.work_tracker.wait().await;

            let mut finalized = self.inner.finalized.lock().await;
            if !*finalized {
                *finalized = true;
                if let Some(sink_rt) = &self.inner.sink {
                    collector::push_stats(&self.inner, sink_rt).await;
                }
                self.inner.data_token.cancel();
                self.inner.data_tracker.wait().await;
                if let Some(sink_rt) = &self.inner.sink {
                    sink_rt.sink.stop().await;
                }
            }
        }
        (
            self.data(),
            self.inner.stats.run_failed.load(Ordering::Relaxed),
        )
    }

    /// Stop the run: mark it stopped and failed, cancel the work context,
    /// and wait for in-flight calls to finish or hit their deadlines.
    /// Idempotent.
    pub async fn stop(&self) -> (Arc<ResponseData>, bool) {
        self.inner.stats.run_stopped.store(true, Ordering::Relaxed);
        self.inner.stats.run_failed.store(true, Ordering::Relaxed);
        self.inner.work_token.cancel();
        self.wait().await
    }

    /// Freeze the scheduler walk and, in rate mode, stop handing out
    /// permits. In-flight calls are unaffected.
    pub fn pause(&self) {
        tracing::info!(generator = %self.inner.name, "pausing");
        self.inner.paused.send_replace(true);
    }

    pub fn resume(&self) {
        tracing::info!(generator = %self.inner.name, "resuming");
        self.inner.paused.send_replace(false);
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn stats(&self) -> Arc<Stats> {
        self.inner.stats.clone()
    }

    pub fn data(&self) -> Arc<ResponseData> {
        self.inner.data.clone()
    }

    /// All recorded call error strings, oldest first, capped at the result
    /// buffer length.
    pub fn errors(&self) -> Vec<String> {
        self.inner
            .errors
            .lock()
            .map(|e| e.snapshot())
            .unwrap_or_default()
    }

    /// Typed view of the opaque shared data passed through the config.
    pub fn input_shared_data<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.inner
            .shared
            .clone()
            .and_then(|d| d.downcast::<T>().ok())
    }

    /// Total wall-clock duration of the configured schedule.
    pub fn total_duration(&self) -> Duration {
        self.inner.total_duration
    }
}

impl Inner {
    pub(crate) fn run_ctx(&self) -> RunContext {
        RunContext::new(
            self.results_tx.clone(),
            self.shared.clone(),
            self.call_timeout,
        )
    }

    pub(crate) fn unit_for(&self, segment: &Segment) -> Duration {
        segment.rate_unit.unwrap_or(self.rate_limit_unit)
    }

    pub(crate) fn record_error(&self, error: String) {
        if let Ok(mut errors) = self.errors.lock() {
            errors.push(error);
        }
    }

    pub(crate) fn take_results_rx(&self) -> Option<mpsc::Receiver<CallResult>> {
        self.results_rx.lock().ok().and_then(|mut rx| rx.take())
    }

    pub(crate) fn take_sink_rx(&self) -> Option<mpsc::Receiver<CallResult>> {
        self.sink
            .as_ref()
            .and_then(|s| s.rx.lock().ok().and_then(|mut rx| rx.take()))
    }
}

/// Cancel the work context once the schedule duration has elapsed.
fn spawn_deadline(inner: &Arc<Inner>) {
    let token = inner.work_token.clone();
    let total = inner.total_duration;
    inner.work_tracker.spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(total) => token.cancel(),
        }
    });
}

/// Periodically log the live counters while the run is active.
fn spawn_stats_ticker(inner: &Arc<Inner>) {
    let inner = inner.clone();
    let tracker = inner.work_tracker.clone();
    tracker.spawn(async move {
        let mut ticker = interval(inner.stats_poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = inner.work_token.cancelled() => break,
                _ = ticker.tick() => {
                    let stats = &inner.stats;
                    tracing::info!(
                        generator = %inner.name,
                        success = stats.success.load(Ordering::Relaxed),
                        failed = stats.failed.load(Ordering::Relaxed),
                        call_timeout = stats.call_timeout.load(Ordering::Relaxed),
                        current_rps = stats.current_rate.load(Ordering::Relaxed),
                        current_vus = stats.current_vus.load(Ordering::Relaxed),
                        "load stats",
                    );
                }
            }
        }
    });
}

/// Wait out a pause, also watching the work token. Returns `false` when the
/// run was cancelled while paused.
pub(crate) async fn pause_gate(
    paused: &mut watch::Receiver<bool>,
    token: &CancellationToken,
) -> bool {
    loop {
        if token.is_cancelled() {
            return false;
        }
        if !*paused.borrow() {
            return true;
        }
        tokio::select! {
            _ = token.cancelled() => return false,
            changed = paused.changed() => {
                if changed.is_err() {
                    return true;
                }
            }
        }
    }
}
