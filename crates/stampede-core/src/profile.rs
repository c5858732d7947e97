use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::engine::Engine;
use crate::error::Error;

/// Presence of this variable enables the peer-ready barrier.
pub const NODE_ID_ENV: &str = "WASP_NODE_ID";
pub const NAMESPACE_ENV: &str = "WASP_NAMESPACE";
pub const SYNC_ENV: &str = "WASP_SYNC";
pub const JOBS_ENV: &str = "WASP_JOBS";

const PEER_POLL_INTERVAL: Duration = Duration::from_secs(3);
const PEER_LIST_RETRIES: usize = 5;
const PEER_LIST_RETRY_DELAY: Duration = Duration::from_secs(2);

/// One peer worker as reported by the orchestrator.
#[derive(Debug, Clone)]
pub struct PeerState {
    pub name: String,
    pub running: bool,
}

/// Out-of-process orchestrator listing peer workers under a label selector.
/// The concrete API client lives outside this crate.
#[async_trait]
pub trait PeerRegistry: Send + Sync {
    async fn list_peers(&self, namespace: &str, selector: &str) -> Result<Vec<PeerState>, Error>;
}

/// Posts run annotations to a dashboard. External collaborator.
#[async_trait]
pub trait DashboardAnnotator: Send + Sync {
    async fn post_annotation(
        &self,
        dashboard_uid: &str,
        text: &str,
        at: DateTime<Utc>,
    ) -> Result<(), Error>;
}

/// One alert reported by the alerting service.
#[derive(Debug, Clone)]
pub struct AlertSummary {
    pub name: String,
    pub summary: String,
    pub state: String,
    pub started_at: DateTime<Utc>,
}

/// Queries the alerting service for alerts raised against a dashboard in a
/// time window. External collaborator.
#[async_trait]
pub trait AlertSource: Send + Sync {
    async fn active_alerts(
        &self,
        dashboard_uid: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AlertSummary>, Error>;
}

/// Observability hooks applied around a profile run.
#[derive(Clone, Default)]
pub struct GrafanaOpts {
    pub dashboard_uids: Vec<String>,
    /// Delay between the end of the run and the alert query; zero disables
    /// the alert check.
    pub wait_before_alert_check: Duration,
    pub annotator: Option<Arc<dyn DashboardAnnotator>>,
    pub alerts: Option<Arc<dyn AlertSource>>,
}

/// A set of engines run together as one workload profile, with an optional
/// cluster barrier and dashboard hooks.
#[derive(Default)]
pub struct Profile {
    engines: Vec<Engine>,
    bootstrap_err: Option<Error>,
    grafana: Option<GrafanaOpts>,
    registry: Option<Arc<dyn PeerRegistry>>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
}

impl Profile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an engine construction result. The first error latches and
    /// short-circuits [`Profile::run`].
    pub fn add(mut self, engine: Result<Engine, Error>) -> Self {
        match engine {
            Ok(engine) => self.engines.push(engine),
            Err(err) => {
                if self.bootstrap_err.is_none() {
                    self.bootstrap_err = Some(err);
                }
            }
        }
        self
    }

    pub fn with_grafana(mut self, opts: GrafanaOpts) -> Self {
        self.grafana = Some(opts);
        self
    }

    /// Orchestrator client used by the peer-ready barrier.
    pub fn with_registry(mut self, registry: Arc<dyn PeerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn engines(&self) -> &[Engine] {
        &self.engines
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    /// Run all engines. Enters the peer-ready barrier first when the
    /// `WASP_NODE_ID` environment variable is present, posts start/end
    /// annotations, and optionally checks for fired alerts after the run.
    pub async fn run(&mut self, wait: bool) -> Result<(), Error> {
        if let Some(err) = &self.bootstrap_err {
            return Err(err.clone());
        }
        if let Some(spec) = SyncGroupSpec::from_env()? {
            let registry = self.registry.clone().ok_or_else(|| {
                Error::Barrier("peer barrier requested but no registry is configured".to_string())
            })?;
            let deadline = self
                .engines
                .iter()
                .map(Engine::total_duration)
                .max()
                .unwrap_or(PEER_POLL_INTERVAL);
            wait_sync_group(registry.as_ref(), &spec, deadline).await?;
        }

        self.start_time = Some(Utc::now());
        self.annotate("Test started").await;
        for engine in &self.engines {
            engine.start();
        }
        if wait {
            self.wait().await;
        }
        self.end_time = Some(Utc::now());
        self.annotate("Test ended").await;

        if let Some(grafana) = self.grafana.clone() {
            if !grafana.wait_before_alert_check.is_zero() {
                tracing::info!(
                    delay = ?grafana.wait_before_alert_check,
                    "waiting before checking for fired alerts",
                );
                tokio::time::sleep(grafana.wait_before_alert_check).await;
                self.annotate("Checking alerts").await;
                self.check_alerts(&grafana).await?;
            }
        }
        Ok(())
    }

    /// Block until every engine has finished.
    pub async fn wait(&self) {
        for engine in &self.engines {
            engine.wait().await;
        }
    }

    pub fn pause(&self) {
        for engine in &self.engines {
            engine.pause();
        }
    }

    pub fn resume(&self) {
        for engine in &self.engines {
            engine.resume();
        }
    }

    async fn annotate(&self, text: &str) {
        let Some(grafana) = &self.grafana else {
            return;
        };
        let Some(annotator) = &grafana.annotator else {
            return;
        };
        for uid in &grafana.dashboard_uids {
            if let Err(err) = annotator.post_annotation(uid, text, Utc::now()).await {
                tracing::warn!(dashboard = %uid, error = %err, "failed to post annotation");
            }
        }
    }

    async fn check_alerts(&self, grafana: &GrafanaOpts) -> Result<(), Error> {
        let Some(source) = &grafana.alerts else {
            return Ok(());
        };
        let from = self.start_time.unwrap_or_else(Utc::now);
        let to = Utc::now();
        let mut fired = 0usize;
        for uid in &grafana.dashboard_uids {
            let alerts = source.active_alerts(uid, from, to).await?;
            for alert in &alerts {
                tracing::warn!(
                    dashboard = %uid,
                    alert = %alert.name,
                    summary = %alert.summary,
                    state = %alert.state,
                    "alert fired during the run",
                );
            }
            fired += alerts.len();
        }
        if fired > 0 {
            return Err(Error::AlertsFired { count: fired });
        }
        Ok(())
    }
}

/// Barrier parameters read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SyncGroupSpec {
    pub(crate) node_id: String,
    pub(crate) namespace: String,
    pub(crate) selector: String,
    pub(crate) jobs: usize,
}

impl SyncGroupSpec {
    /// `None` when the barrier is disabled (`WASP_NODE_ID` unset or empty).
    pub(crate) fn from_env() -> Result<Option<Self>, Error> {
        let node_id = std::env::var(NODE_ID_ENV).unwrap_or_default();
        if node_id.is_empty() {
            return Ok(None);
        }
        let jobs_raw = std::env::var(JOBS_ENV).map_err(|_| Error::Env {
            name: JOBS_ENV.to_string(),
            reason: "must be set when the barrier is enabled".to_string(),
        })?;
        let jobs: usize = jobs_raw.parse().map_err(|_| Error::Env {
            name: JOBS_ENV.to_string(),
            reason: format!("not a positive integer: {jobs_raw:?}"),
        })?;
        let sync = std::env::var(SYNC_ENV).unwrap_or_default();
        Ok(Some(Self {
            node_id,
            namespace: std::env::var(NAMESPACE_ENV).unwrap_or_default(),
            selector: format!("sync={sync}"),
            jobs,
        }))
    }
}

/// Poll the registry until the peer group is complete and running, bounded
/// by `deadline`.
async fn wait_sync_group(
    registry: &dyn PeerRegistry,
    spec: &SyncGroupSpec,
    deadline: Duration,
) -> Result<(), Error> {
    let poll = async {
        loop {
            tokio::time::sleep(PEER_POLL_INTERVAL).await;
            tracing::info!(selector = %spec.selector, "awaiting peer group sync");
            let peers = list_peers_with_retry(registry, spec).await?;
            if peers.len() != spec.jobs {
                tracing::info!(
                    found = peers.len(),
                    expected = spec.jobs,
                    "awaiting peer workers",
                );
                continue;
            }
            if peers.iter().all(|p| p.running) {
                return Ok(());
            }
        }
    };
    match tokio::time::timeout(deadline, poll).await {
        Ok(result) => result,
        Err(_) => Err(Error::Barrier(format!(
            "peer group did not become ready within {deadline:?}"
        ))),
    }
}

/// One peer listing with the transient-error retry policy: up to 5 attempts,
/// 2 s constant backoff.
async fn list_peers_with_retry(
    registry: &dyn PeerRegistry,
    spec: &SyncGroupSpec,
) -> Result<Vec<PeerState>, Error> {
    let mut last = Error::Barrier("no attempts made".to_string());
    for attempt in 1..=PEER_LIST_RETRIES {
        match registry.list_peers(&spec.namespace, &spec.selector).await {
            Ok(peers) => return Ok(peers),
            Err(err) => {
                tracing::warn!(attempt, error = %err, "error listing peers, will retry");
                last = err;
                if attempt < PEER_LIST_RETRIES {
                    tokio::time::sleep(PEER_LIST_RETRY_DELAY).await;
                }
            }
        }
    }
    Err(Error::Barrier(format!(
        "after {PEER_LIST_RETRIES} attempts, last error: {last}"
    )))
}
