use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use stampede_core::mock::{MockGun, MockGunConfig};
use stampede_core::profile::{AlertSource, AlertSummary, DashboardAnnotator, GrafanaOpts};
use stampede_core::{constant, Config, Engine, Error, LoadType, Profile};

fn quick_engine(name: &str) -> Result<Engine, Error> {
    Engine::new(Config {
        name: name.to_string(),
        load_type: LoadType::Rate,
        schedule: constant(2, Duration::from_millis(200)),
        gun: Some(Arc::new(MockGun::new(MockGunConfig {
            call_sleep: Duration::from_millis(10),
            ..MockGunConfig::default()
        }))),
        ..Config::default()
    })
}

#[derive(Default)]
struct RecordingAnnotator {
    posts: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl DashboardAnnotator for RecordingAnnotator {
    async fn post_annotation(
        &self,
        dashboard_uid: &str,
        text: &str,
        _at: DateTime<Utc>,
    ) -> Result<(), Error> {
        if let Ok(mut posts) = self.posts.lock() {
            posts.push((dashboard_uid.to_string(), text.to_string()));
        }
        Ok(())
    }
}

struct FiringAlertSource;

#[async_trait]
impl AlertSource for FiringAlertSource {
    async fn active_alerts(
        &self,
        _dashboard_uid: &str,
        from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> Result<Vec<AlertSummary>, Error> {
        Ok(vec![AlertSummary {
            name: "p99 latency".to_string(),
            summary: "over budget".to_string(),
            state: "active".to_string(),
            started_at: from,
        }])
    }
}

struct QuietAlertSource;

#[async_trait]
impl AlertSource for QuietAlertSource {
    async fn active_alerts(
        &self,
        _dashboard_uid: &str,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> Result<Vec<AlertSummary>, Error> {
        Ok(Vec::new())
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn profile_runs_all_engines() {
    stampede_core::init_default_logging();
    let mut profile = Profile::new()
        .add(quick_engine("first"))
        .add(quick_engine("second"));
    profile.run(true).await.expect("profile run");

    assert_eq!(profile.engines().len(), 2);
    for engine in profile.engines() {
        let success = engine.stats().success.load(Ordering::Relaxed);
        assert!(success >= 1, "{} success {success}", engine.name());
    }
    assert!(profile.start_time().is_some());
    assert!(profile.end_time().is_some());
    assert!(profile.start_time() <= profile.end_time());
}

#[tokio::test(flavor = "multi_thread")]
async fn bootstrap_error_short_circuits_run() {
    let mut profile = Profile::new()
        .add(Err(Error::NoGun))
        .add(quick_engine("fine"));
    let err = profile.run(true).await.expect_err("latched error");
    assert_eq!(err, Error::NoGun);
}

#[tokio::test(flavor = "multi_thread")]
async fn annotations_bracket_the_run_and_alerts_surface() {
    let annotator = Arc::new(RecordingAnnotator::default());
    let mut profile = Profile::new().add(quick_engine("gen")).with_grafana(GrafanaOpts {
        dashboard_uids: vec!["dash-1".to_string()],
        wait_before_alert_check: Duration::from_millis(50),
        annotator: Some(annotator.clone()),
        alerts: Some(Arc::new(FiringAlertSource)),
    });

    let err = profile.run(true).await.expect_err("alerts fired");
    assert_eq!(err, Error::AlertsFired { count: 1 });

    let posts = annotator.posts.lock().expect("posts").clone();
    let texts: Vec<&str> = posts.iter().map(|(_, t)| t.as_str()).collect();
    assert_eq!(texts, vec!["Test started", "Test ended", "Checking alerts"]);
    assert!(posts.iter().all(|(uid, _)| uid == "dash-1"));
}

#[tokio::test(flavor = "multi_thread")]
async fn quiet_alert_source_passes() {
    let mut profile = Profile::new().add(quick_engine("gen")).with_grafana(GrafanaOpts {
        dashboard_uids: vec!["dash-1".to_string()],
        wait_before_alert_check: Duration::from_millis(10),
        annotator: None,
        alerts: Some(Arc::new(QuietAlertSource)),
    });
    profile.run(true).await.expect("no alerts");
}

#[tokio::test(flavor = "multi_thread")]
async fn pause_and_resume_fan_out() {
    let mut profile = Profile::new().add(quick_engine("gen"));
    profile.run(false).await.expect("start");
    profile.pause();
    profile.resume();
    profile.wait().await;
    let success = profile.engines()[0].stats().success.load(Ordering::Relaxed);
    assert!(success >= 1, "success {success}");
}
