//! Mock gun and virtual user used by the integration tests and by harnesses
//! smoke-testing their wiring without a real target.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use serde_json::json;

use crate::error::Error;
use crate::load::{Gun, RunContext, VirtualUser};
use crate::results::CallResult;

/// Payload marker on successful mock calls.
pub const SUCCESS_CALL_DATA: &str = "successCallData";
/// Payload marker on failed mock calls.
pub const FAILED_CALL_DATA: &str = "failedCallData";

fn roll(ratio: u8) -> bool {
    ratio > 0 && rand::thread_rng().gen_range(0..100u8) < ratio.min(100)
}

#[derive(Debug, Clone, Default)]
pub struct MockGunConfig {
    /// Percentage of calls that fail, 0-100.
    pub fail_ratio: u8,
    /// Percentage of calls that overshoot the call timeout, 0-100.
    pub timeout_ratio: u8,
    /// Time spent inside each call.
    pub call_sleep: Duration,
}

pub struct MockGun {
    cfg: MockGunConfig,
}

impl MockGun {
    pub fn new(cfg: MockGunConfig) -> Self {
        Self { cfg }
    }
}

#[async_trait]
impl Gun for MockGun {
    async fn call(&self, ctx: &RunContext) -> CallResult {
        tokio::time::sleep(self.cfg.call_sleep).await;
        if roll(self.cfg.fail_ratio) {
            return CallResult::failure("error", json!(FAILED_CALL_DATA));
        }
        if roll(self.cfg.timeout_ratio) {
            tokio::time::sleep(ctx.call_timeout() * 2).await;
        }
        CallResult::ok(json!(SUCCESS_CALL_DATA))
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockVuConfig {
    /// Percentage of iterations that report a failure, 0-100.
    pub fail_ratio: u8,
    /// Percentage of iterations that overshoot the call timeout, 0-100.
    pub timeout_ratio: u8,
    /// Time spent inside each iteration.
    pub call_sleep: Duration,
    /// Make `setup` fail, stopping the whole run.
    pub setup_failure: bool,
}

pub struct MockVu {
    cfg: MockVuConfig,
}

impl MockVu {
    pub fn new(cfg: MockVuConfig) -> Self {
        Self { cfg }
    }
}

#[async_trait]
impl VirtualUser for MockVu {
    fn clone_user(&self) -> Box<dyn VirtualUser> {
        Box::new(Self {
            cfg: self.cfg.clone(),
        })
    }

    async fn setup(&mut self, _ctx: &RunContext) -> Result<(), Error> {
        if self.cfg.setup_failure {
            return Err(Error::Setup("mock setup failure".to_string()));
        }
        Ok(())
    }

    async fn call(&mut self, ctx: &RunContext) {
        let started_at = Utc::now();
        tokio::time::sleep(self.cfg.call_sleep).await;
        if roll(self.cfg.fail_ratio) {
            ctx.report(CallResult {
                failed: true,
                error: "error".to_string(),
                data: json!(FAILED_CALL_DATA),
                started_at: Some(started_at),
                ..CallResult::default()
            })
            .await;
            return;
        }
        if roll(self.cfg.timeout_ratio) {
            tokio::time::sleep(ctx.call_timeout() * 2).await;
        }
        ctx.report(CallResult {
            data: json!(SUCCESS_CALL_DATA),
            started_at: Some(started_at),
            ..CallResult::default()
        })
        .await;
    }

    async fn teardown(&mut self, _ctx: &RunContext) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn mock_gun_succeeds_by_default() {
        let gun = MockGun::new(MockGunConfig::default());
        let (tx, _rx) = mpsc::channel(1);
        let ctx = RunContext::new(tx, None, Duration::from_secs(1));
        let res = gun.call(&ctx).await;
        assert!(!res.failed);
        assert_eq!(res.data, json!(SUCCESS_CALL_DATA));
    }

    #[tokio::test]
    async fn mock_gun_fails_at_full_ratio() {
        let gun = MockGun::new(MockGunConfig {
            fail_ratio: 100,
            ..MockGunConfig::default()
        });
        let (tx, _rx) = mpsc::channel(1);
        let ctx = RunContext::new(tx, None, Duration::from_secs(1));
        let res = gun.call(&ctx).await;
        assert!(res.failed);
        assert_eq!(res.error, "error");
        assert_eq!(res.data, json!(FAILED_CALL_DATA));
    }

    #[tokio::test]
    async fn mock_vu_reports_one_result_per_call() {
        let mut vu = MockVu::new(MockVuConfig::default());
        let (tx, mut rx) = mpsc::channel(8);
        let ctx = RunContext::new(tx, None, Duration::from_secs(1));
        vu.setup(&ctx).await.expect("setup");
        vu.call(&ctx).await;
        let res = rx.recv().await.expect("result");
        assert_eq!(res.data, json!(SUCCESS_CALL_DATA));
        assert!(res.started_at.is_some());
        vu.teardown(&ctx).await.expect("teardown");
    }

    #[tokio::test]
    async fn mock_vu_setup_failure_errors() {
        let mut vu = MockVu::new(MockVuConfig {
            setup_failure: true,
            ..MockVuConfig::default()
        });
        let (tx, _rx) = mpsc::channel(1);
        let ctx = RunContext::new(tx, None, Duration::from_secs(1));
        assert!(vu.setup(&ctx).await.is_err());
    }

    #[tokio::test]
    async fn mock_vu_clone_is_independent() {
        let vu = MockVu::new(MockVuConfig {
            fail_ratio: 100,
            ..MockVuConfig::default()
        });
        let mut clone = vu.clone_user();
        let (tx, mut rx) = mpsc::channel(8);
        let ctx = RunContext::new(tx, None, Duration::from_secs(1));
        clone.call(&ctx).await;
        let res = rx.recv().await.expect("result");
        assert!(res.failed);
    }
}
