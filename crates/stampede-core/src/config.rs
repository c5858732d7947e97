use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Error;
use crate::load::{Gun, VirtualUser};
use crate::schedule::{validate_schedule, Segment};
use crate::sink::SinkConfig;

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_STATS_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_CALL_RESULT_BUF_LEN: usize = 50_000;
pub const DEFAULT_RATE_LIMIT_UNIT: Duration = Duration::from_secs(1);
pub const DEFAULT_GEN_NAME: &str = "Generator";

/// How the schedule levels are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadType {
    /// Levels are permits per rate unit, driven by a single paced gun.
    Rate,
    /// Levels are counts of concurrent long-lived virtual users.
    Vu,
}

/// Which successful results are persisted; failures always are.
#[derive(Debug, Clone, Copy)]
pub struct SamplerConfig {
    /// Percentage of successful results to record, 0-100.
    pub success_record_percent: u8,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            success_record_percent: 100,
        }
    }
}

/// Engine configuration. Zero-value durations and lengths are normalized to
/// the defaults during validation, so callers only set what they care about.
pub struct Config {
    pub name: String,
    pub load_type: LoadType,
    pub schedule: Vec<Segment>,
    /// Required for [`LoadType::Rate`].
    pub gun: Option<Arc<dyn Gun>>,
    /// Required for [`LoadType::Vu`]; used as the clone template.
    pub vu: Option<Box<dyn VirtualUser>>,
    pub call_timeout: Duration,
    pub stats_poll_interval: Duration,
    pub call_result_buf_len: usize,
    /// Fallback permit-emission period for segments without their own.
    pub rate_limit_unit: Duration,
    /// Default labels merged into every sink record.
    pub labels: HashMap<String, String>,
    pub sink: Option<SinkConfig>,
    pub sampler: SamplerConfig,
    /// Opaque data exposed to guns and virtual users through the run context.
    pub shared_data: Option<Arc<dyn Any + Send + Sync>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: String::new(),
            load_type: LoadType::Rate,
            schedule: Vec::new(),
            gun: None,
            vu: None,
            call_timeout: Duration::ZERO,
            stats_poll_interval: Duration::ZERO,
            call_result_buf_len: 0,
            rate_limit_unit: Duration::ZERO,
            labels: HashMap::new(),
            sink: None,
            sampler: SamplerConfig::default(),
            shared_data: None,
        }
    }
}

impl Config {
    /// Fill defaults and check the implementation/schedule invariants.
    pub fn validate(&mut self) -> Result<(), Error> {
        if self.call_timeout.is_zero() {
            self.call_timeout = DEFAULT_CALL_TIMEOUT;
        }
        if self.stats_poll_interval.is_zero() {
            self.stats_poll_interval = DEFAULT_STATS_POLL_INTERVAL;
        }
        if self.call_result_buf_len == 0 {
            self.call_result_buf_len = DEFAULT_CALL_RESULT_BUF_LEN;
        }
        if self.rate_limit_unit.is_zero() {
            self.rate_limit_unit = DEFAULT_RATE_LIMIT_UNIT;
        }
        if self.name.is_empty() {
            self.name = DEFAULT_GEN_NAME.to_string();
        }
        if self.gun.is_none() && self.vu.is_none() {
            return Err(Error::NoImpl);
        }
        match self.load_type {
            LoadType::Rate if self.gun.is_none() => return Err(Error::NoGun),
            LoadType::Vu if self.vu.is_none() => return Err(Error::NoVu),
            _ => {}
        }
        validate_schedule(&self.schedule)
    }
}
