//! Programmable load-generation engine.
//!
//! A schedule of rate or concurrency changes drives a user-supplied call
//! implementation — a single-shot [`Gun`] paced by a token bucket, or a
//! fleet of long-lived [`VirtualUser`]s — while outcomes flow through a
//! sampler into ring buffers, atomic stats, and an optional log sink.
//! Several engines compose into a [`Profile`] with an optional peer-ready
//! barrier and dashboard hooks.

pub mod buffer;
pub mod config;
pub mod engine;
pub mod error;
pub mod limiter;
pub mod load;
mod logging;
pub mod mock;
pub mod profile;
pub mod results;
pub mod sampler;
pub mod schedule;
pub mod sink;
pub mod stats;

pub use config::{Config, LoadType, SamplerConfig};
pub use engine::Engine;
pub use error::Error;
pub use load::{Gun, RunContext, VirtualUser};
pub use logging::init_default_logging;
pub use profile::{GrafanaOpts, Profile};
pub use results::{CallResult, ResponseData};
pub use schedule::{combine, constant, constant_with_unit, ramp, repeat, Segment};
pub use sink::{LogSink, SinkConfig};
pub use stats::{Stats, StatsSnapshot};
