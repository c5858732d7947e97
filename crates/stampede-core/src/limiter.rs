use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};

/// Build a token bucket emitting exactly `rate` permits per `unit`.
///
/// Permits come out evenly spaced (`unit / rate` apart) with no jitter, with
/// one cell of slack so a freshly installed bucket hands out its first two
/// permits back-to-back; steady-state pacing is unaffected.
fn new_bucket(rate: i64, unit: Duration) -> DefaultDirectRateLimiter {
    let rate = u32::try_from(rate.max(1)).unwrap_or(u32::MAX);
    let period = (unit / rate).max(Duration::from_nanos(1));
    let quota = Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
        .allow_burst(NonZeroU32::MIN.saturating_add(1));
    RateLimiter::direct(quota)
}

/// Atomically swappable handle to the current token bucket.
///
/// The scheduler swaps in a freshly built bucket on every rate change;
/// callers snapshot the pointer once and then wait on that bucket. In-flight
/// waiters are not cancelled by a swap, so at worst one call is paced at the
/// previous rate.
pub struct RateLimiterHandle {
    bucket: ArcSwap<DefaultDirectRateLimiter>,
}

impl RateLimiterHandle {
    pub fn new(rate: i64, unit: Duration) -> Self {
        Self {
            bucket: ArcSwap::from_pointee(new_bucket(rate, unit)),
        }
    }

    /// Replace the bucket with one for the new rate.
    pub fn reset(&self, rate: i64, unit: Duration) {
        self.bucket.store(Arc::new(new_bucket(rate, unit)));
    }

    /// Snapshot the current bucket.
    pub fn load(&self) -> Arc<DefaultDirectRateLimiter> {
        self.bucket.load_full()
    }
}
