use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Error;
use crate::results::CallResult;

/// Context handed to guns and virtual users for every call.
///
/// Cheap to clone; carries the shared results channel, the per-call deadline
/// the engine will enforce, and any opaque data the harness passed in via
/// the config.
#[derive(Clone)]
pub struct RunContext {
    results: mpsc::Sender<CallResult>,
    shared: Option<Arc<dyn Any + Send + Sync>>,
    call_timeout: Duration,
}

impl RunContext {
    pub(crate) fn new(
        results: mpsc::Sender<CallResult>,
        shared: Option<Arc<dyn Any + Send + Sync>>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            results,
            shared,
            call_timeout,
        }
    }

    /// Publish one call outcome onto the shared results channel.
    ///
    /// Virtual users report through this; guns normally just return their
    /// result from `call` instead.
    pub async fn report(&self, result: CallResult) {
        // a closed channel means the run is over and the result is moot
        let _ = self.results.send(result).await;
    }

    /// Typed view of the opaque shared data passed through the config.
    pub fn shared_data<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.shared.clone().and_then(|d| d.downcast::<T>().ok())
    }

    /// Deadline the engine enforces on each call.
    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }
}

/// Single-shot call implementation, used by rate-paced load.
///
/// One `call` is invoked per emitted permit; the returned result is stamped
/// and collected by the engine. Implementations must not panic; report
/// failures through [`CallResult::failure`].
#[async_trait]
pub trait Gun: Send + Sync {
    async fn call(&self, ctx: &RunContext) -> CallResult;
}

/// Long-lived call implementation, used by virtual-user load.
///
/// Instances are cloned from a template on segment entry and scale-up, run
/// `setup` once, then `call` in a loop until stopped, then `teardown`.
/// `call` publishes its own results via [`RunContext::report`], tagging
/// `group` and stamping `started_at`.
#[async_trait]
pub trait VirtualUser: Send {
    /// Fresh instance from this template. Connection state must not be
    /// shared between clones.
    fn clone_user(&self) -> Box<dyn VirtualUser>;

    async fn setup(&mut self, ctx: &RunContext) -> Result<(), Error>;

    async fn call(&mut self, ctx: &RunContext);

    async fn teardown(&mut self, ctx: &RunContext) -> Result<(), Error>;
}
