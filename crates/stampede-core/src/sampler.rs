use rand::Rng;

use crate::results::CallResult;

/// Decides which results are persisted to the ring buffers and the sink.
///
/// Failed, errored, and timed-out results are always recorded; successful
/// results are recorded with probability `success_record_percent / 100`.
/// The sampler is the sole gate between the result channel and storage.
#[derive(Debug, Clone, Copy)]
pub struct Sampler {
    success_record_percent: u8,
}

impl Sampler {
    pub fn new(success_record_percent: u8) -> Self {
        Self {
            success_record_percent: success_record_percent.min(100),
        }
    }

    pub fn should_record(&self, result: &CallResult) -> bool {
        if result.failed || result.timeout || !result.error.is_empty() {
            return true;
        }
        match self.success_record_percent {
            0 => false,
            100 => true,
            percent => rand::thread_rng().gen_range(0..100u8) < percent,
        }
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new(100)
    }
}
