use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::buffer::RingBuffer;

/// Outcome of a single call.
///
/// Guns return one per call; virtual users publish one or more per iteration
/// onto the shared results channel. The collector stamps `finished_at` and
/// recomputes `duration` from `started_at` when the producer left it unset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CallResult {
    #[serde(default, skip_serializing_if = "is_false")]
    pub failed: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub timeout: bool,
    /// Wall-clock call duration, serialized as integer milliseconds.
    #[serde(with = "duration_millis", default)]
    pub duration: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Caller-supplied tag, surfaced as the `call_group` sink label.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,
    /// Opaque payload a gun or virtual user wants to keep.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

fn is_false(v: &bool) -> bool {
    !*v
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

impl CallResult {
    /// Successful result carrying a payload, stamped with the current time.
    pub fn ok(data: Value) -> Self {
        Self {
            started_at: Some(Utc::now()),
            data,
            ..Self::default()
        }
    }

    /// Successful result tagged with a call group.
    pub fn ok_with_group(data: Value, group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            ..Self::ok(data)
        }
    }

    /// Failed result carrying an error string and whatever response data the
    /// caller had.
    pub fn failure(error: impl Into<String>, data: Value) -> Self {
        Self {
            failed: true,
            error: error.into(),
            started_at: Some(Utc::now()),
            data,
            ..Self::default()
        }
    }
}

/// Per-run result retention: three fixed-capacity ring buffers guarded by
/// per-buffer locks. Appends come only from the collector; readers copy.
#[derive(Debug)]
pub struct ResponseData {
    ok_payloads: Mutex<RingBuffer<Value>>,
    ok_responses: Mutex<RingBuffer<CallResult>>,
    fail_responses: Mutex<RingBuffer<CallResult>>,
}

impl ResponseData {
    pub fn new(capacity: usize) -> Self {
        Self {
            ok_payloads: Mutex::new(RingBuffer::new(capacity)),
            ok_responses: Mutex::new(RingBuffer::new(capacity)),
            fail_responses: Mutex::new(RingBuffer::new(capacity)),
        }
    }

    pub(crate) fn append_ok(&self, result: CallResult) {
        if let Ok(mut payloads) = self.ok_payloads.lock() {
            payloads.push(result.data.clone());
        }
        if let Ok(mut responses) = self.ok_responses.lock() {
            responses.push(result);
        }
    }

    pub(crate) fn append_fail(&self, result: CallResult) {
        if let Ok(mut responses) = self.fail_responses.lock() {
            responses.push(result);
        }
    }

    /// Payloads of successful calls, oldest first.
    pub fn ok_payloads(&self) -> Vec<Value> {
        self.ok_payloads
            .lock()
            .map(|b| b.snapshot())
            .unwrap_or_default()
    }

    /// Full results of successful calls, oldest first.
    pub fn ok_responses(&self) -> Vec<CallResult> {
        self.ok_responses
            .lock()
            .map(|b| b.snapshot())
            .unwrap_or_default()
    }

    /// Failed and timed-out results, oldest first.
    pub fn fail_responses(&self) -> Vec<CallResult> {
        self.fail_responses
            .lock()
            .map(|b| b.snapshot())
            .unwrap_or_default()
    }
}
