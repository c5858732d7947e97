use std::time::Duration;

use crate::error::Error;

/// Number of steps a ramp is split into when the level range is wide enough.
pub const DEFAULT_STEP_CHANGE_PRECISION: i64 = 10;

/// The atomic unit of a workload schedule.
///
/// `from` is the starting level: requests per unit in rate mode, worker count
/// in virtual-user mode. `increase` is applied at every step boundary inside
/// the segment; the segment lasts `steps * step_duration`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Segment {
    pub from: i64,
    pub increase: i64,
    pub steps: u64,
    pub step_duration: Duration,
    /// Period over which `from` permits are emitted (rate mode only).
    /// `None` falls back to the engine-level rate limit unit.
    pub rate_unit: Option<Duration>,
}

impl Segment {
    pub fn validate(&self) -> Result<(), Error> {
        if self.from < 1 {
            return Err(Error::InvalidStart);
        }
        if (self.steps == 0) != (self.step_duration.is_zero()) {
            return Err(Error::InvalidSteps);
        }
        Ok(())
    }

    /// Wall-clock length of the whole segment.
    pub fn duration(&self) -> Duration {
        self.step_duration * self.steps.min(u32::MAX as u64) as u32
    }
}

/// Validate a whole schedule: non-empty and every segment well-formed.
pub fn validate_schedule(schedule: &[Segment]) -> Result<(), Error> {
    if schedule.is_empty() {
        return Err(Error::NoSchedule);
    }
    for segment in schedule {
        segment.validate()?;
    }
    Ok(())
}

/// Total wall-clock duration of a schedule.
pub fn total_duration(schedule: &[Segment]) -> Duration {
    schedule.iter().map(Segment::duration).sum()
}

/// A constant workload at `level` for `duration`.
pub fn constant(level: i64, duration: Duration) -> Vec<Segment> {
    vec![Segment {
        from: level,
        increase: 0,
        steps: 1,
        step_duration: duration,
        rate_unit: None,
    }]
}

/// A constant workload with an explicit rate-limit unit, e.g. 10 calls per
/// minute instead of per second.
pub fn constant_with_unit(level: i64, duration: Duration, unit: Duration) -> Vec<Segment> {
    vec![Segment {
        from: level,
        increase: 0,
        steps: 1,
        step_duration: duration,
        rate_unit: Some(unit),
    }]
}

/// A linear ramp from `from` to `to` over `duration`.
///
/// Wide ramps (|to - from| >= 10) become a single segment of 10 equal steps
/// with the per-step delta rounded away from zero. Narrow ramps degrade to
/// |to - from| + 1 constant sub-segments walking the endpoints inclusively,
/// so short trajectories hit every intermediate level exactly.
pub fn ramp(from: i64, to: i64, duration: Duration) -> Vec<Segment> {
    let range = to - from;
    if range.abs() < DEFAULT_STEP_CHANGE_PRECISION {
        return fill_below_precision(from, to, duration);
    }
    let increase = if range < 0 {
        // floor for negative deltas
        -((-range + DEFAULT_STEP_CHANGE_PRECISION - 1) / DEFAULT_STEP_CHANGE_PRECISION)
    } else {
        // ceil for positive deltas
        (range + DEFAULT_STEP_CHANGE_PRECISION - 1) / DEFAULT_STEP_CHANGE_PRECISION
    };
    vec![Segment {
        from,
        increase,
        steps: DEFAULT_STEP_CHANGE_PRECISION as u64,
        step_duration: duration / DEFAULT_STEP_CHANGE_PRECISION as u32,
        rate_unit: None,
    }]
}

/// Inclusive endpoint walk for ramps narrower than the step precision.
fn fill_below_precision(from: i64, to: i64, duration: Duration) -> Vec<Segment> {
    let distance = (to - from).abs() + 1;
    let sub_duration = duration / distance as u32;
    let mut segments = Vec::with_capacity(distance as usize);
    if to >= from {
        for level in from..=to {
            segments.extend(constant(level, sub_duration));
        }
    } else {
        for level in (to..=from).rev() {
            segments.extend(constant(level, sub_duration));
        }
    }
    segments
}

/// Concatenate schedules in order.
pub fn combine<I>(parts: I) -> Vec<Segment>
where
    I: IntoIterator<Item = Vec<Segment>>,
{
    parts.into_iter().flatten().collect()
}

/// Concatenate schedules and repeat the result `times` times.
///
/// `times == 0` yields an empty schedule, which engine construction rejects
/// as [`Error::NoSchedule`].
pub fn repeat<I>(times: usize, parts: I) -> Vec<Segment>
where
    I: IntoIterator<Item = Vec<Segment>>,
{
    let once = combine(parts);
    let mut acc = Vec::with_capacity(once.len() * times);
    for _ in 0..times {
        acc.extend(once.iter().cloned());
    }
    acc
}
