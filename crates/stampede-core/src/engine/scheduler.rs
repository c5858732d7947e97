use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::config::LoadType;
use crate::engine::virtual_user::{spawn_vu, VuHandle};
use crate::engine::{pacer, pause_gate, Inner};
use crate::load::VirtualUser;

pub(crate) fn spawn_scheduler(inner: Arc<Inner>) {
    let tracker = inner.work_tracker.clone();
    tracker.spawn(async move { run_scheduler(inner).await });
}

/// Walk the schedule: set up the first segment, then advance one step per
/// `step_duration` tick until the segments run out or the work context fires.
async fn run_scheduler(inner: Arc<Inner>) {
    let schedule = inner.schedule.clone();
    let template: Option<Box<dyn VirtualUser>> =
        inner.vu_template.lock().ok().and_then(|mut t| t.take());
    let mut vus: Vec<VuHandle> = Vec::new();
    let mut seg_idx = 0usize;
    let mut step: u64 = 0;

    inner
        .stats
        .last_segment
        .store(schedule.len() as i64, Ordering::Relaxed);

    // initial segment setup
    let first = &schedule[0];
    match inner.load_type {
        LoadType::Rate => {
            inner.limiter.reset(first.from, inner.unit_for(first));
            inner.stats.current_rate.store(first.from, Ordering::Relaxed);
            pacer::spawn_pacer(inner.clone());
        }
        LoadType::Vu => {
            inner.stats.current_vus.store(first.from, Ordering::Relaxed);
            if let Some(template) = &template {
                for _ in 0..first.from {
                    vus.push(spawn_vu(template.clone_user(), inner.clone()));
                }
            }
        }
    }

    let mut paused = inner.paused.subscribe();
    loop {
        if !pause_gate(&mut paused, &inner.work_token).await {
            break;
        }
        // the tick itself is not interruptible: a step whose sleep lands on
        // the schedule deadline is still applied, so the final reshape of
        // every segment always happens; cancellation is observed at the top
        // of the next iteration
        tokio::time::sleep(schedule[seg_idx].step_duration).await;

        // segment rollover: reshape the live workload to the new baseline
        if step == schedule[seg_idx].steps {
            inner.stats.current_segment.fetch_add(1, Ordering::Relaxed);
            inner.stats.current_step.store(0, Ordering::Relaxed);
            step = 0;
            seg_idx += 1;
            if seg_idx == schedule.len() {
                tracing::info!(generator = %inner.name, "finished all schedule segments");
                break;
            }
            let segment = &schedule[seg_idx];
            match inner.load_type {
                LoadType::Rate => {
                    inner.limiter.reset(segment.from, inner.unit_for(segment));
                    inner
                        .stats
                        .current_rate
                        .store(segment.from, Ordering::Relaxed);
                }
                LoadType::Vu => {
                    for handle in vus.drain(..) {
                        handle.stop();
                    }
                    inner
                        .stats
                        .current_vus
                        .store(segment.from, Ordering::Relaxed);
                    if let Some(template) = &template {
                        for _ in 0..segment.from {
                            vus.push(spawn_vu(template.clone_user(), inner.clone()));
                        }
                    }
                }
            }
        }

        // intra-segment step delta
        let segment = &schedule[seg_idx];
        match inner.load_type {
            LoadType::Rate => {
                let new_rate =
                    (inner.stats.current_rate.load(Ordering::Relaxed) + segment.increase).max(1);
                inner.limiter.reset(new_rate, inner.unit_for(segment));
                inner.stats.current_rate.store(new_rate, Ordering::Relaxed);
            }
            LoadType::Vu => {
                if segment.increase > 0 {
                    if let Some(template) = &template {
                        for _ in 0..segment.increase {
                            vus.push(spawn_vu(template.clone_user(), inner.clone()));
                            inner.stats.current_vus.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                } else if segment.increase < 0 {
                    for _ in 0..-segment.increase {
                        if vus.len() <= 1 {
                            tracing::info!(
                                generator = %inner.name,
                                "refusing to stop the last virtual user",
                            );
                            continue;
                        }
                        // oldest instance goes first
                        let handle = vus.remove(0);
                        handle.stop();
                        inner.stats.current_vus.fetch_sub(1, Ordering::Relaxed);
                    }
                }
            }
        }

        step += 1;
        inner.stats.current_step.store(step as i64, Ordering::Relaxed);
        tracing::debug!(
            generator = %inner.name,
            segment = inner.stats.current_segment.load(Ordering::Relaxed),
            step = inner.stats.current_step.load(Ordering::Relaxed),
            rps = inner.stats.current_rate.load(Ordering::Relaxed),
            vus = inner.stats.current_vus.load(Ordering::Relaxed),
            "scheduler step",
        );

        // the last step of the last segment ends the walk without waiting
        // for another tick
        if seg_idx == schedule.len() - 1 && step == schedule[seg_idx].steps {
            tracing::info!(generator = %inner.name, "finished all schedule segments");
            break;
        }
    }

    // stopped virtual users still observe their tokens and tear down; the
    // work tracker keeps them accounted for until then
    for handle in vus.drain(..) {
        handle.stop();
    }
    tracing::info!(generator = %inner.name, "scheduler exited");
}
