//! Detection work loop

use alerting::compose_detection_alert;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{CycleError, CycleSchedule, Delivery, DetectionPipeline, ResultRecord, ResultSink};

/// State shared between the orchestrator handle and its workers
#[derive(Debug, Default)]
pub(crate) struct WorkerShared {
    pub(crate) last_success: Mutex<Option<DateTime<Utc>>>,
    pub(crate) sequence: AtomicU64,
}

impl WorkerShared {
    fn mark_success(&self, at: DateTime<Utc>) {
        if let Ok(mut last) = self.last_success.lock() {
            *last = Some(at);
        }
    }
}

pub(crate) struct WorkerContext {
    pub(crate) pipeline: Arc<DetectionPipeline>,
    pub(crate) shared: Arc<WorkerShared>,
    pub(crate) schedule: CycleSchedule,
    pub(crate) tick: Duration,
    pub(crate) sink: ResultSink,
    pub(crate) cancel: CancellationToken,
    pub(crate) paused: watch::Receiver<bool>,
}

/// Sleep for `duration` unless `cancel` fires first. Returns false when cancelled.
async fn nap(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = cancel.cancelled() => false,
    }
}

pub(crate) async fn detection_loop(ctx: WorkerContext) {
    info!(
        "Detection loop started (adjusted interval {:.1}s)",
        ctx.schedule.adjusted_interval().as_secs_f64()
    );
    // Start of the last cycle that succeeded
    let mut last_success: Option<Instant> = None;

    loop {
        if ctx.cancel.is_cancelled() {
            break;
        }

        if *ctx.paused.borrow() {
            if !nap(ctx.tick, &ctx.cancel).await {
                break;
            }
            continue;
        }

        let now = Instant::now();
        if !ctx.schedule.is_due(last_success, now) {
            let wait = ctx.schedule.next_wait(last_success, now, ctx.tick);
            if !nap(wait, &ctx.cancel).await {
                break;
            }
            continue;
        }

        counter!("vespwatch_cycles_total").increment(1);

        let succeeded = match run_cycle(&ctx.pipeline, &ctx.shared, now).await {
            Ok(record) => {
                last_success = Some(now);
                ctx.shared.mark_success(record.decision.timestamp);
                info!(
                    sequence = record.sequence,
                    class = %record.decision.final_class,
                    confidence = record.decision.confidence,
                    "Cycle completed in {} ms",
                    record.cycle_duration.as_millis()
                );
                if ctx.sink.deliver(record, &ctx.cancel).await == Delivery::Cancelled {
                    debug!("Result dropped: stop requested while waiting for the consumer");
                }
                true
            }
            Err(e) => {
                counter!("vespwatch_cycle_failures_total").increment(1);
                warn!("Detection cycle failed: {}", e);
                false
            }
        };
        histogram!("vespwatch_cycle_seconds").record(now.elapsed().as_secs_f64());

        ctx.pipeline.indicator.check_and_turn_off();

        // Still due after a failure; retry on the next tick
        if !succeeded && !nap(ctx.tick, &ctx.cancel).await {
            break;
        }
    }

    info!("Detection loop stopped");
}

/// One capture → classify → reduce → persist → react pass
pub(crate) async fn run_cycle(
    pipeline: &Arc<DetectionPipeline>,
    shared: &WorkerShared,
    started: Instant,
) -> Result<ResultRecord, CycleError> {
    let source = Arc::clone(&pipeline.frame_source);
    let frame = tokio::task::spawn_blocking(move || source.capture()).await??;
    debug!("Captured frame {} at {}", frame.sequence, frame.path.display());

    let classifier = Arc::clone(&pipeline.classifier);
    let image_path = frame.path.clone();
    let regions = tokio::task::spawn_blocking(move || classifier.infer(&image_path)).await??;

    let decision = pipeline.reducer.reduce(&regions);

    let persistence = Arc::clone(&pipeline.persistence);
    let (persist_frame, persist_decision) = (frame.clone(), decision.clone());
    let artifacts = tokio::task::spawn_blocking(move || {
        persistence.persist(&persist_frame, &persist_decision, &regions)
    })
    .await??;

    let mut alert = None;
    if decision.is_priority {
        counter!("vespwatch_priority_detections_total").increment(1);
        pipeline.indicator.handle_detection();

        let message = compose_detection_alert(
            &pipeline.priority_display_name,
            &decision,
            Some(artifacts.annotated.as_path()),
            &frame.path,
        );
        let latch = Arc::clone(&pipeline.alert_latch);
        let sender = Arc::clone(&pipeline.alert_sender);
        let offered = decision.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            latch.try_dispatch(&offered, &message, sender.as_ref())
        })
        .await?;
        alert = Some(outcome);
    }

    Ok(ResultRecord {
        sequence: shared.sequence.fetch_add(1, Ordering::SeqCst) + 1,
        original_image_path: frame.path,
        annotated_image_path: Some(artifacts.annotated),
        archived_image_path: artifacts.archived,
        indicator_on: pipeline.indicator.get_status(),
        decision,
        alert,
        cycle_duration: started.elapsed(),
    })
}
