//! Start/stop/pause lifecycle of the detection worker

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::worker::{detection_loop, WorkerContext, WorkerShared};
use crate::{
    result_channel, DetectionPipeline, OrchestratorConfig, OrchestratorError, ResultReceiver,
    ResultSink,
};

/// Lifecycle state, derived from the worker slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    Stopped,
    Running,
    Paused,
    /// Shutdown requested; the last cycle is still in flight
    Stopping,
}

struct WorkerSlot {
    /// `None` while `shutdown()` is joining it
    handle: Option<JoinHandle<()>>,
    cancel: CancellationToken,
    pause: watch::Sender<bool>,
}

impl WorkerSlot {
    fn state(&self) -> OrchestratorState {
        match &self.handle {
            None => OrchestratorState::Stopping,
            Some(handle) if handle.is_finished() => OrchestratorState::Stopped,
            Some(_) if self.cancel.is_cancelled() => OrchestratorState::Stopping,
            Some(_) if *self.pause.borrow() => OrchestratorState::Paused,
            Some(_) => OrchestratorState::Running,
        }
    }
}

/// Owns the background detection worker.
///
/// Shared behind an `Arc`; every method takes `&self`. `stop()` pauses the
/// worker after its current cycle, `start()` resumes it, `shutdown()` ends it.
pub struct DetectionOrchestrator {
    pipeline: Arc<DetectionPipeline>,
    config: OrchestratorConfig,
    sink: ResultSink,
    shared: Arc<WorkerShared>,
    worker: Mutex<Option<WorkerSlot>>,
    generation: AtomicU64,
}

impl DetectionOrchestrator {
    /// Create a stopped orchestrator and the receiving end of its results
    pub fn new(pipeline: DetectionPipeline, config: OrchestratorConfig) -> (Self, ResultReceiver) {
        let (sink, receiver) = result_channel(config.sink_capacity);
        info!("Detection pipeline: {}", pipeline.describe());
        let orchestrator = Self {
            pipeline: Arc::new(pipeline),
            config,
            sink,
            shared: Arc::new(WorkerShared::default()),
            worker: Mutex::new(None),
            generation: AtomicU64::new(0),
        };
        (orchestrator, receiver)
    }

    fn slot(&self) -> MutexGuard<'_, Option<WorkerSlot>> {
        self.worker.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start the worker, or resume it if paused. No-op when already running.
    pub fn start(&self) -> Result<(), OrchestratorError> {
        let mut slot = self.slot();

        if let Some(worker) = slot.as_ref() {
            match worker.state() {
                OrchestratorState::Running => return Ok(()),
                OrchestratorState::Paused => {
                    worker.pause.send_replace(false);
                    info!("Detection resumed");
                    return Ok(());
                }
                OrchestratorState::Stopping => {
                    warn!("Cannot start detection: previous worker is still finishing its cycle");
                    return Err(OrchestratorError::StillStopping);
                }
                OrchestratorState::Stopped => {}
            }
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            error!("Cannot start detection: no tokio runtime");
            OrchestratorError::NoRuntime
        })?;

        let cancel = CancellationToken::new();
        let (pause, paused) = watch::channel(false);
        let ctx = WorkerContext {
            pipeline: Arc::clone(&self.pipeline),
            shared: Arc::clone(&self.shared),
            schedule: self.config.schedule(),
            tick: self.config.tick,
            sink: self.sink.clone(),
            cancel: cancel.clone(),
            paused,
        };
        let handle = runtime.spawn(detection_loop(ctx));

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *slot = Some(WorkerSlot {
            handle: Some(handle),
            cancel,
            pause,
        });
        info!("Detection started (worker generation {})", generation);
        Ok(())
    }

    /// Pause after the current cycle and switch the indicator off
    pub fn stop(&self) {
        if let Some(worker) = self.slot().as_ref() {
            worker.pause.send_replace(true);
        }
        self.pipeline.indicator.cleanup();
        info!("Detection stopped");
    }

    pub fn is_running(&self) -> bool {
        self.state() == OrchestratorState::Running
    }

    pub fn state(&self) -> OrchestratorState {
        self.slot()
            .as_ref()
            .map_or(OrchestratorState::Stopped, WorkerSlot::state)
    }

    /// End the worker, waiting at most the configured shutdown timeout.
    /// Always returns; the indicator is cleaned up either way. A worker that
    /// outlives the timeout stays in the slot as `Stopping` until it exits.
    pub async fn shutdown(&self) {
        let handle = {
            let mut slot = self.slot();
            slot.as_mut().and_then(|worker| {
                worker.cancel.cancel();
                worker.handle.take()
            })
        };

        if let Some(mut handle) = handle {
            match tokio::time::timeout(self.config.shutdown_timeout, &mut handle).await {
                Ok(result) => {
                    match result {
                        Ok(()) => info!("Detection worker joined"),
                        Err(e) => error!("Detection worker ended abnormally: {}", e),
                    }
                    *self.slot() = None;
                }
                Err(_) => {
                    warn!(
                        "Detection worker did not stop within {:.1}s",
                        self.config.shutdown_timeout.as_secs_f64()
                    );
                    if let Some(worker) = self.slot().as_mut() {
                        worker.handle = Some(handle);
                    }
                }
            }
        }

        self.pipeline.indicator.cleanup();
    }

    /// Number of worker tasks spawned so far (resuming does not count)
    pub fn worker_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Decision time of the last successful cycle
    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        self.shared.last_success.lock().ok().and_then(|last| *last)
    }

    pub fn pipeline(&self) -> &Arc<DetectionPipeline> {
        &self.pipeline
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }
}
