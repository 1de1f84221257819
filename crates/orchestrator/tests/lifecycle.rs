//! Worker lifecycle tests against in-memory collaborators

use alerting::{AlertLatch, AlertOutcome, RecordingSender, SuppressReason};
use frame_source::{CameraError, CapturedFrame, FrameSource};
use indicator::{IndicatorController, SignalTap, SimulatedSignal};
use inference_engine::{BoundingBox, ClassTable, Decision, DetectionRegion, MockClassifier, Reducer};
use orchestrator::{
    DetectionOrchestrator, DetectionPipeline, OrchestratorConfig, OrchestratorState,
    ResultReceiver,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use storage::{PersistedArtifacts, Persistence, StorageError};

const PRIORITY: u32 = 3;

struct StubSource {
    path: PathBuf,
    fail_first: u64,
    calls: AtomicU64,
}

impl FrameSource for StubSource {
    fn capture(&self) -> Result<CapturedFrame, CameraError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            return Err(CameraError::CommandFailed("camera busy".into()));
        }
        Ok(CapturedFrame::new(self.path.clone(), call + 1))
    }

    fn describe(&self) -> String {
        "stub source".into()
    }
}

#[derive(Default)]
struct NullPersistence {
    calls: AtomicUsize,
}

impl Persistence for NullPersistence {
    fn persist(
        &self,
        frame: &CapturedFrame,
        _decision: &Decision,
        _regions: &[DetectionRegion],
    ) -> Result<PersistedArtifacts, StorageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(PersistedArtifacts {
            annotated: frame.path.clone(),
            archived: None,
            sidecar: None,
        })
    }
}

struct Harness {
    orchestrator: Arc<DetectionOrchestrator>,
    receiver: ResultReceiver,
    tap: SignalTap,
    latch: Arc<AlertLatch>,
    sender: Arc<RecordingSender>,
    source: Arc<StubSource>,
    _dir: tempfile::TempDir,
}

struct Setup {
    responses: Vec<Result<Vec<DetectionRegion>, String>>,
    latency: Duration,
    fail_first: u64,
    interval: Duration,
    on_duration: Duration,
    shutdown_timeout: Duration,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            responses: vec![Ok(vec![])],
            latency: Duration::ZERO,
            fail_first: 0,
            interval: Duration::from_millis(100),
            on_duration: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(2),
        }
    }
}

fn hornet() -> Vec<DetectionRegion> {
    vec![DetectionRegion::new(BoundingBox::new(1.0, 1.0, 9.0, 9.0), PRIORITY, 0.92)]
}

fn harness(setup: Setup) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let frame = dir.path().join("image_for_detection.jpg");
    std::fs::write(&frame, b"jpeg").unwrap();

    let source = Arc::new(StubSource {
        path: frame,
        fail_first: setup.fail_first,
        calls: AtomicU64::new(0),
    });
    let signal = SimulatedSignal::new();
    let tap = signal.tap();
    let indicator = Arc::new(IndicatorController::new(Box::new(signal), setup.on_duration));
    let latch = Arc::new(AlertLatch::new());
    let sender = Arc::new(RecordingSender::new());

    let pipeline = DetectionPipeline {
        frame_source: source.clone(),
        classifier: Arc::new(MockClassifier::new(setup.responses).with_latency(setup.latency)),
        reducer: Reducer::new(ClassTable::new(["amel", "acra", "vcra", "vvel"]), 0.5, PRIORITY)
            .unwrap(),
        persistence: Arc::new(NullPersistence::default()),
        indicator,
        alert_latch: latch.clone(),
        alert_sender: sender.clone(),
        priority_display_name: "Vespa velutina".into(),
    };
    let config = OrchestratorConfig {
        capture_interval: setup.interval,
        processing_compensation: Duration::ZERO,
        tick: Duration::from_millis(20),
        shutdown_timeout: setup.shutdown_timeout,
        sink_capacity: 32,
    };
    let (orchestrator, receiver) = DetectionOrchestrator::new(pipeline, config);

    Harness {
        orchestrator: Arc::new(orchestrator),
        receiver,
        tap,
        latch,
        sender,
        source,
        _dir: dir,
    }
}

async fn next_record(receiver: &mut ResultReceiver) -> orchestrator::ResultRecord {
    tokio::time::timeout(Duration::from_secs(3), receiver.recv())
        .await
        .expect("no result within 3s")
        .expect("result channel closed")
}

fn drain(receiver: &mut ResultReceiver) -> usize {
    std::iter::from_fn(|| receiver.try_recv()).count()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_start_produces_ordered_results() {
    let mut h = harness(Setup::default());
    assert_eq!(h.orchestrator.state(), OrchestratorState::Stopped);

    h.orchestrator.start().unwrap();
    assert!(h.orchestrator.is_running());

    let sequences: Vec<u64> = {
        let mut seqs = Vec::new();
        for _ in 0..3 {
            seqs.push(next_record(&mut h.receiver).await.sequence);
        }
        seqs
    };
    assert_eq!(sequences, [1, 2, 3]);
    assert!(h.orchestrator.last_success().is_some());

    h.orchestrator.shutdown().await;
    assert_eq!(h.orchestrator.state(), OrchestratorState::Stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_start_is_idempotent() {
    let h = harness(Setup::default());
    h.orchestrator.start().unwrap();
    h.orchestrator.start().unwrap();
    h.orchestrator.start().unwrap();
    assert_eq!(h.orchestrator.worker_generation(), 1);
    h.orchestrator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_pauses_and_start_resumes_same_worker() {
    let mut h = harness(Setup::default());
    h.orchestrator.start().unwrap();
    next_record(&mut h.receiver).await;

    h.orchestrator.stop();
    assert_eq!(h.orchestrator.state(), OrchestratorState::Paused);
    assert!(!h.orchestrator.is_running());

    // Let an in-flight cycle finish, then make sure nothing else arrives
    tokio::time::sleep(Duration::from_millis(200)).await;
    drain(&mut h.receiver);
    let captures = h.source.calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(drain(&mut h.receiver), 0);
    assert_eq!(h.source.calls.load(Ordering::SeqCst), captures);

    h.orchestrator.start().unwrap();
    assert!(h.orchestrator.is_running());
    next_record(&mut h.receiver).await;
    assert_eq!(h.orchestrator.worker_generation(), 1);

    h.orchestrator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_restart_after_shutdown_spawns_new_worker() {
    let mut h = harness(Setup::default());
    h.orchestrator.start().unwrap();
    next_record(&mut h.receiver).await;
    h.orchestrator.shutdown().await;

    h.orchestrator.start().unwrap();
    assert_eq!(h.orchestrator.worker_generation(), 2);
    let record = next_record(&mut h.receiver).await;
    assert!(record.sequence >= 2);
    h.orchestrator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_priority_detection_drives_indicator_and_alert_once() {
    let mut h = harness(Setup {
        responses: vec![Ok(hornet())],
        ..Setup::default()
    });
    h.orchestrator.pipeline().indicator.set_enabled(true);
    h.latch.arm();
    h.orchestrator.start().unwrap();

    let first = next_record(&mut h.receiver).await;
    assert_eq!(first.decision.final_class, "vvel");
    assert!(first.indicator_on);
    assert_eq!(first.alert, Some(AlertOutcome::Sent));
    assert!(h.tap.is_high());

    for _ in 0..3 {
        let later = next_record(&mut h.receiver).await;
        assert_eq!(later.alert, Some(AlertOutcome::Suppressed(SuppressReason::AlreadyFired)));
    }
    assert_eq!(h.sender.sent().len(), 1);
    assert_eq!(h.sender.sent()[0].subject, "Vespa velutina detected");

    h.orchestrator.shutdown().await;
    assert!(!h.tap.is_high());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_non_priority_leaves_side_effects_alone() {
    let mut h = harness(Setup {
        responses: vec![Ok(vec![DetectionRegion::new(
            BoundingBox::new(0.0, 0.0, 4.0, 4.0),
            0,
            0.9,
        )])],
        ..Setup::default()
    });
    h.orchestrator.pipeline().indicator.set_enabled(true);
    h.latch.arm();
    h.orchestrator.start().unwrap();

    let record = next_record(&mut h.receiver).await;
    assert_eq!(record.decision.final_class, "amel");
    assert!(record.alert.is_none());
    assert!(!record.indicator_on);
    assert_eq!(h.sender.attempts(), 0);

    h.orchestrator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_forces_indicator_off() {
    let mut h = harness(Setup {
        responses: vec![Ok(hornet())],
        ..Setup::default()
    });
    h.orchestrator.pipeline().indicator.set_enabled(true);
    h.orchestrator.start().unwrap();
    next_record(&mut h.receiver).await;
    assert!(h.tap.is_high());

    h.orchestrator.stop();
    assert!(!h.tap.is_high());
    assert!(!h.orchestrator.pipeline().indicator.is_enabled());
    h.orchestrator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_cycles_are_skipped_not_fatal() {
    let mut h = harness(Setup {
        fail_first: 2,
        responses: vec![Err("model crashed".into()), Ok(vec![])],
        ..Setup::default()
    });
    h.orchestrator.start().unwrap();

    // Two capture failures and one classifier failure produce no records
    let record = next_record(&mut h.receiver).await;
    assert_eq!(record.sequence, 1);
    assert!(h.source.calls.load(Ordering::SeqCst) >= 4);
    assert!(h.orchestrator.is_running());

    h.orchestrator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_capture_is_retried_without_waiting_an_interval() {
    let mut h = harness(Setup {
        fail_first: 1,
        interval: Duration::from_secs(2),
        ..Setup::default()
    });

    let begin = Instant::now();
    h.orchestrator.start().unwrap();
    let record = next_record(&mut h.receiver).await;
    let took = begin.elapsed();
    assert_eq!(record.sequence, 1);
    assert!(took < Duration::from_millis(500), "first success after {:?}", took);
    assert_eq!(h.source.calls.load(Ordering::SeqCst), 2);

    // The successful cycle restarts the interval
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(h.source.calls.load(Ordering::SeqCst), 2);

    h.orchestrator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_auto_off_runs_after_failed_cycles() {
    let mut h = harness(Setup {
        responses: vec![Ok(hornet()), Err("model crashed".into())],
        on_duration: Duration::from_millis(150),
        ..Setup::default()
    });
    h.orchestrator.pipeline().indicator.set_enabled(true);
    h.orchestrator.start().unwrap();

    let record = next_record(&mut h.receiver).await;
    assert!(record.indicator_on);

    // Every later cycle fails and no poller is running
    let deadline = Instant::now() + Duration::from_secs(2);
    while h.tap.is_high() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!h.tap.is_high());
    assert!(h.orchestrator.pipeline().indicator.is_enabled());
    assert_eq!(drain(&mut h.receiver), 0);

    h.orchestrator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_start_refused_while_timed_out_worker_is_still_cycling() {
    let mut h = harness(Setup {
        latency: Duration::from_millis(1_500),
        shutdown_timeout: Duration::from_millis(100),
        interval: Duration::from_secs(60),
        ..Setup::default()
    });
    h.orchestrator.start().unwrap();
    // Inside the slow classifier call
    tokio::time::sleep(Duration::from_millis(150)).await;

    h.orchestrator.shutdown().await;
    assert_eq!(h.orchestrator.state(), OrchestratorState::Stopping);
    assert!(matches!(
        h.orchestrator.start(),
        Err(orchestrator::OrchestratorError::StillStopping)
    ));
    assert_eq!(h.source.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.orchestrator.worker_generation(), 1);

    // The cycle completes, then the old worker exits
    next_record(&mut h.receiver).await;
    let deadline = Instant::now() + Duration::from_secs(3);
    while h.orchestrator.state() != OrchestratorState::Stopped && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(h.orchestrator.state(), OrchestratorState::Stopped);

    h.orchestrator.start().unwrap();
    assert_eq!(h.orchestrator.worker_generation(), 2);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.source.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_while_idle_is_prompt() {
    let mut h = harness(Setup {
        interval: Duration::from_secs(60),
        ..Setup::default()
    });
    h.orchestrator.start().unwrap();
    next_record(&mut h.receiver).await;

    let begin = Instant::now();
    h.orchestrator.shutdown().await;
    assert!(begin.elapsed() < Duration::from_millis(500), "took {:?}", begin.elapsed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_mid_cycle_waits_for_cycle() {
    let h = harness(Setup {
        latency: Duration::from_millis(600),
        ..Setup::default()
    });
    h.orchestrator.start().unwrap();
    // Inside the slow classifier call
    tokio::time::sleep(Duration::from_millis(150)).await;

    let begin = Instant::now();
    h.orchestrator.shutdown().await;
    let took = begin.elapsed();
    assert!(took < Duration::from_millis(2_200), "took {:?}", took);
    assert_eq!(h.orchestrator.state(), OrchestratorState::Stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_without_start_returns() {
    let h = harness(Setup::default());
    h.orchestrator.shutdown().await;
    assert_eq!(h.orchestrator.worker_generation(), 0);
}

#[test]
fn test_start_outside_runtime_fails() {
    let h = harness(Setup::default());
    assert!(matches!(
        h.orchestrator.start(),
        Err(orchestrator::OrchestratorError::NoRuntime)
    ));
    assert_eq!(h.orchestrator.state(), OrchestratorState::Stopped);
}
