//! VespWatch Service
//!
//! Wires the detection pipeline together, consumes its results for display
//! and serves the JSON API used to watch and control it.

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_governor::GovernorLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub mod config;
pub mod display;
pub mod rate_limit;
mod routes;
pub mod telemetry;

use alerting::{AlertLatch, MqttAlertSender};
use config::{AppConfig, LoggingConfig};
use display::DisplayState;
use indicator::{driver_from_config, IndicatorController};
use inference_engine::{OnnxClassifier, Reducer};
use orchestrator::{DetectionOrchestrator, DetectionPipeline};
use rate_limit::{create_governor_config, RateLimitConfig};
use storage::{ArtifactStore, DetectionHistory};

/// Application state shared across handlers
pub struct AppState {
    pub orchestrator: Arc<DetectionOrchestrator>,
    /// Written only by the display consumer
    pub display: Arc<RwLock<DisplayState>>,
    pub history: Arc<DetectionHistory>,
    pub artifacts: ArtifactStore,
    pub priority_label: String,
    pub metrics: Option<PrometheusHandle>,
    pub version: String,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<DetectionOrchestrator>,
        display: Arc<RwLock<DisplayState>>,
        history: Arc<DetectionHistory>,
        artifacts: ArtifactStore,
    ) -> Self {
        let priority_label = orchestrator.pipeline().reducer.priority_label();
        Self {
            orchestrator,
            display,
            history,
            artifacts,
            priority_label,
            metrics: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: Instant::now(),
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// Create the application router. Control routes are rate limited per peer IP.
pub fn create_router(state: Arc<AppState>, rate_limit: &RateLimitConfig) -> Router {
    let mut controls: Router<Arc<AppState>> = Router::new()
        .route("/api/v1/detection/start", post(routes::controls::start_detection))
        .route("/api/v1/detection/stop", post(routes::controls::stop_detection))
        .route("/api/v1/indicator", post(routes::controls::set_indicator))
        .route("/api/v1/alert", post(routes::controls::set_alert));

    match create_governor_config(rate_limit) {
        Some(config) => controls = controls.layer(GovernorLayer { config }),
        None => warn!(
            "Invalid rate limit quota {:?}; control routes are not limited",
            rate_limit
        ),
    }

    Router::new()
        .route("/api/v1/health", get(routes::status::health))
        .route("/api/v1/status", get(routes::status::status))
        .route("/api/v1/results/latest", get(routes::results::latest))
        .route("/api/v1/log", get(routes::results::log))
        .route("/api/v1/detections/timeline", get(routes::detections::timeline))
        .route("/api/v1/detections/saved", get(routes::detections::saved))
        .route("/api/v1/detections/counts", get(routes::detections::counts))
        .route("/metrics", get(routes::status::metrics))
        .merge(controls)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Initialize logging: env filter (`RUST_LOG` overrides the configured
/// level), plain or JSON lines, optionally teed to a file.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .context("invalid log level")?;

    let writer = match &config.file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating log directory {}", parent.display()))?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            BoxMakeWriter::new(std::io::stdout.and(std::sync::Mutex::new(file)))
        }
        None => BoxMakeWriter::new(std::io::stdout),
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true).with_writer(writer))
            .try_init()
    };
    result.context("failed to set tracing subscriber")
}

/// Construct every collaborator from configuration
pub async fn build_pipeline(config: &AppConfig) -> anyhow::Result<DetectionPipeline> {
    let frame_source = frame_source::from_config(&config.capture, config.images_folder.clone())
        .context("configuring frame source")?;

    let model_path = config.model_path.clone();
    let classifier_config = config.classifier.clone();
    let classifier =
        tokio::task::spawn_blocking(move || OnnxClassifier::load(model_path, classifier_config))
            .await
            .context("model loading task failed")?
            .with_context(|| format!("loading model {}", config.model_path.display()))?;

    let reducer = Reducer::new(
        config.class_table(),
        config.conf_threshold,
        config.priority_class,
    )
    .context("configuring reducer")?;

    let indicator = IndicatorController::new(
        driver_from_config(&config.indicator),
        config.indicator.on_duration(),
    );
    let alert_sender =
        MqttAlertSender::connect(config.alert.clone()).context("configuring alert transport")?;

    Ok(DetectionPipeline {
        frame_source: Arc::from(frame_source),
        classifier: Arc::new(classifier),
        reducer,
        persistence: Arc::new(artifact_store(config)),
        indicator: Arc::new(indicator),
        alert_latch: Arc::new(AlertLatch::new()),
        alert_sender: Arc::new(alert_sender),
        priority_display_name: config.priority_display_name.clone(),
    })
}

fn artifact_store(config: &AppConfig) -> ArtifactStore {
    ArtifactStore::new(config.images_folder.clone())
        .with_priority_class(config.priority_class)
        .with_min_confidence(config.conf_threshold)
        .with_annotated_retention(config.storage.annotated_retention)
}

/// Run the service until Ctrl-C / SIGTERM
pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .context("installing Prometheus recorder")?;

    let pipeline = build_pipeline(&config).await?;
    let indicator = Arc::clone(&pipeline.indicator);
    let (orchestrator, receiver) =
        DetectionOrchestrator::new(pipeline, config.orchestrator_config());
    let orchestrator = Arc::new(orchestrator);

    let background = CancellationToken::new();
    let auto_off = indicator.spawn_auto_off(config.indicator.poll_interval(), background.clone());
    let temperature = telemetry::spawn_temperature_monitor(
        config.telemetry.thermal_zone.clone(),
        Duration::from_secs(config.telemetry.temperature_interval_secs),
        background.clone(),
    );

    let display = Arc::new(RwLock::new(DisplayState::default()));
    let history = Arc::new(DetectionHistory::new(config.storage.history_entries));
    let consumer = tokio::spawn(display::run_display(receiver, display.clone(), history.clone()));

    let state = AppState::new(orchestrator.clone(), display, history, artifact_store(&config))
        .with_metrics(metrics);
    let state = Arc::new(state);

    if config.auto_start {
        orchestrator.start()?;
    }

    let app = create_router(state, &RateLimitConfig::from(&config.api));
    let listener = tokio::net::TcpListener::bind(&config.api.bind)
        .await
        .with_context(|| format!("binding API to {}", config.api.bind))?;
    info!("API server listening on {}", config.api.bind);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server failed")?;

    info!("Shutting down");
    orchestrator.shutdown().await;
    background.cancel();
    join_background([
        ("indicator auto-off", auto_off),
        ("temperature monitor", temperature),
    ])
    .await;
    consumer.abort();
    info!("Shutdown complete");
    Ok(())
}

/// Await background tasks, logging any that panicked. Returns how many did.
async fn join_background<const N: usize>(tasks: [(&'static str, JoinHandle<()>); N]) -> usize {
    let mut abnormal = 0;
    for (name, handle) in tasks {
        if let Err(e) = handle.await {
            error!("Background task {} ended abnormally: {}", name, e);
            abnormal += 1;
        }
    }
    abnormal
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
