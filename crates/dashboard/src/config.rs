//! Application configuration
//!
//! Loaded once at startup from a YAML file layered with `VESPWATCH__*`
//! environment variables (`VESPWATCH__ALERT__BROKER_HOST=...`).

use alerting::AlertTransportConfig;
use frame_source::CameraConfig;
use indicator::IndicatorConfig;
use inference_engine::{ClassTable, ClassifierConfig};
use orchestrator::OrchestratorConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Used when no path is given on the command line or in `VESPWATCH_CONFIG`
pub const DEFAULT_CONFIG_PATH: &str = "config/config.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind: String,
    /// Seconds to replenish one control request
    pub control_per_second: u64,
    pub control_burst: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            control_per_second: 2,
            control_burst: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    pub level: String,
    pub json: bool,
    /// Also append log output to this file
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub temperature_interval_secs: u64,
    pub thermal_zone: PathBuf,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            temperature_interval_secs: 900,
            thermal_zone: PathBuf::from("/sys/class/thermal/thermal_zone0/temp"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Cycle outcomes kept for the timeline
    pub history_entries: usize,
    /// Annotated images kept on disk
    pub annotated_retention: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            history_entries: 10_000,
            annotated_retention: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub model_path: PathBuf,
    pub images_folder: PathBuf,
    /// Regions at or below this confidence are discarded
    pub conf_threshold: f32,
    /// Seconds between cycle starts
    pub capture_interval: f64,
    /// Seconds subtracted from the interval for processing time
    pub processing_compensation: f64,
    pub class_names: Vec<String>,
    pub priority_class: u32,
    pub priority_display_name: String,
    /// Start detecting as soon as the service is up
    pub auto_start: bool,
    pub capture: CameraConfig,
    pub classifier: ClassifierConfig,
    pub indicator: IndicatorConfig,
    pub alert: AlertTransportConfig,
    pub storage: StorageConfig,
    pub api: ApiConfig,
    pub logging: LoggingConfig,
    pub telemetry: TelemetryConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/vespcv.onnx"),
            images_folder: PathBuf::from("data/images"),
            conf_threshold: 0.8,
            capture_interval: 15.0,
            processing_compensation: 3.0,
            class_names: ["amel", "acra", "vcra", "vvel"].map(String::from).to_vec(),
            priority_class: 3,
            priority_display_name: "Vespa velutina".to_string(),
            auto_start: true,
            capture: CameraConfig::default(),
            classifier: ClassifierConfig::default(),
            indicator: IndicatorConfig::default(),
            alert: AlertTransportConfig::default(),
            storage: StorageConfig::default(),
            api: ApiConfig::default(),
            logging: LoggingConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from `path` (required) or from [`DEFAULT_CONFIG_PATH`] if present,
    /// then apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_PATH).required(false),
        };

        let config: AppConfig = config::Config::builder()
            .add_source(file.format(config::FileFormat::Yaml))
            .add_source(
                config::Environment::with_prefix("VESPWATCH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if !(0.0..=1.0).contains(&self.conf_threshold) {
            return invalid(format!("conf_threshold {} outside [0, 1]", self.conf_threshold));
        }
        if !(self.capture_interval > 0.0) || !self.capture_interval.is_finite() {
            return invalid(format!(
                "capture_interval must be positive, got {}",
                self.capture_interval
            ));
        }
        if !(self.processing_compensation >= 0.0) || !self.processing_compensation.is_finite() {
            return invalid(format!(
                "processing_compensation must be non-negative, got {}",
                self.processing_compensation
            ));
        }
        if self.class_names.is_empty() {
            return invalid("class_names must not be empty".to_string());
        }
        if self.priority_class as usize >= self.class_names.len() {
            return invalid(format!(
                "priority_class {} has no entry in class_names ({} classes)",
                self.priority_class,
                self.class_names.len()
            ));
        }
        if !(self.indicator.on_duration >= 0.0) {
            return invalid(format!(
                "indicator.on_duration must be non-negative, got {}",
                self.indicator.on_duration
            ));
        }
        if self.telemetry.temperature_interval_secs == 0 {
            return invalid("telemetry.temperature_interval_secs must be positive".to_string());
        }
        self.classifier
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn class_table(&self) -> ClassTable {
        ClassTable::new(self.class_names.iter().cloned())
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            capture_interval: Duration::from_secs_f64(self.capture_interval),
            processing_compensation: Duration::from_secs_f64(self.processing_compensation),
            ..OrchestratorConfig::default()
        }
    }
}
