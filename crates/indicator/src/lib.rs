//! Physical Indicator
//!
//! Drives an LED or relay on a GPIO pin. The controller is an independent
//! timed state machine: armed by the operator, switched on by a detection,
//! switched off again once its on-duration has elapsed.

mod controller;
mod driver;

pub use controller::{IndicatorConfig, IndicatorController, IndicatorState, IndicatorStatus};
pub use driver::{driver_from_config, SignalDriver, SignalTap, SimulatedSignal, SysfsGpio};

use thiserror::Error;

/// Indicator error types
#[derive(Error, Debug)]
pub enum IndicatorError {
    #[error("Failed to export GPIO {pin}: {source}")]
    Export {
        pin: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write GPIO {pin} {attribute}: {source}")]
    Write {
        pin: u32,
        attribute: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to release GPIO {pin}: {source}")]
    Release {
        pin: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Signal driver unavailable: {0}")]
    Unavailable(String),
}
