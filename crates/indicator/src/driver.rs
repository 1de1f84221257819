//! Signal drivers: Linux sysfs GPIO and a simulated pin

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::{IndicatorConfig, IndicatorError};

const SYSFS_GPIO_BASE: &str = "/sys/class/gpio";

/// Attempts to open the pin's attributes after export (udev may still be
/// adjusting permissions right after the export write)
const EXPORT_RETRIES: u32 = 10;
const EXPORT_RETRY_DELAY: Duration = Duration::from_millis(20);

/// Output capability behind the indicator controller
pub trait SignalDriver: Send {
    /// Drive the output high (`true`) or low
    fn set_level(&mut self, on: bool) -> Result<(), IndicatorError>;

    /// Release the underlying hardware handle. The next `set_level`
    /// re-acquires it.
    fn release(&mut self) -> Result<(), IndicatorError>;

    fn describe(&self) -> String;
}

/// Select the driver for `config`: sysfs GPIO when available, otherwise simulated
pub fn driver_from_config(config: &IndicatorConfig) -> Box<dyn SignalDriver> {
    if config.simulate {
        info!("Indicator running in simulation mode");
        return Box::new(SimulatedSignal::new());
    }

    if Path::new(SYSFS_GPIO_BASE).is_dir() {
        Box::new(SysfsGpio::new(config.pin))
    } else {
        warn!(
            "{} not present; indicator on pin {} falls back to simulation",
            SYSFS_GPIO_BASE, config.pin
        );
        Box::new(SimulatedSignal::new())
    }
}

/// GPIO output through the Linux sysfs interface
pub struct SysfsGpio {
    pin: u32,
    base: PathBuf,
    exported: bool,
}

impl SysfsGpio {
    pub fn new(pin: u32) -> Self {
        Self::with_base(pin, SYSFS_GPIO_BASE)
    }

    /// Use an alternative sysfs root
    pub fn with_base(pin: u32, base: impl Into<PathBuf>) -> Self {
        Self {
            pin,
            base: base.into(),
            exported: false,
        }
    }

    fn pin_dir(&self) -> PathBuf {
        self.base.join(format!("gpio{}", self.pin))
    }

    fn write_attr(&self, attribute: &'static str, value: &str) -> Result<(), IndicatorError> {
        std::fs::write(self.pin_dir().join(attribute), value).map_err(|source| {
            IndicatorError::Write {
                pin: self.pin,
                attribute,
                source,
            }
        })
    }

    fn acquire(&mut self) -> Result<(), IndicatorError> {
        if !self.pin_dir().is_dir() {
            std::fs::write(self.base.join("export"), self.pin.to_string())
                .map_err(|source| IndicatorError::Export { pin: self.pin, source })?;
        }

        let mut attempt = 0;
        loop {
            match self.write_attr("direction", "out") {
                Ok(()) => break,
                Err(e) if attempt + 1 < EXPORT_RETRIES => {
                    debug!("GPIO {} not ready yet: {}", self.pin, e);
                    attempt += 1;
                    std::thread::sleep(EXPORT_RETRY_DELAY);
                }
                Err(e) => return Err(e),
            }
        }

        self.exported = true;
        info!("GPIO {} configured as output", self.pin);
        Ok(())
    }
}

impl SignalDriver for SysfsGpio {
    fn set_level(&mut self, on: bool) -> Result<(), IndicatorError> {
        if !self.exported {
            self.acquire()?;
        }
        self.write_attr("value", if on { "1" } else { "0" })
    }

    fn release(&mut self) -> Result<(), IndicatorError> {
        if !self.exported {
            return Ok(());
        }
        self.exported = false;
        if let Err(e) = self.write_attr("value", "0") {
            warn!("GPIO {} could not be driven low before release: {}", self.pin, e);
        }
        std::fs::write(self.base.join("unexport"), self.pin.to_string())
            .map_err(|source| IndicatorError::Release { pin: self.pin, source })?;
        info!("GPIO {} released", self.pin);
        Ok(())
    }

    fn describe(&self) -> String {
        format!("sysfs gpio{}", self.pin)
    }
}

/// Observes the level of a [`SimulatedSignal`] from another thread
#[derive(Debug, Clone)]
pub struct SignalTap {
    level: Arc<AtomicBool>,
    writes: Arc<AtomicUsize>,
}

impl SignalTap {
    pub fn is_high(&self) -> bool {
        self.level.load(Ordering::SeqCst)
    }

    /// Number of level writes so far
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

/// In-memory pin used when no GPIO hardware is present
#[derive(Debug, Default)]
pub struct SimulatedSignal {
    level: Arc<AtomicBool>,
    writes: Arc<AtomicUsize>,
}

impl SimulatedSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tap(&self) -> SignalTap {
        SignalTap {
            level: Arc::clone(&self.level),
            writes: Arc::clone(&self.writes),
        }
    }
}

impl SignalDriver for SimulatedSignal {
    fn set_level(&mut self, on: bool) -> Result<(), IndicatorError> {
        let was = self.level.swap(on, Ordering::SeqCst);
        self.writes.fetch_add(1, Ordering::SeqCst);
        if was != on {
            info!("Simulated: LED {}", if on { "ON" } else { "OFF" });
        }
        Ok(())
    }

    fn release(&mut self) -> Result<(), IndicatorError> {
        self.level.store(false, Ordering::SeqCst);
        debug!("Simulated signal released");
        Ok(())
    }

    fn describe(&self) -> String {
        "simulated signal".to_string()
    }
}
