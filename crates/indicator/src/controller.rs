//! Indicator state machine with timed auto-off

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::SignalDriver;

/// Indicator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    /// BCM GPIO pin number
    pub pin: u32,
    /// How long the signal stays on after a detection (seconds)
    pub on_duration: f64,
    /// Auto-off polling period (milliseconds)
    pub poll_interval_ms: u64,
    /// Never touch hardware
    pub simulate: bool,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            pin: 17,
            on_duration: 10.0,
            poll_interval_ms: 100,
            simulate: false,
        }
    }
}

impl IndicatorConfig {
    pub fn on_duration(&self) -> Duration {
        Duration::from_secs_f64(self.on_duration.max(0.0))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Controller state. "On" only exists while armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorState {
    Disarmed,
    ArmedOff,
    ArmedOn,
}

/// Snapshot for presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndicatorStatus {
    pub armed: bool,
    pub on: bool,
}

struct Inner {
    state: IndicatorState,
    last_on_time: Option<Instant>,
    driver: Box<dyn SignalDriver>,
    /// Whether the driver currently holds the hardware
    hardware_active: bool,
}

impl Inner {
    /// Drive the pin low; failures are logged and the signal is assumed off
    fn drive_off(&mut self) {
        if let Err(e) = self.driver.set_level(false) {
            error!("Failed to turn off indicator ({}): {}", self.driver.describe(), e);
        }
        self.hardware_active = true;
    }
}

/// Timed indicator controller.
///
/// All operations take the controller's single lock; none of them block on
/// anything but that lock and the driver write.
pub struct IndicatorController {
    inner: Mutex<Inner>,
    on_duration: Duration,
}

impl IndicatorController {
    /// Create a disarmed controller; the output is driven low immediately
    pub fn new(driver: Box<dyn SignalDriver>, on_duration: Duration) -> Self {
        info!(
            "Indicator controller on {} with on_duration={:.1}s",
            driver.describe(),
            on_duration.as_secs_f64()
        );
        let mut inner = Inner {
            state: IndicatorState::Disarmed,
            last_on_time: None,
            driver,
            hardware_active: false,
        };
        inner.drive_off();
        Self {
            inner: Mutex::new(inner),
            on_duration,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Arm (`true`) or disarm (`false`). Disarming forces the signal off.
    pub fn set_enabled(&self, enabled: bool) {
        let mut inner = self.lock();
        if enabled {
            if inner.state == IndicatorState::Disarmed {
                inner.state = IndicatorState::ArmedOff;
            }
        } else {
            inner.state = IndicatorState::Disarmed;
            inner.last_on_time = None;
            inner.drive_off();
        }
        info!("Indicator enabled set to {}", enabled);
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().state != IndicatorState::Disarmed
    }

    /// React to a detection at the current time
    pub fn handle_detection(&self) -> bool {
        self.handle_detection_at(Instant::now())
    }

    /// Switch on if armed and currently off. Returns whether it switched on.
    /// An active on-period is never extended.
    pub fn handle_detection_at(&self, now: Instant) -> bool {
        let mut inner = self.lock();
        match inner.state {
            IndicatorState::Disarmed => {
                debug!("Detection ignored: indicator not armed");
                false
            }
            IndicatorState::ArmedOn => false,
            IndicatorState::ArmedOff => match inner.driver.set_level(true) {
                Ok(()) => {
                    inner.hardware_active = true;
                    inner.state = IndicatorState::ArmedOn;
                    inner.last_on_time = Some(now);
                    info!(
                        "Indicator turned on for {:.1}s",
                        self.on_duration.as_secs_f64()
                    );
                    true
                }
                Err(e) => {
                    error!("Failed to turn on indicator: {}", e);
                    inner.drive_off();
                    false
                }
            },
        }
    }

    pub fn check_and_turn_off(&self) -> bool {
        self.check_and_turn_off_at(Instant::now())
    }

    /// Switch off once the on-duration has elapsed. Returns whether it switched off.
    pub fn check_and_turn_off_at(&self, now: Instant) -> bool {
        let mut inner = self.lock();
        self.expire(&mut inner, now)
    }

    fn expire(&self, inner: &mut Inner, now: Instant) -> bool {
        if inner.state != IndicatorState::ArmedOn {
            return false;
        }
        let elapsed = inner
            .last_on_time
            .map(|t| now.saturating_duration_since(t))
            .unwrap_or(Duration::MAX);
        if elapsed < self.on_duration {
            return false;
        }

        inner.state = IndicatorState::ArmedOff;
        inner.drive_off();
        info!("Indicator turned off after {:.1}s", elapsed.as_secs_f64());
        true
    }

    /// True iff the signal is on
    pub fn get_status(&self) -> bool {
        self.get_status_at(Instant::now())
    }

    /// Applies a pending expiry first so a stale "on" is never reported
    pub fn get_status_at(&self, now: Instant) -> bool {
        let mut inner = self.lock();
        self.expire(&mut inner, now);
        inner.state == IndicatorState::ArmedOn
    }

    pub fn status(&self) -> IndicatorStatus {
        let now = Instant::now();
        let mut inner = self.lock();
        self.expire(&mut inner, now);
        IndicatorStatus {
            armed: inner.state != IndicatorState::Disarmed,
            on: inner.state == IndicatorState::ArmedOn,
        }
    }

    pub fn state(&self) -> IndicatorState {
        self.lock().state
    }

    pub fn last_on_time(&self) -> Option<Instant> {
        self.lock().last_on_time
    }

    pub fn on_duration(&self) -> Duration {
        self.on_duration
    }

    /// Signal off, disarm and release the hardware handle. Idempotent.
    pub fn cleanup(&self) {
        let mut inner = self.lock();
        inner.state = IndicatorState::Disarmed;
        inner.last_on_time = None;
        if !inner.hardware_active {
            return;
        }
        inner.drive_off();
        if let Err(e) = inner.driver.release() {
            error!("Error during indicator cleanup: {}", e);
        }
        inner.hardware_active = false;
        info!("Indicator cleanup completed");
    }

    /// Poll `check_and_turn_off` every `period` until `cancel` fires
    pub fn spawn_auto_off(
        self: &Arc<Self>,
        period: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        controller.check_and_turn_off();
                    }
                    _ = cancel.cancelled() => {
                        debug!("Indicator auto-off poller stopped");
                        break;
                    }
                }
            }
        })
    }
}
