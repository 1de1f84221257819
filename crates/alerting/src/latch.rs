//! One-shot alert latch

use inference_engine::Decision;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::{Alert, AlertSender};

/// Latch state. `fired` only returns to false through [`AlertLatch::arm`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertLatchState {
    pub armed: bool,
    pub fired: bool,
}

/// Why a decision did not produce a send attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressReason {
    NotPriority,
    Disarmed,
    AlreadyFired,
}

/// Result of offering a decision to the latch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum AlertOutcome {
    Sent,
    Failed(String),
    Suppressed(SuppressReason),
}

impl AlertOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, AlertOutcome::Sent)
    }
}

/// Gates the outbound alert to at most one successful send per arm
#[derive(Debug, Default)]
pub struct AlertLatch {
    state: Mutex<AlertLatchState>,
}

impl AlertLatch {
    /// Create a disarmed latch
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, AlertLatchState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Arm and clear `fired`
    pub fn arm(&self) {
        let mut state = self.lock();
        state.armed = true;
        state.fired = false;
        info!("Alert latch armed");
    }

    /// Disarm; `fired` is left as is
    pub fn disarm(&self) {
        self.lock().armed = false;
        info!("Alert latch disarmed");
    }

    pub fn set_armed(&self, armed: bool) {
        if armed {
            self.arm()
        } else {
            self.disarm()
        }
    }

    pub fn state(&self) -> AlertLatchState {
        *self.lock()
    }

    /// Offer a decision to the latch.
    ///
    /// A priority decision on an armed, unfired latch triggers exactly one
    /// send attempt. The lock is held across the send so concurrent callers
    /// cannot both dispatch. A failed send leaves the latch unfired.
    pub fn try_dispatch(
        &self,
        decision: &Decision,
        alert: &Alert,
        sender: &dyn AlertSender,
    ) -> AlertOutcome {
        if !decision.is_priority {
            return AlertOutcome::Suppressed(SuppressReason::NotPriority);
        }

        let mut state = self.lock();
        if !state.armed {
            debug!("Alert suppressed: latch disarmed");
            return AlertOutcome::Suppressed(SuppressReason::Disarmed);
        }
        if state.fired {
            debug!("Alert suppressed: already sent since last arm");
            return AlertOutcome::Suppressed(SuppressReason::AlreadyFired);
        }

        match sender.send(alert) {
            Ok(()) => {
                state.fired = true;
                info!(
                    sender = %sender.describe(),
                    "Alert sent: {} (confidence {:.2})",
                    alert.subject,
                    decision.confidence
                );
                AlertOutcome::Sent
            }
            Err(e) => {
                warn!("Alert dispatch failed, will retry on next detection: {}", e);
                AlertOutcome::Failed(e.to_string())
            }
        }
    }
}
