//! Orchestrator timing configuration

use std::time::Duration;

use crate::CycleSchedule;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Target time between cycle starts
    pub capture_interval: Duration,
    /// Fixed allowance subtracted from the interval for processing time
    pub processing_compensation: Duration,
    /// Polling granularity while paused or waiting for the next slot
    pub tick: Duration,
    /// Upper bound on `shutdown()` waiting for the worker
    pub shutdown_timeout: Duration,
    /// Result channel capacity
    pub sink_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            capture_interval: Duration::from_secs(15),
            processing_compensation: Duration::from_secs(3),
            tick: Duration::from_millis(100),
            shutdown_timeout: Duration::from_secs(2),
            sink_capacity: 32,
        }
    }
}

impl OrchestratorConfig {
    pub fn schedule(&self) -> CycleSchedule {
        CycleSchedule::new(self.capture_interval, self.processing_compensation)
    }
}
