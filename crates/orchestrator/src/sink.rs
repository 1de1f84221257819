//! Ordered result hand-off to the display consumer

use alerting::AlertOutcome;
use inference_engine::Decision;
use serde::{Serialize, Serializer};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Outcome of one completed cycle
#[derive(Debug, Clone, Serialize)]
pub struct ResultRecord {
    /// Position in completion order, starting at 1
    pub sequence: u64,
    pub original_image_path: PathBuf,
    pub annotated_image_path: Option<PathBuf>,
    pub archived_image_path: Option<PathBuf>,
    pub decision: Decision,
    pub indicator_on: bool,
    /// `None` when the decision was not a priority detection
    pub alert: Option<AlertOutcome>,
    #[serde(rename = "cycle_ms", serialize_with = "as_millis")]
    pub cycle_duration: Duration,
}

fn as_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Result of [`ResultSink::deliver`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// The consumer is gone; the record was dropped
    ReceiverClosed,
    /// Stop was signalled while waiting for capacity
    Cancelled,
}

/// Producer half. Cloned into each worker generation.
#[derive(Debug, Clone)]
pub struct ResultSink {
    tx: mpsc::Sender<ResultRecord>,
    closed_logged: Arc<AtomicBool>,
}

/// Consumer half, owned by the display task
#[derive(Debug)]
pub struct ResultReceiver {
    rx: mpsc::Receiver<ResultRecord>,
}

/// Bounded result channel
pub fn result_channel(capacity: usize) -> (ResultSink, ResultReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        ResultSink {
            tx,
            closed_logged: Arc::new(AtomicBool::new(false)),
        },
        ResultReceiver { rx },
    )
}

impl ResultSink {
    /// Wait for capacity and enqueue `record`. Gives up only when `cancel`
    /// fires.
    pub async fn deliver(&self, record: ResultRecord, cancel: &CancellationToken) -> Delivery {
        tokio::select! {
            biased;
            sent = self.tx.send(record) => match sent {
                Ok(()) => Delivery::Delivered,
                Err(_) => {
                    if !self.closed_logged.swap(true, Ordering::SeqCst) {
                        warn!("Result consumer has gone away; results are being discarded");
                    }
                    Delivery::ReceiverClosed
                }
            },
            _ = cancel.cancelled() => Delivery::Cancelled,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl ResultReceiver {
    /// Next record; `None` once every producer is gone
    pub async fn recv(&mut self) -> Option<ResultRecord> {
        self.rx.recv().await
    }

    /// Non-blocking poll
    pub fn try_recv(&mut self) -> Option<ResultRecord> {
        self.rx.try_recv().ok()
    }
}
