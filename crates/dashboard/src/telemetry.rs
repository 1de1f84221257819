//! CPU temperature monitoring

use metrics::gauge;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Read a sysfs thermal zone (millidegrees Celsius) as °C
pub fn read_cpu_temperature(path: &Path) -> std::io::Result<f64> {
    let raw = std::fs::read_to_string(path)?;
    let millis: f64 = raw
        .trim()
        .parse()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    Ok(millis / 1000.0)
}

/// Log the CPU temperature and update the gauge every `interval` until cancelled
pub fn spawn_temperature_monitor(
    path: PathBuf,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => match read_cpu_temperature(&path) {
                    Ok(celsius) => {
                        gauge!("vespwatch_cpu_temperature_celsius").set(celsius);
                        info!("CPU temperature: {:.1}°C", celsius);
                    }
                    Err(e) => {
                        warn!("Could not read CPU temperature from {}: {}", path.display(), e)
                    }
                },
                _ = cancel.cancelled() => {
                    debug!("Temperature monitor stopped");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_millidegrees() {
        let dir = tempfile::tempdir().unwrap();
        let zone = dir.path().join("temp");
        std::fs::write(&zone, "48312\n").unwrap();
        assert!((read_cpu_temperature(&zone).unwrap() - 48.312).abs() < 1e-9);
    }

    #[test]
    fn test_garbage_is_invalid_data() {
        let dir = tempfile::tempdir().unwrap();
        let zone = dir.path().join("temp");
        std::fs::write(&zone, "hot").unwrap();
        assert_eq!(
            read_cpu_temperature(&zone).unwrap_err().kind(),
            std::io::ErrorKind::InvalidData
        );
    }

    #[tokio::test]
    async fn test_monitor_survives_missing_zone_and_stops() {
        let cancel = CancellationToken::new();
        let handle = spawn_temperature_monitor(
            PathBuf::from("/nonexistent/thermal_zone0/temp"),
            Duration::from_millis(10),
            cancel.clone(),
        );
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!handle.is_finished());
        cancel.cancel();
        handle.await.unwrap();
    }
}
