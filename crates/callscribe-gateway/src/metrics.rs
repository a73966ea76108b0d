//! Prometheus exporter for the relay metrics.

use std::sync::Mutex;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

static HANDLE: Mutex<Option<PrometheusHandle>> = Mutex::new(None);

/// Install the Prometheus recorder on first use and return its render handle.
/// The recorder is process-global, so later calls reuse the first handle.
pub fn prometheus_handle() -> anyhow::Result<PrometheusHandle> {
    let mut slot = HANDLE.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(handle) = slot.as_ref() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    *slot = Some(handle.clone());
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_is_reused() {
        let first = prometheus_handle().unwrap();
        let second = prometheus_handle().unwrap();
        callscribe_relay::metrics::record_frame_forwarded(160);
        let rendered = second.render();
        assert!(rendered.contains("relay_frames_forwarded_total"));
        drop(first);
    }
}
