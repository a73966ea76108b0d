//! Relay metrics.
//!
//! Recorded through the `metrics` facade. Without an installed recorder every
//! call is a no-op.

use callscribe_core::error::ConnectionSide;

/// A session reached STREAMING.
pub fn record_session_start() {
    metrics::gauge!("relay_sessions_active").increment(1.0);
    metrics::counter!("relay_sessions_total").increment(1);
}

/// A session that reached STREAMING is now CLOSED.
pub fn record_session_end(duration_secs: f64) {
    metrics::gauge!("relay_sessions_active").decrement(1.0);
    metrics::histogram!("relay_session_duration_seconds").record(duration_secs);
}

/// One audio frame was written to the transcription connection.
pub fn record_frame_forwarded(bytes: usize) {
    metrics::counter!("relay_frames_forwarded_total").increment(1);
    metrics::counter!("relay_bytes_forwarded_total").increment(bytes as u64);
}

pub fn record_transcript(is_final: bool) {
    let labels = [("final", is_final.to_string())];
    metrics::counter!("relay_transcripts_total", &labels).increment(1);
}

/// A message was skipped because it could not be decoded.
pub fn record_malformed(side: ConnectionSide) {
    let labels = [("source", side.as_str().to_string())];
    metrics::counter!("relay_malformed_messages_total", &labels).increment(1);
}

pub fn record_queue_stall() {
    metrics::counter!("relay_queue_stalls_total").increment(1);
}

/// The drain deadline elapsed and remaining units were aborted.
pub fn record_drain_timeout() {
    metrics::counter!("relay_drain_timeouts_total").increment(1);
}

pub fn record_connection_failure(side: ConnectionSide) {
    let labels = [("side", side.as_str().to_string())];
    metrics::counter!("relay_connection_failures_total", &labels).increment(1);
}
