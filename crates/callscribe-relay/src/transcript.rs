//! Transcript receiver: provider results in, transcript events to the sink.

use std::sync::Arc;

use tracing::{debug, info, warn};

use callscribe_core::error::{CallScribeError, ConnectionSide};
use callscribe_core::protocol::decode_transcript;

use crate::session::{Counters, SessionHandle, ShutdownReason};
use crate::sink::TranscriptSink;
use crate::transport::{WireMessage, WireReader};

/// Sole reader of the transcription connection.
pub struct TranscriptReceiver<R> {
    reader: R,
    sink: Arc<dyn TranscriptSink>,
    handle: SessionHandle,
}

impl<R: WireReader> TranscriptReceiver<R> {
    pub fn new(reader: R, sink: Arc<dyn TranscriptSink>, handle: SessionHandle) -> Self {
        Self {
            reader,
            sink,
            handle,
        }
    }

    /// Read until the transcription connection closes or fails.
    ///
    /// Not cancelled by shutdown: results for already-forwarded audio keep
    /// arriving until the provider closes, or until the drain deadline.
    pub async fn run(mut self) {
        let reason = loop {
            match self.reader.next_message().await {
                Some(Ok(WireMessage::Text(text))) => self.handle_text(&text),
                Some(Ok(WireMessage::Binary(bytes))) => {
                    debug!(len = bytes.len(), "Ignoring binary transcription message");
                }
                Some(Ok(WireMessage::Close(close_reason))) => {
                    info!(session_id = %self.handle.id(), reason = ?close_reason, "Transcription stream closed");
                    break ShutdownReason::TranscriptionClosed;
                }
                Some(Err(e)) => {
                    warn!(session_id = %self.handle.id(), error = %e, "Transcription read failed");
                    crate::metrics::record_connection_failure(ConnectionSide::Transcription);
                    self.sink.on_error(&e);
                    break ShutdownReason::TranscriptionFailed(e.to_string());
                }
                None => {
                    debug!(session_id = %self.handle.id(), "Transcription stream ended");
                    break ShutdownReason::TranscriptionClosed;
                }
            }
        };
        self.handle.request_shutdown(reason);
    }

    fn handle_text(&self, text: &str) {
        match decode_transcript(text) {
            Ok(Some(mut event)) => {
                event.call_sid = self.handle.call_sid();
                Counters::add(&self.handle.counters().transcripts_emitted, 1);
                crate::metrics::record_transcript(event.is_final);
                self.sink.on_transcript(event);
            }
            Ok(None) => {}
            Err(e) => self.skip_malformed(&e),
        }
    }

    fn skip_malformed(&self, e: &CallScribeError) {
        warn!(session_id = %self.handle.id(), error = %e, "Skipping malformed transcription message");
        Counters::add(&self.handle.counters().malformed_skipped, 1);
        crate::metrics::record_malformed(ConnectionSide::Transcription);
    }
}
