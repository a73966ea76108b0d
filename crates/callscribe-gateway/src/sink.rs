//! Transcript fan-out to `/transcripts` observers.

use tokio::sync::broadcast;

use callscribe_core::error::CallScribeError;
use callscribe_core::protocol::TranscriptEvent;
use callscribe_relay::{LoggingSink, TranscriptSink};

/// Logs each transcript and publishes it on the gateway's broadcast channel.
/// Never waits: slow observers lag and skip, they do not slow the relay.
pub struct BroadcastSink {
    log: LoggingSink,
    tx: broadcast::Sender<TranscriptEvent>,
}

impl BroadcastSink {
    pub fn new(tx: broadcast::Sender<TranscriptEvent>) -> Self {
        Self {
            log: LoggingSink,
            tx,
        }
    }
}

impl TranscriptSink for BroadcastSink {
    fn on_transcript(&self, event: TranscriptEvent) {
        self.log.on_transcript(event.clone());
        // Err only means nobody is listening.
        let _ = self.tx.send(event);
    }

    fn on_error(&self, error: &CallScribeError) {
        self.log.on_error(error);
    }
}
