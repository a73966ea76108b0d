//! Transcript sinks: where recognized text goes once it leaves the relay.

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use callscribe_core::error::CallScribeError;
use callscribe_core::protocol::TranscriptEvent;

/// Receives transcript events from a session.
///
/// Called inline from the transcript receiver, so implementations must not
/// block. Hand the event off to a channel if real work is needed.
pub trait TranscriptSink: Send + Sync {
    fn on_transcript(&self, event: TranscriptEvent);

    /// The transcription connection failed. Default: ignore.
    fn on_error(&self, error: &CallScribeError) {
        let _ = error;
    }
}

/// Writes every transcript to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSink;

impl TranscriptSink for LoggingSink {
    fn on_transcript(&self, event: TranscriptEvent) {
        info!(
            call_sid = event.call_sid.as_deref().unwrap_or("-"),
            is_final = event.is_final,
            "Transcript: {}",
            event.text
        );
    }

    fn on_error(&self, error: &CallScribeError) {
        error!(error = %error, "Transcription error");
    }
}

/// Forwards transcripts into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<TranscriptEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TranscriptEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl TranscriptSink for ChannelSink {
    fn on_transcript(&self, event: TranscriptEvent) {
        if self.tx.send(event).is_err() {
            debug!("Transcript receiver dropped, discarding event");
        }
    }
}
