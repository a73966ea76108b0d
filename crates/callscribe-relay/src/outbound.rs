//! Outbound forwarder: queued audio out to the transcription service.

use std::time::Duration;

use tokio::sync::OwnedMutexGuard;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error};

use callscribe_core::error::{CallScribeError, ConnectionSide};

use crate::queue::{AudioQueueRx, QueueItem};
use crate::session::{Counters, SessionHandle, ShutdownReason};
use crate::transport::TranscriptionWriter;

/// Sole consumer of the audio queue and sole writer of the transcription
/// connection while the session is streaming.
pub struct OutboundForwarder<W: TranscriptionWriter> {
    writer: OwnedMutexGuard<W>,
    queue: AudioQueueRx,
    handle: SessionHandle,
    keepalive: Option<Duration>,
}

impl<W: TranscriptionWriter> OutboundForwarder<W> {
    pub fn new(
        writer: OwnedMutexGuard<W>,
        queue: AudioQueueRx,
        handle: SessionHandle,
        keepalive: Option<Duration>,
    ) -> Self {
        Self {
            writer,
            queue,
            handle,
            keepalive,
        }
    }

    /// Forward frames until end of stream, then half-close. A write failure
    /// requests session shutdown and ends the loop.
    pub async fn run(mut self) {
        let mut keepalive = self.keepalive.map(|period| {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            let item = tokio::select! {
                biased;
                item = self.queue.take() => item,
                _ = tick(&mut keepalive) => {
                    debug!(session_id = %self.handle.id(), "Sending transcription keepalive");
                    if let Err(e) = self.writer.send_keepalive().await {
                        return self.fail("keepalive", e);
                    }
                    continue;
                }
            };

            match item {
                Some(QueueItem::Frame(frame)) => {
                    let len = frame.len();
                    if let Err(e) = self.writer.send_audio(frame).await {
                        return self.fail("audio write", e);
                    }
                    let counters = self.handle.counters();
                    Counters::add(&counters.frames_forwarded, 1);
                    Counters::add(&counters.bytes_forwarded, len as u64);
                    crate::metrics::record_frame_forwarded(len);
                    if let Some(interval) = keepalive.as_mut() {
                        interval.reset();
                    }
                }
                Some(QueueItem::EndOfStream) | None => {
                    debug!(session_id = %self.handle.id(), "End of audio, half-closing transcription stream");
                    if let Err(e) = self.writer.finish().await {
                        self.fail("half-close", e);
                    }
                    return;
                }
            }
        }
    }

    fn fail(&self, op: &str, e: CallScribeError) {
        error!(session_id = %self.handle.id(), op, error = %e, "Transcription write failed");
        crate::metrics::record_connection_failure(ConnectionSide::Transcription);
        self.handle
            .request_shutdown(ShutdownReason::TranscriptionFailed(e.to_string()));
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
