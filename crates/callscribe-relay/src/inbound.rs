//! Inbound receiver: telephony messages in, audio frames onto the queue.

use tracing::{debug, info, trace, warn};

use callscribe_core::error::ConnectionSide;
use callscribe_core::protocol::{ControlEvent, decode_control};

use crate::queue::AudioQueueTx;
use crate::session::{Counters, SessionHandle, ShutdownReason};
use crate::transport::{WireMessage, WireReader};

/// Sole producer of the audio queue.
pub struct InboundReceiver<R> {
    reader: R,
    queue: AudioQueueTx,
    handle: SessionHandle,
    media_track: Option<String>,
}

enum Step {
    Continue,
    Stop(ShutdownReason),
    /// Cancelled, or the forwarder is gone.
    Abandon,
}

impl<R: WireReader> InboundReceiver<R> {
    /// `media_track` restricts forwarding to one track; empty accepts all.
    pub fn new(reader: R, queue: AudioQueueTx, handle: SessionHandle, media_track: &str) -> Self {
        Self {
            reader,
            queue,
            handle,
            media_track: (!media_track.is_empty()).then(|| media_track.to_string()),
        }
    }

    /// Read until `stop`, connection end, or cancellation. Always ends by
    /// enqueuing the end-of-stream marker.
    pub async fn run(mut self) {
        let cancel = self.handle.cancellation();
        let reason = loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break None,
                next = self.reader.next_message() => next,
            };

            let step = match next {
                None => {
                    info!(session_id = %self.handle.id(), "Telephony stream ended without stop");
                    Step::Stop(ShutdownReason::TelephonyClosed)
                }
                Some(Err(e)) => {
                    warn!(session_id = %self.handle.id(), error = %e, "Telephony read failed");
                    crate::metrics::record_connection_failure(ConnectionSide::Telephony);
                    Step::Stop(ShutdownReason::TelephonyFailed(e.to_string()))
                }
                Some(Ok(WireMessage::Close(close_reason))) => {
                    info!(session_id = %self.handle.id(), reason = ?close_reason, "Telephony closed");
                    Step::Stop(ShutdownReason::TelephonyClosed)
                }
                Some(Ok(WireMessage::Binary(bytes))) => {
                    debug!(len = bytes.len(), "Ignoring binary telephony message");
                    Step::Continue
                }
                Some(Ok(WireMessage::Text(text))) => self.handle_text(&text).await,
            };

            match step {
                Step::Continue => continue,
                Step::Stop(reason) => break Some(reason),
                Step::Abandon => break None,
            }
        };

        if self.queue.finish().await.is_err() {
            debug!(session_id = %self.handle.id(), "Audio queue closed before end of stream");
        }
        if let Some(reason) = reason {
            self.handle.request_shutdown(reason);
        }
    }

    async fn handle_text(&mut self, text: &str) -> Step {
        let event = match decode_control(text) {
            Ok(event) => event,
            Err(e) => {
                warn!(session_id = %self.handle.id(), error = %e, "Skipping malformed telephony message");
                Counters::add(&self.handle.counters().malformed_skipped, 1);
                crate::metrics::record_malformed(ConnectionSide::Telephony);
                return Step::Continue;
            }
        };
        trace!(event = event.kind(), "Received telephony event");

        match event {
            ControlEvent::Connected { protocol } => {
                debug!(?protocol, "Media stream connected");
                Step::Continue
            }
            ControlEvent::Start {
                call_sid,
                stream_sid,
            } => {
                info!(
                    session_id = %self.handle.id(),
                    call_sid = %call_sid,
                    stream_sid = stream_sid.as_deref().unwrap_or("-"),
                    "Call started"
                );
                if !self.handle.set_call_sid(call_sid) {
                    debug!("Repeated start event, keeping the first call sid");
                }
                Step::Continue
            }
            ControlEvent::Media { track, frame } => {
                if !self.accepts_track(track.as_deref()) {
                    return Step::Continue;
                }
                if frame.is_empty() {
                    debug!("Skipping empty media payload");
                    return Step::Continue;
                }
                let cancel = self.handle.cancellation();
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Step::Abandon,
                    queued = self.queue.put(frame) => match queued {
                        Ok(()) => Step::Continue,
                        Err(_) => Step::Abandon,
                    },
                }
            }
            ControlEvent::Stop => {
                info!(
                    session_id = %self.handle.id(),
                    call_sid = self.handle.call_sid().as_deref().unwrap_or("-"),
                    "Call stopped"
                );
                Step::Stop(ShutdownReason::StopEvent)
            }
        }
    }

    fn accepts_track(&self, track: Option<&str>) -> bool {
        match (&self.media_track, track) {
            (Some(wanted), Some(track)) => wanted == track,
            _ => true,
        }
    }
}
