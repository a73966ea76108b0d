//! Per-call duplex relay.
//!
//! A [`Session`] owns one telephony media stream and one transcription
//! stream. Three units run concurrently for the life of the call:
//!
//! - the inbound receiver decodes telephony messages and enqueues audio,
//! - the outbound forwarder drains the queue into the transcription stream,
//! - the transcript receiver hands provider results to a [`TranscriptSink`].
//!
//! They share a bounded FIFO [`queue`] and a cancellation token owned by the
//! [`SessionHandle`]. Any unit can request shutdown; the session then drains
//! within a bounded deadline and closes both connections exactly once.

pub mod inbound;
pub mod metrics;
pub mod outbound;
pub mod queue;
pub mod session;
pub mod sink;
pub mod transcript;
pub mod transport;

pub use session::{
    RelaySettings, Session, SessionHandle, SessionState, SessionSummary, ShutdownReason,
};
pub use sink::{ChannelSink, LoggingSink, TranscriptSink};
pub use transport::{
    TelephonyWriter, TranscriptionConnector, TranscriptionWriter, WireMessage, WireReader,
};
