//! Transport seams between the relay and the two network connections.
//!
//! The relay never touches a socket directly. The gateway adapts its axum and
//! tungstenite halves to these traits; tests substitute in-memory channels.

use async_trait::async_trait;
use callscribe_core::error::Result;
use callscribe_core::protocol::AudioFrame;

/// A single message read off either connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Text(String),
    Binary(Vec<u8>),
    /// The peer sent a close frame, with an optional reason.
    Close(Option<String>),
}

/// Read half of a connection.
#[async_trait]
pub trait WireReader: Send {
    /// Next message, or `None` once the stream has ended.
    async fn next_message(&mut self) -> Option<Result<WireMessage>>;
}

/// Write half of the telephony connection. The relay only ever closes it.
#[async_trait]
pub trait TelephonyWriter: Send {
    async fn close(&mut self) -> Result<()>;
}

/// Write half of the transcription connection.
#[async_trait]
pub trait TranscriptionWriter: Send {
    /// Send one audio frame as a binary message.
    async fn send_audio(&mut self, frame: AudioFrame) -> Result<()>;

    /// Keep an idle stream open.
    async fn send_keepalive(&mut self) -> Result<()>;

    /// Signal end of audio. The provider flushes any pending results and then
    /// closes its side.
    async fn finish(&mut self) -> Result<()>;

    /// Close the connection.
    async fn close(&mut self) -> Result<()>;
}

/// Opens transcription streams, one per call.
#[async_trait]
pub trait TranscriptionConnector: Send + Sync {
    type Reader: WireReader + 'static;
    type Writer: TranscriptionWriter + 'static;

    async fn connect(&self) -> Result<(Self::Reader, Self::Writer)>;
}
