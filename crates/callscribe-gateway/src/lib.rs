//! HTTP/WebSocket gateway.
//!
//! Serves the TwiML webhook that points Twilio at `/media`, runs one relay
//! session per media-stream connection against Deepgram, and fans transcripts
//! out to `/transcripts` observers.

pub mod deepgram;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod server;
pub mod sink;
pub mod state;
pub mod telephony;
pub mod twiml;

pub use server::{router, serve_until, start_gateway};
pub use state::GatewayState;
