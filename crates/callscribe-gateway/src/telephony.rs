//! Relay transport over the axum WebSocket carrying a Twilio media stream.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};

use callscribe_core::error::{CallScribeError, Result};
use callscribe_relay::{TelephonyWriter, WireMessage, WireReader};

pub struct TwilioReader(SplitStream<WebSocket>);

pub struct TwilioWriter(SplitSink<WebSocket, Message>);

/// Split an upgraded socket into relay halves.
pub fn split(socket: WebSocket) -> (TwilioReader, TwilioWriter) {
    let (tx, rx) = socket.split();
    (TwilioReader(rx), TwilioWriter(tx))
}

#[async_trait]
impl WireReader for TwilioReader {
    async fn next_message(&mut self) -> Option<Result<WireMessage>> {
        loop {
            let msg = match self.0.next().await? {
                Ok(msg) => msg,
                Err(e) => return Some(Err(CallScribeError::telephony(e))),
            };
            return Some(Ok(match msg {
                Message::Text(text) => WireMessage::Text(text.as_str().to_owned()),
                Message::Binary(bytes) => WireMessage::Binary(bytes.to_vec()),
                Message::Close(frame) => {
                    WireMessage::Close(frame.map(|f| f.reason.as_str().to_owned()))
                }
                // axum answers pings itself
                Message::Ping(_) | Message::Pong(_) => continue,
            }));
        }
    }
}

#[async_trait]
impl TelephonyWriter for TwilioWriter {
    async fn close(&mut self) -> Result<()> {
        self.0.close().await.map_err(CallScribeError::telephony)
    }
}
