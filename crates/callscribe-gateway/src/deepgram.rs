//! Deepgram live transcription client.
//!
//! One WebSocket per call. Audio goes out as binary frames; `KeepAlive` and
//! `CloseStream` control messages go out as text. Results come back as JSON
//! text messages.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info};

use callscribe_core::config::TranscriptionConfig;
use callscribe_core::error::{CallScribeError, Result};
use callscribe_core::protocol::AudioFrame;
use callscribe_relay::{TranscriptionConnector, TranscriptionWriter, WireMessage, WireReader};

type DeepgramStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const KEEPALIVE: &str = r#"{"type":"KeepAlive"}"#;
const CLOSE_STREAM: &str = r#"{"type":"CloseStream"}"#;

/// Opens a Deepgram listen stream per call.
#[derive(Debug, Clone)]
pub struct DeepgramConnector {
    config: TranscriptionConfig,
}

impl DeepgramConnector {
    pub fn new(config: TranscriptionConfig) -> Self {
        Self { config }
    }

    /// Listen URL with the audio format and recognition options.
    pub fn listen_url(&self) -> String {
        let c = &self.config;
        format!(
            "{}?model={}&language={}&encoding={}&sample_rate={}&channels={}&punctuate={}&interim_results={}",
            c.url(),
            c.model(),
            c.language(),
            c.encoding,
            c.sample_rate,
            c.channels,
            c.punctuate,
            c.interim_results,
        )
    }
}

#[async_trait]
impl TranscriptionConnector for DeepgramConnector {
    type Reader = DeepgramReader;
    type Writer = DeepgramWriter;

    async fn connect(&self) -> Result<(DeepgramReader, DeepgramWriter)> {
        let api_key = self
            .config
            .resolve_api_key()
            .ok_or_else(|| CallScribeError::Config("no Deepgram API key configured".into()))?;

        let mut request = self
            .listen_url()
            .into_client_request()
            .map_err(CallScribeError::transcription)?;
        let auth = HeaderValue::from_str(&format!("Token {api_key}"))
            .map_err(|e| CallScribeError::Config(format!("invalid Deepgram API key: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, auth);

        let timeout = self.config.connect_timeout();
        let (stream, response) = tokio::time::timeout(timeout, connect_async(request))
            .await
            .map_err(|_| {
                CallScribeError::transcription(format!(
                    "connect timed out after {}s",
                    timeout.as_secs()
                ))
            })?
            .map_err(CallScribeError::transcription)?;

        let request_id = response
            .headers()
            .get("dg-request-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-");
        info!(url = self.config.url(), request_id, "Connected to Deepgram");

        let (sink, stream) = stream.split();
        Ok((DeepgramReader(stream), DeepgramWriter(sink)))
    }
}

pub struct DeepgramReader(SplitStream<DeepgramStream>);

pub struct DeepgramWriter(SplitSink<DeepgramStream, Message>);

#[async_trait]
impl WireReader for DeepgramReader {
    async fn next_message(&mut self) -> Option<Result<WireMessage>> {
        loop {
            let msg = match self.0.next().await? {
                Ok(msg) => msg,
                Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => return None,
                Err(e) => return Some(Err(CallScribeError::transcription(e))),
            };
            return Some(Ok(match msg {
                Message::Text(text) => WireMessage::Text(text.as_str().to_owned()),
                Message::Binary(bytes) => WireMessage::Binary(bytes.to_vec()),
                Message::Close(frame) => {
                    WireMessage::Close(frame.map(|f| f.reason.as_str().to_owned()))
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }));
        }
    }
}

#[async_trait]
impl TranscriptionWriter for DeepgramWriter {
    async fn send_audio(&mut self, frame: AudioFrame) -> Result<()> {
        self.0
            .send(Message::Binary(frame.into_bytes().into()))
            .await
            .map_err(CallScribeError::transcription)
    }

    async fn send_keepalive(&mut self) -> Result<()> {
        self.0
            .send(Message::Text(KEEPALIVE.into()))
            .await
            .map_err(CallScribeError::transcription)
    }

    async fn finish(&mut self) -> Result<()> {
        debug!("Sending CloseStream to Deepgram");
        self.0
            .send(Message::Text(CLOSE_STREAM.into()))
            .await
            .map_err(CallScribeError::transcription)
    }

    async fn close(&mut self) -> Result<()> {
        match self.0.close().await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(CallScribeError::transcription(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listen_url_defaults() {
        let connector = DeepgramConnector::new(TranscriptionConfig::default());
        assert_eq!(
            connector.listen_url(),
            "wss://api.deepgram.com/v1/listen?model=nova-2-phonecall&language=en&encoding=mulaw\
             &sample_rate=8000&channels=1&punctuate=true&interim_results=false"
        );
    }

    #[test]
    fn test_listen_url_overrides() {
        let connector = DeepgramConnector::new(TranscriptionConfig {
            url: Some("ws://127.0.0.1:9999/v1/listen".into()),
            model: Some("nova-3".into()),
            language: Some("de".into()),
            interim_results: true,
            ..TranscriptionConfig::default()
        });
        let url = connector.listen_url();
        assert!(url.starts_with("ws://127.0.0.1:9999/v1/listen?model=nova-3&language=de"));
        assert!(url.ends_with("interim_results=true"));
    }

    #[tokio::test]
    async fn test_connect_without_api_key_is_config_error() {
        let connector = DeepgramConnector::new(TranscriptionConfig {
            api_key_env: Some("NONEXISTENT_CS_DEEPGRAM_KEY".into()),
            ..TranscriptionConfig::default()
        });
        let err = connector.connect().await.err().unwrap();
        assert!(matches!(err, CallScribeError::Config(_)));
    }
}
