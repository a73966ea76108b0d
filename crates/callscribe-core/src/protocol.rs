//! Wire codec for the two sides of a call.
//!
//! Telephony side: Twilio Media Streams JSON envelopes, one per text message,
//! tagged by `event` and carrying base64 mu-law audio in `media.payload`.
//! Transcription side: Deepgram live `Results` messages whose
//! `channel.alternatives[0].transcript` holds the best guess for a segment.
//!
//! Everything here is a pure function of its input.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{CallScribeError, Result};

/// One chunk of call audio, exactly as the telephony provider produced it.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AudioFrame(Vec<u8>);

impl AudioFrame {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for AudioFrame {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl std::fmt::Debug for AudioFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AudioFrame({} bytes)", self.0.len())
    }
}

/// A decoded telephony signaling message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    /// Handshake sent once when the media stream socket opens. Carries nothing
    /// the relay needs.
    Connected { protocol: Option<String> },
    Start {
        call_sid: String,
        stream_sid: Option<String>,
    },
    Media {
        track: Option<String>,
        frame: AudioFrame,
    },
    Stop,
}

impl ControlEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Start { .. } => "start",
            Self::Media { .. } => "media",
            Self::Stop => "stop",
        }
    }
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    protocol: Option<String>,
    #[serde(default, rename = "streamSid")]
    stream_sid: Option<String>,
    #[serde(default, rename = "callSid")]
    call_sid: Option<String>,
    #[serde(default)]
    start: Option<StartBody>,
    #[serde(default)]
    media: Option<MediaBody>,
}

#[derive(Deserialize)]
struct StartBody {
    #[serde(default, rename = "callSid")]
    call_sid: Option<String>,
    #[serde(default, rename = "streamSid")]
    stream_sid: Option<String>,
}

#[derive(Deserialize)]
struct MediaBody {
    payload: String,
    #[serde(default)]
    track: Option<String>,
}

/// Decode one telephony signaling message.
pub fn decode_control(raw: &str) -> Result<ControlEvent> {
    let envelope: Envelope = serde_json::from_str(raw)
        .map_err(|e| CallScribeError::malformed(format!("invalid signaling JSON: {e}")))?;

    match envelope.event.as_str() {
        "connected" => Ok(ControlEvent::Connected {
            protocol: envelope.protocol,
        }),
        "start" => {
            let (nested_call, nested_stream) = envelope
                .start
                .map(|s| (s.call_sid, s.stream_sid))
                .unwrap_or_default();
            let call_sid = nested_call
                .or(envelope.call_sid)
                .filter(|sid| !sid.is_empty())
                .ok_or_else(|| CallScribeError::malformed("start event without callSid"))?;
            Ok(ControlEvent::Start {
                call_sid,
                stream_sid: nested_stream.or(envelope.stream_sid),
            })
        }
        "media" => {
            let media = envelope
                .media
                .ok_or_else(|| CallScribeError::malformed("media event without media body"))?;
            Ok(ControlEvent::Media {
                frame: decode_audio_payload(&media.payload)?,
                track: media.track,
            })
        }
        "stop" => Ok(ControlEvent::Stop),
        other => Err(CallScribeError::malformed(format!(
            "unknown event '{other}'"
        ))),
    }
}

/// Decode a base64 media payload into raw audio bytes.
pub fn decode_audio_payload(raw_base64: &str) -> Result<AudioFrame> {
    BASE64
        .decode(raw_base64.trim())
        .map(AudioFrame::new)
        .map_err(|e| CallScribeError::malformed(format!("invalid base64 payload: {e}")))
}

/// Encode a control event as a Twilio-shaped envelope.
pub fn encode_control(event: &ControlEvent) -> String {
    let value = match event {
        ControlEvent::Connected { protocol } => json!({
            "event": "connected",
            "protocol": protocol.as_deref().unwrap_or("Call"),
            "version": "1.0.0",
        }),
        ControlEvent::Start {
            call_sid,
            stream_sid,
        } => json!({
            "event": "start",
            "streamSid": stream_sid,
            "start": {
                "callSid": call_sid,
                "streamSid": stream_sid,
                "mediaFormat": {"encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1},
            },
        }),
        ControlEvent::Media { track, frame } => json!({
            "event": "media",
            "media": {
                "track": track.as_deref().unwrap_or("inbound"),
                "payload": BASE64.encode(frame.as_bytes()),
            },
        }),
        ControlEvent::Stop => json!({"event": "stop"}),
    };
    value.to_string()
}

/// A transcript segment surfaced by the transcription provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_sid: Option<String>,
    pub text: String,
    /// The provider will not revise this segment any further.
    pub is_final: bool,
    /// The provider detected the end of an utterance after this segment.
    pub speech_final: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// Extract the best-guess transcript from a provider message.
///
/// Returns `Ok(None)` when the message is not a `Results` message or when
/// `channel.alternatives[0].transcript` is absent or empty. Flags and
/// confidence of the wrong type read as unset. Only input that is not JSON
/// at all is an error.
pub fn decode_transcript(raw: &str) -> Result<Option<TranscriptEvent>> {
    let message: Value = serde_json::from_str(raw)
        .map_err(|e| CallScribeError::malformed(format!("invalid transcript JSON: {e}")))?;

    if message.get("type").and_then(Value::as_str).is_some_and(|k| k != "Results") {
        return Ok(None);
    }

    let Some(best) = message.pointer("/channel/alternatives/0") else {
        return Ok(None);
    };

    match best.get("transcript").and_then(Value::as_str) {
        Some(text) if !text.trim().is_empty() => Ok(Some(TranscriptEvent {
            call_sid: None,
            text: text.to_string(),
            is_final: flag(&message, "is_final"),
            speech_final: flag(&message, "speech_final"),
            confidence: best.get("confidence").and_then(Value::as_f64),
        })),
        _ => Ok(None),
    }
}

fn flag(message: &Value, key: &str) -> bool {
    message.get(key).and_then(Value::as_bool).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_twilio_start() {
        let raw = r#"{
            "event": "start",
            "sequenceNumber": "1",
            "start": {
                "accountSid": "AC1",
                "streamSid": "MZ1",
                "callSid": "CA1",
                "tracks": ["inbound"],
                "mediaFormat": {"encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1}
            },
            "streamSid": "MZ1"
        }"#;
        assert_eq!(
            decode_control(raw).unwrap(),
            ControlEvent::Start {
                call_sid: "CA1".into(),
                stream_sid: Some("MZ1".into()),
            }
        );
    }

    #[test]
    fn test_decode_start_with_top_level_call_sid() {
        let event = decode_control(r#"{"event":"start","callSid":"CA9"}"#).unwrap();
        assert_eq!(
            event,
            ControlEvent::Start {
                call_sid: "CA9".into(),
                stream_sid: None,
            }
        );
    }

    #[test]
    fn test_decode_start_without_call_sid_is_malformed() {
        let err = decode_control(r#"{"event":"start","start":{}}"#).unwrap_err();
        assert!(matches!(err, CallScribeError::MalformedMessage(_)));
    }

    #[test]
    fn test_decode_media() {
        let raw = r#"{"event":"media","media":{"track":"inbound","chunk":"2","timestamp":"40","payload":"AAEC/w=="}}"#;
        match decode_control(raw).unwrap() {
            ControlEvent::Media { track, frame } => {
                assert_eq!(track.as_deref(), Some("inbound"));
                assert_eq!(frame.as_bytes(), &[0x00, 0x01, 0x02, 0xff]);
            }
            other => panic!("expected media, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_media_bad_base64() {
        let err = decode_control(r#"{"event":"media","media":{"payload":"not base64!"}}"#)
            .unwrap_err();
        assert!(matches!(err, CallScribeError::MalformedMessage(_)));
    }

    #[test]
    fn test_decode_media_without_body() {
        assert!(decode_control(r#"{"event":"media"}"#).is_err());
    }

    #[test]
    fn test_decode_stop_and_connected() {
        assert_eq!(
            decode_control(r#"{"event":"stop","stop":{"callSid":"CA1"}}"#).unwrap(),
            ControlEvent::Stop
        );
        assert_eq!(
            decode_control(r#"{"event":"connected","protocol":"Call","version":"1.0.0"}"#)
                .unwrap(),
            ControlEvent::Connected {
                protocol: Some("Call".into())
            }
        );
    }

    #[test]
    fn test_kind_is_the_wire_event_name() {
        for raw in [
            r#"{"event":"connected","protocol":"Call"}"#,
            r#"{"event":"start","start":{"callSid":"CA1"}}"#,
            r#"{"event":"media","media":{"payload":""}}"#,
            r#"{"event":"stop"}"#,
        ] {
            let event = decode_control(raw).unwrap();
            let wire: serde_json::Value = serde_json::from_str(raw).unwrap();
            assert_eq!(event.kind(), wire["event"]);
        }
    }

    #[test]
    fn test_decode_unknown_event_and_garbage() {
        assert!(matches!(
            decode_control(r#"{"event":"mark","mark":{"name":"x"}}"#),
            Err(CallScribeError::MalformedMessage(_))
        ));
        assert!(matches!(
            decode_control("not json"),
            Err(CallScribeError::MalformedMessage(_))
        ));
        assert!(decode_control(r#"{"no_event": true}"#).is_err());
    }

    #[test]
    fn test_empty_payload_is_an_empty_frame() {
        let frame = decode_audio_payload("").unwrap();
        assert!(frame.is_empty());
    }

    #[test]
    fn test_encode_control_is_accepted_by_decoder() {
        let events = [
            ControlEvent::Connected { protocol: None },
            ControlEvent::Start {
                call_sid: "CA1".into(),
                stream_sid: Some("MZ1".into()),
            },
            ControlEvent::Media {
                track: Some("inbound".into()),
                frame: AudioFrame::new(vec![1, 2, 3, 255]),
            },
            ControlEvent::Stop,
        ];
        let decoded: Vec<_> = events
            .iter()
            .map(|e| decode_control(&encode_control(e)).unwrap())
            .collect();
        assert_eq!(decoded[0], ControlEvent::Connected { protocol: Some("Call".into()) });
        assert_eq!(&decoded[1..], &events[1..]);
    }

    #[test]
    fn test_decode_deepgram_results() {
        let raw = r#"{
            "type": "Results",
            "channel_index": [0, 1],
            "duration": 1.2,
            "start": 0.0,
            "is_final": true,
            "speech_final": false,
            "channel": {"alternatives": [
                {"transcript": "I'd like to buy a house", "confidence": 0.97, "words": []},
                {"transcript": "I'd like to buy a horse", "confidence": 0.41}
            ]}
        }"#;
        let event = decode_transcript(raw).unwrap().unwrap();
        assert_eq!(event.text, "I'd like to buy a house");
        assert!(event.is_final);
        assert!(!event.speech_final);
        assert_eq!(event.confidence, Some(0.97));
        assert!(event.call_sid.is_none());
    }

    #[test]
    fn test_decode_transcript_missing_or_empty() {
        assert_eq!(decode_transcript(r#"{"type":"Results"}"#).unwrap(), None);
        assert_eq!(
            decode_transcript(r#"{"channel":{"alternatives":[]}}"#).unwrap(),
            None
        );
        assert_eq!(
            decode_transcript(r#"{"channel":{"alternatives":[{"transcript":""}]}}"#).unwrap(),
            None
        );
        assert_eq!(
            decode_transcript(r#"{"channel":{"alternatives":[{"confidence":0.2}]}}"#).unwrap(),
            None
        );
        assert_eq!(decode_transcript(r#"{"channel":{}}"#).unwrap(), None);
    }

    #[test]
    fn test_decode_transcript_ignores_other_message_types() {
        let metadata = r#"{"type":"Metadata","request_id":"r1","channel":{"alternatives":[{"transcript":"x"}]}}"#;
        assert_eq!(decode_transcript(metadata).unwrap(), None);
        assert_eq!(
            decode_transcript(r#"{"type":"UtteranceEnd","last_word_end":2.1}"#).unwrap(),
            None
        );
    }

    #[test]
    fn test_decode_transcript_without_type_field() {
        let event = decode_transcript(r#"{"channel":{"alternatives":[{"transcript":"hi"}]}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(event.text, "hi");
        assert!(!event.is_final);
    }

    #[test]
    fn test_decode_transcript_tolerates_mistyped_fields() {
        let raw = r#"{
            "type": "Results",
            "is_final": null,
            "speech_final": "yes",
            "channel": {"alternatives": [{"transcript": "hi", "confidence": "high"}]}
        }"#;
        let event = decode_transcript(raw).unwrap().unwrap();
        assert_eq!(event.text, "hi");
        assert!(!event.is_final);
        assert!(!event.speech_final);
        assert_eq!(event.confidence, None);

        assert_eq!(decode_transcript(r#"{"channel":{"alternatives":{}}}"#).unwrap(), None);
        assert_eq!(
            decode_transcript(r#"{"channel":{"alternatives":[{"transcript":7}]}}"#).unwrap(),
            None
        );
        assert_eq!(decode_transcript("[1, 2]").unwrap(), None);
    }

    #[test]
    fn test_decode_transcript_non_json_is_malformed() {
        assert!(matches!(
            decode_transcript("<html>"),
            Err(CallScribeError::MalformedMessage(_))
        ));
    }
}
