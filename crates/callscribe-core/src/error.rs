use std::fmt;

use thiserror::Error;

/// Which of the two sockets of a call an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionSide {
    /// The media-stream socket opened by the telephony provider.
    Telephony,
    /// The socket to the speech-transcription service.
    Transcription,
}

impl ConnectionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Telephony => "telephony",
            Self::Transcription => "transcription",
        }
    }
}

impl fmt::Display for ConnectionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum CallScribeError {
    #[error("Config error: {0}")]
    Config(String),

    /// A single message could not be decoded. Callers skip it and carry on.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// A socket errored or closed underneath a session. Fatal to that session.
    #[error("{side} connection failure: {reason}")]
    ConnectionFailure { side: ConnectionSide, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CallScribeError {
    pub fn malformed(reason: impl fmt::Display) -> Self {
        Self::MalformedMessage(reason.to_string())
    }

    pub fn telephony(reason: impl fmt::Display) -> Self {
        Self::ConnectionFailure {
            side: ConnectionSide::Telephony,
            reason: reason.to_string(),
        }
    }

    pub fn transcription(reason: impl fmt::Display) -> Self {
        Self::ConnectionFailure {
            side: ConnectionSide::Transcription,
            reason: reason.to_string(),
        }
    }

    /// Whether this error ends the session it occurred in.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::MalformedMessage(_))
    }
}

pub type Result<T> = std::result::Result<T, CallScribeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_is_not_fatal() {
        assert!(!CallScribeError::malformed("bad json").is_fatal());
        assert!(CallScribeError::transcription("reset by peer").is_fatal());
        assert!(CallScribeError::Config("port".into()).is_fatal());
    }

    #[test]
    fn test_connection_failure_display() {
        let err = CallScribeError::telephony("socket closed");
        assert_eq!(err.to_string(), "telephony connection failure: socket closed");
    }
}
