//! Gateway shared state.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{RwLock, broadcast};
use tokio_util::task::TaskTracker;

use callscribe_core::config::Config;
use callscribe_core::protocol::TranscriptEvent;
use callscribe_relay::{RelaySettings, SessionHandle, SessionState, ShutdownReason};

use crate::deepgram::DeepgramConnector;

/// Transcripts buffered per observer before it starts skipping.
const TRANSCRIPT_BUFFER: usize = 256;

/// Shared gateway state accessible from all handlers.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub connector: DeepgramConnector,
    pub settings: RelaySettings,
    pub transcripts: broadcast::Sender<TranscriptEvent>,
    pub sessions: RwLock<HashMap<String, SessionHandle>>,
    /// Media-stream tasks, awaited on shutdown so each session can drain.
    pub tasks: TaskTracker,
    pub started_at: DateTime<Utc>,
}

/// Snapshot of one live session for `/health`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub call_sid: Option<String>,
    pub state: SessionState,
}

impl GatewayState {
    pub fn new(config: Config) -> Self {
        let transcription = config.transcription();
        let settings = RelaySettings::from_config(&config.relay(), &transcription);
        let (transcripts, _) = broadcast::channel(TRANSCRIPT_BUFFER);

        Self {
            config: Arc::new(config),
            connector: DeepgramConnector::new(transcription),
            settings,
            transcripts,
            sessions: RwLock::new(HashMap::new()),
            tasks: TaskTracker::new(),
            started_at: Utc::now(),
        }
    }

    pub async fn register_session(&self, handle: SessionHandle) {
        self.sessions
            .write()
            .await
            .insert(handle.id().to_string(), handle);
    }

    pub async fn remove_session(&self, id: &str) {
        self.sessions.write().await.remove(id);
    }

    pub async fn session_infos(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.read().await;
        let mut infos: Vec<_> = sessions
            .values()
            .map(|h| SessionInfo {
                id: h.id().to_string(),
                call_sid: h.call_sid(),
                state: h.state(),
            })
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// Ask every live session to drain. Returns how many were asked.
    pub async fn drain_all(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .filter(|h| h.request_shutdown(ShutdownReason::Requested))
            .count()
    }
}
