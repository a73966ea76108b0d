//! Session coordinator: one per call.
//!
//! `INIT -> STREAMING -> DRAINING -> CLOSED`. The session connects to the
//! transcription service, spawns the three relay units, waits for the first
//! shutdown request, drains within a bounded deadline and then closes both
//! connections exactly once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use callscribe_core::config::{RelayConfig, TranscriptionConfig};
use callscribe_core::error::{ConnectionSide, Result};

use crate::inbound::InboundReceiver;
use crate::outbound::OutboundForwarder;
use crate::queue::audio_queue;
use crate::sink::TranscriptSink;
use crate::transcript::TranscriptReceiver;
use crate::transport::{TelephonyWriter, TranscriptionConnector, TranscriptionWriter, WireReader};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Init,
    Streaming,
    Draining,
    Closed,
}

/// Why a session left STREAMING. Only the first request is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ShutdownReason {
    /// The telephony side sent `stop`.
    StopEvent,
    /// The telephony connection ended without `stop`.
    TelephonyClosed,
    TelephonyFailed(String),
    /// The transcription service closed its side.
    TranscriptionClosed,
    TranscriptionFailed(String),
    /// Shutdown requested from outside the session.
    Requested,
}

/// Per-session tuning, resolved from config.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub queue_capacity: usize,
    pub shutdown_timeout: Duration,
    pub stall_warn: Duration,
    /// Empty forwards every track.
    pub media_track: String,
    pub keepalive: Option<Duration>,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self::from_config(&RelayConfig::default(), &TranscriptionConfig::default())
    }
}

impl RelaySettings {
    pub fn from_config(relay: &RelayConfig, transcription: &TranscriptionConfig) -> Self {
        Self {
            queue_capacity: relay.queue_capacity.max(1),
            shutdown_timeout: Duration::from_millis(relay.shutdown_timeout_ms.max(1)),
            stall_warn: Duration::from_millis(relay.stall_warn_ms),
            media_track: relay.media_track.clone(),
            keepalive: transcription.keepalive_interval(),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub frames_forwarded: AtomicU64,
    pub bytes_forwarded: AtomicU64,
    pub transcripts_emitted: AtomicU64,
    pub malformed_skipped: AtomicU64,
}

impl Counters {
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

struct Shared {
    id: String,
    state: watch::Sender<SessionState>,
    cancel: CancellationToken,
    reason: Mutex<Option<ShutdownReason>>,
    call_sid: OnceLock<String>,
    counters: Counters,
}

/// Cloneable view of a running session.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl SessionHandle {
    fn new() -> Self {
        let (state, _) = watch::channel(SessionState::Init);
        Self {
            shared: Arc::new(Shared {
                id: Uuid::new_v4().to_string(),
                state,
                cancel: CancellationToken::new(),
                reason: Mutex::new(None),
                call_sid: OnceLock::new(),
                counters: Counters::default(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Call identifier from the first `start` event, if one arrived.
    pub fn call_sid(&self) -> Option<String> {
        self.shared.call_sid.get().cloned()
    }

    pub(crate) fn set_call_sid(&self, call_sid: String) -> bool {
        self.shared.call_sid.set(call_sid).is_ok()
    }

    /// Ask the session to drain and close. Returns `false` if a shutdown was
    /// already requested, in which case the earlier reason stands.
    pub fn request_shutdown(&self, reason: ShutdownReason) -> bool {
        let mut current = self
            .shared
            .reason
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if current.is_some() {
            debug!(session_id = %self.shared.id, ?reason, "Shutdown already requested");
            return false;
        }
        info!(session_id = %self.shared.id, ?reason, "Session shutdown requested");
        *current = Some(reason);
        self.shared.cancel.cancel();
        true
    }

    pub fn shutdown_reason(&self) -> Option<ShutdownReason> {
        self.shared
            .reason
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    pub(crate) fn cancellation(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    pub(crate) fn counters(&self) -> &Counters {
        &self.shared.counters
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.shared.state.send_replace(state);
        debug!(session_id = %self.shared.id, from = ?previous, to = ?state, "Session state changed");
    }

    fn summary(&self, timed_out: bool) -> SessionSummary {
        let c = &self.shared.counters;
        SessionSummary {
            session_id: self.shared.id.clone(),
            call_sid: self.call_sid(),
            frames_forwarded: c.frames_forwarded.load(Ordering::Relaxed),
            bytes_forwarded: c.bytes_forwarded.load(Ordering::Relaxed),
            transcripts_emitted: c.transcripts_emitted.load(Ordering::Relaxed),
            malformed_skipped: c.malformed_skipped.load(Ordering::Relaxed),
            reason: self.shutdown_reason(),
            drain_timed_out: timed_out,
        }
    }
}

/// What a finished session did.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub call_sid: Option<String>,
    pub frames_forwarded: u64,
    pub bytes_forwarded: u64,
    pub transcripts_emitted: u64,
    pub malformed_skipped: u64,
    pub reason: Option<ShutdownReason>,
    /// The drain deadline elapsed and remaining units were aborted.
    pub drain_timed_out: bool,
}

pub struct Session {
    settings: RelaySettings,
    handle: SessionHandle,
}

impl Session {
    pub fn new(settings: RelaySettings) -> Self {
        Self {
            settings,
            handle: SessionHandle::new(),
        }
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Relay one call until both sides are done.
    ///
    /// Fails only when the transcription connection cannot be opened; the
    /// telephony connection is closed before returning in that case too.
    pub async fn run<TR, TW, C>(
        self,
        telephony_reader: TR,
        mut telephony_writer: TW,
        connector: &C,
        sink: Arc<dyn TranscriptSink>,
    ) -> Result<SessionSummary>
    where
        TR: WireReader + 'static,
        TW: TelephonyWriter,
        C: TranscriptionConnector,
    {
        let Self { settings, handle } = self;

        let (transcription_reader, transcription_writer) = match connector.connect().await {
            Ok(pair) => pair,
            Err(e) => {
                error!(session_id = %handle.id(), error = %e, "Transcription connect failed");
                crate::metrics::record_connection_failure(ConnectionSide::Transcription);
                handle.request_shutdown(ShutdownReason::TranscriptionFailed(e.to_string()));
                if let Err(close_err) = telephony_writer.close().await {
                    debug!(error = %close_err, "Telephony close after connect failure");
                }
                handle.set_state(SessionState::Closed);
                return Err(e);
            }
        };

        let started = tokio::time::Instant::now();
        handle.set_state(SessionState::Streaming);
        crate::metrics::record_session_start();
        info!(session_id = %handle.id(), "Session streaming");

        let (queue_tx, queue_rx) = audio_queue(settings.queue_capacity, settings.stall_warn);
        let writer = Arc::new(tokio::sync::Mutex::new(transcription_writer));
        let writer_guard = writer.clone().lock_owned().await;

        let mut units = JoinSet::new();
        units.spawn(
            InboundReceiver::new(
                telephony_reader,
                queue_tx,
                handle.clone(),
                &settings.media_track,
            )
            .run(),
        );
        let outbound = OutboundForwarder::new(
            writer_guard,
            queue_rx,
            handle.clone(),
            settings.keepalive,
        );
        units.spawn(outbound.run());
        units.spawn(TranscriptReceiver::new(transcription_reader, sink, handle.clone()).run());

        let cancel = handle.cancellation();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                joined = units.join_next() => match joined {
                    Some(result) => log_unit_exit(&handle, result),
                    None => break,
                },
            }
        }
        if !handle.is_shutting_down() {
            handle.request_shutdown(ShutdownReason::Requested);
        }

        handle.set_state(SessionState::Draining);
        let deadline = tokio::time::Instant::now() + settings.shutdown_timeout;
        let timed_out = loop {
            match tokio::time::timeout_at(deadline, units.join_next()).await {
                Ok(Some(result)) => log_unit_exit(&handle, result),
                Ok(None) => break false,
                Err(_) => break true,
            }
        };
        if timed_out {
            warn!(
                session_id = %handle.id(),
                remaining = units.len(),
                timeout_ms = settings.shutdown_timeout.as_millis() as u64,
                "Drain deadline elapsed, aborting remaining relay units"
            );
            crate::metrics::record_drain_timeout();
            units.shutdown().await;
        }

        if let Err(e) = writer.lock().await.close().await {
            debug!(session_id = %handle.id(), error = %e, "Transcription close");
        }
        if let Err(e) = telephony_writer.close().await {
            debug!(session_id = %handle.id(), error = %e, "Telephony close");
        }

        handle.set_state(SessionState::Closed);
        crate::metrics::record_session_end(started.elapsed().as_secs_f64());

        let summary = handle.summary(timed_out);
        info!(
            session_id = %summary.session_id,
            call_sid = summary.call_sid.as_deref().unwrap_or("-"),
            frames = summary.frames_forwarded,
            bytes = summary.bytes_forwarded,
            transcripts = summary.transcripts_emitted,
            reason = ?summary.reason,
            "Session closed"
        );
        Ok(summary)
    }
}

fn log_unit_exit(handle: &SessionHandle, result: std::result::Result<(), JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            error!(session_id = %handle.id(), "Relay unit panicked");
            handle.request_shutdown(ShutdownReason::Requested);
        }
    }
}
