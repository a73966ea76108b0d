//! Axum-based HTTP/WebSocket server.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::{HeaderMap, header},
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use callscribe_core::protocol::TranscriptEvent;
use callscribe_relay::Session;

use crate::sink::BroadcastSink;
use crate::state::GatewayState;
use crate::{telephony, twiml};

/// Extra time past the relay drain deadline before the server stops waiting.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Build the gateway router.
pub fn router(state: Arc<GatewayState>) -> anyhow::Result<Router> {
    let app = Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/twiml", get(twiml_handler).post(twiml_handler))
        .route("/media", get(media_ws_handler))
        .route("/transcripts", get(transcripts_ws_handler));

    #[cfg(feature = "metrics")]
    let app = {
        let handle = crate::metrics::prometheus_handle()?;
        app.route(
            "/metrics",
            get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        )
    };

    Ok(app.layer(TraceLayer::new_for_http()).with_state(state))
}

/// Start the gateway server and run until Ctrl-C.
pub async fn start_gateway(state: Arc<GatewayState>, port: u16) -> anyhow::Result<()> {
    serve_until(state, port, ctrl_c()).await
}

/// Run the gateway until `shutdown` resolves, then drain every media session.
///
/// Returns once the sessions have closed, or after the drain deadline plus a
/// grace period if some did not.
pub async fn serve_until(
    state: Arc<GatewayState>,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let bind_addr = state.config.gateway_bind();
    let app = router(state.clone())?;

    let addr = format!("{bind_addr}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Gateway listening on {addr}");
    info!("Media streams accepted at ws://{addr}/media, TwiML at http://{addr}/twiml");

    let signal_state = state.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            let drained = signal_state.drain_all().await;
            info!(sessions = drained, "Shutdown signal received, draining sessions");
        })
        .await?;

    // Upgraded sockets outlive the HTTP connections; a session that raced
    // the signal is asked again here.
    state.drain_all().await;
    state.tasks.close();
    let deadline = state.settings.shutdown_timeout + SHUTDOWN_GRACE;
    if tokio::time::timeout(deadline, state.tasks.wait()).await.is_err() {
        warn!(
            remaining = state.tasks.len(),
            "Media sessions still open after drain deadline"
        );
    }

    Ok(())
}

async fn index_handler() -> &'static str {
    "callscribe is running"
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let sessions = state.session_infos().await;
    let uptime = chrono::Utc::now() - state.started_at;

    axum::Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": uptime.num_seconds(),
        "active_sessions": sessions.len(),
        "sessions": sessions,
    }))
}

async fn twiml_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let host = headers.get(header::HOST).and_then(|v| v.to_str().ok());
    let public_url = state
        .config
        .gateway
        .as_ref()
        .and_then(|g| g.public_url.as_deref());
    let url = twiml::stream_url(public_url, host);
    let body = twiml::render(&state.config.greeting(), &url);
    ([(header::CONTENT_TYPE, "text/xml")], body)
}

async fn media_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    let tasks = state.tasks.clone();
    ws.on_upgrade(move |socket| tasks.track_future(handle_media_stream(state, socket)))
}

async fn handle_media_stream(state: Arc<GatewayState>, socket: WebSocket) {
    let session = Session::new(state.settings.clone());
    let handle = session.handle();
    info!(session_id = %handle.id(), "Media stream connected");
    state.register_session(handle.clone()).await;

    let (reader, writer) = telephony::split(socket);
    let sink = Arc::new(BroadcastSink::new(state.transcripts.clone()));
    match session.run(reader, writer, &state.connector, sink).await {
        Ok(summary) => info!(
            session_id = %summary.session_id,
            drain_timed_out = summary.drain_timed_out,
            malformed = summary.malformed_skipped,
            "Media stream finished"
        ),
        Err(e) => error!(session_id = %handle.id(), error = %e, "Media stream failed"),
    }

    state.remove_session(handle.id()).await;
}

async fn transcripts_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    // Subscribe before the upgrade so nothing published after the handshake is missed.
    let rx = state.transcripts.subscribe();
    ws.on_upgrade(move |socket| stream_transcripts(socket, rx))
}

async fn stream_transcripts(socket: WebSocket, mut rx: broadcast::Receiver<TranscriptEvent>) {
    let (mut tx, mut client) = socket.split();
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => {
                    let Ok(payload) = serde_json::to_string(&event) else {
                        continue;
                    };
                    if tx.send(Message::Text(payload.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Transcript observer lagging, events skipped");
                }
                Err(RecvError::Closed) => break,
            },
            msg = client.next() => match msg {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
}
