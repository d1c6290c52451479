//! vantaged — the vantage session daemon.
//!
//! Hosts concurrent grounding sessions behind REST and WebSocket APIs:
//!
//! - `POST /api/start?query=...` — image bytes body; allocates a session
//! - `GET  /ws/{session_id}` — WebSocket upgrade; drives the session and
//!   streams its events until the terminal result or an error
//! - `POST /api/session/{session_id}/stop` — cooperative cancellation
//! - `GET  /health` — server status
//!
//! Build and run: `cargo run --features server --bin vantaged`

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use vantage::capability::ImageRef;
use vantage::capability::remote::Gateway;
use vantage::config::EngineConfig;
use vantage::event::SessionEvent;
use vantage::session::{SessionError, SessionManager};

#[derive(Parser)]
#[command(name = "vantaged", version, about = "Vantage session daemon")]
struct Cli {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:8040")]
    bind: String,

    /// Path to a TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Model gateway URL (overrides the config file).
    #[arg(long)]
    gateway: Option<String>,
}

// ── Server state ──────────────────────────────────────────────────────────

struct ServerState {
    manager: Arc<SessionManager>,
    upload_dir: PathBuf,
}

// ── Response types ────────────────────────────────────────────────────────

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    active_sessions: usize,
}

#[derive(Serialize)]
struct StartResponse {
    status: String,
    session_id: String,
}

#[derive(Deserialize)]
struct StartParams {
    query: String,
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn health(State(state): State<Arc<ServerState>>) -> axum::Json<HealthResponse> {
    axum::Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        active_sessions: state.manager.active_sessions(),
    })
}

async fn start_session(
    State(state): State<Arc<ServerState>>,
    Query(params): Query<StartParams>,
    body: Bytes,
) -> Result<axum::Json<StartResponse>, (StatusCode, String)> {
    if body.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "empty image body".to_string()));
    }

    let session_id = SessionManager::random_session_id();

    // Persist the upload so the model gateway can read it by path.
    let image_path = state.upload_dir.join(format!("{session_id}.img"));
    tokio::fs::write(&image_path, &body).await.map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to store image: {e}"),
        )
    })?;

    state
        .manager
        .create(&session_id, ImageRef(image_path), &params.query)
        .map_err(|e| (StatusCode::CONFLICT, format!("{e}")))?;

    tracing::info!(session = %session_id, query = %params.query, "session started");
    Ok(axum::Json(StartResponse {
        status: "started".to_string(),
        session_id,
    }))
}

async fn stop_session(
    State(state): State<Arc<ServerState>>,
    Path(session_id): Path<String>,
) -> Result<axum::Json<serde_json::Value>, (StatusCode, String)> {
    state.manager.stop(&session_id).map_err(|e| match e {
        SessionError::SessionNotFound { .. } => (StatusCode::BAD_REQUEST, format!("{e}")),
        other => (StatusCode::INTERNAL_SERVER_ERROR, format!("{other}")),
    })?;
    Ok(axum::Json(serde_json::json!({ "status": "stopped" })))
}

// ── WebSocket handler ─────────────────────────────────────────────────────

async fn ws_handler(
    State(state): State<Arc<ServerState>>,
    Path(session_id): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_session(socket, state, session_id))
}

async fn handle_ws_session(mut socket: WebSocket, state: Arc<ServerState>, session_id: String) {
    let mut events = match state.manager.subscribe(&session_id) {
        Ok(rx) => rx,
        Err(e) => {
            let event = SessionEvent::error("unknown_session", e.to_string());
            let _ = send_event(&mut socket, &event).await;
            return;
        }
    };

    // Connecting the observer is what sets the driver running.
    if let Err(e) = state.manager.drive(&session_id) {
        if !matches!(e, SessionError::AlreadyDriving { .. }) {
            let event = SessionEvent::error("drive", e.to_string());
            let _ = send_event(&mut socket, &event).await;
            return;
        }
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let last = matches!(
                            event,
                            SessionEvent::Context { .. } | SessionEvent::Error { .. }
                        );
                        if send_event(&mut socket, &event).await.is_err() {
                            break;
                        }
                        if last {
                            break;
                        }
                    }
                    // Lagged observers miss events but the stream continues.
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(session = %session_id, missed, "observer lagging");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    // Inbound frames are ignored; the stream is one-way.
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    tracing::info!(session = %session_id, "websocket closed");
}

async fn send_event(socket: &mut WebSocket, event: &SessionEvent) -> Result<(), axum::Error> {
    let json = serde_json::to_string(event).expect("event serializes");
    socket.send(Message::Text(json.into())).await
}

// ── Main ──────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path).unwrap_or_else(|e| {
            tracing::error!("failed to load config: {e}");
            std::process::exit(1);
        }),
        None => EngineConfig::default(),
    };
    if let Some(url) = cli.gateway {
        config.gateway.url = url;
    }

    let upload_dir = std::env::temp_dir().join("vantaged");
    if let Err(e) = std::fs::create_dir_all(&upload_dir) {
        tracing::error!("failed to create upload directory: {e}");
        std::process::exit(1);
    }

    let suite = Arc::new(Gateway::suite(&config.gateway));
    let manager = Arc::new(SessionManager::new(suite, config));
    let state = Arc::new(ServerState {
        manager,
        upload_dir,
    });

    let app = Router::new()
        .route("/health", get(health))
        .route("/api/start", post(start_session))
        .route("/api/session/{session_id}/stop", post(stop_session))
        .route("/ws/{session_id}", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state);

    tracing::info!("vantaged listening on {}", cli.bind);

    let listener = tokio::net::TcpListener::bind(&cli.bind)
        .await
        .expect("failed to bind");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("vantaged shutting down");
        })
        .await
        .expect("server error");
}
