//! WebSocket server
//!
//! One axum app per listening port. Each connection gets a sender task
//! and an input loop; requests are handled inline in arrival order, so
//! the per-request envelope sequences on one connection never
//! interleave. All shared state lives in [`AppState`] — two server
//! instances in one process can share the same index.

mod dispatch;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::{sink::SinkExt, stream::StreamExt};
use tokio::sync::{RwLock, mpsc};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use doc_index::{AnswerEngine, DocumentProcessor, VectorIndex};

use crate::ws::{self, ServerMessage};

/// Upload acceptance limits, from the `[server]` config section.
#[derive(Clone, Debug)]
pub struct UploadLimits {
    pub max_file_size_bytes: usize,
    pub allowed_extensions: Vec<String>,
}

/// Shared state behind one listening port.
#[derive(Clone)]
pub struct AppState {
    pub index: Arc<RwLock<VectorIndex>>,
    pub processor: Arc<DocumentProcessor>,
    pub answerer: Arc<dyn AnswerEngine>,
    pub server_port: u16,
    pub active_clients: Arc<AtomicUsize>,
    pub limits: UploadLimits,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn websocket_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Health check endpoint - returns index counters
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.index.read().await.stats();
    Json(serde_json::json!({
        "status": "healthy",
        "port": state.server_port,
        "documents": stats.total_documents,
        "active_clients": state.active_clients.load(Ordering::SeqCst),
    }))
}

/// Handle one WebSocket connection for its whole lifetime.
pub async fn handle_socket(socket: WebSocket, state: AppState) {
    let active = state.active_clients.fetch_add(1, Ordering::SeqCst) + 1;

    // Unique ID for this connection (for log correlation)
    let connection_id = uuid::Uuid::new_v4().to_string();
    info!(
        port = state.server_port,
        conn_id = %connection_id,
        active,
        "new websocket connection"
    );

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Channel for sending messages to the WebSocket
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(100);

    let sender_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match ws::encode_server(&msg) {
                Ok(j) => j,
                Err(e) => {
                    error!("Failed to serialize message: {}", e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // Welcome envelope, before any request.
    let _ = tx
        .send(ServerMessage::ConnectionStatus {
            server_port: state.server_port,
            status: Some("connected".to_string()),
            message: Some(format!(
                "Connected to document server on port {}",
                state.server_port
            )),
        })
        .await;

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match ws::decode_client(&text) {
                Ok(client_msg) => dispatch::handle_message(client_msg, &state, &tx).await,
                Err(e) => {
                    // Bad envelopes answer with an error; the connection
                    // stays open.
                    warn!(error = %e, "undecodable client envelope");
                    let _ = tx
                        .send(ServerMessage::Error {
                            message: e.to_string(),
                        })
                        .await;
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "websocket receive error");
                break;
            }
        }
    }

    drop(tx);
    let _ = sender_task.await;

    let active = state.active_clients.fetch_sub(1, Ordering::SeqCst) - 1;
    info!(
        port = state.server_port,
        conn_id = %connection_id,
        active,
        "websocket connection closed"
    );
}
