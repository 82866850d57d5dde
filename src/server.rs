use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use futures_util::{SinkExt, StreamExt};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::routes;
use crate::state::AppState;

pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::permissive();

    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/shutdown", post(routes::health::shutdown_handler))
        .route(
            "/api/workspaces",
            get(routes::workspace::list_workspaces).post(routes::workspace::create_workspace),
        )
        .route(
            "/api/workspaces/{workspace_id}",
            get(routes::workspace::get_workspace).delete(routes::workspace::remove_workspace),
        )
        .route(
            "/api/workspaces/{workspace_id}/activate",
            post(routes::workspace::activate_workspace),
        )
        .route(
            "/api/workspaces/{workspace_id}/index",
            post(routes::search::index_workspace),
        )
        .route(
            "/api/workspaces/{workspace_id}/index/status",
            get(routes::search::index_status),
        )
        .route(
            "/api/workspaces/{workspace_id}/index/cancel",
            post(routes::search::cancel_index),
        )
        .route(
            "/api/workspaces/{workspace_id}/reinitialize",
            post(routes::search::reinitialize),
        )
        .route("/api/workspaces/{workspace_id}/search", post(routes::search::search))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Broadcasts server-wide workspace lifecycle events to every connected
/// client. Per-chunk indexing progress rides a different channel
/// (`ProgressReporter::subscribe`), not this one.
async fn handle_socket(socket: WebSocket, state: AppState) {
    tracing::info!("console websocket client connected");
    let mut rx = state.event_tx.subscribe();
    let (mut sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Ok(json) = serde_json::to_string(&event) {
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("console websocket client lagged, skipped {} events", n);
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    tracing::info!("console websocket client disconnected");
}
