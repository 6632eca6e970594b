use crate::server::AppState;
use autotrader_orchestrator::EngineHandle;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

/// Streams every [`autotrader_orchestrator::CycleEvent`] as a JSON text frame.
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let engine = state.engine.clone();
    ws.on_upgrade(|socket| websocket_connection(socket, engine))
}

async fn websocket_connection(mut socket: WebSocket, engine: EngineHandle) {
    let mut events = engine.subscribe();

    // Current status first, so a fresh dashboard has something to draw
    if let Ok(json) = serde_json::to_string(&engine.latest_status()) {
        if socket.send(Message::Text(json)).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "WebSocket client lagging, events dropped");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Ok(json) = serde_json::to_string(&event) else { continue };
                if socket.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }

    tracing::info!("WebSocket connection closed");
}
