//! axum WebSocket endpoint that feeds each accepted socket into the server end of a bus.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;

use wsbus_core::{Connection, ReadyState, ServerSide, WsBus};

/// Where the WebSocket endpoint listens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Route serving the upgrade.
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_bind() -> String { "127.0.0.1:45626".into() }
fn default_path() -> String { "/ws".into() }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            path: default_path(),
        }
    }
}

/// Router serving the bus at `path`.
pub fn router(bus: WsBus, path: &str) -> Router {
    Router::new()
        .route(path, get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(bus)
}

/// Serve the bus on an already-bound listener until the listener fails.
pub async fn serve(listener: TcpListener, bus: WsBus, path: &str) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(%addr, path, "listening");
    axum::serve(listener, router(bus, path)).await
}

pub async fn bind_and_serve(config: &ServerConfig, bus: WsBus) -> std::io::Result<()> {
    let listener = TcpListener::bind(&config.bind).await?;
    serve(listener, bus, &config.path).await
}

async fn ws_handler(State(bus): State<WsBus>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, bus.server()))
}

/// Outbound half of one accepted socket, as seen by the bus.
struct ServerConnection {
    tx: mpsc::UnboundedSender<String>,
    open: AtomicBool,
}

impl ServerConnection {
    fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            tx,
            open: AtomicBool::new(true),
        }
    }

    fn mark_closed(&self) {
        self.open.store(false, Ordering::Release);
    }
}

impl Connection for ServerConnection {
    fn send(&self, frame: String) {
        if self.is_open() {
            let _ = self.tx.send(frame);
        }
    }

    fn ready_state(&self) -> ReadyState {
        if self.open.load(Ordering::Acquire) {
            ReadyState::Open
        } else {
            ReadyState::Closed
        }
    }
}

/// Drive one upgraded socket until either side closes it.
pub async fn handle_socket(socket: WebSocket, server: ServerSide) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let conn = Arc::new(ServerConnection::new(tx));
    let id = server.add(conn.clone());
    tracing::info!(conn_id = %id, total = server.connection_count(), "connection opened");

    let sender_task = async move {
        while let Some(frame) = rx.recv().await {
            if ws_sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    };

    let inbound = server.clone();
    let input_task = async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => inbound.on_frame(text.as_str(), id),
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(conn_id = %id, error = %e, "receive error");
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = sender_task => {}
        _ = input_task => {}
    }

    conn.mark_closed();
    server.remove(id);
    tracing::info!(conn_id = %id, total = server.connection_count(), "connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config: ServerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.bind, "127.0.0.1:45626");
        assert_eq!(config.path, "/ws");
    }

    #[tokio::test]
    async fn closed_connection_drops_frames() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = ServerConnection::new(tx);
        conn.send("a".into());
        conn.mark_closed();
        conn.send("b".into());
        assert_eq!(conn.ready_state(), ReadyState::Closed);
        assert_eq!(rx.recv().await.as_deref(), Some("a"));
        assert!(rx.try_recv().is_err());
    }
}
