//! WebSocket relay server with Axum
//!
//! Clients connect with `ws://host:port/<room>` (or `?room=<room>` on `/`).
//! Each socket gets a reader loop that reports lifecycle events to the
//! [`Relay`] and a writer task that drains the connection's outbound queue.
//! `/health` and `/metrics` share the port.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::connection::UpdateMessage;
use crate::error::{RelayError, Result};
use crate::health::HealthChecker;
use crate::metrics::METRICS;
use crate::relay::{CloseReason, ConnectionEvent, Relay};
use crate::shutdown::ShutdownCoordinator;

/// Grace period for a writer to flush queued updates and the close frame
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<Relay>,
    pub health: Arc<HealthChecker>,
    pub shutdown: ShutdownCoordinator,
}

#[derive(Debug, Default, Deserialize)]
pub struct RoomQuery {
    pub room: Option<String>,
}

/// A bound, not yet serving, relay
pub struct RelayServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    state: AppState,
}

impl RelayServer {
    /// Open the listening socket. Fails with [`RelayError::Bind`] when the
    /// address is unavailable.
    pub async fn bind(config: Arc<Config>, shutdown: ShutdownCoordinator) -> Result<Self> {
        let addr = config.bind;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| RelayError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| RelayError::Bind { addr, source })?;

        let relay = Arc::new(Relay::new(config));
        let health = Arc::new(HealthChecker::new(relay.clone()));

        Ok(Self {
            listener,
            local_addr,
            state: AppState {
                relay,
                health,
                shutdown,
            },
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn relay(&self) -> Arc<Relay> {
        self.state.relay.clone()
    }

    /// Accept connections until the shutdown coordinator fires
    pub async fn serve(self) -> Result<()> {
        let shutdown = self.state.shutdown.clone();
        let app = create_router(self.state);

        info!(addr = %self.local_addr, "Relay listening");

        axum::serve(self.listener, app)
            .with_graceful_shutdown(async move {
                shutdown.wait().await;
                info!("Relay server shutdown signal received");
            })
            .await?;

        Ok(())
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health and metrics
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/metrics/json", get(metrics_json_handler))
        // Document rooms
        .route("/", get(root_websocket_handler))
        .route("/*room", get(room_websocket_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.health.check_health())
}

async fn metrics_handler() -> impl IntoResponse {
    match METRICS.encode() {
        Ok(metrics) => (StatusCode::OK, metrics),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        ),
    }
}

async fn metrics_json_handler() -> impl IntoResponse {
    match METRICS.as_json() {
        Ok(metrics) => (StatusCode::OK, Json(metrics)),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": format!("Failed to encode metrics: {}", e)})),
        ),
    }
}

async fn root_websocket_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<RoomQuery>,
    State(state): State<AppState>,
) -> Response {
    upgrade(ws, state, query.room)
}

async fn room_websocket_handler(
    ws: WebSocketUpgrade,
    Path(room): Path<String>,
    Query(query): Query<RoomQuery>,
    State(state): State<AppState>,
) -> Response {
    let room = if room.is_empty() { query.room } else { Some(room) };
    upgrade(ws, state, room)
}

fn upgrade(ws: WebSocketUpgrade, state: AppState, room: Option<String>) -> Response {
    let max_frame_size = state.relay.config().max_frame_size;
    ws.max_message_size(max_frame_size)
        .max_frame_size(max_frame_size)
        .on_upgrade(move |socket| handle_socket(socket, state, room))
}

async fn handle_socket(socket: WebSocket, state: AppState, room: Option<String>) {
    let relay = state.relay.clone();
    let (peer, mut outbound) = relay.connect(room.as_deref());
    let connection = peer.id();

    let (mut sender, mut receiver) = socket.split();

    // Writer: one per connection, so updates leave in queue order
    let mut send_task = tokio::spawn(async move {
        while let Some(update) = outbound.recv().await {
            if let Err(e) = sender.send(Message::from(update)).await {
                debug!(connection = %connection, error = %e, "Writer stopped, socket closed");
                return;
            }
        }
        let _ = sender.close().await;
    });

    relay.dispatch(&peer, ConnectionEvent::Opened);

    let shutdown = state.shutdown.wait();
    tokio::pin!(shutdown);

    let mut writer_finished = false;

    let reason = loop {
        tokio::select! {
            frame = receiver.next() => {
                match frame {
                    Some(Ok(Message::Binary(data))) => {
                        relay.dispatch(&peer, ConnectionEvent::Message(UpdateMessage::binary(data)));
                    }
                    Some(Ok(Message::Text(text))) => {
                        relay.dispatch(&peer, ConnectionEvent::Message(UpdateMessage::text(text)));
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(connection = %connection, "WebSocket closed by client");
                        break CloseReason::ClientClosed;
                    }
                    Some(Ok(_)) => {
                        // Ping/Pong are answered by axum
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection, error = %e, "WebSocket error");
                        break CloseReason::TransportError;
                    }
                }
            }
            _ = &mut send_task => {
                // Writer hit a socket error; nothing more can reach this client
                writer_finished = true;
                break CloseReason::TransportError;
            }
            _ = peer.closed() => {
                debug!(connection = %connection, "Connection closed by relay");
                break CloseReason::DeliveryFailed;
            }
            _ = &mut shutdown => {
                break CloseReason::Shutdown;
            }
        }
    };

    // No-op when the relay already closed this peer
    relay.dispatch(&peer, ConnectionEvent::Closed { reason });

    // Dropping the last local sender ends the writer once the queue drains
    drop(peer);

    if !writer_finished
        && tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut send_task).await.is_err()
    {
        debug!(connection = %connection, "Writer did not drain in time, aborting");
        send_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_into_ws_message() {
        let msg = Message::from(UpdateMessage::binary(vec![0xDE, 0xAD]));
        assert!(matches!(msg, Message::Binary(ref data) if data == &[0xDE, 0xAD]));

        let msg = Message::from(UpdateMessage::text("sync"));
        assert!(matches!(msg, Message::Text(ref text) if text == "sync"));
    }

    #[tokio::test]
    async fn test_bind_reports_address() {
        let mut config = Config::default();
        config.bind = "127.0.0.1:0".parse().unwrap();

        let server = RelayServer::bind(Arc::new(config), ShutdownCoordinator::new())
            .await
            .unwrap();
        assert_ne!(server.local_addr().port(), 0);
        assert_eq!(server.relay().connection_count(), 0);
    }

    #[tokio::test]
    async fn test_bind_error_when_port_taken() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut config = Config::default();
        config.bind = taken.local_addr().unwrap();

        let result = RelayServer::bind(Arc::new(config), ShutdownCoordinator::new()).await;
        assert!(matches!(result, Err(RelayError::Bind { .. })));
    }
}
