//! HTTP routes and the per-connection websocket loop.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tracing::debug;

use crate::app::{self, SharedState};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::session::{Connection, Identity};

/// Identity forwarded by the auth layer in front of this server.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    pub player_id: Option<String>,
    pub name: Option<String>,
}

impl ConnectParams {
    fn identity(self) -> Identity {
        let id = self
            .player_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("guest-{:08x}", rand::rng().random::<u32>()));
        let display_name = self
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| id.clone());
        Identity { id, display_name }
    }
}

#[derive(Serialize)]
struct HealthModel {
    status: String,
}

#[derive(Serialize)]
struct StatsModel {
    rooms: usize,
    queued: usize,
    connections: usize,
}

/// Application router.
pub fn router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .layer(cors)
        .with_state(state)
}

async fn health() -> Json<HealthModel> {
    Json(HealthModel {
        status: "ok".to_string(),
    })
}

async fn stats(State(state): State<SharedState>) -> Json<StatsModel> {
    Json(StatsModel {
        rooms: state.registry.room_count(),
        queued: state.registry.queue_len(),
        connections: state.connection_count(),
    })
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    let identity = params.identity();
    ws.on_upgrade(move |socket| handle_socket(state, socket, identity))
}

/// Pump one websocket until either side closes it.
async fn handle_socket(state: SharedState, mut socket: WebSocket, identity: Identity) {
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let conn = Connection {
        id: state.next_conn_id(),
        tx: tx.clone(),
    };
    let mut client = app::connect(&state, identity, conn);

    loop {
        tokio::select! {
            // Outbound: forward queued messages to the socket.
            Some(msg) = rx.recv() => {
                match serde_json::to_string(&msg) {
                    Ok(json) => {
                        if socket.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => debug!(error = %e, "failed to encode message"),
                }
            }
            // Inbound: parse and handle client intents.
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(text.as_str()) {
                            Ok(msg) => app::handle_message(&state, &mut client, msg),
                            Err(e) => {
                                let _ = tx.send(ServerMessage::Error {
                                    message: format!("invalid message: {}", e),
                                });
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    _ => continue,
                }
            }
        }
    }

    app::disconnect(&state, &client);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_from_params() {
        let identity = ConnectParams {
            player_id: Some("u-17".into()),
            name: Some("Ann".into()),
        }
        .identity();
        assert_eq!(identity.id, "u-17");
        assert_eq!(identity.display_name, "Ann");
    }

    #[test]
    fn test_guest_identity() {
        let identity = ConnectParams::default().identity();
        assert!(identity.id.starts_with("guest-"));
        assert_eq!(identity.display_name, identity.id);
    }
}
