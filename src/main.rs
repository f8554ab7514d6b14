use axum::{
    extract::{
        ws::{Message as AxumWsMessage, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use uuid::Uuid;

mod chat;
mod config;
mod drift;
mod error;
mod manager;
mod playback;
mod presence;
mod protocol;
mod room;

use async_trait::async_trait;
use config::Config;
use error::RoomError;
use manager::{PassthroughCatalog, RoomManager};
use presence::{default_display_name, sanitize_display_name};
use protocol::{ClientEvent, ServerEvent};
use room::OutboundSender;

/// Identity collaborator: resolves who is on the other end of a connection
/// before any `join_room` is accepted. Real deployments delegate to the auth
/// service; failures surface as `error{unauthorized}`.
#[async_trait]
trait Identity: Send + Sync {
    async fn resolve(
        &self,
        token: Option<&str>,
        name: Option<&str>,
    ) -> Result<ResolvedUser, RoomError>;
}

struct ResolvedUser {
    id: Uuid,
    display_name: String,
}

/// Issues guest identities from connection parameters when no auth service is
/// wired in. Fails closed on presented tokens: a client sending one expects
/// real validation this deployment cannot provide.
struct GuestIdentity;

#[async_trait]
impl Identity for GuestIdentity {
    async fn resolve(
        &self,
        token: Option<&str>,
        name: Option<&str>,
    ) -> Result<ResolvedUser, RoomError> {
        if token.is_some() {
            return Err(RoomError::Unauthorized);
        }
        let id = Uuid::new_v4();
        let display_name = name
            .and_then(sanitize_display_name)
            .unwrap_or_else(|| default_display_name(id));
        Ok(ResolvedUser { id, display_name })
    }
}

#[derive(Clone)]
struct AppState {
    manager: RoomManager,
    identity: Arc<dyn Identity>,
    config: Arc<Config>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "matinee_server=debug,info".into()),
        )
        .init();

    let config = Arc::new(Config::from_env());
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    let app_state = AppState {
        manager: RoomManager::new((*config).clone(), Arc::new(PassthroughCatalog)),
        identity: Arc::new(GuestIdentity),
        config,
    };

    let app = Router::new()
        .route("/healthz", get(health_check))
        .route("/rooms", post(create_room))
        .route("/ws", get(ws_endpoint))
        .with_state(app_state.clone());

    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Matinee sync server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health_check() -> &'static str {
    "ok"
}

#[derive(Deserialize)]
struct CreateRoomRequest {
    host_id: Uuid,
    movie_ref: String,
    #[serde(default)]
    private: bool,
}

#[derive(Serialize)]
struct CreateRoomResponse {
    room_id: String,
    playable_url: String,
    duration_secs: Option<f64>,
}

/// Administrative room creation, invoked by the external room-management
/// surface. The creator is expected to join over `/ws` as the first
/// participant.
async fn create_room(
    State(state): State<AppState>,
    Json(req): Json<CreateRoomRequest>,
) -> Result<Json<CreateRoomResponse>, (StatusCode, String)> {
    match state
        .manager
        .create_room(req.host_id, &req.movie_ref, req.private)
        .await
    {
        Ok(created) => Ok(Json(CreateRoomResponse {
            room_id: created.room_id,
            playable_url: created.playable_url,
            duration_secs: created.duration_secs,
        })),
        Err(e) => {
            tracing::error!("Failed to resolve movie for room creation: {}", e);
            Err((StatusCode::BAD_GATEWAY, e.to_string()))
        }
    }
}

#[derive(Deserialize)]
struct ConnectParams {
    token: Option<String>,
    name: Option<String>,
}

async fn ws_endpoint(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state, params))
}

async fn handle_connection(mut socket: WebSocket, state: AppState, params: ConnectParams) {
    let user = match state
        .identity
        .resolve(params.token.as_deref(), params.name.as_deref())
        .await
    {
        Ok(user) => user,
        Err(err) => {
            tracing::info!("Rejected connection: {}", err);
            if let Ok(json) = serde_json::to_string(&ServerEvent::Error { kind: err.kind() }) {
                let _ = socket.send(AxumWsMessage::Text(json)).await;
            }
            return;
        }
    };
    tracing::info!("Participant {} connected as {}", user.id, user.display_name);

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(state.config.outbound_queue);

    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("Failed to serialize event: {}", e);
                    continue;
                }
            };
            if ws_sender.send(AxumWsMessage::Text(json)).await.is_err() {
                break;
            }
        }
        // Queue closed: the participant left, timed out, overflowed, or the
        // room terminated. Sever the transport so the client notices.
        let _ = ws_sender.close().await;
    });

    // Held until a join succeeds; from then on the room actor owns the only
    // sender, so dropping the participant there closes this connection.
    let mut gateway_tx = Some(tx);
    let mut joined: Option<String> = None;

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(AxumWsMessage::Text(text)) => {
                handle_frame(&text, &user, &state, &mut gateway_tx, &mut joined).await;
            }
            Ok(AxumWsMessage::Close(_)) => {
                tracing::debug!("Participant {} closing connection", user.id);
                break;
            }
            Err(e) => {
                tracing::debug!("WebSocket error for {}: {}", user.id, e);
                break;
            }
            _ => {}
        }
    }

    // Transport gone: treated as a normal leave, not an error.
    if let Some(room_id) = joined.take() {
        state.manager.leave(&room_id, user.id).await;
    }
    tracing::info!("Participant {} disconnected", user.id);
    send_task.abort();
}

async fn handle_frame(
    text: &str,
    user: &ResolvedUser,
    state: &AppState,
    gateway_tx: &mut Option<OutboundSender>,
    joined: &mut Option<String>,
) {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!("Malformed frame from {}: {}", user.id, e);
            return;
        }
    };

    match event {
        ClientEvent::JoinRoom { room_id } => {
            if joined.is_some() {
                tracing::warn!("Participant {} attempted a second join", user.id);
                return;
            }
            let Some(tx) = gateway_tx.clone() else {
                return;
            };
            match state
                .manager
                .join(&room_id, user.id, user.display_name.clone(), tx)
                .await
            {
                Ok(()) => {
                    *joined = Some(room_id);
                    // Hand the queue over to the room entirely.
                    *gateway_tx = None;
                }
                Err(err) => {
                    tracing::info!("Join to {} rejected for {}: {}", room_id, user.id, err);
                    if let Some(tx) = gateway_tx.as_ref() {
                        let _ = tx.try_send(ServerEvent::Error { kind: err.kind() });
                    }
                }
            }
        }
        ClientEvent::LeaveRoom => {
            if let Some(room_id) = joined.take() {
                state.manager.leave(&room_id, user.id).await;
            }
        }
        other => {
            let Some(room_id) = joined.as_deref() else {
                tracing::debug!("Dropping pre-join event from {}", user.id);
                return;
            };
            if let Err(err) = state.manager.dispatch(room_id, user.id, other).await {
                // Room already torn down; the severed queue closes us shortly.
                tracing::debug!("Dispatch to {} failed: {}", room_id, err);
            }
        }
    }
}
