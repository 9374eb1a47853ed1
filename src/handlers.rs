//! HTTP and WebSocket handlers for the Sealbox relay server

use crate::error::{RelayError, Result};
use crate::models::{
    AuthRequest, AuthResponse, Claims, ClientEvent, HealthResponse, KeyBundle,
    PreKeyCountResponse, RegisterRequest, RegisterResponse, ServerEvent, SignedPreKey,
    UploadPreKeysRequest, UploadPreKeysResponse, User,
};
use crate::presence::ConnectionSender;
use crate::state::SharedState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{header, HeaderMap},
    response::Response,
    Json,
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use tokio::sync::mpsc;
use tracing::{error, info};
use uuid::Uuid;

/// Health check endpoint
pub async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime(),
    })
}

/// User registration endpoint
pub async fn register_handler(
    State(state): State<SharedState>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>> {
    let user = state
        .register_user(
            &request.username,
            request.registration_id,
            &request.identity_key,
        )
        .await?;
    info!("Registered new user {} ({})", user.username, user.id);
    Ok(Json(RegisterResponse {
        user_id: user.id,
        username: user.username,
    }))
}

/// Session credential endpoint
pub async fn auth_handler(
    State(state): State<SharedState>,
    Json(request): Json<AuthRequest>,
) -> Result<Json<AuthResponse>> {
    let (token, user, expires_at) = state.login_user(&request.username).await?;
    info!("Issued session credential for user {}", user.id);
    Ok(Json(AuthResponse {
        token,
        user_id: user.id,
        expires_at,
    }))
}

/// Own profile for the authenticated user
pub async fn profile_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<User>> {
    let claims = bearer_claims(&state, &headers)?;
    let user = state.get_profile(claims.user_id).await?;
    Ok(Json(user))
}

/// The other registered user, if any
pub async fn partner_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<User>> {
    let claims = bearer_claims(&state, &headers)?;
    let partner = state.get_partner(claims.user_id).await?;
    Ok(Json(partner))
}

// ── PreKey endpoints ──

/// Fetch a user's key bundle. Consumes one one-time prekey per call.
pub async fn key_bundle_handler(
    State(state): State<SharedState>,
    Path(user_id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<KeyBundle>> {
    bearer_claims(&state, &headers)?;
    let bundle = state.consume_bundle(user_id).await?;
    Ok(Json(bundle))
}

/// Upload a batch of one-time prekeys for the authenticated user
pub async fn upload_prekeys_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(request): Json<UploadPreKeysRequest>,
) -> Result<Json<UploadPreKeysResponse>> {
    let claims = bearer_claims(&state, &headers)?;
    let stored = state
        .store_one_time_prekeys(claims.user_id, &request.prekeys)
        .await?;
    info!(
        "Stored {} one-time prekeys for user {}",
        stored, claims.user_id
    );
    Ok(Json(UploadPreKeysResponse {
        status: "stored".to_string(),
        stored,
    }))
}

/// Replace the authenticated user's signed prekey
pub async fn rotate_signed_prekey_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(request): Json<SignedPreKey>,
) -> Result<Json<serde_json::Value>> {
    let claims = bearer_claims(&state, &headers)?;
    state
        .store_signed_prekey(
            claims.user_id,
            request.key_id,
            &request.public_key,
            &request.signature,
        )
        .await?;
    info!(
        "Rotated signed prekey {} for user {}",
        request.key_id, claims.user_id
    );
    Ok(Json(
        serde_json::json!({ "status": "rotated", "key_id": request.key_id }),
    ))
}

/// Remaining one-time prekey count for the authenticated user
pub async fn prekey_count_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<PreKeyCountResponse>> {
    let claims = bearer_claims(&state, &headers)?;
    let count = state.remaining_one_time_count(claims.user_id).await?;
    Ok(Json(PreKeyCountResponse { count }))
}

/// Helper to verify the Authorization header and return its claims
fn bearer_claims(state: &SharedState, headers: &HeaderMap) -> Result<Claims> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| RelayError::Unauthenticated("Missing Authorization header".to_string()))?;
    let token = value
        .strip_prefix("Bearer ")
        .ok_or_else(|| RelayError::Unauthenticated("Expected a bearer credential".to_string()))?;
    state.verify_credential(token)
}

// ── WebSocket ──

/// Per-connection identity. `user_id` stays `None` until the `authenticate`
/// handshake succeeds; a later handshake on the same connection reassigns it.
struct ConnContext {
    connection_id: Uuid,
    user_id: Option<i64>,
}

/// WebSocket upgrade handler. The upgrade itself is unauthenticated; the
/// client must follow with an `authenticate` event before anything else.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedState>) -> Response {
    ws.on_upgrade(move |socket| websocket_handler(socket, state))
}

async fn websocket_handler(socket: WebSocket, state: SharedState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let mut ctx = ConnContext {
        connection_id: Uuid::new_v4(),
        user_id: None,
    };
    info!("WebSocket connection {} opened", ctx.connection_id);

    let outgoing_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sender.send(Message::Text(message)).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Err(err) = handle_ws_event(&text, &mut ctx, &tx, &state).await {
                    let frame = ServerEvent::Error {
                        kind: err.kind().to_string(),
                        message: err.to_string(),
                    }
                    .to_frame();
                    if tx.send(frame).is_err() {
                        break;
                    }
                }
            }
            Ok(Message::Close(_)) => {
                info!("WebSocket closed for connection {}", ctx.connection_id);
                break;
            }
            // Ping/pong are answered at the protocol level; binary is ignored
            Ok(_) => {}
            Err(err) => {
                error!(
                    "WebSocket error on connection {}: {}",
                    ctx.connection_id, err
                );
                break;
            }
        }
    }

    state.presence.unbind(ctx.connection_id).await;
    outgoing_task.abort();
    info!(
        "WebSocket handler terminated for connection {}",
        ctx.connection_id
    );
}

async fn handle_ws_event(
    text: &str,
    ctx: &mut ConnContext,
    tx: &ConnectionSender,
    state: &SharedState,
) -> Result<()> {
    let event: ClientEvent = serde_json::from_str(text)
        .map_err(|err| RelayError::InvalidInput(format!("Unrecognized event: {}", err)))?;

    match event {
        ClientEvent::Authenticate { token } => match state.verify_credential(&token) {
            Ok(claims) => {
                state
                    .presence
                    .bind(claims.user_id, ctx.connection_id, tx.clone())
                    .await;
                ctx.user_id = Some(claims.user_id);
                info!(
                    "Connection {} authenticated as user {}",
                    ctx.connection_id, claims.user_id
                );
                let _ = tx.send(
                    ServerEvent::Authenticated {
                        success: true,
                        user_id: Some(claims.user_id),
                        error: None,
                    }
                    .to_frame(),
                );
            }
            Err(err) => {
                let _ = tx.send(
                    ServerEvent::Authenticated {
                        success: false,
                        user_id: None,
                        error: Some(err.to_string()),
                    }
                    .to_frame(),
                );
            }
        },

        ClientEvent::SendMessage {
            receiver_id,
            payload,
            message_type,
            message_id,
        } => {
            let sender_id = require_auth(ctx)?;
            let ack = state
                .relay_send(sender_id, receiver_id, message_type, &payload, message_id)
                .await?;
            let _ = tx.send(ack.to_frame());
        }

        ClientEvent::Typing {
            receiver_id,
            is_typing,
        } => {
            let sender_id = require_auth(ctx)?;
            state.relay_typing(sender_id, receiver_id, is_typing).await;
        }

        ClientEvent::MessageRead {
            message_id,
            sender_id,
        } => {
            let reader_id = require_auth(ctx)?;
            state.relay_mark_read(reader_id, sender_id, &message_id).await;
        }
    }

    Ok(())
}

fn require_auth(ctx: &ConnContext) -> Result<i64> {
    ctx.user_id.ok_or_else(|| {
        RelayError::Unauthenticated("Authenticate on this connection first".to_string())
    })
}
