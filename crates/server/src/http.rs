//! HTTP and WebSocket transport.
//!
//! The axum router exposes the login/verify/status endpoints and the
//! WebSocket upgrade. Credentials are verified before the upgrade completes;
//! an admitted socket gets a [`Connection`] handler and a select loop that
//! interleaves inbound frames with registry events.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};
use uuid::Uuid;

use webterm_protocol::{ClientMessage, ServerMessage};

use crate::auth::AuthService;
use crate::connection::Connection;
use crate::filter::CommandFilter;
use crate::session::SessionRegistry;

/// Shared state for all routes.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub auth: Arc<AuthService>,
    pub filter: Arc<CommandFilter>,
}

/// Builds the application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/verify", post(verify))
        .route("/api/status", get(status))
        .route("/ws", get(websocket_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

async fn login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> Response {
    match state.auth.login(&req.username, &req.password) {
        Ok(token) => {
            info!(user = %req.username, "Login succeeded");
            Json(json!({ "token": token, "username": req.username })).into_response()
        }
        Err(e) => {
            debug!(user = %req.username, error = %e, "Login rejected");
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn verify(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match bearer_token(&headers).and_then(|token| state.auth.verify(&token).ok()) {
        Some(user) => Json(json!({ "valid": true, "user": { "username": user } })).into_response(),
        None => unauthorized(),
    }
}

async fn status(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(user) = bearer_token(&headers).and_then(|token| state.auth.verify(&token).ok())
    else {
        return unauthorized();
    };

    let stats = state.registry.stats().await;
    Json(json!({
        "status": "ok",
        "user": { "username": user },
        "stats": stats,
    }))
    .into_response()
}

/// Upgrades an authenticated request to a terminal WebSocket.
///
/// Browsers cannot set headers on WebSocket requests, so the token is
/// accepted from the `token` query parameter as well as the Authorization
/// header.
async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let token = params
        .get("token")
        .cloned()
        .or_else(|| bearer_token(&headers));

    let user_id = match token.and_then(|t| state.auth.verify(&t).ok()) {
        Some(user) => user,
        None => {
            debug!("WebSocket handshake rejected: invalid credentials");
            return unauthorized();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: String) {
    let conn_id = Uuid::new_v4();
    info!(%conn_id, user = %user_id, "WebSocket connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (mut connection, mut events) = Connection::new(
        Arc::clone(&state.registry),
        Arc::clone(&state.filter),
        user_id.clone(),
    );

    if send_message(&mut ws_tx, &connection.hello()).await.is_err() {
        connection.teardown().await;
        return;
    }

    loop {
        tokio::select! {
            frame = ws_rx.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        let responses = match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(message) => connection.handle_message(message).await,
                            Err(e) => {
                                debug!(%conn_id, error = %e, "Malformed client message");
                                vec![ServerMessage::error("Invalid message format")]
                            }
                        };
                        let mut failed = false;
                        for response in &responses {
                            if send_message(&mut ws_tx, response).await.is_err() {
                                failed = true;
                                break;
                            }
                        }
                        if failed {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        // Binary frames and transport-level ping/pong are
                        // not part of the protocol.
                        debug!(%conn_id, "Ignoring non-text frame");
                    }
                    Some(Err(e)) => {
                        debug!(%conn_id, error = %e, "WebSocket error");
                        break;
                    }
                }
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                if let Some(message) = connection.handle_event(event) {
                    if send_message(&mut ws_tx, &message).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    connection.teardown().await;
    info!(%conn_id, user = %user_id, "WebSocket disconnected");
}

async fn send_message(
    ws_tx: &mut (impl SinkExt<WsMessage> + Unpin),
    message: &ServerMessage,
) -> Result<(), ()> {
    let text = serde_json::to_string(message).map_err(|_| ())?;
    ws_tx.send(WsMessage::Text(text)).await.map_err(|_| ())
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim_start_matches("Bearer ").to_string())
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "Invalid token" })),
    )
        .into_response()
}
