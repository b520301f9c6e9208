use axum::{
    extract::{Query, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode},
    response::Response,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use application::PresenceSnapshot;

use crate::{auth::bearer_token, error::ApiError, state::AppState, ws_connection::WebSocketConnection};

const DEFAULT_PRESENCE_LIMIT: usize = 50;
const MAX_PRESENCE_LIMIT: usize = 200;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(websocket_upgrade))
        .nest("/api/v1", api_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new().route("/presence", get(list_presence))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Deserialize)]
struct PresenceQuery {
    limit: Option<usize>,
}

async fn list_presence(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PresenceQuery>,
) -> Result<Json<Vec<PresenceSnapshot>>, ApiError> {
    state.jwt_service.identity_from_headers(&headers)?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PRESENCE_LIMIT)
        .min(MAX_PRESENCE_LIMIT);
    Ok(Json(state.presence.list(limit).await))
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

/// 升级前先校验凭证，失败直接返回 401，不进入连接状态机
async fn websocket_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let credential = match query.token {
        Some(token) => Some(token),
        None => bearer_token(&headers)?.map(str::to_string),
    };
    state.gateway.authenticator().authenticate(credential.as_deref())?;

    Ok(ws.on_upgrade(move |socket| async move {
        match state.gateway.connect(credential.as_deref()).await {
            Ok(session) => WebSocketConnection::new(socket, session).run().await,
            Err(err) => tracing::warn!(error = %err, "WebSocket 升级后认证失败"),
        }
    }))
}
