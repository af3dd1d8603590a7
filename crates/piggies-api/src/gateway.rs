use axum::{
    extract::{Query, State, WebSocketUpgrade},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use piggies_core::PiggiesError;
use piggies_gateway::connection;
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::middleware::decode_token;
use crate::state::{AppState, with_db};

#[derive(Debug, Deserialize)]
pub struct GatewayQuery {
    token: String,
}

/// GET /gateway?token=…
///
/// Browsers cannot set headers on a WebSocket handshake, so the token rides
/// in the query string and is checked before upgrading.
pub async fn upgrade(
    State(state): State<AppState>,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    let claims = decode_token(&state.jwt_secret, &query.token)?;
    let user = with_db(&state, move |db| Ok(db.get_user_by_external_id(&claims.sub)?))
        .await?
        .ok_or(ApiError::Unauthenticated("no session; call POST /auth/session first"))?;
    if user.moderation.is_banned() {
        return Err(PiggiesError::unauthorized("account is banned").into());
    }

    let user_id = user.id;
    let dispatcher = state.dispatcher.clone();
    let presence = move |online: bool| record_presence(state.clone(), user_id, online);
    Ok(ws
        .on_upgrade(move |socket| {
            connection::handle_connection(socket, dispatcher, user_id, presence)
        })
        .into_response())
}

fn record_presence(state: AppState, user_id: Uuid, online: bool) {
    tokio::task::spawn_blocking(move || {
        if let Err(e) = state.db.set_presence(user_id, online, Utc::now()) {
            warn!("Failed to record presence for {}: {:?}", user_id, e);
        }
    });
}
