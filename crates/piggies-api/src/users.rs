use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use piggies_core::PiggiesError;
use piggies_types::api::{BlockedUser, PresenceRequest, UpdateLocationRequest, UpdateProfileRequest};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::middleware::CurrentUser;
use crate::state::{AppState, with_db};
use crate::views;

/// GET /me
pub async fn get_me(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
) -> ApiResult<impl IntoResponse> {
    let user = with_db(&state, move |db| {
        db.get_user(me.id)?.ok_or(PiggiesError::NotFound("user"))
    })
    .await?;
    Ok(Json(views::user_profile(&user, &state.media, Utc::now())))
}

/// PATCH /me
pub async fn update_me(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Json(req): Json<UpdateProfileRequest>,
) -> ApiResult<impl IntoResponse> {
    let user = with_db(&state, move |db| db.update_profile(me.id, &req)).await?;
    Ok(Json(views::user_profile(&user, &state.media, Utc::now())))
}

/// PUT /me/location
pub async fn update_location(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Json(req): Json<UpdateLocationRequest>,
) -> ApiResult<impl IntoResponse> {
    let user =
        with_db(&state, move |db| db.update_location(me.id, req.latitude, req.longitude)).await?;
    Ok(Json(views::user_profile(&user, &state.media, Utc::now())))
}

/// PUT /me/presence
pub async fn set_presence(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Json(req): Json<PresenceRequest>,
) -> ApiResult<impl IntoResponse> {
    with_db(&state, move |db| db.set_presence(me.id, req.online, Utc::now())).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /users/{id}
pub async fn get_user(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let user = with_db(&state, move |db| db.get_visible_user(me.id, user_id)).await?;
    Ok(Json(views::public_profile(&user, &state.media)))
}

/// PUT /users/{id}/block
pub async fn block(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    with_db(&state, move |db| db.block_user(me.id, user_id, Utc::now())).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /users/{id}/block
pub async fn unblock(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    with_db(&state, move |db| Ok(db.unblock_user(me.id, user_id)?)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /blocks
pub async fn list_blocked(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
) -> ApiResult<impl IntoResponse> {
    let rows = with_db(&state, move |db| Ok(db.list_blocks(me.id)?)).await?;
    let blocked: Vec<BlockedUser> = rows
        .into_iter()
        .map(|row| BlockedUser {
            user_id: row.blocked_id,
            created_at: row.created_at,
        })
        .collect();
    Ok(Json(blocked))
}
